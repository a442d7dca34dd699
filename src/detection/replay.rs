//! 回放检测器 - 从JSON读取已记录的检测结果
//!
//! 文件格式:
//! ```json
//! { "classes": ["tap_1", "tap_2"],
//!   "frames": { "150": [{ "label": "tap_1", "confidence": 0.8 }] },
//!   "segments": { "cam_20240101100000": { "12": [{ "label": "tap_2", "confidence": 0.6 }] } } }
//! ```
//! `frames` 的键为拼接时间轴上的全局帧号; `segments` 按视频段名 + 段内帧号索引。
//! 某个视频段在 `segments` 中有记录时只使用这些记录。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::{non_max_suppression, Detection, Detector};
use crate::input::Frame;
use crate::timeline::VideoSegment;

type FrameRecords = HashMap<usize, Vec<Detection>>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayDetector {
    classes: Vec<String>,
    frames: FrameRecords,
    segments: HashMap<String, FrameRecords>,
}

impl ReplayDetector {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取检测记录失败: {}", path.display()))?;
        let mut replay: Self = serde_json::from_str(&json)
            .with_context(|| format!("检测记录格式错误: {}", path.display()))?;

        // 未声明类别时从记录中收集
        if replay.classes.is_empty() {
            let seen: BTreeSet<&str> = replay
                .frames
                .values()
                .chain(replay.segments.values().flat_map(|f| f.values()))
                .flatten()
                .map(|d| d.label.as_str())
                .collect();
            replay.classes = seen.into_iter().map(String::from).collect();
        }
        info!(
            "✅ 检测记录已加载: {} 帧 (全局) + {} 个视频段, {} 个类别",
            replay.frames.len(),
            replay.segments.len(),
            replay.classes.len()
        );
        Ok(replay)
    }

    /// 追加一帧的检测结果 (全局帧号)
    pub fn insert(&mut self, frame: usize, detections: Vec<Detection>) {
        self.frames.entry(frame).or_default().extend(detections);
    }

    /// 追加某视频段内一帧的检测结果
    pub fn insert_for_segment(&mut self, segment: &str, local: usize, detections: Vec<Detection>) {
        self.segments
            .entry(segment.to_string())
            .or_default()
            .entry(local)
            .or_default()
            .extend(detections);
    }

    /// 按拼接顺序把全局帧号的记录拆分到各视频段 (逐个视频分析前调用)
    ///
    /// 返回无法归入任何视频段的帧数。
    pub fn split_by_segments(&mut self, segments: &[VideoSegment]) -> usize {
        let mut orphaned = 0;
        for (global, detections) in std::mem::take(&mut self.frames) {
            match segments.iter().find(|s| s.contains(global)) {
                Some(segment) => self
                    .segments
                    .entry(segment.name())
                    .or_default()
                    .entry(global - segment.global_start)
                    .or_default()
                    .extend(detections),
                None => orphaned += 1,
            }
        }
        if orphaned > 0 {
            warn!("⚠️  {} 帧检测记录不属于任何视频段, 已丢弃", orphaned);
        }
        orphaned
    }

    pub fn recorded_frames(&self) -> usize {
        self.frames.len() + self.segments.values().map(HashMap::len).sum::<usize>()
    }

    fn records_for(&self, frame: &Frame) -> Option<&Vec<Detection>> {
        match self.segments.get(&frame.segment) {
            Some(records) => records.get(&frame.local),
            None => self.frames.get(&frame.index),
        }
    }
}

impl Detector for ReplayDetector {
    fn classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn detect(
        &mut self,
        frame: &Frame,
        confidence: f32,
        iou: f32,
    ) -> anyhow::Result<Vec<Detection>> {
        let mut xs: Vec<Detection> = self
            .records_for(frame)
            .map(|ds| {
                ds.iter()
                    .filter(|d| d.confidence >= confidence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        non_max_suppression(&mut xs, iou);
        Ok(xs)
    }
}
