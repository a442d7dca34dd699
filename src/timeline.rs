//! 虚拟时间轴 (Virtual Timeline)
//! Addresses frames across an ordered list of video segments as one index space.
//!
//! 视频段按追加顺序拼接, 全局帧号 [0, total)。取帧时缓存当前打开的视频段句柄:
//! 请求的本地帧恰好是下一帧时顺序读取, 否则先显式定位 (定位代价高)。

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::input::{Frame, FrameSource, MediaHandle, MediaSource};
use crate::truth::timestamp::datetime_from_filename;

/// 视频段
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoSegment {
    pub path: PathBuf,
    pub frame_count: usize,
    pub fps: f64,
    pub global_start: usize,
    pub start_time: Option<NaiveDateTime>, // 录制开始的墙钟时间 (来自文件名)
}

impl VideoSegment {
    pub fn global_end(&self) -> usize {
        self.global_start + self.frame_count - 1
    }

    pub fn contains(&self, global: usize) -> bool {
        global >= self.global_start && global <= self.global_end()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }

    pub fn end_time(&self) -> Option<NaiveDateTime> {
        let millis = (self.duration_seconds() * 1000.0).round() as i64;
        self.start_time.map(|t| t + Duration::milliseconds(millis))
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// 句柄缓存的访问统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorStats {
    pub opens: usize,
    pub seeks: usize,
    pub sequential_reads: usize,
}

/// 当前打开的视频段
struct OpenSegment {
    segment: usize,
    handle: Box<dyn MediaHandle>,
    next_local: usize, // 句柄下一次 read 返回的本地帧号
}

/// 虚拟时间轴
pub struct VirtualTimeline {
    source: Arc<dyn MediaSource>,
    segments: Vec<VideoSegment>,
    total: usize,
    fallback_fps: f64,
    cursor: Option<OpenSegment>,
    stats: CursorStats,
}

impl std::fmt::Debug for VirtualTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTimeline")
            .field("segments", &self.segments)
            .field("total", &self.total)
            .field("open", &self.cursor.as_ref().map(|c| c.segment))
            .field("stats", &self.stats)
            .finish()
    }
}

impl VirtualTimeline {
    pub fn new(source: Arc<dyn MediaSource>, fallback_fps: f64) -> Self {
        Self {
            source,
            segments: Vec::new(),
            total: 0,
            fallback_fps,
            cursor: None,
            stats: CursorStats::default(),
        }
    }

    /// 单一视频源的时间轴
    pub fn single(
        source: Arc<dyn MediaSource>,
        path: impl AsRef<Path>,
        fallback_fps: f64,
    ) -> Result<Self> {
        let mut timeline = Self::new(source, fallback_fps);
        timeline.add_segment(path)?;
        Ok(timeline)
    }

    /// 追加视频段: 读取帧数与帧率, 全局起点为当前总帧数
    pub fn add_segment(&mut self, path: impl AsRef<Path>) -> Result<&VideoSegment> {
        let path = path.as_ref();
        let handle = self.source.open(path).map_err(|e| Error::InvalidMedia {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        })?;

        let frame_count = handle.frame_count();
        if frame_count <= 0 {
            return Err(Error::InvalidMedia {
                path: path.display().to_string(),
                reason: format!("frame count {}", frame_count),
            });
        }
        let fps = match handle.fps() {
            f if f > 0.0 && f.is_finite() => f,
            _ => self.fallback_fps,
        };

        let segment = VideoSegment {
            path: path.to_path_buf(),
            frame_count: frame_count as usize,
            fps,
            global_start: self.total,
            start_time: datetime_from_filename(path),
        };
        info!(
            "🎬 视频段 #{} {}: {} 帧 @ {:.1} fps, 全局 [{}, {}]",
            self.segments.len(),
            segment.name(),
            segment.frame_count,
            segment.fps,
            segment.global_start,
            segment.global_end()
        );

        self.total += segment.frame_count;
        self.segments.push(segment);
        Ok(&self.segments[self.segments.len() - 1])
    }

    pub fn segments(&self) -> &[VideoSegment] {
        &self.segments
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    /// 全局帧号 → (视频段序号, 本地帧号)
    pub fn resolve(&self, global: usize) -> Result<(usize, usize)> {
        if global >= self.total {
            return Err(Error::OutOfRange {
                index: global,
                len: self.total,
            });
        }
        // 第一个 global_start > global 的段之前那一段
        let seg = self
            .segments
            .partition_point(|s| s.global_start <= global)
            - 1;
        Ok((seg, global - self.segments[seg].global_start))
    }

    pub fn segment_of(&self, global: usize) -> Result<&VideoSegment> {
        let (seg, _) = self.resolve(global)?;
        Ok(&self.segments[seg])
    }

    /// 取帧: 复用已打开的句柄, 仅在非顺序访问时定位
    pub fn frame(&mut self, global: usize) -> Result<Frame> {
        let (seg, local) = self.resolve(global)?;
        let cursor = self.ensure_open(seg)?;

        let sequential = local == cursor.next_local;
        if !sequential {
            cursor
                .handle
                .seek(local)
                .map_err(|e| Error::SkippableFrame {
                    frame: global,
                    reason: format!("seek failed: {:#}", e),
                })?;
        }

        let read = cursor.handle.read();
        cursor.next_local = match &read {
            Ok(Some(_)) => local + 1,
            Ok(None) => local,
            // 读取失败后句柄位置未知, 下一帧强制定位
            Err(_) => usize::MAX,
        };

        if sequential {
            self.stats.sequential_reads += 1;
        } else {
            self.stats.seeks += 1;
        }

        match read {
            Ok(Some(image)) => Ok(Frame {
                index: global,
                segment: self.segments[seg].name(),
                local,
                image,
            }),
            // 媒体实际帧数少于报告值
            Ok(None) => Err(Error::SkippableFrame {
                frame: global,
                reason: format!("segment #{} ended before local frame {}", seg, local),
            }),
            Err(e) => Err(Error::SkippableFrame {
                frame: global,
                reason: format!("read failed: {:#}", e),
            }),
        }
    }

    /// 确保目标段的句柄已打开; 切换段时释放旧句柄
    fn ensure_open(&mut self, seg: usize) -> Result<&mut OpenSegment> {
        match self.cursor {
            Some(ref c) if c.segment == seg => {}
            _ => {
                if let Some(old) = self.cursor.take() {
                    debug!("🔁 释放视频段 #{} 句柄", old.segment);
                }
                let path = &self.segments[seg].path;
                let handle = self.source.open(path).map_err(|e| {
                    Error::setup(format!("cannot open {}: {:#}", path.display(), e))
                })?;
                self.stats.opens += 1;
                self.cursor = Some(OpenSegment {
                    segment: seg,
                    handle,
                    next_local: 0,
                });
            }
        }
        self.cursor
            .as_mut()
            .ok_or_else(|| Error::setup("segment handle unavailable"))
    }

    /// 释放当前句柄
    pub fn close(&mut self) {
        self.cursor = None;
    }
}

impl FrameSource for VirtualTimeline {
    fn total_frames(&self) -> usize {
        self.total
    }

    fn fps_at(&self, index: usize) -> f64 {
        self.segment_of(index)
            .map(|s| s.fps)
            .unwrap_or(self.fallback_fps)
    }

    fn open_at(&mut self, start: usize) -> Result<()> {
        if self.total == 0 {
            return Err(Error::setup("timeline has no segments"));
        }
        let (seg, local) = self.resolve(start).map_err(|e| Error::setup(e.to_string()))?;
        let cursor = self.ensure_open(seg)?;
        if local == cursor.next_local {
            return Ok(());
        }
        cursor
            .handle
            .seek(local)
            .map_err(|e| Error::setup(format!("initial seek to {}: {:#}", start, e)))?;
        cursor.next_local = local;
        self.stats.seeks += 1;
        Ok(())
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<Frame>> {
        if index >= self.total {
            return Ok(None);
        }
        self.frame(index).map(Some)
    }

    fn release(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::DynamicImage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 内存中的假媒体源: 路径 → (帧数, 帧率)
    #[derive(Default)]
    pub(crate) struct FakeMedia {
        pub clips: HashMap<PathBuf, (i64, f64)>,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeMedia {
        pub fn with(clips: &[(&str, i64, f64)]) -> Self {
            Self {
                clips: clips
                    .iter()
                    .map(|(p, n, f)| (PathBuf::from(p), (*n, *f)))
                    .collect(),
                log: Arc::default(),
            }
        }
    }

    struct FakeHandle {
        frames: i64,
        fps: f64,
        pos: usize,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MediaHandle for FakeHandle {
        fn frame_count(&self) -> i64 {
            self.frames
        }
        fn fps(&self) -> f64 {
            self.fps
        }
        fn seek(&mut self, frame: usize) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("seek {}", frame));
            self.pos = frame;
            Ok(())
        }
        fn read(&mut self) -> anyhow::Result<Option<DynamicImage>> {
            if self.pos as i64 >= self.frames {
                return Ok(None);
            }
            self.pos += 1;
            Ok(Some(DynamicImage::new_rgb8(1, 1)))
        }
    }

    impl MediaSource for FakeMedia {
        fn open(&self, path: &Path) -> anyhow::Result<Box<dyn MediaHandle>> {
            let (frames, fps) = *self
                .clips
                .get(path)
                .ok_or_else(|| anyhow::anyhow!("no such clip {}", path.display()))?;
            self.log
                .lock()
                .unwrap()
                .push(format!("open {}", path.display()));
            Ok(Box::new(FakeHandle {
                frames,
                fps,
                pos: 0,
                log: self.log.clone(),
            }))
        }
    }

    pub(crate) fn three_segments() -> (VirtualTimeline, Arc<Mutex<Vec<String>>>) {
        let media = FakeMedia::with(&[
            ("a_20240101100000", 100, 15.0),
            ("b_20240101110000", 50, 15.0),
            ("c_20240101120000", 75, 0.0),
        ]);
        let log = media.log.clone();
        let mut timeline = VirtualTimeline::new(Arc::new(media), 15.0);
        timeline.add_segment("a_20240101100000").unwrap();
        timeline.add_segment("b_20240101110000").unwrap();
        timeline.add_segment("c_20240101120000").unwrap();
        (timeline, log)
    }

    #[test]
    fn test_resolve_across_segments() {
        let (timeline, _) = three_segments();
        assert_eq!(timeline.total_frames(), 225);
        assert_eq!(timeline.resolve(0).unwrap(), (0, 0));
        assert_eq!(timeline.resolve(99).unwrap(), (0, 99));
        assert_eq!(timeline.resolve(100).unwrap(), (1, 0));
        assert_eq!(timeline.resolve(224).unwrap(), (2, 74));
        assert!(matches!(
            timeline.resolve(225),
            Err(Error::OutOfRange { index: 225, len: 225 })
        ));
    }

    #[test]
    fn test_segment_offsets_and_metadata() {
        let (timeline, _) = three_segments();
        let segs = timeline.segments();
        assert_eq!(segs[1].global_start, 100);
        assert_eq!(segs[1].global_end(), 149);
        assert_eq!(segs[2].fps, 15.0); // 0 fps 回退到默认值
        assert_eq!(
            segs[0].start_time.unwrap().to_string(),
            "2024-01-01 10:00:00"
        );
        assert_eq!(segs[0].end_time().unwrap().to_string(), "2024-01-01 10:00:06.667");
    }

    #[test]
    fn test_add_segment_rejects_empty_media() {
        let media = FakeMedia::with(&[("empty", 0, 15.0)]);
        let mut timeline = VirtualTimeline::new(Arc::new(media), 15.0);
        assert!(matches!(
            timeline.add_segment("empty"),
            Err(Error::InvalidMedia { .. })
        ));
        assert!(matches!(
            timeline.add_segment("missing"),
            Err(Error::InvalidMedia { .. })
        ));
        assert_eq!(timeline.total_frames(), 0);
    }

    #[test]
    fn test_sequential_reads_do_not_seek() {
        let (mut timeline, log) = three_segments();
        log.lock().unwrap().clear();

        for i in 0..5 {
            assert_eq!(timeline.frame(i).unwrap().index, i);
        }
        let stats = timeline.stats();
        assert_eq!(stats.seeks, 0);
        assert_eq!(stats.sequential_reads, 5);
        assert_eq!(stats.opens, 1);

        // 跳帧触发显式定位
        timeline.frame(50).unwrap();
        assert_eq!(timeline.stats().seeks, 1);
        assert_eq!(log.lock().unwrap().last().unwrap(), "seek 50");

        // 帧携带所在视频段与段内帧号
        let frame = timeline.frame(120).unwrap();
        assert_eq!(frame.segment, "b_20240101110000");
        assert_eq!(frame.local, 20);
        assert_eq!(timeline.stats().opens, 2);
    }

    #[test]
    fn test_switching_segments_reopens_handle() {
        let (mut timeline, log) = three_segments();
        log.lock().unwrap().clear();

        timeline.frame(99).unwrap();
        timeline.frame(100).unwrap(); // 新段的第0帧: 顺序读取
        timeline.frame(101).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "open a_20240101100000",
                "seek 99",
                "open b_20240101110000"
            ]
        );
        assert_eq!(timeline.stats().opens, 2);
    }

    #[test]
    fn test_open_at_positions_handle() {
        let (mut timeline, _) = three_segments();
        timeline.open_at(120).unwrap();
        assert_eq!(timeline.stats().seeks, 1);
        timeline.read_frame(120).unwrap();
        assert_eq!(timeline.stats().seeks, 1);
        assert!(timeline.read_frame(225).unwrap().is_none());
    }

    #[test]
    fn test_open_at_on_empty_timeline_is_setup_error() {
        let mut timeline = VirtualTimeline::new(Arc::new(FakeMedia::default()), 15.0);
        assert!(matches!(timeline.open_at(0), Err(Error::Setup(_))));
    }
}
