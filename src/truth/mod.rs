/// 真值事件库 (Truth Event Store)
///
/// 人工记录的真值事件 (tap标识 + 墙钟起止时间) → 各视频段内的帧区间
/// - ingest: 解析日期/时分秒, 处理跨日
/// - resolve_for_segment: 半开区间重叠判定 + 帧号换算 + 裁剪
pub mod timestamp;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::timeline::{VideoSegment, VirtualTimeline};
use timestamp::{
    combine_with_rollover, date_from_text, datetime_from_filename, parse_explicit_date,
    parse_full_datetime, parse_time_of_day, seconds_between,
};

static FIRST_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// tap编号: 标识中第一段连续数字 (`"Grifo 2"` → 2)
pub fn tap_index(identifier: &str) -> Option<u32> {
    FIRST_DIGITS
        .find(identifier)
        .and_then(|m| m.as_str().parse().ok())
}

// ========== 原始记录 ==========

/// 真值原始记录 (由 CSV/JSON 解析方提供)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTruthRecord {
    #[serde(alias = "Grifo", alias = "grifo")]
    pub tap: Option<String>,
    #[serde(alias = "Hora Inicio")]
    pub start: String,
    #[serde(alias = "Hora Fin")]
    pub end: String,
    #[serde(alias = "Fecha")]
    pub date: Option<String>,
    #[serde(alias = "URL Video")]
    pub video_url: Option<String>,
    #[serde(alias = "Video Path")]
    pub video_path: Option<String>,
}

impl RawTruthRecord {
    pub fn new(tap: &str, start: &str, end: &str) -> Self {
        Self {
            tap: Some(tap.to_string()),
            start: start.to_string(),
            end: end.to_string(),
            ..Default::default()
        }
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = Some(date.to_string());
        self
    }

    pub fn with_video_url(mut self, url: &str) -> Self {
        self.video_url = Some(url.to_string());
        self
    }

    pub fn with_video_path(mut self, path: &str) -> Self {
        self.video_path = Some(path.to_string());
        self
    }

    fn tap_or_unknown(&self) -> String {
        self.tap
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }

    /// 日期来源: 显式字段 → URL中的时间戳 → 视频路径文件名
    fn base_date(&self) -> Option<chrono::NaiveDate> {
        if let Some(date) = self.date.as_deref().and_then(parse_explicit_date) {
            return Some(date);
        }
        if let Some(date) = self.video_url.as_deref().and_then(date_from_text) {
            return Some(date);
        }
        self.video_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| datetime_from_filename(Path::new(p)))
            .map(|dt| dt.date())
    }

    /// 解析为墙钟区间
    fn interval(&self) -> std::result::Result<(NaiveDateTime, NaiveDateTime), String> {
        if let (Some(start), Some(end)) = (
            parse_full_datetime(&self.start),
            parse_full_datetime(&self.end),
        ) {
            if end < start {
                return Err(format!("end {} before start {}", end, start));
            }
            return Ok((start, end));
        }

        let start = parse_time_of_day(&self.start)
            .ok_or_else(|| format!("unparsable start time {:?}", self.start))?;
        let end = parse_time_of_day(&self.end)
            .ok_or_else(|| format!("unparsable end time {:?}", self.end))?;
        let date = self
            .base_date()
            .ok_or_else(|| "no date in record, url or video path".to_string())?;
        Ok(combine_with_rollover(date, start, end))
    }
}

// ========== 规范化事件 ==========

/// 规范化后的真值事件
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TruthEvent {
    pub id: usize, // 导入顺序
    pub tap: String,
    pub tap_index: Option<u32>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TruthEvent {
    /// 分组标签 (`TAP 2`)
    pub fn group_label(&self) -> String {
        match self.tap_index {
            Some(i) => format!("TAP {}", i),
            None => self.tap.clone(),
        }
    }
}

/// 对齐到某个视频段的事件
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedEvent {
    pub event_id: usize,
    pub tap: String,
    pub tap_index: Option<u32>,
    pub segment: usize, // 视频段序号
    pub fps: f64,
    pub local_start: i64, // 段内帧号 (未裁剪)
    pub local_end: i64,
    pub start: usize, // 全局帧号 (已裁剪)
    pub end: usize,
}

impl ResolvedEvent {
    /// 区间内帧数 (含两端)
    pub fn frame_span(&self) -> usize {
        self.end - self.start + 1
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub dropped: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub resolved: usize,
    pub outside: usize,          // 与视频段不重叠
    pub dropped_no_start: usize, // 视频段开始时间未知
    pub dropped_empty: usize,    // 裁剪后区间为空
}

impl ResolveReport {
    fn merge(&mut self, other: &ResolveReport) {
        self.resolved += other.resolved;
        self.outside += other.outside;
        self.dropped_no_start += other.dropped_no_start;
        self.dropped_empty += other.dropped_empty;
    }
}

/// 真值事件库
#[derive(Debug, Default)]
pub struct TruthEventStore {
    events: Vec<TruthEvent>,
    report: IngestReport,
}

impl TruthEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从JSON数组文件加载原始记录
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::setup(format!("truth {} unreadable: {}", path.display(), e)))?;
        let records: Vec<RawTruthRecord> = serde_json::from_str(&json)
            .map_err(|e| Error::setup(format!("truth {} invalid: {}", path.display(), e)))?;
        let mut store = Self::new();
        store.ingest(records);
        Ok(store)
    }

    /// 导入原始记录, 替换已有事件; 无法解析的记录被丢弃并计数
    pub fn ingest(&mut self, records: impl IntoIterator<Item = RawTruthRecord>) -> &IngestReport {
        self.events.clear();
        self.report = IngestReport::default();

        for record in records {
            let tap = record.tap_or_unknown();
            match record.interval() {
                Ok((start, end)) => {
                    self.events.push(TruthEvent {
                        id: self.events.len(),
                        tap_index: tap_index(&tap),
                        tap,
                        start,
                        end,
                    });
                    self.report.accepted += 1;
                }
                Err(reason) => {
                    let err = Error::UnresolvableTruthEvent { tap, reason };
                    warn!("⚠️  丢弃真值记录: {}", err);
                    self.report.dropped += 1;
                }
            }
        }

        info!(
            "📄 真值导入: {} 条有效, {} 条丢弃",
            self.report.accepted, self.report.dropped
        );
        &self.report
    }

    pub fn events(&self) -> &[TruthEvent] {
        &self.events
    }

    pub fn report(&self) -> &IngestReport {
        &self.report
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 将事件对齐到一个视频段
    pub fn resolve_for_segment(
        &self,
        segment_index: usize,
        segment: &VideoSegment,
    ) -> (Vec<ResolvedEvent>, ResolveReport) {
        let mut report = ResolveReport::default();
        let mut resolved = Vec::new();

        let Some(seg_start) = segment.start_time else {
            report.dropped_no_start = self.events.len();
            if !self.events.is_empty() {
                warn!(
                    "⚠️  视频段 {} 无法确定开始时间, 丢弃 {} 个事件",
                    segment.path.display(),
                    self.events.len()
                );
            }
            return (resolved, report);
        };
        let seg_end = segment.end_time().unwrap_or(seg_start);
        let (lo, hi) = (segment.global_start, segment.global_end());

        for event in &self.events {
            // 半开区间重叠判定
            if !(event.start < seg_end && event.end > seg_start) {
                report.outside += 1;
                continue;
            }

            let local_start = (seconds_between(seg_start, event.start) * segment.fps).floor() as i64;
            let local_end = (seconds_between(seg_start, event.end) * segment.fps).floor() as i64;

            let start = (lo as i64 + local_start).clamp(lo as i64, hi as i64) as usize;
            let end = (lo as i64 + local_end).clamp(lo as i64, hi as i64) as usize;
            if end < start {
                report.dropped_empty += 1;
                continue;
            }

            debug!(
                "🎯 事件 #{} {} → 帧 [{}, {}] (段 {})",
                event.id, event.tap, start, end, segment_index
            );
            resolved.push(ResolvedEvent {
                event_id: event.id,
                tap: event.tap.clone(),
                tap_index: event.tap_index,
                segment: segment_index,
                fps: segment.fps,
                local_start,
                local_end,
                start,
                end,
            });
            report.resolved += 1;
        }

        (resolved, report)
    }

    /// 将事件对齐到整个虚拟时间轴
    pub fn resolve_for_timeline(
        &self,
        timeline: &VirtualTimeline,
    ) -> (Vec<ResolvedEvent>, ResolveReport) {
        let mut all = Vec::new();
        let mut total = ResolveReport::default();
        for (i, segment) in timeline.segments().iter().enumerate() {
            let (events, report) = self.resolve_for_segment(i, segment);
            all.extend(events);
            total.merge(&report);
        }
        (all, total)
    }
}
