//! 事件级指标 (Event-level metrics)
//!
//! - 事件命中: 真值区间 [start, end] 内任一参与评估的类别有检测即为命中
//! - 容差精度: 真值区间两侧各扩展 floor(容差秒 × fps) 帧, 检测落在扩展区内为 TP, 否则为 FP

use serde::Serialize;
use std::collections::BTreeMap;

use super::confusion::ratio;
use crate::buffer::DetectionBuffer;
use crate::config::AnalysisConfig;
use crate::session::DetectionSession;
use crate::truth::ResolvedEvent;

/// 单个事件的明细
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventOutcome {
    pub event_id: usize,
    pub tap: String,
    pub segment: usize,
    pub start: usize,
    pub end: usize,
    pub relative_seconds: f64, // 相对视频段开头
    pub duration_frames: usize,
    pub pieces: usize, // 对齐后的区间段数 (跨视频段边界时 > 1)
    pub frames_per_class: BTreeMap<String, usize>, // 区间内各类别检测到的帧数 (仅非零)
    pub detected: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EventSummary {
    pub detected: usize,
    pub missed: usize,
    pub total: usize,
    pub hit_rate: f64,
    pub outcomes: Vec<EventOutcome>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TolerancePrecision {
    pub true_positive_frames: usize,
    pub false_positive_frames: usize,
    pub noise_seconds: f64,
    pub precision: f64,
}

/// 事件命中统计与逐事件明细
///
/// 跨视频段边界的事件会被对齐成多段 (相同 event_id), 这里按 event_id 合并:
/// 任一段内有参与评估类别的检测即为命中, 各段的逐类别帧数相加。
pub fn event_summary(
    events: &[ResolvedEvent],
    session: &DetectionSession,
    scored: &[&str],
) -> EventSummary {
    let mut summary = EventSummary::default();
    let mut slots: BTreeMap<usize, usize> = BTreeMap::new(); // event_id → outcomes 下标

    for event in events {
        let slot = *slots.entry(event.event_id).or_insert_with(|| {
            summary.outcomes.push(EventOutcome {
                event_id: event.event_id,
                tap: event.tap.clone(),
                segment: event.segment,
                start: event.start,
                end: event.end,
                relative_seconds: event.local_start.max(0) as f64 / event.fps,
                duration_frames: 0,
                pieces: 0,
                frames_per_class: BTreeMap::new(),
                detected: false,
            });
            summary.outcomes.len() - 1
        });

        let outcome = &mut summary.outcomes[slot];
        outcome.start = outcome.start.min(event.start);
        outcome.end = outcome.end.max(event.end);
        outcome.duration_frames += event.end - event.start;
        outcome.pieces += 1;
        for (label, buffer) in session.iter() {
            let n = captured(buffer, event);
            if n > 0 {
                *outcome.frames_per_class.entry(label.to_string()).or_default() += n;
            }
        }
    }

    for outcome in &mut summary.outcomes {
        outcome.detected = scored
            .iter()
            .any(|l| outcome.frames_per_class.get(*l).copied().unwrap_or(0) > 0);
        if outcome.detected {
            summary.detected += 1;
        } else {
            summary.missed += 1;
        }
    }

    summary.total = summary.outcomes.len();
    summary.hit_rate = ratio(summary.detected, summary.total);
    summary
}

fn captured(buffer: &DetectionBuffer, event: &ResolvedEvent) -> usize {
    buffer.query(event.start..event.end + 1)
}

/// 真值时间轴: 事件区间内为 true
pub fn truth_mask<'a>(events: impl IntoIterator<Item = &'a ResolvedEvent>, total: usize) -> Vec<bool> {
    let mut mask = vec![false; total];
    for event in events {
        fill(&mut mask, event.start, event.end);
    }
    mask
}

/// 扩展真值时间轴: 每个区间两侧各加容差帧 (按事件所在视频段的 fps)
pub fn expanded_mask(events: &[ResolvedEvent], total: usize, config: &AnalysisConfig) -> Vec<bool> {
    let mut mask = vec![false; total];
    for event in events {
        let tolerance = config.tolerance_frames(event.fps);
        fill(
            &mut mask,
            event.start.saturating_sub(tolerance),
            event.end.saturating_add(tolerance),
        );
    }
    mask
}

fn fill(mask: &mut [bool], start: usize, end: usize) {
    if mask.is_empty() || start >= mask.len() {
        return;
    }
    let end = end.min(mask.len() - 1);
    for slot in &mut mask[start..=end] {
        *slot = true;
    }
}

/// 容差精度与噪声时长
pub fn tolerance_precision(
    predicted: &[bool],
    mask: &[bool],
    fps_at: impl Fn(usize) -> f64,
) -> TolerancePrecision {
    let mut result = TolerancePrecision::default();
    for (index, (&hit, &inside)) in predicted.iter().zip(mask).enumerate() {
        if !hit {
            continue;
        }
        if inside {
            result.true_positive_frames += 1;
        } else {
            result.false_positive_frames += 1;
            let fps = fps_at(index);
            if fps > 0.0 {
                result.noise_seconds += 1.0 / fps;
            }
        }
    }
    result.precision = ratio(
        result.true_positive_frames,
        result.true_positive_frames + result.false_positive_frames,
    );
    result
}
