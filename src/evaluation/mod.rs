/// 评估系统 (Evaluation Engine)
///
/// 检测时间轴 vs 真值时间轴:
/// - confusion: 帧级混淆矩阵、recall / precision / f1 / accuracy / Cohen's kappa
/// - events:    事件命中率、逐事件明细、带容差的精度与噪声时长
/// - report:    文本报表与上线判定
pub mod confusion;
pub mod events;
pub mod report;

pub use confusion::ConfusionCounts;
pub use events::{EventOutcome, EventSummary, TolerancePrecision};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AnalysisConfig, VerdictThresholds};
use crate::session::DetectionSession;
use crate::timeline::VideoSegment;
use crate::truth::ResolvedEvent;
use confusion::subsample;

/// 单个类别 (或全局合并) 的帧级指标
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub alias: String,
    pub tap: Option<u32>, // 真值只取该 tap 的事件; None 时使用全部事件
    pub counts: ConfusionCounts,
    pub kappa: f64,
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl ClassMetrics {
    fn new(label: &str, alias: String, tap: Option<u32>, y_true: &[bool], y_pred: &[bool]) -> Self {
        let counts = ConfusionCounts::from_pairs(y_true, y_pred);
        Self {
            label: label.to_string(),
            alias,
            tap,
            kappa: counts.kappa(),
            recall: counts.recall(),
            precision: counts.precision(),
            f1: counts.f1(),
            accuracy: counts.accuracy(),
            counts,
        }
    }
}

/// 上线判定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Acceptable,
    UnderReview,
    NotAcceptable,
}

impl Verdict {
    /// `recall`: 事件级灵敏度 (命中事件 / 真值事件); `accuracy`: 帧级全局准确率
    pub fn from_metrics(recall: f64, accuracy: f64, thresholds: &VerdictThresholds) -> Self {
        if recall >= thresholds.min_recall && accuracy >= thresholds.min_accuracy {
            Verdict::Acceptable
        } else if recall >= thresholds.review_recall && recall < thresholds.min_recall {
            Verdict::UnderReview
        } else {
            Verdict::NotAcceptable
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub total_frames: usize,
    pub stride: usize,
    pub scored_classes: Vec<String>,
    pub classes: Vec<ClassMetrics>,
    pub global: ClassMetrics,
    pub events: EventSummary,
    pub tolerance: TolerancePrecision,
    pub verdict: Verdict,
}

pub struct EvaluationEngine<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> EvaluationEngine<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// 参与评估的类别: 只取配置中声明的 scored_classes
    pub fn scored_labels<'s>(&self, session: &'s DetectionSession) -> Vec<&'s str> {
        session
            .labels()
            .filter(|l| self.config.is_scored(l))
            .collect()
    }

    pub fn evaluate(
        &self,
        session: &DetectionSession,
        resolved: &[ResolvedEvent],
        segments: &[VideoSegment],
    ) -> EvaluationResult {
        let config = self.config;
        let stride = config.stride.max(1);
        let total = session.total_frames();

        let scored = self.scored_labels(session);
        if scored.is_empty() {
            warn!("⚠️  未声明参与评估的类别 (scored_classes), 所有预测视为空");
        }

        // ========== 帧级指标 ==========
        let unified_truth = events::truth_mask(resolved, total);
        let unified_sampled = subsample(&unified_truth, stride);

        let classes: Vec<ClassMetrics> = session
            .iter()
            .map(|(label, buffer)| {
                let tap = config.tap_for(label);
                let y_true = match tap {
                    Some(t) => subsample(
                        &events::truth_mask(resolved.iter().filter(|e| e.tap_index == Some(t)), total),
                        stride,
                    ),
                    None => unified_sampled.clone(),
                };
                let y_pred = subsample(&buffer.snapshot(), stride);
                ClassMetrics::new(label, config.alias_for(label), tap, &y_true, &y_pred)
            })
            .collect();

        let predicted = session.union(scored.iter().copied());
        let global = ClassMetrics::new(
            "global",
            "ALL".into(),
            None,
            &unified_sampled,
            &subsample(&predicted, stride),
        );

        // ========== 事件级指标 ==========
        let event_summary = events::event_summary(resolved, session, &scored);
        let mask = events::expanded_mask(resolved, total, config);
        let tolerance = events::tolerance_precision(&predicted, &mask, |frame| {
            fps_at(segments, frame).unwrap_or(config.fallback_fps)
        });

        // 灵敏度取事件命中率 (每个真值事件一行), 准确率取帧级全局准确率
        let verdict =
            Verdict::from_metrics(event_summary.hit_rate, global.accuracy, &config.verdict);
        info!(
            "📊 评估完成: kappa {:.3}, 帧级 recall {:.1}%, 事件命中 {}/{}, 判定 {:?}",
            global.kappa,
            global.recall * 100.0,
            event_summary.detected,
            event_summary.total,
            verdict
        );

        EvaluationResult {
            total_frames: total,
            stride,
            scored_classes: scored.iter().map(|s| s.to_string()).collect(),
            classes,
            global,
            events: event_summary,
            tolerance,
            verdict,
        }
    }
}

/// 全局帧所在视频段的帧率
fn fps_at(segments: &[VideoSegment], frame: usize) -> Option<f64> {
    let i = segments.partition_point(|s| s.global_start <= frame);
    segments
        .get(i.checked_sub(1)?)
        .filter(|s| s.contains(frame))
        .map(|s| s.fps)
}
