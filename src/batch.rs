//! 批量分析 (Batch Runner)
//!
//! 视频段逐个分析: 每个视频段是独立的单段时间轴, 检测时间轴重新清零,
//! 真值按该段重新对齐; 上一段 Finished 后才开始下一段。

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AnalysisConfig, VerdictThresholds};
use crate::detection::Detector;
use crate::error::{Error, Result};
use crate::evaluation::confusion::ratio;
use crate::evaluation::report;
use crate::evaluation::{ConfusionCounts, EvaluationEngine, EvaluationResult, Verdict};
use crate::input::{FrameSource, MediaSource};
use crate::pipeline::{LiveAnalysisPipeline, PipelineState, RunStats};
use crate::session::DetectionSession;
use crate::timeline::{VideoSegment, VirtualTimeline};
use crate::truth::{IngestReport, ResolveReport, TruthEventStore};

/// 一次完整分析 (流水线运行 + 评估) 的结果
#[derive(Clone, Debug, Serialize)]
pub struct Analysis {
    pub segments: Vec<VideoSegment>,
    pub stats: RunStats,
    pub ingest: IngestReport,
    pub resolve: ResolveReport,
    pub result: EvaluationResult,
}

impl Analysis {
    /// 评估报表 + 数据质量
    pub fn render(&self) -> String {
        let mut out = report::render(&self.result);
        out.push('\n');
        out.push_str(&report::render_data_quality(
            &self.stats,
            &self.ingest,
            &self.resolve,
        ));
        out
    }
}

/// 在一条时间轴上运行流水线直到读完, 然后评估。返回分析结果与检测器。
pub fn analyse(
    timeline: VirtualTimeline,
    detector: Box<dyn Detector>,
    session: &mut DetectionSession,
    config: &AnalysisConfig,
    truth: &TruthEventStore,
) -> Result<(Analysis, Box<dyn Detector>)> {
    session.reset(timeline.total_frames());
    let pipeline =
        LiveAnalysisPipeline::start(timeline, detector, session.clone(), config.clone(), 0)?;
    let output = pipeline.wait()?;
    if output.state != PipelineState::Finished {
        warn!("⚠️  流水线未读完即停止 ({:?})", output.state);
    }

    let timeline = output.source;
    let (events, resolve) = truth.resolve_for_timeline(&timeline);
    if resolve.dropped_no_start + resolve.dropped_empty > 0 {
        warn!(
            "⚠️  {} 个事件无法对齐 (开始时间未知 {}, 区间为空 {})",
            resolve.dropped_no_start + resolve.dropped_empty,
            resolve.dropped_no_start,
            resolve.dropped_empty
        );
    }
    let result = EvaluationEngine::new(config).evaluate(session, &events, timeline.segments());

    Ok((
        Analysis {
            segments: timeline.segments().to_vec(),
            stats: output.stats,
            ingest: truth.report().clone(),
            resolve,
            result,
        },
        output.detector,
    ))
}

/// 多个视频合并后的汇总
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub videos: usize,
    pub failed: usize,
    pub counts: ConfusionCounts, // 各视频全局混淆矩阵之和
    pub recall: f64,
    pub accuracy: f64,
    pub kappa: f64,
    pub events_detected: usize,
    pub events_total: usize,
    pub hit_rate: f64,
    pub true_positive_frames: usize,
    pub false_positive_frames: usize,
    pub noise_seconds: f64,
    pub precision_with_tolerance: f64,
    pub skipped_frames: usize,
    pub truth_dropped: usize,     // 导入时丢弃的真值记录 (所有视频共用一份真值)
    pub events_unresolved: usize, // 各视频中无法对齐的事件
    pub verdict: Option<Verdict>,
}

impl BatchSummary {
    fn from_items(items: &[Analysis], failed: usize, thresholds: &VerdictThresholds) -> Self {
        let mut summary = Self {
            videos: items.len(),
            failed,
            ..Default::default()
        };
        for item in items {
            let r = &item.result;
            summary.counts.tp += r.global.counts.tp;
            summary.counts.fp += r.global.counts.fp;
            summary.counts.fn_ += r.global.counts.fn_;
            summary.counts.tn += r.global.counts.tn;
            summary.events_detected += r.events.detected;
            summary.events_total += r.events.total;
            summary.true_positive_frames += r.tolerance.true_positive_frames;
            summary.false_positive_frames += r.tolerance.false_positive_frames;
            summary.noise_seconds += r.tolerance.noise_seconds;
            summary.skipped_frames += item.stats.skipped_frames;
            summary.events_unresolved +=
                item.resolve.dropped_no_start + item.resolve.dropped_empty;
            summary.truth_dropped = item.ingest.dropped;
        }
        summary.recall = summary.counts.recall();
        summary.accuracy = summary.counts.accuracy();
        summary.kappa = summary.counts.kappa();
        summary.hit_rate = ratio(summary.events_detected, summary.events_total);
        summary.precision_with_tolerance = ratio(
            summary.true_positive_frames,
            summary.true_positive_frames + summary.false_positive_frames,
        );
        if !items.is_empty() {
            summary.verdict = Some(Verdict::from_metrics(
                summary.hit_rate,
                summary.accuracy,
                thresholds,
            ));
        }
        summary
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub items: Vec<Analysis>,
    pub failures: Vec<BatchFailure>,
    pub summary: BatchSummary,
}

pub struct BatchRunner {
    media: Arc<dyn MediaSource>,
    config: AnalysisConfig,
    queue: VecDeque<PathBuf>,
}

impl BatchRunner {
    pub fn new(media: Arc<dyn MediaSource>, config: AnalysisConfig) -> Self {
        Self {
            media,
            config,
            queue: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, path: impl Into<PathBuf>) {
        self.queue.push_back(path.into());
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 依次分析队列中的所有视频。单个视频无法打开时记录失败并继续。
    ///
    /// 每个视频的帧号都从 0 开始; 回放检测记录需按视频段名索引
    /// (见 `ReplayDetector::split_by_segments`)。
    pub fn run(
        &mut self,
        mut detector: Box<dyn Detector>,
        truth: &TruthEventStore,
    ) -> Result<BatchReport> {
        self.config.validate()?;
        self.config.register_classes(detector.classes());
        let mut session = DetectionSession::from_config(&self.config, 0);

        let total = self.queue.len();
        let mut items = Vec::new();
        let mut failures = Vec::new();

        while let Some(path) = self.queue.pop_front() {
            info!(
                "🎬 批量分析 {}/{}: {}",
                items.len() + failures.len() + 1,
                total,
                path.display()
            );

            let mut timeline = match VirtualTimeline::single(
                self.media.clone(),
                &path,
                self.config.fallback_fps,
            ) {
                Ok(timeline) => timeline,
                Err(e) => {
                    warn!("❌ 跳过 {}: {}", path.display(), e);
                    failures.push(BatchFailure {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            // 先在这里打开, 失败时检测器仍在手中
            if let Err(e) = timeline.open_at(0) {
                warn!("❌ 跳过 {}: {}", path.display(), e);
                failures.push(BatchFailure {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }

            let (analysis, returned) =
                analyse(timeline, detector, &mut session, &self.config, truth)?;
            detector = returned;
            items.push(analysis);
        }

        let summary = BatchSummary::from_items(&items, failures.len(), &self.config.verdict);
        info!(
            "📊 批量分析完成: {} 个视频, {} 个失败, 事件命中 {}/{}",
            summary.videos, summary.failed, summary.events_detected, summary.events_total
        );
        Ok(BatchReport {
            items,
            failures,
            summary,
        })
    }
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 所有视频都失败时视为启动错误
    pub fn ensure_any(self) -> Result<Self> {
        if self.items.is_empty() && !self.failures.is_empty() {
            return Err(Error::setup(format!(
                "no video could be analysed ({} failed)",
                self.failures.len()
            )));
        }
        Ok(self)
    }
}
