//! 文本报表
//! Plain-text rendering of evaluation results

use std::fmt::Write;

use super::{ClassMetrics, EvaluationResult, EventSummary, Verdict};
use crate::pipeline::RunStats;
use crate::truth::{IngestReport, ResolveReport};

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Acceptable => "✅ [ACCEPTABLE FOR PRODUCTION]",
            Verdict::UnderReview => "⚠️ [UNDER REVIEW]",
            Verdict::NotAcceptable => "❌ [NOT ACCEPTABLE]",
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            Verdict::Acceptable => "Detects nearly every opening with low counting error.",
            Verdict::UnderReview => "Detection is good but more than 10% of real events are missed.",
            Verdict::NotAcceptable => "Sensitivity is too low: too many real events are skipped.",
        }
    }
}

/// mm:ss
pub fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

const RULE: usize = 112;

fn metrics_row(out: &mut String, name: &str, m: &ClassMetrics) {
    let _ = writeln!(
        out,
        "{:<18} | {:>7.4} | {:>8.2}% | {:>8.2}% | {:>8.2}% | {:>8.2}% | {:>6} | {:>6} | {:>6} | {:>7}",
        name,
        m.kappa,
        m.recall * 100.0,
        m.precision * 100.0,
        m.f1 * 100.0,
        m.accuracy * 100.0,
        m.counts.tp,
        m.counts.fp,
        m.counts.fn_,
        m.counts.tn
    );
}

/// 完整报表: 帧级表格 + 事件汇总 + 容差精度 + 判定
pub fn render(result: &EvaluationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Frame-level report ({} frames, stride {})",
        result.total_frames, result.stride
    );
    let _ = writeln!(
        out,
        "{:<18} | {:>7} | {:>9} | {:>9} | {:>9} | {:>9} | {:>6} | {:>6} | {:>6} | {:>7}",
        "CLASS", "KAPPA", "RECALL", "PRECISION", "F1", "ACCURACY", "TP", "FP", "FN", "TN"
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE));
    for m in &result.classes {
        let name = format!("{} ({})", m.label, m.alias);
        metrics_row(&mut out, &name, m);
    }
    let _ = writeln!(out, "{}", "=".repeat(RULE));
    metrics_row(&mut out, "GLOBAL", &result.global);
    let _ = writeln!(out, "scored classes: {}", result.scored_classes.join(", "));
    let _ = writeln!(out);

    let events = &result.events;
    let _ = writeln!(out, "1. Effectiveness (is anything missed?)");
    let _ = writeln!(out, "   events detected: {}/{}", events.detected, events.total);
    let _ = writeln!(out, "   events missed:   {}", events.missed);
    let _ = writeln!(out, "   hit rate:        {:.1}%", events.hit_rate * 100.0);
    let _ = writeln!(out);

    let tol = &result.tolerance;
    let _ = writeln!(out, "2. Reliability (does it invent things?)");
    let _ = writeln!(out, "   precision with tolerance: {:.1}%", tol.precision * 100.0);
    let _ = writeln!(
        out,
        "   frames inside / outside:  {} / {}",
        tol.true_positive_frames, tol.false_positive_frames
    );
    let _ = writeln!(out, "   noise time:               {:.1} s", tol.noise_seconds);
    let _ = writeln!(out);

    let _ = writeln!(out, "📢 VERDICT:");
    let _ = writeln!(out, "{}", result.verdict.label());
    let _ = writeln!(out, "{}", result.verdict.explanation());
    out
}

/// 数据质量: 跳过的帧、丢弃的真值记录与无法对齐的事件
pub fn render_data_quality(stats: &RunStats, ingest: &IngestReport, resolve: &ResolveReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "3. Data quality");
    let _ = writeln!(
        out,
        "   frames skipped:         {} (read {}, detector {})",
        stats.skipped_frames, stats.read_failures, stats.detector_failures
    );
    let _ = writeln!(
        out,
        "   truth records dropped:  {} of {}",
        ingest.dropped,
        ingest.accepted + ingest.dropped
    );
    let _ = writeln!(
        out,
        "   events unresolved:      {} (unknown segment start {}, empty after clamp {})",
        resolve.dropped_no_start + resolve.dropped_empty,
        resolve.dropped_no_start,
        resolve.dropped_empty
    );
    let _ = writeln!(out, "   events outside videos:  {}", resolve.outside);
    out
}

/// 逐事件明细表
pub fn render_events(summary: &EventSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} | {:<12} | {:<8} | {:>9} | {:<40} | {}",
        "ID", "TRUTH TAP", "START", "DURATION", "FRAMES CAPTURED PER CLASS", "STATUS"
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE));
    for o in &summary.outcomes {
        let captured = if o.frames_per_class.is_empty() {
            "--- (total silence) ---".to_string()
        } else {
            o.frames_per_class
                .iter()
                .map(|(label, n)| format!("{}: {}", label, n))
                .collect::<Vec<_>>()
                .join(" | ")
        };
        let status = if o.detected { "✅ DETECTED" } else { "❌ MISSED" };
        let _ = writeln!(
            out,
            "{:<6} | {:<12} | {:<8} | {:>7} f | {:<40} | {}",
            format!("#{}", o.event_id + 1),
            o.tap,
            format_seconds(o.relative_seconds),
            o.duration_frames,
            captured,
            status
        );
    }
    let _ = writeln!(out, "Total events in range: {}", summary.outcomes.len());
    out
}
