/// 检测器验证 (Tap QA)
///
/// 把检测器在视频上的逐帧输出与人工记录的真值事件对比,
/// 给出混淆矩阵、Cohen's kappa、事件命中率与上线判定。
///
/// 流程:
/// 1. 加载配置与真值
/// 2. 视频段拼接为虚拟时间轴 (或 --batch 逐个分析)
/// 3. 分析流水线 (独立工作线程) 写入检测时间轴
/// 4. 评估并输出报表
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use tapqa_rs::evaluation::report;
use tapqa_rs::{
    analyse, AnalysisConfig, BatchRunner, DetectionSession, Detector, ImageSequenceSource,
    MediaSource, ReplayDetector, TimeoutDetector, TruthEventStore, VirtualTimeline,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "检测器验证 - detector vs ground truth", long_about = None)]
struct Args {
    /// 视频段目录 (图片序列, 目录名含 YYYYMMDDHHMMSS)
    #[arg(short, long, num_args = 1.., required = true)]
    segments: Vec<PathBuf>,

    /// 已记录的检测结果 (JSON)
    #[arg(short, long)]
    detections: PathBuf,

    /// 真值事件 (JSON 数组)
    #[arg(short, long)]
    truth: PathBuf,

    /// 分析配置 (不存在时写出默认配置)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 每N帧检测一次
    #[arg(long)]
    stride: Option<usize>,

    /// 真值区间两侧的容差 (秒)
    #[arg(long)]
    tolerance: Option<f64>,

    /// 图片序列的帧率
    #[arg(long)]
    fps: Option<f64>,

    /// 参与评估的类别 (覆盖配置)
    #[arg(long, num_args = 1..)]
    scored: Vec<String>,

    /// 逐个视频分析
    #[arg(long, default_value_t = false)]
    batch: bool,

    /// 以 JSON 输出结果
    #[arg(long, default_value_t = false)]
    json: bool,

    /// 输出逐事件明细
    #[arg(long, default_value_t = false)]
    events: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        if let Some(stride) = self.stride {
            config.stride = stride;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance_seconds = tolerance;
        }
        if let Some(fps) = self.fps {
            config.fallback_fps = fps;
        }
        if !self.scored.is_empty() {
            config.scored_classes = self.scored.iter().cloned().collect();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tapqa_rs=info,tapqa=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = args.load_config()?;

    info!("🚀 检测器验证启动");
    info!("📦 检测记录: {}", args.detections.display());
    info!("📄 真值: {}", args.truth.display());

    let truth = TruthEventStore::load_json(&args.truth).context("loading ground truth")?;
    let mut replay = ReplayDetector::load(&args.detections)?;
    let media: Arc<dyn MediaSource> = Arc::new(ImageSequenceSource::new(config.fallback_fps));

    if args.batch {
        // 全局帧号按拼接顺序换算到各视频段
        let mut layout = VirtualTimeline::new(media.clone(), config.fallback_fps);
        for segment in &args.segments {
            if let Err(e) = layout.add_segment(segment) {
                warn!("⚠️  {} 不参与帧号换算: {}", segment.display(), e);
            }
        }
        replay.split_by_segments(layout.segments());
    }
    config.register_classes(replay.classes());
    let detector: Box<dyn Detector> = if config.detector_timeout_ms > 0 {
        Box::new(TimeoutDetector::new(Box::new(replay), config.detector_timeout()))
    } else {
        Box::new(replay)
    };

    // ========== 批量模式 ==========
    if args.batch {
        let mut runner = BatchRunner::new(media, config);
        for segment in &args.segments {
            runner.enqueue(segment);
        }
        let outcome = runner.run(detector, &truth)?.ensure_any()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            return Ok(());
        }
        for item in &outcome.items {
            let names: Vec<String> = item.segments.iter().map(|s| s.name()).collect();
            println!("===== {} =====", names.join(", "));
            println!("{}", item.render());
            if args.events {
                println!("{}", report::render_events(&item.result.events));
            }
        }
        for failure in &outcome.failures {
            println!("❌ {}: {}", failure.path.display(), failure.reason);
        }
        let s = &outcome.summary;
        println!("===== SUMMARY ({} videos, {} failed) =====", s.videos, s.failed);
        println!(
            "frame recall {:.2}% | accuracy {:.2}% | kappa {:.4} | events {}/{} | precision with tolerance {:.1}% | noise {:.1} s",
            s.recall * 100.0,
            s.accuracy * 100.0,
            s.kappa,
            s.events_detected,
            s.events_total,
            s.precision_with_tolerance * 100.0,
            s.noise_seconds
        );
        println!(
            "frames skipped {} | truth records dropped {} | events unresolved {}",
            s.skipped_frames, s.truth_dropped, s.events_unresolved
        );
        if let Some(verdict) = s.verdict {
            println!("{}", verdict.label());
        }
        return Ok(());
    }

    // ========== 单次分析: 所有视频段拼接为一条时间轴 ==========
    let mut timeline = VirtualTimeline::new(media, config.fallback_fps);
    for segment in &args.segments {
        timeline
            .add_segment(segment)
            .with_context(|| format!("adding segment {}", segment.display()))?;
    }
    let mut session = DetectionSession::from_config(&config, timeline.total_frames());
    let (analysis, _detector) = analyse(timeline, detector, &mut session, &config, &truth)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        println!("{}", analysis.render());
        if args.events {
            println!("{}", report::render_events(&analysis.result.events));
        }
    }
    Ok(())
}
