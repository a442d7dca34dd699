/// 实时分析流水线 (Live Analysis Pipeline)
///
/// 双线程架构, 通过 crossbeam channel 通信:
/// - 控制端 (调用线程): pause / resume / seek / stop
/// - Worker: 顺序取帧 → 检测 → 写入检测时间轴 (独立线程)
///
/// 状态: Idle → Running ⇄ Paused → Stopped; Running → Finished (源读完)
mod worker;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::detection::{Detection, Detector};
use crate::error::{Error, Result};
use crate::input::FrameSource;
use crate::session::DetectionSession;
use worker::Worker;

// ========== 消息类型定义 ==========

/// 控制命令 (控制端 → Worker)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineCommand {
    Pause,
    Resume,
    SeekTo(usize),
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopped,  // 终止: 收到 Stop
    Finished, // 终止: 源已读完
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Finished)
    }
}

/// 运行统计
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub start_frame: usize,
    pub last_frame: Option<usize>,
    pub frames_read: usize,
    pub frames_scored: usize,
    pub skipped_frames: usize, // 读取失败 + 检测失败
    pub read_failures: usize,
    pub detector_failures: usize,
    pub seeks: usize,
    pub elapsed: Duration,
}

impl RunStats {
    /// 检测吞吐 (帧/秒)
    pub fn scored_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_scored as f64 / secs
        } else {
            0.0
        }
    }
}

/// 流水线事件 (Worker → 观察者)
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    FrameScored {
        frame: usize,
        detections: Vec<Detection>,
    },
    FrameSkipped {
        frame: usize,
        reason: String,
    },
    Paused {
        frame: usize,
    },
    Resumed {
        frame: usize,
    },
    Seeked {
        frame: usize,
    },
    Finished(RunStats),
    Stopped(RunStats),
}

/// 运行结束后交还给调用方的资源
pub struct RunOutput<S> {
    pub stats: RunStats,
    pub state: PipelineState,
    pub source: S,
    pub detector: Box<dyn Detector>,
}

/// Worker 与控制端共享的状态
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<PipelineState>,
    position: AtomicUsize, // 下一个待处理的全局帧号
}

impl Shared {
    fn new(position: usize) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            position: AtomicUsize::new(position),
        }
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_position(&self, frame: usize) {
        self.position.store(frame, Ordering::Relaxed);
    }
}

const PROGRESS_CAPACITY: usize = 256;

pub struct LiveAnalysisPipeline<S: FrameSource + 'static> {
    cmd_tx: Sender<PipelineCommand>,
    events_rx: Receiver<PipelineEvent>,
    progress_rx: Receiver<PipelineEvent>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<RunOutput<S>>>,
    total_frames: usize,
}

impl<S: FrameSource + 'static> LiveAnalysisPipeline<S> {
    /// 打开源并启动 Worker。
    ///
    /// 源在调用线程上同步定位到 `start_frame`; 失败即返回 `Setup`,
    /// 不处理任何帧。检测时间轴长度与源不一致时先重置。
    pub fn start(
        mut source: S,
        detector: Box<dyn Detector>,
        mut session: DetectionSession,
        config: AnalysisConfig,
        start_frame: usize,
    ) -> Result<Self> {
        config.validate()?;
        let total_frames = source.total_frames();
        source.open_at(start_frame)?;
        session.resize_if_changed(total_frames);

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (progress_tx, progress_rx) = crossbeam_channel::bounded(PROGRESS_CAPACITY);
        let shared = Arc::new(Shared::new(start_frame));

        let worker = Worker {
            source,
            detector,
            session,
            config,
            cmd_rx,
            events_tx,
            progress_tx,
            shared: shared.clone(),
            stats: RunStats {
                start_frame,
                ..Default::default()
            },
        };

        shared.set_state(PipelineState::Running);
        let handle = std::thread::Builder::new()
            .name("analysis".into())
            .spawn(move || worker.run(start_frame))
            .map_err(|e| Error::setup(format!("cannot spawn analysis worker: {}", e)))?;

        info!(
            "✅ 分析流水线启动: 起始帧 {}, 共 {} 帧",
            start_frame, total_frames
        );
        Ok(Self {
            cmd_tx,
            events_rx,
            progress_rx,
            shared,
            worker: Some(handle),
            total_frames,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// 下一个待处理的全局帧号
    pub fn position(&self) -> usize {
        self.shared.position.load(Ordering::Relaxed)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn pause(&self) {
        self.send(PipelineCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(PipelineCommand::Resume);
    }

    /// 在下一次循环边界跳转; 多个待处理的跳转只保留最后一个
    pub fn seek(&self, frame: usize) {
        self.send(PipelineCommand::SeekTo(frame));
    }

    /// 生命周期事件 (Paused / Resumed / Seeked / Finished / Stopped), 不丢失
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events_rx
    }

    /// 逐帧进度事件; 队列满时丢弃
    pub fn progress(&self) -> &Receiver<PipelineEvent> {
        &self.progress_rx
    }

    /// 停止并等待 Worker 退出。返回后不再有任何时间轴写入。
    pub fn stop(mut self) -> Result<RunOutput<S>> {
        self.send(PipelineCommand::Stop);
        self.join()
    }

    /// 等待源读完 (或被其他线程停止)
    pub fn wait(mut self) -> Result<RunOutput<S>> {
        self.join()
    }

    fn send(&self, cmd: PipelineCommand) {
        if self.cmd_tx.send(cmd.clone()).is_err() {
            warn!("⚠️  流水线已退出, 忽略命令 {:?}", cmd);
        }
    }

    fn join(&mut self) -> Result<RunOutput<S>> {
        let handle = self
            .worker
            .take()
            .ok_or(Error::PipelineState("already joined"))?;
        handle
            .join()
            .map_err(|_| Error::PipelineState("crashed"))
    }
}

impl<S: FrameSource + 'static> Drop for LiveAnalysisPipeline<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.cmd_tx.send(PipelineCommand::Stop);
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Frame;
    use crate::timeline::tests::{three_segments, FakeMedia};
    use crate::timeline::VirtualTimeline;
    use std::thread;

    /// 按帧号脚本化的检测器
    struct ScriptedDetector {
        hits: Vec<(std::ops::Range<usize>, &'static str, f32)>,
        fail_on: Vec<usize>,
        delay: Duration,
    }

    impl ScriptedDetector {
        fn new(hits: Vec<(std::ops::Range<usize>, &'static str, f32)>) -> Self {
            Self {
                hits,
                fail_on: Vec::new(),
                delay: Duration::ZERO,
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn classes(&self) -> Vec<String> {
            vec!["tap_1".into(), "tap_2".into()]
        }

        fn detect(&mut self, frame: &Frame, floor: f32, _: f32) -> anyhow::Result<Vec<Detection>> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail_on.contains(&frame.index) {
                anyhow::bail!("inference failed");
            }
            Ok(self
                .hits
                .iter()
                .filter(|(r, _, c)| r.contains(&frame.index) && *c >= floor)
                .map(|(_, l, c)| Detection::new(l, *c))
                .collect())
        }
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.register_classes(["tap_1", "tap_2"]);
        config
    }

    fn long_timeline() -> VirtualTimeline {
        let media = FakeMedia::with(&[("long_20240101100000", 100_000, 15.0)]);
        VirtualTimeline::single(Arc::new(media), "long_20240101100000", 15.0).unwrap()
    }

    fn wait_for(
        rx: &Receiver<PipelineEvent>,
        pred: impl Fn(&PipelineEvent) -> bool,
    ) -> PipelineEvent {
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_runs_to_finish_and_marks_buffers() {
        let (timeline, _) = three_segments();
        let config = config();
        let session = DetectionSession::from_config(&config, 0);
        let detector = ScriptedDetector::new(vec![(10..20, "tap_1", 0.9), (150..160, "tap_2", 0.9)]);

        let pipeline =
            LiveAnalysisPipeline::start(timeline, Box::new(detector), session.clone(), config, 0)
                .unwrap();
        let out = pipeline.wait().unwrap();

        assert_eq!(out.state, PipelineState::Finished);
        assert_eq!(out.stats.frames_read, 225);
        assert_eq!(out.stats.frames_scored, 225);
        assert_eq!(out.stats.last_frame, Some(224));
        // 调用方持有的会话与 Worker 共享同一组缓冲
        assert_eq!(session.total_frames(), 225);
        let tap_1 = session.buffer("tap_1").unwrap();
        assert_eq!(tap_1.len(), 225);
        assert_eq!(tap_1.count_true(), 10);
        assert_eq!(session.buffer("tap_2").unwrap().query(150..160), 10);
        // 顺序读取只在切换视频段时重新打开
        assert_eq!(out.source.stats().seeks, 0);
        assert_eq!(out.source.stats().opens, 3);
    }

    #[test]
    fn test_finished_event_emitted() {
        let (timeline, _) = three_segments();
        let config = config();
        let session = DetectionSession::from_config(&config, 225);
        let pipeline = LiveAnalysisPipeline::start(
            timeline,
            Box::new(ScriptedDetector::new(vec![])),
            session,
            config,
            200,
        )
        .unwrap();

        let event = wait_for(pipeline.events(), |e| matches!(e, PipelineEvent::Finished(_)));
        match event {
            PipelineEvent::Finished(stats) => {
                assert_eq!(stats.start_frame, 200);
                assert_eq!(stats.frames_read, 25);
            }
            _ => unreachable!(),
        }
        assert_eq!(pipeline.state(), PipelineState::Finished);
    }

    #[test]
    fn test_stride_and_confidence_floors() {
        let (timeline, _) = three_segments();
        let mut config = config();
        config.stride = 3;
        config.classes.get_mut("tap_2").unwrap().confidence = Some(0.2);
        let session = DetectionSession::from_config(&config, 225);
        // 0.3 低于 tap_1 的默认下限 0.40, 高于 tap_2 的下限 0.2
        let detector = ScriptedDetector::new(vec![(0..30, "tap_1", 0.3), (0..30, "tap_2", 0.3)]);

        let out = LiveAnalysisPipeline::start(timeline, Box::new(detector), session.clone(), config, 0)
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(out.stats.frames_read, 225);
        assert_eq!(out.stats.frames_scored, 75);
        assert_eq!(session.buffer("tap_1").unwrap().count_true(), 0);
        let tap_2 = session.buffer("tap_2").unwrap();
        assert_eq!(tap_2.count_true(), 10);
        assert!(tap_2.get(0).unwrap());
        assert!(!tap_2.get(1).unwrap());
        assert!(tap_2.get(3).unwrap());
    }

    #[test]
    fn test_detector_failure_skips_frame_only() {
        let (timeline, _) = three_segments();
        let config = config();
        let session = DetectionSession::from_config(&config, 225);
        let mut detector = ScriptedDetector::new(vec![(0..225, "tap_1", 0.9)]);
        detector.fail_on = vec![5, 6];

        let out = LiveAnalysisPipeline::start(timeline, Box::new(detector), session.clone(), config, 0)
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(out.state, PipelineState::Finished);
        assert_eq!(out.stats.skipped_frames, 2);
        assert_eq!(out.stats.detector_failures, 2);
        let tap_1 = session.buffer("tap_1").unwrap();
        assert_eq!(tap_1.count_true(), 223);
        assert!(!tap_1.get(5).unwrap());
    }

    #[test]
    fn test_start_failure_is_setup_error() {
        let (timeline, _) = three_segments();
        let config = config();
        let session = DetectionSession::from_config(&config, 225);
        let result = LiveAnalysisPipeline::start(
            timeline,
            Box::new(ScriptedDetector::new(vec![])),
            session.clone(),
            config,
            225,
        );
        assert!(matches!(result, Err(Error::Setup(_))));
        assert_eq!(session.buffer("tap_1").unwrap().count_true(), 0);
    }

    #[test]
    fn test_pause_seek_resume_stop() {
        let config = config();
        let session = DetectionSession::from_config(&config, 100_000);
        let mut detector = ScriptedDetector::new(vec![(0..100_000, "tap_1", 0.9)]);
        detector.delay = Duration::from_millis(1);

        let pipeline =
            LiveAnalysisPipeline::start(long_timeline(), Box::new(detector), session.clone(), config, 0)
                .unwrap();
        let tap_1 = session.buffer("tap_1").unwrap().clone();

        pipeline.pause();
        wait_for(pipeline.events(), |e| matches!(e, PipelineEvent::Paused { .. }));
        assert_eq!(pipeline.state(), PipelineState::Paused);
        let frozen = tap_1.count_true();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(tap_1.count_true(), frozen);

        // 暂停期间的多个跳转只保留最后一个
        pipeline.seek(50_000);
        pipeline.seek(90_000);
        pipeline.seek(1_000_000); // 越界, 忽略
        pipeline.resume();
        let seeked = wait_for(pipeline.events(), |e| matches!(e, PipelineEvent::Seeked { .. }));
        assert!(matches!(seeked, PipelineEvent::Seeked { frame: 90_000 }));

        wait_for(pipeline.progress(), |e| {
            matches!(e, PipelineEvent::FrameScored { frame: 90_000, .. })
        });
        let out = pipeline.stop().unwrap();
        assert_eq!(out.state, PipelineState::Stopped);
        assert_eq!(out.stats.seeks, 1);
        assert_eq!(tap_1.query(50_000..60_000), 0);
        assert!(tap_1.get(90_000).unwrap());

        // stop 返回后不再写入
        let after_stop = tap_1.snapshot();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(tap_1.snapshot(), after_stop);
    }

    #[test]
    fn test_drop_stops_worker() {
        let config = config();
        let session = DetectionSession::from_config(&config, 100_000);
        let mut detector = ScriptedDetector::new(vec![(0..100_000, "tap_1", 0.9)]);
        detector.delay = Duration::from_millis(1);
        let tap_1 = session.buffer("tap_1").unwrap().clone();

        let pipeline =
            LiveAnalysisPipeline::start(long_timeline(), Box::new(detector), session, config, 0)
                .unwrap();
        thread::sleep(Duration::from_millis(10));
        drop(pipeline);

        let after_drop = tap_1.count_true();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(tap_1.count_true(), after_drop);
    }
}
