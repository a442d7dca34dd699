//! 分析 Worker
//! 职责: 处理控制命令 → 顺序取帧 → 按步长检测 → 写入各类别检测时间轴

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{PipelineCommand, PipelineEvent, PipelineState, RunOutput, RunStats, Shared};
use crate::config::AnalysisConfig;
use crate::detection::{Detection, Detector};
use crate::error::Error;
use crate::input::{Frame, FrameSource};
use crate::session::DetectionSession;

pub(super) struct Worker<S> {
    pub(super) source: S,
    pub(super) detector: Box<dyn Detector>,
    pub(super) session: DetectionSession,
    pub(super) config: AnalysisConfig,
    pub(super) cmd_rx: Receiver<PipelineCommand>,
    pub(super) events_tx: Sender<PipelineEvent>,
    pub(super) progress_tx: Sender<PipelineEvent>,
    pub(super) shared: Arc<Shared>,
    pub(super) stats: RunStats,
}

/// 命令处理后的循环走向
enum Flow {
    Continue,
    Stop,
}

impl<S: FrameSource> Worker<S> {
    pub(super) fn run(mut self, start_frame: usize) -> RunOutput<S> {
        debug!("🔍 分析线程启动");
        let started = Instant::now();
        let total = self.source.total_frames();
        let mut index = start_frame;

        let state = loop {
            self.shared.set_position(index);
            if let Flow::Stop = self.handle_commands(&mut index) {
                break PipelineState::Stopped;
            }
            if index >= total {
                break PipelineState::Finished;
            }

            match self.source.read_frame(index) {
                Ok(Some(frame)) => {
                    self.stats.frames_read += 1;
                    self.stats.last_frame = Some(index);
                    if index % self.config.stride == 0 {
                        self.score(&frame);
                    }
                }
                Ok(None) => break PipelineState::Finished,
                Err(e) => {
                    self.stats.read_failures += 1;
                    let reason = match e {
                        Error::SkippableFrame { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    self.skip(index, reason);
                }
            }
            index += 1;
        };

        self.stats.elapsed = started.elapsed();
        self.source.release();
        self.shared.set_position(index);
        self.shared.set_state(state);

        let stats = self.stats.clone();
        let event = match state {
            PipelineState::Finished => {
                info!(
                    "✅ 分析完成: 读取 {} 帧, 检测 {} 帧, 跳过 {} 帧 ({:.1} fps)",
                    stats.frames_read,
                    stats.frames_scored,
                    stats.skipped_frames,
                    stats.scored_fps()
                );
                PipelineEvent::Finished(stats.clone())
            }
            _ => {
                info!("⏹️  分析已停止于帧 {}", index);
                PipelineEvent::Stopped(stats.clone())
            }
        };
        let _ = self.events_tx.send(event);

        RunOutput {
            stats,
            state,
            source: self.source,
            detector: self.detector,
        }
    }

    /// 处理待执行的命令。暂停时阻塞等待命令, 不轮询。
    fn handle_commands(&mut self, index: &mut usize) -> Flow {
        let total = self.source.total_frames();
        let mut paused = false;
        let mut seek_to = None;

        loop {
            let cmd = if paused {
                match self.cmd_rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => return Flow::Stop,
                }
            } else {
                match self.cmd_rx.try_recv() {
                    Ok(cmd) => cmd,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Flow::Stop,
                }
            };

            match cmd {
                PipelineCommand::Pause if !paused => {
                    paused = true;
                    self.shared.set_state(PipelineState::Paused);
                    self.emit(PipelineEvent::Paused { frame: *index });
                    info!("⏸️  分析暂停于帧 {}", index);
                }
                PipelineCommand::Resume if paused => {
                    paused = false;
                    self.shared.set_state(PipelineState::Running);
                    self.emit(PipelineEvent::Resumed { frame: *index });
                    info!("▶️  分析继续");
                }
                PipelineCommand::Pause | PipelineCommand::Resume => {}
                PipelineCommand::SeekTo(target) if target < total => seek_to = Some(target),
                PipelineCommand::SeekTo(target) => {
                    warn!("⚠️  跳转目标 {} 超出范围 (共 {} 帧), 忽略", target, total);
                }
                PipelineCommand::Stop => return Flow::Stop,
            }
        }

        if let Some(target) = seek_to {
            *index = target;
            self.stats.seeks += 1;
            self.shared.set_position(target);
            self.emit(PipelineEvent::Seeked { frame: target });
            info!("⏩ 跳转到帧 {}", target);
        }
        Flow::Continue
    }

    /// 检测一帧并写入所有类别的时间轴
    fn score(&mut self, frame: &Frame) {
        let detections = match self.detector.detect(
            frame,
            self.config.detector_confidence,
            self.config.iou_threshold,
        ) {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detector_failures += 1;
                for (_, buffer) in self.session.iter() {
                    buffer.mark(frame.index, false);
                }
                self.skip(frame.index, format!("{:#}", e));
                return;
            }
        };

        // 按类别置信度下限过滤
        let kept: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.config.confidence_for(&d.label))
            .collect();

        for (label, buffer) in self.session.iter() {
            buffer.mark(frame.index, kept.iter().any(|d| d.label == label));
        }
        self.stats.frames_scored += 1;

        if !kept.is_empty() {
            debug!("🎯 帧 {}: {} 个检测", frame.index, kept.len());
        }
        let _ = self.progress_tx.try_send(PipelineEvent::FrameScored {
            frame: frame.index,
            detections: kept,
        });
    }

    fn skip(&mut self, frame: usize, reason: String) {
        self.stats.skipped_frames += 1;
        let err = Error::SkippableFrame { frame, reason };
        warn!("⚠️  {}", err);
        let _ = self.progress_tx.try_send(PipelineEvent::FrameSkipped {
            frame,
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }
}
