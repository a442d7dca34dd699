//! 带超时的检测器 (TimeoutDetector)
//! 职责: 独立线程运行内部检测器, 单帧调用等待超过上限即返回错误,
//! 卡住的检测器不会拖住分析线程。

use anyhow::{anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Detection, Detector};
use crate::input::Frame;

struct Request {
    seq: u64,
    frame: Frame,
    confidence: f32,
    iou: f32,
}

struct Response {
    seq: u64,
    result: anyhow::Result<Vec<Detection>>,
}

pub struct TimeoutDetector {
    classes: Vec<String>,
    timeout: Duration,
    tx: Option<Sender<Request>>,
    rx: Receiver<Response>,
    worker: Option<JoinHandle<()>>,
    seq: u64,
    in_flight: Option<u64>, // 已超时但尚未返回的请求
}

impl TimeoutDetector {
    pub fn new(detector: Box<dyn Detector>, timeout: Duration) -> Self {
        let classes = detector.classes();
        let (tx, req_rx) = crossbeam_channel::bounded::<Request>(1);
        let (resp_tx, rx) = crossbeam_channel::bounded::<Response>(1);

        let worker = thread::Builder::new()
            .name("detector".into())
            .spawn(move || Self::run(detector, req_rx, resp_tx));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                // 线程创建失败时所有调用都返回 disconnected
                warn!("❌ 检测线程启动失败: {}", e);
                None
            }
        };

        Self {
            classes,
            timeout,
            tx: Some(tx),
            rx,
            worker,
            seq: 0,
            in_flight: None,
        }
    }

    fn run(mut detector: Box<dyn Detector>, rx: Receiver<Request>, tx: Sender<Response>) {
        debug!("🔍 检测线程启动");
        while let Ok(req) = rx.recv() {
            let result = detector.detect(&req.frame, req.confidence, req.iou);
            if tx.send(Response { seq: req.seq, result }).is_err() {
                break;
            }
        }
        debug!("🔍 检测线程退出");
    }

    /// 是否有已超时但仍在执行的调用
    pub fn is_busy(&mut self) -> bool {
        self.drain_stale();
        self.in_flight.is_some()
    }

    fn drain_stale(&mut self) {
        let Some(stale) = self.in_flight else {
            return;
        };
        loop {
            match self.rx.try_recv() {
                Ok(resp) if resp.seq == stale => {
                    debug!("迟到的检测结果已丢弃 (seq {})", stale);
                    self.in_flight = None;
                    return;
                }
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = None;
                    return;
                }
            }
        }
    }
}

impl Detector for TimeoutDetector {
    fn classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn detect(
        &mut self,
        frame: &Frame,
        confidence: f32,
        iou: f32,
    ) -> anyhow::Result<Vec<Detection>> {
        self.drain_stale();
        if let Some(stale) = self.in_flight {
            bail!("detector busy: call {} still running", stale);
        }

        self.seq += 1;
        let seq = self.seq;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("detector worker closed"))?;
        tx.send(Request {
            seq,
            frame: frame.clone(),
            confidence,
            iou,
        })
        .map_err(|_| anyhow!("detector worker exited"))?;

        loop {
            match self.rx.recv_timeout(self.timeout) {
                Ok(resp) if resp.seq == seq => return resp.result,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    self.in_flight = Some(seq);
                    bail!(
                        "detector timed out after {:?} on frame {}",
                        self.timeout,
                        frame.index
                    );
                }
                Err(RecvTimeoutError::Disconnected) => bail!("detector worker exited"),
            }
        }
    }
}

impl Drop for TimeoutDetector {
    fn drop(&mut self) {
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.is_busy() {
            // 卡住的调用返回后线程自行退出
            warn!("⚠️  检测线程仍在执行, 不等待其退出");
            return;
        }
        let _ = worker.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    /// 指定帧上睡眠的检测器
    struct SlowDetector {
        slow_frame: usize,
        delay: Duration,
    }

    impl Detector for SlowDetector {
        fn classes(&self) -> Vec<String> {
            vec!["tap_1".into()]
        }

        fn detect(&mut self, frame: &Frame, _: f32, _: f32) -> anyhow::Result<Vec<Detection>> {
            if frame.index == self.slow_frame {
                thread::sleep(self.delay);
            }
            if frame.index == 99 {
                bail!("corrupt frame");
            }
            Ok(vec![Detection::new("tap_1", 0.9)])
        }
    }

    fn frame(index: usize) -> Frame {
        Frame::new(index, DynamicImage::new_rgb8(1, 1))
    }

    #[test]
    fn test_passes_results_and_errors_through() {
        let inner = SlowDetector {
            slow_frame: usize::MAX,
            delay: Duration::ZERO,
        };
        let mut det = TimeoutDetector::new(Box::new(inner), Duration::from_secs(5));
        assert_eq!(det.classes(), vec!["tap_1"]);
        assert_eq!(det.detect(&frame(0), 0.05, 0.45).unwrap().len(), 1);
        assert!(det.detect(&frame(99), 0.05, 0.45).is_err());
        assert_eq!(det.detect(&frame(1), 0.05, 0.45).unwrap().len(), 1);
    }

    #[test]
    fn test_timeout_then_recovers() {
        let inner = SlowDetector {
            slow_frame: 5,
            delay: Duration::from_millis(300),
        };
        let mut det = TimeoutDetector::new(Box::new(inner), Duration::from_millis(50));

        let err = det.detect(&frame(5), 0.05, 0.45).unwrap_err();
        assert!(err.to_string().contains("timed out"));

        // 卡住期间的调用立即失败
        assert!(det.is_busy());
        let err = det.detect(&frame(6), 0.05, 0.45).unwrap_err();
        assert!(err.to_string().contains("busy"));

        thread::sleep(Duration::from_millis(500));
        assert!(!det.is_busy());
        assert_eq!(det.detect(&frame(7), 0.05, 0.45).unwrap().len(), 1);
    }
}
