//! 检测会话 (Detection Session)
//!
//! 显式持有 类别 → 检测时间轴 的映射, 传入流水线与评估,
//! 取代挂在界面对象上的全局状态。

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::buffer::DetectionBuffer;
use crate::config::AnalysisConfig;

#[derive(Debug, Default, Clone)]
pub struct DetectionSession {
    buffers: BTreeMap<String, Arc<DetectionBuffer>>,
    total_frames: usize,
}

impl DetectionSession {
    pub fn new<I, S>(labels: I, total_frames: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let buffers = labels
            .into_iter()
            .map(|l| (l.into(), Arc::new(DetectionBuffer::new(total_frames))))
            .collect();
        Self {
            buffers,
            total_frames,
        }
    }

    /// 按配置中启用的类别建立时间轴
    pub fn from_config(config: &AnalysisConfig, total_frames: usize) -> Self {
        Self::new(config.active_classes(), total_frames)
    }

    /// 所有时间轴清零并重新分配长度
    pub fn reset(&mut self, total_frames: usize) {
        for buffer in self.buffers.values() {
            buffer.init(total_frames);
        }
        self.total_frames = total_frames;
        info!(
            "🧹 检测时间轴已重置: {} 个类别 × {} 帧",
            self.buffers.len(),
            total_frames
        );
    }

    /// 总帧数变化时重置, 返回是否发生了重置
    pub fn resize_if_changed(&mut self, total_frames: usize) -> bool {
        if total_frames == self.total_frames() {
            return false;
        }
        self.reset(total_frames);
        true
    }

    /// 缓冲可能已被共享同一组缓冲的副本重置, 以缓冲实际长度为准
    pub fn total_frames(&self) -> usize {
        self.buffers
            .values()
            .next()
            .map(|b| b.len())
            .unwrap_or(self.total_frames)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn buffer(&self, label: &str) -> Option<&Arc<DetectionBuffer>> {
        self.buffers.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<DetectionBuffer>)> {
        self.buffers.iter().map(|(l, b)| (l.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// 参与评估的类别 (配置中声明的 scored_classes)
    pub fn scored<'a>(
        &'a self,
        config: &'a AnalysisConfig,
    ) -> impl Iterator<Item = (&'a str, &'a Arc<DetectionBuffer>)> + 'a {
        self.iter().filter(move |(l, _)| config.is_scored(l))
    }

    /// 多个类别的并集时间轴
    pub fn union<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<bool> {
        let mut merged = vec![false; self.total_frames()];
        for label in labels {
            if let Some(buffer) = self.buffers.get(label) {
                for (slot, hit) in merged.iter_mut().zip(buffer.snapshot()) {
                    *slot |= hit;
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_all_buffers() {
        let mut session = DetectionSession::new(["tap_1", "tap_2"], 10);
        session.buffer("tap_1").unwrap().mark(3, true);

        assert!(!session.resize_if_changed(10));
        assert_eq!(session.buffer("tap_1").unwrap().count_true(), 1);

        assert!(session.resize_if_changed(20));
        assert_eq!(session.total_frames(), 20);
        for (_, buf) in session.iter() {
            assert_eq!(buf.len(), 20);
            assert_eq!(buf.count_true(), 0);
        }
    }

    #[test]
    fn test_scored_and_union() {
        let mut config = AnalysisConfig::default();
        config.register_classes(["tap_1", "tap_2", "person"]);
        config.scored_classes.insert("tap_1".into());
        config.scored_classes.insert("tap_2".into());

        let session = DetectionSession::from_config(&config, 6);
        session.buffer("tap_1").unwrap().mark(1, true);
        session.buffer("tap_2").unwrap().mark(4, true);
        session.buffer("person").unwrap().mark(5, true);

        let scored: Vec<&str> = session.scored(&config).map(|(l, _)| l).collect();
        assert_eq!(scored, vec!["tap_1", "tap_2"]);

        let merged = session.union(scored);
        assert_eq!(merged, vec![false, true, false, false, true, false]);
    }
}
