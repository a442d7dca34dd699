/// 检测系统 (Detection System)
///
/// 检测器只在边界上被定义: 一帧图像 → [(类别, 置信度, 检测框)]
/// - Detector:        外部检测器接口
/// - ReplayDetector:  回放已记录的检测结果 (重新评估旧的推理输出)
/// - TimeoutDetector: 独立线程运行检测器, 单帧调用有超时上限
pub mod replay;
pub mod timeout;
pub mod types;

pub use replay::ReplayDetector;
pub use timeout::TimeoutDetector;
pub use types::{Bbox, Detection};

use crate::input::Frame;

/// 外部检测器接口
pub trait Detector: Send {
    /// 模型输出的全部类别名
    fn classes(&self) -> Vec<String>;

    /// 检测一帧; 返回置信度不低于 `confidence` 且经过 NMS 的结果
    fn detect(&mut self, frame: &Frame, confidence: f32, iou: f32)
        -> anyhow::Result<Vec<Detection>>;
}

/// 非极大值抑制 (按类别分别进行)
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].label == xs[index].label
                && xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
