/// 视频输入系统 (Video Input System)
///
/// 媒体源只在边界上被定义: 打开、定位、读取、帧数、帧率。
/// - MediaSource / MediaHandle: 外部解码器接口
/// - FrameSource: 流水线按全局帧号取帧的接口 (VirtualTimeline 实现)
/// - ImageSequenceSource: 以图片目录作为视频段的实现
pub mod image_sequence;

pub use image_sequence::ImageSequenceSource;

use image::DynamicImage;
use std::path::Path;

/// 已解码帧
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: usize,    // 全局帧号
    pub segment: String, // 所在视频段名 (文件名)
    pub local: usize,    // 段内帧号
    pub image: DynamicImage,
}

impl Frame {
    /// 单段时间轴上的帧: 段内帧号即全局帧号
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self {
            index,
            segment: String::new(),
            local: index,
            image,
        }
    }
}

/// 已打开的媒体句柄 (同一时刻只被一个线程驱动)
pub trait MediaHandle: Send {
    /// 媒体报告的帧数 (损坏的媒体可能 <= 0)
    fn frame_count(&self) -> i64;

    /// 媒体报告的帧率 (可能为 0)
    fn fps(&self) -> f64;

    /// 显式定位到本地帧号 (代价较高)
    fn seek(&mut self, frame: usize) -> anyhow::Result<()>;

    /// 读取下一帧, 读到结尾返回 None
    fn read(&mut self) -> anyhow::Result<Option<DynamicImage>>;
}

/// 媒体源: 按路径打开句柄
pub trait MediaSource: Send + Sync {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn MediaHandle>>;
}

/// 流水线的取帧接口
pub trait FrameSource: Send {
    /// 可寻址的总帧数
    fn total_frames(&self) -> usize;

    /// 全局帧所在视频段的帧率
    fn fps_at(&self, index: usize) -> f64;

    /// 启动前打开并定位到起始帧; 失败即为致命的启动错误
    fn open_at(&mut self, start: usize) -> crate::Result<()>;

    /// 读取全局帧; 越界或读完返回 None
    fn read_frame(&mut self, index: usize) -> crate::Result<Option<Frame>>;

    /// 释放打开的句柄
    fn release(&mut self) {}
}
