// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod batch; // 批量分析
pub mod buffer; // 检测时间轴缓冲
pub mod config; // 分析配置参数
pub mod detection; // 检测器接口与实现
pub mod error; // 错误类型
pub mod evaluation; // 评估指标与报表
pub mod input; // 视频输入系统
pub mod pipeline; // 实时分析流水线
pub mod session; // 检测会话
pub mod timeline; // 虚拟时间轴
pub mod truth; // 真值事件导入与对齐

pub use crate::batch::{analyse, Analysis, BatchReport, BatchRunner};
pub use crate::buffer::DetectionBuffer;
pub use crate::config::AnalysisConfig;
pub use crate::detection::{Detection, Detector, ReplayDetector, TimeoutDetector};
pub use crate::error::{Error, Result};
pub use crate::evaluation::{EvaluationEngine, EvaluationResult, Verdict};
pub use crate::input::{FrameSource, ImageSequenceSource, MediaSource};
pub use crate::pipeline::{LiveAnalysisPipeline, PipelineCommand, PipelineEvent, PipelineState};
pub use crate::session::DetectionSession;
pub use crate::timeline::{VideoSegment, VirtualTimeline};
pub use crate::truth::{RawTruthRecord, TruthEventStore};
