//! 错误类型 (Error taxonomy)
//!
//! 只有 `Setup` / `InvalidMedia` 是致命错误 (流水线启动前);
//! 其余错误在运行期被就地恢复并计数。

use thiserror::Error;

/// 统一的结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// 无法读取的媒体/模型/真值/配置源
    #[error("setup error: {0}")]
    Setup(String),

    /// 视频段帧数无效
    #[error("invalid media {path}: {reason}")]
    InvalidMedia { path: String, reason: String },

    /// 单帧检测失败 (运行期恢复为"无检测")
    #[error("frame {frame} skipped: {reason}")]
    SkippableFrame { frame: usize, reason: String },

    /// 越界读取
    #[error("index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    /// 无法对齐的真值事件 (丢弃并计数)
    #[error("unresolvable truth event {tap}: {reason}")]
    UnresolvableTruthEvent { tap: String, reason: String },

    /// 流水线状态不允许该操作
    #[error("pipeline is {0}")]
    PipelineState(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn setup(msg: impl Into<String>) -> Self {
        Error::Setup(msg.into())
    }

    /// 是否为致命的启动期错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Setup(_) | Error::InvalidMedia { .. } | Error::Io(_) | Error::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::setup("no model").is_fatal());
        assert!(Error::InvalidMedia {
            path: "a".into(),
            reason: "0 frames".into()
        }
        .is_fatal());
        assert!(!Error::OutOfRange { index: 5, len: 3 }.is_fatal());
        assert!(!Error::SkippableFrame {
            frame: 1,
            reason: "timeout".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_display() {
        let e = Error::OutOfRange { index: 225, len: 225 };
        assert_eq!(e.to_string(), "index 225 out of range (len 225)");
    }
}
