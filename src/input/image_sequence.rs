//! 图片序列输入 - 一个目录即一个视频段
//!
//! 目录内的图片按文件名排序作为帧序列, 帧率由配置给出。

use super::{MediaHandle, MediaSource};
use anyhow::{bail, Context};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 图片序列媒体源
#[derive(Clone, Debug)]
pub struct ImageSequenceSource {
    fps: f64,
}

impl ImageSequenceSource {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    /// 列出目录下的图片帧 (按文件名排序)
    pub fn list_frames(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("cannot read directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }
}

impl MediaSource for ImageSequenceSource {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn MediaHandle>> {
        if !path.is_dir() {
            bail!("{} is not a frame directory", path.display());
        }
        let frames = Self::list_frames(path)?;
        debug!("📂 打开图片序列 {} ({} 帧)", path.display(), frames.len());
        Ok(Box::new(ImageSequenceHandle {
            frames,
            fps: self.fps,
            position: 0,
        }))
    }
}

struct ImageSequenceHandle {
    frames: Vec<PathBuf>,
    fps: f64,
    position: usize, // 下一次 read 的帧号
}

impl MediaHandle for ImageSequenceHandle {
    fn frame_count(&self) -> i64 {
        self.frames.len() as i64
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn seek(&mut self, frame: usize) -> anyhow::Result<()> {
        if frame > self.frames.len() {
            bail!("seek to {} beyond {} frames", frame, self.frames.len());
        }
        self.position = frame;
        Ok(())
    }

    fn read(&mut self) -> anyhow::Result<Option<DynamicImage>> {
        let Some(path) = self.frames.get(self.position) else {
            return Ok(None);
        };
        let img = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        self.position += 1;
        Ok(Some(img))
    }
}
