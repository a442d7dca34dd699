//! 分析配置 - 通过JSON文件调整参数
//! Analysis configuration (JSON file, CLI flags override)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// 单个类别的参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassSettings {
    pub alias: Option<String>,   // 报表显示的别名
    pub confidence: Option<f32>, // 该类别的最低置信度 (为空时使用默认值)
    pub active: bool,            // 是否写入检测时间轴
    pub tap: Option<u32>,        // 对应的真值 tap 编号 (为空时从类别名推断)
}

impl Default for ClassSettings {
    fn default() -> Self {
        Self {
            alias: None,
            confidence: None,
            active: true,
            tap: None,
        }
    }
}

/// 上线判定阈值
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerdictThresholds {
    pub min_recall: f64,
    pub min_accuracy: f64,
    pub review_recall: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            min_recall: 0.90,
            min_accuracy: 0.80,
            review_recall: 0.75,
        }
    }
}

/// 分析参数配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    // === 推理参数 ===
    pub stride: usize,            // 每N帧检测一次
    pub iou_threshold: f32,       // NMS IOU阈值
    pub default_confidence: f32,  // 类别未配置时的置信度下限
    pub detector_confidence: f32, // 送入检测器的查询置信度 (之后按类别过滤)
    pub detector_timeout_ms: u64, // 单帧检测超时

    // === 类别 ===
    pub classes: BTreeMap<String, ClassSettings>,
    pub scored_classes: BTreeSet<String>, // 参与事件评估的类别 (代表 tap 的类别)

    // === 评估参数 ===
    pub tolerance_seconds: f64, // 真值区间两侧的容差
    pub fallback_fps: f64,      // 媒体未报告帧率时使用
    pub verdict: VerdictThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            iou_threshold: 0.45,
            default_confidence: 0.40,
            detector_confidence: 0.05,
            detector_timeout_ms: 5_000,

            classes: BTreeMap::new(),
            scored_classes: BTreeSet::new(),

            tolerance_seconds: 1.5,
            fallback_fps: 15.0,
            verdict: VerdictThresholds::default(),
        }
    }
}

impl AnalysisConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json).map_err(|e| {
                    Error::setup(format!("config {} unreadable: {}", path.display(), e))
                })?;
                config.validate()?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(Error::setup(format!(
                "config {} unreadable: {}",
                path.display(),
                e
            ))),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::setup("stride must be >= 1"));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(Error::setup(format!(
                "iou_threshold {} outside (0, 1]",
                self.iou_threshold
            )));
        }
        let per_class = self
            .classes
            .iter()
            .filter_map(|(l, s)| s.confidence.map(|c| (l.as_str(), c)));
        for (label, conf) in per_class.chain([("<default>", self.default_confidence)]) {
            if !(conf > 0.0 && conf <= 1.0) {
                return Err(Error::setup(format!(
                    "confidence {} for {} outside (0, 1]",
                    conf, label
                )));
            }
        }
        if self.tolerance_seconds < 0.0 || !self.tolerance_seconds.is_finite() {
            return Err(Error::setup("tolerance_seconds must be >= 0"));
        }
        if self.fallback_fps <= 0.0 {
            return Err(Error::setup("fallback_fps must be > 0"));
        }
        if self.scored_classes.is_empty() {
            warn!("⚠️  未声明 scored_classes, 事件级指标与判定将没有预测输入");
        }
        for label in &self.scored_classes {
            if !self.classes.is_empty() && !self.classes.contains_key(label) {
                warn!("⚠️  评估类别 {} 未在 classes 中配置", label);
            }
        }
        Ok(())
    }

    /// 注册检测器报告的类别 (已存在的保持原配置)
    pub fn register_classes<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in labels {
            self.classes.entry(label.into()).or_default();
        }
    }

    /// 写入时间轴的类别
    pub fn active_classes(&self) -> Vec<String> {
        self.classes
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(l, _)| l.clone())
            .collect()
    }

    pub fn confidence_for(&self, label: &str) -> f32 {
        self.classes
            .get(label)
            .and_then(|s| s.confidence)
            .unwrap_or(self.default_confidence)
    }

    /// 显示别名 (默认取类别名前两个字符大写)
    pub fn alias_for(&self, label: &str) -> String {
        self.classes
            .get(label)
            .and_then(|s| s.alias.clone())
            .unwrap_or_else(|| label.chars().take(2).collect::<String>().to_uppercase())
    }

    /// 类别对应的 tap 编号
    pub fn tap_for(&self, label: &str) -> Option<u32> {
        self.classes
            .get(label)
            .and_then(|s| s.tap)
            .or_else(|| crate::truth::tap_index(label))
    }

    pub fn is_scored(&self, label: &str) -> bool {
        self.scored_classes.contains(label)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    /// 容差秒数换算为帧数 (向下取整)
    pub fn tolerance_frames(&self, fps: f64) -> usize {
        (self.tolerance_seconds * fps).floor().max(0.0) as usize
    }
}
