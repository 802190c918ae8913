//! 粒子全局配置
//!
//! 提供 TOML/JSON 配置加载和非法值清洗。配置问题从不致命：
//! 每个非法字段回退到默认值并记录一条警告。

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 默认发射栅格间距（必须为正偶数）
pub const DEFAULT_EMIT_GAP: u32 = 2;
/// 默认模拟时间步长（秒）
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;
/// 默认粒子寿命上限（秒）
pub const DEFAULT_MAX_LIFE: f32 = 5.0;
/// 时间步长下限，低于该值视为非法
pub const MIN_TIME_STEP: f32 = 1e-6;

/// 配置解析错误
///
/// 仅覆盖文件/字符串解析失败；字段取值问题由 [`ParticleGlobalConfig::sanitize`]
/// 以默认值回退的方式处理，不走错误路径。
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
}

/// 粒子全局配置资源
///
/// 由引擎配置系统提供，粒子子系统在构造时接收一份快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleGlobalConfig {
    /// 发射栅格间距：新发射粒子在发射器原点周围按该尺寸的栅格抖动。
    /// 必须为正偶数（偶数保证栅格关于原点对称）。
    pub emit_gap: u32,

    /// 模拟时间步长（秒），必须大于 `1e-6`
    pub time_step: f32,

    /// 粒子寿命上限（秒），必须不小于 `time_step`
    pub max_life: f32,

    /// 重力加速度
    pub gravity: Vec3,
}

impl Default for ParticleGlobalConfig {
    fn default() -> Self {
        Self {
            emit_gap: DEFAULT_EMIT_GAP,
            time_step: DEFAULT_TIME_STEP,
            max_life: DEFAULT_MAX_LIFE,
            gravity: Vec3::new(0.0, -9.8, 0.0),
        }
    }
}

impl ParticleGlobalConfig {
    /// 从 TOML 字符串解析配置（解析后立即清洗）
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config.sanitize())
    }

    /// 从 JSON 字符串解析配置（解析后立即清洗）
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config.sanitize())
    }

    /// 清洗配置：非法字段回退默认值并记录警告
    ///
    /// 规则：
    /// - `emit_gap` 必须为正偶数
    /// - `time_step` 必须大于 `1e-6` 且有限
    /// - `max_life` 必须不小于清洗后的 `time_step` 且有限
    pub fn sanitize(mut self) -> Self {
        if self.emit_gap == 0 || self.emit_gap % 2 != 0 {
            tracing::warn!(
                target: "particles",
                "emit_gap {} is not a positive even integer, falling back to {}",
                self.emit_gap,
                DEFAULT_EMIT_GAP
            );
            self.emit_gap = DEFAULT_EMIT_GAP;
        }

        if !(self.time_step.is_finite() && self.time_step > MIN_TIME_STEP) {
            tracing::warn!(
                target: "particles",
                "time_step {} is below the minimum {}, falling back to {}",
                self.time_step,
                MIN_TIME_STEP,
                DEFAULT_TIME_STEP
            );
            self.time_step = DEFAULT_TIME_STEP;
        }

        if !(self.max_life.is_finite() && self.max_life >= self.time_step) {
            tracing::warn!(
                target: "particles",
                "max_life {} is shorter than time_step {}, falling back to {}",
                self.max_life,
                self.time_step,
                DEFAULT_MAX_LIFE
            );
            self.max_life = DEFAULT_MAX_LIFE;
        }

        if !self.gravity.is_finite() {
            tracing::warn!(target: "particles", "gravity is not finite, falling back to default");
            self.gravity = Self::default().gravity;
        }

        self
    }
}
