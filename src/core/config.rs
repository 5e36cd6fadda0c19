//! 配置管理模块
//!
//! 提供 HAL 配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [device]
//! name = "DistHal Device"
//! native_render_pass = true   # 后端是否支持原生渲染通道
//! enable_ray_tracing = false
//! validation = true           # 启用调试验证层
//!
//! [heaps]
//! cbv_srv_uav = 1024
//! sampler = 64
//! rtv = 64
//! dsv = 16
//!
//! [frames]
//! frames_in_flight = 3
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 同时在途帧数的上限
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

/// HAL 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 设备配置
    #[serde(default)]
    pub device: DeviceConfig,

    /// 描述符堆容量配置
    #[serde(default)]
    pub heaps: HeapConfig,

    /// 帧资源配置
    #[serde(default)]
    pub frames: FrameConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 设备配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 调试名称
    #[serde(default = "default_device_name")]
    pub name: String,

    /// 软件后端是否报告原生渲染通道能力
    #[serde(default = "default_true")]
    pub native_render_pass: bool,

    /// 是否请求光线追踪
    #[serde(default)]
    pub enable_ray_tracing: bool,

    /// 是否启用调试验证层
    #[serde(default = "default_true")]
    pub validation: bool,
}

/// 默认描述符堆容量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    #[serde(default = "default_cbv_srv_uav")]
    pub cbv_srv_uav: u32,
    #[serde(default = "default_sampler")]
    pub sampler: u32,
    #[serde(default = "default_rtv")]
    pub rtv: u32,
    #[serde(default = "default_dsv")]
    pub dsv: u32,
}

/// 帧资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// 同时在途的帧数
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_device_name() -> String { "DistHal Device".to_string() }
fn default_true() -> bool { true }
fn default_cbv_srv_uav() -> u32 { 1024 }
fn default_sampler() -> u32 { 64 }
fn default_rtv() -> u32 { 64 }
fn default_dsv() -> u32 { 16 }
fn default_frames_in_flight() -> u32 { 3 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_file() -> String { "disthal.log".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            native_render_pass: true,
            enable_ray_tracing: false,
            validation: true,
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            cbv_srv_uav: default_cbv_srv_uav(),
            sampler: default_sampler(),
            rtv: default_rtv(),
            dsv: default_dsv(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--frames <n>`: 同时在途帧数
    /// - `--manual-pass`: 关闭原生渲染通道，使用手动绑定 + 清除路径
    /// - `--ray-tracing`: 请求光线追踪
    /// - `--log <level>`: 日志级别
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--manual-pass") {
            self.device.native_render_pass = false;
        }

        if args.iter().any(|a| a == "--ray-tracing") {
            self.device.enable_ray_tracing = true;
        }

        if let Some(idx) = args.iter().position(|a| a == "--frames") {
            if let Some(frames) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.frames.frames_in_flight = frames;
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--log") {
            let level = match args.get(idx + 1).map(String::as_str) {
                Some("trace") => Some(LogLevel::Trace),
                Some("debug") => Some(LogLevel::Debug),
                Some("info") => Some(LogLevel::Info),
                Some("warn") => Some(LogLevel::Warn),
                Some("error") => Some(LogLevel::Error),
                _ => None,
            };
            if let Some(level) = level {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        let heaps = [
            ("heaps.cbv_srv_uav", self.heaps.cbv_srv_uav),
            ("heaps.sampler", self.heaps.sampler),
            ("heaps.rtv", self.heaps.rtv),
            ("heaps.dsv", self.heaps.dsv),
        ];
        for (field, capacity) in heaps {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Descriptor heap capacity must be greater than 0".to_string(),
                }
                .into());
            }
        }

        let frames = self.frames.frames_in_flight;
        if !(2..=MAX_FRAMES_IN_FLIGHT).contains(&frames) {
            return Err(ConfigError::InvalidValue {
                field: "frames.frames_in_flight".to_string(),
                reason: format!("Frames in flight must be between 2 and {}", MAX_FRAMES_IN_FLIGHT),
            }
            .into());
        }

        Ok(())
    }
}
