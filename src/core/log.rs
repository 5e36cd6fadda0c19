//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! # 特性
//!
//! - 结构化日志：支持键值对
//! - 灵活输出：支持控制台和文件输出
//! - 日志级别：trace, debug, info, warn, error
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_hal::core::log;
//! use dist_hal::core::config::LogLevel;
//!
//! log::init_logger(LogLevel::Info, false, None).unwrap();
//! tracing::info!(width = 800, height = 600, "Back buffer created");
//! ```

use std::path::Path;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::LogLevel;
use super::error::{DistHalError, Result};

/// 初始化日志系统
///
/// 应在程序开始时调用一次，重复调用会返回 `DistHalError::Log`。
///
/// # 参数
///
/// * `level` - 日志级别（`RUST_LOG` 环境变量优先）
/// * `file_output` - 是否同时输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "disthal.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_ansi(true);

    let result = if file_output {
        let log_path = log_file_path.unwrap_or("disthal.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("disthal.log");

        // 每天滚动
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
    };

    result.map_err(|e| DistHalError::Log(e.to_string()))
}

/// HAL 内部日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dist_hal::engine", $($arg)*)
    };
}

/// HAL 内部日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dist_hal::engine", $($arg)*)
    };
}

/// HAL 内部日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "dist_hal::engine", $($arg)*)
    };
}

/// 应用层日志 - Info 级别
#[macro_export]
macro_rules! app_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dist_hal::app", $($arg)*)
    };
}

/// 应用层日志 - Warn 级别
#[macro_export]
macro_rules! app_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dist_hal::app", $($arg)*)
    };
}

impl LogLevel {
    /// 对应的 EnvFilter 指令
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
