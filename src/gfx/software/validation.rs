//! 软件后端的验证层
//!
//! 在 GPU 时间线上检查命令执行时的真实资源状态。记录阶段的状态跟踪只能看到
//! 单个命令缓冲区的视角，未同步的并行记录要在这里才能暴露出来。

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{engine_error, engine_warn};

/// 验证消息严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationSeverity {
    Warning,
    Error,
}

/// 验证消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    /// 触发消息的命令流
    pub stream: String,
    /// 触发消息的命令
    pub command: &'static str,
    pub message: String,
}

impl ValidationMessage {
    pub fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            ValidationSeverity::Warning => "WARNING",
            ValidationSeverity::Error => "ERROR",
        };
        write!(f, "[{}] {} in '{}': {}", level, self.command, self.stream, self.message)
    }
}

/// 收集到的验证消息，在后端与各队列线程之间共享
#[derive(Debug, Clone, Default)]
pub(crate) struct ValidationLog {
    messages: Arc<Mutex<Vec<ValidationMessage>>>,
}

impl ValidationLog {
    pub fn push(&self, message: ValidationMessage) {
        match message.severity {
            ValidationSeverity::Warning => engine_warn!(
                stream = %message.stream,
                command = message.command,
                "GPU validation: {}",
                message.message
            ),
            ValidationSeverity::Error => engine_error!(
                stream = %message.stream,
                command = message.command,
                "GPU validation: {}",
                message.message
            ),
        }
        self.messages.lock().push(message);
    }

    pub fn snapshot(&self) -> Vec<ValidationMessage> {
        self.messages.lock().clone()
    }

    pub fn error_count(&self) -> usize {
        self.messages.lock().iter().filter(|m| m.is_error()).count()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_counts_errors() {
        let log = ValidationLog::default();
        log.push(ValidationMessage {
            severity: ValidationSeverity::Warning,
            stream: "Main".to_string(),
            command: "ResourceBarrier",
            message: "redundant".to_string(),
        });
        log.push(ValidationMessage {
            severity: ValidationSeverity::Error,
            stream: "Main".to_string(),
            command: "Draw",
            message: "no pipeline".to_string(),
        });

        assert_eq!(log.snapshot().len(), 2);
        assert_eq!(log.error_count(), 1);
        assert_eq!(
            log.snapshot()[1].to_string(),
            "[ERROR] Draw in 'Main': no pipeline"
        );

        log.clear();
        assert!(log.snapshot().is_empty());
    }
}
