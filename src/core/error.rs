//! 错误处理模块
//!
//! 定义了 HAL 中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分类
//!
//! - **构造失败**：原生对象创建失败（内存不足、特性不支持），不会返回半成品对象
//! - **契约违反**：调用方的逻辑错误（错误的命令列表类型、空资源、未对齐的常量缓冲区）
//! - **资源耗尽**：描述符堆已满，堆容量固定、不会增长
//!
//! 幂等的空操作（重复 `end_recording`、渲染通道外 `end_render_pass`）只记录日志，不产生错误。

use thiserror::Error;

use crate::renderer::resource::ResourceId;

/// HAL 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistHalError>;

/// DistHal 的错误类型
#[derive(Debug, Error)]
pub enum DistHalError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 设备创建失败
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// 资源创建失败
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// 后端不支持请求的特性
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// 视图创建失败（类型/维度组合不支持、对齐错误等）
    #[error("View creation failed: {0}")]
    ViewCreation(String),

    /// 资源 ID 不存在或已销毁
    #[error("Invalid resource: {0}")]
    InvalidResource(ResourceId),

    /// 描述符堆已满
    #[error("Descriptor heap '{heap}' exhausted ({capacity} slots)")]
    DescriptorHeapExhausted { heap: String, capacity: u32 },

    /// 命令分配器仍被 GPU 使用
    #[error("Command allocator '{0}' is still in use by the GPU")]
    AllocatorInFlight(String),

    /// 命令缓冲区未处于记录状态
    #[error("Command buffer '{0}' is not recording")]
    NotRecording(String),

    /// 调用方违反了 API 契约
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// 命令提交/执行失败
    #[error("Command execution failed: {0}")]
    CommandExecution(String),
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 构造失败
    Construction,
    /// 契约违反
    Contract,
    /// 资源耗尽
    Exhaustion,
}

impl GraphicsError {
    /// 获取错误类别
    pub fn class(&self) -> ErrorClass {
        match self {
            GraphicsError::DeviceCreation(_)
            | GraphicsError::ResourceCreation(_)
            | GraphicsError::UnsupportedFeature(_)
            | GraphicsError::CommandExecution(_) => ErrorClass::Construction,
            GraphicsError::ViewCreation(_)
            | GraphicsError::InvalidResource(_)
            | GraphicsError::AllocatorInFlight(_)
            | GraphicsError::NotRecording(_)
            | GraphicsError::ContractViolation(_) => ErrorClass::Contract,
            GraphicsError::DescriptorHeapExhausted { .. } => ErrorClass::Exhaustion,
        }
    }
}

impl DistHalError {
    /// 获取内部的图形错误（如果是）
    pub fn as_graphics(&self) -> Option<&GraphicsError> {
        match self {
            DistHalError::Graphics(e) => Some(e),
            _ => None,
        }
    }

    /// 获取图形错误的类别
    pub fn class(&self) -> Option<ErrorClass> {
        self.as_graphics().map(GraphicsError::class)
    }
}

/// 构造契约违反错误的便捷函数
pub(crate) fn contract(msg: impl Into<String>) -> DistHalError {
    GraphicsError::ContractViolation(msg.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: DistHalError = GraphicsError::DescriptorHeapExhausted {
            heap: "RTV Heap".to_string(),
            capacity: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Graphics error: Descriptor heap 'RTV Heap' exhausted (4 slots)"
        );
    }

    #[test]
    fn test_error_class() {
        assert_eq!(
            GraphicsError::DeviceCreation("oom".into()).class(),
            ErrorClass::Construction
        );
        assert_eq!(contract("bad type").class(), Some(ErrorClass::Contract));
        let exhausted = GraphicsError::DescriptorHeapExhausted {
            heap: "DSV Heap".into(),
            capacity: 1,
        };
        assert_eq!(exhausted.class(), ErrorClass::Exhaustion);

        let io: DistHalError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(io.class(), None);
    }
}
