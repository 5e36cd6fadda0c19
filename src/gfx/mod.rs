//! 图形后端模块
//!
//! 本模块封装原生图形 API 的接入层，包括：
//! - `backend`：所有原生后端必须实现的统一接口
//! - `software`：纯 CPU 实现，带验证层，用于测试与无 GPU 环境
//!
//! 上层记录逻辑只依赖 `GpuBackend` 与 `QueueBackend` trait，
//! 确保可以在不同的后端之间切换。

pub mod backend;
pub mod software;

pub use backend::{BackendCapabilities, GpuBackend, QueueBackend};
pub use software::{SoftwareBackend, SoftwareBackendConfig};
