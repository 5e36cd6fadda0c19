//! DistHal - DistRender 硬件抽象层的命令提交与资源生命周期核心
//!
//! 本库把显式图形 API 的命令记录、资源状态转换、描述符管理与 CPU/GPU 同步
//! 封装成统一的接口，原生实现通过 `gfx` 模块中的后端接入。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `renderer`: 命令缓冲区、状态跟踪、描述符堆、队列、视图与渲染通道
//! - `gfx`: 图形后端抽象层与软件后端
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use dist_hal::gfx::{SoftwareBackend, SoftwareBackendConfig};
//! use dist_hal::renderer::{CommandListType, Device, DeviceDescriptor};
//!
//! # fn main() -> dist_hal::core::Result<()> {
//! let backend = Arc::new(SoftwareBackend::new(SoftwareBackendConfig::default()));
//! let device = Device::new(DeviceDescriptor::new().with_name("Main"), backend)?;
//!
//! let queue = device.create_command_queue(CommandListType::Graphics, Some("Direct Queue"))?;
//! let fence = device.create_fence(0, Some("Frame Fence"));
//! let allocator = device.create_command_allocator(CommandListType::Graphics, None);
//! let mut commands = device.create_command_buffer(&allocator, None);
//!
//! commands.begin_recording(false)?;
//! commands.end_recording()?;
//! queue.execute(&[&commands])?;
//! queue.flush(&fence)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod renderer;
pub mod gfx;
