//! 渲染器模块
//!
//! 本模块提供与具体图形 API 无关的命令提交与资源生命周期核心：
//! 命令缓冲区、资源状态跟踪、描述符堆、命令分配器、队列与 Fence、
//! 资源视图工厂，以及渲染通道与帧缓冲。
//!
//! # 架构设计
//!
//! - `Device`：所有对象的工厂，拥有资源池与默认描述符堆
//! - `CommandBuffer`：记录命令并在记录时插入状态转换屏障
//! - `CommandQueue`：提交封存的命令流，通过 `Fence` 同步
//! - 原生实现在 `gfx` 模块中，通过 `GpuBackend` trait 接入

pub mod state;
pub mod resource;
pub mod descriptor;
pub mod view;
pub mod stream;
pub mod pipeline;
pub mod render_pass;
pub mod command;
pub mod sync;
pub mod queue;
pub mod frame;
pub mod device;

pub use command::{CommandAllocator, CommandBuffer, CommandListType};
pub use descriptor::{DescriptorHeapCategory, DescriptorHeapDescriptor, DescriptorHeapType, DescriptorSlotHeap, SharedDescriptorHeap};
pub use device::{Device, DeviceDescriptor};
pub use frame::{FrameResource, FrameResourcePool};
pub use pipeline::{PipelineState, PipelineStateDescriptor};
pub use queue::CommandQueue;
pub use render_pass::{ColorAttachment, DepthStencilAttachment, FrameBuffer, LoadOp, RenderPass, StoreOp};
pub use resource::{BufferDescriptor, BufferUsageType, MemoryType, ResourceId, TextureDescriptor, TextureFormat};
pub use state::{ResourceBarrier, ResourceState};
pub use sync::Fence;
pub use view::{ResourceView, SamplerDescriptor, ViewDescriptor, ViewType};
