//! 图形后端的统一抽象接口
//!
//! 本模块定义了所有原生后端必须实现的统一接口。上层的命令缓冲区、
//! 状态跟踪、描述符堆和视图工厂只通过这些 trait 与原生 API 交互，
//! 因此可以在不同的后端之间切换，而不需要修改记录逻辑。
//!
//! # 设计理念
//!
//! - **抽象化**：隐藏原生 API 的句柄与描述结构
//! - **显式同步**：后端不做隐式等待，CPU/GPU 同步只经过 Fence
//! - **可扩展性**：新的后端只需实现 [`GpuBackend`] 与 [`QueueBackend`]

use std::sync::Arc;

use raw_window_handle::RawWindowHandle;

use crate::core::error::Result;
use crate::renderer::command::CommandListType;
use crate::renderer::descriptor::DescriptorHeapDescriptor;
use crate::renderer::resource::{ResourceId, ResourceKind};
use crate::renderer::stream::CommandStream;
use crate::renderer::sync::Fence;
use crate::renderer::view::NativeViewDescriptor;

/// 后端能力
///
/// 在设备创建时查询一次，之后不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// 是否支持原生渲染通道
    pub native_render_pass: bool,
    /// 是否支持光线追踪（加速结构视图）
    pub ray_tracing: bool,
    /// 是否启用了验证层
    pub validation: bool,
}

/// 原生描述符堆 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHeapId(pub u64);

/// 原生描述符堆
///
/// 句柄按 `start + index * increment_size` 计算。
#[derive(Debug, Clone, Copy)]
pub struct NativeHeap {
    pub id: NativeHeapId,
    /// CPU 句柄起始地址
    pub cpu_start: usize,
    /// GPU 句柄起始地址（仅着色器可见的堆）
    pub gpu_start: Option<u64>,
    /// 描述符增量大小
    pub increment_size: u32,
}

/// 原生设备接口
///
/// 所有方法都可以从多个线程调用。
pub trait GpuBackend: Send + Sync {
    /// 后端名称，用于日志输出
    fn name(&self) -> &str;

    /// 查询后端能力
    fn capabilities(&self) -> BackendCapabilities;

    /// 连接平台窗口
    ///
    /// # 参数
    ///
    /// * `window` - 平台窗口句柄，离屏设备为 `None`
    fn attach_window(&self, window: Option<RawWindowHandle>) -> Result<()>;

    /// 为资源分配原生内存
    fn create_resource(&self, id: ResourceId, kind: &ResourceKind) -> Result<()>;

    /// 释放资源的原生内存
    fn destroy_resource(&self, id: ResourceId);

    /// 写入 CPU 可见的资源
    fn write_resource(&self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取 CPU 可见的资源
    fn read_resource(&self, id: ResourceId, offset: u64, size: u64) -> Result<Vec<u8>>;

    /// 创建原生描述符堆
    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<NativeHeap>;

    /// 销毁原生描述符堆
    fn destroy_descriptor_heap(&self, heap: NativeHeapId);

    /// 将解析后的视图描述写入堆槽位
    fn write_descriptor(&self, heap: NativeHeapId, index: u32, descriptor: &NativeViewDescriptor);

    /// 清除堆槽位
    fn clear_descriptor(&self, heap: NativeHeapId, index: u32);

    /// 创建命令队列
    fn create_queue(&self, list_type: CommandListType, name: &str) -> Result<Box<dyn QueueBackend>>;
}

/// 原生命令队列接口
///
/// 所有操作按照调用顺序在队列的 GPU 时间线上执行，对 CPU 而言是异步的。
pub trait QueueBackend: Send + Sync {
    /// 按顺序提交命令流
    fn submit(&self, streams: Vec<Arc<CommandStream>>) -> Result<()>;

    /// 之前提交的工作完成后，在 GPU 上将 Fence 置为 `value`
    fn signal(&self, fence: &Fence, value: u64) -> Result<()>;

    /// 在 GPU 上等待 Fence 达到 `value`，不阻塞 CPU
    fn wait(&self, fence: &Fence, value: u64) -> Result<()>;
}
