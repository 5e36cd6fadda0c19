//! 命令流
//!
//! 命令缓冲区记录的结果。命令流在 `end_recording` 时被封存，之后只读，
//! 由队列按顺序交给后端执行。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::command::CommandListType;
use super::descriptor::{CpuDescriptorHandle, GpuDescriptorHandle};
use super::pipeline::{IndexBufferView, PipelineId, PipelineKind, PrimitiveTopology, ScissorRect, VertexBufferView, Viewport};
use super::render_pass::{LoadOp, StoreOp};
use super::resource::ResourceId;
use super::state::ResourceBarrier;
use crate::gfx::backend::NativeHeapId;

/// 深度模板清除标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags {
    pub depth: bool,
    pub stencil: bool,
}

impl ClearFlags {
    pub const DEPTH: ClearFlags = ClearFlags { depth: true, stencil: false };
    pub const STENCIL: ClearFlags = ClearFlags { depth: false, stencil: true };
    pub const ALL: ClearFlags = ClearFlags { depth: true, stencil: true };

    pub fn is_empty(&self) -> bool {
        !self.depth && !self.stencil
    }
}

/// 原生渲染通道中的颜色目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassColorTarget {
    pub view: CpuDescriptorHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f32; 4],
}

/// 原生渲染通道中的深度模板目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassDepthTarget {
    pub view: CpuDescriptorHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

/// 记录的 GPU 命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 一批资源屏障（一次提交）
    ResourceBarrier(Vec<ResourceBarrier>),
    BeginRenderPass {
        colors: Vec<RenderPassColorTarget>,
        depth: Option<RenderPassDepthTarget>,
    },
    EndRenderPass,
    SetRenderTargets {
        colors: Vec<CpuDescriptorHandle>,
        depth: Option<CpuDescriptorHandle>,
    },
    ClearRenderTarget {
        view: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    SetPipelineState {
        pipeline: PipelineId,
        kind: PipelineKind,
    },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer {
        slot: u32,
        view: VertexBufferView,
    },
    SetIndexBuffer(IndexBufferView),
    SetDescriptorHeaps(Vec<NativeHeapId>),
    SetRootDescriptorTable {
        compute: bool,
        root_index: u32,
        base: GpuDescriptorHandle,
    },
    SetRootConstantBuffer {
        root_index: u32,
        resource: ResourceId,
        offset: u64,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    CopyResource {
        dst: ResourceId,
        src: ResourceId,
    },
    CopyTextureRegion {
        dst: ResourceId,
        dst_subresource: u32,
        src: ResourceId,
        src_subresource: u32,
    },
    BeginEvent(String),
    EndEvent,
}

impl Command {
    /// 命令名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Command::ResourceBarrier(_) => "ResourceBarrier",
            Command::BeginRenderPass { .. } => "BeginRenderPass",
            Command::EndRenderPass => "EndRenderPass",
            Command::SetRenderTargets { .. } => "SetRenderTargets",
            Command::ClearRenderTarget { .. } => "ClearRenderTarget",
            Command::ClearDepthStencil { .. } => "ClearDepthStencil",
            Command::SetPipelineState { .. } => "SetPipelineState",
            Command::SetViewport(_) => "SetViewport",
            Command::SetScissorRect(_) => "SetScissorRect",
            Command::SetPrimitiveTopology(_) => "SetPrimitiveTopology",
            Command::SetVertexBuffer { .. } => "SetVertexBuffer",
            Command::SetIndexBuffer(_) => "SetIndexBuffer",
            Command::SetDescriptorHeaps(_) => "SetDescriptorHeaps",
            Command::SetRootDescriptorTable { .. } => "SetRootDescriptorTable",
            Command::SetRootConstantBuffer { .. } => "SetRootConstantBuffer",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::Dispatch { .. } => "Dispatch",
            Command::CopyBufferRegion { .. } => "CopyBufferRegion",
            Command::CopyResource { .. } => "CopyResource",
            Command::CopyTextureRegion { .. } => "CopyTextureRegion",
            Command::BeginEvent(_) => "BeginEvent",
            Command::EndEvent => "EndEvent",
        }
    }
}

/// 已记录的命令流
///
/// 持有其来源分配器的在途计数，队列提交时加一，GPU 时间线执行完后减一。
#[derive(Debug)]
pub struct CommandStream {
    list_type: CommandListType,
    name: String,
    commands: Vec<Command>,
    in_flight: Arc<AtomicUsize>,
}

impl CommandStream {
    pub(crate) fn new(list_type: CommandListType, name: String, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            list_type,
            name,
            commands: Vec::new(),
            in_flight,
        }
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// 标记一次提交开始
    pub(crate) fn mark_submitted(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// 标记 GPU 执行完成，返回守卫，析构时减少在途计数
    pub fn completion_guard(self: &Arc<Self>) -> CompletionGuard {
        CompletionGuard { stream: Arc::clone(self) }
    }
}

/// GPU 执行完命令流后释放在途计数
///
/// 即便执行途中出错，守卫析构也会归还计数，分配器不会永久处于在途状态。
pub struct CompletionGuard {
    stream: Arc<CommandStream>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.stream.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
