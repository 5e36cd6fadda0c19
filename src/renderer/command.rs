//! 命令缓冲区管理模块
//!
//! 提供命令分配器与命令缓冲区，封装命令记录与资源状态跟踪。
//! 借鉴 DistEngine 的 CommandList 设计。
//!
//! # 设计原则
//!
//! - **显式状态机**：Closed → `begin_recording` → Recording → `end_recording` → Closed，
//!   渲染通道是 Recording 内部嵌套的子状态
//! - **状态跟踪**：每个屏障都读取资源当前记录的状态作为 before，并立即更新记录，
//!   不做自动省略
//! - **类型安全**：命令列表类型在 `reset` 与提交时校验，不会被静默转换
//! - **单线程记录**：记录需要 `&mut self`，不同的命令缓冲区可以在不同线程上并发记录
//!
//! # 命令列表类型
//!
//! - **Graphics**: 图形、计算与复制命令
//! - **Compute**: 计算与复制命令
//! - **Copy**: 仅复制命令

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::core::error::{contract, GraphicsError, Result};
use super::descriptor::{DescriptorHeapCategory, GpuDescriptorHandle, SharedDescriptorHeap};
use super::pipeline::{
    IndexBufferView, PipelineKind, PipelineState, PrimitiveTopology, ScissorRect, VertexBufferView,
    Viewport, MAX_RENDER_TARGETS,
};
use super::render_pass::{FrameBuffer, RenderPass, RenderPassStrategy};
use super::resource::{range_exceeds, ResourceArena, ResourceId, ResourceKind};
use super::state::{ResourceBarrier, ResourceState};
use super::stream::{ClearFlags, Command, CommandStream};
use super::view::ResourceView;

/// 命令列表类型
///
/// 对应 DistEngine 的 CommandListType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListType {
    /// 图形命令列表，可以包含所有类型的命令
    Graphics,
    /// 计算命令列表，只能包含计算与复制命令
    Compute,
    /// 复制命令列表，只能包含复制命令
    Copy,
}

impl CommandListType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandListType::Graphics => "Graphics",
            CommandListType::Compute => "Compute",
            CommandListType::Copy => "Copy",
        }
    }
}

struct AllocatorState {
    /// 是否有命令缓冲区正在使用该分配器记录
    recording: bool,
    /// 自上次重置以来记录的命令流（分配器的“内存”）
    streams: Vec<Arc<CommandStream>>,
    resets: u64,
}

struct AllocatorShared {
    list_type: CommandListType,
    name: Option<String>,
    /// 已提交但 GPU 尚未执行完的命令流数量
    in_flight: Arc<AtomicUsize>,
    state: Mutex<AllocatorState>,
}

/// 命令分配器
///
/// 命令缓冲区记录时消耗的后备存储，通过 [`reset`](Self::reset) 整体回收。
/// 类似于 CommandAllocator（DX12）或 CommandPool（Vulkan）。克隆得到的是同一个分配器的句柄。
///
/// 同一时间只能有一个命令缓冲区使用分配器记录。
#[derive(Clone)]
pub struct CommandAllocator {
    shared: Arc<AllocatorShared>,
}

impl CommandAllocator {
    /// 创建新的命令分配器
    pub fn new(list_type: CommandListType, name: Option<&str>) -> Self {
        Self {
            shared: Arc::new(AllocatorShared {
                list_type,
                name: name.map(str::to_string),
                in_flight: Arc::new(AtomicUsize::new(0)),
                state: Mutex::new(AllocatorState {
                    recording: false,
                    streams: Vec::new(),
                    resets: 0,
                }),
            }),
        }
    }

    pub fn list_type(&self) -> CommandListType {
        self.shared.list_type
    }

    pub fn name(&self) -> &str {
        self.shared.name.as_deref().unwrap_or("<unnamed allocator>")
    }

    /// GPU 是否仍在使用该分配器记录的命令
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) > 0
    }

    /// 自上次重置以来保留的命令数量
    pub fn retained_commands(&self) -> usize {
        self.shared.state.lock().streams.iter().map(|s| s.len()).sum()
    }

    /// 重置次数
    pub fn reset_count(&self) -> u64 {
        self.shared.state.lock().resets
    }

    /// 回收分配器的全部内存
    ///
    /// 只有在 CPU 已经通过 Fence 确认 GPU 执行完该分配器记录的所有命令后才安全。
    /// 仍有在途的命令或仍有命令缓冲区在记录时返回错误。
    pub fn reset(&self) -> Result<()> {
        if self.is_in_flight() {
            return Err(GraphicsError::AllocatorInFlight(self.name().to_string()).into());
        }
        let mut state = self.shared.state.lock();
        if state.recording {
            return Err(contract(format!(
                "Command allocator '{}' is being recorded into",
                self.name()
            )));
        }
        state.streams.clear();
        state.resets += 1;
        debug!(allocator = self.name(), "Command allocator reset");
        Ok(())
    }

    pub(crate) fn same_allocator(&self, other: &CommandAllocator) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 开始一次记录，返回新的命令流
    fn open_stream(&self, name: String) -> Result<CommandStream> {
        let mut state = self.shared.state.lock();
        if state.recording {
            return Err(contract(format!(
                "Command allocator '{}' is already being recorded into",
                self.name()
            )));
        }
        state.recording = true;
        Ok(CommandStream::new(self.shared.list_type, name, self.shared.in_flight.clone()))
    }

    /// 结束记录，分配器保留命令流直到下次重置
    fn close_stream(&self, stream: CommandStream) -> Arc<CommandStream> {
        let stream = Arc::new(stream);
        let mut state = self.shared.state.lock();
        state.recording = false;
        state.streams.push(stream.clone());
        stream
    }
}

impl std::fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("name", &self.name())
            .field("list_type", &self.list_type())
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

/// 渲染通道期间要恢复的状态
struct ActivePass {
    name: String,
    restore: Vec<(ResourceId, ResourceState)>,
}

/// 命令缓冲区
///
/// 记录一段 GPU 操作序列，拥有渲染通道状态机与屏障发射逻辑。
///
/// 绘制、分派与 Set* 命令在缓冲区关闭时会被丢弃并记录警告；屏障、复制与
/// 渲染通道操作在关闭时返回 [`GraphicsError::NotRecording`]。
pub struct CommandBuffer {
    list_type: CommandListType,
    name: Option<String>,
    allocator: CommandAllocator,
    strategy: Arc<dyn RenderPassStrategy>,
    is_open: bool,
    in_render_pass: bool,
    recording: Option<CommandStream>,
    sealed: Option<Arc<CommandStream>>,
    active_pass: Option<ActivePass>,
}

impl CommandBuffer {
    /// 创建处于关闭状态的命令缓冲区
    pub(crate) fn new(
        allocator: CommandAllocator,
        strategy: Arc<dyn RenderPassStrategy>,
        name: Option<&str>,
    ) -> Self {
        Self {
            list_type: allocator.list_type(),
            name: name.map(str::to_string),
            allocator,
            strategy,
            is_open: false,
            in_render_pass: false,
            recording: None,
            sealed: None,
            active_pass: None,
        }
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed command buffer>")
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    pub fn allocator(&self) -> &CommandAllocator {
        &self.allocator
    }

    /// 渲染通道策略名称
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// 最近一次封存的命令流
    pub fn sealed_stream(&self) -> Option<&Arc<CommandStream>> {
        self.sealed.as_ref()
    }

    /// 当前正在记录的命令
    pub fn recorded_commands(&self) -> &[Command] {
        self.recording.as_ref().map(CommandStream::commands).unwrap_or(&[])
    }

    // ==================== 状态机 ====================

    /// 开始记录
    ///
    /// 已经打开时为空操作。`still_mid_frame` 为 false 时先重置分配器，
    /// 调用方必须已经等待过上次使用该分配器的 Fence 值。
    pub fn begin_recording(&mut self, still_mid_frame: bool) -> Result<()> {
        if self.is_open {
            trace!(buffer = self.name(), "begin_recording on an open command buffer ignored");
            return Ok(());
        }

        if !still_mid_frame {
            self.allocator.reset()?;
        }

        let stream = self.allocator.open_stream(self.name().to_string())?;
        self.recording = Some(stream);
        self.in_render_pass = false;
        self.active_pass = None;
        self.is_open = true;
        trace!(buffer = self.name(), still_mid_frame, "Recording started");
        Ok(())
    }

    /// 结束记录
    ///
    /// 已经关闭时为空操作（记录日志）。仍在渲染通道内时返回错误。
    pub fn end_recording(&mut self) -> Result<()> {
        if !self.is_open {
            debug!(buffer = self.name(), "end_recording on a closed command buffer ignored");
            return Ok(());
        }
        if self.in_render_pass {
            let pass = self.active_pass.as_ref().map(|p| p.name.as_str()).unwrap_or("<unknown>");
            return Err(contract(format!(
                "Command buffer '{}' closed inside render pass '{}'",
                self.name(),
                pass
            )));
        }

        if let Some(stream) = self.recording.take() {
            trace!(buffer = self.name(), commands = stream.len(), "Recording ended");
            self.sealed = Some(self.allocator.close_stream(stream));
        }
        self.is_open = false;
        Ok(())
    }

    /// 绑定到另一个分配器
    ///
    /// 只能在关闭状态下调用，分配器的列表类型必须与缓冲区一致。
    pub fn reset(&mut self, allocator: &CommandAllocator) -> Result<()> {
        if self.is_open {
            return Err(contract(format!(
                "Command buffer '{}' cannot be reset while recording",
                self.name()
            )));
        }
        if allocator.list_type() != self.list_type {
            return Err(contract(format!(
                "Command buffer '{}' is {} but allocator '{}' is {}",
                self.name(),
                self.list_type.name(),
                allocator.name(),
                allocator.list_type().name()
            )));
        }
        if !self.allocator.same_allocator(allocator) {
            debug!(buffer = self.name(), allocator = allocator.name(), "Command buffer rebound");
            self.allocator = allocator.clone();
        }
        self.sealed = None;
        Ok(())
    }

    fn ensure_recording(&self, operation: &str) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            warn!(buffer = self.name(), operation, "Command buffer is not recording");
            Err(GraphicsError::NotRecording(self.name().to_string()).into())
        }
    }

    fn stream_mut(&mut self) -> Result<&mut CommandStream> {
        let name = self.name().to_string();
        self.recording
            .as_mut()
            .ok_or_else(|| GraphicsError::NotRecording(name).into())
    }

    /// 记录一条不返回错误的命令，关闭时丢弃
    fn record(&mut self, command: Command) {
        match self.recording.as_mut() {
            Some(stream) if self.is_open => {
                trace!(command = command.name(), "Command recorded");
                stream.push(command);
            }
            _ => warn!(
                buffer = self.name.as_deref().unwrap_or("<unnamed command buffer>"),
                command = command.name(),
                "Command dropped: command buffer is closed"
            ),
        }
    }

    /// 记录一条只允许出现在特定列表类型上的命令
    fn record_for(&mut self, allowed: &[CommandListType], command: Command) {
        if !allowed.contains(&self.list_type) {
            warn!(
                buffer = self.name(),
                command = command.name(),
                list_type = self.list_type.name(),
                "Command dropped: not supported by this command list type"
            );
            return;
        }
        self.record(command);
    }

    // ==================== 屏障与状态跟踪 ====================

    /// 发射一批状态转换
    ///
    /// 先校验所有资源，再按数组顺序读取 before、更新记录，出错时不会留下部分更新。
    fn emit_transitions(
        &mut self,
        resources: &ResourceArena,
        transitions: &[(ResourceId, ResourceState)],
        skip_satisfied: bool,
    ) -> Result<()> {
        let targets = transitions
            .iter()
            .map(|&(id, after)| resources.get(id).map(|resource| (resource, after)))
            .collect::<Result<Vec<_>>>()?;

        let mut barriers = Vec::with_capacity(targets.len());
        for (resource, after) in targets {
            let before = resource.current_state();
            if skip_satisfied && before.satisfies(after) {
                continue;
            }
            barriers.push(ResourceBarrier::transition(resource.id(), before, after));
            resource.set_state(after);
        }

        if !barriers.is_empty() {
            self.stream_mut()?.push(Command::ResourceBarrier(barriers));
        }
        Ok(())
    }

    /// 将资源转换到 `after`
    ///
    /// 读取当前记录的状态作为 before，发射一个 before → after 屏障。
    /// 不做自动省略，调用方需要自行避免冗余转换。
    pub fn transition_state(
        &mut self,
        resources: &ResourceArena,
        resource: ResourceId,
        after: ResourceState,
    ) -> Result<()> {
        self.ensure_recording("transition_state")?;
        self.emit_transitions(resources, &[(resource, after)], false)
    }

    /// 批量转换资源状态，作为一次屏障提交
    pub fn transition_states(
        &mut self,
        resources: &ResourceArena,
        ids: &[ResourceId],
        afters: &[ResourceState],
    ) -> Result<()> {
        self.ensure_recording("transition_states")?;
        if ids.len() != afters.len() {
            return Err(contract(format!(
                "transition_states got {} resources and {} states",
                ids.len(),
                afters.len()
            )));
        }
        let transitions: Vec<_> = ids.iter().copied().zip(afters.iter().copied()).collect();
        self.emit_transitions(resources, &transitions, false)
    }

    /// UAV 屏障（写后读写，不改变状态）
    pub fn uav_barrier(&mut self, resources: &ResourceArena, resource: ResourceId) -> Result<()> {
        self.ensure_recording("uav_barrier")?;
        resources.get(resource)?;
        self.stream_mut()?
            .push(Command::ResourceBarrier(vec![ResourceBarrier::UnorderedAccess { resource }]));
        Ok(())
    }

    // ==================== 复制 ====================

    /// 复制前把源转换到 CopySource、目标转换到 CopyDestination，
    /// 复制后恢复两者原来的状态
    fn copy_with_transitions(
        &mut self,
        resources: &ResourceArena,
        src: ResourceId,
        dst: ResourceId,
        command: Command,
    ) -> Result<()> {
        if src == dst {
            return Err(contract(format!("{} source and destination are the same resource", command.name())));
        }
        let src_before = resources.get(src)?.current_state();
        let dst_before = resources.get(dst)?.current_state();

        self.emit_transitions(
            resources,
            &[(src, ResourceState::CopySource), (dst, ResourceState::CopyDestination)],
            true,
        )?;
        self.stream_mut()?.push(command);
        self.emit_transitions(resources, &[(src, src_before), (dst, dst_before)], true)
    }

    /// 复制缓冲区区域
    pub fn copy_buffer_region(
        &mut self,
        resources: &ResourceArena,
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.ensure_recording("copy_buffer_region")?;
        let buffer_size = |id: ResourceId| -> Result<u64> {
            resources
                .get(id)?
                .as_buffer()
                .map(|b| b.aligned_size())
                .ok_or_else(|| contract("copy_buffer_region requires buffers"))
        };
        let (src_size, dst_size) = (buffer_size(src)?, buffer_size(dst)?);
        if size == 0 || range_exceeds(src_offset, size, src_size) || range_exceeds(dst_offset, size, dst_size) {
            return Err(contract(format!(
                "Buffer copy of {} bytes out of range (src {}+{}, dst {}+{})",
                size, src_size, src_offset, dst_size, dst_offset
            )));
        }

        self.copy_with_transitions(
            resources,
            src,
            dst,
            Command::CopyBufferRegion { dst, dst_offset, src, src_offset, size },
        )
    }

    /// 复制整个资源，两者的大小与布局必须一致
    pub fn copy_resource(&mut self, resources: &ResourceArena, dst: ResourceId, src: ResourceId) -> Result<()> {
        self.ensure_recording("copy_resource")?;
        let compatible = match (resources.get(src)?.kind(), resources.get(dst)?.kind()) {
            (ResourceKind::Buffer(a), ResourceKind::Buffer(b)) => a.aligned_size() == b.aligned_size(),
            (ResourceKind::Texture(a), ResourceKind::Texture(b)) => {
                a.width == b.width
                    && a.height == b.height
                    && a.depth_or_array_layers == b.depth_or_array_layers
                    && a.mip_levels == b.mip_levels
                    && a.format.bytes_per_texel() == b.format.bytes_per_texel()
            }
            _ => false,
        };
        if !compatible {
            return Err(contract("copy_resource requires resources with identical layouts"));
        }

        self.copy_with_transitions(resources, src, dst, Command::CopyResource { dst, src })
    }

    /// 复制纹理子资源
    pub fn copy_texture_region(
        &mut self,
        resources: &ResourceArena,
        dst: ResourceId,
        dst_subresource: u32,
        src: ResourceId,
        src_subresource: u32,
    ) -> Result<()> {
        self.ensure_recording("copy_texture_region")?;
        let subresource_size = |id: ResourceId, subresource: u32| -> Result<u64> {
            let texture = resources
                .get(id)?
                .as_texture()
                .ok_or_else(|| contract("copy_texture_region requires textures"))?;
            if subresource >= texture.subresource_count() {
                return Err(contract(format!(
                    "Subresource {} out of range ({})",
                    subresource,
                    texture.subresource_count()
                )));
            }
            let mip = subresource % texture.mip_levels;
            Ok(texture.mip_size(mip))
        };
        if subresource_size(src, src_subresource)? != subresource_size(dst, dst_subresource)? {
            return Err(contract("copy_texture_region requires subresources of the same size"));
        }

        self.copy_with_transitions(
            resources,
            src,
            dst,
            Command::CopyTextureRegion { dst, dst_subresource, src, src_subresource },
        )
    }

    // ==================== 渲染通道 ====================

    /// 开始渲染通道
    ///
    /// 把帧缓冲的所有颜色目标一次性转换到 RenderTarget（已处于该状态的跳过），
    /// 深度目标转换到 DepthWrite，然后交给设备选定的策略执行。
    pub fn begin_render_pass(
        &mut self,
        resources: &ResourceArena,
        pass: &RenderPass,
        frame_buffer: &FrameBuffer,
    ) -> Result<()> {
        self.ensure_recording("begin_render_pass")?;
        if self.list_type != CommandListType::Graphics {
            return Err(contract(format!(
                "Render passes require a Graphics command buffer, '{}' is {}",
                self.name(),
                self.list_type.name()
            )));
        }
        if self.in_render_pass {
            return Err(contract(format!(
                "Command buffer '{}' is already inside a render pass",
                self.name()
            )));
        }
        if !pass.compatible(frame_buffer) {
            return Err(contract(format!(
                "Render pass '{}' ({} colors, depth: {}) is incompatible with frame buffer '{}' ({} targets, depth: {})",
                pass.name(),
                pass.color_attachments().len(),
                pass.depth_attachment().is_some(),
                frame_buffer.name(),
                frame_buffer.color_targets().len(),
                frame_buffer.depth_target().is_some()
            )));
        }

        let mut transitions: Vec<(ResourceId, ResourceState)> = frame_buffer
            .color_resources()
            .map(|id| (id, ResourceState::RenderTarget))
            .collect();
        if pass.depth_attachment().is_some() {
            if let Some(depth) = frame_buffer.depth_resource() {
                transitions.push((depth, ResourceState::DepthWrite));
            }
        }

        let restore = transitions
            .iter()
            .map(|&(id, _)| resources.get(id).map(|r| (id, r.current_state())))
            .collect::<Result<Vec<_>>>()?;

        self.emit_transitions(resources, &transitions, true)?;
        let strategy = Arc::clone(&self.strategy);
        strategy.begin(self.stream_mut()?, pass, frame_buffer);

        self.active_pass = Some(ActivePass {
            name: pass.name().to_string(),
            restore,
        });
        self.in_render_pass = true;
        trace!(buffer = self.name(), pass = pass.name(), strategy = strategy.name(), "Render pass begun");
        Ok(())
    }

    /// 结束渲染通道
    ///
    /// 不在通道内时为空操作。目标一次性恢复到通道开始前的状态（后备缓冲为 Present）。
    pub fn end_render_pass(&mut self, resources: &ResourceArena) -> Result<()> {
        if !self.in_render_pass {
            debug!(buffer = self.name(), "end_render_pass outside a render pass ignored");
            return Ok(());
        }
        self.ensure_recording("end_render_pass")?;

        let strategy = Arc::clone(&self.strategy);
        strategy.end(self.stream_mut()?);

        let restore = self.active_pass.take().map(|p| p.restore).unwrap_or_default();
        self.emit_transitions(resources, &restore, true)?;
        self.in_render_pass = false;
        Ok(())
    }

    // ==================== 绘制与状态设置 ====================

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        let allowed: &[CommandListType] = match pipeline.kind() {
            PipelineKind::Graphics => &[CommandListType::Graphics],
            PipelineKind::Compute => &[CommandListType::Graphics, CommandListType::Compute],
        };
        self.record_for(
            allowed,
            Command::SetPipelineState {
                pipeline: pipeline.id(),
                kind: pipeline.kind(),
            },
        );
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record_for(&[CommandListType::Graphics], Command::SetViewport(viewport));
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.record_for(&[CommandListType::Graphics], Command::SetScissorRect(rect));
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record_for(&[CommandListType::Graphics], Command::SetPrimitiveTopology(topology));
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, view: VertexBufferView) {
        self.record_for(&[CommandListType::Graphics], Command::SetVertexBuffer { slot, view });
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.record_for(&[CommandListType::Graphics], Command::SetIndexBuffer(view));
    }

    /// 绑定着色器可见的描述符堆
    pub fn set_descriptor_heaps(&mut self, heaps: &[&SharedDescriptorHeap]) {
        let ids = heaps.iter().map(|heap| heap.lock().native_id()).collect();
        self.record_for(
            &[CommandListType::Graphics, CommandListType::Compute],
            Command::SetDescriptorHeaps(ids),
        );
    }

    pub fn set_graphics_root_descriptor_table(&mut self, root_index: u32, base: GpuDescriptorHandle) {
        self.record_for(
            &[CommandListType::Graphics],
            Command::SetRootDescriptorTable { compute: false, root_index, base },
        );
    }

    pub fn set_compute_root_descriptor_table(&mut self, root_index: u32, base: GpuDescriptorHandle) {
        self.record_for(
            &[CommandListType::Graphics, CommandListType::Compute],
            Command::SetRootDescriptorTable { compute: true, root_index, base },
        );
    }

    pub fn set_graphics_root_constant_buffer(&mut self, root_index: u32, resource: ResourceId, offset: u64) {
        self.record_for(
            &[CommandListType::Graphics],
            Command::SetRootConstantBuffer { root_index, resource, offset },
        );
    }

    /// 直接绑定渲染目标
    pub fn set_render_targets(&mut self, colors: &[&ResourceView], depth: Option<&ResourceView>) {
        let valid = colors.len() <= MAX_RENDER_TARGETS
            && colors.iter().all(|v| v.category() == DescriptorHeapCategory::RenderTarget)
            && depth.map_or(true, |v| v.category() == DescriptorHeapCategory::DepthStencil);
        if !valid {
            warn!(buffer = self.name(), "set_render_targets dropped: invalid view categories");
            return;
        }
        self.record_for(
            &[CommandListType::Graphics],
            Command::SetRenderTargets {
                colors: colors.iter().map(|v| v.cpu_handle()).collect(),
                depth: depth.map(ResourceView::cpu_handle),
            },
        );
    }

    pub fn clear_render_target(&mut self, view: &ResourceView, color: [f32; 4]) {
        if view.category() != DescriptorHeapCategory::RenderTarget {
            warn!(buffer = self.name(), "clear_render_target dropped: not a render target view");
            return;
        }
        self.record_for(
            &[CommandListType::Graphics],
            Command::ClearRenderTarget { view: view.cpu_handle(), color },
        );
    }

    pub fn clear_depth_stencil(&mut self, view: &ResourceView, flags: ClearFlags, depth: f32, stencil: u8) {
        if view.category() != DescriptorHeapCategory::DepthStencil {
            warn!(buffer = self.name(), "clear_depth_stencil dropped: not a depth stencil view");
            return;
        }
        self.record_for(
            &[CommandListType::Graphics],
            Command::ClearDepthStencil { view: view.cpu_handle(), flags, depth, stencil },
        );
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record_for(
            &[CommandListType::Graphics],
            Command::Draw { vertex_count, instance_count, first_vertex, first_instance },
        );
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.record_for(
            &[CommandListType::Graphics],
            Command::DrawIndexed { index_count, instance_count, first_index, base_vertex, first_instance },
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record_for(
            &[CommandListType::Graphics, CommandListType::Compute],
            Command::Dispatch { x, y, z },
        );
    }

    /// 调试事件开始
    pub fn begin_event(&mut self, name: impl Into<String>) {
        self.record(Command::BeginEvent(name.into()));
    }

    pub fn end_event(&mut self) {
        self.record(Command::EndEvent);
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("name", &self.name())
            .field("list_type", &self.list_type)
            .field("is_open", &self.is_open)
            .field("in_render_pass", &self.in_render_pass)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::render_pass::NativeRenderPass;
    use crate::renderer::resource::{BufferDescriptor, BufferUsageType, MemoryType};

    fn buffer(list_type: CommandListType) -> CommandBuffer {
        CommandBuffer::new(
            CommandAllocator::new(list_type, Some("Test Allocator")),
            Arc::new(NativeRenderPass),
            Some("Test Buffer"),
        )
    }

    fn arena_with_buffers(count: usize) -> (ResourceArena, Vec<ResourceId>) {
        let mut arena = ResourceArena::new();
        let ids = (0..count)
            .map(|i| {
                arena.insert(ResourceKind::Buffer(
                    BufferDescriptor::new(256, BufferUsageType::Storage, MemoryType::DeviceLocal)
                        .with_name(format!("Buffer {}", i)),
                ))
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn test_begin_recording_twice_is_noop() {
        let mut cmd = buffer(CommandListType::Graphics);
        cmd.begin_recording(false).unwrap();
        cmd.draw(3, 1, 0, 0);
        cmd.begin_recording(false).unwrap();
        assert!(cmd.is_open());
        assert_eq!(cmd.recorded_commands().len(), 1);
    }

    #[test]
    fn test_end_recording_twice_is_noop() {
        let mut cmd = buffer(CommandListType::Graphics);
        cmd.end_recording().unwrap();
        cmd.begin_recording(false).unwrap();
        cmd.dispatch(1, 1, 1);
        cmd.end_recording().unwrap();
        cmd.end_recording().unwrap();
        assert!(!cmd.is_open());
        assert_eq!(cmd.sealed_stream().unwrap().len(), 1);
    }

    #[test]
    fn test_commands_on_closed_buffer_are_dropped() {
        let (arena, ids) = arena_with_buffers(1);
        let mut cmd = buffer(CommandListType::Graphics);
        cmd.draw(3, 1, 0, 0);
        assert!(cmd.recorded_commands().is_empty());

        let err = cmd.transition_state(&arena, ids[0], ResourceState::CopySource).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::NotRecording(_))));
        assert_eq!(arena.get(ids[0]).unwrap().current_state(), ResourceState::Common);
    }

    #[test]
    fn test_transition_state_updates_tracking() {
        let (arena, ids) = arena_with_buffers(1);
        let mut cmd = buffer(CommandListType::Graphics);
        cmd.begin_recording(false).unwrap();

        cmd.transition_state(&arena, ids[0], ResourceState::UnorderedAccess).unwrap();
        assert_eq!(arena.get(ids[0]).unwrap().current_state(), ResourceState::UnorderedAccess);

        // 冗余转换不会被省略
        cmd.transition_state(&arena, ids[0], ResourceState::UnorderedAccess).unwrap();
        assert_eq!(
            cmd.recorded_commands(),
            &[
                Command::ResourceBarrier(vec![ResourceBarrier::transition(
                    ids[0],
                    ResourceState::Common,
                    ResourceState::UnorderedAccess
                )]),
                Command::ResourceBarrier(vec![ResourceBarrier::transition(
                    ids[0],
                    ResourceState::UnorderedAccess,
                    ResourceState::UnorderedAccess
                )]),
            ]
        );
    }

    #[test]
    fn test_transition_states_batches_in_order() {
        let (arena, ids) = arena_with_buffers(2);
        let mut cmd = buffer(CommandListType::Compute);
        cmd.begin_recording(false).unwrap();

        cmd.transition_states(
            &arena,
            &[ids[0], ids[1], ids[0]],
            &[ResourceState::CopySource, ResourceState::CopyDestination, ResourceState::GenericRead],
        )
        .unwrap();

        assert_eq!(cmd.recorded_commands().len(), 1);
        match &cmd.recorded_commands()[0] {
            Command::ResourceBarrier(barriers) => {
                assert_eq!(barriers.len(), 3);
                assert_eq!(
                    barriers[2],
                    ResourceBarrier::transition(ids[0], ResourceState::CopySource, ResourceState::GenericRead)
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(arena.get(ids[0]).unwrap().current_state(), ResourceState::GenericRead);
        assert_eq!(arena.get(ids[1]).unwrap().current_state(), ResourceState::CopyDestination);

        assert!(cmd.transition_states(&arena, &ids, &[ResourceState::Common]).is_err());
    }

    #[test]
    fn test_copy_restores_states() {
        let (arena, ids) = arena_with_buffers(2);
        let mut cmd = buffer(CommandListType::Copy);
        cmd.begin_recording(false).unwrap();
        cmd.transition_state(&arena, ids[1], ResourceState::UnorderedAccess).unwrap();

        let before: Vec<_> = ids.iter().map(|&id| arena.get(id).unwrap().current_state()).collect();
        cmd.copy_buffer_region(&arena, ids[1], 0, ids[0], 0, 128).unwrap();
        let after: Vec<_> = ids.iter().map(|&id| arena.get(id).unwrap().current_state()).collect();
        assert_eq!(before, after);

        // 转换 + 复制 + 恢复
        assert_eq!(cmd.recorded_commands().len(), 4);
        assert!(cmd.copy_buffer_region(&arena, ids[0], 0, ids[0], 0, 16).is_err());
        assert!(cmd.copy_buffer_region(&arena, ids[1], 200, ids[0], 0, 128).is_err());
    }

    #[test]
    fn test_reset_rejects_mismatched_allocator() {
        let mut cmd = buffer(CommandListType::Graphics);
        let compute = CommandAllocator::new(CommandListType::Compute, None);
        let err = cmd.reset(&compute).unwrap_err();
        assert_eq!(err.class(), Some(crate::core::error::ErrorClass::Contract));

        let graphics = CommandAllocator::new(CommandListType::Graphics, Some("Other"));
        cmd.reset(&graphics).unwrap();
        assert_eq!(cmd.allocator().name(), "Other");

        cmd.begin_recording(false).unwrap();
        assert!(cmd.reset(&graphics).is_err());
    }

    #[test]
    fn test_allocator_in_flight_blocks_reset() {
        let allocator = CommandAllocator::new(CommandListType::Graphics, Some("Frame"));
        let mut cmd = CommandBuffer::new(allocator.clone(), Arc::new(NativeRenderPass), None);
        cmd.begin_recording(false).unwrap();
        cmd.draw(3, 1, 0, 0);
        cmd.end_recording().unwrap();
        assert_eq!(allocator.retained_commands(), 1);

        let stream = cmd.sealed_stream().unwrap().clone();
        stream.mark_submitted();
        let err = cmd.begin_recording(false).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::AllocatorInFlight(_))));
        assert!(!cmd.is_open());

        // 帧中途继续记录不需要重置
        cmd.begin_recording(true).unwrap();
        cmd.end_recording().unwrap();

        drop(stream.completion_guard());
        cmd.begin_recording(false).unwrap();
        assert_eq!(allocator.retained_commands(), 0);
    }

    #[test]
    fn test_one_recording_per_allocator() {
        let allocator = CommandAllocator::new(CommandListType::Graphics, None);
        let mut first = CommandBuffer::new(allocator.clone(), Arc::new(NativeRenderPass), Some("First"));
        let mut second = CommandBuffer::new(allocator.clone(), Arc::new(NativeRenderPass), Some("Second"));
        first.begin_recording(false).unwrap();
        assert!(second.begin_recording(true).is_err());
        first.end_recording().unwrap();
        second.begin_recording(true).unwrap();
    }

    #[test]
    fn test_list_type_filters_commands() {
        let mut cmd = buffer(CommandListType::Copy);
        cmd.begin_recording(false).unwrap();
        cmd.draw(3, 1, 0, 0);
        cmd.dispatch(1, 1, 1);
        assert!(cmd.recorded_commands().is_empty());
        cmd.begin_event("Upload");
        cmd.end_event();
        assert_eq!(cmd.recorded_commands().len(), 2);
    }

    #[test]
    fn test_end_render_pass_outside_pass_is_noop() {
        let (arena, _) = arena_with_buffers(0);
        let mut cmd = buffer(CommandListType::Graphics);
        cmd.end_render_pass(&arena).unwrap();
        cmd.begin_recording(false).unwrap();
        cmd.end_render_pass(&arena).unwrap();
        assert!(cmd.recorded_commands().is_empty());
    }
}
