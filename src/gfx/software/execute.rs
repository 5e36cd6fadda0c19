//! 软件命令执行器
//!
//! 在队列线程上逐条解释命令流，直接修改 [`GpuMemory`] 中的字节与状态。
//! 绑定状态（管线、渲染目标、顶点缓冲等）按命令流重置。

use std::collections::BTreeMap;

use tracing::trace;

use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};
use crate::renderer::pipeline::{IndexBufferView, PipelineKind, VertexBufferView};
use crate::renderer::render_pass::{LoadOp, StoreOp};
use crate::renderer::resource::{ResourceId, ResourceKind, TextureDescriptor, TextureDimension};
use crate::renderer::state::{ResourceBarrier, ResourceState};
use crate::renderer::stream::{ClearFlags, Command, CommandStream, RenderPassColorTarget, RenderPassDepthTarget};
use crate::renderer::view::{NativeViewDescriptor, ViewDimension};
use crate::gfx::backend::NativeHeapId;
use super::memory::GpuMemory;
use super::validation::{ValidationLog, ValidationMessage, ValidationSeverity};

/// 执行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub streams: u64,
    pub commands: u64,
    pub barriers: u64,
    pub clears: u64,
    pub copies: u64,
    pub draws: u64,
    pub dispatches: u64,
}

/// 单个命令流的绑定状态
#[derive(Debug, Default)]
struct BindState {
    pipeline: Option<PipelineKind>,
    render_targets: Vec<CpuDescriptorHandle>,
    depth_target: Option<CpuDescriptorHandle>,
    pass_colors: Vec<RenderPassColorTarget>,
    pass_depth: Option<RenderPassDepthTarget>,
    in_pass: bool,
    vertex_buffers: BTreeMap<u32, VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
    descriptor_heaps: Vec<NativeHeapId>,
    tables: BTreeMap<(bool, u32), GpuDescriptorHandle>,
    root_constants: BTreeMap<u32, ResourceId>,
    event_depth: usize,
}

pub(crate) struct Executor<'a> {
    memory: &'a mut GpuMemory,
    stats: &'a mut ExecutionStats,
    log: &'a ValidationLog,
    validate: bool,
    stream: String,
    command: &'static str,
    bindings: BindState,
}

/// 纹理视图覆盖的字节范围
fn view_ranges(texture: &TextureDescriptor, dimension: &ViewDimension) -> Vec<(usize, usize)> {
    let ranges = match *dimension {
        ViewDimension::Buffer { .. } => Vec::new(),
        ViewDimension::Texture3D { most_detailed_mip, first_w_slice, w_size, .. } => {
            let (offset, size) = texture.subresource_range(most_detailed_mip, 0);
            let (_, _, depth) = texture.mip_extent(most_detailed_mip);
            let slice = size / depth as u64;
            vec![(offset + first_w_slice as u64 * slice, w_size as u64 * slice)]
        }
        _ => {
            let mip = dimension.most_detailed_mip();
            let (first, count) = dimension.array_slices();
            (first..first + count)
                .map(|layer| texture.subresource_range(mip, layer))
                .collect()
        }
    };
    ranges
        .into_iter()
        .map(|(offset, size)| (offset as usize, size as usize))
        .collect()
}

fn fill(bytes: &mut [u8], texel: &[u8]) {
    for chunk in bytes.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

impl<'a> Executor<'a> {
    pub fn new(
        memory: &'a mut GpuMemory,
        stats: &'a mut ExecutionStats,
        log: &'a ValidationLog,
        validate: bool,
        stream: &CommandStream,
    ) -> Self {
        Self {
            memory,
            stats,
            log,
            validate,
            stream: stream.name().to_string(),
            command: "",
            bindings: BindState::default(),
        }
    }

    /// 执行整条命令流
    pub fn run(mut self, stream: &CommandStream) {
        trace!(stream = stream.name(), commands = stream.len(), "Executing command stream");
        for command in stream.commands() {
            self.command = command.name();
            self.execute(command);
            self.stats.commands += 1;
        }
        if self.bindings.in_pass {
            self.error("Command stream ended inside a render pass".to_string());
        }
        if self.bindings.event_depth > 0 {
            self.warning(format!("{} debug events left open", self.bindings.event_depth));
        }
        self.stats.streams += 1;
    }

    fn report(&self, severity: ValidationSeverity, message: String) {
        self.log.push(ValidationMessage {
            severity,
            stream: self.stream.clone(),
            command: self.command,
            message,
        });
    }

    /// 执行失败，命令被跳过（始终报告）
    fn error(&self, message: String) {
        self.report(ValidationSeverity::Error, message);
    }

    fn warning(&self, message: String) {
        if self.validate {
            self.report(ValidationSeverity::Warning, message);
        }
    }

    /// 状态检查（仅在启用验证时报告）
    fn expect_state(&self, id: ResourceId, required: ResourceState) {
        if !self.validate {
            return;
        }
        if let Some(allocation) = self.memory.allocations.get(&id) {
            if !allocation.state.satisfies(required) {
                self.report(
                    ValidationSeverity::Error,
                    format!(
                        "Resource '{}' is in state {} but {} is required",
                        allocation.name(),
                        allocation.state,
                        required
                    ),
                );
            }
        }
    }

    fn execute(&mut self, command: &Command) {
        match command {
            Command::ResourceBarrier(barriers) => self.barriers(barriers),
            Command::BeginRenderPass { colors, depth } => self.begin_render_pass(colors, depth.as_ref()),
            Command::EndRenderPass => self.end_render_pass(),
            Command::SetRenderTargets { colors, depth } => {
                for &handle in colors.iter().chain(depth.iter()) {
                    if self.memory.cpu_descriptor(handle).is_none() {
                        self.error(format!("Render target handle {:#x} refers to an empty slot", handle.ptr));
                    }
                }
                self.bindings.render_targets = colors.clone();
                self.bindings.depth_target = *depth;
            }
            Command::ClearRenderTarget { view, color } => self.clear_render_target(*view, *color),
            Command::ClearDepthStencil { view, flags, depth, stencil } => {
                self.clear_depth_stencil(*view, *flags, *depth, *stencil)
            }
            Command::SetPipelineState { kind, .. } => self.bindings.pipeline = Some(*kind),
            Command::SetViewport(_) | Command::SetScissorRect(_) | Command::SetPrimitiveTopology(_) => {}
            Command::SetVertexBuffer { slot, view } => {
                self.bindings.vertex_buffers.insert(*slot, *view);
            }
            Command::SetIndexBuffer(view) => self.bindings.index_buffer = Some(*view),
            Command::SetDescriptorHeaps(heaps) => self.set_descriptor_heaps(heaps),
            Command::SetRootDescriptorTable { compute, root_index, base } => {
                self.bindings.tables.insert((*compute, *root_index), *base);
            }
            Command::SetRootConstantBuffer { root_index, resource, .. } => {
                self.bindings.root_constants.insert(*root_index, *resource);
            }
            Command::Draw { .. } => self.draw(false),
            Command::DrawIndexed { .. } => self.draw(true),
            Command::Dispatch { x, y, z } => self.dispatch(*x, *y, *z),
            Command::CopyBufferRegion { dst, dst_offset, src, src_offset, size } => {
                self.copy_bytes(*dst, *dst_offset as usize, *src, *src_offset as usize, Some(*size as usize))
            }
            Command::CopyResource { dst, src } => self.copy_bytes(*dst, 0, *src, 0, None),
            Command::CopyTextureRegion { dst, dst_subresource, src, src_subresource } => {
                self.copy_texture_region(*dst, *dst_subresource, *src, *src_subresource)
            }
            Command::BeginEvent(name) => {
                trace!(stream = %self.stream, event = %name, "Begin event");
                self.bindings.event_depth += 1;
            }
            Command::EndEvent => {
                if self.bindings.event_depth == 0 {
                    self.warning("EndEvent without a matching BeginEvent".to_string());
                } else {
                    self.bindings.event_depth -= 1;
                }
            }
        }
    }

    // ==================== 屏障 ====================

    fn barriers(&mut self, barriers: &[ResourceBarrier]) {
        for barrier in barriers {
            self.stats.barriers += 1;
            match *barrier {
                ResourceBarrier::Transition { resource, before, after } => {
                    let Some(allocation) = self.memory.allocations.get(&resource) else {
                        self.error(format!("Barrier on destroyed resource {}", resource));
                        continue;
                    };
                    let actual = allocation.state;
                    let name = allocation.name().to_string();
                    if self.validate && actual != before {
                        self.report(
                            ValidationSeverity::Error,
                            format!(
                                "Barrier for '{}' expects {} but the resource is in {} on the GPU timeline",
                                name, before, actual
                            ),
                        );
                    }
                    if before == after {
                        self.warning(format!("Redundant barrier {} -> {} for '{}'", before, after, name));
                    }
                    if let Some(allocation) = self.memory.allocations.get_mut(&resource) {
                        allocation.state = after;
                    }
                }
                ResourceBarrier::UnorderedAccess { resource } => {
                    self.expect_state(resource, ResourceState::UnorderedAccess);
                }
            }
        }
    }

    // ==================== 渲染目标 ====================

    /// 解析 RTV/DSV 句柄得到资源与覆盖的字节范围
    fn target_ranges(
        &self,
        handle: CpuDescriptorHandle,
        depth: bool,
    ) -> Option<(ResourceId, TextureDescriptor, Vec<(usize, usize)>)> {
        let (resource, dimension) = match self.memory.cpu_descriptor(handle) {
            Some(NativeViewDescriptor::RenderTarget { resource, dimension, .. }) if !depth => (*resource, *dimension),
            Some(NativeViewDescriptor::DepthStencil { resource, dimension, .. }) if depth => (*resource, *dimension),
            Some(other) => {
                self.error(format!("Descriptor {:?} cannot be used as a {} target", other, if depth { "depth" } else { "color" }));
                return None;
            }
            None => {
                self.error(format!("Target handle {:#x} refers to an empty slot", handle.ptr));
                return None;
            }
        };
        let texture = match self.memory.allocations.get(&resource).map(|a| &a.kind) {
            Some(ResourceKind::Texture(texture)) => texture.clone(),
            _ => {
                self.error(format!("Target view refers to missing texture {}", resource));
                return None;
            }
        };
        let ranges = view_ranges(&texture, &dimension);
        Some((resource, texture, ranges))
    }

    fn clear_render_target(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        let Some((resource, texture, ranges)) = self.target_ranges(view, false) else {
            return;
        };
        self.expect_state(resource, ResourceState::RenderTarget);
        let Some(texel) = texture.format.encode_color(color) else {
            self.warning(format!("Clear color cannot be encoded as {:?}", texture.format));
            return;
        };
        if let Some(allocation) = self.memory.allocations.get_mut(&resource) {
            for (offset, size) in ranges {
                fill(&mut allocation.bytes[offset..offset + size], &texel);
            }
        }
        self.stats.clears += 1;
    }

    fn clear_depth_stencil(&mut self, view: CpuDescriptorHandle, flags: ClearFlags, depth: f32, stencil: u8) {
        let Some((resource, texture, ranges)) = self.target_ranges(view, true) else {
            return;
        };
        self.expect_state(resource, ResourceState::DepthWrite);
        if flags.is_empty() {
            return;
        }
        let Some(texel) = texture.format.encode_depth_stencil(depth, stencil) else {
            return;
        };
        let has_stencil = texture.format.has_stencil();
        if let Some(allocation) = self.memory.allocations.get_mut(&resource) {
            for (offset, size) in ranges {
                for chunk in allocation.bytes[offset..offset + size].chunks_exact_mut(texel.len()) {
                    if !has_stencil {
                        if flags.depth {
                            chunk.copy_from_slice(&texel);
                        }
                        continue;
                    }
                    // 低 24 位为深度，最高字节为模板
                    if flags.depth {
                        chunk[..3].copy_from_slice(&texel[..3]);
                    }
                    if flags.stencil {
                        chunk[3] = texel[3];
                    }
                }
            }
        }
        self.stats.clears += 1;
    }

    fn begin_render_pass(&mut self, colors: &[RenderPassColorTarget], depth: Option<&RenderPassDepthTarget>) {
        if self.bindings.in_pass {
            self.error("Render pass begun while another pass is active".to_string());
        }
        for target in colors {
            match target.load_op {
                LoadOp::Clear => self.clear_render_target(target.view, target.clear_color),
                LoadOp::Load | LoadOp::DontCare => {
                    if let Some((resource, _, _)) = self.target_ranges(target.view, false) {
                        self.expect_state(resource, ResourceState::RenderTarget);
                    }
                }
            }
        }
        if let Some(target) = depth {
            let flags = ClearFlags {
                depth: target.depth_load_op == LoadOp::Clear,
                stencil: target.stencil_load_op == LoadOp::Clear,
            };
            self.clear_depth_stencil(target.view, flags, target.clear_depth, target.clear_stencil);
        }

        self.bindings.in_pass = true;
        self.bindings.pass_colors = colors.to_vec();
        self.bindings.pass_depth = depth.copied();
        self.bindings.render_targets = colors.iter().map(|c| c.view).collect();
        self.bindings.depth_target = depth.map(|d| d.view);
    }

    fn end_render_pass(&mut self) {
        if !self.bindings.in_pass {
            self.error("EndRenderPass without an active pass".to_string());
            return;
        }
        let discarded = self
            .bindings
            .pass_colors
            .iter()
            .filter(|c| c.store_op == StoreOp::DontCare)
            .count()
            + self
                .bindings
                .pass_depth
                .iter()
                .filter(|d| d.depth_store_op == StoreOp::DontCare)
                .count();
        trace!(stream = %self.stream, discarded, "Render pass ended");

        self.bindings.in_pass = false;
        self.bindings.pass_colors.clear();
        self.bindings.pass_depth = None;
        self.bindings.render_targets.clear();
        self.bindings.depth_target = None;
    }

    // ==================== 描述符 ====================

    fn set_descriptor_heaps(&mut self, heaps: &[NativeHeapId]) {
        for id in heaps {
            match self.memory.heaps.get(id) {
                Some(heap) if heap.gpu_start.is_some() => {}
                Some(heap) => self.error(format!("{} heap {:?} is not shader visible", heap.heap_type.name(), id)),
                None => self.error(format!("Descriptor heap {:?} does not exist", id)),
            }
        }
        self.bindings.descriptor_heaps = heaps.to_vec();
    }

    /// 绘制/派发时检查已绑定的描述符表
    fn check_tables(&self, compute: bool) {
        for (&(table_compute, root_index), &base) in &self.bindings.tables {
            if table_compute != compute {
                continue;
            }
            let Some((heap_id, heap, slot)) = self.memory.resolve_gpu(base) else {
                self.error(format!("Root table {} points outside every descriptor heap", root_index));
                continue;
            };
            if !self.bindings.descriptor_heaps.contains(&heap_id) {
                self.error(format!("Root table {} uses a heap not bound by SetDescriptorHeaps", root_index));
            }
            if heap.heap_type == DescriptorHeapType::CbvSrvUav || heap.heap_type == DescriptorHeapType::Sampler {
                if heap.slots[slot as usize].is_none() {
                    self.error(format!("Root table {} starts at empty descriptor slot {}", root_index, slot));
                }
            }
        }
    }

    // ==================== 绘制与派发 ====================

    fn draw(&mut self, indexed: bool) {
        if !self.validate {
            self.stats.draws += 1;
            return;
        }
        match self.bindings.pipeline {
            Some(PipelineKind::Graphics) => {}
            Some(PipelineKind::Compute) => self.error("Draw with a compute pipeline bound".to_string()),
            None => self.error("Draw without a pipeline state".to_string()),
        }
        if self.bindings.render_targets.is_empty() && self.bindings.depth_target.is_none() {
            self.error("Draw without any render target bound".to_string());
        }
        for view in self.bindings.vertex_buffers.values() {
            self.expect_state(view.buffer, ResourceState::VertexOrConstantBuffer);
        }
        if indexed {
            match self.bindings.index_buffer {
                Some(view) => self.expect_state(view.buffer, ResourceState::IndexBuffer),
                None => self.error("DrawIndexed without an index buffer".to_string()),
            }
        }
        for &resource in self.bindings.root_constants.values() {
            self.expect_state(resource, ResourceState::VertexOrConstantBuffer);
        }
        self.check_tables(false);
        self.stats.draws += 1;
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if self.validate {
            if self.bindings.pipeline != Some(PipelineKind::Compute) {
                self.error("Dispatch without a compute pipeline".to_string());
            }
            if x == 0 || y == 0 || z == 0 {
                self.warning(format!("Empty dispatch {}x{}x{}", x, y, z));
            }
            self.check_tables(true);
        }
        self.stats.dispatches += 1;
    }

    // ==================== 复制 ====================

    /// 复制字节范围，`size` 为 None 时复制整个资源
    fn copy_bytes(&mut self, dst: ResourceId, dst_offset: usize, src: ResourceId, src_offset: usize, size: Option<usize>) {
        self.expect_state(src, ResourceState::CopySource);
        self.expect_state(dst, ResourceState::CopyDestination);

        let Some(source) = self.memory.allocations.get(&src) else {
            self.error(format!("Copy source {} does not exist", src));
            return;
        };
        let size = size.unwrap_or(source.bytes.len());
        let data = src_offset
            .checked_add(size)
            .and_then(|end| source.bytes.get(src_offset..end))
            .map(<[u8]>::to_vec);
        let Some(data) = data else {
            self.error(format!("Copy source range of {} bytes at {} out of bounds", size, src_offset));
            return;
        };
        let written = match self.memory.allocations.get_mut(&dst) {
            Some(destination) => match dst_offset
                .checked_add(size)
                .and_then(|end| destination.bytes.get_mut(dst_offset..end))
            {
                Some(target) => {
                    target.copy_from_slice(&data);
                    Ok(())
                }
                None => Err(format!(
                    "Copy destination range of {} bytes at {} out of bounds",
                    size, dst_offset
                )),
            },
            None => Err(format!("Copy destination {} does not exist", dst)),
        };
        match written {
            Ok(()) => self.stats.copies += 1,
            Err(message) => self.error(message),
        }
    }

    fn copy_texture_region(&mut self, dst: ResourceId, dst_subresource: u32, src: ResourceId, src_subresource: u32) {
        let range = |id: ResourceId, subresource: u32| -> Option<(usize, usize)> {
            match self.memory.allocations.get(&id).map(|a| &a.kind) {
                Some(ResourceKind::Texture(texture)) if subresource < texture.subresource_count() => {
                    let mip = subresource % texture.mip_levels;
                    let layer = subresource / texture.mip_levels;
                    let (offset, size) = texture.subresource_range(mip, layer);
                    (texture.dimension != TextureDimension::Texture3D || layer == 0)
                        .then_some((offset as usize, size as usize))
                }
                _ => None,
            }
        };
        let (Some((src_offset, src_size)), Some((dst_offset, dst_size))) =
            (range(src, src_subresource), range(dst, dst_subresource))
        else {
            self.error(format!(
                "Invalid texture copy {}[{}] -> {}[{}]",
                src, src_subresource, dst, dst_subresource
            ));
            return;
        };
        if src_size != dst_size {
            self.error(format!("Subresource sizes differ ({} vs {} bytes)", src_size, dst_size));
            return;
        }
        self.copy_bytes(dst, dst_offset, src, src_offset, Some(src_size));
    }
}
