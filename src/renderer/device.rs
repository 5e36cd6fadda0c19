//! 逻辑设备
//!
//! 拥有与 GPU 的逻辑连接，是其他所有对象的工厂。
//!
//! # 职责
//!
//! - 拥有长生命周期的资源池（稳定的 [`ResourceId`]）
//! - 按类别提供默认描述符堆，生命周期与设备绑定
//! - 在创建时根据后端能力选择一次渲染通道策略

use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use tracing::debug;

use crate::core::config::{Config, HeapConfig};
use crate::core::error::{contract, GraphicsError, Result};
use crate::gfx::backend::{BackendCapabilities, GpuBackend};
use crate::{engine_info, engine_warn};
use super::command::{CommandAllocator, CommandBuffer, CommandListType};
use super::descriptor::{
    DefaultHeaps, DescriptorHeapCategory, DescriptorHeapDescriptor, DescriptorSlotHeap,
    SharedDescriptorHeap,
};
use super::frame::FrameResourcePool;
use super::pipeline::{PipelineState, PipelineStateDescriptor};
use super::queue::CommandQueue;
use super::render_pass::{FrameBuffer, ManualRenderPass, NativeRenderPass, RenderPassStrategy};
use super::resource::{
    BufferDescriptor, BufferUsageType, GpuResource, MemoryType, ResourceArena, ResourceId,
    ResourceKind, TextureDescriptor, range_exceeds,
};
use super::sync::Fence;
use super::view::{resolve_view, NativeViewDescriptor, ResourceView, SamplerDescriptor, ViewDescriptor};

/// 设备描述信息
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    /// 调试名称
    pub name: Option<String>,
    /// 平台窗口句柄（离屏设备为 None）
    pub window: Option<RawWindowHandle>,
    /// 是否启用光线追踪
    pub enable_ray_tracing: bool,
    /// 默认描述符堆容量
    pub heaps: HeapConfig,
}

impl DeviceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置创建
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: Some(config.device.name.clone()),
            window: None,
            enable_ray_tracing: config.device.enable_ray_tracing,
            heaps: config.heaps,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_window(mut self, window: RawWindowHandle) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_ray_tracing(mut self, enable: bool) -> Self {
        self.enable_ray_tracing = enable;
        self
    }

    pub fn with_heaps(mut self, heaps: HeapConfig) -> Self {
        self.heaps = heaps;
        self
    }
}

/// 逻辑设备
pub struct Device {
    name: String,
    capabilities: BackendCapabilities,
    ray_tracing: bool,
    strategy: Arc<dyn RenderPassStrategy>,
    resources: ResourceArena,
    default_heaps: DefaultHeaps,
    backend: Arc<dyn GpuBackend>,
}

impl Device {
    /// 创建设备
    ///
    /// # 参数
    ///
    /// * `desc` - 设备描述信息
    /// * `backend` - 原生后端
    ///
    /// # 返回值
    ///
    /// 请求的特性不被后端支持时构造失败，不返回半成品设备。
    pub fn new(desc: DeviceDescriptor, backend: Arc<dyn GpuBackend>) -> Result<Self> {
        let capabilities = backend.capabilities();
        if desc.enable_ray_tracing && !capabilities.ray_tracing {
            return Err(GraphicsError::UnsupportedFeature(format!(
                "Backend '{}' does not support ray tracing",
                backend.name()
            ))
            .into());
        }

        backend.attach_window(desc.window)?;

        let strategy: Arc<dyn RenderPassStrategy> = if capabilities.native_render_pass {
            Arc::new(NativeRenderPass)
        } else {
            Arc::new(ManualRenderPass)
        };
        let default_heaps = DefaultHeaps::new(&backend, &desc.heaps)?;
        let name = desc.name.unwrap_or_else(|| "DistHal Device".to_string());

        engine_info!(
            device = %name,
            backend = backend.name(),
            render_pass = strategy.name(),
            ray_tracing = desc.enable_ray_tracing,
            validation = capabilities.validation,
            "Device created"
        );

        Ok(Self {
            name,
            capabilities,
            ray_tracing: desc.enable_ray_tracing,
            strategy,
            resources: ResourceArena::new(),
            default_heaps,
            backend,
        })
    }

    /// 从配置创建设备
    pub fn from_config(config: &Config, backend: Arc<dyn GpuBackend>) -> Result<Self> {
        config.validate()?;
        Self::new(DeviceDescriptor::from_config(config), backend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    pub fn ray_tracing_enabled(&self) -> bool {
        self.ray_tracing
    }

    /// 选定的渲染通道策略名称
    pub fn render_pass_strategy(&self) -> &'static str {
        self.strategy.name()
    }

    // ==================== 资源 ====================

    /// 资源池（记录命令时以共享借用传入）
    pub fn resources(&self) -> &ResourceArena {
        &self.resources
    }

    pub fn resource(&self, id: ResourceId) -> Result<&GpuResource> {
        self.resources.get(id)
    }

    fn create_resource(&mut self, kind: ResourceKind) -> Result<ResourceId> {
        kind.validate()?;
        let id = self.resources.insert(kind);
        let created = match self.resources.get(id) {
            Ok(resource) => self.backend.create_resource(id, resource.kind()),
            Err(e) => Err(e),
        };
        if let Err(e) = created {
            self.resources.remove(id);
            return Err(e);
        }

        let resource = self.resources.get(id)?;
        debug!(
            resource = resource.name(),
            id = %id,
            bytes = resource.kind().size_in_bytes(),
            state = %resource.current_state(),
            "Resource created"
        );
        Ok(id)
    }

    /// 创建缓冲区
    pub fn create_buffer(&mut self, desc: BufferDescriptor) -> Result<ResourceId> {
        if desc.usage == BufferUsageType::AccelerationStructure && !self.ray_tracing {
            return Err(GraphicsError::UnsupportedFeature(
                "Acceleration structure buffers require a ray tracing device".to_string(),
            )
            .into());
        }
        self.create_resource(ResourceKind::Buffer(desc))
    }

    /// 创建纹理
    pub fn create_texture(&mut self, desc: TextureDescriptor) -> Result<ResourceId> {
        self.create_resource(ResourceKind::Texture(desc))
    }

    /// 销毁资源
    ///
    /// 引用该资源的视图与仍在 GPU 上执行的命令由调用方负责。
    pub fn destroy_resource(&mut self, id: ResourceId) -> Result<()> {
        let resource = self
            .resources
            .remove(id)
            .ok_or(GraphicsError::InvalidResource(id))?;
        self.backend.destroy_resource(id);
        debug!(resource = resource.name(), id = %id, "Resource destroyed");
        Ok(())
    }

    /// 写入 CPU 可见缓冲区（上传堆）
    pub fn write_buffer(&self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self
            .resources
            .get(id)?
            .as_buffer()
            .ok_or_else(|| contract("write_buffer requires a buffer"))?;
        if buffer.memory_type != MemoryType::HostVisible {
            return Err(contract(format!(
                "Buffer '{}' is not host visible",
                buffer.name.as_deref().unwrap_or("<unnamed>")
            )));
        }
        if range_exceeds(offset, data.len() as u64, buffer.aligned_size()) {
            return Err(contract("write_buffer range exceeds the buffer"));
        }
        self.backend.write_resource(id, offset, data)
    }

    /// 写入一个 Pod 值
    pub fn write_value<T: bytemuck::Pod>(&self, id: ResourceId, offset: u64, value: &T) -> Result<()> {
        self.write_buffer(id, offset, bytemuck::bytes_of(value))
    }

    /// 读取 CPU 可见缓冲区（上传堆或回读堆）
    pub fn read_buffer(&self, id: ResourceId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let buffer = self
            .resources
            .get(id)?
            .as_buffer()
            .ok_or_else(|| contract("read_buffer requires a buffer"))?;
        if !buffer.memory_type.is_host_accessible() {
            return Err(contract(format!(
                "Buffer '{}' is not host accessible",
                buffer.name.as_deref().unwrap_or("<unnamed>")
            )));
        }
        if range_exceeds(offset, size, buffer.aligned_size()) {
            return Err(contract("read_buffer range exceeds the buffer"));
        }
        self.backend.read_resource(id, offset, size)
    }

    // ==================== 同步与命令 ====================

    pub fn create_fence(&self, initial_value: u64, name: Option<&str>) -> Fence {
        Fence::new(initial_value, name)
    }

    pub fn create_command_queue(&self, list_type: CommandListType, name: Option<&str>) -> Result<CommandQueue> {
        let label = name.unwrap_or(list_type.name());
        let backend = self.backend.create_queue(list_type, label)?;
        debug!(queue = label, list_type = list_type.name(), "Command queue created");
        Ok(CommandQueue::new(list_type, name, backend))
    }

    pub fn create_command_allocator(&self, list_type: CommandListType, name: Option<&str>) -> CommandAllocator {
        CommandAllocator::new(list_type, name)
    }

    /// 创建绑定到 `allocator` 的命令缓冲区（处于关闭状态）
    pub fn create_command_buffer(&self, allocator: &CommandAllocator, name: Option<&str>) -> CommandBuffer {
        CommandBuffer::new(allocator.clone(), Arc::clone(&self.strategy), name)
    }

    /// 为每个在途帧创建分配器与命令缓冲区
    pub fn create_frame_resources(&self, list_type: CommandListType, frames: usize) -> Result<FrameResourcePool> {
        let pairs = (0..frames)
            .map(|i| {
                let allocator = self.create_command_allocator(list_type, Some(&format!("Frame Allocator {}", i)));
                let buffer = self.create_command_buffer(&allocator, Some(&format!("Frame Commands {}", i)));
                (allocator, buffer)
            })
            .collect();
        FrameResourcePool::new(pairs)
    }

    // ==================== 描述符与视图 ====================

    /// 创建额外的描述符堆
    pub fn create_descriptor_heap(&self, desc: DescriptorHeapDescriptor) -> Result<SharedDescriptorHeap> {
        Ok(SharedDescriptorHeap::new(DescriptorSlotHeap::new(
            Arc::clone(&self.backend),
            desc,
        )?))
    }

    /// 获取某类别的默认堆
    pub fn default_heap(&self, category: DescriptorHeapCategory) -> &SharedDescriptorHeap {
        self.default_heaps.get(category)
    }

    pub fn default_heaps(&self) -> &DefaultHeaps {
        &self.default_heaps
    }

    /// 创建资源视图
    ///
    /// 未提供堆时使用该视图类别的默认堆，选择结果缓存在视图上。
    pub fn create_view(
        &self,
        resource: ResourceId,
        desc: &ViewDescriptor,
        heap: Option<&SharedDescriptorHeap>,
    ) -> Result<ResourceView> {
        let category = desc.view_type.category();
        let native = resolve_view(self.resources.get(resource)?, desc, self.capabilities)?;
        let heap = heap.unwrap_or_else(|| self.default_heap(category)).clone();
        ResourceView::new(heap, category, Some(desc.view_type), native, desc.name.clone())
    }

    /// 创建采样器
    pub fn create_sampler(
        &self,
        desc: &SamplerDescriptor,
        heap: Option<&SharedDescriptorHeap>,
    ) -> Result<ResourceView> {
        desc.validate()?;
        let category = DescriptorHeapCategory::Sampler;
        let heap = heap.unwrap_or_else(|| self.default_heap(category)).clone();
        ResourceView::new(
            heap,
            category,
            None,
            NativeViewDescriptor::Sampler(desc.clone()),
            desc.name.clone(),
        )
    }

    /// 为颜色目标与可选深度目标创建 RTV/DSV 并组装帧缓冲
    pub fn create_frame_buffer(
        &self,
        colors: &[ResourceId],
        depth: Option<ResourceId>,
        name: Option<&str>,
    ) -> Result<FrameBuffer> {
        let color_views = colors
            .iter()
            .map(|&id| self.create_view(id, &ViewDescriptor::render_target(), None))
            .collect::<Result<Vec<_>>>()?;
        let depth_view = depth
            .map(|id| self.create_view(id, &ViewDescriptor::depth_stencil(), None))
            .transpose()?;
        FrameBuffer::new(&self.resources, color_views, depth_view, name.map(str::to_string))
    }

    /// 创建管线状态对象
    pub fn create_pipeline_state(&self, desc: PipelineStateDescriptor) -> Result<PipelineState> {
        desc.validate()?;
        let pipeline = PipelineState::new(desc);
        debug!(pipeline = pipeline.name(), kind = ?pipeline.kind(), "Pipeline state created");
        Ok(pipeline)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let live = self.resources.len();
        if live > 0 {
            engine_warn!(device = %self.name, live, "Device dropped with live resources");
            for resource in self.resources.iter() {
                self.backend.destroy_resource(resource.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorClass;
    use crate::gfx::software::{SoftwareBackend, SoftwareBackendConfig};
    use crate::renderer::resource::TextureFormat;
    use crate::renderer::state::ResourceState;
    use crate::renderer::view::ViewType;

    fn device(config: SoftwareBackendConfig, desc: DeviceDescriptor) -> Result<Device> {
        Device::new(desc, Arc::new(SoftwareBackend::new(config)))
    }

    #[test]
    fn test_ray_tracing_requires_backend_support() {
        let err = device(SoftwareBackendConfig::default(), DeviceDescriptor::new().with_ray_tracing(true))
            .err()
            .unwrap();
        assert_eq!(err.class(), Some(ErrorClass::Construction));

        let config = SoftwareBackendConfig {
            ray_tracing: true,
            ..SoftwareBackendConfig::default()
        };
        let device = device(config, DeviceDescriptor::new().with_ray_tracing(true)).unwrap();
        assert!(device.ray_tracing_enabled());
    }

    #[test]
    fn test_strategy_follows_capability() {
        let native = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        assert_eq!(native.render_pass_strategy(), "native");

        let manual_config = SoftwareBackendConfig {
            native_render_pass: false,
            ..SoftwareBackendConfig::default()
        };
        let manual = device(manual_config, DeviceDescriptor::new()).unwrap();
        assert_eq!(manual.render_pass_strategy(), "manual");
        let allocator = manual.create_command_allocator(CommandListType::Graphics, None);
        assert_eq!(manual.create_command_buffer(&allocator, None).strategy_name(), "manual");
    }

    #[test]
    fn test_resource_lifecycle() {
        let mut device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        let upload = device
            .create_buffer(BufferDescriptor::new(64, BufferUsageType::Vertex, MemoryType::HostVisible))
            .unwrap();
        assert_eq!(device.resource(upload).unwrap().current_state(), ResourceState::GenericRead);

        device.write_buffer(upload, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.read_buffer(upload, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(device.write_buffer(upload, 62, &[0; 4]).is_err());

        device.destroy_resource(upload).unwrap();
        assert!(device.resource(upload).is_err());
        assert!(device.destroy_resource(upload).is_err());

        let bad = device.create_buffer(BufferDescriptor::new(0, BufferUsageType::Vertex, MemoryType::DeviceLocal));
        assert_eq!(bad.unwrap_err().class(), Some(ErrorClass::Construction));
        assert!(device.resources().is_empty());
    }

    #[test]
    fn test_device_local_buffers_are_not_mappable() {
        let mut device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        let id = device
            .create_buffer(BufferDescriptor::new(64, BufferUsageType::Storage, MemoryType::DeviceLocal))
            .unwrap();
        assert!(device.write_buffer(id, 0, &[0; 4]).is_err());
        assert!(device.read_buffer(id, 0, 4).is_err());
    }

    #[test]
    fn test_view_uses_default_heap_and_frees_slot() {
        let mut device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        let texture = device
            .create_texture(TextureDescriptor::texture_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();

        let view = device.create_view(texture, &ViewDescriptor::texture(), None).unwrap();
        let heap = device.default_heap(DescriptorHeapCategory::ShaderResource);
        assert!(view.heap().same_heap(heap));
        assert_eq!(view.view_type(), Some(ViewType::Texture));
        assert_eq!(heap.lock().allocated_count(), 1);

        drop(view);
        assert_eq!(heap.lock().allocated_count(), 0);

        device.destroy_resource(texture).unwrap();
        let missing = device.create_view(texture, &ViewDescriptor::texture(), None);
        assert_eq!(missing.unwrap_err().class(), Some(ErrorClass::Contract));
    }

    #[test]
    fn test_view_rejects_wrong_heap() {
        let mut device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        let texture = device
            .create_texture(TextureDescriptor::back_buffer(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let srv_heap = device.default_heap(DescriptorHeapCategory::ShaderResource).clone();
        assert!(device
            .create_view(texture, &ViewDescriptor::render_target(), Some(&srv_heap))
            .is_err());
        assert_eq!(srv_heap.lock().allocated_count(), 0);
    }

    #[test]
    fn test_small_heap_exhaustion() {
        let heaps = HeapConfig {
            rtv: 2,
            ..HeapConfig::default()
        };
        let mut device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new().with_heaps(heaps)).unwrap();
        let texture = device
            .create_texture(TextureDescriptor::back_buffer(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();

        let _a = device.create_view(texture, &ViewDescriptor::render_target(), None).unwrap();
        let _b = device.create_view(texture, &ViewDescriptor::render_target(), None).unwrap();
        let err = device.create_view(texture, &ViewDescriptor::render_target(), None).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::Exhaustion));
    }

    #[test]
    fn test_sampler_creation() {
        let device = device(SoftwareBackendConfig::default(), DeviceDescriptor::new()).unwrap();
        let sampler = device.create_sampler(&SamplerDescriptor::anisotropic(8), None).unwrap();
        assert_eq!(sampler.category(), DescriptorHeapCategory::Sampler);
        assert!(sampler.gpu_handle().is_some());
        assert!(sampler.resource().is_none());
        assert!(device.create_sampler(&SamplerDescriptor::anisotropic(0), None).is_err());
    }
}
