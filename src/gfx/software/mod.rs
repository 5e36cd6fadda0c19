//! 软件后端
//!
//! 完全在 CPU 上实现的 [`GpuBackend`]：资源内存是普通字节数组，每个命令队列
//! 一个工作线程充当 GPU 时间线。用于无 GPU 环境下的测试，以及作为验证层
//! 检查实际执行顺序下的资源状态。
//!
//! # 设计原则
//!
//! - 与原生后端相同的异步语义，CPU 只能通过 Fence 观察执行进度
//! - 能力可配置，既可以报告原生渲染通道也可以不报告
//! - 验证消息写入日志并被收集，测试可以直接断言

mod execute;
mod memory;
mod queue;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use tracing::debug;

use crate::core::config::DeviceConfig;
use crate::core::error::{contract, GraphicsError, Result};
use crate::gfx::backend::{BackendCapabilities, GpuBackend, NativeHeap, NativeHeapId, QueueBackend};
use crate::renderer::command::CommandListType;
use crate::renderer::descriptor::DescriptorHeapDescriptor;
use crate::renderer::resource::{ResourceId, ResourceKind};
use crate::renderer::state::ResourceState;
use crate::renderer::view::NativeViewDescriptor;
use memory::GpuMemory;
use queue::{QueueContext, SoftwareQueue};
use validation::ValidationLog;

pub use execute::ExecutionStats;
pub use memory::DESCRIPTOR_INCREMENT;
pub use validation::{ValidationMessage, ValidationSeverity};

/// 软件后端配置
#[derive(Debug, Clone)]
pub struct SoftwareBackendConfig {
    /// 是否报告原生渲染通道能力
    pub native_render_pass: bool,
    /// 是否报告光线追踪能力
    pub ray_tracing: bool,
    /// 是否启用验证层
    pub validation: bool,
    /// 每次提交的模拟执行耗时
    pub execution_latency: Duration,
}

impl Default for SoftwareBackendConfig {
    fn default() -> Self {
        Self {
            native_render_pass: true,
            ray_tracing: false,
            validation: true,
            execution_latency: Duration::ZERO,
        }
    }
}

impl SoftwareBackendConfig {
    /// 从设备配置创建
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            native_render_pass: config.native_render_pass,
            ray_tracing: config.enable_ray_tracing,
            validation: config.validation,
            execution_latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.execution_latency = latency;
        self
    }
}

/// 软件后端
pub struct SoftwareBackend {
    config: SoftwareBackendConfig,
    memory: Arc<Mutex<GpuMemory>>,
    stats: Arc<Mutex<ExecutionStats>>,
    log: ValidationLog,
}

impl SoftwareBackend {
    pub fn new(config: SoftwareBackendConfig) -> Self {
        debug!(
            native_render_pass = config.native_render_pass,
            ray_tracing = config.ray_tracing,
            validation = config.validation,
            "Software backend created"
        );
        Self {
            config,
            memory: Arc::new(Mutex::new(GpuMemory::default())),
            stats: Arc::new(Mutex::new(ExecutionStats::default())),
            log: ValidationLog::default(),
        }
    }

    /// 至今收集到的验证消息
    pub fn validation_messages(&self) -> Vec<ValidationMessage> {
        self.log.snapshot()
    }

    /// 验证错误数量
    pub fn validation_errors(&self) -> usize {
        self.log.error_count()
    }

    pub fn clear_validation_messages(&self) {
        self.log.clear();
    }

    /// 执行统计
    pub fn stats(&self) -> ExecutionStats {
        *self.stats.lock()
    }

    /// GPU 时间线上观察到的资源状态
    pub fn gpu_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.memory.lock().allocations.get(&id).map(|a| a.state)
    }

    /// 资源内存的完整副本（任意内存类型，用于测试与调试）
    pub fn snapshot(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.memory.lock().allocations.get(&id).map(|a| a.bytes.clone())
    }

    /// 已创建的描述符堆数量
    pub fn heap_count(&self) -> usize {
        self.memory.lock().heaps.len()
    }

    /// 槽位中写入的描述符
    pub fn descriptor(&self, heap: NativeHeapId, index: u32) -> Option<NativeViewDescriptor> {
        self.memory.lock().heaps.get(&heap)?.slots.get(index as usize)?.clone()
    }
}

/// 将 `offset..offset + size` 转换为字节下标，溢出时返回 None
fn byte_range(offset: u64, size: u64) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    Some(start..end)
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "Software"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_render_pass: self.config.native_render_pass,
            ray_tracing: self.config.ray_tracing,
            validation: self.config.validation,
        }
    }

    fn attach_window(&self, window: Option<RawWindowHandle>) -> Result<()> {
        if window.is_some() {
            debug!("Software backend renders offscreen, window handle ignored");
        }
        Ok(())
    }

    fn create_resource(&self, id: ResourceId, kind: &ResourceKind) -> Result<()> {
        let size = kind.size_in_bytes();
        if usize::try_from(size).is_err() {
            return Err(GraphicsError::ResourceCreation(format!("Resource of {} bytes does not fit in memory", size)).into());
        }
        self.memory.lock().allocate(id, kind);
        Ok(())
    }

    fn destroy_resource(&self, id: ResourceId) {
        self.memory.lock().allocations.remove(&id);
    }

    fn write_resource(&self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let mut memory = self.memory.lock();
        let allocation = memory
            .allocations
            .get_mut(&id)
            .ok_or(GraphicsError::InvalidResource(id))?;
        let target = byte_range(offset, data.len() as u64)
            .and_then(|range| allocation.bytes.get_mut(range))
            .ok_or_else(|| contract(format!("Write of {} bytes at {} is out of bounds", data.len(), offset)))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_resource(&self, id: ResourceId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let memory = self.memory.lock();
        let allocation = memory.allocations.get(&id).ok_or(GraphicsError::InvalidResource(id))?;
        byte_range(offset, size)
            .and_then(|range| allocation.bytes.get(range))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| contract(format!("Read of {} bytes at {} is out of bounds", size, offset)))
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<NativeHeap> {
        Ok(self.memory.lock().create_heap(desc))
    }

    fn destroy_descriptor_heap(&self, heap: NativeHeapId) {
        self.memory.lock().heaps.remove(&heap);
    }

    fn write_descriptor(&self, heap: NativeHeapId, index: u32, descriptor: &NativeViewDescriptor) {
        if let Some(slot) = self.memory.lock().slot_mut(heap, index) {
            *slot = Some(descriptor.clone());
        }
    }

    fn clear_descriptor(&self, heap: NativeHeapId, index: u32) {
        if let Some(slot) = self.memory.lock().slot_mut(heap, index) {
            *slot = None;
        }
    }

    fn create_queue(&self, list_type: CommandListType, name: &str) -> Result<Box<dyn QueueBackend>> {
        let context = QueueContext {
            memory: Arc::clone(&self.memory),
            stats: Arc::clone(&self.stats),
            log: self.log.clone(),
            validate: self.config.validation,
            latency: self.config.execution_latency,
        };
        Ok(Box::new(SoftwareQueue::spawn(list_type, name, context)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::{BufferDescriptor, BufferUsageType, MemoryType};
    use crate::renderer::sync::Fence;

    fn buffer(size: u64) -> ResourceKind {
        ResourceKind::Buffer(BufferDescriptor::new(size, BufferUsageType::Vertex, MemoryType::HostVisible))
    }

    #[test]
    fn test_capabilities_follow_config() {
        let backend = SoftwareBackend::new(SoftwareBackendConfig {
            native_render_pass: false,
            ..SoftwareBackendConfig::default()
        });
        let caps = backend.capabilities();
        assert!(!caps.native_render_pass);
        assert!(!caps.ray_tracing);
        assert!(caps.validation);
    }

    #[test]
    fn test_memory_write_and_read() {
        let backend = SoftwareBackend::new(SoftwareBackendConfig::default());
        let mut arena = crate::renderer::resource::ResourceArena::new();
        let id = arena.insert(buffer(16));
        backend.create_resource(id, arena.get(id).unwrap().kind()).unwrap();

        backend.write_resource(id, 4, &[9, 8, 7]).unwrap();
        assert_eq!(backend.read_resource(id, 4, 3).unwrap(), vec![9, 8, 7]);
        assert!(backend.write_resource(id, 250, &[0; 8]).is_err());
        assert_eq!(backend.gpu_state(id), Some(ResourceState::GenericRead));

        backend.destroy_resource(id);
        assert!(backend.read_resource(id, 0, 1).is_err());
        assert!(backend.snapshot(id).is_none());
    }

    #[test]
    fn test_descriptor_slots_are_written_and_cleared() {
        let backend = SoftwareBackend::new(SoftwareBackendConfig::default());
        let heap = backend.create_descriptor_heap(&DescriptorHeapDescriptor::sampler(4)).unwrap();
        assert_eq!(heap.increment_size, DESCRIPTOR_INCREMENT);
        assert_eq!(backend.heap_count(), 1);

        let sampler = NativeViewDescriptor::Sampler(Default::default());
        backend.write_descriptor(heap.id, 2, &sampler);
        assert_eq!(backend.descriptor(heap.id, 2), Some(sampler));
        backend.clear_descriptor(heap.id, 2);
        assert_eq!(backend.descriptor(heap.id, 2), None);

        backend.destroy_descriptor_heap(heap.id);
        assert_eq!(backend.heap_count(), 0);
    }

    #[test]
    fn test_queue_signals_in_order() {
        let backend = SoftwareBackend::new(SoftwareBackendConfig::default());
        let queue = backend.create_queue(CommandListType::Graphics, "Test Queue").unwrap();
        let fence = Fence::new(0, Some("Test Fence"));

        queue.signal(&fence, 1).unwrap();
        queue.signal(&fence, 2).unwrap();
        fence.wait(2).unwrap();
        assert_eq!(fence.completed_value(), 2);
    }

    #[test]
    fn test_gpu_wait_blocks_queue_not_cpu() {
        let backend = SoftwareBackend::new(SoftwareBackendConfig::default());
        let queue = backend.create_queue(CommandListType::Compute, "Waiting Queue").unwrap();
        let gate = Fence::new(0, Some("Gate"));
        let done = Fence::new(0, Some("Done"));

        queue.wait(&gate, 1).unwrap();
        queue.signal(&done, 1).unwrap();
        assert!(!done.wait_timeout(1, Duration::from_millis(30)));

        gate.signal(1);
        assert!(done.wait_timeout(1, Duration::from_secs(5)));
    }
}
