//! 描述符管理模块
//!
//! 提供固定容量的描述符槽位堆，用于管理 GPU 资源视图。
//! 借鉴 DistEngine 的描述符堆设计。
//!
//! # 堆类别
//!
//! 原生硬件对不同类别要求不同的槽位布局，因此按类别分堆：
//!
//! - **CBV / SRV / UAV**：常量缓冲、着色资源、无序访问视图共享同一个物理堆（着色器可见）
//! - **Sampler**：采样器独立成堆（着色器可见）
//! - **RTV**：渲染目标视图（仅 CPU）
//! - **DSV**：深度模板视图（仅 CPU）
//!
//! 堆本身不做内部同步，跨线程共享时使用 [`SharedDescriptorHeap`] 的显式锁。

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error};

use crate::core::error::{contract, GraphicsError, Result};
use crate::core::config::HeapConfig;
use crate::gfx::backend::{GpuBackend, NativeHeap, NativeHeapId};
use super::view::NativeViewDescriptor;

/// 描述符堆类别（视图的用途）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapCategory {
    /// 常量缓冲视图 (CBV)
    ConstantBuffer,
    /// 着色资源视图 (SRV)
    ShaderResource,
    /// 无序访问视图 (UAV)
    UnorderedAccess,
    /// 采样器
    Sampler,
    /// 渲染目标视图 (RTV)
    RenderTarget,
    /// 深度模板视图 (DSV)
    DepthStencil,
}

impl DescriptorHeapCategory {
    /// 该类别所在的物理堆类型
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self {
            DescriptorHeapCategory::ConstantBuffer
            | DescriptorHeapCategory::ShaderResource
            | DescriptorHeapCategory::UnorderedAccess => DescriptorHeapType::CbvSrvUav,
            DescriptorHeapCategory::Sampler => DescriptorHeapType::Sampler,
            DescriptorHeapCategory::RenderTarget => DescriptorHeapType::RenderTarget,
            DescriptorHeapCategory::DepthStencil => DescriptorHeapType::DepthStencil,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapCategory::ConstantBuffer => "CBV",
            DescriptorHeapCategory::ShaderResource => "SRV",
            DescriptorHeapCategory::UnorderedAccess => "UAV",
            DescriptorHeapCategory::Sampler => "Sampler",
            DescriptorHeapCategory::RenderTarget => "RTV",
            DescriptorHeapCategory::DepthStencil => "DSV",
        }
    }
}

/// 物理描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorHeapType {
    /// 该类型的堆是否需要着色器可见
    pub fn is_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
            DescriptorHeapType::RenderTarget => "RTV",
            DescriptorHeapType::DepthStencil => "DSV",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapDescriptor {
    /// 堆类型
    pub heap_type: DescriptorHeapType,
    /// 描述符数量（固定容量）
    pub num_descriptors: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDescriptor {
    /// 创建新的描述符堆描述符
    pub fn new(heap_type: DescriptorHeapType, num_descriptors: u32) -> Self {
        Self {
            heap_type,
            num_descriptors,
            shader_visible: heap_type.is_shader_visible(),
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置着色器可见性
    pub fn with_shader_visible(mut self, visible: bool) -> Self {
        self.shader_visible = visible;
        self
    }

    /// 创建 RTV 堆描述符
    pub fn rtv(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::RenderTarget, num_descriptors).with_name("RTV Heap")
    }

    /// 创建 DSV 堆描述符
    pub fn dsv(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::DepthStencil, num_descriptors).with_name("DSV Heap")
    }

    /// 创建 SRV/CBV/UAV 堆描述符
    pub fn srv_cbv_uav(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::CbvSrvUav, num_descriptors).with_name("SRV/CBV/UAV Heap")
    }

    /// 创建采样器堆描述符
    pub fn sampler(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::Sampler, num_descriptors).with_name("Sampler Heap")
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 描述符索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (count * increment_size) as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 描述符索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (count * increment_size) as u64,
            index: self.index + count,
        }
    }
}

/// 描述符句柄对（CPU + GPU）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandle {
    /// CPU 可见句柄
    pub cpu: CpuDescriptorHandle,
    /// GPU 可见句柄（仅对着色器可见的堆有效）
    pub gpu: Option<GpuDescriptorHandle>,
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    /// 堆类型
    pub heap_type: DescriptorHeapType,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(heap_type: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            heap_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 描述符槽位堆
///
/// 固定容量，构造后永不增长。空闲索引以 LIFO 顺序复用。
/// 同一索引在未释放前不会被分配两次。
pub struct DescriptorSlotHeap {
    desc: DescriptorHeapDescriptor,
    native: NativeHeap,
    free: Vec<u32>,
    outstanding: Vec<bool>,
    backend: Arc<dyn GpuBackend>,
}

impl DescriptorSlotHeap {
    /// 创建新的描述符堆
    pub fn new(backend: Arc<dyn GpuBackend>, desc: DescriptorHeapDescriptor) -> Result<Self> {
        if desc.num_descriptors == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} heap must have at least one descriptor",
                desc.heap_type.name()
            ))
            .into());
        }
        if desc.shader_visible && !desc.heap_type.is_shader_visible() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} heaps cannot be shader visible",
                desc.heap_type.name()
            ))
            .into());
        }

        let native = backend.create_descriptor_heap(&desc)?;
        debug!(
            heap = desc.name.as_deref().unwrap_or(desc.heap_type.name()),
            capacity = desc.num_descriptors,
            "Descriptor heap created"
        );

        Ok(Self {
            free: (0..desc.num_descriptors).rev().collect(),
            outstanding: vec![false; desc.num_descriptors as usize],
            desc,
            native,
            backend,
        })
    }

    fn display_name(&self) -> String {
        self.desc
            .name
            .clone()
            .unwrap_or_else(|| format!("{} Heap", self.desc.heap_type.name()))
    }

    /// 分配一个槽位
    ///
    /// 堆已满时失败，堆不会增长。
    pub fn allocate(&mut self) -> Result<u32> {
        match self.free.pop() {
            Some(index) => {
                self.outstanding[index as usize] = true;
                Ok(index)
            }
            None => {
                let heap = self.display_name();
                error!(heap = %heap, capacity = self.capacity(), "Descriptor heap exhausted");
                Err(GraphicsError::DescriptorHeapExhausted {
                    heap,
                    capacity: self.capacity(),
                }
                .into())
            }
        }
    }

    /// 释放一个槽位，同时清除原生描述符
    pub fn free(&mut self, index: u32) -> Result<()> {
        match self.outstanding.get_mut(index as usize) {
            Some(slot) if *slot => {
                *slot = false;
                self.backend.clear_descriptor(self.native.id, index);
                self.free.push(index);
                Ok(())
            }
            _ => Err(contract(format!(
                "Descriptor slot {} of '{}' is not allocated",
                index,
                self.display_name()
            ))),
        }
    }

    /// 将解析后的视图描述写入槽位
    pub fn write(&self, index: u32, descriptor: &NativeViewDescriptor) -> Result<()> {
        if !self.is_allocated(index) {
            return Err(contract(format!(
                "Cannot write unallocated descriptor slot {} of '{}'",
                index,
                self.display_name()
            )));
        }
        self.backend.write_descriptor(self.native.id, index, descriptor);
        Ok(())
    }

    /// 槽位是否已分配
    pub fn is_allocated(&self, index: u32) -> bool {
        self.outstanding.get(index as usize).copied().unwrap_or(false)
    }

    /// 获取指定索引的 CPU 句柄
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        CpuDescriptorHandle::new(self.native.cpu_start, 0).offset(index, self.native.increment_size)
    }

    /// 获取指定索引的 GPU 句柄（仅对着色器可见的堆）
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        if !self.desc.shader_visible {
            return None;
        }
        self.native
            .gpu_start
            .map(|start| GpuDescriptorHandle::new(start, 0).offset(index, self.native.increment_size))
    }

    /// 获取句柄对
    pub fn handle(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            cpu: self.cpu_handle(index),
            gpu: self.gpu_handle(index),
        }
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.desc.heap_type
    }

    pub fn native_id(&self) -> NativeHeapId {
        self.native.id
    }

    pub fn capacity(&self) -> u32 {
        self.desc.num_descriptors
    }

    pub fn allocated_count(&self) -> u32 {
        self.capacity() - self.free.len() as u32
    }

    pub fn available(&self) -> u32 {
        self.free.len() as u32
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    pub fn is_shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    pub fn name(&self) -> Option<&str> {
        self.desc.name.as_deref()
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.desc.heap_type, self.capacity(), self.allocated_count())
    }
}

impl Drop for DescriptorSlotHeap {
    fn drop(&mut self) {
        if self.allocated_count() > 0 {
            debug!(
                heap = %self.display_name(),
                outstanding = self.allocated_count(),
                "Descriptor heap dropped with outstanding slots"
            );
        }
        self.backend.destroy_descriptor_heap(self.native.id);
    }
}

/// 带显式锁的共享描述符堆
///
/// 视图持有其来源堆的一个克隆，销毁时归还槽位。
#[derive(Clone)]
pub struct SharedDescriptorHeap {
    heap_type: DescriptorHeapType,
    inner: Arc<Mutex<DescriptorSlotHeap>>,
}

impl SharedDescriptorHeap {
    pub fn new(heap: DescriptorSlotHeap) -> Self {
        Self {
            heap_type: heap.heap_type(),
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    /// 获取堆的锁
    pub fn lock(&self) -> MutexGuard<'_, DescriptorSlotHeap> {
        self.inner.lock()
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// 是否为同一个堆
    pub fn same_heap(&self, other: &SharedDescriptorHeap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// 设备默认描述符堆
///
/// 生命周期与设备绑定，不是全局状态。
pub struct DefaultHeaps {
    cbv_srv_uav: SharedDescriptorHeap,
    sampler: SharedDescriptorHeap,
    rtv: SharedDescriptorHeap,
    dsv: SharedDescriptorHeap,
}

impl DefaultHeaps {
    /// 按配置的容量创建四个默认堆
    pub fn new(backend: &Arc<dyn GpuBackend>, config: &HeapConfig) -> Result<Self> {
        let create = |desc: DescriptorHeapDescriptor| -> Result<SharedDescriptorHeap> {
            Ok(SharedDescriptorHeap::new(DescriptorSlotHeap::new(backend.clone(), desc)?))
        };

        Ok(Self {
            cbv_srv_uav: create(DescriptorHeapDescriptor::srv_cbv_uav(config.cbv_srv_uav))?,
            sampler: create(DescriptorHeapDescriptor::sampler(config.sampler))?,
            rtv: create(DescriptorHeapDescriptor::rtv(config.rtv))?,
            dsv: create(DescriptorHeapDescriptor::dsv(config.dsv))?,
        })
    }

    /// 获取某类别的默认堆
    pub fn get(&self, category: DescriptorHeapCategory) -> &SharedDescriptorHeap {
        match category.heap_type() {
            DescriptorHeapType::CbvSrvUav => &self.cbv_srv_uav,
            DescriptorHeapType::Sampler => &self.sampler,
            DescriptorHeapType::RenderTarget => &self.rtv,
            DescriptorHeapType::DepthStencil => &self.dsv,
        }
    }

    /// 着色器可见的堆（用于 SetDescriptorHeaps）
    pub fn shader_visible(&self) -> [&SharedDescriptorHeap; 2] {
        [&self.cbv_srv_uav, &self.sampler]
    }

    /// 获取所有统计信息
    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        [&self.cbv_srv_uav, &self.sampler, &self.rtv, &self.dsv]
            .iter()
            .map(|heap| heap.lock().stats())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::{SoftwareBackend, SoftwareBackendConfig};

    fn backend() -> Arc<dyn GpuBackend> {
        Arc::new(SoftwareBackend::new(SoftwareBackendConfig::default()))
    }

    #[test]
    fn test_category_heap_mapping() {
        assert_eq!(DescriptorHeapCategory::ConstantBuffer.heap_type(), DescriptorHeapType::CbvSrvUav);
        assert_eq!(DescriptorHeapCategory::UnorderedAccess.heap_type(), DescriptorHeapType::CbvSrvUav);
        assert_eq!(DescriptorHeapCategory::DepthStencil.heap_type(), DescriptorHeapType::DepthStencil);
        assert!(DescriptorHeapType::Sampler.is_shader_visible());
        assert!(!DescriptorHeapType::RenderTarget.is_shader_visible());
    }

    #[test]
    fn test_descriptor_heap_descriptor() {
        let desc = DescriptorHeapDescriptor::rtv(100);
        assert_eq!(desc.heap_type, DescriptorHeapType::RenderTarget);
        assert_eq!(desc.num_descriptors, 100);
        assert!(!desc.shader_visible);
        assert_eq!(desc.name, Some("RTV Heap".to_string()));

        let desc = DescriptorHeapDescriptor::srv_cbv_uav(128);
        assert!(desc.shader_visible);
    }

    #[test]
    fn test_cpu_descriptor_handle_offset() {
        let handle = CpuDescriptorHandle::new(1000, 0);
        let offset_handle = handle.offset(5, 32);
        assert_eq!(offset_handle.ptr, 1160);
        assert_eq!(offset_handle.index, 5);
    }

    #[test]
    fn test_allocate_never_repeats_outstanding_index() {
        let mut heap = DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::srv_cbv_uav(16)).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..16 {
            assert!(seen.insert(heap.allocate().unwrap()));
        }
        assert!(heap.is_full());
        let err = heap.allocate().unwrap_err();
        assert_eq!(err.class(), Some(crate::core::error::ErrorClass::Exhaustion));
        // 重复失败是确定的
        assert!(heap.allocate().is_err());
    }

    #[test]
    fn test_free_then_reallocate_reuses_freed_slots() {
        let mut heap = DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::rtv(4)).unwrap();
        let slots: Vec<u32> = (0..4).map(|_| heap.allocate().unwrap()).collect();
        assert!(heap.allocate().is_err());

        heap.free(slots[1]).unwrap();
        heap.free(slots[2]).unwrap();
        assert_eq!(heap.available(), 2);

        let mut again = vec![heap.allocate().unwrap(), heap.allocate().unwrap()];
        again.sort_unstable();
        assert_eq!(again, vec![slots[1], slots[2]]);
        assert!(heap.is_full());
        assert!(heap.allocate().is_err());
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut heap = DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::dsv(2)).unwrap();
        let index = heap.allocate().unwrap();
        heap.free(index).unwrap();
        assert!(heap.free(index).is_err());
        assert!(heap.free(7).is_err());
        assert_eq!(heap.available(), 2);
    }

    #[test]
    fn test_handles_follow_increment() {
        let heap = DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::srv_cbv_uav(8)).unwrap();
        let first = heap.handle(0);
        let third = heap.handle(2);
        assert_eq!(third.cpu.index, 2);
        assert!(third.cpu.ptr > first.cpu.ptr);
        assert!(third.gpu.is_some());

        let rtv = DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::rtv(2)).unwrap();
        assert!(rtv.gpu_handle(0).is_none());
        assert_ne!(rtv.cpu_handle(0).ptr, heap.cpu_handle(0).ptr);
    }

    #[test]
    fn test_invalid_heaps() {
        assert!(DescriptorSlotHeap::new(backend(), DescriptorHeapDescriptor::rtv(0)).is_err());
        let visible_rtv = DescriptorHeapDescriptor::rtv(4).with_shader_visible(true);
        assert!(DescriptorSlotHeap::new(backend(), visible_rtv).is_err());
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorHeapType::RenderTarget, 100, 50);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }

    #[test]
    fn test_default_heaps() {
        let heaps = DefaultHeaps::new(&backend(), &HeapConfig::default()).unwrap();
        let srv = heaps.get(DescriptorHeapCategory::ShaderResource);
        let cbv = heaps.get(DescriptorHeapCategory::ConstantBuffer);
        assert!(srv.same_heap(cbv));
        assert!(!srv.same_heap(heaps.get(DescriptorHeapCategory::Sampler)));
        assert_eq!(heaps.get(DescriptorHeapCategory::RenderTarget).lock().capacity(), 64);
        assert_eq!(heaps.all_stats().len(), 4);
    }
}
