//! 软件 GPU 的内存与描述符堆
//!
//! 每个资源一块连续的字节存储，加上 GPU 时间线上观察到的资源状态。
//! 描述符句柄是虚拟地址，每个堆占据一段互不重叠的地址范围。

use std::collections::{BTreeMap, HashMap};

use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle};
use crate::renderer::resource::{ResourceId, ResourceKind};
use crate::renderer::state::ResourceState;
use crate::renderer::view::NativeViewDescriptor;
use crate::gfx::backend::{NativeHeap, NativeHeapId};

/// 软件描述符的增量大小
pub const DESCRIPTOR_INCREMENT: u32 = 32;

const HEAP_ADDRESS_BASE: u64 = 0x10_0000;

/// 一个资源的 GPU 侧存储
#[derive(Debug)]
pub(crate) struct Allocation {
    pub kind: ResourceKind,
    /// GPU 时间线上的当前状态
    pub state: ResourceState,
    pub bytes: Vec<u8>,
}

impl Allocation {
    pub fn name(&self) -> &str {
        self.kind.name().unwrap_or("<unnamed>")
    }
}

#[derive(Debug)]
pub(crate) struct HeapSlots {
    pub heap_type: DescriptorHeapType,
    pub cpu_start: usize,
    pub gpu_start: Option<u64>,
    pub slots: Vec<Option<NativeViewDescriptor>>,
}

impl HeapSlots {
    fn span(&self) -> u64 {
        self.slots.len() as u64 * DESCRIPTOR_INCREMENT as u64
    }

    fn cpu_slot(&self, ptr: usize) -> Option<u32> {
        let offset = (ptr as u64).checked_sub(self.cpu_start as u64)?;
        (offset < self.span()).then(|| (offset / DESCRIPTOR_INCREMENT as u64) as u32)
    }

    fn gpu_slot(&self, ptr: u64) -> Option<u32> {
        let offset = ptr.checked_sub(self.gpu_start?)?;
        (offset < self.span()).then(|| (offset / DESCRIPTOR_INCREMENT as u64) as u32)
    }
}

/// 软件 GPU 的全部可见状态
#[derive(Debug, Default)]
pub(crate) struct GpuMemory {
    pub allocations: HashMap<ResourceId, Allocation>,
    pub heaps: BTreeMap<NativeHeapId, HeapSlots>,
    next_heap: u64,
    next_address: u64,
}

impl GpuMemory {
    pub fn allocate(&mut self, id: ResourceId, kind: &ResourceKind) {
        let allocation = Allocation {
            state: kind.initial_state(),
            bytes: vec![0; kind.size_in_bytes() as usize],
            kind: kind.clone(),
        };
        self.allocations.insert(id, allocation);
    }

    pub fn create_heap(&mut self, desc: &DescriptorHeapDescriptor) -> NativeHeap {
        let id = NativeHeapId(self.next_heap);
        self.next_heap += 1;

        let span = desc.num_descriptors as u64 * DESCRIPTOR_INCREMENT as u64;
        let cpu_start = HEAP_ADDRESS_BASE + self.next_address;
        self.next_address += span + DESCRIPTOR_INCREMENT as u64;
        let gpu_start = desc.shader_visible.then_some(cpu_start << 16);

        self.heaps.insert(
            id,
            HeapSlots {
                heap_type: desc.heap_type,
                cpu_start: cpu_start as usize,
                gpu_start,
                slots: vec![None; desc.num_descriptors as usize],
            },
        );

        NativeHeap {
            id,
            cpu_start: cpu_start as usize,
            gpu_start,
            increment_size: DESCRIPTOR_INCREMENT,
        }
    }

    pub fn slot_mut(&mut self, heap: NativeHeapId, index: u32) -> Option<&mut Option<NativeViewDescriptor>> {
        self.heaps.get_mut(&heap)?.slots.get_mut(index as usize)
    }

    /// 将 CPU 句柄解析为 `(堆, 槽位)`
    pub fn resolve_cpu(&self, handle: CpuDescriptorHandle) -> Option<(NativeHeapId, &HeapSlots, u32)> {
        self.heaps
            .iter()
            .find_map(|(id, heap)| heap.cpu_slot(handle.ptr).map(|slot| (*id, heap, slot)))
    }

    /// 将 GPU 句柄解析为 `(堆, 槽位)`
    pub fn resolve_gpu(&self, handle: GpuDescriptorHandle) -> Option<(NativeHeapId, &HeapSlots, u32)> {
        self.heaps
            .iter()
            .find_map(|(id, heap)| heap.gpu_slot(handle.ptr).map(|slot| (*id, heap, slot)))
    }

    /// CPU 句柄指向的描述符（槽位为空时为 None）
    pub fn cpu_descriptor(&self, handle: CpuDescriptorHandle) -> Option<&NativeViewDescriptor> {
        let (_, heap, slot) = self.resolve_cpu(handle)?;
        heap.slots[slot as usize].as_ref()
    }
}
