//! 资源状态与屏障
//!
//! 每个 GPU 资源都记录其当前的使用状态。命令引用资源时，资源必须处于
//! 该命令要求的状态，否则必须先插入一个状态转换屏障。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use super::resource::ResourceId;

/// 资源使用状态
///
/// 对应 DistEngine 的 ResourceState（D3D12_RESOURCE_STATES 的子集）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceState {
    Common = 0,
    GenericRead,
    VertexOrConstantBuffer,
    IndexBuffer,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    CopyDestination,
    CopySource,
    Present,
    IndirectArgument,
    AccelerationStructure,
    ShadingRateSource,
}

impl ResourceState {
    const ALL: [ResourceState; 13] = [
        ResourceState::Common,
        ResourceState::GenericRead,
        ResourceState::VertexOrConstantBuffer,
        ResourceState::IndexBuffer,
        ResourceState::UnorderedAccess,
        ResourceState::RenderTarget,
        ResourceState::DepthWrite,
        ResourceState::CopyDestination,
        ResourceState::CopySource,
        ResourceState::Present,
        ResourceState::IndirectArgument,
        ResourceState::AccelerationStructure,
        ResourceState::ShadingRateSource,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL[value as usize]
    }

    /// 该状态是否只读
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ResourceState::GenericRead
                | ResourceState::VertexOrConstantBuffer
                | ResourceState::IndexBuffer
                | ResourceState::CopySource
                | ResourceState::IndirectArgument
                | ResourceState::ShadingRateSource
        )
    }

    /// 当前状态是否满足命令要求的状态
    ///
    /// GenericRead 是所有只读状态的组合（上传堆永久处于该状态），
    /// 因此可以直接用于复制源、顶点/常量、索引和间接参数读取。
    pub fn satisfies(&self, required: ResourceState) -> bool {
        *self == required
            || (*self == ResourceState::GenericRead
                && matches!(
                    required,
                    ResourceState::CopySource
                        | ResourceState::VertexOrConstantBuffer
                        | ResourceState::IndexBuffer
                        | ResourceState::IndirectArgument
                ))
    }

    /// 获取状态名称
    pub fn name(&self) -> &'static str {
        match self {
            ResourceState::Common => "Common",
            ResourceState::GenericRead => "GenericRead",
            ResourceState::VertexOrConstantBuffer => "VertexOrConstantBuffer",
            ResourceState::IndexBuffer => "IndexBuffer",
            ResourceState::UnorderedAccess => "UnorderedAccess",
            ResourceState::RenderTarget => "RenderTarget",
            ResourceState::DepthWrite => "DepthWrite",
            ResourceState::CopyDestination => "CopyDestination",
            ResourceState::CopySource => "CopySource",
            ResourceState::Present => "Present",
            ResourceState::IndirectArgument => "IndirectArgument",
            ResourceState::AccelerationStructure => "AccelerationStructure",
            ResourceState::ShadingRateSource => "ShadingRateSource",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 可跨线程共享的资源状态单元
///
/// 只由当前记录屏障的线程修改。两个线程在没有 Fence 同步的情况下
/// 对同一资源记录屏障，状态记账会发生竞争，这是调用方的责任。
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ResourceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ResourceState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// 资源屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// 状态转换屏障
    Transition {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    /// UAV 屏障（写后写/读，不改变状态）
    UnorderedAccess { resource: ResourceId },
}

impl ResourceBarrier {
    /// 创建状态转换屏障
    pub fn transition(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        ResourceBarrier::Transition { resource, before, after }
    }

    /// 屏障引用的资源
    pub fn resource(&self) -> ResourceId {
        match self {
            ResourceBarrier::Transition { resource, .. } => *resource,
            ResourceBarrier::UnorderedAccess { resource } => *resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_round_trips_every_state() {
        let cell = StateCell::new(ResourceState::Common);
        for state in ResourceState::ALL {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn test_read_only_states() {
        assert!(ResourceState::CopySource.is_read_only());
        assert!(!ResourceState::CopyDestination.is_read_only());
        assert!(!ResourceState::RenderTarget.is_read_only());
        assert_eq!(ResourceState::Present.to_string(), "Present");
    }

    #[test]
    fn test_generic_read_satisfies_read_states() {
        assert!(ResourceState::GenericRead.satisfies(ResourceState::CopySource));
        assert!(ResourceState::GenericRead.satisfies(ResourceState::IndexBuffer));
        assert!(!ResourceState::GenericRead.satisfies(ResourceState::CopyDestination));
        assert!(!ResourceState::Common.satisfies(ResourceState::CopySource));
        assert!(ResourceState::RenderTarget.satisfies(ResourceState::RenderTarget));
    }
}
