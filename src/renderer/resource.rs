//! 资源管理模块
//!
//! 提供缓冲区、纹理等 GPU 资源的描述与所有权管理。
//!
//! 持久资源由设备的 [`ResourceArena`] 拥有，使用带代数的稳定索引 [`ResourceId`]
//! 引用；视图只保存 ID，不持有资源的所有权，销毁顺序是显式的。

use std::fmt;
use std::marker::PhantomData;

use crate::core::error::{GraphicsError, Result};
use super::state::{ResourceState, StateCell};

/// 常量缓冲区的大小与偏移对齐要求（字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 将大小对齐到常量缓冲区边界
pub fn align_constant_buffer_size(size: u64) -> u64 {
    size.saturating_add(CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// `[offset, offset + size)` 是否超出 `limit`，加法溢出同样视为超出
pub fn range_exceeds(offset: u64, size: u64, limit: u64) -> bool {
    offset.checked_add(size).map_or(true, |end| end > limit)
}

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsageType {
    /// 顶点缓冲区
    Vertex,
    /// 索引缓冲区
    Index,
    /// 常量缓冲区
    Constant,
    /// 存储缓冲区（可作 UAV）
    Storage,
    /// 间接参数缓冲区
    Indirect,
    /// 光线追踪加速结构
    AccelerationStructure,
}

/// 缓冲区内存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// GPU 本地内存（仅 GPU 可访问）
    DeviceLocal,
    /// 上传堆（CPU 写，GPU 读）
    HostVisible,
    /// 回读堆（GPU 写，CPU 读）
    ReadBack,
}

impl MemoryType {
    /// CPU 是否可以直接访问
    pub fn is_host_accessible(&self) -> bool {
        !matches!(self, MemoryType::DeviceLocal)
    }
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 使用类型
    pub usage: BufferUsageType,
    /// 内存类型
    pub memory_type: MemoryType,
    /// 初始状态（None 时按内存类型推导）
    pub initial_state: Option<ResourceState>,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDescriptor {
    /// 创建新的缓冲区描述符
    pub fn new(size: u64, usage: BufferUsageType, memory_type: MemoryType) -> Self {
        Self {
            size,
            usage,
            memory_type,
            initial_state: None,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置初始状态
    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// 计算对齐后的大小（常量缓冲区要求 256 字节对齐）
    pub fn aligned_size(&self) -> u64 {
        if self.usage == BufferUsageType::Constant {
            align_constant_buffer_size(self.size)
        } else {
            self.size
        }
    }

    /// 创建时的资源状态
    ///
    /// 上传堆必须处于 GenericRead，回读堆必须处于 CopyDestination，
    /// 加速结构永久处于 AccelerationStructure。
    pub fn resolved_initial_state(&self) -> ResourceState {
        match (self.memory_type, self.usage) {
            (MemoryType::HostVisible, _) => ResourceState::GenericRead,
            (MemoryType::ReadBack, _) => ResourceState::CopyDestination,
            (_, BufferUsageType::AccelerationStructure) => ResourceState::AccelerationStructure,
            _ => self.initial_state.unwrap_or(ResourceState::Common),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(GraphicsError::ResourceCreation(
                "Buffer size must be greater than 0".to_string(),
            )
            .into());
        }
        if self.usage == BufferUsageType::AccelerationStructure
            && self.memory_type != MemoryType::DeviceLocal
        {
            return Err(GraphicsError::ResourceCreation(
                "Acceleration structure buffers must live in device local memory".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// 上传缓冲区布局（CPU -> GPU）
///
/// 借鉴 DistEngine 的 UploadBuffer<T>，为每个元素计算对齐后的大小与偏移，
/// 常量缓冲区元素对齐到 256 字节。
pub struct UploadBuffer<T> {
    /// 元素数量
    element_count: usize,
    /// 每个元素的大小（对齐后）
    element_size: u64,
    /// 使用类型
    usage: BufferUsageType,
    _phantom: PhantomData<T>,
}

impl<T> UploadBuffer<T> {
    /// 创建新的上传缓冲区布局
    pub fn new(element_count: usize, usage: BufferUsageType) -> Self {
        let element_size = std::mem::size_of::<T>() as u64;
        let element_size = if usage == BufferUsageType::Constant {
            align_constant_buffer_size(element_size)
        } else {
            element_size
        };

        Self {
            element_count,
            element_size,
            usage,
            _phantom: PhantomData,
        }
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// 每个元素的大小（对齐后）
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn total_size(&self) -> u64 {
        self.element_size * self.element_count as u64
    }

    /// 计算元素在缓冲区中的偏移量
    pub fn element_offset(&self, index: usize) -> Option<u64> {
        (index < self.element_count).then(|| self.element_size * index as u64)
    }

    /// 创建对应的缓冲区描述符（位于上传堆）
    pub fn descriptor(&self, name: Option<String>) -> BufferDescriptor {
        BufferDescriptor {
            size: self.total_size(),
            usage: self.usage,
            memory_type: MemoryType::HostVisible,
            initial_state: None,
            name,
        }
    }
}

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// RGBA 8 位无符号归一化
    Rgba8Unorm,
    /// RGBA 8 位 sRGB
    Rgba8Srgb,
    /// BGRA 8 位无符号归一化
    Bgra8Unorm,
    /// RGBA 16 位浮点
    Rgba16Float,
    /// RGBA 32 位浮点
    Rgba32Float,
    /// R 32 位浮点
    R32Float,
    /// R 32 位无符号整数
    R32Uint,
    /// R 16 位无符号归一化
    R16Unorm,
    /// 深度平面的可读视图格式（24 位深度 + 8 位未用）
    R24UnormX8Typeless,
    /// 模板平面的可读视图格式
    X24TypelessG8Uint,
    /// 深度 16 位
    Depth16Unorm,
    /// 深度 24 位 + 模板 8 位
    Depth24PlusStencil8,
    /// 深度 32 位浮点
    Depth32Float,
}

impl TextureFormat {
    /// 每个纹素的字节数
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8Srgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::R32Uint
            | TextureFormat::R24UnormX8Typeless
            | TextureFormat::X24TypelessG8Uint
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::Depth32Float => 4,
            TextureFormat::R16Unorm | TextureFormat::Depth16Unorm => 2,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16Unorm | TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32Float
        )
    }

    /// 是否带模板
    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    /// 平面数量（深度 + 模板为 2）
    pub fn plane_count(&self) -> u32 {
        if self.has_stencil() { 2 } else { 1 }
    }

    /// 着色器读取视图使用的格式
    ///
    /// 深度格式无法直接被着色器采样，需要替换成只提取深度（或模板）通道的格式。
    pub fn shader_read_format(&self, plane_slice: u32) -> Option<TextureFormat> {
        match (self, plane_slice) {
            (TextureFormat::Depth32Float, 0) => Some(TextureFormat::R32Float),
            (TextureFormat::Depth16Unorm, 0) => Some(TextureFormat::R16Unorm),
            (TextureFormat::Depth24PlusStencil8, 0) => Some(TextureFormat::R24UnormX8Typeless),
            (TextureFormat::Depth24PlusStencil8, 1) => Some(TextureFormat::X24TypelessG8Uint),
            (format, 0) if !format.is_depth() => Some(*format),
            _ => None,
        }
    }

    /// 将颜色编码为该格式的纹素字节
    pub fn encode_color(&self, color: [f32; 4]) -> Option<Vec<u8>> {
        let unorm8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let bytes = match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8Srgb => {
                color.iter().map(|&c| unorm8(c)).collect()
            }
            TextureFormat::Bgra8Unorm => {
                vec![unorm8(color[2]), unorm8(color[1]), unorm8(color[0]), unorm8(color[3])]
            }
            TextureFormat::Rgba32Float => bytemuck::cast_slice(&color).to_vec(),
            TextureFormat::R32Float => color[0].to_le_bytes().to_vec(),
            _ => return None,
        };
        Some(bytes)
    }

    /// 将深度/模板值编码为该格式的纹素字节
    pub fn encode_depth_stencil(&self, depth: f32, stencil: u8) -> Option<Vec<u8>> {
        match self {
            TextureFormat::Depth32Float => Some(depth.to_le_bytes().to_vec()),
            TextureFormat::Depth16Unorm => {
                let d = (depth.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;
                Some(d.to_le_bytes().to_vec())
            }
            TextureFormat::Depth24PlusStencil8 => {
                let d = (depth.clamp(0.0, 1.0) * 0x00ff_ffff as f32).round() as u32;
                Some((d | (stencil as u32) << 24).to_le_bytes().to_vec())
            }
            _ => None,
        }
    }
}

/// 纹理维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

impl TextureDimension {
    /// 是否为多重采样维度
    pub fn is_multisampled(&self) -> bool {
        matches!(self, TextureDimension::Texture2DMs | TextureDimension::Texture2DMsArray)
    }

    /// 是否为立方体维度
    pub fn is_cube(&self) -> bool {
        matches!(self, TextureDimension::TextureCube | TextureDimension::TextureCubeArray)
    }
}

/// 纹理用途
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureUsage {
    /// 允许作为渲染目标
    pub render_target: bool,
    /// 允许作为深度模板
    pub depth_stencil: bool,
    /// 允许无序访问
    pub unordered_access: bool,
}

impl TextureUsage {
    pub const SAMPLED: TextureUsage = TextureUsage {
        render_target: false,
        depth_stencil: false,
        unordered_access: false,
    };
    pub const RENDER_TARGET: TextureUsage = TextureUsage {
        render_target: true,
        depth_stencil: false,
        unordered_access: false,
    };
    pub const DEPTH_STENCIL: TextureUsage = TextureUsage {
        render_target: false,
        depth_stencil: true,
        unordered_access: false,
    };
    pub const STORAGE: TextureUsage = TextureUsage {
        render_target: false,
        depth_stencil: false,
        unordered_access: true,
    };
}

/// 纹理描述信息
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// 深度（3D 纹理）或数组层数
    pub depth_or_array_layers: u32,
    /// Mip 等级数量
    pub mip_levels: u32,
    /// 采样数（多重采样纹理大于 1）
    pub sample_count: u32,
    /// 纹理格式
    pub format: TextureFormat,
    /// 纹理维度
    pub dimension: TextureDimension,
    /// 纹理用途
    pub usage: TextureUsage,
    /// 初始状态
    pub initial_state: ResourceState,
    /// 调试名称
    pub name: Option<String>,
}

impl TextureDescriptor {
    /// 创建 2D 纹理描述符
    pub fn texture_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            dimension: TextureDimension::Texture2D,
            usage: TextureUsage::SAMPLED,
            initial_state: ResourceState::Common,
            name: None,
        }
    }

    /// 创建交换链风格的后备缓冲（初始状态为 Present）
    pub fn back_buffer(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::texture_2d(width, height, format)
            .with_usage(TextureUsage::RENDER_TARGET)
            .with_initial_state(ResourceState::Present)
    }

    /// 创建深度缓冲
    pub fn depth_buffer(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::texture_2d(width, height, format)
            .with_usage(TextureUsage::DEPTH_STENCIL)
            .with_initial_state(ResourceState::DepthWrite)
    }

    pub fn with_dimension(mut self, dimension: TextureDimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 数组层数（3D 纹理只有一层）
    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture3D => 1,
            _ => self.depth_or_array_layers,
        }
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers()
    }

    /// 子资源索引（mip 优先，按数组层排列）
    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        mip + array_slice * self.mip_levels
    }

    /// 指定 mip 等级的尺寸
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let depth = match self.dimension {
            TextureDimension::Texture3D => (self.depth_or_array_layers >> mip).max(1),
            _ => 1,
        };
        ((self.width >> mip).max(1), (self.height >> mip).max(1), depth)
    }

    /// 指定 mip 等级单个子资源的字节大小
    pub fn mip_size(&self, mip: u32) -> u64 {
        let (w, h, d) = self.mip_extent(mip);
        w as u64 * h as u64 * d as u64 * self.sample_count as u64 * self.format.bytes_per_texel() as u64
    }

    /// 单个数组层（包含全部 mip）的字节大小
    fn slice_size(&self) -> u64 {
        (0..self.mip_levels).map(|mip| self.mip_size(mip)).sum()
    }

    /// 子资源在纹理内存中的偏移与大小
    pub fn subresource_range(&self, mip: u32, array_slice: u32) -> (u64, u64) {
        let mip_offset: u64 = (0..mip).map(|m| self.mip_size(m)).sum();
        (array_slice as u64 * self.slice_size() + mip_offset, self.mip_size(mip))
    }

    /// 纹理总字节大小
    pub fn total_size(&self) -> u64 {
        self.slice_size() * self.array_layers() as u64
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(GraphicsError::ResourceCreation(msg).into()) };

        if self.width == 0 || self.height == 0 || self.depth_or_array_layers == 0 || self.mip_levels == 0 {
            return fail("Texture dimensions, layers and mip levels must be greater than 0".to_string());
        }

        let max_extent = self.width.max(self.height).max(match self.dimension {
            TextureDimension::Texture3D => self.depth_or_array_layers,
            _ => 1,
        });
        let max_mips = 32 - max_extent.leading_zeros();
        if self.mip_levels > max_mips {
            return fail(format!("{} mip levels exceed the maximum of {}", self.mip_levels, max_mips));
        }

        match self.dimension {
            TextureDimension::Texture1D | TextureDimension::Texture1DArray if self.height != 1 => {
                return fail("1D textures must have a height of 1".to_string());
            }
            TextureDimension::TextureCube if self.depth_or_array_layers != 6 => {
                return fail("Cube textures must have exactly 6 faces".to_string());
            }
            TextureDimension::TextureCubeArray if self.depth_or_array_layers % 6 != 0 => {
                return fail("Cube array textures must have a multiple of 6 faces".to_string());
            }
            TextureDimension::TextureCube | TextureDimension::TextureCubeArray if self.width != self.height => {
                return fail("Cube faces must be square".to_string());
            }
            _ => {}
        }

        if self.dimension.is_multisampled() {
            if self.sample_count < 2 || self.mip_levels != 1 {
                return fail("Multisampled textures need more than one sample and a single mip".to_string());
            }
        } else if self.sample_count != 1 {
            return fail(format!("{:?} textures cannot be multisampled", self.dimension));
        }

        if self.format.is_depth() {
            if !self.usage.depth_stencil {
                return fail(format!("{:?} requires depth stencil usage", self.format));
            }
            if self.dimension == TextureDimension::Texture3D {
                return fail("Depth formats cannot be used with 3D textures".to_string());
            }
            if self.usage.render_target || self.usage.unordered_access {
                return fail("Depth textures cannot be render targets or unordered access".to_string());
            }
        } else if self.usage.depth_stencil {
            return fail(format!("{:?} is not a depth format", self.format));
        }

        if self.usage.render_target && self.usage.unordered_access && self.dimension.is_multisampled() {
            return fail("Multisampled textures cannot allow unordered access".to_string());
        }

        Ok(())
    }
}

/// 资源 ID
///
/// 资源槽位索引加代数，槽位复用后旧 ID 失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

impl ResourceId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// 资源种类
#[derive(Debug, Clone)]
pub enum ResourceKind {
    Buffer(BufferDescriptor),
    Texture(TextureDescriptor),
}

impl ResourceKind {
    /// 校验描述信息
    pub fn validate(&self) -> Result<()> {
        match self {
            ResourceKind::Buffer(desc) => desc.validate(),
            ResourceKind::Texture(desc) => desc.validate(),
        }
    }

    /// 创建时的资源状态
    pub fn initial_state(&self) -> ResourceState {
        match self {
            ResourceKind::Buffer(desc) => desc.resolved_initial_state(),
            ResourceKind::Texture(desc) => desc.initial_state,
        }
    }

    /// 资源占用的字节数
    pub fn size_in_bytes(&self) -> u64 {
        match self {
            ResourceKind::Buffer(desc) => desc.aligned_size(),
            ResourceKind::Texture(desc) => desc.total_size(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ResourceKind::Buffer(desc) => desc.name.as_deref(),
            ResourceKind::Texture(desc) => desc.name.as_deref(),
        }
    }
}

/// GPU 资源（缓冲区或纹理）
#[derive(Debug)]
pub struct GpuResource {
    id: ResourceId,
    kind: ResourceKind,
    state: StateCell,
}

impl GpuResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// 缓冲区描述（如果是缓冲区）
    pub fn as_buffer(&self) -> Option<&BufferDescriptor> {
        match &self.kind {
            ResourceKind::Buffer(desc) => Some(desc),
            ResourceKind::Texture(_) => None,
        }
    }

    /// 纹理描述（如果是纹理）
    pub fn as_texture(&self) -> Option<&TextureDescriptor> {
        match &self.kind {
            ResourceKind::Texture(desc) => Some(desc),
            ResourceKind::Buffer(_) => None,
        }
    }

    /// 当前记录的状态
    pub fn current_state(&self) -> ResourceState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    pub fn name(&self) -> &str {
        self.kind.name().unwrap_or("<unnamed>")
    }
}

struct ArenaSlot {
    generation: u32,
    resource: Option<GpuResource>,
}

/// 资源池
///
/// 设备拥有的长生命周期资源池，索引稳定。创建与销毁需要可变借用，
/// 状态记账只需要共享借用，因此多个线程可以同时记录不同的命令缓冲区。
#[derive(Default)]
pub struct ResourceArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入资源，返回稳定的 ID
    pub fn insert(&mut self, kind: ResourceKind) -> ResourceId {
        let state = StateCell::new(kind.initial_state());
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(ArenaSlot { generation: 0, resource: None });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = ResourceId { index, generation: slot.generation };
        slot.resource = Some(GpuResource { id, kind, state });
        id
    }

    /// 移除资源，旧 ID 之后不再有效
    pub fn remove(&mut self, id: ResourceId) -> Option<GpuResource> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let resource = slot.resource.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(resource)
    }

    /// 查找资源
    pub fn get(&self, id: ResourceId) -> Result<&GpuResource> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.resource.as_ref())
            .ok_or_else(|| GraphicsError::InvalidResource(id).into())
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_ok()
    }

    /// 存活的资源数量
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.resource.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 遍历存活的资源
    pub fn iter(&self) -> impl Iterator<Item = &GpuResource> {
        self.slots.iter().filter_map(|slot| slot.resource.as_ref())
    }
}
