//! 资源视图工厂
//!
//! 为缓冲区或纹理构建带类型的视图，并写入一个描述符槽位。
//!
//! # 设计原则
//!
//! - **封闭的分派**：视图类型与纹理维度都是封闭枚举，由 [`resolve_view`] 一处分派，
//!   维度集合在编译期可以穷举检查
//! - **一个视图一个槽位**：视图销毁时把槽位归还给来源堆
//! - **构造即失败**：不支持的类型/维度组合、未对齐的常量缓冲区、越界的 mip 或数组范围
//!   都在构造时报错，不返回半成品视图
//!
//! # 支持矩阵
//!
//! | 维度 | SRV | UAV | RTV | DSV |
//! |------|-----|-----|-----|-----|
//! | 1D / 1D 数组 | ✓ | ✓ | ✓ | ✓ |
//! | 2D / 2D 数组 | ✓ | ✓ | ✓ | ✓ |
//! | 2D 多重采样（数组） | ✓ | ✗ | ✓ | ✓ |
//! | 3D | ✓ | ✓（W 范围） | ✓（W 范围） | ✗ |
//! | Cube / Cube 数组 | ✓ | 2D 数组 | 2D 数组 | 2D 数组 |

use tracing::{debug, error};

use crate::core::error::{DistHalError, GraphicsError, Result};
use crate::gfx::backend::BackendCapabilities;
use super::descriptor::{
    CpuDescriptorHandle, DescriptorHandle, DescriptorHeapCategory, GpuDescriptorHandle,
    SharedDescriptorHeap,
};
use super::resource::{
    BufferDescriptor, BufferUsageType, GpuResource, ResourceId, TextureDescriptor, TextureDimension,
    TextureFormat, CONSTANT_BUFFER_ALIGNMENT, range_exceeds,
};
use super::state::ResourceState;

/// 视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    /// 常量缓冲视图
    ConstantBuffer,
    /// 纹理着色资源视图
    Texture,
    /// 带格式的缓冲区着色资源视图
    Buffer,
    /// 结构化缓冲区着色资源视图
    StructuredBuffer,
    /// 可写的带格式缓冲区
    RWBuffer,
    /// 可写纹理
    RWTexture,
    /// 可写结构化缓冲区
    RWStructuredBuffer,
    /// 渲染目标视图
    RenderTarget,
    /// 深度模板视图
    DepthStencil,
    /// 光线追踪加速结构
    AccelerationStructure,
}

impl ViewType {
    /// 视图所属的描述符堆类别
    pub fn category(&self) -> DescriptorHeapCategory {
        match self {
            ViewType::ConstantBuffer => DescriptorHeapCategory::ConstantBuffer,
            ViewType::Texture
            | ViewType::Buffer
            | ViewType::StructuredBuffer
            | ViewType::AccelerationStructure => DescriptorHeapCategory::ShaderResource,
            ViewType::RWBuffer | ViewType::RWTexture | ViewType::RWStructuredBuffer => {
                DescriptorHeapCategory::UnorderedAccess
            }
            ViewType::RenderTarget => DescriptorHeapCategory::RenderTarget,
            ViewType::DepthStencil => DescriptorHeapCategory::DepthStencil,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ViewType::ConstantBuffer => "ConstantBuffer",
            ViewType::Texture => "Texture",
            ViewType::Buffer => "Buffer",
            ViewType::StructuredBuffer => "StructuredBuffer",
            ViewType::RWBuffer => "RWBuffer",
            ViewType::RWTexture => "RWTexture",
            ViewType::RWStructuredBuffer => "RWStructuredBuffer",
            ViewType::RenderTarget => "RenderTarget",
            ViewType::DepthStencil => "DepthStencil",
            ViewType::AccelerationStructure => "AccelerationStructure",
        }
    }
}

/// 视图描述信息
///
/// 未设置的范围字段表示“到资源末尾”。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDescriptor {
    pub view_type: ViewType,
    /// 覆盖资源格式（None 时使用资源格式或深度替换格式）
    pub format: Option<TextureFormat>,
    /// 最高细节 mip（RTV/DSV/UAV 为目标 mip）
    pub mip_slice: u32,
    /// mip 数量（仅 SRV）
    pub mip_levels: Option<u32>,
    /// 平面索引（深度模板纹理的模板平面为 1）
    pub plane_slice: u32,
    /// 起始数组层（3D 纹理的 RTV/UAV 为起始 W 切片）
    pub first_array_slice: u32,
    /// 数组层数
    pub array_size: Option<u32>,
    /// 缓冲区视图的起始元素
    pub first_element: u64,
    /// 缓冲区视图的元素数量
    pub num_elements: Option<u32>,
    /// 结构化缓冲区的元素步长
    pub structure_stride: u32,
    /// 常量缓冲视图的字节偏移
    pub offset: u64,
    /// 常量缓冲视图的字节大小
    pub size: Option<u64>,
    /// 调试名称
    pub name: Option<String>,
}

impl ViewDescriptor {
    pub fn new(view_type: ViewType) -> Self {
        Self {
            view_type,
            format: None,
            mip_slice: 0,
            mip_levels: None,
            plane_slice: 0,
            first_array_slice: 0,
            array_size: None,
            first_element: 0,
            num_elements: None,
            structure_stride: 0,
            offset: 0,
            size: None,
            name: None,
        }
    }

    /// 纹理着色资源视图
    pub fn texture() -> Self {
        Self::new(ViewType::Texture)
    }

    pub fn render_target() -> Self {
        Self::new(ViewType::RenderTarget)
    }

    pub fn depth_stencil() -> Self {
        Self::new(ViewType::DepthStencil)
    }

    /// 常量缓冲视图，偏移与大小必须是 256 的倍数
    pub fn constant_buffer(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size: Some(size),
            ..Self::new(ViewType::ConstantBuffer)
        }
    }

    /// 结构化缓冲区视图
    pub fn structured_buffer(stride: u32, writable: bool) -> Self {
        let view_type = if writable {
            ViewType::RWStructuredBuffer
        } else {
            ViewType::StructuredBuffer
        };
        Self {
            structure_stride: stride,
            ..Self::new(view_type)
        }
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_mip_slice(mut self, mip_slice: u32) -> Self {
        self.mip_slice = mip_slice;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = Some(mip_levels);
        self
    }

    pub fn with_plane_slice(mut self, plane_slice: u32) -> Self {
        self.plane_slice = plane_slice;
        self
    }

    pub fn with_array_range(mut self, first_array_slice: u32, array_size: u32) -> Self {
        self.first_array_slice = first_array_slice;
        self.array_size = Some(array_size);
        self
    }

    pub fn with_elements(mut self, first_element: u64, num_elements: u32) -> Self {
        self.first_element = first_element;
        self.num_elements = Some(num_elements);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 原生视图维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_stride: u32,
    },
    Texture1D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    Texture1DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        most_detailed_mip: u32,
        mip_levels: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_w_slice: u32,
        w_size: u32,
    },
    TextureCube {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCubeArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_2d_array_face: u32,
        num_cubes: u32,
    },
}

impl ViewDimension {
    /// 视图覆盖的最高细节 mip
    pub fn most_detailed_mip(&self) -> u32 {
        match *self {
            ViewDimension::Buffer { .. }
            | ViewDimension::Texture2DMs
            | ViewDimension::Texture2DMsArray { .. } => 0,
            ViewDimension::Texture1D { most_detailed_mip, .. }
            | ViewDimension::Texture1DArray { most_detailed_mip, .. }
            | ViewDimension::Texture2D { most_detailed_mip, .. }
            | ViewDimension::Texture2DArray { most_detailed_mip, .. }
            | ViewDimension::Texture3D { most_detailed_mip, .. }
            | ViewDimension::TextureCube { most_detailed_mip, .. }
            | ViewDimension::TextureCubeArray { most_detailed_mip, .. } => most_detailed_mip,
        }
    }

    /// 视图覆盖的数组层 `(first, count)`
    pub fn array_slices(&self) -> (u32, u32) {
        match *self {
            ViewDimension::Texture1DArray { first_array_slice, array_size, .. }
            | ViewDimension::Texture2DArray { first_array_slice, array_size, .. }
            | ViewDimension::Texture2DMsArray { first_array_slice, array_size } => {
                (first_array_slice, array_size)
            }
            ViewDimension::TextureCube { .. } => (0, 6),
            ViewDimension::TextureCubeArray { first_2d_array_face, num_cubes, .. } => {
                (first_2d_array_face, num_cubes * 6)
            }
            _ => (0, 1),
        }
    }
}

/// 采样器过滤模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

/// 纹理寻址模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// 采样器描述
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: u32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: [f32; 4],
    pub name: Option<String>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            max_anisotropy: 1,
            min_lod: 0.0,
            max_lod: f32::MAX,
            border_color: [0.0; 4],
            name: None,
        }
    }
}

impl SamplerDescriptor {
    pub fn anisotropic(max_anisotropy: u32) -> Self {
        Self {
            filter: FilterMode::Anisotropic,
            max_anisotropy,
            ..Self::default()
        }
    }

    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.max_anisotropy) {
            return Err(view_error(format!(
                "Sampler max anisotropy {} must be within 1..=16",
                self.max_anisotropy
            )));
        }
        if self.min_lod > self.max_lod {
            return Err(view_error("Sampler min LOD exceeds max LOD".to_string()));
        }
        Ok(())
    }
}

/// 写入描述符槽位的解析后视图
#[derive(Debug, Clone, PartialEq)]
pub enum NativeViewDescriptor {
    ConstantBuffer {
        resource: ResourceId,
        offset: u64,
        size: u64,
    },
    ShaderResource {
        resource: ResourceId,
        /// 原始/结构化缓冲区为 None
        format: Option<TextureFormat>,
        dimension: ViewDimension,
    },
    UnorderedAccess {
        resource: ResourceId,
        format: Option<TextureFormat>,
        dimension: ViewDimension,
    },
    RenderTarget {
        resource: ResourceId,
        format: TextureFormat,
        dimension: ViewDimension,
    },
    DepthStencil {
        resource: ResourceId,
        format: TextureFormat,
        dimension: ViewDimension,
    },
    AccelerationStructure {
        resource: ResourceId,
    },
    Sampler(SamplerDescriptor),
}

impl NativeViewDescriptor {
    /// 视图引用的资源（采样器没有）
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            NativeViewDescriptor::ConstantBuffer { resource, .. }
            | NativeViewDescriptor::ShaderResource { resource, .. }
            | NativeViewDescriptor::UnorderedAccess { resource, .. }
            | NativeViewDescriptor::RenderTarget { resource, .. }
            | NativeViewDescriptor::DepthStencil { resource, .. }
            | NativeViewDescriptor::AccelerationStructure { resource } => Some(*resource),
            NativeViewDescriptor::Sampler(_) => None,
        }
    }

    pub fn dimension(&self) -> Option<ViewDimension> {
        match self {
            NativeViewDescriptor::ShaderResource { dimension, .. }
            | NativeViewDescriptor::UnorderedAccess { dimension, .. }
            | NativeViewDescriptor::RenderTarget { dimension, .. }
            | NativeViewDescriptor::DepthStencil { dimension, .. } => Some(*dimension),
            _ => None,
        }
    }
}

fn view_error(msg: String) -> DistHalError {
    GraphicsError::ViewCreation(msg).into()
}

/// 将视图描述解析为原生视图
///
/// 先按视图类型分派，纹理视图再按资源维度分派。
pub(crate) fn resolve_view(
    resource: &GpuResource,
    desc: &ViewDescriptor,
    caps: BackendCapabilities,
) -> Result<NativeViewDescriptor> {
    match desc.view_type {
        ViewType::ConstantBuffer => resolve_constant_buffer(resource, desc),
        ViewType::Buffer
        | ViewType::StructuredBuffer
        | ViewType::RWBuffer
        | ViewType::RWStructuredBuffer => resolve_buffer(resource, desc),
        ViewType::Texture => {
            let texture = require_texture(resource, desc.view_type)?;
            resolve_shader_resource(resource.id(), texture, desc)
        }
        ViewType::RWTexture => {
            let texture = require_texture(resource, desc.view_type)?;
            resolve_unordered_access(resource.id(), texture, desc)
        }
        ViewType::RenderTarget => {
            let texture = require_texture(resource, desc.view_type)?;
            resolve_render_target(resource.id(), texture, desc)
        }
        ViewType::DepthStencil => {
            let texture = require_texture(resource, desc.view_type)?;
            resolve_depth_stencil(resource.id(), texture, desc)
        }
        ViewType::AccelerationStructure => resolve_acceleration_structure(resource, caps),
    }
}

fn require_buffer(resource: &GpuResource, view_type: ViewType) -> Result<&BufferDescriptor> {
    resource.as_buffer().ok_or_else(|| {
        view_error(format!(
            "{} views are unsupported for texture '{}'",
            view_type.name(),
            resource.name()
        ))
    })
}

fn require_texture(resource: &GpuResource, view_type: ViewType) -> Result<&TextureDescriptor> {
    resource.as_texture().ok_or_else(|| {
        view_error(format!(
            "{} views are unsupported for buffer '{}'",
            view_type.name(),
            resource.name()
        ))
    })
}

fn resolve_constant_buffer(resource: &GpuResource, desc: &ViewDescriptor) -> Result<NativeViewDescriptor> {
    let buffer = require_buffer(resource, desc.view_type)?;
    let capacity = buffer.aligned_size();
    let offset = desc.offset;
    let size = desc.size.unwrap_or_else(|| capacity.saturating_sub(offset));

    if offset % CONSTANT_BUFFER_ALIGNMENT != 0 {
        return Err(view_error(format!(
            "Constant buffer view offset {} is not a multiple of {} bytes",
            offset, CONSTANT_BUFFER_ALIGNMENT
        )));
    }
    if size == 0 || size % CONSTANT_BUFFER_ALIGNMENT != 0 {
        return Err(view_error(format!(
            "Constant buffer view size {} is not a multiple of {} bytes",
            size, CONSTANT_BUFFER_ALIGNMENT
        )));
    }
    if range_exceeds(offset, size, capacity) {
        return Err(view_error(format!(
            "Constant buffer view of {} bytes at {} exceeds buffer '{}' ({} bytes)",
            size,
            offset,
            resource.name(),
            capacity
        )));
    }

    Ok(NativeViewDescriptor::ConstantBuffer {
        resource: resource.id(),
        offset,
        size,
    })
}

fn resolve_buffer(resource: &GpuResource, desc: &ViewDescriptor) -> Result<NativeViewDescriptor> {
    let buffer = require_buffer(resource, desc.view_type)?;
    let writable = matches!(desc.view_type, ViewType::RWBuffer | ViewType::RWStructuredBuffer);

    let (stride, format) = match desc.view_type {
        ViewType::Buffer | ViewType::RWBuffer => {
            let format = desc
                .format
                .ok_or_else(|| view_error("Typed buffer views require a format".to_string()))?;
            if format.is_depth() {
                return Err(view_error(format!("{:?} is not a valid buffer format", format)));
            }
            (format.bytes_per_texel(), Some(format))
        }
        _ => {
            if desc.structure_stride == 0 {
                return Err(view_error("Structured buffer views require a stride".to_string()));
            }
            (desc.structure_stride, None)
        }
    };

    if writable && buffer.usage != BufferUsageType::Storage {
        return Err(view_error(format!(
            "{} views require a storage buffer, '{}' is {:?}",
            desc.view_type.name(),
            resource.name(),
            buffer.usage
        )));
    }

    let total = buffer.aligned_size() / stride as u64;
    let first = desc.first_element;
    if first >= total {
        return Err(view_error(format!(
            "First element {} is out of range for '{}' ({} elements)",
            first,
            resource.name(),
            total
        )));
    }
    let count = desc.num_elements.map(u64::from).unwrap_or(total - first);
    if count == 0 || range_exceeds(first, count, total) {
        return Err(view_error(format!(
            "{} elements starting at {} exceed '{}' ({} elements)",
            count,
            first,
            resource.name(),
            total
        )));
    }
    let num_elements = u32::try_from(count)
        .map_err(|_| view_error(format!("Element count {} is too large", count)))?;

    let dimension = ViewDimension::Buffer {
        first_element: first,
        num_elements,
        structure_stride: stride,
    };
    Ok(if writable {
        NativeViewDescriptor::UnorderedAccess {
            resource: resource.id(),
            format,
            dimension,
        }
    } else {
        NativeViewDescriptor::ShaderResource {
            resource: resource.id(),
            format,
            dimension,
        }
    })
}

fn mip_range(desc: &ViewDescriptor, texture: &TextureDescriptor) -> Result<(u32, u32)> {
    let most_detailed = desc.mip_slice;
    if most_detailed >= texture.mip_levels {
        return Err(view_error(format!(
            "Mip slice {} is out of range ({} levels)",
            most_detailed, texture.mip_levels
        )));
    }
    let levels = desc.mip_levels.unwrap_or(texture.mip_levels - most_detailed);
    if levels == 0 || range_exceeds(most_detailed.into(), levels.into(), texture.mip_levels.into()) {
        return Err(view_error(format!(
            "{} mip levels starting at {} are out of range ({} levels)",
            levels,
            most_detailed,
            texture.mip_levels
        )));
    }
    Ok((most_detailed, levels))
}

/// 校验 `[first, first + size)` 落在 `count` 之内，未指定大小时取到末尾
fn slice_range(desc: &ViewDescriptor, count: u32, what: &str) -> Result<(u32, u32)> {
    let first = desc.first_array_slice;
    if first >= count {
        return Err(view_error(format!(
            "First {} {} is out of range ({} available)",
            what, first, count
        )));
    }
    let size = desc.array_size.unwrap_or(count - first);
    if size == 0 || range_exceeds(first.into(), size.into(), count.into()) {
        return Err(view_error(format!(
            "{} range of {} starting at {} is out of range ({} available)",
            what,
            size,
            first,
            count
        )));
    }
    Ok((first, size))
}

fn array_range(desc: &ViewDescriptor, texture: &TextureDescriptor) -> Result<(u32, u32)> {
    slice_range(desc, texture.array_layers(), "array slice")
}

fn w_range(desc: &ViewDescriptor, texture: &TextureDescriptor) -> Result<(u32, u32)> {
    let (_, _, depth) = texture.mip_extent(desc.mip_slice);
    slice_range(desc, depth, "W slice")
}

fn check_plane(desc: &ViewDescriptor, texture: &TextureDescriptor) -> Result<()> {
    if desc.plane_slice >= texture.format.plane_count() {
        return Err(view_error(format!(
            "Plane slice {} is out of range for {:?}",
            desc.plane_slice, texture.format
        )));
    }
    Ok(())
}

/// 单个 mip 的可写视图维度（UAV / RTV / DSV 共用），立方体视为面的 2D 数组
fn single_mip_dimension(desc: &ViewDescriptor, texture: &TextureDescriptor) -> Result<ViewDimension> {
    let mip = desc.mip_slice;
    if mip >= texture.mip_levels {
        return Err(view_error(format!(
            "Mip slice {} is out of range ({} levels)",
            mip, texture.mip_levels
        )));
    }

    Ok(match texture.dimension {
        TextureDimension::Texture1D => ViewDimension::Texture1D {
            most_detailed_mip: mip,
            mip_levels: 1,
        },
        TextureDimension::Texture1DArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture1DArray {
                most_detailed_mip: mip,
                mip_levels: 1,
                first_array_slice,
                array_size,
            }
        }
        TextureDimension::Texture2D => ViewDimension::Texture2D {
            most_detailed_mip: mip,
            mip_levels: 1,
            plane_slice: desc.plane_slice,
        },
        TextureDimension::Texture2DArray
        | TextureDimension::TextureCube
        | TextureDimension::TextureCubeArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture2DArray {
                most_detailed_mip: mip,
                mip_levels: 1,
                first_array_slice,
                array_size,
                plane_slice: desc.plane_slice,
            }
        }
        TextureDimension::Texture2DMs => ViewDimension::Texture2DMs,
        TextureDimension::Texture2DMsArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture2DMsArray {
                first_array_slice,
                array_size,
            }
        }
        TextureDimension::Texture3D => {
            let (first_w_slice, w_size) = w_range(desc, texture)?;
            ViewDimension::Texture3D {
                most_detailed_mip: mip,
                mip_levels: 1,
                first_w_slice,
                w_size,
            }
        }
    })
}

fn resolve_shader_resource(
    resource: ResourceId,
    texture: &TextureDescriptor,
    desc: &ViewDescriptor,
) -> Result<NativeViewDescriptor> {
    check_plane(desc, texture)?;
    let format = match desc.format {
        Some(format) => format,
        None => texture.format.shader_read_format(desc.plane_slice).ok_or_else(|| {
            view_error(format!(
                "No shader readable format for {:?} plane {}",
                texture.format, desc.plane_slice
            ))
        })?,
    };
    if format.is_depth() {
        return Err(view_error(format!(
            "{:?} cannot be read by shaders directly",
            format
        )));
    }

    let (most_detailed_mip, mip_levels) = mip_range(desc, texture)?;
    let dimension = match texture.dimension {
        TextureDimension::Texture1D => ViewDimension::Texture1D {
            most_detailed_mip,
            mip_levels,
        },
        TextureDimension::Texture1DArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture1DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
            }
        }
        TextureDimension::Texture2D => ViewDimension::Texture2D {
            most_detailed_mip,
            mip_levels,
            plane_slice: desc.plane_slice,
        },
        TextureDimension::Texture2DArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture2DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
                plane_slice: desc.plane_slice,
            }
        }
        TextureDimension::Texture2DMs => ViewDimension::Texture2DMs,
        TextureDimension::Texture2DMsArray => {
            let (first_array_slice, array_size) = array_range(desc, texture)?;
            ViewDimension::Texture2DMsArray {
                first_array_slice,
                array_size,
            }
        }
        TextureDimension::Texture3D => {
            let (_, _, depth) = texture.mip_extent(most_detailed_mip);
            ViewDimension::Texture3D {
                most_detailed_mip,
                mip_levels,
                first_w_slice: 0,
                w_size: depth,
            }
        }
        TextureDimension::TextureCube => ViewDimension::TextureCube {
            most_detailed_mip,
            mip_levels,
        },
        TextureDimension::TextureCubeArray => {
            let (first, faces) = array_range(desc, texture)?;
            if first % 6 != 0 || faces % 6 != 0 {
                return Err(view_error(format!(
                    "Cube array views must cover whole cubes (faces [{}, {}))",
                    first,
                    first + faces
                )));
            }
            ViewDimension::TextureCubeArray {
                most_detailed_mip,
                mip_levels,
                first_2d_array_face: first,
                num_cubes: faces / 6,
            }
        }
    };

    Ok(NativeViewDescriptor::ShaderResource {
        resource,
        format: Some(format),
        dimension,
    })
}

fn resolve_unordered_access(
    resource: ResourceId,
    texture: &TextureDescriptor,
    desc: &ViewDescriptor,
) -> Result<NativeViewDescriptor> {
    if !texture.usage.unordered_access {
        return Err(view_error("Texture was not created with unordered access usage".to_string()));
    }
    if texture.dimension.is_multisampled() {
        return Err(view_error(format!(
            "Unordered access views are unsupported for {:?}",
            texture.dimension
        )));
    }
    check_plane(desc, texture)?;
    let format = desc.format.unwrap_or(texture.format);
    if format.is_depth() {
        return Err(view_error(format!("{:?} cannot be used for unordered access", format)));
    }

    Ok(NativeViewDescriptor::UnorderedAccess {
        resource,
        format: Some(format),
        dimension: single_mip_dimension(desc, texture)?,
    })
}

fn resolve_render_target(
    resource: ResourceId,
    texture: &TextureDescriptor,
    desc: &ViewDescriptor,
) -> Result<NativeViewDescriptor> {
    if !texture.usage.render_target {
        return Err(view_error("Texture was not created with render target usage".to_string()));
    }
    let format = desc.format.unwrap_or(texture.format);
    if format.is_depth() {
        return Err(view_error(format!("{:?} cannot be used as a render target", format)));
    }

    Ok(NativeViewDescriptor::RenderTarget {
        resource,
        format,
        dimension: single_mip_dimension(desc, texture)?,
    })
}

fn resolve_depth_stencil(
    resource: ResourceId,
    texture: &TextureDescriptor,
    desc: &ViewDescriptor,
) -> Result<NativeViewDescriptor> {
    if !texture.usage.depth_stencil {
        return Err(view_error("Texture was not created with depth stencil usage".to_string()));
    }
    if texture.dimension == TextureDimension::Texture3D {
        return Err(view_error("Depth stencil views are unsupported for Texture3D".to_string()));
    }
    let format = desc.format.unwrap_or(texture.format);
    if !format.is_depth() {
        return Err(view_error(format!("{:?} is not a depth format", format)));
    }

    Ok(NativeViewDescriptor::DepthStencil {
        resource,
        format,
        dimension: single_mip_dimension(desc, texture)?,
    })
}

fn resolve_acceleration_structure(
    resource: &GpuResource,
    caps: BackendCapabilities,
) -> Result<NativeViewDescriptor> {
    if !caps.ray_tracing {
        return Err(GraphicsError::UnsupportedFeature(
            "Acceleration structure views require ray tracing support".to_string(),
        )
        .into());
    }
    let buffer = require_buffer(resource, ViewType::AccelerationStructure)?;
    if buffer.usage != BufferUsageType::AccelerationStructure
        || resource.current_state() != ResourceState::AccelerationStructure
    {
        return Err(view_error(format!(
            "'{}' is not an acceleration structure buffer",
            resource.name()
        )));
    }
    Ok(NativeViewDescriptor::AccelerationStructure { resource: resource.id() })
}

/// 资源视图
///
/// 持有一个描述符槽位、被引用资源的 ID（不拥有资源）以及来源堆。
/// 销毁时归还槽位。
pub struct ResourceView {
    view_type: Option<ViewType>,
    category: DescriptorHeapCategory,
    descriptor: NativeViewDescriptor,
    heap: SharedDescriptorHeap,
    index: u32,
    handle: DescriptorHandle,
    name: Option<String>,
}

impl ResourceView {
    /// 从堆中分配槽位并写入视图描述
    pub(crate) fn new(
        heap: SharedDescriptorHeap,
        category: DescriptorHeapCategory,
        view_type: Option<ViewType>,
        descriptor: NativeViewDescriptor,
        name: Option<String>,
    ) -> Result<Self> {
        if heap.heap_type() != category.heap_type() {
            return Err(view_error(format!(
                "{} views cannot live in a {} heap",
                category.name(),
                heap.heap_type().name()
            )));
        }

        let (index, handle) = {
            let mut guard = heap.lock();
            let index = guard.allocate()?;
            if let Err(e) = guard.write(index, &descriptor) {
                guard.free(index)?;
                return Err(e);
            }
            (index, guard.handle(index))
        };

        debug!(
            view = name.as_deref().unwrap_or(category.name()),
            category = category.name(),
            slot = index,
            "Resource view created"
        );

        Ok(Self {
            view_type,
            category,
            descriptor,
            heap,
            index,
            handle,
            name,
        })
    }

    /// 视图类型（采样器为 None）
    pub fn view_type(&self) -> Option<ViewType> {
        self.view_type
    }

    pub fn category(&self) -> DescriptorHeapCategory {
        self.category
    }

    /// 槽位索引
    pub fn index(&self) -> u32 {
        self.index
    }

    /// 被引用的资源
    pub fn resource(&self) -> Option<ResourceId> {
        self.descriptor.resource()
    }

    pub fn descriptor(&self) -> &NativeViewDescriptor {
        &self.descriptor
    }

    /// 来源堆
    pub fn heap(&self) -> &SharedDescriptorHeap {
        &self.heap
    }

    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.handle.cpu
    }

    pub fn gpu_handle(&self) -> Option<GpuDescriptorHandle> {
        self.handle.gpu
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Drop for ResourceView {
    fn drop(&mut self) {
        if let Err(e) = self.heap.lock().free(self.index) {
            error!(slot = self.index, "Failed to release view slot: {}", e);
        }
    }
}

impl std::fmt::Debug for ResourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceView")
            .field("category", &self.category)
            .field("index", &self.index)
            .field("descriptor", &self.descriptor)
            .field("name", &self.name)
            .finish()
    }
}
