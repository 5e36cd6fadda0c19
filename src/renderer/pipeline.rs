//! 管线状态与输入装配
//!
//! 本层不编译着色器，只接收已经编译好的字节码（[`ShaderBytecode`] 对其内容不透明）。
//! 顶点/索引数据同样由调用方预先填充到缓冲区中。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{GraphicsError, Result};
use super::resource::{ResourceId, TextureFormat};

/// 同时绑定的渲染目标数量上限
pub const MAX_RENDER_TARGETS: usize = 8;

/// 已编译的着色器字节码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode(Vec<u8>);

impl ShaderBytecode {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// 管线种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// 管线状态描述
#[derive(Debug, Clone)]
pub enum PipelineStateDescriptor {
    Graphics {
        vertex_shader: ShaderBytecode,
        pixel_shader: Option<ShaderBytecode>,
        /// 顶点步长（字节）
        vertex_stride: u32,
        topology: PrimitiveTopology,
        render_target_formats: Vec<TextureFormat>,
        depth_format: Option<TextureFormat>,
        name: Option<String>,
    },
    Compute {
        compute_shader: ShaderBytecode,
        name: Option<String>,
    },
}

impl PipelineStateDescriptor {
    pub fn kind(&self) -> PipelineKind {
        match self {
            PipelineStateDescriptor::Graphics { .. } => PipelineKind::Graphics,
            PipelineStateDescriptor::Compute { .. } => PipelineKind::Compute,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            PipelineStateDescriptor::Graphics { name, .. }
            | PipelineStateDescriptor::Compute { name, .. } => name.as_deref(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> {
            Err(GraphicsError::ResourceCreation(msg.to_string()).into())
        };

        match self {
            PipelineStateDescriptor::Graphics {
                vertex_shader,
                render_target_formats,
                depth_format,
                ..
            } => {
                if vertex_shader.is_empty() {
                    return fail("Graphics pipeline requires vertex shader bytecode");
                }
                if render_target_formats.len() > MAX_RENDER_TARGETS {
                    return fail("Too many render target formats");
                }
                if render_target_formats.iter().any(TextureFormat::is_depth) {
                    return fail("Render target formats cannot be depth formats");
                }
                if matches!(depth_format, Some(format) if !format.is_depth()) {
                    return fail("Depth format must be a depth format");
                }
                Ok(())
            }
            PipelineStateDescriptor::Compute { compute_shader, .. } => {
                if compute_shader.is_empty() {
                    return fail("Compute pipeline requires compute shader bytecode");
                }
                Ok(())
            }
        }
    }
}

/// 管线 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// 管线状态对象
#[derive(Debug)]
pub struct PipelineState {
    id: PipelineId,
    desc: PipelineStateDescriptor,
}

impl PipelineState {
    pub(crate) fn new(desc: PipelineStateDescriptor) -> Self {
        Self { id: PipelineId::next(), desc }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.desc.kind()
    }

    pub fn descriptor(&self) -> &PipelineStateDescriptor {
        &self.desc
    }

    pub fn name(&self) -> &str {
        self.desc.name().unwrap_or("<unnamed pipeline>")
    }
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 顶点缓冲区视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub buffer: ResourceId,
    pub offset: u64,
    pub size: u32,
    pub stride: u32,
}

/// 索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// 索引缓冲区视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub buffer: ResourceId,
    pub offset: u64,
    pub size: u32,
    pub format: IndexFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graphics(rt: Vec<TextureFormat>, depth: Option<TextureFormat>) -> PipelineStateDescriptor {
        PipelineStateDescriptor::Graphics {
            vertex_shader: ShaderBytecode::new(vec![0x44, 0x58, 0x42, 0x43]),
            pixel_shader: None,
            vertex_stride: 20,
            topology: PrimitiveTopology::TriangleList,
            render_target_formats: rt,
            depth_format: depth,
            name: Some("Opaque".into()),
        }
    }

    #[test]
    fn test_pipeline_validation() {
        assert!(graphics(vec![TextureFormat::Rgba8Unorm], Some(TextureFormat::Depth32Float))
            .validate()
            .is_ok());
        assert!(graphics(vec![TextureFormat::Depth32Float], None).validate().is_err());
        assert!(graphics(vec![], Some(TextureFormat::Rgba8Unorm)).validate().is_err());

        let compute = PipelineStateDescriptor::Compute {
            compute_shader: ShaderBytecode::new(Vec::new()),
            name: None,
        };
        assert!(compute.validate().is_err());
    }

    #[test]
    fn test_pipeline_ids_are_unique() {
        let a = PipelineState::new(graphics(vec![], None));
        let b = PipelineState::new(graphics(vec![], None));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), PipelineKind::Graphics);
        assert_eq!(a.name(), "Opaque");
    }

    #[test]
    fn test_index_format_size() {
        assert_eq!(IndexFormat::Uint16.size(), 2);
        assert_eq!(Viewport::full(800, 600).width, 800.0);
        assert_eq!(ScissorRect::full(800, 600).bottom, 600);
    }
}
