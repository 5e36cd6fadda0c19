//! 渲染通道与帧缓冲
//!
//! [`RenderPass`] 声明颜色/深度附件的加载、存储行为和清除值，创建一次后
//! 跨帧复用，除清除值外不可修改。[`FrameBuffer`] 持有实际的渲染目标视图。
//!
//! # 执行策略
//!
//! 后端能力决定使用哪一种策略，设备创建时选择一次，之后不再重新判断：
//!
//! - [`NativeRenderPass`]：把每个附件的 load/clear/store 直接交给驱动
//! - [`ManualRenderPass`]：直接绑定 RTV/DSV，为 load 为 Clear 的附件显式发出清除命令

use tracing::trace;

use crate::core::error::{contract, GraphicsError, Result};
use super::descriptor::DescriptorHeapCategory;
use super::pipeline::MAX_RENDER_TARGETS;
use super::resource::{ResourceArena, ResourceId, TextureFormat};
use super::stream::{ClearFlags, Command, CommandStream, RenderPassColorTarget, RenderPassDepthTarget};
use super::view::{NativeViewDescriptor, ResourceView};

/// 附件加载操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    /// 保留原有内容
    Load,
    /// 使用清除值清除
    Clear,
    /// 内容未定义
    DontCare,
}

/// 附件存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// 写回内容
    Store,
    /// 内容在通道结束后未定义
    DontCare,
}

/// 颜色附件
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    /// 清除后存储
    pub fn clear(format: TextureFormat, clear_color: [f32; 4]) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_color,
        }
    }

    /// 加载后存储
    pub fn load(format: TextureFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_color: [0.0; 4],
        }
    }
}

/// 深度模板附件
#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilAttachment {
    pub format: TextureFormat,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

impl DepthStencilAttachment {
    /// 清除深度与模板，深度存储、模板丢弃
    pub fn clear(format: TextureFormat, clear_depth: f32) -> Self {
        Self {
            format,
            depth_load_op: LoadOp::Clear,
            depth_store_op: StoreOp::Store,
            stencil_load_op: if format.has_stencil() { LoadOp::Clear } else { LoadOp::DontCare },
            stencil_store_op: StoreOp::DontCare,
            clear_depth,
            clear_stencil: 0,
        }
    }
}

/// 渲染通道
#[derive(Debug, Clone)]
pub struct RenderPass {
    colors: Vec<ColorAttachment>,
    depth: Option<DepthStencilAttachment>,
    name: Option<String>,
}

impl RenderPass {
    /// 创建渲染通道
    ///
    /// # 参数
    ///
    /// * `colors` - 有序的颜色附件（最多 8 个）
    /// * `depth` - 可选的深度模板附件
    pub fn new(colors: Vec<ColorAttachment>, depth: Option<DepthStencilAttachment>) -> Result<Self> {
        if colors.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::ResourceCreation(format!(
                "Render pass has {} color attachments, at most {} are supported",
                colors.len(),
                MAX_RENDER_TARGETS
            ))
            .into());
        }
        if colors.is_empty() && depth.is_none() {
            return Err(GraphicsError::ResourceCreation(
                "Render pass requires at least one attachment".to_string(),
            )
            .into());
        }
        if let Some(color) = colors.iter().find(|c| c.format.is_depth()) {
            return Err(GraphicsError::ResourceCreation(format!(
                "{:?} is not a color format",
                color.format
            ))
            .into());
        }
        if let Some(depth) = &depth {
            if !depth.format.is_depth() {
                return Err(GraphicsError::ResourceCreation(format!(
                    "{:?} is not a depth format",
                    depth.format
                ))
                .into());
            }
        }
        Ok(Self { colors, depth, name: None })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed pass>")
    }

    pub fn color_attachments(&self) -> &[ColorAttachment] {
        &self.colors
    }

    pub fn depth_attachment(&self) -> Option<&DepthStencilAttachment> {
        self.depth.as_ref()
    }

    /// 检查帧缓冲是否与该通道兼容
    ///
    /// 颜色附件数量必须等于帧缓冲的渲染目标数量；只有帧缓冲提供了
    /// 深度模板目标时才能使用深度附件。
    pub fn compatible(&self, frame_buffer: &FrameBuffer) -> bool {
        self.colors.len() == frame_buffer.color_targets().len()
            && (self.depth.is_none() || frame_buffer.depth_target().is_some())
    }

    /// 更新颜色附件的清除值
    pub fn set_clear_color(&mut self, index: usize, color: [f32; 4]) -> Result<()> {
        let count = self.colors.len();
        let attachment = self
            .colors
            .get_mut(index)
            .ok_or_else(|| contract(format!("Color attachment {} out of range ({})", index, count)))?;
        attachment.clear_color = color;
        Ok(())
    }

    /// 更新深度附件的清除值
    pub fn set_depth_clear(&mut self, depth: f32, stencil: u8) -> Result<()> {
        let attachment = self
            .depth
            .as_mut()
            .ok_or_else(|| contract("Render pass has no depth attachment"))?;
        attachment.clear_depth = depth;
        attachment.clear_stencil = stencil;
        Ok(())
    }
}

/// 帧缓冲
///
/// 拥有每个颜色目标的 RTV 与可选的 DSV，销毁时归还槽位。
/// 宽高取自第一个附件。
#[derive(Debug)]
pub struct FrameBuffer {
    colors: Vec<ResourceView>,
    depth: Option<ResourceView>,
    width: u32,
    height: u32,
    name: Option<String>,
}

impl FrameBuffer {
    /// 从已创建的视图组装帧缓冲
    pub fn new(
        resources: &ResourceArena,
        colors: Vec<ResourceView>,
        depth: Option<ResourceView>,
        name: Option<String>,
    ) -> Result<Self> {
        let mut extent = None;
        for (view, category) in colors
            .iter()
            .map(|v| (v, DescriptorHeapCategory::RenderTarget))
            .chain(depth.iter().map(|v| (v, DescriptorHeapCategory::DepthStencil)))
        {
            if view.category() != category {
                return Err(contract(format!(
                    "Frame buffer expected a {} view, got {}",
                    category.name(),
                    view.category().name()
                )));
            }
            let id = view
                .resource()
                .ok_or_else(|| contract("Frame buffer view has no resource"))?;
            let texture = resources
                .get(id)?
                .as_texture()
                .ok_or_else(|| contract("Frame buffer attachments must be textures"))?;
            let mip = view
                .descriptor()
                .dimension()
                .map(|d| d.most_detailed_mip())
                .unwrap_or(0);
            let (w, h, _) = texture.mip_extent(mip);
            match extent {
                None => extent = Some((w, h)),
                Some(size) if size != (w, h) => {
                    return Err(contract(format!(
                        "Frame buffer attachment '{}' is {}x{}, expected {}x{}",
                        texture.name.as_deref().unwrap_or("<unnamed>"),
                        w,
                        h,
                        size.0,
                        size.1
                    )));
                }
                Some(_) => {}
            }
        }

        let (width, height) = extent.ok_or_else(|| contract("Frame buffer requires at least one attachment"))?;
        Ok(Self { colors, depth, width, height, name })
    }

    pub fn color_targets(&self) -> &[ResourceView] {
        &self.colors
    }

    pub fn depth_target(&self) -> Option<&ResourceView> {
        self.depth.as_ref()
    }

    /// 颜色目标引用的资源
    pub fn color_resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.colors.iter().filter_map(ResourceView::resource)
    }

    pub fn depth_resource(&self) -> Option<ResourceId> {
        self.depth.as_ref().and_then(ResourceView::resource)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed frame buffer>")
    }
}

/// 渲染通道执行策略
pub trait RenderPassStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 在目标已转换到 RenderTarget/DepthWrite 之后开始通道
    fn begin(&self, stream: &mut CommandStream, pass: &RenderPass, frame_buffer: &FrameBuffer);

    /// 在目标恢复状态之前结束通道
    fn end(&self, stream: &mut CommandStream);
}

/// 原生渲染通道
#[derive(Debug, Default)]
pub struct NativeRenderPass;

impl RenderPassStrategy for NativeRenderPass {
    fn name(&self) -> &'static str {
        "native"
    }

    fn begin(&self, stream: &mut CommandStream, pass: &RenderPass, frame_buffer: &FrameBuffer) {
        let colors = pass
            .color_attachments()
            .iter()
            .zip(frame_buffer.color_targets())
            .map(|(attachment, view)| RenderPassColorTarget {
                view: view.cpu_handle(),
                load_op: attachment.load_op,
                store_op: attachment.store_op,
                clear_color: attachment.clear_color,
            })
            .collect();

        let depth = pass
            .depth_attachment()
            .zip(frame_buffer.depth_target())
            .map(|(attachment, view)| RenderPassDepthTarget {
                view: view.cpu_handle(),
                depth_load_op: attachment.depth_load_op,
                depth_store_op: attachment.depth_store_op,
                stencil_load_op: attachment.stencil_load_op,
                stencil_store_op: attachment.stencil_store_op,
                clear_depth: attachment.clear_depth,
                clear_stencil: attachment.clear_stencil,
            });

        trace!(pass = pass.name(), "Native render pass begin");
        stream.push(Command::BeginRenderPass { colors, depth });
    }

    fn end(&self, stream: &mut CommandStream) {
        stream.push(Command::EndRenderPass);
    }
}

/// 手动绑定 + 清除路径
#[derive(Debug, Default)]
pub struct ManualRenderPass;

impl RenderPassStrategy for ManualRenderPass {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn begin(&self, stream: &mut CommandStream, pass: &RenderPass, frame_buffer: &FrameBuffer) {
        stream.push(Command::SetRenderTargets {
            colors: frame_buffer.color_targets().iter().map(ResourceView::cpu_handle).collect(),
            depth: pass
                .depth_attachment()
                .and(frame_buffer.depth_target())
                .map(ResourceView::cpu_handle),
        });

        for (attachment, view) in pass.color_attachments().iter().zip(frame_buffer.color_targets()) {
            if attachment.load_op == LoadOp::Clear {
                stream.push(Command::ClearRenderTarget {
                    view: view.cpu_handle(),
                    color: attachment.clear_color,
                });
            }
        }

        if let Some((attachment, view)) = pass.depth_attachment().zip(frame_buffer.depth_target()) {
            let flags = ClearFlags {
                depth: attachment.depth_load_op == LoadOp::Clear,
                stencil: attachment.stencil_load_op == LoadOp::Clear
                    && matches!(view.descriptor(), NativeViewDescriptor::DepthStencil { format, .. } if format.has_stencil()),
            };
            if !flags.is_empty() {
                stream.push(Command::ClearDepthStencil {
                    view: view.cpu_handle(),
                    flags,
                    depth: attachment.clear_depth,
                    stencil: attachment.clear_stencil,
                });
            }
        }
        trace!(pass = pass.name(), "Manual render pass begin");
    }

    fn end(&self, _stream: &mut CommandStream) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pass_validation() {
        assert!(RenderPass::new(vec![], None).is_err());
        assert!(RenderPass::new(vec![ColorAttachment::load(TextureFormat::Depth32Float)], None).is_err());
        let depth_as_color = DepthStencilAttachment::clear(TextureFormat::Rgba8Unorm, 1.0);
        assert!(RenderPass::new(vec![], Some(depth_as_color)).is_err());

        let colors = vec![ColorAttachment::load(TextureFormat::Rgba8Unorm); 9];
        assert!(RenderPass::new(colors, None).is_err());
    }

    #[test]
    fn test_clear_value_updates() {
        let mut pass = RenderPass::new(
            vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, [0.0, 0.0, 0.0, 1.0])],
            Some(DepthStencilAttachment::clear(TextureFormat::Depth32Float, 1.0)),
        )
        .unwrap()
        .with_name("Main");

        pass.set_clear_color(0, [1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(pass.color_attachments()[0].clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert!(pass.set_clear_color(1, [0.0; 4]).is_err());

        pass.set_depth_clear(0.0, 3).unwrap();
        assert_eq!(pass.depth_attachment().unwrap().clear_stencil, 3);
        assert_eq!(pass.depth_attachment().unwrap().stencil_load_op, LoadOp::DontCare);
    }
}
