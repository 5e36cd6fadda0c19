//! DistHal 演示程序
//!
//! 在软件后端上创建设备，按多缓冲帧资源录制并提交若干帧，
//! 最后输出执行统计与验证层结果。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 使用手动渲染通道路径、两帧在途
//! cargo run -- --manual-pass --frames 2
//! ```

use std::sync::Arc;

use anyhow::{bail, Context};
use bytemuck::{Pod, Zeroable};

use dist_hal::core::{log, Config};
use dist_hal::gfx::{SoftwareBackend, SoftwareBackendConfig};
use dist_hal::renderer::pipeline::{ShaderBytecode, PrimitiveTopology, ScissorRect, VertexBufferView, Viewport};
use dist_hal::renderer::render_pass::{ColorAttachment, DepthStencilAttachment, RenderPass};
use dist_hal::renderer::resource::UploadBuffer;
use dist_hal::renderer::{
    BufferDescriptor, BufferUsageType, CommandListType, Device, MemoryType, PipelineStateDescriptor,
    TextureDescriptor, TextureFormat, ViewDescriptor,
};
use dist_hal::{app_info, app_warn};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAMES_TO_RENDER: usize = 6;
const CLEAR_COLOR: [f32; 4] = [0.1, 0.2, 0.4, 1.0];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectConstants {
    offset: [f32; 4],
    frame: u32,
    _padding: [u32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex { position: [0.0, 0.5, 0.0], color: [1.0, 0.0, 0.0, 1.0] },
    Vertex { position: [0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0, 1.0] },
    Vertex { position: [-0.5, -0.5, 0.0], color: [0.0, 0.0, 1.0, 1.0] },
];

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("Invalid configuration")?;

    // 2. 初始化日志系统
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)?;
    app_info!(version = env!("CARGO_PKG_VERSION"), "DistHal demo starting");

    // 3. 创建设备
    let backend = Arc::new(SoftwareBackend::new(SoftwareBackendConfig::from_config(&config.device)));
    let mut device = Device::from_config(&config, backend.clone()).context("Failed to create device")?;
    let frames = config.frames.frames_in_flight as usize;

    // 4. 后备缓冲、深度缓冲与帧缓冲
    let back_buffers = (0..frames)
        .map(|i| {
            device.create_texture(
                TextureDescriptor::back_buffer(WIDTH, HEIGHT, TextureFormat::Bgra8Unorm)
                    .with_name(format!("Back Buffer {}", i)),
            )
        })
        .collect::<dist_hal::core::Result<Vec<_>>>()?;
    let depth = device.create_texture(
        TextureDescriptor::depth_buffer(WIDTH, HEIGHT, TextureFormat::Depth24PlusStencil8).with_name("Depth Buffer"),
    )?;
    let frame_buffers = back_buffers
        .iter()
        .enumerate()
        .map(|(i, &bb)| device.create_frame_buffer(&[bb], Some(depth), Some(&format!("Frame Buffer {}", i))))
        .collect::<dist_hal::core::Result<Vec<_>>>()?;

    let pass = RenderPass::new(
        vec![ColorAttachment::clear(TextureFormat::Bgra8Unorm, CLEAR_COLOR)],
        Some(DepthStencilAttachment::clear(TextureFormat::Depth24PlusStencil8, 1.0)),
    )?
    .with_name("Main Pass");

    // 5. 顶点缓冲与每帧常量缓冲（上传堆）
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
    let vertex_buffer = device.create_buffer(
        BufferDescriptor::new(vertex_bytes.len() as u64, BufferUsageType::Vertex, MemoryType::HostVisible)
            .with_name("Triangle Vertices"),
    )?;
    device.write_buffer(vertex_buffer, 0, vertex_bytes)?;

    let constants_layout = UploadBuffer::<ObjectConstants>::new(frames, BufferUsageType::Constant);
    let constants = device.create_buffer(constants_layout.descriptor(Some("Object Constants".to_string())))?;
    let constant_views = (0..frames)
        .map(|i| {
            let offset = constants_layout.element_offset(i).unwrap_or_default();
            device.create_view(
                constants,
                &ViewDescriptor::constant_buffer(offset, constants_layout.element_size()),
                None,
            )
        })
        .collect::<dist_hal::core::Result<Vec<_>>>()?;

    // 软件后端不编译着色器，字节码只需非空
    let pipeline = device.create_pipeline_state(PipelineStateDescriptor::Graphics {
        vertex_shader: ShaderBytecode::new(b"DXBC".to_vec()),
        pixel_shader: Some(ShaderBytecode::new(b"DXBC".to_vec())),
        vertex_stride: std::mem::size_of::<Vertex>() as u32,
        topology: PrimitiveTopology::TriangleList,
        render_target_formats: vec![TextureFormat::Bgra8Unorm],
        depth_format: Some(TextureFormat::Depth24PlusStencil8),
        name: Some("Triangle Pipeline".to_string()),
    })?;

    // 6. 队列、Fence 与帧资源
    let queue = device.create_command_queue(CommandListType::Graphics, Some("Direct Queue"))?;
    let fence = device.create_fence(0, Some("Frame Fence"));
    let mut pool = device.create_frame_resources(CommandListType::Graphics, frames)?;

    app_info!(
        strategy = device.render_pass_strategy(),
        frames_in_flight = frames,
        "Entering frame loop..."
    );

    // 7. 主循环
    for frame in 0..FRAMES_TO_RENDER {
        let index = pool.current_index();
        let offset = constants_layout.element_offset(index).unwrap_or_default();
        device.write_value(
            constants,
            offset,
            &ObjectConstants {
                offset: [frame as f32 * 0.05, 0.0, 0.0, 0.0],
                frame: frame as u32,
                _padding: [0; 3],
            },
        )?;

        let commands = pool.begin_frame(&fence)?;
        commands.begin_event(format!("Frame {}", frame));
        commands.begin_render_pass(device.resources(), &pass, &frame_buffers[index])?;
        commands.set_pipeline_state(&pipeline);
        commands.set_viewport(Viewport::full(WIDTH, HEIGHT));
        commands.set_scissor_rect(ScissorRect::full(WIDTH, HEIGHT));
        commands.set_descriptor_heaps(&device.default_heaps().shader_visible());
        if let Some(table) = constant_views[index].gpu_handle() {
            commands.set_graphics_root_descriptor_table(0, table);
        }
        commands.set_vertex_buffer(
            0,
            VertexBufferView {
                buffer: vertex_buffer,
                offset: 0,
                size: vertex_bytes.len() as u32,
                stride: std::mem::size_of::<Vertex>() as u32,
            },
        );
        commands.draw(3, 1, 0, 0);
        commands.end_render_pass(device.resources())?;
        commands.end_event();

        let fence_value = pool.end_frame(&queue, &fence)?;
        app_info!(frame, back_buffer = index, fence_value, "Frame submitted");
    }

    // 8. 等待 GPU 空闲并输出结果
    queue.flush(&fence)?;
    let stats = backend.stats();
    app_info!(
        streams = stats.streams,
        barriers = stats.barriers,
        clears = stats.clears,
        draws = stats.draws,
        "GPU work complete"
    );

    let expected = TextureFormat::Bgra8Unorm.encode_color(CLEAR_COLOR).unwrap_or_default();
    let texel = backend.snapshot(back_buffers[0]).map(|bytes| bytes[..4].to_vec());
    if texel.as_deref() != Some(expected.as_slice()) {
        app_warn!(texel = ?texel, expected = ?expected, "Back buffer does not hold the clear color");
    }

    let messages = backend.validation_messages();
    for message in &messages {
        app_warn!("{}", message);
    }
    if backend.validation_errors() > 0 {
        bail!("{} validation errors reported", backend.validation_errors());
    }

    drop(frame_buffers);
    drop(constant_views);
    for id in back_buffers.into_iter().chain([depth, vertex_buffer, constants]) {
        device.destroy_resource(id)?;
    }
    app_info!("Shutting down...");
    Ok(())
}
