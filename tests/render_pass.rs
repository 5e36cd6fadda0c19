mod common;

use std::sync::Arc;

use dist_hal::gfx::SoftwareBackend;
use dist_hal::renderer::stream::Command;
use dist_hal::renderer::{
    ColorAttachment, CommandListType, DepthStencilAttachment, Device, RenderPass, ResourceBarrier, ResourceState,
    TextureDescriptor, TextureFormat,
};

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

fn clear_back_buffer(backend: &Arc<SoftwareBackend>, device: &mut Device) -> Vec<Command> {
    let back_buffer = device
        .create_texture(TextureDescriptor::back_buffer(4, 4, TextureFormat::Rgba8Unorm).with_name("Back Buffer"))
        .unwrap();
    let frame_buffer = device.create_frame_buffer(&[back_buffer], None, Some("Frame Buffer")).unwrap();
    let pass = RenderPass::new(vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED)], None).unwrap();

    let queue = device.create_command_queue(CommandListType::Graphics, Some("Direct")).unwrap();
    let fence = device.create_fence(0, None);
    let allocator = device.create_command_allocator(CommandListType::Graphics, None);
    let mut commands = device.create_command_buffer(&allocator, Some("Clear"));

    commands.begin_recording(false).unwrap();
    commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
    assert!(commands.in_render_pass());
    assert_eq!(device.resource(back_buffer).unwrap().current_state(), ResourceState::RenderTarget);
    commands.end_render_pass(device.resources()).unwrap();
    commands.end_recording().unwrap();

    queue.execute(&[&commands]).unwrap();
    queue.flush(&fence).unwrap();

    // 通道结束后恢复到 Present
    assert_eq!(device.resource(back_buffer).unwrap().current_state(), ResourceState::Present);
    assert_eq!(backend.gpu_state(back_buffer), Some(ResourceState::Present));

    let texels = backend.snapshot(back_buffer).unwrap();
    assert_eq!(texels.len(), 4 * 4 * 4);
    assert!(texels.chunks_exact(4).all(|t| t == [255, 0, 0, 255]));
    assert_eq!(backend.validation_errors(), 0, "{:?}", backend.validation_messages());

    let recorded = commands.sealed_stream().unwrap().commands().to_vec();
    assert_eq!(
        recorded.first(),
        Some(&Command::ResourceBarrier(vec![ResourceBarrier::transition(
            back_buffer,
            ResourceState::Present,
            ResourceState::RenderTarget
        )]))
    );
    assert_eq!(
        recorded.last(),
        Some(&Command::ResourceBarrier(vec![ResourceBarrier::transition(
            back_buffer,
            ResourceState::RenderTarget,
            ResourceState::Present
        )]))
    );
    recorded
}

#[test]
fn test_native_render_pass_clears_and_restores() {
    let (backend, mut device) = common::default_device();
    assert_eq!(device.render_pass_strategy(), "native");

    let recorded = clear_back_buffer(&backend, &mut device);
    assert!(recorded.iter().any(|c| matches!(c, Command::BeginRenderPass { .. })));
    assert!(recorded.iter().any(|c| matches!(c, Command::EndRenderPass)));
    assert!(!recorded.iter().any(|c| matches!(c, Command::ClearRenderTarget { .. })));
}

#[test]
fn test_manual_render_pass_clears_and_restores() {
    let (backend, mut device) = common::manual_device();
    assert_eq!(device.render_pass_strategy(), "manual");

    let recorded = clear_back_buffer(&backend, &mut device);
    assert!(recorded.iter().any(|c| matches!(c, Command::SetRenderTargets { .. })));
    assert!(recorded.iter().any(|c| matches!(c, Command::ClearRenderTarget { color, .. } if *color == RED)));
    assert!(!recorded.iter().any(|c| matches!(c, Command::BeginRenderPass { .. })));
}

#[test]
fn test_depth_attachment_is_cleared() {
    for (backend, mut device) in [common::default_device(), common::manual_device()] {
        let color = device
            .create_texture(TextureDescriptor::back_buffer(2, 2, TextureFormat::Rgba8Unorm))
            .unwrap();
        let depth = device
            .create_texture(TextureDescriptor::depth_buffer(2, 2, TextureFormat::Depth32Float))
            .unwrap();
        let frame_buffer = device.create_frame_buffer(&[color], Some(depth), None).unwrap();
        let pass = RenderPass::new(
            vec![ColorAttachment::load(TextureFormat::Rgba8Unorm)],
            Some(DepthStencilAttachment::clear(TextureFormat::Depth32Float, 0.5)),
        )
        .unwrap();

        let queue = device.create_command_queue(CommandListType::Graphics, None).unwrap();
        let fence = device.create_fence(0, None);
        let allocator = device.create_command_allocator(CommandListType::Graphics, None);
        let mut commands = device.create_command_buffer(&allocator, None);
        commands.begin_recording(false).unwrap();
        commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
        commands.end_render_pass(device.resources()).unwrap();
        commands.end_recording().unwrap();
        queue.execute(&[&commands]).unwrap();
        queue.flush(&fence).unwrap();

        let depth_bytes = backend.snapshot(depth).unwrap();
        assert!(depth_bytes.chunks_exact(4).all(|t| t == 0.5f32.to_le_bytes()));
        // 深度目标已经处于 DepthWrite，不产生转换
        assert_eq!(device.resource(depth).unwrap().current_state(), ResourceState::DepthWrite);
        // Load 的颜色目标保持原内容
        assert!(backend.snapshot(color).unwrap().iter().all(|&b| b == 0));
        assert_eq!(backend.validation_errors(), 0, "{:?}", backend.validation_messages());
    }
}

#[test]
fn test_color_only_pass_leaves_depth_target_unbound() {
    for (backend, mut device) in [common::default_device(), common::manual_device()] {
        let color = device
            .create_texture(TextureDescriptor::back_buffer(2, 2, TextureFormat::Rgba8Unorm))
            .unwrap();
        let depth = device
            .create_texture(
                TextureDescriptor::depth_buffer(2, 2, TextureFormat::Depth32Float)
                    .with_initial_state(ResourceState::Common),
            )
            .unwrap();
        let frame_buffer = device.create_frame_buffer(&[color], Some(depth), None).unwrap();
        let pass = RenderPass::new(vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED)], None).unwrap();
        assert!(pass.compatible(&frame_buffer));

        let queue = device.create_command_queue(CommandListType::Graphics, None).unwrap();
        let fence = device.create_fence(0, None);
        let allocator = device.create_command_allocator(CommandListType::Graphics, None);
        let mut commands = device.create_command_buffer(&allocator, None);
        commands.begin_recording(false).unwrap();
        commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
        commands.end_render_pass(device.resources()).unwrap();
        commands.end_recording().unwrap();

        let recorded = commands.sealed_stream().unwrap().commands().to_vec();
        let bound_depth = recorded.iter().find_map(|c| match c {
            Command::BeginRenderPass { depth, .. } => Some(depth.is_some()),
            Command::SetRenderTargets { depth, .. } => Some(depth.is_some()),
            _ => None,
        });
        assert_eq!(bound_depth, Some(false), "{}", device.render_pass_strategy());
        // 两条路径都只转换颜色目标
        let barriers: Vec<_> = recorded
            .iter()
            .filter_map(|c| match c {
                Command::ResourceBarrier(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![
                vec![ResourceBarrier::transition(color, ResourceState::Present, ResourceState::RenderTarget)],
                vec![ResourceBarrier::transition(color, ResourceState::RenderTarget, ResourceState::Present)],
            ]
        );

        queue.execute(&[&commands]).unwrap();
        queue.flush(&fence).unwrap();
        assert_eq!(device.resource(depth).unwrap().current_state(), ResourceState::Common);
        assert!(backend.snapshot(depth).unwrap().iter().all(|&b| b == 0));
        assert_eq!(backend.validation_errors(), 0, "{:?}", backend.validation_messages());
    }
}

#[test]
fn test_render_target_already_in_state_is_not_transitioned() {
    let (_backend, mut device) = common::default_device();
    let target = device
        .create_texture(
            TextureDescriptor::back_buffer(2, 2, TextureFormat::Rgba8Unorm).with_initial_state(ResourceState::RenderTarget),
        )
        .unwrap();
    let frame_buffer = device.create_frame_buffer(&[target], None, None).unwrap();
    let pass = RenderPass::new(vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED)], None).unwrap();

    let allocator = device.create_command_allocator(CommandListType::Graphics, None);
    let mut commands = device.create_command_buffer(&allocator, None);
    commands.begin_recording(false).unwrap();
    commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
    commands.end_render_pass(device.resources()).unwrap();

    assert!(!commands
        .recorded_commands()
        .iter()
        .any(|c| matches!(c, Command::ResourceBarrier(_))));
    commands.end_recording().unwrap();
}

#[test]
fn test_render_pass_misuse_is_rejected() {
    let (_backend, mut device) = common::default_device();
    let target = device
        .create_texture(TextureDescriptor::back_buffer(2, 2, TextureFormat::Rgba8Unorm))
        .unwrap();
    let frame_buffer = device.create_frame_buffer(&[target], None, None).unwrap();
    let pass = RenderPass::new(vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED)], None).unwrap();
    let two_targets = RenderPass::new(
        vec![
            ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED),
            ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED),
        ],
        None,
    )
    .unwrap();

    let allocator = device.create_command_allocator(CommandListType::Graphics, None);
    let mut commands = device.create_command_buffer(&allocator, None);

    // 关闭状态下开始通道
    assert!(commands.begin_render_pass(device.resources(), &pass, &frame_buffer).is_err());

    commands.begin_recording(false).unwrap();
    assert!(commands.begin_render_pass(device.resources(), &two_targets, &frame_buffer).is_err());
    commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
    assert!(commands.begin_render_pass(device.resources(), &pass, &frame_buffer).is_err());
    assert!(commands.end_recording().is_err());
    commands.end_render_pass(device.resources()).unwrap();
    // 通道外结束为空操作
    commands.end_render_pass(device.resources()).unwrap();
    commands.end_recording().unwrap();
}

#[test]
fn test_draw_without_pipeline_is_reported() {
    let (backend, mut device) = common::default_device();
    let target = device
        .create_texture(TextureDescriptor::back_buffer(2, 2, TextureFormat::Rgba8Unorm))
        .unwrap();
    let frame_buffer = device.create_frame_buffer(&[target], None, None).unwrap();
    let pass = RenderPass::new(vec![ColorAttachment::clear(TextureFormat::Rgba8Unorm, RED)], None).unwrap();

    let queue = device.create_command_queue(CommandListType::Graphics, None).unwrap();
    let fence = device.create_fence(0, None);
    let allocator = device.create_command_allocator(CommandListType::Graphics, None);
    let mut commands = device.create_command_buffer(&allocator, None);
    commands.begin_recording(false).unwrap();
    commands.begin_render_pass(device.resources(), &pass, &frame_buffer).unwrap();
    commands.draw(3, 1, 0, 0);
    commands.end_render_pass(device.resources()).unwrap();
    commands.end_recording().unwrap();
    queue.execute(&[&commands]).unwrap();
    queue.flush(&fence).unwrap();

    let messages = backend.validation_messages();
    assert!(messages.iter().any(|m| m.is_error() && m.command == "Draw"), "{:?}", messages);
}
