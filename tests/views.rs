mod common;

use std::sync::Arc;

use dist_hal::core::error::ErrorClass;
use dist_hal::core::GraphicsError;
use dist_hal::gfx::{SoftwareBackend, SoftwareBackendConfig};
use dist_hal::renderer::resource::{TextureDimension, TextureUsage};
use dist_hal::renderer::view::{NativeViewDescriptor, ViewDimension};
use dist_hal::renderer::{
    BufferDescriptor, BufferUsageType, DescriptorHeapCategory, DescriptorHeapDescriptor, Device, DeviceDescriptor,
    MemoryType, SamplerDescriptor, TextureDescriptor, TextureFormat, ViewDescriptor, ViewType,
};

#[test]
fn test_custom_heap_reuses_freed_slots() {
    let (_backend, mut device) = common::default_device();
    let texture = device
        .create_texture(TextureDescriptor::texture_2d(4, 4, TextureFormat::Rgba8Unorm))
        .unwrap();
    let heap = device
        .create_descriptor_heap(DescriptorHeapDescriptor::srv_cbv_uav(4).with_name("Material Heap"))
        .unwrap();

    let mut views: Vec<_> = (0..4)
        .map(|_| device.create_view(texture, &ViewDescriptor::texture(), Some(&heap)).unwrap())
        .collect();
    let err = device.create_view(texture, &ViewDescriptor::texture(), Some(&heap)).unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Exhaustion));

    let third = views.remove(2);
    let second = views.remove(1);
    let freed = [second.index(), third.index()];
    drop(second);
    drop(third);
    assert_eq!(heap.lock().available(), 2);

    for _ in 0..2 {
        let view = device.create_view(texture, &ViewDescriptor::texture(), Some(&heap)).unwrap();
        assert!(freed.contains(&view.index()));
        views.push(view);
    }
    assert!(heap.lock().is_full());
    assert!(device.create_view(texture, &ViewDescriptor::texture(), Some(&heap)).is_err());

    // 默认堆不受影响
    assert_eq!(device.default_heap(DescriptorHeapCategory::ShaderResource).lock().allocated_count(), 0);
}

#[test]
fn test_texture_array_srv_covers_all_slices() {
    let (backend, mut device) = common::default_device();
    let array = device
        .create_texture(
            TextureDescriptor::texture_2d(8, 8, TextureFormat::Rgba8Unorm)
                .with_dimension(TextureDimension::Texture2DArray)
                .with_array_layers(6)
                .with_name("Shadow Cascades"),
        )
        .unwrap();

    let view = device.create_view(array, &ViewDescriptor::texture(), None).unwrap();
    assert_eq!(view.view_type(), Some(ViewType::Texture));
    assert_eq!(view.resource(), Some(array));
    assert_eq!(
        view.descriptor().dimension(),
        Some(ViewDimension::Texture2DArray {
            most_detailed_mip: 0,
            mip_levels: 1,
            first_array_slice: 0,
            array_size: 6,
            plane_slice: 0,
        })
    );

    // 写入后端槽位的是同一份描述
    let heap = device.default_heap(DescriptorHeapCategory::ShaderResource);
    let native_id = heap.lock().native_id();
    assert_eq!(backend.descriptor(native_id, view.index()).as_ref(), Some(view.descriptor()));

    let partial = device
        .create_view(array, &ViewDescriptor::texture().with_array_range(2, 3), None)
        .unwrap();
    assert_eq!(partial.descriptor().dimension().map(|d| d.array_slices()), Some((2, 3)));
    assert!(device
        .create_view(array, &ViewDescriptor::texture().with_array_range(4, 3), None)
        .is_err());
}

#[test]
fn test_texture_view_ranges_at_the_limits() {
    let (_backend, mut device) = common::default_device();
    let array = device
        .create_texture(
            TextureDescriptor::texture_2d(8, 8, TextureFormat::Rgba8Unorm)
                .with_dimension(TextureDimension::Texture2DArray)
                .with_array_layers(6)
                .with_mip_levels(4),
        )
        .unwrap();
    let heap = device.default_heap(DescriptorHeapCategory::ShaderResource).clone();

    // 恰好覆盖到最后一层与最后一级 mip
    let tail = device
        .create_view(array, &ViewDescriptor::texture().with_array_range(1, 5).with_mip_slice(1).with_mip_levels(3), None)
        .unwrap();
    assert_eq!(
        tail.descriptor().dimension(),
        Some(ViewDimension::Texture2DArray {
            most_detailed_mip: 1,
            mip_levels: 3,
            first_array_slice: 1,
            array_size: 5,
            plane_slice: 0,
        })
    );

    let overflowing = [
        ViewDescriptor::texture().with_array_range(1, u32::MAX),
        ViewDescriptor::texture().with_array_range(u32::MAX, 1),
        ViewDescriptor::texture().with_mip_slice(1).with_mip_levels(u32::MAX),
        ViewDescriptor::texture().with_mip_slice(u32::MAX).with_mip_levels(1),
    ];
    for desc in &overflowing {
        let err = device.create_view(array, desc, None).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::ViewCreation(_))), "{:?}", desc);
    }
    assert_eq!(heap.lock().allocated_count(), 1);
}

#[test]
fn test_buffer_view_ranges_at_the_limits() {
    let (_backend, mut device) = common::default_device();
    let constants = device
        .create_buffer(BufferDescriptor::new(512, BufferUsageType::Constant, MemoryType::HostVisible))
        .unwrap();
    let storage = device
        .create_buffer(BufferDescriptor::new(256, BufferUsageType::Storage, MemoryType::DeviceLocal))
        .unwrap();

    assert!(device.create_view(constants, &ViewDescriptor::constant_buffer(0, 512), None).is_ok());
    let err = device
        .create_view(constants, &ViewDescriptor::constant_buffer(u64::MAX - 255, 256), None)
        .unwrap_err();
    assert!(matches!(err.as_graphics(), Some(GraphicsError::ViewCreation(_))));

    // 256 / 16 = 16 个元素
    let last = device
        .create_view(storage, &ViewDescriptor::structured_buffer(16, false).with_elements(15, 1), None)
        .unwrap();
    assert!(matches!(
        last.descriptor().dimension(),
        Some(ViewDimension::Buffer { first_element: 15, num_elements: 1, structure_stride: 16 })
    ));
    assert!(device
        .create_view(storage, &ViewDescriptor::structured_buffer(16, false).with_elements(15, u32::MAX), None)
        .is_err());
    assert!(device
        .create_view(storage, &ViewDescriptor::structured_buffer(16, true).with_elements(u64::MAX, 1), None)
        .is_err());
}

#[test]
fn test_unsupported_views_fail_without_consuming_slots() {
    let (_backend, mut device) = common::default_device();
    let buffer = device
        .create_buffer(BufferDescriptor::new(256, BufferUsageType::Vertex, MemoryType::DeviceLocal))
        .unwrap();
    let multisampled = device
        .create_texture(
            TextureDescriptor::texture_2d(4, 4, TextureFormat::Rgba8Unorm)
                .with_dimension(TextureDimension::Texture2DMs)
                .with_sample_count(4)
                .with_usage(TextureUsage::RENDER_TARGET),
        )
        .unwrap();
    let heap = device.default_heap(DescriptorHeapCategory::ShaderResource).clone();

    let err = device.create_view(buffer, &ViewDescriptor::texture(), None).unwrap_err();
    assert!(matches!(err.as_graphics(), Some(GraphicsError::ViewCreation(_))));
    assert!(device.create_view(multisampled, &ViewDescriptor::new(ViewType::RWTexture), None).is_err());
    assert!(device.create_view(multisampled, &ViewDescriptor::depth_stencil(), None).is_err());
    // 可写结构化缓冲区需要 Storage 用途
    assert!(device
        .create_view(buffer, &ViewDescriptor::structured_buffer(16, true), None)
        .is_err());
    assert_eq!(heap.lock().allocated_count(), 0);

    let ms_srv = device.create_view(multisampled, &ViewDescriptor::texture(), None).unwrap();
    assert_eq!(ms_srv.descriptor().dimension(), Some(ViewDimension::Texture2DMs));
}

#[test]
fn test_constant_buffer_views_respect_alignment() {
    let (_backend, mut device) = common::default_device();
    let constants = device
        .create_buffer(BufferDescriptor::new(512, BufferUsageType::Constant, MemoryType::HostVisible))
        .unwrap();

    let second = device
        .create_view(constants, &ViewDescriptor::constant_buffer(256, 256), None)
        .unwrap();
    assert_eq!(
        second.descriptor(),
        &NativeViewDescriptor::ConstantBuffer { resource: constants, offset: 256, size: 256 }
    );
    assert!(second.gpu_handle().is_some());
    assert!(device.create_view(constants, &ViewDescriptor::constant_buffer(128, 256), None).is_err());
    assert!(device.create_view(constants, &ViewDescriptor::constant_buffer(256, 512), None).is_err());
}

#[test]
fn test_depth_texture_views() {
    let (_backend, mut device) = common::default_device();
    let depth = device
        .create_texture(
            TextureDescriptor::depth_buffer(4, 4, TextureFormat::Depth24PlusStencil8),
        )
        .unwrap();

    let dsv = device.create_view(depth, &ViewDescriptor::depth_stencil(), None).unwrap();
    assert_eq!(dsv.category(), DescriptorHeapCategory::DepthStencil);
    assert!(dsv.gpu_handle().is_none());

    let depth_srv = device.create_view(depth, &ViewDescriptor::texture(), None).unwrap();
    assert!(matches!(
        depth_srv.descriptor(),
        NativeViewDescriptor::ShaderResource { format: Some(TextureFormat::R24UnormX8Typeless), .. }
    ));
    let stencil_srv = device
        .create_view(depth, &ViewDescriptor::texture().with_plane_slice(1), None)
        .unwrap();
    assert!(matches!(
        stencil_srv.descriptor(),
        NativeViewDescriptor::ShaderResource { format: Some(TextureFormat::X24TypelessG8Uint), .. }
    ));
}

#[test]
fn test_acceleration_structure_views_need_ray_tracing() {
    let (_backend, mut device) = common::default_device();
    let err = device
        .create_buffer(BufferDescriptor::new(1024, BufferUsageType::AccelerationStructure, MemoryType::DeviceLocal))
        .unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Construction));

    let backend = Arc::new(SoftwareBackend::new(SoftwareBackendConfig {
        ray_tracing: true,
        ..SoftwareBackendConfig::default()
    }));
    let mut rt_device = Device::new(DeviceDescriptor::new().with_ray_tracing(true), backend).unwrap();
    assert!(rt_device.ray_tracing_enabled());
    let tlas = rt_device
        .create_buffer(
            BufferDescriptor::new(1024, BufferUsageType::AccelerationStructure, MemoryType::DeviceLocal)
                .with_name("TLAS"),
        )
        .unwrap();
    let view = rt_device
        .create_view(tlas, &ViewDescriptor::new(ViewType::AccelerationStructure), None)
        .unwrap();
    assert_eq!(view.descriptor(), &NativeViewDescriptor::AccelerationStructure { resource: tlas });
    assert_eq!(view.category(), DescriptorHeapCategory::ShaderResource);

    // 普通缓冲区不能作为加速结构
    let plain = rt_device
        .create_buffer(BufferDescriptor::new(1024, BufferUsageType::Storage, MemoryType::DeviceLocal))
        .unwrap();
    assert!(rt_device
        .create_view(plain, &ViewDescriptor::new(ViewType::AccelerationStructure), None)
        .is_err());
    // 加速结构必须位于显存
    assert!(rt_device
        .create_buffer(BufferDescriptor::new(1024, BufferUsageType::AccelerationStructure, MemoryType::HostVisible))
        .is_err());
}

#[test]
fn test_samplers_use_sampler_heap() {
    let (backend, device) = common::default_device();
    let sampler = device
        .create_sampler(&SamplerDescriptor::anisotropic(16).with_name("Aniso"), None)
        .unwrap();
    let heap = device.default_heap(DescriptorHeapCategory::Sampler);
    assert!(sampler.heap().same_heap(heap));
    let native_id = heap.lock().native_id();
    assert!(matches!(
        backend.descriptor(native_id, sampler.index()),
        Some(NativeViewDescriptor::Sampler(_))
    ));

    let srv_heap = device.default_heap(DescriptorHeapCategory::ShaderResource).clone();
    assert!(device.create_sampler(&SamplerDescriptor::default(), Some(&srv_heap)).is_err());
}
