// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan driver; without one every test logs and returns early.

use ash::vk;
use prism_core::init_tracing;
use prism_render::{MeshData, PixelData, Vertex};
use prism_render_vk::{
    create_gpu_buffer, create_readback_buffer, create_sampler, create_staging_buffer,
    create_uniform_buffer, destroy_buffer, destroy_image, destroy_sampler, BindingKind,
    DescriptorAllocator, DescriptorError, DescriptorSetBuilder, DeviceContext, DriverError,
    RendererOptions, UploadContext,
};
use tracing::warn;

fn headless() -> Option<(DeviceContext, UploadContext)> {
    init_tracing();
    let options = RendererOptions {
        validation: false,
        pipeline_cache_dir: None,
        ..Default::default()
    };
    let ctx = match DeviceContext::headless(&options) {
        Ok(Some(ctx)) => ctx,
        Ok(None) => {
            warn!("no GPU available, skipping");
            return None;
        }
        Err(e) => {
            warn!("Vulkan unavailable ({e}), skipping");
            return None;
        }
    };
    let upload = UploadContext::new(&ctx).expect("upload context");
    Some((ctx, upload))
}

#[test]
fn bytes_survive_staging_to_gpu_to_readback() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let staging = create_staging_buffer(&ctx, &data).unwrap();
    let gpu = create_gpu_buffer(&ctx, data.len() as u64, vk::BufferUsageFlags::STORAGE_BUFFER)
        .unwrap();
    let readback = create_readback_buffer(&ctx, data.len() as u64).unwrap();
    assert!(!gpu.is_mapped());
    assert!(readback.is_mapped());

    upload.copy_buffer(&ctx, &staging, &gpu).unwrap();
    upload.copy_buffer(&ctx, &gpu, &readback).unwrap();
    assert_eq!(readback.read().unwrap(), data);

    unsafe {
        destroy_buffer(&ctx, staging);
        destroy_buffer(&ctx, gpu);
        destroy_buffer(&ctx, readback);
        upload.destroy(&ctx);
    }
}

#[test]
fn mesh_upload_packs_vertices_then_indices() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    let vertex = |x: f32| Vertex {
        position: [x, 0.0, 0.0],
        normal: [0.0, 0.0, 1.0],
        uv: [x, 1.0],
    };
    let mesh = MeshData {
        vertices: vec![vertex(0.0), vertex(1.0), vertex(2.0)],
        indices: vec![0, 1, 2],
    };
    let gpu = upload.upload_mesh(&ctx, &mesh).unwrap();
    assert_eq!(gpu.index_count, 3);

    let readback = create_readback_buffer(&ctx, gpu.vertex.size).unwrap();
    upload.copy_buffer(&ctx, &gpu.vertex, &readback).unwrap();
    let expected: &[u8] = bytemuck::cast_slice(&mesh.vertices);
    assert_eq!(readback.read().unwrap(), expected);

    unsafe {
        destroy_buffer(&ctx, readback);
        gpu.destroy(&ctx);
        upload.destroy(&ctx);
    }
}

#[test]
fn texture_upload_yields_sampled_image() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    let image = upload
        .upload_texture(&ctx, &PixelData::solid([10, 20, 30, 255]))
        .unwrap();
    assert_eq!(image.extent.width, 1);
    assert!(image.usage.contains(vk::ImageUsageFlags::SAMPLED));

    unsafe {
        destroy_image(&ctx, image);
        upload.destroy(&ctx);
    }
}

#[test]
fn uniform_writes_are_bounds_checked() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    let mut ubo = create_uniform_buffer(&ctx, 64).unwrap();
    ubo.write(16, &[7; 16]).unwrap();
    assert_eq!(&ubo.read().unwrap()[16..32], &[7; 16]);
    assert!(matches!(
        ubo.write(60, &[0; 8]),
        Err(DriverError::OutOfBounds { size: 64, .. })
    ));

    unsafe {
        destroy_buffer(&ctx, ubo);
        upload.destroy(&ctx);
    }
}

#[test]
fn empty_uploads_are_refused_before_allocating() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    assert!(matches!(
        create_staging_buffer(&ctx, &[]),
        Err(DriverError::EmptyBuffer(_))
    ));
    assert!(matches!(
        upload.upload_buffer(&ctx, &[], vk::BufferUsageFlags::VERTEX_BUFFER),
        Err(DriverError::EmptyBuffer(_))
    ));
    unsafe { upload.destroy(&ctx) };
}

#[test]
fn freed_material_sets_return_to_the_shared_pool() {
    let Some((ctx, upload)) = headless() else {
        return;
    };
    let texture = upload
        .upload_texture(&ctx, &PixelData::solid([255; 4]))
        .unwrap();
    let sampler = create_sampler(&ctx, vk::Filter::LINEAR).unwrap();

    let mut template = DescriptorSetBuilder::new();
    template
        .add_binding(
            0,
            BindingKind::CombinedImageSampler { images: Vec::new() },
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
    let mut filled = template.clone();
    filled
        .fill_binding(
            0,
            BindingKind::CombinedImageSampler {
                images: vec![(texture.view, sampler)],
            },
        )
        .unwrap();

    let mut sets = DescriptorAllocator::new(&ctx, &template, 2).unwrap();
    // Many more add/remove cycles than the pool holds.
    for _ in 0..16 {
        let set = sets.allocate(&ctx, &filled).unwrap();
        assert_eq!(sets.live(), 1);
        unsafe { sets.free(&ctx, set) };
    }
    assert_eq!(sets.live(), 0);

    let a = sets.allocate(&ctx, &filled).unwrap();
    let b = sets.allocate(&ctx, &filled).unwrap();
    assert!(matches!(
        sets.allocate(&ctx, &filled),
        Err(DescriptorError::PoolExhausted(2))
    ));

    unsafe {
        sets.free(&ctx, a);
        sets.free(&ctx, b);
        sets.destroy(&ctx);
        destroy_sampler(&ctx, sampler);
        destroy_image(&ctx, texture);
        upload.destroy(&ctx);
    }
}
