// SPDX-License-Identifier: CEPL-1.0
//! One-shot transfer submissions: staging uploads into device-local buffers and images.
//!
//! Every submission waits on the upload fence before returning, so the staging buffer can be
//! destroyed right after and the command pool is safe to reset.

use ash::vk;
use prism_render::{MeshData, PixelData};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::resource::{
    create_gpu_buffer, create_image, create_staging_buffer, destroy_buffer, full_range, Buffer,
    Image,
};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Command pool, command buffer and fence dedicated to blocking transfers.
pub struct UploadContext {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl UploadContext {
    pub fn new(ctx: &DeviceContext) -> Result<Self, DriverError> {
        let device = ctx.device();
        unsafe {
            let pool_ci = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                flags: vk::CommandPoolCreateFlags::TRANSIENT,
                queue_family_index: ctx.graphics().family,
                ..Default::default()
            };
            let pool = device
                .create_command_pool(&pool_ci, None)
                .during("create_command_pool")?;

            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let cmd = match device.allocate_command_buffers(&ai) {
                Ok(v) => v[0],
                Err(e) => {
                    device.destroy_command_pool(pool, None);
                    return Err(DriverError::vulkan("allocate_command_buffers", e));
                }
            };

            let fence_ci = vk::FenceCreateInfo {
                s_type: vk::StructureType::FENCE_CREATE_INFO,
                ..Default::default()
            };
            let fence = match device.create_fence(&fence_ci, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_command_pool(pool, None);
                    return Err(DriverError::vulkan("create_fence", e));
                }
            };

            Ok(Self { pool, cmd, fence })
        }
    }

    /// Records `record` into the one-shot command buffer, submits it on the graphics queue and
    /// blocks until the GPU has finished it.
    pub fn submit_blocking(
        &self,
        ctx: &DeviceContext,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), DriverError> {
        let device = ctx.device();
        unsafe {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(self.cmd, &bi)
                .during("begin_command_buffer")?;
            record(device, self.cmd);
            device
                .end_command_buffer(self.cmd)
                .during("end_command_buffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &self.cmd,
                ..Default::default()
            };
            device
                .queue_submit(ctx.graphics().queue, std::slice::from_ref(&si), self.fence)
                .during("queue_submit")?;
            device
                .wait_for_fences(std::slice::from_ref(&self.fence), true, u64::MAX)
                .during("wait_for_fences")?;
            device
                .reset_fences(std::slice::from_ref(&self.fence))
                .during("reset_fences")?;
            device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .during("reset_command_pool")?;
        }
        Ok(())
    }

    /// Copies `regions` of `staging` into `dst` and waits for completion.
    pub fn upload_via_staging(
        &self,
        ctx: &DeviceContext,
        staging: &Buffer,
        dst: &Buffer,
        regions: &[vk::BufferCopy],
    ) -> Result<(), DriverError> {
        self.submit_blocking(ctx, |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.handle, dst.handle, regions);
        })
    }

    /// Copies `src` into `dst` (or the first `dst.size` bytes) and waits for completion.
    pub fn copy_buffer(
        &self,
        ctx: &DeviceContext,
        src: &Buffer,
        dst: &Buffer,
    ) -> Result<(), DriverError> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: src.size.min(dst.size),
        };
        self.upload_via_staging(ctx, src, dst, std::slice::from_ref(&region))
    }

    /// Copies tightly packed texels from `staging` into a color image and leaves the image in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        ctx: &DeviceContext,
        staging: &Buffer,
        image: &Image,
    ) -> Result<(), DriverError> {
        let range = full_range(image.aspect);
        self.submit_blocking(ctx, |device, cmd| unsafe {
            let to_transfer = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image: image.handle,
                subresource_range: range,
                ..Default::default()
            };
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_transfer),
            );

            let copy = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: image.extent.width,
                    height: image.extent.height,
                    depth: 1,
                },
            };
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle,
                image.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&copy),
            );

            let to_shader = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image: image.handle,
                subresource_range: range,
                ..Default::default()
            };
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_shader),
            );
        })
    }

    /// Stages `data` and copies it into a new device-local buffer with `usage`.
    pub fn upload_buffer(
        &self,
        ctx: &DeviceContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer, DriverError> {
        let staging = create_staging_buffer(ctx, data)?;
        let result = create_gpu_buffer(ctx, data.len() as vk::DeviceSize, usage).and_then(|dst| {
            match self.copy_buffer(ctx, &staging, &dst) {
                Ok(()) => Ok(dst),
                Err(e) => {
                    unsafe { destroy_buffer(ctx, dst) };
                    Err(e)
                }
            }
        });
        // Either the copy has completed or it never got submitted.
        unsafe { destroy_buffer(ctx, staging) };
        result
    }

    /// Uploads vertices and indices through a single staging buffer and one submission.
    pub fn upload_mesh(&self, ctx: &DeviceContext, mesh: &MeshData) -> Result<GpuMesh, DriverError> {
        assert!(
            !mesh.vertices.is_empty() && !mesh.indices.is_empty(),
            "mesh has no geometry"
        );
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);
        let mut packed = Vec::with_capacity(vertex_bytes.len() + index_bytes.len());
        packed.extend_from_slice(vertex_bytes);
        packed.extend_from_slice(index_bytes);

        let staging = create_staging_buffer(ctx, &packed)?;
        let result = self.upload_mesh_from(ctx, &staging, vertex_bytes.len(), index_bytes.len());
        unsafe { destroy_buffer(ctx, staging) };

        let mesh_gpu = GpuMesh {
            index_count: mesh.indices.len() as u32,
            ..result?
        };
        debug!(
            "uploaded mesh: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh_gpu.index_count
        );
        Ok(mesh_gpu)
    }

    fn upload_mesh_from(
        &self,
        ctx: &DeviceContext,
        staging: &Buffer,
        vertex_len: usize,
        index_len: usize,
    ) -> Result<GpuMesh, DriverError> {
        let vertex = create_gpu_buffer(
            ctx,
            vertex_len as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index = match create_gpu_buffer(
            ctx,
            index_len as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(b) => b,
            Err(e) => {
                unsafe { destroy_buffer(ctx, vertex) };
                return Err(e);
            }
        };

        let vertex_region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: vertex_len as vk::DeviceSize,
        };
        let index_region = vk::BufferCopy {
            src_offset: vertex_len as vk::DeviceSize,
            dst_offset: 0,
            size: index_len as vk::DeviceSize,
        };
        let copied = self.submit_blocking(ctx, |device, cmd| unsafe {
            device.cmd_copy_buffer(
                cmd,
                staging.handle,
                vertex.handle,
                std::slice::from_ref(&vertex_region),
            );
            device.cmd_copy_buffer(
                cmd,
                staging.handle,
                index.handle,
                std::slice::from_ref(&index_region),
            );
        });
        if let Err(e) = copied {
            unsafe {
                destroy_buffer(ctx, vertex);
                destroy_buffer(ctx, index);
            }
            return Err(e);
        }

        Ok(GpuMesh {
            vertex,
            index,
            index_count: 0,
        })
    }

    /// Creates a sampled RGBA8 sRGB texture and fills it from `pixels`.
    pub fn upload_texture(&self, ctx: &DeviceContext, pixels: &PixelData) -> Result<Image, DriverError> {
        assert!(
            pixels.is_well_formed(),
            "pixel data is {} bytes for {}x{}",
            pixels.rgba.len(),
            pixels.width,
            pixels.height
        );
        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };
        let staging = create_staging_buffer(ctx, &pixels.rgba)?;
        let image = create_image(
            ctx,
            TEXTURE_FORMAT,
            extent,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let result = image.and_then(|image| match self.copy_buffer_to_image(ctx, &staging, &image) {
            Ok(()) => Ok(image),
            Err(e) => {
                unsafe { crate::resource::destroy_image(ctx, image) };
                Err(e)
            }
        });
        unsafe { destroy_buffer(ctx, staging) };
        result
    }

    /// # Safety
    /// No submission from this context may still be pending; `submit_blocking` guarantees that
    /// unless it returned an error mid-flight, in which case wait for device idle first.
    pub unsafe fn destroy(&self, ctx: &DeviceContext) {
        let device = ctx.device();
        device.destroy_fence(self.fence, None);
        device.destroy_command_pool(self.pool, None);
    }
}

/// Device-local vertex and index buffers of one mesh.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex: Buffer,
    pub index: Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    /// # Safety
    /// No pending or executing command buffer may reference the mesh.
    pub unsafe fn destroy(self, ctx: &DeviceContext) {
        destroy_buffer(ctx, self.vertex);
        destroy_buffer(ctx, self.index);
    }
}
