// SPDX-License-Identifier: CEPL-1.0
//! Resource Allocator: GPU buffers, images and samplers backed by the context's allocator.
//!
//! Nothing here is reference counted. Every `create_*` has a matching `destroy_*` that frees
//! immediately; the caller guarantees no in-flight command buffer still uses the resource.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use tracing::trace;

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::format::has_stencil;

#[derive(Debug)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    allocation: Option<Allocation>,
}

impl Buffer {
    /// Copies `bytes` into the mapped memory at `offset`.
    pub fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<(), DriverError> {
        let range = mapped_range(offset, bytes.len(), self.size)?;
        let slice = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(DriverError::NotMapped)?;
        let len = range.len();
        slice
            .get_mut(range)
            .ok_or(DriverError::OutOfBounds {
                offset,
                len: len as u64,
                size: self.size,
            })?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the whole buffer out of mapped memory.
    pub fn read(&self) -> Result<Vec<u8>, DriverError> {
        let size = usize::try_from(self.size).map_err(|_| DriverError::OutOfBounds {
            offset: 0,
            len: self.size,
            size: self.size,
        })?;
        let range = mapped_range(0, size, self.size)?;
        let slice = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or(DriverError::NotMapped)?;
        slice
            .get(range)
            .map(<[u8]>::to_vec)
            .ok_or(DriverError::OutOfBounds {
                offset: 0,
                len: self.size,
                size: self.size,
            })
    }

    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| a.mapped_ptr().is_some())
    }
}

/// Byte range `offset..offset + len` of a buffer of `size` bytes, checked without overflow.
pub fn mapped_range(
    offset: vk::DeviceSize,
    len: usize,
    size: vk::DeviceSize,
) -> Result<std::ops::Range<usize>, DriverError> {
    let out_of_bounds = || DriverError::OutOfBounds {
        offset,
        len: len as u64,
        size,
    };
    let end = offset
        .checked_add(len as u64)
        .filter(|&end| end <= size)
        .ok_or_else(out_of_bounds)?;
    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let end = usize::try_from(end).map_err(|_| out_of_bounds())?;
    Ok(start..end)
}

#[derive(Debug)]
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    allocation: Option<Allocation>,
}

/// Where a buffer lives, decided purely by what it will be used for.
pub fn memory_location_for(usage: vk::BufferUsageFlags) -> MemoryLocation {
    let gpu_consumers = vk::BufferUsageFlags::VERTEX_BUFFER
        | vk::BufferUsageFlags::INDEX_BUFFER
        | vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::INDIRECT_BUFFER;
    let host_written = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::UNIFORM_BUFFER;

    if usage.intersects(gpu_consumers) {
        MemoryLocation::GpuOnly
    } else if !usage.is_empty() && host_written.contains(usage) {
        MemoryLocation::CpuToGpu
    } else if usage == vk::BufferUsageFlags::TRANSFER_DST {
        MemoryLocation::GpuToCpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Image aspect implied by usage. Depth usage wins; everything else a color image can do
/// maps to COLOR.
///
/// Panics on empty usage: such an image cannot be created and asking for one is a bug.
pub fn aspect_for_usage(usage: vk::ImageUsageFlags, format: vk::Format) -> vk::ImageAspectFlags {
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        // Sampled views may only expose one aspect.
        if has_stencil(format) && !usage.contains(vk::ImageUsageFlags::SAMPLED) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else if usage.intersects(
        vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::INPUT_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST,
    ) {
        vk::ImageAspectFlags::COLOR
    } else {
        panic!("image usage {usage:?} maps to no known aspect");
    }
}

/// Allocates a buffer whose memory location follows from `usage`.
pub fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<Buffer, DriverError> {
    create_buffer_in(ctx, size, usage, memory_location_for(usage), "buffer")
}

/// CPU-mapped buffer filled with `data`; destroy it once the copy that reads it has completed.
pub fn create_staging_buffer(ctx: &DeviceContext, data: &[u8]) -> Result<Buffer, DriverError> {
    let mut staging = create_buffer_in(
        ctx,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "staging",
    )?;
    staging.write(0, data)?;
    Ok(staging)
}

/// Device-local buffer, filled only through the staging upload protocol.
pub fn create_gpu_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<Buffer, DriverError> {
    create_buffer_in(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
        "gpu",
    )
}

/// CPU-readable copy destination for GPU→CPU transfers.
pub fn create_readback_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
) -> Result<Buffer, DriverError> {
    create_buffer_in(
        ctx,
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
        "readback",
    )
}

/// Persistently mapped uniform buffer, rewritten by the CPU every frame.
pub fn create_uniform_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
) -> Result<Buffer, DriverError> {
    create_buffer_in(
        ctx,
        size,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
        "uniform",
    )
}

fn create_buffer_in(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    name: &str,
) -> Result<Buffer, DriverError> {
    let device = ctx.device();
    let bci = buffer_create_info(size, usage, name)?;

    unsafe {
        let handle = device.create_buffer(&bci, None).during("create_buffer")?;
        let requirements = device.get_buffer_memory_requirements(handle);
        let allocation = match ctx.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(a) => a,
            Err(e) => {
                device.destroy_buffer(handle, None);
                return Err(e.into());
            }
        };
        if let Err(e) = device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) {
            let _ = ctx.allocator().free(allocation);
            device.destroy_buffer(handle, None);
            return Err(DriverError::vulkan("bind_buffer_memory", e));
        }

        trace!("{name} buffer {:?}: {size} bytes, {:?}", handle, location);
        Ok(Buffer {
            handle,
            size,
            usage,
            location,
            allocation: Some(allocation),
        })
    }
}

/// Vulkan forbids zero-sized buffers, so an empty request is refused before any allocation.
fn buffer_create_info(
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<vk::BufferCreateInfo<'static>, DriverError> {
    if size == 0 {
        return Err(DriverError::EmptyBuffer(name.to_owned()));
    }
    Ok(vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    })
}

/// Frees the buffer and its memory right away.
///
/// # Safety
/// No pending or executing command buffer may reference `buffer`.
pub unsafe fn destroy_buffer(ctx: &DeviceContext, mut buffer: Buffer) {
    if let Some(allocation) = buffer.allocation.take() {
        let _ = ctx.allocator().free(allocation);
    }
    ctx.device().destroy_buffer(buffer.handle, None);
}

/// Device-local 2D image plus a full view of it; the aspect comes from `usage`.
pub fn create_image(
    ctx: &DeviceContext,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
) -> Result<Image, DriverError> {
    let aspect = aspect_for_usage(usage, format);
    let device = ctx.device();

    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };

    unsafe {
        let handle = device.create_image(&img_ci, None).during("create_image")?;
        let requirements = device.get_image_memory_requirements(handle);
        let allocation = match ctx.allocator().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(a) => a,
            Err(e) => {
                device.destroy_image(handle, None);
                return Err(e.into());
            }
        };
        if let Err(e) = device.bind_image_memory(handle, allocation.memory(), allocation.offset()) {
            let _ = ctx.allocator().free(allocation);
            device.destroy_image(handle, None);
            return Err(DriverError::vulkan("bind_image_memory", e));
        }

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: handle,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: full_range(aspect),
            ..Default::default()
        };
        let view = match device.create_image_view(&view_ci, None) {
            Ok(v) => v,
            Err(e) => {
                let _ = ctx.allocator().free(allocation);
                device.destroy_image(handle, None);
                return Err(DriverError::vulkan("create_image_view", e));
            }
        };

        trace!(
            "image {:?}: {}x{} {:?} {:?}",
            handle,
            extent.width,
            extent.height,
            format,
            usage
        );
        Ok(Image {
            handle,
            view,
            format,
            extent,
            usage,
            aspect,
            allocation: Some(allocation),
        })
    }
}

/// Destroys view, image and memory right away.
///
/// # Safety
/// No pending or executing command buffer, framebuffer or descriptor set in use may
/// reference `image`.
pub unsafe fn destroy_image(ctx: &DeviceContext, mut image: Image) {
    let device = ctx.device();
    device.destroy_image_view(image.view, None);
    if let Some(allocation) = image.allocation.take() {
        let _ = ctx.allocator().free(allocation);
    }
    device.destroy_image(image.handle, None);
}

pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Clamp-to-edge sampler for combined-image-sampler bindings.
pub fn create_sampler(ctx: &DeviceContext, filter: vk::Filter) -> Result<vk::Sampler, DriverError> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: filter,
        min_filter: filter,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        max_lod: 0.0,
        border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        ..Default::default()
    };
    unsafe { ctx.device().create_sampler(&ci, None) }.during("create_sampler")
}

/// # Safety
/// No descriptor set in use by pending work may reference `sampler`.
pub unsafe fn destroy_sampler(ctx: &DeviceContext, sampler: vk::Sampler) {
    ctx.device().destroy_sampler(sampler, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_and_uniform_buffers_are_host_visible() {
        assert_eq!(
            memory_location_for(vk::BufferUsageFlags::TRANSFER_SRC),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location_for(vk::BufferUsageFlags::UNIFORM_BUFFER),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn geometry_buffers_are_device_local() {
        assert_eq!(
            memory_location_for(
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            ),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            memory_location_for(vk::BufferUsageFlags::INDEX_BUFFER),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn bare_copy_destination_is_readback() {
        assert_eq!(
            memory_location_for(vk::BufferUsageFlags::TRANSFER_DST),
            MemoryLocation::GpuToCpu
        );
    }

    #[test]
    fn depth_usage_maps_to_depth_aspect() {
        let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            aspect_for_usage(usage, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_usage(usage, vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_usage(
                usage | vk::ImageUsageFlags::SAMPLED,
                vk::Format::D24_UNORM_S8_UINT
            ),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn color_usages_map_to_color_aspect() {
        for usage in [
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageUsageFlags::STORAGE,
        ] {
            assert_eq!(
                aspect_for_usage(usage, vk::Format::R8G8B8A8_UNORM),
                vk::ImageAspectFlags::COLOR
            );
        }
    }

    #[test]
    fn mapped_range_stays_inside_the_buffer() {
        assert_eq!(mapped_range(16, 16, 64).unwrap(), 16..32);
        assert_eq!(mapped_range(0, 64, 64).unwrap(), 0..64);
        assert!(matches!(
            mapped_range(60, 8, 64),
            Err(DriverError::OutOfBounds { offset: 60, len: 8, size: 64 })
        ));
    }

    #[test]
    fn huge_offsets_are_out_of_bounds_not_wrapped() {
        assert!(matches!(
            mapped_range(u64::MAX, 1, 64),
            Err(DriverError::OutOfBounds { offset: u64::MAX, .. })
        ));
        assert!(matches!(
            mapped_range(u64::MAX - 3, 8, u64::MAX),
            Err(DriverError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn zero_sized_buffers_are_refused() {
        assert!(matches!(
            buffer_create_info(0, vk::BufferUsageFlags::TRANSFER_SRC, "staging"),
            Err(DriverError::EmptyBuffer(name)) if name == "staging"
        ));
        let info = buffer_create_info(256, vk::BufferUsageFlags::UNIFORM_BUFFER, "uniform").unwrap();
        assert_eq!(info.size, 256);
        assert_eq!(info.sharing_mode, vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    #[should_panic(expected = "maps to no known aspect")]
    fn empty_usage_is_a_programmer_error() {
        aspect_for_usage(vk::ImageUsageFlags::empty(), vk::Format::R8G8B8A8_UNORM);
    }
}
