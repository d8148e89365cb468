// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain plus the depth image that matches its extent.

use ash::vk;
use prism_render::RenderSize;
use tracing::info;

use crate::config::{Buffering, VkVsyncMode};
use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::resource::{create_image, destroy_image, full_range, Image};

#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub hint: RenderSize,
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    pub buffering: Buffering,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<Image>,
}

impl Swapchain {
    pub fn new(ctx: &DeviceContext, cfg: SwapchainConfig) -> Result<Self, DriverError> {
        let mut sc = Self {
            handle: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
        };
        unsafe { sc.create(ctx, cfg)? };
        Ok(sc)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn depth(&self) -> Option<&Image> {
        self.depth.as_ref()
    }

    /// Replaces the chain at the size in `cfg.hint`, handing the old one to the driver as
    /// `old_swapchain`.
    ///
    /// # Safety
    /// The device must be idle: old views and the depth image are destroyed here.
    pub unsafe fn rebuild(
        &mut self,
        ctx: &DeviceContext,
        cfg: SwapchainConfig,
    ) -> Result<(), DriverError> {
        self.destroy_views(ctx);
        self.create(ctx, cfg)
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.destroy_views(ctx);
        if let Some(loader) = ctx.swapchain_loader() {
            if self.handle != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.handle, None);
            }
        }
        self.handle = vk::SwapchainKHR::null();
    }

    unsafe fn destroy_views(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.images.clear();
        if let Some(depth) = self.depth.take() {
            destroy_image(ctx, depth);
        }
    }

    unsafe fn create(&mut self, ctx: &DeviceContext, cfg: SwapchainConfig) -> Result<(), DriverError> {
        let surface = ctx.surface().ok_or(DriverError::NoSurface)?;
        let loader = ctx.swapchain_loader().ok_or(DriverError::NoSurface)?;
        let device = ctx.device();
        let phys = ctx.phys();

        let caps = surface
            .loader
            .get_physical_device_surface_capabilities(phys, surface.handle)
            .during("get_physical_device_surface_capabilities")?;
        let formats = surface
            .loader
            .get_physical_device_surface_formats(phys, surface.handle)
            .during("get_physical_device_surface_formats")?;
        let modes = surface
            .loader
            .get_physical_device_surface_present_modes(phys, surface.handle)
            .during("get_physical_device_surface_present_modes")?;

        let (surf_format, reason) = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode);
        let extent = extent_from_caps(&caps, cfg.hint);
        let min_image_count = negotiate_image_count(cfg.buffering, &caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        // Graphics and present on different families: share images instead of transferring
        // ownership every frame.
        let families = [ctx.graphics().family, ctx.present().family];
        let (sharing_mode, family_count) = if families[0] != families[1] {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let old_swapchain = self.handle;
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        let handle = loader
            .create_swapchain(&swap_info, None)
            .during("create_swapchain")?;
        if old_swapchain != vk::SwapchainKHR::null() {
            loader.destroy_swapchain(old_swapchain, None);
        }
        self.handle = handle;

        let images = loader
            .get_swapchain_images(handle)
            .during("get_swapchain_images")?;
        for &img in &images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surf_format.format,
                subresource_range: full_range(vk::ImageAspectFlags::COLOR),
                ..Default::default()
            };
            let view = device
                .create_image_view(&iv_info, None)
                .during("create_image_view")?;
            self.views.push(view);
        }
        self.images = images;

        self.depth = Some(create_image(
            ctx,
            ctx.depth_format(),
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?);

        self.format = surf_format;
        self.present_mode = present_mode;
        self.extent = extent;

        info!(
            "swapchain: {} images (requested {:?} -> {}), {:?} / {:?} ({}), {:?}, vsync={} mode={:?}, {}x{}",
            self.images.len(),
            cfg.buffering,
            min_image_count,
            surf_format.format,
            surf_format.color_space,
            reason,
            present_mode,
            cfg.vsync,
            cfg.vsync_mode,
            extent.width,
            extent.height
        );
        Ok(())
    }
}

/// Requested buffering clamped into what the surface allows. `max_image_count == 0` means
/// no upper bound.
pub fn negotiate_image_count(buffering: Buffering, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = buffering.image_count().max(caps.min_image_count);
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> (vk::SurfaceFormatKHR, &'static str) {
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        return (f, "bgra8_srgb");
    }
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::R8G8B8A8_SRGB)
    {
        return (f, "rgba8_srgb");
    }
    if let Some(f) = formats.iter().copied().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return (f, "bgra8_unorm_srgbcs");
    }

    (formats[0], "driver_default")
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VkVsyncMode,
) -> vk::PresentModeKHR {
    let preference: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VkVsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VkVsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    preference
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn triple_buffering_within_range() {
        assert_eq!(negotiate_image_count(Buffering::Triple, &caps(2, 3)), 3);
    }

    #[test]
    fn triple_buffering_capped_by_surface() {
        assert_eq!(negotiate_image_count(Buffering::Triple, &caps(2, 2)), 2);
    }

    #[test]
    fn double_buffering_raised_to_minimum() {
        assert_eq!(negotiate_image_count(Buffering::Double, &caps(3, 8)), 3);
        assert_eq!(negotiate_image_count(Buffering::Double, &caps(1, 0)), 2);
        assert_eq!(negotiate_image_count(Buffering::Triple, &caps(2, 0)), 3);
    }

    #[test]
    fn present_mode_policy() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        let fifo_only = [vk::PresentModeKHR::FIFO];

        assert_eq!(
            choose_present_mode(&all, false, VkVsyncMode::Fifo),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&all, true, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&all, true, VkVsyncMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, true, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, false, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).0, srgb);
        assert_eq!(choose_surface_format(&[unorm]).0, unorm);

        let odd = vk::SurfaceFormatKHR {
            format: vk::Format::A2B10G10R10_UNORM_PACK32,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[odd]), (odd, "driver_default"));
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let got = extent_from_caps(&c, RenderSize { width: 1, height: 1 });
        assert_eq!((got.width, got.height), (800, 600));
    }

    #[test]
    fn extent_clamped_when_free() {
        let got = extent_from_caps(
            &caps(2, 3),
            RenderSize {
                width: 9000,
                height: 700,
            },
        );
        assert_eq!((got.width, got.height), (4096, 700));
    }
}
