// SPDX-License-Identifier: CEPL-1.0
//! Render pass / attachment composer.
//!
//! A pass is assembled attachment by attachment and then built into a single-subpass
//! `VkRenderPass` plus one framebuffer per swapchain image. Owned attachments are arrays with
//! one image per swapchain slot so that frame N can sample what frame N-1 is still writing.

use ash::vk;
use thiserror::Error;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::format::is_depth_format;
use crate::resource::{create_image, destroy_image, Image};
use crate::swapchain::Swapchain;

#[derive(Debug, Error)]
pub enum RenderPassError {
    #[error("render pass declares {count} depth attachments, at most one is allowed")]
    MultipleDepthAttachments { count: usize },
    #[error("render pass has no attachments")]
    Empty,
    #[error("attachment extent {given:?} differs from the pass extent {expected:?}")]
    ExtentMismatch {
        expected: vk::Extent2D,
        given: vk::Extent2D,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBehavior {
    Clear,
    /// Keeps what the previous pass left in the attachment.
    Load,
    DontCare,
}

impl LoadBehavior {
    fn op(self) -> vk::AttachmentLoadOp {
        match self {
            LoadBehavior::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadBehavior::Load => vk::AttachmentLoadOp::LOAD,
            LoadBehavior::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentSource {
    /// One image per swapchain slot, allocated by the pass.
    Owned,
    /// The presentable image of the slot.
    SwapchainColor,
    /// The swapchain's depth image, shared by all slots.
    SwapchainDepth,
}

#[derive(Clone, Copy, Debug)]
pub struct AttachmentDesc {
    pub source: AttachmentSource,
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    pub load: LoadBehavior,
}

struct Attachment {
    desc: AttachmentDesc,
    images: Vec<Image>,
}

/// Attachment references of the single subpass.
#[derive(Debug, Default)]
pub struct AttachmentRefs {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
}

pub struct RenderPass {
    handle: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    attachments: Vec<Attachment>,
    extent: vk::Extent2D,
    image_count: usize,
    presents: bool,
}

impl RenderPass {
    /// Empty pass for a chain of `image_count` swapchain images. A presenting pass leaves its
    /// swapchain attachment ready for presentation.
    pub fn new(image_count: usize, presents: bool) -> Self {
        Self {
            handle: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            attachments: Vec::new(),
            extent: vk::Extent2D::default(),
            image_count,
            presents,
        }
    }

    /// Appends an owned attachment and allocates its per-slot images. Returns its index.
    pub fn add_attachment(
        &mut self,
        ctx: &DeviceContext,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        extent: vk::Extent2D,
        load: LoadBehavior,
    ) -> Result<usize, RenderPassError> {
        self.extent = shared_extent(self.nominal_extent(), extent)?;
        let desc = AttachmentDesc {
            source: AttachmentSource::Owned,
            usage,
            format,
            load,
        };
        let images = allocate_images(ctx, &desc, extent, self.image_count)?;
        self.attachments.push(Attachment { desc, images });
        Ok(self.attachments.len() - 1)
    }

    /// Appends the swapchain color image as an attachment.
    pub fn add_swapchain_attachment(
        &mut self,
        swapchain: &Swapchain,
        load: LoadBehavior,
    ) -> Result<usize, RenderPassError> {
        self.push_borrowed(
            AttachmentDesc {
                source: AttachmentSource::SwapchainColor,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                format: swapchain.format(),
                load,
            },
            swapchain.extent(),
        )
    }

    /// Appends the swapchain's depth image as the depth attachment.
    pub fn add_swapchain_depth(
        &mut self,
        ctx: &DeviceContext,
        swapchain: &Swapchain,
    ) -> Result<usize, RenderPassError> {
        self.push_borrowed(
            AttachmentDesc {
                source: AttachmentSource::SwapchainDepth,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                format: ctx.depth_format(),
                load: LoadBehavior::Clear,
            },
            swapchain.extent(),
        )
    }

    fn push_borrowed(
        &mut self,
        desc: AttachmentDesc,
        extent: vk::Extent2D,
    ) -> Result<usize, RenderPassError> {
        self.extent = shared_extent(self.nominal_extent(), extent)?;
        self.attachments.push(Attachment {
            desc,
            images: Vec::new(),
        });
        Ok(self.attachments.len() - 1)
    }

    fn nominal_extent(&self) -> Option<vk::Extent2D> {
        (!self.attachments.is_empty()).then_some(self.extent)
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.framebuffers[image_index]
    }

    /// Number of color attachments, i.e. blend states a pipeline for this pass needs.
    pub fn color_attachment_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| !is_depth_format(a.desc.format))
            .count()
    }

    /// View of an owned attachment for the given swapchain slot.
    pub fn attachment_view(&self, attachment: usize, image_index: usize) -> vk::ImageView {
        self.attachments[attachment].images[image_index].view
    }

    /// Creates the pass handle and one framebuffer per swapchain image.
    pub fn build(
        &mut self,
        ctx: &DeviceContext,
        swapchain: &Swapchain,
    ) -> Result<(), RenderPassError> {
        if self.attachments.is_empty() {
            return Err(RenderPassError::Empty);
        }
        let formats: Vec<vk::Format> = self.attachments.iter().map(|a| a.desc.format).collect();
        let refs = derive_attachment_refs(&formats)?;

        let descriptions: Vec<vk::AttachmentDescription> = self
            .attachments
            .iter()
            .map(|a| attachment_description(&a.desc, self.presents))
            .collect();

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: refs.color.len() as u32,
            p_color_attachments: refs.color.as_ptr(),
            p_depth_stencil_attachment: refs
                .depth
                .as_ref()
                .map_or(std::ptr::null(), |d| d as *const _),
            ..Default::default()
        };
        let dependencies = subpass_dependencies();

        let rp_ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: descriptions.len() as u32,
            p_attachments: descriptions.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: dependencies.len() as u32,
            p_dependencies: dependencies.as_ptr(),
            ..Default::default()
        };

        let device = ctx.device();
        unsafe {
            self.handle = device
                .create_render_pass(&rp_ci, None)
                .during("create_render_pass")?;

            for i in 0..self.image_count {
                let views = self.framebuffer_views(swapchain, i);
                let fb_ci = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: self.handle,
                    attachment_count: views.len() as u32,
                    p_attachments: views.as_ptr(),
                    width: self.extent.width,
                    height: self.extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = device
                    .create_framebuffer(&fb_ci, None)
                    .during("create_framebuffer")?;
                self.framebuffers.push(fb);
            }
        }

        debug!(
            "render pass: {} color + {} depth, {} framebuffers at {}x{}",
            refs.color.len(),
            refs.depth.is_some() as u32,
            self.framebuffers.len(),
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    fn framebuffer_views(&self, swapchain: &Swapchain, image_index: usize) -> Vec<vk::ImageView> {
        self.attachments
            .iter()
            .map(|a| match a.desc.source {
                AttachmentSource::Owned => a.images[image_index].view,
                AttachmentSource::SwapchainColor => swapchain.views()[image_index],
                AttachmentSource::SwapchainDepth => swapchain
                    .depth()
                    .map_or(vk::ImageView::null(), |d| d.view),
            })
            .collect()
    }

    /// Tears everything down and rebuilds it at the swapchain's current extent from the
    /// recorded attachment list.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn resize(
        &mut self,
        ctx: &DeviceContext,
        swapchain: &Swapchain,
    ) -> Result<(), RenderPassError> {
        self.release(ctx);
        self.image_count = swapchain.image_count();
        self.extent = swapchain.extent();
        for a in &mut self.attachments {
            match a.desc.source {
                AttachmentSource::Owned => {
                    a.images = allocate_images(ctx, &a.desc, self.extent, self.image_count)?;
                }
                AttachmentSource::SwapchainColor => a.desc.format = swapchain.format(),
                AttachmentSource::SwapchainDepth => {}
            }
        }
        self.build(ctx, swapchain)
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.release(ctx);
    }

    // Framebuffers, then attachment images, then the pass.
    unsafe fn release(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        for a in &mut self.attachments {
            for image in a.images.drain(..) {
                destroy_image(ctx, image);
            }
        }
        if self.handle != vk::RenderPass::null() {
            device.destroy_render_pass(self.handle, None);
            self.handle = vk::RenderPass::null();
        }
    }

    /// One clear value per attachment, in attachment order.
    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|a| clear_value(a.desc.format, clear_color))
            .collect()
    }

    pub fn begin(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image_index: usize,
        clear_color: [f32; 4],
    ) {
        let clears = self.clear_values(clear_color);
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.handle,
            framebuffer: self.framebuffers[image_index],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe { device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE) };
    }

    pub fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_end_render_pass(cmd) };
    }
}

fn allocate_images(
    ctx: &DeviceContext,
    desc: &AttachmentDesc,
    extent: vk::Extent2D,
    count: usize,
) -> Result<Vec<Image>, DriverError> {
    let mut images = Vec::with_capacity(count);
    for _ in 0..count {
        match create_image(ctx, desc.format, extent, desc.usage) {
            Ok(image) => images.push(image),
            Err(e) => {
                for image in images {
                    unsafe { destroy_image(ctx, image) };
                }
                return Err(e);
            }
        }
    }
    Ok(images)
}

/// Depth attachments (found by format) get the single depth-stencil reference; all others
/// become color references in declaration order.
pub fn derive_attachment_refs(formats: &[vk::Format]) -> Result<AttachmentRefs, RenderPassError> {
    let mut refs = AttachmentRefs::default();
    let mut depth_count = 0;
    for (i, &format) in formats.iter().enumerate() {
        if is_depth_format(format) {
            depth_count += 1;
            refs.depth = Some(vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
        } else {
            refs.color.push(vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }
    }
    if depth_count > 1 {
        return Err(RenderPassError::MultipleDepthAttachments { count: depth_count });
    }
    Ok(refs)
}

/// Layout the attachment is left in at the end of the pass.
pub fn final_layout(desc: &AttachmentDesc, presents: bool) -> vk::ImageLayout {
    match desc.source {
        AttachmentSource::SwapchainColor if presents => vk::ImageLayout::PRESENT_SRC_KHR,
        AttachmentSource::SwapchainColor => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        _ if desc.usage.contains(vk::ImageUsageFlags::SAMPLED) => {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }
        _ if is_depth_format(desc.format) => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        _ => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }
}

pub fn attachment_description(desc: &AttachmentDesc, presents: bool) -> vk::AttachmentDescription {
    let depth = is_depth_format(desc.format);
    let final_layout = final_layout(desc, presents);
    let initial_layout = match (desc.load, desc.source) {
        (LoadBehavior::Load, AttachmentSource::SwapchainColor) => {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        }
        (LoadBehavior::Load, _) => final_layout,
        _ => vk::ImageLayout::UNDEFINED,
    };
    let keep = !depth || desc.usage.contains(vk::ImageUsageFlags::SAMPLED);

    vk::AttachmentDescription {
        format: desc.format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: desc.load.op(),
        store_op: if keep {
            vk::AttachmentStoreOp::STORE
        } else {
            vk::AttachmentStoreOp::DONT_CARE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout,
        final_layout,
        ..Default::default()
    }
}

/// External→0 and 0→external. Covers attachment writes of the previous user of the images
/// and sampling by the next pass.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let attachment_rw = attachment_writes
        | vk::AccessFlags::COLOR_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;

    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage_mask: attachment_stages,
            src_access_mask: attachment_writes,
            dst_access_mask: attachment_rw,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: attachment_stages,
            dst_stage_mask: attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: attachment_writes,
            dst_access_mask: attachment_rw | vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ]
}

pub fn clear_value(format: vk::Format, clear_color: [f32; 4]) -> vk::ClearValue {
    if is_depth_format(format) {
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }
    } else {
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }
    }
}

/// Every attachment of a pass has the extent of the first one.
pub fn shared_extent(
    current: Option<vk::Extent2D>,
    given: vk::Extent2D,
) -> Result<vk::Extent2D, RenderPassError> {
    match current {
        Some(expected) if expected != given => {
            Err(RenderPassError::ExtentMismatch { expected, given })
        }
        _ => Ok(given),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(usage: vk::ImageUsageFlags, format: vk::Format, load: LoadBehavior) -> AttachmentDesc {
        AttachmentDesc {
            source: AttachmentSource::Owned,
            usage,
            format,
            load,
        }
    }

    #[test]
    fn gbuffer_refs_have_one_depth_and_ordered_colors() {
        let formats = [
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R16G16B16A16_SFLOAT,
        ];
        let refs = derive_attachment_refs(&formats).unwrap();
        let depth = refs.depth.unwrap();
        assert_eq!(depth.attachment, 1);
        assert_eq!(
            depth.layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        let colors: Vec<u32> = refs.color.iter().map(|r| r.attachment).collect();
        assert_eq!(colors, vec![0, 2, 3]);
    }

    #[test]
    fn color_only_pass_has_no_depth_ref() {
        let refs = derive_attachment_refs(&[vk::Format::B8G8R8A8_SRGB]).unwrap();
        assert!(refs.depth.is_none());
        assert_eq!(refs.color.len(), 1);
    }

    #[test]
    fn depth_only_pass_has_zero_colors() {
        let refs = derive_attachment_refs(&[vk::Format::D24_UNORM_S8_UINT]).unwrap();
        assert!(refs.depth.is_some());
        assert!(refs.color.is_empty());
    }

    #[test]
    fn second_depth_attachment_is_rejected() {
        let err =
            derive_attachment_refs(&[vk::Format::D32_SFLOAT, vk::Format::D16_UNORM]).unwrap_err();
        assert!(matches!(
            err,
            RenderPassError::MultipleDepthAttachments { count: 2 }
        ));
    }

    #[test]
    fn attachments_must_share_the_pass_extent() {
        let full = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let half = vk::Extent2D {
            width: 640,
            height: 360,
        };
        assert_eq!(shared_extent(None, half).unwrap(), half);
        assert_eq!(shared_extent(Some(full), full).unwrap(), full);
        assert!(matches!(
            shared_extent(Some(full), half),
            Err(RenderPassError::ExtentMismatch { expected, given })
                if expected == full && given == half
        ));
    }

    #[test]
    fn sampled_gbuffer_target_ends_shader_readable() {
        let d = owned(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::Format::R16G16B16A16_SFLOAT,
            LoadBehavior::Clear,
        );
        let a = attachment_description(&d, false);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn depth_target_is_discarded_after_the_pass() {
        let d = owned(
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::Format::D32_SFLOAT,
            LoadBehavior::Clear,
        );
        let a = attachment_description(&d, false);
        assert_eq!(
            a.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(a.store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn swapchain_layouts_follow_presenting_pass() {
        let lighting = AttachmentDesc {
            source: AttachmentSource::SwapchainColor,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            format: vk::Format::B8G8R8A8_SRGB,
            load: LoadBehavior::Clear,
        };
        let a = attachment_description(&lighting, false);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let ui = AttachmentDesc {
            load: LoadBehavior::Load,
            ..lighting
        };
        let a = attachment_description(&ui, true);
        assert_eq!(a.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn dependencies_bracket_the_subpass() {
        let [into, out_of] = subpass_dependencies();
        assert_eq!(into.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(into.dst_subpass, 0);
        assert_eq!(out_of.src_subpass, 0);
        assert_eq!(out_of.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(into
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(out_of.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
    }

    #[test]
    fn clear_values_follow_format() {
        let depth = clear_value(vk::Format::D32_SFLOAT, [0.5; 4]);
        let color = clear_value(vk::Format::R8G8B8A8_UNORM, [0.25, 0.5, 0.75, 1.0]);
        unsafe {
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(color.color.float32, [0.25, 0.5, 0.75, 1.0]);
        }
    }
}
