// SPDX-License-Identifier: CEPL-1.0
//! [`RenderEngine`]: the device context, the swapchain and the frame ring in one owner, with
//! the acquire → submit → present cycle and the rebuild path on top.

use ash::vk;
use prism_render::RenderSize;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::config::{RendererOptions, VkVsyncMode};
use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::frame::{AcquireOutcome, FrameRing, FrameScheduler, PresentOutcome};
use crate::swapchain::{extent_from_caps, Swapchain, SwapchainConfig};
use crate::upload::UploadContext;

pub struct RenderEngine {
    swapchain: Swapchain,
    ring: FrameRing,
    scheduler: FrameScheduler,
    upload: UploadContext,
    cfg: SwapchainConfig,
    paused: bool,
    // Declared last: dropped after everything above has been destroyed.
    ctx: DeviceContext,
}

impl RenderEngine {
    /// `Ok(None)` when no GPU can drive this window.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RendererOptions,
    ) -> Result<Option<Self>, DriverError> {
        let Some(ctx) = DeviceContext::new(window, display, options)? else {
            return Ok(None);
        };
        let cfg = SwapchainConfig {
            hint: size,
            vsync: options.vsync,
            vsync_mode: options.vsync_mode,
            buffering: options.buffering,
        };
        let frames_in_flight = options.frames_in_flight();

        let swapchain = Swapchain::new(&ctx, cfg)?;
        let ring = FrameRing::new(&ctx, frames_in_flight)?;
        let upload = UploadContext::new(&ctx)?;
        info!(
            "render engine: {} swapchain images, {} frames in flight",
            swapchain.image_count(),
            frames_in_flight
        );

        Ok(Some(Self {
            swapchain,
            ring,
            scheduler: FrameScheduler::new(frames_in_flight),
            upload,
            cfg,
            paused: size.is_empty(),
            ctx,
        }))
    }

    pub fn ctx(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn upload(&self) -> &UploadContext {
        &self.upload
    }

    pub fn frames_in_flight(&self) -> usize {
        self.scheduler.frames_in_flight()
    }

    /// Slot for per-frame resources (uniform buffers, per-frame descriptor sets).
    pub fn frame_index(&self) -> usize {
        self.scheduler.frame_index()
    }

    /// Acquired swapchain image, for per-image resources (framebuffers, attachment sets).
    pub fn image_index(&self) -> Option<u32> {
        self.scheduler.image_index()
    }

    /// Command buffer of the current frame slot.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.ring.slot(self.scheduler.frame_index()).cmd
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn needs_rebuild(&self) -> bool {
        self.scheduler.needs_rebuild()
    }

    /// Waits for the current slot's fence and acquires the next image.
    ///
    /// `Ok(false)` means no image: either rendering is paused or the swapchain must be rebuilt
    /// with [`rebuild_swapchain`](Self::rebuild_swapchain) before the next attempt. On
    /// `Ok(true)` the slot's command buffer is reset and recording.
    pub fn acquire_next_image(&mut self) -> Result<bool, DriverError> {
        if self.paused || self.scheduler.needs_rebuild() {
            return Ok(false);
        }
        let loader = self.ctx.swapchain_loader().ok_or(DriverError::NoSurface)?;
        let device = self.ctx.device();

        let index = self.scheduler.begin_acquire()?;
        let slot = *self.ring.slot(index);
        unsafe {
            device
                .wait_for_fences(std::slice::from_ref(&slot.in_flight), true, u64::MAX)
                .during("wait_for_fences")?;
            self.scheduler.fence_waited();

            let outcome = AcquireOutcome::from_driver(loader.acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                slot.image_acquired,
                vk::Fence::null(),
            ))?;
            if !self.scheduler.finish_acquire(outcome)? {
                debug!("acquire: {outcome:?}, swapchain rebuild requested");
                return Ok(false);
            }

            // Only now: an early return above must leave the fence signaled for the next wait.
            device
                .reset_fences(std::slice::from_ref(&slot.in_flight))
                .during("reset_fences")?;
            device
                .reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty())
                .during("reset_command_buffer")?;
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(slot.cmd, &bi)
                .during("begin_command_buffer")?;
        }
        Ok(true)
    }

    /// Ends the current command buffer and submits it: waits on "image acquired", signals
    /// "render finished" and the slot's fence.
    pub fn submit(&mut self) -> Result<(), DriverError> {
        let slot = *self.ring.slot(self.scheduler.frame_index());
        self.scheduler.mark_submitted()?;
        let device = self.ctx.device();
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        unsafe {
            device
                .end_command_buffer(slot.cmd)
                .during("end_command_buffer")?;
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &slot.image_acquired,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &slot.cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &slot.render_finished,
                ..Default::default()
            };
            device
                .queue_submit(
                    self.ctx.graphics().queue,
                    std::slice::from_ref(&submit),
                    slot.in_flight,
                )
                .during("queue_submit")?;
        }
        Ok(())
    }

    /// Presents the acquired image and advances to the next frame slot. A stale swapchain is
    /// latched for rebuild, not reported.
    pub fn present(&mut self) -> Result<(), DriverError> {
        let loader = self.ctx.swapchain_loader().ok_or(DriverError::NoSurface)?;
        let slot = *self.ring.slot(self.scheduler.frame_index());
        let image_index = self.scheduler.presentable_image()?;
        let swapchain = self.swapchain.handle();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let outcome = PresentOutcome::from_driver(unsafe {
            loader.queue_present(self.ctx.present().queue, &present)
        })?;
        if outcome != PresentOutcome::Presented {
            debug!("present: {outcome:?}, swapchain rebuild requested");
        }
        self.scheduler.mark_presented(outcome)?;
        Ok(())
    }

    /// Records the new window size. Zero area pauses rendering until a real size arrives.
    pub fn resize(&mut self, size: RenderSize) {
        self.cfg.hint = size;
        if size.is_empty() {
            if !self.paused {
                info!("window is {}x{}: paused", size.width, size.height);
            }
            self.paused = true;
            return;
        }
        if self.paused {
            info!("window is {}x{}: resumed", size.width, size.height);
        }
        self.paused = false;
        self.scheduler.request_rebuild();
    }

    pub fn set_vsync(&mut self, vsync: bool, mode: VkVsyncMode) {
        if self.cfg.vsync != vsync || self.cfg.vsync_mode != mode {
            self.cfg.vsync = vsync;
            self.cfg.vsync_mode = mode;
            self.scheduler.request_rebuild();
        }
    }

    /// Waits for the device to go idle and recreates the swapchain at the current size.
    ///
    /// Returns `Ok(false)` when the surface has no area (rendering pauses instead); otherwise
    /// the caller must rebuild everything derived from the swapchain images.
    pub fn rebuild_swapchain(&mut self) -> Result<bool, DriverError> {
        let surface = self.ctx.surface().ok_or(DriverError::NoSurface)?;
        let caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(self.ctx.phys(), surface.handle)
        }
        .during("get_physical_device_surface_capabilities")?;
        let extent = extent_from_caps(&caps, self.cfg.hint);
        if extent.width == 0 || extent.height == 0 {
            self.paused = true;
            return Ok(false);
        }

        self.ctx.wait_idle()?;
        unsafe {
            for slot in self.scheduler.take_stale_semaphores() {
                self.ring.replace_image_acquired(&self.ctx, slot)?;
            }
            self.swapchain.rebuild(&self.ctx, self.cfg)?;
        }
        self.scheduler.rebuild_done();
        Ok(true)
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().device_wait_idle().ok();
            self.ring.destroy(&self.ctx);
            self.upload.destroy(&self.ctx);
            self.swapchain.destroy(&self.ctx);
        }
    }
}
