// SPDX-License-Identifier: CEPL-1.0
//! Frame-in-flight bookkeeping.
//!
//! [`FrameScheduler`] is the driver-free half: it tracks which ring slot is current, where each
//! slot is in its `Idle → Acquiring → Recording → Submitted → Presented` cycle, whether the
//! slot's submit fence is known to be signaled, and whether the swapchain must be rebuilt.
//! [`FrameRing`] owns the Vulkan objects of each slot.

use ash::vk;
use thiserror::Error;

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

/// What the driver answered to an acquire request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// An image was acquired but no longer matches the surface exactly.
    Suboptimal(u32),
    OutOfDate,
}

impl AcquireOutcome {
    pub fn from_driver(result: Result<(u32, bool), vk::Result>) -> Result<Self, DriverError> {
        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(DriverError::vulkan("acquire_next_image", e)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn from_driver(result: Result<bool, vk::Result>) -> Result<Self, DriverError> {
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(DriverError::vulkan("queue_present", e)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("frame slot {slot} is {state:?}, cannot start acquiring")]
    SlotBusy { slot: usize, state: FrameState },
    #[error("frame slot {slot}: fence reset before it was seen signaled")]
    FenceNotSignaled { slot: usize },
    #[error("submit without an acquired image (slot {slot} is {state:?})")]
    NothingToSubmit { slot: usize, state: FrameState },
    #[error("present before submit (slot {slot} is {state:?})")]
    NothingToPresent { slot: usize, state: FrameState },
    #[error("swapchain rebuild pending")]
    RebuildPending,
}

#[derive(Debug)]
pub struct FrameScheduler {
    frame_index: usize,
    states: Vec<FrameState>,
    fence_signaled: Vec<bool>,
    stale_acquire_semaphore: Vec<bool>,
    image_index: Option<u32>,
    needs_rebuild: bool,
    presents: u64,
}

impl FrameScheduler {
    /// Fences start signaled so the first wait on every slot returns immediately.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame in flight");
        Self {
            frame_index: 0,
            states: vec![FrameState::Idle; frames_in_flight],
            fence_signaled: vec![true; frames_in_flight],
            stale_acquire_semaphore: vec![false; frames_in_flight],
            image_index: None,
            needs_rebuild: false,
            presents: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.states.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Image acquired for the current frame, if any.
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    pub fn state(&self, slot: usize) -> FrameState {
        self.states[slot]
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// Forces the next frame through the rebuild path (resize events, vsync changes).
    pub fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// Starts a frame on the current slot. Returns the slot whose fence must be waited on.
    pub fn begin_acquire(&mut self) -> Result<usize, SchedulerError> {
        if self.needs_rebuild {
            return Err(SchedulerError::RebuildPending);
        }
        let slot = self.frame_index;
        match self.states[slot] {
            FrameState::Idle | FrameState::Presented => {
                self.states[slot] = FrameState::Acquiring;
                self.image_index = None;
                Ok(slot)
            }
            state => Err(SchedulerError::SlotBusy { slot, state }),
        }
    }

    /// The current slot's submit fence was waited on and is signaled.
    pub fn fence_waited(&mut self) {
        self.fence_signaled[self.frame_index] = true;
    }

    /// Feeds the driver's acquire answer. Returns `Ok(true)` with the image ready to record,
    /// `Ok(false)` when the swapchain must be rebuilt first.
    ///
    /// On `Ok(true)` the caller resets the slot's fence and command buffer; the scheduler
    /// records the fence as unsignaled from here on.
    pub fn finish_acquire(&mut self, outcome: AcquireOutcome) -> Result<bool, SchedulerError> {
        let slot = self.frame_index;
        match outcome {
            AcquireOutcome::Acquired(index) => {
                if !self.fence_signaled[slot] {
                    return Err(SchedulerError::FenceNotSignaled { slot });
                }
                self.fence_signaled[slot] = false;
                self.states[slot] = FrameState::Recording;
                self.image_index = Some(index);
                Ok(true)
            }
            AcquireOutcome::Suboptimal(_) => {
                // The acquire semaphore will still be signaled by the presentation engine.
                self.stale_acquire_semaphore[slot] = true;
                self.abandon_acquire(slot);
                Ok(false)
            }
            AcquireOutcome::OutOfDate => {
                self.abandon_acquire(slot);
                Ok(false)
            }
        }
    }

    fn abandon_acquire(&mut self, slot: usize) {
        self.states[slot] = FrameState::Idle;
        self.image_index = None;
        self.needs_rebuild = true;
    }

    /// The current slot's command buffer was submitted with its fence.
    pub fn mark_submitted(&mut self) -> Result<(), SchedulerError> {
        let slot = self.frame_index;
        match self.states[slot] {
            FrameState::Recording => {
                self.states[slot] = FrameState::Submitted;
                Ok(())
            }
            state => Err(SchedulerError::NothingToSubmit { slot, state }),
        }
    }

    /// Image to present: the current slot must have been submitted.
    pub fn presentable_image(&self) -> Result<u32, SchedulerError> {
        let slot = self.frame_index;
        match (self.states[slot], self.image_index) {
            (FrameState::Submitted, Some(index)) => Ok(index),
            (state, _) => Err(SchedulerError::NothingToPresent { slot, state }),
        }
    }

    /// Feeds the driver's present answer and moves on to the next slot.
    ///
    /// The slot advances even when the swapchain turned out stale: the submission happened and
    /// its fence will signal.
    pub fn mark_presented(&mut self, outcome: PresentOutcome) -> Result<(), SchedulerError> {
        let slot = self.frame_index;
        if self.states[slot] != FrameState::Submitted {
            return Err(SchedulerError::NothingToPresent {
                slot,
                state: self.states[slot],
            });
        }
        self.states[slot] = FrameState::Presented;
        if outcome != PresentOutcome::Presented {
            self.needs_rebuild = true;
        }
        self.image_index = None;
        self.presents += 1;
        self.frame_index = (self.frame_index + 1) % self.states.len();
        Ok(())
    }

    /// Slots whose acquire semaphore must be recreated during the pending rebuild.
    pub fn take_stale_semaphores(&mut self) -> Vec<usize> {
        let stale = self
            .stale_acquire_semaphore
            .iter()
            .enumerate()
            .filter_map(|(slot, &stale)| stale.then_some(slot))
            .collect();
        self.stale_acquire_semaphore.fill(false);
        stale
    }

    /// The swapchain was rebuilt after a device-idle wait.
    pub fn rebuild_done(&mut self) {
        self.needs_rebuild = false;
    }
}

/// Vulkan objects of one frame-in-flight slot.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub in_flight: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

pub struct FrameRing {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    pub fn new(ctx: &DeviceContext, frames_in_flight: usize) -> Result<Self, DriverError> {
        let device = ctx.device();
        unsafe {
            let pool_ci = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: ctx.graphics().family,
                ..Default::default()
            };
            let pool = device
                .create_command_pool(&pool_ci, None)
                .during("create_command_pool")?;
            let mut ring = Self {
                pool,
                slots: Vec::with_capacity(frames_in_flight),
            };

            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: frames_in_flight as u32,
                ..Default::default()
            };
            let cmds = match device.allocate_command_buffers(&ai) {
                Ok(c) => c,
                Err(e) => {
                    ring.destroy(ctx);
                    return Err(DriverError::vulkan("allocate_command_buffers", e));
                }
            };

            let fence_ci = vk::FenceCreateInfo {
                s_type: vk::StructureType::FENCE_CREATE_INFO,
                flags: vk::FenceCreateFlags::SIGNALED,
                ..Default::default()
            };
            for cmd in cmds {
                let slot = (|| -> Result<FrameSlot, DriverError> {
                    Ok(FrameSlot {
                        cmd,
                        in_flight: device
                            .create_fence(&fence_ci, None)
                            .during("create_fence")?,
                        image_acquired: create_semaphore(device)?,
                        render_finished: create_semaphore(device)?,
                    })
                })();
                match slot {
                    Ok(s) => ring.slots.push(s),
                    Err(e) => {
                        ring.destroy(ctx);
                        return Err(e);
                    }
                }
            }
            Ok(ring)
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Swaps in a fresh "image acquired" semaphore.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn replace_image_acquired(
        &mut self,
        ctx: &DeviceContext,
        index: usize,
    ) -> Result<(), DriverError> {
        let device = ctx.device();
        let fresh = create_semaphore(device)?;
        let old = std::mem::replace(&mut self.slots[index].image_acquired, fresh);
        device.destroy_semaphore(old, None);
        Ok(())
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        for s in self.slots.drain(..) {
            device.destroy_semaphore(s.render_finished, None);
            device.destroy_semaphore(s.image_acquired, None);
            device.destroy_fence(s.in_flight, None);
        }
        // Frees the command buffers with it.
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}

unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore, DriverError> {
    let ci = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    device.create_semaphore(&ci, None).during("create_semaphore")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs one frame through the scheduler the way the engine does, with `acquire` standing
    /// in for the driver.
    fn run_frame(s: &mut FrameScheduler, acquire: AcquireOutcome) -> bool {
        s.begin_acquire().unwrap();
        s.fence_waited();
        if !s.finish_acquire(acquire).unwrap() {
            return false;
        }
        s.mark_submitted().unwrap();
        s.mark_presented(PresentOutcome::Presented).unwrap();
        true
    }

    #[test]
    fn frame_index_counts_presents_modulo_ring() {
        for n in 1..=3 {
            let mut s = FrameScheduler::new(n);
            for p in 0..10u32 {
                assert_eq!(s.frame_index(), p as usize % n);
                assert!(run_frame(&mut s, AcquireOutcome::Acquired(p % 3)));
            }
            assert_eq!(s.frame_index(), 10 % n);
        }
    }

    #[test]
    fn rebuilds_do_not_move_frame_index() {
        let mut s = FrameScheduler::new(2);
        let mut presents = 0;
        for i in 0..12 {
            let outcome = if i % 3 == 0 {
                AcquireOutcome::OutOfDate
            } else {
                AcquireOutcome::Acquired(0)
            };
            if run_frame(&mut s, outcome) {
                presents += 1;
            } else {
                s.take_stale_semaphores();
                s.rebuild_done();
            }
            assert_eq!(s.frame_index(), presents % 2);
        }
        assert_eq!(s.presents(), presents as u64);
    }

    #[test]
    fn stale_present_still_advances() {
        let mut s = FrameScheduler::new(2);
        s.begin_acquire().unwrap();
        s.fence_waited();
        assert!(s.finish_acquire(AcquireOutcome::Acquired(1)).unwrap());
        s.mark_submitted().unwrap();
        assert_eq!(s.presentable_image(), Ok(1));
        s.mark_presented(PresentOutcome::OutOfDate).unwrap();
        assert_eq!(s.frame_index(), 1);
        assert!(s.needs_rebuild());
        assert_eq!(s.begin_acquire(), Err(SchedulerError::RebuildPending));
    }

    #[test]
    fn fence_must_be_seen_signaled_before_reuse() {
        let mut s = FrameScheduler::new(1);
        assert!(run_frame(&mut s, AcquireOutcome::Acquired(0)));

        // Same slot again, but nobody waited on its fence.
        s.begin_acquire().unwrap();
        assert_eq!(
            s.finish_acquire(AcquireOutcome::Acquired(0)),
            Err(SchedulerError::FenceNotSignaled { slot: 0 })
        );
    }

    #[test]
    fn every_slot_waits_before_reset() {
        let n = 3;
        let mut s = FrameScheduler::new(n);
        for _round in 0..2 {
            for slot in 0..n {
                assert_eq!(s.begin_acquire().unwrap(), slot);
                s.fence_waited();
                assert!(s.finish_acquire(AcquireOutcome::Acquired(0)).unwrap());
                // Fence is reset and pending until the next wait on this slot.
                s.mark_submitted().unwrap();
                s.mark_presented(PresentOutcome::Presented).unwrap();
            }
        }
    }

    #[test]
    fn out_of_date_acquire_blocks_submit_until_rebuilt() {
        let mut s = FrameScheduler::new(2);
        s.begin_acquire().unwrap();
        s.fence_waited();
        assert_eq!(s.finish_acquire(AcquireOutcome::OutOfDate), Ok(false));
        assert_eq!(s.image_index(), None);
        assert!(matches!(
            s.mark_submitted(),
            Err(SchedulerError::NothingToSubmit { slot: 0, .. })
        ));
        assert!(s.needs_rebuild());

        s.rebuild_done();
        let image_count = 3;
        s.begin_acquire().unwrap();
        s.fence_waited();
        assert_eq!(s.finish_acquire(AcquireOutcome::Acquired(2)), Ok(true));
        let index = s.image_index().unwrap();
        assert!(index < image_count);
        s.mark_submitted().unwrap();
    }

    #[test]
    fn suboptimal_acquire_marks_semaphore_stale() {
        let mut s = FrameScheduler::new(2);
        assert!(run_frame(&mut s, AcquireOutcome::Acquired(0)));
        assert!(!run_frame(&mut s, AcquireOutcome::Suboptimal(1)));
        assert_eq!(s.take_stale_semaphores(), vec![1]);
        assert!(s.take_stale_semaphores().is_empty());
        s.rebuild_done();
        assert_eq!(s.frame_index(), 1);
    }

    #[test]
    fn present_requires_submit() {
        let mut s = FrameScheduler::new(2);
        s.begin_acquire().unwrap();
        s.fence_waited();
        s.finish_acquire(AcquireOutcome::Acquired(0)).unwrap();
        assert!(s.presentable_image().is_err());
        assert!(matches!(
            s.mark_presented(PresentOutcome::Presented),
            Err(SchedulerError::NothingToPresent {
                state: FrameState::Recording,
                ..
            })
        ));
    }

    #[test]
    fn driver_results_map_to_outcomes() {
        assert_eq!(
            AcquireOutcome::from_driver(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired(2)
        );
        assert_eq!(
            AcquireOutcome::from_driver(Ok((1, true))).unwrap(),
            AcquireOutcome::Suboptimal(1)
        );
        assert_eq!(
            AcquireOutcome::from_driver(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(AcquireOutcome::from_driver(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
        assert_eq!(
            PresentOutcome::from_driver(Ok(true)).unwrap(),
            PresentOutcome::Suboptimal
        );
    }
}
