// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VkVsyncMode {
    Fifo,    // Target monitor refresh rate
    Mailbox, // Smart Vsync, fps uncapped
}

/// Requested length of the presentable image chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Buffering {
    Double,
    Triple,
}

impl Buffering {
    pub fn image_count(self) -> u32 {
        match self {
            Buffering::Double => 2,
            Buffering::Triple => 3,
        }
    }
}

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Runtime knobs of the Vulkan renderer.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    pub buffering: Buffering,
    /// Independent of the swapchain image count. Clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub wireframe: bool,
    /// Enable the Khronos validation layer (debug builds only, when installed).
    pub validation: bool,
    /// Directory holding precompiled `<name>.spv` files, used without a runtime compiler.
    pub shader_dir: PathBuf,
    /// `None` disables pipeline-cache persistence.
    pub pipeline_cache_dir: Option<PathBuf>,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            vsync: true,
            vsync_mode: VkVsyncMode::Mailbox,
            buffering: Buffering::Triple,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            wireframe: false,
            validation: true,
            shader_dir: PathBuf::from("shaders"),
            pipeline_cache_dir: Some(PathBuf::from(".")),
        }
    }
}

impl RendererOptions {
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut opts = RendererOptions::default();
        assert_eq!(opts.frames_in_flight(), 2);
        opts.frames_in_flight = 0;
        assert_eq!(opts.frames_in_flight(), 1);
        opts.frames_in_flight = 9;
        assert_eq!(opts.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }
}
