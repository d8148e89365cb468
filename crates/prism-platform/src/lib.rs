// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use prism_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Current framebuffer extent of `window` in physical pixels.
pub fn window_extent(window: &Window) -> RenderSize {
    extent_of(window.inner_size())
}

pub fn extent_of(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_window_maps_to_empty_extent() {
        let size = extent_of(PhysicalSize::new(0, 720));
        assert!(size.is_empty());
        assert!(!extent_of(PhysicalSize::new(1280, 720)).is_empty());
    }
}
