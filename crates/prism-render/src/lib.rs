// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering API and the boundary types shared with the
//! collaborators around the renderer (window, shader front-end, asset loader).

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// A minimised or collapsed window; nothing can be presented at this size.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Conventional file extension for GLSL sources of this stage.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader `{name}` failed to compile: {message}")]
    Compile { name: String, message: String },

    #[error("shader `{name}` could not be read: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shader compiler unavailable: {0}")]
    Unavailable(String),
}

/// Shader front-end: turns source text into a SPIR-V word stream.
pub trait ShaderCompiler {
    fn compile(&self, stage: ShaderStage, name: &str, source: &str) -> Result<Vec<u32>, ShaderError>;
}

/// Vertex layout produced by the model loader: position, normal, texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Vertex/index arrays handed over by the model loader, complete and owned.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Tightly packed RGBA8 pixels handed over by the texture loader.
#[derive(Clone, Debug)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PixelData {
    /// 1x1 texture of a single color, used when a mesh has no texture.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }

    /// Byte length `rgba` must have, or `None` when it does not fit in memory.
    pub fn expected_len(&self) -> Option<usize> {
        let bytes = u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(4)?;
        usize::try_from(bytes).ok()
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.expected_len() == Some(self.rgba.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn pixel_data_checks_buffer_length() {
        assert!(PixelData::solid([255, 255, 255, 255]).is_well_formed());
        let short = PixelData {
            width: 2,
            height: 2,
            rgba: vec![0; 15],
        };
        assert!(!short.is_well_formed());
    }

    #[test]
    fn huge_dimensions_do_not_wrap_to_an_empty_image() {
        let huge = PixelData {
            width: 65536,
            height: 65536,
            rgba: Vec::new(),
        };
        assert!(!huge.is_well_formed());
        let widest = PixelData {
            width: u32::MAX,
            height: u32::MAX,
            rgba: Vec::new(),
        };
        assert!(!widest.is_well_formed());
    }
}
