// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use prism_render_vk::{Buffering, RendererOptions, VkVsyncMode, DEFAULT_FRAMES_IN_FLIGHT};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BufferingCfg {
    Double,
    #[default]
    Triple,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub buffering: BufferingCfg,
    pub frames_in_flight: usize,
    pub wireframe: bool,
    pub validation: bool,
    pub shader_dir: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            buffering: BufferingCfg::Triple,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            wireframe: false,
            validation: true,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

/// Reads `path`; a missing file means defaults, a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => {
                info!("config: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => AppCfg::default(),
    }
}

impl RenderCfg {
    pub fn to_options(&self) -> RendererOptions {
        RendererOptions {
            vsync: self.vsync,
            vsync_mode: match self.vsync_mode {
                VsyncMode::Fifo => VkVsyncMode::Fifo,
                VsyncMode::Mailbox => VkVsyncMode::Mailbox,
            },
            buffering: match self.buffering {
                BufferingCfg::Double => Buffering::Double,
                BufferingCfg::Triple => Buffering::Triple,
            },
            frames_in_flight: self.frames_in_flight,
            clear_color: self.clear_color,
            wireframe: self.wireframe,
            validation: self.validation,
            shader_dir: self.shader_dir.clone(),
            ..RendererOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert!(cfg.render.vsync);
        assert_eq!(cfg.render.buffering, BufferingCfg::Triple);
        assert_eq!(cfg.render.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn partial_render_table_keeps_other_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            vsync_mode = "fifo"
            buffering = "double"
            wireframe = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.vsync_mode, VsyncMode::Fifo);
        assert!(cfg.render.wireframe);
        assert_eq!(cfg.render.clear_color, RenderCfg::default().clear_color);

        let opts = cfg.render.to_options();
        assert_eq!(opts.buffering, Buffering::Double);
        assert_eq!(opts.vsync_mode, VkVsyncMode::Fifo);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = load_cfg(Path::new("definitely/not/here/prism.toml"));
        assert_eq!(cfg.render.shader_dir, PathBuf::from("shaders"));
    }
}
