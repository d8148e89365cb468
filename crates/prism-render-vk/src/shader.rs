// SPDX-License-Identifier: CEPL-1.0
//! Shader front-end adapters and module creation.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use ash::util::read_spv;
use ash::vk;
use prism_render::{ShaderCompiler, ShaderError, ShaderStage};
use tracing::{debug, error};

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};

pub fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Compiles `source` and wraps it in a shader module.
///
/// A compile failure is logged and yields `Ok(None)`; only the driver refusing a valid
/// module is an error.
pub fn load_shader(
    ctx: &DeviceContext,
    compiler: &dyn ShaderCompiler,
    stage: ShaderStage,
    name: &str,
    source: &str,
) -> Result<Option<vk::ShaderModule>, DriverError> {
    let words = match compiler.compile(stage, name, source) {
        Ok(words) => words,
        Err(e) => {
            error!("{e}");
            return Ok(None);
        }
    };
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    let module = unsafe { ctx.device().create_shader_module(&ci, None) }
        .during("create_shader_module")?;
    debug!("shader `{name}` ({stage:?}): {} words", words.len());
    Ok(Some(module))
}

/// # Safety
/// Pipelines built from the module keep working; the module itself must not be in use by a
/// pipeline creation running concurrently.
pub unsafe fn destroy_shader(ctx: &DeviceContext, module: vk::ShaderModule) {
    ctx.device().destroy_shader_module(module, None);
}

/// Loads precompiled SPIR-V from `<dir>/<name>.<stage ext>.spv`; the GLSL text is ignored.
#[derive(Clone, Debug)]
pub struct SpirvDirectory {
    dir: PathBuf,
}

impl SpirvDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, stage: ShaderStage, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}.spv", stage.extension()))
    }
}

impl ShaderCompiler for SpirvDirectory {
    fn compile(&self, stage: ShaderStage, name: &str, _source: &str) -> Result<Vec<u32>, ShaderError> {
        let path = self.path_for(stage, name);
        let bytes = fs::read(&path).map_err(|source| ShaderError::Io {
            name: path.display().to_string(),
            source,
        })?;
        read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| ShaderError::Io {
            name: path.display().to_string(),
            source,
        })
    }
}

/// Runtime GLSL compilation through shaderc.
#[cfg(feature = "shaderc")]
pub struct ShadercCompiler {
    compiler: shaderc::Compiler,
}

#[cfg(feature = "shaderc")]
impl ShadercCompiler {
    pub fn new() -> Result<Self, ShaderError> {
        let compiler =
            shaderc::Compiler::new().map_err(|e| ShaderError::Unavailable(e.to_string()))?;
        Ok(Self { compiler })
    }
}

#[cfg(feature = "shaderc")]
impl ShaderCompiler for ShadercCompiler {
    fn compile(&self, stage: ShaderStage, name: &str, source: &str) -> Result<Vec<u32>, ShaderError> {
        let kind = match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStage::Compute => shaderc::ShaderKind::Compute,
        };
        let mut opts =
            shaderc::CompileOptions::new().map_err(|e| ShaderError::Unavailable(e.to_string()))?;
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );
        let file = format!("{name}.{}", stage.extension());
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, &file, "main", Some(&opts))
            .map_err(|e| ShaderError::Compile {
                name: file.clone(),
                message: e.to_string(),
            })?;
        Ok(artifact.as_binary().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_path_includes_stage() {
        let dir = SpirvDirectory::new("shaders");
        assert_eq!(
            dir.path_for(ShaderStage::Fragment, "lighting"),
            PathBuf::from("shaders/lighting.frag.spv")
        );
    }

    #[test]
    fn missing_spirv_is_an_io_error() {
        let dir = SpirvDirectory::new("/nonexistent-prism-shaders");
        let err = dir
            .compile(ShaderStage::Vertex, "gbuffer", "void main() {}")
            .unwrap_err();
        assert!(matches!(err, ShaderError::Io { .. }));
    }

    #[test]
    fn spirv_words_are_read_from_disk() {
        let dir = std::env::temp_dir().join(format!("prism-spv-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        // Magic number followed by one word.
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        fs::write(dir.join("tiny.comp.spv"), bytes).unwrap();

        let got = SpirvDirectory::new(&dir)
            .compile(ShaderStage::Compute, "tiny", "")
            .unwrap();
        assert_eq!(got, words);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stage_flags_match_stage() {
        assert_eq!(stage_flags(ShaderStage::Vertex), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            stage_flags(ShaderStage::Fragment),
            vk::ShaderStageFlags::FRAGMENT
        );
    }
}
