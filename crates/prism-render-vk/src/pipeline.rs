// SPDX-License-Identifier: CEPL-1.0
//! Pipeline factory: declarative [`PipelineInfo`] in, immutable graphics pipeline out.
//!
//! Viewport and scissor are always dynamic so pipelines survive resizes. Depth compare is
//! `LESS_OR_EQUAL`; the viewport is never flipped, projections are expected to do that.

use std::ffi::CStr;

use ash::vk;
use prism_render::ShaderStage;
use tracing::{debug, warn};

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};
use crate::format::format_size;
use crate::shader::stage_flags;

const ENTRY_POINT: &CStr = c"main";

/// Formats of [`prism_render::Vertex`]: position, normal, uv.
pub const MESH_VERTEX_FORMATS: [vk::Format; 3] = [
    vk::Format::R32G32B32_SFLOAT,
    vk::Format::R32G32B32_SFLOAT,
    vk::Format::R32G32_SFLOAT,
];

#[derive(Clone, Copy, Debug)]
pub struct ShaderStageModule {
    pub stage: ShaderStage,
    pub module: vk::ShaderModule,
}

/// One interleaved vertex buffer at binding 0; attribute `i` is read at location `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub stride: u32,
    pub attributes: Vec<vk::Format>,
}

impl VertexBinding {
    /// Tightly packed attributes; the stride is the sum of their sizes.
    pub fn packed(attributes: &[vk::Format]) -> Self {
        let (_, stride) = attribute_offsets(attributes);
        Self {
            stride,
            attributes: attributes.to_vec(),
        }
    }

    pub fn mesh() -> Self {
        Self::packed(&MESH_VERTEX_FORMATS)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineInfo {
    pub shaders: Vec<ShaderStageModule>,
    /// `None` for pipelines that generate vertices in the shader (full-screen triangle).
    pub vertex_binding: Option<VertexBinding>,
    pub wireframe: bool,
    pub depth_testing: bool,
    pub cull_mode: vk::CullModeFlags,
    pub blend_attachment_count: u32,
    pub push_constants: Vec<vk::PushConstantRange>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub front_face: vk::FrontFace,
    pub topology: vk::PrimitiveTopology,
}

impl Default for PipelineInfo {
    fn default() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_binding: None,
            wireframe: false,
            depth_testing: true,
            cull_mode: vk::CullModeFlags::BACK,
            blend_attachment_count: 1,
            push_constants: Vec::new(),
            set_layouts: Vec::new(),
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Byte offset of every attribute and the total stride, walking the formats in order.
pub fn attribute_offsets(formats: &[vk::Format]) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(formats.len());
    let mut cursor = 0;
    for &format in formats {
        offsets.push(cursor);
        cursor += format_size(format);
    }
    (offsets, cursor)
}

pub fn attribute_descriptions(binding: &VertexBinding) -> Vec<vk::VertexInputAttributeDescription> {
    let (offsets, _) = attribute_offsets(&binding.attributes);
    binding
        .attributes
        .iter()
        .zip(offsets)
        .enumerate()
        .map(|(location, (&format, offset))| vk::VertexInputAttributeDescription {
            location: location as u32,
            binding: 0,
            format,
            offset,
        })
        .collect()
}

/// Builds a graphics pipeline and its layout for subpass 0 of `render_pass`.
pub fn create_pipeline(
    ctx: &DeviceContext,
    info: &PipelineInfo,
    render_pass: vk::RenderPass,
) -> Result<Pipeline, DriverError> {
    let device = ctx.device();

    let stages: Vec<vk::PipelineShaderStageCreateInfo> = info
        .shaders
        .iter()
        .map(|s| vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: stage_flags(s.stage),
            module: s.module,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        })
        .collect();

    let (binding_desc, attributes) = match &info.vertex_binding {
        Some(b) => (
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: b.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attribute_descriptions(b),
        ),
        None => (Vec::new(), Vec::new()),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: binding_desc.len() as u32,
        p_vertex_binding_descriptions: binding_desc.as_ptr(),
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: info.topology,
        ..Default::default()
    };

    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let polygon_mode = if info.wireframe && ctx.supports_wireframe() {
        vk::PolygonMode::LINE
    } else {
        if info.wireframe {
            warn!("wireframe requested but fillModeNonSolid is unsupported; drawing filled");
        }
        vk::PolygonMode::FILL
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode,
        cull_mode: info.cull_mode,
        front_face: info.front_face,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_enable = if info.depth_testing { vk::TRUE } else { vk::FALSE };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: depth_enable,
        depth_write_enable: depth_enable,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };

    let blend_attachments = vec![
        vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        info.blend_attachment_count as usize
    ];
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: blend_attachments.len() as u32,
        p_attachments: blend_attachments.as_ptr(),
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: info.set_layouts.len() as u32,
        p_set_layouts: info.set_layouts.as_ptr(),
        push_constant_range_count: info.push_constants.len() as u32,
        p_push_constant_ranges: info.push_constants.as_ptr(),
        ..Default::default()
    };

    unsafe {
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .during("create_pipeline_layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let handle = match device.create_graphics_pipelines(
            ctx.pipeline_cache(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p[0],
            Err((_, err)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(DriverError::vulkan("create_graphics_pipelines", err));
            }
        };

        debug!(
            "pipeline: {} stages, {} attributes, {} color targets, depth={}, {:?}",
            stages.len(),
            attributes.len(),
            blend_attachments.len(),
            info.depth_testing,
            polygon_mode
        );
        Ok(Pipeline { handle, layout })
    }
}

/// # Safety
/// The device must be idle, or no pending command buffer may reference the pipeline.
pub unsafe fn destroy_pipeline(ctx: &DeviceContext, pipeline: Pipeline) {
    let device = ctx.device();
    device.destroy_pipeline(pipeline.handle, None);
    device.destroy_pipeline_layout(pipeline.layout, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_render::Vertex;

    #[test]
    fn vec3_vec3_vec2_offsets() {
        let (offsets, stride) = attribute_offsets(&[
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R32G32_SFLOAT,
        ]);
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(stride, 32);
    }

    #[test]
    fn mesh_binding_matches_cpu_vertex_layout() {
        let binding = VertexBinding::mesh();
        assert_eq!(binding.stride as usize, std::mem::size_of::<Vertex>());

        let attrs = attribute_descriptions(&binding);
        assert_eq!(attrs[0].offset as usize, std::mem::offset_of!(Vertex, position));
        assert_eq!(attrs[1].offset as usize, std::mem::offset_of!(Vertex, normal));
        assert_eq!(attrs[2].offset as usize, std::mem::offset_of!(Vertex, uv));
        assert_eq!(
            attrs.iter().map(|a| a.location).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn mixed_width_attributes() {
        let (offsets, stride) = attribute_offsets(&[
            vk::Format::R32G32B32A32_SFLOAT,
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::R16G16_SFLOAT,
        ]);
        assert_eq!(offsets, vec![0, 16, 20]);
        assert_eq!(stride, 24);
    }

    #[test]
    fn no_attributes_means_no_stride() {
        assert_eq!(attribute_offsets(&[]), (Vec::new(), 0));
    }

    #[test]
    fn default_info_is_opaque_triangles_with_depth() {
        let info = PipelineInfo::default();
        assert!(info.depth_testing);
        assert_eq!(info.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(info.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(info.blend_attachment_count, 1);
    }
}
