// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, the swapchain and frame ring, GPU resources, render
//! passes, descriptor sets, pipelines and the deferred renderer built from them.

mod config;
mod deferred;
mod descriptor;
mod device;
mod engine;
mod error;
mod format;
mod frame;
mod pipeline;
mod renderpass;
mod resource;
mod shader;
mod slots;
mod swapchain;
mod upload;

pub use config::{Buffering, RendererOptions, VkVsyncMode, DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT};
pub use deferred::{
    default_compiler, DeferredRenderer, DirectionalLight, EntityId, FrameInfo, UiLayer, MAX_MATERIALS,
    GBUFFER_ALBEDO_FORMAT, GBUFFER_NORMAL_FORMAT, GBUFFER_POSITION_FORMAT,
};
pub use descriptor::{
    BindingKind, DescriptorAllocator, DescriptorError, DescriptorSetBuilder, DescriptorSets,
};
pub use device::{DeviceContext, QueueBinding, SurfaceBinding};
pub use engine::RenderEngine;
pub use error::DriverError;
pub use format::{format_size, has_stencil, is_depth_format};
pub use frame::{AcquireOutcome, FrameScheduler, FrameState, PresentOutcome, SchedulerError};
pub use pipeline::{
    create_pipeline, destroy_pipeline, Pipeline, PipelineInfo, ShaderStageModule, VertexBinding,
};
pub use renderpass::{shared_extent, LoadBehavior, RenderPass, RenderPassError};
pub use resource::{
    create_buffer, create_gpu_buffer, create_image, create_readback_buffer, create_sampler,
    create_staging_buffer, create_uniform_buffer, destroy_buffer, destroy_image, destroy_sampler,
    mapped_range, Buffer, Image,
};
pub use shader::{destroy_shader, load_shader, SpirvDirectory};
#[cfg(feature = "shaderc")]
pub use shader::ShadercCompiler;
pub use slots::{SlotId, Slots};
pub use swapchain::Swapchain;
pub use upload::{GpuMesh, UploadContext, TEXTURE_FORMAT};

/// The renderer the application drives.
pub type VkRenderer = DeferredRenderer;
