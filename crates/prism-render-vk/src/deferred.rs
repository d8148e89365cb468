// SPDX-License-Identifier: CEPL-1.0
//! Deferred frame orchestrator: geometry → lighting → UI, recorded into one command buffer
//! per frame and ordered by render-pass boundaries.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use prism_render::{MeshData, PixelData, RenderSize, Renderer, ShaderCompiler, ShaderStage};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::config::{RendererOptions, VkVsyncMode};
use crate::descriptor::{BindingKind, DescriptorAllocator, DescriptorSetBuilder, DescriptorSets};
use crate::device::DeviceContext;
use crate::engine::RenderEngine;
use crate::error::DriverError;
use crate::pipeline::{
    create_pipeline, destroy_pipeline, Pipeline, PipelineInfo, ShaderStageModule, VertexBinding,
};
use crate::renderpass::{LoadBehavior, RenderPass};
use crate::resource::{
    create_sampler, create_uniform_buffer, destroy_buffer, destroy_image, destroy_sampler, Buffer,
    Image,
};
use crate::shader::{destroy_shader, load_shader, SpirvDirectory};
use crate::slots::{SlotId, Slots};
use crate::upload::GpuMesh;

pub const GBUFFER_ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const GBUFFER_NORMAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const GBUFFER_POSITION_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

const GBUFFER_VERT: &str = include_str!("../shaders/gbuffer.vert");
const GBUFFER_FRAG: &str = include_str!("../shaders/gbuffer.frag");
const FULLSCREEN_VERT: &str = include_str!("../shaders/fullscreen.vert");
const LIGHTING_FRAG: &str = include_str!("../shaders/lighting.frag");

/// Handle of a drawable returned by [`DeferredRenderer::add_mesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(SlotId);

/// What the UI collaborator gets to know about the frame it records into.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub frame_index: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// External UI. Called inside the UI render pass with viewport and scissor already set.
pub trait UiLayer {
    fn record(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, frame: FrameInfo);
}

/// Per-frame uniform shared by the geometry and lighting passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FrameUniform {
    view: Mat4,
    proj: Mat4,
    eye: Vec4,
    light_dir: Vec4,
    light_color: Vec4,
    ambient: Vec4,
}

#[derive(Clone, Copy, Debug)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub ambient: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.6),
            color: Vec3::splat(1.0),
            ambient: Vec3::splat(0.08),
        }
    }
}

struct Camera {
    view: Mat4,
    proj: Mat4,
    eye: Vec3,
}

/// Textured materials share one pool; beyond this many, `add_textured_mesh` fails.
pub const MAX_MATERIALS: u32 = 1024;

struct Material {
    texture: Image,
    set: vk::DescriptorSet,
}

struct Entity {
    mesh: GpuMesh,
    model: Mat4,
    /// `None` draws with the plain white material. A textured entity owns its material.
    material: Option<SlotId>,
}

struct ShaderSet {
    gbuffer_vert: Option<vk::ShaderModule>,
    gbuffer_frag: Option<vk::ShaderModule>,
    fullscreen_vert: Option<vk::ShaderModule>,
    lighting_frag: Option<vk::ShaderModule>,
}

impl ShaderSet {
    fn load(ctx: &DeviceContext, compiler: &dyn ShaderCompiler) -> Result<Self, DriverError> {
        Ok(Self {
            gbuffer_vert: load_shader(ctx, compiler, ShaderStage::Vertex, "gbuffer", GBUFFER_VERT)?,
            gbuffer_frag: load_shader(ctx, compiler, ShaderStage::Fragment, "gbuffer", GBUFFER_FRAG)?,
            fullscreen_vert: load_shader(
                ctx,
                compiler,
                ShaderStage::Vertex,
                "fullscreen",
                FULLSCREEN_VERT,
            )?,
            lighting_frag: load_shader(
                ctx,
                compiler,
                ShaderStage::Fragment,
                "lighting",
                LIGHTING_FRAG,
            )?,
        })
    }

    fn pair(
        vert: Option<vk::ShaderModule>,
        frag: Option<vk::ShaderModule>,
    ) -> Option<Vec<ShaderStageModule>> {
        Some(vec![
            ShaderStageModule {
                stage: ShaderStage::Vertex,
                module: vert?,
            },
            ShaderStageModule {
                stage: ShaderStage::Fragment,
                module: frag?,
            },
        ])
    }

    unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        for module in [
            self.gbuffer_vert.take(),
            self.gbuffer_frag.take(),
            self.fullscreen_vert.take(),
            self.lighting_frag.take(),
        ]
        .into_iter()
        .flatten()
        {
            destroy_shader(ctx, module);
        }
    }
}

pub struct DeferredRenderer {
    options: RendererOptions,
    clear_color: [f32; 4],
    camera: Camera,
    light: DirectionalLight,

    frame_uniforms: Vec<Buffer>,
    frame_sets: DescriptorSets,
    sampler: vk::Sampler,
    material_template: DescriptorSetBuilder,
    material_sets: DescriptorAllocator,
    default_material: Option<Material>,
    materials: Slots<Material>,
    gbuffer_layout: DescriptorSetBuilder,
    gbuffer_sets: DescriptorSets,

    geometry: RenderPass,
    lighting: RenderPass,
    ui: RenderPass,
    gbuffer_attachments: [usize; 3],
    shaders: ShaderSet,
    geometry_pipeline: Option<Pipeline>,
    lighting_pipeline: Option<Pipeline>,
    swapchain_format: vk::Format,

    entities: Slots<Entity>,
    ui_layer: Option<Box<dyn UiLayer>>,

    // Last: destroyed after every resource above.
    engine: RenderEngine,
}

/// Runtime compiler when built with it and available, otherwise precompiled SPIR-V.
pub fn default_compiler(options: &RendererOptions) -> Box<dyn ShaderCompiler> {
    #[cfg(feature = "shaderc")]
    match crate::shader::ShadercCompiler::new() {
        Ok(c) => return Box::new(c),
        Err(e) => warn!("{e}; loading SPIR-V from {}", options.shader_dir.display()),
    }
    Box::new(SpirvDirectory::new(options.shader_dir.clone()))
}

impl DeferredRenderer {
    pub fn with_options(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RendererOptions,
    ) -> Result<Self> {
        let compiler = default_compiler(&options);
        Self::with_compiler(window, display, size, options, compiler.as_ref())
    }

    pub fn with_compiler(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RendererOptions,
        compiler: &dyn ShaderCompiler,
    ) -> Result<Self> {
        let engine = RenderEngine::new(window, display, size, &options)
            .context("initialising Vulkan")?
            .ok_or_else(|| anyhow!("no GPU can render to this window"))?;
        let ctx = engine.ctx();
        let swapchain = engine.swapchain();
        let image_count = swapchain.image_count();
        let extent = swapchain.extent();

        // Per-frame uniforms, one padded buffer per frame in flight.
        let ubo_size = ctx.pad_uniform_buffer_size(std::mem::size_of::<FrameUniform>() as u64);
        let mut frame_uniforms = Vec::with_capacity(engine.frames_in_flight());
        for _ in 0..engine.frames_in_flight() {
            frame_uniforms.push(create_uniform_buffer(ctx, ubo_size)?);
        }
        let mut frame_builder = DescriptorSetBuilder::new();
        frame_builder.add_binding(
            0,
            BindingKind::UniformBuffer {
                buffers: frame_uniforms.iter().map(|b| b.handle).collect(),
                range: std::mem::size_of::<FrameUniform>() as u64,
            },
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;
        let frame_sets = frame_builder.build(ctx, engine.frames_in_flight())?;

        let sampler = create_sampler(ctx, vk::Filter::LINEAR)?;
        let mut material_template = DescriptorSetBuilder::new();
        material_template.add_binding(
            0,
            BindingKind::CombinedImageSampler { images: Vec::new() },
            vk::ShaderStageFlags::FRAGMENT,
        )?;
        // Default material plus every textured one.
        let material_sets = DescriptorAllocator::new(ctx, &material_template, MAX_MATERIALS + 1)?;

        // G-buffer
        let gbuffer_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let mut geometry = RenderPass::new(image_count, false);
        let gbuffer_attachments = [
            geometry.add_attachment(ctx, gbuffer_usage, GBUFFER_ALBEDO_FORMAT, extent, LoadBehavior::Clear)?,
            geometry.add_attachment(ctx, gbuffer_usage, GBUFFER_NORMAL_FORMAT, extent, LoadBehavior::Clear)?,
            geometry.add_attachment(ctx, gbuffer_usage, GBUFFER_POSITION_FORMAT, extent, LoadBehavior::Clear)?,
        ];
        geometry.add_swapchain_depth(ctx, swapchain)?;
        geometry.build(ctx, swapchain)?;

        let mut lighting = RenderPass::new(image_count, false);
        lighting.add_swapchain_attachment(swapchain, LoadBehavior::Clear)?;
        lighting.build(ctx, swapchain)?;

        let mut ui = RenderPass::new(image_count, true);
        ui.add_swapchain_attachment(swapchain, LoadBehavior::Load)?;
        ui.build(ctx, swapchain)?;

        let mut gbuffer_layout = DescriptorSetBuilder::new();
        for binding in 0..3 {
            gbuffer_layout.add_binding(
                binding,
                BindingKind::CombinedImageSampler { images: Vec::new() },
                vk::ShaderStageFlags::FRAGMENT,
            )?;
        }
        fill_gbuffer_bindings(&mut gbuffer_layout, &geometry, &gbuffer_attachments, sampler, image_count)?;
        let gbuffer_sets = gbuffer_layout.build(ctx, image_count)?;

        let shaders = ShaderSet::load(ctx, compiler)?;
        let swapchain_format = swapchain.format();

        let mut renderer = Self {
            clear_color: options.clear_color,
            options,
            camera: Camera {
                view: Mat4::IDENTITY,
                proj: Mat4::IDENTITY,
                eye: Vec3::ZERO,
            },
            light: DirectionalLight::default(),
            frame_uniforms,
            frame_sets,
            sampler,
            material_template,
            material_sets,
            default_material: None,
            materials: Slots::new(),
            gbuffer_layout,
            gbuffer_sets,
            geometry,
            lighting,
            ui,
            gbuffer_attachments,
            shaders,
            geometry_pipeline: None,
            lighting_pipeline: None,
            swapchain_format,
            entities: Slots::new(),
            ui_layer: None,
            engine,
        };

        renderer.default_material =
            Some(renderer.create_material(&PixelData::solid([255, 255, 255, 255]))?);
        renderer.geometry_pipeline = renderer.build_geometry_pipeline()?;
        renderer.lighting_pipeline = renderer.build_lighting_pipeline()?;

        info!(
            "deferred renderer ready: {}x{}, {} images, {} frames in flight",
            extent.width,
            extent.height,
            image_count,
            renderer.engine.frames_in_flight()
        );
        Ok(renderer)
    }

    fn build_geometry_pipeline(&self) -> Result<Option<Pipeline>, DriverError> {
        let Some(shaders) = ShaderSet::pair(self.shaders.gbuffer_vert, self.shaders.gbuffer_frag)
        else {
            warn!("geometry shaders missing: geometry pass will draw nothing");
            return Ok(None);
        };
        let info = PipelineInfo {
            shaders,
            vertex_binding: Some(VertexBinding::mesh()),
            wireframe: self.options.wireframe,
            blend_attachment_count: self.geometry.color_attachment_count() as u32,
            push_constants: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<Mat4>() as u32,
            }],
            set_layouts: vec![self.frame_sets.layout, self.material_sets.layout()],
            ..Default::default()
        };
        create_pipeline(self.engine.ctx(), &info, self.geometry.handle()).map(Some)
    }

    fn build_lighting_pipeline(&self) -> Result<Option<Pipeline>, DriverError> {
        let Some(shaders) =
            ShaderSet::pair(self.shaders.fullscreen_vert, self.shaders.lighting_frag)
        else {
            warn!("lighting shaders missing: lighting pass will only clear");
            return Ok(None);
        };
        let info = PipelineInfo {
            shaders,
            vertex_binding: None,
            depth_testing: false,
            cull_mode: vk::CullModeFlags::NONE,
            blend_attachment_count: self.lighting.color_attachment_count() as u32,
            set_layouts: vec![self.frame_sets.layout, self.gbuffer_sets.layout],
            ..Default::default()
        };
        create_pipeline(self.engine.ctx(), &info, self.lighting.handle()).map(Some)
    }

    fn create_material(&mut self, pixels: &PixelData) -> Result<Material> {
        let ctx = self.engine.ctx();
        let texture = self.engine.upload().upload_texture(ctx, pixels)?;
        let mut builder = self.material_template.clone();
        builder.fill_binding(
            0,
            BindingKind::CombinedImageSampler {
                images: vec![(texture.view, self.sampler)],
            },
        )?;
        match self.material_sets.allocate(ctx, &builder) {
            Ok(set) => Ok(Material { texture, set }),
            Err(e) => {
                unsafe { destroy_image(ctx, texture) };
                Err(e.into())
            }
        }
    }

    /// # Safety
    /// The device must be idle.
    unsafe fn destroy_material(&mut self, material: Material) {
        let ctx = self.engine.ctx();
        self.material_sets.free(ctx, material.set);
        destroy_image(ctx, material.texture);
    }

    /// Uploads a mesh drawn with the plain white material.
    pub fn add_mesh(&mut self, mesh: &MeshData, model: Mat4) -> Result<EntityId> {
        let ctx = self.engine.ctx();
        let mesh = self.engine.upload().upload_mesh(ctx, mesh)?;
        Ok(EntityId(self.entities.insert(Entity {
            mesh,
            model,
            material: None,
        })))
    }

    /// Uploads a mesh and its albedo texture; the entity owns the texture and its descriptor
    /// set until [`remove_mesh`](Self::remove_mesh).
    pub fn add_textured_mesh(
        &mut self,
        mesh: &MeshData,
        albedo: &PixelData,
        model: Mat4,
    ) -> Result<EntityId> {
        let material = self.create_material(albedo)?;
        let ctx = self.engine.ctx();
        let mesh = match self.engine.upload().upload_mesh(ctx, mesh) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.destroy_material(material) };
                return Err(e.into());
            }
        };
        let material = self.materials.insert(material);
        Ok(EntityId(self.entities.insert(Entity {
            mesh,
            model,
            material: Some(material),
        })))
    }

    /// Frees an entity's buffers, and its texture and descriptor set if it has its own, after
    /// waiting for the GPU. Unknown or already removed ids are ignored.
    pub fn remove_mesh(&mut self, id: EntityId) -> Result<()> {
        let Some(entity) = self.entities.remove(id.0) else {
            return Ok(());
        };
        self.engine.ctx().wait_idle()?;
        unsafe {
            entity.mesh.destroy(self.engine.ctx());
            if let Some(material) = entity.material.and_then(|m| self.materials.remove(m)) {
                self.destroy_material(material);
            }
        }
        Ok(())
    }

    /// Live entities and the textured materials they own.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn set_transform(&mut self, id: EntityId, model: Mat4) {
        if let Some(entity) = self.entities.get_mut(id.0) {
            entity.model = model;
        }
    }

    /// View and projection come from the caller's camera; flip Y in `proj` for Vulkan.
    pub fn set_camera(&mut self, view: Mat4, proj: Mat4, eye: Vec3) {
        self.camera = Camera { view, proj, eye };
    }

    pub fn set_light(&mut self, light: DirectionalLight) {
        self.light = light;
    }

    pub fn set_ui_layer(&mut self, layer: Box<dyn UiLayer>) {
        self.ui_layer = Some(layer);
    }

    pub fn set_vsync_mode(&mut self, mode: VkVsyncMode) {
        self.options.vsync_mode = mode;
        self.engine.set_vsync(self.options.vsync, mode);
    }

    /// Current drawable extent.
    pub fn extent(&self) -> RenderSize {
        let e = self.engine.swapchain().extent();
        RenderSize {
            width: e.width,
            height: e.height,
        }
    }

    /// Swapchain rebuild followed by everything that depends on its images.
    fn rebuild(&mut self) -> Result<()> {
        if !self.engine.rebuild_swapchain()? {
            return Ok(());
        }
        let ctx = self.engine.ctx();
        let swapchain = self.engine.swapchain();
        // Device is idle after rebuild_swapchain.
        unsafe {
            self.geometry.resize(ctx, swapchain)?;
            self.lighting.resize(ctx, swapchain)?;
            self.ui.resize(ctx, swapchain)?;

            self.gbuffer_sets.destroy(ctx);
        }
        fill_gbuffer_bindings(
            &mut self.gbuffer_layout,
            &self.geometry,
            &self.gbuffer_attachments,
            self.sampler,
            swapchain.image_count(),
        )?;
        self.gbuffer_sets = self.gbuffer_layout.build(ctx, swapchain.image_count())?;

        if swapchain.format() != self.swapchain_format {
            info!(
                "swapchain format {:?} -> {:?}: rebuilding lighting pipeline",
                self.swapchain_format,
                swapchain.format()
            );
            self.swapchain_format = swapchain.format();
            if let Some(p) = self.lighting_pipeline.take() {
                unsafe { destroy_pipeline(ctx, p) };
            }
            self.lighting_pipeline = self.build_lighting_pipeline()?;
        }
        Ok(())
    }

    fn write_frame_uniform(&mut self, frame: usize) -> Result<(), DriverError> {
        let uniform = FrameUniform {
            view: self.camera.view,
            proj: self.camera.proj,
            eye: self.camera.eye.extend(1.0),
            light_dir: self.light.direction.normalize_or_zero().extend(0.0),
            light_color: self.light.color.extend(1.0),
            ambient: self.light.ambient.extend(1.0),
        };
        self.frame_uniforms[frame].write(0, bytemuck::bytes_of(&uniform))
    }

    fn record(&mut self, cmd: vk::CommandBuffer, frame: usize, image: u32) {
        let ctx = self.engine.ctx();
        let device = ctx.device();
        let extent = self.engine.swapchain().extent();
        let image_slot = image as usize;

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            // Geometry: fill the G-buffer.
            self.geometry.begin(device, cmd, image_slot, [0.0; 4]);
            if let Some(p) = self.geometry_pipeline {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, p.handle);
                device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
                device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    p.layout,
                    0,
                    &[self.frame_sets.set(frame)],
                    &[],
                );
                for entity in self.entities.iter() {
                    let material = match entity.material {
                        Some(id) => self.materials.get(id),
                        None => self.default_material.as_ref(),
                    };
                    let Some(material) = material else {
                        continue;
                    };
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        p.layout,
                        1,
                        &[material.set],
                        &[],
                    );
                    device.cmd_bind_vertex_buffers(cmd, 0, &[entity.mesh.vertex.handle], &[0]);
                    device.cmd_bind_index_buffer(
                        cmd,
                        entity.mesh.index.handle,
                        0,
                        vk::IndexType::UINT32,
                    );
                    device.cmd_push_constants(
                        cmd,
                        p.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&entity.model),
                    );
                    device.cmd_draw_indexed(cmd, entity.mesh.index_count, 1, 0, 0, 0);
                }
            }
            self.geometry.end(device, cmd);

            // Lighting: full-screen triangle over the G-buffer of this image.
            self.lighting
                .begin(device, cmd, image_slot, self.clear_color);
            if let Some(p) = self.lighting_pipeline {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, p.handle);
                device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
                device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    p.layout,
                    0,
                    &[self.frame_sets.set(frame), self.gbuffer_sets.set(image_slot)],
                    &[],
                );
                device.cmd_draw(cmd, 3, 1, 0, 0);
            }
            self.lighting.end(device, cmd);

            // UI: external collaborator draws on top, then the image is ready to present.
            self.ui.begin(device, cmd, image_slot, self.clear_color);
            if let Some(layer) = self.ui_layer.as_mut() {
                device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
                device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
                layer.record(
                    device,
                    cmd,
                    FrameInfo {
                        frame_index: frame,
                        image_index: image,
                        extent,
                    },
                );
            }
            self.ui.end(device, cmd);
        }
    }
}

fn fill_gbuffer_bindings(
    builder: &mut DescriptorSetBuilder,
    geometry: &RenderPass,
    attachments: &[usize; 3],
    sampler: vk::Sampler,
    image_count: usize,
) -> Result<()> {
    for (binding, &attachment) in attachments.iter().enumerate() {
        let images = (0..image_count)
            .map(|i| (geometry.attachment_view(attachment, i), sampler))
            .collect();
        builder.fill_binding(binding as u32, BindingKind::CombinedImageSampler { images })?;
    }
    Ok(())
}

impl Renderer for DeferredRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_options(window, display, size, RendererOptions::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.engine.resize(size);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if self.engine.is_paused() {
            return Ok(());
        }
        if self.engine.needs_rebuild() {
            self.rebuild()?;
            if self.engine.is_paused() {
                return Ok(());
            }
        }

        if !self.engine.acquire_next_image()? {
            // Retried on the next call, after the rebuild above.
            return Ok(());
        }
        let frame = self.engine.frame_index();
        let Some(image) = self.engine.image_index() else {
            return Ok(());
        };

        self.write_frame_uniform(frame)?;
        let cmd = self.engine.command_buffer();
        self.record(cmd, frame, image);

        self.engine.submit()?;
        self.engine.present()?;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        self.options.vsync = on;
        self.engine.set_vsync(on, self.options.vsync_mode);
    }
}

impl Drop for DeferredRenderer {
    fn drop(&mut self) {
        let ctx = self.engine.ctx();
        unsafe {
            ctx.device().device_wait_idle().ok();

            for entity in self.entities.drain() {
                entity.mesh.destroy(ctx);
            }
            for m in self.materials.drain().chain(self.default_material.take()) {
                destroy_image(ctx, m.texture);
            }
            // Frees every material set with the pool.
            self.material_sets.destroy(ctx);
            if let Some(p) = self.geometry_pipeline.take() {
                destroy_pipeline(ctx, p);
            }
            if let Some(p) = self.lighting_pipeline.take() {
                destroy_pipeline(ctx, p);
            }
            self.shaders.destroy(ctx);

            self.gbuffer_sets.destroy(ctx);
            self.ui.destroy(ctx);
            self.lighting.destroy(ctx);
            self.geometry.destroy(ctx);

            self.frame_sets.destroy(ctx);
            for b in self.frame_uniforms.drain(..) {
                destroy_buffer(ctx, b);
            }
            destroy_sampler(ctx, self.sampler);
        }
        // `engine` drops next: frame ring, upload context, swapchain, then the device.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uniform_matches_shader_block() {
        // mat4 view, mat4 proj, vec4 eye, vec4 lightDir, vec4 lightColor, vec4 ambient
        assert_eq!(std::mem::size_of::<FrameUniform>(), 64 * 2 + 16 * 4);
    }

    #[test]
    fn model_matrix_fits_push_constant_minimum() {
        // Vulkan guarantees at least 128 bytes of push constants.
        assert!(std::mem::size_of::<Mat4>() <= 128);
    }

    #[test]
    fn builtin_shaders_declare_matching_frame_block() {
        for src in [GBUFFER_VERT, LIGHTING_FRAG] {
            assert!(src.contains("layout(set = 0, binding = 0) uniform Frame"));
        }
        assert!(GBUFFER_FRAG.contains("layout(location = 2) out vec4 outPosition"));
    }

    #[test]
    fn default_light_points_down() {
        assert!(DirectionalLight::default().direction.y < 0.0);
    }
}
