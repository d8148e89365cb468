// SPDX-License-Identifier: CEPL-1.0
//! Descriptor set builder: declare bindings, fill in resources, then build one set per frame
//! in flight (or per swapchain image) from a shared pool.

use ash::vk;
use thiserror::Error;
use tracing::trace;

use crate::device::DeviceContext;
use crate::error::{DriverError, VkResultExt};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("binding {0} declared twice")]
    DuplicateBinding(u32),
    #[error("binding {0} was never declared")]
    UndeclaredBinding(u32),
    #[error("binding {index} holds {declared} resources, not {given}")]
    KindMismatch {
        index: u32,
        declared: &'static str,
        given: &'static str,
    },
    #[error("binding {0} has no resource to write")]
    Unfilled(u32),
    #[error("descriptor pool is full ({0} sets)")]
    PoolExhausted(u32),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Resource behind a binding. Element `i % len` of the array is written into set `i`.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingKind {
    UniformBuffer {
        buffers: Vec<vk::Buffer>,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        images: Vec<(vk::ImageView, vk::Sampler)>,
    },
}

impl BindingKind {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::CombinedImageSampler { .. } => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BindingKind::UniformBuffer { .. } => "uniform-buffer",
            BindingKind::CombinedImageSampler { .. } => "combined-image-sampler",
        }
    }

    fn len(&self) -> usize {
        match self {
            BindingKind::UniformBuffer { buffers, .. } => buffers.len(),
            BindingKind::CombinedImageSampler { images } => images.len(),
        }
    }
}

#[derive(Clone, Debug)]
struct Binding {
    index: u32,
    kind: BindingKind,
    stages: vk::ShaderStageFlags,
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorSetBuilder {
    bindings: Vec<Binding>,
}

/// Info structs for every descriptor write, plus where each one goes.
#[derive(Debug, Default)]
pub struct WritePlan {
    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
    pub writes: Vec<PlannedWrite>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub ty: vk::DescriptorType,
    /// Index into `buffer_infos` or `image_infos` depending on `ty`.
    pub info: usize,
}

impl DescriptorSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a binding. Resources may be empty here and supplied by
    /// [`fill_binding`](Self::fill_binding) before [`build`](Self::build).
    pub fn add_binding(
        &mut self,
        index: u32,
        kind: BindingKind,
        stages: vk::ShaderStageFlags,
    ) -> Result<&mut Self, DescriptorError> {
        if self.bindings.iter().any(|b| b.index == index) {
            return Err(DescriptorError::DuplicateBinding(index));
        }
        self.bindings.push(Binding {
            index,
            kind,
            stages,
        });
        Ok(self)
    }

    /// Replaces the resources of a declared binding; the kind must stay the same.
    pub fn fill_binding(&mut self, index: u32, kind: BindingKind) -> Result<(), DescriptorError> {
        let binding = self
            .bindings
            .iter_mut()
            .find(|b| b.index == index)
            .ok_or(DescriptorError::UndeclaredBinding(index))?;
        if std::mem::discriminant(&binding.kind) != std::mem::discriminant(&kind) {
            return Err(DescriptorError::KindMismatch {
                index,
                declared: binding.kind.name(),
                given: kind.name(),
            });
        }
        binding.kind = kind;
        Ok(())
    }

    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.index,
                descriptor_type: b.kind.descriptor_type(),
                descriptor_count: 1,
                stage_flags: b.stages,
                ..Default::default()
            })
            .collect()
    }

    /// One descriptor per binding per set, grouped by type.
    pub fn pool_sizes(&self, set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for b in &self.bindings {
            let ty = b.kind.descriptor_type();
            match sizes.iter_mut().find(|s| s.ty == ty) {
                Some(s) => s.descriptor_count += set_count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: set_count,
                }),
            }
        }
        sizes
    }

    /// Works out every write for `sets` without touching the device.
    pub fn plan_writes(&self, sets: &[vk::DescriptorSet]) -> Result<WritePlan, DescriptorError> {
        let mut plan = WritePlan::default();
        for b in &self.bindings {
            let len = b.kind.len();
            if len == 0 {
                return Err(DescriptorError::Unfilled(b.index));
            }
            for (i, &set) in sets.iter().enumerate() {
                let info = match &b.kind {
                    BindingKind::UniformBuffer { buffers, range } => {
                        plan.buffer_infos.push(vk::DescriptorBufferInfo {
                            buffer: buffers[i % len],
                            offset: 0,
                            range: *range,
                        });
                        plan.buffer_infos.len() - 1
                    }
                    BindingKind::CombinedImageSampler { images } => {
                        let (view, sampler) = images[i % len];
                        plan.image_infos.push(vk::DescriptorImageInfo {
                            sampler,
                            image_view: view,
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        });
                        plan.image_infos.len() - 1
                    }
                };
                plan.writes.push(PlannedWrite {
                    set,
                    binding: b.index,
                    ty: b.kind.descriptor_type(),
                    info,
                });
            }
        }
        Ok(plan)
    }

    /// Creates the layout, a pool sized for `set_count` sets, allocates them and writes every
    /// binding.
    pub fn build(&self, ctx: &DeviceContext, set_count: usize) -> Result<DescriptorSets, DescriptorError> {
        self.check_filled()?;
        let device = ctx.device();
        unsafe {
            let mut out = DescriptorSets {
                layout: self.create_layout(ctx)?,
                pool: vk::DescriptorPool::null(),
                sets: Vec::new(),
            };

            let sizes = self.pool_sizes(set_count as u32);
            let pool_ci = vk::DescriptorPoolCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
                max_sets: set_count as u32,
                pool_size_count: sizes.len() as u32,
                p_pool_sizes: sizes.as_ptr(),
                ..Default::default()
            };
            out.pool = match device.create_descriptor_pool(&pool_ci, None) {
                Ok(p) => p,
                Err(e) => {
                    out.destroy(ctx);
                    return Err(DriverError::vulkan("create_descriptor_pool", e).into());
                }
            };

            out.sets = match allocate_sets(ctx, out.pool, out.layout, set_count) {
                Ok(s) => s,
                Err(e) => {
                    out.destroy(ctx);
                    return Err(e.into());
                }
            };
            if let Err(e) = self.write_sets(ctx, &out.sets) {
                out.destroy(ctx);
                return Err(e);
            }

            trace!(
                "descriptor sets: {} x {} bindings",
                out.sets.len(),
                self.bindings.len()
            );
            Ok(out)
        }
    }

    // Catch unfilled bindings before creating anything.
    fn check_filled(&self) -> Result<(), DescriptorError> {
        match self.bindings.iter().find(|b| b.kind.len() == 0) {
            Some(b) => Err(DescriptorError::Unfilled(b.index)),
            None => Ok(()),
        }
    }

    fn create_layout(&self, ctx: &DeviceContext) -> Result<vk::DescriptorSetLayout, DescriptorError> {
        let layout_bindings = self.layout_bindings();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: layout_bindings.len() as u32,
            p_bindings: layout_bindings.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { ctx.device().create_descriptor_set_layout(&layout_ci, None) }
            .during("create_descriptor_set_layout")?;
        Ok(layout)
    }

    fn write_sets(&self, ctx: &DeviceContext, sets: &[vk::DescriptorSet]) -> Result<(), DescriptorError> {
        let plan = self.plan_writes(sets)?;
        let writes: Vec<vk::WriteDescriptorSet> = plan
            .writes
            .iter()
            .map(|w| {
                let mut write = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: w.set,
                    dst_binding: w.binding,
                    dst_array_element: 0,
                    descriptor_count: 1,
                    descriptor_type: w.ty,
                    ..Default::default()
                };
                if w.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER {
                    write.p_image_info = &plan.image_infos[w.info];
                } else {
                    write.p_buffer_info = &plan.buffer_infos[w.info];
                }
                write
            })
            .collect();
        unsafe { ctx.device().update_descriptor_sets(&writes, &[]) };
        Ok(())
    }
}

fn allocate_sets(
    ctx: &DeviceContext,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<vk::DescriptorSet>, DriverError> {
    let layouts = vec![layout; count];
    let alloc_info = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    unsafe { ctx.device().allocate_descriptor_sets(&alloc_info) }.during("allocate_descriptor_sets")
}

/// One layout and one pool from which single sets are allocated and freed one at a time, for
/// resources that come and go (per-entity materials).
#[derive(Debug)]
pub struct DescriptorAllocator {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    capacity: u32,
    live: u32,
}

impl DescriptorAllocator {
    /// `template` fixes the layout; its resources may still be empty.
    pub fn new(
        ctx: &DeviceContext,
        template: &DescriptorSetBuilder,
        capacity: u32,
    ) -> Result<Self, DescriptorError> {
        let mut out = Self {
            layout: template.create_layout(ctx)?,
            pool: vk::DescriptorPool::null(),
            capacity,
            live: 0,
        };
        let sizes = template.pool_sizes(capacity);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: capacity,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        out.pool = match unsafe { ctx.device().create_descriptor_pool(&pool_ci, None) } {
            Ok(p) => p,
            Err(e) => {
                unsafe { out.destroy(ctx) };
                return Err(DriverError::vulkan("create_descriptor_pool", e).into());
            }
        };
        Ok(out)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Sets currently allocated.
    pub fn live(&self) -> u32 {
        self.live
    }

    /// Allocates one set and writes `filled` into it. `filled` must declare the same bindings
    /// as the template.
    pub fn allocate(
        &mut self,
        ctx: &DeviceContext,
        filled: &DescriptorSetBuilder,
    ) -> Result<vk::DescriptorSet, DescriptorError> {
        filled.check_filled()?;
        if self.live >= self.capacity {
            return Err(DescriptorError::PoolExhausted(self.capacity));
        }
        let set = allocate_sets(ctx, self.pool, self.layout, 1)?[0];
        self.live += 1;
        if let Err(e) = filled.write_sets(ctx, &[set]) {
            unsafe { self.free(ctx, set) };
            return Err(e);
        }
        Ok(set)
    }

    /// # Safety
    /// No pending command buffer may use `set`.
    pub unsafe fn free(&mut self, ctx: &DeviceContext, set: vk::DescriptorSet) {
        let _ = ctx.device().free_descriptor_sets(self.pool, &[set]);
        self.live = self.live.saturating_sub(1);
    }

    /// Frees the pool (and with it every set), then the layout.
    ///
    /// # Safety
    /// No pending command buffer may use any set from this allocator.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.layout, None);
            self.layout = vk::DescriptorSetLayout::null();
        }
        self.live = 0;
    }
}

/// Layout, pool and the sets allocated from it.
#[derive(Debug)]
pub struct DescriptorSets {
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSets {
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Frees the pool (and with it every set), then the layout.
    ///
    /// # Safety
    /// No pending command buffer may use any of the sets.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let device = ctx.device();
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.layout, None);
            self.layout = vk::DescriptorSetLayout::null();
        }
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffers(raw: &[u64]) -> Vec<vk::Buffer> {
        raw.iter().map(|&r| vk::Buffer::from_raw(r)).collect()
    }

    fn sets(n: u64) -> Vec<vk::DescriptorSet> {
        (0..n).map(|r| vk::DescriptorSet::from_raw(100 + r)).collect()
    }

    fn camera_and_texture() -> DescriptorSetBuilder {
        let mut b = DescriptorSetBuilder::new();
        b.add_binding(
            0,
            BindingKind::UniformBuffer {
                buffers: buffers(&[1, 2]),
                range: 256,
            },
            vk::ShaderStageFlags::VERTEX,
        )
        .unwrap()
        .add_binding(
            1,
            BindingKind::CombinedImageSampler { images: Vec::new() },
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
        b
    }

    #[test]
    fn per_frame_buffers_land_in_their_own_set() {
        let mut b = camera_and_texture();
        b.fill_binding(
            1,
            BindingKind::CombinedImageSampler {
                images: vec![(vk::ImageView::from_raw(7), vk::Sampler::from_raw(8))],
            },
        )
        .unwrap();

        let sets = sets(2);
        let plan = b.plan_writes(&sets).unwrap();
        assert_eq!(plan.writes.len(), 4);

        let ubo_writes: Vec<_> = plan
            .writes
            .iter()
            .filter(|w| w.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .collect();
        assert_eq!(ubo_writes[0].set, sets[0]);
        assert_eq!(plan.buffer_infos[ubo_writes[0].info].buffer.as_raw(), 1);
        assert_eq!(ubo_writes[1].set, sets[1]);
        assert_eq!(plan.buffer_infos[ubo_writes[1].info].buffer.as_raw(), 2);
        assert_eq!(plan.buffer_infos[ubo_writes[1].info].range, 256);

        // A single texture is shared by every set.
        for w in plan
            .writes
            .iter()
            .filter(|w| w.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        {
            let info = plan.image_infos[w.info];
            assert_eq!(info.image_view.as_raw(), 7);
            assert_eq!(
                info.image_layout,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            );
        }
    }

    #[test]
    fn elements_wrap_when_there_are_more_sets() {
        let mut b = DescriptorSetBuilder::new();
        b.add_binding(
            0,
            BindingKind::CombinedImageSampler {
                images: vec![
                    (vk::ImageView::from_raw(1), vk::Sampler::from_raw(9)),
                    (vk::ImageView::from_raw(2), vk::Sampler::from_raw(9)),
                ],
            },
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
        let plan = b.plan_writes(&sets(3)).unwrap();
        let views: Vec<u64> = plan
            .writes
            .iter()
            .map(|w| plan.image_infos[w.info].image_view.as_raw())
            .collect();
        assert_eq!(views, vec![1, 2, 1]);
    }

    #[test]
    fn unfilled_binding_blocks_planning() {
        let b = camera_and_texture();
        assert!(matches!(
            b.plan_writes(&sets(2)),
            Err(DescriptorError::Unfilled(1))
        ));
    }

    #[test]
    fn fill_rejects_unknown_index_and_other_kind() {
        let mut b = camera_and_texture();
        assert!(matches!(
            b.fill_binding(5, BindingKind::CombinedImageSampler { images: Vec::new() }),
            Err(DescriptorError::UndeclaredBinding(5))
        ));
        assert!(matches!(
            b.fill_binding(
                0,
                BindingKind::CombinedImageSampler { images: Vec::new() }
            ),
            Err(DescriptorError::KindMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut b = camera_and_texture();
        assert!(matches!(
            b.add_binding(
                0,
                BindingKind::UniformBuffer {
                    buffers: Vec::new(),
                    range: 16
                },
                vk::ShaderStageFlags::VERTEX
            ),
            Err(DescriptorError::DuplicateBinding(0))
        ));
    }

    #[test]
    fn pool_sizes_scale_with_set_count() {
        let mut b = camera_and_texture();
        b.add_binding(
            2,
            BindingKind::CombinedImageSampler { images: Vec::new() },
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
        let sizes = b.pool_sizes(3);
        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(3));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(6));
    }

    #[test]
    fn layout_bindings_mirror_declarations() {
        let lb = camera_and_texture().layout_bindings();
        assert_eq!(lb.len(), 2);
        assert_eq!(lb[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(lb[1].binding, 1);
        assert_eq!(lb[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }
}
