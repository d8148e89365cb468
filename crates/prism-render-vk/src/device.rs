// SPDX-License-Identifier: CEPL-1.0
//! Device Context: API instance, window surface, selected GPU, logical device, queues and the
//! GPU memory allocator. Created once, destroyed last; everything else borrows it.

use std::cell::{RefCell, RefMut};
use std::ffi::{c_char, c_void, CStr};
use std::fs;
use std::path::{Path, PathBuf};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::config::RendererOptions;
use crate::error::{DriverError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

type DebugMessenger = (debug_utils::Instance, vk::DebugUtilsMessengerEXT);

#[derive(Clone)]
pub struct SurfaceBinding {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct QueueBinding {
    pub family: u32,
    pub queue: vk::Queue,
}

/// A GPU that passed selection, with the queue families the renderer will use.
#[derive(Clone, Copy, Debug)]
struct PhysicalDeviceChoice {
    phys: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    graphics_family: u32,
    present_family: u32,
}

pub struct DeviceContext {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceBinding>,

    phys: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: ash::Device,
    graphics: QueueBinding,
    present: QueueBinding,
    swapchain_loader: Option<swapchain::Device>,

    // Only `None` while `Drop` runs: the allocator must be gone before the device.
    allocator: RefCell<Option<Allocator>>,
    pipeline_cache: vk::PipelineCache,
    pipeline_cache_path: Option<PathBuf>,
    depth_format: vk::Format,
    supports_wireframe: bool,
}

impl DeviceContext {
    /// Builds a context that can present to the given window.
    ///
    /// Returns `Ok(None)` when no GPU satisfies the requirements; the caller decides whether to
    /// retry with relaxed requirements or give up.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        options: &RendererOptions,
    ) -> Result<Option<Self>, DriverError> {
        // STRICT ORDER:
        // 1) Create VkInstance (enables platform WSI + debug ext)
        // 2) Create VkSurfaceKHR FROM THIS INSTANCE
        // 3) Query physical devices/queues AGAINST THIS SURFACE (present support)
        // 4) Create VkDevice for the selected phys
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            let entry = Entry::load()?;
            let wsi = ash_window::enumerate_required_extensions(dh)
                .during("enumerate_required_extensions")?;
            let (instance, debug) = create_instance(&entry, wsi, options.validation)?;
            let instance_unwind = OnUnwind::new({
                let instance = instance.clone();
                let debug = debug.clone();
                move || teardown_instance(&instance, debug, None)
            });

            let loader = surface::Instance::new(&entry, &instance);
            let handle = ash_window::create_surface(&entry, &instance, dh, wh, None)
                .during("create_surface")?;
            instance_unwind.disarm();

            Self::finish(
                entry,
                instance,
                debug,
                Some(SurfaceBinding { loader, handle }),
                options,
            )
        }
    }

    /// Builds a context without a surface: no swapchain, uploads and offscreen work only.
    pub fn headless(options: &RendererOptions) -> Result<Option<Self>, DriverError> {
        unsafe {
            let entry = Entry::load()?;
            let (instance, debug) = create_instance(&entry, &[], options.validation)?;
            Self::finish(entry, instance, debug, None, options)
        }
    }

    unsafe fn finish(
        entry: Entry,
        instance: Instance,
        debug: Option<DebugMessenger>,
        surface: Option<SurfaceBinding>,
        options: &RendererOptions,
    ) -> Result<Option<Self>, DriverError> {
        let instance_unwind = OnUnwind::new({
            let instance = instance.clone();
            let debug = debug.clone();
            let surface = surface.clone();
            move || teardown_instance(&instance, debug, surface)
        });

        let Some(choice) = select_physical_device(&instance, surface.as_ref())? else {
            warn!(
                "no suitable GPU (need graphics queue{})",
                if surface.is_some() {
                    ", present support and VK_KHR_swapchain"
                } else {
                    ""
                }
            );
            drop(instance_unwind);
            return Ok(None);
        };

        let props = choice.properties;
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        info!(
            "GPU: {} ({:?}, api {}.{}), graphics family {}, present family {}",
            name,
            props.device_type,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            choice.graphics_family,
            choice.present_family
        );

        let available = instance.get_physical_device_features(choice.phys);
        let supports_wireframe = available.fill_mode_non_solid == vk::TRUE;
        if options.wireframe && !supports_wireframe {
            warn!("fillModeNonSolid unsupported, wireframe falls back to solid fill");
        }
        let features = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: available.fill_mode_non_solid,
            ..Default::default()
        };

        let priorities = [1.0_f32];
        let mut queue_infos = vec![vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: choice.graphics_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        }];
        if choice.present_family != choice.graphics_family {
            queue_infos.push(vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: choice.present_family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            });
        }

        let mut device_exts: Vec<*const c_char> = Vec::new();
        if surface.is_some() {
            device_exts.push(swapchain::NAME.as_ptr());
        }

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = instance
            .create_device(choice.phys, &dinfo, None)
            .during("create_device")?;
        let device_unwind = OnUnwind::new({
            let device = device.clone();
            move || device.destroy_device(None)
        });

        let graphics = QueueBinding {
            family: choice.graphics_family,
            queue: device.get_device_queue(choice.graphics_family, 0),
        };
        let present = QueueBinding {
            family: choice.present_family,
            queue: device.get_device_queue(choice.present_family, 0),
        };
        let swapchain_loader = surface
            .as_ref()
            .map(|_| swapchain::Device::new(&instance, &device));

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: choice.phys,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let pipeline_cache_path = options
            .pipeline_cache_dir
            .as_deref()
            .map(|dir| dir.join(pipeline_cache_file_name(&props)));
        let pipeline_cache = create_or_load_pipeline_cache(&device, pipeline_cache_path.as_deref())?;
        let depth_format = pick_depth_format(&instance, choice.phys);
        debug!("depth format {:?}", depth_format);

        device_unwind.disarm();
        instance_unwind.disarm();
        Ok(Some(Self {
            _entry: entry,
            instance,
            debug,
            surface,
            phys: choice.phys,
            properties: props,
            device,
            graphics,
            present,
            swapchain_loader,
            allocator: RefCell::new(Some(allocator)),
            pipeline_cache,
            pipeline_cache_path,
            depth_format,
            supports_wireframe,
        }))
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn phys(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn graphics(&self) -> QueueBinding {
        self.graphics
    }

    pub fn present(&self) -> QueueBinding {
        self.present
    }

    pub fn surface(&self) -> Option<&SurfaceBinding> {
        self.surface.as_ref()
    }

    pub fn swapchain_loader(&self) -> Option<&swapchain::Device> {
        self.swapchain_loader.as_ref()
    }

    pub fn allocator(&self) -> RefMut<'_, Allocator> {
        RefMut::map(self.allocator.borrow_mut(), |a| {
            a.as_mut()
                .expect("allocator is dropped only during DeviceContext::drop")
        })
    }

    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn supports_wireframe(&self) -> bool {
        self.supports_wireframe
    }

    /// Rounds `size` up to the device's uniform-buffer offset alignment.
    pub fn pad_uniform_buffer_size(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        pad_uniform_buffer_size(size, self.properties.limits.min_uniform_buffer_offset_alignment)
    }

    /// Blocks until every queue is idle. The only safe point for destroying resources
    /// that in-flight command buffers might still reference.
    pub fn wait_idle(&self) -> Result<(), DriverError> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        unsafe { self.device.device_wait_idle() }.during("device_wait_idle")
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - allocator (frees its memory blocks through the device)
// - pipeline cache (saved first)
// - device, then debug messenger, then surface; instance last.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            drop(self.allocator.get_mut().take());

            if let Some(path) = &self.pipeline_cache_path {
                save_pipeline_cache(&self.device, self.pipeline_cache, path);
            }
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device.destroy_device(None);

            teardown_instance(&self.instance, self.debug.take(), self.surface.take());
        }
    }
}

/// Rounds `size` up to a multiple of `alignment` (a power of two; zero means unaligned).
pub fn pad_uniform_buffer_size(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        return size;
    }
    (size + alignment - 1) & !(alignment - 1)
}

/// Runs its closure on drop unless disarmed. Each step of device bring-up arms one, so an
/// early error return destroys what already exists, newest first.
struct OnUnwind<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> OnUnwind<F> {
    fn new(teardown: F) -> Self {
        Self(Some(teardown))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for OnUnwind<F> {
    fn drop(&mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }
}

unsafe fn teardown_instance(
    instance: &Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceBinding>,
) {
    if let Some((loader, messenger)) = debug {
        loader.destroy_debug_utils_messenger(messenger, None);
    }
    if let Some(surface) = surface {
        surface.loader.destroy_surface(surface.handle, None);
    }
    instance.destroy_instance(None);
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

unsafe fn create_instance(
    entry: &Entry,
    wsi_exts: &[*const c_char],
    validation: bool,
) -> Result<(Instance, Option<DebugMessenger>), DriverError> {
    let app = c"Prism";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let want_debug = cfg!(debug_assertions) && validation;
    let inst_exts = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();
    let has_debug_ext = want_debug
        && inst_exts
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == debug_utils::NAME);
    let has_validation = want_debug
        && entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default()
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
    if want_debug && !has_validation {
        warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }

    let mut ext_vec = wsi_exts.to_vec();
    if has_debug_ext {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }
    let layers: Vec<*const c_char> = if has_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .during("create_instance")?;
    let instance_unwind = OnUnwind::new({
        let instance = instance.clone();
        move || instance.destroy_instance(None)
    });

    let debug = if has_debug_ext {
        let loader = debug_utils::Instance::new(entry, &instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .during("create_debug_utils_messenger")?;
        Some((loader, messenger))
    } else {
        None
    };

    instance_unwind.disarm();
    Ok((instance, debug))
}

/// Higher is better; discrete GPUs win over integrated ones.
fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Picks (graphics, present) queue families. A family that does both is preferred so the
/// swapchain can stay in exclusive sharing mode.
fn pick_queue_families(flags: &[vk::QueueFlags], can_present: &[bool]) -> Option<(u32, u32)> {
    let graphics: Vec<u32> = flags
        .iter()
        .enumerate()
        .filter(|(_, f)| f.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&both) = graphics
        .iter()
        .find(|&&i| can_present.get(i as usize).copied().unwrap_or(false))
    {
        return Some((both, both));
    }

    let gfx = *graphics.first()?;
    let present = can_present.iter().position(|&p| p)? as u32;
    Some((gfx, present))
}

unsafe fn select_physical_device(
    instance: &Instance,
    surface: Option<&SurfaceBinding>,
) -> Result<Option<PhysicalDeviceChoice>, DriverError> {
    let mut best: Option<(u32, PhysicalDeviceChoice)> = None;

    for phys in instance
        .enumerate_physical_devices()
        .during("enumerate_physical_devices")?
    {
        let properties = instance.get_physical_device_properties(phys);
        let families = instance.get_physical_device_queue_family_properties(phys);
        let flags: Vec<vk::QueueFlags> = families.iter().map(|q| q.queue_flags).collect();

        let can_present: Vec<bool> = match surface {
            Some(s) => (0..families.len() as u32)
                .map(|i| {
                    s.loader
                        .get_physical_device_surface_support(phys, i, s.handle)
                        .unwrap_or(false)
                })
                .collect(),
            // Headless: "present" collapses onto the graphics family.
            None => flags
                .iter()
                .map(|f| f.contains(vk::QueueFlags::GRAPHICS))
                .collect(),
        };

        if surface.is_some() {
            let exts = instance
                .enumerate_device_extension_properties(phys)
                .unwrap_or_default();
            let has_swapchain = exts
                .iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
            if !has_swapchain {
                debug!("skipping {:?}: no VK_KHR_swapchain", phys);
                continue;
            }
        }

        let Some((graphics_family, present_family)) = pick_queue_families(&flags, &can_present)
        else {
            debug!("skipping {:?}: no usable queue families", phys);
            continue;
        };

        let rank = device_type_rank(properties.device_type);
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((
                rank,
                PhysicalDeviceChoice {
                    phys,
                    properties,
                    graphics_family,
                    present_family,
                },
            ));
        }
    }

    Ok(best.map(|(_, choice)| choice))
}

unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> vk::Format {
    // Prefer 32f → 32f+S8 → 24+S8 → 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = instance.get_physical_device_format_properties(phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT // fallback; most desktop GPUs support it
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

fn pipeline_cache_file_name(props: &vk::PhysicalDeviceProperties) -> String {
    // driverVersion is vendor-specific encoding, but useful enough for cache names.
    format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    )
}

unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: Option<&Path>,
) -> Result<vk::PipelineCache, DriverError> {
    let data = path.and_then(|p| fs::read(p).ok()).unwrap_or_default();
    if !data.is_empty() {
        debug!("pipeline cache: {} bytes loaded", data.len());
    }

    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: data.len(),
        p_initial_data: if data.is_empty() {
            std::ptr::null()
        } else {
            data.as_ptr() as *const c_void
        },
        ..Default::default()
    };
    match device.create_pipeline_cache(&ci, None) {
        Ok(cache) => Ok(cache),
        Err(e) if !data.is_empty() => {
            // Stale or foreign blob: start empty rather than fail.
            warn!("pipeline cache rejected ({e}), starting empty");
            create_or_load_pipeline_cache(device, None)
        }
        Err(e) => Err(DriverError::vulkan("create_pipeline_cache", e)),
    }
}

unsafe fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    // benign on failure; some drivers refuse when the cache is empty or the device is lost
    if let Ok(bytes) = device.get_pipeline_cache_data(cache) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if fs::write(path, &bytes).is_ok() {
            debug!("pipeline cache: {} bytes saved to {}", bytes.len(), path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_uniform_buffer_size_rounds_up_to_alignment() {
        assert_eq!(pad_uniform_buffer_size(76, 256), 256);
        assert_eq!(pad_uniform_buffer_size(256, 256), 256);
        assert_eq!(pad_uniform_buffer_size(257, 256), 512);
        assert_eq!(pad_uniform_buffer_size(0, 64), 0);
    }

    #[test]
    fn pad_uniform_buffer_size_ignores_zero_alignment() {
        assert_eq!(pad_uniform_buffer_size(76, 0), 76);
    }

    #[test]
    fn bring_up_unwinds_newest_first_on_early_return() {
        use std::cell::RefCell;

        let log = RefCell::new(Vec::new());
        let bring_up = |fail_at: usize| -> Result<(), usize> {
            let instance = OnUnwind::new(|| log.borrow_mut().push("instance"));
            if fail_at == 1 {
                return Err(1);
            }
            let device = OnUnwind::new(|| log.borrow_mut().push("device"));
            if fail_at == 2 {
                return Err(2);
            }
            device.disarm();
            instance.disarm();
            Ok(())
        };

        assert_eq!(bring_up(2), Err(2));
        assert_eq!(*log.borrow(), ["device", "instance"]);

        log.borrow_mut().clear();
        assert_eq!(bring_up(1), Err(1));
        assert_eq!(*log.borrow(), ["instance"]);

        log.borrow_mut().clear();
        assert_eq!(bring_up(0), Ok(()));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn discrete_outranks_integrated() {
        assert!(
            device_type_rank(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_rank(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn queue_families_prefer_a_shared_family() {
        let flags = [
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS,
        ];
        assert_eq!(
            pick_queue_families(&flags, &[true, false, true]),
            Some((2, 2))
        );
    }

    #[test]
    fn queue_families_split_when_graphics_cannot_present() {
        let flags = [vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER];
        assert_eq!(pick_queue_families(&flags, &[false, true]), Some((0, 1)));
    }

    #[test]
    fn queue_families_none_without_present_or_graphics() {
        assert_eq!(
            pick_queue_families(&[vk::QueueFlags::GRAPHICS], &[false]),
            None
        );
        assert_eq!(
            pick_queue_families(&[vk::QueueFlags::COMPUTE], &[true]),
            None
        );
    }

    #[test]
    fn pipeline_cache_name_is_keyed_by_device() {
        let props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x1234_5678,
            pipeline_cache_uuid: [0xab; vk::UUID_SIZE],
            ..Default::default()
        };
        let name = pipeline_cache_file_name(&props);
        assert!(name.starts_with("vk_pipeline_cache_10de_2684_12345678_abab"));
        assert!(name.ends_with(".bin"));
    }
}
