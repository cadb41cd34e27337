// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils as ext_debug;
use ash::ext::headless_surface;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use crate::allocator::MemoryAllocator;
use crate::command::CommandTarget;
use crate::error::InitError;
use crate::{DeviceConfig, MIN_API_VERSION};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What bring-up presents to.
#[derive(Clone, Copy)]
enum SurfaceTarget {
    None,
    Window(RawDisplayHandle, RawWindowHandle),
    /// `VK_EXT_headless_surface`: a real swapchain with no window behind it.
    Offscreen,
}

struct DebugMessenger {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct PresentSurface {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics + compute capable family.
    pub graphics: u32,
    /// Family that can present to the surface. Equal to `graphics` when
    /// headless or when one family does both.
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Instance, device, queues, surface and the shared memory allocator.
///
/// Exactly one per renderer, created first and destroyed last. Every
/// [`Buffer`](crate::Buffer) created through [`allocator`](Self::allocator)
/// must be destroyed before this is dropped.
pub struct DeviceContext {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface: Option<PresentSurface>,

    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device_name: String,

    device: ash::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    allocator: Arc<MemoryAllocator>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data struct for the
    // duration of this call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        tracing::trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

unsafe fn has_validation_layer(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER)
}

unsafe fn create_instance(
    entry: &Entry,
    target: SurfaceTarget,
    cfg: &DeviceConfig,
) -> Result<(Instance, bool), InitError> {
    let loader_version = unsafe { entry.try_enumerate_instance_version() }
        .map_err(InitError::vk("vkEnumerateInstanceVersion"))?
        .unwrap_or(vk::API_VERSION_1_0);
    if loader_version < MIN_API_VERSION {
        return Err(InitError::Vulkan {
            stage: "instance API version check",
            result: vk::Result::ERROR_INCOMPATIBLE_DRIVER,
        });
    }

    let app = CString::new(cfg.app_name.replace('\0', "")).unwrap_or_default();
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: c"North".as_ptr(),
        engine_version: 0,
        api_version: MIN_API_VERSION,
        ..Default::default()
    };

    let mut ext_vec: Vec<*const c_char> = match target {
        SurfaceTarget::Window(dh, _) => ash_window::enumerate_required_extensions(dh)
            .map_err(InitError::vk("enumerate_required_extensions"))?
            .to_vec(),
        SurfaceTarget::Offscreen => vec![surface::NAME.as_ptr(), headless_surface::NAME.as_ptr()],
        SurfaceTarget::None => Vec::new(),
    };

    let validation = cfg.validation && unsafe { has_validation_layer(entry) };
    if cfg.validation && !validation {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed; continuing without it");
    }
    if validation {
        ext_vec.push(ext_debug::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0u32, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(InitError::vk("vkCreateInstance"))?;
    Ok((instance, validation))
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<DebugMessenger, InitError> {
    let loader = ext_debug::Instance::new(entry, instance);
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
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(InitError::vk("vkCreateDebugUtilsMessengerEXT"))?;
    Ok(DebugMessenger { loader, messenger })
}

/// Higher is better. Mirrors the usual "discrete first" preference.
pub(crate) fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Picks a graphics+compute family and a present family, preferring one
/// family that does both. `supports_present` is only consulted when a
/// surface is involved.
pub(crate) fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    need_present: bool,
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let graphics: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, q)| q.queue_count > 0 && q.queue_flags.contains(wanted))
        .map(|(i, _)| i as u32)
        .collect();
    let first_graphics = *graphics.first()?;

    if !need_present {
        return Some(QueueFamilies {
            graphics: first_graphics,
            present: first_graphics,
        });
    }

    let present: Vec<u32> = (0..families.len() as u32)
        .filter(|&i| families[i as usize].queue_count > 0 && supports_present(i))
        .collect();

    if let Some(&both) = graphics.iter().find(|g| present.contains(g)) {
        return Some(QueueFamilies {
            graphics: both,
            present: both,
        });
    }
    present.first().map(|&p| QueueFamilies {
        graphics: first_graphics,
        present: p,
    })
}

struct Candidate {
    phys: vk::PhysicalDevice,
    props: vk::PhysicalDeviceProperties,
    families: QueueFamilies,
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface: Option<&PresentSurface>,
) -> Result<Candidate, InitError> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(InitError::vk("vkEnumeratePhysicalDevices"))?;
    if devices.is_empty() {
        return Err(InitError::NoSuitableDevice(
            "no Vulkan physical devices present".into(),
        ));
    }

    let mut rejected = Vec::new();
    let mut best: Option<Candidate> = None;

    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        if props.api_version < MIN_API_VERSION {
            rejected.push(format!("{name}: API version too old"));
            continue;
        }

        if surface.is_some() {
            let exts = unsafe { instance.enumerate_device_extension_properties(phys) }
                .unwrap_or_default();
            let has_swapchain = exts
                .iter()
                .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == swapchain::NAME);
            if !has_swapchain {
                rejected.push(format!("{name}: no VK_KHR_swapchain"));
                continue;
            }
        }

        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let families = select_queue_families(&qprops, surface.is_some(), |i| match surface {
            Some(s) => unsafe {
                s.loader
                    .get_physical_device_surface_support(phys, i, s.handle)
                    .unwrap_or(false)
            },
            None => false,
        });
        let Some(families) = families else {
            rejected.push(format!("{name}: no graphics+compute/present queue families"));
            continue;
        };

        if let Some(s) = surface {
            let formats = unsafe {
                s.loader
                    .get_physical_device_surface_formats(phys, s.handle)
                    .unwrap_or_default()
            };
            let modes = unsafe {
                s.loader
                    .get_physical_device_surface_present_modes(phys, s.handle)
                    .unwrap_or_default()
            };
            if formats.is_empty() || modes.is_empty() {
                rejected.push(format!("{name}: surface has no formats/present modes"));
                continue;
            }
        }

        let better = best.as_ref().map_or(true, |b| {
            device_type_rank(props.device_type) > device_type_rank(b.props.device_type)
        });
        if better {
            best = Some(Candidate {
                phys,
                props,
                families,
            });
        }
    }

    best.ok_or_else(|| InitError::NoSuitableDevice(rejected.join("; ")))
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    want_swapchain: bool,
) -> Result<ash::Device, InitError> {
    let priorities = [1.0_f32];
    let mut unique = vec![families.graphics];
    if !families.is_shared() {
        unique.push(families.present);
    }
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts: Vec<*const c_char> = if want_swapchain {
        vec![swapchain::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.map_err(InitError::vk("vkCreateDevice"))
}

/// Objects created so far during bring-up. Dropping it destroys them in
/// reverse creation order, so a failing step never leaks the earlier ones.
struct Bringup {
    entry: Entry,
    instance: Option<Instance>,
    debug: Option<DebugMessenger>,
    surface: Option<PresentSurface>,
    device: Option<ash::Device>,
}

impl Drop for Bringup {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.handle, None);
            }
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

impl DeviceContext {
    /// Brings up instance, surface, device, queues and allocator for a window.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        cfg: &DeviceConfig,
    ) -> Result<Self, InitError> {
        // STRICT ORDER:
        // 1) Instance with the platform WSI extensions
        // 2) Surface from THIS instance
        // 3) Physical device/queues chosen AGAINST this surface
        // 4) Device, then allocator on top of it
        let dh: RawDisplayHandle = display.display_handle()?.as_raw();
        let wh: RawWindowHandle = window.window_handle()?.as_raw();
        unsafe { Self::bring_up(SurfaceTarget::Window(dh, wh), cfg) }
    }

    /// Bring-up without a surface: no swapchain, present queue aliases the
    /// graphics queue. Used for offscreen transfers and tests.
    pub fn headless(cfg: &DeviceConfig) -> Result<Self, InitError> {
        unsafe { Self::bring_up(SurfaceTarget::None, cfg) }
    }

    /// Bring-up against a windowless `VK_EXT_headless_surface`, so the full
    /// swapchain and frame path runs without a display. Fails at instance
    /// creation when the extension is missing.
    pub fn offscreen(cfg: &DeviceConfig) -> Result<Self, InitError> {
        unsafe { Self::bring_up(SurfaceTarget::Offscreen, cfg) }
    }

    unsafe fn bring_up(target: SurfaceTarget, cfg: &DeviceConfig) -> Result<Self, InitError> {
        let entry = unsafe { Entry::load() }?;
        let mut b = Bringup {
            entry,
            instance: None,
            debug: None,
            surface: None,
            device: None,
        };

        let (instance, validation) =
            unsafe { create_instance(&b.entry, target, cfg) }?;
        let instance = b.instance.insert(instance).clone();

        if validation {
            b.debug = Some(unsafe { create_debug_messenger(&b.entry, &instance) }?);
        }

        let handle = match target {
            SurfaceTarget::Window(dh, wh) => Some(
                unsafe { ash_window::create_surface(&b.entry, &instance, dh, wh, None) }
                    .map_err(InitError::vk("vkCreateSurfaceKHR"))?,
            ),
            SurfaceTarget::Offscreen => {
                let info = vk::HeadlessSurfaceCreateInfoEXT {
                    s_type: vk::StructureType::HEADLESS_SURFACE_CREATE_INFO_EXT,
                    ..Default::default()
                };
                let loader = headless_surface::Instance::new(&b.entry, &instance);
                Some(
                    unsafe { loader.create_headless_surface(&info, None) }
                        .map_err(InitError::vk("vkCreateHeadlessSurfaceEXT"))?,
                )
            }
            SurfaceTarget::None => None,
        };
        if let Some(handle) = handle {
            b.surface = Some(PresentSurface {
                loader: surface::Instance::new(&b.entry, &instance),
                handle,
            });
        }

        let chosen = unsafe { pick_physical_device(&instance, b.surface.as_ref()) }?;
        let device_name = unsafe { CStr::from_ptr(chosen.props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let device = unsafe {
            create_logical_device(&instance, chosen.phys, chosen.families, b.surface.is_some())
        }?;
        let device = b.device.insert(device).clone();

        let graphics_queue = unsafe { device.get_device_queue(chosen.families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(chosen.families.present, 0) };

        let allocator = MemoryAllocator::new(
            &instance,
            &device,
            chosen.phys,
            chosen.props.limits.non_coherent_atom_size,
        )?;

        info!(
            gpu = %device_name,
            api = format_args!(
                "{}.{}",
                vk::api_version_major(chosen.props.api_version),
                vk::api_version_minor(chosen.props.api_version)
            ),
            graphics_family = chosen.families.graphics,
            present_family = chosen.families.present,
            headless = b.surface.is_none(),
            validation,
            "Vulkan device ready"
        );

        // Everything succeeded: disarm the cleanup guard.
        let entry = b.entry.clone();
        let debug = b.debug.take();
        let surface = b.surface.take();
        b.device = None;
        b.instance = None;

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface,
            physical_device: chosen.phys,
            properties: chosen.props,
            device_name,
            device,
            families: chosen.families,
            graphics_queue,
            present_queue,
            allocator,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn surface(&self) -> Option<&PresentSurface> {
        self.surface.as_ref()
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// The shared allocator. Buffers keep only a weak handle to it.
    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        unsafe { self.device.device_wait_idle() }
    }

    /// Records `record` into a one-shot command buffer, submits it on the
    /// graphics queue and blocks until it has executed.
    pub fn submit_immediate<F>(&self, record: F) -> Result<(), vk::Result>
    where
        F: FnOnce(&CommandTarget<'_>),
    {
        let d = &self.device;
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: self.families.graphics,
                flags: vk::CommandPoolCreateFlags::TRANSIENT,
                ..Default::default()
            };
            let pool = d.create_command_pool(&pool_info, None)?;

            // Destroying the pool frees its command buffers too.
            let result = (|| {
                let ai = vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    command_pool: pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    ..Default::default()
                };
                let cmd = d.allocate_command_buffers(&ai)?[0];
                let bi = vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                };
                d.begin_command_buffer(cmd, &bi)?;
                record(&CommandTarget::new(d, cmd));
                d.end_command_buffer(cmd)?;

                let fence = d.create_fence(&vk::FenceCreateInfo::default(), None)?;
                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                let waited = d
                    .queue_submit(self.graphics_queue, std::slice::from_ref(&si), fence)
                    .and_then(|()| d.wait_for_fences(&[fence], true, u64::MAX));
                d.destroy_fence(fence, None);
                waited
            })();

            d.destroy_command_pool(pool, None);
            result
        }
    }
}

// STRICT TEARDOWN ORDER (reverse of creation):
// - device_wait_idle()
// - allocator BEFORE device
// - device BEFORE surface
// - surface and debug messenger BEFORE instance; instance last.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("device_wait_idle during teardown: {e}");
            }

            self.allocator.shutdown();
            self.device.destroy_device(None);

            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.handle, None);
            }
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("device context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    const GC: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw(),
    );

    #[test]
    fn prefers_a_single_family_for_graphics_and_present() {
        let fams = [
            family(vk::QueueFlags::TRANSFER),
            family(GC),
            family(GC | vk::QueueFlags::TRANSFER),
        ];
        // family 1 cannot present, family 2 can
        let picked = select_queue_families(&fams, true, |i| i == 2).unwrap();
        assert_eq!(picked, QueueFamilies { graphics: 2, present: 2 });
        assert!(picked.is_shared());
    }

    #[test]
    fn falls_back_to_split_families() {
        let fams = [family(GC), family(vk::QueueFlags::TRANSFER)];
        let picked = select_queue_families(&fams, true, |i| i == 1).unwrap();
        assert_eq!(picked, QueueFamilies { graphics: 0, present: 1 });
        assert!(!picked.is_shared());
    }

    #[test]
    fn graphics_without_compute_is_rejected() {
        let fams = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&fams, false, |_| true).is_none());
    }

    #[test]
    fn no_present_support_is_rejected() {
        let fams = [family(GC)];
        assert!(select_queue_families(&fams, true, |_| false).is_none());
    }

    #[test]
    fn headless_ignores_present_support() {
        let fams = [family(vk::QueueFlags::TRANSFER), family(GC)];
        let picked = select_queue_families(&fams, false, |_| panic!("not consulted")).unwrap();
        assert_eq!(picked, QueueFamilies { graphics: 1, present: 1 });
    }

    #[test]
    fn discrete_outranks_integrated_outranks_cpu() {
        use vk::PhysicalDeviceType as T;
        assert!(device_type_rank(T::DISCRETE_GPU) > device_type_rank(T::INTEGRATED_GPU));
        assert!(device_type_rank(T::INTEGRATED_GPU) > device_type_rank(T::VIRTUAL_GPU));
        assert!(device_type_rank(T::VIRTUAL_GPU) > device_type_rank(T::CPU));
        assert!(device_type_rank(T::CPU) > device_type_rank(T::OTHER));
    }
}
