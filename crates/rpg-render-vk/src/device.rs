// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, adapter and logical device.
//!
//! The selection policies are plain functions over Vulkan property structs so
//! they can be exercised without a GPU; `DeviceContext::new` just feeds them
//! what the driver reports.

use std::ffi::{c_char, CStr, CString};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::debug::{layer_available, DebugMessenger, VALIDATION_LAYER};
use crate::error::{RenderError, VkResultExt};

pub struct DeviceConfig<'a> {
    pub app_name: &'a str,
    /// Request the Khronos validation layer; skipped with a warning when absent.
    pub validation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// How swapchain images are shared between the graphics and present families.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl QueueFamilies {
    pub fn image_sharing(&self) -> ImageSharing {
        if self.graphics == self.present {
            ImageSharing::Exclusive
        } else {
            ImageSharing::Concurrent([self.graphics, self.present])
        }
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Index of the adapter to use: the first discrete GPU, else the first listed.
pub fn select_adapter(types: &[vk::PhysicalDeviceType]) -> Result<usize, RenderError> {
    if types.is_empty() {
        return Err(RenderError::NoSuitableAdapter);
    }
    Ok(types
        .iter()
        .position(|&t| t == vk::PhysicalDeviceType::DISCRETE_GPU)
        .unwrap_or(0))
}

pub fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Result<u32, RenderError> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
        .ok_or(RenderError::NoGraphicsQueue)
}

/// Present family; the graphics family wins when it can present.
pub fn find_present_family(
    graphics: u32,
    family_count: u32,
    mut supports_present: impl FnMut(u32) -> bool,
) -> Result<u32, RenderError> {
    if supports_present(graphics) {
        return Ok(graphics);
    }
    (0..family_count)
        .find(|&i| i != graphics && supports_present(i))
        .ok_or(RenderError::NoPresentQueue)
}

/// First memory type allowed by `type_mask` whose flags contain `required`.
pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_mask: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_mask & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(RenderError::NoMatchingMemoryType { type_mask, required })
}

pub struct DeviceContext {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    memory: vk::PhysicalDeviceMemoryProperties,
    adapter_name: String,
}

impl DeviceContext {
    /// # Safety
    /// `window` must outlive the returned context.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &DeviceConfig<'_>,
    ) -> anyhow::Result<Self> {
        // STRICT ORDER:
        // 1) loader + instance (WSI extensions, optional validation)
        // 2) debug messenger, only if validation was actually enabled
        // 3) surface, then adapter/queues (present support needs the surface)
        // 4) logical device with the swapchain extension
        let entry = Entry::load().map_err(RenderError::Loader)?;

        let display_raw = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("display_handle: {e}"))?
            .as_raw();
        let window_raw = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("window_handle: {e}"))?
            .as_raw();

        let validation = config.validation && {
            let layers = entry
                .enumerate_instance_layer_properties()
                .op("enumerate_instance_layer_properties")?;
            let found = layer_available(&layers, VALIDATION_LAYER);
            if !found {
                warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed; continuing without it");
            }
            found
        };

        let instance = create_instance(&entry, display_raw, config.app_name, validation)?;

        let debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // Everything past this point unwinds through Drop on failure.
        let mut partial = PartialContext {
            surface_loader: surface::Instance::new(&entry, &instance),
            instance,
            debug,
            surface: vk::SurfaceKHR::null(),
            armed: true,
        };
        partial.surface =
            ash_window::create_surface(&entry, &partial.instance, display_raw, window_raw, None)
                .op("create_surface")?;
        let surface = partial.surface;

        let (phys, families) = pick_adapter(&partial.instance, &partial.surface_loader, surface)?;
        let props = partial.instance.get_physical_device_properties(phys);
        let adapter_name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();
        info!(
            "adapter: {adapter_name} ({:?}), graphics family {}, present family {}",
            props.device_type, families.graphics, families.present
        );

        let device = create_logical_device(&partial.instance, phys, &families)?;
        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        let memory = partial.instance.get_physical_device_memory_properties(phys);

        let (instance, debug, surface_loader) = partial.disarm();
        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
            memory,
            adapter_name,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    pub fn find_memory_type(
        &self,
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32, RenderError> {
        find_memory_type(&self.memory, type_mask, required)
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle().op("device_wait_idle") }
    }
}

// STRICT TEARDOWN ORDER:
// - everything device-owned (swapchain, pipelines, buffers, sync) is gone already
// - surface
// - logical device
// - debug messenger
// - instance
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.surface_loader.destroy_surface(self.surface, None);
            self.device.destroy_device(None);
            if let Some(d) = self.debug.take() {
                d.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance-level objects owned while the device is still being created.
struct PartialContext {
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    armed: bool,
}

impl PartialContext {
    /// Hands ownership to the finished context.
    fn disarm(mut self) -> (Instance, Option<DebugMessenger>, surface::Instance) {
        self.armed = false;
        (
            self.instance.clone(),
            self.debug.take(),
            self.surface_loader.clone(),
        )
    }
}

impl Drop for PartialContext {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        unsafe {
            // Null surface is a no-op.
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: raw_window_handle::RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> anyhow::Result<Instance> {
    let app = CString::new(app_name).unwrap_or_else(|_| CString::from(c"rpg"));

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .op("enumerate_required_extensions")?
        .to_vec();
    if validation {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let layers: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None).op("create_instance")?)
}

unsafe fn pick_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies), RenderError> {
    let adapters = instance
        .enumerate_physical_devices()
        .op("enumerate_physical_devices")?;
    let types: Vec<_> = adapters
        .iter()
        .map(|&p| instance.get_physical_device_properties(p).device_type)
        .collect();
    let phys = adapters[select_adapter(&types)?];

    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let graphics = find_graphics_family(&qprops)?;
    let present = find_present_family(graphics, qprops.len() as u32, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    })?;
    Ok((phys, QueueFamilies { graphics, present }))
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<ash::Device, RenderError> {
    let priorities = [1.0_f32];
    let qinfos: Vec<_> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    instance.create_device(phys, &dinfo, None).op("create_device")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in mem.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        mem
    }

    #[test]
    fn prefers_discrete_gpu() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(select_adapter(&[T::INTEGRATED_GPU, T::DISCRETE_GPU]).unwrap(), 1);
        assert_eq!(select_adapter(&[T::CPU, T::INTEGRATED_GPU]).unwrap(), 0);
    }

    #[test]
    fn no_adapters_is_an_error() {
        assert!(matches!(select_adapter(&[]), Err(RenderError::NoSuitableAdapter)));
    }

    #[test]
    fn graphics_family_lookup() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(find_graphics_family(&families).unwrap(), 1);

        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            find_graphics_family(&compute_only),
            Err(RenderError::NoGraphicsQueue)
        ));
    }

    #[test]
    fn present_family_prefers_graphics() {
        assert_eq!(find_present_family(1, 3, |_| true).unwrap(), 1);
        assert_eq!(find_present_family(0, 3, |i| i == 2).unwrap(), 2);
        assert!(matches!(
            find_present_family(0, 3, |_| false),
            Err(RenderError::NoPresentQueue)
        ));
    }

    #[test]
    fn sharing_follows_family_split() {
        let same = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(same.image_sharing(), ImageSharing::Exclusive);
        assert_eq!(same.unique(), vec![0]);

        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(split.image_sharing(), ImageSharing::Concurrent([0, 2]));
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn memory_type_respects_mask_and_flags() {
        let mem = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&mem, 0b111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&mem, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert_eq!(
            find_memory_type(&mem, 0b110, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn memory_type_without_match_errors() {
        let mem = memory(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let err = find_memory_type(&mem, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(
            err,
            RenderError::NoMatchingMemoryType { type_mask: 0b1, .. }
        ));
        // Type excluded by the mask even though its flags would match.
        assert!(find_memory_type(&mem, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
