// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;
use tracing::{debug, error, info, warn};

use crate::error::{RenderError, VkResultExt};

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Routes validation-layer output into tracing under the `vulkan` target.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!(target: "vulkan", ?types, "{msg}");
    } else {
        debug!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Self, RenderError> {
        let loader = debug_utils::Instance::new(entry, instance);
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
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .op("create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    pub(crate) unsafe fn destroy(self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}

/// True when `wanted` appears among the loader's instance layers.
pub(crate) fn layer_available(layers: &[vk::LayerProperties], wanted: &CStr) -> bool {
    layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, src) in props.layer_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as _;
        }
        props
    }

    #[test]
    fn finds_validation_layer() {
        let layers = [layer(c"VK_LAYER_MESA_device_select"), layer(VALIDATION_LAYER)];
        assert!(layer_available(&layers, VALIDATION_LAYER));
    }

    #[test]
    fn missing_layer_reported() {
        let layers = [layer(c"VK_LAYER_MESA_device_select")];
        assert!(!layer_available(&layers, VALIDATION_LAYER));
        assert!(!layer_available(&[], VALIDATION_LAYER));
    }
}
