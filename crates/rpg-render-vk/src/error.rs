// SPDX-License-Identifier: CEPL-1.0
use ash::{prelude::VkResult, vk};
use thiserror::Error;

/// Fatal render-core failures. Recoverable surface conditions never surface here.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("no Vulkan adapter available")]
    NoSuitableAdapter,

    #[error("adapter exposes no graphics-capable queue family")]
    NoGraphicsQueue,

    #[error("no queue family can present to the window surface")]
    NoPresentQueue,

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("no memory type in mask {type_mask:#b} has properties {required:?}")]
    NoMatchingMemoryType {
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("no framebuffer for swapchain image {image}")]
    NoFramebuffer { image: u32 },

    #[error("device lost during {op} ({result})")]
    DeviceLost { op: &'static str, result: vk::Result },

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },
}

impl RenderError {
    /// Classifies a raw Vulkan failure; timeouts count as device loss.
    pub fn from_vk(op: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { op, result },
            _ => Self::Vulkan { op, result },
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost { .. })
    }
}

pub(crate) trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[inline]
    fn op(self, op: &'static str) -> Result<T, RenderError> {
        self.map_err(|r| RenderError::from_vk(op, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_device_lost() {
        let err = RenderError::from_vk("wait_for_fences", vk::Result::TIMEOUT);
        assert!(err.is_device_lost());
        let err = RenderError::from_vk("queue_submit", vk::Result::ERROR_DEVICE_LOST);
        assert!(err.is_device_lost());
    }

    #[test]
    fn other_results_stay_generic() {
        let res: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = res.op("create_buffer").unwrap_err();
        assert!(matches!(err, RenderError::Vulkan { op: "create_buffer", .. }));
        assert!(err.to_string().starts_with("create_buffer failed"));
    }
}
