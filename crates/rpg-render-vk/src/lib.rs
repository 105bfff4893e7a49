// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use rpg_render::{FrameStatus, RenderOptions, RenderSize, Renderer, Vertex};

mod debug;
mod device;
mod error;
mod frame;
mod pipeline;
mod swapchain;
mod sync;
mod teardown;
mod upload;

pub use device::{
    find_graphics_family, find_memory_type, find_present_family, select_adapter, DeviceConfig,
    DeviceContext, ImageSharing, QueueFamilies,
};
pub use error::RenderError;
pub use frame::{
    Acquired, DrawCall, DrawSource, FrameOps, FramePhase, FrameRing, FrameSubmitter, Presented,
};
pub use pipeline::{
    blend_attachment, load_shader_pair, load_spirv, vertex_input_layout, GraphicsPipeline,
    PipelineBuilder, ShaderLoadError, ShaderPair, FRAG_SHADER, VERT_SHADER,
};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, Rebuilt,
    Swapchain, SwapchainPlan, SwapchainSupport,
};
pub use upload::{AllocatedBuffer, BufferDevice, VertexBuffer};

use error::VkResultExt;
use sync::{FrameSlots, VkFrameTarget};
use upload::VkBufferDevice;

const APP_NAME: &str = "rpg";

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

// STRICT TEARDOWN ORDER (field order below is drop order):
// - Wait all frame fences (bounded), then device_wait_idle()
// - Vertex buffer released explicitly in Drop
// - Frame slots (fences, semaphores, command pool)
// - Pipeline, then shader modules
// - Swapchain generation (framebuffers, views, swapchain), then render pass
// - DeviceContext: surface, device, debug messenger, instance
pub struct VkRenderer {
    vertices: VertexBuffer<AllocatedBuffer>,
    frames: FrameSlots,
    submitter: FrameSubmitter,
    pipeline: Option<GraphicsPipeline>,
    shaders: PipelineBuilder,
    swapchain: Swapchain,
    ctx: DeviceContext,

    clear: vk::ClearValue,
    size: RenderSize,
    paused: bool,
    timeout_ns: u64,
}

impl VkRenderer {
    pub fn adapter_name(&self) -> &str {
        self.ctx.adapter_name()
    }

    /// True when no pipeline could be built; frames are cleared only.
    pub fn is_degraded(&self) -> bool {
        self.pipeline.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn phase(&self) -> FramePhase {
        self.submitter.phase()
    }

    fn frame_parts(
        &mut self,
    ) -> (
        &mut FrameSubmitter,
        VkFrameTarget<'_>,
        &VertexBuffer<AllocatedBuffer>,
    ) {
        (
            &mut self.submitter,
            VkFrameTarget {
                ctx: &self.ctx,
                swapchain: &mut self.swapchain,
                shaders: &self.shaders,
                pipeline: &mut self.pipeline,
                slots: &self.frames,
                clear: self.clear,
                window: self.size,
                timeout_ns: self.timeout_ns,
            },
            &self.vertices,
        )
    }

    fn surface_is_zero(&self) -> Result<bool, RenderError> {
        surface_extent_is_zero(unsafe {
            self.ctx
                .surface_loader
                .get_physical_device_surface_capabilities(self.ctx.phys, self.ctx.surface)
        })
    }
}

/// Zero-sized current extent means minimized; treat it like a 0x0 resize.
/// A failed query (surface lost) is fatal.
fn surface_extent_is_zero(
    caps: ash::prelude::VkResult<vk::SurfaceCapabilitiesKHR>,
) -> Result<bool, RenderError> {
    let caps = caps.op("get_physical_device_surface_capabilities")?;
    Ok(caps.current_extent.width == 0 || caps.current_extent.height == 0)
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, options) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_zero() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused");
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → resumed", size.width, size.height);
        }
        self.paused = false;
        self.size = size;

        let (submitter, mut target, _) = self.frame_parts();
        submitter.rebuild(&mut target).context("swapchain rebuild on resize")?;
        Ok(())
    }

    fn render(&mut self, vertices: &[Vertex]) -> Result<FrameStatus> {
        if self.paused || self.surface_is_zero()? {
            return Ok(FrameStatus::Paused);
        }

        {
            let mut dev = VkBufferDevice::new(&self.ctx, self.frames.pool());
            self.vertices
                .upload(&mut dev, vertices)
                .context("vertex upload")?;
        }

        let (submitter, mut target, source) = self.frame_parts();
        Ok(submitter.draw_frame(&mut target, source)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }

    fn vertex_count(&self) -> u32 {
        self.vertices.vertex_count()
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            let fences = self.frames.fences();
            if let Err(e) = d.wait_for_fences(&fences, true, self.timeout_ns) {
                warn!("teardown: frame fences did not signal: {e}");
            }
            d.device_wait_idle().ok();
        }
        let mut dev = VkBufferDevice::new(&self.ctx, self.frames.pool());
        self.vertices.release(&mut dev);
        info!(
            "vk: teardown after {} presented frames",
            self.submitter.presented_frames()
        );
    }
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    options: &RenderOptions,
) -> Result<VkRenderer> {
    // Locals drop in reverse on any early return, which is teardown order.
    let ctx = DeviceContext::new(
        window,
        display,
        &DeviceConfig {
            app_name: APP_NAME,
            validation: options.validation,
        },
    )
    .context("device context")?;

    let swapchain = Swapchain::new(&ctx, size, options.present).context("swapchain")?;

    let shaders = PipelineBuilder::new(&ctx.device, &options.shader_dir);
    let pipeline = shaders.build(swapchain.render_pass());
    if pipeline.is_none() {
        warn!(
            "no graphics pipeline (shaders from {}); frames will only be cleared",
            options.shader_dir.display()
        );
    }

    let frames = FrameSlots::new(&ctx, options.frames_in_flight()).context("frame slots")?;
    let submitter = FrameSubmitter::new(frames.len(), swapchain.image_count());

    let vertices = VertexBuffer::new_empty(&mut VkBufferDevice::new(&ctx, frames.pool()))
        .context("initial vertex buffer")?;

    let timeout_ns = u64::try_from(options.gpu_timeout.as_nanos()).unwrap_or(u64::MAX);

    info!(
        "vk: ready on {} ({} frames in flight, validation={})",
        ctx.adapter_name(),
        frames.len(),
        ctx.validation_enabled()
    );

    Ok(VkRenderer {
        vertices,
        frames,
        submitter,
        pipeline,
        shaders,
        swapchain,
        ctx,
        clear: clear_value(options.clear_color),
        size,
        paused: size.is_zero(),
        timeout_ns,
    })
}
