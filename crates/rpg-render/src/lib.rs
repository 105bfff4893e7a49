// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod scene;
mod vertex;

pub use scene::{SceneAssembler, SceneLayer, VertexSource};
pub use vertex::{push_quad, Vertex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// MAILBOX when the surface offers it, FIFO otherwise.
    #[default]
    LowLatency,
    Fifo,
}

pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub clear_color: [f32; 4],
    pub present: PresentPolicy,
    /// Enables the Khronos validation layer and debug messenger for this instance.
    pub validation: bool,
    pub frames_in_flight: usize,
    /// Upper bound on any single fence wait or image acquire.
    pub gpu_timeout: Duration,
    /// Directory holding `vert.spv` and `frag.spv`.
    pub shader_dir: PathBuf,
}

impl RenderOptions {
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present: PresentPolicy::LowLatency,
            validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            gpu_timeout: Duration::from_secs(5),
            shader_dir: PathBuf::from("spirv"),
        }
    }
}

/// What happened to one tick's frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, then the swapchain was rebuilt (suboptimal or out of date at present).
    PresentedAndRebuilt,
    /// Acquire reported out of date; the swapchain was rebuilt and nothing was drawn.
    Skipped,
    /// Zero-sized surface; nothing was acquired.
    Paused,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Uploads `vertices` as this frame's geometry and submits one frame.
    fn render(&mut self, vertices: &[Vertex]) -> Result<FrameStatus>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Vertices in the buffer bound by the most recent frame.
    fn vertex_count(&self) -> u32;
}
