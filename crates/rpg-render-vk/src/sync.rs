// SPDX-License-Identifier: CEPL-1.0
//! Vulkan side of the frame loop: per-slot sync objects and the `FrameOps`
//! implementation that records and submits against the live swapchain.

use ash::vk;
use rpg_render::RenderSize;
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{RenderError, VkResultExt};
use crate::frame::{Acquired, DrawCall, FrameOps, Presented};
use crate::pipeline::{GraphicsPipeline, PipelineBuilder};
use crate::swapchain::Swapchain;
use crate::teardown::destroy_rev;

pub(crate) struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub cmd: vk::CommandBuffer,
}

/// Sync objects and command buffers for every frame in flight, plus the pool
/// they come from (also used for one-shot transfer commands).
pub(crate) struct FrameSlots {
    device: ash::Device,
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub(crate) unsafe fn new(ctx: &DeviceContext, count: usize) -> Result<Self, RenderError> {
        let device = &ctx.device;
        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: ctx.families.graphics,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_ci, None)
            .op("create_command_pool")?;
        let mut out = Self {
            device: device.clone(),
            pool,
            slots: Vec::with_capacity(count),
        };

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&ai)
            .op("allocate_command_buffers")?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for cmd in cmds {
            // Push first so Drop sees partially created slots; null handles are skipped.
            let i = out.slots.len();
            out.slots.push(FrameSlot {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
                cmd,
            });
            let slot = &mut out.slots[i];
            slot.image_available = device.create_semaphore(&sem_ci, None).op("create_semaphore")?;
            slot.render_finished = device.create_semaphore(&sem_ci, None).op("create_semaphore")?;
            slot.in_flight = device.create_fence(&fence_ci, None).op("create_fence")?;
        }
        info!("frame slots: {count}");
        Ok(out)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub(crate) fn fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(|s| s.in_flight).collect()
    }

    fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        let device = &self.device;
        unsafe {
            destroy_rev(&mut self.slots, |s| {
                device.destroy_fence(s.in_flight, None);
                device.destroy_semaphore(s.render_finished, None);
                device.destroy_semaphore(s.image_available, None);
            });
            // Freeing the pool frees its command buffers.
            device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Borrowed view of the renderer for one frame.
pub(crate) struct VkFrameTarget<'a> {
    pub ctx: &'a DeviceContext,
    pub swapchain: &'a mut Swapchain,
    pub shaders: &'a PipelineBuilder,
    pub pipeline: &'a mut Option<GraphicsPipeline>,
    pub slots: &'a FrameSlots,
    pub clear: vk::ClearValue,
    pub window: RenderSize,
    pub timeout_ns: u64,
}

impl FrameOps for VkFrameTarget<'_> {
    fn wait_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fence = self.slots.get(slot).in_flight;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, self.timeout_ns)
                .op("wait_for_fences")
        }
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquired, RenderError> {
        if !self.swapchain.is_ready() {
            return Ok(Acquired::OutOfDate);
        }
        let sem = self.slots.get(slot).image_available;
        let res = unsafe {
            self.swapchain.loader().acquire_next_image(
                self.swapchain.handle(),
                self.timeout_ns,
                sem,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(RenderError::from_vk("acquire_next_image", e)),
        }
    }

    fn record(&mut self, slot: usize, image: u32, draw: Option<DrawCall>) -> Result<(), RenderError> {
        let d = &self.ctx.device;
        let cmd = self.slots.get(slot).cmd;
        let extent = self.swapchain.extent();
        let framebuffer = self
            .swapchain
            .framebuffer(image)
            .ok_or(RenderError::NoFramebuffer { image })?;
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .op("reset_command_buffer")?;
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi).op("begin_command_buffer")?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.swapchain.render_pass(),
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                clear_value_count: 1,
                p_clear_values: &self.clear,
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            if let (Some(draw), Some(pipeline)) = (draw, self.pipeline.as_ref()) {
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
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
                d.cmd_set_viewport(cmd, 0, &[viewport]);
                d.cmd_set_scissor(cmd, 0, &[scissor]);
                if draw.vertex_count > 0 {
                    d.cmd_bind_vertex_buffers(cmd, 0, &[draw.buffer], &[0]);
                    d.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
                }
            }

            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).op("end_command_buffer")
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fence = self.slots.get(slot).in_flight;
        unsafe { self.ctx.device.reset_fences(&[fence]).op("reset_fences") }
    }

    fn submit(&mut self, slot: usize, _image: u32) -> Result<(), RenderError> {
        let s = self.slots.get(slot);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(
                    self.ctx.graphics_queue,
                    std::slice::from_ref(&submit),
                    s.in_flight,
                )
                .op("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError> {
        let s = self.slots.get(slot);
        let swapchain = self.swapchain.handle();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.swapchain
                .loader()
                .queue_present(self.ctx.present_queue, &present)
        } {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(e) => Err(RenderError::from_vk("queue_present", e)),
        }
    }

    fn rebuild_swapchain(&mut self) -> Result<usize, RenderError> {
        let rebuilt = unsafe { self.swapchain.rebuild(self.ctx, self.window)? };
        if let Some(r) = rebuilt {
            if r.format_changed {
                // Drop the old pipeline before building against the new pass.
                *self.pipeline = None;
                *self.pipeline = unsafe { self.shaders.build(self.swapchain.render_pass()) };
            }
        }
        Ok(self.swapchain.image_count())
    }

    fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }
}
