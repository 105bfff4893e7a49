// SPDX-License-Identifier: CEPL-1.0
//! Device-local vertex buffer, refilled through a host-visible staging copy.

use ash::vk;
use rpg_render::Vertex;
use tracing::trace;

use crate::device::DeviceContext;
use crate::error::{RenderError, VkResultExt};
use crate::frame::{DrawCall, DrawSource};

/// Buffer operations the uploader needs; real or mocked.
pub trait BufferDevice {
    type Buffer;

    fn wait_idle(&mut self) -> Result<(), RenderError>;
    /// Host-visible, coherent transfer source filled with `bytes`.
    fn create_staging(&mut self, bytes: &[u8]) -> Result<Self::Buffer, RenderError>;
    /// Device-local vertex buffer; `transfer_dst` when it will receive a copy.
    fn create_vertex_buffer(
        &mut self,
        size: vk::DeviceSize,
        transfer_dst: bool,
    ) -> Result<Self::Buffer, RenderError>;
    /// Copies and blocks until the transfer has finished.
    fn copy_now(
        &mut self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), RenderError>;
    fn destroy(&mut self, buffer: Self::Buffer);
}

/// Current vertex data on the GPU. Every successful upload leaves a buffer
/// in place, so a draw can bind something even with zero vertices. A failed
/// upload leaves it empty.
#[derive(Debug)]
pub struct VertexBuffer<B> {
    current: Option<B>,
    count: u32,
}

impl<B> VertexBuffer<B> {
    pub fn new_empty<D>(dev: &mut D) -> Result<Self, RenderError>
    where
        D: BufferDevice<Buffer = B>,
    {
        let buf = dev.create_vertex_buffer(Vertex::STRIDE as vk::DeviceSize, false)?;
        Ok(Self {
            current: Some(buf),
            count: 0,
        })
    }

    /// Replaces the buffer with `vertices`. Idles the device before the old
    /// buffer is released.
    pub fn upload<D>(&mut self, dev: &mut D, vertices: &[Vertex]) -> Result<(), RenderError>
    where
        D: BufferDevice<Buffer = B>,
    {
        dev.wait_idle()?;
        if let Some(old) = self.current.take() {
            dev.destroy(old);
        }
        self.count = 0;

        if vertices.is_empty() {
            self.current = Some(dev.create_vertex_buffer(Vertex::STRIDE as vk::DeviceSize, false)?);
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;
        let staging = dev.create_staging(bytes)?;
        let dst = match dev.create_vertex_buffer(size, true) {
            Ok(b) => b,
            Err(e) => {
                dev.destroy(staging);
                return Err(e);
            }
        };
        let copied = dev.copy_now(&staging, &dst, size);
        dev.destroy(staging);
        if let Err(e) = copied {
            dev.destroy(dst);
            return Err(e);
        }

        trace!("uploaded {} vertices ({size} bytes)", vertices.len());
        self.current = Some(dst);
        self.count = vertices.len() as u32;
        Ok(())
    }

    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    pub fn buffer(&self) -> Option<&B> {
        self.current.as_ref()
    }

    pub fn release<D>(&mut self, dev: &mut D)
    where
        D: BufferDevice<Buffer = B>,
    {
        if let Some(buf) = self.current.take() {
            dev.destroy(buf);
        }
        self.count = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl DrawSource for VertexBuffer<AllocatedBuffer> {
    fn draw_call(&self) -> DrawCall {
        DrawCall {
            buffer: self.current.map_or(vk::Buffer::null(), |b| b.buffer),
            vertex_count: self.count,
        }
    }
}

/// `BufferDevice` over the real device; copies go through the graphics queue.
pub(crate) struct VkBufferDevice<'a> {
    ctx: &'a DeviceContext,
    pool: vk::CommandPool,
}

impl<'a> VkBufferDevice<'a> {
    pub(crate) fn new(ctx: &'a DeviceContext, pool: vk::CommandPool) -> Self {
        Self { ctx, pool }
    }

    unsafe fn create_buffer_and_memory(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer, RenderError> {
        let device = &self.ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device.create_buffer(&bci, None).op("create_buffer")?;
        let req = device.get_buffer_memory_requirements(buffer);
        let mem_type = match self.ctx.find_memory_type(req.memory_type_bits, props) {
            Ok(t) => t,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory = match device.allocate_memory(&mai, None) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(RenderError::from_vk("allocate_memory", e));
            }
        };
        let out = AllocatedBuffer {
            buffer,
            memory,
            size,
        };
        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            self.free(out);
            return Err(RenderError::from_vk("bind_buffer_memory", e));
        }
        Ok(out)
    }

    unsafe fn free(&self, buf: AllocatedBuffer) {
        self.ctx.device.destroy_buffer(buf.buffer, None);
        self.ctx.device.free_memory(buf.memory, None);
    }

    unsafe fn record_and_submit_copy(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), RenderError> {
        let device = &self.ctx.device;
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi).op("begin_command_buffer")?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        device.end_command_buffer(cmd).op("end_command_buffer")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
            .op("queue_submit")?;
        device
            .queue_wait_idle(self.ctx.graphics_queue)
            .op("queue_wait_idle")
    }
}

impl BufferDevice for VkBufferDevice<'_> {
    type Buffer = AllocatedBuffer;

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.ctx.wait_idle()
    }

    fn create_staging(&mut self, bytes: &[u8]) -> Result<AllocatedBuffer, RenderError> {
        let size = bytes.len() as vk::DeviceSize;
        unsafe {
            let staging = self.create_buffer_and_memory(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let device = &self.ctx.device;
            match device.map_memory(staging.memory, 0, size, vk::MemoryMapFlags::empty()) {
                Ok(ptr) => {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
                    device.unmap_memory(staging.memory);
                    Ok(staging)
                }
                Err(e) => {
                    self.free(staging);
                    Err(RenderError::from_vk("map_memory", e))
                }
            }
        }
    }

    fn create_vertex_buffer(
        &mut self,
        size: vk::DeviceSize,
        transfer_dst: bool,
    ) -> Result<AllocatedBuffer, RenderError> {
        let mut usage = vk::BufferUsageFlags::VERTEX_BUFFER;
        if transfer_dst {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        unsafe {
            self.create_buffer_and_memory(size, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        }
    }

    fn copy_now(
        &mut self,
        src: &AllocatedBuffer,
        dst: &AllocatedBuffer,
        size: vk::DeviceSize,
    ) -> Result<(), RenderError> {
        let device = &self.ctx.device;
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        unsafe {
            let cmds = device
                .allocate_command_buffers(&ai)
                .op("allocate_command_buffers")?;
            let res = self.record_and_submit_copy(cmds[0], src.buffer, dst.buffer, size);
            device.free_command_buffers(self.pool, &cmds);
            res
        }
    }

    fn destroy(&mut self, buffer: AllocatedBuffer) {
        unsafe { self.free(buffer) }
    }
}
