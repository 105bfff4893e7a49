// SPDX-License-Identifier: CEPL-1.0
//! Per-frame acquire/record/submit/present state machine.
//!
//! `FrameSubmitter` owns the frames-in-flight ring and the images-in-flight
//! table and drives a `FrameOps` implementation through one frame. The GPU
//! side lives behind the trait so the ordering rules can be checked without a
//! device.

use ash::vk;
use rpg_render::FrameStatus;
use tracing::{debug, trace};

use crate::error::RenderError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePhase {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// What to bind and how many vertices to draw this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub buffer: vk::Buffer,
    pub vertex_count: u32,
}

/// Supplies the vertex buffer to draw from at submit time.
pub trait DrawSource {
    fn draw_call(&self) -> DrawCall;
}

/// GPU operations for one frame, indexed by ring slot and swapchain image.
pub trait FrameOps {
    /// Blocks until the slot's fence is signaled (bounded).
    fn wait_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    fn acquire(&mut self, slot: usize) -> Result<Acquired, RenderError>;
    /// Records clear + optional draw into the slot's command buffer.
    fn record(&mut self, slot: usize, image: u32, draw: Option<DrawCall>) -> Result<(), RenderError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), RenderError>;
    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError>;
    /// Rebuilds size-dependent resources and returns the new image count.
    fn rebuild_swapchain(&mut self) -> Result<usize, RenderError>;
    fn has_pipeline(&self) -> bool;
}

/// Ring position and which slot last rendered into each swapchain image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRing {
    current: usize,
    slots: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl FrameRing {
    pub fn new(slots: usize, image_count: usize) -> Self {
        Self {
            current: 0,
            slots: slots.max(1),
            images_in_flight: vec![None; image_count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots;
    }

    /// Marks `image` as owned by `slot`. Returns the previous owner when it
    /// was a different slot whose work must finish first.
    pub fn claim_image(&mut self, image: u32, slot: usize) -> Option<usize> {
        let entry = self.images_in_flight.get_mut(image as usize)?;
        let prev = entry.replace(slot);
        prev.filter(|&p| p != slot)
    }

    /// Resizes to the new image count with every entry cleared.
    /// The ring position is kept; slots survive a rebuild.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    pub fn image_owner(&self, image: u32) -> Option<usize> {
        self.images_in_flight.get(image as usize).copied().flatten()
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }
}

#[derive(Debug)]
pub struct FrameSubmitter {
    ring: FrameRing,
    phase: FramePhase,
    frames: u64,
}

impl FrameSubmitter {
    pub fn new(slots: usize, image_count: usize) -> Self {
        Self {
            ring: FrameRing::new(slots, image_count),
            phase: FramePhase::Idle,
            frames: 0,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Frames actually presented so far.
    pub fn presented_frames(&self) -> u64 {
        self.frames
    }

    /// Runs one frame. A slot fence is reset only immediately before the
    /// submit that will signal it, so an early return never strands a slot.
    pub fn draw_frame<O: FrameOps + ?Sized>(
        &mut self,
        ops: &mut O,
        source: &dyn DrawSource,
    ) -> Result<FrameStatus, RenderError> {
        let slot = self.ring.current();

        self.phase = FramePhase::Acquiring;
        ops.wait_slot(slot)?;

        let mut rebuild_after = false;
        let image = match ops.acquire(slot)? {
            Acquired::OutOfDate => {
                debug!("acquire: swapchain out of date, skipping frame");
                self.rebuild(ops)?;
                self.phase = FramePhase::Idle;
                return Ok(FrameStatus::Skipped);
            }
            Acquired::Image { index, suboptimal } => {
                rebuild_after |= suboptimal;
                index
            }
        };

        if let Some(prev) = self.ring.claim_image(image, slot) {
            trace!("image {image} still owned by slot {prev}; waiting");
            ops.wait_slot(prev)?;
        }

        self.phase = FramePhase::Recording;
        let draw = ops.has_pipeline().then(|| source.draw_call());
        ops.record(slot, image, draw)?;

        ops.reset_slot(slot)?;
        ops.submit(slot, image)?;
        // A failed present leaves the frame here: queued but never shown.
        self.phase = FramePhase::Submitted;

        let presented = ops.present(slot, image)?;
        self.phase = FramePhase::Presenting;
        rebuild_after |= presented != Presented::Optimal;

        self.ring.advance();
        self.frames += 1;

        let status = if rebuild_after {
            self.rebuild(ops)?;
            FrameStatus::PresentedAndRebuilt
        } else {
            FrameStatus::Presented
        };
        self.phase = FramePhase::Idle;
        Ok(status)
    }

    /// Rebuilds through `ops` and resizes the images-in-flight table to match.
    pub fn rebuild<O: FrameOps + ?Sized>(&mut self, ops: &mut O) -> Result<(), RenderError> {
        let images = ops.rebuild_swapchain()?;
        self.ring.reset_images(images);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Fence {
        Signaled,
        Pending,
        Reset,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Record {
            slot: usize,
            image: u32,
            vertices: Option<u32>,
        },
        Reset(usize),
        Submit(usize, u32),
        Present(u32),
        Rebuild,
    }

    struct MockGpu {
        fences: Vec<Fence>,
        image_count: u32,
        next_image: u32,
        scripted_acquire: VecDeque<Acquired>,
        scripted_present: VecDeque<Presented>,
        rebuild_image_count: Option<u32>,
        present_fails: bool,
        rebuild_fails: bool,
        pipeline: bool,
        calls: Vec<Call>,
    }

    impl MockGpu {
        fn new(slots: usize, image_count: u32) -> Self {
            Self {
                fences: vec![Fence::Signaled; slots],
                image_count,
                next_image: 0,
                scripted_acquire: VecDeque::new(),
                scripted_present: VecDeque::new(),
                rebuild_image_count: None,
                present_fails: false,
                rebuild_fails: false,
                pipeline: true,
                calls: Vec::new(),
            }
        }

        fn take_calls(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl FrameOps for MockGpu {
        fn wait_slot(&mut self, slot: usize) -> Result<(), RenderError> {
            self.calls.push(Call::Wait(slot));
            match self.fences[slot] {
                Fence::Reset => panic!("deadlock: waited on slot {slot} whose fence was reset but never submitted"),
                // GPU finishes the pending work.
                _ => self.fences[slot] = Fence::Signaled,
            }
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<Acquired, RenderError> {
            self.calls.push(Call::Acquire(slot));
            if let Some(a) = self.scripted_acquire.pop_front() {
                return Ok(a);
            }
            let index = self.next_image % self.image_count;
            self.next_image += 1;
            Ok(Acquired::Image {
                index,
                suboptimal: false,
            })
        }

        fn record(&mut self, slot: usize, image: u32, draw: Option<DrawCall>) -> Result<(), RenderError> {
            assert!(image < self.image_count, "image {image} out of range");
            self.calls.push(Call::Record {
                slot,
                image,
                vertices: draw.map(|d| d.vertex_count),
            });
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
            assert_eq!(self.fences[slot], Fence::Signaled, "reset of an unsignaled fence");
            self.fences[slot] = Fence::Reset;
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<(), RenderError> {
            assert_eq!(self.fences[slot], Fence::Reset, "submit without reset");
            self.fences[slot] = Fence::Pending;
            self.calls.push(Call::Submit(slot, image));
            Ok(())
        }

        fn present(&mut self, _slot: usize, image: u32) -> Result<Presented, RenderError> {
            self.calls.push(Call::Present(image));
            if self.present_fails {
                return Err(RenderError::from_vk(
                    "queue_present",
                    vk::Result::ERROR_SURFACE_LOST_KHR,
                ));
            }
            Ok(self.scripted_present.pop_front().unwrap_or(Presented::Optimal))
        }

        fn rebuild_swapchain(&mut self) -> Result<usize, RenderError> {
            self.calls.push(Call::Rebuild);
            if self.rebuild_fails {
                return Err(RenderError::from_vk(
                    "create_swapchain",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            if let Some(n) = self.rebuild_image_count.take() {
                self.image_count = n;
            }
            self.next_image = 0;
            Ok(self.image_count as usize)
        }

        fn has_pipeline(&self) -> bool {
            self.pipeline
        }
    }

    struct Triangles(u32);

    impl DrawSource for Triangles {
        fn draw_call(&self) -> DrawCall {
            DrawCall {
                buffer: vk::Buffer::null(),
                vertex_count: self.0,
            }
        }
    }

    #[test]
    fn happy_path_order() {
        let mut gpu = MockGpu::new(2, 3);
        let mut sub = FrameSubmitter::new(2, 3);

        let status = sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            gpu.take_calls(),
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Record {
                    slot: 0,
                    image: 0,
                    vertices: Some(6)
                },
                Call::Reset(0),
                Call::Submit(0, 0),
                Call::Present(0),
            ]
        );
        assert_eq!(sub.ring().current(), 1);
        assert_eq!(sub.phase(), FramePhase::Idle);
        assert_eq!(sub.presented_frames(), 1);
    }

    #[test]
    fn out_of_date_acquire_skips_without_stranding_fence() {
        let mut gpu = MockGpu::new(2, 3);
        let mut sub = FrameSubmitter::new(2, 3);
        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        gpu.take_calls();

        gpu.scripted_acquire.push_back(Acquired::OutOfDate);
        let status = sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        assert_eq!(status, FrameStatus::Skipped);

        let calls = gpu.take_calls();
        assert_eq!(calls, vec![Call::Wait(1), Call::Acquire(1), Call::Rebuild]);
        assert!(gpu.fences.iter().all(|f| *f != Fence::Reset));
        assert_eq!(sub.ring().current(), 1, "skipped frame must not advance the ring");

        // Next frame reuses slot 1 and would panic on a stranded fence.
        assert_eq!(
            sub.draw_frame(&mut gpu, &Triangles(6)).unwrap(),
            FrameStatus::Presented
        );
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut gpu = MockGpu::new(2, 3);
        let mut sub = FrameSubmitter::new(2, 3);
        gpu.scripted_acquire.push_back(Acquired::Image {
            index: 2,
            suboptimal: true,
        });

        let status = sub.draw_frame(&mut gpu, &Triangles(3)).unwrap();
        assert_eq!(status, FrameStatus::PresentedAndRebuilt);
        let calls = gpu.take_calls();
        assert_eq!(calls[calls.len() - 2], Call::Present(2));
        assert_eq!(calls[calls.len() - 1], Call::Rebuild);
    }

    #[test]
    fn out_of_date_present_triggers_rebuild() {
        let mut gpu = MockGpu::new(2, 3);
        let mut sub = FrameSubmitter::new(2, 3);
        gpu.scripted_present.push_back(Presented::OutOfDate);

        let status = sub.draw_frame(&mut gpu, &Triangles(3)).unwrap();
        assert_eq!(status, FrameStatus::PresentedAndRebuilt);
        assert_eq!(sub.ring().current(), 1);
        assert_eq!(sub.ring().image_owner(0), None, "rebuild clears image ownership");
    }

    #[test]
    fn failed_present_stops_at_submitted() {
        let mut gpu = MockGpu::new(2, 3);
        gpu.present_fails = true;
        let mut sub = FrameSubmitter::new(2, 3);

        let err = sub.draw_frame(&mut gpu, &Triangles(6)).unwrap_err();
        assert!(matches!(err, RenderError::Vulkan { op: "queue_present", .. }));
        assert_eq!(sub.phase(), FramePhase::Submitted);
        assert_eq!(sub.presented_frames(), 0);
        assert_eq!(gpu.fences[0], Fence::Pending);
    }

    #[test]
    fn failed_rebuild_after_present_stops_at_presenting() {
        let mut gpu = MockGpu::new(2, 3);
        gpu.scripted_present.push_back(Presented::Suboptimal);
        gpu.rebuild_fails = true;
        let mut sub = FrameSubmitter::new(2, 3);

        assert!(sub.draw_frame(&mut gpu, &Triangles(6)).is_err());
        assert_eq!(sub.phase(), FramePhase::Presenting);
        assert_eq!(sub.presented_frames(), 1);
        assert_eq!(sub.ring().current(), 1);
    }

    #[test]
    fn waits_on_previous_owner_of_image() {
        // Two slots over three images: the fourth frame lands on image 0,
        // last rendered by slot 0, while running in slot 1.
        let mut gpu = MockGpu::new(2, 3);
        let mut sub = FrameSubmitter::new(2, 3);
        for _ in 0..3 {
            sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        }
        gpu.take_calls();

        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        let calls = gpu.take_calls();
        assert_eq!(&calls[..3], &[Call::Wait(1), Call::Acquire(1), Call::Wait(0)]);
        assert_eq!(sub.ring().image_owner(0), Some(1));
    }

    #[test]
    fn same_slot_reacquire_does_not_double_wait() {
        let mut gpu = MockGpu::new(1, 1);
        let mut sub = FrameSubmitter::new(1, 1);
        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        gpu.take_calls();
        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        let waits = gpu
            .take_calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Wait(_)))
            .count();
        assert_eq!(waits, 1);
    }

    #[test]
    fn degraded_mode_clears_without_drawing() {
        let mut gpu = MockGpu::new(2, 3);
        gpu.pipeline = false;
        let mut sub = FrameSubmitter::new(2, 3);

        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        assert!(gpu.take_calls().contains(&Call::Record {
            slot: 0,
            image: 0,
            vertices: None
        }));
    }

    #[test]
    fn image_count_shrink_after_rebuild() {
        let mut gpu = MockGpu::new(2, 4);
        let mut sub = FrameSubmitter::new(2, 4);
        gpu.scripted_acquire.push_back(Acquired::Image {
            index: 3,
            suboptimal: false,
        });
        sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        assert_eq!(sub.ring().image_owner(3), Some(0));

        gpu.rebuild_image_count = Some(2);
        gpu.scripted_acquire.push_back(Acquired::OutOfDate);
        assert_eq!(
            sub.draw_frame(&mut gpu, &Triangles(6)).unwrap(),
            FrameStatus::Skipped
        );
        assert_eq!(sub.ring().image_count(), 2);

        for _ in 0..4 {
            sub.draw_frame(&mut gpu, &Triangles(6)).unwrap();
        }
        assert_eq!(sub.ring().image_owner(3), None);
    }

    #[test]
    fn fatal_acquire_error_propagates() {
        struct LostDevice(MockGpu);
        impl FrameOps for LostDevice {
            fn wait_slot(&mut self, slot: usize) -> Result<(), RenderError> {
                self.0.wait_slot(slot)
            }
            fn acquire(&mut self, _slot: usize) -> Result<Acquired, RenderError> {
                Err(RenderError::from_vk(
                    "acquire_next_image",
                    vk::Result::ERROR_DEVICE_LOST,
                ))
            }
            fn record(&mut self, s: usize, i: u32, d: Option<DrawCall>) -> Result<(), RenderError> {
                self.0.record(s, i, d)
            }
            fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
                self.0.reset_slot(slot)
            }
            fn submit(&mut self, slot: usize, image: u32) -> Result<(), RenderError> {
                self.0.submit(slot, image)
            }
            fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError> {
                self.0.present(slot, image)
            }
            fn rebuild_swapchain(&mut self) -> Result<usize, RenderError> {
                self.0.rebuild_swapchain()
            }
            fn has_pipeline(&self) -> bool {
                true
            }
        }

        let mut gpu = LostDevice(MockGpu::new(2, 3));
        let mut sub = FrameSubmitter::new(2, 3);
        let err = sub.draw_frame(&mut gpu, &Triangles(6)).unwrap_err();
        assert!(err.is_device_lost());
        assert!(!gpu.0.calls.contains(&Call::Rebuild));
        assert!(gpu.0.fences.iter().all(|f| *f == Fence::Signaled));
    }

    #[test]
    fn ring_wraps_at_slot_count() {
        let mut ring = FrameRing::new(3, 3);
        let seen: Vec<_> = (0..5)
            .map(|_| {
                let c = ring.current();
                ring.advance();
                c
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn claim_out_of_range_image_is_ignored() {
        let mut ring = FrameRing::new(2, 2);
        assert_eq!(ring.claim_image(5, 0), None);
        assert_eq!(ring.claim_image(1, 0), None);
        assert_eq!(ring.claim_image(1, 1), Some(0));
        assert_eq!(ring.claim_image(1, 1), None);
    }
}
