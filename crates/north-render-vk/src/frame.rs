// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight: per-slot command buffers and sync objects, and the
//! acquire → record → submit → present cycle.
use ash::vk;
use tracing::{error, trace, warn};

use crate::command::{CommandTarget, FrameContent, FrameRecorder, RenderCommand};
use crate::device::DeviceContext;
use crate::error::{FrameError, InitError};
use crate::swapchain::Swapchain;

/// How many frames the host may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Slot that follows `slot` in the ring.
pub(crate) fn next_slot(slot: usize) -> usize {
    (slot + 1) % MAX_FRAMES_IN_FLIGHT
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    /// Submitted and handed to presentation. `stale` asks for a rebuild
    /// before the next frame.
    Presented { stale: bool },
    /// Acquire found the chain out of date. Nothing was submitted and the
    /// slot's fence is untouched.
    OutOfDate,
}

#[derive(Default)]
struct FrameSlot {
    image_acquired: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    cmd: vk::CommandBuffer,
}

unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore, vk::Result> {
    let info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    unsafe { device.create_semaphore(&info, None) }
}

// Created signaled so the first wait on each slot returns immediately.
unsafe fn create_signaled_fence(device: &ash::Device) -> Result<vk::Fence, vk::Result> {
    let info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    unsafe { device.create_fence(&info, None) }
}

/// Owns the per-slot sync objects and the command pool their command
/// buffers come from.
pub(crate) struct FrameSynchronizer {
    device: ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    current: usize,
    timeout_ms: u64,
}

impl FrameSynchronizer {
    pub(crate) fn new(ctx: &DeviceContext, timeout_ms: u64) -> Result<Self, InitError> {
        let device = ctx.device().clone();
        let mut this = Self {
            device,
            queue: ctx.graphics_queue(),
            pool: vk::CommandPool::null(),
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            current: 0,
            timeout_ms,
        };
        if let Err(e) = unsafe { this.create_objects(ctx.queue_families().graphics) } {
            this.destroy();
            return Err(e);
        }
        Ok(this)
    }

    unsafe fn create_objects(&mut self, family: u32) -> Result<(), InitError> {
        let d = &self.device;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        self.pool = unsafe { d.create_command_pool(&pool_info, None) }
            .map_err(InitError::vk("vkCreateCommandPool"))?;

        let alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: MAX_FRAMES_IN_FLIGHT as u32,
            ..Default::default()
        };
        let cmds = unsafe { d.allocate_command_buffers(&alloc) }
            .map_err(InitError::vk("vkAllocateCommandBuffers"))?;

        for cmd in cmds {
            // Push first so a half-built slot is still cleaned up.
            self.slots.push(FrameSlot {
                cmd,
                ..Default::default()
            });
            let last = self.slots.len() - 1;
            let slot = &mut self.slots[last];
            slot.image_acquired =
                unsafe { create_semaphore(d) }.map_err(InitError::vk("vkCreateSemaphore"))?;
            slot.render_finished =
                unsafe { create_semaphore(d) }.map_err(InitError::vk("vkCreateSemaphore"))?;
            slot.in_flight =
                unsafe { create_signaled_fence(d) }.map_err(InitError::vk("vkCreateFence"))?;
        }
        Ok(())
    }

    pub(crate) fn current_slot(&self) -> usize {
        self.current
    }

    /// Slot fences not yet signaled, i.e. frames the GPU still owns.
    pub(crate) fn pending_fences(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(unsafe { self.device.get_fence_status(s.in_flight) }, Ok(true)))
            .count()
    }

    pub(crate) fn draw<C: FrameContent + ?Sized>(
        &mut self,
        ctx: &DeviceContext,
        swapchain: &Swapchain,
        clear_color: [f32; 4],
        content: &mut C,
    ) -> Result<FrameOutcome, FrameError> {
        let slot_index = self.current;
        let d = &self.device;
        let (image_acquired, render_finished, in_flight, cmd) = {
            let s = &self.slots[slot_index];
            (s.image_acquired, s.render_finished, s.in_flight, s.cmd)
        };

        // 1) CPU waits for this slot's previous submission
        let timeout_ns = self.timeout_ms.saturating_mul(1_000_000);
        match unsafe { d.wait_for_fences(&[in_flight], true, timeout_ns) } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                return Err(FrameError::FenceTimeout {
                    slot: slot_index,
                    timeout_ms: self.timeout_ms,
                })
            }
            Err(e) => return Err(FrameError::FenceWait(e)),
        }

        // 2) Acquire
        let (image_index, acquire_suboptimal) = match unsafe {
            swapchain.loader().acquire_next_image(
                swapchain.handle(),
                u64::MAX,
                image_acquired,
                vk::Fence::null(),
            )
        } {
            Ok(pair) => pair,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(FrameOutcome::OutOfDate),
            Err(e) => return Err(FrameError::Acquire(e)),
        };

        // 3) Record. The fence is still signaled here, so a failure only has
        //    to consume the acquire semaphore.
        if let Err(e) =
            unsafe { self.record(cmd, image_index, slot_index, swapchain, clear_color, content) }
        {
            error!(slot = slot_index, image_index, "command recording failed: {e}");
            unsafe { self.drain_slot(slot_index) };
            return Err(FrameError::Record(e));
        }

        // 4) Reset only now that there is work that will signal it again
        let d = &self.device;
        if let Err(e) = unsafe { d.reset_fences(&[in_flight]) } {
            unsafe { self.drain_slot(slot_index) };
            return Err(FrameError::Record(e));
        }

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_acquired,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_finished,
            ..Default::default()
        };
        if let Err(e) =
            unsafe { d.queue_submit(self.queue, std::slice::from_ref(&submit), in_flight) }
        {
            // Nothing will ever signal the reset fence or wait the semaphore.
            unsafe { self.rearm_slot(slot_index) };
            return Err(FrameError::Submit(e));
        }

        // 5) Present
        let swapchains = [swapchain.handle()];
        let indices = [image_index];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        let present_stale = match unsafe {
            swapchain
                .loader()
                .queue_present(ctx.present_queue(), &present)
        } {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => {
                self.current = next_slot(slot_index);
                return Err(FrameError::Present(e));
            }
        };

        // 6) Advance
        self.current = next_slot(slot_index);
        trace!(slot = slot_index, image_index, "frame submitted");
        Ok(FrameOutcome::Presented {
            stale: acquire_suboptimal || present_stale,
        })
    }

    unsafe fn record<C: FrameContent + ?Sized>(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        slot: usize,
        swapchain: &Swapchain,
        clear_color: [f32; 4],
        content: &mut C,
    ) -> Result<(), vk::Result> {
        let d = &self.device;
        let framebuffer = swapchain
            .framebuffer(image_index)
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)?;

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)?;
        }

        let extent = swapchain.extent();
        let mut recorder = FrameRecorder::new(CommandTarget::new(d, cmd), image_index, slot, extent);
        content.record_transfers(&mut recorder);
        if recorder.in_render_pass() {
            warn!(slot, "transfer phase left a render pass open; closing it");
            recorder.execute(RenderCommand::EndPass);
        }

        recorder.execute(RenderCommand::BeginPass {
            render_pass: swapchain.render_pass(),
            framebuffer,
            extent,
            clear_color,
        });
        content.record_draws(&mut recorder);
        if recorder.in_render_pass() {
            recorder.execute(RenderCommand::EndPass);
        }

        unsafe { d.end_command_buffer(cmd) }
    }

    /// Consumes the acquire semaphore with an empty submission that also
    /// signals the slot fence, so the slot can be waited on again.
    unsafe fn drain_slot(&mut self, slot_index: usize) {
        let d = &self.device;
        let (image_acquired, in_flight) = {
            let s = &self.slots[slot_index];
            (s.image_acquired, s.in_flight)
        };
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_acquired,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            ..Default::default()
        };
        let drained = unsafe {
            d.reset_fences(&[in_flight]).and_then(|()| {
                d.queue_submit(self.queue, std::slice::from_ref(&submit), in_flight)
            })
        };
        match drained {
            Ok(()) => warn!(slot = slot_index, "frame slot drained after failed recording"),
            Err(e) => {
                error!(slot = slot_index, "drain submission failed: {e}");
                unsafe { self.rearm_slot(slot_index) };
            }
        }
    }

    /// Replaces the slot's fence with a signaled one and its acquire
    /// semaphore with an unsignaled one.
    unsafe fn rearm_slot(&mut self, slot_index: usize) {
        let d = &self.device;
        // The old objects may still be referenced by a failed submission.
        if let Err(e) = unsafe { d.device_wait_idle() } {
            error!("device_wait_idle while re-arming slot {slot_index}: {e}");
        }
        let slot = &mut self.slots[slot_index];
        match unsafe { create_signaled_fence(d) } {
            Ok(fence) => {
                unsafe { d.destroy_fence(slot.in_flight, None) };
                slot.in_flight = fence;
            }
            Err(e) => error!(slot = slot_index, "could not replace frame fence: {e}"),
        }
        match unsafe { create_semaphore(d) } {
            Ok(sem) => {
                unsafe { d.destroy_semaphore(slot.image_acquired, None) };
                slot.image_acquired = sem;
            }
            Err(e) => error!(slot = slot_index, "could not replace acquire semaphore: {e}"),
        }
    }

    /// Destroys sync objects and the pool. The caller must have idled the
    /// device.
    pub(crate) fn destroy(&mut self) {
        let d = &self.device;
        unsafe {
            for s in self.slots.drain(..) {
                if s.image_acquired != vk::Semaphore::null() {
                    d.destroy_semaphore(s.image_acquired, None);
                }
                if s.render_finished != vk::Semaphore::null() {
                    d.destroy_semaphore(s.render_finished, None);
                }
                if s.in_flight != vk::Fence::null() {
                    d.destroy_fence(s.in_flight, None);
                }
            }
            if self.pool != vk::CommandPool::null() {
                d.destroy_command_pool(self.pool, None);
                self.pool = vk::CommandPool::null();
            }
        }
    }
}
