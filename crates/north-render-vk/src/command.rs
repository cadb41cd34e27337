// SPDX-License-Identifier: CEPL-1.0
//! Command recording surface handed to frame content.
use ash::vk;
use tracing::warn;

/// A command buffer that is currently in the recording state, together with
/// the device that owns it. Only the crate opens recording scopes, so holding
/// one means `vkBeginCommandBuffer` has been called and `vkEndCommandBuffer`
/// has not.
#[derive(Clone, Copy)]
pub struct CommandTarget<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandTarget<'a> {
    pub(crate) fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }

    pub fn device(&self) -> &'a ash::Device {
        self.device
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd
    }
}

/// Everything a frame can record, dispatched through one `match`.
#[derive(Clone, Copy, Debug)]
pub enum RenderCommand<'a> {
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
    DrawInstanced {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    BeginPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    EndPass,
    SetPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &'a [u8],
    },
}

impl RenderCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Draw { .. } => "Draw",
            Self::DrawIndexed { .. } => "DrawIndexed",
            Self::DrawInstanced { .. } => "DrawInstanced",
            Self::BeginPass { .. } => "BeginPass",
            Self::EndPass => "EndPass",
            Self::SetPipeline { .. } => "SetPipeline",
            Self::BindDescriptorSet { .. } => "BindDescriptorSet",
            Self::PushConstants { .. } => "PushConstants",
        }
    }
}

/// Tracks whether a render pass is open so commands land in valid scopes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PassState {
    open: bool,
}

impl PassState {
    /// Accepts or rejects `cmd` and updates the state when accepted.
    pub(crate) fn admit(&mut self, cmd: &RenderCommand<'_>) -> Result<(), &'static str> {
        match cmd {
            RenderCommand::BeginPass { .. } if self.open => Err("a render pass is already open"),
            RenderCommand::BeginPass { .. } => {
                self.open = true;
                Ok(())
            }
            RenderCommand::EndPass if !self.open => Err("no render pass is open"),
            RenderCommand::EndPass => {
                self.open = false;
                Ok(())
            }
            RenderCommand::Draw { .. }
            | RenderCommand::DrawIndexed { .. }
            | RenderCommand::DrawInstanced { .. }
                if !self.open =>
            {
                Err("draws must be recorded inside a render pass")
            }
            RenderCommand::PushConstants { data, offset, .. }
                if data.is_empty() || data.len() % 4 != 0 || offset % 4 != 0 =>
            {
                Err("push constant range must be non-empty and 4-byte aligned")
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}

/// Per-frame recording handle given to [`FrameContent`].
pub struct FrameRecorder<'a> {
    target: CommandTarget<'a>,
    image_index: u32,
    slot: usize,
    extent: vk::Extent2D,
    pass: PassState,
    recorded: u32,
}

impl<'a> FrameRecorder<'a> {
    pub(crate) fn new(
        target: CommandTarget<'a>,
        image_index: u32,
        slot: usize,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            target,
            image_index,
            slot,
            extent,
            pass: PassState::default(),
            recorded: 0,
        }
    }

    pub fn target(&self) -> &CommandTarget<'a> {
        &self.target
    }

    /// Swapchain image this frame renders into.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Frame-in-flight slot, in `0..MAX_FRAMES_IN_FLIGHT`.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn in_render_pass(&self) -> bool {
        self.pass.is_open()
    }

    /// Number of commands recorded so far this frame.
    pub fn recorded(&self) -> u32 {
        self.recorded
    }

    /// Records `cmd`. Commands that would be invalid in the current scope are
    /// logged and dropped; returns whether it was recorded.
    pub fn execute(&mut self, cmd: RenderCommand<'_>) -> bool {
        if let Err(why) = self.pass.admit(&cmd) {
            warn!(command = cmd.name(), slot = self.slot, "render command dropped: {why}");
            return false;
        }

        let d = self.target.device;
        let cb = self.target.cmd;
        unsafe {
            match cmd {
                RenderCommand::Draw {
                    vertex_count,
                    first_vertex,
                } => d.cmd_draw(cb, vertex_count, 1, first_vertex, 0),
                RenderCommand::DrawIndexed {
                    index_count,
                    first_index,
                    vertex_offset,
                } => d.cmd_draw_indexed(cb, index_count, 1, first_index, vertex_offset, 0),
                RenderCommand::DrawInstanced {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => d.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance),
                RenderCommand::BeginPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_color,
                } => {
                    let clear = [vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    }];
                    let rp_begin = vk::RenderPassBeginInfo {
                        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                        render_pass,
                        framebuffer,
                        render_area: vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent,
                        },
                        clear_value_count: clear.len() as u32,
                        p_clear_values: clear.as_ptr(),
                        ..Default::default()
                    };
                    d.cmd_begin_render_pass(cb, &rp_begin, vk::SubpassContents::INLINE);
                }
                RenderCommand::EndPass => d.cmd_end_render_pass(cb),
                RenderCommand::SetPipeline {
                    bind_point,
                    pipeline,
                } => d.cmd_bind_pipeline(cb, bind_point, pipeline),
                RenderCommand::BindDescriptorSet {
                    bind_point,
                    layout,
                    set_index,
                    set,
                } => d.cmd_bind_descriptor_sets(cb, bind_point, layout, set_index, &[set], &[]),
                RenderCommand::PushConstants {
                    layout,
                    stages,
                    offset,
                    data,
                } => d.cmd_push_constants(cb, layout, stages, offset, data),
            }
        }
        self.recorded += 1;
        true
    }
}

/// What a frame draws. Both hooks default to recording nothing, which yields
/// a frame that only clears.
pub trait FrameContent {
    /// Runs before the render pass begins; copies and other transfer work go
    /// here.
    fn record_transfers(&mut self, _frame: &mut FrameRecorder<'_>) {}

    /// Runs inside the frame's render pass.
    fn record_draws(&mut self, _frame: &mut FrameRecorder<'_>) {}
}

/// Clear-only frame.
pub struct NoContent;

impl FrameContent for NoContent {}
