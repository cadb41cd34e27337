// SPDX-License-Identifier: CEPL-1.0
//! Demo frame content: a vertex buffer filled through a staging copy on the
//! first frame, and per-slot uniform buffers of frame constants.
use std::time::Instant;

use ash::vk;
use glam::{Mat4, Vec3};
use north_render::FrameConstants;
use north_render_vk::{
    Buffer, BufferError, BufferKind, DeviceContext, FrameContent, FrameRecorder, MemoryResidency,
    MAX_FRAMES_IN_FLIGHT,
};
use tracing::{info, warn};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 3],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

pub struct SandboxContent {
    staging: Buffer,
    vertices: Buffer,
    uniforms: Vec<Buffer>,
    upload_pending: bool,
    started: Instant,
    last_frame: Instant,
    frame_index: u32,
}

impl SandboxContent {
    pub fn new(device: &DeviceContext) -> Result<Self, BufferError> {
        let alloc = device.allocator();
        let bytes = std::mem::size_of_val(&TRIANGLE) as vk::DeviceSize;

        let mut staging =
            Buffer::new(alloc, bytes, BufferKind::Staging, MemoryResidency::HostToDevice)?;
        staging.upload_pod(&TRIANGLE, 0)?;
        let vertices = Buffer::new(alloc, bytes, BufferKind::Vertex, MemoryResidency::DeviceOnly)?;

        let ubo_size = std::mem::size_of::<FrameConstants>() as vk::DeviceSize;
        let uniforms = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Buffer::new(alloc, ubo_size, BufferKind::Uniform, MemoryResidency::HostToDevice))
            .collect::<Result<Vec<_>, _>>()?;

        let now = Instant::now();
        Ok(Self {
            staging,
            vertices,
            uniforms,
            upload_pending: true,
            started: now,
            last_frame: now,
            frame_index: 0,
        })
    }

    fn frame_constants(&mut self, extent: vk::Extent2D) -> FrameConstants {
        let now = Instant::now();
        let t = now.duration_since(self.started).as_secs_f32();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let eye = Vec3::new(3.0 * t.cos(), 1.5, 3.0 * t.sin());
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);

        let mut fc = FrameConstants::new(view, projection, eye.extend(1.0));
        fc.time = t;
        fc.delta_time = dt;
        fc.frame_index = self.frame_index;
        fc
    }
}

impl FrameContent for SandboxContent {
    fn record_transfers(&mut self, frame: &mut FrameRecorder<'_>) {
        if self.upload_pending {
            let size = self.staging.size();
            match self.vertices.copy_from(frame.target(), &self.staging, size, 0, 0) {
                Ok(()) => {
                    let t = frame.target();
                    let barrier = vk::MemoryBarrier {
                        s_type: vk::StructureType::MEMORY_BARRIER,
                        src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                        dst_access_mask: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
                        ..Default::default()
                    };
                    unsafe {
                        t.device().cmd_pipeline_barrier(
                            t.raw(),
                            vk::PipelineStageFlags::TRANSFER,
                            vk::PipelineStageFlags::VERTEX_INPUT,
                            vk::DependencyFlags::empty(),
                            &[barrier],
                            &[],
                            &[],
                        );
                    }
                    info!(bytes = size, "vertex data staged to device memory");
                }
                Err(e) => warn!("vertex upload skipped: {e}"),
            }
            self.upload_pending = false;
        }

        let fc = self.frame_constants(frame.extent());
        if let Some(ubo) = self.uniforms.get_mut(frame.slot()) {
            if let Err(e) = ubo.upload_pod(&[fc], 0) {
                warn!(slot = frame.slot(), "frame constants not updated: {e}");
            }
        }
        self.frame_index = self.frame_index.wrapping_add(1);
    }
}
