// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: device bring-up, swapchain management, frames in flight
//! and allocator-backed GPU buffers.

mod allocator;
pub mod buffer;
pub mod command;
mod context;
pub mod device;
mod error;
pub mod frame;
pub mod swapchain;

pub use allocator::{AllocatorHandle, MemoryAllocator};
pub use buffer::{Buffer, BufferKind, MemoryResidency};
pub use command::{CommandTarget, FrameContent, FrameRecorder, NoContent, RenderCommand};
pub use context::RenderContext;
pub use device::DeviceContext;
pub use error::{BufferError, FrameError, InitError, SwapchainError};
pub use frame::{FrameStats, MAX_FRAMES_IN_FLIGHT};
pub use swapchain::SwapchainPhase;

/// Minimum instance/device API version the backend requires.
pub const MIN_API_VERSION: u32 = ash::vk::API_VERSION_1_1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VkVsyncMode {
    #[default]
    Fifo, // Target monitor refresh rate
    Mailbox, // Smart Vsync, fps uncapped
}

/// Device-level bring-up options.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub app_name: String,
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages into
    /// `tracing`. Ignored with a warning if the layer is not installed.
    pub validation: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "North Engine".to_owned(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Everything `RenderContext` needs beyond the window itself.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub device: DeviceConfig,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    /// Upper bound on the per-frame fence wait. Expiry is reported as a
    /// fatal `FrameError::FenceTimeout`.
    pub fence_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            vsync: true,
            vsync_mode: VkVsyncMode::Fifo,
            fence_timeout_ms: 5_000,
        }
    }
}
