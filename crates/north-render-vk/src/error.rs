// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Bring-up failures. None of these are recoverable: the renderer must not
/// continue half-initialized.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("renderer is already initialized")]
    AlreadyInitialized,

    #[error("failed to load the Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("no physical device meets the requirements: {0}")]
    NoSuitableDevice(String),

    #[error("memory allocator creation failed: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("swapchain creation failed: {0}")]
    Swapchain(#[from] SwapchainError),

    /// Any other Vulkan call during bring-up; `stage` names the step.
    #[error("{stage} failed: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },
}

impl InitError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { stage, result }
    }
}

#[derive(Debug, Error)]
pub enum SwapchainError {
    #[error("device has no presentation surface")]
    NoSurface,

    #[error("surface query failed: {0}")]
    SurfaceQuery(vk::Result),

    #[error("surface reports no formats")]
    NoSurfaceFormats,

    #[error("vkCreateSwapchainKHR failed: {0}")]
    Create(vk::Result),

    #[error("vkGetSwapchainImagesKHR failed: {0}")]
    Images(vk::Result),

    #[error("image view creation failed: {0}")]
    ImageView(vk::Result),

    #[error("render pass creation failed: {0}")]
    RenderPass(vk::Result),

    #[error("framebuffer creation failed: {0}")]
    Framebuffer(vk::Result),

    #[error("device wait before rebuild failed: {0}")]
    WaitIdle(vk::Result),
}

impl SwapchainError {
    /// `VK_ERROR_SURFACE_LOST_KHR` can only be fixed by recreating the surface,
    /// which this crate never does on its own.
    pub fn is_surface_lost(&self) -> bool {
        matches!(
            self,
            Self::SurfaceQuery(vk::Result::ERROR_SURFACE_LOST_KHR)
                | Self::Create(vk::Result::ERROR_SURFACE_LOST_KHR)
        )
    }
}

/// Steady-state frame failures. Stale swapchains are not errors and never
/// show up here.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame slot {slot} fence not signaled within {timeout_ms} ms")]
    FenceTimeout { slot: usize, timeout_ms: u64 },

    #[error("fence wait failed: {0}")]
    FenceWait(vk::Result),

    #[error("vkAcquireNextImageKHR failed: {0}")]
    Acquire(vk::Result),

    #[error("command recording failed: {0}")]
    Record(vk::Result),

    #[error("vkQueueSubmit failed: {0}")]
    Submit(vk::Result),

    #[error("vkQueuePresentKHR failed: {0}")]
    Present(vk::Result),

    #[error("swapchain rebuild failed: {0}")]
    Rebuild(#[from] SwapchainError),
}

impl FrameError {
    /// Conditions after which drawing more frames is pointless.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FenceTimeout { .. } => true,
            Self::FenceWait(r)
            | Self::Acquire(r)
            | Self::Record(r)
            | Self::Submit(r)
            | Self::Present(r) => matches!(
                *r,
                vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR
            ),
            Self::Rebuild(e) => e.is_surface_lost(),
        }
    }

    /// Failures that happen after an image was acquired. That image never
    /// reaches presentation, so the chain has to be rebuilt to get it back.
    pub fn abandons_image(&self) -> bool {
        matches!(self, Self::Record(_) | Self::Submit(_) | Self::Present(_))
    }
}

/// Buffer misuse and allocation failures. Buffer operations log these and
/// leave the buffer untouched.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer is not valid (never created or already destroyed)")]
    Invalid,

    #[error("buffer size must be greater than zero")]
    ZeroSize,

    #[error("device-only buffers are not host accessible; stage and copy instead")]
    DeviceOnly,

    #[error("range {offset}+{len} exceeds buffer size {size}")]
    OutOfBounds {
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        size: vk::DeviceSize,
    },

    #[error("copy region out of bounds: src {src_offset}+{size} of {src_size}, dst {dst_offset}+{size} of {dst_size}")]
    CopyOutOfBounds {
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        src_size: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        dst_size: vk::DeviceSize,
    },

    #[error("allocator has been torn down")]
    AllocatorGone,

    #[error("vkCreateBuffer failed: {0}")]
    CreateBuffer(vk::Result),

    #[error("memory allocation failed: {0}")]
    Allocate(#[from] gpu_allocator::AllocationError),

    #[error("vkBindBufferMemory failed: {0}")]
    BindMemory(vk::Result),

    #[error("allocation is not host mapped")]
    NotMapped,

    #[error("flush/invalidate of mapped range failed: {0}")]
    MappedRange(vk::Result),
}
