// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic renderer boundary shared by the sandbox and the Vulkan
//! backend.
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero extent; nothing can be presented then.
    pub fn is_zero_area(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What happened to a single `draw_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Work was submitted and presentation was requested.
    Presented,
    /// Nothing was submitted this frame.
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotInitialized,
    /// Surface has zero area (minimized).
    Paused,
    /// The swapchain was stale at acquire time and has been rebuilt.
    SwapchainRebuilt,
    /// The swapchain could not be rebuilt; it will be retried next frame.
    SwapchainUnavailable,
}

pub trait Renderer {
    /// Brings the renderer up against a window. Must be called exactly once
    /// before any frame is drawn.
    fn initialize(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<()>;

    fn shutdown(&mut self);
    fn draw_frame(&mut self) -> Result<FrameStatus>;

    /// Safe to call from a window-system resize callback at any time,
    /// including with zero dimensions.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn is_initialized(&self) -> bool;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

/// Global per-frame constants, laid out for a std140 uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
    pub time: f32,
    pub delta_time: f32,
    pub frame_index: u32,
    pub _padding: u32,
}

impl Default for FrameConstants {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            camera_position: Vec4::W,
            time: 0.0,
            delta_time: 0.0,
            frame_index: 0,
            _padding: 0,
        }
    }
}

impl FrameConstants {
    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_detection() {
        assert!(RenderSize::new(0, 600).is_zero_area());
        assert!(RenderSize::new(800, 0).is_zero_area());
        assert!(!RenderSize::new(1, 1).is_zero_area());
    }

    #[test]
    fn frame_constants_are_std140_sized() {
        // three mat4 + vec4 + four scalars
        assert_eq!(std::mem::size_of::<FrameConstants>(), 3 * 64 + 16 + 16);
        assert_eq!(std::mem::size_of::<FrameConstants>() % 16, 0);
    }

    #[test]
    fn view_projection_is_projection_times_view() {
        let view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0);
        let fc = FrameConstants::new(view, proj, Vec4::new(0.0, 0.0, 5.0, 1.0));
        assert_eq!(fc.view_projection, proj * view);
        assert_eq!(fc.frame_index, 0);
    }
}
