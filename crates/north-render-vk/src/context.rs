// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use north_render::{FrameStatus, RenderSize, Renderer, SkipReason};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info, warn};

use crate::command::{FrameContent, NoContent};
use crate::device::DeviceContext;
use crate::error::{FrameError, InitError, SwapchainError};
use crate::frame::{FrameOutcome, FrameStats, FrameSynchronizer};
use crate::swapchain::{PresentSettings, Swapchain, SwapchainPhase};
use crate::RendererConfig;

/// Live GPU state. Field order is creation order; `Drop` tears down in
/// reverse and the device context goes last.
struct Active {
    device: DeviceContext,
    swapchain: Swapchain,
    frames: FrameSynchronizer,
    needs_rebuild: bool,
}

impl Drop for Active {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("device_wait_idle during shutdown: {e}");
        }
        self.frames.destroy();
        self.swapchain.destroy();
        // `device` drops after this body: allocator, device, surface, instance.
    }
}

/// Vulkan implementation of [`Renderer`].
pub struct RenderContext {
    config: RendererConfig,
    size: RenderSize,
    stats: FrameStats,
    active: Option<Active>,
}

impl RenderContext {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            size: RenderSize::default(),
            stats: FrameStats::default(),
            active: None,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The device, for creating buffers. `None` before `initialize`.
    pub fn device(&self) -> Option<&DeviceContext> {
        self.active.as_ref().map(|a| &a.device)
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn swapchain_phase(&self) -> SwapchainPhase {
        self.active
            .as_ref()
            .map_or(SwapchainPhase::Uninitialized, |a| a.swapchain.phase())
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.active.as_ref().map(|a| a.swapchain.extent())
    }

    pub fn image_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.swapchain.image_count())
    }

    /// Frame-in-flight fences the GPU has not signaled yet. Never exceeds
    /// [`MAX_FRAMES_IN_FLIGHT`](crate::MAX_FRAMES_IN_FLIGHT).
    pub fn pending_fences(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.frames.pending_fences())
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.frames.current_slot())
    }

    fn present_settings(&self) -> PresentSettings {
        PresentSettings {
            vsync: self.config.vsync,
            mode: self.config.vsync_mode,
        }
    }

    /// Marks the chain stale so the next frame or resize rebuilds it even
    /// at an unchanged size.
    pub fn request_rebuild(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.needs_rebuild = true;
        }
    }

    /// Initializes on a device the caller already brought up. The device
    /// must carry a presentation surface.
    pub fn initialize_with_device(
        &mut self,
        device: DeviceContext,
        size: RenderSize,
    ) -> Result<(), InitError> {
        if self.active.is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        self.size = size;
        let active = self.attach(device)?;
        info!(
            gpu = active.device.device_name(),
            width = size.width,
            height = size.height,
            "renderer initialized"
        );
        self.active = Some(active);
        Ok(())
    }

    // STRICT ORDER: device → swapchain → frame slots.
    fn attach(&self, device: DeviceContext) -> Result<Active, InitError> {
        let mut swapchain = Swapchain::new(&device)?;
        // A minimized window at startup leaves the chain Uninitialized; the
        // first non-zero resize builds it.
        if let Err(e) = swapchain.rebuild(&device, self.size, self.present_settings(), false) {
            swapchain.destroy();
            return Err(e.into());
        }
        let frames = match FrameSynchronizer::new(&device, self.config.fence_timeout_ms) {
            Ok(f) => f,
            Err(e) => {
                swapchain.destroy();
                return Err(e);
            }
        };
        Ok(Active {
            device,
            swapchain,
            frames,
            needs_rebuild: false,
        })
    }

    /// Draws one frame with `content`.
    ///
    /// A stale swapchain is rebuilt and reported as
    /// [`FrameStatus::Skipped`], never as an error.
    pub fn draw_frame_with<C: FrameContent + ?Sized>(
        &mut self,
        content: &mut C,
    ) -> Result<FrameStatus, FrameError> {
        let settings = self.present_settings();
        let size = self.size;
        let clear = self.config.clear_color;
        let Some(active) = self.active.as_mut() else {
            return Ok(FrameStatus::Skipped(SkipReason::NotInitialized));
        };
        if size.is_zero_area() {
            self.stats.skipped += 1;
            return Ok(FrameStatus::Skipped(SkipReason::Paused));
        }

        if active.needs_rebuild || active.swapchain.phase() != SwapchainPhase::Ready {
            match rebuild(active, size, settings, true) {
                Ok(true) => self.stats.rebuilds += 1,
                Ok(false) => {}
                Err(e) if e.is_surface_lost() => return Err(e.into()),
                Err(e) => {
                    warn!("swapchain unavailable: {e}");
                    self.stats.skipped += 1;
                    return Ok(FrameStatus::Skipped(SkipReason::SwapchainUnavailable));
                }
            }
            if active.swapchain.phase() != SwapchainPhase::Ready {
                self.stats.skipped += 1;
                return Ok(FrameStatus::Skipped(SkipReason::SwapchainUnavailable));
            }
        }

        let outcome = active
            .frames
            .draw(&active.device, &active.swapchain, clear, content);
        match outcome {
            Ok(FrameOutcome::Presented { stale }) => {
                active.needs_rebuild |= stale;
                self.stats.presented += 1;
                Ok(FrameStatus::Presented)
            }
            Ok(FrameOutcome::OutOfDate) => {
                self.stats.skipped += 1;
                match rebuild(active, size, settings, true) {
                    Ok(rebuilt) => {
                        if rebuilt {
                            self.stats.rebuilds += 1;
                        }
                        Ok(FrameStatus::Skipped(SkipReason::SwapchainRebuilt))
                    }
                    Err(e) if e.is_surface_lost() => Err(e.into()),
                    Err(e) => {
                        warn!("swapchain rebuild after out-of-date acquire failed: {e}");
                        active.needs_rebuild = true;
                        Ok(FrameStatus::Skipped(SkipReason::SwapchainUnavailable))
                    }
                }
            }
            Err(e) => {
                if e.abandons_image() {
                    active.needs_rebuild = true;
                }
                error!(fatal = e.is_fatal(), "frame failed: {e}");
                Err(e)
            }
        }
    }
}

/// Idles the device, then lets the swapchain decide whether to rebuild. A
/// pending rebuild request stays set until a new chain actually exists.
fn rebuild(
    active: &mut Active,
    size: RenderSize,
    settings: PresentSettings,
    stale: bool,
) -> Result<bool, SwapchainError> {
    active
        .device
        .wait_idle()
        .map_err(SwapchainError::WaitIdle)?;
    let stale = stale || active.needs_rebuild;
    let rebuilt = active
        .swapchain
        .rebuild(&active.device, size, settings, stale)?;
    if rebuilt {
        active.needs_rebuild = false;
    }
    Ok(rebuilt)
}

impl Renderer for RenderContext {
    fn initialize(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<()> {
        if self.active.is_some() {
            return Err(InitError::AlreadyInitialized.into());
        }
        let device = DeviceContext::new(window, display, &self.config.device)?;
        self.initialize_with_device(device, size)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            drop(active);
            info!(
                presented = self.stats.presented,
                skipped = self.stats.skipped,
                rebuilds = self.stats.rebuilds,
                "renderer shut down"
            );
        }
    }

    fn draw_frame(&mut self) -> Result<FrameStatus> {
        Ok(self.draw_frame_with(&mut NoContent)?)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        let settings = self.present_settings();
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if size.is_zero_area() {
            // Paused; keep the last chain until a real size arrives.
            return Ok(());
        }
        if rebuild(active, size, settings, false)? {
            self.stats.rebuilds += 1;
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_context_skips_frames() {
        let mut rc = RenderContext::new(RendererConfig::default());
        assert!(!rc.is_initialized());
        assert_eq!(
            rc.draw_frame().unwrap(),
            FrameStatus::Skipped(SkipReason::NotInitialized)
        );
        assert_eq!(rc.pending_fences(), 0);
        assert_eq!(rc.swapchain_phase(), SwapchainPhase::Uninitialized);
    }

    #[test]
    fn resize_before_initialize_only_records_the_size() {
        let mut rc = RenderContext::new(RendererConfig::default());
        rc.resize(RenderSize::new(1280, 720)).unwrap();
        rc.resize(RenderSize::new(0, 0)).unwrap();
        rc.resize(RenderSize::new(1280, 720)).unwrap();
        assert_eq!(rc.size(), RenderSize::new(1280, 720));
        assert_eq!(rc.image_count(), 0);
        assert!(rc.swapchain_extent().is_none());
    }

    #[test]
    fn clear_color_is_stored() {
        let mut rc = RenderContext::new(RendererConfig::default());
        rc.set_clear_color([1.0, 0.0, 0.5, 1.0]);
        assert_eq!(rc.config().clear_color, [1.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn shutdown_without_initialize_is_harmless() {
        let mut rc = RenderContext::new(RendererConfig::default());
        rc.shutdown();
        rc.shutdown();
        assert!(!rc.is_initialized());
    }
}
