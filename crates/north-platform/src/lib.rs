// SPDX-License-Identifier: CEPL-1.0
//! Windowing for the sandbox. The renderer crates only ever see
//! `raw-window-handle` traits; winit stays behind this crate.
pub use winit;

use winit::dpi::PhysicalSize;

/// Physical inner size of a window as `(width, height)`, which may be zero
/// while the window is minimized.
pub fn surface_size(size: PhysicalSize<u32>) -> (u32, u32) {
    (size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_reports_zero_area() {
        assert_eq!(surface_size(PhysicalSize::new(0, 0)), (0, 0));
        assert_eq!(surface_size(PhysicalSize::new(1920, 1080)), (1920, 1080));
    }
}
