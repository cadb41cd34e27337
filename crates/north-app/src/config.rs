// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use north_render::RenderSize;
use north_render_vk::{DeviceConfig, RendererConfig, VkVsyncMode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowCfg {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub vsync_mode: VsyncMode,
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default = "default_fence_timeout")]
    pub fence_timeout_ms: u64,
    /// Exit after this many presented frames; 0 runs until closed.
    #[serde(default)]
    pub max_frames: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: default_vsync(),
            vsync_mode: VsyncMode::default(),
            validation: default_validation(),
            fence_timeout_ms: default_fence_timeout(),
            max_frames: 0,
        }
    }
}

fn default_title() -> String {
    "North Sandbox".to_owned()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_clear() -> [f32; 4] {
    [0.1, 0.2, 0.3, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_fence_timeout() -> u64 {
    5_000
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads `path`. A missing file means defaults; a malformed one is
    /// reported and also falls back to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).unwrap_or_else(|e| {
                warn!("{}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(e) => {
                debug!("{} not read ({e}); using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn window_size(&self) -> RenderSize {
        RenderSize::new(self.window.width, self.window.height)
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            device: DeviceConfig {
                app_name: self.window.title.clone(),
                validation: self.render.validation,
            },
            clear_color: self.render.clear_color,
            vsync: self.render.vsync,
            vsync_mode: match self.render.vsync_mode {
                VsyncMode::Fifo => VkVsyncMode::Fifo,
                VsyncMode::Mailbox => VkVsyncMode::Mailbox,
            },
            fence_timeout_ms: self.render.fence_timeout_ms,
        }
    }
}
