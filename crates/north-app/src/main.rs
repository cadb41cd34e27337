// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use north_core::init_tracing;
use north_render::{FrameStatus, RenderSize, Renderer};
use north_render_vk::RenderContext;
use tracing::{error, info, warn};

use north_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
mod sandbox;

use config::AppCfg;
use sandbox::SandboxContent;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "north.toml")]
    config: PathBuf,
    /// Override window width
    #[arg(long)]
    width: Option<u32>,
    /// Override window height
    #[arg(long)]
    height: Option<u32>,
    /// Exit after presenting this many frames
    #[arg(long)]
    frames: Option<u64>,
}

struct App {
    cfg: AppCfg,
    // Field order matters for drop: content buffers go before the renderer.
    content: Option<SandboxContent>,
    renderer: RenderContext,
    window: Option<Window>,
    render_size: RenderSize,
    fatal: Option<anyhow::Error>,

    exiting: bool,
    paused: bool,
    frames: u32,
    presented_total: u64,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let renderer = RenderContext::new(cfg.renderer_config());
        Self {
            render_size: cfg.window_size(),
            cfg,
            content: None,
            renderer,
            window: None,
            fatal: None,
            exiting: false,
            paused: false,
            frames: 0,
            presented_total: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.exit(event_loop);
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Buffers first, then the device that owns their memory.
        self.content = None;
        self.renderer.shutdown();
        self.window = None;
        event_loop.exit();
    }

    fn init_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.render_size.width.max(1),
                self.render_size.height.max(1),
            ));
        let window = event_loop.create_window(attrs)?;

        let (width, height) = north_platform::surface_size(window.inner_size());
        self.render_size = RenderSize::new(width, height);

        self.renderer
            .initialize(&window, &window, self.render_size)?;
        if let Some(device) = self.renderer.device() {
            self.content = Some(SandboxContent::new(device)?);
        }

        info!(
            vsync = self.cfg.render.vsync,
            mode = ?self.cfg.render.vsync_mode,
            "{}x{} window ready",
            width,
            height
        );
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.paused {
            return;
        }
        let result = match self.content.as_mut() {
            Some(content) => self.renderer.draw_frame_with(content),
            None => return,
        };
        match result {
            Ok(FrameStatus::Presented) => {
                self.frames = self.frames.saturating_add(1);
                self.presented_total += 1;
                let limit = self.cfg.render.max_frames;
                if limit > 0 && self.presented_total >= limit {
                    info!(frames = self.presented_total, "frame limit reached");
                    self.exit(event_loop);
                }
            }
            Ok(FrameStatus::Skipped(reason)) => {
                tracing::debug!(?reason, "frame skipped");
            }
            Err(e) if e.is_fatal() => self.fail(event_loop, e.into()),
            Err(e) => warn!("render error: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init_window(event_loop) {
                self.fail(event_loop, e.context("renderer bring-up failed"));
                return;
            }
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        self.paused = self.render_size.is_zero_area();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exit(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let (width, height) = north_platform::surface_size(new_size);
                self.render_size = RenderSize::new(width, height);
                let now_paused = self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {width}x{height} (paused={})", self.paused);
                }

                // Zero sizes are forwarded too; the renderer treats them as a pause.
                if let Err(e) = self.renderer.resize(self.render_size) {
                    warn!("resize to {width}x{height} failed: {e:#}");
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // Minimized or occluded: sleep until the window system wakes us.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // Vsync paces through present; without it, keep polling.
        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            let stats = self.renderer.stats();
            info!(
                in_flight = self.renderer.pending_fences(),
                rebuilds = stats.rebuilds,
                "fps ~ {}",
                self.frames
            );
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    if let Some(w) = args.width {
        cfg.window.width = w;
    }
    if let Some(h) = args.height {
        cfg.window.height = h;
    }
    if let Some(n) = args.frames {
        cfg.render.max_frames = n;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    if let Some(err) = app.fatal.take() {
        return Err(err);
    }
    let stats = app.renderer.stats();
    info!(
        presented = stats.presented,
        skipped = stats.skipped,
        rebuilds = stats.rebuilds,
        "exiting"
    );
    Ok(())
}
