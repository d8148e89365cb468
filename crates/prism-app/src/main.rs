// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use glam::{Mat4, Quat, Vec3};
use prism_core::init_tracing;
use prism_platform::window_extent;
use prism_render::{RenderSize, Renderer};
use prism_render_vk::{DeferredRenderer, EntityId};
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg, BufferingCfg};
use scene::OrbitCamera;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with a `[render]` table
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Swapchain length, overrides the config file
    #[arg(long, value_enum)]
    buffering: Option<BufferingCfg>,
    /// CPU frames recorded ahead of the GPU (1..=3), overrides the config file
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Draw the geometry pass as lines
    #[arg(long)]
    wireframe: bool,
}

struct Demo {
    spinning: EntityId,
    floor: EntityId,
    camera: OrbitCamera,
}

struct App {
    window: Option<Window>,
    renderer: Option<DeferredRenderer>,
    demo: Option<Demo>,
    render_size: RenderSize,

    cfg: AppCfg,
    exiting: bool,
    frames: u32,
    started: Instant,
    last_fps_instant: Instant,

    paused: bool,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            event_loop.create_window(Window::default_attributes().with_title("prism"))?;
        self.render_size = window_extent(&window);

        let mut renderer = DeferredRenderer::with_options(
            &window,
            &window,
            self.render_size,
            self.cfg.render.to_options(),
        )?;

        let spinning = renderer.add_textured_mesh(
            &scene::cube(),
            &scene::checker([230, 90, 40, 255], [250, 240, 220, 255]),
            Mat4::IDENTITY,
        )?;
        let floor = renderer.add_mesh(
            &scene::cube(),
            Mat4::from_scale_rotation_translation(
                Vec3::new(6.0, 0.1, 6.0),
                Quat::IDENTITY,
                Vec3::new(0.0, -1.0, 0.0),
            ),
        )?;

        self.demo = Some(Demo {
            spinning,
            floor,
            camera: OrbitCamera {
                distance: 4.0,
                height: 2.0,
                angle: 0.0,
            },
        });
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn update_scene(&mut self) {
        let (Some(renderer), Some(demo)) = (&mut self.renderer, &mut self.demo) else {
            return;
        };
        let t = self.started.elapsed().as_secs_f32();
        renderer.set_transform(
            demo.spinning,
            Mat4::from_rotation_y(t) * Mat4::from_rotation_x(t * 0.5),
        );
        demo.camera.angle = t * 0.2;
        let aspect = self.render_size.width as f32 / self.render_size.height.max(1) as f32;
        renderer.set_camera(
            demo.camera.view(),
            scene::projection(aspect),
            demo.camera.eye(),
        );
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("renderer init failed: {e:#}");
                self.exiting = true;
                event_loop.exit();
                return;
            }
            if let Some(demo) = &self.demo {
                info!("scene: entities {:?} and {:?}", demo.spinning, demo.floor);
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        self.paused = self.render_size.is_empty();
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
                self.exiting = true;
                // Renderer first: its surface must go before the window.
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = prism_platform::extent_of(new_size);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        error!("resize: {e:#}");
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                self.update_scene();
                if let Some(r) = &mut self.renderer {
                    match r.render() {
                        Ok(()) => self.frames = self.frames.saturating_add(1),
                        Err(e) => {
                            error!("render error: {e:#}");
                            self.exiting = true;
                            self.renderer = None;
                            event_loop.exit();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(b) = args.buffering {
        cfg.render.buffering = b;
    }
    if let Some(n) = args.frames_in_flight {
        cfg.render.frames_in_flight = n;
    }
    cfg.render.wireframe |= args.wireframe;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        window: None,
        renderer: None,
        demo: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        cfg,
        exiting: false,
        frames: 0,
        started: Instant::now(),
        last_fps_instant: Instant::now(),
        paused: false,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
