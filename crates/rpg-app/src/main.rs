// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod world;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use rpg_core::{init_tracing, FpsCounter};
use rpg_math::glam::IVec2;
use rpg_platform::KeyboardState;
use rpg_render::{FrameStatus, RenderSize, Renderer, SceneAssembler, VertexSource};
use rpg_render_vk::VkRenderer;
use tracing::{error, info, warn};

use rpg_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use crate::config::{load_cfg, AppCfg};
use crate::world::{Intent, World, MAP};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "rpg.toml")]
    config: PathBuf,
    /// Override validation layers from the config
    #[arg(long)]
    validation: Option<bool>,
    /// Override the compiled shader directory
    #[arg(long)]
    shader_dir: Option<PathBuf>,
}

/// Longest simulated step; a stalled frame must not teleport enemies.
const MAX_TICK: Duration = Duration::from_millis(100);

const STEP_KEYS: [([KeyCode; 2], IVec2); 4] = [
    ([KeyCode::KeyW, KeyCode::ArrowUp], IVec2::NEG_Y),
    ([KeyCode::KeyS, KeyCode::ArrowDown], IVec2::Y),
    ([KeyCode::KeyA, KeyCode::ArrowLeft], IVec2::NEG_X),
    ([KeyCode::KeyD, KeyCode::ArrowRight], IVec2::X),
];

fn intent_from(keys: &KeyboardState) -> Intent {
    let step = STEP_KEYS
        .iter()
        .find(|(codes, _)| keys.any_down(codes))
        .map(|(_, dir)| *dir);
    Intent {
        step,
        attack: keys.just_pressed(KeyCode::Space),
    }
}

struct App {
    cfg: AppCfg,
    // Renderer drops before the window its surface presents to.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    world: World,
    scene: SceneAssembler,
    keys: KeyboardState,
    fps: FpsCounter,
    last_tick: Instant,

    exiting: bool,
    paused: bool,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, what: &str, e: anyhow::Error) {
        error!("{what}: {e:#}");
        self.exit(event_loop);
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer goes before the window it presents to.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let win = &self.cfg.window;
        let window = rpg_platform::create_window(event_loop, &win.title, win.width, win.height)?;

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("window handle: {e}"))?;
        let dh = window
            .display_handle()
            .map_err(|e| anyhow::anyhow!("display handle: {e}"))?;
        let options = self.cfg.render.to_options();
        let renderer = VkRenderer::new(&wh, &dh, self.render_size, &options)?;
        info!(
            "renderer up on {} (degraded={})",
            renderer.adapter_name(),
            renderer.is_degraded()
        );

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).min(MAX_TICK);
        self.last_tick = now;

        let intent = intent_from(&self.keys);
        self.keys.end_tick();
        self.world.update(dt.as_secs_f32(), intent);

        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let world = &self.world;
        let terrain = world.terrain();
        let sources: [&dyn VertexSource; 6] = [
            &terrain,
            &world.player,
            &world.enemies,
            &world.effects,
            &world.items,
            &world.hud,
        ];
        let vertices = self.scene.assemble(&world.camera, &sources);

        match renderer.render(vertices)? {
            FrameStatus::Presented | FrameStatus::PresentedAndRebuilt => self.fps.frame(),
            FrameStatus::Skipped | FrameStatus::Paused => {}
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, "startup failed", e);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.render_size.is_zero();
        self.last_tick = Instant::now();
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

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    info!("Escape → exit");
                    self.exit(event_loop);
                    return;
                }
                self.keys.handle_event(&event);
            }

            WindowEvent::Focused(focused) => {
                if !focused {
                    self.keys.clear();
                }
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = self.render_size.is_zero();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }

                let size = self.render_size;
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(size) {
                        self.fail(event_loop, "resize failed", e);
                        return;
                    }
                }
                if !self.paused {
                    self.last_tick = Instant::now();
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_zero();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                    if !self.paused {
                        self.last_tick = Instant::now();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Err(e) = self.tick() {
                    self.fail(event_loop, "render error", e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if self.paused {
            self.fps.reset(Instant::now());
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(fps) = self.fps.poll(Instant::now()) {
            info!("fps ~ {fps:.0}");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(v) = args.validation {
        cfg.render.validation = v;
    }
    if let Some(dir) = args.shader_dir {
        cfg.render.shader_dir = dir;
    }
    if !cfg.render.shader_dir.is_dir() {
        warn!(
            "shader dir {} not found; frames will only clear",
            cfg.render.shader_dir.display()
        );
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        renderer: None,
        window: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        world: World::from_map(MAP)?,
        scene: SceneAssembler::new(),
        keys: KeyboardState::default(),
        fps: FpsCounter::default(),
        last_tick: Instant::now(),
        exiting: false,
        paused: false,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
