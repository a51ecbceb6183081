// camview - webcam-style quad viewer on a raw Vulkan backend
//
// The app drives the renderer through the fixed per-frame protocol:
// clear -> texture uploads / quad adds -> render -> present. A synthetic
// animated pattern stands in for the webcam; its channel-masked derivative
// stands in for the colour filter. Both reach the renderer through the same
// bytes-plus-layer interface a real capture thread would use.

mod backend;
mod config;
mod renderer;
mod scene;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use config::Config;
use glam::Vec3;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use renderer::{RendererDesc, VulkanRenderer};
use scene::Object;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// Debug builds compile the GLSL sources at startup; release builds load the
// SPIR-V that build.rs produced
#[cfg(debug_assertions)]
const VERTEX_SHADER_PATH: &str = "shaders/quad.vert";
#[cfg(debug_assertions)]
const FRAGMENT_SHADER_PATH: &str = "shaders/quad.frag";
#[cfg(not(debug_assertions))]
const VERTEX_SHADER_PATH: &str = "shaders/quad.vert.spv";
#[cfg(not(debug_assertions))]
const FRAGMENT_SHADER_PATH: &str = "shaders/quad.frag.spv";

fn main() -> Result<()> {
    let config = Config::load();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    log::info!("Starting camview");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );

    // Closed set of backends selected by configuration; exactly one exists
    if !config.renderer.backend.eq_ignore_ascii_case("vulkan") {
        anyhow::bail!(
            "Unknown renderer backend '{}'; only \"vulkan\" is built in",
            config.renderer.backend
        );
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Synthetic frame source: an animated RGBA gradient plus a red-channel
/// mask of it. Stand-in for the webcam capture thread and HSV filter.
struct PatternSource {
    width: u32,
    height: u32,
    tick: u32,
    frame: Vec<u8>,
    filtered: Vec<u8>,
}

impl PatternSource {
    fn new(width: u32, height: u32) -> Self {
        let len = (width * height * 4) as usize;
        Self {
            width,
            height,
            tick: 0,
            frame: vec![0; len],
            filtered: vec![0; len],
        }
    }

    fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        let t = self.tick;
        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                let r = (x.wrapping_add(t) % 256) as u8;
                let g = (y.wrapping_add(t / 2) % 256) as u8;
                let b = ((x + y) % 256) as u8;
                self.frame[i] = r;
                self.frame[i + 1] = g;
                self.frame[i + 2] = b;
                self.frame[i + 3] = 255;

                // Keep strong reds, zero the rest
                let keep = r > 128;
                self.filtered[i] = if keep { r } else { 0 };
                self.filtered[i + 1] = 0;
                self.filtered[i + 2] = 0;
                self.filtered[i + 3] = 255;
            }
        }
    }
}

/// Main application state.
///
/// The renderer owns every GPU resource; the app owns the window, the scene
/// objects, and the frame source.
struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<VulkanRenderer>,
    live_quad: Object,
    filtered_quad: Object,
    pattern: PatternSource,
    is_fullscreen: bool,
    is_minimized: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let pattern = PatternSource::new(
            config.renderer.texture_width,
            config.renderer.texture_height,
        );

        // Webcam view on the left, filtered view on the right
        let mut live_quad = Object::textured_quad(0);
        live_quad.transform.set_position(Vec3::new(-0.5, 0.0, 0.0));
        live_quad.transform.set_scale(Vec3::new(0.95, 0.95, 1.0));
        live_quad.apply_transform();

        let mut filtered_quad = Object::textured_quad(1);
        filtered_quad.transform.translate(Vec3::new(0.5, 0.0, 0.0));
        filtered_quad.transform.scale(Vec3::new(0.95, 0.95, 1.0));
        filtered_quad.apply_transform();

        let now = Instant::now();
        Self {
            config,
            window: None,
            renderer: None,
            live_quad,
            filtered_quad,
            pattern,
            is_fullscreen,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let size = window.inner_size();

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let desc = RendererDesc {
            vertex_shader_path: VERTEX_SHADER_PATH.into(),
            fragment_shader_path: FRAGMENT_SHADER_PATH.into(),
            max_vertices: self.config.renderer.max_vertices,
            max_elements: self.config.renderer.max_elements,
            texture_width: self.config.renderer.texture_width,
            texture_height: self.config.renderer.texture_height,
        };

        let renderer = VulkanRenderer::new(
            display_handle,
            window_handle,
            size.width,
            size.height,
            &self.config.window.title,
            enable_validation,
            desc,
        )?;
        self.renderer = Some(renderer);
        Ok(())
    }

    /// One frame through the fixed protocol. Skipped frames (minimized or
    /// stale surface) are not errors.
    fn frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(false);
        };

        self.pattern.advance();

        // Slow roll on the filtered view
        self.filtered_quad.transform.rotate(Vec3::new(0.0, 0.0, 0.1));
        self.filtered_quad.apply_transform();

        renderer.clear()?;
        renderer.update_texture(&self.pattern.frame, 0);
        renderer.update_texture(&self.pattern.filtered, 1);
        if !renderer.add(&self.live_quad) {
            log::warn!("Vertex capacity exceeded; dropping live quad");
        }
        if !renderer.add(&self.filtered_quad) {
            log::warn!("Vertex capacity exceeded; dropping filtered quad");
        }
        renderer.render()?;
        renderer.present()?;

        Ok(true)
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_mut() {
                    let _ = renderer.end_loop();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                // The renderer notices stale surfaces by itself through
                // acquire/present; only minimization is tracked here
                self.is_minimized = size.width == 0 || size.height == 0;
            }

            WindowEvent::RedrawRequested => match self.frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                if let Some(renderer) = self.renderer.as_mut() {
                                    let _ = renderer.end_loop();
                                }
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
