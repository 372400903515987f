//! Platform layer: windowing, the event loop and the scene driver.
//!
//! [`run`] opens a winit window with a [`WgpuContext`] and drives one scene
//! until the window closes or the scene fails. [`run_headless`] drives the
//! same scene against a [`HeadlessContext`] for a fixed number of frames.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use asset::{FileFetcher, Loader};
use corelib::Input;
use renderer::{GraphicsContext, HeadlessContext, WgpuContext};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

pub mod input;
pub mod scene;

pub use scene::{Scene, SceneContext, SceneDriver, SceneError, SceneResult, SceneState};

/// Fixed timestep of headless runs.
const HEADLESS_DT: f32 = 1.0 / 60.0;

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub backends: wgpu::Backends,
    /// Show frames per second in the window title.
    pub show_fps: bool,
    /// Directory manifest urls are resolved against.
    pub assets: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            title: "Pocket Tanks".into(),
            width: 1280,
            height: 720,
            backends: wgpu::Backends::all(),
            show_fps: false,
            assets: PathBuf::from("assets"),
        }
    }
}

/// Run `scene` in a window. Returns when the window is closed.
pub fn run(scene: Box<dyn Scene>, options: RunOptions) -> Result<()> {
    let event_loop: EventLoop<()> = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let loader = Loader::new(FileFetcher::new(&options.assets));
    let mut app = App::new(SceneDriver::new(scene, loader), options);
    event_loop
        .run_app(&mut app)
        .map_err(|e| anyhow::anyhow!("Event loop error: {e:?}"))?;

    match app.error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Load, start, draw `frames` frames and end `scene` without a window.
pub fn run_headless(scene: Box<dyn Scene>, options: &RunOptions, frames: u32) -> Result<HeadlessContext> {
    let mut gl = HeadlessContext::new(options.width, options.height);
    let input = Input::new();
    let loader = Loader::new(FileFetcher::new(&options.assets));
    let mut driver = SceneDriver::new(scene, loader);

    driver.load()?;
    driver.finish_load().context("Loading scene resources")?;
    driver.start(&mut gl, &input).context("Starting scene")?;
    for frame in 0..frames {
        driver
            .draw(&mut gl, &input, HEADLESS_DT)
            .with_context(|| format!("Drawing frame {frame}"))?;
    }
    driver.end(&mut gl)?;

    log::info!(
        "Headless run of '{}': {} frame(s), {} draw call(s), {} live handle(s) left",
        driver.scene_name(),
        frames,
        gl.draw_calls().count(),
        gl.live_handles()
    );
    Ok(gl)
}

/// Frames-per-second shown in the title bar, refreshed once a second.
struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
        }
    }

    fn tick(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.since = Instant::now();
        Some(fps)
    }
}

struct App {
    options: RunOptions,
    driver: SceneDriver,
    window: Option<Arc<Window>>,
    gpu: Option<WgpuContext>,
    input: Input,
    last_frame: Instant,
    fps: FpsCounter,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(driver: SceneDriver, options: RunOptions) -> Self {
        Self {
            options,
            driver,
            window: None,
            gpu: None,
            input: Input::new(),
            last_frame: Instant::now(),
            fps: FpsCounter::new(),
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(self.options.title.clone())
            .with_inner_size(PhysicalSize::new(self.options.width, self.options.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("Failed to create window")?,
        );
        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        let gpu = pollster::block_on(WgpuContext::new(window.clone(), self.options.backends))
            .context("Failed to initialize wgpu")?;
        self.gpu = Some(gpu);
        self.window = Some(window);
        self.driver.load()?;
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };

        if self.driver.state() == SceneState::Loading {
            self.driver.poll_load()?;
        }
        if self.driver.state() == SceneState::Loaded {
            self.driver.start(gpu, &self.input)?;
            self.last_frame = Instant::now();
        }
        if self.driver.state() != SceneState::Running {
            return Ok(());
        }

        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.driver.draw(gpu, &self.input, dt)?;
        gpu.present()?;
        self.input.end_frame();

        if let (Some(fps), true) = (self.fps.tick(), self.options.show_fps) {
            if let Some(window) = &self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.options.title, fps));
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(gpu) = self.gpu.as_mut() {
            if let Err(err) = self.driver.teardown(gpu) {
                log::warn!("Scene teardown failed: {err}");
            }
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error = Some(err);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested. Exiting event loop.");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                log::info!("Resized: {}x{}", size.width, size.height);
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size.width, size.height);
                    let (w, h) = gpu.drawing_buffer_size();
                    self.driver.resize(w, h);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                if code == KeyCode::Escape && state.is_pressed() {
                    self.shutdown(event_loop);
                    return;
                }
                input::on_key(&mut self.input, code, state);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                input::on_button(&mut self.input, button, state);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.input.add_wheel_delta(input::wheel_lines(delta));
            }
            WindowEvent::Focused(false) => self.input.clear(),
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.frame() {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            input::on_mouse_motion(&mut self.input, delta);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counter_waits_a_second() {
        let mut fps = FpsCounter::new();
        assert_eq!(fps.tick(), None);
        fps.since -= Duration::from_secs(2);
        let value = fps.tick().unwrap();
        assert!((value - 1.0).abs() < 0.1, "{value}");
        assert_eq!(fps.frames, 0);
    }

    #[test]
    fn default_options() {
        let options = RunOptions::default();
        assert_eq!((options.width, options.height), (1280, 720));
        assert!(!options.show_fps);
    }
}
