//! Scene capability and the driver that walks a scene through its lifecycle:
//! `Unloaded -> Loading -> Loaded -> Running -> Ended`.
//!
//! Scenes never transition themselves; every transition goes through
//! [`SceneDriver`], which rejects operations issued in the wrong state.

use std::fmt;

use asset::{AssetError, LoadStatus, Loader, Resources};
use corelib::{CameraError, Input};
use renderer::{GraphicsContext, RenderError};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneState {
    Unloaded,
    Loading,
    Loaded,
    Running,
    Ended,
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SceneState::Unloaded => "unloaded",
            SceneState::Loading => "loading",
            SceneState::Loaded => "loaded",
            SceneState::Running => "running",
            SceneState::Ended => "ended",
        })
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("cannot {op} a scene that is {state}")]
    InvalidTransition { state: SceneState, op: &'static str },
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Camera(#[from] CameraError),
}

pub type SceneResult<T> = Result<T, SceneError>;

/// What a scene sees while it runs.
pub struct SceneContext<'a> {
    pub gl: &'a mut dyn GraphicsContext,
    pub resources: &'a Resources,
    pub input: &'a Input,
}

/// A demo scene. Held by the driver as `Box<dyn Scene>`.
pub trait Scene {
    fn name(&self) -> &str;

    /// Enqueue the scene's resources on `loader`.
    fn load(&mut self, loader: &mut Loader) -> SceneResult<()>;

    /// Build GPU state from loaded resources. Runs once, on entering Running.
    fn start(&mut self, ctx: &mut SceneContext<'_>) -> SceneResult<()>;

    /// Render one frame. Must not allocate GPU resources.
    fn draw(&mut self, ctx: &mut SceneContext<'_>, dt: f32) -> SceneResult<()>;

    /// Release everything `start` created. Also called after a failed
    /// `start`, so it must cope with partially built state.
    fn end(&mut self, gl: &mut dyn GraphicsContext) -> SceneResult<()>;

    fn resize(&mut self, _width: u32, _height: u32) {}
}

pub struct SceneDriver {
    scene: Box<dyn Scene>,
    loader: Loader,
    state: SceneState,
}

impl SceneDriver {
    pub fn new(scene: Box<dyn Scene>, loader: Loader) -> Self {
        Self {
            scene,
            loader,
            state: SceneState::Unloaded,
        }
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn scene_name(&self) -> &str {
        self.scene.name()
    }

    pub fn resources(&self) -> &Resources {
        self.loader.resources()
    }

    /// `Unloaded -> Loading`. Let the scene enqueue its manifest.
    pub fn load(&mut self) -> SceneResult<()> {
        self.require(SceneState::Unloaded, "load")?;
        log::info!("Scene '{}': loading", self.scene.name());
        if let Err(err) = self.scene.load(&mut self.loader) {
            self.loader.cancel();
            self.state = SceneState::Ended;
            return Err(err);
        }
        self.state = SceneState::Loading;
        Ok(())
    }

    /// Advance loading without blocking. Moves to `Loaded` once every
    /// resource is in.
    pub fn poll_load(&mut self) -> SceneResult<SceneState> {
        self.require(SceneState::Loading, "poll")?;
        match self.loader.poll() {
            Ok(LoadStatus::Pending) => {}
            Ok(LoadStatus::Ready) => self.loaded(),
            Err(err) => return Err(self.abort_load(err)),
        }
        Ok(self.state)
    }

    /// Block until loading completes.
    pub fn finish_load(&mut self) -> SceneResult<()> {
        self.require(SceneState::Loading, "finish loading")?;
        match self.loader.finish() {
            Ok(()) => {
                self.loaded();
                Ok(())
            }
            Err(err) => Err(self.abort_load(err)),
        }
    }

    /// `Loaded -> Running`. A failed start ends the scene.
    pub fn start(&mut self, gl: &mut dyn GraphicsContext, input: &Input) -> SceneResult<()> {
        self.require(SceneState::Loaded, "start")?;
        let result = {
            let mut ctx = SceneContext {
                gl: &mut *gl,
                resources: self.loader.resources(),
                input,
            };
            self.scene.start(&mut ctx)
        };
        if let Err(err) = result {
            log::error!("Scene '{}' failed to start: {}", self.scene.name(), err);
            self.end_after_failure(gl);
            return Err(err);
        }
        log::info!("Scene '{}': running", self.scene.name());
        self.state = SceneState::Running;
        Ok(())
    }

    /// Draw one frame. A failing draw ends the scene.
    pub fn draw(
        &mut self,
        gl: &mut dyn GraphicsContext,
        input: &Input,
        dt: f32,
    ) -> SceneResult<()> {
        self.require(SceneState::Running, "draw")?;
        let result = {
            let mut ctx = SceneContext {
                gl: &mut *gl,
                resources: self.loader.resources(),
                input,
            };
            self.scene.draw(&mut ctx, dt)
        };
        if let Err(err) = result {
            log::error!("Scene '{}' failed to draw: {}", self.scene.name(), err);
            self.end_after_failure(gl);
            return Err(err);
        }
        Ok(())
    }

    /// `Running -> Ended`.
    pub fn end(&mut self, gl: &mut dyn GraphicsContext) -> SceneResult<()> {
        self.require(SceneState::Running, "end")?;
        self.state = SceneState::Ended;
        log::info!("Scene '{}': ended", self.scene.name());
        self.scene.end(gl)
    }

    /// Forwarded to the scene while it runs; ignored otherwise.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.state == SceneState::Running {
            self.scene.resize(width, height);
        }
    }

    /// Leave whatever state the scene is in: cancel a pending load or end a
    /// running scene.
    pub fn teardown(&mut self, gl: &mut dyn GraphicsContext) -> SceneResult<()> {
        match self.state {
            SceneState::Loading => {
                log::info!("Scene '{}': load cancelled", self.scene.name());
                self.loader.cancel();
                self.state = SceneState::Ended;
                Ok(())
            }
            SceneState::Running => self.end(gl),
            SceneState::Unloaded | SceneState::Loaded => {
                self.state = SceneState::Ended;
                Ok(())
            }
            SceneState::Ended => Ok(()),
        }
    }

    fn require(&self, state: SceneState, op: &'static str) -> SceneResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(SceneError::InvalidTransition {
                state: self.state,
                op,
            })
        }
    }

    fn loaded(&mut self) {
        log::info!(
            "Scene '{}': loaded {} resources",
            self.scene.name(),
            self.loader.resources().len()
        );
        self.state = SceneState::Loaded;
    }

    fn abort_load(&mut self, err: AssetError) -> SceneError {
        log::error!("Scene '{}' failed to load: {}", self.scene.name(), err);
        self.loader.cancel();
        self.state = SceneState::Ended;
        err.into()
    }

    fn end_after_failure(&mut self, gl: &mut dyn GraphicsContext) {
        self.state = SceneState::Ended;
        if let Err(err) = self.scene.end(gl) {
            log::warn!("Scene '{}': end after failure: {}", self.scene.name(), err);
        }
    }
}

impl fmt::Debug for SceneDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneDriver")
            .field("scene", &self.scene.name())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use asset::{Manifest, MemoryFetcher};
    use renderer::{ClearMask, HeadlessContext};

    use super::*;

    #[derive(Default)]
    struct Log(Rc<RefCell<Vec<&'static str>>>);

    struct Probe {
        log: Rc<RefCell<Vec<&'static str>>>,
        fail_start: bool,
        fail_draw: bool,
    }

    impl Probe {
        fn boxed(log: &Log) -> Box<dyn Scene> {
            Box::new(Probe {
                log: log.0.clone(),
                fail_start: false,
                fail_draw: false,
            })
        }
    }

    impl Scene for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn load(&mut self, loader: &mut Loader) -> SceneResult<()> {
            self.log.borrow_mut().push("load");
            loader.load(&Manifest::new().text("greeting", "hello.txt"));
            Ok(())
        }

        fn start(&mut self, ctx: &mut SceneContext<'_>) -> SceneResult<()> {
            self.log.borrow_mut().push("start");
            ctx.resources.text("greeting")?;
            if self.fail_start {
                return Err(RenderError::NoProgram.into());
            }
            Ok(())
        }

        fn draw(&mut self, ctx: &mut SceneContext<'_>, _dt: f32) -> SceneResult<()> {
            self.log.borrow_mut().push("draw");
            ctx.gl.clear(ClearMask::COLOR);
            if self.fail_draw {
                return Err(RenderError::NoProgram.into());
            }
            Ok(())
        }

        fn end(&mut self, _gl: &mut dyn GraphicsContext) -> SceneResult<()> {
            self.log.borrow_mut().push("end");
            Ok(())
        }
    }

    fn driver(scene: Box<dyn Scene>) -> SceneDriver {
        let fetcher = MemoryFetcher::new().with_file("hello.txt", "hi");
        SceneDriver::new(scene, Loader::new(fetcher))
    }

    fn running(log: &Log, gl: &mut HeadlessContext) -> SceneDriver {
        let mut driver = driver(Probe::boxed(log));
        driver.load().unwrap();
        driver.finish_load().unwrap();
        driver.start(gl, &Input::new()).unwrap();
        driver
    }

    #[test]
    fn full_lifecycle() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let mut driver = running(&log, &mut gl);
        assert_eq!(driver.state(), SceneState::Running);
        driver.draw(&mut gl, &Input::new(), 0.016).unwrap();
        driver.end(&mut gl).unwrap();
        assert_eq!(driver.state(), SceneState::Ended);
        assert_eq!(*log.0.borrow(), ["load", "start", "draw", "end"]);
    }

    #[test]
    fn poll_reaches_loaded() {
        let log = Log::default();
        let mut driver = driver(Probe::boxed(&log));
        driver.load().unwrap();
        let mut state = SceneState::Loading;
        for _ in 0..1000 {
            state = driver.poll_load().unwrap();
            if state == SceneState::Loaded {
                break;
            }
        }
        assert_eq!(state, SceneState::Loaded);
        assert_eq!(driver.resources().text("greeting").unwrap(), "hi");
    }

    #[test]
    fn draw_and_end_before_start_fail() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let mut driver = driver(Probe::boxed(&log));
        assert!(matches!(
            driver.draw(&mut gl, &Input::new(), 0.0),
            Err(SceneError::InvalidTransition { state: SceneState::Unloaded, op: "draw" })
        ));
        assert!(matches!(
            driver.end(&mut gl),
            Err(SceneError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.start(&mut gl, &Input::new()),
            Err(SceneError::InvalidTransition { .. })
        ));
        assert!(log.0.borrow().is_empty());
    }

    #[test]
    fn start_twice_fails() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let mut driver = running(&log, &mut gl);
        assert!(matches!(
            driver.start(&mut gl, &Input::new()),
            Err(SceneError::InvalidTransition { state: SceneState::Running, op: "start" })
        ));
        driver.end(&mut gl).unwrap();
    }

    #[test]
    fn failed_draw_ends_the_scene() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let scene = Box::new(Probe {
            log: log.0.clone(),
            fail_start: false,
            fail_draw: true,
        });
        let mut driver = driver(scene);
        driver.load().unwrap();
        driver.finish_load().unwrap();
        driver.start(&mut gl, &Input::new()).unwrap();
        assert!(driver.draw(&mut gl, &Input::new(), 0.0).is_err());
        assert_eq!(driver.state(), SceneState::Ended);
        assert_eq!(*log.0.borrow(), ["load", "start", "draw", "end"]);
    }

    #[test]
    fn failed_start_releases_partial_state() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let scene = Box::new(Probe {
            log: log.0.clone(),
            fail_start: true,
            fail_draw: false,
        });
        let mut driver = driver(scene);
        driver.load().unwrap();
        driver.finish_load().unwrap();
        assert!(driver.start(&mut gl, &Input::new()).is_err());
        assert_eq!(driver.state(), SceneState::Ended);
        assert_eq!(*log.0.borrow(), ["load", "start", "end"]);
    }

    #[test]
    fn missing_file_aborts_loading() {
        let log = Log::default();
        let mut driver = SceneDriver::new(Probe::boxed(&log), Loader::new(MemoryFetcher::new()));
        driver.load().unwrap();
        assert!(matches!(driver.finish_load(), Err(SceneError::Asset(_))));
        assert_eq!(driver.state(), SceneState::Ended);
    }

    #[test]
    fn teardown_cancels_loading() {
        let log = Log::default();
        let mut gl = HeadlessContext::new(4, 4);
        let mut driver = driver(Probe::boxed(&log));
        driver.load().unwrap();
        driver.teardown(&mut gl).unwrap();
        assert_eq!(driver.state(), SceneState::Ended);
        assert!(!log.0.borrow().contains(&"end"));
    }
}
