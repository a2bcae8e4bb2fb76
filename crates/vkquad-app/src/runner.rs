//! Application runner and event loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vkquad_core::constants::{DEFAULT_CLEAR_COLOR, DEFAULT_HEIGHT, DEFAULT_WIDTH, MAX_FRAMES_IN_FLIGHT};
use vkquad_gpu::{FrameOutcome, FramePresenter, GpuContextBuilder, GpuError, PresenterConfig};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::context::AppContext;

/// Application configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Number of frame slots. At least 1.
    pub frames_in_flight: usize,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Give up on a frame slot's fence after this long. `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Color the frame is cleared to.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "vkquad".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
            fence_timeout: None,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of frames in flight. Zero is raised to one.
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Bound fence waits.
    #[must_use]
    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Presenter settings derived from this config.
    pub fn presenter_config(&self) -> PresenterConfig {
        PresenterConfig {
            frames_in_flight: self.frames_in_flight.max(1),
            fence_timeout: self.fence_timeout,
        }
    }
}

/// Counts of frame outcomes, logged at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
}

impl FrameStats {
    pub fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Presented => self.presented += 1,
            FrameOutcome::PresentedThenRebuilt => {
                self.presented += 1;
                self.rebuilds += 1;
            }
            FrameOutcome::Skipped(_) => {
                self.skipped += 1;
                self.rebuilds += 1;
            }
        }
    }
}

/// Process exit code for a fatal error: the GPU failure class's code, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<GpuError>().map_or(1, GpuError::exit_code)
}

/// Install the `tracing` subscriber, honoring `RUST_LOG` (default `info`).
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Open a window and draw the quad until it is closed.
///
/// A fatal error stops the loop, tears everything down and is returned.
pub fn run_app(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        state: None,
        fatal: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner {
    config: AppConfig,
    state: Option<AppState>,
    fatal: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState {
    ctx: AppContext,
    presenter: FramePresenter,
    stats: FrameStats,
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("initializing application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.ctx.window().request_redraw(),
                    Err(e) => self.fail(event_loop, e),
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.handle_resize(size);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

impl AppRunner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build(window.as_ref())?;

        let ctx = AppContext::new(window, gpu, &self.config)?;

        Ok(AppState {
            ctx,
            presenter: FramePresenter::new(self.config.presenter_config()),
            stats: FrameStats::default(),
        })
    }

    /// Single exit path for fatal errors: log, tear down, remember the error.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Fatal error: {e:#}");
        self.shutdown();
        self.fatal.get_or_insert(e);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl AppState {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        // Nothing to present into while minimized; the pending resize rebuilds on restore
        if self.ctx.is_minimized() {
            return Ok(());
        }

        let _span = tracing::trace_span!("frame", generation = self.ctx.generation()).entered();
        let outcome = self.presenter.render_frame(&mut self.ctx)?;
        self.stats.record(outcome);
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        tracing::debug!("Window resized to {}x{}", size.width, size.height);
        self.ctx.set_drawable_size(size);
        self.presenter.notify_resized();
    }

    fn cleanup(self) {
        info!("Frame statistics:");
        info!("  Presented: {}", self.stats.presented);
        info!("  Skipped: {}", self.stats.skipped);
        info!("  Swapchain rebuilds: {}", self.stats.rebuilds);

        info!("Starting cleanup...");
        self.ctx.cleanup();
    }
}
