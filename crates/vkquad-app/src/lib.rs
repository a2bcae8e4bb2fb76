//! Application layer for vkquad.
//!
//! This crate handles the boilerplate around the frame loop:
//! - Logging setup
//! - Window creation and resize tracking
//! - GPU context, swapchain and frame slot setup
//! - Driving the frame presenter from the event loop
//! - Orderly teardown, including after a fatal error
//!
//! # Example
//!
//! ```no_run
//! use vkquad_app::{run_app, AppConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app(AppConfig::new("vkquad").with_size(800, 600))
//! }
//! ```

mod context;
mod runner;

pub use context::AppContext;
pub use runner::{exit_code, init_logging, run_app, AppConfig, FrameStats};

// Re-export commonly used types for convenience
pub use vkquad_gpu::{FrameOutcome, GpuError};
