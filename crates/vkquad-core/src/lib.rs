//! Core types for vkquad.
//!
//! This crate provides:
//! - The vertex format shared by the pipeline and the geometry upload
//! - The hard-coded quad
//! - Application-wide constants

pub mod geometry;

pub use geometry::{Vertex, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_INSTANCE_COUNT, QUAD_VERTICES};

/// Application-wide constants
pub mod constants {
    /// Default number of frames the CPU may record ahead of the GPU.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Default clear color (transparent black).
    pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
    /// Default window width.
    pub const DEFAULT_WIDTH: u32 = 800;
    /// Default window height.
    pub const DEFAULT_HEIGHT: u32 = 600;
}
