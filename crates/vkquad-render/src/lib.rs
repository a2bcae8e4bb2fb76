//! Quad rendering for vkquad.
//!
//! This crate provides:
//! - The render pass and graphics pipeline for the quad
//! - Device-local vertex and index buffers
//! - Per-frame command recording

pub mod quad;

pub use quad::{clear_value, scissor_for, viewport_for, QuadRenderer};
