//! Vertex format and the hard-coded quad.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// A vertex with a 2D position and an RGB color.
///
/// Layout matches the vertex shader inputs:
/// location 0 is `vec2 position`, location 1 is `vec3 color`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Position in normalized device coordinates.
    pub position: Vec2,
    /// Linear RGB color.
    pub color: Vec3,
}

impl Vertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
    /// Byte offset of the position attribute.
    pub const POSITION_OFFSET: u32 = std::mem::offset_of!(Self, position) as u32;
    /// Byte offset of the color attribute.
    pub const COLOR_OFFSET: u32 = std::mem::offset_of!(Self, color) as u32;

    /// Create a new vertex.
    #[must_use]
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }
}

/// Corners of the quad, clockwise on screen from the top-left (Vulkan NDC has +y down).
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(Vec2::new(-0.5, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(0.5, -0.5), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(1.0, 1.0, 0.0)),
];

/// Two triangles covering the quad.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Number of indices issued by the quad draw call.
pub const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;

/// Number of instances issued by the quad draw call.
pub const QUAD_INSTANCE_COUNT: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout() {
        // Two packed float attributes, no padding
        assert_eq!(Vertex::STRIDE, 20);
        assert_eq!(Vertex::POSITION_OFFSET, 0);
        assert_eq!(Vertex::COLOR_OFFSET, 8);
    }

    #[test]
    fn quad_indices_reference_every_vertex() {
        for i in 0..QUAD_VERTICES.len() as u32 {
            assert!(QUAD_INDICES.contains(&i), "vertex {i} unused");
        }
        assert!(QUAD_INDICES
            .iter()
            .all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }

    #[test]
    fn draw_constants() {
        assert_eq!(QUAD_INDEX_COUNT, 6);
        assert_eq!(QUAD_INSTANCE_COUNT, 1);
    }

    #[test]
    fn quad_bytes_are_tightly_packed() {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        assert_eq!(bytes.len(), 4 * Vertex::STRIDE as usize);
    }
}
