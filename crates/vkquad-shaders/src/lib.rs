//! Shaders for the vkquad quad.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V at build time
//! using shaderc.

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static QUAD_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad_vert.spv"));
    pub static QUAD_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad_frag.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
///
/// shaderc always emits whole words, so a trailing partial word never occurs.
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static QUAD_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static QUAD_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Quad vertex shader: passes position through and forwards the vertex color.
pub fn quad_vertex_shader() -> &'static [u32] {
    QUAD_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::QUAD_VERT))
}

/// Quad fragment shader: writes the interpolated color with full alpha.
pub fn quad_fragment_shader() -> &'static [u32] {
    QUAD_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::QUAD_FRAG))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn quad_shaders_load() {
        for shader in [quad_vertex_shader(), quad_fragment_shader()] {
            assert_eq!(shader[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(shader.len() > 5, "Shader too small");
        }
    }

    #[test]
    fn words_are_little_endian() {
        let words = bytes_to_spirv(&[0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]);
        assert_eq!(words, vec![SPIRV_MAGIC, 1]);
    }
}
