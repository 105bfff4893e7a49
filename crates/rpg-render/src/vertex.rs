// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use rpg_math::Vec2;

/// One vertex as laid out in the device vertex buffer.
///
/// The pipeline reads `position` at location 0 and `color` at location 1;
/// `texcoord` rides along in the stride for sources that fill it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Vertex {
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();
    pub const POSITION_OFFSET: usize = std::mem::offset_of!(Vertex, position);
    pub const COLOR_OFFSET: usize = std::mem::offset_of!(Vertex, color);

    pub const fn new(position: [f32; 2], color: [f32; 3]) -> Self {
        Self {
            position,
            color,
            texcoord: [0.0, 0.0],
        }
    }

    pub const fn with_texcoord(mut self, uv: [f32; 2]) -> Self {
        self.texcoord = uv;
        self
    }
}

/// Appends an axis-aligned quad as two triangles: (v1, v2, v3), (v2, v4, v3).
pub fn push_quad(out: &mut Vec<Vertex>, origin: Vec2, size: Vec2, color: [f32; 3]) {
    let v1 = Vertex::new([origin.x, origin.y], color).with_texcoord([0.0, 0.0]);
    let v2 = Vertex::new([origin.x + size.x, origin.y], color).with_texcoord([1.0, 0.0]);
    let v3 = Vertex::new([origin.x, origin.y + size.y], color).with_texcoord([0.0, 1.0]);
    let v4 = Vertex::new([origin.x + size.x, origin.y + size.y], color).with_texcoord([1.0, 1.0]);
    out.extend_from_slice(&[v1, v2, v3, v2, v4, v3]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpg_math::vec2;

    #[test]
    fn layout_matches_pipeline_input() {
        assert_eq!(Vertex::STRIDE, 7 * 4);
        assert_eq!(Vertex::POSITION_OFFSET, 0);
        assert_eq!(Vertex::COLOR_OFFSET, 8);
    }

    #[test]
    fn quad_is_two_triangles_sharing_an_edge() {
        let mut out = Vec::new();
        push_quad(&mut out, vec2(0.0, 0.0), vec2(1.0, 2.0), [1.0, 0.0, 0.0]);
        assert_eq!(out.len(), 6);
        assert_eq!(out[1], out[3]);
        assert_eq!(out[2], out[5]);
        assert_eq!(out[4].position, [1.0, 2.0]);
        assert!(out.iter().all(|v| v.color == [1.0, 0.0, 0.0]));
    }

    #[test]
    fn vertices_cast_to_bytes() {
        let verts = [Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&verts);
        assert_eq!(bytes.len(), 3 * Vertex::STRIDE);
    }
}
