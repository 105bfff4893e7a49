// SPDX-License-Identifier: CEPL-1.0
pub use glam;
pub use glam::{vec2, Vec2};

/// Default clip-space size of one world tile (half-extent).
pub const DEFAULT_TILE_SCALE: f32 = 0.05;

/// 2D camera mapping world tile coordinates into clip space.
///
/// A world point `p` lands at `(p - position) * tile_scale * 2`, so one tile
/// spans `tile_scale * 2` clip units and the camera position sits at the
/// origin of the screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera2D {
    pub position: Vec2,
    pub tile_scale: f32,
}

impl Camera2D {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            tile_scale: DEFAULT_TILE_SCALE,
        }
    }

    #[inline]
    pub fn world_to_clip(&self, world: Vec2) -> Vec2 {
        (world - self.position) * self.tile_scale * 2.0
    }

    /// Clip-space edge length of one world tile.
    #[inline]
    pub fn tile_extent(&self) -> f32 {
        self.tile_scale * 2.0
    }

    pub fn follow(&mut self, target: Vec2) {
        self.position = target;
    }
}

impl Default for Camera2D {
    fn default() -> Self {
        Self::new(Vec2::ZERO)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub size: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, size: Vec2) -> Self {
        Self { min, size }
    }

    #[inline]
    pub fn max(&self) -> Vec2 {
        self.min + self.size
    }

    pub fn contains(&self, p: Vec2) -> bool {
        let max = self.max();
        p.x >= self.min.x && p.y >= self.min.y && p.x <= max.x && p.y <= max.y
    }
}
