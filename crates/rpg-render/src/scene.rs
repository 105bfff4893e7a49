// SPDX-License-Identifier: CEPL-1.0
use rpg_math::Camera2D;

use crate::Vertex;

/// Draw order of scene producers; earlier layers are painted first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SceneLayer {
    Terrain,
    Actors,
    Effects,
    ItemDrops,
    Ui,
}

impl SceneLayer {
    pub const COUNT: usize = 5;
    pub const ORDER: [SceneLayer; Self::COUNT] = [
        SceneLayer::Terrain,
        SceneLayer::Actors,
        SceneLayer::Effects,
        SceneLayer::ItemDrops,
        SceneLayer::Ui,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A game-world producer of colored triangles.
pub trait VertexSource {
    fn layer(&self) -> SceneLayer;

    /// Full vertex list for the current state, already in clip space.
    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex>;
}

/// Concatenates every producer's vertices into one list per frame.
///
/// Output is rebuilt from scratch each call; layer order is fixed and
/// producers within a layer keep the order they were passed in.
#[derive(Debug, Default)]
pub struct SceneAssembler {
    scratch: Vec<Vertex>,
    counts: [usize; SceneLayer::COUNT],
}

impl SceneAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble(&mut self, camera: &Camera2D, sources: &[&dyn VertexSource]) -> &[Vertex] {
        self.scratch.clear();
        self.counts = [0; SceneLayer::COUNT];

        for layer in SceneLayer::ORDER {
            for source in sources.iter().filter(|s| s.layer() == layer) {
                let verts = source.generate_vertices(camera);
                self.counts[layer.index()] += verts.len();
                self.scratch.extend_from_slice(&verts);
            }
        }
        &self.scratch
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.scratch
    }

    pub fn layer_count(&self, layer: SceneLayer) -> usize {
        self.counts[layer.index()]
    }
}
