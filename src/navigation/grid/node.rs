use bevy::math::IVec3;
use smallvec::SmallVec;

/// Sentinel for "not scored in this search".
pub const UNSCORED: f32 = f32::INFINITY;

/// A single voxel cell of a [`UniformGridVolume`](super::UniformGridVolume).
///
/// Neighbors are indices into the owning volume's node array and are filled
/// the first time the node is expanded. Scores are only meaningful during a
/// search and are reset by the search cleanup pass.
#[derive(Clone, Debug)]
pub struct GridNode {
    pub coord: IVec3,
    pub(crate) neighbors: Option<SmallVec<[u32; 26]>>,
    pub g: f32,
    pub h: f32,
    pub f: f32,
}

impl GridNode {
    pub fn new(coord: IVec3) -> Self {
        Self {
            coord,
            neighbors: None,
            g: UNSCORED,
            h: UNSCORED,
            f: UNSCORED,
        }
    }

    /// Neighbor indices, empty until materialized.
    pub fn neighbors(&self) -> &[u32] {
        self.neighbors.as_deref().unwrap_or(&[])
    }

    #[inline]
    pub fn has_neighbors(&self) -> bool {
        self.neighbors.is_some()
    }

    #[inline]
    pub fn is_unscored(&self) -> bool {
        self.g == UNSCORED && self.h == UNSCORED && self.f == UNSCORED
    }

    #[inline]
    pub(crate) fn reset_scores(&mut self) {
        self.g = UNSCORED;
        self.h = UNSCORED;
        self.f = UNSCORED;
    }
}

/// Step cost between adjacent lattice cells: 14 when exactly two axes change,
/// 10 otherwise.
#[inline]
pub fn step_cost(a: IVec3, b: IVec3) -> f32 {
    let d = a - b;
    let changed = (d.x != 0) as u8 + (d.y != 0) as u8 + (d.z != 0) as u8;
    if changed == 2 {
        14.0
    } else {
        10.0
    }
}
