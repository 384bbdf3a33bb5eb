use bevy::math::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::navigation::math::Bounds;

/// Slot index into the octree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A child slot: which node, and the region it covers.
///
/// Bounds are kept beside the id so a descent can pick the right child
/// without materializing its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    pub id: NodeId,
    pub bounds: Bounds,
}

#[derive(Clone, Debug)]
pub struct OctreeNode {
    pub bounds: Bounds,
    /// Intersects an obstacle. Occupied nodes are never routed through, but
    /// may still have free descendants.
    pub occupied: bool,
    /// Free leaf that is not resting on anything; costs more to traverse.
    pub avoid: bool,
    pub parent: Option<NodeId>,
    pub(crate) children: SmallVec<[Option<ChildRef>; 8]>,
    pub(crate) neighbors: Vec<NodeId>,
    /// World centers of the face neighbors, kept so edges can be re-resolved
    /// after a reload.
    pub(crate) neighbor_positions: Vec<Vec3>,
    pub(crate) neighbors_resolved: bool,
}

impl OctreeNode {
    pub fn new(center: Vec3, half_size: f32, parent: Option<NodeId>) -> Self {
        Self {
            bounds: Bounds::cube(center, half_size),
            occupied: false,
            avoid: false,
            parent,
            children: SmallVec::new(),
            neighbors: Vec::new(),
            neighbor_positions: Vec::new(),
            neighbors_resolved: false,
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.bounds.center
    }

    #[inline]
    pub fn half_size(&self) -> f32 {
        self.bounds.half_extents.x
    }

    pub fn children(&self) -> impl Iterator<Item = &ChildRef> {
        self.children.iter().flatten()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    /// Free leaves are the only nodes a path can pass through.
    #[inline]
    pub fn is_navigable(&self) -> bool {
        !self.occupied && self.is_leaf()
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub fn neighbor_positions(&self) -> &[Vec3] {
        &self.neighbor_positions
    }

    /// Bounds of one of the eight sub-cubes.
    ///
    /// Octant bits: bit 0 = +X, bit 1 = +Y, bit 2 = +Z.
    pub fn octant_bounds(&self, octant: u8) -> Bounds {
        let quarter = self.half_size() * 0.5;
        let sign = |bit: u8| if octant >> bit & 1 == 1 { 1.0 } else { -1.0 };
        let offset = Vec3::new(sign(0), sign(1), sign(2)) * quarter;
        Bounds::cube(self.center() + offset, quarter)
    }

    /// Record a face neighbor once.
    pub(crate) fn add_neighbor(&mut self, id: NodeId, position: Vec3) {
        if !self.neighbors.contains(&id) {
            self.neighbors.push(id);
            if !self.neighbor_positions.contains(&position) {
                self.neighbor_positions.push(position);
            }
        }
    }
}
