//! Sparse octree over world obstacles for long-range pathfinding.
//!
//! - [`index`]: arena, build pipeline, point lookup and lazy neighbor resolution
//! - [`persistence`]: compressed, versioned save/load and streaming open
//! - [`astar`]: weighted A* over free leaves with an adaptive open-set cap

mod astar;
mod index;
mod node;
mod persistence;


pub use astar::{smoothed_next_point, OctreePath, OctreePathfinder, PathStats, MIN_OPEN_CAP};
pub use index::{OctreeIndex, OctreeStats};
pub use node::{ChildRef, NodeId, OctreeNode};
pub use persistence::{LoadOutcome, TreeLayout, OCTREE_FORMAT_VERSION};
