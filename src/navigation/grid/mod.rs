//! Uniform grid volumes and the A*/JPS searches that run on them.

mod jps;
mod node;
mod search;
mod volume;


pub use node::{step_cost, GridNode, UNSCORED};
pub use search::{GridPath, GridPathRequest, GridPathfinder, GridSearch, SearchAlgorithm, SearchStatus};
pub use volume::UniformGridVolume;
