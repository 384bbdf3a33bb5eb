use bevy::prelude::*;
use nav3d_macros::profile;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use super::index::OctreeIndex;
use super::node::{NodeId, OctreeNode};
use crate::navigation::config::OctreeSettings;
use crate::navigation::error::NavResult;
use crate::navigation::handle::Handle;
use crate::navigation::math::{dominant_axis, manhattan};
use crate::navigation::oracle::{QueryFilter, SpatialOracle};
use crate::navigation::smoothing::furthest_visible;

/// Floor for the adaptive open-set cap.
pub const MIN_OPEN_CAP: usize = 256;

/// Rolling record of successful path lengths, sizing the open-set cap.
#[derive(Clone, Debug)]
pub struct PathStats {
    history: VecDeque<usize>,
    capacity: usize,
    default_average: f32,
    pub searches: u64,
    pub successes: u64,
    pub capped: u64,
}

impl PathStats {
    pub fn new(capacity: usize, default_average: f32) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            default_average,
            searches: 0,
            successes: 0,
            capped: 0,
        }
    }

    pub fn record_success(&mut self, length: usize) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(length);
        self.successes += 1;
    }

    pub fn average(&self) -> f32 {
        if self.history.is_empty() {
            return self.default_average;
        }
        self.history.iter().sum::<usize>() as f32 / self.history.len() as f32
    }

    pub fn open_cap(&self, multiplier: f32) -> usize {
        ((multiplier * self.average()).ceil() as usize).max(MIN_OPEN_CAP)
    }
}

#[derive(Clone, Copy, Debug)]
struct SearchScores {
    g: f32,
    came_from: Option<NodeId>,
}

#[derive(Clone, Copy, Debug)]
struct OpenEntry {
    f: f32,
    seq: u64,
    id: NodeId,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.total_cmp(&self.f).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A path through octree leaves.
#[derive(Clone, Debug, PartialEq)]
pub struct OctreePath {
    /// Leaf centers after the start leaf, with buffer points at size changes,
    /// ending at the requested end location.
    pub waypoints: Vec<Vec3>,
    /// Leaves visited, start first.
    pub nodes: Vec<Handle>,
}

/// Weighted A* over octree leaf adjacency.
///
/// The heuristic is Manhattan distance times `heuristic_weight` (> 1, so not
/// admissible). Instead of an iteration cap the search gives up once the
/// open set outgrows `open_set_multiplier` times the average length of recent
/// successful paths.
pub struct OctreePathfinder {
    heuristic_weight: f32,
    open_set_multiplier: f32,
    avoid_cost_multiplier: f32,
    stats: PathStats,
    scores: FxHashMap<NodeId, SearchScores>,
    neighbors: Vec<NodeId>,
}

impl Default for OctreePathfinder {
    fn default() -> Self {
        Self::new(&OctreeSettings::default())
    }
}

impl OctreePathfinder {
    pub fn new(settings: &OctreeSettings) -> Self {
        Self {
            heuristic_weight: settings.heuristic_weight,
            open_set_multiplier: settings.open_set_multiplier,
            avoid_cost_multiplier: settings.avoid_cost_multiplier,
            stats: PathStats::new(settings.stats_history, settings.default_average_path_length),
            scores: FxHashMap::default(),
            neighbors: Vec::new(),
        }
    }

    pub fn stats(&self) -> &PathStats {
        &self.stats
    }

    /// Search from the leaf containing `start` to the one containing `end`.
    ///
    /// `Ok(None)` when either point is outside free space, no route exists,
    /// or the open-set cap was hit.
    #[profile(2)]
    pub fn find_path(&mut self, index: &mut OctreeIndex, start: Vec3, end: Vec3) -> NavResult<Option<OctreePath>> {
        index.begin_search();
        let result = self.search(index, start, end);
        self.scores.clear();
        index.end_search();

        self.stats.searches += 1;
        crate::profile_log!(
            self.stats.searches,
            100,
            "[OCTREE A*] {} searches, {} found, {} capped, open cap {}",
            self.stats.searches,
            self.stats.successes,
            self.stats.capped,
            self.stats.open_cap(self.open_set_multiplier)
        );
        result
    }

    fn search(&mut self, index: &mut OctreeIndex, start: Vec3, end: Vec3) -> NavResult<Option<OctreePath>> {
        let Some(start_id) = index.find_and_load_node(start)? else {
            debug!("[OCTREE A*] Start {:?} is not in free space", start);
            return Ok(None);
        };
        let Some(end_id) = index.find_and_load_node(end)? else {
            debug!("[OCTREE A*] End {:?} is not in free space", end);
            return Ok(None);
        };
        if start_id == end_id {
            return Ok(Some(OctreePath {
                waypoints: vec![end],
                nodes: vec![index.handle(start_id)],
            }));
        }

        let end_center = node_center(index, end_id)?;
        let start_center = node_center(index, start_id)?;
        let cap = self.stats.open_cap(self.open_set_multiplier);

        let mut open = BinaryHeap::new();
        let mut closed: FxHashSet<NodeId> = FxHashSet::default();
        let mut seq = 0u64;
        self.scores.insert(start_id, SearchScores { g: 0.0, came_from: None });
        open.push(OpenEntry {
            f: manhattan(start_center, end_center) * self.heuristic_weight,
            seq,
            id: start_id,
        });

        while let Some(OpenEntry { id: current, .. }) = open.pop() {
            if !closed.insert(current) {
                continue;
            }
            if current == end_id {
                let path = self.reconstruct(index, end_id, end)?;
                self.stats.record_success(path.nodes.len());
                return Ok(Some(path));
            }

            let current_g = self.scores.get(&current).map_or(f32::INFINITY, |s| s.g);
            let current_center = node_center(index, current)?;

            self.neighbors.clear();
            self.neighbors.extend_from_slice(index.get_neighbors(current)?);

            for &neighbor in &self.neighbors {
                if closed.contains(&neighbor) {
                    continue;
                }
                let Some(node) = index.node(neighbor).filter(|n| n.is_navigable()) else {
                    continue;
                };
                let mut step = manhattan(current_center, node.center());
                if node.avoid {
                    step *= self.avoid_cost_multiplier;
                }
                let tentative_g = current_g + step;
                let scores = self.scores.entry(neighbor).or_insert(SearchScores {
                    g: f32::INFINITY,
                    came_from: None,
                });
                if tentative_g >= scores.g {
                    continue;
                }
                scores.g = tentative_g;
                scores.came_from = Some(current);

                seq += 1;
                open.push(OpenEntry {
                    f: tentative_g + manhattan(node.center(), end_center) * self.heuristic_weight,
                    seq,
                    id: neighbor,
                });
            }

            if open.len() > cap {
                self.stats.capped += 1;
                debug!("[OCTREE A*] Open set exceeded {} entries; giving up", cap);
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Walk came-from links back to the start.
    ///
    /// Waypoints skip the start leaf. Where consecutive leaves differ in size
    /// a buffer point on the smaller leaf's face toward the larger one is
    /// inserted first, so the path does not clip the larger leaf's corner.
    fn reconstruct(&self, index: &OctreeIndex, end_id: NodeId, end: Vec3) -> NavResult<OctreePath> {
        let mut chain = vec![end_id];
        let mut current = end_id;
        while let Some(previous) = self.scores.get(&current).and_then(|s| s.came_from) {
            chain.push(previous);
            current = previous;
        }
        chain.reverse();

        let mut waypoints = Vec::with_capacity(chain.len() + 1);
        for pair in chain.windows(2) {
            let from = expect(index, pair[0])?;
            let to = expect(index, pair[1])?;
            if (from.half_size() - to.half_size()).abs() > f32::EPSILON {
                waypoints.push(buffer_point(from, to));
            }
            waypoints.push(to.center());
        }
        waypoints.push(end);

        Ok(OctreePath {
            waypoints,
            nodes: chain.into_iter().map(|id| index.handle(id)).collect(),
        })
    }
}

/// Point on the smaller leaf's face closest to the larger leaf, along the
/// dominant axis separating them.
fn buffer_point(a: &OctreeNode, b: &OctreeNode) -> Vec3 {
    let (small, large) = if a.half_size() < b.half_size() { (a, b) } else { (b, a) };
    let delta = large.center() - small.center();
    let axis = dominant_axis(delta);
    let mut offset = Vec3::ZERO;
    offset[axis] = delta[axis].signum() * small.half_size();
    small.center() + offset
}

fn expect(index: &OctreeIndex, id: NodeId) -> NavResult<&OctreeNode> {
    index
        .node(id)
        .ok_or_else(|| crate::navigation::error::NavError::Corrupt(format!("path node {} vanished", id.0)))
}

fn node_center(index: &OctreeIndex, id: NodeId) -> NavResult<Vec3> {
    expect(index, id).map(OctreeNode::center)
}

/// Next point to steer toward along `path`.
///
/// Returns the waypoint before the first one whose sweep from `from` is
/// obstructed. With fewer than three waypoints the first is returned; when
/// all are visible, the last.
pub fn smoothed_next_point(
    oracle: &dyn SpatialOracle,
    path: &[Vec3],
    from: Vec3,
    radius: f32,
    filter: &QueryFilter,
) -> Option<Vec3> {
    furthest_visible(path, from, oracle, radius, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_point_sits_on_smaller_face() {
        let small = OctreeNode::new(Vec3::new(50.0, 50.0, 50.0), 50.0, None);
        let large = OctreeNode::new(Vec3::new(400.0, 200.0, 200.0), 200.0, None);

        let point = buffer_point(&small, &large);
        assert_eq!(point, Vec3::new(100.0, 50.0, 50.0));
        assert_eq!(buffer_point(&large, &small), point, "order does not matter");
    }
}
