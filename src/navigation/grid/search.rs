use bevy::prelude::*;
use fixedbitset::FixedBitSet;
use nav3d_macros::profile;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::jps;
use super::node::step_cost;
use super::volume::UniformGridVolume;
use crate::navigation::config::{GridSettings, MAX_GRID_EXPANSIONS};
use crate::navigation::error::NavResult;
use crate::navigation::handle::Handle;
use crate::navigation::oracle::{ObstacleId, QueryFilter, SpatialOracle};
use crate::navigation::smoothing::smooth_path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SearchAlgorithm {
    #[default]
    AStar,
    JumpPoint,
}

/// A single path query against a grid volume.
#[derive(Clone, Debug)]
pub struct GridPathRequest {
    pub start: Vec3,
    pub goal: Vec3,
    /// Half extent of the blocked-cell probe and radius of smoothing sweeps.
    pub agent_radius: f32,
    pub algorithm: SearchAlgorithm,
    /// Obstacle that represents the goal itself; JPS sweeps hitting it jump straight to the goal.
    pub target: Option<ObstacleId>,
    pub filter: QueryFilter,
}

impl GridPathRequest {
    pub fn new(start: Vec3, goal: Vec3, agent_radius: f32) -> Self {
        Self {
            start,
            goal,
            agent_radius,
            algorithm: SearchAlgorithm::AStar,
            target: None,
            filter: QueryFilter::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: SearchAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_target(mut self, target: ObstacleId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A path found on a grid volume.
#[derive(Clone, Debug, PartialEq)]
pub struct GridPath {
    /// Smoothed world-space waypoints, start first.
    pub waypoints: Vec<Vec3>,
    /// Cell centers of the searched path before smoothing.
    pub raw: Vec<Vec3>,
    /// G-score of each raw cell at the time it was reached.
    pub raw_g: Vec<f32>,
    pub expansions: usize,
    /// Goal cell actually reached (differs from the requested one after retargeting).
    pub goal: IVec3,
}

#[derive(Debug)]
pub enum SearchStatus {
    InProgress,
    Found(GridPath),
    NotFound,
}

/// Min-heap entry ordered by F, then by insertion order.
#[derive(Clone, Copy, Debug)]
pub(super) struct OpenEntry {
    pub f: f32,
    pub seq: u64,
    pub index: u32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resumable A*/JPS search over a [`UniformGridVolume`].
///
/// The search only stores generation-tagged handles, never references into
/// the node array. Each [`step`](Self::step) re-validates them, so unloading
/// or repopulating the volume between steps yields `NavError::StaleHandle`
/// rather than reading freed or recycled storage.
///
/// Scores are written onto the volume's nodes; every node touched is reset
/// when the search finishes. A search dropped before finishing must be
/// [`cancel`](Self::cancel)led to restore clean scores.
pub struct GridSearch {
    pub(super) request: GridPathRequest,
    pub(super) start: Handle,
    pub(super) goal: Handle,
    pub(super) goal_world: Vec3,
    pub(super) open: BinaryHeap<OpenEntry>,
    seq: u64,
    pub(super) closed: FixedBitSet,
    touched: Vec<u32>,
    pub(super) came_from: FxHashMap<u32, u32>,
    expansions: usize,
    max_expansions: usize,
    done: bool,
}

pub(super) fn is_cell_blocked(
    volume: &UniformGridVolume,
    oracle: &dyn SpatialOracle,
    request: &GridPathRequest,
    coord: IVec3,
) -> bool {
    oracle.is_region_blocked(
        volume.coord_to_world(coord),
        Vec3::splat(request.agent_radius),
        &request.filter,
    )
}

impl GridSearch {
    /// Resolve start and goal cells and seed the open set.
    ///
    /// A blocked goal is moved to its first unblocked neighbor, in neighbor
    /// materialization order.
    pub fn new(
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
        request: GridPathRequest,
        max_expansions: usize,
    ) -> NavResult<Self> {
        let start_coord = volume.world_to_coord(request.start);
        let goal_coord = volume.world_to_coord(request.goal);
        let start = volume.handle_at(start_coord)?;
        let mut goal_index = volume.index_of(goal_coord);

        if is_cell_blocked(volume, oracle, &request, goal_coord) {
            let candidates: SmallVec<[u32; 26]> =
                volume.ensure_neighbors(goal_index)?.iter().copied().collect();
            let retarget = candidates.into_iter().find(|&n| {
                volume
                    .get_node(volume_coord(volume, n as usize))
                    .map(|node| !is_cell_blocked(volume, oracle, &request, node.coord))
                    .unwrap_or(false)
            });
            match retarget {
                Some(free) => {
                    debug!("[GRID] Goal {:?} blocked, retargeting to neighbor {}", goal_coord, free);
                    goal_index = free as usize;
                }
                None => debug!("[GRID] Goal {:?} blocked with no free neighbor", goal_coord),
            }
        }

        let goal = volume.handle_for_index(goal_index);
        let goal_world = volume.coord_to_world(volume_coord(volume, goal_index));
        let h = volume.coord_to_world(start_coord).distance(goal_world);

        let node_count = volume.node_count();
        let nodes = volume.nodes_mut()?;
        let seed = &mut nodes[start.index()];
        seed.g = 0.0;
        seed.h = h;
        seed.f = h;

        let mut search = Self {
            request,
            start,
            goal,
            goal_world,
            open: BinaryHeap::new(),
            seq: 0,
            closed: FixedBitSet::with_capacity(node_count),
            touched: Vec::new(),
            came_from: FxHashMap::default(),
            expansions: 0,
            max_expansions,
            done: false,
        };
        search.touched.push(start.index);
        search.push_open(start.index, h);
        Ok(search)
    }

    pub fn expansions(&self) -> usize {
        self.expansions
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub(super) fn push_open(&mut self, index: u32, f: f32) {
        self.open.push(OpenEntry { f, seq: self.seq, index });
        self.seq += 1;
    }

    pub(super) fn touch(&mut self, index: u32) {
        self.touched.push(index);
    }

    /// Pop and expand one node.
    pub fn step(
        &mut self,
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
    ) -> NavResult<SearchStatus> {
        if self.done {
            return Ok(SearchStatus::NotFound);
        }
        if let Err(e) = volume.resolve(self.start) {
            // The storage these scores lived in is gone; nothing to clean.
            self.done = true;
            warn!("[GRID] Search aborted: {}", e);
            return Err(e);
        }

        let Some(entry) = self.open.pop() else {
            self.finish(volume);
            return Ok(SearchStatus::NotFound);
        };
        let current = entry.index as usize;
        if self.closed.contains(current) {
            return Ok(SearchStatus::InProgress);
        }

        self.expansions += 1;
        if self.expansions > self.max_expansions {
            debug!(
                "[GRID] Expansion cap {} reached between {:?} and {:?}",
                self.max_expansions, self.request.start, self.request.goal
            );
            self.finish(volume);
            return Ok(SearchStatus::NotFound);
        }

        if current == self.goal.index() {
            let path = self.reconstruct(volume, oracle);
            self.finish(volume);
            return Ok(SearchStatus::Found(path));
        }

        self.closed.insert(current);
        match self.request.algorithm {
            SearchAlgorithm::AStar => self.expand_astar(volume, oracle, current)?,
            SearchAlgorithm::JumpPoint => jps::expand(self, volume, oracle, current)?,
        }
        Ok(SearchStatus::InProgress)
    }

    /// Step until the search resolves.
    pub fn run(
        mut self,
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
    ) -> NavResult<Option<GridPath>> {
        loop {
            match self.step(volume, oracle)? {
                SearchStatus::InProgress => continue,
                SearchStatus::Found(path) => return Ok(Some(path)),
                SearchStatus::NotFound => return Ok(None),
            }
        }
    }

    /// Abandon the search and reset every node it scored.
    pub fn cancel(mut self, volume: &mut UniformGridVolume) {
        if volume.resolve(self.start).is_ok() {
            self.finish(volume);
        }
    }

    fn expand_astar(
        &mut self,
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
        current: usize,
    ) -> NavResult<()> {
        let neighbors: SmallVec<[u32; 26]> = volume.ensure_neighbors(current)?.iter().copied().collect();
        let (current_coord, current_g) = {
            let node = volume.get_node(volume_coord(volume, current))?;
            (node.coord, node.g)
        };

        for neighbor in neighbors {
            if self.closed.contains(neighbor as usize) {
                continue;
            }
            let coord = volume_coord(volume, neighbor as usize);
            if is_cell_blocked(volume, oracle, &self.request, coord) {
                continue;
            }

            let tentative_g = current_g + step_cost(current_coord, coord);
            let h = volume.coord_to_world(coord).distance(self.goal_world);
            let node = &mut volume.nodes_mut()?[neighbor as usize];
            if tentative_g < node.g {
                node.g = tentative_g;
                node.h = h;
                node.f = tentative_g + h;
                let f = node.f;
                self.came_from.insert(neighbor, current as u32);
                self.touch(neighbor);
                self.push_open(neighbor, f);
            }
        }
        Ok(())
    }

    fn reconstruct(&self, volume: &UniformGridVolume, oracle: &dyn SpatialOracle) -> GridPath {
        let mut chain = vec![self.goal.index];
        let mut current = self.goal.index;
        while let Some(&previous) = self.came_from.get(&current) {
            chain.push(previous);
            current = previous;
        }
        chain.reverse();

        let mut raw = Vec::with_capacity(chain.len());
        let mut raw_g = Vec::with_capacity(chain.len());
        for &index in &chain {
            let coord = volume_coord(volume, index as usize);
            raw.push(volume.coord_to_world(coord));
            raw_g.push(volume.get_node(coord).map(|n| n.g).unwrap_or(f32::INFINITY));
        }

        let waypoints = smooth_path(&raw, oracle, self.request.agent_radius, &self.request.filter);
        GridPath {
            waypoints,
            raw,
            raw_g,
            expansions: self.expansions,
            goal: volume_coord(volume, self.goal.index()),
        }
    }

    fn finish(&mut self, volume: &mut UniformGridVolume) {
        if let Ok(nodes) = volume.nodes_mut() {
            for &index in &self.touched {
                nodes[index as usize].reset_scores();
            }
        }
        self.touched.clear();
        self.open.clear();
        self.done = true;
    }
}

/// Lattice coordinate of a flat index.
#[inline]
pub(super) fn volume_coord(volume: &UniformGridVolume, index: usize) -> IVec3 {
    let d = volume.divisions();
    let i = index as i32;
    IVec3::new(i % d.x, (i / d.x) % d.y, i / (d.x * d.y))
}

/// Synchronous grid pathfinding front end.
#[derive(Clone, Debug)]
pub struct GridPathfinder {
    pub max_expansions: usize,
}

impl Default for GridPathfinder {
    fn default() -> Self {
        Self { max_expansions: MAX_GRID_EXPANSIONS }
    }
}

impl GridPathfinder {
    pub fn from_settings(settings: &GridSettings) -> Self {
        Self { max_expansions: settings.max_expansions }
    }

    /// Run a full search. `Ok(None)` means no path within the expansion cap.
    #[profile]
    pub fn find_path(
        &self,
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
        request: GridPathRequest,
    ) -> NavResult<Option<GridPath>> {
        let search = GridSearch::new(volume, oracle, request, self.max_expansions)?;
        search.run(volume, oracle)
    }

    /// Direction from `current` toward the first waypoint after the start cell.
    ///
    /// Zero when no path exists or `current` already shares the goal's cell.
    pub fn next_step_direction(
        &self,
        volume: &mut UniformGridVolume,
        oracle: &dyn SpatialOracle,
        current: Vec3,
        goal: Vec3,
        agent_radius: f32,
    ) -> NavResult<Vec3> {
        if volume.world_to_coord(current) == volume.world_to_coord(goal) {
            return Ok(Vec3::ZERO);
        }
        let request = GridPathRequest::new(current, goal, agent_radius);
        let direction = self
            .find_path(volume, oracle, request)?
            .and_then(|path| path.waypoints.get(1).copied())
            .map(|next| (next - current).normalize_or_zero())
            .unwrap_or(Vec3::ZERO);
        Ok(direction)
    }
}
