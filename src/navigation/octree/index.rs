use bevy::prelude::*;
use std::collections::VecDeque;

use super::node::{ChildRef, NodeId, OctreeNode};
use super::persistence::RecordStore;
use crate::navigation::config::OctreeSettings;
use crate::navigation::error::{NavError, NavResult};
use crate::navigation::handle::{Generation, Handle};
use crate::navigation::math::Bounds;
use crate::navigation::oracle::{QueryFilter, SpatialOracle};

/// Probes reach this far past a face, as a fraction of half-size.
const FACE_PROBE_PADDING: f32 = 1.01;

const FACE_DIRECTIONS: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];

/// Sparse octree over world obstacles, used for long-range pathfinding.
///
/// # Layout
///
/// Nodes live in an arena of `Option<OctreeNode>` slots. Slot 0 is a
/// super-root that is always occupied; its children are the macro root
/// cells, an `expand_volume` grid of cubes of edge `volume_size`.
///
/// Obstacle-intersecting nodes are subdivided down to `min_node_size`.
/// After [`prune_empty`](Self::prune_empty) occupied leaves are gone, so every
/// remaining leaf is free space and an occupied node always has children.
///
/// # Build Pipeline
///
/// `resize → build → prune_empty → compact_child_lists → connect_neighbors`,
/// run together by [`rebuild`](Self::rebuild).
pub struct OctreeIndex {
    settings: OctreeSettings,
    pub(crate) slots: Vec<Option<OctreeNode>>,
    pub(crate) root: Option<NodeId>,
    generation: Generation,
    /// Encoded records of a streaming tree, decoded on first access.
    pub(crate) store: Option<RecordStore>,
    pub(crate) origin: Vec3,
    pub(crate) volume_size: f32,
    live: bool,
    size_warned: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OctreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub free_leaf_count: usize,
    pub occupied_count: usize,
    pub avoid_count: usize,
    pub edge_count: usize,
}

impl OctreeIndex {
    pub fn new(settings: OctreeSettings) -> Self {
        let origin = settings.origin;
        let volume_size = settings.single_volume_size;
        Self {
            settings,
            slots: Vec::new(),
            root: None,
            generation: Generation::default(),
            store: None,
            origin,
            volume_size,
            live: false,
            size_warned: false,
        }
    }

    pub fn settings(&self) -> &OctreeSettings {
        &self.settings
    }

    pub fn generation(&self) -> u32 {
        self.generation.current()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Edge length of one macro root cell after rounding.
    pub fn volume_size(&self) -> f32 {
        self.volume_size
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// True while a search holds transient state on this tree.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub(crate) fn begin_search(&mut self) {
        self.live = true;
    }

    pub(crate) fn end_search(&mut self) {
        self.live = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.store.is_some()
    }

    pub fn filter(&self) -> QueryFilter {
        QueryFilter::channel(self.settings.channel)
    }

    /// Materialized node at `id`.
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn expect_node(&self, id: NodeId) -> NavResult<&OctreeNode> {
        self.node(id)
            .ok_or_else(|| NavError::Corrupt(format!("node {} is not materialized", id.0)))
    }

    fn expect_node_mut(&mut self, id: NodeId) -> NavResult<&mut OctreeNode> {
        self.node_mut(id)
            .ok_or_else(|| NavError::Corrupt(format!("node {} is not materialized", id.0)))
    }

    pub fn handle(&self, id: NodeId) -> Handle {
        self.generation.handle(id.index())
    }

    pub fn resolve(&self, handle: Handle) -> NavResult<&OctreeNode> {
        let index = self.generation.check(handle)?;
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(NavError::StaleHandle {
                generation: handle.generation,
                current: self.generation(),
            })
    }

    /// Ids of every materialized node, in slot order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }

    /// Drop every node and invalidate outstanding handles.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.root = None;
        self.store = None;
        self.generation.bump();
    }

    /// Full rebuild from the oracle's current obstacles.
    pub fn rebuild(&mut self, oracle: &dyn SpatialOracle) {
        self.resize(oracle);
        self.build(oracle);
        self.prune_empty();
        self.compact_child_lists();
        self.connect_neighbors();
        let stats = self.stats();
        info!(
            "[OCTREE] Rebuilt: {} nodes, {} free leaves, {} edges (generation {})",
            stats.node_count,
            stats.free_leaf_count,
            stats.edge_count,
            self.generation()
        );
    }

    /// Pick the root extent and round the macro cell size.
    ///
    /// The cell edge is rounded up to `min_node_size * 2^k` so every level
    /// halves cleanly down to the minimum leaf.
    pub fn resize(&mut self, oracle: &dyn SpatialOracle) {
        let [ex, ey, ez] = self.settings.expand_volume.map(|e| e.max(1) as f32);
        let mut requested = self.settings.single_volume_size;
        self.origin = self.settings.origin;

        if self.settings.auto_encapsulate {
            if let Some(world) = oracle.world_bounds(&self.filter()) {
                let extent = world.half_extents * 2.0;
                self.origin = world.center;
                requested = (extent / Vec3::new(ex, ey, ez)).max_element().max(requested);
                debug!("[OCTREE] Encapsulating world bounds {:?}", world);
            }
        }

        let min = self.settings.min_node_size.max(f32::EPSILON);
        let levels = (requested / min).max(1.0).log2().ceil();
        let rounded = min * 2f32.powf(levels);
        if (rounded - self.settings.single_volume_size).abs() > 1e-3 && !self.size_warned {
            warn!(
                "[OCTREE] Volume size {} rounded to {} ({} x 2^{})",
                self.settings.single_volume_size, rounded, min, levels
            );
            self.size_warned = true;
        }
        self.volume_size = rounded;
    }

    /// Region covered by all macro root cells together.
    pub fn root_bounds(&self) -> Bounds {
        let [ex, ey, ez] = self.settings.expand_volume.map(|e| e.max(1) as f32);
        Bounds::new(self.origin, Vec3::new(ex, ey, ez) * self.volume_size * 0.5)
    }

    /// Create the super-root and macro cells, then subdivide around obstacles.
    pub fn build(&mut self, oracle: &dyn SpatialOracle) {
        self.slots.clear();
        self.store = None;
        self.generation.bump();

        let root_bounds = self.root_bounds();
        let mut root = OctreeNode::new(root_bounds.center, root_bounds.half_extents.max_element(), None);
        root.bounds = root_bounds;
        root.occupied = true;
        self.slots.push(Some(root));
        let root_id = NodeId(0);
        self.root = Some(root_id);

        let [ex, ey, ez] = self.settings.expand_volume.map(|e| e.max(1));
        let half = self.volume_size * 0.5;
        let min_corner = root_bounds.min();
        let filter = self.filter();

        for z in 0..ez {
            for y in 0..ey {
                for x in 0..ex {
                    let center = min_corner + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * self.volume_size;
                    let cell = self.push_node(OctreeNode::new(center, half, Some(root_id)));
                    self.attach_child(root_id, cell);

                    let obstacles = oracle.overlapping_bounds(center, Vec3::splat(half), &filter);
                    for obstacle in &obstacles {
                        self.divide_node(cell, obstacle);
                    }
                }
            }
        }
        debug!("[OCTREE] Built {} nodes across {} macro cells", self.slots.len(), ex * ey * ez);
    }

    fn push_node(&mut self, node: OctreeNode) -> NodeId {
        self.slots.push(Some(node));
        NodeId(self.slots.len() as u32 - 1)
    }

    fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        let Some(bounds) = self.node(child).map(|c| c.bounds) else {
            return;
        };
        if let Some(parent) = self.node_mut(parent) {
            parent.children.push(Some(ChildRef { id: child, bounds }));
        }
    }

    /// Mark every node overlapping `obstacle` occupied, subdividing until
    /// the minimum leaf size.
    fn divide_node(&mut self, id: NodeId, obstacle: &Bounds) {
        let min_size = self.settings.min_node_size;
        let mut stack = vec![id];

        while let Some(id) = stack.pop() {
            let Some(node) = self.node_mut(id) else {
                continue;
            };
            if !node.bounds.intersects(obstacle) {
                continue;
            }
            node.occupied = true;
            if node.half_size() * 2.0 <= min_size * 1.001 {
                continue;
            }

            if node.children.is_empty() {
                let parent_center = node.center();
                let quarter = node.half_size() * 0.5;
                let octants: Vec<Bounds> = (0..8u8).map(|o| node.octant_bounds(o)).collect();
                for bounds in octants {
                    let child = self.push_node(OctreeNode::new(bounds.center, quarter, Some(id)));
                    self.attach_child(id, child);
                }
                trace!("[OCTREE] Divided node at {:?}", parent_center);
            }

            if let Some(node) = self.node(id) {
                stack.extend(node.children().map(|c| c.id));
            }
        }
    }

    /// Breadth-first order of every reachable materialized node.
    pub(crate) fn breadth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeId> = self.root.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.node(id) else {
                continue;
            };
            order.push(id);
            queue.extend(node.children().map(|c| c.id));
        }
        order
    }

    /// Discard occupied childless nodes.
    ///
    /// Walks breadth-first order in reverse so a parent whose children were
    /// all discarded is itself discarded in the same pass.
    pub fn prune_empty(&mut self) {
        let order = self.breadth_first();
        let mut removed = 0;

        for &id in order.iter().rev() {
            if Some(id) == self.root {
                continue;
            }
            let prune = self.node(id).is_some_and(|n| n.occupied && n.is_leaf());
            if !prune {
                continue;
            }
            let parent = self.slots[id.index()].take().and_then(|n| n.parent);
            if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
                for slot in parent.children.iter_mut() {
                    if slot.is_some_and(|c| c.id == id) {
                        *slot = None;
                    }
                }
            }
            removed += 1;
        }
        debug!("[OCTREE] Pruned {} occupied leaves", removed);
    }

    /// Re-pack child lists after pruning. Positional child indices change.
    pub fn compact_child_lists(&mut self) {
        for node in self.slots.iter_mut().flatten() {
            node.children.retain(|c| c.is_some());
        }
    }

    /// Link every free leaf to the free leaves across each of its six faces.
    pub fn connect_neighbors(&mut self) {
        let leaves: Vec<NodeId> = self
            .node_ids()
            .filter(|&id| self.node(id).is_some_and(OctreeNode::is_navigable))
            .collect();

        for &id in &leaves {
            let Some((center, half)) = self.node(id).map(|n| (n.center(), n.half_size())) else {
                continue;
            };
            for direction in FACE_DIRECTIONS {
                let probe = center + direction * half * FACE_PROBE_PADDING;
                let Some(other) = self.find_graph_node(probe) else {
                    continue;
                };
                if other == id {
                    continue;
                }
                let Some(other_center) = self.node(other).map(OctreeNode::center) else {
                    continue;
                };
                if let Some(node) = self.node_mut(id) {
                    node.add_neighbor(other, other_center);
                }
                if let Some(node) = self.node_mut(other) {
                    node.add_neighbor(id, center);
                }
            }
        }

        if self.settings.prefer_grounded {
            for &id in &leaves {
                let Some((center, half)) = self.node(id).map(|n| (n.center(), n.half_size())) else {
                    continue;
                };
                let below = center - Vec3::Y * half * FACE_PROBE_PADDING;
                let floating = self.find_graph_node(below).is_some();
                if let Some(node) = self.node_mut(id) {
                    node.avoid = floating;
                }
            }
        }

        for &id in &leaves {
            if let Some(node) = self.node_mut(id) {
                node.neighbors_resolved = true;
            }
        }
    }

    /// Free leaf containing `location` among materialized nodes.
    pub fn find_graph_node(&self, location: Vec3) -> Option<NodeId> {
        let mut current = self.root?;
        loop {
            let node = self.node(current)?;
            if node.is_leaf() {
                return (!node.occupied).then_some(current);
            }
            current = node.children().find(|c| c.bounds.contains(location))?.id;
        }
    }

    /// Like [`find_graph_node`](Self::find_graph_node), decoding nodes on the
    /// descent path of a streaming tree as needed. Siblings stay encoded.
    pub fn find_and_load_node(&mut self, location: Vec3) -> NavResult<Option<NodeId>> {
        let Some(mut current) = self.root else {
            return Ok(None);
        };
        loop {
            self.materialize(current)?;
            let node = self.expect_node(current)?;
            if node.is_leaf() {
                return Ok((!node.occupied).then_some(current));
            }
            match node.children().find(|c| c.bounds.contains(location)) {
                Some(child) => current = child.id,
                None => return Ok(None),
            }
        }
    }

    /// Decode the node at `id` if it only exists in the record store.
    pub(crate) fn materialize(&mut self, id: NodeId) -> NavResult<()> {
        if self.node(id).is_some() {
            return Ok(());
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| NavError::Corrupt(format!("node {} is missing", id.0)))?;
        let node = store.decode(id)?;
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or_else(|| NavError::Corrupt(format!("node {} is out of range", id.0)))?;
        *slot = Some(node);
        Ok(())
    }

    /// Resolve the stored neighbor positions of `id` into edges.
    ///
    /// Returns immediately once the node's edges are complete; otherwise each
    /// position is located with [`find_and_load_node`](Self::find_and_load_node)
    /// and wired in both directions.
    pub fn get_neighbors(&mut self, id: NodeId) -> NavResult<&[NodeId]> {
        let node = self.expect_node(id)?;
        let complete = node.neighbors_resolved || node.neighbors.len() >= node.neighbor_positions.len();
        if !complete {
            let positions = node.neighbor_positions.clone();
            for position in positions {
                let Some(other) = self.find_and_load_node(position)? else {
                    continue;
                };
                if other == id {
                    continue;
                }
                let node = self.expect_node_mut(id)?;
                if !node.neighbors.contains(&other) {
                    node.neighbors.push(other);
                }
                let neighbor = self.expect_node_mut(other)?;
                if !neighbor.neighbors.contains(&id) {
                    neighbor.neighbors.push(id);
                }
            }
            self.expect_node_mut(id)?.neighbors_resolved = true;
        }
        Ok(self.expect_node(id)?.neighbors.as_slice())
    }

    pub fn stats(&self) -> OctreeStats {
        let mut stats = OctreeStats::default();
        for node in self.slots.iter().flatten() {
            stats.node_count += 1;
            if node.occupied {
                stats.occupied_count += 1;
            }
            if node.is_leaf() {
                stats.leaf_count += 1;
                if !node.occupied {
                    stats.free_leaf_count += 1;
                }
            }
            if node.avoid {
                stats.avoid_count += 1;
            }
            stats.edge_count += node.neighbors.len();
        }
        stats.edge_count /= 2;
        stats
    }
}
