use bevy::prelude::*;
use smallvec::SmallVec;

use super::node::GridNode;
use crate::navigation::config::GridSettings;
use crate::navigation::error::{NavError, NavResult};
use crate::navigation::handle::{Generation, Handle};
use crate::navigation::lifecycle::VolumeLifecycle;
use crate::navigation::math::shared_axes;

/// A bounded uniform 3D lattice used for local pathfinding.
///
/// The node array only exists while the volume is loaded; see
/// [`VolumeLifecycle`] for when that happens. Coordinates outside the lattice
/// are clamped rather than rejected, so every lookup on a loaded volume
/// succeeds.
///
/// # Coordinate Spaces
///
/// - **Local:** origin at the volume's min corner, axes rotated by `rotation`
/// - **Lattice:** `local / division_size`, floored and clamped to
///   `[0, divisions - 1]`
/// - **World:** `origin + rotation * local`; cell centers sit half a cell in
#[derive(Debug)]
pub struct UniformGridVolume {
    origin: Vec3,
    rotation: Quat,
    division_size: f32,
    divisions: IVec3,
    min_shared_axes: u8,
    nodes: Option<Vec<GridNode>>,
    generation: Generation,
    pub lifecycle: VolumeLifecycle,
}

impl UniformGridVolume {
    pub fn new(origin: Vec3, settings: &GridSettings) -> Self {
        let [x, y, z] = settings.divisions;
        Self {
            origin,
            rotation: Quat::IDENTITY,
            division_size: settings.division_size,
            divisions: IVec3::new(x.max(1) as i32, y.max(1) as i32, z.max(1) as i32),
            min_shared_axes: settings.min_shared_axes.min(2),
            nodes: None,
            generation: Generation::default(),
            lifecycle: VolumeLifecycle::default(),
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.nodes.is_some()
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.current()
    }

    pub fn divisions(&self) -> IVec3 {
        self.divisions
    }

    pub fn division_size(&self) -> f32 {
        self.division_size
    }

    pub fn min_shared_axes(&self) -> u8 {
        self.min_shared_axes
    }

    pub fn node_count(&self) -> usize {
        (self.divisions.x * self.divisions.y * self.divisions.z) as usize
    }

    /// Edge lengths of the whole volume in local space.
    pub fn grid_size(&self) -> Vec3 {
        self.divisions.as_vec3() * self.division_size
    }

    /// Allocate the node array. Neighbor lists stay empty until first use.
    pub fn populate_nodes(&mut self) {
        if self.nodes.is_some() {
            return;
        }
        let count = self.node_count();
        let mut nodes = Vec::with_capacity(count);
        for z in 0..self.divisions.z {
            for y in 0..self.divisions.y {
                for x in 0..self.divisions.x {
                    nodes.push(GridNode::new(IVec3::new(x, y, z)));
                }
            }
        }
        self.nodes = Some(nodes);
        self.generation.bump();
        debug!("[VOLUME] Populated {} nodes at {:?} (generation {})", count, self.origin, self.generation());
    }

    /// Drop the node array; every outstanding handle becomes stale.
    pub fn unload_nodes(&mut self) {
        if self.nodes.take().is_some() {
            self.generation.bump();
            debug!("[VOLUME] Unloaded volume at {:?} (generation {})", self.origin, self.generation());
        }
    }

    #[inline]
    pub fn clamp_coord(&self, coord: IVec3) -> IVec3 {
        coord.clamp(IVec3::ZERO, self.divisions - IVec3::ONE)
    }

    #[inline]
    pub fn in_bounds(&self, coord: IVec3) -> bool {
        coord.cmpge(IVec3::ZERO).all() && coord.cmplt(self.divisions).all()
    }

    /// Flat index of the clamped coordinate.
    #[inline]
    pub fn index_of(&self, coord: IVec3) -> usize {
        let c = self.clamp_coord(coord);
        (c.z * (self.divisions.x * self.divisions.y) + c.y * self.divisions.x + c.x) as usize
    }

    fn nodes(&self) -> NavResult<&[GridNode]> {
        self.nodes.as_deref().ok_or(NavError::VolumeNotLoaded)
    }

    pub(crate) fn nodes_mut(&mut self) -> NavResult<&mut [GridNode]> {
        self.nodes.as_deref_mut().ok_or(NavError::VolumeNotLoaded)
    }

    /// Node at the clamped coordinate.
    pub fn get_node(&self, coord: IVec3) -> NavResult<&GridNode> {
        let index = self.index_of(coord);
        Ok(&self.nodes()?[index])
    }

    pub fn handle_at(&self, coord: IVec3) -> NavResult<Handle> {
        self.nodes()?;
        Ok(self.generation.handle(self.index_of(coord)))
    }

    pub fn resolve(&self, handle: Handle) -> NavResult<&GridNode> {
        let index = self.generation.check(handle)?;
        self.nodes()?
            .get(index)
            .ok_or(NavError::StaleHandle { generation: handle.generation, current: self.generation() })
    }

    pub(crate) fn resolve_index(&self, handle: Handle) -> NavResult<usize> {
        self.resolve(handle).map(|_| handle.index())
    }

    pub(crate) fn handle_for_index(&self, index: usize) -> Handle {
        self.generation.handle(index)
    }

    pub fn world_to_local(&self, position: Vec3) -> Vec3 {
        self.rotation.inverse() * (position - self.origin)
    }

    pub fn local_to_world(&self, local: Vec3) -> Vec3 {
        self.origin + self.rotation * local
    }

    /// Lattice coordinate of a world position, clamped into the volume.
    pub fn world_to_coord(&self, position: Vec3) -> IVec3 {
        let local = self.world_to_local(position);
        let scaled = self.divisions.as_vec3() * (local / self.grid_size());
        self.clamp_coord(scaled.floor().as_ivec3())
    }

    /// World position of a cell center.
    pub fn coord_to_world(&self, coord: IVec3) -> Vec3 {
        let c = self.clamp_coord(coord);
        let local = c.as_vec3() * self.division_size + Vec3::splat(self.division_size * 0.5);
        self.local_to_world(local)
    }

    /// True if the world position lies inside the volume's extent.
    pub fn contains(&self, position: Vec3) -> bool {
        let local = self.world_to_local(position);
        local.cmpge(Vec3::ZERO).all() && local.cmple(self.grid_size()).all()
    }

    /// Materialize the neighbor list of the node at `index` once.
    ///
    /// An offset is kept when it shares at least `min_shared_axes` axes with
    /// the center and is not the center itself.
    pub fn ensure_neighbors(&mut self, index: usize) -> NavResult<&[u32]> {
        let min_shared = self.min_shared_axes;
        let divisions = self.divisions;
        let dims = (divisions.x, divisions.x * divisions.y);
        let nodes = self.nodes_mut()?;
        let node = nodes.get_mut(index).ok_or(NavError::VolumeNotLoaded)?;

        if node.neighbors.is_none() {
            let center = node.coord;
            let mut list: SmallVec<[u32; 26]> = SmallVec::new();
            for dz in -1..=1 {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let coord = center + IVec3::new(dx, dy, dz);
                        let shared = shared_axes(center, coord);
                        if shared < min_shared || shared == 3 {
                            continue;
                        }
                        if coord.cmplt(IVec3::ZERO).any() || coord.cmpge(divisions).any() {
                            continue;
                        }
                        list.push((coord.z * dims.1 + coord.y * dims.0 + coord.x) as u32);
                    }
                }
            }
            node.neighbors = Some(list);
        }
        Ok(node.neighbors())
    }
}
