use bevy::math::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::math::Bounds;

/// Identifier of a world obstacle as seen by the oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObstacleId(pub u32);

/// Collision channels are plain bit masks.
pub mod channel {
    pub const STATIC: u32 = 1 << 0;
    pub const DYNAMIC: u32 = 1 << 1;
    pub const AGENT: u32 = 1 << 2;
    pub const ALL: u32 = u32::MAX;
}

/// Which obstacles a query considers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    pub channel: u32,
    pub ignore: SmallVec<[ObstacleId; 4]>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            channel: channel::ALL,
            ignore: SmallVec::new(),
        }
    }
}

impl QueryFilter {
    pub fn channel(channel: u32) -> Self {
        Self {
            channel,
            ignore: SmallVec::new(),
        }
    }

    pub fn ignoring(mut self, id: ObstacleId) -> Self {
        self.ignore.push(id);
        self
    }

    #[inline]
    pub fn accepts(&self, id: ObstacleId, channel: u32) -> bool {
        self.channel & channel != 0 && !self.ignore.contains(&id)
    }
}

/// Result of a blocking ray or sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    /// Distance travelled from `trace_start` before the hit.
    pub distance: f32,
    /// Position of the ray tip (or swept shape center) at the moment of impact.
    pub location: Vec3,
    pub trace_start: Vec3,
    pub obstacle: Option<ObstacleId>,
}

/// World geometry queries the navigation core depends on.
///
/// Implementations wrap whatever collision system the host uses; the core
/// never mutates the world through it.
pub trait SpatialOracle: Send + Sync {
    fn is_region_blocked(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> bool;

    /// Zero-width line of sight. Path smoothing uses it for point-sized agents.
    fn raycast(&self, from: Vec3, to: Vec3, filter: &QueryFilter) -> Option<Hit>;

    /// Sphere of `radius` moved from `from` to `to`.
    fn sweep(&self, from: Vec3, to: Vec3, radius: f32, filter: &QueryFilter) -> Option<Hit>;

    /// Bounds of every obstacle overlapping the region.
    fn overlapping_bounds(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> Vec<Bounds>;

    /// Union of all obstacles passing the filter, or `None` for an empty world.
    fn world_bounds(&self, filter: &QueryFilter) -> Option<Bounds>;
}

#[derive(Clone, Debug)]
pub struct BoxObstacle {
    pub id: ObstacleId,
    pub bounds: Bounds,
    pub channel: u32,
}

/// Oracle over a flat list of axis-aligned boxes.
///
/// Sweeps treat the sphere as a box of the same radius, which is conservative
/// at box corners.
#[derive(Clone, Debug, Default)]
pub struct BoxWorld {
    obstacles: Vec<BoxObstacle>,
    next_id: u32,
}

impl BoxWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a static obstacle and return its id.
    pub fn add_box(&mut self, bounds: Bounds) -> ObstacleId {
        self.add_box_on(bounds, channel::STATIC)
    }

    /// Ids are never reused, even after [`BoxWorld::remove`].
    pub fn add_box_on(&mut self, bounds: Bounds, channel: u32) -> ObstacleId {
        let id = ObstacleId(self.next_id);
        self.next_id += 1;
        self.obstacles.push(BoxObstacle { id, bounds, channel });
        id
    }

    pub fn remove(&mut self, id: ObstacleId) {
        self.obstacles.retain(|o| o.id != id);
    }

    pub fn obstacles(&self) -> &[BoxObstacle] {
        &self.obstacles
    }

    fn matching<'a>(&'a self, filter: &'a QueryFilter) -> impl Iterator<Item = &'a BoxObstacle> + 'a {
        self.obstacles
            .iter()
            .filter(move |o| filter.accepts(o.id, o.channel))
    }

    fn first_hit(&self, from: Vec3, to: Vec3, inflate: f32, filter: &QueryFilter) -> Option<Hit> {
        let length = from.distance(to);
        self.matching(filter)
            .filter_map(|o| {
                let t = o.bounds.expanded(inflate).segment_entry(from, to)?;
                Some(Hit {
                    distance: t * length,
                    location: from.lerp(to, t),
                    trace_start: from,
                    obstacle: Some(o.id),
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

impl SpatialOracle for BoxWorld {
    fn is_region_blocked(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> bool {
        let region = Bounds::new(center, half_extent);
        self.matching(filter).any(|o| o.bounds.intersects(&region))
    }

    fn raycast(&self, from: Vec3, to: Vec3, filter: &QueryFilter) -> Option<Hit> {
        self.first_hit(from, to, 0.0, filter)
    }

    fn sweep(&self, from: Vec3, to: Vec3, radius: f32, filter: &QueryFilter) -> Option<Hit> {
        self.first_hit(from, to, radius.max(0.0), filter)
    }

    fn overlapping_bounds(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> Vec<Bounds> {
        let region = Bounds::new(center, half_extent);
        self.matching(filter)
            .filter(|o| o.bounds.intersects(&region))
            .map(|o| o.bounds)
            .collect()
    }

    fn world_bounds(&self, filter: &QueryFilter) -> Option<Bounds> {
        self.matching(filter)
            .map(|o| o.bounds)
            .reduce(|acc, b| acc.union(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_world() -> (BoxWorld, ObstacleId) {
        let mut world = BoxWorld::new();
        let id = world.add_box(Bounds::cube(Vec3::new(500.0, 0.0, 0.0), 50.0));
        (world, id)
    }

    #[test]
    fn test_raycast_reports_nearest_hit() {
        let (mut world, wall) = wall_world();
        world.add_box(Bounds::cube(Vec3::new(800.0, 0.0, 0.0), 50.0));

        let hit = world
            .raycast(Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0), &QueryFilter::default())
            .expect("ray crosses both boxes");
        assert_eq!(hit.obstacle, Some(wall));
        assert!((hit.distance - 450.0).abs() < 1e-3, "distance {}", hit.distance);
        assert!((hit.location.x - 450.0).abs() < 1e-3);
    }

    #[test]
    fn test_sweep_inflates_by_radius() {
        let (world, _) = wall_world();
        let filter = QueryFilter::default();
        let from = Vec3::new(0.0, 80.0, 0.0);
        let to = Vec3::new(1000.0, 80.0, 0.0);

        assert!(world.raycast(from, to, &filter).is_none(), "thin ray passes above");
        let hit = world.sweep(from, to, 40.0, &filter).expect("fat sweep clips the box");
        assert!((hit.distance - 410.0).abs() < 1e-3);
    }

    #[test]
    fn test_filter_channel_and_ignore() {
        let (mut world, wall) = wall_world();
        let dynamic = world.add_box_on(Bounds::cube(Vec3::new(200.0, 0.0, 0.0), 10.0), channel::DYNAMIC);

        let statics = QueryFilter::channel(channel::STATIC);
        assert!(!statics.accepts(dynamic, channel::DYNAMIC));
        assert!(!world.is_region_blocked(Vec3::new(200.0, 0.0, 0.0), Vec3::splat(5.0), &statics));

        let ignore_wall = QueryFilter::default().ignoring(wall);
        assert!(!world.is_region_blocked(Vec3::new(500.0, 0.0, 0.0), Vec3::splat(5.0), &ignore_wall));
        assert!(world.world_bounds(&ignore_wall).is_some());
    }

    #[test]
    fn test_ids_survive_removal() {
        let mut world = BoxWorld::new();
        let a = world.add_box(Bounds::cube(Vec3::ZERO, 10.0));
        let b = world.add_box(Bounds::cube(Vec3::new(100.0, 0.0, 0.0), 10.0));
        world.remove(a);
        let c = world.add_box(Bounds::cube(Vec3::new(200.0, 0.0, 0.0), 10.0));

        assert_ne!(c, a);
        assert_ne!(c, b);
        let ids: Vec<ObstacleId> = world.obstacles().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![b, c]);

        // Ignoring the new box must not also ignore the old one.
        let filter = QueryFilter::default().ignoring(c);
        assert!(world.is_region_blocked(Vec3::new(100.0, 0.0, 0.0), Vec3::splat(5.0), &filter));
        assert!(!world.is_region_blocked(Vec3::new(200.0, 0.0, 0.0), Vec3::splat(5.0), &filter));
    }

    #[test]
    fn test_world_bounds_union() {
        let mut world = BoxWorld::new();
        assert!(world.world_bounds(&QueryFilter::default()).is_none());
        world.add_box(Bounds::from_min_max(Vec3::ZERO, Vec3::splat(100.0)));
        world.add_box(Bounds::from_min_max(Vec3::splat(-300.0), Vec3::splat(-200.0)));

        let union = world.world_bounds(&QueryFilter::default()).expect("two boxes");
        assert_eq!(union.min(), Vec3::splat(-300.0));
        assert_eq!(union.max(), Vec3::splat(100.0));
    }
}
