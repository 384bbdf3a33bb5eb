use bevy::math::Vec3;

use crate::navigation::oracle::{QueryFilter, SpatialOracle};

/// String-pull a point path.
///
/// From the current anchor, sweep toward each later point; when a sweep is
/// obstructed, the point before it becomes the new anchor. Consecutive points
/// are assumed mutually visible.
pub fn smooth_path(points: &[Vec3], oracle: &dyn SpatialOracle, radius: f32, filter: &QueryFilter) -> Vec<Vec3> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut smoothed = vec![points[0]];
    let mut anchor = 0;
    for i in 2..points.len() {
        if obstructed(oracle, points[anchor], points[i], radius, filter) {
            anchor = i - 1;
            smoothed.push(points[anchor]);
        }
    }
    smoothed.push(points[points.len() - 1]);
    smoothed
}

/// Furthest waypoint reachable from `from` without obstruction.
///
/// Walks the path in order and returns the waypoint before the first
/// obstructed sweep. Paths shorter than three points return their first
/// point; a fully visible path returns its last.
pub fn furthest_visible(
    path: &[Vec3],
    from: Vec3,
    oracle: &dyn SpatialOracle,
    radius: f32,
    filter: &QueryFilter,
) -> Option<Vec3> {
    if path.len() < 3 {
        return path.first().copied();
    }
    for i in 1..path.len() {
        if obstructed(oracle, from, path[i], radius, filter) {
            return Some(path[i - 1]);
        }
    }
    path.last().copied()
}

/// Point-sized agents test line of sight with a ray; others sweep their radius.
fn obstructed(oracle: &dyn SpatialOracle, from: Vec3, to: Vec3, radius: f32, filter: &QueryFilter) -> bool {
    if radius <= 0.0 {
        oracle.raycast(from, to, filter).is_some()
    } else {
        oracle.sweep(from, to, radius, filter).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::math::Bounds;
    use crate::navigation::oracle::{BoxWorld, Hit};

    fn line(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(i as f32 * 100.0, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_clear_line_collapses_to_endpoints() {
        let world = BoxWorld::new();
        let smoothed = smooth_path(&line(8), &world, 10.0, &QueryFilter::default());
        assert_eq!(smoothed, vec![Vec3::ZERO, Vec3::new(700.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_obstacle_keeps_corner() {
        // L-shaped path hugging a box at the inside corner.
        let mut world = BoxWorld::new();
        world.add_box(Bounds::from_min_max(Vec3::new(100.0, 100.0, -50.0), Vec3::new(300.0, 300.0, 50.0)));
        let path = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(200.0, 0.0, 0.0),
            Vec3::new(400.0, 0.0, 0.0),
            Vec3::new(400.0, 200.0, 0.0),
            Vec3::new(400.0, 400.0, 0.0),
        ];
        let smoothed = smooth_path(&path, &world, 10.0, &QueryFilter::default());

        assert_eq!(smoothed.first(), Some(&path[0]));
        assert_eq!(smoothed.last(), Some(&path[4]));
        assert!(smoothed.contains(&Vec3::new(400.0, 0.0, 0.0)), "corner must survive: {:?}", smoothed);
        for pair in smoothed.windows(2) {
            assert!(world.sweep(pair[0], pair[1], 10.0, &QueryFilter::default()).is_none());
        }
    }

    #[test]
    fn test_furthest_visible() {
        let mut world = BoxWorld::new();
        let filter = QueryFilter::default();
        let path = line(5);
        assert_eq!(furthest_visible(&path, Vec3::ZERO, &world, 5.0, &filter), Some(path[4]));
        assert_eq!(furthest_visible(&path[..2], Vec3::ZERO, &world, 5.0, &filter), Some(path[0]));

        world.add_box(Bounds::cube(Vec3::new(300.0, 0.0, 0.0), 20.0));
        assert_eq!(furthest_visible(&path, Vec3::ZERO, &world, 5.0, &filter), Some(path[2]));
    }

    /// Answers rays only; any sweep fails the test.
    struct RaysOnly(BoxWorld);

    impl SpatialOracle for RaysOnly {
        fn is_region_blocked(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> bool {
            self.0.is_region_blocked(center, half_extent, filter)
        }

        fn raycast(&self, from: Vec3, to: Vec3, filter: &QueryFilter) -> Option<Hit> {
            self.0.raycast(from, to, filter)
        }

        fn sweep(&self, _: Vec3, _: Vec3, radius: f32, _: &QueryFilter) -> Option<Hit> {
            panic!("point agent swept with radius {}", radius)
        }

        fn overlapping_bounds(&self, center: Vec3, half_extent: Vec3, filter: &QueryFilter) -> Vec<Bounds> {
            self.0.overlapping_bounds(center, half_extent, filter)
        }

        fn world_bounds(&self, filter: &QueryFilter) -> Option<Bounds> {
            self.0.world_bounds(filter)
        }
    }

    #[test]
    fn test_point_agent_uses_line_of_sight() {
        let mut world = BoxWorld::new();
        // Grazes the path: a ray at y=0 passes, any positive radius would not.
        world.add_box(Bounds::from_min_max(Vec3::new(250.0, 1.0, -50.0), Vec3::new(350.0, 100.0, 50.0)));
        let oracle = RaysOnly(world);
        let filter = QueryFilter::default();
        let path = line(6);

        assert_eq!(smooth_path(&path, &oracle, 0.0, &filter), vec![path[0], path[5]]);
        assert_eq!(furthest_visible(&path, Vec3::ZERO, &oracle, 0.0, &filter), Some(path[5]));

        let mut blocked = oracle.0.clone();
        blocked.add_box(Bounds::cube(Vec3::new(300.0, 0.0, 0.0), 20.0));
        let oracle = RaysOnly(blocked);
        assert_eq!(furthest_visible(&path, Vec3::ZERO, &oracle, 0.0, &filter), Some(path[2]));
    }
}
