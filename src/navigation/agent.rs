use bevy::prelude::*;
use std::sync::Arc;

use super::config::LifecycleSettings;
use super::error::NavResult;
use super::grid::{GridPath, GridPathRequest, GridPathfinder, SearchAlgorithm, UniformGridVolume};
use super::octree::smoothed_next_point;
use super::oracle::{QueryFilter, SpatialOracle};
use super::worker::{PathfindingWorker, TaskId, WorkerResult};

/// One-shot grid search.
pub fn find_path(
    volume: &mut UniformGridVolume,
    oracle: &dyn SpatialOracle,
    start: Vec3,
    goal: Vec3,
    agent_radius: f32,
    algorithm: SearchAlgorithm,
) -> NavResult<Option<GridPath>> {
    let request = GridPathRequest::new(start, goal, agent_radius).with_algorithm(algorithm);
    GridPathfinder::default().find_path(volume, oracle, request)
}

/// Steers one agent through the octree using the background worker.
///
/// Smoothing runs on the caller's thread against the previous result while
/// the worker computes the next one, so the returned direction always lags
/// one search behind.
pub struct OctreeAgent {
    worker: PathfindingWorker,
    oracle: Arc<dyn SpatialOracle>,
    radius: f32,
    filter: QueryFilter,
    min_distance: f32,
    next_location: Option<Vec3>,
    last_path: Vec<Vec3>,
    pending: Option<TaskId>,
    stopped: bool,
}

impl OctreeAgent {
    pub fn new(worker: PathfindingWorker, radius: f32, settings: &LifecycleSettings) -> Self {
        let (oracle, filter) = {
            let navigator = worker.navigator().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            (Arc::clone(&navigator.oracle), navigator.index.filter())
        };
        Self {
            worker,
            oracle,
            radius,
            filter,
            min_distance: settings.min_distance_for_pathfinding,
            next_location: None,
            last_path: Vec::new(),
            pending: None,
            stopped: false,
        }
    }

    /// Ignore these obstacles (typically the agent's own body and its target)
    /// when smoothing.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn worker(&self) -> &PathfindingWorker {
        &self.worker
    }

    /// Last path received from the worker.
    pub fn path(&self) -> &[Vec3] {
        &self.last_path
    }

    /// Request a path unless one is already being computed. Any unread
    /// result is dropped first.
    pub fn find_path_async(&mut self, start: Vec3, goal: Vec3) -> Option<TaskId> {
        if self.worker.is_working() {
            return None;
        }
        self.worker.drain_results();
        let id = self.worker.enqueue_task(start, goal, true);
        self.pending = Some(id);
        Some(id)
    }

    /// Take a finished result, if any.
    pub fn poll_path(&mut self) -> Option<WorkerResult> {
        let result = self.worker.drain_results()?;
        if self.pending == Some(result.task) {
            self.pending = None;
        }
        if result.found {
            self.last_path.clone_from(&result.path);
        }
        Some(result)
    }

    pub fn stop_pathfinding(&mut self) {
        self.stopped = true;
        self.worker.pause();
    }

    pub fn restart_pathfinding(&mut self) {
        self.worker.resume();
        self.stopped = false;
    }

    /// Direction to move this tick, or zero when stopped, close enough, or
    /// no path has arrived yet.
    pub fn next_step_direction(&mut self, current: Vec3, goal: Vec3) -> Vec3 {
        if self.stopped || current.distance(goal) <= self.min_distance {
            return Vec3::ZERO;
        }

        if !self.worker.is_working() {
            if let Some(result) = self.poll_path() {
                if result.found {
                    self.next_location =
                        smoothed_next_point(self.oracle.as_ref(), &result.path, current, self.radius, &self.filter);
                }
            }
            self.find_path_async(current, goal);
        }

        self.next_location
            .map_or(Vec3::ZERO, |next| (next - current).normalize_or_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::config::{GridSettings, OctreeSettings, WorkerSettings};
    use crate::navigation::math::Bounds;
    use crate::navigation::octree::OctreeIndex;
    use crate::navigation::oracle::BoxWorld;
    use crate::navigation::worker::OctreeNavigator;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[test]
    fn test_find_path_both_algorithms() {
        let mut volume = UniformGridVolume::new(Vec3::ZERO, &GridSettings::default());
        volume.populate_nodes();
        let world = BoxWorld::new();
        for algorithm in [SearchAlgorithm::AStar, SearchAlgorithm::JumpPoint] {
            let path = find_path(&mut volume, &world, Vec3::splat(50.0), Vec3::new(950.0, 50.0, 50.0), 40.0, algorithm)
                .unwrap()
                .expect("open volume");
            assert_eq!(path.waypoints.len(), 2);
        }
    }

    #[test]
    fn test_agent_steers_after_first_result() {
        let mut world = BoxWorld::new();
        world.add_box(Bounds::cube(Vec3::ZERO, 200.0));
        let mut index = OctreeIndex::new(OctreeSettings::default());
        index.rebuild(&world);
        let navigator = Arc::new(Mutex::new(OctreeNavigator::new(index, Arc::new(world))));
        let worker = PathfindingWorker::spawn(navigator, &WorkerSettings { poll_interval_ms: 1 }).unwrap();
        let mut agent = OctreeAgent::new(worker, 10.0, &LifecycleSettings::default());

        let current = Vec3::new(-600.0, 0.0, 0.0);
        let goal = Vec3::new(600.0, 0.0, 0.0);
        assert_eq!(agent.next_step_direction(current, goal), Vec3::ZERO, "no path yet");
        assert_eq!(agent.next_step_direction(goal, goal + Vec3::X), Vec3::ZERO, "within stopping distance");

        let deadline = Instant::now() + Duration::from_secs(5);
        let direction = loop {
            let direction = agent.next_step_direction(current, goal);
            if direction != Vec3::ZERO {
                break direction;
            }
            assert!(Instant::now() < deadline, "agent never received a path");
            std::thread::sleep(Duration::from_millis(2));
        };
        assert!((direction.length() - 1.0).abs() < 1e-4);
        assert_eq!(agent.path().last(), Some(&goal));
    }
}
