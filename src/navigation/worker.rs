//! Background thread serving octree path requests.
//!
//! One dedicated thread drains a task queue against a shared
//! [`OctreeNavigator`]. Callers never block on a search: they enqueue, then
//! poll [`PathfindingWorker::is_working`] and [`PathfindingWorker::drain_results`]
//! on later ticks.
//!
//! # State Machine
//!
//! `Idle → (enqueue with start signal) → Running one task → Idle`, gated
//! independently by the paused and running flags. Each start signal runs at
//! most one task; only the newest result is buffered. A task still running
//! when the worker is paused or stopped never publishes its result, even if
//! the worker is resumed before it finishes.

use bevy::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::config::WorkerSettings;
use super::error::NavResult;
use super::octree::{OctreeIndex, OctreePath, OctreePathfinder};
use super::oracle::SpatialOracle;

pub type TaskId = u64;

/// An octree index together with the pathfinder and world it is searched in.
pub struct OctreeNavigator {
    pub index: OctreeIndex,
    pub pathfinder: OctreePathfinder,
    pub oracle: Arc<dyn SpatialOracle>,
}

impl OctreeNavigator {
    pub fn new(index: OctreeIndex, oracle: Arc<dyn SpatialOracle>) -> Self {
        let pathfinder = OctreePathfinder::new(index.settings());
        Self {
            index,
            pathfinder,
            oracle,
        }
    }

    pub fn find_path(&mut self, start: Vec3, end: Vec3) -> NavResult<Option<OctreePath>> {
        self.pathfinder.find_path(&mut self.index, start, end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathTask {
    pub id: TaskId,
    pub start: Vec3,
    pub end: Vec3,
}

/// Output of one finished task. `path` is empty when nothing was found.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerResult {
    pub task: TaskId,
    pub found: bool,
    pub path: Vec<Vec3>,
}

#[derive(Default)]
struct WorkerState {
    queue: VecDeque<PathTask>,
    is_working: bool,
    output: Option<WorkerResult>,
    next_id: TaskId,
    /// Bumped by every pause or stop; a task finishing under a newer epoch is dropped.
    epoch: u64,
}

struct Shared {
    state: Mutex<WorkerState>,
    paused: AtomicBool,
    running: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PathfindingWorker {
    shared: Arc<Shared>,
    navigator: Arc<Mutex<OctreeNavigator>>,
    thread: Option<JoinHandle<()>>,
}

impl PathfindingWorker {
    /// Start the worker thread.
    pub fn spawn(navigator: Arc<Mutex<OctreeNavigator>>, settings: &WorkerSettings) -> NavResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::default()),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });
        let interval = Duration::from_millis(settings.poll_interval_ms);

        let thread = thread::Builder::new().name("nav3d-pathfinder".to_string()).spawn({
            let shared = Arc::clone(&shared);
            let navigator = Arc::clone(&navigator);
            move || run(&shared, &navigator, interval)
        })?;
        info!("[WORKER] Pathfinding thread started (poll every {:?})", interval);

        Ok(Self {
            shared,
            navigator,
            thread: Some(thread),
        })
    }

    /// Shared navigator; lock it to rebuild or save the index between tasks.
    pub fn navigator(&self) -> &Arc<Mutex<OctreeNavigator>> {
        &self.navigator
    }

    /// Queue a search. With `start_immediately` the thread runs the oldest
    /// queued task on its next poll.
    pub fn enqueue_task(&self, start: Vec3, end: Vec3, start_immediately: bool) -> TaskId {
        let mut state = lock(&self.shared.state);
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push_back(PathTask { id, start, end });
        if start_immediately {
            state.is_working = true;
        }
        id
    }

    /// Signal the thread to run the next queued task.
    pub fn start(&self) {
        let mut state = lock(&self.shared.state);
        if !state.queue.is_empty() {
            state.is_working = true;
        }
    }

    pub fn is_working(&self) -> bool {
        lock(&self.shared.state).is_working
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Take the buffered result. A result not drained before the next task
    /// finishes is overwritten.
    pub fn drain_results(&self) -> Option<WorkerResult> {
        lock(&self.shared.state).output.take()
    }

    /// Suspend the thread and discard queued tasks and any buffered result.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        Self::discard(&mut lock(&self.shared.state));
        debug!("[WORKER] Paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        debug!("[WORKER] Resumed");
    }

    /// Stop the thread for good, discarding queued tasks and buffered output.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        Self::discard(&mut lock(&self.shared.state));
    }

    fn discard(state: &mut WorkerState) {
        state.epoch += 1;
        state.queue.clear();
        state.output = None;
        state.is_working = false;
    }
}

impl Drop for PathfindingWorker {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("[WORKER] Pathfinding thread panicked");
            }
        }
        info!("[WORKER] Pathfinding thread stopped");
    }
}

fn run(shared: &Shared, navigator: &Mutex<OctreeNavigator>, interval: Duration) {
    while shared.running.load(Ordering::Acquire) {
        if !shared.paused.load(Ordering::Acquire) {
            let task = {
                let mut state = lock(&shared.state);
                if state.is_working {
                    let task = state.queue.pop_front();
                    if task.is_none() {
                        state.is_working = false;
                    }
                    task.map(|task| (task, state.epoch))
                } else {
                    None
                }
            };

            if let Some((task, epoch)) = task {
                let result = lock(navigator).find_path(task.start, task.end);
                let (found, path) = match result {
                    Ok(Some(path)) => (true, path.waypoints),
                    Ok(None) => (false, Vec::new()),
                    Err(e) => {
                        warn!("[WORKER] Task {} failed: {}", task.id, e);
                        (false, Vec::new())
                    }
                };

                let mut state = lock(&shared.state);
                if state.epoch != epoch || !shared.running.load(Ordering::Acquire) {
                    debug!("[WORKER] Dropping result of task {} (paused or stopped mid-search)", task.id);
                } else {
                    state.output = Some(WorkerResult {
                        task: task.id,
                        found,
                        path,
                    });
                    state.is_working = false;
                }
            }
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::config::OctreeSettings;
    use crate::navigation::math::Bounds;
    use crate::navigation::oracle::BoxWorld;
    use std::time::Instant;

    fn worker() -> PathfindingWorker {
        let mut world = BoxWorld::new();
        world.add_box(Bounds::cube(Vec3::ZERO, 200.0));
        let mut index = OctreeIndex::new(OctreeSettings::default());
        index.rebuild(&world);
        let navigator = OctreeNavigator::new(index, Arc::new(world));
        PathfindingWorker::spawn(Arc::new(Mutex::new(navigator)), &WorkerSettings { poll_interval_ms: 1 }).unwrap()
    }

    fn wait_for_result(worker: &PathfindingWorker) -> WorkerResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = worker.drain_results() {
                return result;
            }
            assert!(Instant::now() < deadline, "worker produced no result");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_task_runs_and_returns_to_idle() {
        let worker = worker();
        let end = Vec3::new(600.0, 0.0, 0.0);
        let id = worker.enqueue_task(Vec3::new(-600.0, 0.0, 0.0), end, true);

        let result = wait_for_result(&worker);
        assert_eq!(result.task, id);
        assert!(result.found);
        assert_eq!(result.path.last(), Some(&end));
        assert!(!worker.is_working());
    }

    #[test]
    fn test_queued_task_waits_for_start_signal() {
        let worker = worker();
        worker.enqueue_task(Vec3::new(-600.0, 0.0, 0.0), Vec3::new(600.0, 0.0, 0.0), false);
        thread::sleep(Duration::from_millis(20));
        assert!(worker.drain_results().is_none());
        assert_eq!(worker.queued(), 1);

        worker.start();
        let result = wait_for_result(&worker);
        assert!(result.found);
        assert_eq!(worker.queued(), 0);
    }

    #[test]
    fn test_pause_discards_queue() {
        let worker = worker();
        worker.pause();
        worker.enqueue_task(Vec3::new(-600.0, 0.0, 0.0), Vec3::new(600.0, 0.0, 0.0), true);
        thread::sleep(Duration::from_millis(20));
        assert!(worker.drain_results().is_none());

        worker.pause();
        assert_eq!(worker.queued(), 0);
        assert!(!worker.is_working());

        worker.resume();
        worker.enqueue_task(Vec3::new(-600.0, 0.0, 0.0), Vec3::ZERO, true);
        let result = wait_for_result(&worker);
        assert!(!result.found, "end inside the obstacle");
        assert!(result.path.is_empty());
    }

    #[test]
    fn test_pause_and_resume_drop_in_flight_result() {
        let worker = worker();
        // Holding the navigator parks the thread inside its task.
        let navigator = worker.navigator().lock().unwrap();
        let stale = worker.enqueue_task(Vec3::new(-600.0, 0.0, 0.0), Vec3::new(600.0, 0.0, 0.0), true);
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.queued() > 0 {
            assert!(Instant::now() < deadline, "task was never picked up");
            thread::sleep(Duration::from_millis(1));
        }

        worker.pause();
        worker.resume();
        let fresh = worker.enqueue_task(Vec3::new(0.0, -600.0, 0.0), Vec3::new(0.0, 600.0, 0.0), true);
        drop(navigator);

        let result = wait_for_result(&worker);
        assert_ne!(result.task, stale);
        assert_eq!(result.task, fresh);
        assert_eq!(result.path.last(), Some(&Vec3::new(0.0, 600.0, 0.0)));
    }
}
