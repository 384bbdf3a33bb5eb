use bevy::prelude::*;

use nav3d::navigation::{
    find_path, BoxWorld, Bounds, NavConfig, OctreeIndex, OctreeNavigator, PathfindingWorker, SearchAlgorithm,
    UniformGridVolume,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fixed so a saved octree matches the world it is reloaded into.
const WORLD_SEED: u64 = 0x5eed;
const OBSTACLE_COUNT: usize = 40;
const REQUEST_COUNT: usize = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn setup_file_logging() -> String {
    let log_dir = PathBuf::from("logs");
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create logs directory: {}", e);
    }

    // Keep only the newest 25 runs
    cleanup_old_logs(&log_dir, 25);

    let now = chrono::Local::now();
    let log_filename = format!("nav3d_{}.log", now.format("%Y%m%d_%H%M%S"));
    let log_path_str = log_dir.join(&log_filename).to_string_lossy().to_string();

    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, &log_filename);
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nav3d=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    log_path_str
}

fn cleanup_old_logs(log_dir: &PathBuf, keep_count: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|s| s.starts_with("nav3d") && s.ends_with(".log"))
        })
        .collect();

    // Oldest first
    log_files.sort_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));

    if log_files.len() > keep_count {
        for file in log_files.iter().take(log_files.len() - keep_count) {
            let _ = fs::remove_file(file.path());
        }
    }
}

/// Scatter boxes through the octree's root region.
fn random_world(root: Bounds, rng: &mut impl Rng) -> BoxWorld {
    let mut world = BoxWorld::new();
    let min = root.min();
    let max = root.max();
    for _ in 0..OBSTACLE_COUNT {
        let center = Vec3::new(
            rng.random_range(min.x..max.x),
            rng.random_range(min.y..max.y),
            rng.random_range(min.z..max.z),
        );
        let half = Vec3::new(
            rng.random_range(50.0..400.0),
            rng.random_range(50.0..400.0),
            rng.random_range(50.0..400.0),
        );
        world.add_box(Bounds::new(center, half));
    }
    world
}

fn random_point(root: Bounds, rng: &mut impl Rng) -> Vec3 {
    let min = root.min();
    let max = root.max();
    Vec3::new(
        rng.random_range(min.x..max.x),
        rng.random_range(min.y..max.y),
        rng.random_range(min.z..max.z),
    )
}

fn run_grid_demo(config: &NavConfig, world: &BoxWorld) {
    let mut volume = UniformGridVolume::new(config.octree.origin, &config.grid);
    volume.on_agent_enter();
    let size = volume.grid_size();
    let start = config.octree.origin + Vec3::splat(config.grid.division_size * 0.5);
    let goal = config.octree.origin + size - Vec3::splat(config.grid.division_size * 0.5);

    for algorithm in [SearchAlgorithm::AStar, SearchAlgorithm::JumpPoint] {
        match find_path(&mut volume, world, start, goal, config.grid.division_size * 0.4, algorithm) {
            Ok(Some(path)) => info!(
                "[GRID] {:?}: {} waypoints ({} raw, {} expansions)",
                algorithm,
                path.waypoints.len(),
                path.raw.len(),
                path.expansions
            ),
            Ok(None) => info!("[GRID] {:?}: no path", algorithm),
            Err(e) => error!("[GRID] {:?} failed: {}", algorithm, e),
        }
    }
    volume.unload_nodes();
}

fn main() {
    let log_file = setup_file_logging();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  nav3d - Logging to file                                 ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  Log file: {:<45} ║", log_file);
    println!("╚══════════════════════════════════════════════════════════╝");

    let config = NavConfig::load(NavConfig::DEFAULT_PATH);
    let mut rng = rand::rng();

    let mut index = OctreeIndex::new(config.octree.clone());
    let root = index.root_bounds();
    let world = Arc::new(random_world(root, &mut StdRng::seed_from_u64(WORLD_SEED)));

    if !index.load_or_build(world.as_ref()) {
        index.save();
    }
    let stats = index.stats();
    info!(
        "[OCTREE] Ready: {} nodes, {} free leaves, {} edges",
        stats.node_count, stats.free_leaf_count, stats.edge_count
    );

    run_grid_demo(&config, &world);

    let navigator = Arc::new(Mutex::new(OctreeNavigator::new(index, world.clone())));
    let worker = match PathfindingWorker::spawn(navigator, &config.worker) {
        Ok(worker) => worker,
        Err(e) => {
            error!("[WORKER] Could not start pathfinding thread: {}", e);
            return;
        }
    };

    let mut found = 0;
    for _ in 0..REQUEST_COUNT {
        let start = random_point(root, &mut rng);
        let end = random_point(root, &mut rng);
        let task = worker.enqueue_task(start, end, true);

        let deadline = Instant::now() + REQUEST_TIMEOUT;
        let result = loop {
            if let Some(result) = worker.drain_results() {
                break Some(result);
            }
            if Instant::now() > deadline {
                break None;
            }
            thread::sleep(Duration::from_millis(1));
        };

        match result {
            Some(result) if result.found => {
                found += 1;
                info!("[WORKER] Task {}: {} waypoints", task, result.path.len());
            }
            Some(_) => info!("[WORKER] Task {}: no path from {:?} to {:?}", task, start, end),
            None => warn!("[WORKER] Task {} timed out", task),
        }
    }
    info!("[WORKER] {}/{} requests found a path", found, REQUEST_COUNT);
}
