use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::NavResult;

/// Hard bound on grid A*/JPS expansions per search.
///
/// Grid volumes are small and bounded, so a fixed cap keeps per-call cost
/// predictable. A search that needs more expansions reports "no path".
pub const MAX_GRID_EXPANSIONS: usize = 99;

/// Settings for uniform grid volumes.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GridSettings {
    /// Edge length of a single cell in world units.
    pub division_size: f32,
    /// Cell counts along x, y, z.
    pub divisions: [usize; 3],
    /// 0 = 26-connected, 1 = 18-connected, 2 = 6-connected.
    pub min_shared_axes: u8,
    pub max_expansions: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            division_size: 100.0,
            divisions: [10, 10, 10],
            min_shared_axes: 0,
            max_expansions: MAX_GRID_EXPANSIONS,
        }
    }
}

/// Settings for the octree index and its pathfinder.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OctreeSettings {
    pub min_node_size: f32,
    /// Edge length of one macro root cell before power-of-two rounding.
    pub single_volume_size: f32,
    /// Number of macro root cells along x, y, z.
    pub expand_volume: [u32; 3],
    pub origin: Vec3,
    /// Center the root volume on the union of all obstacles instead of `origin`.
    pub auto_encapsulate: bool,
    /// Collision channel mask obstacles must match to be considered.
    pub channel: u32,
    pub heuristic_weight: f32,
    pub open_set_multiplier: f32,
    pub default_average_path_length: f32,
    pub stats_history: usize,
    pub prefer_grounded: bool,
    pub avoid_cost_multiplier: f32,
    pub world_name: String,
    pub save_dir: PathBuf,
}

impl Default for OctreeSettings {
    fn default() -> Self {
        Self {
            min_node_size: 100.0,
            single_volume_size: 1600.0,
            expand_volume: [1, 1, 1],
            origin: Vec3::ZERO,
            auto_encapsulate: false,
            channel: u32::MAX,
            heuristic_weight: 2.0,
            open_set_multiplier: 50.0,
            default_average_path_length: 40.0,
            stats_history: 32,
            prefer_grounded: false,
            avoid_cost_multiplier: 2.0,
            world_name: "default".to_string(),
            save_dir: PathBuf::from("navdata"),
        }
    }
}

impl OctreeSettings {
    pub fn save_path(&self) -> PathBuf {
        self.save_dir.join(format!("{}.octree", self.world_name))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    /// Idle delay between queue polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { poll_interval_ms: 10 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Seconds a volume stays loaded after the agent leaves.
    pub unload_timer: f32,
    /// Below this distance agents steer straight at the goal.
    pub min_distance_for_pathfinding: f32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            unload_timer: 5.0,
            min_distance_for_pathfinding: 20.0,
        }
    }
}

/// Navigation configuration, loaded once from RON.
///
/// Every section falls back to its defaults, so a config file only needs to
/// list the values it changes.
#[derive(Resource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NavConfig {
    pub grid: GridSettings,
    pub octree: OctreeSettings,
    pub worker: WorkerSettings,
    pub lifecycle: LifecycleSettings,
}

impl NavConfig {
    pub const DEFAULT_PATH: &'static str = "assets/nav_config.ron";

    /// Parse a config from RON text.
    pub fn from_ron(contents: &str) -> NavResult<Self> {
        Ok(ron::from_str::<NavConfig>(contents)?)
    }

    pub fn try_load(path: &str) -> NavResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron(&contents)
    }

    /// Load the config, falling back to defaults on any read or parse error.
    pub fn load(path: &str) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!("[CONFIG] Loaded navigation config from {}", path);
                config
            }
            Err(e) => {
                error!("[CONFIG] Failed to load {}: {}. Using defaults.", path, e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = NavConfig::from_ron("(grid: (min_shared_axes: 2), lifecycle: (unload_timer: 1.5))")
            .expect("partial config should parse");

        assert_eq!(config.grid.min_shared_axes, 2);
        assert_eq!(config.grid.division_size, 100.0, "unspecified fields keep defaults");
        assert_eq!(config.lifecycle.unload_timer, 1.5);
        assert_eq!(config.octree, OctreeSettings::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = NavConfig::load("does/not/exist.ron");
        assert_eq!(config, NavConfig::default());
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/nav_config.ron");
        let config = NavConfig::try_load(path).expect("shipped config must parse");
        assert_eq!(config.grid.max_expansions, MAX_GRID_EXPANSIONS);
    }

    #[test]
    fn test_save_path_uses_world_name() {
        let mut settings = OctreeSettings::default();
        settings.world_name = "canyon".into();
        assert_eq!(settings.save_path(), PathBuf::from("navdata/canyon.octree"));
    }
}
