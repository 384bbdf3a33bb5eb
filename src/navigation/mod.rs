//! 3D navigation: uniform grid volumes for local movement and a sparse
//! octree for long-range routing.
//!
//! # Architecture
//!
//! 1. **Grid volumes:** bounded lattices, populated while an agent or its
//!    target is inside and unloaded on a timer afterwards
//! 2. **Grid search:** A* or Jump Point Search with a fixed expansion cap,
//!    followed by string pulling
//! 3. **Octree:** obstacles subdivided to a minimum leaf size, free leaves
//!    linked across faces, persisted to disk between runs
//! 4. **Octree search:** weighted A* on a background thread, polled by agents
//!
//! World geometry is only ever read through [`SpatialOracle`].
//!
//! # Public API
//!
//! - [`NavigationPlugin`]: config, [`VolumeManager`] and the lifecycle system
//! - [`agent::find_path`]: one-shot grid search
//! - [`OctreeAgent`]: async octree steering

use bevy::prelude::*;

pub mod agent;
pub mod config;
pub mod error;
pub mod grid;
pub mod handle;
pub mod lifecycle;
pub mod math;
pub mod octree;
pub mod oracle;
pub mod smoothing;
pub mod worker;

pub use agent::{find_path, OctreeAgent};
pub use config::NavConfig;
pub use error::{NavError, NavResult};
pub use grid::{GridPath, GridPathRequest, GridPathfinder, SearchAlgorithm, UniformGridVolume};
pub use handle::Handle;
pub use lifecycle::{NavigationDecision, VolumeManager};
pub use math::Bounds;
pub use octree::{LoadOutcome, OctreeIndex, OctreePath, OctreePathfinder};
pub use oracle::{BoxWorld, QueryFilter, SpatialOracle};
pub use worker::{OctreeNavigator, PathfindingWorker, WorkerResult};

/// Marks the entity whose position drives volume population.
#[derive(Component, Debug, Default)]
pub struct NavAgent;

/// Marks the entity the agent is chasing.
#[derive(Component, Debug, Default)]
pub struct NavTarget;

pub struct NavigationPlugin;

impl Plugin for NavigationPlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<NavConfig>() {
            app.insert_resource(NavConfig::load(NavConfig::DEFAULT_PATH));
        }
        let lifecycle = app.world().resource::<NavConfig>().lifecycle.clone();
        app.insert_resource(VolumeManager::new(&lifecycle))
            .add_systems(Update, update_volume_lifecycle);
    }
}

/// Feed agent and target positions into the volume manager.
pub fn update_volume_lifecycle(
    time: Res<Time>,
    mut manager: ResMut<VolumeManager>,
    agents: Query<&Transform, With<NavAgent>>,
    targets: Query<&Transform, With<NavTarget>>,
) {
    let agent = agents.iter().next().map(|t| t.translation);
    let target = targets.iter().next().map(|t| t.translation);
    manager.update(time.delta_secs(), agent, target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::config::{GridSettings, LifecycleSettings};

    #[test]
    fn test_plugin_populates_volume_for_agent() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(NavConfig {
                lifecycle: LifecycleSettings {
                    unload_timer: 0.0,
                    ..LifecycleSettings::default()
                },
                ..NavConfig::default()
            })
            .add_plugins(NavigationPlugin);

        app.world_mut()
            .resource_mut::<VolumeManager>()
            .add_volume(UniformGridVolume::new(Vec3::ZERO, &GridSettings::default()));
        let agent = app
            .world_mut()
            .spawn((NavAgent, Transform::from_xyz(500.0, 500.0, 500.0)))
            .id();

        app.update();
        assert!(app.world().resource::<VolumeManager>().volume(0).unwrap().is_loaded());
        assert_eq!(app.world().resource::<VolumeManager>().agent_volume(), Some(0));

        app.world_mut().entity_mut(agent).insert(Transform::from_xyz(-5000.0, 0.0, 0.0));
        app.update();
        app.update();
        assert!(!app.world().resource::<VolumeManager>().volume(0).unwrap().is_loaded());
    }
}
