use bevy::prelude::*;

use super::config::LifecycleSettings;
use super::error::NavResult;
use super::grid::{GridPathfinder, UniformGridVolume};
use super::oracle::SpatialOracle;

/// Presence tracking and deferred unload for one grid volume.
#[derive(Clone, Debug, Default)]
pub struct VolumeLifecycle {
    agent_inside: bool,
    target_inside: bool,
    /// Seconds since the volume became empty; `None` while occupied.
    unload_elapsed: Option<f32>,
    target_enter_location: Option<Vec3>,
}

impl VolumeLifecycle {
    pub fn agent_inside(&self) -> bool {
        self.agent_inside
    }

    pub fn target_inside(&self) -> bool {
        self.target_inside
    }

    pub fn unload_pending(&self) -> bool {
        self.unload_elapsed.is_some()
    }

    pub fn target_enter_location(&self) -> Option<Vec3> {
        self.target_enter_location
    }
}

impl UniformGridVolume {
    pub fn on_agent_enter(&mut self) {
        self.lifecycle.agent_inside = true;
        self.lifecycle.unload_elapsed = None;
        self.populate_nodes();
    }

    pub fn on_agent_exit(&mut self) {
        self.lifecycle.agent_inside = false;
        if !self.lifecycle.target_inside {
            self.lifecycle.unload_elapsed = Some(0.0);
        }
    }

    pub fn on_target_enter(&mut self, location: Vec3) {
        self.lifecycle.target_inside = true;
        self.lifecycle.target_enter_location = Some(location);
        self.lifecycle.unload_elapsed = None;
        self.populate_nodes();
    }

    pub fn on_target_exit(&mut self) {
        self.lifecycle.target_inside = false;
        self.lifecycle.target_enter_location = None;
        if !self.lifecycle.agent_inside {
            self.lifecycle.unload_elapsed = Some(0.0);
        }
    }

    /// Advance the unload timer. Returns true if the volume was unloaded.
    pub fn tick_lifecycle(&mut self, dt: f32, unload_timer: f32) -> bool {
        let Some(elapsed) = self.lifecycle.unload_elapsed.as_mut() else {
            return false;
        };
        *elapsed += dt;
        if *elapsed >= unload_timer {
            self.lifecycle.unload_elapsed = None;
            self.unload_nodes();
            return true;
        }
        false
    }
}

/// How an agent should move this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NavigationDecision {
    /// Agent and target share a loaded volume; path on its grid.
    Grid { volume: usize },
    /// Only the target is inside a volume; head for the point it entered at.
    MoveToward(Vec3),
    /// Neither is covered by a volume; go straight for the target.
    Direct(Vec3),
}

/// Owns every grid volume in the world and drives their lifecycles.
#[derive(Resource, Debug)]
pub struct VolumeManager {
    volumes: Vec<UniformGridVolume>,
    unload_timer: f32,
    agent_volume: Option<usize>,
    target_volume: Option<usize>,
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new(&LifecycleSettings::default())
    }
}

impl VolumeManager {
    pub fn new(settings: &LifecycleSettings) -> Self {
        Self {
            volumes: Vec::new(),
            unload_timer: settings.unload_timer,
            agent_volume: None,
            target_volume: None,
        }
    }

    pub fn add_volume(&mut self, volume: UniformGridVolume) -> usize {
        self.volumes.push(volume);
        self.volumes.len() - 1
    }

    pub fn volumes(&self) -> &[UniformGridVolume] {
        &self.volumes
    }

    pub fn volume(&self, index: usize) -> Option<&UniformGridVolume> {
        self.volumes.get(index)
    }

    pub fn volume_mut(&mut self, index: usize) -> Option<&mut UniformGridVolume> {
        self.volumes.get_mut(index)
    }

    pub fn agent_volume(&self) -> Option<usize> {
        self.agent_volume
    }

    pub fn target_volume(&self) -> Option<usize> {
        self.target_volume
    }

    /// Feed the latest agent and target positions and advance unload timers.
    pub fn update(&mut self, dt: f32, agent: Option<Vec3>, target: Option<Vec3>) {
        self.agent_volume = None;
        self.target_volume = None;

        for (index, volume) in self.volumes.iter_mut().enumerate() {
            let agent_in = agent.is_some_and(|p| volume.contains(p));
            let target_in = target.is_some_and(|p| volume.contains(p));

            match (volume.lifecycle.agent_inside(), agent_in) {
                (false, true) => {
                    info!("[VOLUME] Agent entered volume {}", index);
                    volume.on_agent_enter();
                }
                (true, false) => {
                    info!("[VOLUME] Agent left volume {}", index);
                    volume.on_agent_exit();
                }
                _ => {}
            }
            match (volume.lifecycle.target_inside(), target, target_in) {
                (false, Some(location), true) => volume.on_target_enter(location),
                (true, _, false) => volume.on_target_exit(),
                _ => {}
            }

            if volume.tick_lifecycle(dt, self.unload_timer) {
                info!("[VOLUME] Unloaded volume {} after {}s empty", index, self.unload_timer);
            }

            if agent_in && self.agent_volume.is_none() {
                self.agent_volume = Some(index);
            }
            if target_in && self.target_volume.is_none() {
                self.target_volume = Some(index);
            }
        }
    }

    pub fn decide_navigation(&self, target: Vec3) -> NavigationDecision {
        match (self.agent_volume, self.target_volume) {
            (Some(a), Some(t)) if a == t && self.volumes[a].is_loaded() => NavigationDecision::Grid { volume: a },
            (_, Some(t)) => match self.volumes[t].lifecycle.target_enter_location() {
                Some(entry) => NavigationDecision::MoveToward(entry),
                None => NavigationDecision::Direct(target),
            },
            _ => NavigationDecision::Direct(target),
        }
    }

    /// Single-step steering for an agent chasing a target.
    pub fn next_step_direction(
        &mut self,
        pathfinder: &GridPathfinder,
        oracle: &dyn SpatialOracle,
        agent: Vec3,
        target: Vec3,
        agent_radius: f32,
    ) -> NavResult<Vec3> {
        match self.decide_navigation(target) {
            NavigationDecision::Grid { volume } => {
                pathfinder.next_step_direction(&mut self.volumes[volume], oracle, agent, target, agent_radius)
            }
            NavigationDecision::MoveToward(point) | NavigationDecision::Direct(point) => {
                Ok((point - agent).normalize_or_zero())
            }
        }
    }
}
