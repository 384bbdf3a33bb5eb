//! Jump Point Search expansion for grid volumes.
//!
//! Straight runs are resolved with parallel sweeps: the closest place where an
//! obstruction beside the travel lane begins or ends becomes the jump point.
//! Diagonal runs are walked cell by cell, probing six derived directions for
//! forced neighbors and jumping along their component runs; a cell from which
//! any component run finds a jump point is itself one.
//!
//! Relaxation compares F only (`relax_by_f_only`). Textbook JPS relaxes on G;
//! this variant keeps the cheaper test and can settle on different paths.

use bevy::prelude::*;
use smallvec::SmallVec;
use std::f32::consts::FRAC_PI_4;

use super::node::step_cost;
use super::search::{is_cell_blocked, volume_coord, GridSearch};
use super::volume::UniformGridVolume;
use crate::navigation::error::NavResult;
use crate::navigation::oracle::{Hit, SpatialOracle};

pub(super) fn expand(
    search: &mut GridSearch,
    volume: &mut UniformGridVolume,
    oracle: &dyn SpatialOracle,
    current: usize,
) -> NavResult<()> {
    let neighbors: SmallVec<[u32; 26]> = volume.ensure_neighbors(current)?.iter().copied().collect();
    let (current_coord, current_g) = {
        let node = volume.get_node(volume_coord(volume, current))?;
        (node.coord, node.g)
    };

    for neighbor in neighbors {
        let direction = volume_coord(volume, neighbor as usize) - current_coord;
        let Some(jump_index) = jump(search, volume, oracle, current_coord, direction) else {
            continue;
        };
        if jump_index == current || search.closed.contains(jump_index) {
            continue;
        }

        let jump_coord = volume_coord(volume, jump_index);
        let steps = (jump_coord - current_coord).abs().max_element().max(1) as f32;
        let tentative_g = current_g + step_cost(current_coord, jump_coord) * steps;
        let h = volume.coord_to_world(jump_coord).distance(search.goal_world);
        let tentative_f = tentative_g + h;

        let node = &mut volume.nodes_mut()?[jump_index];
        if !relax_by_f_only(node.f, tentative_f) {
            continue;
        }
        node.g = tentative_g;
        node.h = h;
        node.f = tentative_f;

        let index = jump_index as u32;
        search.came_from.insert(index, current as u32);
        search.touch(index);
        search.push_open(index, tentative_f);
    }
    Ok(())
}

/// A jump point is only updated when the new F strictly improves on the old.
#[inline]
fn relax_by_f_only(existing_f: f32, tentative_f: f32) -> bool {
    existing_f > tentative_f
}

/// Next jump point from `current` travelling along `direction`, as a flat index.
fn jump(
    search: &GridSearch,
    volume: &UniformGridVolume,
    oracle: &dyn SpatialOracle,
    current: IVec3,
    direction: IVec3,
) -> Option<usize> {
    let request = &search.request;
    let goal_index = search.goal.index();
    let goal_coord = volume_coord(volume, goal_index);

    let max_sweep = max_sweep_distance(volume, current, direction);
    if max_sweep < 1.0 {
        return None;
    }
    let travel = world_direction(volume, direction.as_vec3());
    let origin_start = volume.coord_to_world(current);
    let origin_hit = oracle.sweep(
        origin_start,
        origin_start + travel * max_sweep,
        request.agent_radius,
        &request.filter,
    );
    if hits_target(search, origin_hit.as_ref()) {
        return Some(goal_index);
    }

    let changed = (direction.x != 0) as u8 + (direction.y != 0) as u8 + (direction.z != 0) as u8;
    if changed == 1 {
        jump_straight(search, volume, oracle, current, direction, goal_coord, travel, origin_hit, max_sweep)
    } else {
        jump_diagonal(search, volume, oracle, current, direction, goal_coord)
    }
}

#[allow(clippy::too_many_arguments)]
fn jump_straight(
    search: &GridSearch,
    volume: &UniformGridVolume,
    oracle: &dyn SpatialOracle,
    current: IVec3,
    direction: IVec3,
    goal_coord: IVec3,
    travel: Vec3,
    origin_hit: Option<Hit>,
    max_sweep: f32,
) -> Option<usize> {
    let request = &search.request;
    let origin_distance = origin_hit.map(|h| h.distance).unwrap_or(max_sweep);

    // Goal straight ahead and nothing in between.
    let to_goal = goal_coord - current;
    let along = to_goal.dot(direction);
    if along > 0 && to_goal == direction * along {
        let goal_distance = (along as f32 - 0.5) * volume.division_size();
        if origin_hit.is_none() || origin_distance >= goal_distance {
            return Some(search.goal.index());
        }
    }

    let cell = volume.division_size();
    let mut closest: Option<(f32, IVec3)> = None;
    for offset in perpendicular_offsets(direction) {
        let lane = current + offset + direction;
        if !volume.in_bounds(lane) {
            continue;
        }
        let candidate = if is_cell_blocked(volume, oracle, request, lane) {
            lane_opening(search, volume, oracle, current, offset, direction)
        } else {
            let lane_start = volume.coord_to_world(lane);
            let Some(hit) = oracle.sweep(
                lane_start,
                lane_start + travel * max_sweep,
                request.agent_radius,
                &request.filter,
            ) else {
                continue;
            };
            if hits_target(search, Some(&hit)) {
                return Some(search.goal.index());
            }
            let steps = (hit.distance / cell).round() as i32;
            Some((hit.distance, current + direction * steps))
        };

        let Some((distance, coord)) = candidate else {
            continue;
        };
        if distance <= 0.0 || distance >= origin_distance - 1.0 || coord == current {
            continue;
        }
        if is_cell_blocked(volume, oracle, request, coord) {
            continue;
        }
        if closest.map_or(true, |(d, _)| distance < d) {
            closest = Some((distance, coord));
        }
    }

    let (_, coord) = closest?;
    trace!("[JPS] Straight jump {:?} -> {:?}", current, coord);
    Some(volume.index_of(coord))
}

/// Where a lane that starts obstructed opens up again.
///
/// Returns the cell on the travel line beside the first free lane cell, with
/// its distance from `current`.
fn lane_opening(
    search: &GridSearch,
    volume: &UniformGridVolume,
    oracle: &dyn SpatialOracle,
    current: IVec3,
    offset: IVec3,
    direction: IVec3,
) -> Option<(f32, IVec3)> {
    let mut step = 2;
    loop {
        let lane = current + offset + direction * step;
        if !volume.in_bounds(lane) {
            return None;
        }
        if !is_cell_blocked(volume, oracle, &search.request, lane) {
            let along = step - 1;
            return Some((along as f32 * volume.division_size(), current + direction * along));
        }
        step += 1;
    }
}

fn jump_diagonal(
    search: &GridSearch,
    volume: &UniformGridVolume,
    oracle: &dyn SpatialOracle,
    current: IVec3,
    direction: IVec3,
    goal_coord: IVec3,
) -> Option<usize> {
    let request = &search.request;
    let probes = forced_directions(direction.as_vec3());
    let components = component_directions(direction);
    let probe_length = volume.division_size();

    let mut step = 1;
    loop {
        let here = current + direction * step;
        if !volume.in_bounds(here) {
            return None;
        }
        let here_index = volume.index_of(here);
        if here == goal_coord {
            return Some(here_index);
        }
        if is_cell_blocked(volume, oracle, request, here) {
            return None;
        }
        let next = here + direction;
        if volume.in_bounds(next) && is_cell_blocked(volume, oracle, request, next) {
            return Some(here_index);
        }

        let here_world = volume.coord_to_world(here);
        for probe in &probes {
            let end = here_world + world_direction(volume, *probe) * probe_length;
            if let Some(hit) = oracle.sweep(here_world, end, request.agent_radius, &request.filter) {
                if hits_target(search, Some(&hit)) {
                    return Some(search.goal.index());
                }
                return Some(here_index);
            }
        }

        // Any jump point reachable along a component run makes this cell one.
        for sub in &components {
            if jump(search, volume, oracle, here, *sub).is_some() {
                return Some(here_index);
            }
        }
        step += 1;
    }
}

fn hits_target(search: &GridSearch, hit: Option<&Hit>) -> bool {
    match (search.request.target, hit.and_then(|h| h.obstacle)) {
        (Some(target), Some(obstacle)) => target == obstacle,
        _ => false,
    }
}

/// Straight runs along each axis of a diagonal, then (for a three-axis
/// diagonal) the two-axis runs made from pairs of those axes.
fn component_directions(direction: IVec3) -> SmallVec<[IVec3; 6]> {
    let axes: SmallVec<[IVec3; 3]> = [IVec3::X, IVec3::Y, IVec3::Z]
        .into_iter()
        .enumerate()
        .filter(|(axis, _)| direction[*axis] != 0)
        .map(|(axis, unit)| unit * direction[axis])
        .collect();

    let mut runs: SmallVec<[IVec3; 6]> = axes.iter().copied().collect();
    if axes.len() == 3 {
        runs.extend([axes[0] + axes[1], axes[0] + axes[2], axes[1] + axes[2]]);
    }
    runs
}

/// The 8 lane offsets around a straight run, spanning the two constant axes.
fn perpendicular_offsets(direction: IVec3) -> SmallVec<[IVec3; 8]> {
    let (u, v) = if direction.x != 0 {
        (IVec3::Y, IVec3::Z)
    } else if direction.y != 0 {
        (IVec3::X, IVec3::Z)
    } else {
        (IVec3::X, IVec3::Y)
    };
    let mut offsets = SmallVec::new();
    for a in -1..=1 {
        for b in -1..=1 {
            if a != 0 || b != 0 {
                offsets.push(u * a + v * b);
            }
        }
    }
    offsets
}

/// The diagonal rotated ±45° about the up axis (Y) and flattened, plus each of
/// those tilted up and down.
fn forced_directions(direction: Vec3) -> SmallVec<[Vec3; 6]> {
    let mut probes = SmallVec::new();
    for angle in [FRAC_PI_4, -FRAC_PI_4] {
        let mut flat = Quat::from_rotation_y(angle) * direction;
        flat.y = 0.0;
        let Some(flat) = flat.try_normalize() else {
            continue;
        };
        probes.push(flat);
        probes.push((flat + Vec3::Y).normalize());
        probes.push((flat - Vec3::Y).normalize());
    }
    probes
}

/// Lattice direction expressed in world space, normalized.
fn world_direction(volume: &UniformGridVolume, local: Vec3) -> Vec3 {
    (volume.local_to_world(local) - volume.local_to_world(Vec3::ZERO)).normalize_or_zero()
}

/// Distance from `current` to the last cell of the volume along `direction`.
fn max_sweep_distance(volume: &UniformGridVolume, current: IVec3, direction: IVec3) -> f32 {
    let last = volume.divisions() - IVec3::ONE;
    let edge = IVec3::new(
        edge_component(current.x, direction.x, last.x),
        edge_component(current.y, direction.y, last.y),
        edge_component(current.z, direction.z, last.z),
    );
    volume.coord_to_world(current).distance(volume.coord_to_world(edge))
}

#[inline]
fn edge_component(current: i32, direction: i32, last: i32) -> i32 {
    match direction.signum() {
        1 => last,
        -1 => 0,
        _ => current,
    }
}
