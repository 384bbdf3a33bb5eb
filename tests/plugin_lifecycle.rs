use bevy::prelude::*;
use nav3d::navigation::config::{GridSettings, LifecycleSettings};
use nav3d::navigation::{
    BoxWorld, GridPathfinder, NavAgent, NavConfig, NavTarget, NavigationDecision, NavigationPlugin, UniformGridVolume,
    VolumeManager,
};

fn app_with_two_volumes() -> App {
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

    let settings = GridSettings::default();
    let mut manager = app.world_mut().resource_mut::<VolumeManager>();
    manager.add_volume(UniformGridVolume::new(Vec3::ZERO, &settings));
    manager.add_volume(UniformGridVolume::new(Vec3::new(5000.0, 0.0, 0.0), &settings));
    app
}

#[test]
fn test_shared_volume_uses_grid() {
    let mut app = app_with_two_volumes();
    app.world_mut().spawn((NavAgent, Transform::from_xyz(150.0, 150.0, 150.0)));
    app.world_mut().spawn((NavTarget, Transform::from_xyz(850.0, 150.0, 150.0)));
    app.update();

    let world = BoxWorld::new();
    let mut manager = app.world_mut().resource_mut::<VolumeManager>();
    let target = Vec3::new(850.0, 150.0, 150.0);
    assert_eq!(manager.decide_navigation(target), NavigationDecision::Grid { volume: 0 });
    assert!(!manager.volume(1).unwrap().is_loaded(), "nobody is in the far volume");

    let direction = manager
        .next_step_direction(&GridPathfinder::default(), &world, Vec3::splat(150.0), target, 40.0)
        .unwrap();
    assert!(direction.x > 0.9, "open volume steers straight at the target, got {:?}", direction);
}

#[test]
fn test_target_in_other_volume_heads_for_entry_point() {
    let mut app = app_with_two_volumes();
    app.world_mut().spawn((NavAgent, Transform::from_xyz(150.0, 150.0, 150.0)));
    let entry = Vec3::new(5050.0, 500.0, 500.0);
    let target = app.world_mut().spawn((NavTarget, Transform::from_translation(entry))).id();
    app.update();

    // The target wanders deeper; the agent still aims for where it came in.
    let deeper = Vec3::new(5800.0, 500.0, 500.0);
    app.world_mut().entity_mut(target).insert(Transform::from_translation(deeper));
    app.update();

    let manager = app.world().resource::<VolumeManager>();
    assert_eq!(manager.target_volume(), Some(1));
    assert_eq!(manager.decide_navigation(deeper), NavigationDecision::MoveToward(entry));
}

#[test]
fn test_uncovered_agent_and_target_move_directly() {
    let mut app = app_with_two_volumes();
    let agent = app.world_mut().spawn((NavAgent, Transform::from_xyz(150.0, 150.0, 150.0))).id();
    app.update();
    assert!(app.world().resource::<VolumeManager>().volume(0).unwrap().is_loaded());

    app.world_mut().entity_mut(agent).insert(Transform::from_xyz(-3000.0, 0.0, 0.0));
    app.update();

    let manager = app.world().resource::<VolumeManager>();
    assert!(manager.volumes().iter().all(|v| !v.is_loaded()), "zero unload timer drops volumes at once");
    let far = Vec3::new(-9000.0, 0.0, 0.0);
    assert_eq!(manager.decide_navigation(far), NavigationDecision::Direct(far));
}
