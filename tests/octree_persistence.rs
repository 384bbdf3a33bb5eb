use bevy::prelude::*;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use nav3d::navigation::config::OctreeSettings;
use nav3d::navigation::{Bounds, BoxWorld, LoadOutcome, NavError, OctreeIndex, OctreePathfinder};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

type NodeSignature = ([i64; 3], [i64; 3], bool, bool, Vec<[i64; 3]>);

fn key(v: Vec3) -> [i64; 3] {
    [
        (v.x * 1000.0).round() as i64,
        (v.y * 1000.0).round() as i64,
        (v.z * 1000.0).round() as i64,
    ]
}

/// Layout-independent description of every node, sorted.
fn signatures(index: &OctreeIndex) -> Vec<NodeSignature> {
    let mut out: Vec<NodeSignature> = index
        .node_ids()
        .filter_map(|id| index.node(id))
        .map(|node| {
            let mut neighbors: Vec<[i64; 3]> = node.neighbor_positions().iter().map(|p| key(*p)).collect();
            neighbors.sort();
            (key(node.center()), key(node.bounds.half_extents), node.occupied, node.avoid, neighbors)
        })
        .collect();
    out.sort();
    out
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nav3d-persist-{}", fastrand::u64(..)));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn settings(save_dir: PathBuf) -> OctreeSettings {
    OctreeSettings {
        single_volume_size: 6400.0,
        save_dir,
        world_name: "cube".to_string(),
        ..OctreeSettings::default()
    }
}

fn cube_world() -> BoxWorld {
    let mut world = BoxWorld::new();
    world.add_box(Bounds::cube(Vec3::ZERO, 800.0));
    world.add_box(Bounds::from_min_max(Vec3::new(1200.0, -3200.0, -3200.0), Vec3::new(1300.0, 3200.0, 0.0)));
    world
}

/// Rewrite the decompressed payload of a saved file.
fn tamper(path: &PathBuf, edit: impl FnOnce(&mut Vec<u8>)) {
    let mut raw = Vec::new();
    ZlibDecoder::new(fs::File::open(path).unwrap()).read_to_end(&mut raw).unwrap();
    edit(&mut raw);
    let mut encoder = ZlibEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap();
}

#[test]
fn test_eager_load_reproduces_tree() {
    let dir = temp_dir();
    let world = cube_world();
    let mut built = OctreeIndex::new(settings(dir.clone()));
    built.rebuild(&world);
    let path = built.settings().save_path();
    let saved = built.save_to(&path).unwrap();

    let mut loaded = OctreeIndex::new(settings(dir.clone()));
    assert_eq!(loaded.load_from(&path).unwrap(), LoadOutcome::Loaded { nodes: saved });

    assert!(!loaded.is_streaming());
    assert_eq!(loaded.volume_size(), built.volume_size());
    assert_eq!(loaded.origin(), built.origin());
    assert_eq!(loaded.stats(), built.stats());
    assert_eq!(signatures(&loaded), signatures(&built));

    let start = Vec3::new(-2000.0, 0.0, 0.0);
    let end = Vec3::new(2000.0, 0.0, 2000.0);
    let mut pathfinder = OctreePathfinder::new(loaded.settings());
    let route = pathfinder.find_path(&mut loaded, start, end).unwrap().expect("loaded tree is searchable");
    assert_eq!(route.waypoints.last(), Some(&end));

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_streaming_load_decodes_on_demand() {
    let dir = temp_dir();
    let world = cube_world();
    let mut built = OctreeIndex::new(settings(dir.clone()));
    built.rebuild(&world);
    let path = built.settings().save_path();
    let saved = built.save_to(&path).unwrap();

    let mut streaming = OctreeIndex::new(settings(dir.clone()));
    assert_eq!(streaming.open_streaming(&path).unwrap(), LoadOutcome::Loaded { nodes: saved });
    assert!(streaming.is_streaming());
    assert_eq!(streaming.stats().node_count, 0);

    let leaf = streaming.find_and_load_node(Vec3::splat(2500.0)).unwrap().expect("free leaf");
    let decoded = streaming.stats().node_count;
    assert!(decoded > 0 && decoded < saved, "only the descent path is decoded ({} of {})", decoded, saved);
    assert!(streaming.node(leaf).unwrap().is_navigable());
    assert!(streaming.find_and_load_node(Vec3::ZERO).unwrap().is_none(), "inside the cube");

    let mut pathfinder = OctreePathfinder::new(streaming.settings());
    let end = Vec3::new(2000.0, 0.0, 2000.0);
    let route = pathfinder
        .find_path(&mut streaming, Vec3::new(-2000.0, 0.0, 0.0), end)
        .unwrap()
        .expect("streaming tree is searchable");
    assert_eq!(route.waypoints.last(), Some(&end));

    // Re-saving a partially decoded tree writes every node.
    let copy = dir.join("copy.octree");
    assert_eq!(streaming.save_to(&copy).unwrap(), saved);
    let mut reloaded = OctreeIndex::new(settings(dir.clone()));
    reloaded.load_from(&copy).unwrap();
    assert_eq!(signatures(&reloaded), signatures(&built));

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_missing_or_empty_file_is_not_found() {
    let dir = temp_dir();
    let mut index = OctreeIndex::new(settings(dir.clone()));
    assert_eq!(index.load_from(&dir.join("absent.octree")).unwrap(), LoadOutcome::NotFound);

    let empty = dir.join("empty.octree");
    fs::write(&empty, b"").unwrap();
    assert_eq!(index.load_from(&empty).unwrap(), LoadOutcome::NotFound);
    assert_eq!(index.open_streaming(&empty).unwrap(), LoadOutcome::NotFound);

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_version_mismatch_is_rejected() {
    let dir = temp_dir();
    let mut built = OctreeIndex::new(settings(dir.clone()));
    built.rebuild(&cube_world());
    let path = built.settings().save_path();
    built.save_to(&path).unwrap();

    // Fixed-width little-endian u32 right after the 4-byte magic.
    tamper(&path, |raw| raw[4..8].copy_from_slice(&99u32.to_le_bytes()));

    let mut index = OctreeIndex::new(settings(dir.clone()));
    match index.load_from(&path) {
        Err(NavError::VersionMismatch { found, .. }) => assert_eq!(found, 99),
        other => panic!("expected version mismatch, got {:?}", other),
    }
    assert!(index.root().is_none(), "a failed load leaves no tree behind");

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_corrupt_files_are_rejected() {
    let dir = temp_dir();
    let mut built = OctreeIndex::new(settings(dir.clone()));
    built.rebuild(&cube_world());
    let path = built.settings().save_path();
    built.save_to(&path).unwrap();
    let pristine = fs::read(&path).unwrap();

    tamper(&path, |raw| raw[8] ^= 0xff);
    let mut index = OctreeIndex::new(settings(dir.clone()));
    assert!(matches!(index.load_from(&path), Err(NavError::ChecksumMismatch { .. })));

    fs::write(&path, &pristine).unwrap();
    tamper(&path, |raw| raw[0] = b'X');
    assert!(matches!(index.load_from(&path), Err(NavError::BadMagic)));

    fs::write(&path, b"not a zlib stream").unwrap();
    assert!(index.load_from(&path).is_err());

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_load_or_build_falls_back_to_rebuild() {
    let dir = temp_dir();
    let world = cube_world();

    let mut first = OctreeIndex::new(settings(dir.clone()));
    assert!(!first.load_or_build(&world), "nothing saved yet");
    assert!(first.save());

    let mut second = OctreeIndex::new(settings(dir.clone()));
    assert!(second.load_or_build(&world));
    assert_eq!(signatures(&second), signatures(&first));

    let path = first.settings().save_path();
    tamper(&path, |raw| raw[4..8].copy_from_slice(&2u32.to_le_bytes()));
    let mut third = OctreeIndex::new(settings(dir.clone()));
    assert!(!third.load_or_build(&world), "stale format is rebuilt");
    assert_eq!(third.stats(), first.stats());

    fs::remove_dir_all(dir).ok();
}

#[test]
fn test_layout_mismatch_is_rejected_and_rebuilt() {
    let dir = temp_dir();
    let world = cube_world();
    let mut built = OctreeIndex::new(settings(dir.clone()));
    built.rebuild(&world);
    assert!(built.save());

    let coarser = OctreeSettings {
        min_node_size: 200.0,
        ..settings(dir.clone())
    };
    let mut index = OctreeIndex::new(coarser.clone());
    let path = index.settings().save_path();
    match index.load_from(&path) {
        Err(NavError::LayoutMismatch {
            saved_min_node_size,
            min_node_size,
            ..
        }) => {
            assert_eq!(saved_min_node_size, 100.0);
            assert_eq!(min_node_size, 200.0);
        }
        other => panic!("expected layout mismatch, got {:?}", other),
    }
    assert!(matches!(index.open_streaming(&path), Err(NavError::LayoutMismatch { .. })));
    assert!(index.root().is_none());

    let expanded = OctreeSettings {
        expand_volume: [2, 1, 1],
        ..settings(dir.clone())
    };
    assert!(matches!(
        OctreeIndex::new(expanded).load_from(&path),
        Err(NavError::LayoutMismatch { .. })
    ));

    let mut rebuilt = OctreeIndex::new(coarser.clone());
    assert!(!rebuilt.load_or_build(&world), "a tree cut for other settings is rebuilt");
    let mut fresh = OctreeIndex::new(coarser);
    fresh.rebuild(&world);
    assert_eq!(rebuilt.stats(), fresh.stats());

    fs::remove_dir_all(dir).ok();
}
