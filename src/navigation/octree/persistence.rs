//! On-disk format for built octrees.
//!
//! A file is one zlib stream holding a bincode [`PersistedOctree`]. Node
//! records are encoded individually so a streaming tree can keep them
//! encoded and decode only the nodes a lookup walks through.

use bevy::prelude::*;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use super::index::OctreeIndex;
use super::node::{ChildRef, NodeId, OctreeNode};
use crate::navigation::error::{NavError, NavResult};
use crate::navigation::oracle::SpatialOracle;

pub const OCTREE_FORMAT_VERSION: u32 = 1;
const MAGIC: [u8; 4] = *b"N3DO";

/// Geometry needed to interpret the records.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TreeLayout {
    pub min_node_size: f32,
    pub volume_size: f32,
    pub origin: Vec3,
    pub expand_volume: [u32; 3],
}

#[derive(Serialize, Deserialize)]
struct PersistedOctree {
    magic: [u8; 4],
    version: u32,
    /// CRC32 over the record bytes, in order.
    checksum: u32,
    layout: TreeLayout,
    root: u32,
    records: Vec<Vec<u8>>,
}

/// One node as stored. Ids are dense breadth-first indices.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct NodeRecord {
    center: Vec3,
    half_extents: Vec3,
    occupied: bool,
    avoid: bool,
    parent: Option<u32>,
    children: Vec<ChildRef>,
    neighbor_positions: Vec<Vec3>,
}

impl NodeRecord {
    fn into_node(self) -> OctreeNode {
        let mut node = OctreeNode::new(self.center, self.half_extents.x, self.parent.map(NodeId));
        node.bounds.half_extents = self.half_extents;
        node.occupied = self.occupied;
        node.avoid = self.avoid;
        node.children = self.children.into_iter().map(Some).collect();
        node.neighbor_positions = self.neighbor_positions;
        node
    }
}

/// Encoded node records of a streaming tree.
pub(crate) struct RecordStore {
    records: Vec<Vec<u8>>,
}

impl RecordStore {
    pub(crate) fn decode(&self, id: NodeId) -> NavResult<OctreeNode> {
        let bytes = self
            .records
            .get(id.index())
            .ok_or_else(|| NavError::Corrupt(format!("record {} out of range", id.0)))?;
        let record: NodeRecord = bincode::deserialize(bytes)?;
        Ok(record.into_node())
    }
}

/// Result of a load attempt that did not fail outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { nodes: usize },
    NotFound,
}

fn checksum(records: &[Vec<u8>]) -> u32 {
    let mut crc = Crc::new();
    for record in records {
        crc.update(record);
    }
    crc.sum()
}

impl OctreeIndex {
    /// Write the tree to its configured save path.
    ///
    /// Failures are logged and reported as `false`; nothing is retried.
    pub fn save(&mut self) -> bool {
        let path = self.settings().save_path();
        match self.save_to(&path) {
            Ok(nodes) => {
                info!("[PERSIST] Saved {} nodes to {}", nodes, path.display());
                true
            }
            Err(e) => {
                error!("[PERSIST] Failed to save octree to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Write the tree to `path`, returning the number of nodes stored.
    pub fn save_to(&mut self, path: &Path) -> NavResult<usize> {
        if self.is_live() {
            return Err(NavError::SearchInProgress);
        }
        let persisted = self.encode()?;
        let nodes = persisted.records.len();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        let mut encoder = ZlibEncoder::new(writer, Compression::default());
        bincode::serialize_into(&mut encoder, &persisted)?;
        encoder.finish()?.flush()?;
        Ok(nodes)
    }

    fn encode(&mut self) -> NavResult<PersistedOctree> {
        if self.is_streaming() {
            for index in 0..self.slots.len() {
                self.materialize(NodeId(index as u32))?;
            }
        }

        let order = self.breadth_first();
        let remap: FxHashMap<NodeId, u32> = order
            .iter()
            .enumerate()
            .map(|(dense, id)| (*id, dense as u32))
            .collect();
        let relabel = |id: NodeId| -> NavResult<u32> {
            remap
                .get(&id)
                .copied()
                .ok_or_else(|| NavError::Corrupt(format!("node {} unreachable from root", id.0)))
        };

        let mut records = Vec::with_capacity(order.len());
        for &id in &order {
            let Some(node) = self.node(id) else {
                continue;
            };
            let children = node
                .children()
                .map(|c| Ok(ChildRef { id: NodeId(relabel(c.id)?), bounds: c.bounds }))
                .collect::<NavResult<Vec<_>>>()?;
            let record = NodeRecord {
                center: node.center(),
                half_extents: node.bounds.half_extents,
                occupied: node.occupied,
                avoid: node.avoid,
                parent: node.parent.and_then(|p| remap.get(&p).copied()),
                children,
                neighbor_positions: node.neighbor_positions.clone(),
            };
            records.push(bincode::serialize(&record)?);
        }

        Ok(PersistedOctree {
            magic: MAGIC,
            version: OCTREE_FORMAT_VERSION,
            checksum: checksum(&records),
            layout: TreeLayout {
                min_node_size: self.settings().min_node_size,
                volume_size: self.volume_size,
                origin: self.origin,
                expand_volume: self.settings().expand_volume,
            },
            root: 0,
            records,
        })
    }

    fn read_file(path: &Path) -> NavResult<Option<PersistedOctree>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        let reader = BufReader::new(file);
        let mut decoder = ZlibDecoder::new(reader);
        let persisted: PersistedOctree = bincode::deserialize_from(&mut decoder)?;

        if persisted.magic != MAGIC {
            return Err(NavError::BadMagic);
        }
        if persisted.version != OCTREE_FORMAT_VERSION {
            return Err(NavError::VersionMismatch {
                found: persisted.version,
                expected: OCTREE_FORMAT_VERSION,
            });
        }
        let computed = checksum(&persisted.records);
        if computed != persisted.checksum {
            return Err(NavError::ChecksumMismatch {
                stored: persisted.checksum,
                computed,
            });
        }
        if persisted.records.is_empty() {
            return Ok(None);
        }
        Ok(Some(persisted))
    }

    /// Replace the tree with an encoded one. Every slot starts unmaterialized.
    ///
    /// A snapshot cut at a different leaf size or expansion is refused and the
    /// current tree is left alone.
    fn install(&mut self, persisted: PersistedOctree) -> NavResult<usize> {
        let layout = &persisted.layout;
        let settings = self.settings();
        if (layout.min_node_size - settings.min_node_size).abs() > f32::EPSILON
            || layout.expand_volume != settings.expand_volume
        {
            return Err(NavError::LayoutMismatch {
                saved_min_node_size: layout.min_node_size,
                saved_expand: layout.expand_volume,
                min_node_size: settings.min_node_size,
                expand: settings.expand_volume,
            });
        }

        let count = persisted.records.len();
        self.clear();
        self.slots = (0..count).map(|_| None).collect();
        self.root = Some(NodeId(persisted.root));
        self.origin = persisted.layout.origin;
        self.volume_size = persisted.layout.volume_size;
        self.store = Some(RecordStore { records: persisted.records });
        Ok(count)
    }

    /// Load every node from `path` and re-resolve all edges.
    pub fn load_from(&mut self, path: &Path) -> NavResult<LoadOutcome> {
        let Some(persisted) = Self::read_file(path)? else {
            return Ok(LoadOutcome::NotFound);
        };
        let nodes = self.install(persisted)?;
        let result = self.materialize_all();
        if let Err(e) = result {
            self.clear();
            return Err(e);
        }
        self.store = None;
        debug!("[PERSIST] Loaded {} nodes from {}", nodes, path.display());
        Ok(LoadOutcome::Loaded { nodes })
    }

    fn materialize_all(&mut self) -> NavResult<()> {
        for index in 0..self.slots.len() {
            self.materialize(NodeId(index as u32))?;
        }
        for index in 0..self.slots.len() {
            let id = NodeId(index as u32);
            if self.node(id).is_some_and(OctreeNode::is_navigable) {
                self.get_neighbors(id)?;
            }
        }
        Ok(())
    }

    /// Open `path` without decoding nodes. Lookups decode on demand.
    pub fn open_streaming(&mut self, path: &Path) -> NavResult<LoadOutcome> {
        let Some(persisted) = Self::read_file(path)? else {
            return Ok(LoadOutcome::NotFound);
        };
        let nodes = self.install(persisted)?;
        debug!("[PERSIST] Opened {} encoded nodes from {}", nodes, path.display());
        Ok(LoadOutcome::Loaded { nodes })
    }

    /// Load from the configured save path.
    pub fn load(&mut self) -> NavResult<LoadOutcome> {
        let path = self.settings().save_path();
        self.load_from(&path)
    }

    /// Load the saved tree, rebuilding from the oracle if there is none or it
    /// cannot be read. Returns true if the saved tree was used.
    pub fn load_or_build(&mut self, oracle: &dyn SpatialOracle) -> bool {
        let path = self.settings().save_path();
        match self.load_from(&path) {
            Ok(LoadOutcome::Loaded { nodes }) => {
                info!("[PERSIST] Loaded {} nodes from {}", nodes, path.display());
                return true;
            }
            Ok(LoadOutcome::NotFound) => {
                info!("[PERSIST] No saved octree at {}, building", path.display());
            }
            Err(e) => {
                error!("[PERSIST] Could not load {}: {}. Rebuilding", path.display(), e);
            }
        }
        self.rebuild(oracle);
        false
    }
}
