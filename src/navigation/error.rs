use thiserror::Error;

/// Errors surfaced by the navigation core.
///
/// "No path" is deliberately absent: searches report it as `Ok(None)` and the
/// caller decides whether to retry, move directly or idle.
#[derive(Debug, Error)]
pub enum NavError {
    /// A handle outlived the storage it pointed into (volume unloaded or
    /// repopulated, octree rebuilt or reloaded).
    #[error("stale handle: generation {generation}, container is at {current}")]
    StaleHandle { generation: u32, current: u32 },

    #[error("grid volume is not loaded")]
    VolumeNotLoaded,

    #[error("cannot save while a search is in progress")]
    SearchInProgress,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("not an octree snapshot (bad magic)")]
    BadMagic,

    #[error("octree snapshot version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("octree snapshot checksum {stored:#010x} does not match {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("corrupt octree snapshot: {0}")]
    Corrupt(String),

    #[error("octree snapshot uses min node size {saved_min_node_size} and expansion {saved_expand:?}, settings want {min_node_size} and {expand:?}")]
    LayoutMismatch {
        saved_min_node_size: f32,
        saved_expand: [u32; 3],
        min_node_size: f32,
        expand: [u32; 3],
    },

    #[error("config parse error: {0}")]
    Config(#[from] ron::error::SpannedError),
}

pub type NavResult<T> = Result<T, NavError>;
