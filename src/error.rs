//! Error types for the terrain storage and the rendering service boundary.

use crate::maps::{MapType, TexelFormat};
use crate::region::RegionOffset;

/// Failures reported by a [`crate::server::RenderingServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("layered texture requested with no layers")]
    EmptyLayers,

    #[error(
        "layer {index} is {found_width}x{found_height} {found_format}, \
         expected {width}x{height} {format}"
    )]
    LayerMismatch {
        index: usize,
        width: u32,
        height: u32,
        format: TexelFormat,
        found_width: u32,
        found_height: u32,
        found_format: TexelFormat,
    },

    #[error("{count} layers exceeds the device limit of {max}")]
    TooManyLayers { count: u32, max: u32 },

    #[error("texture side {size} exceeds the device limit of {max}")]
    TextureTooLarge { size: u32, max: u32 },

    #[error("no compatible GPU adapter")]
    NoAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(String),
}

/// Errors produced by storage operations.
///
/// Precondition violations leave every region and layer sequence untouched.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("a region already exists at offset {0}")]
    RegionExists(RegionOffset),

    #[error("no region exists at offset {0}")]
    RegionMissing(RegionOffset),

    #[error("offset {offset} falls outside the {size}x{size} region map")]
    OutsideRegionMap { offset: RegionOffset, size: u32 },

    #[error("region limit of {0} reached")]
    RegionLimit(usize),

    #[error("existing regions are {found}px but the region size is {expected}px")]
    RegionSizeMismatch { expected: u32, found: u32 },

    #[error("expected {expected} maps, got {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("{map_type} maps must be {}, got {found}", map_type.format())]
    MapFormat { map_type: MapType, found: TexelFormat },

    #[error("offset {0} appears more than once")]
    DuplicateOffset(RegionOffset),

    #[error("unsupported region size {0} (expected a power of two in 64..=2048)")]
    InvalidRegionSize(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("image encoding error: {0}")]
    Encoding(String),

    #[error("rendering server error: {0}")]
    Server(#[from] ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
