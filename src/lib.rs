//! Terrain storage library
//!
//! Region registry, layer registry and the GPU caches generated from them.
//! Re-exports modules for use by the binary and tools.

pub mod config;
pub mod error;
pub mod generated;
pub mod layer;
pub mod maps;
pub mod noise_texture;
pub mod persist;
pub mod region;
pub mod region_map;
pub mod server;
pub mod signal;
pub mod storage;

pub use config::{NoiseParams, RegionSize, StorageConfig};
pub use error::{Result, ServerError, StorageError};
pub use layer::{LayerMaterial, LayerMaterialData};
pub use maps::{MapType, TerrainImage};
pub use region::{RegionKey, RegionOffset};
pub use server::{GpuServer, HeadlessServer, RenderingServer, Rid};
pub use storage::{StorageEvent, TerrainStorage};
