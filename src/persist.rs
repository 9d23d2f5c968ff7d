//! Save and load of terrain storage contents.
//!
//! A snapshot holds the configuration, every region's offset and maps, the
//! layer materials and the noise texture. GPU handles are never saved; they
//! are regenerated when a snapshot is restored.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::layer::{LayerMaterial, LayerMaterialData};
use crate::maps::TerrainImage;
use crate::region::{RegionOffset, RegionRegistry};
use crate::server::RenderingServer;
use crate::storage::TerrainStorage;

/// Format version for forward compatibility
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub version: u32,
    pub config: StorageConfig,
    pub region_offsets: Vec<RegionOffset>,
    pub height_maps: Vec<TerrainImage>,
    pub control_maps: Vec<TerrainImage>,
    #[serde(default)]
    pub layers: Vec<LayerMaterialData>,
    #[serde(default)]
    pub noise_texture: Option<TerrainImage>,
}

impl StorageSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

impl<S: RenderingServer> TerrainStorage<S> {
    /// Capture the CPU-side contents of the storage.
    pub fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config().clone(),
            region_offsets: self.region_offsets().to_vec(),
            height_maps: self.height_maps().to_vec(),
            control_maps: self.control_maps().to_vec(),
            layers: self.layers().iter().map(|l| l.data()).collect(),
            noise_texture: self.noise_texture().cloned(),
        }
    }

    /// Build a storage on `server` from a snapshot and regenerate every
    /// cache.
    pub fn from_snapshot(server: S, snapshot: StorageSnapshot) -> Result<Self> {
        let regions = RegionRegistry::from_parts(
            snapshot.region_offsets,
            snapshot.height_maps,
            snapshot.control_maps,
        )?;
        let layers = snapshot
            .layers
            .into_iter()
            .map(|data| Rc::new(LayerMaterial::from_data(data)))
            .collect();

        let mut storage = Self::with_contents(server, snapshot.config, regions, layers)?;
        if snapshot.noise_texture.is_some() {
            storage.set_noise_texture(snapshot.noise_texture)?;
        }
        storage.sync()?;
        Ok(storage)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.snapshot().to_json()?)?;
        info!("Saved {} regions to {}", self.region_count(), path.display());
        Ok(())
    }

    pub fn load(server: S, path: &Path) -> Result<Self> {
        let snapshot = StorageSnapshot::from_json(&fs::read_to_string(path)?)?;
        let storage = Self::from_snapshot(server, snapshot)?;
        info!("Loaded {} regions from {}", storage.region_count(), path.display());
        Ok(storage)
    }
}
