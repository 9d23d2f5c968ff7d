//! Storage configuration: region size, height range, atlas size and noise
//! blending parameters.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Side length of a region in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RegionSize {
    Size64 = 64,
    Size128 = 128,
    Size256 = 256,
    Size512 = 512,
    #[default]
    Size1024 = 1024,
    Size2048 = 2048,
}

impl RegionSize {
    pub fn all() -> &'static [Self] {
        &[
            Self::Size64,
            Self::Size128,
            Self::Size256,
            Self::Size512,
            Self::Size1024,
            Self::Size2048,
        ]
    }

    pub fn pixels(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RegionSize {
    type Error = StorageError;

    fn try_from(value: u32) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|size| size.pixels() == value)
            .ok_or(StorageError::InvalidRegionSize(value))
    }
}

impl From<RegionSize> for u32 {
    fn from(size: RegionSize) -> Self {
        size.pixels()
    }
}

impl fmt::Display for RegionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pixels())
    }
}

/// Parameters for blending procedural noise into areas without regions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// UV scale applied when sampling the noise texture (0.0-1.0)
    pub scale: f32,
    /// Height contribution of the noise (0.0-1.0)
    pub height: f32,
    /// Falloff exponent of the blend weight (0.1-10.0)
    pub fade: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            height: 0.5,
            fade: 5.0,
        }
    }
}

/// Largest supported side of the region lookup atlas, in cells.
pub const MAX_REGION_MAP_SIZE: u32 = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub region_size: RegionSize,
    /// World-space height of a height-map value of 1.0
    pub max_height: u32,
    /// Side of the region lookup atlas in cells
    pub region_map_size: u32,
    pub noise: NoiseParams,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region_size: RegionSize::default(),
            max_height: 512,
            region_map_size: 16,
            noise: NoiseParams::default(),
        }
    }
}

impl StorageConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region_map_size < 2
            || self.region_map_size > MAX_REGION_MAP_SIZE
            || self.region_map_size % 2 != 0
        {
            return Err(StorageError::InvalidConfig(format!(
                "region_map_size must be an even number in 2..={}, got {}",
                MAX_REGION_MAP_SIZE, self.region_map_size
            )));
        }
        if self.max_height == 0 {
            return Err(StorageError::InvalidConfig(
                "max_height must be at least 1".to_string(),
            ));
        }
        if !(0.1..=10.0).contains(&self.noise.fade) {
            return Err(StorageError::InvalidConfig(format!(
                "noise fade must be in 0.1..=10.0, got {}",
                self.noise.fade
            )));
        }
        if !(0.0..=1.0).contains(&self.noise.scale) {
            return Err(StorageError::InvalidConfig(format!(
                "noise scale must be in 0.0..=1.0, got {}",
                self.noise.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.noise.height) {
            return Err(StorageError::InvalidConfig(format!(
                "noise height must be in 0.0..=1.0, got {}",
                self.noise.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_size_accepts_powers_of_two() {
        for size in [64, 128, 256, 512, 1024, 2048] {
            assert_eq!(RegionSize::try_from(size).unwrap().pixels(), size);
        }
    }

    #[test]
    fn test_region_size_rejects_unsupported() {
        for size in [0, 32, 100, 4096] {
            assert!(matches!(
                RegionSize::try_from(size),
                Err(StorageError::InvalidRegionSize(v)) if v == size
            ));
        }
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config = StorageConfig::from_json_str(r#"{ "region_size": 256 }"#).unwrap();
        assert_eq!(config.region_size, RegionSize::Size256);
        assert_eq!(config.max_height, 512);
        assert_eq!(config.region_map_size, 16);
        assert_eq!(config.noise, NoiseParams::default());
    }

    #[test]
    fn test_config_rejects_bad_region_size() {
        assert!(StorageConfig::from_json_str(r#"{ "region_size": 300 }"#).is_err());
    }

    #[test]
    fn test_config_rejects_noise_out_of_range() {
        let config = StorageConfig {
            noise: NoiseParams {
                scale: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_odd_region_map() {
        let config = StorageConfig {
            region_map_size: 15,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StorageError::InvalidConfig(_))));
    }
}
