//! Region registry: the ordered, index-aligned sequences of region offsets,
//! height maps and control maps.
//!
//! A region's index is its position in these sequences. Removing a region
//! shifts every later index down by one, so callers that need to hold on to a
//! region across edits should keep a [`RegionKey`] and [`RegionRegistry::resolve`]
//! it instead of caching an index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RegionSize;
use crate::error::{Result, StorageError};
use crate::maps::{MapType, TerrainImage};

/// Integer grid coordinate of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RegionOffset {
    pub x: i32,
    pub y: i32,
}

impl RegionOffset {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for RegionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Stable reference to a region that survives index shifts.
///
/// The generation distinguishes a region from a later one added at the same
/// offset after the first was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub offset: RegionOffset,
    generation: u64,
}

/// Grid offset of the region containing world position `(x, _, z)`.
///
/// Positions are rounded to the nearest cell, so region `(0, 0)` spans
/// `-size/2..size/2` on both axes.
pub fn offset_for(world_position: [f32; 3], region_size: RegionSize) -> RegionOffset {
    let size = region_size.pixels() as f32;
    RegionOffset::new(
        (world_position[0] / size + 0.5).floor() as i32,
        (world_position[2] / size + 0.5).floor() as i32,
    )
}

/// Maximum number of regions. The region map stores `index + 1` in one byte.
pub const MAX_REGIONS: usize = 255;

#[derive(Debug, Default)]
pub struct RegionRegistry {
    offsets: Vec<RegionOffset>,
    height_maps: Vec<TerrainImage>,
    control_maps: Vec<TerrainImage>,
    generations: Vec<u64>,
    next_generation: u64,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted sequences. All three must have the
    /// same length, offsets must be unique, and every map must have its
    /// type's format and the side of the first height map.
    pub fn from_parts(
        offsets: Vec<RegionOffset>,
        height_maps: Vec<TerrainImage>,
        control_maps: Vec<TerrainImage>,
    ) -> Result<Self> {
        if offsets.len() > MAX_REGIONS {
            return Err(StorageError::RegionLimit(MAX_REGIONS));
        }
        check_length(offsets.len(), height_maps.len())?;
        check_length(offsets.len(), control_maps.len())?;
        check_unique(&offsets)?;
        if let Some(side) = height_maps.first().map(TerrainImage::width) {
            check_maps(MapType::Height, &height_maps, side)?;
            check_maps(MapType::Control, &control_maps, side)?;
        }

        let count = offsets.len() as u64;
        Ok(Self {
            offsets,
            height_maps,
            control_maps,
            generations: (0..count).collect(),
            next_generation: count,
        })
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[RegionOffset] {
        &self.offsets
    }

    pub fn height_maps(&self) -> &[TerrainImage] {
        &self.height_maps
    }

    pub fn control_maps(&self) -> &[TerrainImage] {
        &self.control_maps
    }

    pub fn maps(&self, map_type: MapType) -> &[TerrainImage] {
        match map_type {
            MapType::Height => &self.height_maps,
            MapType::Control => &self.control_maps,
        }
    }

    /// Index of the region at `offset`, if any.
    pub fn index_of_offset(&self, offset: RegionOffset) -> Option<usize> {
        self.offsets.iter().position(|o| *o == offset)
    }

    pub fn index_of(&self, world_position: [f32; 3], region_size: RegionSize) -> Option<usize> {
        self.index_of_offset(offset_for(world_position, region_size))
    }

    pub fn has_region(&self, world_position: [f32; 3], region_size: RegionSize) -> bool {
        self.index_of(world_position, region_size).is_some()
    }

    pub fn key_at(&self, index: usize) -> Option<RegionKey> {
        Some(RegionKey {
            offset: *self.offsets.get(index)?,
            generation: *self.generations.get(index)?,
        })
    }

    /// Current index of the region `key` refers to, or `None` if that region
    /// has been removed.
    pub fn resolve(&self, key: RegionKey) -> Option<usize> {
        let index = self.index_of_offset(key.offset)?;
        (self.generations[index] == key.generation).then_some(index)
    }

    /// Append a region with blank maps of side `region_size`.
    pub fn insert(&mut self, offset: RegionOffset, region_size: RegionSize) -> Result<RegionKey> {
        if self.index_of_offset(offset).is_some() {
            return Err(StorageError::RegionExists(offset));
        }
        if self.len() >= MAX_REGIONS {
            return Err(StorageError::RegionLimit(MAX_REGIONS));
        }
        let side = region_size.pixels();
        if let Some(found) = self.height_maps.iter().map(TerrainImage::width).find(|w| *w != side) {
            return Err(StorageError::RegionSizeMismatch {
                expected: side,
                found,
            });
        }

        let generation = self.bump_generation();
        self.offsets.push(offset);
        self.height_maps.push(TerrainImage::blank(MapType::Height, side));
        self.control_maps.push(TerrainImage::blank(MapType::Control, side));
        self.generations.push(generation);

        Ok(RegionKey { offset, generation })
    }

    /// Remove the region at `offset` from all sequences and return its former
    /// index.
    pub fn remove(&mut self, offset: RegionOffset) -> Result<usize> {
        let index = self
            .index_of_offset(offset)
            .ok_or(StorageError::RegionMissing(offset))?;
        self.offsets.remove(index);
        self.height_maps.remove(index);
        self.control_maps.remove(index);
        self.generations.remove(index);
        Ok(index)
    }

    /// The map of `map_type` for the region at `index`.
    pub fn get_map(&self, index: usize, map_type: MapType) -> Option<&TerrainImage> {
        match map_type {
            MapType::Height => self.height_maps.get(index),
            MapType::Control => self.control_maps.get(index),
        }
    }

    /// Mutable access for painting. The owning storage must be told through
    /// `force_update_maps` afterwards.
    pub fn get_map_mut(&mut self, index: usize, map_type: MapType) -> Option<&mut TerrainImage> {
        match map_type {
            MapType::Height => self.height_maps.get_mut(index),
            MapType::Control => self.control_maps.get_mut(index),
        }
    }

    /// Side in texels shared by every map, `None` while empty.
    pub fn map_side(&self) -> Option<u32> {
        self.height_maps.first().map(TerrainImage::width)
    }

    /// Replace every map of one type. The count must match the region count
    /// and each map must keep the type's format and the current side.
    pub fn replace_maps(&mut self, map_type: MapType, maps: Vec<TerrainImage>) -> Result<()> {
        check_length(self.len(), maps.len())?;
        if let Some(side) = self.map_side() {
            check_maps(map_type, &maps, side)?;
        }
        match map_type {
            MapType::Height => self.height_maps = maps,
            MapType::Control => self.control_maps = maps,
        }
        Ok(())
    }

    /// Replace the offsets of every region in place.
    pub fn replace_offsets(&mut self, offsets: Vec<RegionOffset>) -> Result<()> {
        check_length(self.len(), offsets.len())?;
        check_unique(&offsets)?;
        self.offsets = offsets;
        Ok(())
    }
}

fn check_length(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(StorageError::LengthMismatch { expected, found });
    }
    Ok(())
}

fn check_maps(map_type: MapType, maps: &[TerrainImage], side: u32) -> Result<()> {
    for map in maps {
        if map.format() != map_type.format() {
            return Err(StorageError::MapFormat {
                map_type,
                found: map.format(),
            });
        }
        let (width, height) = map.dimensions();
        if (width, height) != (side, side) {
            return Err(StorageError::RegionSizeMismatch {
                expected: side,
                found: if width != side { width } else { height },
            });
        }
    }
    Ok(())
}

fn check_unique(offsets: &[RegionOffset]) -> Result<()> {
    for (i, offset) in offsets.iter().enumerate() {
        if offsets[..i].contains(offset) {
            return Err(StorageError::DuplicateOffset(*offset));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: RegionSize = RegionSize::Size64;

    fn assert_aligned(registry: &RegionRegistry) {
        assert_eq!(registry.offsets().len(), registry.height_maps().len());
        assert_eq!(registry.offsets().len(), registry.control_maps().len());
    }

    #[test]
    fn test_offset_rounds_to_nearest_cell() {
        let size = RegionSize::Size1024;
        assert_eq!(offset_for([0.0, 0.0, 0.0], size), RegionOffset::new(0, 0));
        assert_eq!(offset_for([511.0, 0.0, -511.0], size), RegionOffset::new(0, 0));
        assert_eq!(offset_for([512.0, 0.0, -513.0], size), RegionOffset::new(1, -1));
        assert_eq!(offset_for([1024.0, 99.0, 1024.0], size), RegionOffset::new(1, 1));
    }

    #[test]
    fn test_offset_ignores_height() {
        let size = RegionSize::Size256;
        assert_eq!(
            offset_for([300.0, -5000.0, 10.0], size),
            offset_for([300.0, 5000.0, 10.0], size)
        );
    }

    #[test]
    fn test_insert_then_lookup() {
        let mut registry = RegionRegistry::new();
        let key = registry.insert(RegionOffset::new(2, -1), SIZE).unwrap();

        assert_eq!(registry.index_of_offset(RegionOffset::new(2, -1)), Some(0));
        assert_eq!(registry.resolve(key), Some(0));
        assert!(registry.has_region([128.0, 0.0, -64.0], SIZE));
        assert_eq!(registry.get_map(0, MapType::Height).unwrap().width(), 64);
        assert_aligned(&registry);
    }

    #[test]
    fn test_duplicate_insert_is_rejected_without_mutation() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        let result = registry.insert(RegionOffset::new(0, 0), SIZE);

        assert!(matches!(result, Err(StorageError::RegionExists(_))));
        assert_eq!(registry.len(), 1);
        assert_aligned(&registry);
    }

    #[test]
    fn test_insert_rejects_size_change() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        let result = registry.insert(RegionOffset::new(1, 0), RegionSize::Size128);

        assert!(matches!(
            result,
            Err(StorageError::RegionSizeMismatch { expected: 128, found: 64 })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_compacts_indices() {
        let mut registry = RegionRegistry::new();
        for x in 0..3 {
            registry.insert(RegionOffset::new(x, 0), SIZE).unwrap();
        }
        let last = registry.key_at(2).unwrap();

        assert_eq!(registry.remove(RegionOffset::new(0, 0)).unwrap(), 0);
        assert_eq!(
            registry.offsets(),
            &[RegionOffset::new(1, 0), RegionOffset::new(2, 0)]
        );
        assert_eq!(registry.resolve(last), Some(1));
        assert_aligned(&registry);
    }

    #[test]
    fn test_remove_missing_region() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        assert!(matches!(
            registry.remove(RegionOffset::new(5, 5)),
            Err(StorageError::RegionMissing(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_key_after_readd() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        let key = registry.insert(RegionOffset::new(1, 0), SIZE).unwrap();

        registry.remove(RegionOffset::new(1, 0)).unwrap();
        assert_eq!(registry.resolve(key), None);

        let fresh = registry.insert(RegionOffset::new(1, 0), SIZE).unwrap();
        assert_eq!(registry.resolve(key), None);
        assert_eq!(registry.resolve(fresh), Some(1));
    }

    #[test]
    fn test_replace_maps_checks_length() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        let result = registry.replace_maps(MapType::Height, Vec::new());

        assert!(matches!(
            result,
            Err(StorageError::LengthMismatch { expected: 1, found: 0 })
        ));
        assert_eq!(registry.height_maps().len(), 1);
    }

    #[test]
    fn test_replace_maps_rejects_mixed_sizes_without_mutation() {
        let mut registry = RegionRegistry::new();
        registry.insert(RegionOffset::new(0, 0), SIZE).unwrap();
        registry.insert(RegionOffset::new(1, 0), SIZE).unwrap();

        let maps = vec![TerrainImage::new_height(64, 1.0), TerrainImage::new_height(32, 1.0)];
        assert!(matches!(
            registry.replace_maps(MapType::Height, maps),
            Err(StorageError::RegionSizeMismatch { expected: 64, found: 32 })
        ));
        let maps = vec![TerrainImage::new_control(64); 2];
        assert!(matches!(
            registry.replace_maps(MapType::Height, maps),
            Err(StorageError::MapFormat { map_type: MapType::Height, .. })
        ));
        assert!(registry
            .height_maps()
            .iter()
            .all(|m| *m == TerrainImage::new_height(64, 0.0)));
    }

    #[test]
    fn test_from_parts_checks_map_format_and_side() {
        let offsets = vec![RegionOffset::new(0, 0), RegionOffset::new(1, 0)];
        let controls = vec![TerrainImage::new_control(64); 2];

        let heights = vec![TerrainImage::new_control(64); 2];
        assert!(matches!(
            RegionRegistry::from_parts(offsets.clone(), heights, controls.clone()),
            Err(StorageError::MapFormat { .. })
        ));

        let heights = vec![TerrainImage::new_height(64, 0.0), TerrainImage::new_height(128, 0.0)];
        assert!(matches!(
            RegionRegistry::from_parts(offsets, heights, controls),
            Err(StorageError::RegionSizeMismatch { expected: 64, found: 128 })
        ));
    }

    #[test]
    fn test_from_parts_enforces_region_limit() {
        let count = MAX_REGIONS as i32 + 1;
        let offsets: Vec<_> = (0..count).map(|x| RegionOffset::new(x, 0)).collect();
        let heights = vec![TerrainImage::new_height(64, 0.0); count as usize];
        let controls = vec![TerrainImage::new_control(64); count as usize];
        assert!(matches!(
            RegionRegistry::from_parts(offsets, heights, controls),
            Err(StorageError::RegionLimit(MAX_REGIONS))
        ));
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let offsets = vec![RegionOffset::new(0, 0), RegionOffset::new(0, 0)];
        let heights = vec![TerrainImage::new_height(64, 0.0); 2];
        let controls = vec![TerrainImage::new_control(64); 2];
        assert!(matches!(
            RegionRegistry::from_parts(offsets, heights, controls),
            Err(StorageError::DuplicateOffset(_))
        ));
    }

    #[test]
    fn test_random_edit_sequences_keep_sequences_aligned() {
        let mut registry = RegionRegistry::new();
        let mut state: u32 = 12345;
        for _ in 0..500 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let x = ((state >> 8) % 5) as i32 - 2;
            let y = ((state >> 16) % 5) as i32 - 2;
            let offset = RegionOffset::new(x, y);
            if state & 1 == 0 {
                let _ = registry.insert(offset, SIZE);
            } else {
                let _ = registry.remove(offset);
            }
            assert_aligned(&registry);
            assert_eq!(registry.generations.len(), registry.len());
        }
    }
}
