//! Region lookup atlas.
//!
//! A small two-channel image with one cell per grid offset, centred so that
//! offset `(0, 0)` lands on cell `(size/2, size/2)`. The first channel holds
//! `index + 1` of the region occupying the cell (0 for none); the second
//! holds the noise blend weight, 255 meaning fully populated.

use image::{GrayAlphaImage, LumaA};
use log::warn;

use crate::region::RegionOffset;

/// Texel value of a cell with no region.
pub const EMPTY_CELL: LumaA<u8> = LumaA([0, 255]);

/// Atlas cell for `offset`, or `None` when it falls outside a `size`-sided
/// atlas.
pub fn cell_for(offset: RegionOffset, size: u32) -> Option<(u32, u32)> {
    let half = (size / 2) as i64;
    let x = offset.x as i64 + half;
    let y = offset.y as i64 + half;
    let range = 0..size as i64;
    (range.contains(&x) && range.contains(&y)).then_some((x as u32, y as u32))
}

pub fn fits(offset: RegionOffset, size: u32) -> bool {
    cell_for(offset, size).is_some()
}

/// Encode `offsets` into a fresh atlas. The atlas is always rebuilt from
/// scratch since one removal can shift every index.
pub fn build_region_map(offsets: &[RegionOffset], size: u32) -> GrayAlphaImage {
    let mut image = GrayAlphaImage::from_pixel(size, size, EMPTY_CELL);

    for (index, offset) in offsets.iter().enumerate() {
        let Some((x, y)) = cell_for(*offset, size) else {
            warn!("region {} at {} lies outside the {}x{} region map", index, offset, size, size);
            continue;
        };
        let Ok(value) = u8::try_from(index + 1) else {
            warn!("region {} cannot be encoded in the region map", index);
            continue;
        };
        image.put_pixel(x, y, LumaA([value, 255]));
    }

    image
}

/// Region index stored at `offset`, if any.
pub fn decode_region_map(image: &GrayAlphaImage, offset: RegionOffset) -> Option<usize> {
    let (x, y) = cell_for(offset, image.width())?;
    match image.get_pixel(x, y).0[0] {
        0 => None,
        value => Some(value as usize - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_maps_to_centre() {
        assert_eq!(cell_for(RegionOffset::new(0, 0), 16), Some((8, 8)));
        assert_eq!(cell_for(RegionOffset::new(-8, 7), 16), Some((0, 15)));
    }

    #[test]
    fn test_out_of_bounds_offsets() {
        assert_eq!(cell_for(RegionOffset::new(8, 0), 16), None);
        assert_eq!(cell_for(RegionOffset::new(0, -9), 16), None);
        assert!(!fits(RegionOffset::new(i32::MAX, i32::MIN), 16));
    }

    #[test]
    fn test_empty_map_is_sentinel_filled() {
        let image = build_region_map(&[], 16);
        assert!(image.pixels().all(|p| *p == EMPTY_CELL));
    }

    #[test]
    fn test_cells_decode_to_region_index() {
        let offsets = [
            RegionOffset::new(0, 0),
            RegionOffset::new(1, 1),
            RegionOffset::new(-3, 5),
        ];
        let image = build_region_map(&offsets, 16);

        for (index, offset) in offsets.iter().enumerate() {
            assert_eq!(decode_region_map(&image, *offset), Some(index));
        }
        assert_eq!(decode_region_map(&image, RegionOffset::new(2, 2)), None);
        assert_eq!(*image.get_pixel(9, 9), LumaA([2, 255]));
    }

    #[test]
    fn test_out_of_bounds_entries_are_skipped() {
        let offsets = [RegionOffset::new(100, 0), RegionOffset::new(0, 0)];
        let image = build_region_map(&offsets, 16);
        assert_eq!(decode_region_map(&image, RegionOffset::new(0, 0)), Some(1));
        assert_eq!(image.pixels().filter(|p| **p != EMPTY_CELL).count(), 1);
    }
}
