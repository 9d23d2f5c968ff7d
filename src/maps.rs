//! CPU-side rasters: per-region height and control maps, the region lookup
//! atlas, and layer textures.
//!
//! Every raster is backed by an `image::ImageBuffer`. [`TerrainImage`] tags it
//! with the texel layout the rendering service uploads it as.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GrayAlphaImage, GrayImage, ImageBuffer, Luma, LumaA, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Single-channel floating point raster used for heights.
pub type HeightImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Texel layouts understood by the rendering service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TexelFormat {
    /// 32-bit float, one channel (height maps)
    R32Float,
    /// 8-bit RGBA (control maps, layer textures)
    Rgba8Unorm,
    /// 8-bit two channel (region lookup atlas)
    Rg8Unorm,
    /// 8-bit one channel (blend noise)
    R8Unorm,
}

impl TexelFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::R32Float => 4,
            Self::Rgba8Unorm => 4,
            Self::Rg8Unorm => 2,
            Self::R8Unorm => 1,
        }
    }
}

impl fmt::Display for TexelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R32Float => write!(f, "r32float"),
            Self::Rgba8Unorm => write!(f, "rgba8unorm"),
            Self::Rg8Unorm => write!(f, "rg8unorm"),
            Self::R8Unorm => write!(f, "r8unorm"),
        }
    }
}

/// Which per-region map an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapType {
    Height,
    Control,
}

impl MapType {
    pub fn all() -> &'static [Self] {
        &[Self::Height, Self::Control]
    }

    pub fn format(self) -> TexelFormat {
        match self {
            Self::Height => TexelFormat::R32Float,
            Self::Control => TexelFormat::Rgba8Unorm,
        }
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Height => write!(f, "height"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// A raster tagged with its texel layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EncodedImage", into = "EncodedImage")]
pub enum TerrainImage {
    Height(HeightImage),
    Rgba(RgbaImage),
    RegionMap(GrayAlphaImage),
    Mask(GrayImage),
}

impl TerrainImage {
    /// Square height map filled with a constant elevation.
    pub fn new_height(size: u32, value: f32) -> Self {
        Self::Height(ImageBuffer::from_pixel(size, size, Luma([value])))
    }

    /// Square control map with every channel zero except alpha.
    pub fn new_control(size: u32) -> Self {
        Self::Rgba(RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255])))
    }

    /// Blank map of the given type, as created for a freshly added region.
    pub fn blank(map_type: MapType, size: u32) -> Self {
        match map_type {
            MapType::Height => Self::new_height(size, 0.0),
            MapType::Control => Self::new_control(size),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Height(img) => img.dimensions(),
            Self::Rgba(img) => img.dimensions(),
            Self::RegionMap(img) => img.dimensions(),
            Self::Mask(img) => img.dimensions(),
        }
    }

    pub fn format(&self) -> TexelFormat {
        match self {
            Self::Height(_) => TexelFormat::R32Float,
            Self::Rgba(_) => TexelFormat::Rgba8Unorm,
            Self::RegionMap(_) => TexelFormat::Rg8Unorm,
            Self::Mask(_) => TexelFormat::R8Unorm,
        }
    }

    /// Raw texel bytes in row-major order, ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Height(img) => bytemuck::cast_slice(img.as_raw().as_slice()),
            Self::Rgba(img) => img.as_raw(),
            Self::RegionMap(img) => img.as_raw(),
            Self::Mask(img) => img.as_raw(),
        }
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width() * self.format().bytes_per_texel()
    }

    /// Rebuild an image from raw texel bytes. Returns `None` when the byte
    /// count does not match the dimensions.
    pub fn from_raw(format: TexelFormat, width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_texel() as usize;
        if bytes.len() != expected {
            return None;
        }
        match format {
            TexelFormat::R32Float => {
                let texels: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<f32>)
                    .collect();
                ImageBuffer::from_raw(width, height, texels).map(Self::Height)
            }
            TexelFormat::Rgba8Unorm => RgbaImage::from_raw(width, height, bytes).map(Self::Rgba),
            TexelFormat::Rg8Unorm => {
                ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, bytes).map(Self::RegionMap)
            }
            TexelFormat::R8Unorm => GrayImage::from_raw(width, height, bytes).map(Self::Mask),
        }
    }

    pub fn as_height(&self) -> Option<&HeightImage> {
        match self {
            Self::Height(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_height_mut(&mut self) -> Option<&mut HeightImage> {
        match self {
            Self::Height(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_rgba(&self) -> Option<&RgbaImage> {
        match self {
            Self::Rgba(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_rgba_mut(&mut self) -> Option<&mut RgbaImage> {
        match self {
            Self::Rgba(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_region_map(&self) -> Option<&GrayAlphaImage> {
        match self {
            Self::RegionMap(img) => Some(img),
            _ => None,
        }
    }
}

/// Serialized form of a [`TerrainImage`]: texel bytes as base64.
#[derive(Serialize, Deserialize)]
struct EncodedImage {
    format: TexelFormat,
    width: u32,
    height: u32,
    data: String,
}

impl From<TerrainImage> for EncodedImage {
    fn from(image: TerrainImage) -> Self {
        Self {
            format: image.format(),
            width: image.width(),
            height: image.height(),
            data: STANDARD.encode(image.as_bytes()),
        }
    }
}

impl TryFrom<EncodedImage> for TerrainImage {
    type Error = StorageError;

    fn try_from(encoded: EncodedImage) -> Result<Self, Self::Error> {
        let bytes = STANDARD
            .decode(encoded.data.as_bytes())
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        TerrainImage::from_raw(encoded.format, encoded.width, encoded.height, bytes).ok_or_else(|| {
            StorageError::Encoding(format!(
                "{}x{} {} image has the wrong byte length",
                encoded.width, encoded.height, encoded.format
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_maps() {
        let height = TerrainImage::blank(MapType::Height, 64);
        assert_eq!(height.dimensions(), (64, 64));
        assert_eq!(height.format(), TexelFormat::R32Float);
        assert!(height.as_height().unwrap().pixels().all(|p| p.0[0] == 0.0));

        let control = TerrainImage::blank(MapType::Control, 64);
        assert_eq!(control.format(), TexelFormat::Rgba8Unorm);
        assert_eq!(*control.as_rgba().unwrap().get_pixel(10, 10), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_byte_view_matches_format() {
        let height = TerrainImage::new_height(8, 1.5);
        assert_eq!(height.as_bytes().len(), 8 * 8 * 4);
        assert_eq!(height.bytes_per_row(), 32);
        assert_eq!(&height.as_bytes()[..4], &1.5f32.to_ne_bytes());
    }

    #[test]
    fn test_from_raw_rejects_short_buffer() {
        assert!(TerrainImage::from_raw(TexelFormat::Rgba8Unorm, 4, 4, vec![0; 10]).is_none());
    }

    #[test]
    fn test_json_encoding_preserves_height_values() {
        let mut image = TerrainImage::new_height(4, 0.0);
        image.as_height_mut().unwrap().put_pixel(1, 2, Luma([0.25]));

        let json = serde_json::to_string(&image).unwrap();
        let decoded: TerrainImage = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, image);
        assert_eq!(decoded.as_height().unwrap().get_pixel(1, 2).0[0], 0.25);
    }
}
