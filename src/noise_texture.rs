//! Procedural blend noise for areas of the world without a region.
//!
//! The material mixes this texture in where the region map weight falls off,
//! so terrain outside authored regions still has some relief.

use image::{GrayImage, Luma};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::maps::TerrainImage;

/// Noise generation parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendNoiseParams {
    /// Side of the generated texture in texels
    pub size: u32,
    pub seed: u32,
    /// Base frequency in cycles across the texture
    pub frequency: f64,
    /// Number of noise octaves
    pub octaves: usize,
    /// Amplitude decay per octave (0.0-1.0)
    pub persistence: f64,
}

impl Default for BlendNoiseParams {
    fn default() -> Self {
        Self {
            size: 256,
            seed: 0,
            frequency: 4.0,
            octaves: 5,
            persistence: 0.5,
        }
    }
}

/// Generate a single-channel fBm texture with values mapped to `0..=255`.
pub fn generate_blend_noise(params: &BlendNoiseParams) -> TerrainImage {
    let fbm: Fbm<Perlin> = Fbm::new(params.seed)
        .set_octaves(params.octaves)
        .set_frequency(params.frequency)
        .set_persistence(params.persistence);

    let size = params.size.max(1);
    let inv = 1.0 / size as f64;
    let image = GrayImage::from_fn(size, size, |x, y| {
        let value = fbm.get([x as f64 * inv, y as f64 * inv]);
        // fBm output is roughly in [-1, 1]
        let normalized = (value * 0.5 + 0.5).clamp(0.0, 1.0);
        Luma([(normalized * 255.0).round() as u8])
    });

    TerrainImage::Mask(image)
}
