//! The rendering service the storage allocates GPU resources through.
//!
//! The storage only ever issues create, free and set-parameter calls; it never
//! reads anything back. [`HeadlessServer`] keeps bookkeeping in memory and is
//! what tests run against, [`GpuServer`] uploads real `wgpu` textures.

pub mod gpu;
pub mod headless;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ServerError;
use crate::maps::{TerrainImage, TexelFormat};

pub use gpu::GpuServer;
pub use headless::HeadlessServer;

/// Opaque handle to a resource owned by a [`RenderingServer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(pub(crate) u64);

impl Rid {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid#{}", self.0)
    }
}

/// Hands out increasing, never reused handles.
#[derive(Debug)]
pub struct RidAllocator {
    next: u64,
}

impl Default for RidAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl RidAllocator {
    pub fn allocate(&mut self) -> Rid {
        let rid = Rid(self.next);
        self.next += 1;
        rid
    }
}

/// A value pushed to a material parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f32),
    /// `None` unbinds the parameter.
    Texture(Option<Rid>),
    Vec3Array(Vec<[f32; 3]>),
    Vec4Array(Vec<[f32; 4]>),
}

impl ParamValue {
    pub fn as_texture(&self) -> Option<Option<Rid>> {
        match self {
            Self::Texture(rid) => Some(*rid),
            _ => None,
        }
    }
}

/// Shape of an allocated texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: TexelFormat,
    pub layered: bool,
}

/// Parameters and shader binding of one material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialRecord {
    pub shader: Option<Rid>,
    pub params: BTreeMap<String, ParamValue>,
}

/// Resource allocation and material parameter service.
pub trait RenderingServer {
    /// Upload one image as a plain 2D texture.
    fn texture_2d_create(&mut self, image: &TerrainImage) -> Result<Rid, ServerError>;

    /// Upload a non-empty sequence of same-size, same-format images as one
    /// 2D array texture, layer `i` holding `layers[i]`.
    fn texture_2d_layered_create(&mut self, layers: &[&TerrainImage]) -> Result<Rid, ServerError>;

    /// Release any resource. Unknown handles are ignored.
    fn free_rid(&mut self, rid: Rid);

    fn material_create(&mut self) -> Rid;

    fn shader_create(&mut self) -> Rid;

    fn shader_set_code(&mut self, shader: Rid, code: &str);

    fn material_set_shader(&mut self, material: Rid, shader: Rid);

    fn material_set_param(&mut self, material: Rid, name: &str, value: ParamValue);
}

/// Check that every layer matches the first one in size and format.
pub fn validate_layers(layers: &[&TerrainImage]) -> Result<TextureInfo, ServerError> {
    let first = layers.first().ok_or(ServerError::EmptyLayers)?;
    let (width, height) = first.dimensions();
    let format = first.format();

    for (index, layer) in layers.iter().enumerate().skip(1) {
        let (found_width, found_height) = layer.dimensions();
        let found_format = layer.format();
        if (found_width, found_height, found_format) != (width, height, format) {
            return Err(ServerError::LayerMismatch {
                index,
                width,
                height,
                format,
                found_width,
                found_height,
                found_format,
            });
        }
    }

    Ok(TextureInfo {
        width,
        height,
        layers: layers.len() as u32,
        format,
        layered: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_layers_accepts_uniform_set() {
        let a = TerrainImage::new_control(32);
        let b = TerrainImage::new_control(32);
        let info = validate_layers(&[&a, &b]).unwrap();
        assert_eq!(info.layers, 2);
        assert_eq!((info.width, info.height), (32, 32));
        assert_eq!(info.format, TexelFormat::Rgba8Unorm);
    }

    #[test]
    fn test_validate_layers_reports_first_mismatch() {
        let a = TerrainImage::new_control(32);
        let b = TerrainImage::new_control(32);
        let c = TerrainImage::new_height(32, 0.0);
        match validate_layers(&[&a, &b, &c]) {
            Err(ServerError::LayerMismatch { index, found_format, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(found_format, TexelFormat::R32Float);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_layers_rejects_empty() {
        assert!(matches!(validate_layers(&[]), Err(ServerError::EmptyLayers)));
    }
}
