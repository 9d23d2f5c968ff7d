//! In-memory rendering service.
//!
//! Tracks every live handle, material parameter and shader without touching
//! a GPU. Used by the test suite and as the fallback when no adapter exists.

use std::collections::HashMap;

use log::warn;

use super::{
    validate_layers, MaterialRecord, ParamValue, RenderingServer, Rid, RidAllocator, TextureInfo,
};
use crate::error::ServerError;
use crate::maps::TerrainImage;

#[derive(Debug, Default)]
pub struct HeadlessServer {
    ids: RidAllocator,
    textures: HashMap<Rid, TextureInfo>,
    materials: HashMap<Rid, MaterialRecord>,
    shaders: HashMap<Rid, String>,
    textures_created: usize,
    textures_freed: usize,
}

impl HeadlessServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self, rid: Rid) -> Option<&TextureInfo> {
        self.textures.get(&rid)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn textures_freed(&self) -> usize {
        self.textures_freed
    }

    pub fn material(&self, rid: Rid) -> Option<&MaterialRecord> {
        self.materials.get(&rid)
    }

    pub fn param(&self, material: Rid, name: &str) -> Option<&ParamValue> {
        self.materials.get(&material)?.params.get(name)
    }

    pub fn shader_code(&self, shader: Rid) -> Option<&str> {
        self.shaders.get(&shader).map(String::as_str)
    }

    pub fn is_live(&self, rid: Rid) -> bool {
        self.textures.contains_key(&rid)
            || self.materials.contains_key(&rid)
            || self.shaders.contains_key(&rid)
    }
}

impl RenderingServer for HeadlessServer {
    fn texture_2d_create(&mut self, image: &TerrainImage) -> Result<Rid, ServerError> {
        let rid = self.ids.allocate();
        self.textures.insert(
            rid,
            TextureInfo {
                width: image.width(),
                height: image.height(),
                layers: 1,
                format: image.format(),
                layered: false,
            },
        );
        self.textures_created += 1;
        Ok(rid)
    }

    fn texture_2d_layered_create(&mut self, layers: &[&TerrainImage]) -> Result<Rid, ServerError> {
        let info = validate_layers(layers)?;
        let rid = self.ids.allocate();
        self.textures.insert(rid, info);
        self.textures_created += 1;
        Ok(rid)
    }

    fn free_rid(&mut self, rid: Rid) {
        if self.textures.remove(&rid).is_some() {
            self.textures_freed += 1;
        } else if self.materials.remove(&rid).is_none() && self.shaders.remove(&rid).is_none() {
            warn!("free_rid: {} is not a live handle", rid);
        }
    }

    fn material_create(&mut self) -> Rid {
        let rid = self.ids.allocate();
        self.materials.insert(rid, MaterialRecord::default());
        rid
    }

    fn shader_create(&mut self) -> Rid {
        let rid = self.ids.allocate();
        self.shaders.insert(rid, String::new());
        rid
    }

    fn shader_set_code(&mut self, shader: Rid, code: &str) {
        match self.shaders.get_mut(&shader) {
            Some(slot) => *slot = code.to_string(),
            None => warn!("shader_set_code: unknown shader {}", shader),
        }
    }

    fn material_set_shader(&mut self, material: Rid, shader: Rid) {
        match self.materials.get_mut(&material) {
            Some(record) => record.shader = Some(shader),
            None => warn!("material_set_shader: unknown material {}", material),
        }
    }

    fn material_set_param(&mut self, material: Rid, name: &str, value: ParamValue) {
        match self.materials.get_mut(&material) {
            Some(record) => {
                record.params.insert(name.to_string(), value);
            }
            None => warn!("material_set_param: unknown material {}", material),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layered_create_records_shape() {
        let mut server = HeadlessServer::new();
        let a = TerrainImage::new_height(64, 0.0);
        let b = TerrainImage::new_height(64, 1.0);

        let rid = server.texture_2d_layered_create(&[&a, &b]).unwrap();
        let info = server.texture(rid).unwrap();
        assert_eq!(info.layers, 2);
        assert!(info.layered);
        assert_eq!(server.textures_created(), 1);
    }

    #[test]
    fn test_free_rid_releases_texture() {
        let mut server = HeadlessServer::new();
        let rid = server.texture_2d_create(&TerrainImage::new_control(16)).unwrap();
        assert!(server.is_live(rid));

        server.free_rid(rid);
        assert!(!server.is_live(rid));
        assert_eq!(server.textures_freed(), 1);
        assert_eq!(server.live_textures(), 0);
    }

    #[test]
    fn test_material_params_are_recorded() {
        let mut server = HeadlessServer::new();
        let material = server.material_create();
        let shader = server.shader_create();
        server.shader_set_code(shader, "shader_type spatial;");
        server.material_set_shader(material, shader);
        server.material_set_param(material, "region_size", ParamValue::Int(1024));

        assert_eq!(server.param(material, "region_size"), Some(&ParamValue::Int(1024)));
        assert_eq!(server.material(material).unwrap().shader, Some(shader));
        assert_eq!(server.shader_code(shader), Some("shader_type spatial;"));
    }
}
