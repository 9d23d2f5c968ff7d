//! Texture layers and the registry that wires them to the storage.
//!
//! A layer's position in the registry is its index in the albedo and normal
//! texture arrays and in the per-layer scalar arrays, so reordering layers
//! changes which material a control map selects.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::maps::TerrainImage;
use crate::server::validate_layers;
use crate::signal::{ListenerId, Signal};

/// The two change notifications a layer material emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerNotification {
    TextureChanged,
    ValueChanged,
}

impl LayerNotification {
    pub fn all() -> &'static [Self] {
        &[Self::TextureChanged, Self::ValueChanged]
    }
}

/// Plain data of a layer material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMaterialData {
    /// Albedo tint (RGBA)
    pub albedo: [f32; 4],
    /// Texture tiling (per-axis multiplier)
    pub uv_scale: [f32; 3],
    pub albedo_texture: Option<TerrainImage>,
    pub normal_texture: Option<TerrainImage>,
}

impl Default for LayerMaterialData {
    fn default() -> Self {
        Self {
            albedo: [1.0, 1.0, 1.0, 1.0],
            uv_scale: [1.0, 1.0, 1.0],
            albedo_texture: None,
            normal_texture: None,
        }
    }
}

/// A terrain layer material, shared by reference between the host and the
/// storage. Setters emit the matching notification.
#[derive(Debug, Default)]
pub struct LayerMaterial {
    data: RefCell<LayerMaterialData>,
    texture_changed: Signal<()>,
    value_changed: Signal<()>,
}

impl LayerMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: LayerMaterialData) -> Self {
        Self {
            data: RefCell::new(data),
            ..Default::default()
        }
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn data(&self) -> LayerMaterialData {
        self.data.borrow().clone()
    }

    pub fn albedo(&self) -> [f32; 4] {
        self.data.borrow().albedo
    }

    pub fn uv_scale(&self) -> [f32; 3] {
        self.data.borrow().uv_scale
    }

    pub fn albedo_texture(&self) -> Option<Ref<'_, TerrainImage>> {
        Ref::filter_map(self.data.borrow(), |d| d.albedo_texture.as_ref()).ok()
    }

    pub fn normal_texture(&self) -> Option<Ref<'_, TerrainImage>> {
        Ref::filter_map(self.data.borrow(), |d| d.normal_texture.as_ref()).ok()
    }

    pub fn texture(&self, which: LayerTexture) -> Option<Ref<'_, TerrainImage>> {
        match which {
            LayerTexture::Albedo => self.albedo_texture(),
            LayerTexture::Normal => self.normal_texture(),
        }
    }

    pub fn set_albedo(&self, albedo: [f32; 4]) {
        self.data.borrow_mut().albedo = albedo;
        self.value_changed.emit(&());
    }

    pub fn set_uv_scale(&self, uv_scale: [f32; 3]) {
        self.data.borrow_mut().uv_scale = uv_scale;
        self.value_changed.emit(&());
    }

    pub fn set_albedo_texture(&self, texture: Option<TerrainImage>) {
        self.data.borrow_mut().albedo_texture = texture;
        self.texture_changed.emit(&());
    }

    pub fn set_normal_texture(&self, texture: Option<TerrainImage>) {
        self.data.borrow_mut().normal_texture = texture;
        self.texture_changed.emit(&());
    }

    pub fn signal(&self, kind: LayerNotification) -> &Signal<()> {
        match kind {
            LayerNotification::TextureChanged => &self.texture_changed,
            LayerNotification::ValueChanged => &self.value_changed,
        }
    }

    pub fn is_connected(&self, kind: LayerNotification, id: ListenerId) -> bool {
        self.signal(kind).is_connected(id)
    }

    pub fn listener_count(&self, kind: LayerNotification) -> usize {
        self.signal(kind).listener_count()
    }
}

/// Which texture array a texture belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerTexture {
    Albedo,
    Normal,
}

impl LayerTexture {
    pub fn all() -> &'static [Self] {
        &[Self::Albedo, Self::Normal]
    }
}

/// Apply a `set_layer` edit to `layers`. Returns whether the list changed
/// and the layer that was removed or replaced, if any.
pub fn splice_layer(
    layers: &mut Vec<Rc<LayerMaterial>>,
    material: Option<Rc<LayerMaterial>>,
    index: usize,
) -> (bool, Option<Rc<LayerMaterial>>) {
    match (material, index < layers.len()) {
        (None, true) => (true, Some(layers.remove(index))),
        (Some(material), true) => (true, Some(std::mem::replace(&mut layers[index], material))),
        (Some(material), false) => {
            layers.push(material);
            (true, None)
        }
        (None, false) => (false, None),
    }
}

/// Check that the textures present in `layers` can share one texture array
/// per kind. Layers missing a texture are skipped.
pub fn check_layer_textures(layers: &[Rc<LayerMaterial>]) -> Result<(), ServerError> {
    for &which in LayerTexture::all() {
        let textures: Vec<Ref<'_, TerrainImage>> =
            layers.iter().filter_map(|layer| layer.texture(which)).collect();
        if textures.is_empty() {
            continue;
        }
        let images: Vec<&TerrainImage> = textures.iter().map(|t| &**t).collect();
        validate_layers(&images)?;
    }
    Ok(())
}

/// Ordered layer materials plus the storage's subscriptions to them.
///
/// Notifications are queued rather than handled inline; the owning storage
/// drains them with [`LayerRegistry::take_pending`].
#[derive(Debug)]
pub struct LayerRegistry {
    layers: Vec<Rc<LayerMaterial>>,
    listener: ListenerId,
    pending: Rc<RefCell<Vec<LayerNotification>>>,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            listener: ListenerId::next(),
            pending: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn layers(&self) -> &[Rc<LayerMaterial>] {
        &self.layers
    }

    pub fn get(&self, index: usize) -> Option<&Rc<LayerMaterial>> {
        self.layers.get(index)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Remove (`None`, in bounds), replace (`Some`, in bounds) or append
    /// (`Some`, out of bounds) a layer. Returns whether the set changed.
    pub fn set_layer(&mut self, material: Option<Rc<LayerMaterial>>, index: usize) -> bool {
        let (changed, displaced) = splice_layer(&mut self.layers, material, index);
        if let Some(layer) = displaced {
            self.unwire_if_absent(&layer);
        }
        changed
    }

    /// Replace the whole set. Layers that left the set are unsubscribed.
    pub fn set_layers(&mut self, layers: Vec<Rc<LayerMaterial>>) {
        let previous = std::mem::replace(&mut self.layers, layers);
        for layer in &previous {
            self.unwire_if_absent(layer);
        }
    }

    /// Subscribe once to both notifications of every layer. Returns the
    /// number of new subscriptions made.
    pub fn wire(&self) -> usize {
        let mut connected = 0;
        for layer in &self.layers {
            for &kind in LayerNotification::all() {
                let pending = Rc::clone(&self.pending);
                if layer
                    .signal(kind)
                    .connect(self.listener, move |_| pending.borrow_mut().push(kind))
                {
                    connected += 1;
                }
            }
        }
        connected
    }

    fn unwire(&self, layer: &LayerMaterial) {
        for &kind in LayerNotification::all() {
            layer.signal(kind).disconnect(self.listener);
        }
    }

    fn unwire_if_absent(&self, layer: &Rc<LayerMaterial>) {
        if !self.layers.iter().any(|l| Rc::ptr_eq(l, layer)) {
            self.unwire(layer);
        }
    }

    /// Drain queued notifications, collapsing repeats.
    pub fn take_pending(&self) -> Vec<LayerNotification> {
        let mut pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut seen = Vec::with_capacity(2);
        pending.retain(|kind| {
            if seen.contains(kind) {
                false
            } else {
                seen.push(*kind);
                true
            }
        });
        pending
    }

    pub fn uv_scales(&self) -> Vec<[f32; 3]> {
        self.layers.iter().map(|l| l.uv_scale()).collect()
    }

    pub fn colors(&self) -> Vec<[f32; 4]> {
        self.layers.iter().map(|l| l.albedo()).collect()
    }

    /// Borrow one texture of every layer in layer order. Returns the index of
    /// the first layer missing that texture on failure.
    pub fn textures(&self, which: LayerTexture) -> Result<Vec<Ref<'_, TerrainImage>>, usize> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| layer.texture(which).ok_or(index))
            .collect()
    }
}

impl Drop for LayerRegistry {
    fn drop(&mut self) {
        for layer in &self.layers {
            self.unwire(layer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wired_registry(count: usize) -> LayerRegistry {
        let mut registry = LayerRegistry::new();
        for _ in 0..count {
            registry.set_layer(Some(LayerMaterial::new().shared()), usize::MAX);
        }
        registry.wire();
        registry
    }

    #[test]
    fn test_wire_is_idempotent() {
        let registry = wired_registry(2);
        assert_eq!(registry.wire(), 0);
        for layer in registry.layers() {
            for &kind in LayerNotification::all() {
                assert_eq!(layer.listener_count(kind), 1);
                assert!(layer.is_connected(kind, registry.listener()));
            }
        }
    }

    #[test]
    fn test_remove_shifts_and_keeps_survivor_subscriptions() {
        let mut registry = wired_registry(2);
        let first = Rc::clone(&registry.layers()[0]);
        let second = Rc::clone(&registry.layers()[1]);

        assert!(registry.set_layer(None, 0));
        registry.wire();

        assert_eq!(registry.len(), 1);
        assert!(Rc::ptr_eq(&registry.layers()[0], &second));
        for &kind in LayerNotification::all() {
            assert_eq!(first.listener_count(kind), 0);
            assert_eq!(second.listener_count(kind), 1);
        }
    }

    #[test]
    fn test_replace_in_place_unwires_old_layer() {
        let mut registry = wired_registry(1);
        let old = Rc::clone(&registry.layers()[0]);
        let new = LayerMaterial::new().shared();

        registry.set_layer(Some(Rc::clone(&new)), 0);
        registry.wire();

        assert!(Rc::ptr_eq(&registry.layers()[0], &new));
        assert_eq!(old.listener_count(LayerNotification::ValueChanged), 0);
        assert_eq!(new.listener_count(LayerNotification::ValueChanged), 1);
    }

    #[test]
    fn test_out_of_bounds_none_is_ignored() {
        let mut registry = wired_registry(1);
        assert!(!registry.set_layer(None, 3));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_notifications_are_queued_once() {
        let registry = wired_registry(2);
        registry.layers()[0].set_uv_scale([2.0, 2.0, 2.0]);
        registry.layers()[1].set_albedo([0.5, 0.5, 0.5, 1.0]);
        registry.layers()[1].set_albedo_texture(Some(TerrainImage::new_control(8)));

        assert_eq!(
            registry.take_pending(),
            vec![LayerNotification::ValueChanged, LayerNotification::TextureChanged]
        );
        assert!(registry.take_pending().is_empty());
    }

    #[test]
    fn test_scalar_arrays_follow_layer_order() {
        let registry = wired_registry(2);
        registry.layers()[1].set_uv_scale([3.0, 3.0, 3.0]);
        assert_eq!(registry.uv_scales(), vec![[1.0; 3], [3.0; 3]]);
        assert_eq!(registry.colors().len(), 2);
    }

    #[test]
    fn test_textures_reports_missing_layer() {
        let registry = wired_registry(2);
        registry.layers()[0].set_albedo_texture(Some(TerrainImage::new_control(8)));
        assert_eq!(registry.textures(LayerTexture::Albedo).err(), Some(1));

        registry.layers()[1].set_albedo_texture(Some(TerrainImage::new_control(8)));
        assert_eq!(registry.textures(LayerTexture::Albedo).unwrap().len(), 2);
    }

    #[test]
    fn test_texture_check_skips_missing_and_reports_mismatch() {
        let layer = |size: Option<u32>| {
            let material = LayerMaterial::new();
            material.set_albedo_texture(size.map(TerrainImage::new_control));
            material.shared()
        };
        assert!(check_layer_textures(&[layer(Some(8)), layer(None), layer(Some(8))]).is_ok());
        assert!(matches!(
            check_layer_textures(&[layer(Some(8)), layer(Some(16))]),
            Err(ServerError::LayerMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = wired_registry(1);
        let layer = Rc::clone(&registry.layers()[0]);
        drop(registry);
        assert_eq!(layer.listener_count(LayerNotification::TextureChanged), 0);
    }
}
