//! Terrain storage: owns the region and layer registries, the generated GPU
//! caches derived from them, and the material they are bound to.
//!
//! Every mutation invalidates the caches it affects and then runs the
//! matching regeneration pass before returning, so the material never points
//! at a stale or freed handle. A regeneration pass only rebuilds caches whose
//! state is `Dirty`; running it again without further edits does nothing
//! except re-push the current handles.

use std::rc::Rc;

use log::{debug, info, warn};

use crate::config::{NoiseParams, RegionSize, StorageConfig};
use crate::error::{Result, StorageError};
use crate::generated::GeneratedResource;
use crate::layer::{
    check_layer_textures, splice_layer, LayerMaterial, LayerNotification, LayerRegistry,
    LayerTexture,
};
use crate::maps::{MapType, TerrainImage};
use crate::region::{offset_for, RegionKey, RegionOffset, RegionRegistry};
use crate::region_map;
use crate::server::{HeadlessServer, ParamValue, RenderingServer, Rid};
use crate::signal::{ListenerId, Signal};

/// Material parameter names pushed by the storage.
pub mod params {
    pub const REGION_SIZE: &str = "region_size";
    pub const REGION_PIXEL_SIZE: &str = "region_pixel_size";
    pub const TERRAIN_HEIGHT: &str = "terrain_height";
    pub const HEIGHT_MAPS: &str = "height_maps";
    pub const CONTROL_MAPS: &str = "control_maps";
    pub const REGION_MAP: &str = "region_map";
    pub const REGION_MAP_SIZE: &str = "region_map_size";
    pub const NOISE: &str = "noise";
    pub const NOISE_SCALE: &str = "noise_scale";
    pub const NOISE_HEIGHT: &str = "noise_height";
    pub const NOISE_FADE: &str = "noise_fade";
    pub const ALBEDO_ARRAY: &str = "texture_array_albedo";
    pub const NORMAL_ARRAY: &str = "texture_array_normal";
    pub const UV_SCALE_ARRAY: &str = "texture_uv_scale_array";
    pub const COLOR_ARRAY: &str = "texture_color_array";
}

/// Notifications emitted to storage observers after a mutation completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageEvent {
    /// Regions were added, removed or moved.
    RegionsChanged,
    /// Region height or control maps were replaced or repainted.
    MapsChanged,
    /// The layer set changed.
    LayersChanged,
    /// Per-layer scalar arrays were regenerated.
    ArraysChanged,
}

/// Identifies one of the generated caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    RegionMap,
    HeightMaps,
    ControlMaps,
    AlbedoTextures,
    NormalTextures,
    Noise,
}

pub struct TerrainStorage<S: RenderingServer = HeadlessServer> {
    server: S,
    config: StorageConfig,

    material: Rid,
    shader: Rid,
    shader_override: Option<Rid>,

    regions: RegionRegistry,
    layers: LayerRegistry,

    region_map: GeneratedResource,
    height_maps: GeneratedResource,
    control_maps: GeneratedResource,
    albedo_textures: GeneratedResource,
    normal_textures: GeneratedResource,
    noise_texture: GeneratedResource,

    changed: Signal<StorageEvent>,
}

fn reject<T>(error: StorageError) -> Result<T> {
    warn!("{}", error);
    Err(error)
}

impl<S: RenderingServer> TerrainStorage<S> {
    /// Create an empty storage and its material on `server`.
    pub fn new(server: S, config: StorageConfig) -> Result<Self> {
        Self::with_contents(server, config, RegionRegistry::new(), Vec::new())
    }

    pub(crate) fn with_contents(
        mut server: S,
        config: StorageConfig,
        regions: RegionRegistry,
        layers: Vec<Rc<LayerMaterial>>,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(offset) = regions
            .offsets()
            .iter()
            .find(|o| !region_map::fits(**o, config.region_map_size))
        {
            return reject(StorageError::OutsideRegionMap {
                offset: *offset,
                size: config.region_map_size,
            });
        }

        let material = server.material_create();
        let shader = server.shader_create();

        let mut storage = Self {
            server,
            config,
            material,
            shader,
            shader_override: None,
            regions,
            layers: LayerRegistry::new(),
            region_map: GeneratedResource::new("region map"),
            height_maps: GeneratedResource::new("height maps"),
            control_maps: GeneratedResource::new("control maps"),
            albedo_textures: GeneratedResource::new("albedo textures"),
            normal_textures: GeneratedResource::new("normal textures"),
            noise_texture: GeneratedResource::new("noise texture"),
            changed: Signal::new(),
        };
        storage.update_material();
        if !layers.is_empty() {
            storage.layers.set_layers(layers);
            storage.update_layers()?;
        }
        if !storage.regions.is_empty() {
            storage.update_regions()?;
        }
        Ok(storage)
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Handle of the material every parameter is pushed to.
    pub fn material(&self) -> Rid {
        self.material
    }

    pub fn cache(&self, kind: CacheKind) -> &GeneratedResource {
        match kind {
            CacheKind::RegionMap => &self.region_map,
            CacheKind::HeightMaps => &self.height_maps,
            CacheKind::ControlMaps => &self.control_maps,
            CacheKind::AlbedoTextures => &self.albedo_textures,
            CacheKind::NormalTextures => &self.normal_textures,
            CacheKind::Noise => &self.noise_texture,
        }
    }

    /// Observe completed mutations. Returns `false` if `id` is already
    /// connected.
    pub fn connect_changed(&self, id: ListenerId, listener: impl Fn(&StorageEvent) + 'static) -> bool {
        self.changed.connect(id, listener)
    }

    pub fn disconnect_changed(&self, id: ListenerId) -> bool {
        self.changed.disconnect(id)
    }

    fn set_param(&mut self, name: &str, value: ParamValue) {
        self.server.material_set_param(self.material, name, value);
    }

    // =========================================================================
    // Material parameters
    // =========================================================================

    pub fn region_size(&self) -> RegionSize {
        self.config.region_size
    }

    /// Change the region size used for offset computation. Existing region
    /// maps keep their resolution.
    pub fn set_region_size(&mut self, size: RegionSize) {
        self.config.region_size = size;
        self.push_region_size();
    }

    pub fn max_height(&self) -> u32 {
        self.config.max_height
    }

    /// Rejects 0 without changing anything.
    pub fn set_max_height(&mut self, height: u32) -> Result<()> {
        self.edit_config(|config| config.max_height = height)?;
        self.set_param(params::TERRAIN_HEIGHT, ParamValue::Int(height as i64));
        Ok(())
    }

    pub fn set_shader_code(&mut self, code: &str) {
        self.server.shader_set_code(self.shader, code);
    }

    pub fn shader_override(&self) -> Option<Rid> {
        self.shader_override
    }

    /// Bind a host-owned shader instead of the storage's own.
    pub fn set_shader_override(&mut self, shader: Option<Rid>) {
        self.shader_override = shader;
        self.update_material();
    }

    pub fn noise_params(&self) -> NoiseParams {
        self.config.noise
    }

    pub fn noise_texture(&self) -> Option<&TerrainImage> {
        self.noise_texture.image()
    }

    pub fn set_noise_texture(&mut self, texture: Option<TerrainImage>) -> Result<()> {
        match texture {
            Some(image) => self.noise_texture.build_single(&mut self.server, image)?,
            None => self.noise_texture.release(&mut self.server),
        }
        let handle = self.noise_texture.handle();
        self.set_param(params::NOISE, ParamValue::Texture(handle));
        self.update_material();
        Ok(())
    }

    pub fn set_noise_scale(&mut self, scale: f32) -> Result<()> {
        self.edit_config(|config| config.noise.scale = scale)?;
        self.set_param(params::NOISE_SCALE, ParamValue::Float(scale));
        Ok(())
    }

    pub fn set_noise_height(&mut self, height: f32) -> Result<()> {
        self.edit_config(|config| config.noise.height = height)?;
        self.set_param(params::NOISE_HEIGHT, ParamValue::Float(height));
        Ok(())
    }

    pub fn set_noise_fade(&mut self, fade: f32) -> Result<()> {
        self.edit_config(|config| config.noise.fade = fade)?;
        self.set_param(params::NOISE_FADE, ParamValue::Float(fade));
        Ok(())
    }

    /// Apply `edit` only if the edited config still validates, so a saved
    /// storage always loads again.
    fn edit_config(&mut self, edit: impl FnOnce(&mut StorageConfig)) -> Result<()> {
        let mut config = self.config.clone();
        edit(&mut config);
        if let Err(e) = config.validate() {
            return reject(e);
        }
        self.config = config;
        Ok(())
    }

    fn push_region_size(&mut self) {
        let pixels = self.config.region_size.pixels();
        self.set_param(params::REGION_SIZE, ParamValue::Int(pixels as i64));
        self.set_param(params::REGION_PIXEL_SIZE, ParamValue::Float(1.0 / pixels as f32));
    }

    /// Bind the shader and push every scalar parameter.
    fn update_material(&mut self) {
        info!("Updating material");
        let shader = self.shader_override.unwrap_or(self.shader);
        self.server.material_set_shader(self.material, shader);

        self.push_region_size();
        let height = self.config.max_height;
        let noise = self.config.noise;
        self.set_param(params::TERRAIN_HEIGHT, ParamValue::Int(height as i64));
        self.set_param(params::NOISE_SCALE, ParamValue::Float(noise.scale));
        self.set_param(params::NOISE_HEIGHT, ParamValue::Float(noise.height));
        self.set_param(params::NOISE_FADE, ParamValue::Float(noise.fade));
    }

    // =========================================================================
    // Regions
    // =========================================================================

    pub fn offset_for(&self, world_position: [f32; 3]) -> RegionOffset {
        offset_for(world_position, self.config.region_size)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region_offsets(&self) -> &[RegionOffset] {
        self.regions.offsets()
    }

    pub fn height_maps(&self) -> &[TerrainImage] {
        self.regions.height_maps()
    }

    pub fn control_maps(&self) -> &[TerrainImage] {
        self.regions.control_maps()
    }

    pub fn has_region(&self, world_position: [f32; 3]) -> bool {
        self.regions.has_region(world_position, self.config.region_size)
    }

    pub fn region_index(&self, world_position: [f32; 3]) -> Option<usize> {
        self.regions.index_of(world_position, self.config.region_size)
    }

    /// Current index of a region added earlier, `None` once it is removed.
    pub fn resolve(&self, key: RegionKey) -> Option<usize> {
        self.regions.resolve(key)
    }

    pub fn region_key(&self, index: usize) -> Option<RegionKey> {
        self.regions.key_at(index)
    }

    /// Add a blank region at the cell containing `world_position`.
    pub fn add_region(&mut self, world_position: [f32; 3]) -> Result<RegionKey> {
        let offset = self.offset_for(world_position);
        if !region_map::fits(offset, self.config.region_map_size) {
            return reject(StorageError::OutsideRegionMap {
                offset,
                size: self.config.region_map_size,
            });
        }
        let key = match self.regions.insert(offset, self.config.region_size) {
            Ok(key) => key,
            Err(e) => return reject(e),
        };
        info!("Added region {} at index {}", offset, self.regions.len() - 1);

        self.invalidate_regions();
        self.update_regions()?;
        self.changed.emit(&StorageEvent::RegionsChanged);
        Ok(key)
    }

    /// Remove the region at the cell containing `world_position`. Removing
    /// the last remaining region is a no-op.
    pub fn remove_region(&mut self, world_position: [f32; 3]) -> Result<()> {
        if self.regions.len() == 1 {
            debug!("Keeping the last remaining region");
            return Ok(());
        }
        let offset = self.offset_for(world_position);
        let index = match self.regions.remove(offset) {
            Ok(index) => index,
            Err(e) => return reject(e),
        };
        info!("Removed region {} from index {}", offset, index);

        self.invalidate_regions();
        self.update_regions()?;
        self.changed.emit(&StorageEvent::RegionsChanged);
        Ok(())
    }

    /// Replace every region offset. Regions keep their maps and indices.
    pub fn set_region_offsets(&mut self, offsets: Vec<RegionOffset>) -> Result<()> {
        if let Some(offset) = offsets
            .iter()
            .find(|o| !region_map::fits(**o, self.config.region_map_size))
        {
            return reject(StorageError::OutsideRegionMap {
                offset: *offset,
                size: self.config.region_map_size,
            });
        }
        if let Err(e) = self.regions.replace_offsets(offsets) {
            return reject(e);
        }
        self.region_map.invalidate(&mut self.server);
        self.update_regions()?;
        self.changed.emit(&StorageEvent::RegionsChanged);
        Ok(())
    }

    pub fn get_map(&self, index: usize, map_type: MapType) -> Option<&TerrainImage> {
        self.regions.get_map(index, map_type)
    }

    /// Edit a region map in place. Call [`Self::force_update_maps`] when done
    /// so the layered texture picks up the change.
    pub fn get_map_mut(&mut self, index: usize, map_type: MapType) -> Option<&mut TerrainImage> {
        self.regions.get_map_mut(index, map_type)
    }

    /// Rebuild the layered texture of `map_type`, or of both map types when
    /// `None`.
    pub fn force_update_maps(&mut self, map_type: Option<MapType>) -> Result<()> {
        match map_type {
            Some(MapType::Height) => self.height_maps.invalidate(&mut self.server),
            Some(MapType::Control) => self.control_maps.invalidate(&mut self.server),
            None => {
                self.height_maps.invalidate(&mut self.server);
                self.control_maps.invalidate(&mut self.server);
            }
        }
        self.update_regions()?;
        self.changed.emit(&StorageEvent::MapsChanged);
        Ok(())
    }

    pub fn set_height_maps(&mut self, maps: Vec<TerrainImage>) -> Result<()> {
        self.replace_maps(MapType::Height, maps)
    }

    pub fn set_control_maps(&mut self, maps: Vec<TerrainImage>) -> Result<()> {
        self.replace_maps(MapType::Control, maps)
    }

    fn replace_maps(&mut self, map_type: MapType, maps: Vec<TerrainImage>) -> Result<()> {
        if let Err(e) = self.regions.replace_maps(map_type, maps) {
            return reject(e);
        }
        self.force_update_maps(Some(map_type))
    }

    fn invalidate_regions(&mut self) {
        self.height_maps.invalidate(&mut self.server);
        self.control_maps.invalidate(&mut self.server);
        self.region_map.invalidate(&mut self.server);
    }

    /// Rebuild whichever region caches are dirty, then push all three
    /// handles and the atlas size.
    pub fn update_regions(&mut self) -> Result<()> {
        if self.height_maps.is_dirty() {
            info!("Updating height maps");
            let maps: Vec<&TerrainImage> = self.regions.height_maps().iter().collect();
            self.height_maps.build_layers(&mut self.server, &maps)?;
        }
        if self.control_maps.is_dirty() {
            info!("Updating control maps");
            let maps: Vec<&TerrainImage> = self.regions.control_maps().iter().collect();
            self.control_maps.build_layers(&mut self.server, &maps)?;
        }
        if self.region_map.is_dirty() {
            info!("Updating region map");
            let image = region_map::build_region_map(self.regions.offsets(), self.config.region_map_size);
            self.region_map
                .build_single(&mut self.server, TerrainImage::RegionMap(image))?;
        }

        let height_maps = self.height_maps.handle();
        let control_maps = self.control_maps.handle();
        let region_map = self.region_map.handle();
        self.set_param(params::HEIGHT_MAPS, ParamValue::Texture(height_maps));
        self.set_param(params::CONTROL_MAPS, ParamValue::Texture(control_maps));
        self.set_param(params::REGION_MAP, ParamValue::Texture(region_map));
        self.set_param(
            params::REGION_MAP_SIZE,
            ParamValue::Int(self.config.region_map_size as i64),
        );
        Ok(())
    }

    // =========================================================================
    // Layers
    // =========================================================================

    pub fn layers(&self) -> &[Rc<LayerMaterial>] {
        self.layers.layers()
    }

    pub fn get_layer(&self, index: usize) -> Option<&Rc<LayerMaterial>> {
        self.layers.get(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_listener(&self) -> ListenerId {
        self.layers.listener()
    }

    /// Remove (`None`), replace or append the layer at `index`. Textures
    /// that could not share an array with the other layers are rejected
    /// before the layer set changes.
    pub fn set_layer(&mut self, material: Option<Rc<LayerMaterial>>, index: usize) -> Result<()> {
        let mut candidate = self.layers.layers().to_vec();
        splice_layer(&mut candidate, material.clone(), index);
        if let Err(e) = check_layer_textures(&candidate) {
            return reject(e.into());
        }
        if !self.layers.set_layer(material, index) {
            debug!("set_layer: nothing to remove at index {}", index);
        }
        self.albedo_textures.invalidate(&mut self.server);
        self.normal_textures.invalidate(&mut self.server);
        self.update_layers()?;
        self.changed.emit(&StorageEvent::LayersChanged);
        Ok(())
    }

    pub fn set_layers(&mut self, layers: Vec<Rc<LayerMaterial>>) -> Result<()> {
        if let Err(e) = check_layer_textures(&layers) {
            return reject(e.into());
        }
        self.layers.set_layers(layers);
        self.albedo_textures.invalidate(&mut self.server);
        self.normal_textures.invalidate(&mut self.server);
        self.update_layers()?;
        self.changed.emit(&StorageEvent::LayersChanged);
        Ok(())
    }

    /// Subscribe to every layer, then regenerate the scalar arrays and any
    /// dirty texture array.
    fn update_layers(&mut self) -> Result<()> {
        info!("Generating material layers");
        let connected = self.layers.wire();
        if connected > 0 {
            debug!("Connected {} layer notifications", connected);
        }
        self.update_arrays();
        self.update_textures()
    }

    /// Push per-layer UV scales and colors, one entry per layer in order.
    pub fn update_arrays(&mut self) {
        info!("Generating terrain color and scale arrays");
        let uv_scales = self.layers.uv_scales();
        let colors = self.layers.colors();
        self.set_param(params::UV_SCALE_ARRAY, ParamValue::Vec3Array(uv_scales));
        self.set_param(params::COLOR_ARRAY, ParamValue::Vec4Array(colors));
        self.changed.emit(&StorageEvent::ArraysChanged);
    }

    /// Rebuild the albedo and normal arrays if dirty and push their handles.
    pub fn update_textures(&mut self) -> Result<()> {
        if self.albedo_textures.is_dirty() {
            info!("Generating terrain albedo arrays");
            rebuild_layer_array(
                &mut self.server,
                &mut self.albedo_textures,
                &self.layers,
                LayerTexture::Albedo,
            )?;
        }
        if self.normal_textures.is_dirty() {
            info!("Generating terrain normal arrays");
            rebuild_layer_array(
                &mut self.server,
                &mut self.normal_textures,
                &self.layers,
                LayerTexture::Normal,
            )?;
        }
        let albedo = self.albedo_textures.handle();
        let normal = self.normal_textures.handle();
        self.set_param(params::ALBEDO_ARRAY, ParamValue::Texture(albedo));
        self.set_param(params::NORMAL_ARRAY, ParamValue::Texture(normal));
        Ok(())
    }

    /// Apply layer notifications received since the last call.
    pub fn process_layer_events(&mut self) -> Result<()> {
        for event in self.layers.take_pending() {
            match event {
                LayerNotification::TextureChanged => {
                    self.albedo_textures.invalidate(&mut self.server);
                    self.normal_textures.invalidate(&mut self.server);
                    self.update_textures()?;
                }
                LayerNotification::ValueChanged => self.update_arrays(),
            }
        }
        Ok(())
    }

    /// Synchronization point: apply pending layer notifications and rebuild
    /// every dirty cache.
    pub fn sync(&mut self) -> Result<()> {
        self.process_layer_events()?;
        self.update_regions()?;
        self.update_textures()
    }
}

fn rebuild_layer_array<S: RenderingServer>(
    server: &mut S,
    cache: &mut GeneratedResource,
    layers: &LayerRegistry,
    which: LayerTexture,
) -> Result<()> {
    match layers.textures(which) {
        Ok(textures) => {
            let images: Vec<&TerrainImage> = textures.iter().map(|t| &**t).collect();
            cache.build_layers(server, &images)?;
        }
        Err(index) => {
            warn!("Layer {} has no {:?} texture; leaving the array unbuilt", index, which);
            cache.release(server);
        }
    }
    Ok(())
}

impl<S: RenderingServer> Drop for TerrainStorage<S> {
    fn drop(&mut self) {
        self.height_maps.release(&mut self.server);
        self.control_maps.release(&mut self.server);
        self.albedo_textures.release(&mut self.server);
        self.normal_textures.release(&mut self.server);
        self.region_map.release(&mut self.server);
        self.noise_texture.release(&mut self.server);
        self.server.free_rid(self.material);
        self.server.free_rid(self.shader);
    }
}
