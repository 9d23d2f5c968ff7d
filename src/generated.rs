//! Lazily rebuilt GPU resources derived from CPU images.
//!
//! A [`GeneratedResource`] is either `Dirty` with no live handle, or `Clean`
//! with a handle built from inputs that have not changed since. It owns its
//! handle exclusively and frees it before rebuilding.

use log::{debug, warn};

use crate::error::ServerError;
use crate::maps::TerrainImage;
use crate::server::{RenderingServer, Rid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CacheState {
    Clean,
    #[default]
    Dirty,
}

#[derive(Debug)]
pub struct GeneratedResource {
    label: &'static str,
    handle: Option<Rid>,
    /// Source image, kept only for single-image builds.
    image: Option<TerrainImage>,
    state: CacheState,
}

impl GeneratedResource {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            handle: None,
            image: None,
            state: CacheState::Dirty,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == CacheState::Dirty
    }

    /// Live handle, `None` while dirty.
    pub fn handle(&self) -> Option<Rid> {
        self.handle
    }

    pub fn image(&self) -> Option<&TerrainImage> {
        self.image.as_ref()
    }

    /// Build a layered texture from `layers`. An empty sequence releases the
    /// resource and leaves it dirty.
    pub fn build_layers<S: RenderingServer + ?Sized>(
        &mut self,
        server: &mut S,
        layers: &[&TerrainImage],
    ) -> Result<(), ServerError> {
        self.release(server);
        if layers.is_empty() {
            return Ok(());
        }
        let rid = server.texture_2d_layered_create(layers)?;
        debug!("{}: built {} layers as {}", self.label, layers.len(), rid);
        self.handle = Some(rid);
        self.state = CacheState::Clean;
        Ok(())
    }

    /// Build a single texture from `image` and retain the image.
    pub fn build_single<S: RenderingServer + ?Sized>(
        &mut self,
        server: &mut S,
        image: TerrainImage,
    ) -> Result<(), ServerError> {
        self.release(server);
        let rid = server.texture_2d_create(&image)?;
        debug!("{}: built {}x{} texture as {}", self.label, image.width(), image.height(), rid);
        self.handle = Some(rid);
        self.image = Some(image);
        self.state = CacheState::Clean;
        Ok(())
    }

    /// Mark the resource stale after its inputs changed.
    pub fn invalidate<S: RenderingServer + ?Sized>(&mut self, server: &mut S) {
        if self.handle.is_some() {
            debug!("{}: invalidated", self.label);
        }
        self.release(server);
    }

    /// Free the handle and retained image, and mark the resource dirty.
    pub fn release<S: RenderingServer + ?Sized>(&mut self, server: &mut S) {
        if let Some(rid) = self.handle.take() {
            server.free_rid(rid);
        }
        self.image = None;
        self.state = CacheState::Dirty;
    }
}

impl Drop for GeneratedResource {
    fn drop(&mut self) {
        if let Some(rid) = self.handle {
            warn!("{} dropped while still holding {}", self.label, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::HeadlessServer;

    #[test]
    fn test_starts_dirty_without_handle() {
        let cache = GeneratedResource::new("test");
        assert!(cache.is_dirty());
        assert!(cache.handle().is_none());
    }

    #[test]
    fn test_build_layers_cleans_and_release_frees() {
        let mut server = HeadlessServer::new();
        let mut cache = GeneratedResource::new("heights");
        let a = TerrainImage::new_height(64, 0.0);
        let b = TerrainImage::new_height(64, 0.0);

        cache.build_layers(&mut server, &[&a, &b]).unwrap();
        assert_eq!(cache.state(), CacheState::Clean);
        let rid = cache.handle().unwrap();
        assert_eq!(server.texture(rid).unwrap().layers, 2);

        cache.release(&mut server);
        assert!(cache.is_dirty());
        assert!(cache.handle().is_none());
        assert!(!server.is_live(rid));
    }

    #[test]
    fn test_empty_build_behaves_as_release() {
        let mut server = HeadlessServer::new();
        let mut cache = GeneratedResource::new("albedo");
        let a = TerrainImage::new_control(16);
        cache.build_layers(&mut server, &[&a]).unwrap();

        cache.build_layers(&mut server, &[]).unwrap();
        assert!(cache.is_dirty());
        assert_eq!(server.live_textures(), 0);
    }

    #[test]
    fn test_rebuild_frees_previous_handle() {
        let mut server = HeadlessServer::new();
        let mut cache = GeneratedResource::new("region map");

        cache.build_single(&mut server, TerrainImage::new_control(16)).unwrap();
        let first = cache.handle().unwrap();
        cache.build_single(&mut server, TerrainImage::new_control(16)).unwrap();

        assert!(!server.is_live(first));
        assert_eq!(server.live_textures(), 1);
        assert!(cache.image().is_some());
        cache.release(&mut server);
        assert!(cache.image().is_none());
    }

    #[test]
    fn test_failed_build_stays_dirty() {
        let mut server = HeadlessServer::new();
        let mut cache = GeneratedResource::new("controls");
        let a = TerrainImage::new_control(16);
        let b = TerrainImage::new_control(32);

        assert!(cache.build_layers(&mut server, &[&a, &b]).is_err());
        assert!(cache.is_dirty());
        assert_eq!(server.live_textures(), 0);
    }
}
