//! `wgpu`-backed rendering service.
//!
//! Single images become `D2` textures with one layer; layered builds become a
//! single `D2` texture with `depth_or_array_layers = n`, sampled through a
//! `D2Array` view. Materials and shaders are kept as host-side records the
//! consumer reads when it assembles its pipelines.

use std::collections::HashMap;

use log::{info, warn};

use super::{
    validate_layers, MaterialRecord, ParamValue, RenderingServer, Rid, RidAllocator, TextureInfo,
};
use crate::error::ServerError;
use crate::maps::{TerrainImage, TexelFormat};

struct GpuTexture {
    texture: wgpu::Texture,
    info: TextureInfo,
}

/// GPU context owning every texture handed out to the storage.
pub struct GpuServer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    ids: RidAllocator,
    textures: HashMap<Rid, GpuTexture>,
    materials: HashMap<Rid, MaterialRecord>,
    shaders: HashMap<Rid, String>,
}

impl GpuServer {
    /// Create a GPU context.
    /// Returns None if no adapter or device is available.
    pub fn new() -> Option<Self> {
        match pollster::block_on(Self::new_async()) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("GPU rendering server unavailable: {}", e);
                None
            }
        }
    }

    async fn new_async() -> Result<Self, ServerError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ServerError::NoAdapter)?;

        info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Terrain Storage GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(|e| ServerError::DeviceRequest(e.to_string()))?;

        Ok(Self::from_device(device, queue))
    }

    /// Wrap a device owned by the host application.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            ids: RidAllocator::default(),
            textures: HashMap::new(),
            materials: HashMap::new(),
            shaders: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn texture(&self, rid: Rid) -> Option<&wgpu::Texture> {
        self.textures.get(&rid).map(|t| &t.texture)
    }

    pub fn texture_info(&self, rid: Rid) -> Option<&TextureInfo> {
        self.textures.get(&rid).map(|t| &t.info)
    }

    /// View matching how the texture was created: `D2Array` for layered
    /// textures, `D2` otherwise.
    pub fn texture_view(&self, rid: Rid) -> Option<wgpu::TextureView> {
        let entry = self.textures.get(&rid)?;
        let dimension = if entry.info.layered {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        };
        Some(entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Terrain Storage View"),
            dimension: Some(dimension),
            ..Default::default()
        }))
    }

    pub fn material(&self, rid: Rid) -> Option<&MaterialRecord> {
        self.materials.get(&rid)
    }

    pub fn shader_code(&self, shader: Rid) -> Option<&str> {
        self.shaders.get(&shader).map(String::as_str)
    }

    fn check_limits(&self, info: &TextureInfo) -> Result<(), ServerError> {
        let limits = self.device.limits();
        if info.layers > limits.max_texture_array_layers {
            return Err(ServerError::TooManyLayers {
                count: info.layers,
                max: limits.max_texture_array_layers,
            });
        }
        let side = info.width.max(info.height);
        if side > limits.max_texture_dimension_2d {
            return Err(ServerError::TextureTooLarge {
                size: side,
                max: limits.max_texture_dimension_2d,
            });
        }
        Ok(())
    }

    fn upload(&mut self, info: TextureInfo, layers: &[&TerrainImage]) -> Result<Rid, ServerError> {
        self.check_limits(&info)?;

        let size = wgpu::Extent3d {
            width: info.width,
            height: info.height,
            depth_or_array_layers: info.layers,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(if info.layered {
                "Terrain Layered Texture"
            } else {
                "Terrain Texture"
            }),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(info.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, image) in layers.iter().enumerate() {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                image.as_bytes(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(image.bytes_per_row()),
                    rows_per_image: Some(info.height),
                },
                wgpu::Extent3d {
                    width: info.width,
                    height: info.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.queue.submit(std::iter::empty());

        let rid = self.ids.allocate();
        self.textures.insert(rid, GpuTexture { texture, info });
        Ok(rid)
    }
}

fn wgpu_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::R32Float => wgpu::TextureFormat::R32Float,
        TexelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TexelFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TexelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
    }
}

impl RenderingServer for GpuServer {
    fn texture_2d_create(&mut self, image: &TerrainImage) -> Result<Rid, ServerError> {
        let info = TextureInfo {
            width: image.width(),
            height: image.height(),
            layers: 1,
            format: image.format(),
            layered: false,
        };
        self.upload(info, &[image])
    }

    fn texture_2d_layered_create(&mut self, layers: &[&TerrainImage]) -> Result<Rid, ServerError> {
        let info = validate_layers(layers)?;
        self.upload(info, layers)
    }

    fn free_rid(&mut self, rid: Rid) {
        if let Some(entry) = self.textures.remove(&rid) {
            entry.texture.destroy();
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

impl Drop for GpuServer {
    fn drop(&mut self) {
        for (_, entry) in self.textures.drain() {
            entry.texture.destroy();
        }
    }
}
