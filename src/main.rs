use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use image::{ImageBuffer, Luma};
use log::{error, info, warn};

use terrain_storage::noise_texture::{generate_blend_noise, BlendNoiseParams};
use terrain_storage::storage::CacheKind;
use terrain_storage::{
    GpuServer, HeadlessServer, MapType, RegionSize, RenderingServer, StorageConfig, StorageError,
    TerrainImage, TerrainStorage,
};

#[derive(Parser, Debug)]
#[command(name = "terrain_storage")]
#[command(about = "Manage terrain regions and their generated GPU textures")]
struct Args {
    /// Storage file (JSON snapshot)
    #[arg(short, long, default_value = "terrain.json")]
    storage: PathBuf,

    /// Upload textures through wgpu instead of the in-memory server
    #[arg(long)]
    gpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty storage
    Init {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Region size in texels (64, 128, ..., 2048)
        #[arg(long)]
        region_size: Option<u32>,

        /// Seed for the blend noise texture
        #[arg(long, default_value = "0")]
        noise_seed: u32,
    },
    /// Add a region at a world position
    Add {
        #[arg(allow_hyphen_values = true)]
        x: f32,
        #[arg(allow_hyphen_values = true)]
        z: f32,
    },
    /// Remove the region at a world position
    Remove {
        #[arg(allow_hyphen_values = true)]
        x: f32,
        #[arg(allow_hyphen_values = true)]
        z: f32,
    },
    /// Print regions, layers and cache state
    Info,
    /// Rebuild the layered map textures
    ForceUpdate {
        #[arg(long, value_enum)]
        map: Option<MapArg>,
    },
    /// Write the region lookup atlas as a PNG
    ExportRegionMap { out: PathBuf },
    /// Write one region's height map as a 16-bit PNG
    ExportHeight { index: usize, out: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MapArg {
    Height,
    Control,
}

impl From<MapArg> for MapType {
    fn from(arg: MapArg) -> Self {
        match arg {
            MapArg::Height => MapType::Height,
            MapArg::Control => MapType::Control,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = if args.gpu {
        match GpuServer::new() {
            Some(server) => {
                info!("Using wgpu rendering server");
                run(server, &args)
            }
            None => {
                warn!("GPU not available, using in-memory rendering server");
                run(HeadlessServer::new(), &args)
            }
        }
    } else {
        run(HeadlessServer::new(), &args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run<S: RenderingServer>(server: S, args: &Args) -> Result<(), StorageError> {
    match &args.command {
        Command::Init {
            config,
            region_size,
            noise_seed,
        } => {
            let mut config = match config {
                Some(path) => StorageConfig::load(path)?,
                None => StorageConfig::default(),
            };
            if let Some(size) = region_size {
                config.region_size = RegionSize::try_from(*size)?;
            }
            let mut storage = TerrainStorage::new(server, config)?;
            let noise = generate_blend_noise(&BlendNoiseParams {
                seed: *noise_seed,
                ..Default::default()
            });
            storage.set_noise_texture(Some(noise))?;
            storage.save(&args.storage)
        }
        Command::Add { x, z } => {
            let mut storage = TerrainStorage::load(server, &args.storage)?;
            let key = storage.add_region([*x, 0.0, *z])?;
            println!("Added region at offset {}", key.offset);
            storage.save(&args.storage)
        }
        Command::Remove { x, z } => {
            let mut storage = TerrainStorage::load(server, &args.storage)?;
            let before = storage.region_count();
            storage.remove_region([*x, 0.0, *z])?;
            if storage.region_count() == before {
                println!("Kept the last remaining region");
            }
            storage.save(&args.storage)
        }
        Command::Info => {
            let storage = TerrainStorage::load(server, &args.storage)?;
            print_info(&storage, &args.storage);
            Ok(())
        }
        Command::ForceUpdate { map } => {
            let mut storage = TerrainStorage::load(server, &args.storage)?;
            storage.force_update_maps((*map).map(MapType::from))?;
            print_info(&storage, &args.storage);
            Ok(())
        }
        Command::ExportRegionMap { out } => {
            let storage = TerrainStorage::load(server, &args.storage)?;
            let image = storage
                .cache(CacheKind::RegionMap)
                .image()
                .and_then(TerrainImage::as_region_map)
                .ok_or_else(|| StorageError::Encoding("region map has not been generated".to_string()))?;
            image
                .save(out)
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            println!("Wrote {}x{} region map to {}", image.width(), image.height(), out.display());
            Ok(())
        }
        Command::ExportHeight { index, out } => {
            let storage = TerrainStorage::load(server, &args.storage)?;
            let map = storage
                .get_map(*index, MapType::Height)
                .and_then(TerrainImage::as_height)
                .ok_or_else(|| StorageError::Encoding(format!("no region at index {}", index)))?;
            let image: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(map.width(), map.height(), |x, y| {
                    let h = map.get_pixel(x, y).0[0].clamp(0.0, 1.0);
                    Luma([(h * u16::MAX as f32).round() as u16])
                });
            image
                .save(out)
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            println!("Wrote height map {} to {}", index, out.display());
            Ok(())
        }
    }
}

fn print_info<S: RenderingServer>(storage: &TerrainStorage<S>, path: &Path) {
    let config = storage.config();
    println!("Storage: {}", path.display());
    println!(
        "Region size: {}  Max height: {}  Region map: {}x{}",
        config.region_size, config.max_height, config.region_map_size, config.region_map_size
    );
    println!("Regions: {}", storage.region_count());
    for (index, offset) in storage.region_offsets().iter().enumerate() {
        println!("  [{}] {}", index, offset);
    }
    println!("Layers: {}", storage.layer_count());
    for kind in [
        CacheKind::HeightMaps,
        CacheKind::ControlMaps,
        CacheKind::RegionMap,
        CacheKind::AlbedoTextures,
        CacheKind::NormalTextures,
        CacheKind::Noise,
    ] {
        let cache = storage.cache(kind);
        match cache.handle() {
            Some(rid) => println!("  {:<16} {:?} {}", cache.label(), cache.state(), rid),
            None => println!("  {:<16} {:?}", cache.label(), cache.state()),
        }
    }
}
