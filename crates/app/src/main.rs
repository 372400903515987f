//! Entry point for Pocket Tanks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use app::TankScene;
use asset::Manifest;
use clap::{Parser, ValueEnum};
use platform::RunOptions;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GpuBackend {
    Auto,
    #[value(alias = "vk")]
    Vulkan,
    #[value(alias = "d3d12")]
    Dx12,
    #[value(alias = "mtl")]
    Metal,
    #[value(alias = "opengl", alias = "gles")]
    Gl,
}

impl From<GpuBackend> for wgpu::Backends {
    fn from(b: GpuBackend) -> Self {
        match b {
            GpuBackend::Auto => wgpu::Backends::all(),
            GpuBackend::Vulkan => wgpu::Backends::VULKAN,
            GpuBackend::Dx12 => wgpu::Backends::DX12,
            GpuBackend::Metal => wgpu::Backends::METAL,
            GpuBackend::Gl => wgpu::Backends::GL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pocket-tanks", about = "Textured tank viewed through a fly camera")]
struct Cli {
    /// Graphics API to render with
    #[arg(long, value_enum, default_value = "auto")]
    gpu_backend: GpuBackend,

    /// Window size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size, default_value = "1280x720")]
    size: (u32, u32),

    /// Show frames per second in the window title
    #[arg(long)]
    show_fps: bool,

    /// Directory the manifest urls are relative to
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/assets"))]
    assets: PathBuf,

    /// JSON manifest replacing the built-in one
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Draw this many frames without a window, then exit
    #[arg(long)]
    headless_frames: Option<u32>,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: u32 = w.parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let h: u32 = h.parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    Ok((w.max(1), h.max(1)))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (width, height) = cli.size;
    log::info!(
        "Starting Pocket Tanks. Backend: {:?}, show_fps={}, window_size={}x{}, assets={}",
        cli.gpu_backend,
        cli.show_fps,
        width,
        height,
        cli.assets.display()
    );

    let scene = match &cli.manifest {
        Some(path) => TankScene::with_manifest(
            Manifest::from_path(path)
                .with_context(|| format!("Reading manifest {}", path.display()))?,
        ),
        None => TankScene::new(),
    };
    let options = RunOptions {
        width,
        height,
        backends: cli.gpu_backend.into(),
        show_fps: cli.show_fps,
        assets: cli.assets,
        ..RunOptions::default()
    };

    match cli.headless_frames {
        Some(frames) => {
            platform::run_headless(Box::new(scene), &options, frames)?;
        }
        None => platform::run(Box::new(scene), options)?,
    }

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
