// crates/ct-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ct_core::{DetectorGeometry, Roi};
use ct_engine::ReconstructionConfig;
use ct_gpu::cpu::CpuDevice;
use ct_gpu::Device;
use ct_io::{RawProjectionSource, RawVolumeSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "ct-cli",
    about = "FDK cone-beam CT reconstruction engine",
    long_about = "FDK cone-beam CT reconstruction engine.\n\nReconstructs a 3-D attenuation volume from a stream of 2-D cone-beam projections acquired on a circular trajectory.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Args, Debug, Clone)]
struct GeometryArgs {
    /// Detector pixel count, horizontal
    #[arg(long)]
    n_row: u32,

    /// Detector pixel count, vertical
    #[arg(long)]
    n_col: u32,

    /// Detector pixel pitch, horizontal, mm
    #[arg(long)]
    l_px_row: f64,

    /// Detector pixel pitch, vertical, mm
    #[arg(long)]
    l_px_col: f64,

    /// Principal-point offset, horizontal, pixels
    #[arg(long, default_value_t = 0.0)]
    delta_s: f64,

    /// Principal-point offset, vertical, pixels
    #[arg(long, default_value_t = 0.0)]
    delta_t: f64,

    /// Source-to-object distance, mm
    #[arg(long)]
    d_so: f64,

    /// Object-to-detector distance, mm
    #[arg(long)]
    d_od: f64,

    /// Number of projections per rotation
    #[arg(long)]
    n_proj: u32,

    /// Default angular step in degrees, used when no angle file is given
    #[arg(long, default_value_t = 1.0)]
    rot_angle: f64,

    /// Path to an angle file (one decimal angle in degrees per line)
    #[arg(long)]
    angles: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RoiArgs {
    /// Region-of-interest lower x bound (voxels, inclusive)
    #[arg(long)]
    x1: Option<u32>,
    /// Region-of-interest upper x bound (voxels, exclusive)
    #[arg(long)]
    x2: Option<u32>,
    /// Region-of-interest lower y bound (voxels, inclusive)
    #[arg(long)]
    y1: Option<u32>,
    /// Region-of-interest upper y bound (voxels, exclusive)
    #[arg(long)]
    y2: Option<u32>,
    /// Region-of-interest lower z bound (voxels, inclusive)
    #[arg(long)]
    z1: Option<u32>,
    /// Region-of-interest upper z bound (voxels, exclusive)
    #[arg(long)]
    z2: Option<u32>,
}

impl RoiArgs {
    fn into_roi(self) -> Option<Roi> {
        Some(Roi {
            x1: self.x1?,
            x2: self.x2?,
            y1: self.y1?,
            y2: self.y2?,
            z1: self.z1?,
            z2: self.z2?,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Reconstruct a volume from a directory of raw projection planes.
    Reconstruct {
        #[command(flatten)]
        geometry: GeometryArgs,

        #[command(flatten)]
        roi: RoiArgs,

        /// Directory containing one `.raw` f32 plane file per projection
        #[arg(long)]
        projections: PathBuf,

        /// Output path for the reconstructed volume
        #[arg(long, default_value = "volume.raw")]
        out: PathBuf,

        /// Number of reference CPU devices to simulate
        #[arg(long, default_value_t = 1)]
        devices: u32,

        /// Per-device memory budget, in bytes, for the reference CPU backend
        #[arg(long, default_value_t = 1u64 << 32)]
        device_mem_bytes: u64,
    },

    /// Build and print the scheduler's partition plan without running the
    /// pipeline. Useful for sizing a run before committing device time.
    PlanOnly {
        #[command(flatten)]
        geometry: GeometryArgs,

        #[command(flatten)]
        roi: RoiArgs,

        /// Number of reference CPU devices to simulate
        #[arg(long, default_value_t = 1)]
        devices: u32,

        /// Per-device memory budget, in bytes, for the reference CPU backend
        #[arg(long, default_value_t = 1u64 << 32)]
        device_mem_bytes: u64,
    },
}

fn build_geometry(args: &GeometryArgs) -> DetectorGeometry {
    DetectorGeometry {
        n_row: args.n_row,
        n_col: args.n_col,
        l_px_row: args.l_px_row,
        l_px_col: args.l_px_col,
        delta_s: args.delta_s,
        delta_t: args.delta_t,
        d_so: args.d_so,
        d_od: args.d_od,
        n_proj: args.n_proj,
        rot_angle: args.rot_angle,
    }
}

fn read_angles(path: Option<&PathBuf>) -> Result<Option<Vec<f64>>> {
    match path {
        Some(p) => Ok(Some(ct_io::read_angle_file(p).context("reading angle file")?)),
        None => Ok(None),
    }
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Reconstruct { geometry, roi, projections, out, devices, device_mem_bytes } => {
            reconstruct(geometry, roi, projections, out, devices, device_mem_bytes)
        }
        Cmd::PlanOnly { geometry, roi, devices, device_mem_bytes } => {
            plan_only(geometry, roi, devices, device_mem_bytes)
        }
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}

fn make_devices(n: u32, mem_bytes: u64) -> Vec<Arc<dyn Device>> {
    (0..n).map(|id| Arc::new(CpuDevice::new(id, mem_bytes)) as Arc<dyn Device>).collect()
}

fn reconstruct(
    geometry: GeometryArgs,
    roi: RoiArgs,
    projections: PathBuf,
    out: PathBuf,
    n_devices: u32,
    device_mem_bytes: u64,
) -> Result<()> {
    let angles_path = geometry.angles.clone();
    let geo = build_geometry(&geometry);
    let angles_deg = read_angles(angles_path.as_ref())?;

    info!(n_row = geo.n_row, n_col = geo.n_col, n_proj = geo.n_proj, "starting reconstruction");

    let cfg = ReconstructionConfig {
        geo,
        roi: roi.into_roi(),
        angles_deg,
        queue_capacity: ct_pipeline_default_capacity(),
    };

    let source = RawProjectionSource::open(&projections, geo.n_row as usize, geo.n_col as usize)
        .with_context(|| format!("opening projection directory {}", projections.display()))?;
    let mut sink = RawVolumeSink::new(out.clone());

    let devices = make_devices(n_devices, device_mem_bytes);
    ct_engine::run_reconstruction(&cfg, devices, source, &mut sink)
        .context("running reconstruction")?;

    println!("Reconstruction complete -> {}", out.display());
    Ok(())
}

fn plan_only(geometry: GeometryArgs, roi: RoiArgs, n_devices: u32, device_mem_bytes: u64) -> Result<()> {
    let geo = build_geometry(&geometry);
    let volume = ct_core::calculate_volume_geometry(&geo).context("deriving volume geometry")?;
    let volume = roi.into_roi().map_or(volume, |r| r.apply(&volume));

    let devices: Vec<ct_scheduler::DeviceBudget> = (0..n_devices)
        .map(|id| ct_scheduler::DeviceBudget { device: id, mem_bytes: device_mem_bytes })
        .collect();
    let plan = ct_scheduler::plan(&geo, &volume, &devices).context("building schedule plan")?;

    println!(
        "volume: {}x{}x{} voxels ({:.3}x{:.3}x{:.3} mm voxel size)",
        volume.dim_x, volume.dim_y, volume.dim_z, volume.l_vx_x, volume.l_vx_y, volume.l_vx_z
    );
    for sv in &plan.sub_volumes {
        println!(
            "  sub-volume {:>3}: device {} | z=[{}, {}) | rows=[{}, {}]",
            sv.index, sv.device, sv.z_offset, sv.z_offset + sv.dim_z_local, sv.row_band.top, sv.row_band.bottom
        );
    }
    Ok(())
}

fn ct_pipeline_default_capacity() -> usize {
    ct_pipeline::recommended_capacity(1)
}
