//! Lens Distortion Demo
//!
//! Projects a grid of points with a chosen lens model, unprojects the pixels
//! back to rays, reports the round-trip error and exports the distortion
//! field. Optionally undistorts an image.
//!
//! Usage:
//! ```bash
//! cargo run --example distortion_demo -- \
//!   --model POLY5 \
//!   --intrinsics 461.6,460.2,362.7,246.0,-0.28,0.074,0.0002,0.00002,0.0 \
//!   --width 752 --height 480
//! ```

use clap::Parser;
use distortion_tools::calibration::ReprojectionStats;
use distortion_tools::config::ProjectionConfig;
use distortion_tools::geometry::{self, DistortionFieldSampler};
use distortion_tools::projection;
use distortion_tools::{util, CameraIntrinsics, DistortionModel, PointsTensor};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{info, warn};
use std::path::PathBuf;

/// Lens distortion demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Distortion model identifier (NONE, POLY4, POLY5, POLY8, POLY12, POLY14, CAHVOR, CAHVORE)
    #[arg(short = 'm', long)]
    model: DistortionModel,

    /// Comma separated intrinsics: fx,fy,cx,cy followed by the distortion parameters
    #[arg(short = 'i', long, value_delimiter = ',', allow_hyphen_values = true)]
    intrinsics: Vec<f64>,

    #[arg(long, default_value_t = 752)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Approximate number of sample points
    #[arg(short = 'n', long, default_value_t = 100)]
    num_points: usize,

    /// Optional YAML or JSON solver configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Optional image to undistort
    #[arg(long)]
    image: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .start()?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProjectionConfig::load(path)?,
        None => ProjectionConfig::default(),
    };
    let intrinsics = CameraIntrinsics::new(cli.model, &cli.intrinsics)?;
    info!("Camera: {} with {:?}", intrinsics.model, intrinsics.parameters);

    // Rays through an even grid of pixels, one unit in front of the camera.
    let pixels = geometry::sample_points(f64::from(cli.width), f64::from(cli.height), cli.num_points);
    let pinhole = CameraIntrinsics::new(DistortionModel::None, &intrinsics.parameters[..4])?;
    let pixels = PointsTensor::from_points2(&[pixels.len()], &pixels)?;
    let rays = projection::unproject(&pixels, &pinhole)?;

    let intrinsics_tensor =
        PointsTensor::new(vec![intrinsics.parameters.len()], intrinsics.parameters.clone())?;
    let projected = projection::project(&rays, intrinsics.model, &intrinsics_tensor, false)?.points;
    let recovered = projection::unproject_with(&projected, &intrinsics, &config.undistort)?;

    let angles: Vec<f64> = rays
        .iter_points3()
        .zip(recovered.iter_points3())
        .map(|(a, b)| a.angle(&b).to_degrees())
        .collect();
    let stats = ReprojectionStats::from_norms(&angles)?;
    info!("Round trip angular error (deg): {stats:?}");

    let field = DistortionFieldSampler::new(intrinsics.clone())?.sample_with_positions(
        &(0..=cli.width).step_by(16).map(f64::from).collect::<Vec<_>>(),
        &(0..=cli.height).step_by(16).map(f64::from).collect::<Vec<_>>(),
    )?;
    info!("Largest displacement: {:.3} px", field.max_displacement());
    util::ensure_output_dir()?;
    util::export_distortion_field(&field, format!("output/{}_field.csv", intrinsics.model))?;

    if let Some(path) = &cli.image {
        let image = util::load_image(path)?;
        if image.dimensions() != (cli.width, cli.height) {
            warn!(
                "Image is {:?}, the camera was described as {}x{}",
                image.dimensions(),
                cli.width,
                cli.height
            );
        }
        let undistorted = util::undistort_image(&intrinsics, &image)?;
        let output = format!("output/{}_undistorted.png", intrinsics.model);
        undistorted.save(&output)?;
        info!("Saved undistorted image to {output}");
    }

    Ok(())
}
