use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stereo_geolocator::{
    GeolocationPipeline, Hemisphere, PipelineSettings, ReadingSources, StereoMatcherConfig,
};

#[derive(Parser, Debug)]
#[command(name = "geolocate")]
#[command(about = "Geolocate an object seen by the boat camera at a known range", long_about = None)]
struct Args {
    /// GPS reading file (easting, northing)
    #[arg(long)]
    gps: PathBuf,

    /// IMU reading file (x, y, z)
    #[arg(long)]
    imu: PathBuf,

    /// UTM zone of the GPS reading (overrides settings)
    #[arg(long)]
    zone: Option<u8>,

    /// GPS reading is in the southern hemisphere
    #[arg(long, default_value_t = false)]
    south: bool,

    /// Horizontal center of the detection (pixels)
    #[arg(long, allow_hyphen_values = true)]
    center_x: i64,

    /// Width of the image the detection came from (pixels)
    #[arg(long)]
    image_width: usize,

    /// Range to the object (meters)
    #[arg(long)]
    distance: f64,

    /// Magnetic declination at the boat (degrees, overrides settings)
    #[arg(long, allow_hyphen_values = true)]
    declination: Option<f64>,

    /// Camera focal length (pixels, overrides settings)
    #[arg(long)]
    focal_length: Option<f64>,

    /// Pipeline settings JSON
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print the full report as JSON instead of "lat, lon"
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match args.settings.as_ref() {
        Some(path) => PipelineSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => PipelineSettings::default(),
    };
    if let Some(zone) = args.zone {
        settings.utm_zone = zone;
    }
    if args.south {
        settings.hemisphere = Hemisphere::South;
    }
    if let Some(declination) = args.declination {
        settings.magnetic_declination_deg = declination;
    }
    if let Some(focal_length) = args.focal_length {
        settings.focal_length_px = focal_length;
    }

    let pipeline = GeolocationPipeline::new(settings, StereoMatcherConfig::default())
        .context("Invalid pipeline settings")?;
    let sources = ReadingSources::new(&args.gps, &args.imu);
    let report = pipeline
        .locate_at_range(&sources, args.center_x, args.image_width, args.distance)
        .with_context(|| {
            format!(
                "Failed to geolocate object from {} and {}",
                args.gps.display(),
                args.imu.display()
            )
        })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let (latitude, longitude) = report.object_fix.as_pair();
        println!("{:.8}, {:.8}", latitude, longitude);
    }
    Ok(())
}
