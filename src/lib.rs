//! Geolocation of objects seen by a boat-mounted stereo camera.
//!
//! Fuses stereo range, pixel bearing, and the boat's UTM position and
//! magnetometer heading into a WGS84 fix for each detection.
//!
//! ```no_run
//! use stereo_geolocator::{GeolocationPipeline, PipelineSettings, ReadingSources, StereoMatcherConfig};
//!
//! # fn main() -> stereo_geolocator::Result<()> {
//! let pipeline = GeolocationPipeline::new(PipelineSettings::default(), StereoMatcherConfig::default())?;
//! let sources = ReadingSources::new("gps.txt", "imu.txt");
//! let report = pipeline.locate_at_range(&sources, 640, 1280, 15.0)?;
//! println!("{}", report.object_fix);
//! # Ok(())
//! # }
//! ```

pub mod bearing;
pub mod error;
pub mod geodesy;
pub mod heading;
pub mod pipeline;
pub mod readings;
pub mod stereo;
pub mod types;

pub use error::{GeolocationError, Result};
pub use geodesy::{CoordinateProjector, DegreeScale, FlatEarthDisplacer, UtmProjector};
pub use pipeline::{
    GeolocationPipeline, GeolocationReport, Observation, PipelineSettings, PipelineStage,
    ReadingSources,
};
pub use stereo::{BlockMatcher, DisparityMap, StereoDepthEstimator, StereoMatcher, StereoMatcherConfig};
pub use types::{
    DepthBounds, DepthEstimate, DetectionBox, GeodeticFix, Hemisphere, OrientationReading,
    PositionReading,
};
