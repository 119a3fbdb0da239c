//! Geodetic projection and local displacement
//!
//! - `utm`: UTM ↔ WGS84 through the `CoordinateProjector` capability
//! - `displacement`: flat-earth dead reckoning from a fix

pub mod displacement;
pub mod utm;

pub use displacement::{DegreeScale, FlatEarthDisplacer, LEGACY_METERS_PER_DEGREE};
pub use utm::UtmProjector;

use crate::error::Result;
use crate::types::{GeodeticFix, Hemisphere, PositionReading};

/// Capability: convert between UTM grid readings and WGS84 fixes.
///
/// Alternate backends (for example a binding to a geodesy library) slot in
/// without touching the pipeline.
pub trait CoordinateProjector {
    fn to_geodetic(&self, position: &PositionReading) -> GeodeticFix;

    fn to_utm(&self, fix: &GeodeticFix, zone: u8, hemisphere: Hemisphere) -> Result<PositionReading>;
}

/// Reference ellipsoid
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters)
    pub semi_major_axis: f64,
    /// Flattening factor
    pub flattening: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        semi_major_axis: 6_378_137.0,
        flattening: 1.0 / 298.257_223_563,
    };

    pub fn eccentricity_squared(&self) -> f64 {
        self.flattening * (2.0 - self.flattening)
    }

    /// Third flattening n = f / (2 - f)
    pub fn third_flattening(&self) -> f64 {
        self.flattening / (2.0 - self.flattening)
    }

    /// Meridian radius of curvature at `latitude_deg` (meters)
    pub fn meridian_radius(&self, latitude_deg: f64) -> f64 {
        let e2 = self.eccentricity_squared();
        let s = latitude_deg.to_radians().sin();
        self.semi_major_axis * (1.0 - e2) / (1.0 - e2 * s * s).powf(1.5)
    }

    /// Prime-vertical radius of curvature at `latitude_deg` (meters)
    pub fn prime_vertical_radius(&self, latitude_deg: f64) -> f64 {
        let e2 = self.eccentricity_squared();
        let s = latitude_deg.to_radians().sin();
        self.semi_major_axis / (1.0 - e2 * s * s).sqrt()
    }
}
