//! Local flat-earth dead reckoning.
//!
//! The displacement is decomposed into East/North meters on the tangent plane
//! at the origin and converted to degrees with a per-latitude scale. Curvature
//! is ignored, so requests beyond `max_range_m` are refused rather than
//! silently degraded.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::Ellipsoid;
use crate::error::{GeolocationError, Result};
use crate::types::GeodeticFix;

/// Meters per degree of latitude used by the legacy marking tools
pub const LEGACY_METERS_PER_DEGREE: f64 = 111_111.0;

pub const DEFAULT_MAX_RANGE_M: f64 = 1_000.0;

/// Conversion from local meters to degrees
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DegreeScale {
    /// WGS84 radii of curvature at the origin latitude
    #[default]
    Ellipsoidal,
    /// Constant meters per degree of latitude; longitude shrinks with cos(lat)
    Fixed { meters_per_degree: f64 },
}

impl DegreeScale {
    pub fn legacy() -> Self {
        DegreeScale::Fixed {
            meters_per_degree: LEGACY_METERS_PER_DEGREE,
        }
    }

    /// (meters per degree of longitude, meters per degree of latitude) at `latitude_deg`
    pub fn meters_per_degree(&self, latitude_deg: f64) -> (f64, f64) {
        let cos_lat = latitude_deg.to_radians().cos();
        match *self {
            DegreeScale::Ellipsoidal => {
                let wgs84 = Ellipsoid::WGS84;
                let per_radian_lat = wgs84.meridian_radius(latitude_deg);
                let per_radian_lon = wgs84.prime_vertical_radius(latitude_deg) * cos_lat;
                (
                    per_radian_lon.to_radians().abs(),
                    per_radian_lat.to_radians(),
                )
            }
            DegreeScale::Fixed { meters_per_degree } => {
                ((meters_per_degree * cos_lat).abs(), meters_per_degree)
            }
        }
    }
}

/// Flat-earth displacement of a fix by a distance along a true bearing
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlatEarthDisplacer {
    pub scale: DegreeScale,
    pub max_range_m: f64,
}

impl Default for FlatEarthDisplacer {
    fn default() -> Self {
        Self {
            scale: DegreeScale::default(),
            max_range_m: DEFAULT_MAX_RANGE_M,
        }
    }
}

impl FlatEarthDisplacer {
    pub fn new(scale: DegreeScale, max_range_m: f64) -> Self {
        Self { scale, max_range_m }
    }

    /// Move `origin` by `distance_m` along `true_bearing_deg` (clockwise from North).
    ///
    /// A zero distance returns `origin` unchanged for any bearing.
    pub fn displace(
        &self,
        origin: &GeodeticFix,
        distance_m: f64,
        true_bearing_deg: f64,
    ) -> Result<GeodeticFix> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(GeolocationError::InvalidDistance(distance_m));
        }
        if distance_m > self.max_range_m {
            log::warn!(
                "Refusing flat-earth displacement of {:.1} m (limit {:.1} m)",
                distance_m,
                self.max_range_m
            );
            return Err(GeolocationError::DisplacementOutOfRange {
                distance_m,
                max_range_m: self.max_range_m,
            });
        }
        if distance_m == 0.0 {
            return Ok(*origin);
        }

        let bearing = true_bearing_deg.to_radians();
        // (east, north)
        let offset = Vector2::new(bearing.sin(), bearing.cos()) * distance_m;
        let (lon_scale, lat_scale) = self.scale.meters_per_degree(origin.latitude);
        if lon_scale <= f64::EPSILON {
            return Err(GeolocationError::NotAvailable(
                "longitude scale at the pole",
            ));
        }

        Ok(GeodeticFix {
            latitude: origin.latitude + offset.y / lat_scale,
            longitude: origin.longitude + offset.x / lon_scale,
        })
    }
}
