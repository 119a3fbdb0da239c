use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::error::{GeolocationError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    #[default]
    North,
    South,
}

/// Boat position as a UTM grid reading
///
/// Zone is validated on construction and the reading is immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionReading {
    easting: f64,
    northing: f64,
    zone: u8,
    hemisphere: Hemisphere,
}

impl PositionReading {
    pub fn new(easting: f64, northing: f64, zone: u8, hemisphere: Hemisphere) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(GeolocationError::InvalidZone(zone));
        }
        Ok(Self {
            easting,
            northing,
            zone,
            hemisphere,
        })
    }

    pub fn easting(&self) -> f64 {
        self.easting
    }

    pub fn northing(&self) -> f64 {
        self.northing
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }
}

/// Horizontal-plane orientation vector (magnetometer or accelerometer axes).
/// Only `x` and `y` contribute to heading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// WGS84 latitude/longitude in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeodeticFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeodeticFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Output ordering used by callers: (latitude, longitude)
    pub fn as_pair(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// Great-circle distance in meters (mean Earth radius)
    pub fn haversine_distance_to(&self, other: &GeodeticFix) -> f64 {
        // geo uses Point(lon, lat)
        let a = Point::new(self.longitude, self.latitude);
        let b = Point::new(other.longitude, other.latitude);
        a.haversine_distance(&b)
    }
}

impl Display for GeodeticFix {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:.8}, {:.8}", self.latitude, self.longitude)
    }
}

/// Pixel-space bounding box in the left image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl DetectionBox {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Horizontal center of the box, truncated to a whole pixel
    pub fn center_x(&self) -> usize {
        self.x.saturating_add(self.width / 2)
    }

    pub fn center_y(&self) -> usize {
        self.y.saturating_add(self.height / 2)
    }
}

impl Display for DetectionBox {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "({}:{}, {}:{})",
            self.x,
            self.x.saturating_add(self.width),
            self.y,
            self.y.saturating_add(self.height)
        )
    }
}

/// Scene-wide depth range derived from the extreme positive disparities
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthBounds {
    pub depth_min_m: f64,
    pub depth_max_m: f64,
}

/// Distance to a detection plus the scene depth range it was measured in
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthEstimate {
    pub distance_m: f64,
    pub mean_disparity: f32,
    /// `None` when no positive disparity exists anywhere in the map
    pub scene_bounds: Option<DepthBounds>,
}

impl DepthEstimate {
    pub fn bounds(&self) -> Result<DepthBounds> {
        self.scene_bounds
            .ok_or(GeolocationError::NotAvailable("scene depth bounds"))
    }
}
