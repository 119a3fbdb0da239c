//! Universal Transverse Mercator on an ellipsoid.
//!
//! Krüger series in the third flattening n, truncated at n³. Round trips stay
//! well under a millimeter inside a zone.

use super::{CoordinateProjector, Ellipsoid};
use crate::error::{GeolocationError, Result};
use crate::types::{GeodeticFix, Hemisphere, PositionReading};

pub const UTM_SCALE_FACTOR: f64 = 0.9996;
pub const UTM_FALSE_EASTING: f64 = 500_000.0;
pub const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM ↔ geodetic projector for one ellipsoid
#[derive(Clone, Debug)]
pub struct UtmProjector {
    ellipsoid: Ellipsoid,
    /// Rectifying radius times the UTM scale factor
    scaled_radius: f64,
    n: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl Default for UtmProjector {
    fn default() -> Self {
        Self::new(Ellipsoid::WGS84)
    }
}

impl UtmProjector {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        let n = ellipsoid.third_flattening();
        let n2 = n * n;
        let n3 = n2 * n;
        let rectifying_radius =
            ellipsoid.semi_major_axis / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        Self {
            ellipsoid,
            scaled_radius: UTM_SCALE_FACTOR * rectifying_radius,
            n,
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    /// Central meridian of a zone, degrees
    pub fn central_meridian(zone: u8) -> f64 {
        zone as f64 * 6.0 - 183.0
    }

    /// Standard 6° zone containing `longitude_deg` (Norway/Svalbard exceptions not applied)
    ///
    /// -180° falls in zone 1 and +180° in zone 60; other longitudes wrap first.
    pub fn zone_for_longitude(longitude_deg: f64) -> u8 {
        let offset = if (-180.0..=180.0).contains(&longitude_deg) {
            longitude_deg + 180.0
        } else {
            (longitude_deg + 180.0).rem_euclid(360.0)
        };
        let zone = (offset / 6.0).floor() as i32 + 1;
        zone.clamp(1, 60) as u8
    }

    fn false_northing(hemisphere: Hemisphere) -> f64 {
        match hemisphere {
            Hemisphere::North => 0.0,
            Hemisphere::South => UTM_FALSE_NORTHING_SOUTH,
        }
    }
}

impl CoordinateProjector for UtmProjector {
    fn to_geodetic(&self, position: &PositionReading) -> GeodeticFix {
        let xi = (position.northing() - Self::false_northing(position.hemisphere()))
            / self.scaled_radius;
        let eta = (position.easting() - UTM_FALSE_EASTING) / self.scaled_radius;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in self.delta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            phi += delta * (k * chi).sin();
        }

        let lambda = eta_p.sinh().atan2(xi_p.cos());
        GeodeticFix {
            latitude: phi.to_degrees(),
            longitude: wrap_longitude(Self::central_meridian(position.zone()) + lambda.to_degrees()),
        }
    }

    fn to_utm(&self, fix: &GeodeticFix, zone: u8, hemisphere: Hemisphere) -> Result<PositionReading> {
        if !(1..=60).contains(&zone) {
            return Err(GeolocationError::InvalidZone(zone));
        }

        let phi = fix.latitude.to_radians();
        let lambda = wrap_longitude(fix.longitude - Self::central_meridian(zone)).to_radians();

        let c = 2.0 * self.n.sqrt() / (1.0 + self.n);
        let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();
        let xi_p = t.atan2(lambda.cos());
        let eta_p = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        PositionReading::new(
            UTM_FALSE_EASTING + self.scaled_radius * eta,
            Self::false_northing(hemisphere) + self.scaled_radius * xi,
            zone,
            hemisphere,
        )
    }
}

/// Longitude in (-180, 180]
fn wrap_longitude(longitude_deg: f64) -> f64 {
    let wrapped = (longitude_deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}
