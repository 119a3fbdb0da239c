//! Boat heading from the orientation sensor.
//!
//! Convention: bearings are degrees clockwise from North. The magnetic heading
//! is `-atan2(y, x)`, so a reading along +x is 0° and rotating towards -y
//! increases the heading. East components use `sin`, North components `cos`.

use crate::types::OrientationReading;

/// Heading relative to magnetic north, in (-180, 180] degrees. `z` is unused.
pub fn magnetic_heading(orientation: &OrientationReading) -> f64 {
    -orientation.y.atan2(orientation.x).to_degrees()
}

/// Sum of magnetic heading, declination and object bearing.
///
/// Deliberately not wrapped; use [`normalize_bearing`] for a canonical value.
pub fn true_heading(magnetic_heading_deg: f64, declination_deg: f64, object_bearing_deg: f64) -> f64 {
    magnetic_heading_deg + declination_deg + object_bearing_deg
}

/// Representative of `bearing_deg` in [0, 360)
pub fn normalize_bearing(bearing_deg: f64) -> f64 {
    let wrapped = bearing_deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
