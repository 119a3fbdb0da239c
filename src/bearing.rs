use crate::error::{GeolocationError, Result};

/// Bearing of a detection relative to the camera's optical axis, in degrees.
///
/// The pixel offset from the image center is converted to a lateral offset in
/// meters with the pinhole relation, then to an angle. Positive angles are to
/// the right of the boat's heading.
///
/// # Arguments
/// * `center_x` - Horizontal center of the detection (pixels)
/// * `image_width` - Width of the image the detection came from (pixels)
/// * `distance_m` - Range to the object; must be positive
/// * `focal_length_px` - Camera focal length (pixels)
pub fn bearing_from_center(
    center_x: i64,
    image_width: usize,
    distance_m: f64,
    focal_length_px: f64,
) -> Result<f64> {
    if !(distance_m > 0.0) || !distance_m.is_finite() {
        return Err(GeolocationError::InvalidDistance(distance_m));
    }
    if !(focal_length_px > 0.0) || !focal_length_px.is_finite() {
        return Err(GeolocationError::config(
            "focal_length",
            format!("{} must be a positive number of pixels", focal_length_px),
        ));
    }

    let pixel_offset = center_x as f64 - image_width as f64 / 2.0;
    let lateral_m = pixel_offset * distance_m / focal_length_px;
    let angle = (lateral_m / distance_m).atan().to_degrees();

    log::debug!(
        "Object offset {:.1} px ({:.2} m lateral) -> bearing {:.3} deg",
        pixel_offset,
        lateral_m,
        angle
    );
    Ok(angle)
}
