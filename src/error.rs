use thiserror::Error;

use crate::types::DetectionBox;

/// Geolocation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeolocationError {
    /// Malformed or missing reading source
    #[error("Failed to parse {origin}: {reason}")]
    Parse { origin: String, reason: String },

    /// Parameter source unreadable, incomplete or out of range
    #[error("Invalid configuration ({parameter}): {reason}")]
    Config { parameter: String, reason: String },

    /// No valid match inside the detection region
    #[error("Insufficient disparity in region {region} (mean {mean_disparity:.3})")]
    InsufficientDisparity {
        region: DetectionBox,
        mean_disparity: f32,
    },

    #[error("Invalid distance: {0} m")]
    InvalidDistance(f64),

    /// Quantity undefined for this scene
    #[error("{0} not available")]
    NotAvailable(&'static str),

    #[error("Invalid UTM zone {0}: must be between 1 and 60")]
    InvalidZone(u8),

    #[error("Stereo pair dimensions differ: left {left:?}, right {right:?}")]
    ImageMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    /// Flat-earth displacement requested beyond its validity range
    #[error("Displacement of {distance_m:.1} m exceeds flat-earth limit of {max_range_m:.1} m")]
    DisplacementOutOfRange { distance_m: f64, max_range_m: f64 },
}

impl GeolocationError {
    pub(crate) fn parse(origin: impl Into<String>, reason: impl ToString) -> Self {
        GeolocationError::Parse {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(parameter: impl Into<String>, reason: impl ToString) -> Self {
        GeolocationError::Config {
            parameter: parameter.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may skip this detection or retry with fresh inputs
    /// (for example a relaxed matcher) instead of aborting the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GeolocationError::InsufficientDisparity { .. } | GeolocationError::NotAvailable(_)
        )
    }
}

/// Result type for geolocation operations
pub type Result<T> = std::result::Result<T, GeolocationError>;
