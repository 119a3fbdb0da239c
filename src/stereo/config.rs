use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{GeolocationError, Result};

/// Largest disparity magnitude, in pixels, whose fixed-point value fits in i16
const FIXED_POINT_LIMIT: i32 = i16::MAX as i32 / 16;

/// Pre-filter applied to both images before block matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum PreFilterKind {
    /// Pixel minus local window mean, clamped to the cap
    NormalizedResponse,
    /// Horizontal Sobel response, clamped to the cap
    XSobel,
}

impl From<PreFilterKind> for i32 {
    fn from(kind: PreFilterKind) -> Self {
        match kind {
            PreFilterKind::NormalizedResponse => 0,
            PreFilterKind::XSobel => 1,
        }
    }
}

impl TryFrom<i32> for PreFilterKind {
    type Error = GeolocationError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PreFilterKind::NormalizedResponse),
            1 => Ok(PreFilterKind::XSobel),
            other => Err(GeolocationError::config(
                "PreFilterType",
                format!("{} is not 0 (normalized response) or 1 (x-Sobel)", other),
            )),
        }
    }
}

/// Block-matcher tuning parameters.
///
/// Serialized with the field names of the calibration tool that produces the
/// parameter files. Every field is required; real values are truncated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoMatcherConfig {
    #[serde(rename = "PreFilterType", deserialize_with = "pre_filter_kind")]
    pub pre_filter_type: PreFilterKind,
    #[serde(rename = "PreFilterSize", deserialize_with = "truncated_int")]
    pub pre_filter_size: i32,
    #[serde(rename = "PreFilterCap", deserialize_with = "truncated_int")]
    pub pre_filter_cap: i32,
    /// SAD window edge length (odd)
    #[serde(rename = "SADWindowSize", deserialize_with = "truncated_int")]
    pub block_size: i32,
    #[serde(rename = "MinDisparity", deserialize_with = "truncated_int")]
    pub min_disparity: i32,
    /// Search range width, multiple of 16
    #[serde(rename = "NumDisparities", deserialize_with = "truncated_int")]
    pub num_disparities: i32,
    #[serde(rename = "TextureThreshold", deserialize_with = "truncated_int")]
    pub texture_threshold: i32,
    /// Percent margin the best match must win by
    #[serde(rename = "UniquenessRatio", deserialize_with = "truncated_int")]
    pub uniqueness_ratio: i32,
    /// Connected regions smaller than this are discarded (0 disables)
    #[serde(rename = "SpeckleWindowSize", deserialize_with = "truncated_int")]
    pub speckle_window_size: i32,
    /// Max disparity step inside a region, whole pixels
    #[serde(rename = "SpeckleRange", deserialize_with = "truncated_int")]
    pub speckle_range: i32,
    /// Left-right consistency tolerance in pixels (negative disables)
    #[serde(rename = "Disp12MaxDiff", deserialize_with = "truncated_int")]
    pub disp12_max_diff: i32,
}

impl Default for StereoMatcherConfig {
    fn default() -> Self {
        Self {
            pre_filter_type: PreFilterKind::XSobel,
            pre_filter_size: 9,
            pre_filter_cap: 31,
            block_size: 15,
            min_disparity: 0,
            num_disparities: 64,
            texture_threshold: 10,
            uniqueness_ratio: 15,
            speckle_window_size: 100,
            speckle_range: 32,
            disp12_max_diff: 1,
        }
    }
}

impl StereoMatcherConfig {
    /// Load and validate a parameter file.
    ///
    /// Every field is required. Real-valued entries are truncated to integers.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(&path).map_err(|e| {
            log::warn!("Could not open stereo parameter file '{}': {}", path_str, e);
            GeolocationError::config("file", format!("failed to read '{}': {}", path_str, e))
        })?;
        Self::from_json_str(&content).map_err(|e| {
            log::warn!("Rejected stereo parameter file '{}': {}", path_str, e);
            e
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GeolocationError::config("file", format!("invalid parameters: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_str = path.as_ref().display().to_string();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GeolocationError::config("file", format!("failed to serialize: {}", e)))?;
        fs::write(&path, content).map_err(|e| {
            GeolocationError::config("file", format!("failed to write '{}': {}", path_str, e))
        })
    }

    /// Check every parameter against the ranges the matcher accepts
    pub fn validate(&self) -> Result<()> {
        check_odd_window("PreFilterSize", self.pre_filter_size)?;
        check_odd_window("SADWindowSize", self.block_size)?;

        if !(1..=63).contains(&self.pre_filter_cap) {
            return Err(GeolocationError::config(
                "PreFilterCap",
                format!("{} must be between 1 and 63", self.pre_filter_cap),
            ));
        }
        if self.num_disparities <= 0 || self.num_disparities % 16 != 0 {
            return Err(GeolocationError::config(
                "NumDisparities",
                format!("{} must be a positive multiple of 16", self.num_disparities),
            ));
        }
        // Fixed-point output must fit in i16, invalid marker included
        let limit = FIXED_POINT_LIMIT;
        if self.min_disparity.saturating_sub(1) < -limit || self.max_disparity() > limit {
            return Err(GeolocationError::config(
                "NumDisparities",
                format!(
                    "search range {}..{} exceeds +/-{} pixels",
                    self.min_disparity,
                    self.max_disparity(),
                    limit
                ),
            ));
        }

        for (name, value) in [
            ("TextureThreshold", self.texture_threshold),
            ("UniquenessRatio", self.uniqueness_ratio),
            ("SpeckleWindowSize", self.speckle_window_size),
            ("SpeckleRange", self.speckle_range),
        ] {
            if value < 0 {
                return Err(GeolocationError::config(
                    name,
                    format!("{} must be non-negative", value),
                ));
            }
        }
        if self.speckle_range > FIXED_POINT_LIMIT {
            return Err(GeolocationError::config(
                "SpeckleRange",
                format!("{} exceeds {} pixels", self.speckle_range, FIXED_POINT_LIMIT),
            ));
        }

        Ok(())
    }

    /// Looser copy for a second attempt after a region had no valid match
    pub fn relaxed(&self) -> Self {
        Self {
            texture_threshold: self.texture_threshold / 2,
            uniqueness_ratio: self.uniqueness_ratio / 2,
            speckle_window_size: 0,
            ..self.clone()
        }
    }

    /// Exclusive upper end of the disparity search range
    pub fn max_disparity(&self) -> i32 {
        self.min_disparity.saturating_add(self.num_disparities)
    }
}

/// Numeric field read as a real and truncated towards zero
fn truncated_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i32, D::Error> {
    let number = f64::deserialize(deserializer)?;
    if !number.is_finite() || number.abs() > i32::MAX as f64 {
        return Err(D::Error::custom(format!("{} out of range", number)));
    }
    Ok(number.trunc() as i32)
}

fn pre_filter_kind<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<PreFilterKind, D::Error> {
    PreFilterKind::try_from(truncated_int(deserializer)?).map_err(D::Error::custom)
}

fn check_odd_window(name: &str, size: i32) -> Result<()> {
    if size < 5 || size > 255 || size % 2 == 0 {
        return Err(GeolocationError::config(
            name,
            format!("{} must be odd and between 5 and 255", size),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "PreFilterType": 1,
        "PreFilterSize": 9,
        "PreFilterCap": 31,
        "SADWindowSize": 15.0,
        "MinDisparity": 0,
        "NumDisparities": 64,
        "TextureThreshold": 10,
        "UniquenessRatio": 15,
        "SpeckleWindowSize": 100,
        "SpeckleRange": 32,
        "Disp12MaxDiff": 1
    }"#;

    #[test]
    fn test_parse_sample_file() {
        let config = StereoMatcherConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config, StereoMatcherConfig::default());
        assert_eq!(config.max_disparity(), 64);
    }

    #[test]
    fn test_real_values_truncated() {
        let json = SAMPLE.replace("\"TextureThreshold\": 10", "\"TextureThreshold\": 10.9");
        let config = StereoMatcherConfig::from_json_str(&json).unwrap();
        assert_eq!(config.texture_threshold, 10);
    }

    #[test]
    fn test_missing_field_is_config_error() {
        let json = SAMPLE.replace("\"NumDisparities\": 64,", "");
        let err = StereoMatcherConfig::from_json_str(&json).unwrap_err();
        match err {
            GeolocationError::Config { reason, .. } => assert!(reason.contains("NumDisparities")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_field_is_config_error() {
        let json = SAMPLE.replace("\"UniquenessRatio\": 15", "\"UniquenessRatio\": \"high\"");
        let err = StereoMatcherConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, GeolocationError::Config { .. }));

        let json = SAMPLE.replace("\"MinDisparity\": 0", "\"MinDisparity\": 1e12");
        assert!(StereoMatcherConfig::from_json_str(&json).is_err());
    }

    #[test]
    fn test_extreme_min_disparity_rejected_without_overflow() {
        let json = SAMPLE.replace("\"MinDisparity\": 0", "\"MinDisparity\": 2147483600");
        let err = StereoMatcherConfig::from_json_str(&json).unwrap_err();
        match err {
            GeolocationError::Config { parameter, .. } => assert_eq!(parameter, "NumDisparities"),
            other => panic!("unexpected error: {:?}", other),
        }

        let config = StereoMatcherConfig {
            min_disparity: i32::MIN,
            ..StereoMatcherConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            StereoMatcherConfig {
                min_disparity: i32::MAX,
                ..StereoMatcherConfig::default()
            }
            .max_disparity(),
            i32::MAX
        );
    }

    #[test]
    fn test_speckle_range_beyond_fixed_point_rejected() {
        let json = SAMPLE.replace("\"SpeckleRange\": 32", "\"SpeckleRange\": 200000000");
        let err = StereoMatcherConfig::from_json_str(&json).unwrap_err();
        match err {
            GeolocationError::Config { parameter, .. } => assert_eq!(parameter, "SpeckleRange"),
            other => panic!("unexpected error: {:?}", other),
        }

        let mut config = StereoMatcherConfig::default();
        config.speckle_range = 2047;
        assert!(config.validate().is_ok());
        config.speckle_range = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let path = std::env::temp_dir().join("stereo_geolocator_missing_params.json");
        let err = StereoMatcherConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, GeolocationError::Config { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = StereoMatcherConfig::default();
        config.num_disparities = 40;
        assert!(config.validate().is_err());

        let mut config = StereoMatcherConfig::default();
        config.block_size = 8;
        assert!(config.validate().is_err());

        let mut config = StereoMatcherConfig::default();
        config.pre_filter_cap = 64;
        assert!(config.validate().is_err());

        let mut config = StereoMatcherConfig::default();
        config.num_disparities = 4096;
        assert!(config.validate().is_err());

        let json = SAMPLE.replace("\"PreFilterType\": 1", "\"PreFilterType\": 2");
        assert!(StereoMatcherConfig::from_json_str(&json).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "stereo_geolocator_{}_params.json",
            std::process::id()
        ));
        let config = StereoMatcherConfig {
            pre_filter_type: PreFilterKind::NormalizedResponse,
            min_disparity: -16,
            ..StereoMatcherConfig::default()
        };
        config.save_to_file(&path).unwrap();
        let reloaded = StereoMatcherConfig::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config, reloaded);
    }

    #[test]
    fn test_relaxed_loosens_filters() {
        let base = StereoMatcherConfig::default();
        let relaxed = base.relaxed();
        assert!(relaxed.texture_threshold < base.texture_threshold);
        assert!(relaxed.uniqueness_ratio < base.uniqueness_ratio);
        assert_eq!(relaxed.speckle_window_size, 0);
        assert_eq!(relaxed.num_disparities, base.num_disparities);
        assert!(relaxed.validate().is_ok());
    }
}
