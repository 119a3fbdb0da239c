use ndarray::{s, Array2};
use std::path::Path;

use super::block_matcher::{BlockMatcher, GrayImage, StereoMatcher, DISPARITY_SCALE};
use super::config::StereoMatcherConfig;
use crate::error::{GeolocationError, Result};
use crate::types::{DepthBounds, DepthEstimate, DetectionBox};

/// Per-pixel disparity in pixels, aligned with the left image.
///
/// Lives for one pipeline invocation; never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct DisparityMap {
    values: Array2<f32>,
}

impl DisparityMap {
    /// Convert matcher fixed-point output to pixels
    pub fn from_fixed_point(raw: &Array2<i16>) -> Self {
        let scale = DISPARITY_SCALE as f32;
        Self {
            values: raw.mapv(|d| d as f32 / scale),
        }
    }

    pub fn from_values(values: Array2<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Arithmetic mean over the box clipped to the map; `None` if nothing remains
    pub fn region_mean(&self, region: &DetectionBox) -> Option<f32> {
        let (rows, cols) = self.values.dim();
        let top = region.y.min(rows);
        let left = region.x.min(cols);
        let bottom = region.y.saturating_add(region.height).min(rows);
        let right = region.x.saturating_add(region.width).min(cols);
        if top >= bottom || left >= right {
            return None;
        }

        let window = self.values.slice(s![top..bottom, left..right]);
        let sum: f64 = window.iter().map(|&d| d as f64).sum();
        Some((sum / window.len() as f64) as f32)
    }

    /// (smallest positive, largest) disparity; `None` when nothing is positive
    pub fn positive_extremes(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|&d| d > 0.0)
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }
}

/// Distance estimation from a rectified stereo pair.
///
/// `distance = focal_length * baseline / disparity`, with focal length in
/// pixels and baseline in meters.
pub struct StereoDepthEstimator<M: StereoMatcher = BlockMatcher> {
    matcher: M,
    focal_length_px: f64,
    baseline_m: f64,
}

impl StereoDepthEstimator<BlockMatcher> {
    /// Bind a block matcher to the given tuning for the session
    pub fn configure(config: StereoMatcherConfig, focal_length_px: f64, baseline_m: f64) -> Result<Self> {
        Ok(Self::with_matcher(
            BlockMatcher::new(config)?,
            focal_length_px,
            baseline_m,
        ))
    }

    pub fn from_parameter_file<P: AsRef<Path>>(
        path: P,
        focal_length_px: f64,
        baseline_m: f64,
    ) -> Result<Self> {
        Ok(Self::with_matcher(
            BlockMatcher::from_file(path)?,
            focal_length_px,
            baseline_m,
        ))
    }
}

impl<M: StereoMatcher> StereoDepthEstimator<M> {
    pub fn with_matcher(matcher: M, focal_length_px: f64, baseline_m: f64) -> Self {
        Self {
            matcher,
            focal_length_px,
            baseline_m,
        }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn focal_length_px(&self) -> f64 {
        self.focal_length_px
    }

    pub fn baseline_m(&self) -> f64 {
        self.baseline_m
    }

    pub fn compute_disparity(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        let raw = self.matcher.compute(left, right)?;
        Ok(DisparityMap::from_fixed_point(&raw))
    }

    /// Full pair → distance for one detection
    pub fn compute_depth(
        &self,
        left: &GrayImage,
        right: &GrayImage,
        region: &DetectionBox,
    ) -> Result<DepthEstimate> {
        let map = self.compute_disparity(left, right)?;
        self.depth_for_region(&map, region)
    }

    /// Distance for one detection against an already computed map.
    ///
    /// A region without positive mean disparity is reported as
    /// `InsufficientDisparity`; the map stays usable for other regions.
    pub fn depth_for_region(&self, map: &DisparityMap, region: &DetectionBox) -> Result<DepthEstimate> {
        let mean = map.region_mean(region).unwrap_or(f32::NAN);

        if !(mean > 0.0) {
            log::warn!("Insufficient disparity to estimate distance in region {}", region);
            return Err(GeolocationError::InsufficientDisparity {
                region: *region,
                mean_disparity: mean,
            });
        }

        let distance_m = self.disparity_to_depth(mean as f64);
        log::info!(
            "Estimated distance in region {} is {:.2} m (mean disparity {:.2})",
            region,
            distance_m,
            mean
        );

        let scene_bounds = self.scene_bounds(map);
        match &scene_bounds {
            Some(bounds) => log::debug!(
                "Scene depth range {:.2} m .. {:.2} m",
                bounds.depth_min_m,
                bounds.depth_max_m
            ),
            None => log::warn!("Scene depth bounds not available: no positive disparity"),
        }

        Ok(DepthEstimate {
            distance_m,
            mean_disparity: mean,
            scene_bounds,
        })
    }

    /// Nearest depth from the largest disparity, farthest from the smallest positive one
    pub fn scene_bounds(&self, map: &DisparityMap) -> Option<DepthBounds> {
        map.positive_extremes().map(|(min_disp, max_disp)| DepthBounds {
            depth_min_m: self.disparity_to_depth(max_disp as f64),
            depth_max_m: self.disparity_to_depth(min_disp as f64),
        })
    }

    fn disparity_to_depth(&self, disparity: f64) -> f64 {
        (self.focal_length_px * self.baseline_m) / disparity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stereo::block_matcher::tests::{shifted_pair, test_config};
    use approx::assert_relative_eq;

    /// Matcher double returning a canned fixed-point map
    struct CannedMatcher(Array2<i16>);

    impl StereoMatcher for CannedMatcher {
        fn compute(&self, _left: &GrayImage, _right: &GrayImage) -> Result<Array2<i16>> {
            Ok(self.0.clone())
        }
    }

    fn canned_estimator(raw: Array2<i16>) -> StereoDepthEstimator<CannedMatcher> {
        StereoDepthEstimator::with_matcher(CannedMatcher(raw), 500.0, 0.12)
    }

    fn blank() -> GrayImage {
        Array2::zeros((8, 8))
    }

    #[test]
    fn test_distance_from_mean_disparity() {
        // 8 px everywhere
        let estimator = canned_estimator(Array2::from_elem((8, 8), 8 * DISPARITY_SCALE));
        let estimate = estimator
            .compute_depth(&blank(), &blank(), &DetectionBox::new(2, 2, 4, 4))
            .unwrap();
        assert_relative_eq!(estimate.distance_m, 500.0 * 0.12 / 8.0, epsilon = 1e-9);
        assert_eq!(estimate.mean_disparity, 8.0);
    }

    #[test]
    fn test_zero_mean_disparity_is_insufficient() {
        let estimator = canned_estimator(Array2::zeros((8, 8)));
        let err = estimator
            .compute_depth(&blank(), &blank(), &DetectionBox::new(0, 0, 4, 4))
            .unwrap_err();
        match err {
            GeolocationError::InsufficientDisparity { mean_disparity, .. } => {
                assert_eq!(mean_disparity, 0.0)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_invalid_region_mean_is_insufficient() {
        // Half invalid (-1 px), half 0.5 px: mean is negative
        let raw = Array2::from_shape_fn((8, 8), |(_, x)| if x < 4 { -16 } else { 8 });
        let estimator = canned_estimator(raw);
        let err = estimator
            .compute_depth(&blank(), &blank(), &DetectionBox::new(2, 0, 4, 8))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_region_outside_map_is_insufficient() {
        let estimator = canned_estimator(Array2::from_elem((8, 8), 64));
        let err = estimator
            .compute_depth(&blank(), &blank(), &DetectionBox::new(20, 20, 4, 4))
            .unwrap_err();
        match err {
            GeolocationError::InsufficientDisparity { mean_disparity, .. } => {
                assert!(mean_disparity.is_nan())
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_region_at_usize_max_is_insufficient() {
        let estimator = canned_estimator(Array2::from_elem((8, 8), 64));
        let region = DetectionBox::new(usize::MAX - 1, 0, 10, 10);
        let err = estimator.compute_depth(&blank(), &blank(), &region).unwrap_err();
        assert!(matches!(err, GeolocationError::InsufficientDisparity { .. }));
        assert!(err.to_string().contains(&usize::MAX.to_string()));
    }

    #[test]
    fn test_region_clipped_to_map() {
        let map = DisparityMap::from_values(Array2::from_shape_fn((4, 4), |(y, _)| y as f32));
        // Rows 2..4 survive clipping: mean of 2 and 3
        assert_eq!(map.region_mean(&DetectionBox::new(0, 2, 10, 10)), Some(2.5));
        assert_eq!(map.region_mean(&DetectionBox::new(1, 1, 0, 3)), None);
    }

    #[test]
    fn test_scene_bounds_from_extremes() {
        let mut raw = Array2::from_elem((6, 6), -16i16);
        raw[[0, 0]] = 4 * DISPARITY_SCALE;
        raw[[1, 1]] = 20 * DISPARITY_SCALE;
        raw[[2, 2]] = 10 * DISPARITY_SCALE;
        let estimator = canned_estimator(raw);
        let estimate = estimator
            .compute_depth(&blank(), &blank(), &DetectionBox::new(0, 0, 3, 3))
            .unwrap();
        let bounds = estimate.bounds().unwrap();
        assert_relative_eq!(bounds.depth_min_m, 60.0 / 20.0, epsilon = 1e-9);
        assert_relative_eq!(bounds.depth_max_m, 60.0 / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_scene_bounds_not_available_without_positive_disparity() {
        let map = DisparityMap::from_values(Array2::from_elem((4, 4), -1.0));
        let estimator = canned_estimator(Array2::zeros((4, 4)));
        assert!(estimator.scene_bounds(&map).is_none());
        assert!(map.positive_extremes().is_none());
    }

    #[test]
    fn test_several_regions_share_one_map() {
        let raw = Array2::from_shape_fn((8, 8), |(_, x)| if x < 4 { 0 } else { 6 * DISPARITY_SCALE });
        let estimator = canned_estimator(raw);
        let map = estimator.compute_disparity(&blank(), &blank()).unwrap();

        let far = estimator.depth_for_region(&map, &DetectionBox::new(4, 0, 4, 8));
        let empty = estimator.depth_for_region(&map, &DetectionBox::new(0, 0, 4, 8));
        assert_relative_eq!(far.unwrap().distance_m, 10.0, epsilon = 1e-9);
        assert!(matches!(empty, Err(GeolocationError::InsufficientDisparity { .. })));
    }

    #[test]
    fn test_block_matcher_distance_end_to_end() {
        let (left, right) = shifted_pair(40, 96, 6);
        let estimator = StereoDepthEstimator::configure(test_config(), 700.0, 0.1).unwrap();
        let estimate = estimator
            .compute_depth(&left, &right, &DetectionBox::new(40, 10, 20, 20))
            .unwrap();
        assert!((estimate.mean_disparity - 6.0).abs() < 0.5);
        assert_relative_eq!(
            estimate.distance_m,
            70.0 / estimate.mean_disparity as f64,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_configure_rejects_bad_config() {
        let config = StereoMatcherConfig {
            block_size: 4,
            ..StereoMatcherConfig::default()
        };
        assert!(StereoDepthEstimator::configure(config, 500.0, 0.1).is_err());
    }
}
