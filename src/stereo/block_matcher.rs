//! Sum-of-absolute-differences block matcher over rectified grayscale pairs.
//!
//! Output disparities are fixed-point with `DISPARITY_SCALE` fractional steps
//! per pixel. Pixels rejected by any filter carry `(min_disparity - 1) * 16`.
//!
//! # Algorithm
//! 1. Pre-filter both images (normalized response or x-Sobel, clamped to cap)
//! 2. For every candidate disparity, window SAD costs via an integral image
//! 3. Winner-take-all per pixel, plus the best right-image match for the
//!    left-right check
//! 4. Second sweep: neighbour costs for sub-pixel refinement and uniqueness
//! 5. Texture, uniqueness and left-right rejection, then speckle removal

use ndarray::Array2;
use std::path::Path;

use super::config::{PreFilterKind, StereoMatcherConfig};
use crate::error::{GeolocationError, Result};

/// 8-bit grayscale image, indexed `[[row, col]]`
pub type GrayImage = Array2<u8>;

/// Fractional steps per pixel in fixed-point disparity output
pub const DISPARITY_SCALE: i16 = 16;

const NO_MATCH: i32 = i32::MIN;

/// Capability: turn a rectified stereo pair into a fixed-point disparity map
pub trait StereoMatcher {
    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<Array2<i16>>;
}

/// Block matcher bound to one validated parameter set
#[derive(Clone, Debug)]
pub struct BlockMatcher {
    config: StereoMatcherConfig,
}

impl BlockMatcher {
    pub fn new(config: StereoMatcherConfig) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Configured block matcher: {} disparities from {}, window {}",
            config.num_disparities,
            config.min_disparity,
            config.block_size
        );
        Ok(Self { config })
    }

    /// Build a matcher from a parameter file; fails rather than running untuned
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(StereoMatcherConfig::from_file(path)?)
    }

    pub fn config(&self) -> &StereoMatcherConfig {
        &self.config
    }

    /// Marker written to rejected pixels
    pub fn invalid_disparity(&self) -> i16 {
        ((self.config.min_disparity - 1) * DISPARITY_SCALE as i32) as i16
    }
}

impl StereoMatcher for BlockMatcher {
    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<Array2<i16>> {
        if left.dim() != right.dim() {
            return Err(GeolocationError::ImageMismatch {
                left: left.dim(),
                right: right.dim(),
            });
        }

        let (rows, cols) = left.dim();
        let block = self.config.block_size as usize;
        if rows < block || cols < block {
            return Err(GeolocationError::config(
                "SADWindowSize",
                format!("window {} larger than {}x{} image", block, cols, rows),
            ));
        }

        let cap = self.config.pre_filter_cap;
        let left_pf = pre_filter(left, &self.config);
        let right_pf = pre_filter(right, &self.config);

        let half = block / 2;
        let min_d = self.config.min_disparity;
        let max_d = self.config.max_disparity();

        // ── Sweep 1: winner-take-all for left and right views ──
        let mut best_cost = Array2::<u64>::from_elem((rows, cols), u64::MAX);
        let mut best_d = Array2::<i32>::from_elem((rows, cols), NO_MATCH);
        let mut right_cost = Array2::<u64>::from_elem((rows, cols), u64::MAX);
        let mut right_d = Array2::<i32>::from_elem((rows, cols), NO_MATCH);

        for d in min_d..max_d {
            let Some((x_lo, x_hi)) = valid_columns(cols, half, d) else {
                continue;
            };
            let costs = sad_integral(&left_pf, &right_pf, d);
            for y in half..rows - half {
                for x in x_lo..=x_hi {
                    let c = costs.window_sum(y, x, half);
                    if c < best_cost[[y, x]] {
                        best_cost[[y, x]] = c;
                        best_d[[y, x]] = d;
                    }
                    let xr = (x as i64 - d as i64) as usize;
                    if c < right_cost[[y, xr]] {
                        right_cost[[y, xr]] = c;
                        right_d[[y, xr]] = d;
                    }
                }
            }
        }

        // ── Sweep 2: neighbour costs and uniqueness ──
        let mut prev_cost = Array2::<u64>::from_elem((rows, cols), u64::MAX);
        let mut next_cost = Array2::<u64>::from_elem((rows, cols), u64::MAX);
        let mut ambiguous = Array2::<bool>::from_elem((rows, cols), false);
        let uniqueness = self.config.uniqueness_ratio as u64;

        for d in min_d..max_d {
            let Some((x_lo, x_hi)) = valid_columns(cols, half, d) else {
                continue;
            };
            let costs = sad_integral(&left_pf, &right_pf, d);
            for y in half..rows - half {
                for x in x_lo..=x_hi {
                    let winner = best_d[[y, x]];
                    if winner == NO_MATCH {
                        continue;
                    }
                    let c = costs.window_sum(y, x, half);
                    if d == winner - 1 {
                        prev_cost[[y, x]] = c;
                    } else if d == winner + 1 {
                        next_cost[[y, x]] = c;
                    } else if d != winner
                        && uniqueness > 0
                        && c.saturating_mul(100)
                            <= best_cost[[y, x]].saturating_mul(100 + uniqueness)
                    {
                        ambiguous[[y, x]] = true;
                    }
                }
            }
        }

        // ── Rejection filters and sub-pixel output ──
        let invalid = self.invalid_disparity();
        let texture = if self.config.texture_threshold > 0 {
            Some(IntegralImage::new(rows, cols, |y, x| {
                (left_pf[[y, x]] - cap).unsigned_abs() as u64
            }))
        } else {
            None
        };

        let mut disparity = Array2::<i16>::from_elem((rows, cols), invalid);
        for y in 0..rows {
            for x in 0..cols {
                let winner = best_d[[y, x]];
                if winner == NO_MATCH || ambiguous[[y, x]] {
                    continue;
                }
                if let Some(tex) = &texture {
                    if tex.window_sum(y, x, half) < self.config.texture_threshold as u64 {
                        continue;
                    }
                }
                if self.config.disp12_max_diff >= 0 {
                    let xr = (x as i64 - winner as i64) as usize;
                    let rd = right_d[[y, xr]];
                    if rd != NO_MATCH && (rd - winner).abs() > self.config.disp12_max_diff {
                        continue;
                    }
                }

                let offset = subpixel_offset(
                    prev_cost[[y, x]],
                    best_cost[[y, x]],
                    next_cost[[y, x]],
                );
                let value = ((winner as f64 + offset) * DISPARITY_SCALE as f64).round();
                disparity[[y, x]] = value as i16;
            }
        }

        if self.config.speckle_window_size > 0 {
            filter_speckles(
                &mut disparity,
                invalid,
                self.config.speckle_window_size as usize,
                self.config.speckle_range * DISPARITY_SCALE as i32,
            );
        }

        Ok(disparity)
    }
}

/// Summed-area table with a zero guard row and column
struct IntegralImage {
    sums: Array2<u64>,
}

impl IntegralImage {
    fn new<F: Fn(usize, usize) -> u64>(rows: usize, cols: usize, value: F) -> Self {
        let mut sums = Array2::<u64>::zeros((rows + 1, cols + 1));
        for y in 0..rows {
            let mut row_sum = 0u64;
            for x in 0..cols {
                row_sum += value(y, x);
                sums[[y + 1, x + 1]] = sums[[y, x + 1]] + row_sum;
            }
        }
        Self { sums }
    }

    /// Sum over rows `top..bottom`, cols `left..right`
    fn rect_sum(&self, top: usize, left: usize, bottom: usize, right: usize) -> u64 {
        (self.sums[[bottom, right]] + self.sums[[top, left]])
            - (self.sums[[top, right]] + self.sums[[bottom, left]])
    }

    /// Sum over the square window centred on (y, x); caller keeps it in bounds
    fn window_sum(&self, y: usize, x: usize, half: usize) -> u64 {
        self.rect_sum(y - half, x - half, y + half + 1, x + half + 1)
    }
}

/// Column range whose window fits in both views at disparity `d`
fn valid_columns(cols: usize, half: usize, d: i32) -> Option<(usize, usize)> {
    let half = half as i64;
    let last = cols as i64 - 1;
    let d = d as i64;
    let lo = half.max(half + d);
    let hi = (last - half).min(last - half + d);
    if lo > hi {
        None
    } else {
        Some((lo as usize, hi as usize))
    }
}

fn sad_integral(left: &Array2<i32>, right: &Array2<i32>, d: i32) -> IntegralImage {
    let (rows, cols) = left.dim();
    IntegralImage::new(rows, cols, |y, x| {
        let xr = x as i64 - d as i64;
        if xr < 0 || xr >= cols as i64 {
            0
        } else {
            (left[[y, x]] - right[[y, xr as usize]]).unsigned_abs() as u64
        }
    })
}

/// Parabola vertex through the costs around the winner, in pixels
fn subpixel_offset(prev: u64, best: u64, next: u64) -> f64 {
    if prev == u64::MAX || next == u64::MAX {
        return 0.0;
    }
    let (p, c, n) = (prev as f64, best as f64, next as f64);
    let denom = p + n - 2.0 * c;
    if denom <= 0.0 {
        return 0.0;
    }
    ((p - n) / (2.0 * denom)).clamp(-0.5, 0.5)
}

/// Clamp a filter response into `[0, 2 * cap]`
fn clamp_response(response: i32, cap: i32) -> i32 {
    response.clamp(-cap, cap) + cap
}

fn pre_filter(image: &GrayImage, config: &StereoMatcherConfig) -> Array2<i32> {
    let (rows, cols) = image.dim();
    let cap = config.pre_filter_cap;
    let px = |y: usize, x: usize| image[[y, x]] as i32;

    match config.pre_filter_type {
        PreFilterKind::XSobel => {
            let mut out = Array2::<i32>::from_elem((rows, cols), cap);
            for y in 1..rows.saturating_sub(1) {
                for x in 1..cols.saturating_sub(1) {
                    let response = (px(y - 1, x + 1) - px(y - 1, x - 1))
                        + 2 * (px(y, x + 1) - px(y, x - 1))
                        + (px(y + 1, x + 1) - px(y + 1, x - 1));
                    out[[y, x]] = clamp_response(response, cap);
                }
            }
            out
        }
        PreFilterKind::NormalizedResponse => {
            let half = config.pre_filter_size as usize / 2;
            let sums = IntegralImage::new(rows, cols, |y, x| image[[y, x]] as u64);
            let mut out = Array2::<i32>::zeros((rows, cols));
            for y in 0..rows {
                let top = y.saturating_sub(half);
                let bottom = (y + half + 1).min(rows);
                for x in 0..cols {
                    let left = x.saturating_sub(half);
                    let right = (x + half + 1).min(cols);
                    let count = ((bottom - top) * (right - left)) as f64;
                    let mean = sums.rect_sum(top, left, bottom, right) as f64 / count;
                    let response = (px(y, x) as f64 - mean).round() as i32;
                    out[[y, x]] = clamp_response(response, cap);
                }
            }
            out
        }
    }
}

/// Invalidate 4-connected regions smaller than `max_size` pixels.
///
/// Neighbours belong to one region when their disparities differ by at most
/// `max_diff` (fixed-point units).
pub fn filter_speckles(disparity: &mut Array2<i16>, invalid: i16, max_size: usize, max_diff: i32) {
    let (rows, cols) = disparity.dim();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut stack = Vec::new();
    let mut region = Vec::new();

    for y0 in 0..rows {
        for x0 in 0..cols {
            if visited[[y0, x0]] || disparity[[y0, x0]] == invalid {
                continue;
            }

            region.clear();
            stack.push((y0, x0));
            visited[[y0, x0]] = true;

            while let Some((y, x)) = stack.pop() {
                region.push((y, x));
                let value = disparity[[y, x]] as i32;

                let neighbours = [
                    (y.wrapping_sub(1), x),
                    (y + 1, x),
                    (y, x.wrapping_sub(1)),
                    (y, x + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny >= rows || nx >= cols || visited[[ny, nx]] {
                        continue;
                    }
                    let other = disparity[[ny, nx]];
                    if other != invalid && (other as i32 - value).abs() <= max_diff {
                        visited[[ny, nx]] = true;
                        stack.push((ny, nx));
                    }
                }
            }

            if region.len() < max_size {
                for &(y, x) in &region {
                    disparity[[y, x]] = invalid;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic high-frequency texture
    pub(crate) fn textured_image(rows: usize, cols: usize, seed: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        Array2::from_shape_fn((rows, cols), |_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
    }

    /// Right view of a fronto-parallel plane at constant disparity
    pub(crate) fn shifted_pair(rows: usize, cols: usize, shift: usize) -> (GrayImage, GrayImage) {
        let left = textured_image(rows, cols, 7);
        let filler = textured_image(rows, cols, 99);
        let right = Array2::from_shape_fn((rows, cols), |(y, x)| {
            if x + shift < cols {
                left[[y, x + shift]]
            } else {
                filler[[y, x]]
            }
        });
        (left, right)
    }

    pub(crate) fn test_config() -> StereoMatcherConfig {
        StereoMatcherConfig {
            block_size: 7,
            num_disparities: 16,
            ..StereoMatcherConfig::default()
        }
    }

    fn assert_plane(disparity: &Array2<i16>, shift: usize, half: usize, max_d: usize) {
        let (rows, cols) = disparity.dim();
        for y in half..rows - half {
            for x in half + max_d..cols - half {
                let d = disparity[[y, x]] as f64 / DISPARITY_SCALE as f64;
                assert!(
                    (d - shift as f64).abs() < 0.5,
                    "pixel ({}, {}) disparity {} expected {}",
                    y,
                    x,
                    d,
                    shift
                );
            }
        }
    }

    #[test]
    fn test_recovers_constant_shift_xsobel() {
        let (left, right) = shifted_pair(40, 96, 5);
        let matcher = BlockMatcher::new(test_config()).unwrap();
        let disparity = matcher.compute(&left, &right).unwrap();
        assert_plane(&disparity, 5, 3, 16);
    }

    #[test]
    fn test_recovers_constant_shift_normalized() {
        let (left, right) = shifted_pair(40, 96, 9);
        let config = StereoMatcherConfig {
            pre_filter_type: PreFilterKind::NormalizedResponse,
            ..test_config()
        };
        let matcher = BlockMatcher::new(config).unwrap();
        let disparity = matcher.compute(&left, &right).unwrap();
        assert_plane(&disparity, 9, 3, 16);
    }

    #[test]
    fn test_textureless_pair_is_invalid() {
        let flat = Array2::<u8>::from_elem((32, 64), 128);
        let matcher = BlockMatcher::new(test_config()).unwrap();
        let disparity = matcher.compute(&flat, &flat).unwrap();
        let invalid = matcher.invalid_disparity();
        assert_eq!(invalid, -16);
        assert!(disparity.iter().all(|&d| d == invalid));
    }

    #[test]
    fn test_deterministic_output() {
        let (left, right) = shifted_pair(30, 80, 4);
        let matcher = BlockMatcher::new(test_config()).unwrap();
        let first = matcher.compute(&left, &right).unwrap();
        let second = matcher.compute(&left, &right).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dimension_mismatch() {
        let left = textured_image(20, 40, 1);
        let right = textured_image(20, 41, 2);
        let matcher = BlockMatcher::new(test_config()).unwrap();
        let err = matcher.compute(&left, &right).unwrap_err();
        assert_eq!(
            err,
            GeolocationError::ImageMismatch {
                left: (20, 40),
                right: (20, 41)
            }
        );
    }

    #[test]
    fn test_window_larger_than_image() {
        let tiny = textured_image(5, 5, 3);
        let matcher = BlockMatcher::new(test_config()).unwrap();
        assert!(matches!(
            matcher.compute(&tiny, &tiny),
            Err(GeolocationError::Config { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = StereoMatcherConfig {
            num_disparities: 0,
            ..StereoMatcherConfig::default()
        };
        assert!(BlockMatcher::new(config).is_err());

        // Would overflow the fixed-point speckle step in compute()
        let config = StereoMatcherConfig {
            speckle_range: 200_000_000,
            ..StereoMatcherConfig::default()
        };
        assert!(BlockMatcher::new(config).is_err());
    }

    #[test]
    fn test_speckle_filter_removes_small_island() {
        let mut disparity = Array2::<i16>::from_elem((6, 6), 160);
        disparity[[2, 2]] = 80;
        disparity[[2, 3]] = 80;
        disparity[[3, 2]] = 80;
        disparity[[3, 3]] = 80;

        filter_speckles(&mut disparity, -16, 5, 16);

        assert_eq!(disparity[[2, 2]], -16);
        assert_eq!(disparity[[3, 3]], -16);
        assert_eq!(disparity[[0, 0]], 160);
        assert_eq!(disparity.iter().filter(|&&d| d == 160).count(), 32);
    }

    #[test]
    fn test_speckle_filter_keeps_smooth_region() {
        // Gentle ramp stays one connected region
        let mut disparity = Array2::from_shape_fn((4, 4), |(_, x)| 100 + 8 * x as i16);
        let before = disparity.clone();
        filter_speckles(&mut disparity, -16, 10, 16);
        assert_eq!(disparity, before);
    }

    #[test]
    fn test_subpixel_offset() {
        assert_eq!(subpixel_offset(10, 0, 10), 0.0);
        assert!(subpixel_offset(20, 0, 10) > 0.0);
        assert!(subpixel_offset(10, 0, 20) < 0.0);
        assert_eq!(subpixel_offset(u64::MAX, 0, 10), 0.0);
        assert_eq!(subpixel_offset(5, 5, 5), 0.0);
    }

    #[test]
    fn test_valid_columns() {
        assert_eq!(valid_columns(20, 3, 0), Some((3, 16)));
        assert_eq!(valid_columns(20, 3, 5), Some((8, 16)));
        assert_eq!(valid_columns(20, 3, -2), Some((3, 14)));
        assert_eq!(valid_columns(10, 3, 8), None);
    }
}
