//! Stereo distance estimation
//!
//! Block matching over a rectified pair, disparity maps, and the
//! disparity → distance conversion for detection regions.

pub mod block_matcher;
pub mod config;
pub mod depth;

pub use block_matcher::{BlockMatcher, GrayImage, StereoMatcher, DISPARITY_SCALE};
pub use config::{PreFilterKind, StereoMatcherConfig};
pub use depth::{DisparityMap, StereoDepthEstimator};
