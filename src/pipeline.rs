// pipeline.rs: object geolocation from boat readings and a stereo detection
//
// Linear stage sequence:
//   ReadPosition → ProjectPosition → ReadOrientation → ComputeHeading →
//   ComputeDistance → ComputeBearing → ComputeTrueHeading → Displace → Done
//
// The first failing stage aborts the run and its error is returned unchanged.
// Each run reads fresh readings and builds a fresh disparity map.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::bearing::bearing_from_center;
use crate::error::{GeolocationError, Result};
use crate::geodesy::displacement::DEFAULT_MAX_RANGE_M;
use crate::geodesy::{CoordinateProjector, DegreeScale, FlatEarthDisplacer, UtmProjector};
use crate::heading::{magnetic_heading, true_heading};
use crate::readings::{read_orientation, read_position};
use crate::stereo::{
    BlockMatcher, DisparityMap, GrayImage, StereoDepthEstimator, StereoMatcher, StereoMatcherConfig,
};
use crate::types::{DepthEstimate, DetectionBox, GeodeticFix, Hemisphere};

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    // ── Heading ──
    pub magnetic_declination_deg: f64,

    // ── Camera rig ──
    pub focal_length_px: f64,
    pub baseline_m: f64,

    // ── Boat position source ──
    pub utm_zone: u8,
    pub hemisphere: Hemisphere,

    // ── Displacement ──
    pub degree_scale: DegreeScale,
    pub max_range_m: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            magnetic_declination_deg: 4.41,
            focal_length_px: 500.0,
            baseline_m: 0.12,
            utm_zone: 33,
            hemisphere: Hemisphere::North,
            degree_scale: DegreeScale::Ellipsoidal,
            max_range_m: DEFAULT_MAX_RANGE_M,
        }
    }
}

impl PipelineSettings {
    /// Load settings from JSON; absent fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let origin = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            log::warn!("Could not read pipeline settings {}: {}", origin, e);
            GeolocationError::config(origin.as_str(), e)
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(content).map_err(|e| GeolocationError::config("settings", e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=60).contains(&self.utm_zone) {
            return Err(GeolocationError::InvalidZone(self.utm_zone));
        }
        positive("focal_length_px", self.focal_length_px)?;
        positive("baseline_m", self.baseline_m)?;
        positive("max_range_m", self.max_range_m)?;
        if !self.magnetic_declination_deg.is_finite() {
            return Err(GeolocationError::config(
                "magnetic_declination_deg",
                "must be finite",
            ));
        }
        if let DegreeScale::Fixed { meters_per_degree } = self.degree_scale {
            positive("meters_per_degree", meters_per_degree)?;
        }
        Ok(())
    }
}

fn positive(parameter: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(GeolocationError::config(
            parameter,
            format!("{} must be positive", value),
        ))
    }
}

// ─── Inputs and outputs ──────────────────────────────────────────────────────

/// Where the boat readings for one run come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadingSources {
    pub position_path: PathBuf,
    pub orientation_path: PathBuf,
}

impl ReadingSources {
    pub fn new(position_path: impl Into<PathBuf>, orientation_path: impl Into<PathBuf>) -> Self {
        Self {
            position_path: position_path.into(),
            orientation_path: orientation_path.into(),
        }
    }
}

/// Rectified stereo pair plus the detection to locate in the left image
#[derive(Clone, Copy, Debug)]
pub struct Observation<'a> {
    pub left: &'a GrayImage,
    pub right: &'a GrayImage,
    pub detection: DetectionBox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    ReadPosition,
    ProjectPosition,
    ReadOrientation,
    ComputeHeading,
    ComputeDistance,
    ComputeBearing,
    ComputeTrueHeading,
    Displace,
    Done,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            PipelineStage::ReadPosition => "read position",
            PipelineStage::ProjectPosition => "project position",
            PipelineStage::ReadOrientation => "read orientation",
            PipelineStage::ComputeHeading => "compute heading",
            PipelineStage::ComputeDistance => "compute distance",
            PipelineStage::ComputeBearing => "compute bearing",
            PipelineStage::ComputeTrueHeading => "compute true heading",
            PipelineStage::Displace => "displace",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Object fix plus the intermediate values it was derived from
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeolocationReport {
    pub object_fix: GeodeticFix,
    pub boat_fix: GeodeticFix,
    pub magnetic_heading_deg: f64,
    pub object_bearing_deg: f64,
    /// Unwrapped sum; see [`crate::heading::normalize_bearing`]
    pub true_heading_deg: f64,
    pub distance_m: f64,
    /// Present when the distance came from stereo matching
    pub depth: Option<DepthEstimate>,
}

/// Boat state shared by every detection of one run
#[derive(Clone, Copy, Debug)]
struct BoatState {
    fix: GeodeticFix,
    magnetic_heading_deg: f64,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct GeolocationPipeline<P: CoordinateProjector = UtmProjector, M: StereoMatcher = BlockMatcher> {
    settings: PipelineSettings,
    projector: P,
    estimator: StereoDepthEstimator<M>,
    displacer: FlatEarthDisplacer,
}

impl GeolocationPipeline<UtmProjector, BlockMatcher> {
    /// WGS84 UTM projection with a block matcher tuned by `matcher_config`
    pub fn new(settings: PipelineSettings, matcher_config: StereoMatcherConfig) -> Result<Self> {
        let estimator = StereoDepthEstimator::configure(
            matcher_config,
            settings.focal_length_px,
            settings.baseline_m,
        )?;
        Self::with_parts(settings, UtmProjector::default(), estimator)
    }
}

impl<P: CoordinateProjector, M: StereoMatcher> GeolocationPipeline<P, M> {
    pub fn with_parts(
        settings: PipelineSettings,
        projector: P,
        estimator: StereoDepthEstimator<M>,
    ) -> Result<Self> {
        settings.validate()?;
        // Bearing uses the settings' camera, range uses the estimator's
        if estimator.focal_length_px() != settings.focal_length_px {
            return Err(GeolocationError::config(
                "focal_length_px",
                format!(
                    "estimator uses {} px but settings say {} px",
                    estimator.focal_length_px(),
                    settings.focal_length_px
                ),
            ));
        }
        if estimator.baseline_m() != settings.baseline_m {
            return Err(GeolocationError::config(
                "baseline_m",
                format!(
                    "estimator uses {} m but settings say {} m",
                    estimator.baseline_m(),
                    settings.baseline_m
                ),
            ));
        }
        let displacer = FlatEarthDisplacer::new(settings.degree_scale, settings.max_range_m);
        Ok(Self {
            settings,
            projector,
            estimator,
            displacer,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn estimator(&self) -> &StereoDepthEstimator<M> {
        &self.estimator
    }

    /// Locate one detection, measuring its range from the stereo pair
    pub fn locate(&self, sources: &ReadingSources, observation: &Observation) -> Result<GeolocationReport> {
        let boat = self.read_boat_state(sources)?;
        let depth = stage(PipelineStage::ComputeDistance, || {
            let map = self
                .estimator
                .compute_disparity(observation.left, observation.right)?;
            self.estimator.depth_for_region(&map, &observation.detection)
        })?;

        self.fix_object(
            &boat,
            observation.detection.center_x() as i64,
            observation.left.ncols(),
            depth.distance_m,
            Some(depth),
        )
    }

    /// Locate a detection whose range is already known
    pub fn locate_at_range(
        &self,
        sources: &ReadingSources,
        center_x: i64,
        image_width: usize,
        distance_m: f64,
    ) -> Result<GeolocationReport> {
        let boat = self.read_boat_state(sources)?;
        log::debug!("Stage: {} (given {:.2} m)", PipelineStage::ComputeDistance, distance_m);
        self.fix_object(&boat, center_x, image_width, distance_m, None)
    }

    /// Locate several detections against one disparity map.
    ///
    /// Reading and matching failures abort the whole call. Each detection then
    /// succeeds or fails on its own.
    pub fn locate_many(
        &self,
        sources: &ReadingSources,
        left: &GrayImage,
        right: &GrayImage,
        detections: &[DetectionBox],
    ) -> Result<Vec<Result<GeolocationReport>>> {
        let boat = self.read_boat_state(sources)?;
        let map: DisparityMap = stage(PipelineStage::ComputeDistance, || {
            self.estimator.compute_disparity(left, right)
        })?;

        let reports = detections
            .iter()
            .map(|detection| {
                let depth = stage(PipelineStage::ComputeDistance, || {
                    self.estimator.depth_for_region(&map, detection)
                })?;
                self.fix_object(
                    &boat,
                    detection.center_x() as i64,
                    left.ncols(),
                    depth.distance_m,
                    Some(depth),
                )
            })
            .collect::<Vec<_>>();

        let located = reports.iter().filter(|r| r.is_ok()).count();
        log::info!("Located {} of {} detections", located, detections.len());
        Ok(reports)
    }

    fn read_boat_state(&self, sources: &ReadingSources) -> Result<BoatState> {
        let position = stage(PipelineStage::ReadPosition, || {
            read_position(
                &sources.position_path,
                self.settings.utm_zone,
                self.settings.hemisphere,
            )
        })?;
        let fix = stage(PipelineStage::ProjectPosition, || {
            Ok(self.projector.to_geodetic(&position))
        })?;
        let orientation = stage(PipelineStage::ReadOrientation, || {
            read_orientation(&sources.orientation_path)
        })?;
        let magnetic_heading_deg = stage(PipelineStage::ComputeHeading, || {
            Ok(magnetic_heading(&orientation))
        })?;

        log::debug!("Boat at {} heading {:.2} deg magnetic", fix, magnetic_heading_deg);
        Ok(BoatState {
            fix,
            magnetic_heading_deg,
        })
    }

    fn fix_object(
        &self,
        boat: &BoatState,
        center_x: i64,
        image_width: usize,
        distance_m: f64,
        depth: Option<DepthEstimate>,
    ) -> Result<GeolocationReport> {
        let object_bearing_deg = stage(PipelineStage::ComputeBearing, || {
            bearing_from_center(center_x, image_width, distance_m, self.settings.focal_length_px)
        })?;
        let true_heading_deg = stage(PipelineStage::ComputeTrueHeading, || {
            Ok(true_heading(
                boat.magnetic_heading_deg,
                self.settings.magnetic_declination_deg,
                object_bearing_deg,
            ))
        })?;
        let object_fix = stage(PipelineStage::Displace, || {
            self.displacer.displace(&boat.fix, distance_m, true_heading_deg)
        })?;

        log::debug!("Stage: {}", PipelineStage::Done);
        log::info!(
            "Object at {} ({:.2} m at {:.2} deg true)",
            object_fix,
            distance_m,
            true_heading_deg
        );

        Ok(GeolocationReport {
            object_fix,
            boat_fix: boat.fix,
            magnetic_heading_deg: boat.magnetic_heading_deg,
            object_bearing_deg,
            true_heading_deg,
            distance_m,
            depth,
        })
    }
}

/// Run one stage with a diagnostic on entry and on failure
fn stage<T>(current: PipelineStage, run: impl FnOnce() -> Result<T>) -> Result<T> {
    log::debug!("Stage: {}", current);
    run().map_err(|e| {
        log::warn!("Stage '{}' failed: {}", current, e);
        e
    })
}
