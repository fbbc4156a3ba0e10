use std::collections::HashSet;
use std::sync::Arc;

use image::GrayImage;
use log::{debug, trace, warn};
use nalgebra::Vector2;
use tracing::debug_span;

use super::detect::{DetectedKeypoint, DetectionSource, build_detection_source};
use super::lk::{FlowObservation, FlowTracker, LucasKanadeConfig, PyramidalLkTracker};
use super::occupancy_grid::{OccupancyGrid, WeightedKeypoint};
use super::predict::predict_keypoints_by_rotation;
use super::stats::TrackingStats;
use crate::camera::Camera;
use crate::config::LkTrackerSettings;
use crate::error::{Result, TrackerError};
use crate::frame::{FrameId, VisualFrame};
use crate::img::mask::{and_masks, border_detection_mask, is_inside_border};
use crate::math::SO3;

/// Keypoints closer than this to any image edge are neither detected nor tracked.
pub const MIN_DISTANCE_TO_IMAGE_BORDER_PX: u32 = 30;
/// Measurement uncertainty written alongside every keypoint.
pub const KEYPOINT_UNCERTAINTY_PX: f64 = 0.8;

/// Correspondence between keypoint `index_kp1` of the new frame and `index_k` of the
/// previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameToFrameMatch {
    pub index_kp1: usize,
    pub index_k: usize,
    pub score: f64,
}

/// Keypoints of one frame that the next tracking step must drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortRequest {
    pub frame_id: FrameId,
    pub indices: HashSet<usize>,
}

/// Tracks keypoints between consecutive frames of one camera and keeps their number between
/// the configured bounds.
pub struct LkFeatureTracker {
    camera: Arc<dyn Camera>,
    settings: LkTrackerSettings,
    detection_source: Box<dyn DetectionSource>,
    flow_tracker: Box<dyn FlowTracker>,
    detection_mask_image_border: GrayImage,
    abort_request: Option<AbortRequest>,
    last_stats: TrackingStats,
}

impl LkFeatureTracker {
    /// Builds a tracker with the detector selected in `settings` and a pyramidal LK tracker.
    pub fn new(camera: Arc<dyn Camera>, settings: LkTrackerSettings) -> Result<Self> {
        settings.validate()?;
        let detection_source = build_detection_source(&settings, MIN_DISTANCE_TO_IMAGE_BORDER_PX);
        let flow_tracker = Box::new(PyramidalLkTracker::new(LucasKanadeConfig::from(&settings)));
        Self::with_components(camera, settings, detection_source, flow_tracker)
    }

    pub fn with_components(
        camera: Arc<dyn Camera>,
        settings: LkTrackerSettings,
        detection_source: Box<dyn DetectionSource>,
        flow_tracker: Box<dyn FlowTracker>,
    ) -> Result<Self> {
        settings.validate()?;

        let (width, height) = (camera.image_width(), camera.image_height());
        let margin = MIN_DISTANCE_TO_IMAGE_BORDER_PX;
        if 2 * margin >= width || 2 * margin >= height {
            return Err(TrackerError::ImageTooSmall {
                width,
                height,
                margin,
            });
        }

        let detection_mask_image_border = match camera.mask() {
            Some(mask) => {
                let (mask_width, mask_height) = mask.dimensions();
                if mask_width != width || mask_height != height {
                    return Err(TrackerError::MaskSizeMismatch {
                        mask_width,
                        mask_height,
                        width,
                        height,
                    });
                }
                mask.clone()
            }
            None => border_detection_mask(width, height, margin),
        };

        debug!(
            "LK tracker for {} ({}x{}): {} detector, {}..{} features, min distance {:.1}px",
            camera.id(),
            width,
            height,
            settings.detector_type,
            settings.min_feature_count,
            settings.max_feature_count,
            settings.min_distance_between_features_px
        );

        Ok(Self {
            camera,
            settings,
            detection_source,
            flow_tracker,
            detection_mask_image_border,
            abort_request: None,
            last_stats: TrackingStats::default(),
        })
    }

    pub fn settings(&self) -> &LkTrackerSettings {
        &self.settings
    }

    /// Counters of the most recent [`track`](Self::track) call.
    pub fn last_stats(&self) -> &TrackingStats {
        &self.last_stats
    }

    pub fn pending_abort_request(&self) -> Option<&AbortRequest> {
        self.abort_request.as_ref()
    }

    /// Replaces the pending abort request. The indices refer to the keypoints of `frame_id`,
    /// which must be the previous frame of the next [`track`](Self::track) call.
    pub fn set_keypoint_indices_to_abort(
        &mut self,
        frame_id: FrameId,
        indices: impl IntoIterator<Item = usize>,
    ) {
        let indices: HashSet<usize> = indices.into_iter().collect();
        trace!("{} keypoints of {} marked for abort", indices.len(), frame_id);
        self.abort_request = Some(AbortRequest { frame_id, indices });
    }

    /// Detects the first keypoint set of a frame that has none yet.
    pub fn initialize_keypoints_in_empty_frame(&self, frame: &mut VisualFrame) -> Result<()> {
        let _span = debug_span!("initialize_keypoints", frame = %frame.id()).entered();
        self.check_camera(frame)?;
        if frame.num_keypoint_measurements() > 0 {
            return Err(TrackerError::FrameNotEmpty(frame.id()));
        }
        let image = frame
            .raw_image()
            .ok_or(TrackerError::MissingRawImage(frame.id()))?;

        let mut grid = self.new_grid();
        let mut stats = TrackingStats::default();
        self.detect_new_keypoints(image, &self.detection_mask_image_border, &mut grid, &mut stats);

        let points = grid.all_points();
        debug!("Initialized {} keypoints in {}", points.len(), frame.id());
        write_keypoints(frame, &points);
        Ok(())
    }

    /// Tracks the keypoints of `frame_k` into `frame_kp1`, replenishes them if too few survive
    /// and returns the correspondences. The pending abort request is consumed in any case.
    pub fn track(
        &mut self,
        q_kp1_k: &SO3,
        frame_k: &VisualFrame,
        frame_kp1: &mut VisualFrame,
    ) -> Result<Vec<FrameToFrameMatch>> {
        let _span = debug_span!("track", frame_k = %frame_k.id(), frame_kp1 = %frame_kp1.id())
            .entered();
        let abort_request = self.abort_request.take();
        self.last_stats = TrackingStats::default();
        let mut stats = TrackingStats::default();
        let result = self.track_impl(q_kp1_k, frame_k, frame_kp1, abort_request.as_ref(), &mut stats);
        self.last_stats = stats;
        result
    }

    fn track_impl(
        &self,
        q_kp1_k: &SO3,
        frame_k: &VisualFrame,
        frame_kp1: &mut VisualFrame,
        abort_request: Option<&AbortRequest>,
        stats: &mut TrackingStats,
    ) -> Result<Vec<FrameToFrameMatch>> {
        self.check_camera(frame_k)?;
        self.check_camera(frame_kp1)?;
        if !frame_k.has_keypoint_measurements() {
            warn!(
                "{} has no keypoint measurements; only detecting new keypoints in {}",
                frame_k.id(),
                frame_kp1.id()
            );
        }
        if frame_kp1.num_keypoint_measurements() > 0 {
            return Err(TrackerError::FrameNotEmpty(frame_kp1.id()));
        }
        if frame_kp1.has_track_ids() {
            return Err(TrackerError::FrameHasTrackIds(frame_kp1.id()));
        }
        if let Some(request) = abort_request {
            if !request.indices.is_empty() && request.frame_id != frame_k.id() {
                return Err(TrackerError::AbortFrameMismatch {
                    expected: request.frame_id,
                    found: frame_k.id(),
                });
            }
        }
        let image_kp1 = frame_kp1
            .raw_image()
            .ok_or(TrackerError::MissingRawImage(frame_kp1.id()))?;

        let observations = self.track_keypoints(q_kp1_k, frame_k, image_kp1, stats)?;

        let detections = self.detection_source.detect(
            image_kp1,
            self.settings.max_feature_count,
            &self.detection_mask_image_border,
        );
        trace!("Detected {} snap candidates", detections.len());

        let mut grid = self.new_grid();
        let abort_indices = abort_request.map(|r| &r.indices);
        self.insert_tracked_keypoints(&observations, &detections, abort_indices, &mut grid, stats);

        // Tracked points must survive the redetection below.
        grid.set_constant_weight_for_all_points(f64::MAX);

        if grid.num_points() < self.settings.min_feature_count {
            stats.redetection_triggered = true;
            debug!(
                "{} tracked keypoints below minimum of {}; redetecting",
                grid.num_points(),
                self.settings.min_feature_count
            );
            let occupancy_mask = grid.occupancy_mask(
                self.settings.min_distance_between_features_px,
                usize::MAX,
            );
            let detection_mask = and_masks(&self.detection_mask_image_border, &occupancy_mask);
            self.detect_new_keypoints(image_kp1, &detection_mask, &mut grid, stats);
        }

        let points = grid.all_points();
        let matches: Vec<FrameToFrameMatch> = points
            .iter()
            .enumerate()
            .filter_map(|(index_kp1, point)| {
                point.correspondence.map(|index_k| FrameToFrameMatch {
                    index_kp1,
                    index_k,
                    score: point.weight,
                })
            })
            .collect();
        write_keypoints(frame_kp1, &points);

        debug!(
            "Tracked {}/{} keypoints into {} ({} total, {} new)",
            stats.tracked,
            stats.tried,
            frame_kp1.id(),
            points.len(),
            stats.added
        );
        Ok(matches)
    }

    /// Predicts and runs the flow tracker for every keypoint of `frame_k`.
    fn track_keypoints(
        &self,
        q_kp1_k: &SO3,
        frame_k: &VisualFrame,
        image_kp1: &GrayImage,
        stats: &mut TrackingStats,
    ) -> Result<Vec<FlowObservation>> {
        let keypoints_k = frame_k.keypoint_measurements();
        if keypoints_k.is_empty() {
            trace!("{} has no keypoints to track", frame_k.id());
            return Ok(Vec::new());
        }
        let image_k = frame_k
            .raw_image()
            .ok_or(TrackerError::MissingRawImage(frame_k.id()))?;

        let predictions = predict_keypoints_by_rotation(self.camera.as_ref(), keypoints_k, q_kp1_k);
        stats.prediction_success = predictions.iter().filter(|p| p.success).count();
        stats.prediction_failure = predictions.len() - stats.prediction_success;
        debug!(
            "Rotation prediction succeeded for {}/{} keypoints",
            stats.prediction_success,
            predictions.len()
        );

        let seeds: Vec<Vector2<f64>> = predictions.iter().map(|p| p.position).collect();
        let observations = self.flow_tracker.track(image_k, image_kp1, keypoints_k, &seeds);
        assert_eq!(
            observations.len(),
            keypoints_k.len(),
            "Flow tracker must report every keypoint."
        );
        Ok(observations)
    }

    fn insert_tracked_keypoints(
        &self,
        observations: &[FlowObservation],
        detections: &[DetectedKeypoint],
        abort_indices: Option<&HashSet<usize>>,
        grid: &mut OccupancyGrid,
        stats: &mut TrackingStats,
    ) {
        let (width, height) = (self.camera.image_width(), self.camera.image_height());
        let min_distance = self.settings.min_distance_between_features_px;
        stats.tried = observations.len();
        let mut num_inserted = 0usize;

        for (index_k, observation) in observations.iter().enumerate() {
            if !observation.outcome.is_success() {
                stats.failed_tracking += 1;
                continue;
            }

            let mut position = observation.position;
            if !is_inside_border(&position, width, height, MIN_DISTANCE_TO_IMAGE_BORDER_PX) {
                stats.outside_image += 1;
                continue;
            }

            if abort_indices.is_some_and(|indices| indices.contains(&index_k)) {
                stats.external_abort += 1;
                continue;
            }

            let error = observation.error as f64;
            match nearest_detection(detections, &position) {
                Some((nearest, distance_sq))
                    if distance_sq < self.settings.keypoint_search_radius_px_squared =>
                {
                    position = nearest.position;
                    stats.snapped_to_detection += 1;
                }
                _ if error > self.settings.max_tracking_error => {
                    stats.too_high_error += 1;
                    continue;
                }
                _ => {}
            }

            num_inserted += 1;
            grid.add_point_or_replace_weakest_nearest_points(
                WeightedKeypoint::tracked(position, -error, index_k),
                min_distance,
            );
        }

        stats.tracked = grid.num_points();
        stats.failed_occupancy_grid = num_inserted - grid.num_points();
        trace!(
            "Track filter: {} failed, {} outside, {} aborted, {} high error, {} lost in grid",
            stats.failed_tracking,
            stats.outside_image,
            stats.external_abort,
            stats.too_high_error,
            stats.failed_occupancy_grid
        );
    }

    /// Fills `grid` up to the maximum feature count with detections allowed by `mask`.
    fn detect_new_keypoints(
        &self,
        image: &GrayImage,
        mask: &GrayImage,
        grid: &mut OccupancyGrid,
        stats: &mut TrackingStats,
    ) {
        let num_before = grid.num_points();
        let budget = self.settings.max_feature_count.saturating_sub(num_before);
        let detections = self.detection_source.detect(image, budget, mask);
        let (width, height) = image.dimensions();

        for detection in &detections {
            if !is_inside_border(
                &detection.position,
                width,
                height,
                MIN_DISTANCE_TO_IMAGE_BORDER_PX,
            ) {
                continue;
            }
            grid.add_point_or_replace_weakest_nearest_points(
                WeightedKeypoint::detected(detection.position, detection.score),
                self.settings.min_distance_between_features_px,
            );
        }

        stats.detected = detections.len();
        stats.added = grid.num_points() - num_before;
        stats.rejected = stats.detected - stats.added;
        debug!(
            "Detected {} keypoints (budget {}): {} added, {} rejected",
            stats.detected, budget, stats.added, stats.rejected
        );
    }

    fn new_grid(&self) -> OccupancyGrid {
        OccupancyGrid::new(
            self.camera.image_width(),
            self.camera.image_height(),
            self.settings.min_distance_between_features_px,
        )
    }

    fn check_camera(&self, frame: &VisualFrame) -> Result<()> {
        if frame.camera_id() != self.camera.id() {
            return Err(TrackerError::CameraMismatch {
                frame: frame.id(),
                expected: self.camera.id(),
                found: frame.camera_id(),
            });
        }
        Ok(())
    }
}

fn nearest_detection<'a>(
    detections: &'a [DetectedKeypoint],
    position: &Vector2<f64>,
) -> Option<(&'a DetectedKeypoint, f64)> {
    detections
        .iter()
        .map(|d| (d, (d.position - position).norm_squared()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn write_keypoints(frame: &mut VisualFrame, points: &[WeightedKeypoint]) {
    frame.set_keypoint_measurements(points.iter().map(|p| p.position).collect());
    frame.set_keypoint_measurement_uncertainties(vec![KEYPOINT_UNCERTAINTY_PX; points.len()]);
    frame.set_keypoint_scores(points.iter().map(|p| p.weight).collect());
}
