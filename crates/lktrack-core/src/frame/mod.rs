//! Per-image container handed between tracker calls.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::GrayImage;
use nalgebra::Vector2;

use crate::camera::{Camera, CameraId};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// One camera image plus its keypoint channels.
///
/// All keypoint channels that are present have the same length as the measurement channel.
/// A frame "has keypoints" once the measurement channel is populated.
#[derive(Debug, Clone)]
pub struct VisualFrame {
    id: FrameId,
    timestamp_ns: i64,
    camera: Arc<dyn Camera>,
    raw_image: Option<GrayImage>,
    keypoint_measurements: Option<Vec<Vector2<f64>>>,
    keypoint_measurement_uncertainties: Option<Vec<f64>>,
    keypoint_scores: Option<Vec<f64>>,
    track_ids: Option<Vec<i64>>,
}

impl VisualFrame {
    pub fn new(camera: Arc<dyn Camera>, timestamp_ns: i64) -> Self {
        Self {
            id: FrameId::next(),
            timestamp_ns,
            camera,
            raw_image: None,
            keypoint_measurements: None,
            keypoint_measurement_uncertainties: None,
            keypoint_scores: None,
            track_ids: None,
        }
    }

    pub fn with_raw_image(mut self, image: GrayImage) -> Self {
        self.raw_image = Some(image);
        self
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn camera(&self) -> &Arc<dyn Camera> {
        &self.camera
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera.id()
    }

    pub fn has_raw_image(&self) -> bool {
        self.raw_image.is_some()
    }

    pub fn raw_image(&self) -> Option<&GrayImage> {
        self.raw_image.as_ref()
    }

    pub fn set_raw_image(&mut self, image: GrayImage) {
        self.raw_image = Some(image);
    }

    pub fn has_keypoint_measurements(&self) -> bool {
        self.keypoint_measurements.is_some()
    }

    pub fn keypoint_measurements(&self) -> &[Vector2<f64>] {
        self.keypoint_measurements.as_deref().unwrap_or(&[])
    }

    pub fn set_keypoint_measurements(&mut self, measurements: Vec<Vector2<f64>>) {
        self.keypoint_measurements = Some(measurements);
    }

    pub fn num_keypoint_measurements(&self) -> usize {
        self.keypoint_measurements().len()
    }

    pub fn has_keypoint_measurement_uncertainties(&self) -> bool {
        self.keypoint_measurement_uncertainties.is_some()
    }

    pub fn keypoint_measurement_uncertainties(&self) -> &[f64] {
        self.keypoint_measurement_uncertainties.as_deref().unwrap_or(&[])
    }

    pub fn set_keypoint_measurement_uncertainties(&mut self, uncertainties: Vec<f64>) {
        self.keypoint_measurement_uncertainties = Some(uncertainties);
    }

    pub fn has_keypoint_scores(&self) -> bool {
        self.keypoint_scores.is_some()
    }

    pub fn keypoint_scores(&self) -> &[f64] {
        self.keypoint_scores.as_deref().unwrap_or(&[])
    }

    pub fn set_keypoint_scores(&mut self, scores: Vec<f64>) {
        self.keypoint_scores = Some(scores);
    }

    /// Track ids are assigned downstream. The tracker only checks for their absence.
    pub fn has_track_ids(&self) -> bool {
        self.track_ids.is_some()
    }

    pub fn track_ids(&self) -> &[i64] {
        self.track_ids.as_deref().unwrap_or(&[])
    }

    pub fn set_track_ids(&mut self, track_ids: Vec<i64>) {
        self.track_ids = Some(track_ids);
    }
}
