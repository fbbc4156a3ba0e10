//! Keypoint detection behind a mask- and budget-aware adapter.

use image::GrayImage;
use log::debug;
use nalgebra::Vector2;

use crate::config::{DetectorType, LkTrackerSettings};
use crate::img::mask::{is_allowed, is_inside_border};

pub mod fast;
pub mod gftt;
pub mod hessian;
pub mod scale_space;

pub use fast::FastDetector;
pub use gftt::GfttDetector;
pub use hessian::HessianDetector;
pub use scale_space::ScaleSpaceDetector;

/// Candidate keypoint handed to the tracker; higher scores are better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedKeypoint {
    pub position: Vector2<f64>,
    pub score: f64,
}

/// Source of fresh keypoints for bootstrapping and replenishment.
pub trait DetectionSource: Send + Sync {
    /// Returns at most `budget` keypoints, best first, located on non-zero pixels of `mask`.
    fn detect(&self, image: &GrayImage, budget: usize, mask: &GrayImage) -> Vec<DetectedKeypoint>;
}

/// Detector output before scoring and budgeting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawKeypoint {
    pub position: Vector2<f64>,
    /// Native detector response. `None` for detectors that only rank their output.
    pub response: Option<f32>,
}

pub trait KeypointDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether [`detect`](Self::detect) restricts itself to the mask it is given.
    fn supports_mask(&self) -> bool;

    /// `budget` is a hint; callers truncate the result themselves.
    fn detect(&self, image: &GrayImage, mask: Option<&GrayImage>, budget: usize)
        -> Vec<RawKeypoint>;
}

/// Adapts a [`KeypointDetector`] to the [`DetectionSource`] contract.
pub struct MaskedDetectionSource {
    detector: Box<dyn KeypointDetector>,
    border_margin: u32,
}

impl MaskedDetectionSource {
    pub fn new(detector: Box<dyn KeypointDetector>, border_margin: u32) -> Self {
        Self {
            detector,
            border_margin,
        }
    }
}

impl DetectionSource for MaskedDetectionSource {
    fn detect(&self, image: &GrayImage, budget: usize, mask: &GrayImage) -> Vec<DetectedKeypoint> {
        if budget == 0 {
            return Vec::new();
        }

        let raw = if self.detector.supports_mask() {
            self.detector.detect(image, Some(mask), budget)
        } else {
            self.detector
                .detect(image, None, budget)
                .into_iter()
                .filter(|kp| is_allowed(mask, &kp.position))
                .collect()
        };
        let num_raw = raw.len();

        let mut detected: Vec<DetectedKeypoint> = raw
            .into_iter()
            .enumerate()
            .map(|(i, kp)| DetectedKeypoint {
                position: kp.position,
                score: kp.response.map_or(1.0 - i as f64, f64::from),
            })
            .collect();

        // `sort_by` is stable, equal scores keep detector order.
        detected.sort_by(|a, b| b.score.total_cmp(&a.score));
        detected.truncate(budget);

        let (width, height) = image.dimensions();
        detected.retain(|kp| is_inside_border(&kp.position, width, height, self.border_margin));

        debug!(
            "{} detection in {}x{} → {} raw, {} kept (budget {})",
            self.detector.name(),
            width,
            height,
            num_raw,
            detected.len(),
            budget
        );
        detected
    }
}

/// Builds the detection source selected by `settings.detector_type`.
pub fn build_detection_source(
    settings: &LkTrackerSettings,
    border_margin: u32,
) -> Box<dyn DetectionSource> {
    let detector: Box<dyn KeypointDetector> = match settings.detector_type {
        DetectorType::Fast => Box::new(FastDetector::new(settings.fast)),
        DetectorType::Brisk => Box::new(ScaleSpaceDetector::new(settings.brisk)),
        DetectorType::Hessian => Box::new(HessianDetector::new(settings.hessian)),
        DetectorType::Gftt => Box::new(GfttDetector::new(
            settings.gftt,
            settings.min_distance_between_features_px,
        )),
    };
    Box::new(MaskedDetectionSource::new(detector, border_margin))
}

/// Greedy suppression over keypoints sorted best first: a keypoint survives only if no
/// earlier survivor lies within `radius`.
pub(crate) fn radius_nms(keypoints: Vec<RawKeypoint>, radius: f64, max_keep: usize) -> Vec<RawKeypoint> {
    let r2 = radius * radius;
    let mut kept: Vec<RawKeypoint> = Vec::with_capacity(keypoints.len().min(max_keep));
    'outer: for kp in keypoints {
        if kept.len() == max_keep {
            break;
        }
        for k in &kept {
            if (kp.position - k.position).norm_squared() < r2 {
                continue 'outer;
            }
        }
        kept.push(kp);
    }
    kept
}

pub(crate) fn sort_by_response(keypoints: &mut [RawKeypoint]) {
    keypoints.sort_by(|a, b| {
        let a = a.response.unwrap_or(f32::MIN);
        let b = b.response.unwrap_or(f32::MIN);
        b.total_cmp(&a)
    });
}
