use image::GrayImage;
use log::debug;
use nalgebra::Vector2;

use super::fast::fast_corners;
use super::{KeypointDetector, RawKeypoint, radius_nms, sort_by_response};
use crate::config::ScaleSpaceDetectorSettings;
use crate::img::pyramid::build_pyramid;

/// Smallest octave side the segment test still makes sense on.
const MIN_OCTAVE_SIDE: u32 = 16;

/// FAST corners collected over an image pyramid and reported in full-resolution pixels.
///
/// Masks are not honoured; the detection source filters the output instead.
#[derive(Debug, Clone)]
pub struct ScaleSpaceDetector {
    settings: ScaleSpaceDetectorSettings,
}

impl ScaleSpaceDetector {
    pub fn new(settings: ScaleSpaceDetectorSettings) -> Self {
        Self { settings }
    }
}

impl KeypointDetector for ScaleSpaceDetector {
    fn name(&self) -> &'static str {
        "brisk"
    }

    fn supports_mask(&self) -> bool {
        false
    }

    fn detect(
        &self,
        image: &GrayImage,
        _mask: Option<&GrayImage>,
        budget: usize,
    ) -> Vec<RawKeypoint> {
        let pyramid = build_pyramid(image, self.settings.octaves.max(1), MIN_OCTAVE_SIDE);

        let mut keypoints = Vec::new();
        for level in pyramid.levels() {
            let inv_scale = 1.0 / level.scale as f64;
            let corners = fast_corners(&level.image, self.settings.absolute_threshold, None);
            debug!("Octave {} → {} corners", level.octave, corners.len());
            keypoints.extend(corners.into_iter().map(|c| RawKeypoint {
                position: Vector2::new(c.x as f64 * inv_scale, c.y as f64 * inv_scale),
                response: Some(c.score),
            }));
        }

        sort_by_response(&mut keypoints);
        if self.settings.uniformity_radius_px > 0.0 {
            keypoints = radius_nms(keypoints, self.settings.uniformity_radius_px, budget);
        }
        keypoints
    }
}
