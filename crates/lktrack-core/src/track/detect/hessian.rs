use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use log::{debug, trace};
use nalgebra::Vector2;
use rayon::prelude::*;

use super::{KeypointDetector, RawKeypoint, sort_by_response};
use crate::config::HessianDetectorSettings;
use crate::img::mask::is_allowed;
use crate::img::pyramid::build_pyramid;

const BASE_SIGMA: f32 = 1.6;
const MIN_OCTAVE_SIDE: u32 = 16;

/// Blob detector on the scale-normalized determinant of the Hessian.
///
/// Each octave is a pyramid level smoothed at `octave_layers` scales. Keypoints are local
/// maxima over space and the neighbouring layers whose response exceeds the threshold.
#[derive(Debug, Clone)]
pub struct HessianDetector {
    settings: HessianDetectorSettings,
}

struct Layer {
    step: u32,
    response: Vec<f32>,
}

impl HessianDetector {
    pub fn new(settings: HessianDetectorSettings) -> Self {
        Self { settings }
    }

    fn layer_sigma(&self, layer: usize) -> f32 {
        BASE_SIGMA * 2f32.powf(layer as f32 / self.settings.octave_layers.max(1) as f32)
    }

    fn layer_response(&self, image: &GrayImage, sigma: f32) -> Layer {
        let (width, height) = image.dimensions();
        let blurred = gaussian_blur_f32(image, sigma);
        let step = (sigma.round() as u32).max(1);
        let norm = sigma.powi(4) / (step * step * step * step) as f32;

        let at = |x: u32, y: u32| blurred.get_pixel(x, y).0[0] as f32;
        let response: Vec<f32> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    if x < step || y < step || x + step >= width || y + step >= height {
                        return 0.0;
                    }
                    let center = at(x, y);
                    let dxx = at(x + step, y) - 2.0 * center + at(x - step, y);
                    let dyy = at(x, y + step) - 2.0 * center + at(x, y - step);
                    let dxy = (at(x + step, y + step) - at(x + step, y - step)
                        - at(x - step, y + step)
                        + at(x - step, y - step))
                        / 4.0;
                    norm * (dxx * dyy - dxy * dxy)
                })
            })
            .collect();

        Layer { step, response }
    }
}

impl KeypointDetector for HessianDetector {
    fn name(&self) -> &'static str {
        "hessian"
    }

    fn supports_mask(&self) -> bool {
        true
    }

    fn detect(
        &self,
        image: &GrayImage,
        mask: Option<&GrayImage>,
        _budget: usize,
    ) -> Vec<RawKeypoint> {
        let threshold = self.settings.hessian_threshold;
        let pyramid = build_pyramid(image, self.settings.octaves.max(1), MIN_OCTAVE_SIDE);
        let mut keypoints = Vec::new();

        for level in pyramid.levels() {
            let (width, height) = level.image.dimensions();
            let layers: Vec<Layer> = (0..self.settings.octave_layers.max(1))
                .map(|l| self.layer_response(&level.image, self.layer_sigma(l)))
                .collect();
            let inv_scale = 1.0 / level.scale as f64;
            let before = keypoints.len();

            for (l, layer) in layers.iter().enumerate() {
                let margin = layer.step + 1;
                for y in margin..height.saturating_sub(margin) {
                    for x in margin..width.saturating_sub(margin) {
                        let idx = (y * width + x) as usize;
                        let value = layer.response[idx];
                        if value <= threshold {
                            continue;
                        }
                        if !is_scale_space_max(&layers, l, x, y, width, value) {
                            continue;
                        }
                        let position = Vector2::new(x as f64 * inv_scale, y as f64 * inv_scale);
                        if mask.is_some_and(|m| !is_allowed(m, &position)) {
                            continue;
                        }
                        keypoints.push(RawKeypoint {
                            position,
                            response: Some(value),
                        });
                    }
                }
            }

            trace!(
                "Hessian octave {} ({}x{}) → {} blobs",
                level.octave,
                width,
                height,
                keypoints.len() - before
            );
        }

        sort_by_response(&mut keypoints);
        debug!(
            "Hessian detected {} blobs above threshold {:.1}",
            keypoints.len(),
            threshold
        );
        keypoints
    }
}

/// Strict maximum over the 3x3 neighbourhood in its own and the adjacent layers.
fn is_scale_space_max(layers: &[Layer], layer: usize, x: u32, y: u32, width: u32, value: f32) -> bool {
    let first = layer.saturating_sub(1);
    let last = (layer + 1).min(layers.len() - 1);
    for (l, other) in layers.iter().enumerate().take(last + 1).skip(first) {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if l == layer && nx == x && ny == y {
                    continue;
                }
                let neighbor = other.response[(ny * width + nx) as usize];
                // Ties resolve towards the earlier layer and raster position.
                let earlier = (l, ny, nx) < (layer, y, x);
                if neighbor > value || (earlier && neighbor == value) {
                    return false;
                }
            }
        }
    }
    true
}
