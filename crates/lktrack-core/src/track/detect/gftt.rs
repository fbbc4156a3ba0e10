use image::GrayImage;
use log::debug;
use nalgebra::{Matrix2, Vector2};
use rayon::prelude::*;

use super::{KeypointDetector, RawKeypoint, radius_nms};
use crate::config::GfttDetectorSettings;
use crate::img::image_utils::sample_clamped;
use crate::img::mask::is_allowed;
use crate::img::pyramid::{PyramidLevel, build_pyramid};

const SUBPIXEL_MAX_ITERATIONS: usize = 40;
const SUBPIXEL_EPSILON: f64 = 1e-3;

/// Shi-Tomasi "good features to track".
///
/// Ranks local maxima of the minimum structure-tensor eigenvalue, enforces a minimum distance
/// between accepted corners and refines them to sub-pixel accuracy. The output is ordered best
/// first but carries no response.
#[derive(Debug, Clone)]
pub struct GfttDetector {
    settings: GfttDetectorSettings,
    min_distance: f64,
}

impl GfttDetector {
    pub fn new(settings: GfttDetectorSettings, min_distance: f64) -> Self {
        Self {
            settings,
            min_distance,
        }
    }

    /// Computes Shi-Tomasi corner response (minimum eigenvalue of structure tensor)
    ///
    /// ```text
    /// M = [ixx  ixy]   where  ixx = ∑Iₓ²,  iyy = ∑Iᵧ²,  ixy = ∑IₓIᵧ
    ///     [ixy  iyy]
    /// ```
    ///
    /// summed over the 3x3 block around the pixel. Corners have strong gradients in two
    /// directions and therefore a large λ_min; edges and flat regions do not.
    #[inline]
    fn shi_tomasi_response(level: &PyramidLevel, x: u32, y: u32) -> f32 {
        let (width, height) = level.image.dimensions();
        if x < 1 || y < 1 || x + 1 >= width || y + 1 >= height {
            return 0.0;
        }

        let mut ixx = 0.0f32;
        let mut iyy = 0.0f32;
        let mut ixy = 0.0f32;
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let gx = level.grad_x.get_pixel(nx, ny).0[0];
                let gy = level.grad_y.get_pixel(nx, ny).0[0];
                ixx += gx * gx;
                iyy += gy * gy;
                ixy += gx * gy;
            }
        }

        let trace = ixx + iyy;
        let det = ixx * iyy - ixy * ixy;
        let discriminant = trace * trace - 4.0 * det;
        if discriminant < 0.0 {
            return 0.0;
        }

        0.5 * (trace - discriminant.sqrt())
    }
}

impl KeypointDetector for GfttDetector {
    fn name(&self) -> &'static str {
        "gftt"
    }

    fn supports_mask(&self) -> bool {
        true
    }

    fn detect(
        &self,
        image: &GrayImage,
        mask: Option<&GrayImage>,
        budget: usize,
    ) -> Vec<RawKeypoint> {
        let pyramid = build_pyramid(image, 1, 1);
        let level = &pyramid.levels()[0];
        let (width, height) = image.dimensions();

        // --- 1) Response map, parallel over rows ---
        let response: Vec<f32> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    let allowed = mask
                        .map_or(true, |m| is_allowed(m, &Vector2::new(x as f64, y as f64)));
                    if allowed {
                        Self::shi_tomasi_response(level, x, y)
                    } else {
                        0.0
                    }
                })
            })
            .collect();

        let max_response = response.iter().copied().fold(0.0f32, f32::max);
        if max_response <= 0.0 {
            debug!("GFTT in {}x{} → 0 (no texture)", width, height);
            return Vec::new();
        }
        let threshold = self.settings.quality_level * max_response;

        // --- 2) Thresholded 3x3 local maxima ---
        let at = |x: u32, y: u32| response[(y * width + x) as usize];
        let mut candidates: Vec<(f32, Vector2<f64>)> = Vec::new();
        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let value = at(x, y);
                if value <= threshold {
                    continue;
                }
                let is_max = (y - 1..=y + 1)
                    .all(|ny| (x - 1..=x + 1).all(|nx| at(nx, ny) <= value));
                if is_max {
                    candidates.push((value, Vector2::new(x as f64, y as f64)));
                }
            }
        }

        // --- 3) Best first, then min-distance and budget ---
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        let ranked: Vec<RawKeypoint> = candidates
            .into_iter()
            .map(|(_, position)| RawKeypoint {
                position,
                response: None,
            })
            .collect();
        let mut corners = radius_nms(ranked, self.min_distance, budget);

        // --- 4) Sub-pixel refinement ---
        if self.settings.subpixel_window_radius > 0 {
            for corner in &mut corners {
                corner.position =
                    refine_corner(level, corner.position, self.settings.subpixel_window_radius);
            }
        }

        debug!(
            "GFTT in {}x{} (quality {:.4}, min dist {:.1}px) → {} (max {})",
            width,
            height,
            self.settings.quality_level,
            self.min_distance,
            corners.len(),
            budget
        );
        corners
    }
}

/// Moves `start` to the point where the window's gradients are orthogonal to the vectors
/// pointing at them, i.e. the intersection of the edges meeting at the corner. Falls back to
/// `start` when the solution leaves the window.
fn refine_corner(level: &PyramidLevel, start: Vector2<f64>, radius: usize) -> Vector2<f64> {
    let r = radius as i32;
    let sigma = (radius as f64 / 2.0).max(1.0);
    let mut corner = start;

    for _ in 0..SUBPIXEL_MAX_ITERATIONS {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();

        for dy in -r..=r {
            for dx in -r..=r {
                let p = corner + Vector2::new(dx as f64, dy as f64);
                let gx = sample_clamped(&level.grad_x, p.x as f32, p.y as f32) as f64;
                let gy = sample_clamped(&level.grad_y, p.x as f32, p.y as f32) as f64;
                let weight = (-((dx * dx + dy * dy) as f64) / (2.0 * sigma * sigma)).exp();
                let g = Vector2::new(gx, gy);
                let ggt = g * g.transpose() * weight;
                a += ggt;
                b += ggt * p;
            }
        }

        let Some(inverse) = a.try_inverse() else {
            break;
        };
        let next = inverse * b;
        let shift = (next - corner).norm_squared();
        corner = next;
        if shift < SUBPIXEL_EPSILON * SUBPIXEL_EPSILON {
            break;
        }
    }

    let (width, height) = level.image.dimensions();
    let inside = corner.x >= 0.0
        && corner.y >= 0.0
        && corner.x < width as f64
        && corner.y < height as f64;
    if !inside || (corner - start).abs().max() > radius as f64 {
        start
    } else {
        corner
    }
}
