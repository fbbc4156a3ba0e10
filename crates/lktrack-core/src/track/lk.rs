use image::GrayImage;
use log::debug;
use nalgebra::Vector2;
use rayon::prelude::*;
use tracing::debug_span;

use crate::config::LkTrackerSettings;
use crate::img::image_utils::sample_clamped;
use crate::img::pyramid::{Pyramid, PyramidLevel, build_pyramid};

/// Intensities are compared in [0, 1] for the eigenvalue test.
const INTENSITY_NORMALIZATION: f32 = 1.0 / (255.0 * 255.0);
/// Steps that nearly undo the previous one indicate oscillation around the optimum.
const OSCILLATION_THRESHOLD_SQ: f32 = 0.01 * 0.01;

#[derive(Debug, Clone, Copy)]
pub struct LucasKanadeConfig {
    /// Side length of the square window; even sizes are rounded up.
    pub window_size: usize,
    /// Coarsest pyramid level; 0 tracks on the full-resolution image only.
    pub max_level: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    /// Minimum eigenvalue of the window's normalized gradient matrix.
    pub min_eigen_threshold: f32,
}

impl Default for LucasKanadeConfig {
    fn default() -> Self {
        Self {
            window_size: 21,
            max_level: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 0.001,
        }
    }
}

impl From<&LkTrackerSettings> for LucasKanadeConfig {
    fn from(settings: &LkTrackerSettings) -> Self {
        Self {
            window_size: settings.lk_window_size,
            max_level: settings.lk_max_pyramid_level,
            max_iterations: settings.lk_max_iterations,
            epsilon: settings.lk_epsilon as f32,
            min_eigen_threshold: settings.lk_min_eigen_threshold as f32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Iteration ended at a valid position, either converged or out of iterations.
    Converged,
    /// The update became non-finite.
    Diverged,
    /// The point left the image.
    OutOfBounds,
    /// The window lacks texture in at least one direction.
    LowTexture,
}

impl TrackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlowObservation {
    /// Refined position in the next image. Meaningless unless the outcome is a success.
    pub position: Vector2<f64>,
    pub outcome: TrackOutcome,
    /// Mean absolute intensity difference over the window, in gray levels.
    pub error: f32,
}

impl FlowObservation {
    fn failed(position: Vector2<f64>, outcome: TrackOutcome) -> Self {
        Self {
            position,
            outcome,
            error: f32::MAX,
        }
    }
}

/// Sparse optical flow between two images.
pub trait FlowTracker: Send + Sync {
    /// Tracks every `prev_points[i]` into `next`, starting the search at `seeds[i]`. Returns
    /// one observation per input point, in input order.
    fn track(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        prev_points: &[Vector2<f64>],
        seeds: &[Vector2<f64>],
    ) -> Vec<FlowObservation>;
}

/// Coarse-to-fine Lucas-Kanade tracker.
pub struct PyramidalLkTracker {
    config: LucasKanadeConfig,
}

struct WindowSample {
    intensity: f32,
    grad_x: f32,
    grad_y: f32,
}

impl PyramidalLkTracker {
    pub fn new(config: LucasKanadeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LucasKanadeConfig {
        &self.config
    }

    fn half_window(&self) -> i32 {
        (self.config.window_size / 2) as i32
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        next: &Pyramid,
        num_levels: usize,
        prev_px: Vector2<f32>,
        seed_px: Vector2<f32>,
    ) -> FlowObservation {
        let top = num_levels - 1;
        let mut guess = seed_px * prev.levels()[top].scale;

        for level in (0..num_levels).rev() {
            let prev_level = &prev.levels()[level];
            let next_level = &next.levels()[level];
            let template_px = prev_px * prev_level.scale;

            if let Err(outcome) = self.track_level(prev_level, next_level, template_px, &mut guess)
            {
                if level == 0 {
                    return FlowObservation::failed(to_f64(seed_px), outcome);
                }
            }

            if level > 0 {
                guess *= prev.levels()[level - 1].scale / prev_level.scale;
            }
        }

        let base = &next.levels()[0];
        if !point_in_level(guess, base) {
            return FlowObservation::failed(to_f64(guess), TrackOutcome::OutOfBounds);
        }

        FlowObservation {
            position: to_f64(guess),
            outcome: TrackOutcome::Converged,
            error: self.window_error(&prev.levels()[0], base, prev_px, guess),
        }
    }

    /// Gauss-Newton refinement of `guess` on one level. The template gradients stay fixed, so
    /// the 2x2 normal matrix is computed once per level.
    fn track_level(
        &self,
        prev_level: &PyramidLevel,
        next_level: &PyramidLevel,
        template_px: Vector2<f32>,
        guess: &mut Vector2<f32>,
    ) -> Result<(), TrackOutcome> {
        if !point_in_level(template_px, prev_level) {
            return Err(TrackOutcome::OutOfBounds);
        }

        let radius = self.half_window();
        let template = self.sample_template(prev_level, template_px);

        let (mut a11, mut a12, mut a22) = (0.0f32, 0.0f32, 0.0f32);
        for s in &template {
            a11 += s.grad_x * s.grad_x;
            a12 += s.grad_x * s.grad_y;
            a22 += s.grad_y * s.grad_y;
        }

        let area = template.len() as f32;
        let min_eigen = (a11 + a22 - ((a11 - a22) * (a11 - a22) + 4.0 * a12 * a12).sqrt())
            / (2.0 * area)
            * INTENSITY_NORMALIZATION;
        let determinant = a11 * a22 - a12 * a12;
        if min_eigen < self.config.min_eigen_threshold || determinant < f32::EPSILON {
            return Err(TrackOutcome::LowTexture);
        }
        let inv_det = 1.0 / determinant;

        let convergence_threshold_sq = self.config.epsilon * self.config.epsilon;
        let mut previous_delta = Vector2::<f32>::zeros();

        for iteration in 0..self.config.max_iterations {
            if !point_in_level(*guess, next_level) {
                return Err(TrackOutcome::OutOfBounds);
            }

            let (mut b1, mut b2) = (0.0f32, 0.0f32);
            let mut idx = 0;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let s = &template[idx];
                    idx += 1;
                    let target = sample_clamped(
                        &next_level.image,
                        guess.x + dx as f32,
                        guess.y + dy as f32,
                    );
                    let diff = target - s.intensity;
                    b1 += diff * s.grad_x;
                    b2 += diff * s.grad_y;
                }
            }

            let delta = Vector2::new(
                -(a22 * b1 - a12 * b2) * inv_det,
                -(a11 * b2 - a12 * b1) * inv_det,
            );
            if !delta.x.is_finite() || !delta.y.is_finite() {
                return Err(TrackOutcome::Diverged);
            }
            *guess += delta;

            if delta.norm_squared() <= convergence_threshold_sq {
                break;
            }
            if iteration > 0 && (delta + previous_delta).norm_squared() < OSCILLATION_THRESHOLD_SQ {
                *guess -= delta * 0.5;
                break;
            }
            previous_delta = delta;
        }

        Ok(())
    }

    fn sample_template(&self, level: &PyramidLevel, center: Vector2<f32>) -> Vec<WindowSample> {
        let radius = self.half_window();
        let side = (2 * radius + 1) as usize;
        let mut samples = Vec::with_capacity(side * side);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = center.x + dx as f32;
                let y = center.y + dy as f32;
                samples.push(WindowSample {
                    intensity: sample_clamped(&level.image, x, y),
                    grad_x: sample_clamped(&level.grad_x, x, y),
                    grad_y: sample_clamped(&level.grad_y, x, y),
                });
            }
        }
        samples
    }

    fn window_error(
        &self,
        prev_level: &PyramidLevel,
        next_level: &PyramidLevel,
        prev_px: Vector2<f32>,
        next_px: Vector2<f32>,
    ) -> f32 {
        let radius = self.half_window();
        let mut sum = 0.0f32;
        let mut count = 0.0f32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let (ox, oy) = (dx as f32, dy as f32);
                let a = sample_clamped(&prev_level.image, prev_px.x + ox, prev_px.y + oy);
                let b = sample_clamped(&next_level.image, next_px.x + ox, next_px.y + oy);
                sum += (b - a).abs();
                count += 1.0;
            }
        }
        sum / count
    }
}

impl FlowTracker for PyramidalLkTracker {
    fn track(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        prev_points: &[Vector2<f64>],
        seeds: &[Vector2<f64>],
    ) -> Vec<FlowObservation> {
        let _span = debug_span!("lk_track", points = prev_points.len()).entered();
        assert_eq!(
            prev_points.len(),
            seeds.len(),
            "Every tracked point needs a seed."
        );
        if prev_points.is_empty() {
            return Vec::new();
        }

        let octaves = self.config.max_level + 1;
        let min_side = self.config.window_size.max(1) as u32;
        let prev_pyramid = build_pyramid(prev, octaves, min_side);
        let next_pyramid = build_pyramid(next, octaves, min_side);
        let num_levels = prev_pyramid.len().min(next_pyramid.len());

        let observations: Vec<FlowObservation> = prev_points
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(prev_px, seed_px)| {
                self.track_point(
                    &prev_pyramid,
                    &next_pyramid,
                    num_levels,
                    to_f32(prev_px),
                    to_f32(seed_px),
                )
            })
            .collect();

        let converged = observations
            .iter()
            .filter(|o| o.outcome.is_success())
            .count();
        debug!(
            "LK tracked {}/{} points over {} levels",
            converged,
            observations.len(),
            num_levels
        );
        observations
    }
}

fn point_in_level(position: Vector2<f32>, level: &PyramidLevel) -> bool {
    position.x >= 0.0
        && position.y >= 0.0
        && position.x < level.width() as f32
        && position.y < level.height() as f32
}

fn to_f32(v: &Vector2<f64>) -> Vector2<f32> {
    Vector2::new(v.x as f32, v.y as f32)
}

fn to_f64(v: Vector2<f32>) -> Vector2<f64> {
    Vector2::new(v.x as f64, v.y as f64)
}
