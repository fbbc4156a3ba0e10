use image::GrayImage;
use log::trace;
use nalgebra::Vector2;
use rayon::prelude::*;

use super::{KeypointDetector, RawKeypoint, sort_by_response};
use crate::config::FastDetectorSettings;
use crate::img::mask::is_allowed;

/// Bresenham circle of radius 3 used by the segment test.
const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];
const CIRCLE_RADIUS: u32 = 3;
const ARC_LENGTH: usize = 9;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Corner {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// FAST-9 corners with 3x3 non-maximum suppression.
#[derive(Debug, Clone)]
pub struct FastDetector {
    threshold: u8,
}

impl FastDetector {
    pub fn new(settings: FastDetectorSettings) -> Self {
        Self {
            threshold: settings.threshold,
        }
    }
}

impl KeypointDetector for FastDetector {
    fn name(&self) -> &'static str {
        "fast"
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
        let mut keypoints: Vec<RawKeypoint> = fast_corners(image, self.threshold, mask)
            .into_iter()
            .map(|c| RawKeypoint {
                position: Vector2::new(c.x as f64, c.y as f64),
                response: Some(c.score),
            })
            .collect();
        sort_by_response(&mut keypoints);
        keypoints
    }
}

/// Runs the segment test on every pixel with a full circle inside the image, then keeps
/// local maxima of the score.
pub(crate) fn fast_corners(image: &GrayImage, threshold: u8, mask: Option<&GrayImage>) -> Vec<Corner> {
    let (width, height) = image.dimensions();
    if width <= 2 * CIRCLE_RADIUS || height <= 2 * CIRCLE_RADIUS {
        return Vec::new();
    }

    let rows: Vec<Vec<f32>> = (0..height)
        .into_par_iter()
        .map(|y| {
            let mut row = vec![0.0f32; width as usize];
            if y < CIRCLE_RADIUS || y >= height - CIRCLE_RADIUS {
                return row;
            }
            for x in CIRCLE_RADIUS..width - CIRCLE_RADIUS {
                if let Some(m) = mask {
                    if !is_allowed(m, &Vector2::new(x as f64, y as f64)) {
                        continue;
                    }
                }
                if let Some(score) = fast_corner_score(image, x, y, threshold as f32) {
                    row[x as usize] = score;
                }
            }
            row
        })
        .collect();
    let score_map: Vec<f32> = rows.into_iter().flatten().collect();

    let candidates: Vec<Corner> = score_map
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > 0.0)
        .map(|(idx, &score)| Corner {
            x: (idx % width as usize) as u32,
            y: (idx / width as usize) as u32,
            score,
        })
        .collect();

    trace!(
        "FAST detected {} raw corners above threshold {}",
        candidates.len(),
        threshold
    );

    apply_nonmax_suppression(&candidates, &score_map, width, height)
}

/// Segment-test score: the largest summed absolute difference over a contiguous arc of at
/// least [`ARC_LENGTH`] pixels that are all brighter or all darker than the centre.
fn fast_corner_score(image: &GrayImage, x: u32, y: u32, threshold: f32) -> Option<f32> {
    let center = image.get_pixel(x, y).0[0] as f32;
    let high = center + threshold;
    let low = center - threshold;
    let sample = |(dx, dy): (i32, i32)| {
        image
            .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
            .0[0] as f32
    };

    // Any 9-arc covers at least two of the four compass points.
    let mut brighter = 0;
    let mut darker = 0;
    for idx in [0usize, 4, 8, 12] {
        let value = sample(CIRCLE_OFFSETS[idx]);
        if value > high {
            brighter += 1;
        } else if value < low {
            darker += 1;
        }
    }
    if brighter < 2 && darker < 2 {
        return None;
    }

    let mut circle_vals = [0.0f32; 16];
    for (i, &offset) in CIRCLE_OFFSETS.iter().enumerate() {
        circle_vals[i] = sample(offset);
    }

    let mut classifications = [0i8; 32];
    for i in 0..16 {
        let val = circle_vals[i];
        classifications[i] = if val > high {
            1
        } else if val < low {
            -1
        } else {
            0
        };
        classifications[i + 16] = classifications[i];
    }

    let mut best: Option<f32> = None;
    let mut idx = 0usize;
    while idx < classifications.len() {
        let class = classifications[idx];
        if class == 0 {
            idx += 1;
            continue;
        }

        let mut len = 0usize;
        let mut sum = 0.0f32;
        while idx + len < classifications.len() && classifications[idx + len] == class && len < 16 {
            let val = circle_vals[(idx + len) % 16];
            sum += if class > 0 { val - center } else { center - val };
            len += 1;
        }
        if len >= ARC_LENGTH {
            best = Some(best.map_or(sum, |b| b.max(sum)));
        }
        idx += len;
    }

    best
}

fn apply_nonmax_suppression(
    candidates: &[Corner],
    score_map: &[f32],
    width: u32,
    height: u32,
) -> Vec<Corner> {
    let width = width as usize;
    let height = height as usize;
    let mut filtered = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let x = candidate.x as usize;
        let y = candidate.y as usize;
        let x_min = x.saturating_sub(1);
        let x_max = (x + 1).min(width - 1);
        let y_min = y.saturating_sub(1);
        let y_max = (y + 1).min(height - 1);

        let mut is_max = true;
        'scan: for ny in y_min..=y_max {
            for nx in x_min..=x_max {
                if nx == x && ny == y {
                    continue;
                }
                let neighbor = score_map[ny * width + nx];
                // Ties go to the first pixel in raster order.
                let earlier = (ny, nx) < (y, x);
                if neighbor > candidate.score || (earlier && neighbor == candidate.score) {
                    is_max = false;
                    break 'scan;
                }
            }
        }

        if is_max {
            filtered.push(*candidate);
        }
    }
    filtered
}
