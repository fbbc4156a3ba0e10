//! Spatial bucketing of keypoints that keeps a minimum distance between any two of them.
//!
//! Points live in an arena; every grid cell holds an intrusive singly linked list of arena
//! slots in insertion order. Conflicts are resolved greedily by weight, so the result depends
//! on insertion order when three or more candidates conflict with each other.

use image::{GrayImage, Luma};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut},
    rect::Rect,
};
use nalgebra::Vector2;

use crate::img::mask::{MASK_ALLOWED, MASK_FORBIDDEN};

/// Keypoint candidate competing for a place in the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedKeypoint {
    pub position: Vector2<f64>,
    /// Detector response or negated tracking error; higher wins.
    pub weight: f64,
    /// Index of the same point in the previous frame. `None` for fresh detections.
    pub correspondence: Option<usize>,
}

impl WeightedKeypoint {
    pub fn new(position: Vector2<f64>, weight: f64, correspondence: Option<usize>) -> Self {
        Self {
            position,
            weight,
            correspondence,
        }
    }

    pub fn detected(position: Vector2<f64>, weight: f64) -> Self {
        Self::new(position, weight, None)
    }

    pub fn tracked(position: Vector2<f64>, weight: f64, index_k: usize) -> Self {
        Self::new(position, weight, Some(index_k))
    }

    pub fn is_new(&self) -> bool {
        self.correspondence.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    width: u32,
    height: u32,
    cell_size: f64,
    num_cell_rows: usize,
    num_cell_cols: usize,
    points: Vec<WeightedKeypoint>,
    next: Vec<Option<usize>>,
    cell_heads: Vec<Option<usize>>,
    cell_tails: Vec<Option<usize>>,
    cell_counts: Vec<usize>,
    num_points: usize,
}

impl OccupancyGrid {
    /// Creates an empty grid over a `width` x `height` image with square cells of
    /// `cell_size` pixels.
    pub fn new(width: u32, height: u32, cell_size: f64) -> Self {
        assert!(width > 0 && height > 0, "Grid needs a non-empty image.");
        assert!(cell_size > 0.0, "Grid cell size must be positive.");

        let num_cell_rows = (height as f64 / cell_size).ceil() as usize;
        let num_cell_cols = (width as f64 / cell_size).ceil() as usize;
        let num_cells = num_cell_rows * num_cell_cols;

        Self {
            width,
            height,
            cell_size,
            num_cell_rows,
            num_cell_cols,
            points: Vec::new(),
            next: Vec::new(),
            cell_heads: vec![None; num_cells],
            cell_tails: vec![None; num_cells],
            cell_counts: vec![0; num_cells],
            num_points: 0,
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Inserts `point` unless a point closer than `min_distance` is at least as strong.
    ///
    /// When `point` outweighs every conflicting point, all of them are evicted. Returns whether
    /// `point` was kept.
    pub fn add_point_or_replace_weakest_nearest_points(
        &mut self,
        point: WeightedKeypoint,
        min_distance: f64,
    ) -> bool {
        let (row, col) = self.cell_of(&point.position);
        let conflicts = self.conflicting_slots(&point.position, row, col, min_distance);

        if conflicts
            .iter()
            .any(|&slot| self.points[slot].weight >= point.weight)
        {
            return false;
        }

        for slot in conflicts {
            self.remove_slot(slot);
        }
        self.push(point, row, col);
        true
    }

    /// All retained points, cell by cell in row-major order and in insertion order within a
    /// cell.
    pub fn all_points(&self) -> Vec<WeightedKeypoint> {
        let mut out = Vec::with_capacity(self.num_points);
        for head in &self.cell_heads {
            let mut cursor = *head;
            while let Some(slot) = cursor {
                out.push(self.points[slot]);
                cursor = self.next[slot];
            }
        }
        out
    }

    pub fn set_constant_weight_for_all_points(&mut self, weight: f64) {
        for head in &self.cell_heads {
            let mut cursor = *head;
            while let Some(slot) = cursor {
                self.points[slot].weight = weight;
                cursor = self.next[slot];
            }
        }
    }

    /// Detection mask that is forbidden within `min_distance` of every point and over every
    /// cell holding `max_points_per_cell` or more points.
    pub fn occupancy_mask(&self, min_distance: f64, max_points_per_cell: usize) -> GrayImage {
        let mut mask = GrayImage::from_pixel(self.width, self.height, Luma([MASK_ALLOWED]));
        let radius = min_distance.round() as i32;

        for point in self.all_points() {
            let center = (
                point.position.x.round() as i32,
                point.position.y.round() as i32,
            );
            draw_filled_circle_mut(&mut mask, center, radius, Luma([MASK_FORBIDDEN]));
        }

        for row in 0..self.num_cell_rows {
            for col in 0..self.num_cell_cols {
                if self.cell_counts[self.cell_index(row, col)] < max_points_per_cell {
                    continue;
                }
                let x0 = (col as f64 * self.cell_size).floor() as u32;
                let y0 = (row as f64 * self.cell_size).floor() as u32;
                let x1 = (((col + 1) as f64 * self.cell_size).ceil() as u32).min(self.width);
                let y1 = (((row + 1) as f64 * self.cell_size).ceil() as u32).min(self.height);
                if x1 > x0 && y1 > y0 {
                    let cell = Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0, y1 - y0);
                    draw_filled_rect_mut(&mut mask, cell, Luma([MASK_FORBIDDEN]));
                }
            }
        }

        mask
    }

    fn cell_of(&self, position: &Vector2<f64>) -> (usize, usize) {
        assert!(
            position.x >= 0.0
                && position.y >= 0.0
                && position.x < self.width as f64
                && position.y < self.height as f64,
            "Point ({}, {}) lies outside the {}x{} grid.",
            position.x,
            position.y,
            self.width,
            self.height
        );
        let row = ((position.y / self.cell_size) as usize).min(self.num_cell_rows - 1);
        let col = ((position.x / self.cell_size) as usize).min(self.num_cell_cols - 1);
        (row, col)
    }

    fn cell_index(&self, row: usize, col: usize) -> usize {
        row * self.num_cell_cols + col
    }

    fn conflicting_slots(
        &self,
        position: &Vector2<f64>,
        row: usize,
        col: usize,
        min_distance: f64,
    ) -> Vec<usize> {
        let reach = (min_distance / self.cell_size).ceil().max(0.0) as usize;
        let min_distance_sq = min_distance * min_distance;

        let row_range = row.saturating_sub(reach)..=(row + reach).min(self.num_cell_rows - 1);
        let col_range = col.saturating_sub(reach)..=(col + reach).min(self.num_cell_cols - 1);

        let mut conflicts = Vec::new();
        for r in row_range {
            for c in col_range.clone() {
                let mut cursor = self.cell_heads[self.cell_index(r, c)];
                while let Some(slot) = cursor {
                    if (self.points[slot].position - position).norm_squared() < min_distance_sq {
                        conflicts.push(slot);
                    }
                    cursor = self.next[slot];
                }
            }
        }
        conflicts
    }

    fn push(&mut self, point: WeightedKeypoint, row: usize, col: usize) {
        let cell = self.cell_index(row, col);
        let slot = self.points.len();
        self.points.push(point);
        self.next.push(None);

        match self.cell_tails[cell] {
            Some(tail) => self.next[tail] = Some(slot),
            None => self.cell_heads[cell] = Some(slot),
        }
        self.cell_tails[cell] = Some(slot);
        self.cell_counts[cell] += 1;
        self.num_points += 1;
    }

    fn remove_slot(&mut self, slot: usize) {
        let (row, col) = self.cell_of(&self.points[slot].position);
        let cell = self.cell_index(row, col);

        let mut previous = None;
        let mut cursor = self.cell_heads[cell];
        while let Some(current) = cursor {
            if current == slot {
                let after = self.next[current];
                match previous {
                    Some(p) => self.next[p] = after,
                    None => self.cell_heads[cell] = after,
                }
                if self.cell_tails[cell] == Some(current) {
                    self.cell_tails[cell] = previous;
                }
                self.next[current] = None;
                self.cell_counts[cell] -= 1;
                self.num_points -= 1;
                return;
            }
            previous = cursor;
            cursor = self.next[current];
        }
    }
}
