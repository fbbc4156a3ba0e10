use image::GrayImage;
use nalgebra::{Vector2, Vector3};

use super::{Camera, CameraId, ProjectionResult};
use crate::error::{Result, TrackerError};

const UNDISTORT_MAX_ITERATIONS: usize = 100;
const UNDISTORT_TOLERANCE: f64 = 1e-10;

/// Lens distortion applied on normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DistortionModel {
    #[default]
    None,
    /// Radial-tangential (k1, k2, p1, p2) parameterization.
    RadialTangential { k1: f64, k2: f64, p1: f64, p2: f64 },
}

impl DistortionModel {
    fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        match *self {
            Self::None => point,
            Self::RadialTangential { k1, k2, p1, p2 } => {
                let (x, y) = (point.x, point.y);
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                Vector2::new(
                    x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
                )
            }
        }
    }

    /// Inverts [`distort`](Self::distort) by fixed-point iteration.
    fn undistort(&self, distorted: Vector2<f64>) -> Option<Vector2<f64>> {
        let Self::RadialTangential { k1, k2, p1, p2 } = *self else {
            return Some(distorted);
        };

        let mut point = distorted;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let (x, y) = (point.x, point.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
            if radial.abs() < f64::EPSILON {
                return None;
            }
            let tangential = Vector2::new(
                2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
            );
            point = (distorted - tangential) / radial;
        }

        let residual = (self.distort(point) - distorted).norm_squared();
        (residual.is_finite() && residual < UNDISTORT_TOLERANCE).then_some(point)
    }
}

/// Standard pinhole camera intrinsics.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
    pub width: u32,
    pub height: u32,
    pub distortion: DistortionModel,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
            width,
            height,
            distortion: DistortionModel::None,
        }
    }

    pub fn with_distortion(mut self, distortion: DistortionModel) -> Self {
        self.distortion = distortion;
        self
    }

    fn normalized_to_pixel(&self, normalized: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * normalized.x + self.skew * normalized.y + self.cx,
            self.fy * normalized.y + self.cy,
        )
    }

    fn pixel_to_normalized(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let y = (pixel.y - self.cy) / self.fy;
        let x = (pixel.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }
}

#[derive(Debug, Clone)]
pub struct PinholeCamera {
    id: CameraId,
    intrinsics: CameraIntrinsics,
    mask: Option<GrayImage>,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            id: CameraId::next(),
            intrinsics,
            mask: None,
        }
    }

    /// Attaches a validity mask. The mask must match the image dimensions.
    pub fn with_mask(mut self, mask: GrayImage) -> Result<Self> {
        let (mask_width, mask_height) = mask.dimensions();
        if mask_width != self.intrinsics.width || mask_height != self.intrinsics.height {
            return Err(TrackerError::MaskSizeMismatch {
                mask_width,
                mask_height,
                width: self.intrinsics.width,
                height: self.intrinsics.height,
            });
        }
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    fn is_masked(&self, keypoint: &Vector2<f64>) -> bool {
        self.mask.as_ref().is_some_and(|mask| {
            mask.get_pixel(keypoint.x as u32, keypoint.y as u32).0[0] == 0
        })
    }
}

impl Camera for PinholeCamera {
    fn id(&self) -> CameraId {
        self.id
    }

    fn image_width(&self) -> u32 {
        self.intrinsics.width
    }

    fn image_height(&self) -> u32 {
        self.intrinsics.height
    }

    fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    fn back_project(&self, keypoint: &Vector2<f64>) -> Option<Vector3<f64>> {
        let distorted = self.intrinsics.pixel_to_normalized(keypoint);
        let normalized = self.intrinsics.distortion.undistort(distorted)?;
        Some(Vector3::new(normalized.x, normalized.y, 1.0))
    }

    fn project(&self, bearing: &Vector3<f64>) -> ProjectionResult {
        if bearing.z <= 0.0 {
            return ProjectionResult::PointBehindCamera;
        }

        let normalized = Vector2::new(bearing.x / bearing.z, bearing.y / bearing.z);
        let keypoint = self
            .intrinsics
            .normalized_to_pixel(self.intrinsics.distortion.distort(normalized));
        if !keypoint.x.is_finite() || !keypoint.y.is_finite() {
            return ProjectionResult::ProjectionInvalid;
        }

        if !self.is_keypoint_visible(&keypoint) || self.is_masked(&keypoint) {
            ProjectionResult::OutsideImageBox(keypoint)
        } else {
            ProjectionResult::KeypointVisible(keypoint)
        }
    }
}
