//! Camera geometry consumed by the tracker.
//!
//! The tracker only needs image dimensions, an optional validity mask and the ability to move
//! between pixels and bearing vectors. [`PinholeCamera`] is the reference implementation.

pub mod pinhole;

pub use pinhole::{CameraIntrinsics, DistortionModel, PinholeCamera};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use image::GrayImage;
use nalgebra::{Vector2, Vector3};

static NEXT_CAMERA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique camera identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(u64);

impl CameraId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Allocates a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_CAMERA_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam#{}", self.0)
    }
}

/// Outcome of projecting a bearing vector into the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionResult {
    KeypointVisible(Vector2<f64>),
    OutsideImageBox(Vector2<f64>),
    PointBehindCamera,
    ProjectionInvalid,
}

impl ProjectionResult {
    pub fn is_keypoint_visible(&self) -> bool {
        matches!(self, Self::KeypointVisible(_))
    }

    /// Pixel position of the projection, also for points that fall outside the image.
    pub fn keypoint(&self) -> Option<Vector2<f64>> {
        match self {
            Self::KeypointVisible(keypoint) | Self::OutsideImageBox(keypoint) => Some(*keypoint),
            Self::PointBehindCamera | Self::ProjectionInvalid => None,
        }
    }
}

pub trait Camera: fmt::Debug + Send + Sync {
    fn id(&self) -> CameraId;

    fn image_width(&self) -> u32;

    fn image_height(&self) -> u32;

    /// Validity mask (non-zero = usable pixel) with the camera's image dimensions.
    fn mask(&self) -> Option<&GrayImage>;

    fn has_mask(&self) -> bool {
        self.mask().is_some()
    }

    /// Back-projects a pixel to a (not normalized) bearing vector.
    fn back_project(&self, keypoint: &Vector2<f64>) -> Option<Vector3<f64>>;

    fn project(&self, bearing: &Vector3<f64>) -> ProjectionResult;

    fn is_keypoint_visible(&self, keypoint: &Vector2<f64>) -> bool {
        keypoint.x >= 0.0
            && keypoint.y >= 0.0
            && keypoint.x < self.image_width() as f64
            && keypoint.y < self.image_height() as f64
    }
}
