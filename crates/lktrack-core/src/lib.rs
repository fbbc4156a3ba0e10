//! Keypoint tracking front end for visual odometry.
//!
//! [`LkFeatureTracker`] follows keypoints from frame to frame with pyramidal Lucas-Kanade
//! flow, keeps them apart with an [`OccupancyGrid`](track::OccupancyGrid) and tops them up
//! with fresh detections whenever too few survive.

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod img;
pub mod math;
pub mod track;

pub use camera::{Camera, CameraId, PinholeCamera};
pub use config::{DetectorType, LkTrackerSettings};
pub use error::{Result, TrackerError};
pub use frame::{FrameId, VisualFrame};
pub use math::SO3;
pub use track::{FrameToFrameMatch, LkFeatureTracker, TrackingStats};
