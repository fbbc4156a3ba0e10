use thiserror::Error;

use crate::camera::CameraId;
use crate::frame::FrameId;

/// Errors raised by the tracker when the surrounding pipeline violates its contract or the
/// configuration is unusable.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Unknown detector type: {0}")]
    UnknownDetectorType(String),

    #[error("Invalid tracker settings: {0}")]
    InvalidSettings(String),

    #[error("Image {width}x{height} is too small for a border margin of {margin}px")]
    ImageTooSmall { width: u32, height: u32, margin: u32 },

    #[error("Camera mask is {mask_width}x{mask_height} but the image is {width}x{height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Frame {frame} belongs to camera {found}, tracker is bound to camera {expected}")]
    CameraMismatch {
        frame: FrameId,
        expected: CameraId,
        found: CameraId,
    },

    #[error("Frame {0} has no raw image")]
    MissingRawImage(FrameId),

    #[error("Frame {0} already holds keypoint measurements")]
    FrameNotEmpty(FrameId),

    #[error("Frame {0} already holds track ids")]
    FrameHasTrackIds(FrameId),

    #[error("Keypoints to abort refer to frame {expected} but frame {found} is processed")]
    AbortFrameMismatch { expected: FrameId, found: FrameId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
