use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Keypoint detector backing the detection source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorType {
    /// Single-scale FAST-9 corner response.
    Fast,
    /// Scale-space FAST over an image pyramid. Ignores detection masks.
    Brisk,
    /// Multi-scale determinant-of-Hessian blobs.
    Hessian,
    /// Shi-Tomasi good features to track. Emits no score.
    Gftt,
}

impl DetectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Brisk => "brisk",
            Self::Hessian => "hessian",
            Self::Gftt => "gftt",
        }
    }
}

impl FromStr for DetectorType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            "brisk" => Ok(Self::Brisk),
            "hessian" => Ok(Self::Hessian),
            "gftt" => Ok(Self::Gftt),
            other => Err(TrackerError::UnknownDetectorType(other.to_string())),
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastDetectorSettings {
    /// Intensity difference between the centre pixel and the circle around it.
    pub threshold: u8,
}

impl Default for FastDetectorSettings {
    fn default() -> Self {
        Self { threshold: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSpaceDetectorSettings {
    pub octaves: usize,
    /// Radius of the suppression applied across octaves. Zero disables it.
    pub uniformity_radius_px: f64,
    pub absolute_threshold: u8,
}

impl Default for ScaleSpaceDetectorSettings {
    fn default() -> Self {
        Self {
            octaves: 1,
            uniformity_radius_px: 0.0,
            absolute_threshold: 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HessianDetectorSettings {
    pub hessian_threshold: f32,
    pub octaves: usize,
    pub octave_layers: usize,
}

impl Default for HessianDetectorSettings {
    fn default() -> Self {
        Self {
            hessian_threshold: 400.0,
            octaves: 4,
            octave_layers: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfttDetectorSettings {
    /// Fraction of the strongest corner response a corner must reach.
    pub quality_level: f32,
    /// Half-size of the window used for sub-pixel refinement. Zero disables it.
    pub subpixel_window_radius: usize,
}

impl Default for GfttDetectorSettings {
    fn default() -> Self {
        Self {
            quality_level: 0.001,
            subpixel_window_radius: 10,
        }
    }
}

/// Immutable configuration of [`LkFeatureTracker`](crate::track::LkFeatureTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LkTrackerSettings {
    pub detector_type: DetectorType,
    pub fast: FastDetectorSettings,
    pub brisk: ScaleSpaceDetectorSettings,
    pub hessian: HessianDetectorSettings,
    pub gftt: GfttDetectorSettings,

    /// Minimal image space distance between nearest features in pixels.
    pub min_distance_between_features_px: f64,
    /// Max. number of features to track.
    pub max_feature_count: usize,
    /// Min. number of tracked features before a redetection is performed.
    pub min_feature_count: usize,

    /// Minimum eigenvalue of the 2x2 normal matrix of the optical flow equations.
    pub lk_min_eigen_threshold: f64,
    /// Highest pyramid level used by the flow tracker (0 tracks on the full image only).
    pub lk_max_pyramid_level: usize,
    /// Side length of the square flow window at each pyramid level.
    pub lk_window_size: usize,
    pub lk_max_iterations: usize,
    pub lk_epsilon: f64,

    /// Flow error above which a track without a nearby detection is dropped.
    pub max_tracking_error: f64,
    /// Squared radius within which a tracked point snaps onto a fresh detection.
    pub keypoint_search_radius_px_squared: f64,
}

impl Default for LkTrackerSettings {
    fn default() -> Self {
        Self {
            detector_type: DetectorType::Brisk,
            fast: FastDetectorSettings::default(),
            brisk: ScaleSpaceDetectorSettings::default(),
            hessian: HessianDetectorSettings::default(),
            gftt: GfttDetectorSettings::default(),
            min_distance_between_features_px: 5.0,
            max_feature_count: 750,
            min_feature_count: 500,
            lk_min_eigen_threshold: 0.001,
            lk_max_pyramid_level: 3,
            lk_window_size: 21,
            lk_max_iterations: 30,
            lk_epsilon: 0.01,
            max_tracking_error: 1.0,
            keypoint_search_radius_px_squared: 3.0,
        }
    }
}

impl LkTrackerSettings {
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, message: &str| {
            if ok {
                Ok(())
            } else {
                Err(TrackerError::InvalidSettings(message.to_string()))
            }
        };

        check(
            self.min_distance_between_features_px > 1.0,
            "min_distance_between_features_px must be greater than 1",
        )?;
        check(
            self.min_feature_count > 0,
            "min_feature_count must be positive",
        )?;
        check(
            self.max_feature_count > self.min_feature_count,
            "max_feature_count must be greater than min_feature_count",
        )?;
        check(
            self.lk_min_eigen_threshold > 0.0,
            "lk_min_eigen_threshold must be positive",
        )?;
        check(self.lk_window_size > 0, "lk_window_size must be positive")?;
        check(
            self.lk_max_iterations > 0,
            "lk_max_iterations must be positive",
        )?;
        check(
            self.brisk.octaves > 0 && self.hessian.octaves > 0 && self.hessian.octave_layers > 0,
            "detector octaves and layers must be positive",
        )?;
        check(
            self.gftt.quality_level > 0.0 && self.gftt.quality_level < 1.0,
            "gftt quality_level must lie in (0, 1)",
        )?;
        Ok(())
    }
}
