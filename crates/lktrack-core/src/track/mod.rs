pub mod detect;
pub mod lk;
pub mod occupancy_grid;
pub mod predict;
pub mod stats;
pub mod tracker;

pub use detect::{
    DetectedKeypoint, DetectionSource, KeypointDetector, MaskedDetectionSource, RawKeypoint,
    build_detection_source,
};
pub use lk::{FlowObservation, FlowTracker, LucasKanadeConfig, PyramidalLkTracker, TrackOutcome};
pub use occupancy_grid::{OccupancyGrid, WeightedKeypoint};
pub use predict::{KeypointPrediction, predict_keypoints_by_rotation};
pub use stats::TrackingStats;
pub use tracker::{
    AbortRequest, FrameToFrameMatch, KEYPOINT_UNCERTAINTY_PX, LkFeatureTracker,
    MIN_DISTANCE_TO_IMAGE_BORDER_PX,
};
