use serde::Serialize;

/// Counters describing one tracking step. Reset at the start of every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStats {
    /// Keypoints of the previous frame that entered the flow tracker.
    pub tried: usize,
    pub failed_tracking: usize,
    pub outside_image: usize,
    pub external_abort: usize,
    pub too_high_error: usize,
    pub snapped_to_detection: usize,
    /// Tracks that lost a conflict inside the occupancy grid.
    pub failed_occupancy_grid: usize,
    /// Tracks present in the output frame.
    pub tracked: usize,

    pub redetection_triggered: bool,
    pub detected: usize,
    pub added: usize,
    pub rejected: usize,

    pub prediction_success: usize,
    pub prediction_failure: usize,
}

impl TrackingStats {
    pub fn dropped(&self) -> usize {
        self.failed_tracking
            + self.outside_image
            + self.external_abort
            + self.too_high_error
            + self.failed_occupancy_grid
    }
}
