use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use image::{GrayImage, Luma};
use nalgebra::{Rotation3, Vector2, Vector3};

use lktrack_core::camera::{Camera, CameraIntrinsics, PinholeCamera};
use lktrack_core::config::{DetectorType, LkTrackerSettings};
use lktrack_core::frame::{FrameId, VisualFrame};
use lktrack_core::img::mask::{is_allowed, is_inside_border};
use lktrack_core::math::SO3;
use lktrack_core::track::{
    DetectedKeypoint, DetectionSource, FlowObservation, FlowTracker, KEYPOINT_UNCERTAINTY_PX,
    LkFeatureTracker, MIN_DISTANCE_TO_IMAGE_BORDER_PX, TrackOutcome,
};
use lktrack_core::TrackerError;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Returns a fixed candidate list, honouring mask and budget like a real detector.
struct ScriptedDetections {
    candidates: Vec<DetectedKeypoint>,
}

impl ScriptedDetections {
    fn new(candidates: Vec<DetectedKeypoint>) -> Self {
        Self { candidates }
    }

    /// Lattice of candidates with strictly decreasing scores.
    fn lattice(spacing: f64) -> Self {
        let mut candidates = Vec::new();
        let mut y = 40.0;
        while y < HEIGHT as f64 - 40.0 {
            let mut x = 40.0;
            while x < WIDTH as f64 - 40.0 {
                candidates.push(detection(x, y, 10_000.0 - candidates.len() as f64));
                x += spacing;
            }
            y += spacing;
        }
        Self { candidates }
    }
}

impl DetectionSource for ScriptedDetections {
    fn detect(&self, _image: &GrayImage, budget: usize, mask: &GrayImage) -> Vec<DetectedKeypoint> {
        let mut out: Vec<DetectedKeypoint> = self
            .candidates
            .iter()
            .copied()
            .filter(|c| is_allowed(mask, &c.position))
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out.truncate(budget);
        out
    }
}

/// Moves every point by a constant offset. Indices in `failures` report a failed track.
struct ShiftFlow {
    shift: Vector2<f64>,
    error: f32,
    failures: HashSet<usize>,
}

impl ShiftFlow {
    fn new(shift: Vector2<f64>, error: f32) -> Self {
        Self {
            shift,
            error,
            failures: HashSet::new(),
        }
    }
}

impl FlowTracker for ShiftFlow {
    fn track(
        &self,
        _prev: &GrayImage,
        _next: &GrayImage,
        prev_points: &[Vector2<f64>],
        _seeds: &[Vector2<f64>],
    ) -> Vec<FlowObservation> {
        prev_points
            .iter()
            .enumerate()
            .map(|(i, p)| FlowObservation {
                position: p + self.shift,
                outcome: if self.failures.contains(&i) {
                    TrackOutcome::Diverged
                } else {
                    TrackOutcome::Converged
                },
                error: self.error,
            })
            .collect()
    }
}

fn detection(x: f64, y: f64, score: f64) -> DetectedKeypoint {
    DetectedKeypoint {
        position: Vector2::new(x, y),
        score,
    }
}

fn camera() -> Arc<dyn Camera> {
    Arc::new(PinholeCamera::new(CameraIntrinsics::new(
        450.0,
        450.0,
        WIDTH as f64 / 2.0,
        HEIGHT as f64 / 2.0,
        WIDTH,
        HEIGHT,
    )))
}

fn settings(min_feature_count: usize, max_feature_count: usize) -> LkTrackerSettings {
    LkTrackerSettings {
        min_feature_count,
        max_feature_count,
        ..LkTrackerSettings::default()
    }
}

fn tracker(
    camera: &Arc<dyn Camera>,
    settings: LkTrackerSettings,
    detections: ScriptedDetections,
    flow: ShiftFlow,
) -> LkFeatureTracker {
    LkFeatureTracker::with_components(camera.clone(), settings, Box::new(detections), Box::new(flow))
        .expect("valid tracker")
}

fn frame(camera: &Arc<dyn Camera>) -> VisualFrame {
    VisualFrame::new(camera.clone(), 0).with_raw_image(GrayImage::new(WIDTH, HEIGHT))
}

fn frame_with_keypoints(camera: &Arc<dyn Camera>, keypoints: &[(f64, f64)]) -> VisualFrame {
    let mut frame = frame(camera);
    frame.set_keypoint_measurements(keypoints.iter().map(|&(x, y)| Vector2::new(x, y)).collect());
    frame
}

fn assert_min_distance(frame: &VisualFrame, min_distance: f64) {
    let points = frame.keypoint_measurements();
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            assert!(
                (a - b).norm() >= min_distance,
                "keypoints {a:?} and {b:?} closer than {min_distance}"
            );
        }
    }
}

#[test]
fn bootstrap_fills_exactly_max_feature_count() {
    let camera = camera();
    let tracker = tracker(
        &camera,
        settings(50, 100),
        ScriptedDetections::lattice(10.0),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );

    let mut frame = frame(&camera);
    tracker
        .initialize_keypoints_in_empty_frame(&mut frame)
        .expect("bootstrap");

    assert_eq!(frame.num_keypoint_measurements(), 100);
    assert!(
        frame
            .keypoint_measurement_uncertainties()
            .iter()
            .all(|&u| u == KEYPOINT_UNCERTAINTY_PX)
    );
    assert_eq!(frame.keypoint_scores().len(), 100);
    assert_min_distance(&frame, 5.0);
}

#[test]
fn bootstrap_rejects_populated_frames() {
    let camera = camera();
    let tracker = tracker(
        &camera,
        settings(50, 100),
        ScriptedDetections::lattice(10.0),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );

    let mut populated = frame_with_keypoints(&camera, &[(100.0, 100.0)]);
    assert!(matches!(
        tracker.initialize_keypoints_in_empty_frame(&mut populated),
        Err(TrackerError::FrameNotEmpty(_))
    ));

    let mut no_image = VisualFrame::new(camera.clone(), 0);
    assert!(matches!(
        tracker.initialize_keypoints_in_empty_frame(&mut no_image),
        Err(TrackerError::MissingRawImage(_))
    ));
}

#[test]
fn tracked_points_snap_onto_detections_and_keep_their_indices() {
    let camera = camera();
    let detections = ScriptedDetections::new(vec![
        detection(101.5, 100.5, 3.0),
        detection(201.0, 150.0, 2.0),
    ]);
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        detections,
        ShiftFlow::new(Vector2::new(1.0, 0.0), 0.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0), (200.0, 150.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    let pairs: HashSet<(usize, usize)> = matches.iter().map(|m| (m.index_kp1, m.index_k)).collect();
    assert_eq!(pairs.len(), 2);
    assert_eq!(
        matches.iter().map(|m| m.index_k).collect::<HashSet<_>>(),
        HashSet::from([0, 1])
    );
    assert!(matches.iter().all(|m| m.score == f64::MAX));

    let positions = frame_kp1.keypoint_measurements();
    assert_eq!(positions.len(), 2);
    for m in &matches {
        let expected = frame_k.keypoint_measurements()[m.index_k];
        let snapped = positions[m.index_kp1];
        assert!((snapped - expected).norm() < 2.0);
    }
    assert!(positions.contains(&Vector2::new(101.5, 100.5)));
    assert!(positions.contains(&Vector2::new(201.0, 150.0)));
    assert_eq!(tracker.last_stats().snapped_to_detection, 2);
    assert!(!tracker.last_stats().redetection_triggered);
}

#[test]
fn redetection_does_not_duplicate_snapped_points() {
    let camera = camera();
    let mut candidates = vec![detection(101.5, 100.5, 3.0), detection(201.0, 150.0, 2.0)];
    candidates.extend((0..20).map(|i| detection(80.0 + 12.0 * i as f64, 300.0, 1.0)));
    let mut tracker = tracker(
        &camera,
        settings(5, 10),
        ScriptedDetections::new(candidates),
        ShiftFlow::new(Vector2::new(1.0, 0.0), 0.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0), (200.0, 150.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert_eq!(matches.len(), 2);
    assert!(tracker.last_stats().redetection_triggered);
    assert_eq!(frame_kp1.num_keypoint_measurements(), 10);
    assert_min_distance(&frame_kp1, 5.0);
}

#[test]
fn aborted_keypoints_are_dropped_once() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(Vec::new()),
        ShiftFlow::new(Vector2::new(0.5, 0.5), 0.2),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0), (150.0, 100.0), (200.0, 100.0)]);
    tracker.set_keypoint_indices_to_abort(frame_k.id(), [1]);

    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert_eq!(matches.len(), 2);
    assert!(matches.iter().all(|m| m.index_k != 1));
    assert_eq!(tracker.last_stats().external_abort, 1);
    assert!(tracker.pending_abort_request().is_none());

    // The request does not leak into the next step.
    let mut frame_kp2 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_kp1, &mut frame_kp2)
        .expect("track");
    assert_eq!(matches.len(), 2);
    assert_eq!(tracker.last_stats().external_abort, 0);
}

#[test]
fn abort_request_for_another_frame_is_an_error_and_is_cleared() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(Vec::new()),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0)]);
    tracker.set_keypoint_indices_to_abort(FrameId::new(u64::MAX), [0]);

    let mut frame_kp1 = frame(&camera);
    let result = tracker.track(&SO3::identity(), &frame_k, &mut frame_kp1);
    assert!(matches!(result, Err(TrackerError::AbortFrameMismatch { .. })));
    assert!(tracker.pending_abort_request().is_none());
    assert!(!frame_kp1.has_keypoint_measurements());

    let mut frame_kp1 = frame(&camera);
    assert!(tracker.track(&SO3::identity(), &frame_k, &mut frame_kp1).is_ok());
}

#[test]
fn empty_abort_request_for_another_frame_is_ignored() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(Vec::new()),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );
    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0)]);
    tracker.set_keypoint_indices_to_abort(FrameId::new(u64::MAX), []);

    let mut frame_kp1 = frame(&camera);
    assert!(tracker.track(&SO3::identity(), &frame_k, &mut frame_kp1).is_ok());
}

#[test]
fn redetection_fills_up_to_feature_bounds() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(20, 40),
        ScriptedDetections::lattice(10.0),
        ShiftFlow::new(Vector2::new(0.3, -0.2), 0.1),
    );

    let frame_k = frame_with_keypoints(&camera, &[(103.0, 107.0), (305.0, 207.0), (505.0, 407.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    let count = frame_kp1.num_keypoint_measurements();
    assert!((20..=40).contains(&count), "got {count} keypoints");
    assert_eq!(matches.len(), 3);
    assert!(tracker.last_stats().redetection_triggered);
    assert_eq!(tracker.last_stats().added, count - 3);
    assert_min_distance(&frame_kp1, 5.0);
}

#[test]
fn no_keypoint_is_emitted_inside_the_border() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(5, 60),
        ScriptedDetections::lattice(7.0),
        ShiftFlow::new(Vector2::new(-75.0, 0.0), 0.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 200.0), (300.0, 200.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert_eq!(tracker.last_stats().outside_image, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].index_k, 1);
    assert!(frame_kp1.keypoint_measurements().iter().all(|p| is_inside_border(
        p,
        WIDTH,
        HEIGHT,
        MIN_DISTANCE_TO_IMAGE_BORDER_PX
    )));
}

#[test]
fn high_error_tracks_survive_only_when_snapped() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(vec![detection(100.5, 100.0, 1.0)]),
        ShiftFlow::new(Vector2::zeros(), 4.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0), (300.0, 100.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].index_k, 0);
    assert_eq!(tracker.last_stats().too_high_error, 1);
    assert_eq!(frame_kp1.keypoint_measurements(), &[Vector2::new(100.5, 100.0)]);
}

#[test]
fn failed_flow_and_grid_conflicts_are_counted() {
    let camera = camera();
    let mut flow = ShiftFlow::new(Vector2::zeros(), 0.5);
    flow.failures.insert(0);
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(Vec::new()),
        flow,
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0), (200.0, 100.0), (202.0, 100.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    let stats = tracker.last_stats();
    assert_eq!(stats.tried, 3);
    assert_eq!(stats.failed_tracking, 1);
    assert_eq!(stats.failed_occupancy_grid, 1);
    assert_eq!(stats.tracked, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].index_k, 1);
}

#[test]
fn frame_without_keypoints_only_detects() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(10, 30),
        ScriptedDetections::lattice(20.0),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );

    let frame_k = frame(&camera);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert!(matches.is_empty());
    assert_eq!(frame_kp1.num_keypoint_measurements(), 30);
    assert_eq!(tracker.last_stats().tried, 0);
}

#[test]
fn contract_violations_are_reported() {
    let camera = camera();
    let mut tracker = tracker(
        &camera,
        settings(1, 10),
        ScriptedDetections::new(Vec::new()),
        ShiftFlow::new(Vector2::zeros(), 0.0),
    );
    let frame_k = frame_with_keypoints(&camera, &[(100.0, 100.0)]);

    let mut no_image = VisualFrame::new(camera.clone(), 1);
    assert!(matches!(
        tracker.track(&SO3::identity(), &frame_k, &mut no_image),
        Err(TrackerError::MissingRawImage(_))
    ));

    let mut populated = frame_with_keypoints(&camera, &[(50.0, 50.0)]);
    assert!(matches!(
        tracker.track(&SO3::identity(), &frame_k, &mut populated),
        Err(TrackerError::FrameNotEmpty(_))
    ));

    let mut with_track_ids = frame(&camera);
    with_track_ids.set_track_ids(vec![3]);
    assert!(matches!(
        tracker.track(&SO3::identity(), &frame_k, &mut with_track_ids),
        Err(TrackerError::FrameHasTrackIds(_))
    ));

    let other_camera: Arc<dyn Camera> = Arc::new(PinholeCamera::new(CameraIntrinsics::new(
        450.0, 450.0, 320.0, 240.0, WIDTH, HEIGHT,
    )));
    let mut foreign = frame(&other_camera);
    assert!(matches!(
        tracker.track(&SO3::identity(), &frame_k, &mut foreign),
        Err(TrackerError::CameraMismatch { .. })
    ));

    let mut imageless_k = VisualFrame::new(camera.clone(), 2);
    imageless_k.set_keypoint_measurements(vec![Vector2::new(100.0, 100.0)]);
    let mut frame_kp1 = frame(&camera);
    assert!(matches!(
        tracker.track(&SO3::identity(), &imageless_k, &mut frame_kp1),
        Err(TrackerError::MissingRawImage(_))
    ));
}

/// Follows the seeds it is given and remembers them.
struct SeedFollowingFlow {
    seeds: Arc<Mutex<Vec<Vector2<f64>>>>,
}

impl FlowTracker for SeedFollowingFlow {
    fn track(
        &self,
        _prev: &GrayImage,
        _next: &GrayImage,
        _prev_points: &[Vector2<f64>],
        seeds: &[Vector2<f64>],
    ) -> Vec<FlowObservation> {
        if let Ok(mut recorded) = self.seeds.lock() {
            *recorded = seeds.to_vec();
        }
        seeds
            .iter()
            .map(|&position| FlowObservation {
                position,
                outcome: TrackOutcome::Converged,
                error: 0.0,
            })
            .collect()
    }
}

#[test]
fn flow_starts_from_rotation_predictions() {
    const FOCAL: f64 = 450.0;
    let camera = camera();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let mut tracker = LkFeatureTracker::with_components(
        camera.clone(),
        settings(1, 10),
        Box::new(ScriptedDetections::new(Vec::new())),
        Box::new(SeedFollowingFlow {
            seeds: recorded.clone(),
        }),
    )
    .expect("valid tracker");

    let angle: f64 = 0.05;
    let q_kp1_k = SO3::from_axis_angle(&Vector3::y(), -angle);
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -angle);
    let project = |keypoint: (f64, f64)| {
        let bearing = Vector3::new(
            (keypoint.0 - WIDTH as f64 / 2.0) / FOCAL,
            (keypoint.1 - HEIGHT as f64 / 2.0) / FOCAL,
            1.0,
        );
        let rotated = rotation * bearing;
        Vector2::new(
            FOCAL * rotated.x / rotated.z + WIDTH as f64 / 2.0,
            FOCAL * rotated.y / rotated.z + HEIGHT as f64 / 2.0,
        )
    };

    // The last keypoint rotates out of the left image edge.
    let frame_k = frame_with_keypoints(&camera, &[(320.0, 240.0), (400.0, 300.0), (10.0, 240.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&q_kp1_k, &frame_k, &mut frame_kp1)
        .expect("track");

    let seeds = recorded.lock().expect("seeds recorded").clone();
    assert_eq!(seeds.len(), 3);
    assert_relative_eq!(seeds[0], project((320.0, 240.0)), epsilon = 1e-6);
    assert_relative_eq!(seeds[0].x, 320.0 - FOCAL * angle.tan(), epsilon = 1e-6);
    assert_relative_eq!(seeds[1], project((400.0, 300.0)), epsilon = 1e-6);
    assert!(project((10.0, 240.0)).x < 0.0);
    assert_eq!(seeds[2], Vector2::new(10.0, 240.0));

    let stats = tracker.last_stats();
    assert_eq!(stats.prediction_success, 2);
    assert_eq!(stats.prediction_failure, 1);
    assert_eq!(matches.len(), 2);
    assert_relative_eq!(
        frame_kp1.keypoint_measurements()[matches[0].index_kp1],
        seeds[matches[0].index_k],
        epsilon = 1e-9
    );
}

#[test]
fn camera_mask_still_keeps_keypoints_off_the_border() {
    let mask = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([255]));
    let camera: Arc<dyn Camera> = Arc::new(
        PinholeCamera::new(CameraIntrinsics::new(
            450.0,
            450.0,
            WIDTH as f64 / 2.0,
            HEIGHT as f64 / 2.0,
            WIDTH,
            HEIGHT,
        ))
        .with_mask(mask)
        .expect("mask matches image"),
    );

    let mut candidates = vec![
        detection(5.0, 5.0, 100.0),
        detection(20.0, 100.0, 90.0),
        detection(100.0, 10.0, 80.0),
        detection(635.0, 200.0, 70.0),
        detection(300.0, 470.0, 60.0),
    ];
    candidates.extend((0..5).map(|i| detection(100.0 + 40.0 * i as f64, 400.0, 200.0)));
    let mut tracker = tracker(
        &camera,
        settings(5, 10),
        ScriptedDetections::new(candidates),
        ShiftFlow::new(Vector2::new(-80.0, 0.0), 0.0),
    );

    let frame_k = frame_with_keypoints(&camera, &[(100.0, 200.0), (300.0, 200.0)]);
    let mut frame_kp1 = frame(&camera);
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert_eq!(matches.len(), 1);
    assert_eq!(tracker.last_stats().outside_image, 1);
    assert!(tracker.last_stats().redetection_triggered);
    assert_eq!(frame_kp1.num_keypoint_measurements(), 6);
    assert!(frame_kp1.keypoint_measurements().iter().all(|p| is_inside_border(
        p,
        WIDTH,
        HEIGHT,
        MIN_DISTANCE_TO_IMAGE_BORDER_PX
    )));
}

/// Dark canvas with bright squares of varying brightness on a regular lattice, moved by
/// `shift` pixels.
fn render_scene(shift: (i32, i32)) -> GrayImage {
    const SPACING: i32 = 24;
    const SIZE: i32 = 10;
    GrayImage::from_fn(320, 240, |x, y| {
        let u = x as i32 - shift.0;
        let v = y as i32 - shift.1;
        if u < 0 || v < 0 {
            return Luma([40]);
        }
        let (cell_x, cell_y) = (u / SPACING, v / SPACING);
        let inside = u % SPACING < SIZE && v % SPACING < SIZE;
        if inside {
            Luma([150 + ((cell_x * 37 + cell_y * 53) % 80) as u8])
        } else {
            Luma([40])
        }
    })
}

#[test]
fn real_detector_and_flow_follow_a_translated_scene() {
    let camera: Arc<dyn Camera> = Arc::new(PinholeCamera::new(CameraIntrinsics::new(
        300.0, 300.0, 160.0, 120.0, 320, 240,
    )));
    let settings = LkTrackerSettings {
        detector_type: DetectorType::Fast,
        min_feature_count: 100,
        max_feature_count: 200,
        ..LkTrackerSettings::default()
    };
    let mut tracker = LkFeatureTracker::new(camera.clone(), settings).expect("valid tracker");

    let mut frame_k = VisualFrame::new(camera.clone(), 0).with_raw_image(render_scene((0, 0)));
    tracker
        .initialize_keypoints_in_empty_frame(&mut frame_k)
        .expect("bootstrap");
    assert!(frame_k.num_keypoint_measurements() > 50);

    let mut frame_kp1 = VisualFrame::new(camera.clone(), 1).with_raw_image(render_scene((2, 1)));
    let matches = tracker
        .track(&SO3::identity(), &frame_k, &mut frame_kp1)
        .expect("track");

    assert!(matches.len() > 30, "only {} matches", matches.len());
    assert!(frame_kp1.num_keypoint_measurements() <= 200);

    let consistent = matches
        .iter()
        .filter(|m| {
            let displacement =
                frame_kp1.keypoint_measurements()[m.index_kp1] - frame_k.keypoint_measurements()[m.index_k];
            (displacement - Vector2::new(2.0, 1.0)).norm() < 0.5
        })
        .count();
    assert!(
        consistent * 10 >= matches.len() * 8,
        "{consistent}/{} matches follow the motion",
        matches.len()
    );
}
