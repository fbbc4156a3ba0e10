use nalgebra::Vector2;

use crate::camera::Camera;
use crate::math::SO3;

/// Predicted position of a keypoint in the next frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeypointPrediction {
    pub position: Vector2<f64>,
    /// False when the prediction fell back to the previous position.
    pub success: bool,
}

/// Predicts keypoint positions after a pure camera rotation.
///
/// Each keypoint is back-projected, rotated by `q_kp1_k` and projected again. Keypoints that
/// cannot be back-projected or whose prediction is not visible keep their previous position.
pub fn predict_keypoints_by_rotation(
    camera: &dyn Camera,
    keypoints_k: &[Vector2<f64>],
    q_kp1_k: &SO3,
) -> Vec<KeypointPrediction> {
    keypoints_k
        .iter()
        .map(|keypoint| {
            let predicted = camera
                .back_project(keypoint)
                .map(|bearing_k| camera.project(&q_kp1_k.rotate(&bearing_k)))
                .filter(|projection| projection.is_keypoint_visible())
                .and_then(|projection| projection.keypoint());

            match predicted {
                Some(position) => KeypointPrediction {
                    position,
                    success: true,
                },
                None => KeypointPrediction {
                    position: *keypoint,
                    success: false,
                },
            }
        })
        .collect()
}
