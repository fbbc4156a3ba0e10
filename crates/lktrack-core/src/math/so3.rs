use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};
use std::ops::Mul;

/// Rotation between two camera frames, backed by a unit quaternion.
///
/// The tracker consumes `q_kp1_k`, the rotation taking bearings expressed in camera frame k
/// into camera frame k+1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    rotation: UnitQuaternion<f64>,
}

impl SO3 {
    pub fn identity() -> Self {
        Self::from_unit_quaternion(UnitQuaternion::identity())
    }

    pub fn from_unit_quaternion(rotation: UnitQuaternion<f64>) -> Self {
        Self { rotation }
    }

    /// Builds a rotation from an axis-angle pair. A degenerate axis yields the identity.
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        if axis.norm_squared() < f64::EPSILON {
            return Self::identity();
        }

        let unit_axis = Unit::new_normalize(*axis);
        Self::from_unit_quaternion(UnitQuaternion::from_axis_angle(&unit_axis, angle))
    }

    /// Normalizes an arbitrary quaternion. A zero quaternion yields the identity.
    pub fn from_quaternion(quaternion: Quaternion<f64>) -> Self {
        let rotation = UnitQuaternion::try_new(quaternion, f64::EPSILON)
            .unwrap_or_else(UnitQuaternion::identity);
        Self::from_unit_quaternion(rotation)
    }

    /// Exponential map of an so(3) vector.
    pub fn exp(omega: &Vector3<f64>) -> Self {
        Self::from_unit_quaternion(UnitQuaternion::from_scaled_axis(*omega))
    }

    /// Axis-angle vector of this rotation.
    pub fn log(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    pub fn inverse(&self) -> Self {
        Self::from_unit_quaternion(self.rotation.inverse())
    }

    pub fn rotate(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transform_vector(vector)
    }

    pub fn unit_quaternion(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }
}

impl Default for SO3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: SO3) -> SO3 {
        SO3::from_unit_quaternion(self.rotation * rhs.rotation)
    }
}

impl From<UnitQuaternion<f64>> for SO3 {
    fn from(rotation: UnitQuaternion<f64>) -> Self {
        SO3::from_unit_quaternion(rotation)
    }
}
