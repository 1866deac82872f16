//! Object transform component.

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

/// Placement of an object in world space.
///
/// The matrix columns hold the local basis and the offset:
/// column 0 is right, column 1 is up, column 2 is forward and
/// column 3 is the world-space offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
        }
    }
}

impl Transform {
    /// Create an identity transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transform placed at `offset` with identity rotation.
    pub fn from_offset(offset: Vec3) -> Self {
        let mut transform = Self::default();
        transform.set_offset(offset);
        transform
    }

    /// Set the world-space offset.
    pub fn set_offset(&mut self, offset: Vec3) -> &mut Self {
        self.matrix.w_axis = offset.extend(1.0);
        self
    }

    /// Move the object along its own axes.
    pub fn translate(&mut self, delta: Vec3) -> &mut Self {
        let moved = self.offset() + self.rotation() * delta;
        self.set_offset(moved)
    }

    /// Set the rotation from three basis vectors.
    pub fn set_rotation_axes(&mut self, right: Vec3, up: Vec3, forward: Vec3) -> &mut Self {
        self.matrix.x_axis = right.extend(0.0);
        self.matrix.y_axis = up.extend(0.0);
        self.matrix.z_axis = forward.extend(0.0);
        self
    }

    /// Set the rotation from an up and a forward vector.
    ///
    /// The right axis is derived as `normalize(up x forward)`.
    pub fn set_rotation_up_forward(&mut self, up: Vec3, forward: Vec3) -> &mut Self {
        let right = up.cross(forward).normalize();
        self.set_rotation_axes(right, up, forward)
    }

    /// Set the rotation from a 3x3 matrix.
    pub fn set_rotation_matrix(&mut self, rotation: Mat3) -> &mut Self {
        self.set_rotation_axes(rotation.x_axis, rotation.y_axis, rotation.z_axis)
    }

    /// Set the rotation from Euler angles in radians.
    ///
    /// Yaw turns around Y, roll around Z and pitch around X. Positive pitch
    /// tilts the forward axis upwards.
    pub fn set_rotation_euler(&mut self, pitch: f32, yaw: f32, roll: f32) -> &mut Self {
        let rotation = euler_rotation(pitch, yaw, roll);
        self.set_rotation_axes(
            rotation.x_axis.normalize(),
            rotation.y_axis.normalize(),
            rotation.z_axis.normalize(),
        )
    }

    /// Apply an additional Euler rotation on top of the current one.
    pub fn rotate(&mut self, pitch: f32, yaw: f32, roll: f32) -> &mut Self {
        let rotation = euler_rotation(pitch, yaw, roll) * self.rotation();
        self.set_rotation_matrix(rotation)
    }

    /// World-space offset.
    pub fn offset(&self) -> Vec3 {
        self.matrix.w_axis.truncate()
    }

    /// Rotation part of the transform.
    pub fn rotation(&self) -> Mat3 {
        Mat3::from_mat4(self.matrix)
    }

    /// Forward axis (column 2).
    pub fn forward(&self) -> Vec3 {
        self.matrix.z_axis.truncate()
    }

    /// Right axis (column 0).
    pub fn right(&self) -> Vec3 {
        self.matrix.x_axis.truncate()
    }

    /// Up axis (column 1).
    pub fn up(&self) -> Vec3 {
        self.matrix.y_axis.truncate()
    }

    /// Full model matrix.
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// Homogeneous offset, as stored in the matrix.
    pub fn offset_homogeneous(&self) -> Vec4 {
        self.matrix.w_axis
    }
}

fn euler_rotation(pitch: f32, yaw: f32, roll: f32) -> Mat3 {
    let q = Quat::from_rotation_y(yaw) * Quat::from_rotation_z(roll) * Quat::from_rotation_x(-pitch);
    Mat3::from_quat(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-5);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-5);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-5);
    }

    #[test]
    fn default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.matrix(), Mat4::IDENTITY);
        assert_eq!(t.forward(), Vec3::Z);
        assert_eq!(t.right(), Vec3::X);
        assert_eq!(t.up(), Vec3::Y);
        assert_eq!(t.offset_homogeneous(), Vec4::W);
    }

    #[test]
    fn set_offset_keeps_rotation() {
        let mut t = Transform::new();
        t.set_rotation_euler(0.0, FRAC_PI_2, 0.0)
            .set_offset(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t.offset(), Vec3::new(1.0, 2.0, 3.0));
        assert_vec_eq(t.forward(), Vec3::X);
    }

    #[test]
    fn yaw_turns_forward_towards_x() {
        let mut t = Transform::new();
        t.set_rotation_euler(0.0, FRAC_PI_2, 0.0);
        assert_vec_eq(t.forward(), Vec3::X);
        assert_vec_eq(t.right(), Vec3::NEG_Z);
        assert_vec_eq(t.up(), Vec3::Y);
    }

    #[test]
    fn positive_pitch_looks_up() {
        let mut t = Transform::new();
        t.set_rotation_euler(0.3, 0.0, 0.0);
        assert!(t.forward().y > 0.0);
        assert_relative_eq!(t.forward().length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn translate_moves_in_local_space() {
        let mut t = Transform::from_offset(Vec3::new(0.0, 1.0, 0.0));
        t.set_rotation_euler(0.0, FRAC_PI_2, 0.0);
        t.translate(Vec3::new(0.0, 0.0, 2.0));
        assert_vec_eq(t.offset(), Vec3::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn rotate_accumulates() {
        let mut t = Transform::new();
        t.rotate(0.0, FRAC_PI_2, 0.0).rotate(0.0, FRAC_PI_2, 0.0);
        assert_vec_eq(t.forward(), Vec3::NEG_Z);
    }

    #[test]
    fn up_forward_derives_right() {
        let mut t = Transform::new();
        t.set_rotation_up_forward(Vec3::Y, Vec3::Z);
        assert_vec_eq(t.right(), Vec3::X);
    }
}
