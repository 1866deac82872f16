//! Camera and view management.

use glam::{Mat4, Vec3, Vec4};
use grayforge_core::{Color, Projection, Transform};

/// Perspective camera placed by a [`Transform`].
///
/// The camera looks down its local -Z axis, so the transform's forward
/// column points away from what is being viewed.
#[derive(Debug, Clone)]
pub struct Camera {
    pub transform: Transform,
    projection: Projection,
    fov_y: f32,
    aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl Camera {
    /// Create a camera at the origin.
    pub fn new(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            transform: Transform::new(),
            projection: Projection::perspective(fov_y, aspect, near, far),
            fov_y,
            aspect,
        }
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.projection.set_fov(self.fov_y, aspect);
    }

    /// Set the vertical field of view in radians.
    pub fn set_fov(&mut self, fov_y: f32) {
        self.fov_y = fov_y;
        self.projection.set_fov(fov_y, self.aspect);
    }

    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        self.projection.set_depth_range(near, far);
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn position(&self) -> Vec3 {
        self.transform.offset()
    }

    /// Place the camera at `position` looking at `target`.
    pub fn look_at(&mut self, position: Vec3, target: Vec3) {
        let back = (position - target).try_normalize().unwrap_or(Vec3::Z);
        // Straight up or down: pick another reference for the right axis
        let reference = if back.cross(Vec3::Y).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let right = reference.cross(back).normalize();
        let up = back.cross(right);
        self.transform
            .set_offset(position)
            .set_rotation_axes(right, up, back);
    }

    /// Orbit `target` at `radius`, angles in radians.
    ///
    /// Azimuth turns around +Y starting from +Z; elevation lifts towards +Y.
    pub fn orbit(&mut self, target: Vec3, radius: f32, azimuth: f32, elevation: f32) {
        let (sin_az, cos_az) = azimuth.sin_cos();
        let (sin_el, cos_el) = elevation.sin_cos();
        let position = target + radius * Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az);
        self.look_at(position, target);
    }

    /// World to view transform.
    pub fn view_matrix(&self) -> Mat4 {
        self.transform.matrix().inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Per-draw data pushed to the mesh shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshPushConstants {
    pub mvp: Mat4,
    pub color: Vec4,
}

impl MeshPushConstants {
    pub fn new(camera: &Camera, model: Mat4, color: Color) -> Self {
        Self {
            mvp: camera.view_projection() * model,
            color: Vec4::from_array(color.to_array4(1.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ndc(camera: &Camera, point: Vec3) -> Vec3 {
        let clip = camera.view_projection() * point.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn view_moves_camera_to_origin() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::new(3.0, 2.0, 5.0), Vec3::ZERO);
        let eye = camera.view_matrix().transform_point3(Vec3::new(3.0, 2.0, 5.0));
        assert_relative_eq!(eye.length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn target_lands_in_screen_center() {
        let mut camera = Camera::new(1.0, 1.5, 0.1, 100.0);
        camera.look_at(Vec3::new(-4.0, 3.0, 6.0), Vec3::new(1.0, 0.5, 0.0));
        let p = ndc(&camera, Vec3::new(1.0, 0.5, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-4);
        assert!(p.z > 0.0 && p.z < 1.0);
    }

    #[test]
    fn world_up_is_screen_up() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert!(ndc(&camera, Vec3::new(0.0, 1.0, 0.0)).y < 0.0);
        assert!(ndc(&camera, Vec3::new(1.0, 0.0, 0.0)).x > 0.0);
    }

    #[test]
    fn look_straight_down_is_finite() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
        assert!(camera.view_matrix().is_finite());
    }

    #[test]
    fn orbit_keeps_radius() {
        let mut camera = Camera::default();
        camera.orbit(Vec3::new(1.0, 0.0, 0.0), 4.0, 0.7, 0.3);
        assert_relative_eq!(camera.position().distance(Vec3::new(1.0, 0.0, 0.0)), 4.0, epsilon = 1e-5);
    }

    #[test]
    fn aspect_rescales_x_only() {
        let mut camera = Camera::new(1.0, 1.0, 0.1, 10.0);
        let before = camera.projection_matrix();
        camera.set_aspect(2.0);
        let after = camera.projection_matrix();
        assert_relative_eq!(after.x_axis.x, before.x_axis.x / 2.0, epsilon = 1e-6);
        assert_eq!(after.y_axis.y, before.y_axis.y);
    }
}
