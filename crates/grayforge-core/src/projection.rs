//! Perspective projection component.

use glam::{Mat4, Vec4};

/// Right-handed perspective projection for Vulkan clip space.
///
/// View-space `z = -near` maps to depth 0 and `z = -far` maps to depth 1.
/// The Y scale is negated so that +Y in view space points up on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    matrix: Mat4,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            matrix: Mat4::from_cols(Vec4::ZERO, Vec4::ZERO, Vec4::new(0.0, 0.0, 0.0, -1.0), Vec4::ZERO),
        }
    }
}

impl Projection {
    /// Create a fully configured projection.
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut projection = Self::default();
        projection.set_fov(fov_y, aspect).set_depth_range(near, far);
        projection
    }

    /// Set the near and far clip planes.
    pub fn set_depth_range(&mut self, near: f32, far: f32) -> &mut Self {
        self.matrix.z_axis.z = far / (near - far);
        self.matrix.w_axis.z = -(far * near) / (far - near);
        self
    }

    /// Set the vertical field of view (radians) and aspect ratio.
    pub fn set_fov(&mut self, fov_y: f32, aspect: f32) -> &mut Self {
        let tan_half = (fov_y * 0.5).tan();
        self.matrix.x_axis.x = 1.0 / (aspect * tan_half);
        self.matrix.y_axis.y = -1.0 / tan_half;
        self
    }

    /// Projection matrix.
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn ndc(projection: &Projection, point: Vec3) -> Vec3 {
        let clip = projection.matrix() * point.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn depth_range_maps_to_unit_interval() {
        let p = Projection::perspective(1.0, 1.5, 0.1, 100.0);
        assert_relative_eq!(ndc(&p, Vec3::new(0.0, 0.0, -0.1)).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc(&p, Vec3::new(0.0, 0.0, -100.0)).z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn y_axis_is_flipped() {
        let p = Projection::perspective(1.0, 1.0, 0.1, 10.0);
        assert!(p.matrix().y_axis.y < 0.0);
        assert!(ndc(&p, Vec3::new(0.0, 1.0, -5.0)).y < 0.0);
    }

    #[test]
    fn fov_edge_maps_to_clip_edge() {
        let fov = std::f32::consts::FRAC_PI_2;
        let p = Projection::perspective(fov, 2.0, 0.1, 10.0);
        // At 90 degrees the top edge sits at y == -z.
        assert_relative_eq!(ndc(&p, Vec3::new(0.0, 1.0, -1.0)).y, -1.0, epsilon = 1e-5);
        assert_relative_eq!(ndc(&p, Vec3::new(2.0, 0.0, -1.0)).x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn default_keeps_perspective_divide() {
        let p = Projection::default();
        assert_eq!(p.matrix().z_axis.w, -1.0);
        assert_eq!(p.matrix().x_axis.x, 0.0);
    }
}
