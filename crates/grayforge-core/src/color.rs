//! Flat color component.

use glam::Vec3;

/// Linear RGB tint applied to an object.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Color {
    pub rgb: Vec3,
}

impl Default for Color {
    fn default() -> Self {
        Self { rgb: Vec3::ONE }
    }
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self {
            rgb: Vec3::new(r, g, b),
        }
    }

    /// RGBA array suitable for push constants.
    pub fn to_array4(self, alpha: f32) -> [f32; 4] {
        [self.rgb.x, self.rgb.y, self.rgb.z, alpha]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_white() {
        assert_eq!(Color::default().to_array4(1.0), [1.0; 4]);
    }
}
