//! Per-frame context for rendering.

use ash::vk;

/// Context for the current frame being rendered.
pub struct FrameContext {
    /// Command buffer recording inside the default render pass.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Framebuffer bound for this image.
    pub framebuffer: vk::Framebuffer,
    /// Render area.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
}

impl FrameContext {
    pub(crate) const fn new(
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        dt: f32,
        frame_number: u64,
    ) -> Self {
        Self {
            command_buffer,
            image_index,
            framebuffer,
            extent,
            dt,
            frame_number,
        }
    }

    /// Width over height of the render area.
    pub fn aspect_ratio(&self) -> f32 {
        aspect_ratio(self.extent)
    }
}

/// Width over height, 1.0 for a degenerate extent.
pub fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_of_extent() {
        let wide = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert!((aspect_ratio(wide) - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(aspect_ratio(vk::Extent2D::default()), 1.0);
    }
}
