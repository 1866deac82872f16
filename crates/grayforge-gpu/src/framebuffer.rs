//! Framebuffer creation.

use crate::error::Result;
use ash::vk;

/// Create a single-layer framebuffer.
///
/// # Safety
/// The device, render pass and views must be valid and the views must match
/// the render pass attachments in order and format.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    attachments: &[vk::ImageView],
) -> Result<vk::Framebuffer> {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = device.create_framebuffer(&create_info, None)?;
    Ok(framebuffer)
}

/// Create one framebuffer per swapchain view, sharing a depth view.
///
/// # Safety
/// Same requirements as [`create_framebuffer`].
pub unsafe fn create_swapchain_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    color_views: &[vk::ImageView],
    depth_view: vk::ImageView,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(color_views.len());
    for &color in color_views {
        match create_framebuffer(device, render_pass, extent, &[color, depth_view]) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer, None);
                }
                return Err(e);
            }
        }
    }
    Ok(framebuffers)
}
