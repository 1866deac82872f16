//! Surface management for windowed rendering.
//!
//! Hides the raw-window-handle plumbing from application code.

use crate::error::{GpuError, Result};
use crate::instance::VulkanInstance;
use crate::swapchain::{clamp_extent, desired_image_count, select_present_mode, select_surface_format};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// A presentable Vulkan surface.
///
/// The surface must outlive every swapchain created from it. It keeps the
/// instance alive and destroys itself on drop.
pub struct Surface {
    surface: vk::SurfaceKHR,
    instance: Arc<VulkanInstance>,
}

impl Surface {
    /// Create a surface for a window.
    pub fn from_window<W>(instance: Arc<VulkanInstance>, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        Ok(Self { surface, instance })
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Query surface capabilities for a physical device.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceCapabilities> {
        let loader = self.instance.surface_loader();
        unsafe {
            let capabilities =
                loader.get_physical_device_surface_capabilities(physical_device, self.surface)?;
            let formats = loader.get_physical_device_surface_formats(physical_device, self.surface)?;
            let present_modes =
                loader.get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Whether `family` of `physical_device` can present to this surface.
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        let supported = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family, self.surface)?
        };
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Format closest to `desired`.
    pub fn format(&self, desired: vk::SurfaceFormatKHR) -> Result<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats, desired)
            .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
    }

    /// Get the recommended present mode.
    pub fn present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }

    /// Image count to request.
    pub fn image_count(&self) -> u32 {
        desired_image_count(&self.capabilities)
    }

    /// Swapchain extent, `None` while the surface has zero area.
    pub fn extent(&self, desired: vk::Extent2D) -> Option<vk::Extent2D> {
        clamp_extent(&self.capabilities, desired)
    }
}
