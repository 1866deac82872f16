//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers enabled when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Owner of the Vulkan loader and instance.
///
/// Every other Vulkan object is created from this one, so it must be the
/// last to go. [`RenderScope`](crate::RenderScope) and
/// [`Surface`](crate::Surface) hold it behind an `Arc`.
pub struct VulkanInstance {
    // Entry must outlive the instance
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    validation: bool,
}

impl VulkanInstance {
    /// Create an instance.
    ///
    /// When `display` is given, the surface extensions that display needs
    /// are enabled so windows can be presented to.
    pub fn new(app_name: &str, validation: bool, display: Option<RawDisplayHandle>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Grayforge")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        #[allow(unused_mut)]
        let mut extension_names: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)?.to_vec(),
            None => Vec::new(),
        };
        #[cfg(target_os = "macos")]
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

        let layers = if validation {
            unsafe { available_layers(&entry, &validation_layers())? }
        } else {
            vec![]
        };
        let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        tracing::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extension_names.len(),
            if layer_names.is_empty() { "off" } else { "on" }
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            validation: !layer_names.is_empty(),
        })
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Whether validation layers are active.
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Vulkan instance destroyed");
    }
}

/// Filter `requested` down to the layers the loader actually offers.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn available_layers(
    entry: &ash::Entry,
    requested: &[&'static CStr],
) -> Result<Vec<&'static CStr>> {
    let available = entry.enumerate_instance_layer_properties()?;
    let mut found = Vec::with_capacity(requested.len());
    for &layer in requested {
        let present = available
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == layer);
        if present {
            found.push(layer);
        } else {
            tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
        }
    }
    Ok(found)
}
