//! GPU capability detection.

use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Sampling
    /// Whether anisotropic filtering can be enabled
    pub supports_sampler_anisotropy: bool,
    /// Highest anisotropy a sampler may request
    pub max_sampler_anisotropy: f32,
    /// Whether `MIRROR_CLAMP_TO_EDGE` addressing can be enabled
    pub supports_sampler_mirror_clamp_to_edge: bool,
    /// Largest 2D image side
    pub max_image_dimension_2d: u32,
    /// Largest 3D image side
    pub max_image_dimension_3d: u32,

    // Compute limits
    /// Maximum compute workgroup size
    pub max_compute_workgroup_size: [u32; 3],
    /// Maximum compute workgroup invocations
    pub max_compute_workgroup_invocations: u32,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        if properties.api_version >= vk::API_VERSION_1_2 {
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan12);
            instance.get_physical_device_features2(physical_device, &mut features2);
        }

        let limits = &properties.limits;
        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
            supports_sampler_mirror_clamp_to_edge: vulkan12.sampler_mirror_clamp_to_edge == vk::TRUE,
            max_image_dimension_2d: limits.max_image_dimension2_d,
            max_image_dimension_3d: limits.max_image_dimension3_d,
            max_compute_workgroup_size: limits.max_compute_work_group_size,
            max_compute_workgroup_invocations: limits.max_compute_work_group_invocations,
        }
    }

    /// Check if the GPU meets minimum requirements for the engine.
    pub fn meets_requirements(&self) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        // Render passes and separate depth layouts need Vulkan 1.2
        api_major > 1 || (api_major == 1 && api_minor >= 2)
    }

    /// Anisotropy to request for samplers, or `None` if unsupported.
    pub fn anisotropy(&self) -> Option<f32> {
        self.supports_sampler_anisotropy
            .then_some(self.max_sampler_anisotropy)
            .filter(|&max| max >= 1.0)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(api_version: u32) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::from_vendor_id(0x1002),
            device_name: "Test GPU".to_string(),
            api_version,
            driver_version: 0,
            device_local_memory_mb: 8192,
            supports_sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            supports_sampler_mirror_clamp_to_edge: false,
            max_image_dimension_2d: 16384,
            max_image_dimension_3d: 2048,
            max_compute_workgroup_size: [1024, 1024, 64],
            max_compute_workgroup_invocations: 1024,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn requires_vulkan_1_2() {
        assert!(caps(vk::API_VERSION_1_2).meets_requirements());
        assert!(caps(vk::API_VERSION_1_3).meets_requirements());
        assert!(!caps(vk::API_VERSION_1_1).meets_requirements());
    }

    #[test]
    fn anisotropy_needs_feature() {
        let mut c = caps(vk::API_VERSION_1_2);
        assert_eq!(c.anisotropy(), Some(16.0));
        c.supports_sampler_anisotropy = false;
        assert_eq!(c.anisotropy(), None);
    }

    #[test]
    fn summary_mentions_device() {
        let summary = caps(vk::API_VERSION_1_2).summary();
        assert!(summary.starts_with("Test GPU (Amd) - Vulkan 1.2.0"));
    }
}
