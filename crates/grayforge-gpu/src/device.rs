//! Physical device selection and logical device creation.

use crate::error::{GpuError, Result};
use crate::queue::QueueKind;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};

/// Find a queue family offering every capability in `flags`.
///
/// Families are searched from the highest index down. Drivers list the
/// general-purpose family first, so this prefers dedicated compute or
/// transfer families and falls back to the general one.
pub fn find_queue_family(families: &[vk::QueueFamilyProperties], flags: vk::QueueFlags) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .rev()
        .find(|(_, family)| family.queue_count > 0 && family.queue_flags.contains(flags))
        .map(|(index, _)| index as u32)
}

/// Resolve a family index for each requested queue kind.
pub fn find_device_queues(
    families: &[vk::QueueFamilyProperties],
    kinds: &[QueueKind],
) -> Result<Vec<(QueueKind, u32)>> {
    kinds
        .iter()
        .map(|&kind| {
            find_queue_family(families, kind.flags())
                .map(|index| (kind, index))
                .ok_or(GpuError::QueueFamilyNotFound(kind.flags()))
        })
        .collect()
}

/// Names from `required` that are absent from `available`.
pub fn missing_extensions<'a, I>(available: I, required: &[&CStr]) -> Vec<String>
where
    I: IntoIterator<Item = &'a CStr>,
{
    let available: Vec<&CStr> = available.into_iter().collect();
    required
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Whether every extension in `required` is offered.
pub fn supports_extensions<'a, I>(available: I, required: &[&CStr]) -> bool
where
    I: IntoIterator<Item = &'a CStr>,
{
    missing_extensions(available, required).is_empty()
}

/// Names of the extensions `physical_device` exposes.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn device_extension_names(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<std::ffi::CString>> {
    let properties = instance.enumerate_device_extension_properties(physical_device)?;
    Ok(properties
        .iter()
        .map(|ext| CStr::from_ptr(ext.extension_name.as_ptr()).to_owned())
        .collect())
}

/// Select the best physical device that supports `extensions` and graphics.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    extensions: &[&CStr],
) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best_device = None;
    let mut best_score = i64::MIN;

    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        let name = CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy();

        let available = device_extension_names(instance, device)?;
        let missing = missing_extensions(available.iter().map(|s| s.as_c_str()), extensions);
        if !missing.is_empty() {
            tracing::debug!("Skipping {name}: missing {}", missing.join(", "));
            continue;
        }

        let families = instance.get_physical_device_queue_family_properties(device);
        if find_queue_family(&families, vk::QueueFlags::GRAPHICS).is_none() {
            tracing::debug!("Skipping {name}: no graphics queue");
            continue;
        }

        let score = score_physical_device(instance, device, &properties);
        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection.
unsafe fn score_physical_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    properties: &vk::PhysicalDeviceProperties,
) -> i64 {
    let mut score = device_type_score(properties.device_type);

    // Prefer more VRAM
    let memory = instance.get_physical_device_memory_properties(device);
    let vram_mb: u64 = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size / (1024 * 1024))
        .sum();
    score += (vram_mb / 1024) as i64; // +1 per GB

    score
}

/// Preference for a device type, discrete GPUs first.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> i64 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    }
}

/// Create the logical device with one queue per distinct family.
///
/// `mirror_clamp_to_edge` enables the Vulkan 1.2 `samplerMirrorClampToEdge`
/// feature and must only be set when the device reports it.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    features: &vk::PhysicalDeviceFeatures,
    mirror_clamp_to_edge: bool,
    extensions: &[&CStr],
    queue_families: &[u32],
) -> Result<ash::Device> {
    let unique_families: BTreeSet<u32> = queue_families.iter().copied().collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan12 =
        vk::PhysicalDeviceVulkan12Features::default().sampler_mirror_clamp_to_edge(true);
    let mut device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(features);
    if mirror_clamp_to_edge {
        device_create_info = device_create_info.push_next(&mut vulkan12);
    }

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn typical_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn prefers_dedicated_families() {
        let families = typical_families();
        assert_eq!(find_queue_family(&families, vk::QueueFlags::GRAPHICS), Some(0));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(1));
        assert_eq!(find_queue_family(&families, vk::QueueFlags::TRANSFER), Some(2));
    }

    #[test]
    fn falls_back_to_general_family() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let queues = find_device_queues(&families, &QueueKind::ALL).unwrap();
        assert_eq!(
            queues,
            vec![
                (QueueKind::Graphics, 0),
                (QueueKind::Compute, 0),
                (QueueKind::Transfer, 0)
            ]
        );
    }

    #[test]
    fn skips_empty_families() {
        let mut families = typical_families();
        families[1].queue_count = 0;
        assert_eq!(find_queue_family(&families, vk::QueueFlags::COMPUTE), Some(0));
    }

    #[test]
    fn missing_family_is_an_error() {
        let families = vec![family(vk::QueueFlags::TRANSFER)];
        assert!(matches!(
            find_device_queues(&families, &[QueueKind::Graphics]),
            Err(GpuError::QueueFamilyNotFound(flags)) if flags == vk::QueueFlags::GRAPHICS
        ));
    }

    #[test]
    fn extension_matching() {
        let available = [c"VK_KHR_swapchain", c"VK_KHR_maintenance1"];
        assert!(supports_extensions(available, &[c"VK_KHR_swapchain"]));
        assert!(supports_extensions(available, &[]));
        assert_eq!(
            missing_extensions(available, &[c"VK_KHR_swapchain", c"VK_EXT_mesh_shader"]),
            vec!["VK_EXT_mesh_shader".to_string()]
        );
    }

    #[test]
    fn discrete_beats_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert_eq!(device_type_score(vk::PhysicalDeviceType::CPU), 0);
    }
}
