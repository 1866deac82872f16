//! Render scope: owner of the device-level Vulkan objects.
//!
//! A scope is assembled in stages, each building on the previous one:
//!
//! 1. [`RenderScope::create_physical_device`]
//! 2. [`RenderScope::create_logical_device`]
//! 3. [`RenderScope::create_memory_allocator`]
//! 4. [`RenderScope::create_swapchain`]
//! 5. [`RenderScope::create_default_render_pass`]
//! 6. [`RenderScope::create_descriptor_pool`]
//!
//! Calling a stage out of order returns [`GpuError::InvalidState`]. Dropping
//! the scope tears everything down in reverse dependency order.

use crate::capabilities::GpuCapabilities;
use crate::descriptors::DescriptorPool;
use crate::device::{create_logical_device, find_device_queues, select_physical_device};
use crate::error::{GpuError, Result};
use crate::instance::VulkanInstance;
use crate::memory::GpuAllocator;
use crate::queue::{queue_locks, Queue, QueueKind};
use crate::render_pass::{create_default_render_pass, DEPTH_FORMAT};
use crate::sampler::{create_sampler, SamplerFlags};
use crate::surface::Surface;
use crate::swapchain::{Swapchain, SwapchainConfig, PREFERRED_SURFACE_FORMAT};
use ash::vk;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ffi::CStr;
use std::sync::Arc;

/// Device extensions every windowed scope needs.
pub const SWAPCHAIN_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Construction stages of a [`RenderScope`], in build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeStage {
    PhysicalDevice,
    LogicalDevice,
    MemoryAllocator,
    Swapchain,
    RenderPass,
    DescriptorPool,
}

impl ScopeStage {
    pub const ALL: [Self; 6] = [
        Self::PhysicalDevice,
        Self::LogicalDevice,
        Self::MemoryAllocator,
        Self::Swapchain,
        Self::RenderPass,
        Self::DescriptorPool,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::PhysicalDevice => "Physical device",
            Self::LogicalDevice => "Logical device",
            Self::MemoryAllocator => "Memory allocator",
            Self::Swapchain => "Swapchain",
            Self::RenderPass => "Render pass",
            Self::DescriptorPool => "Descriptor pool",
        }
    }

    /// Stage that has to exist before this one can be created.
    pub fn prerequisite(self) -> Option<Self> {
        match self {
            Self::PhysicalDevice => None,
            Self::LogicalDevice => Some(Self::PhysicalDevice),
            Self::MemoryAllocator | Self::Swapchain | Self::DescriptorPool => {
                Some(Self::LogicalDevice)
            }
            Self::RenderPass => Some(Self::Swapchain),
        }
    }

    /// Whether creating the stage again replaces the old object.
    pub fn replaceable(self) -> bool {
        self == Self::DescriptorPool
    }

    /// Check that this stage may be created, `built` telling which stages exist.
    pub fn require(self, built: impl Fn(Self) -> bool) -> Result<()> {
        if let Some(prerequisite) = self.prerequisite() {
            if !built(prerequisite) {
                return Err(missing(prerequisite.name()));
            }
        }
        if !self.replaceable() && built(self) {
            return Err(already(self.name()));
        }
        Ok(())
    }
}

fn missing(what: &str) -> GpuError {
    GpuError::InvalidState(format!("{what} has not been created"))
}

fn already(what: &str) -> GpuError {
    GpuError::InvalidState(format!("{what} already exists"))
}

/// Owner of the device, queues, allocator, swapchain, default render pass,
/// descriptor pool and sampler cache.
pub struct RenderScope {
    instance: Arc<VulkanInstance>,
    physical_device: Option<vk::PhysicalDevice>,
    capabilities: Option<GpuCapabilities>,
    device: Option<Arc<ash::Device>>,
    queues: BTreeMap<QueueKind, Queue>,
    allocator: Option<Mutex<GpuAllocator>>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    swapchain: Option<Swapchain>,
    vsync: bool,
    render_pass: Option<vk::RenderPass>,
    descriptor_pool: Option<DescriptorPool>,
    samplers: Mutex<HashMap<SamplerFlags, vk::Sampler>>,
}

impl RenderScope {
    /// Create an empty scope on `instance`.
    pub fn new(instance: Arc<VulkanInstance>) -> Self {
        Self {
            instance,
            physical_device: None,
            capabilities: None,
            device: None,
            queues: BTreeMap::new(),
            allocator: None,
            swapchain_loader: None,
            swapchain: None,
            vsync: true,
            render_pass: None,
            descriptor_pool: None,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the best GPU supporting `extensions`.
    pub fn create_physical_device(&mut self, extensions: &[&CStr]) -> Result<&mut Self> {
        self.require(ScopeStage::PhysicalDevice)?;

        let instance = self.instance.handle();
        let physical_device = unsafe { select_physical_device(instance, extensions)? };
        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };

        if !capabilities.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        self.physical_device = Some(physical_device);
        self.capabilities = Some(capabilities);
        Ok(self)
    }

    /// Create the logical device and one [`Queue`] per requested kind.
    ///
    /// Sampler anisotropy and mirror-clamp-to-edge addressing are enabled
    /// automatically when the device offers them.
    pub fn create_logical_device(
        &mut self,
        features: vk::PhysicalDeviceFeatures,
        extensions: &[&CStr],
        queue_kinds: &[QueueKind],
    ) -> Result<&mut Self> {
        self.require(ScopeStage::LogicalDevice)?;
        let physical_device = self.physical_device()?;

        let instance = self.instance.handle();
        let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let resolved = find_device_queues(&families, queue_kinds)?;
        let family_indices: Vec<u32> = resolved.iter().map(|&(_, family)| family).collect();

        let capabilities = self.capabilities()?;
        let mut features = features;
        if capabilities.supports_sampler_anisotropy {
            features.sampler_anisotropy = vk::TRUE;
        }
        let mirror_clamp = capabilities.supports_sampler_mirror_clamp_to_edge;

        let device = unsafe {
            create_logical_device(
                instance,
                physical_device,
                &features,
                mirror_clamp,
                extensions,
                &family_indices,
            )?
        };

        let mut locks = queue_locks(&resolved);
        let mut queues = BTreeMap::new();
        for (kind, family) in resolved {
            let lock = locks.remove(&kind).unwrap_or_default();
            match unsafe { Queue::new(&device, kind, family, lock) } {
                Ok(queue) => {
                    tracing::debug!("{kind:?} queue on family {family}");
                    queues.insert(kind, queue);
                }
                Err(e) => {
                    unsafe {
                        for queue in queues.values() {
                            queue.destroy(&device);
                        }
                        device.destroy_device(None);
                    }
                    return Err(e);
                }
            }
        }

        if extensions.contains(&ash::khr::swapchain::NAME) {
            self.swapchain_loader = Some(ash::khr::swapchain::Device::new(instance, &device));
        }
        self.device = Some(Arc::new(device));
        self.queues = queues;
        Ok(self)
    }

    /// Create the GPU memory allocator.
    pub fn create_memory_allocator(&mut self) -> Result<&mut Self> {
        self.require(ScopeStage::MemoryAllocator)?;
        let device = self.device_arc()?;
        let physical_device = self.physical_device()?;

        let allocator =
            unsafe { GpuAllocator::new(self.instance.handle(), device, physical_device)? };
        self.allocator = Some(Mutex::new(allocator));
        Ok(self)
    }

    /// Set whether future swapchains wait for vertical sync.
    pub fn set_vsync(&mut self, vsync: bool) -> &mut Self {
        self.vsync = vsync;
        self
    }

    /// Create a swapchain for `surface` sized to `desired` where the surface allows.
    ///
    /// Returns `Ok(false)` without creating anything while the surface has
    /// zero area (e.g. a minimized window).
    pub fn create_swapchain(&mut self, surface: &Surface, desired: vk::Extent2D) -> Result<bool> {
        self.require(ScopeStage::Swapchain)?;
        let physical_device = self.physical_device()?;
        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or_else(|| missing("Swapchain loader (enable VK_KHR_swapchain)"))?;
        let graphics = self.queue(QueueKind::Graphics)?;

        if !surface.supports_present(physical_device, graphics.family_index())? {
            return Err(GpuError::SwapchainCreation(
                "Graphics queue family cannot present to this surface".to_string(),
            ));
        }

        let caps = surface.capabilities(physical_device)?;
        let Some(extent) = caps.extent(desired) else {
            tracing::debug!("Surface has zero area, skipping swapchain creation");
            return Ok(false);
        };

        let mut queue_families = vec![graphics.family_index()];
        if let Some(transfer) = self.queues.get(&QueueKind::Transfer) {
            queue_families.push(transfer.family_index());
        }

        let config = SwapchainConfig {
            surface_format: caps.format(PREFERRED_SURFACE_FORMAT)?,
            present_mode: caps.present_mode(self.vsync),
            extent,
            image_count: caps.image_count(),
            pre_transform: caps.capabilities.current_transform,
            queue_families,
        };

        let swapchain =
            unsafe { Swapchain::new(self.device()?, loader, surface.handle(), &config, None)? };

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            swapchain.format
        );

        self.swapchain = Some(swapchain);
        Ok(true)
    }

    /// Destroy the current swapchain (if any) and create a new one.
    ///
    /// The device is waited idle first. When the surface format changes the
    /// default render pass is rebuilt to match.
    pub fn recreate_swapchain(&mut self, surface: &Surface, desired: vk::Extent2D) -> Result<bool> {
        self.wait_idle()?;

        let old_format = self.swapchain.as_ref().map(|s| s.format);
        self.destroy_swapchain()?;

        if !self.create_swapchain(surface, desired)? {
            return Ok(false);
        }

        let new_format = self.color_format()?;
        if self.render_pass.is_some() && old_format != Some(new_format) {
            tracing::info!("Surface format changed to {new_format:?}, rebuilding render pass");
            if let Some(render_pass) = self.render_pass.take() {
                unsafe { self.device()?.destroy_render_pass(render_pass, None) };
            }
            self.create_default_render_pass()?;
        }
        Ok(true)
    }

    fn destroy_swapchain(&mut self) -> Result<()> {
        if let Some(swapchain) = self.swapchain.take() {
            let loader = self
                .swapchain_loader
                .as_ref()
                .ok_or_else(|| missing("Swapchain loader"))?;
            unsafe { swapchain.destroy(self.device()?, loader) };
        }
        Ok(())
    }

    /// Create the default color + depth render pass for the swapchain format.
    pub fn create_default_render_pass(&mut self) -> Result<&mut Self> {
        self.require(ScopeStage::RenderPass)?;
        let color_format = self.color_format()?;
        let render_pass =
            unsafe { create_default_render_pass(self.device()?, color_format, DEPTH_FORMAT)? };
        self.render_pass = Some(render_pass);
        Ok(self)
    }

    /// Create the descriptor pool, replacing any previous one.
    pub fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<&mut Self> {
        self.require(ScopeStage::DescriptorPool)?;
        let device = self.device_arc()?;
        if let Some(old) = self.descriptor_pool.take() {
            tracing::debug!("Replacing descriptor pool");
            unsafe { old.destroy(&device) };
        }
        let pool = unsafe { DescriptorPool::new(&device, max_sets, pool_sizes)? };
        self.descriptor_pool = Some(pool);
        Ok(self)
    }

    /// Whether `stage` has been created.
    pub fn has(&self, stage: ScopeStage) -> bool {
        match stage {
            ScopeStage::PhysicalDevice => self.physical_device.is_some(),
            ScopeStage::LogicalDevice => self.device.is_some(),
            ScopeStage::MemoryAllocator => self.allocator.is_some(),
            ScopeStage::Swapchain => self.swapchain.is_some(),
            ScopeStage::RenderPass => self.render_pass.is_some(),
            ScopeStage::DescriptorPool => self.descriptor_pool.is_some(),
        }
    }

    fn require(&self, stage: ScopeStage) -> Result<()> {
        stage.require(|built| self.has(built))
    }

    /// Whether every stage has been created.
    pub fn is_ready_to_use(&self) -> bool {
        ScopeStage::ALL.iter().all(|&stage| self.has(stage))
    }

    /// Sampler for `flags`, created on first request and cached.
    pub fn sampler(&self, flags: SamplerFlags) -> Result<vk::Sampler> {
        let mut samplers = self.samplers.lock();
        if let Some(&sampler) = samplers.get(&flags) {
            return Ok(sampler);
        }
        let capabilities = self.capabilities()?;
        let sampler = unsafe {
            create_sampler(
                self.device()?,
                flags,
                capabilities.anisotropy(),
                capabilities.supports_sampler_mirror_clamp_to_edge,
            )?
        };
        samplers.insert(flags, sampler);
        Ok(sampler)
    }

    /// Wait for the device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device()?.device_wait_idle()?;
        }
        Ok(())
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub fn physical_device(&self) -> Result<vk::PhysicalDevice> {
        self.physical_device.ok_or_else(|| missing("Physical device"))
    }

    pub fn capabilities(&self) -> Result<&GpuCapabilities> {
        self.capabilities.as_ref().ok_or_else(|| missing("Physical device"))
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> Result<&ash::Device> {
        self.device.as_deref().ok_or_else(|| missing("Logical device"))
    }

    /// Shared handle to the device.
    pub fn device_arc(&self) -> Result<Arc<ash::Device>> {
        self.device.clone().ok_or_else(|| missing("Logical device"))
    }

    /// Queue created for `kind`.
    pub fn queue(&self, kind: QueueKind) -> Result<&Queue> {
        self.queues
            .get(&kind)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{kind:?} queue")))
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> Result<&Mutex<GpuAllocator>> {
        self.allocator.as_ref().ok_or_else(|| missing("Memory allocator"))
    }

    pub fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| missing("Swapchain"))
    }

    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader.as_ref().ok_or_else(|| missing("Swapchain loader"))
    }

    pub fn render_pass(&self) -> Result<vk::RenderPass> {
        self.render_pass.ok_or_else(|| missing("Render pass"))
    }

    pub fn descriptor_pool(&self) -> Result<&DescriptorPool> {
        self.descriptor_pool.as_ref().ok_or_else(|| missing("Descriptor pool"))
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> Result<vk::Extent2D> {
        Ok(self.swapchain()?.extent)
    }

    /// Swapchain image format.
    pub fn color_format(&self) -> Result<vk::Format> {
        Ok(self.swapchain()?.format)
    }

    /// Depth attachment format of the default render pass.
    pub fn depth_format(&self) -> vk::Format {
        DEPTH_FORMAT
    }

    /// Number of frames that may be recorded concurrently (one per swapchain image).
    pub fn frames_in_flight(&self) -> Result<usize> {
        Ok(self.swapchain()?.image_count())
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        unsafe {
            let _ = device.device_wait_idle();

            for queue in self.queues.values() {
                queue.destroy(&device);
            }
            self.queues.clear();

            for (_, sampler) in self.samplers.get_mut().drain() {
                device.destroy_sampler(sampler, None);
            }

            if let Some(pool) = self.descriptor_pool.take() {
                pool.destroy(&device);
            }

            if let Some(render_pass) = self.render_pass.take() {
                device.destroy_render_pass(render_pass, None);
            }

            if let (Some(swapchain), Some(loader)) = (self.swapchain.take(), &self.swapchain_loader) {
                swapchain.destroy(&device, loader);
            }

            // Shutdown allocator BEFORE destroying device
            if let Some(allocator) = self.allocator.take() {
                allocator.into_inner().shutdown();
            }

            device.destroy_device(None);
        }
        tracing::debug!("Render scope destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::clamp_extent;
    use std::collections::BTreeSet;

    fn require(stage: ScopeStage, built: &BTreeSet<ScopeStage>) -> Result<()> {
        stage.require(|s| built.contains(&s))
    }

    #[test]
    fn stages_build_in_order() {
        let mut built = BTreeSet::new();
        for stage in ScopeStage::ALL {
            require(stage, &built).unwrap();
            built.insert(stage);
        }
        assert!(ScopeStage::ALL.iter().all(|s| built.contains(s)));
    }

    #[test]
    fn every_stage_rejected_on_an_empty_scope_but_the_first() {
        let built = BTreeSet::new();
        for stage in ScopeStage::ALL {
            let result = require(stage, &built);
            if stage == ScopeStage::PhysicalDevice {
                assert!(result.is_ok());
            } else {
                assert!(
                    matches!(result, Err(GpuError::InvalidState(_))),
                    "{stage:?} accepted without prerequisites"
                );
            }
        }
    }

    #[test]
    fn missing_prerequisite_named() {
        let built = BTreeSet::from([ScopeStage::PhysicalDevice]);
        let Err(GpuError::InvalidState(message)) = require(ScopeStage::Swapchain, &built) else {
            panic!("swapchain created without a logical device");
        };
        assert_eq!(message, "Logical device has not been created");
    }

    #[test]
    fn stages_cannot_be_created_twice() {
        let built: BTreeSet<_> = ScopeStage::ALL.into_iter().collect();
        for stage in ScopeStage::ALL {
            let result = require(stage, &built);
            if stage.replaceable() {
                assert!(result.is_ok());
            } else {
                let Err(GpuError::InvalidState(message)) = result else {
                    panic!("{stage:?} created twice");
                };
                assert!(message.ends_with("already exists"));
            }
        }
    }

    #[test]
    fn zero_area_surface_leaves_render_pass_blocked() {
        let built = BTreeSet::from([
            ScopeStage::PhysicalDevice,
            ScopeStage::LogicalDevice,
            ScopeStage::MemoryAllocator,
        ]);
        require(ScopeStage::Swapchain, &built).unwrap();

        // A minimized window reports a zero current extent: nothing is created
        let minimized = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            ..Default::default()
        };
        let desired = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(clamp_extent(&minimized, desired), None);

        assert!(matches!(
            require(ScopeStage::RenderPass, &built),
            Err(GpuError::InvalidState(_))
        ));
        require(ScopeStage::DescriptorPool, &built).unwrap();
    }
}
