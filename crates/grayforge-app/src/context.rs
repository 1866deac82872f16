//! Application context.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use ash::vk;
use grayforge_gpu::framebuffer::create_swapchain_framebuffers;
use grayforge_gpu::{
    create_semaphore, FrameSync, MemoryLocation, QueueKind, RenderScope, Surface, VulkanImage, VulkanInstance,
    SWAPCHAIN_EXTENSIONS,
};
use grayforge_platform::Window;
use grayforge_shaders::ShaderLibrary;

use crate::runner::AppConfig;

/// Descriptor capacity of the scope's pool.
const DESCRIPTOR_SETS: u32 = 64;

fn descriptor_pool_sizes() -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTOR_SETS,
    })
}

/// Whether the frame slots must be rebuilt for a swapchain of `image_count` images.
pub(crate) fn frames_mismatch(frames: usize, image_count: usize) -> bool {
    frames != image_count
}

/// Per-frame command buffer and synchronization.
pub(crate) struct FrameData {
    pub sync: FrameSync,
    pub command_buffer: vk::CommandBuffer,
}

/// Application context shared across all app methods.
///
/// Fields drop in declaration order: the scope (device and swapchain) goes
/// before the surface, and the window outlives both.
pub struct AppContext {
    /// Device-level Vulkan objects.
    pub scope: RenderScope,
    /// Surface the swapchain presents to.
    pub surface: Surface,
    /// Shader directory.
    pub shaders: ShaderLibrary,
    /// Color the default render pass clears to.
    pub clear_color: [f32; 4],
    /// Total frames rendered.
    pub frame_count: u64,
    pub(crate) depth: Option<VulkanImage>,
    pub(crate) framebuffers: Vec<vk::Framebuffer>,
    pub(crate) frames: Vec<FrameData>,
    /// Per-swapchain-image render finished semaphores.
    pub(crate) render_finished: Vec<vk::Semaphore>,
    pub(crate) current_frame_index: usize,
    pub(crate) last_frame_time: Instant,
    /// Set when presentation reported an out-of-date swapchain.
    pub(crate) needs_recreate: bool,
    /// The window.
    pub window: Window,
}

impl AppContext {
    /// Build the render scope for `window` and the per-frame resources.
    pub(crate) fn new(window: Window, config: &AppConfig) -> anyhow::Result<Self> {
        let (display, _) = window.raw_handles()?;
        let instance = Arc::new(VulkanInstance::new(
            &config.title,
            config.validation,
            Some(display),
        )?);
        if config.validation && !instance.validation_enabled() {
            tracing::warn!("Validation requested but no validation layer is installed");
        }
        let surface = Surface::from_window(Arc::clone(&instance), &window)?;

        let mut scope = RenderScope::new(instance);
        scope
            .create_physical_device(&SWAPCHAIN_EXTENSIONS)?
            .create_logical_device(
                vk::PhysicalDeviceFeatures::default(),
                &SWAPCHAIN_EXTENSIONS,
                &QueueKind::ALL,
            )?
            .create_memory_allocator()?
            .set_vsync(config.vsync);

        let size = window.size();
        let desired = vk::Extent2D {
            width: size.x,
            height: size.y,
        };
        if !scope.create_swapchain(&surface, desired)? {
            anyhow::bail!("Window has no drawable area");
        }
        scope
            .create_default_render_pass()?
            .create_descriptor_pool(DESCRIPTOR_SETS, &descriptor_pool_sizes())?;
        if !scope.is_ready_to_use() {
            anyhow::bail!("Render scope is incomplete");
        }

        let shaders = config.shaders()?;
        tracing::info!("Shader directory: {}", shaders.root().display());

        let mut ctx = Self {
            scope,
            surface,
            shaders,
            clear_color: config.clear_color,
            frame_count: 0,
            depth: None,
            framebuffers: Vec::new(),
            frames: Vec::new(),
            render_finished: Vec::new(),
            current_frame_index: 0,
            last_frame_time: Instant::now(),
            needs_recreate: false,
            window,
        };
        ctx.create_frames()?;
        ctx.create_targets()?;
        Ok(ctx)
    }

    /// One command buffer and sync pair per frame in flight.
    ///
    /// Frames in flight follow the swapchain image count and are rebuilt by
    /// [`AppContext::recreate_swapchain`] when that count changes.
    fn create_frames(&mut self) -> anyhow::Result<()> {
        let device = self.scope.device()?;
        let queue = self.scope.queue(QueueKind::Graphics)?;
        let count = self.scope.frames_in_flight()?;

        // SAFETY: device and pool are valid for the lifetime of the scope.
        let buffers = unsafe { queue.allocate_command_buffers(device, count as u32)? };
        self.current_frame_index = 0;
        for command_buffer in buffers {
            // SAFETY: device is valid.
            let sync = unsafe { FrameSync::new(device)? };
            self.frames.push(FrameData {
                sync,
                command_buffer,
            });
        }
        tracing::debug!("{count} frames in flight");
        Ok(())
    }

    /// Depth buffer, framebuffers and per-image semaphores for the current swapchain.
    fn create_targets(&mut self) -> anyhow::Result<()> {
        let extent = self.scope.extent()?;
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.scope.depth_format())
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut depth = VulkanImage::create(&self.scope, &info, MemoryLocation::GpuOnly, "depth")?;
        depth.create_view(&self.scope, None)?;

        let device = self.scope.device()?;
        let swapchain = self.scope.swapchain()?;
        // SAFETY: render pass and views belong to the current swapchain.
        self.framebuffers = unsafe {
            create_swapchain_framebuffers(
                device,
                self.scope.render_pass()?,
                extent,
                &swapchain.image_views,
                depth.view()?,
            )?
        };
        self.depth = Some(depth);

        for _ in 0..swapchain.image_count() {
            // SAFETY: device is valid.
            self.render_finished.push(unsafe { create_semaphore(device)? });
        }
        Ok(())
    }

    /// Destroy everything [`AppContext::create_targets`] made.
    ///
    /// # Safety
    /// The GPU must be idle.
    unsafe fn destroy_targets(&mut self) -> anyhow::Result<()> {
        let device = self.scope.device()?;
        // SAFETY: caller guarantees nothing is in use.
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
            if let Some(mut depth) = self.depth.take() {
                depth.destroy(&self.scope)?;
            }
        }
        Ok(())
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.scope.extent().unwrap_or_default()
    }

    /// Width over height of the swapchain.
    pub fn aspect_ratio(&self) -> f32 {
        crate::frame::aspect_ratio(self.extent())
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Recreate the swapchain and everything sized by it.
    ///
    /// Returns `false` while the window has no drawable area; the swapchain
    /// stays absent until a later call succeeds.
    pub(crate) fn recreate_swapchain(&mut self) -> anyhow::Result<bool> {
        self.scope.wait_idle()?;
        // SAFETY: the device is idle.
        unsafe { self.destroy_targets()? };

        let size = self.window.size();
        let desired = vk::Extent2D {
            width: size.x,
            height: size.y,
        };
        if !self
            .scope
            .recreate_swapchain(&self.surface, desired)
            .context("Failed to recreate swapchain")?
        {
            return Ok(false);
        }
        self.create_targets()?;
        self.needs_recreate = false;

        let image_count = self.scope.frames_in_flight()?;
        if frames_mismatch(self.frames.len(), image_count) {
            tracing::debug!("Swapchain image count changed to {image_count}, rebuilding frames");
            // SAFETY: the device is idle.
            unsafe { self.destroy_frames()? };
            self.create_frames()?;
        }

        let extent = self.scope.extent()?;
        tracing::info!("Swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Whether a swapchain exists to render into.
    pub fn has_swapchain(&self) -> bool {
        self.scope.swapchain().is_ok()
    }

    /// Destroy the frame resources. The scope and surface drop afterwards.
    ///
    /// # Safety
    /// The GPU must be idle and all resources must not be in use.
    pub(crate) unsafe fn cleanup(&mut self) -> anyhow::Result<()> {
        // SAFETY: caller guarantees the GPU is idle.
        unsafe {
            self.destroy_targets()?;
            self.destroy_frames()
        }
    }

    /// Destroy everything [`AppContext::create_frames`] made.
    ///
    /// # Safety
    /// The GPU must be idle.
    unsafe fn destroy_frames(&mut self) -> anyhow::Result<()> {
        let device = self.scope.device()?;
        let queue = self.scope.queue(QueueKind::Graphics)?;
        // SAFETY: caller guarantees nothing is in use.
        unsafe {
            for frame in self.frames.drain(..) {
                frame.sync.destroy(device);
                queue.free_command_buffers(device, &[frame.command_buffer]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_follow_image_count() {
        assert!(!frames_mismatch(3, 3));
        assert!(frames_mismatch(3, 2));
        assert!(frames_mismatch(0, 3));
    }

    #[test]
    fn pool_covers_every_descriptor_type() {
        let sizes = descriptor_pool_sizes();
        assert!(sizes.iter().all(|size| size.descriptor_count == DESCRIPTOR_SETS));
        assert!(sizes
            .iter()
            .any(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }
}
