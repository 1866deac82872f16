//! Sampled and storage images with an owned view and tracked layout.

use crate::error::{GpuError, Result};
use crate::layout::{aspect_for_format, record_copy_buffer_to_image, record_transition};
use crate::memory::{GpuBuffer, GpuImage};
use crate::mipmap::record_generate_mipmaps;
use crate::queue::QueueKind;
use crate::sampler::SamplerFlags;
use crate::scope::RenderScope;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// View type matching an image's dimensionality and layer count.
pub fn default_view_type(image_type: vk::ImageType, array_layers: u32) -> vk::ImageViewType {
    match (image_type, array_layers) {
        (vk::ImageType::TYPE_1D, 1) => vk::ImageViewType::TYPE_1D,
        (vk::ImageType::TYPE_1D, _) => vk::ImageViewType::TYPE_1D_ARRAY,
        (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
        (_, 1) => vk::ImageViewType::TYPE_2D,
        _ => vk::ImageViewType::TYPE_2D_ARRAY,
    }
}

/// An allocated image plus its view, sampler and current layout.
///
/// The layout is tracked across [`VulkanImage::transition_layout`],
/// [`VulkanImage::copy_from_buffer`] and [`VulkanImage::generate_mipmaps`].
/// Samplers come from the scope cache and are not owned by the image.
pub struct VulkanImage {
    image: GpuImage,
    view: Option<vk::ImageView>,
    sampler: Option<vk::Sampler>,
    layout: vk::ImageLayout,
    mip_levels: u32,
    array_layers: u32,
    image_type: vk::ImageType,
}

impl VulkanImage {
    /// Allocate an image described by `info`.
    pub fn create(
        scope: &RenderScope,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let image = scope.allocator()?.lock().create_image(info, location, name)?;

        tracing::debug!(
            "Image '{name}' created: {}x{}x{} {:?}, {} mips",
            info.extent.width,
            info.extent.height,
            info.extent.depth,
            info.format,
            info.mip_levels
        );

        Ok(Self {
            image,
            view: None,
            sampler: None,
            layout: info.initial_layout,
            mip_levels: info.mip_levels.max(1),
            array_layers: info.array_layers.max(1),
            image_type: info.image_type,
        })
    }

    /// Subresource range covering every level and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_for_format(self.image.format))
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.array_layers)
    }

    /// Create the view, replacing any previous one.
    ///
    /// `None` picks the view type from the image type and layer count.
    pub fn create_view(
        &mut self,
        scope: &RenderScope,
        view_type: Option<vk::ImageViewType>,
    ) -> Result<&mut Self> {
        let device = scope.device()?;
        let view_type =
            view_type.unwrap_or_else(|| default_view_type(self.image_type, self.array_layers));

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image.image)
            .view_type(view_type)
            .format(self.image.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(self.full_range());

        let view = unsafe { device.create_image_view(&create_info, None)? };
        if let Some(old) = self.view.replace(view) {
            unsafe { device.destroy_image_view(old, None) };
        }
        Ok(self)
    }

    /// Attach the scope's cached sampler for `flags`.
    pub fn with_sampler(&mut self, scope: &RenderScope, flags: SamplerFlags) -> Result<&mut Self> {
        self.sampler = Some(scope.sampler(flags)?);
        Ok(self)
    }

    /// Move every subresource to `new` with a one-time submit on the graphics queue.
    pub fn transition_layout(&mut self, scope: &RenderScope, new: vk::ImageLayout) -> Result<()> {
        if self.layout == new {
            return Ok(());
        }
        let device = scope.device()?;
        let queue = scope.queue(QueueKind::Graphics)?;
        let (image, range, old) = (self.image.image, self.full_range(), self.layout);

        unsafe {
            queue.submit_and_wait(device, |cmd| {
                record_transition(device, cmd, image, range, old, new)
            })?;
        }
        self.layout = new;
        Ok(())
    }

    /// Record a transition of every subresource into `cmd`.
    ///
    /// The tracked layout is updated immediately; the caller must submit `cmd`
    /// before the image is used again.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording.
    pub unsafe fn record_transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new: vk::ImageLayout,
    ) -> Result<()> {
        if self.layout == new {
            return Ok(());
        }
        record_transition(device, cmd, self.image.image, self.full_range(), self.layout, new)?;
        self.layout = new;
        Ok(())
    }

    /// Copy `buffer` into mip level 0 of every layer.
    ///
    /// Leaves the image in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer(&mut self, scope: &RenderScope, buffer: &GpuBuffer) -> Result<()> {
        let device = scope.device()?;
        let queue = scope.queue(QueueKind::Graphics)?;
        let (image, range, extent, old) =
            (self.image.image, self.full_range(), self.image.extent, self.layout);

        unsafe {
            queue.submit_and_wait(device, |cmd| {
                record_copy_buffer_to_image(device, cmd, buffer.buffer, image, range, extent, old)
            })?;
        }
        self.layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        Ok(())
    }

    /// Fill levels 1.. from level 0 and leave the chain `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// Blits are linear when the format supports linear filtering.
    pub fn generate_mipmaps(&mut self, scope: &RenderScope) -> Result<()> {
        let device = scope.device()?;
        let properties = unsafe {
            scope
                .instance()
                .handle()
                .get_physical_device_format_properties(scope.physical_device()?, self.image.format)
        };
        let filter = if properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            vk::Filter::LINEAR
        } else {
            tracing::warn!(
                "{:?} does not support linear blits, generating mipmaps with nearest filtering",
                self.image.format
            );
            vk::Filter::NEAREST
        };

        let queue = scope.queue(QueueKind::Graphics)?;
        let (image, range, extent, old) =
            (self.image.image, self.full_range(), self.image.extent, self.layout);

        unsafe {
            queue.submit_and_wait(device, |cmd| {
                if old != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
                    let base = vk::ImageSubresourceRange {
                        level_count: 1,
                        ..range
                    };
                    record_transition(
                        device,
                        cmd,
                        image,
                        base,
                        old,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    )?;
                }
                record_generate_mipmaps(device, cmd, image, extent, range, filter)
            })?;
        }
        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }

    /// Descriptor for sampling or storage access in the current layout.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler.unwrap_or(vk::Sampler::null()))
            .image_view(self.view.unwrap_or(vk::ImageView::null()))
            .image_layout(self.layout)
    }

    pub fn handle(&self) -> vk::Image {
        self.image.image
    }

    pub fn view(&self) -> Result<vk::ImageView> {
        self.view
            .ok_or_else(|| GpuError::InvalidState("Image view has not been created".to_string()))
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }

    pub fn format(&self) -> vk::Format {
        self.image.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Destroy the view and free the image memory.
    ///
    /// # Safety
    /// The image must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, scope: &RenderScope) -> Result<()> {
        let device = scope.device()?;
        if let Some(view) = self.view.take() {
            device.destroy_image_view(view, None);
        }
        self.sampler = None;
        scope.allocator()?.lock().free_image(&mut self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_type_follows_shape() {
        assert_eq!(default_view_type(vk::ImageType::TYPE_2D, 1), vk::ImageViewType::TYPE_2D);
        assert_eq!(default_view_type(vk::ImageType::TYPE_2D, 4), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(default_view_type(vk::ImageType::TYPE_3D, 1), vk::ImageViewType::TYPE_3D);
        assert_eq!(default_view_type(vk::ImageType::TYPE_1D, 2), vk::ImageViewType::TYPE_1D_ARRAY);
    }
}
