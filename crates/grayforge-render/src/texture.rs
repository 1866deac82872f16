//! Texture upload from CPU pixels and image files.

use crate::error::{RenderError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use grayforge_gpu::mipmap::mip_level_count;
use grayforge_gpu::{GpuBuffer, RenderScope, SamplerFlags, VulkanImage};
use std::path::Path;

/// Bytes per texel for the formats textures are uploaded in.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Size in bytes of `layers` tightly packed layers.
pub fn expected_size(extent: vk::Extent2D, layers: u32, format: vk::Format) -> Result<usize> {
    let texel = texel_size(format).ok_or(RenderError::UnsupportedFormat(format))?;
    Ok(extent.width as usize * extent.height as usize * layers as usize * texel)
}

/// Upload tightly packed pixels into a sampled 2D (array) image.
///
/// The result is in `SHADER_READ_ONLY_OPTIMAL` with a view and a linear
/// repeating sampler. With `mipmaps` the full chain is generated by blits.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn upload_pixels(
    scope: &RenderScope,
    pixels: &[u8],
    extent: vk::Extent2D,
    layers: u32,
    format: vk::Format,
    mipmaps: bool,
) -> Result<VulkanImage> {
    let layers = layers.max(1);
    let expected = expected_size(extent, layers, format)?;
    if pixels.len() != expected || expected == 0 {
        return Err(RenderError::PixelSize {
            expected,
            actual: pixels.len(),
        });
    }

    let extent = vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    };
    let mip_levels = if mipmaps { mip_level_count(extent) } else { 1 };

    let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    if mip_levels > 1 {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }

    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(extent)
        .mip_levels(mip_levels)
        .array_layers(layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let mut staging = scope.allocator()?.lock().create_buffer(
        pixels.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "texture_staging",
    )?;

    let uploaded = staging
        .write_bytes(0, pixels)
        .map_err(RenderError::from)
        .and_then(|()| {
            let mut image = VulkanImage::create(scope, &info, MemoryLocation::GpuOnly, "texture")?;
            match fill_image(scope, &mut image, &staging, mip_levels > 1) {
                Ok(()) => Ok(image),
                Err(e) => {
                    // SAFETY: every submit on the image has completed or failed.
                    unsafe { image.destroy(scope)? };
                    Err(e)
                }
            }
        });

    scope.allocator()?.lock().free_buffer(&mut staging)?;

    let image = uploaded?;
    tracing::debug!(
        "Texture uploaded: {}x{} x{} {:?}, {} mips",
        extent.width,
        extent.height,
        layers,
        format,
        mip_levels
    );
    Ok(image)
}

fn fill_image(
    scope: &RenderScope,
    image: &mut VulkanImage,
    staging: &GpuBuffer,
    mipmaps: bool,
) -> Result<()> {
    image.copy_from_buffer(scope, staging)?;
    if mipmaps {
        image.generate_mipmaps(scope)?;
    } else {
        image.transition_layout(scope, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
    }
    image
        .create_view(scope, None)?
        .with_sampler(scope, SamplerFlags::LINEAR_REPEAT)?;
    Ok(())
}

/// Decode an image file as sRGB RGBA8 and upload it with a full mip chain.
pub fn load_texture(scope: &RenderScope, path: impl AsRef<Path>) -> Result<VulkanImage> {
    let path = path.as_ref();
    let rgba = image::open(path)?.to_rgba8();
    let extent = vk::Extent2D {
        width: rgba.width(),
        height: rgba.height(),
    };
    tracing::info!("Loading texture {} ({}x{})", path.display(), extent.width, extent.height);
    upload_pixels(
        scope,
        rgba.as_raw(),
        extent,
        1,
        vk::Format::R8G8B8A8_SRGB,
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_format() {
        let extent = vk::Extent2D {
            width: 4,
            height: 2,
        };
        assert_eq!(expected_size(extent, 1, vk::Format::R8_UNORM).unwrap(), 8);
        assert_eq!(expected_size(extent, 3, vk::Format::R8G8B8A8_SRGB).unwrap(), 96);
        assert_eq!(
            expected_size(extent, 1, vk::Format::B10G11R11_UFLOAT_PACK32).unwrap(),
            32
        );
    }

    #[test]
    fn unknown_format_rejected() {
        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        assert!(matches!(
            expected_size(extent, 1, vk::Format::BC7_SRGB_BLOCK),
            Err(RenderError::UnsupportedFormat(_))
        ));
    }
}
