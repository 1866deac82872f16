//! Image layout transitions and buffer-to-image copies.

use crate::error::{GpuError, Result};
use ash::vk;

/// Pipeline stage and access mask that produce or consume `layout`.
///
/// Returns `None` for layouts the engine never transitions through.
pub fn layout_sync(layout: vk::ImageLayout) -> Option<(vk::PipelineStageFlags, vk::AccessFlags)> {
    let sync = match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::NONE),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::MEMORY_READ)
        }
        _ => return None,
    };
    Some(sync)
}

/// Aspect covered by views and barriers of an image with `format`.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Build the barrier moving `range` of `image` from `old` to `new`.
pub fn transition_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(vk::PipelineStageFlags, vk::PipelineStageFlags, vk::ImageMemoryBarrier<'static>)> {
    let (src_stage, src_access) = layout_sync(old).ok_or(GpuError::UnsupportedLayout(old))?;
    let (dst_stage, dst_access) = layout_sync(new).ok_or(GpuError::UnsupportedLayout(new))?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);

    Ok((src_stage, dst_stage, barrier))
}

/// Record a layout transition.
///
/// # Safety
/// The device, command buffer and image must be valid and the command buffer
/// must be recording.
pub unsafe fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let (src_stage, dst_stage, barrier) = transition_barrier(image, range, old, new)?;
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
    Ok(())
}

/// Region copying a tightly packed buffer into mip level 0 of every layer.
pub fn full_copy_region(
    extent: vk::Extent3D,
    aspect: vk::ImageAspectFlags,
    layer_count: u32,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(aspect)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(layer_count),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(extent)
}

/// Transition `image` to `TRANSFER_DST_OPTIMAL` and copy `buffer` into it.
///
/// # Safety
/// All handles must be valid, the command buffer must be recording and the
/// buffer must hold at least one full mip level 0 for every layer.
pub unsafe fn record_copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    extent: vk::Extent3D,
    current_layout: vk::ImageLayout,
) -> Result<()> {
    if current_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
        record_transition(
            device,
            cmd,
            image,
            range,
            current_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
    }

    let region = full_copy_region(extent, range.aspect_mask, range.layer_count);
    device.cmd_copy_buffer_to_image(
        cmd,
        buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
    }

    #[test]
    fn sync_table() {
        assert_eq!(
            layout_sync(vk::ImageLayout::UNDEFINED),
            Some((vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::NONE))
        );
        assert_eq!(
            layout_sync(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            Some((vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE))
        );
        assert_eq!(
            layout_sync(vk::ImageLayout::PRESENT_SRC_KHR),
            Some((vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::MEMORY_READ))
        );
        let (stage, access) = layout_sync(vk::ImageLayout::GENERAL).unwrap();
        assert_eq!(stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
        assert_eq!(layout_sync(vk::ImageLayout::PREINITIALIZED), None);
    }

    #[test]
    fn barrier_uses_both_scopes() {
        let (src, dst, barrier) = transition_barrier(
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(dst, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let result = transition_barrier(
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::GENERAL,
        );
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayout(vk::ImageLayout::PREINITIALIZED))
        ));
    }

    #[test]
    fn aspects() {
        assert_eq!(aspect_for_format(vk::Format::D16_UNORM), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::R8_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn copy_region_covers_all_layers() {
        let extent = vk::Extent3D { width: 64, height: 32, depth: 1 };
        let region = full_copy_region(extent, vk::ImageAspectFlags::COLOR, 6);
        assert_eq!(region.image_subresource.layer_count, 6);
        assert_eq!(region.image_extent, extent);
        assert_eq!(region.buffer_row_length, 0);
    }
}
