//! Mip chain sizing and blit-based generation.

use crate::error::Result;
use crate::layout::record_transition;
use ash::vk;

/// Number of levels in a full mip chain for `extent`.
pub fn mip_level_count(extent: vk::Extent3D) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of mip `level`, halving every axis and never going below 1.
pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    let shrink = |side: u32| side.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent3D {
        width: shrink(extent.width),
        height: shrink(extent.height),
        depth: shrink(extent.depth),
    }
}

/// Far corner of mip `level`, as used by blit regions.
pub fn mip_corner(extent: vk::Extent3D, level: u32) -> vk::Offset3D {
    let size = mip_extent(extent, level);
    vk::Offset3D {
        x: size.width as i32,
        y: size.height as i32,
        z: size.depth as i32,
    }
}

/// Blit region downsampling `level - 1` into `level`.
pub fn mip_blit(
    extent: vk::Extent3D,
    level: u32,
    aspect: vk::ImageAspectFlags,
    layers: (u32, u32),
) -> vk::ImageBlit {
    let subresource = |mip_level| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(aspect)
            .mip_level(mip_level)
            .base_array_layer(layers.0)
            .layer_count(layers.1)
    };
    vk::ImageBlit::default()
        .src_subresource(subresource(level - 1))
        .src_offsets([vk::Offset3D::default(), mip_corner(extent, level - 1)])
        .dst_subresource(subresource(level))
        .dst_offsets([vk::Offset3D::default(), mip_corner(extent, level)])
}

/// One command of a mip chain generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipStep {
    /// Barrier on `level_count` levels starting at `base_level`.
    Transition {
        base_level: u32,
        level_count: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    /// Downsample `level - 1` into `level`.
    Blit { level: u32 },
}

/// Commands filling levels `base + 1..base + level_count` from `base`.
///
/// `base` starts in `TRANSFER_SRC_OPTIMAL`. The levels above it are
/// transitioned from `UNDEFINED` since their contents are overwritten, and
/// each one becomes a `TRANSFER_SRC_OPTIMAL` source once blitted. The whole
/// chain ends in `SHADER_READ_ONLY_OPTIMAL`.
pub fn mip_chain_steps(base: u32, level_count: u32) -> Vec<MipStep> {
    let level_count = level_count.max(1);
    let mut steps = Vec::with_capacity(3 * level_count as usize - 2);
    for level in (base + 1)..(base + level_count) {
        steps.push(MipStep::Transition {
            base_level: level,
            level_count: 1,
            old: vk::ImageLayout::UNDEFINED,
            new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        });
        steps.push(MipStep::Blit { level });
        steps.push(MipStep::Transition {
            base_level: level,
            level_count: 1,
            old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        });
    }
    steps.push(MipStep::Transition {
        base_level: base,
        level_count,
        old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    });
    steps
}

/// Record blits filling levels `1..range.level_count` from level 0.
///
/// Level `range.base_mip_level` must be in `TRANSFER_SRC_OPTIMAL`; the other
/// levels may be in any layout. On completion the whole chain is in
/// `SHADER_READ_ONLY_OPTIMAL`. With a single level only that final
/// transition is recorded.
///
/// # Safety
/// All handles must be valid, the command buffer must be recording and the
/// image must have been created with `TRANSFER_SRC | TRANSFER_DST` usage.
pub unsafe fn record_generate_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    extent: vk::Extent3D,
    range: vk::ImageSubresourceRange,
    filter: vk::Filter,
) -> Result<()> {
    for step in mip_chain_steps(range.base_mip_level, range.level_count) {
        match step {
            MipStep::Transition {
                base_level,
                level_count,
                old,
                new,
            } => {
                let levels = vk::ImageSubresourceRange::default()
                    .aspect_mask(range.aspect_mask)
                    .base_mip_level(base_level)
                    .level_count(level_count)
                    .base_array_layer(range.base_array_layer)
                    .layer_count(range.layer_count);
                record_transition(device, cmd, image, levels, old, new)?;
            }
            MipStep::Blit { level } => {
                let blit = mip_blit(
                    extent,
                    level,
                    range.aspect_mask,
                    (range.base_array_layer, range.layer_count),
                );
                device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    filter,
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn extent(width: u32, height: u32, depth: u32) -> vk::Extent3D {
        vk::Extent3D {
            width,
            height,
            depth,
        }
    }

    #[test]
    fn level_counts() {
        assert_eq!(mip_level_count(extent(1, 1, 1)), 1);
        assert_eq!(mip_level_count(extent(256, 256, 1)), 9);
        assert_eq!(mip_level_count(extent(300, 17, 1)), 9);
        assert_eq!(mip_level_count(extent(16, 16, 64)), 7);
        assert_eq!(mip_level_count(extent(0, 0, 0)), 1);
    }

    #[test]
    fn extents_halve_and_clamp() {
        let base = extent(128, 32, 8);
        assert_eq!(mip_extent(base, 0), base);
        assert_eq!(mip_extent(base, 2), extent(32, 8, 2));
        assert_eq!(mip_extent(base, 6), extent(2, 1, 1));
        assert_eq!(mip_extent(base, 40), extent(1, 1, 1));
    }

    #[test]
    fn blit_regions_chain() {
        let blit = mip_blit(extent(64, 64, 1), 1, vk::ImageAspectFlags::COLOR, (0, 1));
        assert_eq!(blit.src_subresource.mip_level, 0);
        assert_eq!(blit.dst_subresource.mip_level, 1);
        assert_eq!(blit.src_offsets[1], vk::Offset3D { x: 64, y: 64, z: 1 });
        assert_eq!(blit.dst_offsets[1], vk::Offset3D { x: 32, y: 32, z: 1 });
    }

    fn transition(base_level: u32, level_count: u32, old: vk::ImageLayout, new: vk::ImageLayout) -> MipStep {
        MipStep::Transition {
            base_level,
            level_count,
            old,
            new,
        }
    }

    #[test]
    fn single_level_only_finishes() {
        assert_eq!(
            mip_chain_steps(0, 1),
            vec![transition(
                0,
                1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            )]
        );
        assert_eq!(mip_chain_steps(0, 0), mip_chain_steps(0, 1));
    }

    #[test]
    fn two_levels_blit_once() {
        use vk::ImageLayout as L;
        assert_eq!(
            mip_chain_steps(0, 2),
            vec![
                transition(1, 1, L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
                MipStep::Blit { level: 1 },
                transition(1, 1, L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
                transition(0, 2, L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ]
        );
    }

    #[test]
    fn blits_read_only_transfer_sources() {
        // Replay the plan on per-level layouts, starting from the documented precondition
        let levels = 9;
        let mut layouts = vec![vk::ImageLayout::TRANSFER_DST_OPTIMAL; levels as usize];
        layouts[0] = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;

        let steps = mip_chain_steps(0, levels);
        assert_eq!(steps.len(), 3 * (levels as usize - 1) + 1);
        for step in steps {
            match step {
                MipStep::Transition {
                    base_level,
                    level_count,
                    old,
                    new,
                } => {
                    for layout in &mut layouts[base_level as usize..(base_level + level_count) as usize] {
                        assert!(old == vk::ImageLayout::UNDEFINED || *layout == old);
                        *layout = new;
                    }
                }
                MipStep::Blit { level } => {
                    assert_eq!(layouts[level as usize - 1], vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                    assert_eq!(layouts[level as usize], vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                }
            }
        }
        assert!(layouts
            .iter()
            .all(|&l| l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn plan_respects_base_level() {
        let steps = mip_chain_steps(2, 3);
        assert_eq!(steps[1], MipStep::Blit { level: 3 });
        assert_eq!(steps[4], MipStep::Blit { level: 4 });
        assert_eq!(
            steps.last(),
            Some(&transition(
                2,
                3,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ))
        );
    }
}
