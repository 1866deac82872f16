//! Sampler descriptions keyed by flags.

use crate::error::Result;
use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Compact sampler description used as a cache key.
    ///
    /// Filters default to linear and addressing defaults to clamp-to-edge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SamplerFlags: u32 {
        const NEAREST_MAG = 1 << 0;
        const NEAREST_MIN = 1 << 1;
        const NEAREST_MIP = 1 << 2;
        const REPEAT_U = 1 << 3;
        const REPEAT_V = 1 << 4;
        const REPEAT_W = 1 << 5;
        const MIRROR_U = 1 << 6;
        const MIRROR_V = 1 << 7;
        const MIRROR_W = 1 << 8;
        const ANISOTROPY = 1 << 9;
        const UNNORMALIZED = 1 << 10;

        const NEAREST = Self::NEAREST_MAG.bits() | Self::NEAREST_MIN.bits() | Self::NEAREST_MIP.bits();
        const REPEAT = Self::REPEAT_U.bits() | Self::REPEAT_V.bits() | Self::REPEAT_W.bits();
        const MIRROR = Self::MIRROR_U.bits() | Self::MIRROR_V.bits() | Self::MIRROR_W.bits();
    }
}

impl SamplerFlags {
    /// Trilinear filtering, repeating in every direction.
    pub const LINEAR_REPEAT: Self = Self::REPEAT;
    /// Trilinear filtering, clamped to the edge.
    pub const LINEAR_CLAMP: Self = Self::empty();
    /// Point sampling, repeating in every direction.
    pub const NEAREST_REPEAT: Self = Self::NEAREST.union(Self::REPEAT);
}

/// Address mode for one axis.
pub fn address_mode(repeat: bool, mirror: bool) -> vk::SamplerAddressMode {
    match (repeat, mirror) {
        (true, true) => vk::SamplerAddressMode::MIRRORED_REPEAT,
        (true, false) => vk::SamplerAddressMode::REPEAT,
        (false, true) => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
        (false, false) => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

fn filter(nearest: bool) -> vk::Filter {
    if nearest {
        vk::Filter::NEAREST
    } else {
        vk::Filter::LINEAR
    }
}

/// Translate `flags` into a create info.
///
/// `max_anisotropy` is the device limit, `None` when the feature is off.
/// Without `mirror_clamp` support mirrored clamping degrades to
/// `CLAMP_TO_EDGE`.
/// Unnormalized coordinates force the restrictions Vulkan places on them:
/// one mip level, clamped addressing and no anisotropy.
pub fn sampler_create_info(
    flags: SamplerFlags,
    max_anisotropy: Option<f32>,
    mirror_clamp: bool,
) -> vk::SamplerCreateInfo<'static> {
    let unnormalized = flags.contains(SamplerFlags::UNNORMALIZED);
    let axis = |repeat: SamplerFlags, mirror: SamplerFlags| {
        if unnormalized {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        } else {
            match address_mode(flags.contains(repeat), flags.contains(mirror)) {
                vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE if !mirror_clamp => {
                    vk::SamplerAddressMode::CLAMP_TO_EDGE
                }
                mode => mode,
            }
        }
    };

    let anisotropy = max_anisotropy
        .filter(|_| flags.contains(SamplerFlags::ANISOTROPY) && !unnormalized);

    let mag_filter = filter(flags.contains(SamplerFlags::NEAREST_MAG));
    let min_filter = if unnormalized {
        mag_filter
    } else {
        filter(flags.contains(SamplerFlags::NEAREST_MIN))
    };
    let mipmap_mode = if flags.contains(SamplerFlags::NEAREST_MIP) || unnormalized {
        vk::SamplerMipmapMode::NEAREST
    } else {
        vk::SamplerMipmapMode::LINEAR
    };

    vk::SamplerCreateInfo::default()
        .mag_filter(mag_filter)
        .min_filter(min_filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(axis(SamplerFlags::REPEAT_U, SamplerFlags::MIRROR_U))
        .address_mode_v(axis(SamplerFlags::REPEAT_V, SamplerFlags::MIRROR_V))
        .address_mode_w(axis(SamplerFlags::REPEAT_W, SamplerFlags::MIRROR_W))
        .mip_lod_bias(0.0)
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(if unnormalized { 0.0 } else { vk::LOD_CLAMP_NONE })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(unnormalized)
}

/// Create a sampler for `flags`.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_sampler(
    device: &ash::Device,
    flags: SamplerFlags,
    max_anisotropy: Option<f32>,
    mirror_clamp: bool,
) -> Result<vk::Sampler> {
    let info = sampler_create_info(flags, max_anisotropy, mirror_clamp);
    let sampler = device.create_sampler(&info, None)?;
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_modes() {
        assert_eq!(address_mode(false, false), vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(address_mode(true, false), vk::SamplerAddressMode::REPEAT);
        assert_eq!(address_mode(false, true), vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE);
        assert_eq!(address_mode(true, true), vk::SamplerAddressMode::MIRRORED_REPEAT);
    }

    #[test]
    fn linear_repeat() {
        let info = sampler_create_info(SamplerFlags::LINEAR_REPEAT, Some(16.0), true);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.max_lod, vk::LOD_CLAMP_NONE);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
    }

    #[test]
    fn min_and_mag_filters_are_independent() {
        let info = sampler_create_info(SamplerFlags::NEAREST_MIN, None, true);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::NEAREST);
    }

    #[test]
    fn anisotropy_uses_device_limit() {
        let flags = SamplerFlags::ANISOTROPY | SamplerFlags::REPEAT_U;
        let info = sampler_create_info(flags, Some(8.0), true);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 8.0);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::CLAMP_TO_EDGE);

        let unsupported = sampler_create_info(flags, None, true);
        assert_eq!(unsupported.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn unnormalized_obeys_restrictions() {
        let flags = SamplerFlags::UNNORMALIZED | SamplerFlags::REPEAT | SamplerFlags::ANISOTROPY;
        let info = sampler_create_info(flags, Some(16.0), true);
        assert_eq!(info.unnormalized_coordinates, vk::TRUE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::NEAREST);
        assert_eq!(info.max_lod, 0.0);
    }

    #[test]
    fn mirror_clamp_needs_feature() {
        let flags = SamplerFlags::MIRROR_U | SamplerFlags::MIRROR_V | SamplerFlags::REPEAT_V;
        let enabled = sampler_create_info(flags, None, true);
        assert_eq!(enabled.address_mode_u, vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE);
        assert_eq!(enabled.address_mode_v, vk::SamplerAddressMode::MIRRORED_REPEAT);

        let fallback = sampler_create_info(flags, None, false);
        assert_eq!(fallback.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(fallback.address_mode_v, vk::SamplerAddressMode::MIRRORED_REPEAT);
        assert_eq!(fallback.address_mode_w, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}
