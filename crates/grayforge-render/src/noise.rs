//! Procedural noise textures.
//!
//! Every kind except [`NoiseKind::SolidColor`] is produced by a compute
//! shader named `<shader>_comp.spv` writing one texel per invocation into a
//! storage image. The kind's parameters are passed as specialization
//! constants with ids `0..n` in the order listed on each variant.

use crate::error::{RenderError, Result};
use crate::texture::upload_pixels;
use ::noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use ash::vk;
use gpu_allocator::MemoryLocation;
use grayforge_gpu::compute_pipeline::ComputePipelineDescriptor;
use grayforge_gpu::swapchain::sharing_mode;
use grayforge_gpu::{
    DescriptorSetDescriptor, Pipeline, QueueKind, RenderScope, SamplerFlags, VulkanImage,
};
use grayforge_shaders::{ShaderLibrary, ShaderStage};
use rayon::prelude::*;

/// Texture produced by a [`NoiseGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// Single RGBA color filled on the CPU.
    SolidColor { rgba: [u8; 4] },
    /// Constants: frequency, octaves.
    Perlin { frequency: u32, octaves: u32 },
    /// Constants: frequency, octaves.
    Worley { frequency: u32, octaves: u32 },
    /// Constants: frequency, Worley octaves, Perlin octaves.
    WorleyPerlin {
        frequency: u32,
        worley_octaves: u32,
        perlin_octaves: u32,
    },
    /// Constants: Worley frequency, Perlin frequency, seed.
    CloudShape {
        worley_frequency: u32,
        perlin_frequency: u32,
        seed: u32,
    },
    /// Constants: frequency, octaves, seed.
    CloudDetail {
        frequency: u32,
        octaves: u32,
        seed: u32,
    },
    /// Constants: frequency. Always 2D.
    Checkerboard { frequency: u32 },
}

impl NoiseKind {
    /// Compute shader name, `None` for CPU-generated kinds.
    pub fn shader(&self) -> Option<&'static str> {
        match self {
            Self::SolidColor { .. } => None,
            Self::Perlin { .. } => Some("noise_perlin"),
            Self::Worley { .. } => Some("noise_worley"),
            Self::WorleyPerlin { .. } => Some("noise_worley_perlin"),
            Self::CloudShape { .. } => Some("noise_cloud_shape"),
            Self::CloudDetail { .. } => Some("noise_cloud_detail"),
            Self::Checkerboard { .. } => Some("noise_checkerboard"),
        }
    }

    pub fn format(&self) -> vk::Format {
        match self {
            Self::SolidColor { .. } => vk::Format::R8G8B8A8_UNORM,
            Self::CloudDetail { .. } => vk::Format::B10G11R11_UFLOAT_PACK32,
            _ => vk::Format::R8_UNORM,
        }
    }

    /// Specialization constants in id order.
    pub fn constants(&self) -> Vec<u32> {
        match *self {
            Self::SolidColor { .. } => Vec::new(),
            Self::Perlin { frequency, octaves } | Self::Worley { frequency, octaves } => {
                vec![frequency, octaves]
            }
            Self::WorleyPerlin {
                frequency,
                worley_octaves,
                perlin_octaves,
            } => vec![frequency, worley_octaves, perlin_octaves],
            Self::CloudShape {
                worley_frequency,
                perlin_frequency,
                seed,
            } => vec![worley_frequency, perlin_frequency, seed],
            Self::CloudDetail {
                frequency,
                octaves,
                seed,
            } => vec![frequency, octaves, seed],
            Self::Checkerboard { frequency } => vec![frequency],
        }
    }

    /// Reject extents the kind cannot fill.
    pub fn validate(&self, extent: vk::Extent3D) -> Result<()> {
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(RenderError::InvalidNoise(format!(
                "zero-sized extent {}x{}x{}",
                extent.width, extent.height, extent.depth
            )));
        }
        if extent.depth > 1 && matches!(self, Self::SolidColor { .. } | Self::Checkerboard { .. }) {
            return Err(RenderError::InvalidNoise(format!("{self:?} is 2D only")));
        }
        Ok(())
    }
}

/// Runs noise compute shaders from a shader library.
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    shaders: ShaderLibrary,
}

impl NoiseGenerator {
    pub fn new(shaders: ShaderLibrary) -> Self {
        Self { shaders }
    }

    /// Whether the shader for `kind` is present on disk.
    pub fn is_available(&self, kind: &NoiseKind) -> bool {
        kind.shader()
            .map_or(true, |name| self.shaders.exists(name, ShaderStage::Compute))
    }

    /// Generate a texture of `extent` texels.
    ///
    /// The image is 2D when `extent.depth == 1` and 3D otherwise. It is
    /// returned in `SHADER_READ_ONLY_OPTIMAL` with a view and a linear
    /// repeating sampler.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn generate(
        &self,
        scope: &RenderScope,
        kind: &NoiseKind,
        extent: vk::Extent3D,
    ) -> Result<VulkanImage> {
        kind.validate(extent)?;
        if let NoiseKind::SolidColor { rgba } = *kind {
            let extent = vk::Extent2D {
                width: extent.width,
                height: extent.height,
            };
            return solid_color(scope, extent, kind.format(), rgba);
        }
        let shader = kind
            .shader()
            .ok_or_else(|| RenderError::InvalidNoise(format!("{kind:?} has no compute shader")))?;

        let graphics = scope.queue(QueueKind::Graphics)?.family_index();
        let compute = scope.queue(QueueKind::Compute)?.family_index();
        let (sharing, families) = sharing_mode(&[graphics, compute]);

        let info = vk::ImageCreateInfo::default()
            .image_type(if extent.depth == 1 {
                vk::ImageType::TYPE_2D
            } else {
                vk::ImageType::TYPE_3D
            })
            .format(kind.format())
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(sharing)
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = VulkanImage::create(scope, &info, MemoryLocation::GpuOnly, shader)?;
        if let Err(e) = self.fill(scope, &mut image, shader, kind) {
            // SAFETY: the dispatch either completed or was never submitted.
            unsafe { image.destroy(scope)? };
            return Err(e);
        }

        tracing::info!(
            "Generated {shader} texture {}x{}x{}",
            extent.width,
            extent.height,
            extent.depth
        );
        Ok(image)
    }

    fn fill(
        &self,
        scope: &RenderScope,
        image: &mut VulkanImage,
        shader: &str,
        kind: &NoiseKind,
    ) -> Result<()> {
        image
            .create_view(scope, None)?
            .with_sampler(scope, SamplerFlags::LINEAR_REPEAT)?;
        image.transition_layout(scope, vk::ImageLayout::GENERAL)?;

        let device = scope.device()?;
        let set = DescriptorSetDescriptor::new()
            .add_storage_image(0, vk::ShaderStageFlags::COMPUTE, image.descriptor_info())
            .allocate(scope)?;

        let extent = image.extent();
        let dispatched = (|| -> Result<()> {
            let mut descriptor = ComputePipelineDescriptor::new(shader).descriptor_layout(set.layout);
            for (id, value) in kind.constants().into_iter().enumerate() {
                descriptor = descriptor.constant(id as u32, value);
            }
            let pipeline = descriptor.construct(scope, &self.shaders)?;

            let queue = scope.queue(QueueKind::Compute)?;
            let submitted = unsafe {
                queue.submit_and_wait(device, |cmd| {
                    pipeline.bind(device, cmd);
                    set.bind(device, cmd, pipeline.bind_point(), pipeline.layout, 0);
                    pipeline.dispatch_extent(device, cmd, [extent.width, extent.height, extent.depth]);
                    Ok(())
                })
            };
            unsafe { pipeline.destroy(device) };
            Ok(submitted?)
        })();

        unsafe { set.destroy(device)? };
        dispatched?;

        image.transition_layout(scope, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        Ok(())
    }
}

/// Texture filled with a single color.
///
/// `format` must have four bytes per texel.
pub fn solid_color(
    scope: &RenderScope,
    extent: vk::Extent2D,
    format: vk::Format,
    rgba: [u8; 4],
) -> Result<VulkanImage> {
    let texels = extent.width as usize * extent.height as usize;
    let pixels = rgba.repeat(texels);
    upload_pixels(scope, &pixels, extent, 1, format, false)
}

/// CPU fractal Perlin noise, one byte per texel in x-fastest order.
///
/// Matches the layout of an `R8_UNORM` texture of `extent`; `frequency` is
/// the number of base periods across the texture.
pub fn perlin_pixels(extent: vk::Extent3D, frequency: u32, octaves: u32, seed: u32) -> Vec<u8> {
    let (width, height, depth) = (
        extent.width.max(1) as usize,
        extent.height.max(1) as usize,
        extent.depth.max(1) as usize,
    );
    let fbm = Fbm::<Perlin>::new(seed)
        .set_octaves((octaves as usize).clamp(1, Fbm::<Perlin>::MAX_OCTAVES))
        .set_frequency(f64::from(frequency.max(1)));

    let mut pixels = vec![0u8; width * height * depth];
    pixels
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, texels)| {
            let y = (row % height) as f64 / height as f64;
            let z = (row / height) as f64 / depth as f64;
            for (x, texel) in texels.iter_mut().enumerate() {
                let value = fbm.get([x as f64 / width as f64, y, z]);
                *texel = ((value * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        });
    pixels
}

/// Seed derived from the current time.
pub fn random_seed() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos() ^ elapsed.as_secs() as u32)
        .unwrap_or(0x9e37_79b9)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32, depth: u32) -> vk::Extent3D {
        vk::Extent3D {
            width,
            height,
            depth,
        }
    }

    #[test]
    fn constants_follow_variant_order() {
        let kind = NoiseKind::WorleyPerlin {
            frequency: 4,
            worley_octaves: 3,
            perlin_octaves: 5,
        };
        assert_eq!(kind.constants(), vec![4, 3, 5]);
        let kind = NoiseKind::CloudShape {
            worley_frequency: 2,
            perlin_frequency: 8,
            seed: 99,
        };
        assert_eq!(kind.constants(), vec![2, 8, 99]);
        assert_eq!(NoiseKind::Checkerboard { frequency: 8 }.constants(), vec![8]);
        assert!(NoiseKind::SolidColor { rgba: [0; 4] }.constants().is_empty());
    }

    #[test]
    fn formats_and_shaders() {
        let detail = NoiseKind::CloudDetail {
            frequency: 1,
            octaves: 1,
            seed: 0,
        };
        assert_eq!(detail.format(), vk::Format::B10G11R11_UFLOAT_PACK32);
        assert_eq!(detail.shader(), Some("noise_cloud_detail"));
        let perlin = NoiseKind::Perlin {
            frequency: 1,
            octaves: 1,
        };
        assert_eq!(perlin.format(), vk::Format::R8_UNORM);
        assert_eq!(NoiseKind::SolidColor { rgba: [0; 4] }.shader(), None);
    }

    #[test]
    fn extents_validated() {
        let perlin = NoiseKind::Perlin {
            frequency: 4,
            octaves: 2,
        };
        assert!(perlin.validate(extent(64, 64, 64)).is_ok());
        assert!(perlin.validate(extent(64, 0, 1)).is_err());
        let checker = NoiseKind::Checkerboard { frequency: 4 };
        assert!(checker.validate(extent(64, 64, 1)).is_ok());
        assert!(checker.validate(extent(64, 64, 2)).is_err());
    }

    #[test]
    fn missing_shader_reported_unavailable() {
        let generator = NoiseGenerator::new(ShaderLibrary::new("/nonexistent/shaders"));
        assert!(!generator.is_available(&NoiseKind::Worley {
            frequency: 1,
            octaves: 1
        }));
        assert!(generator.is_available(&NoiseKind::SolidColor { rgba: [255; 4] }));
    }

    #[test]
    fn perlin_pixels_are_seeded() {
        let size = extent(32, 16, 2);
        let a = perlin_pixels(size, 4, 3, 7);
        let b = perlin_pixels(size, 4, 3, 7);
        let c = perlin_pixels(size, 4, 3, 8);
        assert_eq!(a.len(), 32 * 16 * 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let (min, max) = a
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        assert!(max > min);
    }
}
