//! Render error types.

use grayforge_gpu::GpuError;
use grayforge_shaders::ShaderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse OBJ: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Mesh contains no geometry")]
    EmptyMesh,

    #[error("Pixel data is {actual} bytes, expected {expected}")]
    PixelSize { expected: usize, actual: usize },

    #[error("Unsupported texel format: {0:?}")]
    UnsupportedFormat(ash::vk::Format),

    #[error("Invalid noise parameters: {0}")]
    InvalidNoise(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
