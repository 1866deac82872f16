//! Rendering resources for the Grayforge engine.
//!
//! This crate provides:
//! - Camera and view management
//! - Wavefront OBJ mesh loading and upload
//! - Texture upload with optional mip chains
//! - Procedural noise textures generated by compute shaders

pub mod camera;
pub mod error;
pub mod mesh;
pub mod noise;
pub mod texture;

pub use camera::{Camera, MeshPushConstants};
pub use error::{RenderError, Result};
pub use mesh::{Mesh, MeshData, Vertex};
pub use noise::{perlin_pixels, random_seed, solid_color, NoiseGenerator, NoiseKind};
pub use texture::{load_texture, upload_pixels};
