//! Core math components for the Grayforge engine.
//!
//! This crate provides the object-level components shared by the renderer
//! and applications:
//! - [`Transform`]: rigid placement of an object in world space
//! - [`Projection`]: Vulkan-style perspective projection
//! - [`Color`]: flat object tint

pub mod color;
pub mod projection;
pub mod transform;

pub use color::Color;
pub use projection::Projection;
pub use transform::Transform;

// Re-export glam so dependents agree on the math types.
pub use glam;
