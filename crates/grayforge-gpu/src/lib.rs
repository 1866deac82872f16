//! Vulkan abstraction layer for the Grayforge engine.
//!
//! This crate provides:
//! - Vulkan instance, surface and device management
//! - A staged [`RenderScope`] owning the device-level objects
//! - Memory allocation via gpu-allocator
//! - Images with layout tracking and mipmap generation
//! - Graphics and compute pipelines built from named SPIR-V shaders
//! - Swapchain handling

pub mod capabilities;
pub mod command;
pub mod compute_pipeline;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod graphics_pipeline;
pub mod image;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod mipmap;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod sampler;
pub mod scope;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use compute_pipeline::{ComputePipeline, ComputePipelineDescriptor};
pub use descriptors::{
    DescriptorPool, DescriptorSet, DescriptorSetDescriptor, DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use graphics_pipeline::{DepthBias, DepthState, GraphicsPipeline, GraphicsPipelineDescriptor};
pub use image::VulkanImage;
pub use instance::VulkanInstance;
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{ConstantValue, Pipeline, PipelineType, SpecializationConstants};
pub use queue::{Queue, QueueKind};
pub use sampler::SamplerFlags;
pub use scope::{RenderScope, ScopeStage, SWAPCHAIN_EXTENSIONS};
pub use surface::{Surface, SurfaceCapabilities};
pub use swapchain::Swapchain;
pub use sync::{create_fence, create_semaphore, reset_fence, FrameSync};

pub use ash;
pub use gpu_allocator::MemoryLocation;
