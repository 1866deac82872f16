//! Application framework for the Grayforge engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - Render scope initialization
//! - Swapchain, depth buffer and framebuffer recreation
//! - Frame synchronization
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use grayforge_app::{run_app, AppConfig, AppContext, EngineApp, FrameContext};
//!
//! struct MyApp {
//!     // Application state
//! }
//!
//! impl EngineApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp {})
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {
//!         // Update logic
//!     }
//!
//!     fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
//!         // Draw calls
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::EngineApp;
pub use context::AppContext;
pub use frame::{aspect_ratio, FrameContext};
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use grayforge_platform::{Window, WindowAttribute};
pub use grayforge_render::Camera;
pub use winit::event::WindowEvent;
