//! `EngineApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Grayforge applications.
///
/// The framework creates the window, the render scope and the swapchain,
/// drives the event loop and records each frame inside the default render
/// pass. Applications only supply their resources and draw calls.
pub trait EngineApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, render scope, depth buffer and
    /// framebuffers have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the time since the previous
    /// frame in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draw commands.
    ///
    /// The default render pass has already begun on `frame.command_buffer`
    /// with the color and depth attachments cleared, and the viewport and
    /// scissor cover the whole swapchain image. The framework ends the pass,
    /// submits and presents.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Handle window resize.
    ///
    /// Called after the swapchain, depth buffer and framebuffers have been
    /// recreated for the new size.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called, so GPU resources can be destroyed.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
