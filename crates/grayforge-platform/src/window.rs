//! Window wrapper with cursor tracking.

use crate::{PlatformConfig, PlatformError, Result};
use grayforge_core::glam::{UVec2, Vec2};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle,
    RawWindowHandle, WindowHandle,
};
use std::sync::Arc;
use winit::dpi::{LogicalSize, PhysicalPosition, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{CursorGrabMode, WindowAttributes, WindowLevel};

/// Toggleable window properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAttribute {
    Resizable,
    Decorated,
    Maximized,
    Visible,
    AlwaysOnTop,
}

/// winit attributes for a window described by `config`.
pub fn window_attributes(config: &PlatformConfig) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(config.title.clone())
        .with_inner_size(LogicalSize::new(config.width, config.height))
        .with_resizable(config.resizable)
}

/// New cursor position carried by `event`, if any.
pub fn cursor_from_event(event: &WindowEvent) -> Option<Vec2> {
    match event {
        WindowEvent::CursorMoved { position, .. } => {
            Some(Vec2::new(position.x as f32, position.y as f32))
        }
        _ => None,
    }
}

/// Cursor state as seen through window events and cursor calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CursorState {
    /// Last position inside the window, in physical pixels.
    pub position: Vec2,
    pub inside: bool,
    /// Hidden and grabbed by [`Window::disable_cursor`].
    pub captured: bool,
}

impl CursorState {
    pub fn update(&mut self, event: &WindowEvent) {
        if let Some(position) = cursor_from_event(event) {
            self.position = position;
            self.inside = true;
        }
        match event {
            WindowEvent::CursorEntered { .. } => self.inside = true,
            WindowEvent::CursorLeft { .. } => self.inside = false,
            _ => {}
        }
    }
}

/// Whether a window of `size` can be rendered to.
pub fn has_drawable_area(size: UVec2) -> bool {
    size.x > 0 && size.y > 0
}

/// Window level for the always-on-top attribute.
pub fn window_level(always_on_top: bool) -> WindowLevel {
    if always_on_top {
        WindowLevel::AlwaysOnTop
    } else {
        WindowLevel::Normal
    }
}

/// An OS window.
pub struct Window {
    inner: Arc<winit::window::Window>,
    cursor: CursorState,
}

impl Window {
    /// Create a window on the running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let window = event_loop
            .create_window(window_attributes(config))
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        tracing::info!(
            "Window '{}' created ({}x{})",
            config.title,
            config.width,
            config.height
        );

        Ok(Self {
            inner: Arc::new(window),
            cursor: CursorState::default(),
        })
    }

    /// Underlying winit window.
    pub fn winit(&self) -> &Arc<winit::window::Window> {
        &self.inner
    }

    /// Update tracked state from a window event.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        self.cursor.update(event);
    }

    pub fn set_title(&self, title: &str) {
        self.inner.set_title(title);
    }

    /// Request a new inner size in physical pixels.
    pub fn set_size(&self, size: UVec2) {
        let _ = self
            .inner
            .request_inner_size(PhysicalSize::new(size.x, size.y));
    }

    pub fn minimize(&self) {
        self.inner.set_minimized(true);
    }

    /// Inner size in physical pixels.
    pub fn size(&self) -> UVec2 {
        let size = self.inner.inner_size();
        UVec2::new(size.width, size.height)
    }

    /// Whether the window currently has no drawable area.
    pub fn is_minimized(&self) -> bool {
        !has_drawable_area(self.size())
    }

    /// Last cursor position seen by [`Window::handle_event`].
    pub fn cursor_position(&self) -> Vec2 {
        self.cursor.position
    }

    pub fn cursor(&self) -> CursorState {
        self.cursor
    }

    pub fn set_cursor_position(&mut self, position: Vec2) -> Result<()> {
        self.inner
            .set_cursor_position(PhysicalPosition::new(position.x as f64, position.y as f64))
            .map_err(|e| PlatformError::Cursor(e.to_string()))?;
        self.cursor.position = position;
        Ok(())
    }

    /// Release any grab and make the cursor visible.
    pub fn show_cursor(&mut self) -> Result<()> {
        self.inner
            .set_cursor_grab(CursorGrabMode::None)
            .map_err(|e| PlatformError::Cursor(e.to_string()))?;
        self.inner.set_cursor_visible(true);
        self.cursor.captured = false;
        Ok(())
    }

    /// Hide the cursor and keep it inside the window.
    ///
    /// Locks the cursor where the platform allows it and confines it otherwise.
    pub fn disable_cursor(&mut self) -> Result<()> {
        self.inner
            .set_cursor_grab(CursorGrabMode::Locked)
            .or_else(|_| self.inner.set_cursor_grab(CursorGrabMode::Confined))
            .map_err(|e| PlatformError::Cursor(e.to_string()))?;
        self.inner.set_cursor_visible(false);
        self.cursor.captured = true;
        Ok(())
    }

    pub fn set_attribute(&self, attribute: WindowAttribute, enabled: bool) {
        match attribute {
            WindowAttribute::Resizable => self.inner.set_resizable(enabled),
            WindowAttribute::Decorated => self.inner.set_decorations(enabled),
            WindowAttribute::Maximized => self.inner.set_maximized(enabled),
            WindowAttribute::Visible => self.inner.set_visible(enabled),
            WindowAttribute::AlwaysOnTop => self.inner.set_window_level(window_level(enabled)),
        }
    }

    pub fn request_redraw(&self) {
        self.inner.request_redraw();
    }

    /// Raw handles for Vulkan surface creation.
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .inner
            .display_handle()
            .map_err(|e| PlatformError::Handle(e.to_string()))?;
        let window = self
            .inner
            .window_handle()
            .map_err(|e| PlatformError::Handle(e.to_string()))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.inner.display_handle()
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.inner.window_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::event::DeviceId;

    #[test]
    fn attributes_follow_config() {
        let config = PlatformConfig {
            title: "viewer".to_string(),
            resizable: false,
            ..Default::default()
        };
        let attributes = window_attributes(&config);
        assert_eq!(attributes.title, "viewer");
        assert!(!attributes.resizable);
        assert!(attributes.inner_size.is_some());
    }

    #[test]
    fn cursor_tracked_from_moves_only() {
        let moved = WindowEvent::CursorMoved {
            device_id: unsafe { DeviceId::dummy() },
            position: PhysicalPosition::new(12.5, 40.0),
        };
        assert_eq!(cursor_from_event(&moved), Some(Vec2::new(12.5, 40.0)));
        assert_eq!(cursor_from_event(&WindowEvent::Focused(true)), None);
    }

    #[test]
    fn cursor_state_follows_events() {
        let device_id = unsafe { DeviceId::dummy() };
        let mut cursor = CursorState::default();

        cursor.update(&WindowEvent::CursorEntered { device_id });
        assert!(cursor.inside);
        cursor.update(&WindowEvent::CursorMoved {
            device_id,
            position: PhysicalPosition::new(3.0, 4.0),
        });
        cursor.update(&WindowEvent::Focused(false));
        assert_eq!(cursor.position, Vec2::new(3.0, 4.0));

        cursor.update(&WindowEvent::CursorLeft { device_id });
        assert!(!cursor.inside);
        // The last position inside the window is kept
        assert_eq!(cursor.position, Vec2::new(3.0, 4.0));
        assert!(!cursor.captured);
    }

    #[test]
    fn zero_sized_windows_cannot_be_drawn() {
        assert!(has_drawable_area(UVec2::new(1280, 720)));
        assert!(!has_drawable_area(UVec2::new(0, 720)));
        assert!(!has_drawable_area(UVec2::new(1280, 0)));
        assert!(!has_drawable_area(UVec2::ZERO));
    }

    #[test]
    fn always_on_top_level() {
        assert_eq!(window_level(true), WindowLevel::AlwaysOnTop);
        assert_eq!(window_level(false), WindowLevel::Normal);
    }
}
