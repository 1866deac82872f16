//! Application runner and event loop.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use grayforge_gpu::command::{begin_command_buffer, end_command_buffer, set_full_viewport};
use grayforge_gpu::render_pass::default_clear_values;
use grayforge_gpu::{reset_fence, GpuError, QueueKind};
use grayforge_platform::{PlatformConfig, Window};
use grayforge_shaders::ShaderLibrary;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "profiling-tracy")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::EngineApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Queue work for a frame once its swapchain image has been acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStep {
    /// Unsignal the slot's in-flight fence.
    ResetFence,
    /// Submit the recorded commands, signalling the fence.
    Submit,
    /// Submit nothing but wait on the acquire semaphore, signalling the fence.
    Release,
    Present,
    Recreate,
}

/// Steps after recording, `recorded` telling whether recording succeeded.
///
/// The fence is only reset right before a submission that signals it again.
fn submit_steps(recorded: bool) -> &'static [FrameStep] {
    if recorded {
        &[FrameStep::ResetFence, FrameStep::Submit, FrameStep::Present]
    } else {
        &[FrameStep::ResetFence, FrameStep::Release, FrameStep::Recreate]
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory holding compiled shaders (default: `shaders/` next to the executable).
    pub shader_dir: Option<PathBuf>,
    /// Clear color of the default render pass.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Grayforge".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            shader_dir: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Load shaders from `dir`.
    #[must_use]
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    /// Set the clear color.
    #[must_use]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Frame budget for the target FPS.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }

    /// Shader library the config points at.
    pub fn shaders(&self) -> anyhow::Result<ShaderLibrary> {
        Ok(match &self.shader_dir {
            Some(dir) => ShaderLibrary::new(dir),
            None => ShaderLibrary::from_exe_dir()?,
        })
    }

    fn platform(&self) -> PlatformConfig {
        PlatformConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: true,
            vsync: self.vsync,
        }
    }
}

/// Running frame rate statistics.
#[derive(Debug, Clone, Copy)]
struct FpsStats {
    min: f64,
    max: f64,
    sum: f64,
    samples: u64,
}

impl Default for FpsStats {
    fn default() -> Self {
        Self {
            min: f64::MAX,
            max: 0.0,
            sum: 0.0,
            samples: 0,
        }
    }
}

impl FpsStats {
    fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min = self.min.min(fps);
        self.max = self.max.max(fps);
        self.sum += fps;
        self.samples += 1;
    }

    fn average(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }
}

/// Run an `EngineApp` with the given configuration.
///
/// This function initializes logging, creates the window and render scope,
/// and runs the event loop until the application exits.
pub fn run_app<A: EngineApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    // A subscriber may already be installed by the caller.
    #[cfg(feature = "profiling-tracy")]
    {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,grayforge_app=trace,grayforge_render=trace,grayforge_gpu=trace,grayforge_viewer=trace",
            )
        });
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .try_init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .try_init();
    }

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    runner.failure.map_or(Ok(()), Err)
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: EngineApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: EngineApp> {
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
    fps: FpsStats,
}

impl<A: EngineApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };
        state.ctx.window.handle_event(&event);

        // Let the app handle the event first
        if state.app.on_event(&mut state.ctx, &event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = state.handle_resize(size.width, size.height) {
                    error!("Resize error: {e:#}");
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl<A: EngineApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window = Window::create(event_loop, &self.config.platform())?;
        let mut ctx = AppContext::new(window, &self.config)?;

        let capabilities = ctx.scope.capabilities()?;
        info!("GPU: {}", capabilities.summary());

        let app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                // SAFETY: nothing has been submitted yet.
                unsafe { ctx.cleanup()? };
                return Err(e);
            }
        };

        Ok(AppState {
            app,
            ctx,
            target_frame_time: self.config.target_frame_time(),
            fps: FpsStats::default(),
        })
    }
}

impl<A: EngineApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        if self.ctx.window.is_minimized() {
            return Ok(());
        }
        if (self.ctx.needs_recreate || !self.ctx.has_swapchain()) && !self.recreate()? {
            return Ok(());
        }

        let frame_start = Instant::now();

        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;
        self.fps.record(dt);

        self.app.update(&self.ctx, dt);

        let device = self.ctx.scope.device()?;
        let queue = self.ctx.scope.queue(QueueKind::Graphics)?;
        let loader = self.ctx.scope.swapchain_loader()?;
        let swapchain = self.ctx.scope.swapchain()?;
        let slot = self.ctx.current_frame_index;
        let (image_available, in_flight, cmd) = {
            let frame = &self.ctx.frames[slot];
            (frame.sync.image_available, frame.sync.in_flight, frame.command_buffer)
        };

        // SAFETY: the fence and semaphore belong to this frame slot.
        let acquired = unsafe {
            self.ctx.frames[slot].sync.wait(device)?;
            swapchain.acquire_next_image(loader, image_available, u64::MAX)
        };
        let image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                self.ctx.needs_recreate = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let extent = swapchain.extent;
        let framebuffer = self.ctx.framebuffers[image_index as usize];
        let render_finished = self.ctx.render_finished[image_index as usize];

        let recorded = (|| -> anyhow::Result<()> {
            // SAFETY: the fence wait above guarantees the command buffer is not pending.
            unsafe {
                device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
                begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

                let clear_values = default_clear_values(self.ctx.clear_color);
                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(self.ctx.scope.render_pass()?)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D::default().extent(extent))
                    .clear_values(&clear_values);
                device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                set_full_viewport(device, cmd, extent);
            }

            let mut frame_ctx = FrameContext::new(
                cmd,
                image_index,
                framebuffer,
                extent,
                dt,
                self.ctx.frame_count,
            );
            let rendered = self.app.render(&self.ctx, &mut frame_ctx);

            // SAFETY: the command buffer is recording inside the render pass.
            unsafe {
                device.cmd_end_render_pass(cmd);
                end_command_buffer(device, cmd)?;
            }
            rendered
        })();

        let frame_cmds = [cmd];
        let frame_signals = [render_finished];
        for &step in submit_steps(recorded.is_ok()) {
            match step {
                // SAFETY: the fence was waited on above and nothing else uses it.
                FrameStep::ResetFence => unsafe { reset_fence(device, in_flight)? },
                FrameStep::Submit | FrameStep::Release => {
                    let (buffers, signals) = if step == FrameStep::Submit {
                        (&frame_cmds[..], &frame_signals[..])
                    } else {
                        (&[][..], &[][..])
                    };
                    // SAFETY: all handles are owned by the context and alive.
                    let submitted = unsafe {
                        queue.submit_frame(
                            device,
                            buffers,
                            &[image_available],
                            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                            signals,
                            in_flight,
                        )
                    };
                    if let Err(e) = submitted {
                        // The reset fence would never signal again.
                        // SAFETY: the failed submission left the fence unused.
                        unsafe { self.ctx.frames[slot].sync.replace_fence(device)? };
                        self.ctx.needs_recreate = true;
                        return Err(e.into());
                    }
                }
                FrameStep::Present => {
                    // SAFETY: all handles are owned by the context and alive.
                    let recreate = unsafe {
                        queue.present(loader, swapchain, image_index, &[render_finished])?
                    };
                    if recreate {
                        self.ctx.needs_recreate = true;
                    }
                }
                // The acquired image is never presented, so drop the swapchain holding it.
                FrameStep::Recreate => self.ctx.needs_recreate = true,
            }
        }
        recorded?;

        self.ctx.current_frame_index = (self.ctx.current_frame_index + 1) % self.ctx.frames.len();
        self.ctx.frame_count += 1;

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    /// Rebuild the swapchain and notify the app. `false` while there is nothing to draw into.
    fn recreate(&mut self) -> anyhow::Result<bool> {
        if !self.ctx.recreate_swapchain()? {
            return Ok(false);
        }
        let extent = self.ctx.extent();
        self.app.on_resize(&mut self.ctx, extent.width, extent.height)?;
        Ok(true)
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if self.recreate()? {
            info!("Resized to {width}x{height}");
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(avg) = self.fps.average() {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.fps.min);
            info!("  Max: {:.1}", self.fps.max);
            info!("  Avg: {:.1}", avg);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.scope.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // SAFETY: the device is idle and the app released its resources.
        if let Err(e) = unsafe { self.ctx.cleanup() } {
            warn!("Context cleanup failed: {e:#}");
        }
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = AppConfig::new("Test")
            .with_size(640, 480)
            .with_target_fps(60)
            .with_vsync(false)
            .with_shader_dir("/tmp/shaders");
        assert_eq!(config.title, "Test");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(!config.vsync);
        assert_eq!(config.target_frame_time(), Some(Duration::from_nanos(16_666_666)));
        assert_eq!(
            config.shaders().unwrap().root(),
            std::path::Path::new("/tmp/shaders")
        );
    }

    #[test]
    fn zero_fps_is_unlimited() {
        let config = AppConfig::default().with_target_fps(0);
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn fence_reset_directly_precedes_signalling_submit() {
        for recorded in [true, false] {
            let steps = submit_steps(recorded);
            let reset = steps
                .iter()
                .position(|&s| s == FrameStep::ResetFence)
                .unwrap();
            assert!(matches!(
                steps[reset + 1],
                FrameStep::Submit | FrameStep::Release
            ));
            assert_eq!(
                steps
                    .iter()
                    .filter(|&&s| s == FrameStep::ResetFence)
                    .count(),
                1
            );
        }
    }

    #[test]
    fn failed_recording_releases_acquired_image() {
        let steps = submit_steps(false);
        assert!(steps.contains(&FrameStep::Release));
        assert!(steps.contains(&FrameStep::Recreate));
        assert!(!steps.contains(&FrameStep::Submit));
        assert!(!steps.contains(&FrameStep::Present));
        assert_eq!(
            submit_steps(true),
            &[FrameStep::ResetFence, FrameStep::Submit, FrameStep::Present]
        );
    }

    #[test]
    fn fps_stats_track_extremes() {
        let mut stats = FpsStats::default();
        assert_eq!(stats.average(), None);
        stats.record(0.5);
        stats.record(0.25);
        stats.record(0.0);
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.average(), Some(3.0));
    }
}
