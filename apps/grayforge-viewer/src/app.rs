//! Viewer application: a noise-textured mesh under an orbiting camera.

use std::mem::size_of;

use ash::vk;
use glam::{Mat4, UVec2, Vec2, Vec3};
use grayforge_app::{
    AppContext, Camera, EngineApp, FrameContext, Window, WindowAttribute, WindowEvent,
};
use grayforge_core::Color;
use grayforge_gpu::{
    DescriptorSet, DescriptorSetDescriptor, GraphicsPipeline, GraphicsPipelineDescriptor, Pipeline,
    RenderScope, VulkanImage,
};
use grayforge_render::{
    perlin_pixels, upload_pixels, Mesh, MeshData, MeshPushConstants, NoiseGenerator, Vertex,
};
use tracing::{error, info, warn};
use winit::event::{ElementState, MouseButton};
use winit::keyboard::{Key, NamedKey};

use crate::{ViewerArgs, HEIGHT, TITLE, WIDTH};

/// Orbit speed in radians per second.
const ORBIT_SPEED: f32 = 0.5;

/// Initial camera elevation above the orbit plane in radians.
const ORBIT_ELEVATION: f32 = 0.4;

/// Orbit change per dragged pixel in radians.
const DRAG_SPEED: f32 = 0.005;

/// Elevation limit keeping the camera off the poles.
const MAX_ELEVATION: f32 = 1.45;

/// Unit cube shown when no mesh is given.
const CUBE_OBJ: &str = "\
o cube
v -0.5 -0.5  0.5
v  0.5 -0.5  0.5
v  0.5  0.5  0.5
v -0.5  0.5  0.5
v -0.5 -0.5 -0.5
v  0.5 -0.5 -0.5
v  0.5  0.5 -0.5
v -0.5  0.5 -0.5
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn  0.0  0.0  1.0
vn  0.0  0.0 -1.0
vn  1.0  0.0  0.0
vn -1.0  0.0  0.0
vn  0.0  1.0  0.0
vn  0.0 -1.0  0.0
f 1/1/1 2/2/1 3/3/1 4/4/1
f 6/1/2 5/2/2 8/3/2 7/4/2
f 2/1/3 6/2/3 7/3/3 3/4/3
f 5/1/4 1/2/4 4/3/4 8/4/4
f 4/1/5 3/2/5 7/3/5 8/4/5
f 5/1/6 6/2/6 2/3/6 1/4/6
";

/// Stages that read [`MeshPushConstants`].
const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Keyboard commands of the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerAction {
    TogglePause,
    ToggleCursorCapture,
    ReleaseCursor,
    ToggleMaximized,
    ToggleAlwaysOnTop,
    Minimize,
    ResetSize,
}

impl ViewerAction {
    pub fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Named(NamedKey::Space) => Some(Self::TogglePause),
            Key::Named(NamedKey::Escape) => Some(Self::ReleaseCursor),
            Key::Character(c) => match c.to_lowercase().as_str() {
                "c" => Some(Self::ToggleCursorCapture),
                "m" => Some(Self::ToggleMaximized),
                "t" => Some(Self::ToggleAlwaysOnTop),
                "n" => Some(Self::Minimize),
                "r" => Some(Self::ResetSize),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Azimuth and elevation after dragging the cursor by `delta` pixels.
pub fn orbit_drag(azimuth: f32, elevation: f32, delta: Vec2) -> (f32, f32) {
    let azimuth = (azimuth - delta.x * DRAG_SPEED).rem_euclid(std::f32::consts::TAU);
    let elevation = (elevation + delta.y * DRAG_SPEED).clamp(-MAX_ELEVATION, MAX_ELEVATION);
    (azimuth, elevation)
}

/// Center and bounding sphere radius of the mesh vertices.
pub fn bounds(data: &MeshData) -> (Vec3, f32) {
    let (min, max) = data.vertices.iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(min, max), vertex| {
            let p = Vec3::from_array(vertex.position);
            (min.min(p), max.max(p))
        },
    );
    if data.vertices.is_empty() {
        return (Vec3::ZERO, 1.0);
    }
    let center = (min + max) * 0.5;
    (center, (max - center).length().max(1e-3))
}

/// Viewer application state.
pub struct Viewer {
    mesh: Mesh,
    texture: VulkanImage,
    set: DescriptorSet,
    pipeline: GraphicsPipeline,
    camera: Camera,
    target: Vec3,
    radius: f32,
    azimuth: f32,
    elevation: f32,
    paused: bool,
    /// Cursor position when the last drag event was seen.
    drag_from: Option<Vec2>,
    maximized: bool,
    always_on_top: bool,
}

impl EngineApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let args = crate::args();

        let data = match &args.mesh {
            Some(path) => MeshData::from_obj_path(path)?,
            None => MeshData::from_obj_reader(CUBE_OBJ.as_bytes())?,
        };
        let (target, extent) = bounds(&data);
        info!(
            "Mesh: {} vertices, {} indices, radius {extent:.2}",
            data.vertices.len(),
            data.indices.len()
        );

        let scope = &ctx.scope;
        let mut mesh = Mesh::upload(scope, &data)?;

        let mut texture = match noise_texture(ctx, args) {
            Ok(texture) => texture,
            Err(e) => {
                // SAFETY: the mesh has never been used by the GPU.
                unsafe { mesh.destroy(scope)? };
                return Err(e);
            }
        };

        let resources = DescriptorSetDescriptor::new()
            .add_image_sampler(0, vk::ShaderStageFlags::FRAGMENT, texture.descriptor_info())
            .allocate(scope)
            .map_err(anyhow::Error::from)
            .and_then(|set| match mesh_pipeline(ctx, &set) {
                Ok(pipeline) => Ok((set, pipeline)),
                Err(e) => {
                    // SAFETY: the set has never been bound.
                    unsafe { set.destroy(scope.device()?)? };
                    Err(e)
                }
            });
        let (set, pipeline) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                // SAFETY: neither resource has been used by the GPU.
                unsafe {
                    texture.destroy(scope)?;
                    mesh.destroy(scope)?;
                }
                return Err(e);
            }
        };

        let mut camera = Camera::default();
        camera.set_aspect(ctx.aspect_ratio());
        camera.set_depth_range(extent * 0.01, extent * 100.0);

        info!(
            "Viewer ready: drag to orbit, Space pauses, C captures the cursor, \
             M maximizes, T keeps on top, N minimizes, R resets the size"
        );

        Ok(Self {
            mesh,
            texture,
            set,
            pipeline,
            camera,
            target,
            radius: extent * 2.5,
            azimuth: 0.0,
            elevation: ORBIT_ELEVATION,
            paused: false,
            drag_from: None,
            maximized: false,
            always_on_top: false,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        if !self.paused && self.drag_from.is_none() {
            self.azimuth = (self.azimuth + ORBIT_SPEED * dt) % std::f32::consts::TAU;
        }
        self.camera
            .orbit(self.target, self.radius, self.azimuth, self.elevation);
    }

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let device = ctx.scope.device()?;
        let cmd = frame.command_buffer;
        let push = MeshPushConstants::new(&self.camera, Mat4::IDENTITY, Color::default());

        // SAFETY: the command buffer is recording inside the default render pass
        // and every bound resource lives until cleanup.
        unsafe {
            self.pipeline.bind(device, cmd);
            self.set
                .bind(device, cmd, self.pipeline.bind_point(), self.pipeline.layout, 0);
            self.pipeline.push_constants(device, cmd, PUSH_STAGES, &push);
            self.mesh.draw(device, cmd);
        }
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        self.camera.set_aspect(grayforge_app::aspect_ratio(vk::Extent2D { width, height }));
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                match ViewerAction::from_key(&event.logical_key) {
                    Some(action) => {
                        self.apply(ctx, action);
                        true
                    }
                    None => false,
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.drag_from =
                    (*state == ElementState::Pressed).then(|| ctx.window.cursor_position());
                true
            }
            WindowEvent::CursorMoved { .. } => {
                let Some(from) = self.drag_from else {
                    return false;
                };
                let to = ctx.window.cursor_position();
                (self.azimuth, self.elevation) = orbit_drag(self.azimuth, self.elevation, to - from);
                self.drag_from = Some(to);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        let scope = &ctx.scope;
        let device = match scope.device() {
            Ok(device) => device,
            Err(e) => {
                error!("Viewer cleanup skipped: {e}");
                return;
            }
        };

        // SAFETY: the runner waited for the device to go idle.
        unsafe {
            self.pipeline.destroy(device);
            if let Err(e) = self.set.destroy(device) {
                error!("Failed to free descriptor set: {e}");
            }
            if let Err(e) = self.texture.destroy(scope) {
                error!("Failed to destroy texture: {e}");
            }
            if let Err(e) = self.mesh.destroy(scope) {
                error!("Failed to destroy mesh: {e}");
            }
        }
    }
}

impl Viewer {
    fn apply(&mut self, ctx: &mut AppContext, action: ViewerAction) {
        let window = &mut ctx.window;
        let result = match action {
            ViewerAction::TogglePause => {
                self.paused = !self.paused;
                info!("Orbit {}", if self.paused { "paused" } else { "resumed" });
                window.set_title(&window_title(self.paused));
                Ok(())
            }
            ViewerAction::ToggleCursorCapture if window.cursor().captured => release_cursor(window),
            ViewerAction::ToggleCursorCapture => window.disable_cursor(),
            ViewerAction::ReleaseCursor => release_cursor(window),
            ViewerAction::ToggleMaximized => {
                self.maximized = !self.maximized;
                window.set_attribute(WindowAttribute::Maximized, self.maximized);
                Ok(())
            }
            ViewerAction::ToggleAlwaysOnTop => {
                self.always_on_top = !self.always_on_top;
                window.set_attribute(WindowAttribute::AlwaysOnTop, self.always_on_top);
                Ok(())
            }
            ViewerAction::Minimize => {
                window.minimize();
                Ok(())
            }
            ViewerAction::ResetSize => {
                self.maximized = false;
                window.set_attribute(WindowAttribute::Maximized, false);
                window.set_size(UVec2::new(WIDTH, HEIGHT));
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("{action:?} failed: {e}");
        }
    }
}

fn window_title(paused: bool) -> String {
    if paused {
        format!("{TITLE} (paused)")
    } else {
        TITLE.to_string()
    }
}

/// Show the cursor again in the middle of the window.
fn release_cursor(window: &mut Window) -> grayforge_platform::Result<()> {
    window.show_cursor()?;
    let center = window.size().as_vec2() * 0.5;
    window.set_cursor_position(center)
}

/// Generate the texture on the GPU, or fall back to CPU Perlin noise when
/// the compute shader is missing.
fn noise_texture(ctx: &AppContext, args: &ViewerArgs) -> anyhow::Result<VulkanImage> {
    let seed = args.seed_or_random();
    let kind = args.noise_kind(seed);
    let generator = NoiseGenerator::new(ctx.shaders.clone());

    if generator.is_available(&kind) {
        let extent = vk::Extent3D {
            width: args.size,
            height: args.size,
            depth: 1,
        };
        return Ok(generator.generate(&ctx.scope, &kind, extent)?);
    }

    warn!("Compute shader for {kind:?} not found, generating Perlin noise on the CPU (seed {seed})");
    cpu_perlin(&ctx.scope, args, seed)
}

fn cpu_perlin(scope: &RenderScope, args: &ViewerArgs, seed: u32) -> anyhow::Result<VulkanImage> {
    let extent = vk::Extent2D {
        width: args.size,
        height: args.size,
    };
    let pixels = perlin_pixels(
        vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        args.frequency,
        args.octaves,
        seed,
    );
    Ok(upload_pixels(
        scope,
        &pixels,
        extent,
        1,
        vk::Format::R8_UNORM,
        false,
    )?)
}

fn mesh_pipeline(ctx: &AppContext, set: &DescriptorSet) -> anyhow::Result<GraphicsPipeline> {
    let pipeline = GraphicsPipelineDescriptor::new()
        .shader(
            "mesh",
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )
        .vertex_input(
            &[Vertex::binding_description()],
            &Vertex::attribute_descriptions(),
        )
        .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
        .descriptor_layout(set.layout)
        .push_constant_range(vk::PushConstantRange {
            stage_flags: PUSH_STAGES,
            offset: 0,
            size: size_of::<MeshPushConstants>() as u32,
        })
        .construct(&ctx.scope, &ctx.shaders)?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn builtin_cube_loads() {
        let data = MeshData::from_obj_reader(CUBE_OBJ.as_bytes()).unwrap();
        // Four corners per face, two triangles per face
        assert_eq!(data.vertices.len(), 24);
        assert_eq!(data.indices.len(), 36);
    }

    #[test]
    fn cube_bounds() {
        let data = MeshData::from_obj_reader(CUBE_OBJ.as_bytes()).unwrap();
        let (center, radius) = bounds(&data);
        assert_relative_eq!(center.length(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(radius, 0.75f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn empty_bounds_default() {
        assert_eq!(bounds(&MeshData::default()), (Vec3::ZERO, 1.0));
    }

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(
            ViewerAction::from_key(&Key::Named(NamedKey::Space)),
            Some(ViewerAction::TogglePause)
        );
        assert_eq!(
            ViewerAction::from_key(&Key::Named(NamedKey::Escape)),
            Some(ViewerAction::ReleaseCursor)
        );
        assert_eq!(
            ViewerAction::from_key(&Key::Character("C".into())),
            Some(ViewerAction::ToggleCursorCapture)
        );
        assert_eq!(
            ViewerAction::from_key(&Key::Character("r".into())),
            Some(ViewerAction::ResetSize)
        );
        assert_eq!(ViewerAction::from_key(&Key::Character("x".into())), None);
        assert_eq!(ViewerAction::from_key(&Key::Named(NamedKey::Enter)), None);
    }

    #[test]
    fn title_shows_pause() {
        assert_eq!(window_title(false), "Grayforge Viewer");
        assert_eq!(window_title(true), "Grayforge Viewer (paused)");
    }

    #[test]
    fn dragging_orbits_and_clamps_elevation() {
        let (azimuth, elevation) = orbit_drag(1.0, 0.4, Vec2::new(-100.0, 20.0));
        assert_relative_eq!(azimuth, 1.5, epsilon = 1e-5);
        assert_relative_eq!(elevation, 0.5, epsilon = 1e-5);

        let (azimuth, elevation) = orbit_drag(0.0, 0.0, Vec2::new(10.0, 10_000.0));
        assert!((0.0..std::f32::consts::TAU).contains(&azimuth));
        assert_relative_eq!(elevation, MAX_ELEVATION);
    }

    #[test]
    fn push_constants_fit_minimum_limit() {
        // Vulkan guarantees at least 128 bytes of push constants
        assert!(size_of::<MeshPushConstants>() <= 128);
        assert!(PUSH_STAGES.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
