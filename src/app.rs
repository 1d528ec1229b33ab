//! Demo window: one device, every pass once per frame.

use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec2, Vec3};
use log::{error, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::device::backend::{TexFilter, Viewport};
use crate::device::buffer::VertexBuffer;
use crate::device::framebuffer::FramebufferParams;
use crate::device::state::{Color, CullFace, TransparencyMode};
use crate::device::texture::{ImageData, Texture, TextureCreateParams};
use crate::device::vertex::{PrimitiveType, Vertex2D, Vertex3D, VertexParticle};
use crate::device::wgpu_backend::WgpuBackend;
use crate::device::Device;
use crate::renderers::ShadowParam;
use crate::settings::{DeviceConfig, Resolution};

const TERRAIN_SIZE: i32 = 32;
const OVERLAY: &str = "overlay";
const LIGHT_POSITION: Vec3 = Vec3::new(12.0, 20.0, -8.0);

pub struct App {
    config: DeviceConfig,
    window: Option<Arc<Window>>,
    device: Option<Device>,
    scene: Option<DemoScene>,
}

impl App {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            window: None,
            device: None,
            scene: None,
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        self.config.size = Resolution {
            width: size.width,
            height: size.height,
        };
        device.config_changed(self.config.clone());
    }

    fn shutdown(&mut self) {
        if let (Some(device), Some(scene)) = (self.device.as_mut(), self.scene.take()) {
            scene.destroy(device);
        }
        self.device = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("gfx-device")
            .with_inner_size(PhysicalSize::new(
                self.config.size.width,
                self.config.size.height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Could not create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        let backend = WgpuBackend::new(window.clone(), &self.config);
        let mut device = Device::new(backend, self.config.clone());
        if let Err(err) = device.create() {
            error!("Device creation failed: {} ({})", err, device.error_message());
            event_loop.exit();
            return;
        }
        info!(
            "Device ready: max texture {}, {} samples, anisotropy {}",
            device.max_texture_size(),
            device.max_samples(),
            device.max_anisotropy_level()
        );

        self.scene = Some(DemoScene::new(&mut device));
        self.device = Some(device);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(|w| w.id()) != Some(id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.window.as_ref().map(|w| w.inner_size()) {
                    self.resize(size);
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(device), Some(scene)) = (self.device.as_mut(), self.scene.as_ref()) {
                    scene.render(device);
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.shutdown();
                event_loop.exit();
            }
            _ => {}
        }
    }
}

struct DemoScene {
    terrain: VertexBuffer,
    cube: VertexBuffer,
    ground: Texture,
    checker: Texture,
    spark: Texture,
    shadow_map: Texture,
    started: Instant,
}

impl DemoScene {
    fn new(device: &mut Device) -> Self {
        let terrain = device.create_vertex_buffer(PrimitiveType::Triangles, &terrain_vertices());
        let cube = device.create_vertex_buffer(PrimitiveType::Triangles, &cube_vertices(1.0));

        let trilinear = TextureCreateParams {
            filter: TexFilter::Trilinear,
            mipmap: true,
            anisotropy: device.max_anisotropy_level(),
            ..Default::default()
        };
        let ground = device.create_texture(
            Some(&checkerboard(64, 8, [96, 140, 80, 255], [80, 120, 64, 255])),
            &trilinear,
        );
        let checker = device.create_texture(
            Some(&checkerboard(32, 4, [220, 200, 160, 255], [160, 70, 50, 255])),
            &trilinear,
        );
        let spark = device.create_texture(
            Some(&radial_falloff(32)),
            &TextureCreateParams {
                filter: TexFilter::Bilinear,
                ..Default::default()
            },
        );
        let size = device.config().shadow_map_size;
        let shadow_map = device.create_depth_texture(size, size, 32);

        device.create_framebuffer(
            OVERLAY,
            FramebufferParams {
                width: 128,
                height: 128,
                depth: 0,
                ..Default::default()
            },
        );

        Self {
            terrain,
            cube,
            ground,
            checker,
            spark,
            shadow_map,
            started: Instant::now(),
        }
    }

    fn destroy(self, device: &mut Device) {
        device.destroy_vertex_buffer(self.terrain);
        device.destroy_vertex_buffer(self.cube);
        for texture in [&self.ground, &self.checker, &self.spark, &self.shadow_map] {
            device.destroy_texture(texture);
        }
        device.delete_framebuffer(OVERLAY);
    }

    fn render(&self, device: &mut Device) {
        if let Err(err) = device.begin_scene() {
            error!("Skipping frame: {}", err);
            return;
        }

        let t = self.started.elapsed().as_secs_f32();
        let (width, height) = {
            let size = device.config().size;
            (size.width.max(1) as f32, size.height.max(1) as f32)
        };
        let projection = Mat4::perspective_rh_gl(60f32.to_radians(), width / height, 0.1, 200.0);
        let eye = Vec3::new(t.cos() * 3.0, 9.0, -14.0);
        let view = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y);
        let cube_model = Mat4::from_translation(Vec3::new(0.0, 1.5, 0.0)) * Mat4::from_rotation_y(t);
        let terrain_model = Mat4::from_translation(Vec3::new(
            -TERRAIN_SIZE as f32 / 2.0,
            0.0,
            -TERRAIN_SIZE as f32 / 2.0,
        ));

        let light_projection = Mat4::orthographic_rh_gl(-12.0, 12.0, -12.0, 12.0, 1.0, 60.0);
        let light_view = Mat4::look_at_lh(LIGHT_POSITION, Vec3::ZERO, Vec3::Y);
        let shadow = ShadowParam {
            matrix: light_projection * Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0)) * light_view,
            ..Default::default()
        };

        if let Some(mut pass) = device.shadow_renderer() {
            pass.begin();
            pass.set_shadow_map(&self.shadow_map);
            pass.set_projection_matrix(light_projection);
            pass.set_view_matrix(light_view);
            pass.set_model_matrix(cube_model);
            pass.draw_object(&self.cube, false);
            pass.end();
        }

        let light = LIGHT_POSITION.normalize().extend(0.0);
        let sky = Color::new(0.55, 0.7, 0.9, 1.0);

        if let Some(mut pass) = device.terrain_renderer() {
            pass.begin();
            pass.set_projection_matrix(projection);
            pass.set_view_matrix(view);
            pass.set_primary_texture(&self.ground);
            pass.set_secondary_texture(&Texture::invalid());
            pass.set_shadow_map(&self.shadow_map);
            pass.set_shadow_params(&[shadow]);
            pass.set_light(light, 0.9, Vec3::ONE);
            pass.set_sky(sky, 0.35);
            pass.set_fog(40.0, 120.0, Vec3::new(0.55, 0.7, 0.9));
            pass.draw_object(terrain_model, &self.terrain);
            pass.end();
        }

        if let Some(mut pass) = device.object_renderer() {
            pass.begin();
            pass.set_cull_face(CullFace::None);
            pass.set_projection_matrix(projection);
            pass.set_view_matrix(view);
            pass.set_model_matrix(cube_model);
            pass.set_albedo_texture(&self.checker);
            pass.set_shadow_map(&self.shadow_map);
            pass.set_shadow_params(&[shadow]);
            pass.set_light(light, 0.9, Vec3::ONE);
            pass.set_sky(sky, 0.35);
            pass.set_material_params(0.6, 0.0, 1.0);
            pass.draw_object(&self.cube);
            pass.end();
        }

        if let Some(mut pass) = device.particle_renderer() {
            pass.begin();
            pass.set_projection_matrix(projection);
            pass.set_view_matrix(view);
            pass.set_texture(&self.spark);
            pass.set_transparency(TransparencyMode::AdditiveBlack);
            pass.set_color(Color::new(1.0, 0.7, 0.3, 1.0));
            pass.draw_particle(PrimitiveType::Triangles, &sparks(t));
            pass.end();
        }

        if device.bind_framebuffer(OVERLAY) {
            device.set_clear_color(Color::new(0.1, 0.1, 0.3, 1.0));
            device.clear();
            device.unbind_framebuffer();
            device.set_clear_color(Color::BLACK);
            device.copy_framebuffer_to_screen(OVERLAY, Viewport::new(16, 16, 128, 128));
        }

        if let Some(mut pass) = device.ui_renderer() {
            pass.begin();
            pass.set_projection(0.0, width, 0.0, height);
            pass.set_transparency(TransparencyMode::Alpha);
            let quads = pass.begin_primitives(PrimitiveType::TriangleStrip, &[4, 4]);
            quads[..4].copy_from_slice(&rect(Vec2::new(16.0, 160.0), Vec2::new(128.0, 12.0), [255, 255, 255, 160]));
            let fill = 128.0 * (0.5 + 0.5 * t.sin());
            quads[4..].copy_from_slice(&rect(Vec2::new(16.0, 160.0), Vec2::new(fill, 12.0), [255, 180, 40, 220]));
            pass.end_primitive();
            pass.end();
        }

        device.end_scene();
    }
}

fn terrain_vertices() -> Vec<Vertex3D> {
    let mut vertices = Vec::with_capacity((TERRAIN_SIZE * TERRAIN_SIZE * 6) as usize);
    let up = [0.0, 1.0, 0.0];
    for z in 0..TERRAIN_SIZE {
        for x in 0..TERRAIN_SIZE {
            let (x0, z0, x1, z1) = (x as f32, z as f32, x as f32 + 1.0, z as f32 + 1.0);
            let corner = |x: f32, z: f32| Vertex3D::new([x, 0.0, z], up, [x / 4.0, z / 4.0]);
            vertices.extend([
                corner(x0, z0),
                corner(x0, z1),
                corner(x1, z0),
                corner(x1, z0),
                corner(x0, z1),
                corner(x1, z1),
            ]);
        }
    }
    vertices
}

fn cube_vertices(half: f32) -> Vec<Vertex3D> {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::Z, Vec3::NEG_X),
        (Vec3::Z, Vec3::Y, Vec3::NEG_X),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];
    let mut vertices = Vec::with_capacity(36);
    for (normal, up, right) in faces {
        let corner = |u: f32, v: f32| {
            let p = (normal + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * half;
            Vertex3D::new(p.to_array(), normal.to_array(), [u, v])
        };
        vertices.extend([
            corner(0.0, 0.0),
            corner(0.0, 1.0),
            corner(1.0, 0.0),
            corner(1.0, 0.0),
            corner(0.0, 1.0),
            corner(1.0, 1.0),
        ]);
    }
    vertices
}

/// Camera-facing quads orbiting the cube.
fn sparks(t: f32) -> Vec<VertexParticle> {
    let mut vertices = Vec::with_capacity(8 * 6);
    for i in 0..8 {
        let angle = t * 1.5 + i as f32 * std::f32::consts::TAU / 8.0;
        let center = Vec3::new(angle.cos() * 2.5, 1.5 + (t * 2.0 + i as f32).sin() * 0.5, angle.sin() * 2.5);
        let corner = |dx: f32, dy: f32, uv: [f32; 2]| {
            let p = center + Vec3::new(dx, dy, 0.0) * 0.25;
            VertexParticle::new(p.to_array(), uv, [255, 255, 255, 255])
        };
        vertices.extend([
            corner(-1.0, -1.0, [0.0, 1.0]),
            corner(-1.0, 1.0, [0.0, 0.0]),
            corner(1.0, -1.0, [1.0, 1.0]),
            corner(1.0, -1.0, [1.0, 1.0]),
            corner(-1.0, 1.0, [0.0, 0.0]),
            corner(1.0, 1.0, [1.0, 0.0]),
        ]);
    }
    vertices
}

fn rect(origin: Vec2, size: Vec2, color: [u8; 4]) -> [Vertex2D; 4] {
    let corner = |x: f32, y: f32| {
        Vertex2D::new([origin.x + size.x * x, origin.y + size.y * y], [x, 1.0 - y], color)
    };
    [corner(0.0, 0.0), corner(1.0, 0.0), corner(0.0, 1.0), corner(1.0, 1.0)]
}

fn checkerboard(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> ImageData {
    let cell = (size / cells).max(1);
    let pixels = (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size / cell, i / size / cell);
            if (x + y) % 2 == 0 { a } else { b }
        })
        .collect();
    ImageData::rgba(size, size, pixels)
}

fn radial_falloff(size: u32) -> ImageData {
    let center = Vec2::splat(size as f32 / 2.0);
    let pixels = (0..size * size)
        .flat_map(|i| {
            let p = Vec2::new((i % size) as f32 + 0.5, (i / size) as f32 + 0.5);
            let falloff = (1.0 - p.distance(center) / center.x).clamp(0.0, 1.0);
            let value = (falloff * falloff * 255.0) as u8;
            [value, value, value, value]
        })
        .collect();
    ImageData::rgba(size, size, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_six_faces_of_two_triangles() {
        let cube = cube_vertices(1.0);
        assert_eq!(cube.len(), 36);
        assert!(cube
            .iter()
            .all(|v| v.position.iter().all(|c| c.abs() <= 1.0 + f32::EPSILON)));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let image = checkerboard(4, 2, [255; 4], [0; 4]);
        assert_eq!(image.pixels.len(), 4 * 4 * 4);
        assert_eq!(&image.pixels[0..4], &[255; 4]);
        assert_eq!(&image.pixels[8..12], &[0; 4]);
    }

    #[test]
    fn ui_rect_spans_its_size() {
        let quad = rect(Vec2::new(10.0, 20.0), Vec2::new(30.0, 5.0), [0; 4]);
        assert_eq!(quad[0].position, [10.0, 20.0]);
        assert_eq!(quad[3].position, [40.0, 25.0]);
    }
}
