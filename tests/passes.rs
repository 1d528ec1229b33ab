use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use gfx_device::device::backend::{StateChange, StateKind, UniformValue};
use gfx_device::device::headless::Trace;
use gfx_device::device::state::{CullFace, TransparencyMode};
use gfx_device::device::texture::{ImageData, Texture, TextureCreateParams};
use gfx_device::device::vertex::{PrimitiveType, Vertex2D, Vertex3D, VertexParticle};
use gfx_device::renderers::{PassPhase, ShadowParam};
use gfx_device::{Device, DeviceConfig, HeadlessBackend};

fn device_with(config: DeviceConfig) -> (Device, Rc<RefCell<Trace>>) {
    let backend = HeadlessBackend::new();
    let trace = backend.trace();
    let mut device = Device::new(backend, config);
    device.create().expect("headless device");
    (device, trace)
}

fn device() -> (Device, Rc<RefCell<Trace>>) {
    device_with(DeviceConfig {
        shader_root: concat!(env!("CARGO_MANIFEST_DIR"), "/shaders").into(),
        ..Default::default()
    })
}

fn texture(device: &mut Device) -> Texture {
    device.create_texture(
        Some(&ImageData::solid(4, 4, [200, 100, 50, 255])),
        &TextureCreateParams::default(),
    )
}

fn cube_face() -> Vec<Vertex3D> {
    vec![
        Vertex3D::new([0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 0.0]),
        Vertex3D::new([0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0]),
        Vertex3D::new([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0]),
    ]
}

#[test]
fn every_pass_unbinds_its_units_on_end() {
    let (mut device, trace) = device();
    let image = texture(&mut device);
    let depth = device.create_depth_texture(256, 256, 24);
    let mesh = device.create_vertex_buffer(PrimitiveType::Triangles, &cube_face());

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.set_shadow_map(&depth);
    shadow.set_texture(&image);
    shadow.draw_object(&mesh, true);
    shadow.end();
    assert!(trace.borrow().texture_units.is_empty());

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.set_primary_texture(&image);
    terrain.set_shadow_map(&depth);
    terrain.draw_object(Mat4::IDENTITY, &mesh);
    assert_eq!(trace.borrow().texture_units.len(), 3);
    terrain.end();
    assert!(trace.borrow().texture_units.is_empty());

    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.set_albedo_texture(&image);
    object.set_shadow_map(&depth);
    object.draw_object(&mesh);
    object.end();
    assert!(trace.borrow().texture_units.is_empty());

    let mut particles = device.particle_renderer().unwrap();
    particles.begin();
    particles.set_texture(&image);
    particles.draw_particle(
        PrimitiveType::Points,
        &[VertexParticle::new([0.0; 3], [0.0; 2], [255; 4])],
    );
    particles.end();
    assert!(trace.borrow().texture_units.is_empty());

    let mut ui = device.ui_renderer().unwrap();
    ui.begin();
    ui.set_texture(&image);
    ui.draw_primitive(
        PrimitiveType::TriangleStrip,
        &[Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4],
    );
    ui.end();
    assert!(trace.borrow().texture_units.is_empty());
    assert_eq!(trace.borrow().draws.len(), 5);
}

#[test]
fn draws_see_the_textures_bound_by_their_pass() {
    let (mut device, trace) = device();
    let image = texture(&mut device);
    let mesh = device.create_vertex_buffer(PrimitiveType::Triangles, &cube_face());

    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.set_albedo_texture(&image);
    object.draw_object(&mesh);
    object.end();

    let trace = trace.borrow();
    let draw = trace.draws.last().unwrap();
    assert_eq!(draw.units.get(&10).copied(), image.handle);
    assert_eq!(draw.units.len(), 4);
    assert_eq!(draw.program, trace.program_named("object"));
}

#[test]
fn phase_follows_begin_and_end() {
    let (mut device, _) = device();
    let mut ui = device.ui_renderer().unwrap();
    assert_eq!(ui.phase(), PassPhase::Ready);
    ui.begin();
    assert_eq!(ui.phase(), PassPhase::Begun);
    ui.end();
    assert_eq!(ui.phase(), PassPhase::Ready);
}

#[test]
fn missing_shaders_leave_inert_renderers() {
    let (mut device, trace) = device_with(DeviceConfig {
        shader_root: "does/not/exist".into(),
        ..Default::default()
    });
    let mesh = device.create_vertex_buffer(PrimitiveType::Triangles, &cube_face());

    let mut object = device.object_renderer().unwrap();
    assert!(!object.is_ready());
    assert_eq!(object.phase(), PassPhase::Uninitialized);
    object.begin();
    object.draw_object(&mesh);
    object.end();
    assert_eq!(object.phase(), PassPhase::Uninitialized);

    let mut ui = device.ui_renderer().unwrap();
    ui.begin();
    ui.draw_primitive(
        PrimitiveType::TriangleStrip,
        &[Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4],
    );
    ui.end();

    let trace = trace.borrow();
    assert!(trace.draws.is_empty());
    assert!(trace.live_programs.is_empty());
}

#[test]
fn incompatible_buffers_are_skipped() {
    let (mut device, trace) = device();
    let flat = device.create_vertex_buffer(
        PrimitiveType::TriangleStrip,
        &[Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4],
    );

    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.draw_object(&flat);
    object.end();

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.draw_object(Mat4::IDENTITY, &flat);
    terrain.end();

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.draw_object(&flat, false);
    shadow.end();

    assert!(trace.borrow().draws.is_empty());
}

#[test]
fn begin_sets_the_state_each_pass_needs() {
    let (mut device, trace) = device();

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    assert!(device.state().depth_test());
    assert_eq!(device.state().cull_face(), CullFace::Back);
    device.terrain_renderer().unwrap().end();

    let mut particles = device.particle_renderer().unwrap();
    particles.begin();
    particles.set_transparency(TransparencyMode::AdditiveBlack);
    particles.end();
    assert!(!device.state().depth_mask());
    assert_eq!(device.state().cull_face(), CullFace::None);
    assert_eq!(
        trace.borrow().last_transition(StateKind::Transparency),
        Some(StateChange::Transparency(TransparencyMode::AdditiveBlack))
    );

    let mut ui = device.ui_renderer().unwrap();
    ui.begin();
    ui.draw_primitive(
        PrimitiveType::TriangleStrip,
        &[Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4],
    );
    ui.end();
    assert!(!device.state().depth_test());
}

#[test]
fn object_begin_resets_material_defaults() {
    let (mut device, trace) = device();
    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.set_alpha_scissor(0.5);
    object.end();

    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.end();

    let trace = trace.borrow();
    assert_eq!(
        trace.last_uniform("object", "alpha_scissor"),
        Some(&UniformValue::Float(0.0))
    );
}

#[test]
fn terrain_begin_clears_the_previous_fog() {
    let (mut device, trace) = device();
    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.set_fog(10.0, 20.0, Vec3::ONE);
    terrain.end();

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.end();

    let trace = trace.borrow();
    assert_eq!(
        trace.last_uniform("terrain", "fog_range"),
        Some(&UniformValue::Vec2(glam::Vec2::new(1e6, 1e6)))
    );
    assert_eq!(
        trace.last_uniform("terrain", "fog_color"),
        Some(&UniformValue::Vec3(Vec3::ZERO))
    );
}

#[test]
fn shadow_regions_reach_the_terrain_program() {
    let (mut device, trace) = device();
    let params = [
        ShadowParam::default(),
        ShadowParam {
            matrix: Mat4::from_scale(Vec3::splat(0.5)),
            uv_offset: glam::Vec2::new(0.5, 0.0),
            uv_scale: glam::Vec2::new(0.5, 1.0),
        },
    ];

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.set_shadow_params(&params);
    terrain.end();

    let trace = trace.borrow();
    assert_eq!(
        trace.last_uniform("terrain", "shadow_regions"),
        Some(&UniformValue::Int(2))
    );
    assert_eq!(
        trace.last_uniform("terrain", "shadow_uv"),
        Some(&UniformValue::Vec4Array(vec![
            Vec4::new(0.0, 0.0, 1.0, 1.0),
            Vec4::new(0.5, 0.0, 0.5, 1.0),
        ]))
    );
}
