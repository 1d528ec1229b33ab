use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec2};
use gfx_device::device::backend::{ClearFlags, DepthBias, StateChange, StateKind, UniformValue, Viewport};
use gfx_device::device::headless::Trace;
use gfx_device::device::state::ColorMask;
use gfx_device::device::texture::{ImageData, TextureCreateParams};
use gfx_device::device::vertex::{PrimitiveType, Vertex3D};
use gfx_device::{Device, DeviceConfig, HeadlessBackend};

fn device() -> (Device, Rc<RefCell<Trace>>) {
    let backend = HeadlessBackend::new();
    let trace = backend.trace();
    let config = DeviceConfig {
        shader_root: concat!(env!("CARGO_MANIFEST_DIR"), "/shaders").into(),
        ..Default::default()
    };
    let mut device = Device::new(backend, config);
    device.create().expect("headless device");
    (device, trace)
}

fn caster() -> Vec<Vertex3D> {
    vec![
        Vertex3D::new([-1.0, 0.0, -1.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
        Vertex3D::new([-1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
        Vertex3D::new([1.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
    ]
}

#[test]
fn shadow_map_and_region_drive_the_viewport() {
    let (mut device, trace) = device();
    let depth = device.create_depth_texture(512, 512, 24);

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.set_shadow_map(&depth);
    assert_eq!(shadow.viewport(), Viewport::new(0, 0, 512, 512));
    assert_eq!(trace.borrow().viewport, Viewport::new(0, 0, 512, 512));

    shadow.set_shadow_region(Vec2::new(0.5, 0.0), Vec2::new(0.5, 1.0));
    assert_eq!(shadow.viewport(), Viewport::new(256, 0, 256, 512));
    assert_eq!(trace.borrow().viewport, Viewport::new(256, 0, 256, 512));
    shadow.end();
}

#[test]
fn begin_and_end_bracket_the_depth_only_state() {
    let (mut device, trace) = device();
    let depth = device.create_depth_texture(256, 256, 32);

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.set_shadow_map(&depth);
    {
        let trace = trace.borrow();
        assert_eq!(
            trace.depth_bias,
            Some(DepthBias {
                factor: 2.0,
                units: 8.0
            })
        );
        assert!(trace.bound_framebuffer.is_some());
        assert_eq!(
            trace.last_transition(StateKind::ColorMask),
            Some(StateChange::ColorMask(ColorMask::empty()))
        );
        assert_eq!(trace.clears.last(), Some(&ClearFlags::DEPTH));
    }
    assert!(device.state().depth_test());
    assert!(device.state().depth_mask());

    device.shadow_renderer().unwrap().end();

    let trace = trace.borrow();
    assert_eq!(trace.depth_bias, None);
    assert_eq!(trace.bound_framebuffer, None);
    assert_eq!(trace.viewport, Viewport::new(0, 0, 800, 600));
    assert_eq!(device.state().color_mask(), ColorMask::ALL);
}

#[test]
fn transparent_casters_enable_alpha_scissor() {
    let (mut device, trace) = device();
    let depth = device.create_depth_texture(128, 128, 24);
    let mesh = device.create_vertex_buffer(PrimitiveType::Triangles, &caster());

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.set_shadow_map(&depth);
    shadow.set_projection_matrix(Mat4::orthographic_rh_gl(-5.0, 5.0, -5.0, 5.0, 0.1, 50.0));
    shadow.set_model_matrix(Mat4::IDENTITY);

    shadow.draw_object(&mesh, true);
    assert_eq!(
        trace.borrow().last_uniform("shadow_pass", "alpha_scissor"),
        Some(&UniformValue::Int(1))
    );
    shadow.draw_object(&mesh, false);
    assert_eq!(
        trace.borrow().last_uniform("shadow_pass", "alpha_scissor"),
        Some(&UniformValue::Int(0))
    );
    shadow.end();

    let trace = trace.borrow();
    assert_eq!(trace.draws.len(), 2);
    assert!(trace.draws.iter().all(|d| d.framebuffer.is_some()));
    assert!(trace.draws.iter().all(|d| d.viewport == Viewport::new(0, 0, 128, 128)));
}

#[test]
fn incomplete_shadow_target_is_not_fatal() {
    let (mut device, trace) = device();
    let color = device.create_texture(
        Some(&ImageData::solid(64, 64, [0; 4])),
        &TextureCreateParams::default(),
    );
    let mesh = device.create_vertex_buffer(PrimitiveType::Triangles, &caster());

    let mut shadow = device.shadow_renderer().unwrap();
    shadow.begin();
    shadow.set_shadow_map(&color);
    assert_eq!(shadow.viewport(), Viewport::new(0, 0, 64, 64));
    shadow.draw_object(&mesh, false);
    shadow.end();

    assert_eq!(trace.borrow().draws.len(), 1);
}
