use std::cell::RefCell;
use std::rc::Rc;

use gfx_device::device::backend::{ClearFlags, StateKind};
use gfx_device::device::headless::Trace;
use gfx_device::device::state::{Color, CullFace, TransparencyMode};
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

#[test]
fn repeated_depth_test_is_issued_once() {
    let (mut device, trace) = device();
    let before = trace.borrow().transitions_of(StateKind::DepthTest);

    for _ in 0..25 {
        device.set_depth_test(true);
    }

    assert_eq!(trace.borrow().transitions_of(StateKind::DepthTest), before + 1);
    assert!(device.state().depth_test());
}

#[test]
fn every_setter_skips_current_values() {
    let (mut device, trace) = device();
    device.set_cull_face(CullFace::Back);
    device.set_transparency(TransparencyMode::Alpha);
    device.set_color_mask(true, false, true, true);
    device.set_clear_color(Color::new(0.2, 0.3, 0.4, 1.0));
    let issued = trace.borrow().transition_count();

    device.set_cull_face(CullFace::Back);
    device.set_transparency(TransparencyMode::Alpha);
    device.set_color_mask(true, false, true, true);
    device.set_clear_color(Color::new(0.2, 0.3, 0.4, 1.0));
    device.set_depth_mask(true);

    assert_eq!(trace.borrow().transition_count(), issued);
}

#[test]
fn second_scene_reuses_the_neutral_state() {
    let (mut device, trace) = device();
    device.begin_scene().unwrap();
    device.end_scene();
    let issued = trace.borrow().transition_count();

    device.begin_scene().unwrap();
    device.end_scene();

    assert_eq!(trace.borrow().transition_count(), issued);
    let trace = trace.borrow();
    assert_eq!(trace.frames_begun, 2);
    assert_eq!(trace.frames_presented, 2);
}

#[test]
fn consecutive_passes_share_state() {
    let (mut device, trace) = device();
    device.begin_scene().unwrap();

    let mut terrain = device.terrain_renderer().unwrap();
    terrain.begin();
    terrain.end();
    let depth_tests = trace.borrow().transitions_of(StateKind::DepthTest);
    let culls = trace.borrow().transitions_of(StateKind::CullFace);

    let mut object = device.object_renderer().unwrap();
    object.begin();
    object.end();

    let trace = trace.borrow();
    assert_eq!(trace.transitions_of(StateKind::DepthTest), depth_tests);
    assert_eq!(trace.transitions_of(StateKind::CullFace), culls);
    assert_eq!(
        trace.last_transition(StateKind::CullFace),
        Some(gfx_device::device::backend::StateChange::CullFace(CullFace::Back))
    );
}

#[test]
fn clear_touches_color_and_depth() {
    let (mut device, trace) = device();
    device.clear();

    let flags = *trace.borrow().clears.last().unwrap();
    assert_eq!(flags, ClearFlags::ALL);
    assert!(flags.contains(ClearFlags::COLOR | ClearFlags::DEPTH));
    assert!(!ClearFlags::DEPTH.contains(ClearFlags::COLOR));
}
