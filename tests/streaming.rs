use std::cell::RefCell;
use std::rc::Rc;

use gfx_device::device::headless::Trace;
use gfx_device::device::vertex::{PrimitiveType, Vertex2D, VertexParticle};
use gfx_device::{Device, DeviceConfig, HeadlessBackend};

fn device_with(backend: HeadlessBackend) -> (Device, Rc<RefCell<Trace>>) {
    let trace = backend.trace();
    let config = DeviceConfig {
        shader_root: concat!(env!("CARGO_MANIFEST_DIR"), "/shaders").into(),
        ui_stream_capacity: 131_072,
        particle_stream_capacity: 64,
        ..Default::default()
    };
    let mut device = Device::new(backend, config);
    device.create().expect("headless device");
    (device, trace)
}

fn device() -> (Device, Rc<RefCell<Trace>>) {
    device_with(HeadlessBackend::new())
}

fn sparks(n: usize) -> Vec<VertexParticle> {
    (0..n)
        .map(|i| VertexParticle::new([i as f32, 0.0, 0.0], [0.0, 0.0], [255, 128, 0, 255]))
        .collect()
}

#[test]
fn oversize_ui_request_orphans_and_writes_from_the_start() {
    let (mut device, trace) = device();
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();

    let vertices = ui.begin_primitive(PrimitiveType::Triangles, 200_000);
    assert_eq!(vertices.len(), 200_000);
    vertices[199_999] = Vertex2D::new([1.0, 2.0], [0.5, 0.5], [1, 2, 3, 4]);
    assert!(ui.end_primitive());

    assert_eq!(ui.stream_cursor(), 200_000);
    assert_eq!(ui.stream_capacity(), 262_144);
    ui.end();

    let trace = trace.borrow();
    assert_eq!(trace.orphans, 1);
    assert_eq!(trace.out_of_bounds_accesses, 0);
    let draw = trace.draws.last().unwrap();
    assert_eq!((draw.first, draw.count), (0, 200_000));
}

#[test]
fn overflowing_writes_restart_at_zero() {
    let (mut device, trace) = device();
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();

    let quad = [Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4];
    ui.begin_primitive(PrimitiveType::Triangles, 100_000);
    ui.end_primitive();
    ui.begin_primitive(PrimitiveType::Triangles, 100_000);
    ui.end_primitive();
    ui.draw_primitive(PrimitiveType::TriangleStrip, &quad);

    assert_eq!(ui.stream_cursor(), 100_004);
    assert_eq!(ui.stream_capacity(), 131_072);
    ui.end();

    let trace = trace.borrow();
    let firsts: Vec<u32> = trace.draws.iter().map(|d| d.first).collect();
    assert_eq!(firsts, vec![0, 0, 100_000]);
    assert_eq!(trace.orphans, 1);
    assert_eq!(trace.out_of_bounds_accesses, 0);
    assert_eq!(trace.draws[1].generation, trace.draws[0].generation + 1);
    assert_eq!(trace.draws[2].generation, trace.draws[1].generation);
}

#[test]
fn batched_primitives_issue_one_multi_draw() {
    let (mut device, trace) = device();
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();

    let region = ui.begin_primitives(PrimitiveType::TriangleStrip, &[4, 6, 3]);
    assert_eq!(region.len(), 13);
    ui.end_primitive();
    ui.end();

    let trace = trace.borrow();
    assert_eq!(trace.draws.len(), 3);
    assert!(trace.draws.iter().all(|d| d.batched));
    let ranges: Vec<(u32, u32)> = trace.draws.iter().map(|d| (d.first, d.count)).collect();
    assert_eq!(ranges, vec![(0, 4), (4, 6), (10, 3)]);
}

#[test]
fn end_without_reservation_reports_false() {
    let (mut device, _) = device();
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();
    assert!(!ui.end_primitive());
    ui.end();
}

#[test]
fn streamed_bytes_land_in_the_buffer() {
    let (mut device, trace) = device();
    let mut particles = device.particle_renderer().unwrap();
    particles.begin();
    let data = sparks(6);
    particles.draw_particle(PrimitiveType::Triangles, &data);
    particles.end();

    let trace = trace.borrow();
    let draw = trace.draws.last().unwrap();
    let contents = &trace.buffer_contents[&draw.buffer.unwrap()];
    let bytes: &[u8] = bytemuck::cast_slice(&data);
    assert_eq!(&contents[..bytes.len()], bytes);
    assert!(trace.maps > 0);
}

#[test]
fn refused_map_falls_back_to_a_sub_range_upload() {
    let (mut device, trace) = device_with(HeadlessBackend::new().refusing_maps());
    let mut particles = device.particle_renderer().unwrap();
    particles.begin();
    let data = sparks(6);
    particles.draw_particle(PrimitiveType::Triangles, &data);
    particles.draw_particle(PrimitiveType::Triangles, &data);
    particles.end();

    let trace = trace.borrow();
    assert_eq!(trace.refused_maps, 2);
    assert_eq!(trace.buffer_uploads, 2);
    let draw = trace.draws.last().unwrap();
    assert_eq!(draw.first, 6);
    let stride = std::mem::size_of::<VertexParticle>();
    let contents = &trace.buffer_contents[&draw.buffer.unwrap()];
    let bytes: &[u8] = bytemuck::cast_slice(&data);
    assert_eq!(&contents[6 * stride..12 * stride], bytes);
}

#[test]
fn particle_ring_never_writes_past_capacity() {
    let (mut device, trace) = device();
    let mut particles = device.particle_renderer().unwrap();
    particles.begin();
    for _ in 0..20 {
        particles.draw_particle(PrimitiveType::Triangles, &sparks(30));
    }
    particles.end();

    let trace = trace.borrow();
    assert_eq!(trace.out_of_bounds_accesses, 0);
    assert!(trace.draws.iter().all(|d| d.first + d.count <= 64));
    assert_eq!(trace.orphans, 9);
}

#[test]
fn batched_reservation_writes_straight_into_the_stream() {
    let (mut device, trace) = device();
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();

    let corner = Vertex2D::new([3.0, 4.0], [0.0, 1.0], [9, 8, 7, 6]);
    let region = ui.begin_primitives(PrimitiveType::TriangleStrip, &[4, 2]);
    region[5] = corner;
    assert!(ui.end_primitive());
    ui.end();

    let trace = trace.borrow();
    assert_eq!(trace.maps, 1);
    assert_eq!(trace.buffer_uploads, 0);
    let draw = trace.draws.last().unwrap();
    let contents = &trace.buffer_contents[&draw.buffer.unwrap()];
    let stride = std::mem::size_of::<Vertex2D>();
    assert_eq!(&contents[5 * stride..6 * stride], bytemuck::bytes_of(&corner));
}

#[test]
fn refused_ui_map_uploads_the_scratch_copy_once() {
    let (mut device, trace) = device_with(HeadlessBackend::new().refusing_maps());
    let mut ui = device.ui_renderer().unwrap();
    ui.begin();

    let corner = Vertex2D::new([1.0, 1.0], [1.0, 1.0], [1, 1, 1, 1]);
    let region = ui.begin_primitives(PrimitiveType::Triangles, &[3]);
    region[0] = corner;
    ui.end_primitive();
    ui.end();

    let trace = trace.borrow();
    assert_eq!(trace.refused_maps, 1);
    assert_eq!(trace.buffer_uploads, 1);
    let draw = trace.draws.last().unwrap();
    let contents = &trace.buffer_contents[&draw.buffer.unwrap()];
    assert_eq!(&contents[..std::mem::size_of::<Vertex2D>()], bytemuck::bytes_of(&corner));
}
