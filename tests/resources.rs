use std::cell::RefCell;
use std::rc::Rc;

use gfx_device::device::backend::{TexFilter, TextureKind, Viewport};
use gfx_device::device::framebuffer::{FramebufferParams, DEFAULT_FRAMEBUFFER};
use gfx_device::device::headless::{TextureCopy, Trace};
use gfx_device::device::state::Color;
use gfx_device::device::texture::{ImageData, TexFormat, TextureCreateParams};
use gfx_device::device::vertex::{PrimitiveType, Vertex2D, Vertex3D};
use gfx_device::settings::Resolution;
use gfx_device::{Capabilities, Device, DeviceConfig, DeviceError, HeadlessBackend};

fn config() -> DeviceConfig {
    DeviceConfig {
        shader_root: concat!(env!("CARGO_MANIFEST_DIR"), "/shaders").into(),
        ..Default::default()
    }
}

fn device_with(backend: HeadlessBackend) -> (Device, Rc<RefCell<Trace>>) {
    let trace = backend.trace();
    let mut device = Device::new(backend, config());
    device.create().expect("headless device");
    (device, trace)
}

fn device() -> (Device, Rc<RefCell<Trace>>) {
    device_with(HeadlessBackend::new())
}

fn triangle() -> Vec<Vertex3D> {
    vec![
        Vertex3D::new([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
        Vertex3D::new([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
        Vertex3D::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
    ]
}

#[test]
fn missing_pixels_give_an_invalid_texture() {
    let (mut device, _) = device();
    let texture = device.create_texture(None, &TextureCreateParams::default());

    assert!(!texture.is_valid());
    assert_eq!(device.live_texture_count(), 0);
}

#[test]
fn malformed_pixels_give_an_invalid_texture() {
    let (mut device, _) = device();
    let image = ImageData::rgba(4, 4, vec![0; 7]);
    let texture = device.create_texture(Some(&image), &TextureCreateParams::default());

    assert!(!texture.is_valid());
}

#[test]
fn mipmaps_and_anisotropy_only_when_requested() {
    let (mut device, trace) = device();
    let image = ImageData::solid(16, 16, [255, 0, 0, 255]);

    let plain = device.create_texture(Some(&image), &TextureCreateParams::default());
    assert_eq!(plain.mip_levels, 1);
    assert_eq!(trace.borrow().mipmaps_generated, 0);

    let params = TextureCreateParams {
        filter: TexFilter::Trilinear,
        mipmap: true,
        anisotropy: 64,
        ..Default::default()
    };
    let filtered = device.create_texture(Some(&image), &params);
    assert_eq!(filtered.mip_levels, 5);

    let trace = trace.borrow();
    assert_eq!(trace.mipmaps_generated, 1);
    let desc = trace.live_textures[&filtered.handle.unwrap()];
    assert!(matches!(desc.kind, TextureKind::Color { anisotropy: 16, .. }));
}

#[test]
fn anisotropy_is_ignored_without_support() {
    let backend = HeadlessBackend::new().with_capabilities(Capabilities {
        anisotropy_supported: false,
        max_anisotropy: 1,
        max_samples: 4,
        max_texture_size: 4096,
        max_renderbuffer_size: 4096,
        shadow_mapping_supported: true,
        framebuffer_supported: true,
    });
    let (mut device, trace) = device_with(backend);
    let params = TextureCreateParams {
        anisotropy: 8,
        ..Default::default()
    };
    let texture = device.create_texture(Some(&ImageData::solid(2, 2, [0; 4])), &params);

    assert!(!device.is_anisotropy_supported());
    let desc = trace.borrow().live_textures[&texture.handle.unwrap()];
    assert!(matches!(desc.kind, TextureKind::Color { anisotropy: 1, .. }));
}

#[test]
fn updates_stay_inside_the_texture() {
    let (mut device, trace) = device();
    let texture = device.create_texture(
        Some(&ImageData::solid(8, 8, [0; 4])),
        &TextureCreateParams::default(),
    );

    device.update_texture(&texture, (4, 4), &ImageData::solid(4, 4, [9; 4]), TexFormat::Rgba);
    device.update_texture(&texture, (6, 6), &ImageData::solid(4, 4, [9; 4]), TexFormat::Rgba);

    assert_eq!(trace.borrow().texture_updates, 1);
}

#[test]
fn far_offsets_are_rejected_without_overflow() {
    let (mut device, trace) = device();
    let texture = device.create_texture(
        Some(&ImageData::solid(8, 8, [0; 4])),
        &TextureCreateParams::default(),
    );

    let patch = ImageData::solid(2, 2, [9; 4]);
    device.update_texture(&texture, (u32::MAX, 0), &patch, TexFormat::Auto);
    device.update_texture(&texture, (0, u32::MAX - 1), &patch, TexFormat::Auto);

    assert_eq!(trace.borrow().texture_updates, 0);
}

#[test]
fn huge_dimensions_give_an_invalid_texture() {
    let (mut device, _) = device();
    let live = device.live_texture_count();

    let claimed = ImageData::new(65536, 65536, 4, vec![0; 16]);
    let texture = device.create_texture(Some(&claimed), &TextureCreateParams::default());
    assert!(!texture.is_valid());

    let absurd = ImageData::new(u32::MAX, u32::MAX, 4, vec![0; 16]);
    let texture = device.create_texture(Some(&absurd), &TextureCreateParams::default());
    assert!(!texture.is_valid());

    assert_eq!(device.live_texture_count(), live);
}

#[test]
fn destroying_a_texture_twice_is_harmless() {
    let (mut device, trace) = device();
    let texture = device.create_texture(
        Some(&ImageData::solid(2, 2, [0; 4])),
        &TextureCreateParams::default(),
    );
    let live = trace.borrow().live_textures.len();

    device.destroy_texture(&texture);
    device.destroy_texture(&texture);

    assert_eq!(device.live_texture_count(), 0);
    assert_eq!(trace.borrow().live_textures.len(), live - 1);
}

#[test]
fn framebuffer_names_are_unique() {
    let (mut device, _) = device();
    let params = FramebufferParams {
        width: 256,
        height: 128,
        ..Default::default()
    };
    assert!(device.create_framebuffer("reflection", params).is_some());

    let bigger = FramebufferParams {
        width: 512,
        height: 512,
        ..Default::default()
    };
    assert!(device.create_framebuffer("reflection", bigger).is_none());

    let existing = device.get_framebuffer("reflection").unwrap();
    assert_eq!((existing.width(), existing.height()), (256, 128));
    assert!(device.create_framebuffer(DEFAULT_FRAMEBUFFER, params).is_none());
}

#[test]
fn default_framebuffer_survives_delete_and_resize() {
    let (mut device, trace) = device();
    device.delete_framebuffer(DEFAULT_FRAMEBUFFER);
    assert!(device.get_framebuffer(DEFAULT_FRAMEBUFFER).is_some());

    let mut config = device.config().clone();
    config.size = Resolution {
        width: 1280,
        height: 720,
    };
    device.config_changed(config);

    let default = device.get_framebuffer(DEFAULT_FRAMEBUFFER).unwrap();
    assert!(default.is_default());
    assert_eq!((default.width(), default.height()), (1280, 720));
    assert_eq!(trace.borrow().surface_size, (1280, 720));
    assert_eq!(trace.borrow().viewport, Viewport::new(0, 0, 1280, 720));
}

#[test]
fn offscreen_target_binds_and_blits() {
    let (mut device, trace) = device();
    device
        .create_framebuffer(
            "minimap",
            FramebufferParams {
                width: 64,
                height: 64,
                ..Default::default()
            },
        )
        .unwrap();
    let handle = device.get_framebuffer("minimap").unwrap().handle();

    assert!(device.bind_framebuffer("minimap"));
    assert_eq!(trace.borrow().bound_framebuffer, handle);
    assert_eq!(trace.borrow().viewport, Viewport::new(0, 0, 64, 64));

    device.unbind_framebuffer();
    assert_eq!(trace.borrow().bound_framebuffer, None);

    device.copy_framebuffer_to_screen("minimap", Viewport::new(0, 0, 64, 64));
    assert_eq!(trace.borrow().blits, 1);
    assert!(!device.bind_framebuffer("missing"));
}

#[test]
fn deleted_framebuffer_releases_its_textures() {
    let (mut device, trace) = device();
    device.create_framebuffer(
        "bloom",
        FramebufferParams {
            width: 32,
            height: 32,
            depth_texture: true,
            ..Default::default()
        },
    );
    assert_eq!(device.live_texture_count(), 2);

    device.delete_framebuffer("bloom");

    assert_eq!(device.live_texture_count(), 0);
    assert!(device.get_framebuffer("bloom").is_none());
    assert!(trace.borrow().live_framebuffers.is_empty());
}

#[test]
fn updating_a_buffer_with_another_format_is_refused() {
    let (mut device, trace) = device();
    let mut buffer = device.create_vertex_buffer(PrimitiveType::Triangles, &triangle());
    let quad = [Vertex2D::new([0.0, 0.0], [0.0, 0.0], [255; 4]); 4];

    device.update_vertex_buffer(&mut buffer, PrimitiveType::TriangleStrip, &quad);
    assert_eq!(buffer.vertex_count(), 3);
    assert_eq!(buffer.primitive_type(), PrimitiveType::Triangles);

    let mut grown = triangle();
    grown.extend(triangle());
    device.update_vertex_buffer(&mut buffer, PrimitiveType::Triangles, &grown);
    assert_eq!(buffer.vertex_count(), 6);
    assert_eq!(trace.borrow().orphans, 1);
}

#[test]
fn destroy_releases_everything_and_can_repeat() {
    let (mut device, trace) = device();
    device.create_texture(
        Some(&ImageData::solid(4, 4, [0; 4])),
        &TextureCreateParams::default(),
    );
    device.create_depth_texture(128, 128, 24);
    device.create_vertex_buffer(PrimitiveType::Triangles, &triangle());
    device.create_framebuffer("offscreen", FramebufferParams::default());

    device.destroy();

    assert_eq!(device.live_texture_count(), 0);
    assert_eq!(device.live_buffer_count(), 0);
    {
        let trace = trace.borrow();
        assert!(trace.live_textures.is_empty());
        assert!(trace.live_buffers.is_empty());
        assert!(trace.live_framebuffers.is_empty());
        assert!(trace.live_programs.is_empty());
    }

    device.destroy();
    assert_eq!(device.live_texture_count(), 0);
    assert!(device.shadow_renderer().is_none());
}

#[test]
fn creating_again_replaces_the_pass_renderers() {
    let (mut device, trace) = device();
    let counts = |trace: &Trace| {
        (
            trace.live_programs.len(),
            trace.live_textures.len(),
            trace.live_buffers.len(),
            trace.live_framebuffers.len(),
        )
    };
    let first = counts(&trace.borrow());

    device.create().expect("second create");
    assert_eq!(counts(&trace.borrow()), first);

    device.destroy();
    let trace = trace.borrow();
    assert!(trace.live_programs.is_empty());
    assert!(trace.live_textures.is_empty());
    assert!(trace.live_buffers.is_empty());
    assert!(trace.live_framebuffers.is_empty());
}

#[test]
fn failed_initialization_reports_a_message() {
    let backend = HeadlessBackend::new().with_init_failure("no GL context");
    let mut device = Device::new(backend, config());

    let err = device.create().unwrap_err();

    assert!(matches!(err, DeviceError::Init(_)));
    assert!(device.error_message().contains("no GL context"));
    assert!(device.ui_renderer().is_none());
}

#[test]
fn tiny_texture_limit_is_unsupported() {
    let backend = HeadlessBackend::new().with_capabilities(Capabilities {
        anisotropy_supported: false,
        max_anisotropy: 1,
        max_samples: 1,
        max_texture_size: 512,
        max_renderbuffer_size: 512,
        shadow_mapping_supported: true,
        framebuffer_supported: true,
    });
    let mut device = Device::new(backend, config());

    assert!(matches!(device.create(), Err(DeviceError::Unsupported(_))));
    assert!(!device.error_message().is_empty());
}

#[test]
fn capabilities_are_cached_at_creation() {
    let (device, _) = device();
    assert_eq!(device.max_texture_size(), 8192);
    assert_eq!(device.max_samples(), 8);
    assert_eq!(device.max_anisotropy_level(), 16);
    assert!(device.is_shadow_mapping_supported());
    assert!(device.is_framebuffer_supported());
}

#[test]
fn framebuffer_copy_lands_in_the_texture() {
    let (mut device, trace) = device();
    let image = ImageData::solid(64, 64, [0, 0, 0, 255]);
    let texture = device.create_texture(Some(&image), &TextureCreateParams::default());
    device
        .create_framebuffer(
            "reflection",
            FramebufferParams {
                width: 128,
                height: 128,
                ..Default::default()
            },
        )
        .unwrap();
    let source = device.get_framebuffer("reflection").unwrap().handle();

    assert!(device.bind_framebuffer("reflection"));
    device.copy_framebuffer_to_texture(&texture, (16, 8), Viewport::new(0, 0, 32, 32));

    assert_eq!(
        trace.borrow().texture_copies,
        vec![TextureCopy {
            source,
            texture: texture.handle.unwrap(),
            offset: (16, 8),
            src: Viewport::new(0, 0, 32, 32),
        }]
    );
}

#[test]
fn framebuffer_copy_outside_the_texture_is_dropped() {
    let (mut device, trace) = device();
    let image = ImageData::solid(16, 16, [0, 0, 0, 255]);
    let texture = device.create_texture(Some(&image), &TextureCreateParams::default());

    device.copy_framebuffer_to_texture(&texture, (8, 0), Viewport::new(0, 0, 16, 16));
    device.copy_framebuffer_to_texture(&texture, (u32::MAX, 0), Viewport::new(0, 0, 1, 1));
    device.copy_framebuffer_to_texture(&texture, (0, 0), Viewport::new(-4, 0, 8, 8));
    device.copy_framebuffer_to_texture(&texture, (0, 0), Viewport::new(0, 0, 0, 8));

    let missing = device.create_texture(None, &TextureCreateParams::default());
    device.copy_framebuffer_to_texture(&missing, (0, 0), Viewport::new(0, 0, 4, 4));

    assert!(trace.borrow().texture_copies.is_empty());
}

#[test]
fn framebuffer_is_not_copied_into_its_own_texture() {
    let (mut device, trace) = device();
    device
        .create_framebuffer(
            "minimap",
            FramebufferParams {
                width: 64,
                height: 64,
                ..Default::default()
            },
        )
        .unwrap();
    let own = device.get_framebuffer("minimap").unwrap().color_texture().unwrap();

    device.bind_framebuffer("minimap");
    device.copy_framebuffer_to_texture(&own, (0, 0), Viewport::new(0, 0, 8, 8));

    assert!(trace.borrow().texture_copies.is_empty());
}

#[test]
fn screenshot_reads_the_window_clear_color() {
    let (mut device, trace) = device_with(HeadlessBackend::new().with_surface_size(40, 30));
    device.set_clear_color(Color::new(1.0, 0.0, 0.0, 1.0));
    device.clear();

    let shot = device.framebuffer_pixels().unwrap();
    assert_eq!((shot.width, shot.height, shot.channels), (40, 30, 4));
    assert_eq!(shot.pixels.len(), 40 * 30 * 4);
    assert!(shot.pixels.chunks_exact(4).all(|texel| texel == [255, 0, 0, 255]));
    assert_eq!(trace.borrow().pixel_reads, 1);
}

#[test]
fn pixels_follow_the_bound_framebuffer() {
    let (mut device, _) = device();
    device
        .create_framebuffer(
            "bloom",
            FramebufferParams {
                width: 8,
                height: 4,
                ..Default::default()
            },
        )
        .unwrap();
    device.bind_framebuffer("bloom");

    let pixels = device.framebuffer_pixels().unwrap();
    assert_eq!((pixels.width, pixels.height), (8, 4));

    device.unbind_framebuffer();
    let window = device.framebuffer_pixels().unwrap();
    assert_eq!((window.width, window.height), (800, 600));
}
