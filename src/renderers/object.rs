use glam::{Mat4, Vec2, Vec3, Vec4};
use log::warn;

use super::terrain::{shadow_param_values, ShadowParam, NO_FOG, SCENE_UNIFORMS};
use super::{flip_view_z, normal_matrix, Pass, PassProgram, PassRenderer, TextureUnits, WhiteTexture};
use crate::device::backend::UniformValue;
use crate::device::buffer::VertexBuffer;
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformKind, UniformLayout};
use crate::device::state::{Color, CullFace, TransparencyMode};
use crate::device::streaming::StreamingBuffer;
use crate::device::texture::Texture;
use crate::device::vertex::{PrimitiveType, Vertex3D, VertexFormat};
use crate::device::DeviceCore;

const ALBEDO_UNIT: u32 = 10;
const DETAIL_UNIT: u32 = 11;
const EMISSIVE_UNIT: u32 = 12;
const MATERIAL_UNIT: u32 = 13;
const SHADOW_UNIT: u32 = 14;

/// Lit, textured meshes: static buffers and streamed primitives.
pub struct ObjectRenderer {
    program: PassProgram,
    white: WhiteTexture,
    units: TextureUnits,
    stream: StreamingBuffer,
    firsts: Vec<u32>,
}

impl PassRenderer for ObjectRenderer {
    fn program(&self) -> &PassProgram {
        &self.program
    }
}

impl ObjectRenderer {
    pub(crate) fn new(core: &mut DeviceCore, library: &ShaderLibrary) -> Self {
        let mut fields = SCENE_UNIFORMS.to_vec();
        fields.extend_from_slice(&[
            ("camera_position", UniformKind::Vec3),
            ("albedo_color", UniformKind::Vec4),
            ("emissive_color", UniformKind::Vec4),
            ("material_params", UniformKind::Vec3),
            ("uv_offset", UniformKind::Vec2),
            ("uv_scale", UniformKind::Vec2),
            ("alpha_scissor", UniformKind::Float),
            ("triplanar_mode", UniformKind::Int),
            ("triplanar_scale", UniformKind::Float),
            ("recolor", UniformKind::Int),
            ("recolor_from", UniformKind::Vec3),
            ("recolor_to", UniformKind::Vec3),
            ("recolor_threshold", UniformKind::Float),
            ("lighting", UniformKind::Int),
        ]);

        let program = PassProgram::load(
            core.backend.as_mut(),
            library,
            "object",
            &["preamble", "lighting", "shadow"],
            VertexFormat::Vertex3D,
            UniformLayout::new(&fields),
            &[
                TextureSlot::color("albedo", ALBEDO_UNIT),
                TextureSlot::color("detail", DETAIL_UNIT),
                TextureSlot::color("emissive", EMISSIVE_UNIT),
                TextureSlot::color("material", MATERIAL_UNIT),
                TextureSlot::depth("shadow_map", SHADOW_UNIT),
            ],
        );

        let capacity = core.config.object_stream_capacity;
        Self {
            program,
            white: WhiteTexture::new(core.backend.as_mut()),
            units: TextureUnits::default(),
            stream: StreamingBuffer::new(core.backend.as_mut(), VertexFormat::Vertex3D, capacity),
            firsts: Vec::new(),
        }
    }

    pub(crate) fn destroy(&mut self, core: &mut DeviceCore) {
        let backend = core.backend.as_mut();
        self.units.unbind_all(backend);
        self.program.destroy(backend);
        self.white.destroy(backend);
        self.stream.destroy(backend);
    }
}

impl Pass<'_, ObjectRenderer> {
    /// Bind the program, reset material defaults and enter opaque,
    /// back-face culled, depth tested rendering.
    pub fn begin(&mut self) {
        let backend = self.core.backend.as_mut();
        if !self.renderer.program.begin(backend) {
            return;
        }

        let white = self.renderer.white.handle();
        let units = &mut self.renderer.units;
        for unit in [ALBEDO_UNIT, DETAIL_UNIT, EMISSIVE_UNIT, MATERIAL_UNIT] {
            units.reset(backend, unit, white);
        }
        units.reset(backend, SHADOW_UNIT, None);

        self.core.set_depth_test(true);
        self.core.set_depth_mask(true);
        self.core.set_transparency(TransparencyMode::None);
        self.core.set_cull_face(CullFace::Back);

        self.set_uv_transform(Vec2::ZERO, Vec2::ONE);
        self.set_alpha_scissor(0.0);
        self.set_fog(NO_FOG, NO_FOG, Vec3::ZERO);
        self.set_emissive_color(Color::BLACK);
        self.set_albedo_color(Color::WHITE);
        self.set_material_params(1.0, 0.0, 0.0);
        self.set_recolor(false, Vec3::ZERO, Vec3::ZERO, 0.0);
    }

    pub fn end(&mut self) {
        self.renderer.units.unbind_all(self.core.backend.as_mut());
        self.renderer.program.end();
    }

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.uniform("projection_matrix", UniformValue::Mat4(matrix));
    }

    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        let view = flip_view_z(matrix);
        let camera = view.inverse().w_axis.truncate();
        self.uniform("view_matrix", UniformValue::Mat4(view));
        self.uniform("camera_position", UniformValue::Vec3(camera));
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.uniform("model_matrix", UniformValue::Mat4(matrix));
        self.uniform("normal_matrix", UniformValue::Mat3(normal_matrix(matrix)));
    }

    pub fn set_shadow_matrix(&mut self, matrix: Mat4) {
        self.uniform("shadow_matrix", UniformValue::Mat4(matrix));
    }

    pub fn set_albedo_color(&mut self, color: Color) {
        self.uniform("albedo_color", UniformValue::Vec4(Vec4::from(color.to_array())));
    }

    pub fn set_emissive_color(&mut self, color: Color) {
        self.uniform("emissive_color", UniformValue::Vec4(Vec4::from(color.to_array())));
    }

    pub fn set_albedo_texture(&mut self, texture: &Texture) {
        self.bind_color(ALBEDO_UNIT, texture);
    }

    pub fn set_detail_texture(&mut self, texture: &Texture) {
        self.bind_color(DETAIL_UNIT, texture);
    }

    pub fn set_emissive_texture(&mut self, texture: &Texture) {
        self.bind_color(EMISSIVE_UNIT, texture);
    }

    pub fn set_material_texture(&mut self, texture: &Texture) {
        self.bind_color(MATERIAL_UNIT, texture);
    }

    pub fn set_shadow_map(&mut self, texture: &Texture) {
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), SHADOW_UNIT, texture.handle);
    }

    fn bind_color(&mut self, unit: u32, texture: &Texture) {
        let handle = self.renderer.white.or_white(texture);
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), unit, handle);
    }

    pub fn set_material_params(&mut self, roughness: f32, metalness: f32, ao_strength: f32) {
        self.uniform(
            "material_params",
            UniformValue::Vec3(Vec3::new(roughness, metalness, ao_strength)),
        );
    }

    pub fn set_lighting(&mut self, enabled: bool) {
        self.uniform("lighting", UniformValue::Int(enabled as i32));
    }

    pub fn set_light(&mut self, position: Vec4, intensity: f32, color: Vec3) {
        self.uniform("light_position", UniformValue::Vec4(position));
        self.uniform("light_intensity", UniformValue::Float(intensity));
        self.uniform("light_color", UniformValue::Vec3(color));
    }

    pub fn set_sky(&mut self, color: Color, intensity: f32) {
        self.uniform("sky_color", UniformValue::Vec3(Vec3::new(color.r, color.g, color.b)));
        self.uniform("sky_intensity", UniformValue::Float(intensity));
    }

    pub fn set_shadow_params(&mut self, params: &[ShadowParam]) {
        let (count, transforms, regions) = shadow_param_values(params);
        self.uniform("shadow_regions", UniformValue::Int(count));
        self.uniform("shadow_transforms", transforms);
        self.uniform("shadow_uv", regions);
    }

    pub fn set_fog(&mut self, min: f32, max: f32, color: Vec3) {
        self.uniform("fog_range", UniformValue::Vec2(Vec2::new(min, max)));
        self.uniform("fog_color", UniformValue::Vec3(color));
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        self.core.set_depth_test(enabled);
    }

    pub fn set_depth_mask(&mut self, enabled: bool) {
        self.core.set_depth_mask(enabled);
    }

    pub fn set_cull_face(&mut self, mode: CullFace) {
        self.core.set_cull_face(mode);
    }

    pub fn set_transparency(&mut self, mode: TransparencyMode) {
        self.core.set_transparency(mode);
    }

    pub fn set_uv_transform(&mut self, offset: Vec2, scale: Vec2) {
        self.uniform("uv_offset", UniformValue::Vec2(offset));
        self.uniform("uv_scale", UniformValue::Vec2(scale));
    }

    pub fn set_triplanar_mode(&mut self, enabled: bool) {
        self.uniform("triplanar_mode", UniformValue::Int(enabled as i32));
    }

    pub fn set_triplanar_scale(&mut self, scale: f32) {
        self.uniform("triplanar_scale", UniformValue::Float(scale));
    }

    pub fn set_alpha_scissor(&mut self, alpha: f32) {
        self.uniform("alpha_scissor", UniformValue::Float(alpha));
    }

    /// Replace hues near `from` with `to`. Colors are RGB and uploaded as HSV.
    pub fn set_recolor(&mut self, enabled: bool, from: Vec3, to: Vec3, threshold: f32) {
        self.uniform("recolor", UniformValue::Int(enabled as i32));
        if enabled {
            self.uniform("recolor_from", UniformValue::Vec3(rgb_to_hsv(from)));
            self.uniform("recolor_to", UniformValue::Vec3(rgb_to_hsv(to)));
            self.uniform("recolor_threshold", UniformValue::Float(threshold));
        }
    }

    pub fn draw_object(&mut self, buffer: &VertexBuffer) {
        if buffer.format() != VertexFormat::Vertex3D || !self.is_ready() {
            return;
        }
        buffer.draw(self.core.backend.as_mut());
    }

    pub fn draw_primitive(&mut self, primitive: PrimitiveType, vertices: &[Vertex3D]) {
        self.draw_primitives(primitive, &[vertices.len() as u32], vertices);
    }

    /// Stream `vertices` and draw them as consecutive primitives of `counts`
    /// vertices each, in one batch.
    pub fn draw_primitives(&mut self, primitive: PrimitiveType, counts: &[u32], vertices: &[Vertex3D]) {
        let total: u32 = counts.iter().sum();
        if total == 0 || !self.is_ready() {
            return;
        }
        if total as usize > vertices.len() {
            warn!(
                "Primitive counts need {} vertices, only {} given",
                total,
                vertices.len()
            );
            return;
        }

        let backend = self.core.backend.as_mut();
        let renderer = &mut *self.renderer;
        let base = renderer.stream.write(backend, &vertices[..total as usize]);
        renderer.stream.bind(backend);

        if counts.len() == 1 {
            backend.draw(primitive, base, total);
            return;
        }
        renderer.firsts.clear();
        let mut first = base;
        for &count in counts {
            renderer.firsts.push(first);
            first += count;
        }
        backend.multi_draw(primitive, &renderer.firsts, counts);
    }
}

/// Hue, saturation and value, all in `[0, 1]`.
fn rgb_to_hsv(rgb: Vec3) -> Vec3 {
    let max = rgb.max_element();
    let min = rgb.min_element();
    let delta = max - min;
    if max <= 0.0 || delta <= 0.0 {
        let saturation = if max > 0.0 { delta / max } else { 0.0 };
        return Vec3::new(0.0, saturation, max);
    }

    let sector = if rgb.x == max {
        (rgb.y - rgb.z) / delta
    } else if rgb.y == max {
        2.0 + (rgb.z - rgb.x) / delta
    } else {
        4.0 + (rgb.x - rgb.y) / delta
    };
    let mut hue = sector * 60.0;
    if hue < 0.0 {
        hue += 360.0;
    }
    Vec3::new(hue / 360.0, delta / max, max)
}
