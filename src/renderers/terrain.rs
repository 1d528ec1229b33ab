use glam::{Mat4, Vec2, Vec3, Vec4};

use super::{flip_view_z, normal_matrix, Pass, PassProgram, PassRenderer, TextureUnits, WhiteTexture};
use crate::device::backend::UniformValue;
use crate::device::buffer::VertexBuffer;
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformKind, UniformLayout};
use crate::device::state::{Color, CullFace, TransparencyMode};
use crate::device::texture::Texture;
use crate::device::vertex::VertexFormat;
use crate::device::DeviceCore;

pub const MAX_SHADOW_REGIONS: usize = 4;

const PRIMARY_UNIT: u32 = 10;
const SECONDARY_UNIT: u32 = 11;
const SHADOW_UNIT: u32 = 12;

/// Fog range that keeps everything unfogged.
pub(super) const NO_FOG: f32 = 1e6;

/// Lighting, fog and shadow lookup uniforms shared by the lit passes.
pub(super) const SCENE_UNIFORMS: &[(&str, UniformKind)] = &[
    ("projection_matrix", UniformKind::Mat4),
    ("view_matrix", UniformKind::Mat4),
    ("shadow_matrix", UniformKind::Mat4),
    ("model_matrix", UniformKind::Mat4),
    ("normal_matrix", UniformKind::Mat3),
    ("light_position", UniformKind::Vec4),
    ("light_intensity", UniformKind::Float),
    ("light_color", UniformKind::Vec3),
    ("sky_color", UniformKind::Vec3),
    ("sky_intensity", UniformKind::Float),
    ("fog_range", UniformKind::Vec2),
    ("fog_color", UniformKind::Vec3),
    ("shadow_regions", UniformKind::Int),
    ("shadow_transforms", UniformKind::Mat4Array(MAX_SHADOW_REGIONS as u32)),
    // xy offset, zw scale
    ("shadow_uv", UniformKind::Vec4Array(MAX_SHADOW_REGIONS as u32)),
];

/// One region of a split shadow map: light transform and where it lives in
/// the shared texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowParam {
    pub matrix: Mat4,
    pub uv_offset: Vec2,
    pub uv_scale: Vec2,
}

impl Default for ShadowParam {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
            uv_offset: Vec2::ZERO,
            uv_scale: Vec2::ONE,
        }
    }
}

/// Upload up to [`MAX_SHADOW_REGIONS`] regions, returning how many were used.
pub(super) fn shadow_param_values(params: &[ShadowParam]) -> (i32, UniformValue, UniformValue) {
    let used = &params[..params.len().min(MAX_SHADOW_REGIONS)];
    let transforms = used.iter().map(|p| p.matrix).collect();
    let regions = used
        .iter()
        .map(|p| Vec4::new(p.uv_offset.x, p.uv_offset.y, p.uv_scale.x, p.uv_scale.y))
        .collect();
    (
        used.len() as i32,
        UniformValue::Mat4Array(transforms),
        UniformValue::Vec4Array(regions),
    )
}

pub struct TerrainRenderer {
    program: PassProgram,
    white: WhiteTexture,
    units: TextureUnits,
}

impl PassRenderer for TerrainRenderer {
    fn program(&self) -> &PassProgram {
        &self.program
    }
}

impl TerrainRenderer {
    pub(crate) fn new(core: &mut DeviceCore, library: &ShaderLibrary) -> Self {
        let mut fields = SCENE_UNIFORMS.to_vec();
        fields.push(("camera_matrix", UniformKind::Mat4));

        let program = PassProgram::load(
            core.backend.as_mut(),
            library,
            "terrain",
            &["preamble", "lighting", "shadow"],
            VertexFormat::Vertex3D,
            UniformLayout::new(&fields),
            &[
                TextureSlot::color("primary", PRIMARY_UNIT),
                TextureSlot::color("secondary", SECONDARY_UNIT),
                TextureSlot::depth("shadow_map", SHADOW_UNIT),
            ],
        );

        Self {
            program,
            white: WhiteTexture::new(core.backend.as_mut()),
            units: TextureUnits::default(),
        }
    }

    pub(crate) fn destroy(&mut self, core: &mut DeviceCore) {
        self.units.unbind_all(core.backend.as_mut());
        self.program.destroy(core.backend.as_mut());
        self.white.destroy(core.backend.as_mut());
    }
}

impl Pass<'_, TerrainRenderer> {
    pub fn begin(&mut self) {
        let backend = self.core.backend.as_mut();
        if !self.renderer.program.begin(backend) {
            return;
        }

        self.core.set_depth_test(true);
        self.core.set_depth_mask(true);
        self.core.set_cull_face(CullFace::Back);
        self.core.set_transparency(TransparencyMode::None);

        let backend = self.core.backend.as_mut();
        let white = self.renderer.white.handle();
        let units = &mut self.renderer.units;
        units.reset(backend, PRIMARY_UNIT, white);
        units.reset(backend, SECONDARY_UNIT, white);
        units.reset(backend, SHADOW_UNIT, None);

        self.set_fog(NO_FOG, NO_FOG, Vec3::ZERO);
    }

    pub fn end(&mut self) {
        self.renderer.units.unbind_all(self.core.backend.as_mut());
        self.renderer.program.end();
    }

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.uniform("projection_matrix", UniformValue::Mat4(matrix));
    }

    /// Also derives the camera matrix from the flipped view.
    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        let view = flip_view_z(matrix);
        self.uniform("view_matrix", UniformValue::Mat4(view));
        self.uniform("camera_matrix", UniformValue::Mat4(view.inverse()));
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.uniform("model_matrix", UniformValue::Mat4(matrix));
        self.uniform("normal_matrix", UniformValue::Mat3(normal_matrix(matrix)));
    }

    pub fn set_shadow_matrix(&mut self, matrix: Mat4) {
        self.uniform("shadow_matrix", UniformValue::Mat4(matrix));
    }

    pub fn set_primary_texture(&mut self, texture: &Texture) {
        let handle = self.renderer.white.or_white(texture);
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), PRIMARY_UNIT, handle);
    }

    pub fn set_secondary_texture(&mut self, texture: &Texture) {
        let handle = self.renderer.white.or_white(texture);
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), SECONDARY_UNIT, handle);
    }

    pub fn set_shadow_map(&mut self, texture: &Texture) {
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), SHADOW_UNIT, texture.handle);
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

    /// Draw a 3D buffer with `matrix` as its model transform.
    pub fn draw_object(&mut self, matrix: Mat4, buffer: &VertexBuffer) {
        if buffer.format() != VertexFormat::Vertex3D || !self.is_ready() {
            return;
        }
        self.set_model_matrix(matrix);
        buffer.draw(self.core.backend.as_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_params_are_capped() {
        let params = vec![ShadowParam::default(); 6];
        let (count, transforms, regions) = shadow_param_values(&params);
        assert_eq!(count, 4);
        assert!(matches!(transforms, UniformValue::Mat4Array(m) if m.len() == 4));
        assert!(matches!(regions, UniformValue::Vec4Array(v) if v[0] == Vec4::new(0.0, 0.0, 1.0, 1.0)));
    }
}
