use glam::{Mat4, Vec4};

use super::{flip_view_z, Pass, PassProgram, PassRenderer, TextureUnits, WhiteTexture};
use crate::device::backend::UniformValue;
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformKind, UniformLayout};
use crate::device::state::{Color, CullFace, TransparencyMode};
use crate::device::streaming::StreamingBuffer;
use crate::device::texture::Texture;
use crate::device::vertex::{PrimitiveType, VertexFormat, VertexParticle};
use crate::device::DeviceCore;

const PARTICLE_UNIT: u32 = 10;

/// Billboards and trails streamed every frame.
pub struct ParticleRenderer {
    program: PassProgram,
    white: WhiteTexture,
    units: TextureUnits,
    stream: StreamingBuffer,
}

impl PassRenderer for ParticleRenderer {
    fn program(&self) -> &PassProgram {
        &self.program
    }
}

impl ParticleRenderer {
    pub(crate) fn new(core: &mut DeviceCore, library: &ShaderLibrary) -> Self {
        let uniforms = UniformLayout::new(&[
            ("projection_matrix", UniformKind::Mat4),
            ("view_matrix", UniformKind::Mat4),
            ("model_matrix", UniformKind::Mat4),
            ("color", UniformKind::Vec4),
        ]);
        let program = PassProgram::load(
            core.backend.as_mut(),
            library,
            "particle",
            &["preamble"],
            VertexFormat::Particle,
            uniforms,
            &[TextureSlot::color("particle", PARTICLE_UNIT)],
        );

        let capacity = core.config.particle_stream_capacity;
        Self {
            program,
            white: WhiteTexture::new(core.backend.as_mut()),
            units: TextureUnits::default(),
            stream: StreamingBuffer::new(core.backend.as_mut(), VertexFormat::Particle, capacity),
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

impl Pass<'_, ParticleRenderer> {
    /// Depth tested without depth writes, no culling, white texture.
    pub fn begin(&mut self) {
        let backend = self.core.backend.as_mut();
        if !self.renderer.program.begin(backend) {
            return;
        }
        let white = self.renderer.white.handle();
        self.renderer.units.reset(backend, PARTICLE_UNIT, white);

        self.core.set_depth_test(true);
        self.core.set_depth_mask(false);
        self.core.set_cull_face(CullFace::None);

        self.set_model_matrix(Mat4::IDENTITY);
        self.set_color(Color::WHITE);
    }

    pub fn end(&mut self) {
        self.renderer.units.unbind_all(self.core.backend.as_mut());
        self.renderer.program.end();
    }

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.uniform("projection_matrix", UniformValue::Mat4(matrix));
    }

    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        self.uniform("view_matrix", UniformValue::Mat4(flip_view_z(matrix)));
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.uniform("model_matrix", UniformValue::Mat4(matrix));
    }

    pub fn set_color(&mut self, color: Color) {
        self.uniform("color", UniformValue::Vec4(Vec4::from(color.to_array())));
    }

    pub fn set_texture(&mut self, texture: &Texture) {
        let handle = self.renderer.white.or_white(texture);
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), PARTICLE_UNIT, handle);
    }

    pub fn set_transparency(&mut self, mode: TransparencyMode) {
        self.core.set_transparency(mode);
    }

    pub fn draw_particle(&mut self, primitive: PrimitiveType, vertices: &[VertexParticle]) {
        if vertices.is_empty() || !self.is_ready() {
            return;
        }
        let backend = self.core.backend.as_mut();
        let stream = &mut self.renderer.stream;
        let first = stream.write(backend, vertices);
        stream.bind(backend);
        backend.draw(primitive, first, vertices.len() as u32);
    }
}
