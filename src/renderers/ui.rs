use bytemuck::Zeroable;
use glam::{Mat4, Vec4};

use super::{Pass, PassProgram, PassRenderer, TextureUnits, WhiteTexture};
use crate::device::backend::UniformValue;
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformKind, UniformLayout};
use crate::device::state::{Color, CullFace, TransparencyMode};
use crate::device::streaming::StreamingBuffer;
use crate::device::texture::Texture;
use crate::device::vertex::{PrimitiveType, Vertex2D, VertexFormat};
use crate::device::DeviceCore;

const IMAGE_UNIT: u32 = 8;

#[derive(Debug, Clone, Copy)]
struct PendingDraw {
    primitive: PrimitiveType,
    first: u32,
    count: u32,
    /// The stream buffer is mapped and must be unmapped.
    mapped: bool,
    /// Vertices were written straight into the mapping.
    direct: bool,
}

/// Screen-space 2D primitives streamed through one ring.
///
/// Vertices are written between [`begin_primitive`](UiPass::begin_primitive)
/// (or `begin_primitives`) and [`end_primitive`](UiPass::end_primitive),
/// which uploads them and issues one draw or one multi-draw.
///
/// [`UiPass`]: super::UiPass
pub struct UiRenderer {
    program: PassProgram,
    white: WhiteTexture,
    units: TextureUnits,
    stream: StreamingBuffer,
    staging: Vec<Vertex2D>,
    firsts: Vec<u32>,
    counts: Vec<u32>,
    pending: Option<PendingDraw>,
}

impl PassRenderer for UiRenderer {
    fn program(&self) -> &PassProgram {
        &self.program
    }
}

impl UiRenderer {
    pub(crate) fn new(core: &mut DeviceCore, library: &ShaderLibrary) -> Self {
        let uniforms = UniformLayout::new(&[
            ("projection_matrix", UniformKind::Mat4),
            ("color", UniformKind::Vec4),
        ]);
        let program = PassProgram::load(
            core.backend.as_mut(),
            library,
            "ui",
            &["preamble"],
            VertexFormat::Vertex2D,
            uniforms,
            &[TextureSlot::color("image", IMAGE_UNIT)],
        );

        let capacity = core.config.ui_stream_capacity;
        Self {
            program,
            white: WhiteTexture::new(core.backend.as_mut()),
            units: TextureUnits::default(),
            stream: StreamingBuffer::new(core.backend.as_mut(), VertexFormat::Vertex2D, capacity),
            staging: Vec::new(),
            firsts: Vec::new(),
            counts: Vec::new(),
            pending: None,
        }
    }

    pub(crate) fn destroy(&mut self, core: &mut DeviceCore) {
        let backend = core.backend.as_mut();
        self.units.unbind_all(backend);
        self.program.destroy(backend);
        self.white.destroy(backend);
        self.stream.destroy(backend);
        self.pending = None;
    }
}

impl Pass<'_, UiRenderer> {
    pub fn begin(&mut self) {
        let backend = self.core.backend.as_mut();
        if !self.renderer.program.begin(backend) {
            return;
        }
        let white = self.renderer.white.handle();
        self.renderer.units.reset(backend, IMAGE_UNIT, white);
        self.set_color(Color::WHITE);
    }

    pub fn end(&mut self) {
        self.renderer.units.unbind_all(self.core.backend.as_mut());
        self.abandon_pending();
        self.renderer.program.end();
    }

    /// Orthographic projection mapping the rectangle to clip space.
    pub fn set_projection(&mut self, left: f32, right: f32, bottom: f32, top: f32) {
        let projection = Mat4::orthographic_rh_gl(left, right, bottom, top, -1.0, 1.0);
        self.uniform("projection_matrix", UniformValue::Mat4(projection));
    }

    /// Invalid textures bind the white texture.
    pub fn set_texture(&mut self, texture: &Texture) {
        let handle = self.renderer.white.or_white(texture);
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), IMAGE_UNIT, handle);
    }

    pub fn set_color(&mut self, color: Color) {
        self.uniform("color", UniformValue::Vec4(Vec4::from(color.to_array())));
    }

    pub fn set_transparency(&mut self, mode: TransparencyMode) {
        self.core.set_transparency(mode);
    }

    pub fn draw_primitive(&mut self, primitive: PrimitiveType, vertices: &[Vertex2D]) {
        let target = self.begin_primitive(primitive, vertices.len() as u32);
        target.copy_from_slice(vertices);
        self.end_primitive();
    }

    pub fn begin_primitive(&mut self, primitive: PrimitiveType, count: u32) -> &mut [Vertex2D] {
        self.begin_primitives(primitive, &[count])
    }

    /// Reserve room for several primitives at once. The returned slice holds
    /// them back to back in the order of `counts`. It is the mapped stream
    /// buffer when the backend allows that, otherwise a scratch copy that
    /// `end_primitive` uploads; its contents are unspecified either way.
    pub fn begin_primitives(&mut self, primitive: PrimitiveType, counts: &[u32]) -> &mut [Vertex2D] {
        self.abandon_pending();
        let total: u32 = counts.iter().sum();
        let renderer = &mut *self.renderer;
        let backend = self.core.backend.as_mut();
        let first = renderer.stream.reserve(backend, total);

        renderer.firsts.clear();
        renderer.counts.clear();
        let mut offset = first;
        for &count in counts {
            renderer.firsts.push(offset);
            renderer.counts.push(count);
            offset += count;
        }

        let mut pending = PendingDraw {
            primitive,
            first,
            count: total,
            mapped: false,
            direct: false,
        };
        if let Some(bytes) = renderer.stream.map(backend, first, total) {
            pending.mapped = true;
            if let Ok(vertices) = bytemuck::try_cast_slice_mut::<u8, Vertex2D>(bytes) {
                pending.direct = true;
                renderer.pending = Some(pending);
                return vertices;
            }
        }

        renderer.pending = Some(pending);
        renderer.staging.clear();
        renderer.staging.resize(total as usize, Vertex2D::zeroed());
        &mut renderer.staging
    }

    /// Upload and draw what the last `begin_primitive` reserved. Returns
    /// false when nothing was reserved.
    pub fn end_primitive(&mut self) -> bool {
        let renderer = &mut *self.renderer;
        let Some(pending) = renderer.pending.take() else {
            return false;
        };
        let backend = self.core.backend.as_mut();
        if pending.mapped {
            renderer.stream.unmap(backend);
        }
        if !pending.direct {
            renderer
                .stream
                .update(backend, pending.first, bytemuck::cast_slice(&renderer.staging));
        }

        if let Some(program) = renderer.program.handle() {
            backend.use_program(Some(program));
        }
        self.core.set_depth_test(false);
        self.core.set_cull_face(CullFace::None);

        let backend = self.core.backend.as_mut();
        if pending.count > 0 && renderer.program.is_ready() {
            renderer.stream.bind(backend);
            if renderer.counts.len() == 1 {
                backend.draw(pending.primitive, pending.first, pending.count);
            } else {
                backend.multi_draw(pending.primitive, &renderer.firsts, &renderer.counts);
            }
        }
        renderer.stream.advance(pending.count);
        true
    }

    /// Drop a reservation that was never ended.
    fn abandon_pending(&mut self) {
        if let Some(pending) = self.renderer.pending.take() {
            if pending.mapped {
                self.renderer.stream.unmap(self.core.backend.as_mut());
            }
        }
    }

    /// Next vertex index the stream will hand out.
    pub fn stream_cursor(&self) -> u32 {
        self.renderer.stream.cursor()
    }

    pub fn stream_capacity(&self) -> u32 {
        self.renderer.stream.capacity()
    }
}
