use glam::{Mat4, Vec2};
use log::error;

use super::{flip_view_z, Pass, PassProgram, PassRenderer, TextureUnits};
use crate::device::backend::{
    ClearFlags, DepthBias, FramebufferDesc, FramebufferHandle, UniformValue, Viewport,
};
use crate::device::buffer::VertexBuffer;
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformKind, UniformLayout};
use crate::device::state::{ColorMask, CullFace, TransparencyMode};
use crate::device::texture::Texture;
use crate::device::vertex::VertexFormat;
use crate::device::DeviceCore;

const ALPHA_UNIT: u32 = 0;

/// Offset applied while rendering casters, slope scaled then constant.
const SHADOW_DEPTH_BIAS: DepthBias = DepthBias {
    factor: 2.0,
    units: 8.0,
};

/// Renders depth from the light's point of view into a caller-owned depth
/// texture, optionally into a sub-region of it.
pub struct ShadowRenderer {
    program: PassProgram,
    framebuffer: Option<FramebufferHandle>,
    width: u32,
    height: u32,
    viewport: Viewport,
    units: TextureUnits,
}

impl PassRenderer for ShadowRenderer {
    fn program(&self) -> &PassProgram {
        &self.program
    }
}

impl ShadowRenderer {
    pub(crate) fn new(core: &mut DeviceCore, library: &ShaderLibrary) -> Self {
        let uniforms = UniformLayout::new(&[
            ("projection_matrix", UniformKind::Mat4),
            ("view_matrix", UniformKind::Mat4),
            ("model_matrix", UniformKind::Mat4),
            ("alpha_scissor", UniformKind::Int),
        ]);
        let program = PassProgram::load(
            core.backend.as_mut(),
            library,
            "shadow_pass",
            &["preamble"],
            VertexFormat::Vertex3D,
            uniforms,
            &[TextureSlot::color("alpha", ALPHA_UNIT)],
        );

        let size = core.config.shadow_map_size;
        let desc = FramebufferDesc {
            width: size,
            height: size,
            depth_bits: 0,
            samples: 1,
            color_texture: None,
            depth_texture: None,
            color_attachment: false,
        };
        let framebuffer = match core.backend.create_framebuffer(&desc) {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("Could not create shadow framebuffer: {}", err);
                None
            }
        };

        Self {
            program,
            framebuffer,
            width: size,
            height: size,
            viewport: Viewport::new(0, 0, size as i32, size as i32),
            units: TextureUnits::default(),
        }
    }

    pub(crate) fn destroy(&mut self, core: &mut DeviceCore) {
        self.units.unbind_all(core.backend.as_mut());
        self.program.destroy(core.backend.as_mut());
        if let Some(framebuffer) = self.framebuffer.take() {
            core.backend.destroy_framebuffer(framebuffer);
        }
    }
}

impl Pass<'_, ShadowRenderer> {
    pub fn begin(&mut self) {
        let backend = self.core.backend.as_mut();
        if !self.renderer.program.begin(backend) {
            return;
        }

        let viewport = Viewport::new(
            0,
            0,
            self.renderer.width as i32,
            self.renderer.height as i32,
        );
        self.renderer.viewport = viewport;
        backend.set_viewport(viewport);
        backend.bind_framebuffer(self.renderer.framebuffer);
        backend.set_depth_bias(Some(SHADOW_DEPTH_BIAS));

        self.core.set_color_mask(ColorMask::empty());
        self.core.set_depth_test(true);
        self.core.set_depth_mask(true);
        self.core.set_transparency(TransparencyMode::None);
        self.core.set_cull_face(CullFace::None);
    }

    pub fn end(&mut self) {
        let backend = self.core.backend.as_mut();
        if let Some(framebuffer) = self.renderer.framebuffer {
            backend.attach_depth(framebuffer, None);
        }
        backend.bind_framebuffer(None);
        backend.set_depth_bias(None);
        let (width, height) = backend.surface_size();
        backend.set_viewport(Viewport::new(0, 0, width as i32, height as i32));
        self.renderer.units.unbind_all(backend);

        self.core.set_color_mask(ColorMask::ALL);
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

    /// Texture whose alpha cuts holes in transparent casters.
    pub fn set_texture(&mut self, texture: &Texture) {
        self.renderer
            .units
            .bind(self.core.backend.as_mut(), ALPHA_UNIT, texture.handle);
    }

    /// Render into `texture` from now on. Resets the viewport to the whole
    /// texture and clears its depth.
    pub fn set_shadow_map(&mut self, texture: &Texture) {
        let Some(framebuffer) = self.renderer.framebuffer else {
            return;
        };

        if !self
            .core
            .backend
            .attach_depth(framebuffer, texture.handle)
        {
            error!(
                "Shadow framebuffer incomplete after attaching {:?}",
                texture.handle
            );
        }

        let (width, height) = texture.size;
        self.renderer.width = width;
        self.renderer.height = height;
        let viewport = Viewport::new(0, 0, width as i32, height as i32);
        self.renderer.viewport = viewport;
        self.core.backend.set_viewport(viewport);
        self.core.clear(ClearFlags::DEPTH);
    }

    /// Restrict rendering to a fraction of the shadow map, for split maps
    /// sharing one texture.
    pub fn set_shadow_region(&mut self, offset: Vec2, scale: Vec2) {
        let (width, height) = (self.renderer.width as f32, self.renderer.height as f32);
        let viewport = Viewport::new(
            (width * offset.x) as i32,
            (height * offset.y) as i32,
            (width * scale.x) as i32,
            (height * scale.y) as i32,
        );
        self.renderer.viewport = viewport;
        self.core.backend.set_viewport(viewport);
    }

    pub fn viewport(&self) -> Viewport {
        self.renderer.viewport
    }

    /// Draw a 3D buffer as a caster. Buffers of other formats are skipped.
    pub fn draw_object(&mut self, buffer: &VertexBuffer, transparent: bool) {
        if buffer.format() != VertexFormat::Vertex3D || !self.is_ready() {
            return;
        }
        self.uniform("alpha_scissor", UniformValue::Int(transparent as i32));
        buffer.draw(self.core.backend.as_mut());
    }
}
