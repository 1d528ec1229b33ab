//! Pass renderers: one shader program each, fed by the device.
//!
//! A renderer owns its program, uniform locations and the texture units it
//! binds. The device core (backend, state cache, registry) is lent to it for
//! the duration of a [`Pass`] borrow, so two devices never share renderer
//! state.

mod object;
mod particle;
mod shadow;
mod terrain;
mod ui;

use std::collections::{BTreeMap, HashMap};

use log::{error, info, warn};

use crate::device::backend::{Backend, ProgramHandle, TextureHandle, UniformLocation, UniformValue};
use crate::device::shader::{ShaderLibrary, TextureSlot, UniformLayout};
use crate::device::texture::Texture;
use crate::device::vertex::VertexFormat;
use crate::device::DeviceCore;

pub use object::ObjectRenderer;
pub use particle::ParticleRenderer;
pub use shadow::ShadowRenderer;
pub use terrain::{ShadowParam, TerrainRenderer, MAX_SHADOW_REGIONS};
pub use ui::UiRenderer;

/// A renderer paired with the device internals it drives.
pub struct Pass<'a, R> {
    renderer: &'a mut R,
    core: &'a mut DeviceCore,
}

impl<'a, R> Pass<'a, R> {
    pub(crate) fn new(renderer: &'a mut R, core: &'a mut DeviceCore) -> Self {
        Self { renderer, core }
    }
}

impl<R: PassRenderer> Pass<'_, R> {
    pub fn phase(&self) -> PassPhase {
        self.renderer.program().phase()
    }

    /// False when the program failed to build; such a pass draws nothing.
    pub fn is_ready(&self) -> bool {
        self.renderer.program().is_ready()
    }

    fn uniform(&mut self, name: &str, value: UniformValue) {
        self.renderer
            .program()
            .set(self.core.backend.as_mut(), name, value);
    }
}

pub type ShadowPass<'a> = Pass<'a, ShadowRenderer>;
pub type TerrainPass<'a> = Pass<'a, TerrainRenderer>;
pub type ObjectPass<'a> = Pass<'a, ObjectRenderer>;
pub type ParticlePass<'a> = Pass<'a, ParticleRenderer>;
pub type UiPass<'a> = Pass<'a, UiRenderer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    /// Program missing or failed to compile.
    Uninitialized,
    Ready,
    /// Between `begin` and `end`.
    Begun,
}

pub trait PassRenderer {
    fn program(&self) -> &PassProgram;
}

/// A compiled pass program and its uniform locations.
pub struct PassProgram {
    name: String,
    handle: Option<ProgramHandle>,
    locations: HashMap<&'static str, UniformLocation>,
    phase: PassPhase,
}

impl PassProgram {
    pub(crate) fn load(
        backend: &mut dyn Backend,
        library: &ShaderLibrary,
        name: &str,
        fragments: &[&str],
        vertex_format: VertexFormat,
        uniforms: UniformLayout,
        textures: &[TextureSlot],
    ) -> Self {
        let locations = uniforms
            .entries()
            .iter()
            .filter_map(|entry| Some((entry.name, uniforms.location(entry.name)?)))
            .collect();

        let handle = library
            .program(name, fragments, vertex_format, uniforms, textures)
            .and_then(|desc| backend.create_program(&desc));

        match handle {
            Ok(handle) => {
                info!("Program '{}' created successfully", name);
                Self {
                    name: name.to_string(),
                    handle: Some(handle),
                    locations,
                    phase: PassPhase::Ready,
                }
            }
            Err(err) => {
                error!("Could not create program '{}': {}", name, err);
                Self {
                    name: name.to_string(),
                    handle: None,
                    locations,
                    phase: PassPhase::Uninitialized,
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        self.handle
    }

    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn set(&self, backend: &mut dyn Backend, name: &str, value: UniformValue) {
        let Some(handle) = self.handle else {
            return;
        };
        match self.locations.get(name) {
            Some(&location) => backend.set_uniform(handle, location, &value),
            None => warn!("Program '{}' has no uniform '{}'", self.name, name),
        }
    }

    /// Bind the program. Returns false for an inert program.
    pub(crate) fn begin(&mut self, backend: &mut dyn Backend) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        backend.use_program(Some(handle));
        self.phase = PassPhase::Begun;
        true
    }

    pub(crate) fn end(&mut self) {
        if self.handle.is_some() {
            self.phase = PassPhase::Ready;
        }
    }

    pub(crate) fn destroy(&mut self, backend: &mut dyn Backend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_program(handle);
        }
        self.phase = PassPhase::Uninitialized;
    }
}

/// Texture units a pass has bound, with redundant rebinds skipped.
#[derive(Debug, Default)]
pub(crate) struct TextureUnits {
    bound: BTreeMap<u32, TextureHandle>,
}

impl TextureUnits {
    pub(crate) fn bind(&mut self, backend: &mut dyn Backend, unit: u32, texture: Option<TextureHandle>) {
        if self.bound.get(&unit).copied() == texture {
            return;
        }
        self.reset(backend, unit, texture);
    }

    /// Bind unconditionally.
    pub(crate) fn reset(&mut self, backend: &mut dyn Backend, unit: u32, texture: Option<TextureHandle>) {
        backend.bind_texture(unit, texture);
        match texture {
            Some(texture) => {
                self.bound.insert(unit, texture);
            }
            None => {
                self.bound.remove(&unit);
            }
        }
    }

    pub(crate) fn unbind_all(&mut self, backend: &mut dyn Backend) {
        for (unit, _) in std::mem::take(&mut self.bound) {
            backend.bind_texture(unit, None);
        }
    }

    #[cfg(test)]
    pub(crate) fn bound(&self, unit: u32) -> Option<TextureHandle> {
        self.bound.get(&unit).copied()
    }
}

/// 1x1 opaque white texture bound in place of missing color textures.
pub(crate) struct WhiteTexture(Option<TextureHandle>);

impl WhiteTexture {
    pub(crate) fn new(backend: &mut dyn Backend) -> Self {
        use crate::device::backend::{TexFilter, TexWrap, TextureDesc, TextureKind};

        let desc = TextureDesc {
            width: 1,
            height: 1,
            kind: TextureKind::Color {
                filter: TexFilter::Nearest,
                wrap: TexWrap::Repeat,
                mip_levels: 1,
                anisotropy: 1,
            },
        };
        match backend.create_texture(&desc, Some(&[255; 4])) {
            Ok(handle) => Self(Some(handle)),
            Err(err) => {
                error!("Could not create white texture: {}", err);
                Self(None)
            }
        }
    }

    pub(crate) fn handle(&self) -> Option<TextureHandle> {
        self.0
    }

    /// The texture's own handle, or white when it is invalid.
    pub(crate) fn or_white(&self, texture: &Texture) -> Option<TextureHandle> {
        texture.handle.or(self.0)
    }

    pub(crate) fn destroy(&mut self, backend: &mut dyn Backend) {
        if let Some(handle) = self.0.take() {
            backend.destroy_texture(handle);
        }
    }
}

/// One instance of every pass renderer, owned by the device.
pub(crate) struct PassRenderers {
    pub(crate) shadow: ShadowRenderer,
    pub(crate) terrain: TerrainRenderer,
    pub(crate) object: ObjectRenderer,
    pub(crate) particle: ParticleRenderer,
    pub(crate) ui: UiRenderer,
}

impl PassRenderers {
    pub(crate) fn new(core: &mut DeviceCore) -> Self {
        let library = ShaderLibrary::new(core.config.shader_root.clone());
        info!("Loading pass shaders from {:?}", library.root());

        Self {
            shadow: ShadowRenderer::new(core, &library),
            terrain: TerrainRenderer::new(core, &library),
            object: ObjectRenderer::new(core, &library),
            particle: ParticleRenderer::new(core, &library),
            ui: UiRenderer::new(core, &library),
        }
    }

    pub(crate) fn destroy(&mut self, core: &mut DeviceCore) {
        self.ui.destroy(core);
        self.particle.destroy(core);
        self.object.destroy(core);
        self.terrain.destroy(core);
        self.shadow.destroy(core);
    }
}

/// Flip z so the right-handed camera space of the caller matches the
/// shaders' convention.
pub(crate) fn flip_view_z(view: glam::Mat4) -> glam::Mat4 {
    glam::Mat4::from_scale(glam::Vec3::new(1.0, 1.0, -1.0)) * view
}

/// Inverse-transpose of the upper 3x3 of `model`.
pub(crate) fn normal_matrix(model: glam::Mat4) -> glam::Mat3 {
    glam::Mat3::from_mat4(model).inverse().transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessBackend;
    use glam::{Mat4, Vec3};

    #[test]
    fn texture_units_skip_redundant_binds() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut units = TextureUnits::default();

        units.bind(&mut backend, 10, Some(TextureHandle(5)));
        units.bind(&mut backend, 10, Some(TextureHandle(5)));
        assert_eq!(units.bound(10), Some(TextureHandle(5)));
        assert_eq!(trace.borrow().texture_units.get(&10), Some(&TextureHandle(5)));

        units.unbind_all(&mut backend);
        assert!(trace.borrow().texture_units.is_empty());
        assert_eq!(units.bound(10), None);
    }

    #[test]
    fn view_flip_negates_z_row() {
        let view = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let flipped = flip_view_z(view);
        let p = flipped.transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(model);
        assert!((n.x_axis.x - 0.5).abs() < 1e-6);
        assert!((n.y_axis.y - 1.0).abs() < 1e-6);
    }
}
