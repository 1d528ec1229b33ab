//! The rendering device: resource ownership, cached state and frame control.
//!
//! A [`Device`] wraps a [`Backend`] and owns one instance of each pass
//! renderer. Passes are reached through short-lived borrows
//! ([`ShadowPass`], [`TerrainPass`], ...) that pair the renderer with the
//! device internals it drives. Within a frame the caller runs
//! `begin_scene`, then the shadow, terrain, object, particle and UI passes in
//! that order, then `end_scene`.

pub mod backend;
pub mod buffer;
pub mod framebuffer;
pub mod headless;
pub mod registry;
mod resources;
pub mod shader;
pub mod state;
pub mod streaming;
pub mod texture;
pub mod vertex;
pub mod wgpu_backend;

use log::{error, info, warn};

use crate::error::{DeviceError, Result};
use crate::renderers::{
    ObjectPass, ParticlePass, Pass, PassRenderers, ShadowPass, TerrainPass, UiPass,
};
use crate::settings::DeviceConfig;

use backend::{Backend, Capabilities, ClearFlags, Viewport};
use buffer::VertexBuffer;
use framebuffer::{Framebuffer, FramebufferParams, DEFAULT_FRAMEBUFFER};
use registry::ResourceRegistry;
use state::{Color, ColorMask, CullFace, DeviceState, TransparencyMode};
use texture::{ImageData, TexFormat, Texture, TextureCreateParams};
use vertex::{PrimitiveType, Vertex};

/// Smallest texture size a usable device has to support.
const MIN_TEXTURE_SIZE: u32 = 1024;

/// Device internals shared with the pass renderers.
pub struct DeviceCore {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) state: DeviceState,
    pub(crate) registry: ResourceRegistry,
    pub(crate) capabilities: Capabilities,
    pub(crate) config: DeviceConfig,
}

impl DeviceCore {
    pub(crate) fn set_depth_test(&mut self, enabled: bool) {
        self.state.set_depth_test(self.backend.as_mut(), enabled);
    }

    pub(crate) fn set_depth_mask(&mut self, enabled: bool) {
        self.state.set_depth_mask(self.backend.as_mut(), enabled);
    }

    pub(crate) fn set_cull_face(&mut self, mode: CullFace) {
        self.state.set_cull_face(self.backend.as_mut(), mode);
    }

    pub(crate) fn set_transparency(&mut self, mode: TransparencyMode) {
        self.state.set_transparency(self.backend.as_mut(), mode);
    }

    pub(crate) fn set_color_mask(&mut self, mask: ColorMask) {
        self.state.set_color_mask(self.backend.as_mut(), mask);
    }

    pub(crate) fn set_clear_color(&mut self, color: Color) {
        self.state.set_clear_color(self.backend.as_mut(), color);
    }

    pub(crate) fn clear(&mut self, flags: ClearFlags) {
        if flags.contains(ClearFlags::DEPTH) {
            self.set_depth_mask(true);
        }
        let color = self.state.clear_color();
        self.backend.clear(flags, color, 1.0);
    }

    fn default_framebuffer_params(&self) -> FramebufferParams {
        FramebufferParams {
            width: self.config.size.width,
            height: self.config.size.height,
            depth: self.config.depth_size,
            samples: self.config.msaa_samples,
            color_texture: false,
            depth_texture: false,
        }
    }
}

pub struct Device {
    core: DeviceCore,
    renderers: Option<PassRenderers>,
    error_message: String,
}

impl Device {
    pub fn new(backend: impl Backend + 'static, config: DeviceConfig) -> Self {
        Self::with_backend(Box::new(backend), config)
    }

    pub fn with_backend(backend: Box<dyn Backend>, config: DeviceConfig) -> Self {
        Self {
            core: DeviceCore {
                backend,
                state: DeviceState::default(),
                registry: ResourceRegistry::default(),
                capabilities: Capabilities::default(),
                config,
            },
            renderers: None,
            error_message: String::new(),
        }
    }

    /// Initialize the context, query capabilities and build the pass
    /// renderers. On failure the returned error (also kept in
    /// [`error_message`](Self::error_message)) describes what went wrong.
    pub fn create(&mut self) -> Result<()> {
        info!("Creating rendering device");

        let capabilities = match self.initialize_backend() {
            Ok(capabilities) => capabilities,
            Err(err) => {
                error!("{}", err);
                self.error_message = err.to_string();
                return Err(err);
            }
        };

        if capabilities.anisotropy_supported {
            info!(
                "Anisotropic filtering available, maximum level {}",
                capabilities.max_anisotropy
            );
        } else {
            info!("Anisotropic filtering not available");
        }
        info!("Multisampling supported, max samples: {}", capabilities.max_samples);
        info!("Maximum texture size: {}", capabilities.max_texture_size);
        info!(
            "Maximum renderbuffer size: {}",
            capabilities.max_renderbuffer_size
        );

        self.core.capabilities = capabilities;
        self.core.state = DeviceState::default();
        self.error_message.clear();

        let (width, height) = (self.core.config.size.width, self.core.config.size.height);
        self.core
            .backend
            .set_viewport(Viewport::new(0, 0, width as i32, height as i32));

        if let Some(mut old) = self.renderers.take() {
            old.destroy(&mut self.core);
        }
        self.renderers = Some(PassRenderers::new(&mut self.core));

        let params = self.core.default_framebuffer_params();
        self.core
            .registry
            .set_default_framebuffer(Framebuffer::window(params));

        info!("Rendering device created successfully");
        Ok(())
    }

    fn initialize_backend(&mut self) -> Result<Capabilities> {
        let capabilities = self.core.backend.initialize()?;

        if !capabilities.framebuffer_supported {
            return Err(DeviceError::Unsupported(
                "render targets are not available".into(),
            ));
        }
        if capabilities.max_texture_size < MIN_TEXTURE_SIZE {
            return Err(DeviceError::Unsupported(format!(
                "maximum texture size {} is below the required {}",
                capabilities.max_texture_size, MIN_TEXTURE_SIZE
            )));
        }
        Ok(capabilities)
    }

    /// Release everything: pass renderers, then vertex buffers, textures and
    /// framebuffers. Safe to call more than once.
    pub fn destroy(&mut self) {
        let core = &mut self.core;

        if let Some(mut renderers) = self.renderers.take() {
            info!("Destroying rendering device");
            renderers.destroy(core);
        }
        core.backend.use_program(None);

        for buffer in core.registry.drain_buffers() {
            core.backend.destroy_buffer(buffer);
        }

        core.destroy_all_textures();

        for framebuffer in core.registry.drain_framebuffers() {
            if let Some(handle) = framebuffer.handle() {
                core.backend.destroy_framebuffer(handle);
            }
        }
    }

    /// Apply a new resolution or depth configuration. Only the default
    /// framebuffer is recreated.
    pub fn config_changed(&mut self, config: DeviceConfig) {
        let config = config.validate();
        info!(
            "Device config changed: {}x{}, depth {}",
            config.size.width, config.size.height, config.depth_size
        );
        self.core
            .backend
            .resize(config.size.width, config.size.height);
        self.core.config = config;

        let (width, height) = (self.core.config.size.width, self.core.config.size.height);
        self.core
            .backend
            .set_viewport(Viewport::new(0, 0, width as i32, height as i32));

        if self.core.registry.has_framebuffer(DEFAULT_FRAMEBUFFER) {
            let params = self.core.default_framebuffer_params();
            self.core
                .registry
                .set_default_framebuffer(Framebuffer::window(params));
        }
    }

    /// Start a frame: acquire the surface, clear it and reset the device to
    /// its neutral state.
    pub fn begin_scene(&mut self) -> Result<()> {
        self.core.backend.begin_frame()?;
        self.core.backend.bind_framebuffer(None);
        let (width, height) = self.core.backend.surface_size();
        self.core
            .backend
            .set_viewport(Viewport::new(0, 0, width as i32, height as i32));

        self.clear();

        self.core.set_transparency(TransparencyMode::None);
        self.core.set_depth_test(false);
        self.core.set_depth_mask(true);
        self.core.set_cull_face(CullFace::None);
        self.core.backend.use_program(None);
        Ok(())
    }

    pub fn end_scene(&mut self) {
        self.core.backend.end_frame();
    }

    /// Clear color and depth of the bound target. Forces depth writes on.
    pub fn clear(&mut self) {
        self.core.clear(ClearFlags::ALL);
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.core.set_clear_color(color);
    }

    pub fn set_color_mask(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        self.core
            .set_color_mask(ColorMask::from_channels(red, green, blue, alpha));
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

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.core.backend.set_viewport(viewport);
    }

    pub fn state(&self) -> &DeviceState {
        &self.core.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.core.config
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn capabilities(&self) -> Capabilities {
        self.core.capabilities
    }

    pub fn is_anisotropy_supported(&self) -> bool {
        self.core.capabilities.anisotropy_supported
    }

    pub fn max_anisotropy_level(&self) -> u32 {
        self.core.capabilities.max_anisotropy
    }

    pub fn max_samples(&self) -> u32 {
        self.core.capabilities.max_samples
    }

    pub fn is_shadow_mapping_supported(&self) -> bool {
        self.core.capabilities.shadow_mapping_supported
    }

    pub fn max_texture_size(&self) -> u32 {
        self.core.capabilities.max_texture_size
    }

    pub fn is_framebuffer_supported(&self) -> bool {
        self.core.capabilities.framebuffer_supported
    }

    pub fn create_texture(&mut self, image: Option<&ImageData>, params: &TextureCreateParams) -> Texture {
        self.core.create_texture(image, params)
    }

    pub fn create_depth_texture(&mut self, width: u32, height: u32, depth_bits: u32) -> Texture {
        self.core.create_depth_texture(width, height, depth_bits)
    }

    pub fn update_texture(
        &mut self,
        texture: &Texture,
        offset: (u32, u32),
        image: &ImageData,
        format: TexFormat,
    ) {
        self.core.update_texture(texture, offset, image, format);
    }

    pub fn destroy_texture(&mut self, texture: &Texture) {
        self.core.destroy_texture(texture);
    }

    pub fn destroy_all_textures(&mut self) {
        self.core.destroy_all_textures();
    }

    pub fn create_vertex_buffer<V: Vertex>(
        &mut self,
        primitive: PrimitiveType,
        vertices: &[V],
    ) -> VertexBuffer {
        self.core.create_vertex_buffer(primitive, vertices)
    }

    pub fn update_vertex_buffer<V: Vertex>(
        &mut self,
        buffer: &mut VertexBuffer,
        primitive: PrimitiveType,
        vertices: &[V],
    ) {
        self.core.update_vertex_buffer(buffer, primitive, vertices);
    }

    pub fn destroy_vertex_buffer(&mut self, buffer: VertexBuffer) {
        self.core.destroy_vertex_buffer(buffer);
    }

    /// `None` when `name` is already taken or the target cannot be built.
    pub fn create_framebuffer(
        &mut self,
        name: &str,
        params: FramebufferParams,
    ) -> Option<&Framebuffer> {
        self.core.create_framebuffer(name, params)
    }

    pub fn get_framebuffer(&self, name: &str) -> Option<&Framebuffer> {
        self.core.registry.framebuffer(name)
    }

    /// No-op for unknown names and for the default framebuffer.
    pub fn delete_framebuffer(&mut self, name: &str) {
        self.core.delete_framebuffer(name);
    }

    /// Render into the named framebuffer. Returns false for unknown names.
    pub fn bind_framebuffer(&mut self, name: &str) -> bool {
        let Some(framebuffer) = self.core.registry.framebuffer(name) else {
            return false;
        };
        let (handle, width, height) = (
            framebuffer.handle(),
            framebuffer.width(),
            framebuffer.height(),
        );
        self.core.backend.bind_framebuffer(handle);
        self.core
            .backend
            .set_viewport(Viewport::new(0, 0, width as i32, height as i32));
        true
    }

    pub fn unbind_framebuffer(&mut self) {
        self.bind_framebuffer(DEFAULT_FRAMEBUFFER);
    }

    /// Blit the color of an offscreen framebuffer into `rect` of the window.
    pub fn copy_framebuffer_to_screen(&mut self, name: &str, rect: Viewport) {
        let Some(framebuffer) = self.core.registry.framebuffer(name) else {
            return;
        };
        let Some(handle) = framebuffer.handle() else {
            return;
        };
        let src = Viewport::new(
            0,
            0,
            framebuffer.width() as i32,
            framebuffer.height() as i32,
        );
        self.core.backend.blit_to_screen(handle, src, rect);
    }

    /// Copy `rect` of the bound target's color into `texture` at `offset`,
    /// both with a bottom-left origin.
    pub fn copy_framebuffer_to_texture(&mut self, texture: &Texture, offset: (u32, u32), rect: Viewport) {
        self.core.copy_framebuffer_to_texture(texture, offset, rect);
    }

    /// Read back the color of the bound target, the window by default, as
    /// RGBA8 with the top row first. Used for screenshots.
    pub fn framebuffer_pixels(&mut self) -> Option<ImageData> {
        let pixels = self.core.backend.read_pixels();
        if pixels.is_none() {
            warn!("Bound framebuffer has no readable color");
        }
        pixels
    }

    pub fn framebuffer_names(&self) -> Vec<String> {
        self.core
            .registry
            .framebuffer_names()
            .map(str::to_string)
            .collect()
    }

    pub fn live_texture_count(&self) -> usize {
        self.core.registry.texture_count()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.core.registry.buffer_count()
    }

    pub fn shadow_renderer(&mut self) -> Option<ShadowPass<'_>> {
        let renderers = self.renderers.as_mut()?;
        Some(Pass::new(&mut renderers.shadow, &mut self.core))
    }

    pub fn terrain_renderer(&mut self) -> Option<TerrainPass<'_>> {
        let renderers = self.renderers.as_mut()?;
        Some(Pass::new(&mut renderers.terrain, &mut self.core))
    }

    pub fn object_renderer(&mut self) -> Option<ObjectPass<'_>> {
        let renderers = self.renderers.as_mut()?;
        Some(Pass::new(&mut renderers.object, &mut self.core))
    }

    pub fn particle_renderer(&mut self) -> Option<ParticlePass<'_>> {
        let renderers = self.renderers.as_mut()?;
        Some(Pass::new(&mut renderers.particle, &mut self.core))
    }

    pub fn ui_renderer(&mut self) -> Option<UiPass<'_>> {
        let renderers = self.renderers.as_mut()?;
        Some(Pass::new(&mut renderers.ui, &mut self.core))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.destroy();
    }
}

