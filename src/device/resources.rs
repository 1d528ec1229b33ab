use log::{debug, error, warn};

use super::backend::{FramebufferDesc, TextureDesc, TextureKind, Viewport};
use super::buffer::VertexBuffer;
use super::framebuffer::{Framebuffer, FramebufferParams};
use super::texture::{
    calculate_mip_levels, normalize_depth_bits, prepare_pixels, ImageData, TexFormat, Texture,
    TextureCreateParams,
};
use super::vertex::{PrimitiveType, Vertex};
use super::DeviceCore;

/// Texture units cleared by [`DeviceCore::destroy_all_textures`].
pub(crate) const MAX_TEXTURE_UNITS: u32 = 16;

impl DeviceCore {
    pub(crate) fn create_texture(
        &mut self,
        image: Option<&ImageData>,
        params: &TextureCreateParams,
    ) -> Texture {
        let Some(image) = image else {
            error!("Cannot create texture without pixel data");
            return Texture::invalid();
        };

        let Some(prepared) =
            prepare_pixels(image, params.format, params.pad_to_nearest_power_of_two)
        else {
            error!(
                "Invalid texture data: {}x{} with {} channels",
                image.width, image.height, image.channels
            );
            return Texture::invalid();
        };

        let (width, height) = prepared.image.dimensions();
        let max_size = self.capabilities.max_texture_size;
        if max_size > 0 && (width > max_size || height > max_size) {
            error!(
                "Texture {}x{} exceeds the maximum size {}",
                width, height, max_size
            );
            return Texture::invalid();
        }

        let mip_levels = if params.mipmap {
            calculate_mip_levels(width, height)
        } else {
            1
        };
        let desc = TextureDesc {
            width,
            height,
            kind: TextureKind::Color {
                filter: params.filter,
                wrap: params.wrap,
                mip_levels,
                anisotropy: self.anisotropy_level(params.anisotropy),
            },
        };

        let handle = match self
            .backend
            .create_texture(&desc, Some(prepared.image.as_raw()))
        {
            Ok(handle) => handle,
            Err(err) => {
                error!("Texture creation failed: {}", err);
                return Texture::invalid();
            }
        };

        if mip_levels > 1 {
            self.backend.generate_mipmaps(handle);
        }

        let texture = Texture {
            handle: Some(handle),
            size: (width, height),
            original_size: prepared.original_size,
            alpha: prepared.alpha,
            mip_levels,
        };
        debug!("Created texture {:?} {}x{}", handle, width, height);
        self.registry.add_texture(texture);
        texture
    }

    fn anisotropy_level(&self, requested: u32) -> u32 {
        if requested <= 1 || !self.capabilities.anisotropy_supported {
            return 1;
        }
        requested.min(self.capabilities.max_anisotropy.max(1))
    }

    pub(crate) fn create_depth_texture(&mut self, width: u32, height: u32, depth_bits: u32) -> Texture {
        let desc = TextureDesc {
            width: width.max(1),
            height: height.max(1),
            kind: TextureKind::Depth {
                bits: normalize_depth_bits(depth_bits),
            },
        };

        match self.backend.create_texture(&desc, None) {
            Ok(handle) => {
                let texture = Texture {
                    handle: Some(handle),
                    size: (desc.width, desc.height),
                    original_size: (desc.width, desc.height),
                    alpha: false,
                    mip_levels: 1,
                };
                debug!(
                    "Created depth texture {:?} {}x{}",
                    handle, desc.width, desc.height
                );
                self.registry.add_texture(texture);
                texture
            }
            Err(err) => {
                error!("Depth texture creation failed: {}", err);
                Texture::invalid()
            }
        }
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> Texture {
        let desc = TextureDesc {
            width,
            height,
            kind: TextureKind::RenderTarget,
        };
        match self.backend.create_texture(&desc, None) {
            Ok(handle) => {
                let texture = Texture {
                    handle: Some(handle),
                    size: (width, height),
                    original_size: (width, height),
                    alpha: true,
                    mip_levels: 1,
                };
                self.registry.add_texture(texture);
                texture
            }
            Err(err) => {
                error!("Render target creation failed: {}", err);
                Texture::invalid()
            }
        }
    }

    pub(crate) fn update_texture(
        &mut self,
        texture: &Texture,
        offset: (u32, u32),
        image: &ImageData,
        format: TexFormat,
    ) {
        let Some(handle) = texture.handle else {
            return;
        };
        let Some(current) = self.registry.texture(handle).copied() else {
            return;
        };
        let Some(prepared) = prepare_pixels(image, format, false) else {
            warn!("Ignoring texture update with invalid pixel data");
            return;
        };

        let (width, height) = prepared.image.dimensions();
        let fits = |start: u32, len: u32, size: u32| {
            start.checked_add(len).is_some_and(|end| end <= size)
        };
        if !fits(offset.0, width, current.size.0) || !fits(offset.1, height, current.size.1) {
            warn!(
                "Texture update {}x{} at {:?} is outside {}x{}",
                width, height, offset, current.size.0, current.size.1
            );
            return;
        }

        self.backend
            .update_texture(handle, offset, (width, height), prepared.image.as_raw());

        if current.mip_levels > 1 {
            self.backend.generate_mipmaps(handle);
        }
    }

    /// Copy `src` of the bound target into `texture`, the bottom-left
    /// corner of the copy landing at `offset`.
    pub(crate) fn copy_framebuffer_to_texture(
        &mut self,
        texture: &Texture,
        offset: (u32, u32),
        src: Viewport,
    ) {
        let Some(handle) = texture.handle else {
            return;
        };
        let Some(current) = self.registry.texture(handle).copied() else {
            return;
        };
        if src.x < 0 || src.y < 0 || src.width <= 0 || src.height <= 0 {
            warn!("Ignoring framebuffer copy of {:?}", src);
            return;
        }

        let fits = |start: u32, len: i32, size: u32| {
            start.checked_add(len as u32).is_some_and(|end| end <= size)
        };
        if !fits(offset.0, src.width, current.size.0) || !fits(offset.1, src.height, current.size.1) {
            warn!(
                "Framebuffer copy {}x{} at {:?} is outside {}x{}",
                src.width, src.height, offset, current.size.0, current.size.1
            );
            return;
        }

        self.backend.copy_to_texture(handle, offset, src);
    }

    pub(crate) fn destroy_texture(&mut self, texture: &Texture) {
        if !self.registry.remove_texture(texture) {
            return;
        }
        if let Some(handle) = texture.handle {
            debug!("Destroying texture {:?}", handle);
            self.backend.destroy_texture(handle);
        }
    }

    pub(crate) fn destroy_all_textures(&mut self) {
        for unit in 0..MAX_TEXTURE_UNITS {
            self.backend.bind_texture(unit, None);
        }
        for texture in self.registry.drain_textures() {
            if let Some(handle) = texture.handle {
                self.backend.destroy_texture(handle);
            }
        }
    }

    pub(crate) fn create_vertex_buffer<V: Vertex>(
        &mut self,
        primitive: PrimitiveType,
        vertices: &[V],
    ) -> VertexBuffer {
        let handle = self.backend.create_buffer(bytemuck::cast_slice(vertices));
        self.registry.add_buffer(handle);
        debug!(
            "Created vertex buffer {:?} with {} vertices",
            handle,
            vertices.len()
        );
        VertexBuffer::new(handle, primitive, V::FORMAT, vertices.len() as u32)
    }

    pub(crate) fn update_vertex_buffer<V: Vertex>(
        &mut self,
        buffer: &mut VertexBuffer,
        primitive: PrimitiveType,
        vertices: &[V],
    ) {
        if buffer.format() != V::FORMAT {
            warn!(
                "Cannot update {:?} buffer with {:?} vertices",
                buffer.format(),
                V::FORMAT
            );
            return;
        }

        let count = vertices.len() as u32;
        let mut capacity = buffer.capacity();
        if count > capacity {
            capacity = count;
            self.backend
                .orphan_buffer(buffer.handle(), count as u64 * V::FORMAT.stride());
        }
        self.backend
            .update_buffer(buffer.handle(), 0, bytemuck::cast_slice(vertices));
        buffer.set_contents(primitive, count, capacity);
    }

    pub(crate) fn destroy_vertex_buffer(&mut self, buffer: VertexBuffer) {
        if self.registry.remove_buffer(buffer.handle()) {
            debug!("Destroying vertex buffer {:?}", buffer.handle());
            self.backend.destroy_buffer(buffer.handle());
        }
    }

    pub(crate) fn create_framebuffer(
        &mut self,
        name: &str,
        params: FramebufferParams,
    ) -> Option<&Framebuffer> {
        if self.registry.has_framebuffer(name) {
            warn!("Framebuffer '{}' already exists", name);
            return None;
        }
        if !self.capabilities.framebuffer_supported {
            error!("Framebuffers are not supported");
            return None;
        }

        let mut params = params;
        let max_samples = self.capabilities.max_samples.max(1);
        if params.samples > max_samples {
            warn!(
                "Framebuffer '{}' requested {} samples, using {}",
                name, params.samples, max_samples
            );
            params.samples = max_samples;
        }
        params.samples = params.samples.max(1);

        let color_texture = params
            .color_texture
            .then(|| self.create_render_target(params.width, params.height))
            .filter(Texture::is_valid);
        let depth_texture = (params.depth_texture && params.depth > 0)
            .then(|| self.create_depth_texture(params.width, params.height, params.depth))
            .filter(Texture::is_valid);

        let desc = FramebufferDesc {
            width: params.width,
            height: params.height,
            depth_bits: params.depth,
            samples: params.samples,
            color_texture: color_texture.and_then(|t| t.handle),
            depth_texture: depth_texture.and_then(|t| t.handle),
            color_attachment: true,
        };

        let handle = match self.backend.create_framebuffer(&desc) {
            Ok(handle) => handle,
            Err(err) => {
                error!("Framebuffer '{}' incomplete: {}", name, err);
                for texture in color_texture.iter().chain(depth_texture.iter()) {
                    self.destroy_texture(texture);
                }
                return None;
            }
        };

        log::info!(
            "Created framebuffer '{}' {}x{}, depth {}, samples {}",
            name,
            params.width,
            params.height,
            params.depth,
            params.samples
        );
        self.registry.insert_framebuffer(Framebuffer::offscreen(
            name,
            handle,
            params,
            color_texture,
            depth_texture,
        ))
    }

    pub(crate) fn delete_framebuffer(&mut self, name: &str) {
        let Some(framebuffer) = self.registry.remove_framebuffer(name) else {
            return;
        };
        if let Some(handle) = framebuffer.handle() {
            self.backend.destroy_framebuffer(handle);
        }
        for texture in framebuffer
            .color_texture()
            .iter()
            .chain(framebuffer.depth_texture().iter())
        {
            self.destroy_texture(texture);
        }
    }
}
