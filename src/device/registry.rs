use std::collections::{BTreeMap, HashMap, HashSet};

use super::backend::{BufferHandle, TextureHandle};
use super::framebuffer::{Framebuffer, DEFAULT_FRAMEBUFFER};
use super::texture::Texture;

/// Bookkeeping for every live resource, used to release leftovers at teardown.
///
/// The registry never owns GPU memory itself: vertex buffers belong to their
/// creators and textures are plain values; it only remembers what exists.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    textures: HashMap<TextureHandle, Texture>,
    buffers: HashSet<BufferHandle>,
    framebuffers: BTreeMap<String, Framebuffer>,
}

impl ResourceRegistry {
    pub fn add_texture(&mut self, texture: Texture) {
        if let Some(handle) = texture.handle {
            self.textures.insert(handle, texture);
        }
    }

    /// Returns false when the texture was not live.
    pub fn remove_texture(&mut self, texture: &Texture) -> bool {
        match texture.handle {
            Some(handle) => self.textures.remove(&handle).is_some(),
            None => false,
        }
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(&handle)
    }

    pub fn contains_texture(&self, texture: &Texture) -> bool {
        texture
            .handle
            .is_some_and(|handle| self.textures.contains_key(&handle))
    }

    pub fn drain_textures(&mut self) -> Vec<Texture> {
        self.textures.drain().map(|(_, texture)| texture).collect()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn add_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.insert(buffer);
    }

    pub fn remove_buffer(&mut self, buffer: BufferHandle) -> bool {
        self.buffers.remove(&buffer)
    }

    pub fn drain_buffers(&mut self) -> Vec<BufferHandle> {
        self.buffers.drain().collect()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn has_framebuffer(&self, name: &str) -> bool {
        self.framebuffers.contains_key(name)
    }

    pub fn framebuffer(&self, name: &str) -> Option<&Framebuffer> {
        self.framebuffers.get(name)
    }

    /// Insert a framebuffer unless its name is taken.
    pub fn insert_framebuffer(&mut self, framebuffer: Framebuffer) -> Option<&Framebuffer> {
        let name = framebuffer.name().to_string();
        if self.framebuffers.contains_key(&name) {
            return None;
        }
        self.framebuffers.insert(name.clone(), framebuffer);
        self.framebuffers.get(&name)
    }

    /// Replace the window framebuffer entry, which is never subject to the
    /// uniqueness check.
    pub fn set_default_framebuffer(&mut self, framebuffer: Framebuffer) {
        self.framebuffers
            .insert(DEFAULT_FRAMEBUFFER.to_string(), framebuffer);
    }

    /// `None` for unknown names and for the default entry.
    pub fn remove_framebuffer(&mut self, name: &str) -> Option<Framebuffer> {
        if name == DEFAULT_FRAMEBUFFER {
            return None;
        }
        self.framebuffers.remove(name)
    }

    pub fn drain_framebuffers(&mut self) -> Vec<Framebuffer> {
        std::mem::take(&mut self.framebuffers).into_values().collect()
    }

    pub fn framebuffer_names(&self) -> impl Iterator<Item = &str> {
        self.framebuffers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::FramebufferHandle;
    use crate::device::framebuffer::FramebufferParams;

    fn texture(id: u64) -> Texture {
        Texture {
            handle: Some(TextureHandle(id)),
            size: (1, 1),
            original_size: (1, 1),
            ..Texture::default()
        }
    }

    #[test]
    fn texture_removal_is_guarded() {
        let mut registry = ResourceRegistry::default();
        registry.add_texture(texture(1));
        registry.add_texture(Texture::invalid());

        assert_eq!(registry.texture_count(), 1);
        assert!(registry.remove_texture(&texture(1)));
        assert!(!registry.remove_texture(&texture(1)));
        assert!(!registry.remove_texture(&Texture::invalid()));
    }

    #[test]
    fn duplicate_framebuffer_names_are_rejected() {
        let mut registry = ResourceRegistry::default();
        let params = FramebufferParams::default();
        let first = Framebuffer::offscreen("shadow", FramebufferHandle(1), params, None, None);
        let second = Framebuffer::offscreen("shadow", FramebufferHandle(2), params, None, None);

        assert!(registry.insert_framebuffer(first).is_some());
        assert!(registry.insert_framebuffer(second).is_none());
        assert_eq!(
            registry.framebuffer("shadow").and_then(Framebuffer::handle),
            Some(FramebufferHandle(1))
        );
    }

    #[test]
    fn default_framebuffer_cannot_be_removed() {
        let mut registry = ResourceRegistry::default();
        registry.set_default_framebuffer(Framebuffer::window(FramebufferParams::default()));

        assert!(registry.remove_framebuffer(DEFAULT_FRAMEBUFFER).is_none());
        assert!(registry.has_framebuffer(DEFAULT_FRAMEBUFFER));
        assert_eq!(registry.drain_framebuffers().len(), 1);
        assert_eq!(registry.framebuffer_names().count(), 0);
    }
}
