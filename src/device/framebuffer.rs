use super::backend::FramebufferHandle;
use super::texture::Texture;

pub const DEFAULT_FRAMEBUFFER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferParams {
    pub width: u32,
    pub height: u32,
    /// Depth buffer bits, zero for none.
    pub depth: u32,
    pub samples: u32,
    /// Render color into a texture that can be sampled afterwards.
    pub color_texture: bool,
    /// Render depth into a texture that can be sampled afterwards.
    pub depth_texture: bool,
}

impl Default for FramebufferParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            depth: 24,
            samples: 1,
            color_texture: true,
            depth_texture: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferKind {
    /// The window surface.
    Default,
    Offscreen(FramebufferHandle),
}

/// A named render target.
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    name: String,
    kind: FramebufferKind,
    params: FramebufferParams,
    color_texture: Option<Texture>,
    depth_texture: Option<Texture>,
}

impl Framebuffer {
    pub(crate) fn window(params: FramebufferParams) -> Self {
        Self {
            name: DEFAULT_FRAMEBUFFER.to_string(),
            kind: FramebufferKind::Default,
            params,
            color_texture: None,
            depth_texture: None,
        }
    }

    pub(crate) fn offscreen(
        name: &str,
        handle: FramebufferHandle,
        params: FramebufferParams,
        color_texture: Option<Texture>,
        depth_texture: Option<Texture>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: FramebufferKind::Offscreen(handle),
            params,
            color_texture,
            depth_texture,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FramebufferKind {
        self.kind
    }

    pub fn is_default(&self) -> bool {
        self.kind == FramebufferKind::Default
    }

    /// Backend target, `None` for the window surface.
    pub fn handle(&self) -> Option<FramebufferHandle> {
        match self.kind {
            FramebufferKind::Default => None,
            FramebufferKind::Offscreen(handle) => Some(handle),
        }
    }

    pub fn params(&self) -> &FramebufferParams {
        &self.params
    }

    pub fn width(&self) -> u32 {
        self.params.width
    }

    pub fn height(&self) -> u32 {
        self.params.height
    }

    pub fn depth(&self) -> u32 {
        self.params.depth
    }

    pub fn samples(&self) -> u32 {
        self.params.samples
    }

    pub fn color_texture(&self) -> Option<Texture> {
        self.color_texture
    }

    pub fn depth_texture(&self) -> Option<Texture> {
        self.depth_texture
    }
}
