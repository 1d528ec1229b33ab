//! The seam between the device and a concrete GPU API.
//!
//! [`Backend`] models the GPU as an immediate-mode state machine: the device
//! issues state transitions, binds resources by unit and issues draws, and the
//! backend is free to translate that into whatever the underlying API wants.
//! A freshly initialized backend starts with depth test off, depth writes on,
//! culling off, blending off, all color channels writable and a black clear
//! color, matching [`DeviceState::default`](super::state::DeviceState).

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use super::shader::{TextureSlot, UniformLayout};
use super::state::{Color, ColorMask, CullFace, TransparencyMode};
use super::texture::ImageData;
use super::vertex::{PrimitiveType, VertexFormat};
use crate::error::Result;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn id(&self) -> u64 {
                self.0
            }
        }
    };
}

handle_type!(
    /// Backend texture identity
    TextureHandle
);
handle_type!(
    /// Backend vertex buffer identity
    BufferHandle
);
handle_type!(
    /// Backend offscreen render target identity
    FramebufferHandle
);
handle_type!(
    /// Backend shader program identity
    ProgramHandle
);

/// Hardware limits resolved once when the device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub anisotropy_supported: bool,
    pub max_anisotropy: u32,
    pub max_samples: u32,
    pub max_texture_size: u32,
    pub max_renderbuffer_size: u32,
    pub shadow_mapping_supported: bool,
    pub framebuffer_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexFilter {
    Nearest,
    Bilinear,
    Trilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexWrap {
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// RGBA8 color texture sampled with the given filter.
    Color {
        filter: TexFilter,
        wrap: TexWrap,
        mip_levels: u32,
        anisotropy: u32,
    },
    /// Depth texture usable as an attachment and with comparison sampling.
    Depth { bits: u32 },
    /// Color texture that can be rendered into and sampled afterwards.
    RenderTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    /// Depth buffer bits, zero for no depth attachment.
    pub depth_bits: u32,
    pub samples: u32,
    pub color_texture: Option<TextureHandle>,
    pub depth_texture: Option<TextureHandle>,
    /// Create an internal color attachment when no color texture is given.
    pub color_attachment: bool,
}

/// Compiled program description: source plus the uniform block and texture
/// slots the generated header declares.
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub name: String,
    pub source: String,
    pub vertex_format: VertexFormat,
    pub uniforms: UniformLayout,
    pub textures: Vec<TextureSlot>,
}

/// Index of a uniform in its program's [`UniformLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Vec4Array(Vec<Vec4>),
    Mat4Array(Vec<Mat4>),
}

/// One real GPU state transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateChange {
    DepthTest(bool),
    DepthMask(bool),
    CullFace(CullFace),
    Transparency(TransparencyMode),
    ColorMask(ColorMask),
    ClearColor(Color),
}

impl StateChange {
    pub fn kind(&self) -> StateKind {
        match self {
            StateChange::DepthTest(_) => StateKind::DepthTest,
            StateChange::DepthMask(_) => StateKind::DepthMask,
            StateChange::CullFace(_) => StateKind::CullFace,
            StateChange::Transparency(_) => StateKind::Transparency,
            StateChange::ColorMask(_) => StateKind::ColorMask,
            StateChange::ClearColor(_) => StateKind::ClearColor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    DepthTest,
    DepthMask,
    CullFace,
    Transparency,
    ColorMask,
    ClearColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Polygon depth offset, `factor` scales with slope, `units` is constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub factor: f32,
    pub units: f32,
}

bitflags! {
    /// Buffers a clear touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const ALL = Self::COLOR.bits() | Self::DEPTH.bits();
    }
}

pub trait Backend {
    /// Bring up the context and report what the hardware can do.
    fn initialize(&mut self) -> Result<Capabilities>;

    fn begin_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self);
    fn resize(&mut self, width: u32, height: u32);
    fn surface_size(&self) -> (u32, u32);

    fn create_texture(&mut self, desc: &TextureDesc, rgba: Option<&[u8]>) -> Result<TextureHandle>;
    fn update_texture(
        &mut self,
        texture: TextureHandle,
        origin: (u32, u32),
        size: (u32, u32),
        rgba: &[u8],
    );
    fn generate_mipmaps(&mut self, texture: TextureHandle);
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_buffer(&mut self, data: &[u8]) -> BufferHandle;
    /// Replace the storage of `buffer` with `size` fresh bytes.
    fn orphan_buffer(&mut self, buffer: BufferHandle, size: u64);
    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    /// Map a byte range without waiting for the GPU. `None` when refused.
    fn map_buffer_unsynchronized(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        len: u64,
    ) -> Option<&mut [u8]>;
    fn unmap_buffer(&mut self, buffer: BufferHandle);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle>;
    /// Attach (or detach) a depth texture. Returns whether the target is complete.
    fn attach_depth(&mut self, framebuffer: FramebufferHandle, texture: Option<TextureHandle>)
        -> bool;
    /// `None` binds the window surface.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn blit_to_screen(&mut self, framebuffer: FramebufferHandle, src: Viewport, dst: Viewport);
    /// Copy `src` of the bound target's color into `texture`, with the
    /// bottom-left corner of the copy at `offset`.
    fn copy_to_texture(&mut self, texture: TextureHandle, offset: (u32, u32), src: Viewport);
    /// Color of the bound target as RGBA8, top row first. `None` when the
    /// target has no readable color.
    fn read_pixels(&mut self) -> Option<ImageData>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle>;
    fn use_program(&mut self, program: Option<ProgramHandle>);
    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: &UniformValue);
    fn destroy_program(&mut self, program: ProgramHandle);

    fn apply_state(&mut self, change: StateChange);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_depth_bias(&mut self, bias: Option<DepthBias>);
    fn clear(&mut self, flags: ClearFlags, color: Color, depth: f32);

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, format: VertexFormat);
    fn draw(&mut self, primitive: PrimitiveType, first: u32, count: u32);
    fn multi_draw(&mut self, primitive: PrimitiveType, firsts: &[u32], counts: &[u32]);
}
