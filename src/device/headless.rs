//! In-memory backend that performs no GPU work.
//!
//! Every call is recorded into a [`Trace`] shared through `Rc<RefCell<_>>`,
//! so tests and tools can hand the backend to a [`Device`](super::Device)
//! and still inspect what reached the "GPU".

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::backend::{
    Backend, BufferHandle, Capabilities, ClearFlags, DepthBias, FramebufferDesc,
    FramebufferHandle, ProgramDesc, ProgramHandle, StateChange, StateKind, TextureDesc,
    TextureHandle, TextureKind, UniformLocation, UniformValue, Viewport,
};
use super::shader::UniformLayout;
use super::state::Color;
use super::texture::ImageData;
use super::vertex::{PrimitiveType, VertexFormat};
use crate::error::{DeviceError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub primitive: PrimitiveType,
    pub first: u32,
    pub count: u32,
    pub buffer: Option<BufferHandle>,
    pub format: Option<VertexFormat>,
    /// Storage generation of `buffer`, bumped on every orphan.
    pub generation: u32,
    pub program: Option<ProgramHandle>,
    pub framebuffer: Option<FramebufferHandle>,
    pub viewport: Viewport,
    pub units: BTreeMap<u32, TextureHandle>,
    /// Part of a multi-draw batch.
    pub batched: bool,
}

/// A framebuffer to texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCopy {
    /// Bound target at the time of the copy, `None` for the window.
    pub source: Option<FramebufferHandle>,
    pub texture: TextureHandle,
    pub offset: (u32, u32),
    pub src: Viewport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformWrite {
    pub program: String,
    pub name: &'static str,
    pub value: UniformValue,
}

/// Everything the headless backend has been asked to do.
#[derive(Debug, Default)]
pub struct Trace {
    pub transitions: Vec<StateChange>,
    pub live_textures: BTreeMap<TextureHandle, TextureDesc>,
    pub live_buffers: BTreeMap<BufferHandle, u64>,
    pub live_framebuffers: BTreeMap<FramebufferHandle, FramebufferDesc>,
    pub live_programs: BTreeMap<ProgramHandle, String>,
    /// Units with a texture currently bound.
    pub texture_units: BTreeMap<u32, TextureHandle>,
    pub draws: Vec<DrawRecord>,
    pub uniform_writes: Vec<UniformWrite>,
    /// Mirror of buffer contents as seen by the GPU.
    pub buffer_contents: HashMap<BufferHandle, Vec<u8>>,
    pub buffer_generations: HashMap<BufferHandle, u32>,
    pub orphans: u32,
    pub maps: u32,
    pub refused_maps: u32,
    pub buffer_uploads: u32,
    pub out_of_bounds_accesses: u32,
    pub texture_updates: u32,
    pub mipmaps_generated: u32,
    pub clears: Vec<ClearFlags>,
    pub blits: u32,
    pub texture_copies: Vec<TextureCopy>,
    pub pixel_reads: u32,
    pub frames_begun: u32,
    pub frames_presented: u32,
    pub viewport: Viewport,
    pub depth_bias: Option<DepthBias>,
    pub bound_framebuffer: Option<FramebufferHandle>,
    pub current_program: Option<ProgramHandle>,
    pub surface_size: (u32, u32),
}

impl Trace {
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn transitions_of(&self, kind: StateKind) -> usize {
        self.transitions.iter().filter(|t| t.kind() == kind).count()
    }

    pub fn last_transition(&self, kind: StateKind) -> Option<StateChange> {
        self.transitions.iter().rev().find(|t| t.kind() == kind).copied()
    }

    pub fn last_uniform(&self, program: &str, name: &str) -> Option<&UniformValue> {
        self.uniform_writes
            .iter()
            .rev()
            .find(|w| w.program == program && w.name == name)
            .map(|w| &w.value)
    }

    pub fn program_named(&self, name: &str) -> Option<ProgramHandle> {
        self.live_programs
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(handle, _)| *handle)
    }

    pub fn draws_with(&self, program: ProgramHandle) -> impl Iterator<Item = &DrawRecord> {
        self.draws.iter().filter(move |d| d.program == Some(program))
    }
}

struct ProgramRecord {
    name: String,
    uniforms: UniformLayout,
    block: Vec<u8>,
}

struct FramebufferRecord {
    desc: FramebufferDesc,
}

pub struct HeadlessBackend {
    trace: Rc<RefCell<Trace>>,
    next_id: u64,
    capabilities: Capabilities,
    init_failure: Option<String>,
    refuse_maps: bool,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    mapped: Option<(BufferHandle, u64, u64)>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    framebuffers: HashMap<FramebufferHandle, FramebufferRecord>,
    bound_buffer: Option<(BufferHandle, VertexFormat)>,
    /// Last color each target was cleared to, which is all it holds.
    fills: HashMap<Option<FramebufferHandle>, Color>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        let trace = Trace {
            surface_size: (800, 600),
            ..Trace::default()
        };

        Self {
            trace: Rc::new(RefCell::new(trace)),
            next_id: 1,
            capabilities: Capabilities {
                anisotropy_supported: true,
                max_anisotropy: 16,
                max_samples: 8,
                max_texture_size: 8192,
                max_renderbuffer_size: 8192,
                shadow_mapping_supported: true,
                framebuffer_supported: true,
            },
            init_failure: None,
            refuse_maps: false,
            buffers: HashMap::new(),
            mapped: None,
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            bound_buffer: None,
            fills: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_surface_size(self, width: u32, height: u32) -> Self {
        self.trace.borrow_mut().surface_size = (width, height);
        self
    }

    /// Make `initialize` fail with `message`.
    pub fn with_init_failure(mut self, message: impl Into<String>) -> Self {
        self.init_failure = Some(message.into());
        self
    }

    /// Refuse every unsynchronized map, forcing sub-range uploads.
    pub fn refusing_maps(mut self) -> Self {
        self.refuse_maps = true;
        self
    }

    pub fn trace(&self) -> Rc<RefCell<Trace>> {
        Rc::clone(&self.trace)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn write_mirror(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let mut trace = self.trace.borrow_mut();
        if let Some(mirror) = trace.buffer_contents.get_mut(&buffer) {
            let start = offset as usize;
            mirror[start..start + data.len()].copy_from_slice(data);
        }
    }
}

impl Backend for HeadlessBackend {
    fn initialize(&mut self) -> Result<Capabilities> {
        match &self.init_failure {
            Some(message) => Err(DeviceError::Init(message.clone())),
            None => Ok(self.capabilities),
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.trace.borrow_mut().frames_begun += 1;
        Ok(())
    }

    fn end_frame(&mut self) {
        self.trace.borrow_mut().frames_presented += 1;
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.trace.borrow_mut().surface_size = (width.max(1), height.max(1));
    }

    fn surface_size(&self) -> (u32, u32) {
        self.trace.borrow().surface_size
    }

    fn create_texture(&mut self, desc: &TextureDesc, rgba: Option<&[u8]>) -> Result<TextureHandle> {
        if let (TextureKind::Color { .. }, Some(data)) = (desc.kind, rgba) {
            if data.len() != (desc.width * desc.height * 4) as usize {
                return Err(DeviceError::InvalidTexture(format!(
                    "expected {} bytes for {}x{}, got {}",
                    desc.width * desc.height * 4,
                    desc.width,
                    desc.height,
                    data.len()
                )));
            }
        }
        let handle = TextureHandle(self.next_id());
        self.trace.borrow_mut().live_textures.insert(handle, *desc);
        Ok(handle)
    }

    fn update_texture(
        &mut self,
        texture: TextureHandle,
        _origin: (u32, u32),
        _size: (u32, u32),
        _rgba: &[u8],
    ) {
        let mut trace = self.trace.borrow_mut();
        if trace.live_textures.contains_key(&texture) {
            trace.texture_updates += 1;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let mut trace = self.trace.borrow_mut();
        if trace.live_textures.contains_key(&texture) {
            trace.mipmaps_generated += 1;
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let mut trace = self.trace.borrow_mut();
        trace.live_textures.remove(&texture);
        trace.texture_units.retain(|_, bound| *bound != texture);
    }

    fn create_buffer(&mut self, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(handle, data.to_vec());
        let mut trace = self.trace.borrow_mut();
        trace.live_buffers.insert(handle, data.len() as u64);
        trace.buffer_contents.insert(handle, data.to_vec());
        trace.buffer_generations.insert(handle, 0);
        handle
    }

    fn orphan_buffer(&mut self, buffer: BufferHandle, size: u64) {
        let Some(storage) = self.buffers.get_mut(&buffer) else {
            return;
        };
        *storage = vec![0; size as usize];
        let mut trace = self.trace.borrow_mut();
        trace.orphans += 1;
        trace.live_buffers.insert(buffer, size);
        trace.buffer_contents.insert(buffer, vec![0; size as usize]);
        *trace.buffer_generations.entry(buffer).or_insert(0) += 1;
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(storage) = self.buffers.get_mut(&buffer) else {
            return;
        };
        let end = offset as usize + data.len();
        if end > storage.len() {
            self.trace.borrow_mut().out_of_bounds_accesses += 1;
            return;
        }
        storage[offset as usize..end].copy_from_slice(data);
        self.trace.borrow_mut().buffer_uploads += 1;
        self.write_mirror(buffer, offset, data);
    }

    fn map_buffer_unsynchronized(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        len: u64,
    ) -> Option<&mut [u8]> {
        if self.refuse_maps {
            self.trace.borrow_mut().refused_maps += 1;
            return None;
        }
        let storage = self.buffers.get_mut(&buffer)?;
        let end = (offset + len) as usize;
        if end > storage.len() {
            self.trace.borrow_mut().out_of_bounds_accesses += 1;
            return None;
        }
        self.trace.borrow_mut().maps += 1;
        self.mapped = Some((buffer, offset, len));
        Some(&mut storage[offset as usize..end])
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) {
        let Some((mapped, offset, len)) = self.mapped.take() else {
            return;
        };
        if mapped != buffer {
            self.mapped = Some((mapped, offset, len));
            return;
        }
        if let Some(storage) = self.buffers.get(&buffer) {
            let range = &storage[offset as usize..(offset + len) as usize];
            self.write_mirror(buffer, offset, range);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        if matches!(self.bound_buffer, Some((bound, _)) if bound == buffer) {
            self.bound_buffer = None;
        }
        let mut trace = self.trace.borrow_mut();
        trace.live_buffers.remove(&buffer);
        trace.buffer_contents.remove(&buffer);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        if !self.capabilities.framebuffer_supported {
            return Err(DeviceError::Unsupported("framebuffers".into()));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::IncompleteFramebuffer(format!(
                "zero sized target {}x{}",
                desc.width, desc.height
            )));
        }
        let handle = FramebufferHandle(self.next_id());
        self.framebuffers.insert(
            handle,
            FramebufferRecord { desc: *desc },
        );
        self.trace.borrow_mut().live_framebuffers.insert(handle, *desc);
        Ok(handle)
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: Option<TextureHandle>,
    ) -> bool {
        let Some(record) = self.framebuffers.get_mut(&framebuffer) else {
            return false;
        };
        record.desc.depth_texture = texture;

        let mut trace = self.trace.borrow_mut();
        trace.live_framebuffers.insert(framebuffer, record.desc);
        match texture {
            Some(texture) => matches!(
                trace.live_textures.get(&texture),
                Some(TextureDesc {
                    kind: TextureKind::Depth { .. },
                    ..
                })
            ),
            None => record.desc.color_attachment || record.desc.color_texture.is_some(),
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.trace.borrow_mut().bound_framebuffer = framebuffer;
    }

    fn blit_to_screen(&mut self, framebuffer: FramebufferHandle, _src: Viewport, _dst: Viewport) {
        if self.framebuffers.contains_key(&framebuffer) {
            self.trace.borrow_mut().blits += 1;
        }
    }

    fn copy_to_texture(&mut self, texture: TextureHandle, offset: (u32, u32), src: Viewport) {
        let source = self.trace.borrow().bound_framebuffer;
        if self.color_size(source).is_none() {
            return;
        }
        let renders_into = source
            .and_then(|fb| self.framebuffers.get(&fb))
            .and_then(|record| record.desc.color_texture);
        if renders_into == Some(texture) {
            return;
        }
        let mut trace = self.trace.borrow_mut();
        if !matches!(
            trace.live_textures.get(&texture),
            Some(TextureDesc {
                kind: TextureKind::Color { .. } | TextureKind::RenderTarget,
                ..
            })
        ) {
            return;
        }
        trace.texture_copies.push(TextureCopy {
            source,
            texture,
            offset,
            src,
        });
    }

    fn read_pixels(&mut self) -> Option<ImageData> {
        let source = self.trace.borrow().bound_framebuffer;
        let (width, height) = self.color_size(source)?;
        let fill = self.fills.get(&source).copied().unwrap_or(Color::BLACK);
        let texel = [fill.r, fill.g, fill.b, fill.a].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        self.trace.borrow_mut().pixel_reads += 1;
        Some(ImageData::solid(width, height, texel))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        self.fills.remove(&Some(framebuffer));
        let mut trace = self.trace.borrow_mut();
        trace.live_framebuffers.remove(&framebuffer);
        if trace.bound_framebuffer == Some(framebuffer) {
            trace.bound_framebuffer = None;
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle> {
        for entry in ["fn vs_main", "fn fs_main"] {
            if !desc.source.contains(entry) {
                return Err(DeviceError::ShaderCompile {
                    program: desc.name.clone(),
                    message: format!("missing entry point `{}`", &entry[3..]),
                });
            }
        }
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            ProgramRecord {
                name: desc.name.clone(),
                uniforms: desc.uniforms.clone(),
                block: vec![0; desc.uniforms.size() as usize],
            },
        );
        self.trace
            .borrow_mut()
            .live_programs
            .insert(handle, desc.name.clone());
        Ok(handle)
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.trace.borrow_mut().current_program = program;
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: &UniformValue) {
        let Some(record) = self.programs.get_mut(&program) else {
            return;
        };
        if !record.uniforms.write(&mut record.block, location, value) {
            log::warn!(
                "Uniform {:?} rejected by program {}",
                location,
                record.name
            );
            return;
        }
        if let Some(entry) = record.uniforms.entry(location) {
            self.trace.borrow_mut().uniform_writes.push(UniformWrite {
                program: record.name.clone(),
                name: entry.name,
                value: value.clone(),
            });
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        let mut trace = self.trace.borrow_mut();
        trace.live_programs.remove(&program);
        if trace.current_program == Some(program) {
            trace.current_program = None;
        }
    }

    fn apply_state(&mut self, change: StateChange) {
        self.trace.borrow_mut().transitions.push(change);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.trace.borrow_mut().viewport = viewport;
    }

    fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.trace.borrow_mut().depth_bias = bias;
    }

    fn clear(&mut self, flags: ClearFlags, color: Color, _depth: f32) {
        let mut trace = self.trace.borrow_mut();
        if flags.contains(ClearFlags::COLOR) {
            self.fills.insert(trace.bound_framebuffer, color);
        }
        trace.clears.push(flags);
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let mut trace = self.trace.borrow_mut();
        match texture {
            Some(texture) => {
                trace.texture_units.insert(unit, texture);
            }
            None => {
                trace.texture_units.remove(&unit);
            }
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, format: VertexFormat) {
        if self.buffers.contains_key(&buffer) {
            self.bound_buffer = Some((buffer, format));
        }
    }

    fn draw(&mut self, primitive: PrimitiveType, first: u32, count: u32) {
        self.record_draw(primitive, first, count, false);
    }

    fn multi_draw(&mut self, primitive: PrimitiveType, firsts: &[u32], counts: &[u32]) {
        for (&first, &count) in firsts.iter().zip(counts) {
            self.record_draw(primitive, first, count, true);
        }
    }
}

impl HeadlessBackend {
    /// Size of the color `target` renders into, if it has one.
    fn color_size(&self, target: Option<FramebufferHandle>) -> Option<(u32, u32)> {
        match target {
            None => Some(self.trace.borrow().surface_size),
            Some(handle) => {
                let desc = &self.framebuffers.get(&handle)?.desc;
                (desc.color_attachment || desc.color_texture.is_some())
                    .then_some((desc.width, desc.height))
            }
        }
    }

    fn record_draw(&mut self, primitive: PrimitiveType, first: u32, count: u32, batched: bool) {
        let mut trace = self.trace.borrow_mut();
        let (buffer, format) = match self.bound_buffer {
            Some((buffer, format)) => (Some(buffer), Some(format)),
            None => (None, None),
        };
        let generation = buffer
            .and_then(|b| trace.buffer_generations.get(&b).copied())
            .unwrap_or(0);
        if let (Some(buffer), Some(format)) = (buffer, format) {
            let end = (first as u64 + count as u64) * format.stride();
            if end > self.buffers.get(&buffer).map_or(0, |b| b.len() as u64) {
                trace.out_of_bounds_accesses += 1;
            }
        }
        let record = DrawRecord {
            primitive,
            first,
            count,
            buffer,
            format,
            generation,
            program: trace.current_program,
            framebuffer: trace.bound_framebuffer,
            viewport: trace.viewport,
            units: trace.texture_units.clone(),
            batched,
        };
        trace.draws.push(record);
    }
}
