//! [`Backend`] on top of wgpu.
//!
//! The device speaks in GL terms: bind a target, set state, draw. wgpu wants
//! render passes and pipeline objects, so draws are recorded against the
//! bound target and replayed at the end of the frame. Pipelines are built
//! lazily from the program plus the cached state, uniforms go through a
//! per-frame arena with dynamic offsets, and texture units are resolved into
//! bind groups when a draw is recorded.

mod blit;
mod context;
mod frame;
mod pipeline;

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use log::{debug, error, info, warn};
use winit::window::Window;

use self::blit::{mip_view, source_rect, Blitter};
use self::context::GpuContext;
use self::frame::{BlitCommand, Command, DrawCommand, Segment, TargetViews, UniformArena};
use self::pipeline::{depth_format, GpuProgram, PipelineCache, PipelineKey};
use super::backend::{
    Backend, BufferHandle, Capabilities, ClearFlags, DepthBias, FramebufferDesc,
    FramebufferHandle, ProgramDesc, ProgramHandle, StateChange, TexFilter, TexWrap, TextureDesc,
    TextureHandle, TextureKind, UniformLocation, UniformValue, Viewport,
};
use super::shader::SlotKind;
use super::state::{Color, ColorMask, CullFace, TransparencyMode};
use super::texture::ImageData;
use super::vertex::{PrimitiveType, VertexFormat};
use crate::error::{DeviceError, Result};
use crate::settings::DeviceConfig;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    format: wgpu::TextureFormat,
    size: (u32, u32),
    mip_levels: u32,
    depth: bool,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

struct ColorTarget {
    /// Rendered into; multisampled when the framebuffer is.
    view: wgpu::TextureView,
    resolve: Option<wgpu::TextureView>,
    /// Single sampled color, read by blits.
    sampled: wgpu::TextureView,
    /// Texture behind `sampled`, read back by copies.
    texture: wgpu::Texture,
    /// Registry texture rendered into, when the caller supplied one.
    source: Option<TextureHandle>,
}

/// Single sampled color a copy or readback starts from.
struct ReadSource {
    view: wgpu::TextureView,
    texture: wgpu::Texture,
    format: wgpu::TextureFormat,
    size: (u32, u32),
    handle: Option<TextureHandle>,
}

struct GpuFramebuffer {
    size: (u32, u32),
    samples: u32,
    color: Option<ColorTarget>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
}

/// Bound in place of missing textures: opaque white for color slots and a
/// far-plane depth map (nothing in shadow) for depth slots.
struct Fallbacks {
    white: wgpu::TextureView,
    white_sampler: wgpu::Sampler,
    depth: wgpu::TextureView,
    depth_sampler: wgpu::Sampler,
}

impl Fallbacks {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let white = device.create_texture(&texture_descriptor(
            "White",
            (1, 1),
            1,
            1,
            COLOR_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ));
        write_rgba(queue, &white, (0, 0), (1, 1), &[255; 4]);

        let depth = device.create_texture(&texture_descriptor(
            "FarDepth",
            (1, 1),
            1,
            1,
            wgpu::TextureFormat::Depth32Float,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
        ));
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FarDepth Clear"),
        });
        let clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("FarDepth Clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        drop(clear);
        queue.submit(Some(encoder.finish()));

        Self {
            white: white.create_view(&wgpu::TextureViewDescriptor::default()),
            white_sampler: create_sampler(device, TextureKind::RenderTarget),
            depth: depth_view,
            depth_sampler: create_sampler(device, TextureKind::Depth { bits: 32 }),
        }
    }

    fn for_slot(&self, kind: SlotKind) -> (&wgpu::TextureView, &wgpu::Sampler) {
        match kind {
            SlotKind::Color => (&self.white, &self.white_sampler),
            SlotKind::Depth => (&self.depth, &self.depth_sampler),
        }
    }
}

/// What the device last asked for. Pipelines and bind groups are derived
/// from this when a draw is recorded.
struct RecordState {
    program: Option<ProgramHandle>,
    target: Option<FramebufferHandle>,
    depth_test: bool,
    depth_write: bool,
    cull: CullFace,
    transparency: TransparencyMode,
    color_mask: ColorMask,
    viewport: Viewport,
    depth_bias: Option<DepthBias>,
    units: BTreeMap<u32, TextureHandle>,
    vertices: Option<(BufferHandle, VertexFormat)>,
}

impl Default for RecordState {
    fn default() -> Self {
        Self {
            program: None,
            target: None,
            depth_test: false,
            depth_write: true,
            cull: CullFace::None,
            transparency: TransparencyMode::None,
            color_mask: ColorMask::ALL,
            viewport: Viewport::default(),
            depth_bias: None,
            units: BTreeMap::new(),
            vertices: None,
        }
    }
}

type TextureGroupKey = (ProgramHandle, Vec<Option<TextureHandle>>);

struct Gpu {
    ctx: GpuContext,
    textures: HashMap<TextureHandle, GpuTexture>,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    framebuffers: HashMap<FramebufferHandle, GpuFramebuffer>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    pipelines: PipelineCache,
    texture_groups: HashMap<TextureGroupKey, wgpu::BindGroup>,
    arena: UniformArena,
    blitter: Blitter,
    fallbacks: Fallbacks,
    segments: Vec<Segment>,
    /// Whether the last segment still accepts commands.
    open: bool,
    frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
}

pub struct WgpuBackend {
    window: Arc<Window>,
    config: DeviceConfig,
    gpu: Option<Gpu>,
    state: RecordState,
    next_id: u64,
}

impl WgpuBackend {
    /// The context is created later, by [`Backend::initialize`].
    pub fn new(window: Arc<Window>, config: &DeviceConfig) -> Self {
        Self {
            window,
            config: config.clone(),
            gpu: None,
            state: RecordState::default(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn gpu(&mut self) -> Result<&mut Gpu> {
        self.gpu
            .as_mut()
            .ok_or_else(|| DeviceError::Init("wgpu backend is not initialized".into()))
    }

    fn record_draw(&mut self, primitive: PrimitiveType, ranges: Vec<Range<u32>>) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.draw(&self.state, primitive, ranges);
        }
    }
}

impl Backend for WgpuBackend {
    fn initialize(&mut self) -> Result<Capabilities> {
        if let Some(gpu) = &self.gpu {
            return Ok(gpu.ctx.capabilities);
        }
        let ctx = pollster::block_on(GpuContext::new(self.window.clone(), &self.config))?;
        let capabilities = ctx.capabilities;
        let (width, height) = ctx.size();
        info!(
            "wgpu backend ready: {}x{} {:?}, max texture {}",
            width, height, ctx.config.format, capabilities.max_texture_size
        );

        self.gpu = Some(Gpu::new(ctx));
        self.state = RecordState {
            viewport: Viewport::new(0, 0, width as i32, height as i32),
            ..RecordState::default()
        };
        Ok(capabilities)
    }

    fn begin_frame(&mut self) -> Result<()> {
        let gpu = self.gpu()?;
        if gpu.frame.is_some() {
            return Ok(());
        }
        match gpu.ctx.surface.get_current_texture() {
            Ok(frame) => {
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                gpu.frame = Some((frame, view));
                gpu.open = false;
                Ok(())
            }
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                gpu.ctx.reconfigure();
                Err(DeviceError::Surface(err.to_string()))
            }
            Err(err) => Err(DeviceError::Surface(err.to_string())),
        }
    }

    fn end_frame(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        gpu.submit();
        if let Some((frame, _)) = gpu.frame.take() {
            self.window.pre_present_notify();
            frame.present();
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.ctx.resize(width, height);
            gpu.open = false;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        match &self.gpu {
            Some(gpu) => gpu.ctx.size(),
            None => {
                let size = self.window.inner_size();
                (size.width, size.height)
            }
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc, rgba: Option<&[u8]>) -> Result<TextureHandle> {
        let handle = TextureHandle(self.next_id());
        let gpu = self.gpu()?;
        let texture = gpu.create_texture(desc, rgba)?;
        gpu.textures.insert(handle, texture);
        Ok(handle)
    }

    fn update_texture(
        &mut self,
        texture: TextureHandle,
        origin: (u32, u32),
        size: (u32, u32),
        rgba: &[u8],
    ) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let Some(record) = gpu.textures.get(&texture) else {
            return;
        };
        if record.depth {
            warn!("Cannot upload pixels into depth texture {:?}", texture);
            return;
        }
        let fits = origin.0.checked_add(size.0).is_some_and(|end| end <= record.size.0)
            && origin.1.checked_add(size.1).is_some_and(|end| end <= record.size.1);
        if !fits || rgba.len() < (size.0 * size.1 * 4) as usize {
            warn!(
                "Texture update {:?}+{:?} does not fit texture {:?}",
                origin, size, texture
            );
            return;
        }
        if size.0 > 0 && size.1 > 0 {
            write_rgba(&gpu.ctx.queue, &record.texture, origin, size, rgba);
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let Some(record) = gpu.textures.get(&texture) else {
            return;
        };
        if record.depth {
            return;
        }
        gpu.blitter.generate_mipmaps(
            &gpu.ctx.device,
            &gpu.ctx.queue,
            &record.texture,
            record.format,
            record.mip_levels,
        );
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.gpu.as_mut() {
            if gpu.textures.remove(&texture).is_some() {
                gpu.texture_groups
                    .retain(|(_, handles), _| !handles.contains(&Some(texture)));
            }
        }
        self.state.units.retain(|_, bound| *bound != texture);
    }

    fn create_buffer(&mut self, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle(self.next_id());
        if let Some(gpu) = self.gpu.as_mut() {
            let buffer = create_vertex_buffer(&gpu.ctx.device, data.len() as u64);
            if !data.is_empty() {
                write_padded(&gpu.ctx.queue, &buffer.buffer, 0, data);
            }
            gpu.buffers.insert(handle, buffer);
        }
        handle
    }

    fn orphan_buffer(&mut self, buffer: BufferHandle, size: u64) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        if gpu.buffers.contains_key(&buffer) {
            // draws already recorded keep the old storage alive
            gpu.buffers
                .insert(buffer, create_vertex_buffer(&gpu.ctx.device, size));
        }
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        let Some(record) = gpu.buffers.get(&buffer) else {
            return;
        };
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset + data.len() as u64 > record.size {
            warn!(
                "Buffer update at {} of {} bytes does not fit buffer {:?} ({} bytes)",
                offset,
                data.len(),
                buffer,
                record.size
            );
            return;
        }
        if !data.is_empty() {
            write_padded(&gpu.ctx.queue, &record.buffer, offset, data);
        }
    }

    fn map_buffer_unsynchronized(
        &mut self,
        _buffer: BufferHandle,
        _offset: u64,
        _len: u64,
    ) -> Option<&mut [u8]> {
        // wgpu cannot map a buffer the GPU may still read; callers upload instead
        None
    }

    fn unmap_buffer(&mut self, _buffer: BufferHandle) {}

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.buffers.remove(&buffer);
        }
        if self.state.vertices.is_some_and(|(bound, _)| bound == buffer) {
            self.state.vertices = None;
        }
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        let handle = FramebufferHandle(self.next_id());
        let gpu = self.gpu()?;
        let framebuffer = gpu.create_framebuffer(desc)?;
        gpu.framebuffers.insert(handle, framebuffer);
        Ok(handle)
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: Option<TextureHandle>,
    ) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };
        if self.state.target == Some(framebuffer) {
            gpu.open = false;
        }
        gpu.attach_depth(framebuffer, texture)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        if self.state.target == framebuffer {
            return;
        }
        self.state.target = framebuffer;
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.open = false;
        }
    }

    fn blit_to_screen(&mut self, framebuffer: FramebufferHandle, src: Viewport, dst: Viewport) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.blit(framebuffer, src, dst);
        }
    }

    fn copy_to_texture(&mut self, texture: TextureHandle, offset: (u32, u32), src: Viewport) {
        let target = self.state.target;
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.copy_to_texture(target, texture, offset, src);
        }
    }

    fn read_pixels(&mut self) -> Option<ImageData> {
        let target = self.state.target;
        self.gpu.as_mut()?.read_pixels(target)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.framebuffers.remove(&framebuffer);
            if self.state.target == Some(framebuffer) {
                gpu.open = false;
            }
        }
        if self.state.target == Some(framebuffer) {
            self.state.target = None;
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle> {
        let handle = ProgramHandle(self.next_id());
        let gpu = self.gpu()?;
        let program = GpuProgram::compile(&gpu.ctx.device, desc)?;
        debug!(
            "Compiled program '{}' ({} uniform bytes, {} texture slots)",
            program.name,
            program.uniforms.size(),
            program.textures.len()
        );
        gpu.programs.insert(handle, program);
        Ok(handle)
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.state.program = program;
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: &UniformValue) {
        let Some(record) = self
            .gpu
            .as_mut()
            .and_then(|gpu| gpu.programs.get_mut(&program))
        else {
            return;
        };
        if record.uniforms.write(&mut record.block, location, value) {
            record.pushed = None;
        } else {
            warn!(
                "Uniform {:?} of '{}' does not accept {:?}",
                location, record.name, value
            );
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.programs.remove(&program);
            gpu.pipelines.forget_program(program);
            gpu.arena.forget(program);
            gpu.texture_groups.retain(|(owner, _), _| *owner != program);
        }
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn apply_state(&mut self, change: StateChange) {
        let state = &mut self.state;
        match change {
            StateChange::DepthTest(enabled) => state.depth_test = enabled,
            StateChange::DepthMask(enabled) => state.depth_write = enabled,
            StateChange::CullFace(mode) => state.cull = mode,
            StateChange::Transparency(mode) => state.transparency = mode,
            StateChange::ColorMask(mask) => state.color_mask = mask,
            // the clear color arrives with every clear
            StateChange::ClearColor(_) => {}
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.state.depth_bias = bias;
    }

    fn clear(&mut self, flags: ClearFlags, color: Color, depth: f32) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.clear(self.state.target, flags, color, depth);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        match texture {
            Some(texture) => self.state.units.insert(unit, texture),
            None => self.state.units.remove(&unit),
        };
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, format: VertexFormat) {
        self.state.vertices = Some((buffer, format));
    }

    fn draw(&mut self, primitive: PrimitiveType, first: u32, count: u32) {
        self.record_draw(primitive, vec![first..first + count]);
    }

    fn multi_draw(&mut self, primitive: PrimitiveType, firsts: &[u32], counts: &[u32]) {
        let ranges = firsts
            .iter()
            .zip(counts)
            .filter(|(_, count)| **count > 0)
            .map(|(&first, &count)| first..first + count)
            .collect();
        self.record_draw(primitive, ranges);
    }
}

impl Gpu {
    fn new(ctx: GpuContext) -> Self {
        let arena = UniformArena::new(&ctx.device);
        let blitter = Blitter::new(&ctx.device);
        let fallbacks = Fallbacks::new(&ctx.device, &ctx.queue);
        Self {
            ctx,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: PipelineCache::default(),
            texture_groups: HashMap::new(),
            arena,
            blitter,
            fallbacks,
            segments: Vec::new(),
            open: false,
            frame: None,
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc, rgba: Option<&[u8]>) -> Result<GpuTexture> {
        let max = self.ctx.capabilities.max_texture_size;
        let size = (desc.width, desc.height);
        if size.0 == 0 || size.1 == 0 || size.0 > max || size.1 > max {
            return Err(DeviceError::InvalidTexture(format!(
                "size {}x{} outside 1..={}",
                size.0, size.1, max
            )));
        }

        let (format, usage, mip_levels, depth) = match desc.kind {
            TextureKind::Color { mip_levels, .. } => (
                COLOR_FORMAT,
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::RENDER_ATTACHMENT,
                mip_levels.max(1),
                false,
            ),
            TextureKind::Depth { bits } => (
                depth_format(bits),
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                1,
                true,
            ),
            TextureKind::RenderTarget => (
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                1,
                false,
            ),
        };

        if let Some(rgba) = rgba {
            if depth || rgba.len() != (size.0 * size.1 * 4) as usize {
                return Err(DeviceError::InvalidTexture(format!(
                    "{} bytes for a {}x{} texture",
                    rgba.len(),
                    size.0,
                    size.1
                )));
            }
        }

        let texture = self.ctx.device.create_texture(&texture_descriptor(
            "Texture", size, mip_levels, 1, format, usage,
        ));
        if let Some(rgba) = rgba {
            write_rgba(&self.ctx.queue, &texture, (0, 0), size, rgba);
        }

        Ok(GpuTexture {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler: create_sampler(&self.ctx.device, desc.kind),
            texture,
            format,
            size,
            mip_levels,
            depth,
        })
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<GpuFramebuffer> {
        let max = self.ctx.capabilities.max_renderbuffer_size;
        let size = (desc.width, desc.height);
        if size.0 == 0 || size.1 == 0 || size.0 > max || size.1 > max {
            return Err(DeviceError::IncompleteFramebuffer(format!(
                "size {}x{} outside 1..={}",
                size.0, size.1, max
            )));
        }
        let samples = if desc.samples > 1 {
            self.ctx.capabilities.max_samples
        } else {
            1
        };

        let color = match desc.color_texture {
            Some(handle) => {
                let record = self
                    .textures
                    .get(&handle)
                    .filter(|t| !t.depth && t.size == size)
                    .ok_or_else(|| {
                        DeviceError::IncompleteFramebuffer(format!(
                            "color texture {:?} is missing or mismatched",
                            handle
                        ))
                    })?;
                let (view, texture) = (record.view.clone(), record.texture.clone());
                Some(self.color_target(view, texture, Some(handle), size, samples))
            }
            None if desc.color_attachment => {
                let texture = self.attachment(
                    COLOR_FORMAT,
                    size,
                    1,
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Some(self.color_target(view, texture, None, size, samples))
            }
            None => None,
        };

        let depth = match desc.depth_texture {
            Some(handle) if samples == 1 => {
                let record = self
                    .textures
                    .get(&handle)
                    .filter(|t| t.depth && t.size == size)
                    .ok_or_else(|| {
                        DeviceError::IncompleteFramebuffer(format!(
                            "depth texture {:?} is missing or mismatched",
                            handle
                        ))
                    })?;
                Some((record.view.clone(), record.format))
            }
            _ if desc.depth_bits > 0 => {
                if desc.depth_texture.is_some() {
                    warn!("Multisampled framebuffers keep depth internal; the depth texture stays empty");
                }
                let format = depth_format(desc.depth_bits);
                let view = self
                    .attachment(format, size, samples, wgpu::TextureUsages::RENDER_ATTACHMENT)
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Some((view, format))
            }
            _ => None,
        };

        Ok(GpuFramebuffer {
            size,
            samples,
            color,
            depth,
        })
    }

    fn attachment(
        &self,
        format: wgpu::TextureFormat,
        size: (u32, u32),
        samples: u32,
        usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
        self.ctx
            .device
            .create_texture(&texture_descriptor("Attachment", size, 1, samples, format, usage))
    }

    fn color_target(
        &self,
        view: wgpu::TextureView,
        texture: wgpu::Texture,
        source: Option<TextureHandle>,
        size: (u32, u32),
        samples: u32,
    ) -> ColorTarget {
        if samples > 1 {
            let msaa = self
                .attachment(COLOR_FORMAT, size, samples, wgpu::TextureUsages::RENDER_ATTACHMENT)
                .create_view(&wgpu::TextureViewDescriptor::default());
            ColorTarget {
                view: msaa,
                resolve: Some(view.clone()),
                sampled: view,
                texture,
                source,
            }
        } else {
            ColorTarget {
                view: view.clone(),
                resolve: None,
                sampled: view,
                texture,
                source,
            }
        }
    }

    fn read_source(&self, target: Option<FramebufferHandle>) -> Option<ReadSource> {
        let Some(handle) = target else {
            let (frame, view) = self.frame.as_ref()?;
            return Some(ReadSource {
                view: view.clone(),
                texture: frame.texture.clone(),
                format: self.ctx.config.format,
                size: self.ctx.size(),
                handle: None,
            });
        };
        let framebuffer = self.framebuffers.get(&handle)?;
        let color = framebuffer.color.as_ref()?;
        Some(ReadSource {
            view: color.sampled.clone(),
            texture: color.texture.clone(),
            format: COLOR_FORMAT,
            size: framebuffer.size,
            handle: color.source,
        })
    }

    /// Draw `src` of the bound target into level 0 of `texture`.
    fn copy_to_texture(
        &mut self,
        target: Option<FramebufferHandle>,
        texture: TextureHandle,
        offset: (u32, u32),
        src: Viewport,
    ) {
        let Some(source) = self.read_source(target) else {
            warn!("Nothing to copy from {:?}", target);
            return;
        };
        if target.is_none()
            && !self
                .ctx
                .config
                .usage
                .contains(wgpu::TextureUsages::TEXTURE_BINDING)
        {
            warn!("Surface cannot be sampled, copy to {:?} skipped", texture);
            return;
        }
        if source.handle == Some(texture) {
            warn!("Texture {:?} cannot be copied into itself", texture);
            return;
        }
        let Some((destination, format, size)) = self
            .textures
            .get(&texture)
            .filter(|t| !t.depth)
            .map(|t| (t.texture.clone(), t.format, t.size))
        else {
            return;
        };

        let views = TargetViews {
            color: Some(mip_view(
                &destination,
                format,
                0,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )),
            resolve: None,
            depth: None,
            color_format: Some(format),
            depth_format: None,
            samples: 1,
            size,
        };
        let dst = Viewport::new(offset.0 as i32, offset.1 as i32, src.width, src.height);
        let Some(viewport) = views.flip_viewport(dst) else {
            return;
        };

        let rect = source_rect(src.x, src.y, src.width, src.height, source.size);
        let bind_group = self.blitter.source(&self.ctx.device, &source.view, rect);
        let pipeline = self.blitter.pipeline(&self.ctx.device, format);

        let mut segment = Segment::new(None, views);
        segment.commands.push(Command::Blit(BlitCommand {
            pipeline,
            source: bind_group,
            viewport,
        }));
        self.segments.push(segment);
        self.open = false;
    }

    /// Submit what has been recorded so far, then copy the bound target's
    /// color into a mappable buffer and wait for it.
    fn read_pixels(&mut self, target: Option<FramebufferHandle>) -> Option<ImageData> {
        let source = self.read_source(target)?;
        if target.is_none() && !self.ctx.config.usage.contains(wgpu::TextureUsages::COPY_SRC) {
            warn!("Surface does not allow reading back pixels");
            return None;
        }
        let swizzle = match source.format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => false,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => true,
            other => {
                warn!("Cannot read back pixels of format {:?}", other);
                return None;
            }
        };

        self.submit();

        let (width, height) = source.size;
        let row = width as u64 * 4;
        let padded_row = frame::align_up(row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64);
        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: padded_row * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if let Err(err) = self.ctx.device.poll(wgpu::PollType::wait_indefinitely()) {
            error!("Waiting for pixel readback failed: {}", err);
            return None;
        }
        if !matches!(rx.recv(), Ok(Ok(()))) {
            error!("Pixel readback buffer could not be mapped");
            return None;
        }

        let mut pixels = Vec::with_capacity((row * height as u64) as usize);
        {
            let mapped = slice.get_mapped_range();
            for line in mapped.chunks_exact(padded_row as usize) {
                pixels.extend_from_slice(&line[..row as usize]);
            }
        }
        buffer.unmap();

        if swizzle {
            for texel in pixels.chunks_exact_mut(4) {
                texel.swap(0, 2);
            }
        }
        Some(ImageData::rgba(width, height, pixels))
    }

    fn attach_depth(&mut self, framebuffer: FramebufferHandle, texture: Option<TextureHandle>) -> bool {
        let Some(target) = self.framebuffers.get_mut(&framebuffer) else {
            return false;
        };
        match texture {
            None => target.depth = None,
            Some(handle) => {
                let Some(record) = self.textures.get(&handle).filter(|t| t.depth) else {
                    return false;
                };
                if target.samples > 1 || (target.color.is_some() && record.size != target.size) {
                    return false;
                }
                target.depth = Some((record.view.clone(), record.format));
                if target.color.is_none() {
                    target.size = record.size;
                }
            }
        }
        target.color.is_some() || target.depth.is_some()
    }

    fn target_views(&self, target: Option<FramebufferHandle>) -> Option<TargetViews> {
        let Some(handle) = target else {
            return Some(TargetViews {
                color: self.frame.as_ref().map(|(_, view)| view.clone()),
                resolve: None,
                depth: Some(self.ctx.depth_view.clone()),
                color_format: Some(self.ctx.config.format),
                depth_format: Some(self.ctx.depth_format),
                samples: 1,
                size: self.ctx.size(),
            });
        };
        let framebuffer = self.framebuffers.get(&handle)?;
        Some(TargetViews {
            color: framebuffer.color.as_ref().map(|c| c.view.clone()),
            resolve: framebuffer.color.as_ref().and_then(|c| c.resolve.clone()),
            depth: framebuffer.depth.as_ref().map(|(view, _)| view.clone()),
            color_format: framebuffer.color.as_ref().map(|_| COLOR_FORMAT),
            depth_format: framebuffer.depth.as_ref().map(|(_, format)| *format),
            samples: framebuffer.samples,
            size: framebuffer.size,
        })
    }

    /// The segment commands for `target` go into, opening one if needed.
    fn segment(&mut self, target: Option<FramebufferHandle>) -> Option<&mut Segment> {
        if !self.open {
            let views = self.target_views(target)?;
            self.segments.push(Segment::new(target, views));
            self.open = true;
        }
        self.segments.last_mut()
    }

    fn clear(&mut self, target: Option<FramebufferHandle>, flags: ClearFlags, color: Color, depth: f32) {
        // a clear after draws starts a new pass that loads with the clear
        if self.open && self.segments.last().is_some_and(|s| !s.commands.is_empty()) {
            self.open = false;
        }
        let Some(segment) = self.segment(target) else {
            return;
        };
        if flags.contains(ClearFlags::COLOR) && segment.views.color.is_some() {
            segment.clear_color = Some(wgpu::Color {
                r: color.r as f64,
                g: color.g as f64,
                b: color.b as f64,
                a: color.a as f64,
            });
        }
        if flags.contains(ClearFlags::DEPTH) && segment.views.depth.is_some() {
            segment.clear_depth = Some(depth);
        }
    }

    fn draw(&mut self, state: &RecordState, primitive: PrimitiveType, ranges: Vec<Range<u32>>) {
        if ranges.iter().all(|r| r.is_empty()) {
            return;
        }
        if primitive.is_triangles() && state.cull == CullFace::Both {
            return;
        }
        let (Some(program_handle), Some((buffer_handle, format))) = (state.program, state.vertices)
        else {
            return;
        };

        let Some(segment) = self.segment(state.target) else {
            return;
        };
        let Some(viewport) = segment.views.flip_viewport(state.viewport) else {
            return;
        };
        let key = PipelineKey {
            program: program_handle,
            primitive,
            depth_test: state.depth_test,
            depth_write: state.depth_write,
            cull: state.cull,
            transparency: state.transparency,
            color_mask: state.color_mask,
            depth_bias: PipelineKey::bias(state.depth_bias),
            color_format: segment.views.color_format,
            depth_format: segment.views.depth_format,
            samples: segment.views.samples,
        };

        let Some(program) = self.programs.get_mut(&program_handle) else {
            return;
        };
        if program.vertex_format != format {
            debug!(
                "Program '{}' cannot draw {:?} vertices",
                program.name, format
            );
            return;
        }
        let Some(buffer) = self.buffers.get(&buffer_handle) else {
            return;
        };
        let end = ranges.iter().map(|r| r.end).max().unwrap_or(0) as u64;
        if end * format.stride() > buffer.size {
            warn!(
                "Draw of {} vertices overruns buffer {:?}",
                end, buffer_handle
            );
            return;
        }
        let Some(pipeline) = self.pipelines.get_or_build(&self.ctx.device, program, key) else {
            return;
        };

        let uniform_offset = match program.pushed {
            Some(offset) => offset,
            None => {
                let offset = self.arena.push(&program.block);
                program.pushed = Some(offset);
                offset
            }
        };

        let handles: Vec<Option<TextureHandle>> = program
            .textures
            .iter()
            .map(|slot| {
                state.units.get(&slot.unit).copied().filter(|handle| {
                    self.textures
                        .get(handle)
                        .is_some_and(|t| t.depth == (slot.kind == SlotKind::Depth))
                })
            })
            .collect();
        let textures = &self.textures;
        let fallbacks = &self.fallbacks;
        let device = &self.ctx.device;
        let texture_group = self
            .texture_groups
            .entry((program_handle, handles))
            .or_insert_with_key(|(_, handles)| {
                let mut entries = Vec::with_capacity(handles.len() * 2);
                for (index, (slot, handle)) in program.textures.iter().zip(handles).enumerate() {
                    let (view, sampler) = match handle.and_then(|h| textures.get(&h)) {
                        Some(texture) => (&texture.view, &texture.sampler),
                        None => fallbacks.for_slot(slot.kind),
                    };
                    let binding = index as u32 * 2;
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: binding + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("PassTextures"),
                    layout: &program.texture_layout,
                    entries: &entries,
                })
            })
            .clone();

        let command = Command::Draw(DrawCommand {
            pipeline,
            program: program_handle,
            uniform_layout: program.uniform_layout.clone(),
            uniform_size: program.uniforms.size() as u64,
            uniform_offset,
            textures: texture_group,
            vertices: buffer.buffer.clone(),
            ranges,
            viewport,
        });
        if let Some(segment) = self.segments.last_mut() {
            segment.commands.push(command);
        }
    }

    fn blit(&mut self, framebuffer: FramebufferHandle, src: Viewport, dst: Viewport) {
        let Some(source) = self
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| fb.color.as_ref().map(|c| (c.sampled.clone(), fb.size)))
        else {
            warn!("Framebuffer {:?} has no color to blit", framebuffer);
            return;
        };
        let Some(views) = self.target_views(None).filter(|v| v.color.is_some()) else {
            return;
        };
        let Some(viewport) = views.flip_viewport(dst) else {
            return;
        };

        let (view, size) = source;
        let rect = source_rect(src.x, src.y, src.width, src.height, size);
        let bind_group = self.blitter.source(&self.ctx.device, &view, rect);
        let pipeline = self.blitter.pipeline(&self.ctx.device, self.ctx.config.format);

        // blits get their own pass without the window depth buffer
        let mut segment = Segment::new(
            None,
            TargetViews {
                depth: None,
                depth_format: None,
                ..views
            },
        );
        segment.commands.push(Command::Blit(BlitCommand {
            pipeline,
            source: bind_group,
            viewport,
        }));
        self.segments.push(segment);
        self.open = false;
    }

    /// Replay every recorded segment and submit the frame's work.
    fn submit(&mut self) {
        let segments = std::mem::take(&mut self.segments);
        self.open = false;

        self.arena.flush(&self.ctx.device, &self.ctx.queue);
        for segment in &segments {
            for command in &segment.commands {
                if let Command::Draw(draw) = command {
                    self.arena.prepare(
                        &self.ctx.device,
                        draw.program,
                        &draw.uniform_layout,
                        draw.uniform_size,
                    );
                }
            }
        }

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Encoder"),
            });
        for segment in &segments {
            // window segments without an acquired frame have nowhere to go
            if segment.target.is_none() && segment.views.color.is_none() {
                continue;
            }
            segment.record(&mut encoder, &self.arena);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        self.arena.reset();
        for program in self.programs.values_mut() {
            program.pushed = None;
        }
    }
}

fn texture_descriptor(
    label: &'static str,
    size: (u32, u32),
    mip_levels: u32,
    samples: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureDescriptor<'static> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: mip_levels,
        sample_count: samples,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    }
}

fn create_sampler(device: &wgpu::Device, kind: TextureKind) -> wgpu::Sampler {
    match kind {
        TextureKind::Color {
            filter,
            wrap,
            anisotropy,
            ..
        } => {
            let address = match wrap {
                TexWrap::Repeat => wgpu::AddressMode::Repeat,
                TexWrap::Clamp => wgpu::AddressMode::ClampToEdge,
            };
            let (mag, min, mip) = match filter {
                TexFilter::Nearest => (
                    wgpu::FilterMode::Nearest,
                    wgpu::FilterMode::Nearest,
                    wgpu::FilterMode::Nearest,
                ),
                TexFilter::Bilinear => (
                    wgpu::FilterMode::Linear,
                    wgpu::FilterMode::Linear,
                    wgpu::FilterMode::Nearest,
                ),
                TexFilter::Trilinear => (
                    wgpu::FilterMode::Linear,
                    wgpu::FilterMode::Linear,
                    wgpu::FilterMode::Linear,
                ),
            };
            // anisotropy needs every filter linear
            let anisotropy_clamp = if filter == TexFilter::Trilinear {
                anisotropy.clamp(1, 16) as u16
            } else {
                1
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Texture Sampler"),
                address_mode_u: address,
                address_mode_v: address,
                address_mode_w: address,
                mag_filter: mag,
                min_filter: min,
                mipmap_filter: mip,
                anisotropy_clamp,
                ..Default::default()
            })
        }
        TextureKind::Depth { .. } => device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        }),
        TextureKind::RenderTarget => device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Target Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }),
    }
}

fn write_rgba(queue: &wgpu::Queue, texture: &wgpu::Texture, origin: (u32, u32), size: (u32, u32), rgba: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: origin.0,
                y: origin.1,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        &rgba[..(size.0 * size.1 * 4) as usize],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * size.0),
            rows_per_image: Some(size.1),
        },
        wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
    );
}

fn create_vertex_buffer(device: &wgpu::Device, size: u64) -> GpuBuffer {
    let size = frame::align_up(size.max(1), wgpu::COPY_BUFFER_ALIGNMENT);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("VertexBuffer"),
        size,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    GpuBuffer { buffer, size }
}

/// `write_buffer` wants sizes in whole words.
fn write_padded(queue: &wgpu::Queue, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
    if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
        queue.write_buffer(buffer, offset, data);
    } else {
        let mut padded = data.to_vec();
        padded.resize(frame::align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
        queue.write_buffer(buffer, offset, &padded);
    }
}
