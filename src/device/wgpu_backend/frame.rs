//! Draw recording. The device issues draws one at a time against whatever
//! target is bound; they are collected into segments (one render pass each)
//! and replayed into a single command encoder when the frame ends.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;

use crate::device::backend::{FramebufferHandle, ProgramHandle, Viewport};

/// The attachments of one render pass, captured when the segment opens.
#[derive(Clone)]
pub(super) struct TargetViews {
    pub color: Option<wgpu::TextureView>,
    pub resolve: Option<wgpu::TextureView>,
    pub depth: Option<wgpu::TextureView>,
    pub color_format: Option<wgpu::TextureFormat>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub samples: u32,
    pub size: (u32, u32),
}

impl TargetViews {
    /// Viewport with a bottom-left origin, flipped to wgpu's top-left one and
    /// clipped to the target. `None` when nothing is left.
    pub fn flip_viewport(&self, viewport: Viewport) -> Option<[f32; 4]> {
        let (width, height) = (self.size.0 as i32, self.size.1 as i32);
        let top = height - viewport.y - viewport.height;
        let x0 = viewport.x.clamp(0, width);
        let y0 = top.clamp(0, height);
        let x1 = (viewport.x + viewport.width).clamp(0, width);
        let y1 = (top + viewport.height).clamp(0, height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some([x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32])
    }
}

pub(super) struct DrawCommand {
    pub pipeline: wgpu::RenderPipeline,
    pub program: ProgramHandle,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub uniform_size: u64,
    pub uniform_offset: u32,
    pub textures: wgpu::BindGroup,
    pub vertices: wgpu::Buffer,
    pub ranges: Vec<Range<u32>>,
    pub viewport: [f32; 4],
}

pub(super) struct BlitCommand {
    pub pipeline: wgpu::RenderPipeline,
    pub source: wgpu::BindGroup,
    pub viewport: [f32; 4],
}

pub(super) enum Command {
    Draw(DrawCommand),
    Blit(BlitCommand),
}

/// Consecutive work against one target.
pub(super) struct Segment {
    pub target: Option<FramebufferHandle>,
    pub views: TargetViews,
    pub clear_color: Option<wgpu::Color>,
    pub clear_depth: Option<f32>,
    pub commands: Vec<Command>,
}

impl Segment {
    pub fn new(target: Option<FramebufferHandle>, views: TargetViews) -> Self {
        Self {
            target,
            views,
            clear_color: None,
            clear_depth: None,
            commands: Vec::new(),
        }
    }

    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, arena: &UniformArena) {
        if self.views.color.is_none() && self.views.depth.is_none() {
            return;
        }

        let color_attachments: Vec<_> = self
            .views
            .color
            .as_ref()
            .map(|view| wgpu::RenderPassColorAttachment {
                view,
                resolve_target: self.views.resolve.as_ref(),
                depth_slice: None,
                ops: wgpu::Operations {
                    load: self
                        .clear_color
                        .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                },
            })
            .into_iter()
            .map(Some)
            .collect();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Segment"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: self.depth_attachment(),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        replay(&mut pass, &self.commands, arena);
    }

    fn depth_attachment(&self) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
        self.views
            .depth
            .as_ref()
            .map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: self
                        .clear_depth
                        .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            })
    }
}

fn replay(pass: &mut wgpu::RenderPass<'_>, commands: &[Command], arena: &UniformArena) {
    for command in commands {
        match command {
            Command::Draw(draw) => {
                let Some(uniforms) = arena.bind_group(draw.program) else {
                    continue;
                };
                let [x, y, w, h] = draw.viewport;
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                pass.set_bind_group(1, &draw.textures, &[]);
                pass.set_vertex_buffer(0, draw.vertices.slice(..));
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                for range in &draw.ranges {
                    pass.draw(range.clone(), 0..1);
                }
            }
            Command::Blit(blit) => {
                let [x, y, w, h] = blit.viewport;
                pass.set_pipeline(&blit.pipeline);
                pass.set_bind_group(0, &blit.source, &[]);
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.draw(0..3, 0..1);
            }
        }
    }
}

const INITIAL_ARENA_SIZE: u64 = 64 * 1024;

/// Per-frame uniform storage. Every draw gets a snapshot of its program's
/// block at an aligned offset; the whole arena is uploaded once before the
/// frame is submitted.
pub(super) struct UniformArena {
    data: Vec<u8>,
    buffer: wgpu::Buffer,
    capacity: u64,
    alignment: u64,
    bind_groups: HashMap<ProgramHandle, wgpu::BindGroup>,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        Self {
            data: Vec::new(),
            buffer: arena_buffer(device, INITIAL_ARENA_SIZE),
            capacity: INITIAL_ARENA_SIZE,
            alignment,
            bind_groups: HashMap::new(),
        }
    }

    pub fn push(&mut self, block: &[u8]) -> u32 {
        let offset = align_up(self.data.len() as u64, self.alignment);
        self.data.resize(offset as usize, 0);
        self.data.extend_from_slice(block);
        offset as u32
    }

    /// Upload everything pushed this frame, growing the buffer when needed.
    pub fn flush(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let required = self.data.len() as u64;
        if required > self.capacity {
            self.capacity = required.max(self.capacity * 2);
            self.buffer = arena_buffer(device, self.capacity);
            self.bind_groups.clear();
            log::debug!("Uniform arena grown to {} bytes", self.capacity);
        }
        if !self.data.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.data);
        }
    }

    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        program: ProgramHandle,
        layout: &wgpu::BindGroupLayout,
        size: u64,
    ) {
        let buffer = &self.buffer;
        self.bind_groups.entry(program).or_insert_with(|| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("PassUniforms"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: 0,
                        size: NonZeroU64::new(size),
                    }),
                }],
            })
        });
    }

    pub fn bind_group(&self, program: ProgramHandle) -> Option<&wgpu::BindGroup> {
        self.bind_groups.get(&program)
    }

    pub fn forget(&mut self, program: ProgramHandle) {
        self.bind_groups.remove(&program);
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }
}

fn arena_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("UniformArena"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(super) fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn views(width: u32, height: u32) -> TargetViews {
        TargetViews {
            color: None,
            resolve: None,
            depth: None,
            color_format: None,
            depth_format: None,
            samples: 1,
            size: (width, height),
        }
    }

    #[test]
    fn viewport_origin_moves_to_the_top() {
        let target = views(512, 512);
        assert_eq!(
            target.flip_viewport(Viewport::new(0, 0, 512, 512)),
            Some([0.0, 0.0, 512.0, 512.0])
        );
        assert_eq!(
            target.flip_viewport(Viewport::new(0, 0, 256, 128)),
            Some([0.0, 384.0, 256.0, 128.0])
        );
    }

    #[test]
    fn viewport_is_clipped_to_the_target() {
        let target = views(100, 100);
        assert_eq!(
            target.flip_viewport(Viewport::new(50, 0, 100, 100)),
            Some([50.0, 0.0, 50.0, 100.0])
        );
        assert_eq!(target.flip_viewport(Viewport::new(200, 0, 10, 10)), None);
        assert_eq!(target.flip_viewport(Viewport::new(0, 0, 0, 10)), None);
    }

    #[test]
    fn offsets_are_aligned() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(300, 256), 512);
    }
}
