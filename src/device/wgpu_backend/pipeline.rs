use std::collections::HashMap;
use std::num::NonZeroU64;

use log::error;

use crate::device::backend::{DepthBias, ProgramDesc, ProgramHandle};
use crate::device::shader::{SlotKind, TextureSlot, UniformLayout};
use crate::device::state::{ColorMask, CullFace, TransparencyMode};
use crate::device::vertex::{PrimitiveType, VertexFormat};
use crate::error::{DeviceError, Result};

/// A compiled pass program and the layouts its generated header implies.
pub(super) struct GpuProgram {
    pub name: String,
    pub module: wgpu::ShaderModule,
    pub layout: wgpu::PipelineLayout,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub uniforms: UniformLayout,
    pub textures: Vec<TextureSlot>,
    pub vertex_format: VertexFormat,
    /// CPU copy of the uniform block, pushed to the frame arena on draw.
    pub block: Vec<u8>,
    /// Arena offset of the last push this frame, cleared when `block` changes.
    pub pushed: Option<u32>,
}

impl GpuProgram {
    pub fn compile(device: &wgpu::Device, desc: &ProgramDesc) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::ShaderCompile {
                program: desc.name.clone(),
                message: err.to_string(),
            });
        }

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PassUniformLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(desc.uniforms.size() as u64),
                },
                count: None,
            }],
        });

        let entries: Vec<_> = desc
            .textures
            .iter()
            .enumerate()
            .flat_map(|(index, slot)| slot_entries(index as u32 * 2, slot.kind))
            .collect();
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PassTextureLayout"),
            entries: &entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&desc.name),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            name: desc.name.clone(),
            module,
            layout,
            uniform_layout,
            texture_layout,
            uniforms: desc.uniforms.clone(),
            textures: desc.textures.clone(),
            vertex_format: desc.vertex_format,
            block: vec![0; desc.uniforms.size() as usize],
            pushed: None,
        })
    }
}

fn slot_entries(binding: u32, kind: SlotKind) -> [wgpu::BindGroupLayoutEntry; 2] {
    let (sample_type, sampler) = match kind {
        SlotKind::Color => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::SamplerBindingType::Filtering,
        ),
        SlotKind::Depth => (
            wgpu::TextureSampleType::Depth,
            wgpu::SamplerBindingType::Comparison,
        ),
    };
    [
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler),
            count: None,
        },
    ]
}

/// Everything a draw's pipeline depends on: the program, the cached fixed
/// function state and the formats of the target it renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub program: ProgramHandle,
    pub primitive: PrimitiveType,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull: CullFace,
    pub transparency: TransparencyMode,
    pub color_mask: ColorMask,
    /// Constant offset and slope factor bits.
    pub depth_bias: Option<(i32, u32)>,
    pub color_format: Option<wgpu::TextureFormat>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub samples: u32,
}

impl PipelineKey {
    pub fn bias(bias: Option<DepthBias>) -> Option<(i32, u32)> {
        bias.map(|b| (b.units as i32, b.factor.to_bits()))
    }
}

/// Pipelines built on demand. Failed builds are remembered so a broken
/// combination is reported once.
#[derive(Default)]
pub(super) struct PipelineCache {
    pipelines: HashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
}

impl PipelineCache {
    pub fn get_or_build(
        &mut self,
        device: &wgpu::Device,
        program: &GpuProgram,
        key: PipelineKey,
    ) -> Option<wgpu::RenderPipeline> {
        self.pipelines
            .entry(key)
            .or_insert_with(|| build_pipeline(device, program, &key))
            .clone()
    }

    pub fn forget_program(&mut self, program: ProgramHandle) {
        self.pipelines.retain(|key, _| key.program != program);
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    program: &GpuProgram,
    key: &PipelineKey,
) -> Option<wgpu::RenderPipeline> {
    let triangles = key.primitive.is_triangles();
    let bias = match key.depth_bias {
        Some((constant, slope)) if triangles => wgpu::DepthBiasState {
            constant,
            slope_scale: f32::from_bits(slope),
            clamp: 0.0,
        },
        _ => wgpu::DepthBiasState::default(),
    };

    let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
        format,
        // depth writes need the test enabled, as in GL
        depth_write_enabled: key.depth_test && key.depth_write,
        depth_compare: if key.depth_test {
            wgpu::CompareFunction::LessEqual
        } else {
            wgpu::CompareFunction::Always
        },
        stencil: wgpu::StencilState::default(),
        bias,
    });

    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .color_format
        .map(|format| wgpu::ColorTargetState {
            format,
            blend: blend_state(key.transparency),
            write_mask: color_writes(key.color_mask),
        })
        .into_iter()
        .map(Some)
        .collect();

    let cull_mode = match key.cull {
        CullFace::Front if triangles => Some(wgpu::Face::Front),
        CullFace::Back if triangles => Some(wgpu::Face::Back),
        _ => None,
    };

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&program.name),
        layout: Some(&program.layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some("vs_main"),
            buffers: &[program.vertex_format.layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: key.primitive.topology(),
            strip_index_format: None,
            // winding is reversed in the source geometry
            front_face: wgpu::FrontFace::Cw,
            cull_mode,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: key.samples,
            ..Default::default()
        },
        multiview: None,
        cache: None,
    });

    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => {
            error!("Pipeline for '{}' failed: {}", program.name, err);
            None
        }
        None => Some(pipeline),
    }
}

fn blend_state(mode: TransparencyMode) -> Option<wgpu::BlendState> {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    let both = |c: wgpu::BlendComponent| wgpu::BlendState { color: c, alpha: c };

    match mode {
        TransparencyMode::None => None,
        TransparencyMode::Alpha => Some(both(component(
            wgpu::BlendFactor::SrcAlpha,
            wgpu::BlendFactor::OneMinusSrcAlpha,
        ))),
        TransparencyMode::AdditiveBlack => Some(both(component(
            wgpu::BlendFactor::One,
            wgpu::BlendFactor::OneMinusSrc,
        ))),
        TransparencyMode::MultiplicativeWhite => Some(both(component(
            wgpu::BlendFactor::Dst,
            wgpu::BlendFactor::Zero,
        ))),
    }
}

fn color_writes(mask: ColorMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    writes.set(wgpu::ColorWrites::RED, mask.contains(ColorMask::RED));
    writes.set(wgpu::ColorWrites::GREEN, mask.contains(ColorMask::GREEN));
    writes.set(wgpu::ColorWrites::BLUE, mask.contains(ColorMask::BLUE));
    writes.set(wgpu::ColorWrites::ALPHA, mask.contains(ColorMask::ALPHA));
    writes
}

pub(super) fn depth_format(bits: u32) -> wgpu::TextureFormat {
    match bits {
        16 => wgpu::TextureFormat::Depth16Unorm,
        32 => wgpu::TextureFormat::Depth32Float,
        _ => wgpu::TextureFormat::Depth24Plus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_mode_disables_blending() {
        assert!(blend_state(TransparencyMode::None).is_none());
        let alpha = blend_state(TransparencyMode::Alpha).unwrap();
        assert_eq!(alpha.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(alpha.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn black_and_white_modes() {
        let black = blend_state(TransparencyMode::AdditiveBlack).unwrap();
        assert_eq!(black.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(black.color.dst_factor, wgpu::BlendFactor::OneMinusSrc);

        let white = blend_state(TransparencyMode::MultiplicativeWhite).unwrap();
        assert_eq!(white.color.src_factor, wgpu::BlendFactor::Dst);
        assert_eq!(white.color.dst_factor, wgpu::BlendFactor::Zero);
    }

    #[test]
    fn color_mask_maps_channel_by_channel() {
        assert_eq!(color_writes(ColorMask::ALL), wgpu::ColorWrites::ALL);
        assert!(color_writes(ColorMask::empty()).is_empty());
        assert_eq!(
            color_writes(ColorMask::RED | ColorMask::ALPHA),
            wgpu::ColorWrites::RED | wgpu::ColorWrites::ALPHA
        );
    }

    #[test]
    fn depth_bits_pick_formats() {
        assert_eq!(depth_format(16), wgpu::TextureFormat::Depth16Unorm);
        assert_eq!(depth_format(24), wgpu::TextureFormat::Depth24Plus);
        assert_eq!(depth_format(32), wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn bias_key_keeps_slope_exactly() {
        let key = PipelineKey::bias(Some(DepthBias {
            factor: 2.0,
            units: 8.0,
        }));
        assert_eq!(key, Some((8, 2.0f32.to_bits())));
        assert_eq!(PipelineKey::bias(None), None);
    }
}
