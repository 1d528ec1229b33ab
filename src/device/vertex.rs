use bytemuck::{Pod, Zeroable};
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

impl PrimitiveType {
    pub fn is_triangles(&self) -> bool {
        matches!(self, PrimitiveType::Triangles | PrimitiveType::TriangleStrip)
    }

    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveType::Points => wgpu::PrimitiveTopology::PointList,
            PrimitiveType::Lines => wgpu::PrimitiveTopology::LineList,
            PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Tag identifying the record layout stored in a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Vertex2D,
    Vertex3D,
    Particle,
}

impl VertexFormat {
    pub fn stride(&self) -> u64 {
        match self {
            VertexFormat::Vertex2D => mem::size_of::<Vertex2D>() as u64,
            VertexFormat::Vertex3D => mem::size_of::<Vertex3D>() as u64,
            VertexFormat::Particle => mem::size_of::<VertexParticle>() as u64,
        }
    }

    pub fn layout(&self) -> wgpu::VertexBufferLayout<'static> {
        match self {
            VertexFormat::Vertex2D => Vertex2D::layout(),
            VertexFormat::Vertex3D => Vertex3D::layout(),
            VertexFormat::Particle => VertexParticle::layout(),
        }
    }
}

/// Plain vertex record that can be uploaded as-is.
pub trait Vertex: Pod {
    const FORMAT: VertexFormat;
}

/// Screen-space vertex used by the UI pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct Vertex2D {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

impl Vertex2D {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Unorm8x4
    ];

    pub fn new(position: [f32; 2], uv: [f32; 2], color: [u8; 4]) -> Self {
        Self {
            position,
            uv,
            color,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex2D>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

impl Vertex for Vertex2D {
    const FORMAT: VertexFormat = VertexFormat::Vertex2D;
}

/// Mesh vertex shared by the terrain, object and shadow passes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct Vertex3D {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
    pub uv2: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex3D {
    pub const ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Unorm8x4,
        2 => Float32x2,
        3 => Float32x2,
        4 => Float32x3
    ];

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            color: [255; 4],
            uv,
            uv2: uv,
            normal,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex3D>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

impl Vertex for Vertex3D {
    const FORMAT: VertexFormat = VertexFormat::Vertex3D;
}

/// Billboard corner emitted by the particle system.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct VertexParticle {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
}

impl VertexParticle {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Unorm8x4,
        2 => Float32x2
    ];

    pub fn new(position: [f32; 3], uv: [f32; 2], color: [u8; 4]) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<VertexParticle>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

impl Vertex for VertexParticle {
    const FORMAT: VertexFormat = VertexFormat::Particle;
}
