//! Shader source loading and uniform block layout.
//!
//! Pass sources live as `<root>/<pass>.wgsl` next to shared fragments
//! (`preamble`, `lighting`, `shadow`). A program is assembled as
//! generated header + fragments + pass source. The header declares the
//! pass uniform block at `@group(0) @binding(0)` and one texture/sampler
//! pair per slot in `@group(1)`, so uniform locations and offsets are
//! fixed by the [`UniformLayout`] before anything is compiled.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use glam::Mat3;

use super::backend::{ProgramDesc, UniformLocation, UniformValue};
use super::vertex::VertexFormat;
use crate::error::Result;
use crate::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Vec4Array(u32),
    Mat4Array(u32),
}

impl UniformKind {
    fn align(&self) -> u32 {
        match self {
            UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            _ => 16,
        }
    }

    fn size(&self) -> u32 {
        match self {
            UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat3 => 48,
            UniformKind::Mat4 => 64,
            UniformKind::Vec4Array(n) => 16 * n,
            UniformKind::Mat4Array(n) => 64 * n,
        }
    }

    fn wgsl_type(&self) -> String {
        match self {
            UniformKind::Int => "i32".into(),
            UniformKind::Float => "f32".into(),
            UniformKind::Vec2 => "vec2<f32>".into(),
            UniformKind::Vec3 => "vec3<f32>".into(),
            UniformKind::Vec4 => "vec4<f32>".into(),
            UniformKind::Mat3 => "mat3x3<f32>".into(),
            UniformKind::Mat4 => "mat4x4<f32>".into(),
            UniformKind::Vec4Array(n) => format!("array<vec4<f32>, {n}>"),
            UniformKind::Mat4Array(n) => format!("array<mat4x4<f32>, {n}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformEntry {
    pub name: &'static str,
    pub kind: UniformKind,
    pub offset: u32,
}

/// Byte layout of a pass uniform block, following WGSL uniform address space
/// alignment rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniformLayout {
    entries: Vec<UniformEntry>,
    size: u32,
}

impl UniformLayout {
    pub fn new(fields: &[(&'static str, UniformKind)]) -> Self {
        let mut entries = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        for &(name, kind) in fields {
            offset = align_to(offset, kind.align());
            entries.push(UniformEntry { name, kind, offset });
            offset += kind.size();
        }

        Self {
            entries,
            size: align_to(offset.max(16), 16),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn entries(&self) -> &[UniformEntry] {
        &self.entries
    }

    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.entries
            .iter()
            .position(|entry| entry.name == name)
            .map(|index| UniformLocation(index as u32))
    }

    pub fn entry(&self, location: UniformLocation) -> Option<&UniformEntry> {
        self.entries.get(location.0 as usize)
    }

    /// Encode `value` into `block` at the slot for `location`. Returns false
    /// when the location is unknown or the value does not fit the slot.
    pub fn write(&self, block: &mut [u8], location: UniformLocation, value: &UniformValue) -> bool {
        let Some(entry) = self.entry(location) else {
            return false;
        };
        let start = entry.offset as usize;
        let end = start + entry.kind.size() as usize;
        if block.len() < end {
            return false;
        }
        let slot = &mut block[start..end];

        match (entry.kind, value) {
            (UniformKind::Int, UniformValue::Int(v)) => slot.copy_from_slice(bytemuck::bytes_of(v)),
            (UniformKind::Float, UniformValue::Float(v)) => {
                slot.copy_from_slice(bytemuck::bytes_of(v))
            }
            (UniformKind::Vec2, UniformValue::Vec2(v)) => {
                slot.copy_from_slice(bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Vec3, UniformValue::Vec3(v)) => {
                slot.copy_from_slice(bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Vec4, UniformValue::Vec4(v)) => {
                slot.copy_from_slice(bytemuck::cast_slice(&v.to_array()))
            }
            (UniformKind::Mat3, UniformValue::Mat3(m)) => {
                slot.copy_from_slice(bytemuck::cast_slice(&padded_mat3(m)))
            }
            (UniformKind::Mat4, UniformValue::Mat4(m)) => {
                slot.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array()))
            }
            (UniformKind::Vec4Array(n), UniformValue::Vec4Array(values)) => {
                for (i, v) in values.iter().take(n as usize).enumerate() {
                    slot[i * 16..(i + 1) * 16].copy_from_slice(bytemuck::cast_slice(&v.to_array()));
                }
            }
            (UniformKind::Mat4Array(n), UniformValue::Mat4Array(values)) => {
                for (i, m) in values.iter().take(n as usize).enumerate() {
                    slot[i * 64..(i + 1) * 64]
                        .copy_from_slice(bytemuck::cast_slice(&m.to_cols_array()));
                }
            }
            _ => return false,
        }
        true
    }

    fn wgsl_struct(&self, name: &str) -> String {
        let mut out = format!("struct {name} {{\n");
        for entry in &self.entries {
            let _ = writeln!(out, "    {}: {},", entry.name, entry.kind.wgsl_type());
        }
        out.push_str("};\n");
        out
    }
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn padded_mat3(m: &Mat3) -> [f32; 12] {
    let c = m.to_cols_array();
    [
        c[0], c[1], c[2], 0.0, c[3], c[4], c[5], 0.0, c[6], c[7], c[8], 0.0,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Filterable color texture, white when nothing is bound.
    Color,
    /// Depth texture read through a comparison sampler.
    Depth,
}

/// A named texture binding of a program, fed from a device texture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    pub name: &'static str,
    pub unit: u32,
    pub kind: SlotKind,
}

impl TextureSlot {
    pub const fn color(name: &'static str, unit: u32) -> Self {
        Self {
            name,
            unit,
            kind: SlotKind::Color,
        }
    }

    pub const fn depth(name: &'static str, unit: u32) -> Self {
        Self {
            name,
            unit,
            kind: SlotKind::Depth,
        }
    }
}

/// Generated declarations for the uniform block and texture slots.
pub fn program_header(uniforms: &UniformLayout, textures: &[TextureSlot]) -> String {
    let mut out = uniforms.wgsl_struct("PassUniforms");
    out.push_str("@group(0) @binding(0) var<uniform> u: PassUniforms;\n");
    for (index, slot) in textures.iter().enumerate() {
        let (texture_type, sampler_type) = match slot.kind {
            SlotKind::Color => ("texture_2d<f32>", "sampler"),
            SlotKind::Depth => ("texture_depth_2d", "sampler_comparison"),
        };
        let binding = index * 2;
        let _ = writeln!(
            out,
            "@group(1) @binding({binding}) var t_{}: {texture_type};",
            slot.name
        );
        let _ = writeln!(
            out,
            "@group(1) @binding({}) var s_{}: {sampler_type};",
            binding + 1,
            slot.name
        );
    }
    out.push('\n');
    out
}

/// Loads pass shader sources from a directory.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.wgsl"))
    }

    /// Shared fragments in order, followed by the pass source.
    pub fn load(&self, name: &str, fragments: &[&str]) -> Result<String> {
        let mut source = String::new();
        for fragment in fragments.iter().chain(std::iter::once(&name)) {
            let text = io::load_text(&self.path_for(fragment))?;
            source.push_str(&text);
            source.push('\n');
        }
        Ok(source)
    }

    pub fn program(
        &self,
        name: &str,
        fragments: &[&str],
        vertex_format: VertexFormat,
        uniforms: UniformLayout,
        textures: &[TextureSlot],
    ) -> Result<ProgramDesc> {
        let body = self.load(name, fragments)?;
        let mut source = program_header(&uniforms, textures);
        source.push_str(&body);

        Ok(ProgramDesc {
            name: name.to_string(),
            source,
            vertex_format,
            uniforms,
            textures: textures.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use glam::{Mat4, Vec3, Vec4};

    fn sample_layout() -> UniformLayout {
        UniformLayout::new(&[
            ("projection", UniformKind::Mat4),
            ("alpha_scissor", UniformKind::Float),
            ("camera_position", UniformKind::Vec3),
            ("uv_offset", UniformKind::Vec2),
            ("normal_matrix", UniformKind::Mat3),
            ("regions", UniformKind::Vec4Array(4)),
            ("count", UniformKind::Int),
        ])
    }

    #[test]
    fn offsets_follow_wgsl_alignment() {
        let layout = sample_layout();
        let offsets: Vec<u32> = layout.entries().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 64, 80, 96, 112, 160, 224]);
        assert_eq!(layout.size(), 240);
    }

    #[test]
    fn locations_are_resolved_by_name() {
        let layout = sample_layout();
        assert_eq!(layout.location("projection"), Some(UniformLocation(0)));
        assert_eq!(layout.location("count"), Some(UniformLocation(6)));
        assert_eq!(layout.location("missing"), None);
    }

    #[test]
    fn write_encodes_values_in_place() {
        let layout = sample_layout();
        let mut block = vec![0u8; layout.size() as usize];

        let camera = layout.location("camera_position").unwrap();
        assert!(layout.write(&mut block, camera, &UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        let floats: &[f32] = bytemuck::cast_slice(&block[80..92]);
        assert_eq!(floats, &[1.0, 2.0, 3.0]);

        let regions = layout.location("regions").unwrap();
        assert!(layout.write(
            &mut block,
            regions,
            &UniformValue::Vec4Array(vec![Vec4::ONE, Vec4::splat(2.0)])
        ));
        let floats: &[f32] = bytemuck::cast_slice(&block[176..192]);
        assert_eq!(floats, &[2.0; 4]);
    }

    #[test]
    fn mismatched_value_is_refused() {
        let layout = sample_layout();
        let mut block = vec![0u8; layout.size() as usize];
        let projection = layout.location("projection").unwrap();
        assert!(!layout.write(&mut block, projection, &UniformValue::Float(1.0)));
        assert!(layout.write(&mut block, projection, &UniformValue::Mat4(Mat4::IDENTITY)));
    }

    #[test]
    fn header_declares_block_and_slots() {
        let layout = UniformLayout::new(&[("color", UniformKind::Vec4)]);
        let header = program_header(
            &layout,
            &[TextureSlot::color("albedo", 10), TextureSlot::depth("shadow", 14)],
        );
        assert!(header.contains("    color: vec4<f32>,"));
        assert!(header.contains("var<uniform> u: PassUniforms;"));
        assert!(header.contains("@group(1) @binding(0) var t_albedo: texture_2d<f32>;"));
        assert!(header.contains("@group(1) @binding(3) var s_shadow: sampler_comparison;"));
    }

    #[test]
    fn missing_source_reports_path() {
        let library = ShaderLibrary::new("/nonexistent/shaders");
        match library.load("ui", &[]) {
            Err(DeviceError::ShaderNotFound { path }) => {
                assert!(path.ends_with("ui.wgsl"));
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn bundled_sources_load() {
        let library = ShaderLibrary::new(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"));
        let source = library.load("object", &["preamble", "lighting", "shadow"]).unwrap();
        assert!(source.contains("fn vs_main"));
        assert!(source.contains("fn fs_main"));
    }
}
