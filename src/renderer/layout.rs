use std::collections::HashMap;
use std::fmt;

use crate::error::{RenderError, Result};

const SLOT: usize = 16;

/// A non-array value kind that can appear in a block or as an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Bool,
    Int,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl ElementKind {
    pub const fn base_alignment(self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::Int | ElementKind::UInt | ElementKind::Float => 4,
            ElementKind::Vec2 => 8,
            ElementKind::Vec3 | ElementKind::Vec4 => 16,
            ElementKind::Mat3 => 48,
            ElementKind::Mat4 => 64,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "bool" => ElementKind::Bool,
            "int" | "i32" => ElementKind::Int,
            "uint" | "u32" => ElementKind::UInt,
            "float" | "f32" => ElementKind::Float,
            "vec2" | "vec2<f32>" | "vec2f" => ElementKind::Vec2,
            "vec3" | "vec3<f32>" | "vec3f" => ElementKind::Vec3,
            "vec4" | "vec4<f32>" | "vec4f" => ElementKind::Vec4,
            "mat3" | "mat3x3<f32>" | "mat3x3f" => ElementKind::Mat3,
            "mat4" | "mat4x4<f32>" | "mat4x4f" => ElementKind::Mat4,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Bool => "bool",
            ElementKind::Int => "int",
            ElementKind::UInt => "uint",
            ElementKind::Float => "float",
            ElementKind::Vec2 => "vec2",
            ElementKind::Vec3 => "vec3",
            ElementKind::Vec4 => "vec4",
            ElementKind::Mat3 => "mat3",
            ElementKind::Mat4 => "mat4",
        };
        f.write_str(name)
    }
}

/// Type of one block field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Array(ElementKind, usize),
}

impl FieldType {
    pub const fn base_alignment(self) -> usize {
        match self {
            FieldType::Array(..) => SLOT,
            other => match other.element() {
                Some(kind) => kind.base_alignment(),
                None => SLOT,
            },
        }
    }

    pub const fn size(self) -> usize {
        match self {
            FieldType::Array(_, len) => SLOT * len,
            other => other.base_alignment(),
        }
    }

    /// The scalar/vector/matrix kind, `None` for arrays.
    pub const fn element(self) -> Option<ElementKind> {
        let kind = match self {
            FieldType::Bool => ElementKind::Bool,
            FieldType::Int => ElementKind::Int,
            FieldType::UInt => ElementKind::UInt,
            FieldType::Float => ElementKind::Float,
            FieldType::Vec2 => ElementKind::Vec2,
            FieldType::Vec3 => ElementKind::Vec3,
            FieldType::Vec4 => ElementKind::Vec4,
            FieldType::Mat3 => ElementKind::Mat3,
            FieldType::Mat4 => ElementKind::Mat4,
            FieldType::Array(..) => return None,
        };
        Some(kind)
    }

    /// Parses a GLSL- or WGSL-style type name such as `vec3`, `mat4x4<f32>` or
    /// `float[3]`.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if let Some(open) = trimmed.find('[') {
            let element = ElementKind::parse(trimmed[..open].trim())
                .ok_or_else(|| RenderError::UnknownFieldType(name.to_string()))?;
            let len = trimmed[open + 1..]
                .strip_suffix(']')
                .and_then(|n| n.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| RenderError::UnknownFieldType(name.to_string()))?;
            return Ok(FieldType::Array(element, len));
        }

        ElementKind::parse(trimmed)
            .map(FieldType::from)
            .ok_or_else(|| RenderError::UnknownFieldType(name.to_string()))
    }
}

impl From<ElementKind> for FieldType {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Bool => FieldType::Bool,
            ElementKind::Int => FieldType::Int,
            ElementKind::UInt => FieldType::UInt,
            ElementKind::Float => FieldType::Float,
            ElementKind::Vec2 => FieldType::Vec2,
            ElementKind::Vec3 => FieldType::Vec3,
            ElementKind::Vec4 => FieldType::Vec4,
            ElementKind::Mat3 => FieldType::Mat3,
            ElementKind::Mat4 => FieldType::Mat4,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Array(kind, len) => write!(f, "{kind}[{len}]"),
            other => match other.element() {
                Some(kind) => kind.fmt(f),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub ty: FieldType,
    pub offset: usize,
    pub size: usize,
}

/// Placement of every field of one block.
///
/// Fields are placed left to right. Every field starts at the next multiple of
/// `min(base_alignment, 16)` and occupies its full base size; arrays take one
/// 16-byte slot per element whatever the element type is. The block size is
/// the cursor after the last field, without a trailing round-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    fields: Vec<FieldLayout>,
    names: HashMap<String, usize>,
    size: usize,
}

impl UniformBlockLayout {
    /// Lays out an unnamed type sequence. Fields can be addressed by index.
    pub fn compute(types: &[FieldType]) -> Self {
        let mut cursor = 0usize;
        let mut fields = Vec::with_capacity(types.len());

        for &ty in types {
            let align = ty.base_alignment().min(SLOT);
            let offset = cursor.next_multiple_of(align);
            let size = ty.size();
            fields.push(FieldLayout { ty, offset, size });
            cursor = offset + size;
        }

        Self {
            fields,
            names: HashMap::new(),
            size: cursor,
        }
    }

    /// Lays out named fields.
    pub fn named<S: AsRef<str>>(fields: &[(S, FieldType)]) -> Self {
        let types: Vec<FieldType> = fields.iter().map(|(_, ty)| *ty).collect();
        let mut layout = Self::compute(&types);
        layout.names = fields
            .iter()
            .enumerate()
            .map(|(index, (name, _))| (name.as_ref().to_string(), index))
            .collect();
        layout
    }

    /// Lays out `(name, type name)` declarations. A single unrecognized type
    /// rejects the whole block.
    pub fn parse<N: AsRef<str>, T: AsRef<str>>(decls: &[(N, T)]) -> Result<Self> {
        let fields = decls
            .iter()
            .map(|(name, ty)| Ok((name.as_ref(), FieldType::parse(ty.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::named(&fields))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn offsets(&self) -> Vec<usize> {
        self.fields.iter().map(|field| field.offset).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.names.get(name).map(|&index| &self.fields[index])
    }

    pub fn field_at(&self, index: usize) -> Option<&FieldLayout> {
        self.fields.get(index)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }
}
