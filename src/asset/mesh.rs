use std::path::PathBuf;

use glam::Vec3;

use crate::renderer::backend::MeshId;
use crate::renderer::Vertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Diffuse,
    Specular,
    Normal,
    Emissive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureRef {
    pub kind: TextureKind,
    pub path: PathBuf,
}

/// Geometry as produced by an importer, before upload.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: Option<String>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<TextureRef>,
    pub transparent: bool,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            ..Self::default()
        }
    }

    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Uploaded, immutable geometry shared by any number of draw objects.
#[derive(Debug, Clone)]
pub struct Mesh {
    name: Option<String>,
    gpu: MeshId,
    index_count: u32,
    textures: Vec<TextureRef>,
    transparent: bool,
    centroid: Vec3,
}

impl Mesh {
    pub(crate) fn new(data: MeshData, gpu: MeshId) -> Self {
        let centroid = if data.vertices.is_empty() {
            Vec3::ZERO
        } else {
            data.vertices
                .iter()
                .map(|v| Vec3::from(v.pos))
                .sum::<Vec3>()
                / data.vertices.len() as f32
        };
        Self {
            name: data.name,
            gpu,
            index_count: data.indices.len() as u32,
            textures: data.textures,
            transparent: data.transparent,
            centroid,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn gpu(&self) -> MeshId {
        self.gpu
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn textures(&self) -> &[TextureRef] {
        &self.textures
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    /// Average vertex position in mesh space.
    pub fn centroid(&self) -> Vec3 {
        self.centroid
    }
}
