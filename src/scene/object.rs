use glam::Mat4;

use super::Transform;
use crate::asset::{Handle, Mesh};

/// Slot index of a draw object in its scene. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// One positioned instance of a model.
#[derive(Debug, Clone)]
pub struct DrawObject {
    id: ObjectId,
    pub meshes: Vec<Handle<Mesh>>,
    /// Name of the shader program that draws this object.
    pub shader: String,
    pub transform: Transform,
    pub enabled: bool,
}

impl DrawObject {
    pub(crate) fn new(
        id: ObjectId,
        meshes: Vec<Handle<Mesh>>,
        shader: String,
        transform: Transform,
    ) -> Self {
        Self {
            id,
            meshes,
            shader,
            transform,
            enabled: true,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }
}
