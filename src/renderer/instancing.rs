use std::collections::HashMap;

use glam::Mat4;

use crate::asset::{Handle, Mesh};
use crate::scene::{ObjectId, Scene};

/// Objects drawing one mesh in a single instanced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroup {
    pub mesh: Handle<Mesh>,
    pub members: Vec<ObjectId>,
}

impl InstanceGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct InstanceGrouper {
    groups: Vec<InstanceGroup>,
    by_mesh: HashMap<Handle<Mesh>, usize>,
}

impl InstanceGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all groups and regroups the enabled objects drawn with
    /// `shader`. Groups keep the order in which their mesh was first seen.
    pub fn rebuild(&mut self, scene: &Scene, shader: &str) {
        self.clear();
        for object in scene
            .objects_with_shader(shader)
            .filter(|object| object.enabled)
        {
            for &mesh in &object.meshes {
                let index = *self.by_mesh.entry(mesh).or_insert_with(|| {
                    self.groups.push(InstanceGroup {
                        mesh,
                        members: Vec::new(),
                    });
                    self.groups.len() - 1
                });
                self.groups[index].members.push(object.id());
            }
        }
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.by_mesh.clear();
    }

    pub fn groups(&self) -> &[InstanceGroup] {
        &self.groups
    }

    pub fn group(&self, mesh: Handle<Mesh>) -> Option<&InstanceGroup> {
        self.by_mesh.get(&mesh).map(|&index| &self.groups[index])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Current model matrices of the group's members. Members removed from the
/// scene since the rebuild are skipped.
pub fn gather_transforms(group: &InstanceGroup, scene: &Scene) -> Vec<Mat4> {
    group
        .members
        .iter()
        .filter_map(|&id| scene.object(id))
        .map(|object| object.model_matrix())
        .collect()
}
