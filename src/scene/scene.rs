use glam::Vec3;

use super::{
    Attenuation, Camera, DrawObject, Light, LightId, LightKind, LightType, ObjectId, Transform,
};
use crate::asset::{Handle, Mesh};
use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(pub u32);

/// Cube mesh drawn behind everything with its own program.
#[derive(Debug, Clone)]
pub struct Skybox {
    pub mesh: Handle<Mesh>,
    pub shader: String,
}

/// Cameras, draw objects, lights and an optional skybox.
///
/// Objects live in an arena indexed by [`ObjectId`]; removing one leaves a
/// hole so ids held elsewhere (instance groups) never alias a newer object.
#[derive(Debug)]
pub struct Scene {
    id: SceneId,
    cameras: Vec<Camera>,
    active_camera: Option<usize>,
    objects: Vec<Option<DrawObject>>,
    lights: Vec<Light>,
    next_light: u32,
    skybox: Option<Skybox>,
}

impl Scene {
    pub fn new(id: SceneId) -> Self {
        Self {
            id,
            cameras: Vec::new(),
            active_camera: None,
            objects: Vec::new(),
            lights: Vec::new(),
            next_light: 0,
            skybox: None,
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    // cameras

    /// Adds a camera; the first one added becomes active.
    pub fn add_camera(&mut self, camera: Camera) -> usize {
        self.cameras.push(camera);
        let index = self.cameras.len() - 1;
        if self.active_camera.is_none() {
            self.active_camera = Some(index);
        }
        index
    }

    pub fn set_active_camera(&mut self, index: usize) -> Result<()> {
        if index >= self.cameras.len() {
            return Err(RenderError::precondition(format!(
                "camera index {index} out of range ({} cameras)",
                self.cameras.len()
            )));
        }
        self.active_camera = Some(index);
        Ok(())
    }

    pub fn active_camera(&self) -> Result<&Camera> {
        self.active_camera
            .and_then(|index| self.cameras.get(index))
            .ok_or_else(|| RenderError::precondition("scene has no active camera"))
    }

    pub fn active_camera_mut(&mut self) -> Result<&mut Camera> {
        self.active_camera
            .and_then(|index| self.cameras.get_mut(index))
            .ok_or_else(|| RenderError::precondition("scene has no active camera"))
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    // objects

    pub fn add_object(
        &mut self,
        meshes: Vec<Handle<Mesh>>,
        shader: impl Into<String>,
        transform: Transform,
    ) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects
            .push(Some(DrawObject::new(id, meshes, shader.into(), transform)));
        id
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<DrawObject> {
        self.objects.get_mut(id.0 as usize).and_then(Option::take)
    }

    pub fn object(&self, id: ObjectId) -> Option<&DrawObject> {
        self.objects.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut DrawObject> {
        self.objects.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Returns `false` if the object does not exist.
    pub fn set_enabled(&mut self, id: ObjectId, enabled: bool) -> bool {
        match self.object_mut(id) {
            Some(object) => {
                object.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &DrawObject> {
        self.objects.iter().flatten()
    }

    pub fn objects_with_shader<'a>(
        &'a self,
        shader: &'a str,
    ) -> impl Iterator<Item = &'a DrawObject> + 'a {
        self.objects().filter(move |object| object.shader == shader)
    }

    /// Distinct shader tags in first-seen order.
    pub fn shader_tags(&self) -> Vec<&str> {
        Self::tags_of(self.objects())
    }

    /// Shader tags of enabled objects only, in first-seen order.
    pub fn enabled_shader_tags(&self) -> Vec<&str> {
        Self::tags_of(self.objects().filter(|object| object.enabled))
    }

    fn tags_of<'a>(objects: impl Iterator<Item = &'a DrawObject>) -> Vec<&'a str> {
        let mut tags: Vec<&str> = Vec::new();
        for object in objects {
            if !tags.contains(&object.shader.as_str()) {
                tags.push(&object.shader);
            }
        }
        tags
    }

    // lights

    fn push_light(&mut self, kind: LightKind, color: Vec3, intensity: f32) -> LightId {
        let id = LightId(self.next_light);
        self.next_light += 1;
        self.lights.push(Light::new(id, kind, color, intensity));
        id
    }

    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3, intensity: f32) -> LightId {
        self.push_light(
            LightKind::Directional {
                direction: direction.normalize_or_zero(),
            },
            color,
            intensity,
        )
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3, intensity: f32) -> LightId {
        self.push_light(
            LightKind::Point {
                position,
                attenuation: Attenuation::default(),
            },
            color,
            intensity,
        )
    }

    /// `cutoff` and `outer_cutoff` are cone half-angles in radians.
    pub fn add_spot_light(
        &mut self,
        position: Vec3,
        direction: Vec3,
        cutoff: f32,
        outer_cutoff: f32,
        color: Vec3,
        intensity: f32,
    ) -> LightId {
        self.push_light(
            LightKind::Spot {
                position,
                direction: direction.normalize_or_zero(),
                cutoff,
                outer_cutoff: outer_cutoff.max(cutoff),
                attenuation: Attenuation::default(),
            },
            color,
            intensity,
        )
    }

    pub fn remove_light(&mut self, id: LightId) -> Option<Light> {
        let index = self.lights.iter().position(|light| light.id() == id)?;
        Some(self.lights.remove(index))
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.iter().find(|light| light.id() == id)
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.iter_mut().find(|light| light.id() == id)
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn lights_of_type(&self, light_type: LightType) -> impl Iterator<Item = &Light> {
        self.lights
            .iter()
            .filter(move |light| light.light_type() == light_type)
    }

    // skybox

    pub fn set_skybox(&mut self, skybox: Option<Skybox>) {
        self.skybox = skybox;
    }

    pub fn skybox(&self) -> Option<&Skybox> {
        self.skybox.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(index: usize) -> Handle<Mesh> {
        Handle::new(index)
    }

    #[test]
    fn first_camera_becomes_active() {
        let mut scene = Scene::new(SceneId(0));
        assert!(scene.active_camera().is_err());

        scene.add_camera(Camera::default());
        let second = scene.add_camera(Camera::looking_at(Vec3::X, Vec3::ZERO));
        assert_eq!(scene.active_camera().unwrap().eye, Camera::default().eye);

        scene.set_active_camera(second).unwrap();
        assert_eq!(scene.active_camera().unwrap().eye, Vec3::X);
        assert!(scene.set_active_camera(5).is_err());
    }

    #[test]
    fn removed_object_ids_are_not_reused() {
        let mut scene = Scene::new(SceneId(0));
        let a = scene.add_object(vec![mesh(0)], "Basic", Transform::IDENTITY);
        scene.remove_object(a);
        let b = scene.add_object(vec![mesh(0)], "Basic", Transform::IDENTITY);

        assert_ne!(a, b);
        assert!(scene.object(a).is_none());
        assert_eq!(scene.objects().count(), 1);
    }

    #[test]
    fn objects_filter_by_shader_tag() {
        let mut scene = Scene::new(SceneId(0));
        scene.add_object(vec![mesh(0)], "Basic", Transform::IDENTITY);
        scene.add_object(vec![mesh(1)], "Glass", Transform::IDENTITY);
        scene.add_object(vec![mesh(0)], "Basic", Transform::IDENTITY);

        assert_eq!(scene.objects_with_shader("Basic").count(), 2);
        assert_eq!(scene.shader_tags(), vec!["Basic", "Glass"]);
    }

    #[test]
    fn enabled_tags_skip_disabled_objects() {
        let mut scene = Scene::new(SceneId(0));
        scene.add_object(vec![mesh(0)], "Basic", Transform::IDENTITY);
        let hidden = scene.add_object(vec![mesh(1)], "Unregistered", Transform::IDENTITY);
        scene.set_enabled(hidden, false);

        assert_eq!(scene.shader_tags(), vec!["Basic", "Unregistered"]);
        assert_eq!(scene.enabled_shader_tags(), vec!["Basic"]);
    }

    #[test]
    fn lights_are_queryable_by_type_and_id() {
        let mut scene = Scene::new(SceneId(0));
        let sun = scene.add_directional_light(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0);
        let bulb = scene.add_point_light(Vec3::Y, Vec3::ONE, 2.0);

        assert_eq!(scene.lights_of_type(LightType::Point).count(), 1);
        assert!(scene.light(sun).unwrap().direction().unwrap().is_normalized());

        scene.remove_light(bulb);
        assert!(scene.light(bulb).is_none());
        let spot = scene.add_spot_light(Vec3::ZERO, Vec3::NEG_Y, 0.2, 0.3, Vec3::ONE, 1.0);
        assert_ne!(spot, bulb);
    }
}
