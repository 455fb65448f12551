// renderer/shadows.rs
use std::collections::HashMap;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::asset::Assets;
use crate::error::{RenderError, ResourceKind, Result};
use crate::renderer::backend::{ClearFlags, GraphicsBackend};
use crate::renderer::shaders::{ShaderCapabilities, ShaderLibrary};
use crate::renderer::targets::{RenderTargetManager, TargetHandle, TargetTemplate};
use crate::scene::{Light, LightId, LightKind, LightType, Scene};

pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 2048;

const ORTHO_EXTENT: f32 = 10.0;
const NEAR: f32 = 1.0;
const FAR: f32 = 100.0;
/// How far back along its direction a directional light's eye is placed.
const DIRECTIONAL_DISTANCE: f32 = 100.0;

/// Point the shadow cameras look at.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowFocus {
    /// World origin for every light.
    #[default]
    Origin,
    Fixed([f32; 3]),
    /// Spot lights look along their own direction; other lights use the origin.
    Forward,
}

fn shadow_up(view_dir: Vec3) -> Vec3 {
    if view_dir.normalize_or_zero().dot(Vec3::Y).abs() > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

fn look_at(eye: Vec3, center: Vec3) -> Mat4 {
    let center = if (center - eye).length_squared() < 1e-8 {
        eye + Vec3::NEG_Y
    } else {
        center
    };
    Mat4::look_at_rh(eye, center, shadow_up(center - eye))
}

/// Projection * view for rendering a light's shadow map.
///
/// Directional lights use a 20x20 orthographic box placed 100 units back
/// along their direction; point and spot lights use a 90° square frustum
/// from their position. Both span depths 1..100.
pub fn light_space_transform(light: &Light, focus: ShadowFocus) -> Mat4 {
    let target = match focus {
        ShadowFocus::Origin | ShadowFocus::Forward => Vec3::ZERO,
        ShadowFocus::Fixed(point) => Vec3::from(point),
    };

    match light.kind {
        LightKind::Directional { direction } => {
            let projection = Mat4::orthographic_rh(
                -ORTHO_EXTENT,
                ORTHO_EXTENT,
                -ORTHO_EXTENT,
                ORTHO_EXTENT,
                NEAR,
                FAR,
            );
            let eye = target + DIRECTIONAL_DISTANCE * direction;
            projection * look_at(eye, target)
        }
        LightKind::Point { position, .. } => {
            let projection = Mat4::perspective_rh(90f32.to_radians(), 1.0, NEAR, FAR);
            projection * look_at(position, target)
        }
        LightKind::Spot {
            position,
            direction,
            ..
        } => {
            let projection = Mat4::perspective_rh(90f32.to_radians(), 1.0, NEAR, FAR);
            let target = match focus {
                ShadowFocus::Forward => position + direction,
                _ => target,
            };
            projection * look_at(position, target)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMapEntry {
    pub light_type: LightType,
    pub target: TargetHandle,
    pub light_space: Mat4,
}

#[derive(Debug)]
pub struct ShadowMapCache {
    entries: HashMap<LightId, ShadowMapEntry>,
    size: u32,
    focus: ShadowFocus,
}

impl Default for ShadowMapCache {
    fn default() -> Self {
        Self::new(DEFAULT_SHADOW_MAP_SIZE, ShadowFocus::default())
    }
}

impl ShadowMapCache {
    pub fn new(size: u32, focus: ShadowFocus) -> Self {
        Self {
            entries: HashMap::new(),
            size: size.max(1),
            focus,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn focus(&self) -> ShadowFocus {
        self.focus
    }

    pub fn set_focus(&mut self, focus: ShadowFocus) {
        self.focus = focus;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds or creates the light's entry and recomputes its transform.
    pub fn align(
        &mut self,
        light: &Light,
        targets: &mut RenderTargetManager,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<&ShadowMapEntry> {
        let light_type = light.light_type();
        let light_space = light_space_transform(light, self.focus);

        if let Some(entry) = self.entries.get(&light.id()) {
            if entry.light_type != light_type {
                return Err(RenderError::LightTypeMismatch {
                    light: light.id(),
                    cached: entry.light_type,
                    found: light_type,
                });
            }
        } else {
            let target =
                targets.add_target(TargetTemplate::DepthOnly, self.size, self.size, backend)?;
            log::debug!("Allocated shadow map for {:?} light {:?}", light_type, light.id());
            self.entries.insert(
                light.id(),
                ShadowMapEntry {
                    light_type,
                    target,
                    light_space,
                },
            );
        }

        let entry = self
            .entries
            .get_mut(&light.id())
            .ok_or_else(|| RenderError::not_found(ResourceKind::ShadowMap, format!("{:?}", light.id())))?;
        entry.light_space = light_space;
        Ok(entry)
    }

    pub fn shadow_map(&self, light: LightId) -> Result<&ShadowMapEntry> {
        self.entries
            .get(&light)
            .ok_or_else(|| RenderError::not_found(ResourceKind::ShadowMap, format!("{light:?}")))
    }

    pub fn entries(&self) -> impl Iterator<Item = (LightId, &ShadowMapEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Renders every enabled object's depth into the light's shadow map.
    pub fn render(
        &self,
        light: LightId,
        scene: &Scene,
        assets: &Assets,
        shaders: &mut ShaderLibrary,
        targets: &mut RenderTargetManager,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let entry = *self.shadow_map(light)?;

        targets.bind_target(entry.target, backend);
        if targets.depth_attachment(entry.target).is_none()
            || targets.last_bound() != Some(entry.target)
        {
            return Err(RenderError::precondition(format!(
                "shadow target for {light:?} has no depth attachment"
            )));
        }
        backend.clear(ClearFlags::DEPTH, [0.0; 4]);

        let program = shaders
            .with_capability(ShaderCapabilities::SHADOW_MAPPING)
            .next()
            .map(|program| program.name().to_string())
            .ok_or_else(|| RenderError::precondition("no shadow-mapping shader registered"))?;
        shaders.activate(&program, backend)?;
        shaders.set_uniform("light_space", entry.light_space)?;
        shaders.flush(backend);

        for object in scene.objects().filter(|object| object.enabled) {
            let model = object.model_matrix();
            for &handle in &object.meshes {
                backend.draw_mesh(assets.mesh(handle)?.gpu(), model);
            }
        }

        targets.unbind(backend);
        Ok(())
    }

    /// Drops entries of lights that are gone and frees their targets.
    pub fn retain_lights(
        &mut self,
        alive: &[LightId],
        targets: &mut RenderTargetManager,
        backend: &mut dyn GraphicsBackend,
    ) {
        self.entries.retain(|id, entry| {
            let keep = alive.contains(id);
            if !keep {
                log::debug!("Releasing shadow map of removed light {id:?}");
                targets.remove_target(entry.target, backend);
            }
            keep
        });
    }

    pub fn release_all(&mut self, targets: &mut RenderTargetManager, backend: &mut dyn GraphicsBackend) {
        for (_, entry) in self.entries.drain() {
            targets.remove_target(entry.target, backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::scene::SceneId;

    fn scene_with_lights() -> (Scene, LightId, LightId, LightId) {
        let mut scene = Scene::new(SceneId(0));
        let sun = scene.add_directional_light(Vec3::new(0.3, 1.0, 0.2), Vec3::ONE, 1.0);
        let bulb = scene.add_point_light(Vec3::new(2.0, 5.0, 1.0), Vec3::ONE, 1.0);
        let spot = scene.add_spot_light(
            Vec3::new(0.0, 4.0, 4.0),
            Vec3::new(1.0, -1.0, 0.0),
            0.3,
            0.4,
            Vec3::ONE,
            1.0,
        );
        (scene, sun, bulb, spot)
    }

    #[test]
    fn directional_transform_matches_formula() {
        let (scene, sun, _, _) = scene_with_lights();
        let light = scene.light(sun).unwrap();
        let direction = light.direction().unwrap();

        let expected = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 1.0, 100.0)
            * Mat4::look_at_rh(100.0 * direction, Vec3::ZERO, Vec3::Y);
        assert_eq!(light_space_transform(light, ShadowFocus::Origin), expected);
    }

    #[test]
    fn vertical_light_falls_back_to_z_up() {
        let mut scene = Scene::new(SceneId(0));
        let sun = scene.add_directional_light(Vec3::NEG_Y, Vec3::ONE, 1.0);
        let matrix = light_space_transform(scene.light(sun).unwrap(), ShadowFocus::Origin);
        assert!(matrix.is_finite());

        let expected = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 1.0, 100.0)
            * Mat4::look_at_rh(Vec3::new(0.0, -100.0, 0.0), Vec3::ZERO, Vec3::Z);
        assert_eq!(matrix, expected);
    }

    #[test]
    fn forward_focus_only_changes_spot_lights() {
        let (scene, sun, bulb, spot) = scene_with_lights();
        for id in [sun, bulb] {
            let light = scene.light(id).unwrap();
            assert_eq!(
                light_space_transform(light, ShadowFocus::Forward),
                light_space_transform(light, ShadowFocus::Origin)
            );
        }
        let spot = scene.light(spot).unwrap();
        assert_ne!(
            light_space_transform(spot, ShadowFocus::Forward),
            light_space_transform(spot, ShadowFocus::Origin)
        );
    }

    #[test]
    fn entries_are_stable_across_frames() {
        let (mut scene, _, bulb, _) = scene_with_lights();
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let mut cache = ShadowMapCache::default();

        let first = *cache
            .align(scene.light(bulb).unwrap(), &mut targets, &mut backend)
            .unwrap();
        let second = *cache
            .align(scene.light(bulb).unwrap(), &mut targets, &mut backend)
            .unwrap();
        assert_eq!(first.light_space.to_cols_array(), second.light_space.to_cols_array());
        assert_eq!(first.target, second.target);
        assert_eq!(targets.target(first.target).unwrap().size(), (2048, 2048));

        scene.light_mut(bulb).unwrap().set_position(Vec3::new(-3.0, 6.0, 0.0));
        let moved = *cache
            .align(scene.light(bulb).unwrap(), &mut targets, &mut backend)
            .unwrap();
        assert_ne!(moved.light_space, first.light_space);
        assert_eq!(moved.target, first.target);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn type_change_under_same_id_is_rejected() {
        let (scene, sun, _, _) = scene_with_lights();
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let mut cache = ShadowMapCache::default();
        cache
            .align(scene.light(sun).unwrap(), &mut targets, &mut backend)
            .unwrap();

        let mut impostor = scene.light(sun).unwrap().clone();
        impostor.kind = LightKind::Point {
            position: Vec3::ONE,
            attenuation: Default::default(),
        };
        let err = cache.align(&impostor, &mut targets, &mut backend).unwrap_err();
        assert!(matches!(
            err,
            RenderError::LightTypeMismatch {
                cached: LightType::Directional,
                found: LightType::Point,
                ..
            }
        ));
    }

    #[test]
    fn missing_entry_is_not_found() {
        let cache = ShadowMapCache::default();
        assert!(matches!(
            cache.shadow_map(LightId(3)).unwrap_err(),
            RenderError::NotFound {
                kind: ResourceKind::ShadowMap,
                ..
            }
        ));
    }

    #[test]
    fn render_without_shadow_shader_is_a_precondition_error() {
        let (scene, sun, _, _) = scene_with_lights();
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let mut cache = ShadowMapCache::new(256, ShadowFocus::Origin);
        let mut shaders = ShaderLibrary::new();
        cache
            .align(scene.light(sun).unwrap(), &mut targets, &mut backend)
            .unwrap();

        let err = cache
            .render(sun, &scene, &Assets::new(), &mut shaders, &mut targets, &mut backend)
            .unwrap_err();
        assert!(matches!(err, RenderError::Precondition(_)));
    }

    #[test]
    fn removed_lights_release_their_targets() {
        let (scene, sun, bulb, _) = scene_with_lights();
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let mut cache = ShadowMapCache::new(64, ShadowFocus::Origin);
        for id in [sun, bulb] {
            cache
                .align(scene.light(id).unwrap(), &mut targets, &mut backend)
                .unwrap();
        }

        cache.retain_lights(&[sun], &mut targets, &mut backend);
        assert_eq!(cache.len(), 1);
        assert!(cache.shadow_map(bulb).is_err());
        assert_eq!(targets.len(), 1);
        assert_eq!(backend.live_attachments(), 1);
    }
}
