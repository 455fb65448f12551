// renderer/targets.rs
use std::collections::HashMap;

use crate::error::{RenderError, Result};
use crate::renderer::backend::{AttachmentDesc, AttachmentFormat, AttachmentId, GraphicsBackend};
use crate::scene::SceneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetHandle(pub u32);

/// Attachment sets a target can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetTemplate {
    /// Sampled HDR color plus sampled depth-stencil.
    FullColor,
    /// Sampled color plus a depth-stencil renderbuffer.
    ColorDepth,
    /// Sampled depth only. Used for shadow maps.
    DepthOnly,
    /// Sampled depth cubemap.
    DepthCube,
    /// Color cubemap plus a depth renderbuffer.
    CubeLightmap,
}

struct AttachmentSpec {
    format: AttachmentFormat,
    layers: u32,
    sampled: bool,
}

impl TargetTemplate {
    fn attachments(self) -> &'static [AttachmentSpec] {
        use AttachmentFormat::*;
        match self {
            TargetTemplate::FullColor => &[
                AttachmentSpec {
                    format: Rgba16Float,
                    layers: 1,
                    sampled: true,
                },
                AttachmentSpec {
                    format: Depth24Stencil8,
                    layers: 1,
                    sampled: true,
                },
            ],
            TargetTemplate::ColorDepth => &[
                AttachmentSpec {
                    format: Rgba8,
                    layers: 1,
                    sampled: true,
                },
                AttachmentSpec {
                    format: Depth24Stencil8,
                    layers: 1,
                    sampled: false,
                },
            ],
            TargetTemplate::DepthOnly => &[
                AttachmentSpec {
                    format: Depth32,
                    layers: 1,
                    sampled: true,
                },
            ],
            TargetTemplate::DepthCube => &[
                AttachmentSpec {
                    format: Depth32,
                    layers: 6,
                    sampled: true,
                },
            ],
            TargetTemplate::CubeLightmap => &[
                AttachmentSpec {
                    format: Rgba16Float,
                    layers: 6,
                    sampled: true,
                },
                AttachmentSpec {
                    format: Depth32,
                    layers: 1,
                    sampled: false,
                },
            ],
        }
    }

    pub fn color_count(self) -> usize {
        self.attachments()
            .iter()
            .filter(|spec| spec.format.is_color())
            .count()
    }

    pub fn has_depth(self) -> bool {
        self.attachments().iter().any(|spec| spec.format.has_depth())
    }
}

#[derive(Debug, Clone)]
pub struct RenderTarget {
    template: TargetTemplate,
    width: u32,
    height: u32,
    color: Vec<AttachmentId>,
    depth: Option<(AttachmentId, AttachmentFormat)>,
    viewport_bound: bool,
}

impl RenderTarget {
    pub fn template(&self) -> TargetTemplate {
        self.template
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color(&self) -> &[AttachmentId] {
        &self.color
    }

    pub fn depth(&self) -> Option<AttachmentId> {
        self.depth.map(|(id, _)| id)
    }

    /// Stencil always shares the depth attachment.
    pub fn has_stencil(&self) -> bool {
        self.depth.is_some_and(|(_, format)| format.has_stencil())
    }

    pub fn is_viewport_bound(&self) -> bool {
        self.viewport_bound
    }

    /// Every attachment, colors first.
    pub fn attachments(&self) -> Vec<AttachmentId> {
        self.color.iter().copied().chain(self.depth()).collect()
    }

    fn allocate(
        template: TargetTemplate,
        width: u32,
        height: u32,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<(Vec<AttachmentId>, Option<(AttachmentId, AttachmentFormat)>)> {
        let mut color = Vec::new();
        let mut depth = None;
        for spec in template.attachments() {
            let desc = AttachmentDesc {
                format: spec.format,
                width,
                height,
                layers: spec.layers,
                sampled: spec.sampled,
            };
            let id = match backend.create_attachment(&desc) {
                Ok(id) => id,
                Err(err) => {
                    for id in color.iter().copied().chain(depth.map(|(id, _)| id)) {
                        backend.destroy_attachment(id);
                    }
                    return Err(err);
                }
            };
            if spec.format.has_depth() {
                depth = Some((id, spec.format));
            } else {
                color.push(id);
            }
        }
        Ok((color, depth))
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for id in self.attachments() {
            backend.destroy_attachment(id);
        }
        self.color.clear();
        self.depth = None;
    }
}

/// Owns every offscreen target and the scene → target associations.
#[derive(Debug)]
pub struct RenderTargetManager {
    targets: HashMap<TargetHandle, RenderTarget>,
    scene_targets: HashMap<SceneId, TargetHandle>,
    next_handle: u32,
    viewport: (u32, u32),
    force_default: bool,
    last_bound: Option<TargetHandle>,
}

impl RenderTargetManager {
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            targets: HashMap::new(),
            scene_targets: HashMap::new(),
            next_handle: 0,
            viewport: (viewport_width, viewport_height),
            force_default: false,
            last_bound: None,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn add_target(
        &mut self,
        template: TargetTemplate,
        width: u32,
        height: u32,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<TargetHandle> {
        self.insert(template, width, height, false, backend)
    }

    /// Adds a target that follows the viewport size.
    pub fn add_viewport_target(
        &mut self,
        template: TargetTemplate,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<TargetHandle> {
        let (width, height) = self.viewport;
        self.insert(template, width, height, true, backend)
    }

    fn insert(
        &mut self,
        template: TargetTemplate,
        width: u32,
        height: u32,
        viewport_bound: bool,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<TargetHandle> {
        if width == 0 || height == 0 {
            return Err(RenderError::precondition(format!(
                "render target size {width}x{height} is empty"
            )));
        }
        let (color, depth) = RenderTarget::allocate(template, width, height, backend)?;
        let handle = TargetHandle(self.next_handle);
        self.next_handle += 1;
        self.targets.insert(
            handle,
            RenderTarget {
                template,
                width,
                height,
                color,
                depth,
                viewport_bound,
            },
        );
        log::debug!("Created {template:?} target {handle:?} ({width}x{height})");
        Ok(handle)
    }

    pub fn target(&self, handle: TargetHandle) -> Option<&RenderTarget> {
        self.targets.get(&handle)
    }

    pub fn color_attachment(&self, handle: TargetHandle, index: usize) -> Option<AttachmentId> {
        self.targets
            .get(&handle)
            .and_then(|target| target.color.get(index).copied())
    }

    pub fn depth_attachment(&self, handle: TargetHandle) -> Option<AttachmentId> {
        self.targets.get(&handle).and_then(RenderTarget::depth)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn bind_target(&mut self, handle: TargetHandle, backend: &mut dyn GraphicsBackend) {
        let Some(target) = self.targets.get(&handle) else {
            log::debug!("bind_target: unknown target {handle:?}");
            return;
        };
        backend.bind_target(Some(&target.attachments()));
        backend.set_viewport(target.width, target.height);
        self.last_bound = Some(handle);
    }

    /// Binds the default backbuffer.
    pub fn unbind(&mut self, backend: &mut dyn GraphicsBackend) {
        backend.bind_target(None);
        backend.set_viewport(self.viewport.0, self.viewport.1);
        self.last_bound = None;
    }

    /// Target bound by the last `bind_target`, `None` for the backbuffer.
    pub fn last_bound(&self) -> Option<TargetHandle> {
        self.last_bound
    }

    pub fn set_force_default(&mut self, force: bool) {
        self.force_default = force;
    }

    pub fn force_default(&self) -> bool {
        self.force_default
    }

    /// `None` removes the association.
    pub fn bind_scene_to_target(&mut self, scene: SceneId, target: Option<TargetHandle>) {
        match target {
            Some(handle) => {
                self.scene_targets.insert(scene, handle);
            }
            None => {
                self.scene_targets.remove(&scene);
            }
        }
    }

    pub fn scene_target(&self, scene: SceneId) -> Option<TargetHandle> {
        self.scene_targets.get(&scene).copied()
    }

    /// Binds the scene's target, or the backbuffer when forced or when the
    /// scene has none. Returns the bound target.
    pub fn bind_proper_target_from_scene(
        &mut self,
        scene: SceneId,
        backend: &mut dyn GraphicsBackend,
    ) -> Option<TargetHandle> {
        let target = if self.force_default {
            None
        } else {
            self.scene_target(scene)
                .filter(|handle| self.targets.contains_key(handle))
        };
        match target {
            Some(handle) => self.bind_target(handle, backend),
            None => self.unbind(backend),
        }
        target
    }

    /// Recreates the target's attachments at the new size. Unknown handles,
    /// empty sizes and unchanged sizes are ignored.
    pub fn resize(
        &mut self,
        handle: TargetHandle,
        width: u32,
        height: u32,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let Some(target) = self.targets.get_mut(&handle) else {
            log::debug!("resize: unknown target {handle:?}");
            return Ok(());
        };
        if width == 0 || height == 0 || (target.width, target.height) == (width, height) {
            return Ok(());
        }

        target.release(backend);
        let (color, depth) = RenderTarget::allocate(target.template, width, height, backend)?;
        target.color = color;
        target.depth = depth;
        target.width = width;
        target.height = height;
        log::debug!("Resized target {handle:?} to {width}x{height}");
        Ok(())
    }

    /// Updates the viewport and resizes every viewport-bound target.
    pub fn resize_viewport(
        &mut self,
        width: u32,
        height: u32,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.viewport = (width, height);
        let bound: Vec<TargetHandle> = self
            .targets
            .iter()
            .filter(|(_, target)| target.viewport_bound)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in bound {
            self.resize(handle, width, height, backend)?;
        }
        Ok(())
    }

    pub fn is_complete(&self, handle: TargetHandle, backend: &dyn GraphicsBackend) -> bool {
        let Some(target) = self.targets.get(&handle) else {
            return false;
        };
        let template = target.template;
        target.color.len() == template.color_count()
            && target.depth.is_some() == template.has_depth()
            && backend.validate_attachments(&target.attachments())
    }

    pub fn remove_target(&mut self, handle: TargetHandle, backend: &mut dyn GraphicsBackend) -> bool {
        let Some(mut target) = self.targets.remove(&handle) else {
            return false;
        };
        target.release(backend);
        self.scene_targets.retain(|_, bound| *bound != handle);
        if self.last_bound == Some(handle) {
            self.last_bound = None;
        }
        true
    }

    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, mut target) in self.targets.drain() {
            target.release(backend);
        }
        self.scene_targets.clear();
        self.last_bound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{Command, HeadlessBackend};

    #[test]
    fn templates_allocate_expected_attachments() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);

        let full = targets
            .add_target(TargetTemplate::FullColor, 64, 64, &mut backend)
            .unwrap();
        let depth = targets
            .add_target(TargetTemplate::DepthOnly, 64, 64, &mut backend)
            .unwrap();
        let cube = targets
            .add_target(TargetTemplate::DepthCube, 32, 32, &mut backend)
            .unwrap();

        let full_target = targets.target(full).unwrap();
        assert_eq!(full_target.color().len(), 1);
        assert!(full_target.has_stencil());
        assert!(targets.target(depth).unwrap().color().is_empty());
        assert!(!targets.target(depth).unwrap().has_stencil());

        let cube_depth = targets.depth_attachment(cube).unwrap();
        assert!(backend.attachment(cube_depth).unwrap().is_cube());

        for handle in [full, depth, cube] {
            assert!(targets.is_complete(handle, &backend));
        }
    }

    #[test]
    fn resize_to_same_size_keeps_attachments() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let handle = targets
            .add_target(TargetTemplate::ColorDepth, 100, 100, &mut backend)
            .unwrap();

        targets.resize(handle, 200, 150, &mut backend).unwrap();
        let before = targets.target(handle).unwrap().attachments();
        let created = backend.attachments_created();

        targets.resize(handle, 200, 150, &mut backend).unwrap();
        assert_eq!(targets.target(handle).unwrap().attachments(), before);
        assert_eq!(backend.attachments_created(), created);
        assert_eq!(targets.target(handle).unwrap().size(), (200, 150));
    }

    #[test]
    fn resize_releases_old_attachments() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let handle = targets
            .add_target(TargetTemplate::FullColor, 100, 100, &mut backend)
            .unwrap();
        let old = targets.target(handle).unwrap().attachments();

        targets.resize(handle, 50, 50, &mut backend).unwrap();
        assert_eq!(backend.live_attachments(), 2);
        for id in old {
            assert!(backend.attachment(id).is_none());
        }
        // zero sizes are ignored
        targets.resize(handle, 0, 10, &mut backend).unwrap();
        assert_eq!(targets.target(handle).unwrap().size(), (50, 50));
    }

    #[test]
    fn viewport_resize_only_touches_viewport_targets() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let scene = targets
            .add_viewport_target(TargetTemplate::FullColor, &mut backend)
            .unwrap();
        let shadow = targets
            .add_target(TargetTemplate::DepthOnly, 1024, 1024, &mut backend)
            .unwrap();

        targets.resize_viewport(800, 600, &mut backend).unwrap();
        assert_eq!(targets.target(scene).unwrap().size(), (800, 600));
        assert_eq!(targets.target(shadow).unwrap().size(), (1024, 1024));
        assert_eq!(targets.viewport(), (800, 600));
    }

    #[test]
    fn scene_binding_respects_force_default() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let handle = targets
            .add_viewport_target(TargetTemplate::FullColor, &mut backend)
            .unwrap();
        let scene = SceneId(1);

        assert_eq!(targets.bind_proper_target_from_scene(scene, &mut backend), None);

        targets.bind_scene_to_target(scene, Some(handle));
        assert_eq!(
            targets.bind_proper_target_from_scene(scene, &mut backend),
            Some(handle)
        );
        assert_eq!(targets.last_bound(), Some(handle));
        assert_eq!(
            backend.bound_target(),
            Some(targets.target(handle).unwrap().attachments().as_slice())
        );

        targets.set_force_default(true);
        assert_eq!(targets.bind_proper_target_from_scene(scene, &mut backend), None);
        assert_eq!(backend.bound_target(), None);
        assert_eq!(
            backend.commands().last(),
            Some(&Command::Viewport(640, 480))
        );
    }

    #[test]
    fn unknown_handles_are_ignored() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        targets.bind_target(TargetHandle(42), &mut backend);
        targets.resize(TargetHandle(42), 10, 10, &mut backend).unwrap();
        assert!(backend.commands().is_empty());
        assert!(!targets.is_complete(TargetHandle(42), &backend));
    }

    #[test]
    fn rejected_attachments_make_target_incomplete() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let handle = targets
            .add_target(TargetTemplate::ColorDepth, 16, 16, &mut backend)
            .unwrap();
        backend.set_reject_attachments(true);
        assert!(!targets.is_complete(handle, &backend));
    }

    #[test]
    fn removing_a_target_frees_it_and_its_scene_binding() {
        let mut backend = HeadlessBackend::new();
        let mut targets = RenderTargetManager::new(640, 480);
        let handle = targets
            .add_target(TargetTemplate::DepthOnly, 16, 16, &mut backend)
            .unwrap();
        targets.bind_scene_to_target(SceneId(0), Some(handle));

        assert!(targets.remove_target(handle, &mut backend));
        assert_eq!(backend.live_attachments(), 0);
        assert_eq!(targets.scene_target(SceneId(0)), None);
        assert!(!targets.remove_target(handle, &mut backend));
    }
}
