use std::collections::HashMap;
use std::path::Path;

use crate::asset::{Assets, Handle, Mesh, MeshData, ModelImporter};
use crate::error::{RenderError, ResourceKind, Result};
use crate::input::{InputEvent, InputRegistrar};
use crate::renderer::backend::{AttachmentId, BufferKind, GraphicsBackend, PolygonMode};
use crate::renderer::builtin::{
    builtin_shaders, camera_block_layout, lights_block_layout, seed_defaults, CAMERA_BLOCK,
    LIGHTS_BLOCK,
};
use crate::renderer::frame::FrameContext;
use crate::renderer::instancing::InstanceGrouper;
use crate::renderer::pipeline::RenderPipeline;
use crate::renderer::shaders::{ShaderDesc, ShaderLibrary};
use crate::renderer::shadows::ShadowMapCache;
use crate::renderer::targets::{RenderTargetManager, TargetHandle, TargetTemplate};
use crate::renderer::uniforms::{BindingRegistries, UniformBlocks};
use crate::scene::{Scene, SceneId};
use crate::settings::{Feature, FeatureFlags, RenderSettings};
use crate::time::FrameClock;

/// Ties scenes, assets, shaders, targets and the frame pipeline to one
/// graphics backend.
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    settings: RenderSettings,
    flags: FeatureFlags,
    registries: BindingRegistries,
    blocks: UniformBlocks,
    shaders: ShaderLibrary,
    assets: Assets,
    targets: RenderTargetManager,
    shadows: ShadowMapCache,
    instances: InstanceGrouper,
    pipeline: RenderPipeline,
    scenes: HashMap<SceneId, Scene>,
    next_scene: u32,
    bound_scene: Option<SceneId>,
    input: InputRegistrar,
    pending_input: Vec<InputEvent>,
    clock: FrameClock,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Creates the shared blocks, registers the built-in programs and pushes
    /// the configured feature flags to the backend.
    pub fn new(backend: B, settings: RenderSettings) -> Result<Self> {
        let mut backend = backend;
        let mut registries = BindingRegistries::new(settings.max_binding_points);
        let mut blocks = UniformBlocks::new();
        blocks.create(
            CAMERA_BLOCK,
            BufferKind::Uniform,
            camera_block_layout(),
            &mut registries,
            &mut backend,
        )?;
        blocks.create(
            LIGHTS_BLOCK,
            BufferKind::Uniform,
            lights_block_layout(),
            &mut registries,
            &mut backend,
        )?;

        let flags = settings.flags;
        flags.apply_all(&mut backend);

        let mut engine = Self {
            targets: RenderTargetManager::new(settings.resolution.width, settings.resolution.height),
            shadows: ShadowMapCache::new(settings.shadow_map_size, settings.shadow_focus),
            backend,
            flags,
            registries,
            blocks,
            shaders: ShaderLibrary::new(),
            assets: Assets::new(),
            instances: InstanceGrouper::new(),
            pipeline: RenderPipeline::forward(),
            scenes: HashMap::new(),
            next_scene: 0,
            bound_scene: None,
            input: InputRegistrar::new(),
            pending_input: Vec::new(),
            clock: FrameClock::new(),
            settings,
        };
        engine.register_builtin_shaders()?;
        log::info!("Engine ready on the {} backend", engine.backend.name());
        Ok(engine)
    }

    /// Creates an empty scene. The first scene created is bound.
    pub fn create_scene(&mut self) -> SceneId {
        let id = SceneId(self.next_scene);
        self.next_scene += 1;
        self.scenes.insert(id, Scene::new(id));
        if self.bound_scene.is_none() {
            self.bound_scene = Some(id);
        }
        log::info!("Created scene {id:?}");
        id
    }

    /// Makes `id` the scene rendered by `run_frame`. Shadow maps belong to
    /// the lights of one scene and are dropped on a switch.
    pub fn bind_scene(&mut self, id: SceneId) -> Result<()> {
        if !self.scenes.contains_key(&id) {
            return Err(RenderError::not_found(ResourceKind::Scene, format!("{id:?}")));
        }
        if self.bound_scene != Some(id) {
            self.shadows.release_all(&mut self.targets, &mut self.backend);
            self.bound_scene = Some(id);
            log::info!("Bound scene {id:?}");
        }
        Ok(())
    }

    pub fn bound_scene(&self) -> Option<SceneId> {
        self.bound_scene
    }

    pub fn scene(&self, id: SceneId) -> Result<&Scene> {
        self.scenes
            .get(&id)
            .ok_or_else(|| RenderError::not_found(ResourceKind::Scene, format!("{id:?}")))
    }

    pub fn scene_mut(&mut self, id: SceneId) -> Result<&mut Scene> {
        self.scenes
            .get_mut(&id)
            .ok_or_else(|| RenderError::not_found(ResourceKind::Scene, format!("{id:?}")))
    }

    pub fn bound_scene_mut(&mut self) -> Result<&mut Scene> {
        let id = self
            .bound_scene
            .ok_or_else(|| RenderError::precondition("no scene bound"))?;
        self.scene_mut(id)
    }

    pub fn destroy_scene(&mut self, id: SceneId) -> Result<()> {
        if self.scenes.remove(&id).is_none() {
            return Err(RenderError::not_found(ResourceKind::Scene, format!("{id:?}")));
        }
        self.targets.bind_scene_to_target(id, None);
        if self.bound_scene == Some(id) {
            self.shadows.release_all(&mut self.targets, &mut self.backend);
            self.bound_scene = None;
        }
        log::info!("Destroyed scene {id:?}");
        Ok(())
    }

    pub fn register_shader(&mut self, desc: &ShaderDesc) -> Result<usize> {
        self.shaders
            .register(desc, &self.blocks, &mut self.registries, &mut self.backend)
    }

    pub fn register_builtin_shaders(&mut self) -> Result<()> {
        for desc in builtin_shaders() {
            self.register_shader(&desc)?;
        }
        seed_defaults(&mut self.shaders)
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn shaders_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    pub fn blocks(&self) -> &UniformBlocks {
        &self.blocks
    }

    pub fn add_mesh(&mut self, data: MeshData) -> Result<Handle<Mesh>> {
        self.assets.add_mesh(data, &mut self.backend)
    }

    pub fn load_model(
        &mut self,
        path: impl AsRef<Path>,
        importer: &dyn ModelImporter,
    ) -> Result<Vec<Handle<Mesh>>> {
        self.assets.load_model(path, importer, &mut self.backend)
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    /// Gives the scene a viewport-sized offscreen target to render into.
    pub fn add_scene_target(
        &mut self,
        scene: SceneId,
        template: TargetTemplate,
    ) -> Result<TargetHandle> {
        self.scene(scene)?;
        let handle = self.targets.add_viewport_target(template, &mut self.backend)?;
        self.targets.bind_scene_to_target(scene, Some(handle));
        Ok(handle)
    }

    /// Renders every scene straight to the backbuffer while set.
    pub fn set_force_default_target(&mut self, force: bool) {
        self.targets.set_force_default(force);
    }

    pub fn targets(&self) -> &RenderTargetManager {
        &self.targets
    }

    pub fn shadow_cache(&self) -> &ShadowMapCache {
        &self.shadows
    }

    pub fn set_feature(&mut self, feature: Feature, enabled: bool) {
        self.flags.set(feature, enabled, &mut self.backend);
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.flags.set_polygon_mode(mode, &mut self.backend);
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub fn pipeline_mut(&mut self) -> &mut RenderPipeline {
        &mut self.pipeline
    }

    /// Handle for binding input handlers, usable from other threads.
    pub fn input_registrar(&self) -> InputRegistrar {
        self.input.clone()
    }

    /// Queues an event for dispatch at the end of the next frame.
    pub fn queue_input(&mut self, event: InputEvent) {
        self.pending_input.push(event);
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Renders one frame of the bound scene and presents it.
    ///
    /// The frame lock is held from the clock update to the present, so input
    /// handlers bound from other threads never observe a half-drawn frame.
    pub fn run_frame(&mut self) -> Result<()> {
        let registrar = self.input.clone();
        let mut bindings = registrar.lock();
        self.clock.tick();

        let id = self
            .bound_scene
            .ok_or_else(|| RenderError::precondition("no scene bound"))?;
        let scene = self
            .scenes
            .get_mut(&id)
            .ok_or_else(|| RenderError::not_found(ResourceKind::Scene, format!("{id:?}")))?;

        self.backend.begin_frame()?;
        let mut ctx = FrameContext {
            scene,
            assets: &self.assets,
            shaders: &mut self.shaders,
            blocks: &mut self.blocks,
            targets: &mut self.targets,
            shadows: &mut self.shadows,
            instances: &mut self.instances,
            flags: &self.flags,
            clear_color: self.settings.clear_color,
            backend: &mut self.backend,
        };
        self.pipeline.run(&mut ctx)?;

        for event in self.pending_input.drain(..) {
            bindings.dispatch(&event, ctx.scene);
        }
        registrar.merge_pending(&mut bindings);
        self.backend.present()
    }

    /// Follows a window resize. Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return Ok(());
        }
        self.backend.resize_surface(width, height);
        self.targets.resize_viewport(width, height, &mut self.backend)
    }

    /// First color attachment of the bound scene's target, if it renders
    /// offscreen.
    pub fn scene_color_attachment(&self) -> Option<AttachmentId> {
        let handle = self.targets.scene_target(self.bound_scene?)?;
        self.targets.color_attachment(handle, 0)
    }

    pub fn viewport_size(&self) -> (u32, u32) {
        self.targets.viewport()
    }

    /// Releases every backend resource the engine owns.
    pub fn shutdown(&mut self) {
        self.shadows.release_all(&mut self.targets, &mut self.backend);
        self.targets.release_all(&mut self.backend);
        self.shaders
            .release_all(&mut self.registries, &mut self.backend);
        self.blocks.release_all(&mut self.registries, &mut self.backend);
        self.assets.release_all(&mut self.backend);
        self.scenes.clear();
        self.bound_scene = None;
        log::info!("Engine shut down");
    }
}
