use crate::asset::Assets;
use crate::renderer::backend::GraphicsBackend;
use crate::renderer::instancing::InstanceGrouper;
use crate::renderer::shaders::ShaderLibrary;
use crate::renderer::shadows::ShadowMapCache;
use crate::renderer::targets::RenderTargetManager;
use crate::renderer::uniforms::UniformBlocks;
use crate::scene::Scene;
use crate::settings::FeatureFlags;

/// Engine state the stages of one frame share. Stages talk to each other
/// only through what they leave in here.
pub struct FrameContext<'a> {
    pub scene: &'a mut Scene,
    pub assets: &'a Assets,
    pub shaders: &'a mut ShaderLibrary,
    pub blocks: &'a mut UniformBlocks,
    pub targets: &'a mut RenderTargetManager,
    pub shadows: &'a mut ShadowMapCache,
    pub instances: &'a mut InstanceGrouper,
    pub flags: &'a FeatureFlags,
    pub clear_color: [f32; 4],
    pub backend: &'a mut dyn GraphicsBackend,
}

impl FrameContext<'_> {
    /// Size of what the scene is drawn into this frame.
    pub fn output_size(&self) -> (u32, u32) {
        if !self.targets.force_default() {
            if let Some(target) = self
                .targets
                .scene_target(self.scene.id())
                .and_then(|handle| self.targets.target(handle))
            {
                return target.size();
            }
        }
        self.targets.viewport()
    }
}
