use crate::error::Result;
use crate::renderer::frame::FrameContext;
use crate::renderer::stages::{
    BindTargetStage, CameraStage, LightStage, OpaqueStage, PipelineStage, ShadowStage,
    SkyboxStage, TransparentStage,
};

/// Ordered list of stages run once per frame.
#[derive(Default)]
pub struct RenderPipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl RenderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard forward frame: camera, shadows, lights, target binding,
    /// opaque geometry, skybox, then transparent geometry.
    pub fn forward() -> Self {
        let mut pipeline = Self::new();
        pipeline
            .add(CameraStage)
            .add(ShadowStage)
            .add(LightStage)
            .add(BindTargetStage)
            .add(OpaqueStage)
            .add(SkyboxStage)
            .add(TransparentStage);
        pipeline
    }

    pub fn add(&mut self, stage: impl PipelineStage + 'static) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage in order. The first failing stage ends the frame.
    pub fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        for stage in &mut self.stages {
            log::trace!("Running stage '{}'", stage.name());
            stage.run(ctx).map_err(|err| {
                log::error!("Stage '{}' failed: {err}", stage.name());
                err
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl PipelineStage for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&mut self, _ctx: &mut FrameContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn forward_runs_stages_in_frame_order() {
        let pipeline = RenderPipeline::forward();
        assert_eq!(
            pipeline.stage_names(),
            [
                "camera",
                "shadows",
                "lights",
                "bind-target",
                "opaque",
                "skybox",
                "transparent"
            ]
        );
    }

    #[test]
    fn stages_can_be_replaced() {
        let mut pipeline = RenderPipeline::forward();
        pipeline.clear();
        assert!(pipeline.is_empty());

        pipeline.add(Noop("first")).add(Noop("second"));
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stage_names(), ["first", "second"]);
    }
}
