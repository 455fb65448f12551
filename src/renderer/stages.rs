// renderer/stages.rs
use std::cmp::Ordering;

use glam::{Mat4, Vec3, Vec4};

use crate::error::Result;
use crate::renderer::backend::{ClearFlags, DepthFunc, MeshId, StateToggle};
use crate::renderer::builtin::{
    CAMERA_BLOCK, LIGHTS_BLOCK, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS, MAX_SPOT_LIGHTS,
};
use crate::renderer::frame::FrameContext;
use crate::renderer::instancing::gather_transforms;
use crate::renderer::shaders::ShaderCapabilities;
use crate::scene::{LightId, LightKind, LightType};

/// One named step of a frame. An `Err` abandons the rest of the frame.
pub trait PipelineStage {
    fn name(&self) -> &str;
    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()>;
}

/// Uploads the active camera's matrices into the `Camera` block.
pub struct CameraStage;

impl PipelineStage for CameraStage {
    fn name(&self) -> &str {
        "camera"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let (width, height) = ctx.output_size();
        let aspect = width as f32 / height.max(1) as f32;
        let camera = *ctx.scene.active_camera()?;

        let view = camera.view();
        let projection = camera.proj(aspect);
        let block = ctx.blocks.get_mut(CAMERA_BLOCK)?;
        block.set("view_proj", projection * view)?;
        block.set("view", view)?;
        block.set("projection", projection)?;
        block.set("sky_view_proj", projection * camera.rotation_only_view())?;
        block.set("eye", camera.position())?;
        block.upload(ctx.backend);
        Ok(())
    }
}

/// Aligns and renders a shadow map for every shadow-casting light whose
/// type has shadows enabled.
pub struct ShadowStage;

impl PipelineStage for ShadowStage {
    fn name(&self) -> &str {
        "shadows"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let alive: Vec<LightId> = ctx.scene.lights().iter().map(|light| light.id()).collect();
        ctx.shadows.retain_lights(&alive, ctx.targets, ctx.backend);
        if !ctx.flags.shadows {
            return Ok(());
        }

        for light in ctx.scene.lights() {
            if !light.enabled || !light.cast_shadows || !ctx.flags.shadows_for(light.light_type())
            {
                continue;
            }
            ctx.shadows.align(light, ctx.targets, ctx.backend)?;
            ctx.shadows.render(
                light.id(),
                ctx.scene,
                ctx.assets,
                ctx.shaders,
                ctx.targets,
                ctx.backend,
            )?;
        }
        Ok(())
    }
}

/// Packs enabled lights into the `Lights` block. Lights beyond the per-type
/// capacity are dropped with a warning.
pub struct LightStage;

impl PipelineStage for LightStage {
    fn name(&self) -> &str {
        "lights"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let block = ctx.blocks.get_mut(LIGHTS_BLOCK)?;
        let mut counts = [0usize; 3];
        let mut shadow: Option<Mat4> = None;

        for light in ctx.scene.lights().iter().filter(|light| light.enabled) {
            let radiance = light.color.extend(light.intensity);
            match light.kind {
                LightKind::Directional { direction } => {
                    let index = counts[0];
                    if index >= MAX_DIRECTIONAL_LIGHTS {
                        log::warn!("Too many directional lights, ignoring {:?}", light.id());
                        continue;
                    }
                    block.set_element("directional_direction", index, direction.extend(0.0))?;
                    block.set_element("directional_color", index, radiance)?;
                    counts[0] += 1;
                }
                LightKind::Point {
                    position,
                    attenuation,
                } => {
                    let index = counts[1];
                    if index >= MAX_POINT_LIGHTS {
                        log::warn!("Too many point lights, ignoring {:?}", light.id());
                        continue;
                    }
                    block.set_element("point_position", index, position.extend(1.0))?;
                    block.set_element("point_color", index, radiance)?;
                    block.set_element(
                        "point_attenuation",
                        index,
                        Vec4::new(
                            attenuation.constant,
                            attenuation.linear,
                            attenuation.quadratic,
                            0.0,
                        ),
                    )?;
                    counts[1] += 1;
                }
                LightKind::Spot {
                    position,
                    direction,
                    cutoff,
                    outer_cutoff,
                    attenuation,
                } => {
                    let index = counts[2];
                    if index >= MAX_SPOT_LIGHTS {
                        log::warn!("Too many spot lights, ignoring {:?}", light.id());
                        continue;
                    }
                    block.set_element("spot_position", index, position.extend(1.0))?;
                    block.set_element("spot_direction", index, direction.extend(cutoff.cos()))?;
                    block.set_element("spot_color", index, radiance)?;
                    block.set_element(
                        "spot_attenuation",
                        index,
                        Vec4::new(
                            attenuation.constant,
                            attenuation.linear,
                            attenuation.quadratic,
                            outer_cutoff.cos(),
                        ),
                    )?;
                    counts[2] += 1;
                }
            }

            if shadow.is_none()
                && light.light_type() == LightType::Directional
                && ctx.flags.shadows_for(LightType::Directional)
            {
                shadow = ctx
                    .shadows
                    .shadow_map(light.id())
                    .ok()
                    .map(|entry| entry.light_space);
            }
        }

        block.set("directional_count", counts[0] as i32)?;
        block.set("point_count", counts[1] as i32)?;
        block.set("spot_count", counts[2] as i32)?;
        block.set("shadow_enabled", i32::from(shadow.is_some()))?;
        block.set("shadow_light_space", shadow.unwrap_or(Mat4::IDENTITY))?;
        block.upload(ctx.backend);
        Ok(())
    }
}

/// Binds the scene's render target (or the backbuffer) and clears it.
pub struct BindTargetStage;

impl PipelineStage for BindTargetStage {
    fn name(&self) -> &str {
        "bind-target"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        ctx.targets
            .bind_proper_target_from_scene(ctx.scene.id(), ctx.backend);
        ctx.backend.clear(
            ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL,
            ctx.clear_color,
        );
        Ok(())
    }
}

/// Draws opaque geometry, one shader tag at a time. Programs with
/// `INSTANCING` draw each mesh once for all objects sharing it.
pub struct OpaqueStage;

impl PipelineStage for OpaqueStage {
    fn name(&self) -> &str {
        "opaque"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let tags: Vec<String> = ctx
            .scene
            .enabled_shader_tags()
            .into_iter()
            .map(str::to_string)
            .collect();

        for tag in tags {
            let capabilities = ctx.shaders.by_name(&tag)?.capabilities();
            if capabilities.intersects(ShaderCapabilities::TRANSPARENCY | ShaderCapabilities::SKYBOX)
            {
                continue;
            }
            ctx.shaders.activate(&tag, ctx.backend)?;
            ctx.shaders.flush(ctx.backend);

            if capabilities.contains(ShaderCapabilities::INSTANCING) {
                ctx.instances.rebuild(ctx.scene, &tag);
                for group in ctx.instances.groups() {
                    let mesh = ctx.assets.mesh(group.mesh)?;
                    if mesh.is_transparent() {
                        continue;
                    }
                    let transforms = gather_transforms(group, ctx.scene);
                    ctx.backend.draw_instanced(mesh.gpu(), &transforms);
                }
            } else {
                for object in ctx
                    .scene
                    .objects_with_shader(&tag)
                    .filter(|object| object.enabled)
                {
                    let model = object.model_matrix();
                    for &handle in &object.meshes {
                        let mesh = ctx.assets.mesh(handle)?;
                        if !mesh.is_transparent() {
                            ctx.backend.draw_mesh(mesh.gpu(), model);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Draws the scene's skybox on the far plane behind opaque geometry.
pub struct SkyboxStage;

impl PipelineStage for SkyboxStage {
    fn name(&self) -> &str {
        "skybox"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let Some(skybox) = ctx.scene.skybox() else {
            return Ok(());
        };
        let mesh = ctx.assets.mesh(skybox.mesh)?.gpu();
        ctx.shaders.activate(&skybox.shader, ctx.backend)?;
        ctx.shaders.flush(ctx.backend);

        // the camera sits inside the cube
        ctx.backend.apply_state(StateToggle::FaceCulling(false));
        ctx.backend.apply_state(StateToggle::DepthWrite(false));
        ctx.backend.apply_state(StateToggle::DepthFunc(DepthFunc::LessEqual));
        ctx.backend.draw_skybox(mesh);
        ctx.backend.apply_state(StateToggle::DepthFunc(DepthFunc::Less));
        ctx.backend.apply_state(StateToggle::DepthWrite(true));
        ctx.backend
            .apply_state(StateToggle::FaceCulling(ctx.flags.face_culling));
        Ok(())
    }
}

struct TransparentDraw {
    distance_sq: f32,
    shader: String,
    mesh: MeshId,
    model: Mat4,
}

/// Draws transparent meshes and `TRANSPARENCY` programs back to front with
/// depth writes off.
pub struct TransparentStage;

impl PipelineStage for TransparentStage {
    fn name(&self) -> &str {
        "transparent"
    }

    fn run(&mut self, ctx: &mut FrameContext<'_>) -> Result<()> {
        let eye: Vec3 = ctx.scene.active_camera()?.position();

        let mut draws = Vec::new();
        for object in ctx.scene.objects().filter(|object| object.enabled) {
            let capabilities = ctx.shaders.by_name(&object.shader)?.capabilities();
            if capabilities.contains(ShaderCapabilities::SKYBOX) {
                continue;
            }
            let model = object.model_matrix();
            for &handle in &object.meshes {
                let mesh = ctx.assets.mesh(handle)?;
                if !capabilities.contains(ShaderCapabilities::TRANSPARENCY)
                    && !mesh.is_transparent()
                {
                    continue;
                }
                let center = model.transform_point3(mesh.centroid());
                draws.push(TransparentDraw {
                    distance_sq: (center - eye).length_squared(),
                    shader: object.shader.clone(),
                    mesh: mesh.gpu(),
                    model,
                });
            }
        }
        if draws.is_empty() {
            return Ok(());
        }

        draws.sort_by(|a, b| {
            b.distance_sq
                .partial_cmp(&a.distance_sq)
                .unwrap_or(Ordering::Equal)
        });

        ctx.backend
            .apply_state(StateToggle::Blending(ctx.flags.transparency));
        ctx.backend.apply_state(StateToggle::DepthWrite(false));

        let mut current: Option<&str> = None;
        for draw in &draws {
            if current != Some(draw.shader.as_str()) {
                ctx.shaders.activate(&draw.shader, ctx.backend)?;
                ctx.shaders.flush(ctx.backend);
                current = Some(&draw.shader);
            }
            ctx.backend.draw_mesh(draw.mesh, draw.model);
        }

        ctx.backend.apply_state(StateToggle::DepthWrite(true));
        ctx.backend.apply_state(StateToggle::Blending(false));
        Ok(())
    }
}
