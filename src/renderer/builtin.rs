use glam::Vec4;

use crate::error::Result;
use crate::renderer::layout::{ElementKind, FieldType, UniformBlockLayout};
use crate::renderer::shaders::{ShaderCapabilities, ShaderDesc, ShaderLibrary};

pub const CAMERA_BLOCK: &str = "Camera";
pub const LIGHTS_BLOCK: &str = "Lights";

pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
pub const MAX_POINT_LIGHTS: usize = 8;
pub const MAX_SPOT_LIGHTS: usize = 4;

pub const BASIC: &str = "Basic";
pub const GLASS: &str = "Glass";
pub const SHADOW: &str = "Shadow";
pub const SKYBOX: &str = "Skybox";

const BASIC_SOURCE: &str = concat!(
    include_str!("../shader/common.wgsl"),
    include_str!("../shader/basic.wgsl")
);
const SHADOW_SOURCE: &str = concat!(
    include_str!("../shader/common.wgsl"),
    include_str!("../shader/shadow.wgsl")
);
const SKYBOX_SOURCE: &str = concat!(
    include_str!("../shader/common.wgsl"),
    include_str!("../shader/skybox.wgsl")
);

pub fn camera_block_layout() -> UniformBlockLayout {
    UniformBlockLayout::named(&[
        ("view_proj", FieldType::Mat4),
        ("view", FieldType::Mat4),
        ("projection", FieldType::Mat4),
        ("sky_view_proj", FieldType::Mat4),
        ("eye", FieldType::Vec3),
    ])
}

pub fn lights_block_layout() -> UniformBlockLayout {
    let vec4s = |len| FieldType::Array(ElementKind::Vec4, len);
    UniformBlockLayout::named(&[
        ("directional_count", FieldType::Int),
        ("point_count", FieldType::Int),
        ("spot_count", FieldType::Int),
        ("shadow_enabled", FieldType::Int),
        ("shadow_light_space", FieldType::Mat4),
        ("directional_direction", vec4s(MAX_DIRECTIONAL_LIGHTS)),
        ("directional_color", vec4s(MAX_DIRECTIONAL_LIGHTS)),
        ("point_position", vec4s(MAX_POINT_LIGHTS)),
        ("point_color", vec4s(MAX_POINT_LIGHTS)),
        ("point_attenuation", vec4s(MAX_POINT_LIGHTS)),
        ("spot_position", vec4s(MAX_SPOT_LIGHTS)),
        ("spot_direction", vec4s(MAX_SPOT_LIGHTS)),
        ("spot_color", vec4s(MAX_SPOT_LIGHTS)),
        ("spot_attenuation", vec4s(MAX_SPOT_LIGHTS)),
    ])
}

fn lit(name: &str, capabilities: ShaderCapabilities) -> ShaderDesc {
    ShaderDesc::new(name, BASIC_SOURCE)
        .capabilities(capabilities)
        .block(CAMERA_BLOCK)
        .block(LIGHTS_BLOCK)
        .uniform("base_color", FieldType::Vec4)
        .uniform("ambient", FieldType::Float)
}

pub fn builtin_shaders() -> Vec<ShaderDesc> {
    vec![
        lit(BASIC, ShaderCapabilities::INSTANCING),
        lit(GLASS, ShaderCapabilities::TRANSPARENCY),
        ShaderDesc::new(SHADOW, SHADOW_SOURCE)
            .capabilities(ShaderCapabilities::SHADOW_MAPPING)
            .uniform("light_space", FieldType::Mat4)
            .depth_only(),
        ShaderDesc::new(SKYBOX, SKYBOX_SOURCE)
            .capabilities(ShaderCapabilities::SKYBOX)
            .block(CAMERA_BLOCK)
            .uniform("top_color", FieldType::Vec4)
            .uniform("bottom_color", FieldType::Vec4),
    ]
}

/// Initial uniform values of the built-in programs.
pub fn seed_defaults(shaders: &mut ShaderLibrary) -> Result<()> {
    shaders.program_uniform(BASIC, "base_color", Vec4::new(0.8, 0.8, 0.8, 1.0))?;
    shaders.program_uniform(BASIC, "ambient", 0.08f32)?;
    shaders.program_uniform(GLASS, "base_color", Vec4::new(0.4, 0.7, 0.9, 0.35))?;
    shaders.program_uniform(GLASS, "ambient", 0.2f32)?;
    shaders.program_uniform(SKYBOX, "top_color", Vec4::new(0.25, 0.45, 0.8, 1.0))?;
    shaders.program_uniform(SKYBOX, "bottom_color", Vec4::new(0.75, 0.8, 0.85, 1.0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_blocks_match_wgsl_struct_sizes() {
        // WGSL rounds struct sizes up to 16; these have no tail to round.
        assert_eq!(camera_block_layout().size(), 272);
        assert_eq!(camera_block_layout().field("eye").unwrap().offset, 256);

        let lights = lights_block_layout();
        assert_eq!(lights.field("shadow_light_space").unwrap().offset, 16);
        assert_eq!(lights.field("directional_direction").unwrap().offset, 80);
        assert_eq!(lights.size(), 848);
    }

    #[test]
    fn sources_declare_every_bound_block() {
        for desc in builtin_shaders() {
            for block in &desc.blocks {
                assert!(
                    desc.source.contains(&format!("{{{{{block}}}}}")),
                    "{} does not bind {block}",
                    desc.name
                );
            }
            assert!(desc.source.contains("{{Locals}}"), "{} has no locals", desc.name);
        }
    }
}
