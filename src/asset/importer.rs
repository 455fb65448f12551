use std::path::Path;

use gltf::material::AlphaMode;

use super::{MeshData, ModelImporter, TextureKind, TextureRef};
use crate::error::{RenderError, Result};
use crate::renderer::Vertex;

/// Reads every primitive of a `.gltf`/`.glb` file as one mesh. Node
/// transforms are not applied; meshes stay in their own space.
///
/// Only buffers are loaded. Images are recorded as paths and left for the
/// texture pipeline to decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfImporter {
    /// Uniform scale applied to vertex positions.
    pub scale: Option<f32>,
}

impl GltfImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale(scale: f32) -> Self {
        Self { scale: Some(scale) }
    }
}

fn import_error(path: &Path, message: impl ToString) -> RenderError {
    RenderError::Import {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

impl ModelImporter for GltfImporter {
    fn import(&self, path: &Path) -> Result<Vec<MeshData>> {
        let gltf::Gltf { document, blob } =
            gltf::Gltf::open(path).map_err(|e| import_error(path, e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("./"));
        let buffers = gltf::import_buffers(&document, Some(base_dir), blob)
            .map_err(|e| import_error(path, e))?;
        let scale = self.scale.unwrap_or(1.0);

        let mut meshes = Vec::new();
        for gltf_mesh in document.meshes() {
            let mesh_name = gltf_mesh.name().unwrap_or("Unnamed");
            for (index, primitive) in gltf_mesh.primitives().enumerate() {
                let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

                let positions = reader
                    .read_positions()
                    .ok_or_else(|| import_error(path, format!("{mesh_name}: missing positions")))?
                    .collect::<Vec<_>>();
                let normals = reader
                    .read_normals()
                    .map(|n| n.collect::<Vec<_>>())
                    .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; positions.len()]);
                let uvs = reader
                    .read_tex_coords(0)
                    .map(|uv| uv.into_f32().collect::<Vec<_>>())
                    .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);
                let indices = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..positions.len() as u32).collect(),
                };

                let vertices = positions
                    .iter()
                    .zip(&normals)
                    .zip(&uvs)
                    .map(|((p, n), uv)| Vertex {
                        pos: [p[0] * scale, p[1] * scale, p[2] * scale],
                        normal: *n,
                        uv: *uv,
                    })
                    .collect();

                let material = primitive.material();
                let pbr = material.pbr_metallic_roughness();
                let mut textures = Vec::new();
                let slots = [
                    (TextureKind::Diffuse, pbr.base_color_texture().map(|i| i.texture())),
                    (
                        TextureKind::Specular,
                        pbr.metallic_roughness_texture().map(|i| i.texture()),
                    ),
                    (TextureKind::Normal, material.normal_texture().map(|i| i.texture())),
                    (
                        TextureKind::Emissive,
                        material.emissive_texture().map(|i| i.texture()),
                    ),
                ];
                for (kind, texture) in slots {
                    let Some(texture) = texture else { continue };
                    match texture.source().source() {
                        gltf::image::Source::Uri { uri, .. } => textures.push(TextureRef {
                            kind,
                            path: base_dir.join(uri),
                        }),
                        gltf::image::Source::View { .. } => {
                            log::debug!("{mesh_name}: skipping embedded {kind:?} texture");
                        }
                    }
                }

                let transparent = matches!(material.alpha_mode(), AlphaMode::Blend);
                meshes.push(MeshData {
                    name: Some(if index == 0 {
                        mesh_name.to_string()
                    } else {
                        format!("{mesh_name}_{index}")
                    }),
                    vertices,
                    indices,
                    textures,
                    transparent,
                });
            }
        }

        if meshes.is_empty() {
            return Err(import_error(path, "file contains no meshes"));
        }
        Ok(meshes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_import_error() {
        let err = GltfImporter::new()
            .import(Path::new("does/not/exist.gltf"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Import { .. }));
    }
}
