pub mod cache;
pub mod handle;
pub mod importer;
pub mod mesh;

pub use cache::AssetCache;
pub use handle::Handle;
pub use importer::GltfImporter;
pub use mesh::{Mesh, MeshData, TextureKind, TextureRef};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RenderError, ResourceKind, Result};
use crate::renderer::backend::GraphicsBackend;

/// Decodes a model file into CPU-side meshes.
pub trait ModelImporter {
    fn import(&self, path: &Path) -> Result<Vec<MeshData>>;
}

/// Owner of every uploaded mesh. Models are cached by path, so asking for the
/// same file twice returns the same handles without touching the importer.
#[derive(Default)]
pub struct Assets {
    meshes: AssetCache<Mesh>,
    models: HashMap<PathBuf, Vec<Handle<Mesh>>>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(
        &mut self,
        data: MeshData,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<Handle<Mesh>> {
        let gpu = backend.upload_mesh(&data.vertices, &data.indices)?;
        Ok(self.meshes.insert(Mesh::new(data, gpu)))
    }

    pub fn mesh(&self, handle: Handle<Mesh>) -> Result<&Mesh> {
        self.meshes
            .get(handle)
            .ok_or_else(|| RenderError::not_found(ResourceKind::Mesh, format!("#{}", handle.index())))
    }

    pub fn meshes(&self) -> &AssetCache<Mesh> {
        &self.meshes
    }

    pub fn load_model(
        &mut self,
        path: impl AsRef<Path>,
        importer: &dyn ModelImporter,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<Vec<Handle<Mesh>>> {
        let path = path.as_ref();
        if let Some(handles) = self.models.get(path) {
            log::debug!("Model cache hit: {}", path.display());
            return Ok(handles.clone());
        }

        let data = importer.import(path)?;
        let mut handles = Vec::with_capacity(data.len());
        for mesh in data {
            handles.push(self.add_mesh(mesh, backend)?);
        }
        log::info!("Loaded {} ({} meshes)", path.display(), handles.len());

        self.models.insert(path.to_path_buf(), handles.clone());
        Ok(handles)
    }

    pub fn is_model_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.models.contains_key(path.as_ref())
    }

    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for mesh in self.meshes.drain() {
            backend.release_mesh(mesh.gpu());
        }
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::primitives::cube_mesh;

    struct CountingImporter {
        calls: Cell<usize>,
    }

    impl ModelImporter for CountingImporter {
        fn import(&self, _path: &Path) -> Result<Vec<MeshData>> {
            self.calls.set(self.calls.get() + 1);
            let (vertices, indices) = cube_mesh();
            Ok(vec![MeshData::new(vertices, indices).named("cube")])
        }
    }

    #[test]
    fn repeated_loads_hit_the_cache() {
        let mut backend = HeadlessBackend::new();
        let mut assets = Assets::new();
        let importer = CountingImporter { calls: Cell::new(0) };

        let first = assets.load_model("cube.gltf", &importer, &mut backend).unwrap();
        let second = assets.load_model("cube.gltf", &importer, &mut backend).unwrap();

        assert_eq!(first, second);
        assert_eq!(importer.calls.get(), 1);
        assert_eq!(assets.meshes().len(), 1);
        assert_eq!(assets.mesh(first[0]).unwrap().name(), Some("cube"));
    }

    #[test]
    fn unknown_mesh_is_not_found() {
        let assets = Assets::new();
        let err = assets.mesh(Handle::new(3)).unwrap_err();
        assert!(matches!(
            err,
            RenderError::NotFound {
                kind: ResourceKind::Mesh,
                ..
            }
        ));
    }
}
