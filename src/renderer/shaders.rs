// renderer/shaders.rs
use std::borrow::Cow;
use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{RenderError, ResourceKind, Result};
use crate::renderer::backend::{BufferKind, GraphicsBackend, ProgramBinding, ProgramDesc, ProgramId};
use crate::renderer::layout::{FieldType, UniformBlockLayout};
use crate::renderer::uniforms::{BindingRegistries, UniformBlocks, UniformBuffer, UniformValue};

/// Name under which a program's own block is bound in its source.
pub const LOCALS_BLOCK: &str = "Locals";

bitflags! {
    /// What a program can be used for. Stages select programs by these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderCapabilities: u32 {
        /// Reads per-instance model matrices.
        const INSTANCING = 1 << 0;
        /// Drawn after opaque geometry, sorted back to front.
        const TRANSPARENCY = 1 << 1;
        /// Depth-only program used for shadow passes.
        const SHADOW_MAPPING = 1 << 2;
        const SKYBOX = 1 << 3;
    }
}

/// Everything needed to build one program.
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub name: String,
    pub source: Cow<'static, str>,
    pub capabilities: ShaderCapabilities,
    /// Fields of the program's own `Locals` block, if any.
    pub uniforms: Vec<(String, FieldType)>,
    /// Shared blocks (from [`UniformBlocks`]) the program reads.
    pub blocks: Vec<String>,
    pub has_fragment: bool,
}

impl ShaderDesc {
    pub fn new(name: impl Into<String>, source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            capabilities: ShaderCapabilities::empty(),
            uniforms: Vec::new(),
            blocks: Vec::new(),
            has_fragment: true,
        }
    }

    pub fn capabilities(mut self, capabilities: ShaderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn uniform(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.uniforms.push((name.into(), ty));
        self
    }

    pub fn block(mut self, name: impl Into<String>) -> Self {
        self.blocks.push(name.into());
        self
    }

    pub fn depth_only(mut self) -> Self {
        self.has_fragment = false;
        self
    }
}

#[derive(Debug)]
pub struct Program {
    name: String,
    id: ProgramId,
    capabilities: ShaderCapabilities,
    locals: Option<UniformBuffer>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn capabilities(&self) -> ShaderCapabilities {
        self.capabilities
    }

    pub fn has(&self, capability: ShaderCapabilities) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn locals(&self) -> Option<&UniformBuffer> {
        self.locals.as_ref()
    }
}

/// Registry of programs, addressable by name or registration index.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    programs: Vec<Program>,
    by_name: HashMap<String, usize>,
    active: Option<usize>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and registers a program. Shared blocks must already exist.
    /// Registering a name twice replaces the earlier program.
    pub fn register(
        &mut self,
        desc: &ShaderDesc,
        blocks: &UniformBlocks,
        registries: &mut BindingRegistries,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<usize> {
        let mut bindings = Vec::with_capacity(desc.blocks.len() + 1);
        for block_name in &desc.blocks {
            let block = blocks.get(block_name)?;
            bindings.push(ProgramBinding {
                name: block_name.clone(),
                kind: block.kind(),
                point: block.binding_point(),
                buffer: block.buffer(),
                size: block.layout().size(),
            });
        }

        let locals = if desc.uniforms.is_empty() {
            None
        } else {
            let layout = UniformBlockLayout::named(&desc.uniforms);
            let buffer = UniformBuffer::new(
                format!("{}.{}", desc.name, LOCALS_BLOCK),
                BufferKind::Uniform,
                layout,
                registries.for_kind(BufferKind::Uniform),
                backend,
            )?;
            bindings.push(ProgramBinding {
                name: LOCALS_BLOCK.to_string(),
                kind: BufferKind::Uniform,
                point: buffer.binding_point(),
                buffer: buffer.buffer(),
                size: buffer.layout().size(),
            });
            Some(buffer)
        };

        let id = match backend.create_program(&ProgramDesc {
            name: &desc.name,
            source: &desc.source,
            has_fragment: desc.has_fragment,
            bindings: &bindings,
        }) {
            Ok(id) => id,
            Err(err) => {
                if let Some(locals) = locals {
                    locals.release(registries.for_kind(BufferKind::Uniform), backend);
                }
                return Err(err);
            }
        };

        let program = Program {
            name: desc.name.clone(),
            id,
            capabilities: desc.capabilities,
            locals,
        };
        log::info!(
            "Registered shader '{}' ({:?})",
            program.name,
            program.capabilities
        );

        if let Some(&index) = self.by_name.get(&desc.name) {
            let old = std::mem::replace(&mut self.programs[index], program);
            if let Some(locals) = old.locals {
                locals.release(registries.for_kind(BufferKind::Uniform), backend);
            }
            return Ok(index);
        }

        self.programs.push(program);
        let index = self.programs.len() - 1;
        self.by_name.insert(desc.name.clone(), index);
        Ok(index)
    }

    pub fn by_name(&self, name: &str) -> Result<&Program> {
        self.index_of(name).map(|index| &self.programs[index])
    }

    pub fn by_index(&self, index: usize) -> Result<&Program> {
        self.programs
            .get(index)
            .ok_or_else(|| RenderError::not_found(ResourceKind::Shader, format!("#{index}")))
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::not_found(ResourceKind::Shader, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter()
    }

    pub fn with_capability(
        &self,
        capability: ShaderCapabilities,
    ) -> impl Iterator<Item = &Program> {
        self.programs
            .iter()
            .filter(move |program| program.has(capability))
    }

    /// Makes `name` the current program on the backend.
    pub fn activate(&mut self, name: &str, backend: &mut dyn GraphicsBackend) -> Result<()> {
        let index = self.index_of(name)?;
        self.active = Some(index);
        backend.use_program(self.programs[index].id);
        Ok(())
    }

    pub fn active(&self) -> Option<&Program> {
        self.active.map(|index| &self.programs[index])
    }

    /// Sets a field of the active program's `Locals` block. Names the program
    /// does not declare are ignored.
    pub fn set_uniform(&mut self, field: &str, value: impl Into<UniformValue>) -> Result<()> {
        let index = self
            .active
            .ok_or_else(|| RenderError::precondition("no active shader program"))?;
        Self::write_uniform(&mut self.programs[index], field, value.into())
    }

    /// Like [`set_uniform`](Self::set_uniform) but for any program, active or
    /// not. Used to seed defaults after registration.
    pub fn program_uniform(
        &mut self,
        program: &str,
        field: &str,
        value: impl Into<UniformValue>,
    ) -> Result<()> {
        let index = self.index_of(program)?;
        Self::write_uniform(&mut self.programs[index], field, value.into())
    }

    fn write_uniform(program: &mut Program, field: &str, value: UniformValue) -> Result<()> {
        match program.locals.as_mut() {
            Some(locals) if locals.has_field(field) => locals.set(field, value),
            _ => {
                log::debug!(
                    "Shader '{}' has no uniform '{}', ignoring",
                    program.name,
                    field
                );
                Ok(())
            }
        }
    }

    /// Uploads pending uniform writes of the active program.
    pub fn flush(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(index) = self.active {
            if let Some(locals) = self.programs[index].locals.as_mut() {
                locals.upload(backend);
            }
        }
    }

    pub fn release_all(
        &mut self,
        registries: &mut BindingRegistries,
        backend: &mut dyn GraphicsBackend,
    ) {
        for program in self.programs.drain(..) {
            if let Some(locals) = program.locals {
                locals.release(registries.for_kind(BufferKind::Uniform), backend);
            }
        }
        self.by_name.clear();
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec4};

    use super::*;
    use crate::renderer::backend::{Command, HeadlessBackend};

    fn setup() -> (ShaderLibrary, UniformBlocks, BindingRegistries, HeadlessBackend) {
        let mut backend = HeadlessBackend::new();
        let mut registries = BindingRegistries::default();
        let mut blocks = UniformBlocks::new();
        blocks
            .create(
                "Camera",
                BufferKind::Uniform,
                UniformBlockLayout::named(&[("view_proj", FieldType::Mat4)]),
                &mut registries,
                &mut backend,
            )
            .unwrap();
        (ShaderLibrary::new(), blocks, registries, backend)
    }

    #[test]
    fn resolves_by_name_and_index() {
        let (mut shaders, blocks, mut registries, mut backend) = setup();
        let desc = ShaderDesc::new("Basic", "").block("Camera");
        let index = shaders
            .register(&desc, &blocks, &mut registries, &mut backend)
            .unwrap();

        assert_eq!(shaders.by_index(index).unwrap().name(), "Basic");
        assert!(matches!(
            shaders.by_name("Missing").unwrap_err(),
            RenderError::NotFound {
                kind: ResourceKind::Shader,
                ..
            }
        ));
        assert!(shaders.by_index(9).is_err());
    }

    #[test]
    fn unknown_shared_block_fails_registration() {
        let (mut shaders, blocks, mut registries, mut backend) = setup();
        let desc = ShaderDesc::new("Lit", "").block("Lights");
        let err = shaders
            .register(&desc, &blocks, &mut registries, &mut backend)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::NotFound {
                kind: ResourceKind::UniformBlock,
                ..
            }
        ));
    }

    #[test]
    fn undeclared_uniforms_are_ignored() {
        let (mut shaders, blocks, mut registries, mut backend) = setup();
        let desc = ShaderDesc::new("Shadow", "")
            .depth_only()
            .capabilities(ShaderCapabilities::SHADOW_MAPPING)
            .uniform("light_space", FieldType::Mat4);
        shaders
            .register(&desc, &blocks, &mut registries, &mut backend)
            .unwrap();

        assert!(shaders.set_uniform("light_space", Mat4::IDENTITY).is_err());
        shaders.activate("Shadow", &mut backend).unwrap();
        shaders.set_uniform("light_space", Mat4::IDENTITY).unwrap();
        shaders.set_uniform("not_there", 1.0f32).unwrap();
        assert!(shaders.set_uniform("light_space", Vec4::ONE).is_err());

        shaders.flush(&mut backend);
        let locals = shaders.by_name("Shadow").unwrap().locals().unwrap().buffer();
        let bytes = backend.buffer_bytes(locals).unwrap();
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert!(backend
            .commands()
            .iter()
            .any(|cmd| matches!(cmd, Command::WriteBuffer { buffer, .. } if *buffer == locals)));
    }

    #[test]
    fn programs_get_distinct_locals_bindings() {
        let (mut shaders, blocks, mut registries, mut backend) = setup();
        for name in ["A", "B"] {
            let desc = ShaderDesc::new(name, "").uniform("tint", FieldType::Vec4);
            shaders
                .register(&desc, &blocks, &mut registries, &mut backend)
                .unwrap();
        }
        let a = shaders.by_name("A").unwrap().locals().unwrap().binding_point();
        let b = shaders.by_name("B").unwrap().locals().unwrap().binding_point();
        assert_ne!(a, b);
    }

    #[test]
    fn capability_query_filters_programs() {
        let (mut shaders, blocks, mut registries, mut backend) = setup();
        shaders
            .register(
                &ShaderDesc::new("Glass", "").capabilities(ShaderCapabilities::TRANSPARENCY),
                &blocks,
                &mut registries,
                &mut backend,
            )
            .unwrap();
        shaders
            .register(
                &ShaderDesc::new("Basic", "").capabilities(ShaderCapabilities::INSTANCING),
                &blocks,
                &mut registries,
                &mut backend,
            )
            .unwrap();

        let names: Vec<_> = shaders
            .with_capability(ShaderCapabilities::TRANSPARENCY)
            .map(Program::name)
            .collect();
        assert_eq!(names, vec!["Glass"]);
    }
}
