use std::collections::{BTreeSet, HashMap, HashSet};

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::error::{RenderError, ResourceKind, Result};
use crate::renderer::backend::{BufferId, BufferKind, GraphicsBackend};
use crate::renderer::layout::{ElementKind, FieldType, UniformBlockLayout};

/// Slot through which a buffer is connected to the blocks a shader declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingPoint(pub u32);

/// Free-list of binding points.
///
/// Lives as long as the graphics context that owns it. A point handed out by
/// [`acquire`](Self::acquire) is never handed out again until it has been
/// [`release`](Self::release)d, and freed points are reused lowest first.
#[derive(Debug, Default)]
pub struct BindingPointRegistry {
    next: u32,
    free: BTreeSet<u32>,
    in_use: HashSet<u32>,
    limit: Option<u32>,
}

impl BindingPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn acquire(&mut self) -> Result<BindingPoint> {
        let point = match self.free.pop_first() {
            Some(point) => point,
            None => {
                if let Some(limit) = self.limit {
                    if self.next >= limit {
                        return Err(RenderError::BindingPointsExhausted(limit));
                    }
                }
                let point = self.next;
                self.next += 1;
                point
            }
        };
        self.in_use.insert(point);
        Ok(BindingPoint(point))
    }

    pub fn release(&mut self, point: BindingPoint) {
        if self.in_use.remove(&point.0) {
            self.free.insert(point.0);
        } else {
            log::warn!("Binding point {} released twice", point.0);
        }
    }

    pub fn is_in_use(&self, point: BindingPoint) -> bool {
        self.in_use.contains(&point.0)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

/// Separate slot namespaces for uniform and storage buffers.
#[derive(Debug, Default)]
pub struct BindingRegistries {
    pub uniform: BindingPointRegistry,
    pub storage: BindingPointRegistry,
}

impl BindingRegistries {
    pub fn new(max_points: Option<u32>) -> Self {
        match max_points {
            Some(limit) => Self {
                uniform: BindingPointRegistry::with_limit(limit),
                storage: BindingPointRegistry::with_limit(limit),
            },
            None => Self::default(),
        }
    }

    pub fn for_kind(&mut self, kind: BufferKind) -> &mut BindingPointRegistry {
        match kind {
            BufferKind::Uniform => &mut self.uniform,
            BufferKind::Storage => &mut self.storage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> ElementKind {
        match self {
            UniformValue::Bool(_) => ElementKind::Bool,
            UniformValue::Int(_) => ElementKind::Int,
            UniformValue::UInt(_) => ElementKind::UInt,
            UniformValue::Float(_) => ElementKind::Float,
            UniformValue::Vec2(_) => ElementKind::Vec2,
            UniformValue::Vec3(_) => ElementKind::Vec3,
            UniformValue::Vec4(_) => ElementKind::Vec4,
            UniformValue::Mat3(_) => ElementKind::Mat3,
            UniformValue::Mat4(_) => ElementKind::Mat4,
        }
    }

    /// Writes the value's bytes at the start of `out`. Matrix columns and
    /// `vec3`s occupy full 16-byte slots.
    fn encode(&self, out: &mut [u8]) {
        match *self {
            UniformValue::Bool(v) => put(out, 0, &[u32::from(v)]),
            UniformValue::Int(v) => put(out, 0, &[v]),
            UniformValue::UInt(v) => put(out, 0, &[v]),
            UniformValue::Float(v) => put(out, 0, &[v]),
            UniformValue::Vec2(v) => put(out, 0, &v.to_array()),
            UniformValue::Vec3(v) => put(out, 0, &v.to_array()),
            UniformValue::Vec4(v) => put(out, 0, &v.to_array()),
            UniformValue::Mat3(m) => {
                for (column, col) in m.to_cols_array_2d().iter().enumerate() {
                    put(out, column * 16, col);
                }
            }
            UniformValue::Mat4(m) => put(out, 0, &m.to_cols_array()),
        }
    }
}

fn put<T: bytemuck::Pod>(out: &mut [u8], offset: usize, values: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                UniformValue::$variant(value)
            }
        })*
    };
}

impl_from_value! {
    bool => Bool,
    i32 => Int,
    u32 => UInt,
    f32 => Float,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

/// A named uniform or storage block: its layout, a CPU image of its bytes and
/// the backend buffer the image is uploaded to.
#[derive(Debug)]
pub struct UniformBuffer {
    name: String,
    kind: BufferKind,
    layout: UniformBlockLayout,
    data: Vec<u8>,
    point: BindingPoint,
    buffer: BufferId,
    dirty: bool,
}

impl UniformBuffer {
    pub fn new(
        name: impl Into<String>,
        kind: BufferKind,
        layout: UniformBlockLayout,
        registry: &mut BindingPointRegistry,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<Self> {
        let name = name.into();
        let point = registry.acquire()?;
        let buffer = match backend.create_buffer(kind, point, layout.size()) {
            Ok(buffer) => buffer,
            Err(err) => {
                registry.release(point);
                return Err(err);
            }
        };
        log::debug!(
            "Created {:?} block '{}' ({} bytes) at binding {}",
            kind,
            name,
            layout.size(),
            point.0
        );

        Ok(Self {
            data: vec![0; layout.size()],
            name,
            kind,
            layout,
            point,
            buffer,
            dirty: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn layout(&self) -> &UniformBlockLayout {
        &self.layout
    }

    pub fn binding_point(&self) -> BindingPoint {
        self.point
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.layout.contains(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        let slot = *self
            .layout
            .field(field)
            .ok_or_else(|| RenderError::not_found(ResourceKind::UniformField, field))?;

        if slot.ty.element() != Some(value.kind()) {
            return Err(RenderError::FieldTypeMismatch {
                field: field.to_string(),
                expected: slot.ty.to_string(),
                found: value.kind().to_string(),
            });
        }

        value.encode(&mut self.data[slot.offset..slot.offset + slot.size]);
        self.dirty = true;
        Ok(())
    }

    /// Writes one element of an array field. Each element owns a 16-byte slot.
    pub fn set_element(
        &mut self,
        field: &str,
        index: usize,
        value: impl Into<UniformValue>,
    ) -> Result<()> {
        let value = value.into();
        let slot = *self
            .layout
            .field(field)
            .ok_or_else(|| RenderError::not_found(ResourceKind::UniformField, field))?;

        let FieldType::Array(element, len) = slot.ty else {
            return Err(RenderError::FieldTypeMismatch {
                field: field.to_string(),
                expected: slot.ty.to_string(),
                found: format!("{}[]", value.kind()),
            });
        };
        if element != value.kind() || element.base_alignment() > 16 {
            return Err(RenderError::FieldTypeMismatch {
                field: field.to_string(),
                expected: slot.ty.to_string(),
                found: value.kind().to_string(),
            });
        }
        if index >= len {
            return Err(RenderError::precondition(format!(
                "index {index} out of range for `{field}` ({len} elements)"
            )));
        }

        let start = slot.offset + index * 16;
        value.encode(&mut self.data[start..start + 16]);
        self.dirty = true;
        Ok(())
    }

    /// Uploads the CPU image if anything changed since the last upload.
    pub fn upload(&mut self, backend: &mut dyn GraphicsBackend) {
        if self.dirty {
            backend.write_buffer(self.buffer, 0, &self.data);
            self.dirty = false;
        }
    }

    pub fn release(self, registry: &mut BindingPointRegistry, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.buffer);
        registry.release(self.point);
    }
}

/// Shared blocks addressed by name, e.g. `Camera` and `Lights`.
#[derive(Debug, Default)]
pub struct UniformBlocks {
    blocks: HashMap<String, UniformBuffer>,
}

impl UniformBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a block. Every name gets its own binding point, even when two
    /// blocks share a layout. Re-creating a name releases the old block.
    pub fn create(
        &mut self,
        name: &str,
        kind: BufferKind,
        layout: UniformBlockLayout,
        registries: &mut BindingRegistries,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<&mut UniformBuffer> {
        if let Some(old) = self.blocks.remove(name) {
            let old_kind = old.kind();
            old.release(registries.for_kind(old_kind), backend);
        }
        let block = UniformBuffer::new(name, kind, layout, registries.for_kind(kind), backend)?;
        Ok(self.blocks.entry(name.to_string()).or_insert(block))
    }

    pub fn get(&self, name: &str) -> Result<&UniformBuffer> {
        self.blocks
            .get(name)
            .ok_or_else(|| RenderError::not_found(ResourceKind::UniformBlock, name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut UniformBuffer> {
        self.blocks
            .get_mut(name)
            .ok_or_else(|| RenderError::not_found(ResourceKind::UniformBlock, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn upload_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for block in self.blocks.values_mut() {
            block.upload(backend);
        }
    }

    pub fn remove(
        &mut self,
        name: &str,
        registries: &mut BindingRegistries,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let block = self
            .blocks
            .remove(name)
            .ok_or_else(|| RenderError::not_found(ResourceKind::UniformBlock, name))?;
        let kind = block.kind();
        block.release(registries.for_kind(kind), backend);
        Ok(())
    }

    pub fn release_all(
        &mut self,
        registries: &mut BindingRegistries,
        backend: &mut dyn GraphicsBackend,
    ) {
        for (_, block) in self.blocks.drain() {
            let kind = block.kind();
            block.release(registries.for_kind(kind), backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    fn camera_layout() -> UniformBlockLayout {
        UniformBlockLayout::named(&[
            ("view_proj", FieldType::Mat4),
            ("eye", FieldType::Vec3),
            ("exposure", FieldType::Float),
        ])
    }

    #[test]
    fn binding_points_are_unique_and_reused() {
        let mut registry = BindingPointRegistry::new();
        let mut backend = HeadlessBackend::new();

        let mut buffers: Vec<UniformBuffer> = (0..4)
            .map(|i| {
                UniformBuffer::new(
                    format!("Block{i}"),
                    BufferKind::Uniform,
                    camera_layout(),
                    &mut registry,
                    &mut backend,
                )
                .unwrap()
            })
            .collect();

        let points: HashSet<_> = buffers.iter().map(|b| b.binding_point()).collect();
        assert_eq!(points.len(), 4);

        let freed = buffers.remove(1);
        let freed_point = freed.binding_point();
        freed.release(&mut registry, &mut backend);
        assert!(!registry.is_in_use(freed_point));

        let replacement = UniformBuffer::new(
            "Replacement",
            BufferKind::Uniform,
            camera_layout(),
            &mut registry,
            &mut backend,
        )
        .unwrap();
        assert_eq!(replacement.binding_point(), freed_point);

        buffers.push(replacement);
        let points: HashSet<_> = buffers.iter().map(|b| b.binding_point()).collect();
        assert_eq!(points.len(), buffers.len());
        assert_eq!(registry.in_use(), 4);
    }

    #[test]
    fn limit_is_enforced() {
        let mut registry = BindingPointRegistry::with_limit(1);
        registry.acquire().unwrap();
        assert!(matches!(
            registry.acquire(),
            Err(RenderError::BindingPointsExhausted(1))
        ));
    }

    #[test]
    fn same_layout_different_names_get_distinct_points() {
        let mut registries = BindingRegistries::default();
        let mut backend = HeadlessBackend::new();
        let mut blocks = UniformBlocks::new();

        let a = blocks
            .create("A", BufferKind::Uniform, camera_layout(), &mut registries, &mut backend)
            .unwrap()
            .binding_point();
        let b = blocks
            .create("B", BufferKind::Uniform, camera_layout(), &mut registries, &mut backend)
            .unwrap()
            .binding_point();
        assert_ne!(a, b);
    }

    #[test]
    fn recreated_and_removed_blocks_return_their_points() {
        let mut registries = BindingRegistries::default();
        let mut backend = HeadlessBackend::new();
        let mut blocks = UniformBlocks::new();

        let first = blocks
            .create("A", BufferKind::Uniform, camera_layout(), &mut registries, &mut backend)
            .unwrap()
            .binding_point();
        let again = blocks
            .create("A", BufferKind::Uniform, camera_layout(), &mut registries, &mut backend)
            .unwrap()
            .binding_point();
        assert_eq!(first, again);
        assert_eq!(registries.for_kind(BufferKind::Uniform).in_use(), 1);
        assert_eq!(backend.live_buffers(), 1);

        blocks.remove("A", &mut registries, &mut backend).unwrap();
        assert!(!registries.for_kind(BufferKind::Uniform).is_in_use(first));
        assert_eq!(backend.live_buffers(), 0);
        assert!(matches!(
            blocks.remove("A", &mut registries, &mut backend),
            Err(RenderError::NotFound { .. })
        ));

        blocks
            .create("B", BufferKind::Storage, camera_layout(), &mut registries, &mut backend)
            .unwrap();
        blocks.release_all(&mut registries, &mut backend);
        assert_eq!(registries.for_kind(BufferKind::Storage).in_use(), 0);
        assert!(blocks.is_empty());
    }

    #[test]
    fn values_land_at_layout_offsets() {
        let mut registry = BindingPointRegistry::new();
        let mut backend = HeadlessBackend::new();
        let mut block = UniformBuffer::new(
            "Camera",
            BufferKind::Uniform,
            camera_layout(),
            &mut registry,
            &mut backend,
        )
        .unwrap();

        block.set("exposure", 2.5f32).unwrap();
        block.set("eye", Vec3::new(1.0, 2.0, 3.0)).unwrap();

        let bytes = block.bytes();
        let exposure_offset = block.layout().field("exposure").unwrap().offset;
        assert_eq!(exposure_offset, 80);
        let exposure: f32 = bytemuck::pod_read_unaligned(&bytes[80..84]);
        assert_eq!(exposure, 2.5);
        let eye_y: f32 = bytemuck::pod_read_unaligned(&bytes[68..72]);
        assert_eq!(eye_y, 2.0);

        block.upload(&mut backend);
        assert!(!block.is_dirty());
        assert_eq!(backend.buffer_bytes(block.buffer()).unwrap(), block.bytes());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let mut registry = BindingPointRegistry::new();
        let mut backend = HeadlessBackend::new();
        let mut block = UniformBuffer::new(
            "Camera",
            BufferKind::Uniform,
            camera_layout(),
            &mut registry,
            &mut backend,
        )
        .unwrap();

        assert!(matches!(
            block.set("eye", 1.0f32),
            Err(RenderError::FieldTypeMismatch { .. })
        ));
        assert!(matches!(
            block.set("missing", 1.0f32),
            Err(RenderError::NotFound { .. })
        ));
    }

    #[test]
    fn array_elements_use_sixteen_byte_stride() {
        let mut registry = BindingPointRegistry::new();
        let mut backend = HeadlessBackend::new();
        let layout = UniformBlockLayout::named(&[
            ("count", FieldType::Int),
            ("weights", FieldType::Array(ElementKind::Float, 3)),
        ]);
        let mut block =
            UniformBuffer::new("Weights", BufferKind::Storage, layout, &mut registry, &mut backend)
                .unwrap();

        block.set_element("weights", 2, 7.0f32).unwrap();
        let value: f32 = bytemuck::pod_read_unaligned(&block.bytes()[48..52]);
        assert_eq!(value, 7.0);
        assert!(block.set_element("weights", 3, 1.0f32).is_err());
    }

    #[test]
    fn mat3_columns_are_padded() {
        let mut registry = BindingPointRegistry::new();
        let mut backend = HeadlessBackend::new();
        let layout = UniformBlockLayout::named(&[("normal", FieldType::Mat3)]);
        let mut block =
            UniformBuffer::new("N", BufferKind::Uniform, layout, &mut registry, &mut backend)
                .unwrap();
        block.set("normal", Mat3::IDENTITY).unwrap();
        let second_column: [f32; 3] = bytemuck::pod_read_unaligned(&block.bytes()[16..28]);
        assert_eq!(second_column, [0.0, 1.0, 0.0]);
    }
}
