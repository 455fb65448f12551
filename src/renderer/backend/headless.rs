use std::collections::{HashMap, HashSet};

use glam::Mat4;

use super::{
    AttachmentDesc, AttachmentId, BufferId, BufferKind, ClearFlags, GraphicsBackend, MeshId,
    ProgramDesc, ProgramId, StateToggle,
};
use crate::error::{RenderError, Result};
use crate::renderer::uniforms::BindingPoint;
use crate::renderer::Vertex;

/// Everything a frame asked the backend to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame,
    BindTarget(Option<Vec<AttachmentId>>),
    Viewport(u32, u32),
    Clear(ClearFlags),
    UseProgram(ProgramId),
    WriteBuffer { buffer: BufferId, offset: usize, len: usize },
    Draw { program: Option<ProgramId>, mesh: MeshId, instances: Vec<Mat4> },
    DrawSkybox { program: Option<ProgramId>, mesh: MeshId },
    State(StateToggle),
    ResizeSurface(u32, u32),
    Present,
}

#[derive(Debug, Clone)]
struct HeadlessBuffer {
    kind: BufferKind,
    point: BindingPoint,
    bytes: Vec<u8>,
}

/// Backend without a device. It keeps every resource on the CPU and records
/// the command stream, which makes frames inspectable from tests and tools.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u32,
    attachments: HashMap<AttachmentId, AttachmentDesc>,
    attachments_created: usize,
    meshes: HashMap<MeshId, usize>,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    programs: HashMap<ProgramId, String>,
    current_program: Option<ProgramId>,
    bound_target: Option<Vec<AttachmentId>>,
    commands: Vec<Command>,
    reject_attachments: bool,
    frames_presented: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Makes `validate_attachments` report every combination as invalid.
    pub fn set_reject_attachments(&mut self, reject: bool) {
        self.reject_attachments = reject;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// `(mesh, instance transforms)` for every mesh draw recorded so far.
    pub fn draws(&self) -> Vec<(MeshId, Vec<Mat4>)> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Draw { mesh, instances, .. } => Some((*mesh, instances.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn draws_with_program(&self, program: ProgramId) -> Vec<(MeshId, Vec<Mat4>)> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Draw {
                    program: Some(p),
                    mesh,
                    instances,
                } if *p == program => Some((*mesh, instances.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<&AttachmentDesc> {
        self.attachments.get(&id)
    }

    pub fn live_attachments(&self) -> usize {
        self.attachments.len()
    }

    pub fn attachments_created(&self) -> usize {
        self.attachments_created
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_bytes(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.bytes.as_slice())
    }

    pub fn buffer_binding(&self, buffer: BufferId) -> Option<(BufferKind, BindingPoint)> {
        self.buffers.get(&buffer).map(|b| (b.kind, b.point))
    }

    pub fn program_name(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(String::as_str)
    }

    pub fn bound_target(&self) -> Option<&[AttachmentId]> {
        self.bound_target.as_deref()
    }

    pub fn frames_presented(&self) -> usize {
        self.frames_presented
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_attachment(&mut self, desc: &AttachmentDesc) -> Result<AttachmentId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend(format!(
                "attachment size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        let id = AttachmentId(self.next_id());
        self.attachments.insert(id, *desc);
        self.attachments_created += 1;
        Ok(id)
    }

    fn destroy_attachment(&mut self, id: AttachmentId) {
        self.attachments.remove(&id);
    }

    fn validate_attachments(&self, attachments: &[AttachmentId]) -> bool {
        if self.reject_attachments || attachments.is_empty() {
            return false;
        }
        let mut sizes = HashSet::new();
        for id in attachments {
            let Some(desc) = self.attachments.get(id) else {
                return false;
            };
            sizes.insert((desc.width, desc.height));
        }
        sizes.len() == 1
    }

    fn bind_target(&mut self, attachments: Option<&[AttachmentId]>) {
        self.bound_target = attachments.map(<[AttachmentId]>::to_vec);
        self.commands
            .push(Command::BindTarget(self.bound_target.clone()));
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.commands.push(Command::Viewport(width, height));
    }

    fn clear(&mut self, flags: ClearFlags, _color: [f32; 4]) {
        self.commands.push(Command::Clear(flags));
    }

    fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<MeshId> {
        if vertices.is_empty() {
            return Err(RenderError::Backend("mesh has no vertices".into()));
        }
        let id = MeshId(self.next_id());
        self.meshes.insert(id, indices.len());
        Ok(id)
    }

    fn release_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(&mesh);
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        point: BindingPoint,
        size: usize,
    ) -> Result<BufferId> {
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            HeadlessBuffer {
                kind,
                point,
                bytes: vec![0; size],
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, bytes: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer) else {
            log::warn!("Write to unknown buffer {:?}", buffer);
            return;
        };
        let end = (offset + bytes.len()).min(target.bytes.len());
        if offset < end {
            target.bytes[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
        self.commands.push(Command::WriteBuffer {
            buffer,
            offset,
            len: bytes.len(),
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId> {
        let id = ProgramId(self.next_id());
        self.programs.insert(id, desc.name.to_string());
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
        self.commands.push(Command::UseProgram(program));
    }

    fn draw_mesh(&mut self, mesh: MeshId, model: Mat4) {
        self.commands.push(Command::Draw {
            program: self.current_program,
            mesh,
            instances: vec![model],
        });
    }

    fn draw_instanced(&mut self, mesh: MeshId, transforms: &[Mat4]) {
        if transforms.is_empty() {
            return;
        }
        self.commands.push(Command::Draw {
            program: self.current_program,
            mesh,
            instances: transforms.to_vec(),
        });
    }

    fn draw_skybox(&mut self, mesh: MeshId) {
        self.commands.push(Command::DrawSkybox {
            program: self.current_program,
            mesh,
        });
    }

    fn apply_state(&mut self, toggle: StateToggle) {
        if let StateToggle::DebugOutput(enabled) = toggle {
            log::set_max_level(if enabled {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            });
        }
        self.commands.push(Command::State(toggle));
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.commands.push(Command::ResizeSurface(width, height));
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.frames_presented += 1;
        self.commands.push(Command::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::AttachmentFormat;

    fn desc(width: u32, height: u32) -> AttachmentDesc {
        AttachmentDesc {
            format: AttachmentFormat::Depth32,
            width,
            height,
            layers: 1,
            sampled: true,
        }
    }

    #[test]
    fn mismatched_sizes_are_invalid() {
        let mut backend = HeadlessBackend::new();
        let a = backend.create_attachment(&desc(4, 4)).unwrap();
        let b = backend.create_attachment(&desc(8, 8)).unwrap();
        assert!(backend.validate_attachments(&[a]));
        assert!(!backend.validate_attachments(&[a, b]));
    }

    #[test]
    fn destroyed_attachment_no_longer_validates() {
        let mut backend = HeadlessBackend::new();
        let a = backend.create_attachment(&desc(4, 4)).unwrap();
        backend.destroy_attachment(a);
        assert!(!backend.validate_attachments(&[a]));
        assert_eq!(backend.live_attachments(), 0);
        assert_eq!(backend.attachments_created(), 1);
    }

    #[test]
    fn buffer_writes_are_kept() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend
            .create_buffer(BufferKind::Uniform, BindingPoint(0), 8)
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.buffer_bytes(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
    }
}
