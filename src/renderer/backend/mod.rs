pub mod gpu;
pub mod headless;
mod pipeline_builder;
mod recorder;

pub use gpu::WgpuBackend;
pub use headless::{Command, HeadlessBackend};

use bitflags::bitflags;
use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::renderer::uniforms::BindingPoint;
use crate::renderer::Vertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentFormat {
    Rgba8,
    Rgba16Float,
    Depth32,
    Depth24Stencil8,
}

impl AttachmentFormat {
    pub fn has_depth(self) -> bool {
        matches!(self, Self::Depth32 | Self::Depth24Stencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }

    pub fn is_color(self) -> bool {
        !self.has_depth()
    }
}

/// Description of one texture or renderbuffer attached to a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: AttachmentFormat,
    pub width: u32,
    pub height: u32,
    /// 1 for plain surfaces, 6 for cubemaps.
    pub layers: u32,
    /// Whether later passes may sample it. Renderbuffers are not sampled.
    pub sampled: bool,
}

impl AttachmentDesc {
    pub fn is_cube(&self) -> bool {
        self.layers == 6
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Less,
    LessEqual,
    Always,
}

/// Fixed-function state switches. Backends apply them to every draw recorded
/// after the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateToggle {
    DepthTest(bool),
    DepthWrite(bool),
    DepthFunc(DepthFunc),
    FaceCulling(bool),
    Blending(bool),
    PolygonMode(PolygonMode),
    VSync(bool),
    DebugOutput(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Uniform,
    Storage,
}

/// One block a program reads, resolved to the buffer and slot that back it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinding {
    pub name: String,
    pub kind: BufferKind,
    pub point: BindingPoint,
    pub buffer: BufferId,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct ProgramDesc<'a> {
    pub name: &'a str,
    /// WGSL source. `{{Block}}` placeholders are replaced by the block's
    /// binding point.
    pub source: &'a str,
    /// Programs without a fragment stage can only draw into depth-only targets.
    pub has_fragment: bool,
    pub bindings: &'a [ProgramBinding],
}

/// The capability interface pipeline stages draw through. `WgpuBackend`
/// drives wgpu; `HeadlessBackend` records commands without a device.
pub trait GraphicsBackend {
    fn name(&self) -> &str;

    fn create_attachment(&mut self, desc: &AttachmentDesc) -> Result<AttachmentId>;
    fn destroy_attachment(&mut self, id: AttachmentId);
    /// Reports whether the attachments form a renderable combination.
    fn validate_attachments(&self, attachments: &[AttachmentId]) -> bool;

    /// `None` binds the default backbuffer.
    fn bind_target(&mut self, attachments: Option<&[AttachmentId]>);
    fn set_viewport(&mut self, width: u32, height: u32);
    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]);

    fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<MeshId>;
    fn release_mesh(&mut self, mesh: MeshId);

    fn create_buffer(&mut self, kind: BufferKind, point: BindingPoint, size: usize)
        -> Result<BufferId>;
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, bytes: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId>;
    fn use_program(&mut self, program: ProgramId);

    fn draw_mesh(&mut self, mesh: MeshId, model: Mat4);
    fn draw_instanced(&mut self, mesh: MeshId, transforms: &[Mat4]);
    fn draw_skybox(&mut self, mesh: MeshId);

    fn apply_state(&mut self, toggle: StateToggle);
    fn resize_surface(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self) -> Result<()>;
    fn present(&mut self) -> Result<()>;
}
