// renderer/backend/recorder.rs
use std::ops::Range;

use glam::Mat4;

use super::{AttachmentId, ClearFlags, DepthFunc, MeshId, PolygonMode, ProgramId, StateToggle};
use crate::renderer::InstanceRaw;

/// Fixed-function state captured with every draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DrawState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub face_culling: bool,
    pub blending: bool,
    pub polygon_mode: PolygonMode,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_func: DepthFunc::Less,
            face_culling: true,
            blending: false,
            polygon_mode: PolygonMode::Fill,
        }
    }
}

impl DrawState {
    /// Returns `false` for toggles that are not part of the draw state.
    pub fn apply(&mut self, toggle: StateToggle) -> bool {
        match toggle {
            StateToggle::DepthTest(enabled) => self.depth_test = enabled,
            StateToggle::DepthWrite(enabled) => self.depth_write = enabled,
            StateToggle::DepthFunc(func) => self.depth_func = func,
            StateToggle::FaceCulling(enabled) => self.face_culling = enabled,
            StateToggle::Blending(enabled) => self.blending = enabled,
            StateToggle::PolygonMode(mode) => self.polygon_mode = mode,
            StateToggle::VSync(_) | StateToggle::DebugOutput(_) => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PassTarget {
    Backbuffer,
    Attachments(Vec<AttachmentId>),
}

#[derive(Debug, Clone)]
pub(crate) struct DrawRecord {
    pub program: ProgramId,
    pub mesh: MeshId,
    pub instances: Range<u32>,
    pub state: DrawState,
    /// Dynamic offsets into the uniform and storage arenas, in binding order.
    pub offsets: [Vec<u32>; 2],
}

#[derive(Debug, Clone)]
pub(crate) struct PassRecord {
    pub target: PassTarget,
    pub clear_color: Option<[f32; 4]>,
    pub clear_depth: bool,
    pub clear_stencil: bool,
    pub viewport: Option<(u32, u32)>,
    pub draws: Vec<DrawRecord>,
}

impl PassRecord {
    fn new(target: PassTarget) -> Self {
        Self {
            target,
            clear_color: None,
            clear_depth: false,
            clear_stencil: false,
            viewport: None,
            draws: Vec::new(),
        }
    }
}

/// Append-only byte buffer whose entries start on `alignment` boundaries.
#[derive(Debug)]
pub(crate) struct Arena {
    bytes: Vec<u8>,
    alignment: usize,
}

impl Arena {
    pub fn new(alignment: usize) -> Self {
        Self {
            bytes: Vec::new(),
            alignment: alignment.max(1),
        }
    }

    /// Copies `data` in, zero-padded to `len` bytes, and returns its offset.
    pub fn push(&mut self, data: &[u8], len: usize) -> u32 {
        let offset = self.bytes.len().next_multiple_of(self.alignment);
        self.bytes.resize(offset, 0);
        let take = data.len().min(len);
        self.bytes.extend_from_slice(&data[..take]);
        self.bytes.resize(offset + len, 0);
        offset as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Size a block is bound with: its layout size rounded up to 16 bytes.
pub(crate) fn binding_size(size: usize) -> usize {
    size.max(16).next_multiple_of(16)
}

/// CPU-side record of one frame, replayed into render passes at present.
#[derive(Debug)]
pub(crate) struct FrameRecorder {
    passes: Vec<PassRecord>,
    instances: Vec<InstanceRaw>,
    pub uniforms: Arena,
    pub storage: Arena,
}

impl FrameRecorder {
    pub fn new(uniform_alignment: usize, storage_alignment: usize) -> Self {
        Self {
            passes: Vec::new(),
            instances: Vec::new(),
            uniforms: Arena::new(uniform_alignment),
            storage: Arena::new(storage_alignment),
        }
    }

    pub fn reset(&mut self) {
        self.passes.clear();
        self.instances.clear();
        self.uniforms.clear();
        self.storage.clear();
    }

    pub fn bind(&mut self, target: PassTarget) {
        self.passes.push(PassRecord::new(target));
    }

    fn current(&mut self) -> &mut PassRecord {
        if self.passes.is_empty() {
            self.passes.push(PassRecord::new(PassTarget::Backbuffer));
        }
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.current().viewport = Some((width, height));
    }

    /// Clears apply at the start of a pass, so a clear after draws opens a
    /// new pass on the same target.
    pub fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) {
        let pass = self.current();
        if !pass.draws.is_empty() {
            let mut next = PassRecord::new(pass.target.clone());
            next.viewport = pass.viewport;
            self.passes.push(next);
        }
        let pass = self.current();
        if flags.contains(ClearFlags::COLOR) {
            pass.clear_color = Some(color);
        }
        pass.clear_depth |= flags.contains(ClearFlags::DEPTH);
        pass.clear_stencil |= flags.contains(ClearFlags::STENCIL);
    }

    pub fn push_instances(&mut self, transforms: &[Mat4]) -> Range<u32> {
        let start = self.instances.len() as u32;
        self.instances
            .extend(transforms.iter().copied().map(InstanceRaw::from));
        start..self.instances.len() as u32
    }

    pub fn push_draw(&mut self, draw: DrawRecord) {
        self.current().draws.push(draw);
    }

    /// Target of the pass draws currently land in.
    pub fn current_target(&mut self) -> &PassTarget {
        &self.current().target
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn instances(&self) -> &[InstanceRaw] {
        &self.instances
    }
}
