pub mod backend;
pub mod builtin;
pub mod frame;
pub mod instancing;
pub mod layout;
pub mod pipeline;
pub mod primitives;
pub mod shaders;
pub mod shadows;
pub mod stages;
pub mod targets;
pub mod uniforms;
pub mod vertex;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use frame::FrameContext;
pub use pipeline::RenderPipeline;
pub use primitives::{cube_mesh, plane_mesh};
pub use shaders::{ShaderCapabilities, ShaderDesc, ShaderLibrary};
pub use stages::PipelineStage;
pub use targets::{RenderTargetManager, TargetHandle, TargetTemplate};
pub use vertex::{InstanceRaw, Vertex};
