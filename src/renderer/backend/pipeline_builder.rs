use super::recorder::DrawState;
use super::{DepthFunc, PolygonMode};
use crate::renderer::{InstanceRaw, Vertex};

/// Fluent construction of the render pipeline for one program and one
/// combination of pass formats and draw state.
pub(crate) struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    label: Option<&'a str>,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a wgpu::ShaderModule,
    fragment_entry: Option<&'a str>,
    color_targets: Vec<Option<wgpu::ColorTargetState>>,
    depth_stencil: Option<wgpu::DepthStencilState>,
    primitive: wgpu::PrimitiveState,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        device: &'a wgpu::Device,
        layout: &'a wgpu::PipelineLayout,
        shader: &'a wgpu::ShaderModule,
    ) -> Self {
        Self {
            device,
            label: None,
            layout,
            shader,
            fragment_entry: Some("fs_main"),
            color_targets: Vec::new(),
            depth_stencil: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
        }
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    /// No fragment stage; only depth is written.
    pub fn depth_only(mut self) -> Self {
        self.fragment_entry = None;
        self
    }

    pub fn with_color_target(mut self, format: wgpu::TextureFormat, blend: bool) -> Self {
        self.color_targets.push(Some(wgpu::ColorTargetState {
            format,
            blend: Some(if blend {
                wgpu::BlendState::ALPHA_BLENDING
            } else {
                wgpu::BlendState::REPLACE
            }),
            write_mask: wgpu::ColorWrites::ALL,
        }));
        self
    }

    /// Depth state from the recorded draw state. Depth-only passes get a
    /// slope bias against shadow acne.
    pub fn with_depth(mut self, format: wgpu::TextureFormat, state: &DrawState) -> Self {
        let bias = if self.fragment_entry.is_none() {
            wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            }
        } else {
            wgpu::DepthBiasState::default()
        };
        self.depth_stencil = Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: state.depth_test && state.depth_write,
            depth_compare: if state.depth_test {
                compare_function(state.depth_func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias,
        });
        self
    }

    pub fn with_rasterizer(mut self, state: &DrawState) -> Self {
        self.primitive.cull_mode = state.face_culling.then_some(wgpu::Face::Back);
        self.primitive.polygon_mode = match state.polygon_mode {
            PolygonMode::Fill => wgpu::PolygonMode::Fill,
            PolygonMode::Line => wgpu::PolygonMode::Line,
            PolygonMode::Point => wgpu::PolygonMode::Point,
        };
        self
    }

    pub fn build(self) -> wgpu::RenderPipeline {
        let buffers = [Vertex::layout(), InstanceRaw::layout()];
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: self.label,
                layout: Some(self.layout),
                vertex: wgpu::VertexState {
                    module: self.shader,
                    entry_point: Some("vs_main"),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: self.fragment_entry.map(|entry| wgpu::FragmentState {
                    module: self.shader,
                    entry_point: Some(entry),
                    targets: &self.color_targets,
                    compilation_options: Default::default(),
                }),
                primitive: self.primitive,
                depth_stencil: self.depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }
}

fn compare_function(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunc::Always => wgpu::CompareFunction::Always,
    }
}
