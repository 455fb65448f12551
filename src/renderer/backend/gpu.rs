use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use glam::Mat4;
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::pipeline_builder::PipelineBuilder;
use super::recorder::{binding_size, DrawRecord, DrawState, FrameRecorder, PassRecord, PassTarget};
use super::{
    AttachmentDesc, AttachmentFormat, AttachmentId, BufferId, BufferKind, ClearFlags,
    GraphicsBackend, MeshId, PolygonMode, ProgramBinding, ProgramDesc, ProgramId, StateToggle,
};
use crate::error::{RenderError, Result};
use crate::renderer::uniforms::BindingPoint;
use crate::renderer::Vertex;
use crate::settings::{pick_present_mode, RenderSettings};

const BACKBUFFER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

fn texture_format(format: AttachmentFormat) -> wgpu::TextureFormat {
    match format {
        AttachmentFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        AttachmentFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        AttachmentFormat::Depth32 => wgpu::TextureFormat::Depth32Float,
        AttachmentFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("BackbufferDepth"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: BACKBUFFER_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

struct GpuAttachment {
    desc: AttachmentDesc,
    format: wgpu::TextureFormat,
    _texture: wgpu::Texture,
    /// Layer 0 view; cube attachments are rendered one face at a time.
    view: wgpu::TextureView,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

/// Block contents live on the CPU until a draw snapshots them into the
/// frame's arena.
struct CpuBuffer {
    kind: BufferKind,
    point: BindingPoint,
    bytes: Vec<u8>,
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    has_fragment: bool,
    group_layouts: [wgpu::BindGroupLayout; 2],
    layout: wgpu::PipelineLayout,
    /// Uniform (group 0) and storage (group 1) bindings, sorted by point.
    bindings: [Vec<ProgramBinding>; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    state: DrawState,
}

struct PassFormats {
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    size: (u32, u32),
}

fn pass_formats(
    target: &PassTarget,
    attachments: &HashMap<AttachmentId, GpuAttachment>,
    config: &wgpu::SurfaceConfiguration,
) -> Option<PassFormats> {
    match target {
        PassTarget::Backbuffer => Some(PassFormats {
            colors: vec![config.format],
            depth: Some(BACKBUFFER_DEPTH_FORMAT),
            size: (config.width, config.height),
        }),
        PassTarget::Attachments(ids) => {
            let mut formats = PassFormats {
                colors: Vec::new(),
                depth: None,
                size: (0, 0),
            };
            for id in ids {
                let attachment = attachments.get(id)?;
                formats.size = (attachment.desc.width, attachment.desc.height);
                if attachment.desc.format.has_depth() {
                    formats.depth = Some(attachment.format);
                } else {
                    formats.colors.push(attachment.format);
                }
            }
            Some(formats)
        }
    }
}

fn bind_group_layout(
    device: &wgpu::Device,
    label: &str,
    bindings: &[ProgramBinding],
) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding: binding.point.0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: match binding.kind {
                    BufferKind::Uniform => wgpu::BufferBindingType::Uniform,
                    BufferKind::Storage => wgpu::BufferBindingType::Storage { read_only: true },
                },
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(binding_size(binding.size) as u64),
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

/// Replaces every `{{Block}}` placeholder with the block's binding point.
fn resolve_placeholders(source: &str, bindings: &[ProgramBinding]) -> Result<String> {
    let mut resolved = source.to_string();
    for binding in bindings {
        resolved = resolved.replace(&format!("{{{{{}}}}}", binding.name), &binding.point.0.to_string());
    }
    if let Some(start) = resolved.find("{{") {
        let end = resolved[start..].find("}}").map_or(resolved.len(), |end| start + end + 2);
        return Err(RenderError::Backend(format!(
            "unresolved block placeholder {}",
            &resolved[start..end]
        )));
    }
    Ok(resolved)
}

/// Backend that draws through wgpu into a window surface.
///
/// Calls made during a frame are recorded and replayed as render passes in
/// [`present`](GraphicsBackend::present). Each draw captures the state and
/// block contents current at the time of the call.
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    present_modes: Vec<wgpu::PresentMode>,
    vsync_mode: wgpu::PresentMode,
    features: wgpu::Features,
    backbuffer_depth: wgpu::TextureView,

    next_id: u32,
    attachments: HashMap<AttachmentId, GpuAttachment>,
    meshes: HashMap<MeshId, GpuMesh>,
    buffers: HashMap<BufferId, CpuBuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    current_program: Option<ProgramId>,
    state: DrawState,
    recorder: FrameRecorder,
    frame: Option<wgpu::SurfaceTexture>,
    skip_backbuffer: bool,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &RenderSettings) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window)
            .map_err(|err| RenderError::Backend(format!("failed to create surface: {err}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RenderError::Backend(format!("no suitable adapter: {err}")))?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let features = adapter.features()
            & (wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::POLYGON_MODE_POINT);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|err| RenderError::Backend(format!("failed to create device: {err}")))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::Surface("surface reports no formats".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&caps.present_modes),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let limits = device.limits();
        let recorder = FrameRecorder::new(
            limits.min_uniform_buffer_offset_alignment as usize,
            limits.min_storage_buffer_offset_alignment as usize,
        );

        Ok(Self {
            backbuffer_depth: create_depth_view(&device, config.width, config.height),
            vsync_mode: pick_present_mode(settings.present_mode.to_wgpu(), &caps.present_modes),
            present_modes: caps.present_modes,
            surface,
            device,
            queue,
            config,
            features,
            next_id: 0,
            attachments: HashMap::new(),
            meshes: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            current_program: None,
            state: DrawState::default(),
            recorder,
            frame: None,
            skip_backbuffer: false,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn record_draw(&mut self, mesh: MeshId, transforms: &[Mat4]) {
        if self.skip_backbuffer && *self.recorder.current_target() == PassTarget::Backbuffer {
            return;
        }
        let Some(program_id) = self.current_program else {
            log::warn!("Draw of {mesh:?} without a program");
            return;
        };
        let Some(program) = self.programs.get(&program_id) else {
            log::warn!("Draw with unknown program {program_id:?}");
            return;
        };
        if !self.meshes.contains_key(&mesh) {
            log::warn!("Draw of unknown mesh {mesh:?}");
            return;
        }

        let mut offsets = [Vec::new(), Vec::new()];
        for (group, bindings) in program.bindings.iter().enumerate() {
            let arena = if group == 0 {
                &mut self.recorder.uniforms
            } else {
                &mut self.recorder.storage
            };
            for binding in bindings {
                let bytes = self
                    .buffers
                    .get(&binding.buffer)
                    .map_or(&[][..], |buffer| buffer.bytes.as_slice());
                offsets[group].push(arena.push(bytes, binding_size(binding.size)));
            }
        }

        let instances = self.recorder.push_instances(transforms);
        self.recorder.push_draw(DrawRecord {
            program: program_id,
            mesh,
            instances,
            state: self.state,
            offsets,
        });
    }

    fn build_pipelines(&mut self) {
        for pass in self.recorder.passes() {
            let Some(formats) = pass_formats(&pass.target, &self.attachments, &self.config) else {
                continue;
            };
            for draw in &pass.draws {
                let Some(program) = self.programs.get(&draw.program) else {
                    continue;
                };
                let key = PipelineKey {
                    program: draw.program,
                    colors: formats.colors.clone(),
                    depth: formats.depth,
                    state: draw.state,
                };
                if self.pipelines.contains_key(&key) {
                    continue;
                }

                let mut builder = PipelineBuilder::new(&self.device, &program.layout, &program.module)
                    .with_label(&program.name);
                if program.has_fragment {
                    for &format in &key.colors {
                        builder = builder.with_color_target(format, key.state.blending);
                    }
                } else {
                    builder = builder.depth_only();
                }
                if let Some(depth) = key.depth {
                    builder = builder.with_depth(depth, &key.state);
                }
                let pipeline = builder.with_rasterizer(&key.state).build();
                log::debug!("Created pipeline for '{}' ({:?})", program.name, key.state);
                self.pipelines.insert(key, pipeline);
            }
        }
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassRecord,
        frame: &FrameResources,
    ) {
        let Some(formats) = pass_formats(&pass.target, &self.attachments, &self.config) else {
            log::warn!("Skipping pass with released attachments");
            return;
        };

        let (color_views, depth_view): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) =
            match &pass.target {
                PassTarget::Backbuffer => {
                    let Some(view) = frame.backbuffer.as_ref() else {
                        return;
                    };
                    (vec![view], Some(&self.backbuffer_depth))
                }
                PassTarget::Attachments(ids) => {
                    let mut colors = Vec::new();
                    let mut depth = None;
                    for attachment in ids.iter().filter_map(|id| self.attachments.get(id)) {
                        if attachment.desc.format.has_depth() {
                            depth = Some(&attachment.view);
                        } else {
                            colors.push(&attachment.view);
                        }
                    }
                    (colors, depth)
                }
            };

        let color_load = match pass.clear_color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
            .into_iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_stencil_attachment = depth_view.map(|view| {
            let has_stencil = formats
                .depth
                .is_some_and(|format| format.has_stencil_aspect());
            wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if pass.clear_depth {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: has_stencil.then_some(wgpu::Operations {
                    load: if pass.clear_stencil {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }
        });

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ForwardPass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some((width, height)) = pass.viewport {
            let width = width.min(formats.size.0).max(1);
            let height = height.min(formats.size.1).max(1);
            rpass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        }

        let Some(instance_buffer) = frame.instances.as_ref() else {
            return;
        };

        let mut bind_groups: HashMap<ProgramId, [wgpu::BindGroup; 2]> = HashMap::new();
        for draw in &pass.draws {
            let (Some(program), Some(mesh)) =
                (self.programs.get(&draw.program), self.meshes.get(&draw.mesh))
            else {
                continue;
            };
            if !program.has_fragment && !formats.colors.is_empty() {
                log::warn!(
                    "'{}' has no fragment stage and cannot draw into color targets",
                    program.name
                );
                continue;
            }
            if mesh.index_count == 0 {
                continue;
            }
            let key = PipelineKey {
                program: draw.program,
                colors: formats.colors.clone(),
                depth: formats.depth,
                state: draw.state,
            };
            let Some(pipeline) = self.pipelines.get(&key) else {
                continue;
            };

            if !bind_groups.contains_key(&draw.program) {
                let Some(groups) = self.create_bind_groups(program, frame) else {
                    log::warn!("'{}' draws without block data", program.name);
                    continue;
                };
                bind_groups.insert(draw.program, groups);
            }
            let Some(groups) = bind_groups.get(&draw.program) else {
                continue;
            };

            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &groups[0], &draw.offsets[0]);
            rpass.set_bind_group(1, &groups[1], &draw.offsets[1]);
            rpass.set_vertex_buffer(0, mesh.vertices.slice(..));
            rpass.set_vertex_buffer(1, instance_buffer.slice(..));
            rpass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
            rpass.draw_indexed(0..mesh.index_count, 0, draw.instances.clone());
        }
    }

    fn create_bind_groups(
        &self,
        program: &GpuProgram,
        frame: &FrameResources,
    ) -> Option<[wgpu::BindGroup; 2]> {
        let arenas = [frame.uniforms.as_ref(), frame.storage.as_ref()];
        let mut groups = Vec::with_capacity(2);
        for (group, bindings) in program.bindings.iter().enumerate() {
            let entries = bindings
                .iter()
                .map(|binding| {
                    let buffer = arenas[group]?;
                    Some(wgpu::BindGroupEntry {
                        binding: binding.point.0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: 0,
                            size: NonZeroU64::new(binding_size(binding.size) as u64),
                        }),
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&program.name),
                layout: &program.group_layouts[group],
                entries: &entries,
            }));
        }
        groups.try_into().ok()
    }
}

/// GPU copies of the frame's recorded data.
struct FrameResources {
    backbuffer: Option<wgpu::TextureView>,
    instances: Option<wgpu::Buffer>,
    uniforms: Option<wgpu::Buffer>,
    storage: Option<wgpu::Buffer>,
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_attachment(&mut self, desc: &AttachmentDesc) -> Result<AttachmentId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend(format!(
                "attachment size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        let format = texture_format(desc.format);
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if desc.sampled {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Attachment"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers.max(1),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: 0,
            array_layer_count: Some(1),
            ..Default::default()
        });

        let id = AttachmentId(self.next_id());
        self.attachments.insert(
            id,
            GpuAttachment {
                desc: *desc,
                format,
                _texture: texture,
                view,
            },
        );
        Ok(id)
    }

    fn destroy_attachment(&mut self, id: AttachmentId) {
        self.attachments.remove(&id);
    }

    fn validate_attachments(&self, attachments: &[AttachmentId]) -> bool {
        let mut size = None;
        let mut depth_count = 0;
        for id in attachments {
            let Some(attachment) = self.attachments.get(id) else {
                return false;
            };
            let dims = (attachment.desc.width, attachment.desc.height);
            if *size.get_or_insert(dims) != dims {
                return false;
            }
            if attachment.desc.format.has_depth() {
                depth_count += 1;
            }
        }
        size.is_some() && depth_count <= 1
    }

    fn bind_target(&mut self, attachments: Option<&[AttachmentId]>) {
        self.recorder.bind(match attachments {
            Some(ids) => PassTarget::Attachments(ids.to_vec()),
            None => PassTarget::Backbuffer,
        });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.recorder.set_viewport(width, height);
    }

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) {
        self.recorder.clear(flags, color);
    }

    fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<MeshId> {
        if vertices.is_empty() {
            return Err(RenderError::Backend("mesh has no vertices".into()));
        }
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("VertexBuffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("IndexBuffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let id = MeshId(self.next_id());
        self.meshes.insert(
            id,
            GpuMesh {
                vertices: vertex_buffer,
                indices: index_buffer,
                index_count: indices.len() as u32,
            },
        );
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
            CpuBuffer {
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
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(removed) = self.buffers.remove(&buffer) {
            log::trace!(
                "Destroyed {:?} buffer at binding {}",
                removed.kind,
                removed.point.0
            );
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId> {
        let source = resolve_placeholders(desc.source, desc.bindings)?;

        let mut bindings: [Vec<ProgramBinding>; 2] = [Vec::new(), Vec::new()];
        for binding in desc.bindings {
            let group = match binding.kind {
                BufferKind::Uniform => 0,
                BufferKind::Storage => 1,
            };
            bindings[group].push(binding.clone());
        }
        for group in &mut bindings {
            group.sort_by_key(|binding| binding.point);
        }

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let group_layouts = [
            bind_group_layout(&self.device, "UniformBlocks", &bindings[0]),
            bind_group_layout(&self.device, "StorageBlocks", &bindings[1]),
        ];
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.name),
                bind_group_layouts: &[&group_layouts[0], &group_layouts[1]],
                push_constant_ranges: &[],
            });

        let id = ProgramId(self.next_id());
        self.programs.insert(
            id,
            GpuProgram {
                name: desc.name.to_string(),
                module,
                has_fragment: desc.has_fragment,
                group_layouts,
                layout,
                bindings,
            },
        );
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn draw_mesh(&mut self, mesh: MeshId, model: Mat4) {
        self.record_draw(mesh, &[model]);
    }

    fn draw_instanced(&mut self, mesh: MeshId, transforms: &[Mat4]) {
        if !transforms.is_empty() {
            self.record_draw(mesh, transforms);
        }
    }

    fn draw_skybox(&mut self, mesh: MeshId) {
        self.record_draw(mesh, &[Mat4::IDENTITY]);
    }

    fn apply_state(&mut self, toggle: StateToggle) {
        match toggle {
            StateToggle::VSync(enabled) => {
                let mode = if enabled {
                    self.vsync_mode
                } else {
                    pick_present_mode(wgpu::PresentMode::AutoNoVsync, &self.present_modes)
                };
                if self.config.present_mode != mode {
                    self.config.present_mode = mode;
                    self.surface.configure(&self.device, &self.config);
                    log::info!("Present mode set to {mode:?}");
                }
            }
            StateToggle::DebugOutput(enabled) => {
                log::set_max_level(if enabled {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                });
            }
            StateToggle::PolygonMode(mode) => {
                let required = match mode {
                    PolygonMode::Fill => wgpu::Features::empty(),
                    PolygonMode::Line => wgpu::Features::POLYGON_MODE_LINE,
                    PolygonMode::Point => wgpu::Features::POLYGON_MODE_POINT,
                };
                if self.features.contains(required) {
                    self.state.polygon_mode = mode;
                } else {
                    log::warn!("Polygon mode {mode:?} is not supported, drawing filled");
                    self.state.polygon_mode = PolygonMode::Fill;
                }
            }
            other => {
                self.state.apply(other);
            }
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.backbuffer_depth = create_depth_view(&self.device, width, height);
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.recorder.reset();
        self.frame = None;
        match self.surface.get_current_texture() {
            Ok(frame) => {
                self.frame = Some(frame);
                self.skip_backbuffer = false;
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.skip_backbuffer = true;
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping backbuffer this frame");
                self.skip_backbuffer = true;
            }
            Err(err) => return Err(RenderError::Surface(err.to_string())),
        }
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.build_pipelines();

        let frame = self.frame.take();
        let create = |label, bytes: &[u8], usage| {
            (!bytes.is_empty()).then(|| {
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: bytes,
                        usage,
                    })
            })
        };
        let resources = FrameResources {
            backbuffer: frame.as_ref().map(|frame| {
                frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default())
            }),
            instances: create(
                "InstanceBuffer",
                bytemuck::cast_slice(self.recorder.instances()),
                wgpu::BufferUsages::VERTEX,
            ),
            uniforms: create(
                "UniformArena",
                self.recorder.uniforms.bytes(),
                wgpu::BufferUsages::UNIFORM,
            ),
            storage: create(
                "StorageArena",
                self.recorder.storage.bytes(),
                wgpu::BufferUsages::STORAGE,
            ),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FrameEncoder"),
            });
        for pass in self.recorder.passes() {
            self.encode_pass(&mut encoder, pass, &resources);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, point: u32) -> ProgramBinding {
        ProgramBinding {
            name: name.to_string(),
            kind: BufferKind::Uniform,
            point: BindingPoint(point),
            buffer: BufferId(1),
            size: 64,
        }
    }

    #[test]
    fn placeholders_become_binding_points() {
        let source = "@group(0) @binding({{Camera}}) var<uniform> camera: Camera;\n\
                      @group(0) @binding({{Locals}}) var<uniform> locals: Locals;";
        let resolved =
            resolve_placeholders(source, &[binding("Camera", 0), binding("Locals", 3)]).unwrap();
        assert!(resolved.contains("@binding(0) var<uniform> camera"));
        assert!(resolved.contains("@binding(3) var<uniform> locals"));
    }

    #[test]
    fn missing_block_is_reported() {
        let err = resolve_placeholders("@binding({{Lights}})", &[binding("Camera", 0)]).unwrap_err();
        assert!(err.to_string().contains("{{Lights}}"));
    }

    #[test]
    fn attachment_formats_map_to_wgpu() {
        assert_eq!(
            texture_format(AttachmentFormat::Depth24Stencil8),
            wgpu::TextureFormat::Depth24PlusStencil8
        );
        assert!(texture_format(AttachmentFormat::Depth32).has_depth_aspect());
        assert!(!texture_format(AttachmentFormat::Rgba16Float).has_depth_aspect());
    }
}
