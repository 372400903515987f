//! wgpu backend of [`GraphicsContext`], drawing into a winit window.
//!
//! Calls are recorded into a frame op list and encoded at [`WgpuContext::present`]:
//! each `clear` opens a render pass, draws go into the current pass. Uniform
//! blocks are copied per draw into one buffer bound with dynamic offsets.
//!
//! `draw_elements` only looks things up. Render pipelines are built when a
//! program links or the fixed-function state changes, and texture bind groups
//! when the textures a program reads change.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::Arc;

use asset::{MeshVertex, TextureData};
use wgpu::{
    BindGroup, BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType,
    BlendState, Buffer, BufferBindingType, BufferUsages, ColorTargetState, ColorWrites,
    CommandEncoderDescriptor, DepthBiasState, DepthStencilState, Device, DeviceDescriptor,
    Extent3d, Features, FragmentState, Instance, InstanceDescriptor, Limits, LoadOp, Operations,
    PipelineLayout, PipelineLayoutDescriptor, PowerPreference, PresentMode, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    Sampler, ShaderModule, ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, Surface,
    SurfaceConfiguration, SurfaceError, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureView, TextureViewDescriptor, VertexBufferLayout, VertexState,
    VertexStepMode, util::DeviceExt,
};
use winit::{dpi::PhysicalSize, window::Window};

use crate::{
    RenderError, RenderResult,
    gl::{
        ClearColor, ClearMask, CullState, DepthFunc, Face, FilterMode, FrontFace, GraphicsContext,
        ProgramId, ProgramLayout, SamplerParams, ShaderId, ShaderStage, TextureId, Topology,
        UniformKind, UniformLocation, UniformValue, VertexArrayId, WrapMode,
    },
    reflect::{self, CompiledStage},
};

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
const TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

const VERTEX_LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
    array_stride: std::mem::size_of::<MeshVertex>() as u64,
    step_mode: VertexStepMode::Vertex,
    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2],
};

struct GpuShader {
    stage: CompiledStage,
    module: ShaderModule,
}

struct GpuProgram {
    layout: ProgramLayout,
    vertex: ShaderModule,
    fragment: ShaderModule,
    uniform_bgl: Option<BindGroupLayout>,
    texture_bgl: Option<BindGroupLayout>,
    pipeline_layout: PipelineLayout,
    /// CPU copy of the uniform block.
    block: Vec<u8>,
    /// Texture unit read by each entry of `layout.textures`.
    units: Vec<u32>,
}

struct GpuMesh {
    vertex_buf: Buffer,
    index_buf: Buffer,
    index_count: u32,
}

struct GpuTexture {
    image: Option<TextureData>,
    view: Option<TextureView>,
    sampler: Sampler,
    params: SamplerParams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    topology: Topology,
    cull: Option<CullState>,
    depth: Option<DepthFunc>,
}

/// Every pipeline a program may draw with under one raster state.
fn pipeline_keys(
    program: ProgramId,
    cull: Option<CullState>,
    depth: Option<DepthFunc>,
) -> impl Iterator<Item = PipelineKey> {
    Topology::ALL.into_iter().map(move |topology| PipelineKey {
        program,
        topology,
        cull,
        depth,
    })
}

/// A program and the texture bound to the unit of each of its samplers.
type GroupKey = (ProgramId, Vec<Option<TextureId>>);

fn bound_textures(units: &[u32], bound: &BTreeMap<u32, TextureId>) -> Vec<Option<TextureId>> {
    units.iter().map(|unit| bound.get(unit).copied()).collect()
}

/// Texture bind groups keyed by program and bound textures.
struct BindingCache<T> {
    entries: HashMap<GroupKey, T>,
}

impl<T> BindingCache<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &GroupKey) -> Option<&T> {
        self.entries.get(key)
    }

    fn contains(&self, key: &GroupKey) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: GroupKey, value: T) {
        self.entries.insert(key, value);
    }

    /// Drop groups built over `texture`'s view or sampler.
    fn forget_texture(&mut self, texture: TextureId) {
        self.entries
            .retain(|(_, textures), _| !textures.contains(&Some(texture)));
    }

    fn forget_program(&mut self, program: ProgramId) {
        self.entries.retain(|(id, _), _| *id != program);
    }
}

struct DrawOp {
    pipeline: RenderPipeline,
    program: ProgramId,
    vertex_buf: Buffer,
    index_buf: Buffer,
    count: u32,
    /// Offset of this draw's uniform block copy, if the program has one.
    uniform_offset: Option<u32>,
    uniform_bgl: Option<(BindGroupLayout, u32)>,
    textures: Option<BindGroup>,
}

enum FrameOp {
    Clear { mask: ClearMask, color: ClearColor },
    Draw(DrawOp),
}

/// One render pass of a frame.
struct Pass {
    color: LoadOp<wgpu::Color>,
    depth: LoadOp<f32>,
    draws: Vec<DrawOp>,
}

pub struct WgpuContext {
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    device: Device,
    queue: Queue,
    depth_view: TextureView,

    empty_bgl: BindGroupLayout,
    empty_bind_group: BindGroup,
    fallback: (TextureView, Sampler),

    next_id: u32,
    shaders: HashMap<ShaderId, GpuShader>,
    programs: HashMap<ProgramId, GpuProgram>,
    meshes: HashMap<VertexArrayId, GpuMesh>,
    textures: HashMap<TextureId, GpuTexture>,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
    texture_groups: BindingCache<BindGroup>,
    uniform_groups: HashMap<ProgramId, BindGroup>,

    units: BTreeMap<u32, TextureId>,
    current: Option<ProgramId>,
    clear_color: ClearColor,
    cull: Option<CullState>,
    depth: Option<DepthFunc>,

    frame: Vec<FrameOp>,
    uniform_staging: Vec<u8>,
    uniform_buf: Option<Buffer>,
    uniform_align: u32,
}

impl WgpuContext {
    /// Create a context drawing into `window`.
    pub async fn new(window: Arc<Window>, backends: wgpu::Backends) -> RenderResult<Self> {
        let PhysicalSize { width, height } = window.inner_size();
        let width = width.max(1);
        let height = height.max(1);

        let instance = Instance::new(&InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let surface: Surface<'static> = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::Device(format!("create_surface failed: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::Device(format!("no suitable GPU adapter: {e}")))?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Pocket Tanks Device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| RenderError::Device(format!("request_device failed: {e}")))?;

        // Surface format (prefer sRGB)
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::Device("surface reports no formats".into()))?;

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: preferred_alpha_mode(&caps.alpha_modes),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        let depth_view = create_depth_view(&device, &surface_config);

        let empty_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Empty BGL"),
            entries: &[],
        });
        let empty_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Empty BG"),
            layout: &empty_bgl,
            entries: &[],
        });
        let fallback = create_fallback_texture(&device, &queue)?;
        let uniform_align = device.limits().min_uniform_buffer_offset_alignment;

        Ok(Self {
            surface,
            surface_config,
            device,
            queue,
            depth_view,
            empty_bgl,
            empty_bind_group,
            fallback,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
            pipelines: HashMap::new(),
            texture_groups: BindingCache::new(),
            uniform_groups: HashMap::new(),
            units: BTreeMap::new(),
            current: None,
            clear_color: ClearColor::rgba(0.0, 0.0, 0.0, 0.0),
            cull: None,
            depth: None,
            frame: Vec::new(),
            uniform_staging: Vec::new(),
            uniform_buf: None,
            uniform_align,
        })
    }

    /// Resize: reconfigure surface & recreate depth view.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    /// Encode and submit everything recorded since the last present.
    pub fn present(&mut self) -> RenderResult<()> {
        let ops = std::mem::take(&mut self.frame);
        let staging = std::mem::take(&mut self.uniform_staging);

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                log::warn!("Surface lost/outdated, reconfiguring");
                self.resize(self.surface_config.width, self.surface_config.height);
                return Ok(());
            }
            Err(SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(RenderError::Device(e.to_string())),
        };
        let view = frame.texture.create_view(&Default::default());

        self.upload_uniforms(&staging);
        self.prepare_uniform_groups(&ops);
        let passes = group_passes(ops);

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("MainEncoder"),
            });
        for pass in &passes {
            let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("MainPass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: pass.color,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations {
                        load: pass.depth,
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for draw in &pass.draws {
                rpass.set_pipeline(&draw.pipeline);
                match (draw.uniform_offset, self.uniform_groups.get(&draw.program)) {
                    (Some(offset), Some(group)) => rpass.set_bind_group(0, group, &[offset]),
                    _ => rpass.set_bind_group(0, &self.empty_bind_group, &[]),
                }
                if let Some(textures) = &draw.textures {
                    rpass.set_bind_group(1, textures, &[]);
                }
                rpass.set_vertex_buffer(0, draw.vertex_buf.slice(..));
                rpass.set_index_buffer(draw.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..draw.count, 0, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn upload_uniforms(&mut self, staging: &[u8]) {
        if staging.is_empty() {
            return;
        }
        let needed = staging.len() as u64;
        let fits = self.uniform_buf.as_ref().is_some_and(|b| b.size() >= needed);
        if !fits {
            let size = needed.next_power_of_two().max(256);
            log::debug!("Growing uniform buffer to {size} bytes");
            self.uniform_groups.clear();
            self.uniform_buf = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Uniform ring"),
                size,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buf) = &self.uniform_buf {
            self.queue.write_buffer(buf, 0, staging);
        }
    }

    /// Bind groups over the uniform buffer for programs drawn this frame.
    /// Kept until the buffer grows or the program is deleted.
    fn prepare_uniform_groups(&mut self, ops: &[FrameOp]) {
        let Some(buf) = &self.uniform_buf else {
            return;
        };
        for op in ops {
            let FrameOp::Draw(draw) = op else { continue };
            let Some((bgl, block_size)) = &draw.uniform_bgl else {
                continue;
            };
            if self.uniform_groups.contains_key(&draw.program) {
                continue;
            }
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Uniform BG"),
                layout: bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: 0,
                        size: NonZeroU64::new(*block_size as u64),
                    }),
                }],
            });
            self.uniform_groups.insert(draw.program, group);
        }
    }

    fn build_pipeline(&self, program: &GpuProgram, key: PipelineKey) -> RenderPipeline {
        let strip_index_format = match key.topology {
            Topology::TriangleStrip | Topology::LineStrip => Some(wgpu::IndexFormat::Uint32),
            _ => None,
        };
        let (cull_mode, front_face) = match key.cull {
            Some(CullState { face, front_face }) => (Some(face.into()), front_face.into()),
            None => (None, wgpu::FrontFace::Ccw),
        };
        let (depth_write_enabled, depth_compare) = match key.depth {
            Some(func) => (true, func.into()),
            None => (false, wgpu::CompareFunction::Always),
        };

        self.device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Program Pipeline"),
            layout: Some(&program.pipeline_layout),
            vertex: VertexState {
                module: &program.vertex,
                entry_point: Some(&program.layout.vertex_entry),
                buffers: &[VERTEX_LAYOUT],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &program.fragment,
                entry_point: Some(&program.layout.fragment_entry),
                targets: &[Some(ColorTargetState {
                    format: self.surface_config.format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: key.topology.into(),
                strip_index_format,
                front_face,
                cull_mode,
                ..Default::default()
            },
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    /// Build the pipelines `program` draws with under the current raster state.
    fn prepare_pipelines(&mut self, program: ProgramId) {
        for key in pipeline_keys(program, self.cull, self.depth) {
            if self.pipelines.contains_key(&key) {
                continue;
            }
            let Some(state) = self.programs.get(&program) else {
                return;
            };
            let pipeline = self.build_pipeline(state, key);
            self.pipelines.insert(key, pipeline);
        }
    }

    fn prepare_all_pipelines(&mut self) {
        let programs: Vec<ProgramId> = self.programs.keys().copied().collect();
        for program in programs {
            self.prepare_pipelines(program);
        }
    }

    /// Build the texture bind group of every program for the current unit
    /// bindings, unless one is cached already.
    fn prepare_texture_groups(&mut self) {
        let missing: Vec<GroupKey> = self
            .programs
            .iter()
            .filter(|(_, program)| program.texture_bgl.is_some())
            .map(|(&id, program)| (id, bound_textures(&program.units, &self.units)))
            .filter(|key| !self.texture_groups.contains(key))
            .collect();
        for key in missing {
            if let Some(group) = self.create_texture_group(&key) {
                self.texture_groups.insert(key, group);
            }
        }
    }

    fn create_texture_group(&self, (program, textures): &GroupKey) -> Option<BindGroup> {
        let state = self.programs.get(program)?;
        let bgl = state.texture_bgl.as_ref()?;
        let mut entries = Vec::with_capacity(textures.len() * 2);
        for (slot, texture) in state.layout.textures.iter().zip(textures.iter().copied()) {
            let (view, sampler) = texture
                .and_then(|id| self.textures.get(&id))
                .and_then(|t| t.view.as_ref().map(|view| (view, &t.sampler)))
                .unwrap_or((&self.fallback.0, &self.fallback.1));
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: slot.sampler_binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture BG"),
            layout: bgl,
            entries: &entries,
        }))
    }

    /// `texture`'s view or sampler changed.
    fn texture_changed(&mut self, texture: TextureId) {
        self.texture_groups.forget_texture(texture);
        self.prepare_texture_groups();
    }

    fn texture_mut(&mut self, texture: TextureId) -> RenderResult<&mut GpuTexture> {
        self.textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))
    }
}

impl GraphicsContext for WgpuContext {
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId> {
        let compiled = reflect::compile(stage, source)?;
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(match stage {
                ShaderStage::Vertex => "Vertex WGSL",
                ShaderStage::Fragment => "Fragment WGSL",
            }),
            source: ShaderSource::Wgsl(source.into()),
        });
        let id = ShaderId(self.next());
        self.shaders.insert(
            id,
            GpuShader {
                stage: compiled,
                module,
            },
        );
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()> {
        self.shaders
            .remove(&shader)
            .map(drop)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{shader:?}")))
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramLayout)> {
        let lookup = |id: ShaderId| {
            self.shaders
                .get(&id)
                .ok_or_else(|| RenderError::InvalidHandle(format!("{id:?}")))
        };
        let (vs, fs) = (lookup(vertex)?, lookup(fragment)?);
        let layout = reflect::link(&vs.stage, &fs.stage)?;
        let (vertex_module, fragment_module) = (vs.module.clone(), fs.module.clone());

        let uniform_bgl = (layout.block_size > 0).then(|| {
            self.device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Uniform BGL"),
                entries: &[BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(layout.block_size as u64),
                    },
                    count: None,
                }],
            })
        });
        let texture_bgl = (!layout.textures.is_empty()).then(|| {
            let entries: Vec<BindGroupLayoutEntry> = layout
                .textures
                .iter()
                .flat_map(|slot| {
                    [
                        BindGroupLayoutEntry {
                            binding: slot.binding,
                            visibility: ShaderStages::VERTEX_FRAGMENT,
                            ty: BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        BindGroupLayoutEntry {
                            binding: slot.sampler_binding,
                            visibility: ShaderStages::VERTEX_FRAGMENT,
                            ty: BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Texture BGL"),
                entries: &entries,
            })
        });

        let mut groups = vec![uniform_bgl.as_ref().unwrap_or(&self.empty_bgl)];
        if let Some(bgl) = &texture_bgl {
            groups.push(bgl);
        }
        let pipeline_layout = self.device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Program PipelineLayout"),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        });

        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            GpuProgram {
                block: vec![0; layout.block_size as usize],
                units: vec![0; layout.textures.len()],
                layout: layout.clone(),
                vertex: vertex_module,
                fragment: fragment_module,
                uniform_bgl,
                texture_bgl,
                pipeline_layout,
            },
        );

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.prepare_pipelines(id);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.delete_program(id)?;
            return Err(RenderError::ShaderLink {
                log: err.to_string(),
            });
        }
        self.prepare_texture_groups();
        Ok((id, layout))
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))?;
        self.pipelines.retain(|key, _| key.program != program);
        self.texture_groups.forget_program(program);
        self.uniform_groups.remove(&program);
        if self.current == Some(program) {
            self.current = None;
        }
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> RenderResult<()> {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                return Err(RenderError::InvalidHandle(format!("{id:?}")));
            }
        }
        self.current = program;
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: UniformValue,
    ) -> RenderResult<()> {
        let state = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))?;
        let slot = state.layout.texture_slot(location);
        let info = state
            .layout
            .uniform(location)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{location:?}")))?;
        if !value.fits(info.kind) {
            return Err(RenderError::UniformTypeMismatch {
                name: info.name.clone(),
                expected: info.kind,
                found: value.kind(),
            });
        }

        let offset = info.offset as usize;
        let mut rebind = false;
        match (info.kind, value) {
            (UniformKind::Sampler, UniformValue::Int(unit)) => {
                let unit = u32::try_from(unit)
                    .map_err(|_| RenderError::Texture(format!("negative texture unit {unit}")))?;
                if let Some(slot) = slot {
                    rebind = state.units[slot] != unit;
                    state.units[slot] = unit;
                }
            }
            (_, UniformValue::Int(v)) => {
                state.block[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&v));
            }
            (_, UniformValue::Float4(v)) => {
                state.block[offset..offset + 16].copy_from_slice(bytemuck::cast_slice(&v));
            }
            (_, UniformValue::Mat4(m)) => {
                state.block[offset..offset + 64].copy_from_slice(bytemuck::cast_slice(&m));
            }
        }
        if rebind {
            self.prepare_texture_groups();
        }
        Ok(())
    }

    fn create_vertex_array(
        &mut self,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> RenderResult<VertexArrayId> {
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidDraw(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }
        let vertex_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh VB"),
                contents: bytemuck::cast_slice(vertices),
                usage: BufferUsages::VERTEX,
            });
        let index_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh IB"),
                contents: bytemuck::cast_slice(indices),
                usage: BufferUsages::INDEX,
            });
        let id = VertexArrayId(self.next());
        self.meshes.insert(
            id,
            GpuMesh {
                vertex_buf,
                index_buf,
                index_count: indices.len() as u32,
            },
        );
        Ok(id)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()> {
        self.meshes
            .remove(&vertex_array)
            .map(drop)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{vertex_array:?}")))
    }

    fn draw_elements(
        &mut self,
        vertex_array: VertexArrayId,
        topology: Topology,
        count: u32,
    ) -> RenderResult<()> {
        let program = self.current.ok_or(RenderError::NoProgram)?;
        let mesh = self
            .meshes
            .get(&vertex_array)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{vertex_array:?}")))?;
        if count > mesh.index_count {
            return Err(RenderError::InvalidDraw(format!(
                "{count} indices requested, {} available",
                mesh.index_count
            )));
        }
        let (vertex_buf, index_buf) = (mesh.vertex_buf.clone(), mesh.index_buf.clone());

        let key = PipelineKey {
            program,
            topology,
            cull: self.cull,
            depth: self.depth,
        };
        let pipeline = self
            .pipelines
            .get(&key)
            .cloned()
            .ok_or_else(|| RenderError::InvalidDraw(format!("no pipeline built for {key:?}")))?;
        let state = self
            .programs
            .get(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))?;
        let textures = match state.texture_bgl {
            Some(_) => {
                let key = (program, bound_textures(&state.units, &self.units));
                let group = self.texture_groups.get(&key).cloned().ok_or_else(|| {
                    RenderError::InvalidDraw(format!("no texture bind group for {key:?}"))
                })?;
                Some(group)
            }
            None => None,
        };

        let uniform_bgl = state
            .uniform_bgl
            .clone()
            .map(|bgl| (bgl, state.layout.block_size));
        let uniform_offset = (!state.block.is_empty()).then(|| {
            let align = self.uniform_align.max(1) as usize;
            let offset = self.uniform_staging.len().next_multiple_of(align);
            self.uniform_staging.resize(offset, 0);
            self.uniform_staging.extend_from_slice(&state.block);
            offset as u32
        });

        self.frame.push(FrameOp::Draw(DrawOp {
            pipeline,
            program,
            vertex_buf,
            index_buf,
            count,
            uniform_offset,
            uniform_bgl,
            textures,
        }));
        Ok(())
    }

    fn create_texture(&mut self) -> RenderResult<TextureId> {
        let params = SamplerParams::default();
        let sampler = create_sampler(&self.device, params, false);
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            GpuTexture {
                image: None,
                view: None,
                sampler,
                params,
            },
        );
        Ok(id)
    }

    fn tex_image_2d(&mut self, texture: TextureId, image: &TextureData) -> RenderResult<()> {
        if !image.is_valid() {
            return Err(RenderError::Texture(format!(
                "{} bytes do not describe a {}x{} image",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        let params = self.texture_mut(texture)?.params;
        let view = upload_levels(&self.device, &self.queue, std::slice::from_ref(image));
        let sampler = create_sampler(&self.device, params, false);
        let state = self.texture_mut(texture)?;
        state.image = Some(image.clone());
        state.view = Some(view);
        state.sampler = sampler;
        self.texture_changed(texture);
        Ok(())
    }

    fn generate_mipmap(&mut self, texture: TextureId) -> RenderResult<()> {
        let state = self
            .textures
            .get(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        let base = state
            .image
            .as_ref()
            .ok_or_else(|| RenderError::Texture("mipmaps requested before upload".into()))?;
        let mut levels = vec![base.clone()];
        levels.extend(base.mip_chain());
        let view = upload_levels(&self.device, &self.queue, &levels);
        let sampler = create_sampler(&self.device, state.params, true);
        let state = self.texture_mut(texture)?;
        state.view = Some(view);
        state.sampler = sampler;
        self.texture_changed(texture);
        Ok(())
    }

    fn tex_parameters(&mut self, texture: TextureId, params: SamplerParams) -> RenderResult<()> {
        let state = self
            .textures
            .get(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        let has_mips = state
            .image
            .as_ref()
            .is_some_and(|image| image.mip_level_count() > 1);
        let sampler = create_sampler(&self.device, params, has_mips);
        let state = self.texture_mut(texture)?;
        state.params = params;
        state.sampler = sampler;
        self.texture_changed(texture);
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> RenderResult<()> {
        if self.units.get(&unit) == texture.as_ref() {
            return Ok(());
        }
        match texture {
            Some(id) => {
                if !self.textures.contains_key(&id) {
                    return Err(RenderError::InvalidHandle(format!("{id:?}")));
                }
                self.units.insert(unit, id);
            }
            None => {
                self.units.remove(&unit);
            }
        }
        self.prepare_texture_groups();
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.textures
            .remove(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        self.units.retain(|_, bound| *bound != texture);
        self.texture_groups.forget_texture(texture);
        self.prepare_texture_groups();
        Ok(())
    }

    fn clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    fn clear(&mut self, mask: ClearMask) {
        self.frame.push(FrameOp::Clear {
            mask,
            color: self.clear_color,
        });
    }

    fn set_cull_face(&mut self, cull: Option<CullState>) {
        if self.cull != cull {
            self.cull = cull;
            self.prepare_all_pipelines();
        }
    }

    fn set_depth_test(&mut self, func: Option<DepthFunc>) {
        if self.depth != func {
            self.depth = func;
            self.prepare_all_pipelines();
        }
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }
}

/// Split a frame into render passes: a clear opens a new pass unless the
/// current one has no draws yet, in which case it folds into its load ops.
fn group_passes(ops: Vec<FrameOp>) -> Vec<Pass> {
    let mut passes: Vec<Pass> = Vec::new();
    for op in ops {
        match op {
            FrameOp::Clear { mask, color } => {
                let reuse = passes.last().is_some_and(|p| p.draws.is_empty());
                if !reuse {
                    passes.push(Pass {
                        color: LoadOp::Load,
                        depth: LoadOp::Load,
                        draws: Vec::new(),
                    });
                }
                if let Some(pass) = passes.last_mut() {
                    if mask.contains(ClearMask::COLOR) {
                        pass.color = LoadOp::Clear(color.into());
                    }
                    if mask.contains(ClearMask::DEPTH) {
                        pass.depth = LoadOp::Clear(1.0);
                    }
                }
            }
            FrameOp::Draw(draw) => match passes.last_mut() {
                Some(pass) => pass.draws.push(draw),
                None => passes.push(Pass {
                    color: LoadOp::Load,
                    depth: LoadOp::Load,
                    draws: vec![draw],
                }),
            },
        }
    }
    passes
}

/// First mode the surface reports, or `Auto` when it reports none.
fn preferred_alpha_mode(modes: &[wgpu::CompositeAlphaMode]) -> wgpu::CompositeAlphaMode {
    modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Upload `levels` (level 0 first) into a new texture and return its view.
fn upload_levels(device: &Device, queue: &Queue, levels: &[TextureData]) -> TextureView {
    let (width, height) = levels
        .first()
        .map(|base| (base.width, base.height))
        .unwrap_or((1, 1));
    let texture = device.create_texture(&TextureDescriptor {
        label: Some("Texture"),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: levels.len().max(1) as u32,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    for (mip_level, level) in levels.iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: mip_level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &level.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(level.width * level.bytes_per_pixel()),
                rows_per_image: Some(level.height),
            },
            Extent3d {
                width: level.width,
                height: level.height,
                depth_or_array_layers: 1,
            },
        );
    }
    texture.create_view(&TextureViewDescriptor::default())
}

fn create_sampler(device: &Device, params: SamplerParams, has_mips: bool) -> Sampler {
    let (mipmap_filter, lod_max_clamp) = match params.mipmap_filter {
        Some(filter) if has_mips => (filter.into(), 32.0),
        _ => (wgpu::FilterMode::Nearest, 0.0),
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Texture Sampler"),
        address_mode_u: params.wrap_s.into(),
        address_mode_v: params.wrap_t.into(),
        mag_filter: params.mag_filter.into(),
        min_filter: params.min_filter.into(),
        mipmap_filter,
        lod_max_clamp,
        ..Default::default()
    })
}

/// 1x1 white texture sampled by programs whose unit has nothing bound.
fn create_fallback_texture(device: &Device, queue: &Queue) -> RenderResult<(TextureView, Sampler)> {
    let white = TextureData::new_rgba8(1, 1, vec![255; 4])
        .map_err(|e| RenderError::Texture(e.to_string()))?;
    let view = upload_levels(device, queue, std::slice::from_ref(&white));
    Ok((view, create_sampler(device, SamplerParams::default(), false)))
}

/// Create a depth texture view matching the surface config.
fn create_depth_view(device: &Device, sc: &SurfaceConfiguration) -> TextureView {
    let tex = device.create_texture(&TextureDescriptor {
        label: Some("DepthTex"),
        size: Extent3d {
            width: sc.width.max(1),
            height: sc.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    tex.create_view(&TextureViewDescriptor::default())
}

impl From<Topology> for wgpu::PrimitiveTopology {
    fn from(t: Topology) -> Self {
        match t {
            Topology::Triangles => Self::TriangleList,
            Topology::TriangleStrip => Self::TriangleStrip,
            Topology::Lines => Self::LineList,
            Topology::LineStrip => Self::LineStrip,
            Topology::Points => Self::PointList,
        }
    }
}

impl From<Face> for wgpu::Face {
    fn from(f: Face) -> Self {
        match f {
            Face::Front => Self::Front,
            Face::Back => Self::Back,
        }
    }
}

impl From<FrontFace> for wgpu::FrontFace {
    fn from(f: FrontFace) -> Self {
        match f {
            FrontFace::Ccw => Self::Ccw,
            FrontFace::Cw => Self::Cw,
        }
    }
}

impl From<DepthFunc> for wgpu::CompareFunction {
    fn from(f: DepthFunc) -> Self {
        match f {
            DepthFunc::Never => Self::Never,
            DepthFunc::Less => Self::Less,
            DepthFunc::Equal => Self::Equal,
            DepthFunc::LessEqual => Self::LessEqual,
            DepthFunc::Greater => Self::Greater,
            DepthFunc::NotEqual => Self::NotEqual,
            DepthFunc::GreaterEqual => Self::GreaterEqual,
            DepthFunc::Always => Self::Always,
        }
    }
}

impl From<WrapMode> for wgpu::AddressMode {
    fn from(w: WrapMode) -> Self {
        match w {
            WrapMode::Repeat => Self::Repeat,
            WrapMode::MirroredRepeat => Self::MirrorRepeat,
            WrapMode::ClampToEdge => Self::ClampToEdge,
        }
    }
}

impl From<FilterMode> for wgpu::FilterMode {
    fn from(f: FilterMode) -> Self {
        match f {
            FilterMode::Nearest => Self::Nearest,
            FilterMode::Linear => Self::Linear,
        }
    }
}
