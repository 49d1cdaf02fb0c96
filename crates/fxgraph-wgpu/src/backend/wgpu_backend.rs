//! wgpu implementation of [`Backend`]
//!
//! Every pass becomes one render pass. Full-surface passes use a built-in
//! vertex stage drawing a single triangle that covers the target; point passes
//! use the program's own vertex entry with a point-list topology.

use super::{Backend, DrawCall, PassShape, Primitive, SurfaceDesc, SurfaceFormat, SurfaceId};
use crate::error::{EffectError, ProgramError, ResourceError};
use bytes::{Buf, BufMut, BytesMut};
use fxgraph_wgpu_build::CompiledProgram;
use fxgraph_wgpu_build::graph::{BlendFactor, BlendMode};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Vertex stage of full-surface passes
///
/// Emits `uv` at location 0 with the origin in the top-left corner.
const FULL_SURFACE_VERTEX: &str = r#"
struct FullSurfaceOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> FullSurfaceOutput {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: FullSurfaceOutput;
    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

const SURFACE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

#[derive(Debug)]
struct GpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: SurfaceFormat,
}

#[derive(Debug)]
struct GpuProgram {
    program: CompiledProgram,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

/// Everything a render pipeline is specialized on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: String,
    formats: Vec<SurfaceFormat>,
    blend: Option<BlendMode>,
    points: bool,
}

/// [`Backend`] recording into a wgpu device
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surfaces: HashMap<SurfaceId, GpuSurface>,
    programs: HashMap<String, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    full_surface: wgpu::ShaderModule,
    sampler: wgpu::Sampler,
    /// Bound in place of inputs the executor leaves unconnected
    placeholder: wgpu::TextureView,
    encoder: Option<wgpu::CommandEncoder>,
    frame_open: bool,
}

impl WgpuBackend {
    /// Wraps an existing device
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        device.on_uncaptured_error(Box::new(|error| tracing::error!(%error, "uncaptured wgpu error")));

        let full_surface = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Full Surface Vertex"),
            source: wgpu::ShaderSource::Wgsl(FULL_SURFACE_VERTEX.into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Clamp Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });

        let placeholder = create_texture(&device, "Placeholder", 1, 1, SurfaceFormat::Rgba16Float).create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            device,
            queue,
            surfaces: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            full_surface,
            sampler,
            placeholder,
            encoder: None,
            frame_open: false,
        }
    }

    /// Creates a backend on the default adapter without a presentation surface
    ///
    /// Requests `FLOAT32_FILTERABLE` when the adapter has it.
    pub fn headless() -> Result<Self, Box<dyn std::error::Error>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fxgraph"),
            required_features: adapter.features() & wgpu::Features::FLOAT32_FILTERABLE,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))?;
        tracing::info!(adapter = ?adapter.get_info().name, "created headless device");

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Texture behind a surface, for hosts that present or copy it
    pub fn texture(&self, id: SurfaceId) -> Option<&wgpu::Texture> {
        self.surfaces.get(&id).map(|surface| &surface.texture)
    }

    /// Submits recorded work; an open frame keeps recording into a fresh encoder
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("fxgraph frame") }))
    }

    /// Runs `f` inside a validation error scope
    fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<wgpu::RenderPipeline, ProgramError> {
        let program = self.programs.get(&key.program).ok_or_else(|| ProgramError::Missing(key.program.clone()))?;
        let blend = key.blend.map(blend_state);
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: texture_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let (vertex_module, vertex_entry, topology) = match (key.points, &program.program.vertex_entry) {
            (false, _) => (&self.full_surface, "vs_main", wgpu::PrimitiveTopology::TriangleList),
            (true, Some(entry)) => (&program.module, entry.as_str(), wgpu::PrimitiveTopology::PointList),
            (true, None) => {
                return Err(ProgramError::MissingEntryPoint {
                    program: key.program.clone(),
                    entry: "vertex".to_string(),
                });
            }
        };

        self.validated(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&key.program),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(vertex_entry),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some(&program.program.fragment_entry),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
        .map_err(|message| ProgramError::Compile {
            program: key.program.clone(),
            message,
        })
    }

    /// Checks a pass against its surfaces and makes sure its pipeline exists
    fn pipeline_for(&mut self, pass: &PassShape<'_>) -> Result<PipelineKey, EffectError> {
        let mut formats = Vec::with_capacity(pass.outputs.len());
        for id in pass.outputs {
            if pass.outputs.iter().filter(|other| *other == id).count() > 1 || pass.inputs.iter().any(|(_, input)| input == id) {
                return Err(ResourceError::Aliased(pass.label.to_string()).into());
            }
            formats.push(self.surfaces.get(id).ok_or(ResourceError::MissingSurface(*id))?.format);
        }

        // Texture bindings are declared filterable
        if !self.device.features().contains(wgpu::Features::FLOAT32_FILTERABLE) {
            for (name, id) in pass.inputs {
                if self.surfaces.get(id).ok_or(ResourceError::MissingSurface(*id))?.format.is_float32() {
                    return Err(ProgramError::Compile {
                        program: pass.program.to_string(),
                        message: format!("input '{name}' is a 32-bit float surface, which this device cannot filter"),
                    }
                    .into());
                }
            }
        }

        let key = PipelineKey {
            program: pass.program.to_string(),
            formats,
            blend: pass.blend,
            points: matches!(pass.primitive, Primitive::Points(_)),
        };
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.create_pipeline(&key)?;
            self.pipelines.insert(key.clone(), pipeline);
        }
        Ok(key)
    }

    fn bind_group(&self, program: &GpuProgram, call: &DrawCall<'_>) -> Result<wgpu::BindGroup, EffectError> {
        let Some(interface) = &program.program.interface else {
            return Err(ProgramError::Missing(program.program.id.clone()).into());
        };

        let mut views = Vec::with_capacity(interface.textures.len());
        for slot in &interface.textures {
            let view = match call.inputs.iter().find(|(name, _)| *name == slot.name) {
                Some((_, id)) => &self.surfaces.get(id).ok_or(ResourceError::MissingSurface(*id))?.view,
                None => &self.placeholder,
            };
            views.push((slot.binding, view));
        }

        let uniform_buffer = interface.uniform_block.as_ref().map(|block| {
            let size = (block.size.max(call.uniforms.len() as u32).max(16) as usize).next_multiple_of(16);
            let mut contents = BytesMut::zeroed(size);
            contents[..call.uniforms.len()].copy_from_slice(call.uniforms);
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(call.label),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            });
            (block.binding, buffer)
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .into_iter()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        for slot in &interface.samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        if let Some((binding, buffer)) = &uniform_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            });
        }
        entries.sort_by_key(|entry| entry.binding);

        self.validated(|device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(call.label),
                layout: &program.bind_group_layout,
                entries: &entries,
            })
        })
        .map_err(|message| {
            ProgramError::Compile {
                program: program.program.id.clone(),
                message,
            }
            .into()
        })
    }
}

impl Backend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, ResourceError> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width > limit || desc.height > limit {
            return Err(ResourceError::TooLarge {
                width: desc.width,
                height: desc.height,
                limit,
            });
        }
        let texture = create_texture(&self.device, &desc.label, desc.width, desc.height, desc.format);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = SurfaceId::next();
        self.surfaces.insert(
            id,
            GpuSurface {
                texture,
                view,
                format: desc.format,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.remove(&id) {
            surface.texture.destroy();
        }
    }

    fn clear_surface(&mut self, id: SurfaceId, value: [f32; 4]) -> Result<(), ResourceError> {
        let standalone = !self.frame_open;
        let surface = self.surfaces.get(&id).ok_or(ResourceError::MissingSurface(id))?;
        let view = surface.view.clone();
        let [r, g, b, a] = value.map(f64::from);
        self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Surface"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if standalone {
            self.flush();
        }
        Ok(())
    }

    fn write_surface(&mut self, id: SurfaceId, pixels: &[[f32; 4]]) -> Result<(), ResourceError> {
        // Queue writes run before the next submission, so recorded work goes first
        self.flush();
        let surface = self.surfaces.get(&id).ok_or(ResourceError::MissingSurface(id))?;
        let wgpu::Extent3d { width, height, .. } = surface.texture.size();
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ResourceError::SizeMismatch { expected, actual: pixels.len() });
        }

        let format = surface.format;
        let mut data = BytesMut::with_capacity(expected * format.bytes_per_pixel());
        for pixel in pixels {
            encode_pixel(format, *pixel, &mut data);
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * format.bytes_per_pixel() as u32),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn compile_program(&mut self, program: &CompiledProgram) -> Result<(), ProgramError> {
        if self.programs.contains_key(&program.id) {
            return Ok(());
        }
        let compile_error = |message: String| ProgramError::Compile {
            program: program.id.clone(),
            message,
        };
        if let Some(message) = &program.compile_error {
            return Err(compile_error(message.clone()));
        }
        let interface = program.interface.as_ref().ok_or_else(|| compile_error("no reflected interface".to_string()))?;
        if !interface.fragment_entries.contains_key(&program.fragment_entry) {
            return Err(ProgramError::MissingEntryPoint {
                program: program.id.clone(),
                entry: program.fragment_entry.clone(),
            });
        }
        if let Some(entry) = &program.vertex_entry {
            if !interface.vertex_entries.contains(entry) {
                return Err(ProgramError::MissingEntryPoint {
                    program: program.id.clone(),
                    entry: entry.clone(),
                });
            }
        }

        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let mut entries = Vec::new();
        for slot in &interface.textures {
            entries.push((
                slot.group,
                wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ));
        }
        for slot in &interface.samplers {
            entries.push((
                slot.group,
                wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ));
        }
        if let Some(block) = &interface.uniform_block {
            entries.push((
                block.group,
                wgpu::BindGroupLayoutEntry {
                    binding: block.binding,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ));
        }
        if entries.iter().any(|(group, _)| *group != 0) {
            return Err(compile_error("only bind group 0 is supported".to_string()));
        }
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = entries.into_iter().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.binding);

        let (module, bind_group_layout, pipeline_layout) = self
            .validated(|device| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&program.id),
                    source: wgpu::ShaderSource::Wgsl(program.source.as_str().into()),
                });
                let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&program.id),
                    entries: &entries,
                });
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&program.id),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });
                (module, bind_group_layout, pipeline_layout)
            })
            .map_err(compile_error)?;

        tracing::debug!(program = %program.id, file = %program.file, "compiled program");
        self.programs.insert(
            program.id.clone(),
            GpuProgram {
                program: program.clone(),
                module,
                bind_group_layout,
                pipeline_layout,
            },
        );
        Ok(())
    }

    fn prepare_pass(&mut self, pass: &PassShape<'_>) -> Result<(), EffectError> {
        self.pipeline_for(pass).map(|_| ())
    }

    fn begin_frame(&mut self) {
        self.frame_open = true;
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), EffectError> {
        let key = self.pipeline_for(&call.shape())?;
        let program = self.programs.get(call.program).ok_or_else(|| ProgramError::Missing(call.program.to_string()))?;
        let bind_group = self.bind_group(program, call)?;

        let mut attachments = Vec::with_capacity(call.outputs.len());
        let mut target = (0, 0);
        for id in call.outputs {
            let surface = self.surfaces.get(id).ok_or(ResourceError::MissingSurface(*id))?;
            if attachments.is_empty() {
                target = (surface.texture.width(), surface.texture.height());
            }
            attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: &surface.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let standalone = !self.frame_open;
        let pipeline = &self.pipelines[&key];
        let encoder = self.encoder.get_or_insert_with(|| self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("fxgraph frame") }));
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(call.label),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            if let Some(viewport) = call.viewport {
                let x = viewport.x.min(target.0);
                let y = viewport.y.min(target.1);
                let width = viewport.width.min(target.0 - x);
                let height = viewport.height.min(target.1 - y);
                pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
            }
            match call.primitive {
                Primitive::FullSurface => pass.draw(0..3, 0..1),
                Primitive::Points(count) => pass.draw(0..count, 0..1),
            }
        }

        if standalone {
            self.flush();
        }
        Ok(())
    }

    fn end_frame(&mut self) {
        self.flush();
        self.frame_open = false;
    }

    fn abort_frame(&mut self) {
        if self.encoder.take().is_some() {
            tracing::debug!("dropped recorded frame");
        }
        self.frame_open = false;
    }

    fn read_surface(&mut self, id: SurfaceId) -> Result<Vec<[f32; 4]>, ResourceError> {
        self.flush();
        let surface = self.surfaces.get(&id).ok_or(ResourceError::MissingSurface(id))?;
        let wgpu::Extent3d { width, height, .. } = surface.texture.size();
        let format = surface.format;
        let row_bytes = width * format.bytes_per_pixel() as u32;
        let padded_row_bytes = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row_bytes as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::PollType::Wait).map_err(|e| ResourceError::Readback(e.to_string()))?;
        pollster::block_on(receiver.receive())
            .ok_or_else(|| ResourceError::Readback("mapping callback dropped".to_string()))?
            .map_err(|e| ResourceError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in data.chunks_exact(padded_row_bytes as usize) {
            let mut row = &row[..row_bytes as usize];
            for _ in 0..width {
                pixels.push(decode_pixel(format, &mut row));
            }
        }
        drop(data);
        buffer.unmap();
        Ok(pixels)
    }
}

fn texture_format(format: SurfaceFormat) -> wgpu::TextureFormat {
    match format {
        SurfaceFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        SurfaceFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        SurfaceFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        SurfaceFormat::R16Float => wgpu::TextureFormat::R16Float,
        SurfaceFormat::R32Float => wgpu::TextureFormat::R32Float,
        SurfaceFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        SurfaceFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
    }
}

fn create_texture(device: &wgpu::Device, label: &str, width: u32, height: u32, format: SurfaceFormat) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage: SURFACE_USAGE,
        view_formats: &[],
    })
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Src => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::Dst => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(mode.src),
        dst_factor: blend_factor(mode.dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState { color: component, alpha: component }
}

/// Appends one pixel in the memory layout of `format`
fn encode_pixel(format: SurfaceFormat, pixel: [f32; 4], out: &mut BytesMut) {
    for &component in &pixel[..format.channels()] {
        match format {
            SurfaceFormat::Rgba8Unorm => out.put_u8((component.clamp(0.0, 1.0) * 255.0).round() as u8),
            SurfaceFormat::Rgba16Float | SurfaceFormat::R16Float | SurfaceFormat::Rg16Float => out.put_u16_le(half::f16::from_f32(component).to_bits()),
            SurfaceFormat::Rgba32Float | SurfaceFormat::R32Float | SurfaceFormat::Rg32Float => out.put_f32_le(component),
        }
    }
}

/// Reads one pixel of `format`; missing channels read as 0, alpha as 1
fn decode_pixel(format: SurfaceFormat, data: &mut &[u8]) -> [f32; 4] {
    let mut pixel = [0.0, 0.0, 0.0, 1.0];
    for component in pixel.iter_mut().take(format.channels()) {
        *component = match format {
            SurfaceFormat::Rgba8Unorm => data.get_u8() as f32 / 255.0,
            SurfaceFormat::Rgba16Float | SurfaceFormat::R16Float | SurfaceFormat::Rg16Float => half::f16::from_bits(data.get_u16_le()).to_f32(),
            SurfaceFormat::Rgba32Float | SurfaceFormat::R32Float | SurfaceFormat::Rg32Float => data.get_f32_le(),
        };
    }
    pixel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_encoding_matches_format_layout() {
        let pixel = [0.5, 0.25, 1.0, 0.0];
        for format in [SurfaceFormat::Rgba8Unorm, SurfaceFormat::Rgba16Float, SurfaceFormat::Rgba32Float, SurfaceFormat::Rg16Float, SurfaceFormat::R32Float] {
            let mut data = BytesMut::new();
            encode_pixel(format, pixel, &mut data);
            assert_eq!(data.len(), format.bytes_per_pixel());

            let mut cursor = &data[..];
            let decoded = decode_pixel(format, &mut cursor);
            assert!(cursor.is_empty());
            for channel in 0..format.channels() {
                assert!((decoded[channel] - pixel[channel]).abs() < 1.0 / 255.0, "{format:?} channel {channel}");
            }
            if format.channels() < 4 {
                assert_eq!(decoded[3], 1.0);
            }
        }
    }

    #[test]
    fn test_blend_state_uses_add() {
        let state = blend_state(BlendMode::ADDITIVE);
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(state.alpha.operation, wgpu::BlendOperation::Add);
    }
}
