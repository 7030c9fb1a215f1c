use crate::backend::{
    BufferId, BufferUsage, DrawCommand, FrameStats, GpuBackend, IndexFormat, PipelineId,
};
use crate::error::GpuError;
use crate::shader::{Program, ProgramId, UNIFORM_SLOT_SIZE};
use crate::vertex_array::{StepMode, VertexBufferDesc};
use std::collections::HashMap;
use std::num::NonZeroU64;
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    layouts: Vec<VertexBufferDesc>,
}

/// wgpu-backed implementation of [`GpuBackend`] drawing to one surface.
///
/// Each queued draw gets its own slot in a shared uniform buffer, bound with
/// a dynamic offset, so a whole frame is encoded into a single render pass.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u64,
    uniform_slots: u64,
    buffers: Vec<Option<wgpu::Buffer>>,
    free_buffers: Vec<u32>,
    pipelines: Vec<wgpu::RenderPipeline>,
    pipeline_cache: HashMap<PipelineKey, PipelineId>,
    pending: Vec<DrawCommand>,
    clear_color: wgpu::Color,
}

impl WgpuBackend {
    /// Acquire an adapter and device for `surface` and configure it.
    pub async fn new(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::acquisition("no adapter compatible with the surface"))?;
        info!(adapter = ?adapter.get_info(), "adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("kiln_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::acquisition(format!("device: {e}")))?;
        device.on_uncaptured_error(Box::new(|err| {
            error!(error = %err, "uncaptured GPU error");
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(caps.formats.first())
            .copied()
            .ok_or_else(|| GpuError::Surface("surface reports no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(width = config.width, height = config.height, ?format, "surface configured");

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pipeline_layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = (UNIFORM_SLOT_SIZE as u64).div_ceil(alignment) * alignment;
        let uniform_slots = 64;
        let (uniform_buffer, uniform_bind_group) =
            Self::create_uniforms(&device, &uniform_layout, uniform_stride, uniform_slots);
        let depth_view = Self::create_depth_texture(&device, config.width, config.height);

        Ok(Self {
            device,
            queue,
            surface,
            config,
            depth_view,
            uniform_layout,
            pipeline_layout,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            uniform_slots,
            buffers: Vec::new(),
            free_buffers: Vec::new(),
            pipelines: Vec::new(),
            pipeline_cache: HashMap::new(),
            pending: Vec::new(),
            clear_color: wgpu::Color::BLACK,
        })
    }

    fn create_uniforms(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        slots: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform_buffer"),
            size: stride * slots,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(UNIFORM_SLOT_SIZE as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    fn ensure_uniform_slots(&mut self, draws: usize) {
        let needed = draws as u64;
        if needed <= self.uniform_slots {
            return;
        }
        let slots = needed.next_power_of_two();
        debug!(slots, "growing uniform buffer");
        let (buffer, bind_group) =
            Self::create_uniforms(&self.device, &self.uniform_layout, self.uniform_stride, slots);
        self.uniform_buffer = buffer;
        self.uniform_bind_group = bind_group;
        self.uniform_slots = slots;
    }

    fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&Default::default())
    }

    fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(id.0 as usize)?.as_ref()
    }

    fn build_pipeline(
        &self,
        program: &Program,
        layouts: &[VertexBufferDesc],
    ) -> Result<wgpu::RenderPipeline, GpuError> {
        let mut attributes: Vec<Vec<wgpu::VertexAttribute>> = Vec::with_capacity(layouts.len());
        for layout in layouts {
            let mut attrs = Vec::with_capacity(layout.pointers.len());
            for pointer in &layout.pointers {
                attrs.push(wgpu::VertexAttribute {
                    format: vertex_format(pointer.components).ok_or_else(|| {
                        GpuError::acquisition(format!(
                            "{} components at location {}",
                            pointer.components, pointer.location
                        ))
                    })?,
                    offset: pointer.byte_offset,
                    shader_location: pointer.location,
                });
            }
            attributes.push(attrs);
        }
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step {
                    StepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    StepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let vs_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&program.vertex().name),
            source: wgpu::ShaderSource::Wgsl(program.vertex().text.as_str().into()),
        });
        let fs_module = if program.fragment() == program.vertex() {
            None
        } else {
            Some(self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&program.fragment().name),
                source: wgpu::ShaderSource::Wgsl(program.fragment().text.as_str().into()),
            }))
        };

        Ok(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(program.name()),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vs_module,
                entry_point: Some(program.vertex_entry()),
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: fs_module.as_ref().unwrap_or(&vs_module),
                entry_point: Some(program.fragment_entry()),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        }))
    }
}

fn vertex_format(components: u32) -> Option<wgpu::VertexFormat> {
    match components {
        1 => Some(wgpu::VertexFormat::Float32),
        2 => Some(wgpu::VertexFormat::Float32x2),
        3 => Some(wgpu::VertexFormat::Float32x3),
        4 => Some(wgpu::VertexFormat::Float32x4),
        _ => None,
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(
        &mut self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferId, GpuError> {
        if contents.is_empty() {
            return Err(GpuError::acquisition(format!("empty buffer `{label}`")));
        }
        let usage = match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        let id = match self.free_buffers.pop() {
            Some(index) => {
                self.buffers[index as usize] = Some(buffer);
                index
            }
            None => {
                self.buffers.push(Some(buffer));
                self.buffers.len() as u32 - 1
            }
        };
        Ok(BufferId(id))
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]) -> Result<(), GpuError> {
        let target = self
            .buffer(buffer)
            .ok_or_else(|| GpuError::acquisition(format!("buffer {}", buffer.0)))?;
        if offset + contents.len() as u64 > target.size() {
            return Err(GpuError::acquisition(format!(
                "write of {} bytes at {offset} overflows buffer {}",
                contents.len(),
                buffer.0
            )));
        }
        self.queue.write_buffer(target, offset, contents);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            if let Some(released) = slot.take() {
                released.destroy();
                self.free_buffers.push(buffer.0);
            }
        }
    }

    fn create_pipeline(
        &mut self,
        program: &Program,
        layouts: &[VertexBufferDesc],
    ) -> Result<PipelineId, GpuError> {
        let key = PipelineKey {
            program: program.id(),
            layouts: layouts.to_vec(),
        };
        if let Some(id) = self.pipeline_cache.get(&key) {
            return Ok(*id);
        }
        let pipeline = self.build_pipeline(program, layouts)?;
        let id = PipelineId(self.pipelines.len() as u32);
        self.pipelines.push(pipeline);
        self.pipeline_cache.insert(key, id);
        debug!(program = program.name(), pipeline = id.0, "pipeline created");
        Ok(id)
    }

    fn submit(&mut self, draw: DrawCommand) {
        self.pending.push(draw);
    }

    fn finish_frame(&mut self) -> Result<FrameStats, GpuError> {
        let draws = std::mem::take(&mut self.pending);
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(FrameStats::default());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(GpuError::Surface("out of memory".into()));
            }
            Err(err) => {
                warn!(error = %err, "frame skipped");
                return Ok(FrameStats::default());
            }
        };

        self.ensure_uniform_slots(draws.len());
        let stride = self.uniform_stride as usize;
        let mut staging = vec![0u8; draws.len() * stride];
        for (i, draw) in draws.iter().enumerate() {
            let len = draw.uniforms.len().min(UNIFORM_SLOT_SIZE as usize);
            staging[i * stride..i * stride + len].copy_from_slice(&draw.uniforms[..len]);
        }
        if !staging.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &staging);
        }

        let view = frame.texture.create_view(&Default::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        let mut executed = Vec::with_capacity(draws.len());
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("main_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            for (i, draw) in draws.into_iter().enumerate() {
                if draw.instance_count == 0 || draw.vertices() == 0 {
                    continue;
                }
                let Some(pipeline) = self.pipelines.get(draw.pipeline.0 as usize) else {
                    error!(pipeline = draw.pipeline.0, "draw references unknown pipeline");
                    continue;
                };
                let Some(vertex_buffers) = draw
                    .vertex_buffers
                    .iter()
                    .map(|id| self.buffer(*id))
                    .collect::<Option<Vec<_>>>()
                else {
                    error!("draw references a released vertex buffer");
                    continue;
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[(i * stride) as u32]);
                for (slot, buffer) in vertex_buffers.iter().enumerate() {
                    pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
                match draw.index {
                    Some(index) => {
                        let Some(buffer) = self.buffer(index.buffer) else {
                            error!("draw references a released index buffer");
                            continue;
                        };
                        let format = match index.format {
                            IndexFormat::U16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::U32 => wgpu::IndexFormat::Uint32,
                        };
                        pass.set_index_buffer(buffer.slice(..), format);
                        pass.draw_indexed(0..index.count, 0, 0..draw.instance_count);
                    }
                    None => pass.draw(0..draw.vertex_count, 0..draw.instance_count),
                }
                executed.push(draw);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(FrameStats::from_draws(&executed))
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
        self.depth_view = Self::create_depth_texture(&self.device, self.config.width, self.config.height);
        debug!(width = self.config.width, height = self.config.height, "surface resized");
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
    }
}
