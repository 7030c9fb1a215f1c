//! Vertex arrays: per-attribute buffers plus the pipeline they bind to.
//!
//! Every attribute gets its own buffer. A matrix attribute occupies four
//! consecutive locations read from the same buffer, one vec4 row each.

use crate::attribute::{AttributeDescriptor, AttributeKind};
use crate::backend::{BufferId, BufferUsage, GpuBackend, PipelineId};
use crate::error::GpuError;
use crate::shader::{AttributeBinding, Program, ProgramId};
use glam::Mat4;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    Vertex,
    Instance,
}

/// One enabled vertex attribute pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttribPointer {
    pub location: u32,
    pub components: u32,
    pub byte_offset: u64,
    /// 1 when the pointer advances per instance.
    pub divisor: u32,
}

/// Layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferDesc {
    pub array_stride: u64,
    pub step: StepMode,
    pub pointers: Vec<AttribPointer>,
}

impl VertexBufferDesc {
    /// Layout reading one attribute at its resolved binding.
    pub fn for_attribute(binding: AttributeBinding, instanced: bool) -> Self {
        let kind = binding.kind;
        let row_components = kind.slot_components();
        let divisor = u32::from(instanced);
        let pointers = (0..kind.slots())
            .map(|row| AttribPointer {
                location: binding.location + row,
                components: row_components,
                byte_offset: row as u64 * row_components as u64 * 4,
                divisor,
            })
            .collect();
        Self {
            array_stride: kind.byte_size(),
            step: if instanced {
                StepMode::Instance
            } else {
                StepMode::Vertex
            },
            pointers,
        }
    }

    /// Layout for a single constant element shared by every vertex and instance.
    pub fn constant(binding: AttributeBinding) -> Self {
        let mut desc = Self::for_attribute(binding, true);
        desc.array_stride = 0;
        desc
    }

    fn first_location(&self) -> u32 {
        self.pointers.first().map_or(u32::MAX, |p| p.location)
    }
}

/// Buffer backing one program attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBuffer {
    pub name: String,
    pub buffer: BufferId,
    pub layout: VertexBufferDesc,
    pub byte_len: u64,
    /// False when borrowed from another vertex array.
    pub owned: bool,
    /// True when the data is a constant default rather than supplied data.
    pub constant: bool,
}

/// Attribute buffers bound for one program, with the pipeline built for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexArray {
    program: ProgramId,
    pipeline: PipelineId,
    buffers: Vec<AttributeBuffer>,
    instance_count: u32,
}

impl VertexArray {
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Buffers in slot order.
    pub fn buffers(&self) -> &[AttributeBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, name: &str) -> Option<&AttributeBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn vertex_buffer_ids(&self) -> Vec<BufferId> {
        self.buffers.iter().map(|b| b.buffer).collect()
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

/// Upload `attributes` for `program` and build its pipeline.
///
/// Attributes the program does not declare are skipped. Declared inputs left
/// unsupplied are bound to a constant (identity for matrices, zero
/// otherwise). A failed allocation releases everything created so far.
pub fn setup_vao(
    backend: &mut dyn GpuBackend,
    program: &Program,
    attributes: &[AttributeDescriptor<'_>],
) -> Result<VertexArray, GpuError> {
    build(backend, program, None, attributes)
}

/// Like [`setup_vao`], but inputs not supplied here borrow `base`'s buffers.
///
/// Used to give each mesh its own geometry while sharing a material's
/// per-instance data.
pub fn setup_vao_shared(
    backend: &mut dyn GpuBackend,
    program: &Program,
    base: &VertexArray,
    attributes: &[AttributeDescriptor<'_>],
) -> Result<VertexArray, GpuError> {
    build(backend, program, Some(base), attributes)
}

/// Re-upload supplied attributes into an existing vertex array.
///
/// Buffers of unchanged size are rewritten in place; others are replaced.
/// Attributes without an owned, non-constant buffer are skipped.
pub fn update_vao(
    backend: &mut dyn GpuBackend,
    vao: &mut VertexArray,
    attributes: &[AttributeDescriptor<'_>],
) -> Result<(), GpuError> {
    for desc in attributes {
        let Some(slot) = vao
            .buffers
            .iter_mut()
            .find(|b| b.name == desc.name && b.owned && !b.constant)
        else {
            debug!(attribute = desc.name, "no uploaded buffer to update, skipped");
            continue;
        };
        let data = desc.resolved_data();
        let bytes: &[u8] = bytemuck::cast_slice(&data[..]);
        if bytes.len() as u64 == slot.byte_len {
            backend.write_buffer(slot.buffer, 0, bytes)?;
        } else {
            let replacement = backend.create_buffer(desc.name, BufferUsage::Vertex, bytes)?;
            backend.release_buffer(slot.buffer);
            slot.buffer = replacement;
            slot.byte_len = bytes.len() as u64;
        }
    }
    Ok(())
}

/// Release the buffers this vertex array owns.
pub fn release_vao(backend: &mut dyn GpuBackend, vao: VertexArray) {
    for buffer in vao.buffers.into_iter().filter(|b| b.owned) {
        backend.release_buffer(buffer.buffer);
    }
}

fn build(
    backend: &mut dyn GpuBackend,
    program: &Program,
    base: Option<&VertexArray>,
    attributes: &[AttributeDescriptor<'_>],
) -> Result<VertexArray, GpuError> {
    let mut buffers = Vec::new();
    let mut instance_count = 1;
    match bind_all(backend, program, base, attributes, &mut buffers, &mut instance_count) {
        Ok(pipeline) => Ok(VertexArray {
            program: program.id(),
            pipeline,
            buffers,
            instance_count,
        }),
        Err(err) => {
            tracing::error!(program = program.name(), error = %err, "vertex array setup aborted");
            for buffer in buffers.into_iter().filter(|b| b.owned) {
                backend.release_buffer(buffer.buffer);
            }
            Err(err)
        }
    }
}

fn bind_all(
    backend: &mut dyn GpuBackend,
    program: &Program,
    base: Option<&VertexArray>,
    attributes: &[AttributeDescriptor<'_>],
    buffers: &mut Vec<AttributeBuffer>,
    instance_count: &mut u32,
) -> Result<PipelineId, GpuError> {
    for desc in attributes {
        let Some(binding) = program.attribute(desc.name) else {
            debug!(program = program.name(), attribute = desc.name, "attribute not declared, skipped");
            continue;
        };
        if binding.kind != desc.kind {
            warn!(
                program = program.name(),
                attribute = desc.name,
                declared = ?binding.kind,
                supplied = ?desc.kind,
                "attribute kind mismatch, skipped"
            );
            continue;
        }
        let data = desc.resolved_data();
        if data.is_empty() {
            continue;
        }
        let bytes: &[u8] = bytemuck::cast_slice(&data[..]);
        let buffer = backend.create_buffer(desc.name, BufferUsage::Vertex, bytes)?;
        buffers.push(AttributeBuffer {
            name: desc.name.to_string(),
            buffer,
            layout: VertexBufferDesc::for_attribute(binding, desc.is_instanced()),
            byte_len: bytes.len() as u64,
            owned: true,
            constant: false,
        });
        *instance_count = (*instance_count).max(desc.instances);
    }

    for (name, binding) in program.attributes() {
        if buffers.iter().any(|b| b.name == name) {
            continue;
        }
        if let Some(shared) = base.and_then(|b| b.buffer(name).map(|buf| (b, buf))) {
            let (base, buffer) = shared;
            if buffer.layout.pointers.first().map(|p| p.location) == Some(binding.location) {
                if buffer.layout.step == StepMode::Instance && !buffer.constant {
                    *instance_count = (*instance_count).max(base.instance_count);
                }
                buffers.push(AttributeBuffer {
                    owned: false,
                    ..buffer.clone()
                });
                continue;
            }
        }
        let fill = constant_fill(binding.kind);
        let bytes: &[u8] = bytemuck::cast_slice(&fill);
        let buffer = backend.create_buffer(name, BufferUsage::Vertex, bytes)?;
        debug!(program = program.name(), attribute = name, "unsupplied attribute bound to a constant");
        buffers.push(AttributeBuffer {
            name: name.to_string(),
            buffer,
            layout: VertexBufferDesc::constant(binding),
            byte_len: bytes.len() as u64,
            owned: true,
            constant: true,
        });
    }

    buffers.sort_by_key(|b| b.layout.first_location());
    let layouts: Vec<VertexBufferDesc> = buffers.iter().map(|b| b.layout.clone()).collect();
    backend.create_pipeline(program, &layouts)
}

fn constant_fill(kind: AttributeKind) -> Vec<f32> {
    match kind {
        AttributeKind::Mat4 => Mat4::IDENTITY.to_cols_array().to_vec(),
        other => vec![0.0; other.components() as usize],
    }
}
