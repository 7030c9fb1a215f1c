use crate::import::{ImportedModel, ImportedPrimitive, MeshImportError};
use kiln_gpu::{
    AttributeDescriptor, BufferUsage, DrawCommand, GpuBackend, IndexBinding, Program, VertexArray,
    release_vao, setup_vao, setup_vao_shared,
};
use tracing::{debug, error, warn};

/// An imported primitive resident on the GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuMesh {
    pub vao: VertexArray,
    pub index: Option<IndexBinding>,
    /// Used when the primitive has no index buffer.
    pub vertex_count: u32,
}

impl GpuMesh {
    pub fn draw_command(&self, uniforms: Vec<u8>) -> DrawCommand {
        DrawCommand {
            pipeline: self.vao.pipeline(),
            vertex_buffers: self.vao.vertex_buffer_ids(),
            index: self.index,
            vertex_count: self.vertex_count,
            instance_count: self.vao.instance_count(),
            uniforms,
        }
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        if let Some(index) = self.index {
            backend.release_buffer(index.buffer);
        }
        release_vao(backend, self.vao);
    }
}

/// Upload one primitive: a buffer per attribute plus the index buffer.
///
/// Program inputs the primitive does not supply are taken from `base` when
/// given (a material's per-instance data, for example).
pub fn upload_primitive(
    backend: &mut dyn GpuBackend,
    program: &Program,
    base: Option<&VertexArray>,
    primitive: &ImportedPrimitive,
) -> Result<GpuMesh, MeshImportError> {
    let attributes: Vec<AttributeDescriptor<'_>> = primitive
        .attributes
        .iter()
        .map(|(semantic, data)| {
            AttributeDescriptor::per_vertex(semantic.attribute_name(), semantic.kind(), data)
        })
        .collect();
    let vao = match base {
        Some(base) => setup_vao_shared(backend, program, base, &attributes)?,
        None => setup_vao(backend, program, &attributes)?,
    };

    let index = match &primitive.indices {
        Some(indices) if indices.is_empty() => {
            warn!("empty index accessor, primitive drawn unindexed");
            None
        }
        Some(indices) => {
            match backend.create_buffer("indices", BufferUsage::Index, indices.as_bytes()) {
                Ok(buffer) => Some(IndexBinding {
                    buffer,
                    format: indices.format(),
                    count: indices.len() as u32,
                }),
                Err(err) => {
                    error!(error = %err, "index buffer upload failed");
                    release_vao(backend, vao);
                    return Err(err.into());
                }
            }
        }
        None => None,
    };

    debug!(
        vertices = primitive.vertex_count(),
        indices = ?index.map(|i| i.count),
        "primitive uploaded"
    );
    Ok(GpuMesh {
        vao,
        index,
        vertex_count: primitive.vertex_count(),
    })
}

/// Upload every primitive of `model`. On failure nothing stays allocated.
pub fn upload_model(
    backend: &mut dyn GpuBackend,
    program: &Program,
    base: Option<&VertexArray>,
    model: &ImportedModel,
) -> Result<Vec<GpuMesh>, MeshImportError> {
    let mut meshes = Vec::with_capacity(model.primitives.len());
    for primitive in &model.primitives {
        match upload_primitive(backend, program, base, primitive) {
            Ok(mesh) => meshes.push(mesh),
            Err(err) => {
                for mesh in meshes {
                    mesh.release(backend);
                }
                return Err(err);
            }
        }
    }
    Ok(meshes)
}
