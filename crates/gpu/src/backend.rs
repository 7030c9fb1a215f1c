use crate::error::GpuError;
use crate::shader::Program;
use crate::vertex_array::VertexBufferDesc;

/// Handle to a GPU buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Handle to a render pipeline owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
}

/// Element width of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn byte_size(self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: BufferId,
    pub format: IndexFormat,
    pub count: u32,
}

/// One triangle-list draw, recorded until the frame is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub pipeline: PipelineId,
    /// Bound to vertex buffer slots in order.
    pub vertex_buffers: Vec<BufferId>,
    pub index: Option<IndexBinding>,
    /// Used when `index` is `None`.
    pub vertex_count: u32,
    pub instance_count: u32,
    pub uniforms: Vec<u8>,
}

impl DrawCommand {
    /// Vertices processed, counting every instance.
    pub fn vertices(&self) -> u64 {
        let per_instance = self.index.map_or(self.vertex_count, |i| i.count);
        per_instance as u64 * self.instance_count as u64
    }
}

/// Summary of one presented frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub vertices: u64,
}

impl FrameStats {
    pub fn from_draws(draws: &[DrawCommand]) -> Self {
        Self {
            draw_calls: draws.len() as u32,
            vertices: draws.iter().map(DrawCommand::vertices).sum(),
        }
    }
}

/// The GPU context a scene renders through.
///
/// Draws are queued with `submit` and executed in order by `finish_frame`.
pub trait GpuBackend {
    fn create_buffer(
        &mut self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferId, GpuError>;

    /// Overwrite part of an existing buffer. The range must fit.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]) -> Result<(), GpuError>;

    fn release_buffer(&mut self, buffer: BufferId);

    /// Create (or reuse) a pipeline for `program` with the given buffer layouts.
    fn create_pipeline(
        &mut self,
        program: &Program,
        layouts: &[VertexBufferDesc],
    ) -> Result<PipelineId, GpuError>;

    fn submit(&mut self, draw: DrawCommand);

    fn finish_frame(&mut self) -> Result<FrameStats, GpuError>;

    fn resize(&mut self, width: u32, height: u32);

    fn surface_size(&self) -> (u32, u32);

    fn set_clear_color(&mut self, color: [f32; 4]);
}
