use crate::backend::{BufferId, BufferUsage, DrawCommand, FrameStats, GpuBackend, PipelineId};
use crate::error::GpuError;
use crate::shader::Program;
use crate::vertex_array::VertexBufferDesc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A buffer held by the headless backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBuffer {
    pub label: String,
    pub usage: BufferUsage,
    pub data: Vec<u8>,
}

/// A pipeline created on the headless backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPipeline {
    pub program: String,
    pub layouts: Vec<VertexBufferDesc>,
}

/// Backend that records every call instead of talking to a GPU.
///
/// Used for tests and for the headless CLI. It checks buffer ranges and
/// pipeline layouts the way a real device would, and can be given a buffer
/// limit to simulate allocation failure.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    buffers: BTreeMap<BufferId, RecordedBuffer>,
    next_buffer: u32,
    pipelines: Vec<RecordedPipeline>,
    pending: Vec<DrawCommand>,
    frames: Vec<Vec<DrawCommand>>,
    size: (u32, u32),
    clear_color: [f32; 4],
    buffer_limit: Option<usize>,
    bytes_written: u64,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffers: BTreeMap::new(),
            next_buffer: 0,
            pipelines: Vec::new(),
            pending: Vec::new(),
            frames: Vec::new(),
            size: (width.max(1), height.max(1)),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            buffer_limit: None,
            bytes_written: 0,
        }
    }

    /// Fail buffer creation once this many buffers are live.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = Some(limit);
        self
    }

    pub fn buffer(&self, id: BufferId) -> Option<&RecordedBuffer> {
        self.buffers.get(&id)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn pipelines(&self) -> &[RecordedPipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&RecordedPipeline> {
        self.pipelines.get(id.0 as usize)
    }

    /// Draws of every finished frame, oldest first.
    pub fn frames(&self) -> &[Vec<DrawCommand>] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&[DrawCommand]> {
        self.frames.last().map(Vec::as_slice)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Total bytes uploaded through `create_buffer` and `write_buffer`.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(
        &mut self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferId, GpuError> {
        if self.buffer_limit.is_some_and(|limit| self.buffers.len() >= limit) {
            return Err(GpuError::acquisition(format!("buffer `{label}`")));
        }
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.bytes_written += contents.len() as u64;
        self.buffers.insert(
            id,
            RecordedBuffer {
                label: label.to_string(),
                usage,
                data: contents.to_vec(),
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]) -> Result<(), GpuError> {
        let recorded = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::acquisition(format!("buffer {}", buffer.0)))?;
        let start = offset as usize;
        let end = start + contents.len();
        if end > recorded.data.len() {
            return Err(GpuError::acquisition(format!(
                "write of {} bytes at {offset} overflows buffer `{}`",
                contents.len(),
                recorded.label
            )));
        }
        recorded.data[start..end].copy_from_slice(contents);
        self.bytes_written += contents.len() as u64;
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn create_pipeline(
        &mut self,
        program: &Program,
        layouts: &[VertexBufferDesc],
    ) -> Result<PipelineId, GpuError> {
        let bound: BTreeSet<u32> = layouts
            .iter()
            .flat_map(|l| l.pointers.iter().map(|p| p.location))
            .collect();
        for (name, binding) in program.attributes() {
            let rows = binding.location..binding.location + binding.kind.slots();
            if let Some(missing) = rows.into_iter().find(|loc| !bound.contains(loc)) {
                return Err(GpuError::acquisition(format!(
                    "pipeline for `{}`: attribute `{name}` location {missing} has no buffer",
                    program.name()
                )));
            }
        }
        let recorded = RecordedPipeline {
            program: program.name().to_string(),
            layouts: layouts.to_vec(),
        };
        if let Some(existing) = self.pipelines.iter().position(|p| *p == recorded) {
            return Ok(PipelineId(existing as u32));
        }
        self.pipelines.push(recorded);
        Ok(PipelineId(self.pipelines.len() as u32 - 1))
    }

    fn submit(&mut self, draw: DrawCommand) {
        self.pending.push(draw);
    }

    fn finish_frame(&mut self) -> Result<FrameStats, GpuError> {
        let draws = std::mem::take(&mut self.pending);
        let stats = FrameStats::from_draws(&draws);
        debug!(frame = self.frames.len(), draws = stats.draw_calls, "headless frame finished");
        self.frames.push(draws);
        Ok(stats)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_limit_fails_acquisition() {
        let mut backend = HeadlessBackend::new(4, 4).with_buffer_limit(1);
        backend.create_buffer("a", BufferUsage::Vertex, &[0; 4]).unwrap();
        let err = backend
            .create_buffer("b", BufferUsage::Vertex, &[0; 4])
            .unwrap_err();
        assert!(matches!(err, GpuError::ResourceAcquisition { .. }));
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mut backend = HeadlessBackend::default();
        let id = backend.create_buffer("a", BufferUsage::Vertex, &[0; 8]).unwrap();
        assert!(backend.write_buffer(id, 4, &[1; 4]).is_ok());
        assert!(backend.write_buffer(id, 6, &[1; 4]).is_err());
        assert_eq!(backend.buffer(id).unwrap().data, vec![0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn finish_frame_drains_pending() {
        let mut backend = HeadlessBackend::default();
        backend.submit(DrawCommand {
            pipeline: PipelineId(0),
            vertex_buffers: vec![],
            index: None,
            vertex_count: 3,
            instance_count: 2,
            uniforms: vec![],
        });
        let stats = backend.finish_frame().unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 6);
        assert_eq!(backend.finish_frame().unwrap().draw_calls, 0);
        assert_eq!(backend.frames().len(), 2);
    }
}
