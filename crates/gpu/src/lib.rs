//! GPU resource layer.
//!
//! Shaders are WGSL, parsed and validated with naga before any GPU object is
//! created, so compile and link failures carry a readable diagnostic. A
//! linked [`Program`] exposes its reflected vertex inputs and uniform block;
//! vertex arrays and uniform writes are resolved against that reflection.
//!
//! Drawing goes through the [`GpuBackend`] trait. [`WgpuBackend`] renders to a
//! real surface; [`HeadlessBackend`] records everything for tests and the CLI.
//!
//! # Invariants
//! - A program only exists if both stages validated and their interfaces match.
//! - A vertex array binds every input its program declares.
//! - Uniform writes never touch bytes outside the named member.

mod attribute;
mod backend;
mod error;
mod headless;
mod shader;
mod uniforms;
mod vertex_array;
mod wgpu_backend;

pub use attribute::{AttributeDescriptor, AttributeKind, INSTANCE_SPACING};
pub use backend::{
    BufferId, BufferUsage, DrawCommand, FrameStats, GpuBackend, IndexBinding, IndexFormat,
    PipelineId,
};
pub use error::GpuError;
pub use headless::{HeadlessBackend, RecordedBuffer, RecordedPipeline};
pub use shader::{
    AttributeBinding, CompiledShader, Program, ProgramId, ShaderSource, UNIFORM_SLOT_SIZE,
    UniformKind, UniformLayout, UniformMember, compile_shader, create_program,
};
pub use uniforms::UniformBlock;
pub use vertex_array::{
    AttribPointer, AttributeBuffer, StepMode, VertexArray, VertexBufferDesc, release_vao,
    setup_vao, setup_vao_shared, update_vao,
};
pub use wgpu_backend::WgpuBackend;

pub fn crate_info() -> &'static str {
    "kiln-gpu v0.1.0"
}
