//! Mesh import from binary glTF (GLB) containers.
//!
//! Each primitive's attributes are pulled out by semantic, in the fixed
//! order position, normal, texcoord 0, into their own float arrays. Index
//! width follows the accessor's component type. Uploading gives every
//! attribute its own GPU buffer; nothing is interleaved.
//!
//! # Invariants
//! - A container without meshes, buffer views or accessors yields no model.
//! - Every element read stays inside its buffer view.
//! - A failed upload releases whatever it had already created.

mod import;
mod upload;

pub use import::{
    ImportedModel, ImportedPrimitive, Indices, MeshImportError, ModelBounds, Semantic, load_glb,
    parse_glb,
};
pub use upload::{GpuMesh, upload_model, upload_primitive};

pub fn crate_info() -> &'static str {
    "kiln-mesh v0.1.0"
}
