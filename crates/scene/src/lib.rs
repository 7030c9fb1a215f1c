//! Scene facade over the component store and GPU layer.
//!
//! An [`Engine`] owns the backend for one canvas; each [`Scene`] it creates
//! holds entities (meshes, cameras, materials) as named components and runs
//! two built-in systems per frame: the orbit spin, then the renderer.
//! Systems added by the caller run after those two.
//!
//! # Invariants
//! - A mesh is drawn only while the active camera handle still resolves to a
//!   live camera; a stale camera renders nothing and warns once.
//! - Position arrays always hold whole triangles, and normals (given or
//!   computed) match them in length.
//! - GPU resources an entity owns are released when it is despawned.

mod camera;
mod clock;
pub mod component;
mod geometry;
mod scene;
mod shaders;
mod systems;

pub use camera::{OrbitRig, Projection};
pub use clock::FrameClock;
pub use component::Component;
pub use geometry::flat_normals;
pub use scene::{Engine, Scene, SceneError};
pub use shaders::{INSTANCED_SHADER, MESH_SHADER};
pub use systems::{BASE_COLOR, OrbitSystem, RenderSystem, SceneContext};

pub fn crate_info() -> &'static str {
    "kiln-scene v0.1.0"
}
