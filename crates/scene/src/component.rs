//! Component values stored in a scene, and the names they are stored under.

use glam::Mat4;
use kiln_common::Entity;
use kiln_gpu::{Program, VertexArray};
use kiln_mesh::GpuMesh;
use std::rc::Rc;

pub const IS_MESH: &str = "isMesh";
pub const ATTR_POS: &str = "attr_pos";
pub const ATTR_NORMALS: &str = "attr_normals";
pub const U_MODEL_MATRIX: &str = "u_model_matrix";
pub const APPLIED_MATERIAL: &str = "applied_material";
pub const IS_CAMERA: &str = "isCamera";
pub const U_PROJECTION_MATRIX: &str = "u_projection_matrix";
pub const IS_MATERIAL: &str = "isMaterial";
pub const PROGRAM: &str = "program";
pub const VAO: &str = "vao";
pub const NAME: &str = "name";
/// Imported primitive with its own index buffer.
pub const GPU_MESH: &str = "gpu_mesh";

/// Every component a scene registers.
pub const ALL: [&str; 12] = [
    IS_MESH,
    ATTR_POS,
    ATTR_NORMALS,
    U_MODEL_MATRIX,
    APPLIED_MATERIAL,
    IS_CAMERA,
    U_PROJECTION_MATRIX,
    IS_MATERIAL,
    PROGRAM,
    VAO,
    NAME,
    GPU_MESH,
];

/// A scene component value.
///
/// Array and GPU values are reference counted: cloning a row is cheap, and
/// the render system uses pointer identity to tell whether an array changed.
#[derive(Debug, Clone)]
pub enum Component {
    Flag,
    Text(Rc<str>),
    Floats(Rc<[f32]>),
    Matrix(Mat4),
    Entity(Entity),
    Program(Rc<Program>),
    VertexArray(Rc<VertexArray>),
    Mesh(Rc<GpuMesh>),
}

impl Component {
    pub fn text(s: &str) -> Self {
        Self::Text(Rc::from(s))
    }

    pub fn floats(values: &[f32]) -> Self {
        Self::Floats(Rc::from(values))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&Rc<[f32]>> {
        match self {
            Self::Floats(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Mat4> {
        match self {
            Self::Matrix(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<Entity> {
        match self {
            Self::Entity(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_program(&self) -> Option<&Rc<Program>> {
        match self {
            Self::Program(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vertex_array(&self) -> Option<&Rc<VertexArray>> {
        match self {
            Self::VertexArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&Rc<GpuMesh>> {
        match self {
            Self::Mesh(m) => Some(m),
            _ => None,
        }
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Flag, Self::Flag) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Floats(a), Self::Floats(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Matrix(a), Self::Matrix(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a == b,
            (Self::Program(a), Self::Program(b)) => Rc::ptr_eq(a, b),
            (Self::VertexArray(a), Self::VertexArray(b)) => Rc::ptr_eq(a, b),
            (Self::Mesh(a), Self::Mesh(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
