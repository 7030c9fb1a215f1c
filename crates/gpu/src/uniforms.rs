use crate::shader::{Program, UniformKind};
use glam::{Mat4, Vec4};

/// CPU-side copy of one draw's uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    bytes: Vec<u8>,
}

impl UniformBlock {
    /// Zeroed block sized for `program`.
    pub fn for_program(program: &Program) -> Self {
        Self {
            bytes: vec![0; program.uniform_block_size() as usize],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Write a 4x4 matrix uniform. No-op returning false when the name does
    /// not resolve to a matrix member.
    pub fn set_mat4(&mut self, program: &Program, name: &str, value: &Mat4) -> bool {
        self.write(program, name, UniformKind::Mat4, bytemuck::cast_slice(&value.to_cols_array()))
    }

    pub fn set_vec4(&mut self, program: &Program, name: &str, value: Vec4) -> bool {
        self.write(program, name, UniformKind::Vec4, bytemuck::cast_slice(&value.to_array()))
    }

    fn write(&mut self, program: &Program, name: &str, kind: UniformKind, data: &[u8]) -> bool {
        let Some(member) = program.uniform(name) else {
            return false;
        };
        let start = member.offset as usize;
        let end = start + data.len();
        if member.kind != kind || end > self.bytes.len() {
            return false;
        }
        self.bytes[start..end].copy_from_slice(data);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderSource, create_program};

    const SHADER: &str = r#"
struct Uniforms {
    view: mat4x4<f32>,
    tint: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u.view * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return u.tint;
}
"#;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn program() -> Program {
        let src = ShaderSource::new("tint.wgsl", SHADER);
        create_program("tint", &src, &src).unwrap()
    }

    #[test]
    fn set_mat4_writes_column_major() {
        let program = program();
        let mut block = UniformBlock::for_program(&program);
        let m = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        assert!(block.set_mat4(&program, "view", &m));
        assert_eq!(floats(&block.as_bytes()[..64]), m.to_cols_array().to_vec());
    }

    #[test]
    fn unresolved_uniform_is_noop() {
        let program = program();
        let mut block = UniformBlock::for_program(&program);
        let before = block.clone();
        assert!(!block.set_mat4(&program, "model", &Mat4::IDENTITY));
        assert!(!block.set_mat4(&program, "tint", &Mat4::IDENTITY));
        assert_eq!(block, before);
    }

    #[test]
    fn set_vec4_at_member_offset() {
        let program = program();
        let mut block = UniformBlock::for_program(&program);
        assert!(block.set_vec4(&program, "tint", Vec4::ONE));
        assert_eq!(floats(&block.as_bytes()[64..80]), vec![1.0; 4]);
    }
}
