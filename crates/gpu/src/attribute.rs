use glam::{Mat4, Vec3};
use std::borrow::Cow;

/// Spacing along +X between generated instance transforms.
pub const INSTANCE_SPACING: f32 = 2.0;

/// Shape of one vertex attribute element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    /// 4x4 float matrix, bound as four consecutive vec4 locations.
    Mat4,
}

impl AttributeKind {
    /// Floats per element.
    pub fn components(self) -> u32 {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Mat4 => 16,
        }
    }

    /// Shader locations occupied by one element.
    pub fn slots(self) -> u32 {
        match self {
            Self::Mat4 => 4,
            _ => 1,
        }
    }

    /// Floats read through each location.
    pub fn slot_components(self) -> u32 {
        self.components() / self.slots()
    }

    /// Bytes per element.
    pub fn byte_size(self) -> u64 {
        self.components() as u64 * 4
    }

    pub fn from_components(components: u32) -> Option<Self> {
        match components {
            1 => Some(Self::Scalar),
            2 => Some(Self::Vec2),
            3 => Some(Self::Vec3),
            4 => Some(Self::Vec4),
            16 => Some(Self::Mat4),
            _ => None,
        }
    }
}

/// Raw float data plus how it binds to a program attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor<'a> {
    pub name: &'a str,
    pub kind: AttributeKind,
    pub data: &'a [f32],
    /// More than one instance makes the attribute advance per instance and
    /// regenerates its data for every instance.
    pub instances: u32,
}

impl<'a> AttributeDescriptor<'a> {
    pub fn per_vertex(name: &'a str, kind: AttributeKind, data: &'a [f32]) -> Self {
        Self {
            name,
            kind,
            data,
            instances: 1,
        }
    }

    pub fn per_instance(name: &'a str, kind: AttributeKind, data: &'a [f32], instances: u32) -> Self {
        Self {
            name,
            kind,
            data,
            instances,
        }
    }

    pub fn is_instanced(&self) -> bool {
        self.instances > 1
    }

    /// Data as uploaded.
    ///
    /// Instanced matrices are rebuilt as a row of transforms along +X, centred
    /// on the origin, each applied on top of the first supplied matrix (or
    /// identity). Other instanced kinds repeat the supplied elements until
    /// every instance has one.
    pub fn resolved_data(&self) -> Cow<'a, [f32]> {
        if !self.is_instanced() {
            return Cow::Borrowed(self.data);
        }
        let count = self.instances as usize;
        match self.kind {
            AttributeKind::Mat4 => {
                let base = self
                    .data
                    .get(..16)
                    .map(Mat4::from_cols_slice)
                    .unwrap_or(Mat4::IDENTITY);
                let half = (count as f32 - 1.0) * 0.5;
                let mut out = Vec::with_capacity(count * 16);
                for i in 0..count {
                    let offset = Vec3::X * (i as f32 - half) * INSTANCE_SPACING;
                    out.extend_from_slice(&(Mat4::from_translation(offset) * base).to_cols_array());
                }
                Cow::Owned(out)
            }
            kind => {
                let width = kind.components() as usize;
                let needed = count * width;
                if self.data.len() >= needed || self.data.len() < width {
                    return Cow::Borrowed(self.data);
                }
                Cow::Owned(self.data.iter().copied().cycle().take(needed).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_arity() {
        assert_eq!(AttributeKind::Vec3.slots(), 1);
        assert_eq!(AttributeKind::Vec3.slot_components(), 3);
        assert_eq!(AttributeKind::Mat4.slots(), 4);
        assert_eq!(AttributeKind::Mat4.slot_components(), 4);
        assert_eq!(AttributeKind::Mat4.byte_size(), 64);
        assert_eq!(AttributeKind::from_components(16), Some(AttributeKind::Mat4));
        assert_eq!(AttributeKind::from_components(5), None);
    }

    #[test]
    fn per_vertex_data_is_verbatim() {
        let data = [1.0, 2.0, 3.0];
        let desc = AttributeDescriptor::per_vertex("position", AttributeKind::Vec3, &data);
        assert!(matches!(desc.resolved_data(), Cow::Borrowed(_)));
    }

    #[test]
    fn instanced_matrices_are_regenerated() {
        let desc = AttributeDescriptor::per_instance("model", AttributeKind::Mat4, &[], 3);
        let data = desc.resolved_data();
        assert_eq!(data.len(), 48);
        let first = Mat4::from_cols_slice(&data[..16]);
        let last = Mat4::from_cols_slice(&data[32..]);
        assert_eq!(first.w_axis.x, -INSTANCE_SPACING);
        assert_eq!(last.w_axis.x, INSTANCE_SPACING);
    }

    #[test]
    fn instanced_matrices_keep_base_transform() {
        let base = Mat4::from_scale(Vec3::splat(2.0));
        let cols = base.to_cols_array();
        let desc = AttributeDescriptor::per_instance("model", AttributeKind::Mat4, &cols, 2);
        let data = desc.resolved_data();
        let first = Mat4::from_cols_slice(&data[..16]);
        assert_eq!(first.x_axis.x, 2.0);
    }

    #[test]
    fn instanced_vectors_repeat() {
        let color = [1.0, 0.0, 0.0, 1.0];
        let desc = AttributeDescriptor::per_instance("color", AttributeKind::Vec4, &color, 3);
        assert_eq!(desc.resolved_data().len(), 12);
    }
}
