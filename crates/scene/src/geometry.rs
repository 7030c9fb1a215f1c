use glam::Vec3;

/// Per-triangle normals broadcast to all three vertices.
///
/// `positions` holds whole triangles of three xyz vertices; a trailing
/// partial triangle is ignored. Degenerate triangles get a zero normal.
pub fn flat_normals(positions: &[f32]) -> Vec<f32> {
    let mut normals = Vec::with_capacity(positions.len());
    for tri in positions.chunks_exact(9) {
        let a = Vec3::from_slice(&tri[0..3]);
        let b = Vec3::from_slice(&tri[3..6]);
        let c = Vec3::from_slice(&tri[6..9]);
        let n = (b - a).cross(c - a).normalize_or_zero().to_array();
        for _ in 0..3 {
            normals.extend_from_slice(&n);
        }
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_triangle_one_normal() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = flat_normals(&positions);
        assert_eq!(normals, vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn winding_flips_the_normal() {
        let positions = [0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 2.0, 0.0, 0.0];
        assert_eq!(&flat_normals(&positions)[..3], &[0.0, 0.0, -1.0]);
    }

    #[test]
    fn degenerate_triangle_is_zero() {
        let positions = [1.0; 9];
        assert!(flat_normals(&positions).iter().all(|&n| n == 0.0));
    }
}
