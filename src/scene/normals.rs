//! Vertex normal generation for shapes that ship without usable normals.

use crate::util::Vec3;

/// Area-weighted vertex normals for an indexed triangle list.
///
/// `positions` holds xyz triples; the result has the same length. Each
/// triangle adds its unnormalized face normal (twice its area) to its three
/// vertices. Vertices touched by no valid triangle get +Y.
pub fn vertex_normals(positions: &[f32], indices: &[u32]) -> Vec<f32> {
    let vertex_count = positions.len() / 3;
    let point = |i: usize| Vec3::new(positions[i * 3], positions[i * 3 + 1], positions[i * 3 + 2]);

    let mut acc = vec![Vec3::ZERO; vertex_count];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= vertex_count || b >= vertex_count || c >= vertex_count {
            continue;
        }
        let (pa, pb, pc) = (point(a), point(b), point(c));
        let face = (pb - pa).cross(pc - pa);
        acc[a] += face;
        acc[b] += face;
        acc[c] += face;
    }

    acc.into_iter()
        .flat_map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_quad_faces_up() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0, -1.0];
        let normals = vertex_normals(&positions, &[0, 1, 2, 0, 2, 3]);
        assert_eq!(normals.len(), positions.len());
        for n in normals.chunks_exact(3) {
            assert!((Vec3::from_slice(n) - Vec3::Y).length() < 1e-6);
        }
    }

    #[test]
    fn test_larger_face_dominates() {
        // Vertex 0 shared by a big +Z triangle and a small +X triangle
        let positions = [
            0.0, 0.0, 0.0, //
            4.0, 0.0, 0.0, //
            0.0, 4.0, 0.0, //
            0.0, 0.1, 0.0, //
            0.0, 0.0, -0.1,
        ];
        let normals = vertex_normals(&positions, &[0, 1, 2, 0, 3, 4]);
        let n0 = Vec3::from_slice(&normals[0..3]);
        assert!(n0.z > n0.x.abs() * 10.0);
    }

    #[test]
    fn test_unreferenced_vertex_defaults_up() {
        let positions = [0.0; 6];
        let normals = vertex_normals(&positions, &[]);
        assert_eq!(normals, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }
}
