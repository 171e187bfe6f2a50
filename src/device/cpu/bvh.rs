//! BVH node and triangle types for CPU traversal.
//!
//! Flat array layout:
//! - 32-byte nodes, index 0 is the root
//! - world-space triangles carrying shading attributes

use bytemuck::{Pod, Zeroable};

use crate::util::{Bounds3, Vec2, Vec3};

/// BVH node (32 bytes).
///
/// Internal node: `left_or_first` = left child index, `count` = 0; the right
/// child is always `left_or_first + 1`.
/// Leaf node: `left_or_first` = first slot in the triangle order, `count` > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub bounds: Bounds3,
    pub left_or_first: u32,
    pub count: u32,
}

impl BvhNode {
    pub const EMPTY: Self = Self {
        bounds: Bounds3::EMPTY,
        left_or_first: 0,
        count: 0,
    };

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// World-space triangle with per-vertex shading data.
#[derive(Debug, Clone)]
pub struct Triangle {
    pub v: [Vec3; 3],
    pub n: [Vec3; 3],
    pub uv: [Vec2; 3],
    /// Compiled material node.
    pub material: u32,
}

/// Ray/triangle intersection record.
#[derive(Debug, Clone, Copy)]
pub struct TriangleHit {
    pub t: f32,
    /// Barycentrics of `v[1]` and `v[2]`.
    pub b1: f32,
    pub b2: f32,
}

impl Triangle {
    pub fn bounds(&self) -> Bounds3 {
        Bounds3::from_points(&self.v)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.v[0] + self.v[1] + self.v[2]) / 3.0
    }

    /// Unnormalized geometric normal (length = twice the area).
    #[inline]
    pub fn face_normal(&self) -> Vec3 {
        (self.v[1] - self.v[0]).cross(self.v[2] - self.v[0])
    }

    pub fn area(&self) -> f32 {
        self.face_normal().length() * 0.5
    }

    /// Moller-Trumbore intersection within `(t_min, t_max)`.
    #[inline]
    pub fn intersect(&self, origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<TriangleHit> {
        let e1 = self.v[1] - self.v[0];
        let e2 = self.v[2] - self.v[0];
        let p = dir.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = origin - self.v[0];
        let b1 = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&b1) {
            return None;
        }
        let q = s.cross(e1);
        let b2 = dir.dot(q) * inv_det;
        if b2 < 0.0 || b1 + b2 > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > t_min && t < t_max).then_some(TriangleHit { t, b1, b2 })
    }

    /// Interpolated shading normal.
    #[inline]
    pub fn normal_at(&self, hit: &TriangleHit) -> Vec3 {
        let b0 = 1.0 - hit.b1 - hit.b2;
        (self.n[0] * b0 + self.n[1] * hit.b1 + self.n[2] * hit.b2)
            .try_normalize()
            .unwrap_or_else(|| self.face_normal().normalize_or_zero())
    }

    #[inline]
    pub fn uv_at(&self, hit: &TriangleHit) -> Vec2 {
        let b0 = 1.0 - hit.b1 - hit.b2;
        self.uv[0] * b0 + self.uv[1] * hit.b1 + self.uv[2] * hit.b2
    }

    /// Point at barycentrics `(b1, b2)`.
    #[inline]
    pub fn point_at(&self, b1: f32, b2: f32) -> Vec3 {
        self.v[0] * (1.0 - b1 - b2) + self.v[1] * b1 + self.v[2] * b2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> Triangle {
        Triangle {
            v: [Vec3::ZERO, Vec3::X, Vec3::Y],
            n: [Vec3::Z; 3],
            uv: [Vec2::ZERO, Vec2::X, Vec2::Y],
            material: 0,
        }
    }

    #[test]
    fn test_intersect_hit_and_miss() {
        let t = tri();
        let hit = t
            .intersect(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z, 1e-4, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 1.0).abs() < 1e-6);
        assert!((t.uv_at(&hit) - Vec2::new(0.25, 0.25)).length() < 1e-6);
        assert!(t
            .intersect(Vec3::new(0.9, 0.9, 1.0), Vec3::NEG_Z, 1e-4, f32::INFINITY)
            .is_none());
        assert!(t
            .intersect(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z, 1e-4, 0.5)
            .is_none());
    }

    #[test]
    fn test_node_size() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
        assert!((tri().area() - 0.5).abs() < 1e-6);
    }
}
