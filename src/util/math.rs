//! Math type re-exports and scene-space helpers.
//!
//! This module re-exports the `glam` types used throughout the crate and
//! provides a bounding box used for camera framing and BVH construction.

pub use glam::{Mat3, Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// 3D bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Bounds3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds3 {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounding box of a point cloud.
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_by_point(*p);
        }
        b
    }

    /// Check if this box is empty (contains no point).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the box diagonal, 0 for an empty box.
    #[inline]
    pub fn diagonal(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.size().length()
        }
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Slab test. Returns the entry distance if the ray hits within `[0, t_max]`.
    #[inline]
    pub fn intersect(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Bounds3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bounds3({:?} - {:?})", self.min, self.max)
    }
}

/// Rotation by `angle` radians around the world Y axis, pivoting on `pivot`.
///
/// Equivalent to `translate(pivot) * rotate_y(angle) * translate(-pivot)`.
pub fn rotation_y_about(pivot: Vec3, angle: f32) -> Mat4 {
    Mat4::from_translation(pivot) * Mat4::from_rotation_y(angle) * Mat4::from_translation(-pivot)
}

/// Rec.709 luminance.
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut b = Bounds3::EMPTY;
        assert!(b.is_empty());
        assert_eq!(b.diagonal(), 0.0);

        b.expand_by_point(Vec3::ZERO);
        assert!(!b.is_empty());

        b.expand_by_point(Vec3::ONE);
        assert_eq!(b.center(), Vec3::splat(0.5));
        assert_eq!(b.size(), Vec3::ONE);
        assert!((b.diagonal() - 3f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_slab_hit_and_miss() {
        let b = Bounds3::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let origin = Vec3::new(0.0, 0.0, 5.0);
        let dir = Vec3::new(0.0, 0.0, -1.0);
        let hit = b.intersect(origin, dir.recip(), f32::INFINITY);
        assert!((hit.unwrap() - 4.0).abs() < 1e-5);

        let miss_dir = Vec3::new(0.0, 1.0, 0.0);
        assert!(b.intersect(origin, miss_dir.recip(), f32::INFINITY).is_none());
    }

    #[test]
    fn test_rotation_about_pivot_keeps_pivot() {
        let pivot = Vec3::new(2.0, 1.0, -3.0);
        let m = rotation_y_about(pivot, 0.7);
        let p = m.transform_point3(pivot);
        assert!((p - pivot).length() < 1e-5);
    }
}
