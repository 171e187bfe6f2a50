//! Mesh/material source collaborator.
//!
//! A [`MeshSource`] turns a scene file into flat, renderer-agnostic
//! [`RawScene`] data. Shapes carry per-vertex float streams and triangle
//! indices; materials carry the handful of fields the material compiler reads.

mod obj;

pub use obj::ObjSource;

use std::path::Path;

use crate::util::{Result, Vec3};

/// Raw material description as read from the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMaterial {
    pub name: String,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub emission: Vec3,
    /// Diffuse texture file name, relative to the scene's base directory.
    pub diffuse_texture: Option<String>,
    /// Normal-map texture file name, relative to the scene's base directory.
    pub normal_texture: Option<String>,
    /// 1.0 is fully opaque.
    pub opacity: f32,
}

impl Default for RawMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ZERO,
            emission: Vec3::ZERO,
            diffuse_texture: None,
            normal_texture: None,
            opacity: 1.0,
        }
    }
}

impl RawMaterial {
    /// Material used by triangles that reference no material at all.
    pub fn fallback() -> Self {
        Self {
            name: "default".into(),
            ..Default::default()
        }
    }
}

/// One shape: flat vertex streams plus triangles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawShape {
    pub name: String,
    /// xyz triples.
    pub positions: Vec<f32>,
    /// xyz triples; may be empty or mismatched.
    pub normals: Vec<f32>,
    /// uv pairs; may be empty or mismatched.
    pub texcoords: Vec<f32>,
    /// Three per triangle, relative to this shape's vertices.
    pub indices: Vec<u32>,
    /// One per triangle.
    pub material_ids: Vec<Option<usize>>,
}

impl RawShape {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Everything a source file yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawScene {
    pub shapes: Vec<RawShape>,
    pub materials: Vec<RawMaterial>,
}

/// Parses scene files into [`RawScene`]s.
pub trait MeshSource: Send + Sync {
    /// Load `path`; `base` is the directory material libraries and textures
    /// are resolved against.
    fn load(&self, path: &Path, base: &Path) -> Result<RawScene>;
}
