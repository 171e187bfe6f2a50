//! Renderable scene: flattened geometry, compiled materials, textures and
//! lights.
//!
//! A [`Scene`] is produced by [`SceneBuilder`], then shared read-only with
//! render workers behind a [`SharedScene`] lock. Only the driving thread
//! mutates it, through methods that record what changed in [`DirtyFlags`]
//! and bump the revision counters devices use to invalidate cached state.

mod builder;
mod camera;
mod normals;

pub use builder::*;
pub use camera::*;
pub use normals::vertex_normals;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::material::{MaterialEdit, MaterialGraph, ShadingParams};
use crate::texture::{ImageLoader, TextureCache};
use crate::util::{rotation_y_about, Bounds3, Mat4, Quat, Result, Vec2, Vec3};

/// Scene shared between the driving thread and render workers.
pub type SharedScene = Arc<RwLock<Scene>>;

/// One input shape's slice of the flattened buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub name: String,
    /// First element of this shape in [`Scene::indices`].
    pub start_index: usize,
    /// Number of triangles.
    pub primitive_count: usize,
    /// First vertex of this shape in the vertex streams.
    pub start_vertex: usize,
    pub vertex_count: usize,
    pub transform: Mat4,
    pub linear_velocity: Vec3,
    pub angular_velocity: Quat,
}

/// A triangle whose compiled material emits light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emissive {
    pub shape: usize,
    /// Triangle index within the shape.
    pub primitive: usize,
    pub material: usize,
}

/// Analytic light source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional {
        /// Direction light travels in.
        direction: Vec3,
        radiance: Vec3,
    },
    Point {
        position: Vec3,
        radiance: Vec3,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        radiance: Vec3,
        /// Cosine of the full-intensity cone angle.
        inner_cos: f32,
        /// Cosine of the falloff cone angle.
        outer_cos: f32,
    },
}

impl Light {
    /// Sun, key and spot lights of the preview rig.
    pub fn preview_rig() -> [Light; 3] {
        let warm = Vec3::new(1.0, 0.9, 0.6);
        [
            Light::Directional {
                direction: Vec3::new(-0.3, -1.0, -0.4).normalize(),
                radiance: Vec3::splat(2.0),
            },
            Light::Point {
                position: Vec3::new(-0.5, 1.7, 0.0),
                radiance: warm,
            },
            Light::Spot {
                position: Vec3::new(0.5, 1.5, 0.0),
                direction: Vec3::new(-0.5, -1.0, 0.1).normalize(),
                radiance: warm,
                inner_cos: std::f32::consts::FRAC_PI_8.cos(),
                outer_cos: std::f32::consts::FRAC_PI_4.cos(),
            },
        ]
    }
}

/// What changed since devices last consumed the scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub camera: bool,
    pub geometry: bool,
    pub materials: bool,
}

impl DirtyFlags {
    #[inline]
    pub fn any(&self) -> bool {
        self.camera || self.geometry || self.materials
    }
}

/// Flattened scene data.
#[derive(Debug, Default)]
pub struct Scene {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    /// Three per triangle, addressing the global vertex streams.
    pub indices: Vec<u32>,
    /// Compiled material node per triangle.
    pub material_ids: Vec<u32>,
    pub shapes: Vec<Shape>,
    pub materials: MaterialGraph,
    pub textures: TextureCache,
    pub emissives: Vec<Emissive>,
    pub lights: Vec<Light>,
    pub camera: PerspectiveCamera,
    pub environment: Option<usize>,
    pub background: Option<usize>,
    pub env_multiplier: f32,
    /// Accumulated environment rotation (radians).
    pub env_rotation: f32,
    /// Parameters new and edited nodes use.
    pub shading: ShadingParams,
    dirty: DirtyFlags,
    revision: u64,
    geometry_revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            env_multiplier: 1.0,
            ..Default::default()
        }
    }

    pub fn into_shared(self) -> SharedScene {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex indices of triangle `tri`.
    #[inline]
    pub fn triangle(&self, tri: usize) -> [usize; 3] {
        let i = &self.indices[tri * 3..tri * 3 + 3];
        [i[0] as usize, i[1] as usize, i[2] as usize]
    }

    /// Object-space bounds of all vertices.
    pub fn bounds(&self) -> Bounds3 {
        Bounds3::from_points(&self.vertices)
    }

    /// World-space bounds (shape transforms applied).
    pub fn world_bounds(&self) -> Bounds3 {
        let mut b = Bounds3::EMPTY;
        for shape in &self.shapes {
            for v in &self.vertices[shape.start_vertex..shape.start_vertex + shape.vertex_count] {
                b.expand_by_point(shape.transform.transform_point3(*v));
            }
        }
        b
    }

    #[inline]
    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Reset dirty flags once devices have picked up the changes.
    pub fn clear_dirty(&mut self) {
        self.dirty = DirtyFlags::default();
    }

    /// Bumped on every edit.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped when vertex positions or shape transforms change.
    #[inline]
    pub fn geometry_revision(&self) -> u64 {
        self.geometry_revision
    }

    fn touch(&mut self, flags: DirtyFlags) {
        self.dirty.camera |= flags.camera;
        self.dirty.geometry |= flags.geometry;
        self.dirty.materials |= flags.materials;
        if flags.geometry {
            self.geometry_revision += 1;
        }
        self.revision += 1;
    }

    /// Mutable camera access; marks the camera dirty.
    pub fn camera_mut(&mut self) -> &mut PerspectiveCamera {
        self.touch(DirtyFlags {
            camera: true,
            ..Default::default()
        });
        &mut self.camera
    }

    pub fn set_shape_transform(&mut self, shape: usize, transform: Mat4) {
        if let Some(s) = self.shapes.get_mut(shape) {
            s.transform = transform;
            self.touch(DirtyFlags {
                geometry: true,
                ..Default::default()
            });
        }
    }

    /// Store the edited value as the scene default and update matching
    /// nodes. Returns the number of nodes changed.
    pub fn apply_material_edit(&mut self, edit: MaterialEdit) -> usize {
        match edit {
            MaterialEdit::SpecularRoughness(v) => self.shading.specular_roughness = v,
            MaterialEdit::NormalMapIntensity(v) => self.shading.normal_map_intensity = v,
        }
        let changed = self.materials.apply(edit);
        self.touch(DirtyFlags {
            materials: true,
            ..Default::default()
        });
        tracing::debug!(?edit, changed, "material edit applied");
        changed
    }

    /// Add `delta` to the specular roughness, clamped to `[0.01, 1]`.
    pub fn adjust_specular_roughness(&mut self, delta: f32) -> usize {
        let value = (self.shading.specular_roughness + delta).clamp(0.01, 1.0);
        self.apply_material_edit(MaterialEdit::SpecularRoughness(value))
    }

    /// Add `delta` to the normal-map intensity, never below zero.
    pub fn adjust_normal_map_intensity(&mut self, delta: f32) -> usize {
        let value = (self.shading.normal_map_intensity + delta).max(0.0);
        self.apply_material_edit(MaterialEdit::NormalMapIntensity(value))
    }

    /// Rotate the environment by `angle` radians around world Y.
    ///
    /// Implemented by turning the camera and every shape about the camera
    /// position, so the view of the geometry is unchanged while the lighting
    /// direction moves.
    pub fn rotate_environment(&mut self, angle: f32) {
        let pivot = self.camera.position;
        let m = rotation_y_about(pivot, angle);
        self.camera.transform(&m);
        for shape in &mut self.shapes {
            shape.transform = m * shape.transform;
        }
        self.env_rotation += angle;
        self.touch(DirtyFlags {
            camera: true,
            geometry: true,
            ..Default::default()
        });
    }

    /// Load (or reuse) an environment map.
    pub fn set_environment(&mut self, loader: &dyn ImageLoader, path: &Path, multiplier: f32) -> Result<usize> {
        let index = self.textures.get_or_load(loader, path)?;
        self.environment = Some(index);
        self.env_multiplier = multiplier;
        self.touch(DirtyFlags {
            materials: true,
            ..Default::default()
        });
        Ok(index)
    }

    /// Load (or reuse) a background map seen by camera rays.
    pub fn set_background(&mut self, loader: &dyn ImageLoader, path: &Path) -> Result<usize> {
        let index = self.textures.get_or_load(loader, path)?;
        self.background = Some(index);
        self.touch(DirtyFlags {
            materials: true,
            ..Default::default()
        });
        Ok(index)
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
        self.touch(DirtyFlags {
            materials: true,
            ..Default::default()
        });
    }
}
