//! Scene construction from a [`MeshSource`].

use std::path::Path;

use super::{vertex_normals, Emissive, Scene, Shape};
use crate::material::{MaterialGraphCompiler, ShadingParams, SpecularPolicy};
use crate::source::{MeshSource, RawMaterial, RawShape};
use crate::texture::ImageLoader;
use crate::util::{Error, Mat4, Quat, Result, Vec2, Vec3};

/// Builds a [`Scene`] from a mesh source and an image loader.
pub struct SceneBuilder<'a> {
    source: &'a dyn MeshSource,
    loader: &'a dyn ImageLoader,
    shading: ShadingParams,
    policy: SpecularPolicy,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(source: &'a dyn MeshSource, loader: &'a dyn ImageLoader) -> Self {
        Self {
            source,
            loader,
            shading: ShadingParams::default(),
            policy: SpecularPolicy::default(),
        }
    }

    pub fn with_shading(mut self, shading: ShadingParams) -> Self {
        self.shading = shading;
        self
    }

    pub fn with_policy(mut self, policy: SpecularPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load `mesh_path` and build a scene. Textures resolve against `base_path`.
    ///
    /// Any failure is reported as [`Error::Load`]; no partial scene is returned.
    #[tracing::instrument(skip_all, fields(path = %mesh_path.display()))]
    pub fn build(&self, mesh_path: &Path, base_path: &Path) -> Result<Scene> {
        self.build_inner(mesh_path, base_path)
            .map_err(|e| Error::load(mesh_path, e))
    }

    fn build_inner(&self, mesh_path: &Path, base_path: &Path) -> Result<Scene> {
        let raw = self.source.load(mesh_path, base_path)?;

        let mut scene = Scene::new();
        scene.shading = self.shading;

        let Scene {
            materials,
            textures,
            ..
        } = &mut scene;
        let mut compiler = MaterialGraphCompiler::new(materials, textures, self.loader, base_path)
            .with_params(self.shading)
            .with_policy(self.policy);

        // raw material id -> compiled final node
        let compiled = raw
            .materials
            .iter()
            .map(|m| compiler.compile(m))
            .collect::<Result<Vec<_>>>()?;

        let mut fallback = None;
        let mut resolved = Vec::with_capacity(raw.shapes.len());
        for (s, shape) in raw.shapes.iter().enumerate() {
            let mut ids = Vec::with_capacity(shape.material_ids.len());
            for id in &shape.material_ids {
                let index = match *id {
                    Some(id) => *compiled.get(id).ok_or_else(|| {
                        Error::parse(format!(
                            "shape '{}' references material {id}, only {} defined",
                            shape.name,
                            compiled.len()
                        ))
                    })?,
                    None => match fallback {
                        Some(index) => index,
                        None => {
                            let index = compiler.compile(&RawMaterial::fallback())?;
                            fallback = Some(index);
                            index
                        }
                    },
                };
                ids.push(index as u32);
            }
            check_shape(s, shape)?;
            resolved.push(ids);
        }
        drop(compiler);

        for (shape, ids) in raw.shapes.iter().zip(resolved) {
            append_shape(&mut scene, shape, ids);
        }

        // Scene-wide fallback keeps the UV stream aligned when nothing had UVs
        if scene.uvs.is_empty() {
            scene.uvs.resize(scene.normals.len(), Vec2::ZERO);
        }

        scene.materials.validate()?;

        tracing::info!(
            objects = scene.shapes.len(),
            textures = scene.textures.len(),
            emissives = scene.emissives.len(),
            materials = scene.materials.len(),
            "scene loaded"
        );
        Ok(scene)
    }
}

fn check_shape(index: usize, shape: &RawShape) -> Result<()> {
    let name = if shape.name.is_empty() {
        format!("#{index}")
    } else {
        shape.name.clone()
    };
    if shape.positions.len() % 3 != 0 {
        return Err(Error::parse(format!("shape '{name}': position stream is not xyz triples")));
    }
    if shape.indices.len() % 3 != 0 {
        return Err(Error::parse(format!("shape '{name}': index count is not a multiple of 3")));
    }
    if shape.material_ids.len() != shape.triangle_count() {
        return Err(Error::parse(format!(
            "shape '{name}': {} material ids for {} triangles",
            shape.material_ids.len(),
            shape.triangle_count()
        )));
    }
    let vertex_count = shape.vertex_count();
    if let Some(bad) = shape.indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(Error::parse(format!(
            "shape '{name}': index {bad} out of range for {vertex_count} vertices"
        )));
    }
    Ok(())
}

fn append_shape(scene: &mut Scene, shape: &RawShape, material_ids: Vec<u32>) {
    let vertex_count = shape.vertex_count();
    let start_vertex = scene.vertices.len();
    let start_index = scene.indices.len();
    let start_primitive = scene.triangle_count();

    scene
        .vertices
        .extend(shape.positions.chunks_exact(3).map(Vec3::from_slice));

    if shape.normals.len() == shape.positions.len() {
        scene.normals.extend(shape.normals.chunks_exact(3).map(Vec3::from_slice));
    } else {
        let generated = vertex_normals(&shape.positions, &shape.indices);
        scene.normals.extend(generated.chunks_exact(3).map(Vec3::from_slice));
    }

    if shape.texcoords.len() / 2 == vertex_count {
        scene.uvs.extend(shape.texcoords.chunks_exact(2).map(Vec2::from_slice));
    } else {
        scene.uvs.extend(std::iter::repeat(Vec2::ZERO).take(vertex_count));
    }

    let base = start_vertex as u32;
    scene.indices.extend(shape.indices.iter().map(|i| i + base));

    let shape_index = scene.shapes.len();
    for (primitive, &material) in material_ids.iter().enumerate() {
        if scene.materials[material as usize].is_emissive() {
            scene.emissives.push(Emissive {
                shape: shape_index,
                primitive,
                material: material as usize,
            });
        }
    }
    scene.material_ids.extend(material_ids);

    scene.shapes.push(Shape {
        name: shape.name.clone(),
        start_index,
        primitive_count: scene.triangle_count() - start_primitive,
        start_vertex,
        vertex_count,
        transform: Mat4::IDENTITY,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Quat::IDENTITY,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Material, MaterialKind};
    use crate::source::RawScene;
    use crate::texture::tests::CountingLoader;

    struct MemorySource(RawScene);

    impl MeshSource for MemorySource {
        fn load(&self, _path: &Path, _base: &Path) -> Result<RawScene> {
            Ok(self.0.clone())
        }
    }

    fn quad(material: Option<usize>) -> RawShape {
        RawShape {
            name: "quad".into(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0].repeat(4),
            texcoords: Vec::new(),
            indices: vec![0, 1, 2, 0, 2, 3],
            material_ids: vec![material; 2],
        }
    }

    fn material(opacity: f32) -> RawMaterial {
        RawMaterial {
            name: "paint".into(),
            opacity,
            ..Default::default()
        }
    }

    fn build(raw: RawScene) -> Result<Scene> {
        let source = MemorySource(raw);
        let loader = CountingLoader::default();
        SceneBuilder::new(&source, &loader).build(Path::new("mem.obj"), Path::new("."))
    }

    #[test]
    fn test_two_shapes_offset_indices() {
        let mut second = quad(Some(0));
        second.texcoords = vec![0.0; 8];
        let scene = build(RawScene {
            shapes: vec![quad(Some(0)), second],
            materials: vec![material(1.0)],
        })
        .unwrap();

        assert_eq!(scene.vertices.len(), 8);
        assert_eq!(scene.normals.len(), 8);
        assert_eq!(scene.uvs.len(), 8);
        assert_eq!(&scene.indices[6..], &[4, 5, 6, 4, 6, 7]);
        assert_eq!(scene.shapes[1].start_vertex, 4);
        assert_eq!(scene.shapes[1].start_index, 6);
        assert_eq!(scene.material_ids, vec![2; 4]);
        assert!(scene.emissives.is_empty());
    }

    #[test]
    fn test_missing_normals_generated() {
        let mut shape = quad(Some(0));
        shape.normals.clear();
        let scene = build(RawScene {
            shapes: vec![shape],
            materials: vec![material(1.0)],
        })
        .unwrap();
        assert_eq!(scene.normals.len(), 4);
        assert!((scene.normals[0] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_unassigned_triangles_share_default_material() {
        let scene = build(RawScene {
            shapes: vec![quad(None), quad(None)],
            materials: vec![],
        })
        .unwrap();
        assert_eq!(scene.materials.len(), 3);
        assert_eq!(scene.materials.name(2), Some("default"));
        assert!(scene.material_ids.iter().all(|&m| m == 2));
    }

    #[test]
    fn test_uv_stream_matches_normals_without_uvs() {
        // Neither shape has a usable UV stream
        let mut short = quad(Some(0));
        short.texcoords = vec![0.5; 3];
        let mut bare = quad(Some(0));
        bare.normals.clear();
        let empty = RawShape {
            name: "empty".into(),
            ..Default::default()
        };

        let scene = build(RawScene {
            shapes: vec![short, empty, bare],
            materials: vec![material(1.0)],
        })
        .unwrap();

        assert_eq!(scene.shapes.len(), 3);
        assert_eq!(scene.shapes[1].vertex_count, 0);
        assert_eq!(scene.shapes[1].primitive_count, 0);
        assert_eq!(scene.vertices.len(), 8);
        assert_eq!(scene.uvs.len(), scene.normals.len());
        assert_eq!(scene.uvs.len(), scene.vertices.len());
        assert!(scene.uvs.iter().all(|&uv| uv == Vec2::ZERO));
    }

    #[test]
    fn test_zero_vertex_scene_keeps_streams_aligned() {
        let scene = build(RawScene {
            shapes: vec![RawShape::default()],
            materials: vec![],
        })
        .unwrap();

        assert_eq!(scene.shapes.len(), 1);
        assert_eq!(scene.triangle_count(), 0);
        assert!(scene.normals.is_empty());
        assert_eq!(scene.uvs.len(), scene.normals.len());
        assert!(scene.materials.is_empty());
    }

    #[test]
    fn test_emissive_triangles_recorded() {
        let lamp = RawMaterial {
            name: "lamp".into(),
            emission: Vec3::splat(3.0),
            ..Default::default()
        };
        let scene = build(RawScene {
            shapes: vec![quad(Some(1))],
            materials: vec![material(1.0), lamp],
        })
        .unwrap();

        assert_eq!(scene.emissives.len(), 2);
        assert_eq!(scene.emissives[1].primitive, 1);
        assert_eq!(scene.materials[scene.emissives[0].material].kind(), MaterialKind::Emissive);
        assert!(matches!(scene.materials[3], Material::Emissive { .. }));
    }

    #[test]
    fn test_bad_material_id_is_load_error() {
        let err = build(RawScene {
            shapes: vec![quad(Some(4))],
            materials: vec![material(1.0)],
        })
        .unwrap_err();
        match err {
            Error::Load { source, .. } => assert!(matches!(*source, Error::Parse(_))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_index_is_load_error() {
        let mut shape = quad(Some(0));
        shape.indices[5] = 9;
        let err = build(RawScene {
            shapes: vec![shape],
            materials: vec![material(1.0)],
        })
        .unwrap_err();
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_compiled_material_flags_transparency() {
        let scene = build(RawScene {
            shapes: vec![quad(Some(0))],
            materials: vec![material(0.3)],
        })
        .unwrap();
        assert_eq!(scene.materials.len(), 5);
        assert_eq!(scene.materials[4].blend_weight(), Some(0.3));
        assert_eq!(scene.material_ids, vec![4, 4]);
    }
}
