//! Wavefront OBJ/MTL source backed by `tobj`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{MeshSource, RawMaterial, RawScene, RawShape};
use crate::util::{Error, Result, Vec3};

/// Reads triangulated, single-indexed OBJ files with their MTL libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjSource;

impl MeshSource for ObjSource {
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    fn load(&self, path: &Path, base: &Path) -> Result<RawScene> {
        let file = File::open(path).map_err(|e| Error::parse(format!("{}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);

        let (models, materials) =
            tobj::load_obj_buf(&mut reader, &tobj::GPU_LOAD_OPTIONS, |mtl| tobj::load_mtl(base.join(mtl)))
                .map_err(|e| Error::parse(format!("{}: {e}", path.display())))?;

        let materials = match materials {
            Ok(materials) => materials,
            Err(e) => {
                tracing::warn!("material library unavailable ({e}), using defaults");
                Vec::new()
            }
        };

        let shapes = models
            .into_iter()
            .map(|model| {
                let mesh = model.mesh;
                let triangles = mesh.indices.len() / 3;
                RawShape {
                    name: model.name,
                    positions: mesh.positions,
                    normals: mesh.normals,
                    texcoords: mesh.texcoords,
                    material_ids: vec![mesh.material_id; triangles],
                    indices: mesh.indices,
                }
            })
            .collect();

        Ok(RawScene {
            shapes,
            materials: materials.into_iter().map(convert_material).collect(),
        })
    }
}

fn convert_material(m: tobj::Material) -> RawMaterial {
    let defaults = RawMaterial::default();
    let emission = m.emissive.map(Vec3::from_array).unwrap_or(defaults.emission);
    // `Tr` is the inverse of `d`; `d` wins when both are present.
    let opacity = m.dissolve.or_else(|| {
        m.unknown_param
            .get("Tr")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .map(|tr| 1.0 - tr)
    });

    RawMaterial {
        diffuse: m.diffuse.map(Vec3::from_array).unwrap_or(defaults.diffuse),
        specular: m.specular.map(Vec3::from_array).unwrap_or(defaults.specular),
        emission,
        diffuse_texture: m.diffuse_texture,
        normal_texture: m.normal_texture,
        opacity: opacity.unwrap_or(defaults.opacity),
        name: m.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const QUAD: &str = "mtllib quad.mtl
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl red
f 1/1 2/2 3/3 4/4
";

    const MTL: &str = "newmtl red
Kd 0.8 0.1 0.1
Ks 0.5 0.5 0.5
d 0.25
map_Kd red.png
map_Bump red_n.png

newmtl lamp
Kd 1 1 1
Ke 4 4 3
";

    #[test]
    fn test_load_quad_with_material() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("quad.obj"), QUAD).unwrap();
        fs::write(dir.path().join("quad.mtl"), MTL).unwrap();

        let scene = ObjSource.load(&dir.path().join("quad.obj"), dir.path()).unwrap();
        assert_eq!(scene.shapes.len(), 1);
        let shape = &scene.shapes[0];
        assert_eq!(shape.vertex_count(), 4);
        assert_eq!(shape.triangle_count(), 2);
        assert_eq!(shape.texcoords.len(), 8);
        assert!(shape.normals.is_empty());
        assert_eq!(shape.material_ids, vec![Some(0), Some(0)]);

        assert_eq!(scene.materials.len(), 2);
        let red = &scene.materials[0];
        assert_eq!(red.name, "red");
        assert_eq!(red.opacity, 0.25);
        assert_eq!(red.diffuse_texture.as_deref(), Some("red.png"));
        assert_eq!(red.normal_texture.as_deref(), Some("red_n.png"));
        assert_eq!(red.specular, Vec3::splat(0.5));
        assert_eq!(scene.materials[1].emission, Vec3::new(4.0, 4.0, 3.0));
    }

    #[test]
    fn test_missing_library_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("quad.obj"), QUAD).unwrap();

        let scene = ObjSource.load(&dir.path().join("quad.obj"), dir.path()).unwrap();
        assert!(scene.materials.is_empty());
        assert_eq!(scene.shapes[0].triangle_count(), 2);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = ObjSource
            .load(Path::new("/nope/scene.obj"), Path::new("/nope"))
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_tr_is_inverse_opacity() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("quad.obj"), QUAD).unwrap();
        fs::write(
            dir.path().join("quad.mtl"),
            "newmtl red\nKd 1 1 1\nTr 0.7\n\nnewmtl both\nd 0.9\nTr 0.7\n",
        )
        .unwrap();

        let scene = ObjSource.load(&dir.path().join("quad.obj"), dir.path()).unwrap();
        let red = &scene.materials[0];
        assert!((red.opacity - 0.3).abs() < 1e-6);
        assert!(red.emission == Vec3::ZERO);
        // `d` wins over `Tr`
        assert!((scene.materials[1].opacity - 0.9).abs() < 1e-6);
    }
}
