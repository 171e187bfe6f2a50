//! Progressive CPU path tracer.
//!
//! Scene geometry is baked into world-space triangles with an SAH BVH at
//! preprocess time and rebuilt whenever the scene's geometry revision moves.
//! Each [`render`](RenderDevice::render) call traces one sample per pixel,
//! rows in parallel on the rayon pool.

mod build;
mod bvh;
mod kernel;

use rayon::prelude::*;

use self::build::{build_bvh, Bvh};
use self::bvh::Triangle;
use self::kernel::{KernelScene, Pcg32};
use super::{DeviceInfo, DeviceKind, RenderDevice};
use crate::scene::Scene;
use crate::util::{Error, Mat3, Result, UVec2, Vec2, Vec4};

/// Default number of indirect bounces.
pub const DEFAULT_BOUNCES: u32 = 5;

/// Reference [`RenderDevice`] running on the host CPU.
pub struct CpuDevice {
    info: DeviceInfo,
    width: u32,
    height: u32,
    output: Vec<Vec4>,
    staging: Vec<Vec4>,
    bounces: u32,
    samples: u32,
    /// Distinguishes the random streams of several CPU devices.
    seed: u64,
    triangles: Vec<Triangle>,
    bvh: Option<Bvh>,
    geometry_revision: Option<u64>,
}

impl CpuDevice {
    /// Create device number `index`.
    pub fn new(index: usize) -> Self {
        let threads = rayon::current_num_threads() as u32;
        Self {
            info: DeviceInfo {
                name: format!("cpu{index}"),
                vendor: "host".into(),
                kind: DeviceKind::Cpu,
                compute_units: threads,
            },
            width: 0,
            height: 0,
            output: Vec::new(),
            staging: Vec::new(),
            bounces: DEFAULT_BOUNCES,
            samples: 0,
            seed: (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
            triangles: Vec::new(),
            bvh: None,
            geometry_revision: None,
        }
    }

    pub fn bounces(&self) -> u32 {
        self.bounces
    }

    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.pixel_count() {
            return Err(Error::device(
                &self.info.name,
                format!("{what} holds {len} pixels, output has {}", self.pixel_count()),
            ));
        }
        Ok(())
    }
}

/// Bake every shape into world-space triangles.
fn bake_triangles(scene: &Scene) -> Vec<Triangle> {
    let mut triangles = Vec::with_capacity(scene.triangle_count());
    for shape in &scene.shapes {
        let normal_matrix = Mat3::from_mat4(shape.transform).inverse().transpose();
        let first = shape.start_index / 3;
        for tri in first..first + shape.primitive_count {
            let idx = scene.triangle(tri);
            let v = idx.map(|i| shape.transform.transform_point3(scene.vertices[i]));
            let n = idx.map(|i| (normal_matrix * scene.normals[i]).normalize_or_zero());
            let uv = idx.map(|i| scene.uvs.get(i).copied().unwrap_or(Vec2::ZERO));
            triangles.push(Triangle {
                v,
                n,
                uv,
                material: scene.material_ids[tri],
            });
        }
    }
    triangles
}

impl RenderDevice for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[tracing::instrument(skip_all, fields(device = %self.info.name))]
    fn preprocess(&mut self, scene: &Scene) -> Result<()> {
        self.triangles = bake_triangles(scene);
        self.bvh = Some(build_bvh(&self.triangles));
        self.geometry_revision = Some(scene.geometry_revision());
        tracing::debug!(triangles = self.triangles.len(), "acceleration structure built");
        Ok(())
    }

    fn render(&mut self, scene: &Scene) -> Result<()> {
        if self.pixel_count() == 0 {
            return Err(Error::device(&self.info.name, "render before create_output"));
        }
        if self.geometry_revision != Some(scene.geometry_revision()) {
            self.preprocess(scene)?;
        }
        let Some(bvh) = self.bvh.as_ref() else {
            return Err(Error::device(&self.info.name, "render before preprocess"));
        };

        let kernel = KernelScene {
            scene,
            triangles: &self.triangles,
            bvh,
            bounces: self.bounces,
        };
        let (width, height) = (self.width as usize, self.height as usize);
        let pass_seed = self.seed ^ (self.samples as u64).wrapping_mul(0x2545_f491_4f6c_dd1d);

        self.output
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate() {
                    let mut rng = Pcg32::new((y * width + x) as u64, pass_seed);
                    let jitter = rng.next_vec2();
                    // Rows are stored top-down
                    let film = Vec2::new(
                        (x as f32 + jitter.x) / width as f32,
                        1.0 - (y as f32 + jitter.y) / height as f32,
                    );
                    let l = kernel.radiance(film, &mut rng);
                    if l.is_finite() {
                        *px += l.extend(1.0);
                    } else {
                        px.w += 1.0;
                    }
                }
            });

        self.samples += 1;
        Ok(())
    }

    fn clear(&mut self, color: Vec4) -> Result<()> {
        self.output.fill(color);
        self.samples = 0;
        Ok(())
    }

    fn set_num_bounces(&mut self, bounces: u32) {
        self.bounces = bounces;
    }

    fn create_output(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::device(&self.info.name, format!("invalid output size {width}x{height}")));
        }
        self.width = width;
        self.height = height;
        self.output = vec![Vec4::ZERO; self.pixel_count()];
        self.staging = vec![Vec4::ZERO; self.pixel_count()];
        self.samples = 0;
        Ok(())
    }

    fn output_size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    fn read_output(&self, host: &mut [Vec4]) -> Result<()> {
        self.check_len(host.len(), "host buffer")?;
        host.copy_from_slice(&self.output);
        Ok(())
    }

    fn write_staging(&mut self, partial: &[Vec4]) -> Result<()> {
        self.check_len(partial.len(), "partial result")?;
        self.staging.copy_from_slice(partial);
        Ok(())
    }

    fn accumulate_staging(&mut self) -> Result<()> {
        self.output
            .par_iter_mut()
            .zip(self.staging.par_iter())
            .for_each(|(acc, add)| *acc += *add);
        Ok(())
    }

    fn sample_count(&self) -> u32 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::scene::{Light, PerspectiveCamera, Shape};
    use crate::util::{Mat4, Quat, Vec3};

    /// Floor quad facing a camera above it, lit by a directional light.
    fn lit_floor(material: Material) -> Scene {
        let mut scene = Scene::new();
        scene.vertices = vec![
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(-10.0, 0.0, 10.0),
        ];
        scene.normals = vec![Vec3::Y; 4];
        scene.uvs = vec![Vec2::ZERO; 4];
        scene.indices = vec![0, 2, 1, 0, 3, 2];
        scene.material_ids = vec![0, 0];
        scene.materials.push(material, "floor").unwrap();
        scene.shapes.push(Shape {
            name: "floor".into(),
            start_index: 0,
            primitive_count: 2,
            start_vertex: 0,
            vertex_count: 4,
            transform: Mat4::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Quat::IDENTITY,
        });
        scene.lights.push(Light::Directional {
            direction: Vec3::NEG_Y,
            radiance: Vec3::ONE,
        });
        scene.camera = PerspectiveCamera::looking_at(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, Vec3::Z);
        scene
    }

    fn lambert() -> Material {
        Material::Lambert {
            color: Vec3::splat(0.5),
            intensity: 4.0,
            diffuse_map: None,
            normal_map: None,
        }
    }

    #[test]
    fn test_render_accumulates_weight() {
        let scene = lit_floor(lambert());
        let mut dev = CpuDevice::new(0);
        dev.create_output(8, 4).unwrap();
        dev.preprocess(&scene).unwrap();
        dev.set_num_bounces(1);
        dev.render(&scene).unwrap();
        dev.render(&scene).unwrap();
        assert_eq!(dev.sample_count(), 2);

        let mut host = vec![Vec4::ZERO; 32];
        dev.read_output(&mut host).unwrap();
        for px in &host {
            assert_eq!(px.w, 2.0);
            // Direct term alone: albedo / pi * cos(0) * radiance
            assert!(px.x / px.w >= 0.5 / std::f32::consts::PI - 1e-3);
        }
    }

    #[test]
    fn test_emissive_surface_is_seen_directly() {
        let scene = lit_floor(Material::Emissive {
            color: Vec3::new(2.0, 1.0, 0.5),
        });
        let mut dev = CpuDevice::new(0);
        dev.create_output(2, 2).unwrap();
        dev.preprocess(&scene).unwrap();
        dev.render(&scene).unwrap();
        let mut host = vec![Vec4::ZERO; 4];
        dev.read_output(&mut host).unwrap();
        for px in host {
            assert_eq!(px, Vec4::new(2.0, 1.0, 0.5, 1.0));
        }
    }

    #[test]
    fn test_clear_and_staging_merge() {
        let mut dev = CpuDevice::new(1);
        dev.create_output(2, 1).unwrap();
        dev.clear(Vec4::ZERO).unwrap();
        dev.write_staging(&[Vec4::new(1.0, 1.0, 1.0, 1.0), Vec4::new(2.0, 0.0, 0.0, 3.0)])
            .unwrap();
        dev.accumulate_staging().unwrap();
        dev.accumulate_staging().unwrap();

        let mut host = vec![Vec4::ZERO; 2];
        dev.read_output(&mut host).unwrap();
        assert_eq!(host[1], Vec4::new(4.0, 0.0, 0.0, 6.0));

        assert!(dev.write_staging(&[Vec4::ZERO]).is_err());
        assert!(dev.read_output(&mut [Vec4::ZERO; 3]).is_err());
    }

    #[test]
    fn test_render_without_output_fails() {
        let scene = lit_floor(lambert());
        let mut dev = CpuDevice::new(0);
        assert!(matches!(dev.render(&scene), Err(Error::Device { .. })));
    }

    #[test]
    fn test_transform_edit_triggers_rebake() {
        let mut scene = lit_floor(lambert());
        let mut dev = CpuDevice::new(0);
        dev.create_output(1, 1).unwrap();
        dev.preprocess(&scene).unwrap();

        scene.set_shape_transform(0, Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)));
        dev.render(&scene).unwrap();
        assert_eq!(dev.geometry_revision, Some(scene.geometry_revision()));
        assert!((dev.triangles[0].v[0].y + 1.0).abs() < 1e-6);
    }
}
