//! Path tracing kernel: material graph evaluation, light sampling and the
//! per-pixel estimator.

use std::f32::consts::{FRAC_1_PI, PI};

use super::build::Bvh;
use super::bvh::{Triangle, TriangleHit};
use crate::material::Material;
use crate::scene::{Light, Scene};
use crate::util::{luminance, Vec2, Vec3};

/// Offset applied to secondary ray origins.
const RAY_EPSILON: f32 = 1e-4;
/// Passthrough surfaces crossed before a path is terminated.
const MAX_PASSTHROUGH: u32 = 16;
/// Bounce after which Russian roulette kicks in.
const ROULETTE_DEPTH: u32 = 3;
/// Schlick exponent used when a blend's top node does not specify one.
const SCHLICK_EXPONENT: f32 = 5.0;

const PCG_MULT: u64 = 6364136223846793005;
const PCG_INIT: u64 = 0x853c49e6748fea9b;

/// PCG32 random number generator, one stream per pixel.
pub(crate) struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    pub(crate) fn new(idx: u64, seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: ((idx + 1) << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(PCG_INIT.wrapping_add(seed));
        rng.next_u32();
        rng
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULT).wrapping_add(self.inc | 1);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform in `[0, 1)`.
    pub(crate) fn next_f32(&mut self) -> f32 {
        let u = self.next_u32();
        let bits = (u >> 9) | 0x3f800000;
        f32::from_bits(bits) - 1.0
    }

    pub(crate) fn next_vec2(&mut self) -> Vec2 {
        Vec2::new(self.next_f32(), self.next_f32())
    }
}

/// Everything the kernel reads during one pass.
pub(crate) struct KernelScene<'a> {
    pub scene: &'a Scene,
    pub triangles: &'a [Triangle],
    pub bvh: &'a Bvh,
    pub bounces: u32,
}

/// Surface point being shaded.
struct Surface {
    p: Vec3,
    /// Shading normal facing the incoming ray.
    n: Vec3,
    uv: Vec2,
}

/// Leaf reached by resolving the material graph at a surface point.
enum Leaf {
    Diffuse { albedo: Vec3, n: Vec3 },
    Glossy { color: Vec3, alpha: f32, n: Vec3 },
    Pass,
    Emit(Vec3),
}

impl KernelScene<'_> {
    /// Radiance estimate for the camera ray through `film`.
    pub(crate) fn radiance(&self, film: Vec2, rng: &mut Pcg32) -> Vec3 {
        let (mut origin, mut dir) = self.scene.camera.generate_ray(film, rng.next_vec2());
        let mut throughput = Vec3::ONE;
        let mut radiance = Vec3::ZERO;
        let mut bounce = 0;
        let mut passthrough = 0;

        loop {
            let Some(hit) = self.bvh.intersect(self.triangles, origin, dir, RAY_EPSILON, f32::INFINITY) else {
                let camera_ray = bounce == 0 && passthrough == 0;
                radiance += throughput * self.miss(dir, film, camera_ray);
                break;
            };

            let tri = &self.triangles[hit.triangle];
            let surface = surface_at(tri, &hit.tri, origin + dir * hit.tri.t, dir);
            let wo = -dir;

            match self.resolve(tri.material as usize, &surface, wo, rng) {
                Leaf::Emit(color) => {
                    radiance += throughput * color;
                    break;
                }
                Leaf::Pass => {
                    passthrough += 1;
                    if passthrough > MAX_PASSTHROUGH {
                        break;
                    }
                    origin = surface.p + dir * RAY_EPSILON;
                    continue;
                }
                leaf => {
                    radiance += throughput * self.direct(&leaf, &surface, wo);
                    if bounce >= self.bounces {
                        break;
                    }
                    let Some((wi, weight)) = sample_leaf(&leaf, wo, rng) else {
                        break;
                    };
                    throughput *= weight;
                    origin = surface.p + surface.n * RAY_EPSILON * wi.dot(surface.n).signum();
                    dir = wi;
                }
            }

            bounce += 1;
            if bounce > ROULETTE_DEPTH {
                let survive = luminance(throughput).clamp(0.05, 0.95);
                if rng.next_f32() >= survive {
                    break;
                }
                throughput /= survive;
            }
        }

        radiance
    }

    fn miss(&self, dir: Vec3, film: Vec2, camera_ray: bool) -> Vec3 {
        let textures = &self.scene.textures;
        if camera_ray {
            if let Some(bg) = self.scene.background.and_then(|i| textures.sample(i, film)) {
                return bg.truncate();
            }
        }
        self.scene
            .environment
            .and_then(|i| textures.sample(i, equirect_uv(dir)))
            .map(|c| c.truncate() * self.scene.env_multiplier)
            .unwrap_or(Vec3::ZERO)
    }

    /// Walk the material graph from `index` down to a leaf, choosing
    /// composite branches stochastically.
    fn resolve(&self, mut index: usize, s: &Surface, wo: Vec3, rng: &mut Pcg32) -> Leaf {
        let graph = &self.scene.materials;
        let textures = &self.scene.textures;
        loop {
            let Some(node) = graph.get(index) else {
                return Leaf::Diffuse {
                    albedo: Vec3::splat(0.5),
                    n: s.n,
                };
            };
            match *node {
                Material::Lambert {
                    color,
                    intensity,
                    diffuse_map,
                    normal_map,
                } => {
                    let albedo = diffuse_map
                        .and_then(|t| textures.sample(t, s.uv))
                        .map_or(color, |c| color * c.truncate());
                    let n = self.perturb(normal_map, intensity, s);
                    return Leaf::Diffuse { albedo, n };
                }
                Material::MicrofacetGgx {
                    color,
                    roughness,
                    normal_map,
                    ..
                } => {
                    let n = self.perturb(normal_map, 1.0, s);
                    let alpha = (roughness * roughness).max(1e-3);
                    return Leaf::Glossy { color, alpha, n };
                }
                Material::Passthrough => return Leaf::Pass,
                Material::Emissive { color } => return Leaf::Emit(color),
                Material::FresnelBlend {
                    ior,
                    fresnel,
                    two_sided,
                    top,
                    base,
                } => {
                    let mut cos = s.n.dot(wo);
                    if two_sided {
                        cos = cos.abs();
                    }
                    let exponent = match graph.get(top) {
                        Some(Material::MicrofacetGgx { fresnel, .. }) => *fresnel,
                        _ => SCHLICK_EXPONENT,
                    };
                    let p = (fresnel * schlick(cos.max(0.0), ior, exponent)).clamp(0.0, 1.0);
                    index = if rng.next_f32() < p { top } else { base };
                }
                Material::Mix {
                    weight,
                    mask,
                    top,
                    base,
                } => {
                    let coverage = mask
                        .and_then(|t| textures.sample(t, s.uv))
                        .map_or(1.0, |c| c.w);
                    index = if rng.next_f32() < weight * coverage { base } else { top };
                }
            }
        }
    }

    /// Apply a tangent-space normal map around the geometric frame.
    fn perturb(&self, normal_map: Option<usize>, intensity: f32, s: &Surface) -> Vec3 {
        let Some(texel) = normal_map.and_then(|t| self.scene.textures.sample(t, s.uv)) else {
            return s.n;
        };
        let ts = texel.truncate() * 2.0 - Vec3::ONE;
        let (t, b) = s.n.any_orthonormal_pair();
        (t * ts.x * intensity + b * ts.y * intensity + s.n * ts.z.max(1e-3))
            .try_normalize()
            .unwrap_or(s.n)
    }

    /// Next-event estimation against the analytic lights.
    fn direct(&self, leaf: &Leaf, s: &Surface, wo: Vec3) -> Vec3 {
        let mut sum = Vec3::ZERO;
        for light in &self.scene.lights {
            let (wi, dist, radiance) = match *light {
                Light::Directional { direction, radiance } => (-direction, f32::INFINITY, radiance),
                Light::Point { position, radiance } => {
                    let d = position - s.p;
                    let dist2 = d.length_squared();
                    (d / dist2.sqrt(), dist2.sqrt(), radiance / dist2)
                }
                Light::Spot {
                    position,
                    direction,
                    radiance,
                    inner_cos,
                    outer_cos,
                } => {
                    let d = position - s.p;
                    let dist2 = d.length_squared();
                    let wi = d / dist2.sqrt();
                    let cone = smoothstep(outer_cos, inner_cos, (-wi).dot(direction));
                    (wi, dist2.sqrt(), radiance * cone / dist2)
                }
            };
            if radiance.max_element() <= 0.0 {
                continue;
            }
            let f = eval_leaf(leaf, wo, wi);
            if f.max_element() <= 0.0 {
                continue;
            }
            let origin = s.p + s.n * RAY_EPSILON;
            if self.bvh.occluded(self.triangles, origin, wi, RAY_EPSILON, dist - RAY_EPSILON) {
                continue;
            }
            sum += f * radiance;
        }
        sum
    }
}

fn surface_at(tri: &Triangle, hit: &TriangleHit, p: Vec3, dir: Vec3) -> Surface {
    let mut n = tri.normal_at(hit);
    if n.dot(dir) > 0.0 {
        n = -n;
    }
    Surface {
        p,
        n,
        uv: tri.uv_at(hit),
    }
}

/// BSDF times cosine for a leaf.
fn eval_leaf(leaf: &Leaf, wo: Vec3, wi: Vec3) -> Vec3 {
    match *leaf {
        Leaf::Diffuse { albedo, n } => albedo * FRAC_1_PI * n.dot(wi).max(0.0),
        Leaf::Glossy { color, alpha, n } => {
            let cos_i = n.dot(wi);
            let cos_o = n.dot(wo);
            if cos_i <= 0.0 || cos_o <= 0.0 {
                return Vec3::ZERO;
            }
            let h = (wi + wo).normalize();
            let d = ggx_d(n.dot(h), alpha);
            let g = smith_g1(cos_i, alpha) * smith_g1(cos_o, alpha);
            color * (d * g / (4.0 * cos_o))
        }
        Leaf::Pass | Leaf::Emit(_) => Vec3::ZERO,
    }
}

/// Sample an outgoing direction; returns it with `f * cos / pdf`.
fn sample_leaf(leaf: &Leaf, wo: Vec3, rng: &mut Pcg32) -> Option<(Vec3, Vec3)> {
    match *leaf {
        Leaf::Diffuse { albedo, n } => {
            let local = cosine_hemisphere(rng.next_vec2());
            let (t, b) = n.any_orthonormal_pair();
            let wi = (t * local.x + b * local.y + n * local.z).normalize();
            Some((wi, albedo))
        }
        Leaf::Glossy { color, alpha, n } => {
            let u = rng.next_vec2();
            let phi = 2.0 * PI * u.x;
            let cos_theta = ((1.0 - u.y) / (1.0 + (alpha * alpha - 1.0) * u.y)).sqrt();
            let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
            let (t, b) = n.any_orthonormal_pair();
            let h = (t * (sin_theta * phi.cos()) + b * (sin_theta * phi.sin()) + n * cos_theta).normalize();
            let wi = 2.0 * wo.dot(h) * h - wo;
            let cos_i = n.dot(wi);
            let cos_o = n.dot(wo);
            if cos_i <= 0.0 || cos_o <= 0.0 {
                return None;
            }
            // D cancels between BRDF and half-vector pdf
            let g = smith_g1(cos_i, alpha) * smith_g1(cos_o, alpha);
            let weight = color * (g * wo.dot(h).abs() / (cos_o * n.dot(h)).max(1e-6));
            Some((wi, weight))
        }
        Leaf::Pass | Leaf::Emit(_) => None,
    }
}

fn cosine_hemisphere(u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u.x).max(0.0).sqrt())
}

fn ggx_d(cos_h: f32, alpha: f32) -> f32 {
    if cos_h <= 0.0 {
        return 0.0;
    }
    let a2 = alpha * alpha;
    let d = cos_h * cos_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d)
}

fn smith_g1(cos: f32, alpha: f32) -> f32 {
    let a2 = alpha * alpha;
    2.0 * cos / (cos + (a2 + (1.0 - a2) * cos * cos).sqrt())
}

/// Schlick's approximation with a configurable exponent.
fn schlick(cos: f32, ior: f32, exponent: f32) -> f32 {
    let r0 = ((1.0 - ior) / (1.0 + ior)).powi(2);
    r0 + (1.0 - r0) * (1.0 - cos).powf(exponent)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Latitude-longitude lookup, +Y up.
pub(crate) fn equirect_uv(dir: Vec3) -> Vec2 {
    let u = 0.5 + dir.x.atan2(-dir.z) / (2.0 * PI);
    let v = 0.5 + dir.y.clamp(-1.0, 1.0).asin() / PI;
    Vec2::new(u, v)
}
