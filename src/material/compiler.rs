//! Compile raw (per-triangle) material descriptions into graph runs.
//!
//! Each raw material becomes a short run of nodes appended to the scene's
//! [`MaterialGraph`]:
//!
//! 1. a Lambert leaf (diffuse color, diffuse/normal textures);
//! 2. the specular branch - a GGX leaf plus a FresnelBlend over the Lambert
//!    leaf - according to [`SpecularPolicy`];
//! 3. when the material is transparent (opacity below one, or an 8-bit
//!    diffuse texture with translucent texels), a Passthrough leaf and a Mix
//!    between it and the result of step 2.
//!
//! The last appended node is what primitives reference. Emissive raw
//! materials compile to a single Emissive node instead.

use std::path::Path;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{Material, MaterialGraph};
use crate::source::RawMaterial;
use crate::texture::{resolve_texture_path, ImageLoader, TextureCache};
use crate::util::{Error, Result, Vec3};

/// Index of refraction of the specular layer.
pub const SPECULAR_IOR: f32 = 1.33;
/// Fresnel weight of the GGX leaf.
pub const SPECULAR_FRESNEL: f32 = 5.0;
/// Fresnel weight of the blend node layering specular over diffuse.
pub const BLEND_FRESNEL: f32 = 1.0;

/// When the specular branch is appended to a compiled material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecularPolicy {
    /// Every material gets the GGX + FresnelBlend pair, whatever its source
    /// specular color.
    #[default]
    Always,
    /// Only materials whose source specular color is non-black.
    FromSourceIntensity,
}

impl SpecularPolicy {
    fn wants_specular(self, raw: &RawMaterial) -> bool {
        match self {
            Self::Always => true,
            Self::FromSourceIntensity => raw.specular.length_squared() > 0.0,
        }
    }
}

/// Scene-wide shading parameters read when nodes are created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingParams {
    /// Roughness given to new GGX leaves.
    pub specular_roughness: f32,
    /// Normal-map intensity given to new Lambert leaves.
    pub normal_map_intensity: f32,
}

impl Default for ShadingParams {
    fn default() -> Self {
        Self {
            specular_roughness: 0.2,
            normal_map_intensity: 4.0,
        }
    }
}

/// Result of compiling one raw material.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMaterial {
    /// Node primitives should reference (last node appended).
    pub index: usize,
    /// All nodes appended for this material, in order.
    pub nodes: SmallVec<[usize; 5]>,
    /// Whether the transparency predicate held.
    pub transparent: bool,
}

/// Translates raw materials into nodes of a [`MaterialGraph`].
pub struct MaterialGraphCompiler<'a> {
    graph: &'a mut MaterialGraph,
    textures: &'a mut TextureCache,
    loader: &'a dyn ImageLoader,
    base_path: &'a Path,
    params: ShadingParams,
    policy: SpecularPolicy,
}

impl<'a> MaterialGraphCompiler<'a> {
    pub fn new(
        graph: &'a mut MaterialGraph,
        textures: &'a mut TextureCache,
        loader: &'a dyn ImageLoader,
        base_path: &'a Path,
    ) -> Self {
        Self {
            graph,
            textures,
            loader,
            base_path,
            params: ShadingParams::default(),
            policy: SpecularPolicy::default(),
        }
    }

    pub fn with_params(mut self, params: ShadingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_policy(mut self, policy: SpecularPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Compile `raw`, returning the index primitives should reference.
    pub fn compile(&mut self, raw: &RawMaterial) -> Result<usize> {
        self.compile_run(raw).map(|c| c.index)
    }

    /// Compile `raw`, returning every appended node.
    pub fn compile_run(&mut self, raw: &RawMaterial) -> Result<CompiledMaterial> {
        validate_raw(raw)?;
        let name = raw.name.as_str();
        let mut nodes = SmallVec::new();

        if raw.emission.max_element() > 0.0 {
            let index = self.graph.push(Material::Emissive { color: raw.emission }, name)?;
            nodes.push(index);
            return Ok(CompiledMaterial {
                index,
                nodes,
                transparent: false,
            });
        }

        let diffuse_map = self.texture(raw.diffuse_texture.as_deref())?;
        let normal_map = self.texture(raw.normal_texture.as_deref())?;

        let lambert = self.graph.push(
            Material::Lambert {
                color: raw.diffuse,
                intensity: self.params.normal_map_intensity,
                diffuse_map,
                normal_map,
            },
            name,
        )?;
        nodes.push(lambert);
        let mut result = lambert;

        if self.policy.wants_specular(raw) {
            let ggx = self.graph.push(
                Material::MicrofacetGgx {
                    color: Vec3::ONE,
                    ior: SPECULAR_IOR,
                    roughness: self.params.specular_roughness,
                    fresnel: SPECULAR_FRESNEL,
                    normal_map,
                },
                name,
            )?;
            let layered = self.graph.push(
                Material::FresnelBlend {
                    ior: SPECULAR_IOR,
                    fresnel: BLEND_FRESNEL,
                    two_sided: true,
                    top: ggx,
                    base: lambert,
                },
                name,
            )?;
            nodes.extend([ggx, layered]);
            result = layered;
        }

        let transparent = raw.opacity < 1.0
            || diffuse_map.is_some_and(|t| self.textures.has_translucent_texels(t));

        if transparent {
            let passthrough = self.graph.push(Material::Passthrough, name)?;
            let mix = self.graph.push(
                Material::Mix {
                    weight: raw.opacity,
                    mask: diffuse_map,
                    top: passthrough,
                    base: result,
                },
                name,
            )?;
            nodes.extend([passthrough, mix]);
            result = mix;
        }

        tracing::trace!(material = name, nodes = nodes.len(), transparent, "material compiled");
        Ok(CompiledMaterial {
            index: result,
            nodes,
            transparent,
        })
    }

    fn texture(&mut self, name: Option<&str>) -> Result<Option<usize>> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => {
                let path = resolve_texture_path(self.base_path, name);
                self.textures.get_or_load(self.loader, &path).map(Some)
            }
            None => Ok(None),
        }
    }
}

fn validate_raw(raw: &RawMaterial) -> Result<()> {
    let finite = raw.diffuse.is_finite() && raw.specular.is_finite() && raw.emission.is_finite();
    if !finite {
        return Err(Error::parse(format!(
            "material '{}' has non-finite color values",
            raw.name
        )));
    }
    if !raw.opacity.is_finite() || !(0.0..=1.0).contains(&raw.opacity) {
        return Err(Error::parse(format!(
            "material '{}' has opacity {} outside [0, 1]",
            raw.name, raw.opacity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialKind;
    use crate::texture::tests::CountingLoader;
    use std::sync::atomic::Ordering;

    fn raw(opacity: f32) -> RawMaterial {
        RawMaterial {
            name: "paint".into(),
            diffuse: Vec3::new(0.7, 0.1, 0.1),
            opacity,
            ..Default::default()
        }
    }

    fn kinds(graph: &MaterialGraph) -> Vec<MaterialKind> {
        graph.iter().map(Material::kind).collect()
    }

    #[test]
    fn test_opaque_material_compiles_to_layered_run() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let mut compiler =
            MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."));

        let compiled = compiler.compile_run(&raw(1.0)).unwrap();
        assert_eq!(compiled.index, 2);
        assert!(!compiled.transparent);
        assert_eq!(
            kinds(&graph),
            vec![MaterialKind::Lambert, MaterialKind::MicrofacetGgx, MaterialKind::FresnelBlend]
        );
        assert_eq!(graph[2].children(), Some((1, 0)));
    }

    #[test]
    fn test_half_opacity_appends_mix() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let index = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .compile(&raw(0.5))
            .unwrap();

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.count_kind(MaterialKind::Mix), 1);
        assert_eq!(index, 4);
        assert_eq!(graph[4].blend_weight(), Some(0.5));
        assert_eq!(graph[4].children(), Some((3, 2)));
        assert_eq!(graph[3].kind(), MaterialKind::Passthrough);
        graph.validate().unwrap();
    }

    #[test]
    fn test_translucent_texture_forces_mix_with_mask() {
        let loader = CountingLoader {
            alpha: Some(10),
            ..Default::default()
        };
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let mut material = raw(1.0);
        material.diffuse_texture = Some("leaf_alpha.png".into());

        let index = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("/s"))
            .compile(&material)
            .unwrap();

        match &graph[index] {
            Material::Mix { weight, mask, .. } => {
                assert_eq!(*weight, 1.0);
                assert_eq!(*mask, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_opaque_texture_keeps_three_nodes_and_shares_texture() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let mut a = raw(1.0);
        a.diffuse_texture = Some("wood.png".into());
        a.normal_texture = Some("wood_n.png".into());
        let mut b = a.clone();
        b.name = "other".into();

        {
            let mut compiler =
                MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."));
            compiler.compile(&a).unwrap();
            compiler.compile(&b).unwrap();
        }

        assert_eq!(graph.len(), 6);
        assert_eq!(textures.len(), 2);
        assert_eq!(loader.opens.load(Ordering::SeqCst), 2);
        match (&graph[0], &graph[1]) {
            (
                Material::Lambert { diffuse_map, normal_map, .. },
                Material::MicrofacetGgx { normal_map: ggx_normal, .. },
            ) => {
                assert_eq!(*diffuse_map, Some(0));
                assert_eq!(*normal_map, Some(1));
                assert_eq!(ggx_normal, normal_map);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(graph.name(5), Some("other"));
    }

    #[test]
    fn test_source_intensity_policy_skips_specular() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let index = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .with_policy(SpecularPolicy::FromSourceIntensity)
            .compile(&raw(0.25))
            .unwrap();

        assert_eq!(
            kinds(&graph),
            vec![MaterialKind::Lambert, MaterialKind::Passthrough, MaterialKind::Mix]
        );
        assert_eq!(graph[index].children(), Some((1, 0)));
    }

    #[test]
    fn test_params_flow_into_nodes() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .with_params(ShadingParams {
                specular_roughness: 0.55,
                normal_map_intensity: 1.5,
            })
            .compile(&raw(1.0))
            .unwrap();

        assert!(matches!(graph[0], Material::Lambert { intensity, .. } if intensity == 1.5));
        assert!(matches!(graph[1], Material::MicrofacetGgx { roughness, .. } if roughness == 0.55));
    }

    #[test]
    fn test_emissive_material_is_single_node() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let mut light = raw(1.0);
        light.emission = Vec3::new(5.0, 5.0, 4.0);
        let index = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .compile(&light)
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(graph.len(), 1);
        assert!(graph[0].is_emissive());
    }

    #[test]
    fn test_malformed_opacity_is_parse_error() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let err = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .compile(&raw(1.5))
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_missing_texture_is_asset_error() {
        let loader = CountingLoader::default();
        let mut graph = MaterialGraph::new();
        let mut textures = TextureCache::new();
        let mut material = raw(1.0);
        material.diffuse_texture = Some("missing.png".into());
        let err = MaterialGraphCompiler::new(&mut graph, &mut textures, &loader, Path::new("."))
            .compile(&material)
            .unwrap_err();
        assert!(matches!(err, Error::Asset { .. }));
    }
}
