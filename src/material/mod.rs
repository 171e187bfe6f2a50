//! Material graph: reflectance nodes composed into per-surface shading.
//!
//! Materials form a small acyclic graph stored as an append-only arena.
//! Leaves ([`Material::Lambert`], [`Material::MicrofacetGgx`],
//! [`Material::Passthrough`], [`Material::Emissive`]) shade directly;
//! composites ([`Material::FresnelBlend`], [`Material::Mix`]) reference a
//! "top" and a "base" node by index.
//!
//! ## Invariant
//!
//! A composite's references are always strictly lower than its own index.
//! [`MaterialGraph::push`] refuses anything else, so a graph built through it
//! is acyclic by construction, and [`MaterialGraph::validate`] re-checks a
//! whole arena (useful after external edits).
//!
//! ```text
//! 0: Lambert ──┐
//! 1: GGX ──────┤
//! 2: FresnelBlend{top=1, base=0} ──┐
//! 3: Passthrough ──────────────────┤
//! 4: Mix{top=3, base=2, weight=opacity}
//! ```

mod compiler;

pub use compiler::*;

use crate::util::{Error, Result, Vec3};

/// Discriminant of a [`Material`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    Lambert,
    MicrofacetGgx,
    FresnelBlend,
    Passthrough,
    Mix,
    Emissive,
}

/// One node of the material graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    /// Diffuse reflectance.
    Lambert {
        color: Vec3,
        /// Normal-map intensity.
        intensity: f32,
        diffuse_map: Option<usize>,
        normal_map: Option<usize>,
    },
    /// Microfacet specular reflectance with GGX distribution.
    MicrofacetGgx {
        color: Vec3,
        /// Index of refraction.
        ior: f32,
        roughness: f32,
        fresnel: f32,
        normal_map: Option<usize>,
    },
    /// Fresnel-weighted layering of `top` over `base`.
    FresnelBlend {
        ior: f32,
        fresnel: f32,
        two_sided: bool,
        top: usize,
        base: usize,
    },
    /// Lets rays continue unchanged (cut-out transparency).
    Passthrough,
    /// Linear blend: `base` with probability `weight`, `top` otherwise.
    ///
    /// When `mask` is set its alpha channel scales `weight` per texel.
    Mix {
        weight: f32,
        mask: Option<usize>,
        top: usize,
        base: usize,
    },
    /// Light-emitting surface.
    Emissive { color: Vec3 },
}

impl Material {
    pub fn kind(&self) -> MaterialKind {
        match self {
            Self::Lambert { .. } => MaterialKind::Lambert,
            Self::MicrofacetGgx { .. } => MaterialKind::MicrofacetGgx,
            Self::FresnelBlend { .. } => MaterialKind::FresnelBlend,
            Self::Passthrough => MaterialKind::Passthrough,
            Self::Mix { .. } => MaterialKind::Mix,
            Self::Emissive { .. } => MaterialKind::Emissive,
        }
    }

    /// `(top, base)` for composite nodes.
    pub fn children(&self) -> Option<(usize, usize)> {
        match *self {
            Self::FresnelBlend { top, base, .. } | Self::Mix { top, base, .. } => Some((top, base)),
            _ => None,
        }
    }

    #[inline]
    pub fn is_composite(&self) -> bool {
        self.children().is_some()
    }

    #[inline]
    pub fn is_emissive(&self) -> bool {
        matches!(self, Self::Emissive { .. })
    }

    /// Blend weight of a Mix node.
    pub fn blend_weight(&self) -> Option<f32> {
        match self {
            Self::Mix { weight, .. } => Some(*weight),
            _ => None,
        }
    }
}

/// Absolute update applied to every matching node of a graph.
///
/// Replaces process-wide shading parameters: the new value is stored on the
/// scene and broadcast to existing nodes in one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialEdit {
    /// Roughness of every [`Material::MicrofacetGgx`] node.
    SpecularRoughness(f32),
    /// Normal-map intensity of every [`Material::Lambert`] node.
    NormalMapIntensity(f32),
}

/// Append-only arena of material nodes with a parallel name list.
#[derive(Debug, Clone, Default)]
pub struct MaterialGraph {
    nodes: Vec<Material>,
    names: Vec<String>,
}

impl MaterialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, returning its index.
    ///
    /// Fails with [`Error::InvalidGraph`] if a composite references a node at
    /// or above the index it would receive.
    pub fn push(&mut self, material: Material, name: &str) -> Result<usize> {
        let index = self.nodes.len();
        if let Some((top, base)) = material.children() {
            for reference in [top, base] {
                if reference >= index {
                    return Err(Error::InvalidGraph { node: index, reference });
                }
            }
        }
        self.nodes.push(material);
        self.names.push(name.to_string());
        Ok(index)
    }

    /// Check every composite references strictly lower indices.
    pub fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some((top, base)) = node.children() {
                for reference in [top, base] {
                    if reference >= index {
                        return Err(Error::InvalidGraph { node: index, reference });
                    }
                }
            }
        }
        Ok(())
    }

    /// Update every node matching `edit`. Returns the number of nodes changed.
    pub fn apply(&mut self, edit: MaterialEdit) -> usize {
        let mut changed = 0;
        for node in &mut self.nodes {
            match (edit, node) {
                (MaterialEdit::SpecularRoughness(value), Material::MicrofacetGgx { roughness, .. }) => {
                    *roughness = value;
                    changed += 1;
                }
                (MaterialEdit::NormalMapIntensity(value), Material::Lambert { intensity, .. }) => {
                    *intensity = value;
                    changed += 1;
                }
                _ => {}
            }
        }
        changed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Material> {
        self.nodes.get(index)
    }

    /// Name of the raw material node `index` was compiled from.
    #[inline]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn nodes(&self) -> &[Material] {
        &self.nodes
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.nodes.iter()
    }

    /// Number of nodes of a given kind.
    pub fn count_kind(&self, kind: MaterialKind) -> usize {
        self.nodes.iter().filter(|m| m.kind() == kind).count()
    }
}

impl std::ops::Index<usize> for MaterialGraph {
    type Output = Material;

    fn index(&self, index: usize) -> &Material {
        &self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambert() -> Material {
        Material::Lambert {
            color: Vec3::splat(0.5),
            intensity: 4.0,
            diffuse_map: None,
            normal_map: None,
        }
    }

    fn ggx() -> Material {
        Material::MicrofacetGgx {
            color: Vec3::ONE,
            ior: 1.33,
            roughness: 0.2,
            fresnel: 5.0,
            normal_map: None,
        }
    }

    #[test]
    fn test_push_rejects_forward_reference() {
        let mut graph = MaterialGraph::new();
        graph.push(lambert(), "m").unwrap();

        let err = graph
            .push(
                Material::FresnelBlend {
                    ior: 1.33,
                    fresnel: 1.0,
                    two_sided: true,
                    top: 1,
                    base: 0,
                },
                "m",
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGraph { node: 1, reference: 1 }));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_validate_accepts_layered_run() {
        let mut graph = MaterialGraph::new();
        let base = graph.push(lambert(), "m").unwrap();
        let top = graph.push(ggx(), "m").unwrap();
        graph
            .push(
                Material::FresnelBlend {
                    ior: 1.33,
                    fresnel: 1.0,
                    two_sided: true,
                    top,
                    base,
                },
                "m",
            )
            .unwrap();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.name(2), Some("m"));
    }

    #[test]
    fn test_apply_only_touches_matching_kind() {
        let mut graph = MaterialGraph::new();
        graph.push(lambert(), "a").unwrap();
        graph.push(ggx(), "a").unwrap();
        graph.push(lambert(), "b").unwrap();

        assert_eq!(graph.apply(MaterialEdit::SpecularRoughness(0.7)), 1);
        assert_eq!(graph.apply(MaterialEdit::NormalMapIntensity(2.5)), 2);

        match &graph[1] {
            Material::MicrofacetGgx { roughness, .. } => assert_eq!(*roughness, 0.7),
            other => panic!("unexpected {other:?}"),
        }
        match &graph[0] {
            Material::Lambert { intensity, .. } => assert_eq!(*intensity, 2.5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_kind_and_children() {
        let mix = Material::Mix {
            weight: 0.3,
            mask: None,
            top: 3,
            base: 2,
        };
        assert_eq!(mix.kind(), MaterialKind::Mix);
        assert_eq!(mix.children(), Some((3, 2)));
        assert_eq!(mix.blend_weight(), Some(0.3));
        assert!(!Material::Passthrough.is_composite());
        assert!(Material::Emissive { color: Vec3::ONE }.is_emissive());
    }
}
