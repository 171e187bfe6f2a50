//! # pathview
//!
//! Progressive path-tracing preview renderer.
//!
//! Loads Wavefront OBJ/MTL scenes, compiles their flat material descriptions
//! into small acyclic reflectance graphs, and accumulates path-traced passes
//! from several compute devices into one image.
//!
//! ## Modules
//!
//! - [`util`] - Errors, bounds and math re-exports
//! - [`texture`] - Deduplicating texture cache and image decoding
//! - [`material`] - Material graph arena and the raw-material compiler
//! - [`source`] - Mesh/material sources (OBJ via `tobj`)
//! - [`scene`] - Scene assembly, camera and lights
//! - [`device`] - Render device interface, device selection, CPU tracer
//! - [`render`] - Multi-device orchestration and result merging
//! - [`display`] - Accumulation resolve and image export
//! - [`settings`] - Persistent renderer settings
//!
//! ## Example
//!
//! ```ignore
//! use pathview::prelude::*;
//!
//! let loader = DiskImageLoader;
//! let scene = SceneBuilder::new(&ObjSource, &loader)
//!     .build(Path::new("assets/sponza.obj"), Path::new("assets"))?;
//!
//! let devices = DeviceConfigSet::create(DeviceMode::MultiCpu, 2)?;
//! let mut orch = RenderOrchestrator::new(scene.into_shared(), devices, OrchestratorConfig::default())?;
//! orch.start()?;
//! for _ in 0..32 {
//!     orch.update()?;
//! }
//! orch.save_image(Path::new("sponza.png"))?;
//! ```

pub mod util;
pub mod texture;
pub mod material;
pub mod source;
pub mod scene;
pub mod device;
pub mod render;
pub mod display;
pub mod settings;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude for common imports
pub mod prelude {
    pub use crate::util::{Bounds3, Error, Result, Vec2, Vec3, Vec4};
    pub use crate::texture::{DiskImageLoader, ImageLoader, TextureCache};
    pub use crate::material::{Material, MaterialEdit, MaterialGraph, ShadingParams, SpecularPolicy};
    pub use crate::source::{MeshSource, ObjSource};
    pub use crate::scene::{CameraMove, Light, PerspectiveCamera, Scene, SceneBuilder, SharedScene};
    pub use crate::device::{CpuDevice, DeviceConfigSet, DeviceMode, RenderDevice};
    pub use crate::render::{FrameStats, OrchestratorConfig, RenderOrchestrator};
    pub use crate::settings::Settings;
}
