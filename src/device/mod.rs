//! Render capability: compute devices that path trace a [`Scene`] into an
//! accumulation buffer.
//!
//! Accumulation buffers are `Vec4` per pixel: `rgb` holds the radiance sum,
//! `w` the sample weight. Dividing the two yields the displayed color.
//!
//! - [`RenderDevice`] - the capability interface
//! - [`CpuDevice`] - progressive CPU path tracer
//! - [`DeviceConfigSet`] - enumeration and primary selection

mod config;
mod cpu;

pub use config::*;
pub use cpu::{CpuDevice, DEFAULT_BOUNCES};

use serde::{Deserialize, Serialize};

use crate::scene::Scene;
use crate::util::{Result, UVec2, Vec4};

/// Compute device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    /// Parallel execution units (threads, compute units).
    pub compute_units: u32,
}

/// A device able to path trace a scene progressively.
///
/// Each device owns one accumulation output and a staging buffer of the same
/// size used to fold in results computed elsewhere.
pub trait RenderDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Build acceleration structures for `scene`.
    fn preprocess(&mut self, scene: &Scene) -> Result<()>;

    /// Add one sample per pixel to the output.
    fn render(&mut self, scene: &Scene) -> Result<()>;

    /// Fill the output with `color` and reset the sample counter.
    fn clear(&mut self, color: Vec4) -> Result<()>;

    fn set_num_bounces(&mut self, bounces: u32);

    /// (Re)allocate output and staging buffers.
    fn create_output(&mut self, width: u32, height: u32) -> Result<()>;

    fn output_size(&self) -> UVec2;

    /// Copy the accumulation output to `host`.
    fn read_output(&self, host: &mut [Vec4]) -> Result<()>;

    /// Upload `partial` into the staging buffer.
    fn write_staging(&mut self, partial: &[Vec4]) -> Result<()>;

    /// Add the staging buffer into the output (radiance and weight).
    fn accumulate_staging(&mut self) -> Result<()>;

    /// Passes rendered since the last clear.
    fn sample_count(&self) -> u32;
}

impl std::fmt::Debug for dyn RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("info", self.info())
            .field("samples", &self.sample_count())
            .finish()
    }
}
