//! Multi-device render orchestration.
//!
//! The primary device renders synchronously inside
//! [`RenderOrchestrator::update`] on the driving thread. Every secondary
//! device runs on its own worker thread (see [`worker`]) and periodically
//! publishes its accumulation buffer; [`AccumulationMerger`] folds those
//! results into the primary buffer, which is what gets presented.
//!
//! ```ignore
//! let devices = DeviceConfigSet::create(DeviceMode::MultiCpu, 2)?;
//! let mut orch = RenderOrchestrator::new(scene, devices, OrchestratorConfig::default())?;
//! orch.start()?;
//! for _ in 0..64 {
//!     orch.update()?;
//! }
//! orch.save_image(Path::new("out.png"))?;
//! orch.shutdown()?;
//! ```

mod merge;
mod worker;

pub use merge::AccumulationMerger;
pub use worker::{ControlBlock, DeviceCommand, Mailbox, Published, StateCell, WorkerState};

use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::device::{DeviceConfigSet, RenderDevice, DEFAULT_BOUNCES};
use crate::display::{self, DEFAULT_GAMMA};
use crate::material::MaterialEdit;
use crate::scene::{Scene, SharedScene};
use crate::settings::Settings;
use crate::util::{Error, Result, Vec4};

/// Orchestrator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub width: u32,
    pub height: u32,
    pub num_bounces: u32,
    /// Minimum time between two publishes of one secondary device.
    pub publish_interval: Duration,
    /// Primary passes after which `update` stops rendering.
    pub sample_limit: Option<u32>,
    pub gamma: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            num_bounces: DEFAULT_BOUNCES,
            publish_interval: Duration::from_secs(1),
            sample_limit: None,
            gamma: DEFAULT_GAMMA,
        }
    }
}

impl From<&Settings> for OrchestratorConfig {
    fn from(s: &Settings) -> Self {
        Self {
            width: s.width,
            height: s.height,
            num_bounces: s.num_bounces,
            publish_interval: s.publish_interval(),
            sample_limit: s.sample_limit,
            gamma: s.gamma,
        }
    }
}

/// Per-frame statistics returned by [`RenderOrchestrator::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    /// Whether the primary rendered a pass this frame.
    pub rendered: bool,
    /// Primary passes since the last clear.
    pub primary_samples: u32,
    /// Secondary results merged this frame.
    pub merged: usize,
    pub total_merges: u64,
    pub elapsed: Duration,
}

/// Result of [`RenderOrchestrator::run_benchmark`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkStats {
    pub width: u32,
    pub height: u32,
    pub passes: u32,
    pub elapsed: Duration,
    /// Camera rays per second, in millions.
    pub primary_mrays: f64,
}

impl std::fmt::Display for BenchmarkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} x {} passes in {:.3}s: {:.2} Mrays/s primary",
            self.width,
            self.height,
            self.passes,
            self.elapsed.as_secs_f64(),
            self.primary_mrays
        )
    }
}

/// Drives one primary device and supervises secondary workers.
pub struct RenderOrchestrator {
    scene: SharedScene,
    config: OrchestratorConfig,
    primary: Box<dyn RenderDevice>,
    primary_index: usize,
    /// Secondary devices not yet handed to a worker.
    pending: Vec<(usize, Box<dyn RenderDevice>)>,
    workers: Vec<ControlBlock>,
    merger: AccumulationMerger,
    frame: u64,
    host: Vec<Vec4>,
}

impl RenderOrchestrator {
    /// Prepare every device: preprocess the scene, allocate outputs, set
    /// bounces and clear. Devices are prepared in parallel.
    #[tracing::instrument(skip_all, fields(devices = devices.len()))]
    pub fn new(scene: SharedScene, devices: DeviceConfigSet, config: OrchestratorConfig) -> Result<Self> {
        let primary_index = devices.primary_index();
        let (mut primary, mut secondaries) = devices.into_parts();

        {
            let guard = scene.read();
            let scene_ref: &Scene = &guard;
            let mut all: Vec<&mut Box<dyn RenderDevice>> = std::iter::once(&mut primary)
                .chain(secondaries.iter_mut().map(|(_, d)| d))
                .collect();
            all.par_iter_mut().try_for_each(|device| -> Result<()> {
                device.preprocess(scene_ref)?;
                device.create_output(config.width, config.height)?;
                device.set_num_bounces(config.num_bounces);
                device.clear(Vec4::ZERO)
            })?;
        }

        tracing::info!(
            primary = %primary.info().name,
            secondaries = secondaries.len(),
            width = config.width,
            height = config.height,
            "render devices ready"
        );

        let pixels = config.width as usize * config.height as usize;
        Ok(Self {
            scene,
            config,
            primary,
            primary_index,
            pending: secondaries,
            workers: Vec::new(),
            merger: AccumulationMerger::new(),
            frame: 0,
            host: vec![Vec4::ZERO; pixels],
        })
    }

    /// Spawn worker threads for the secondary devices. Calling again is a no-op.
    pub fn start(&mut self) -> Result<()> {
        for (index, device) in std::mem::take(&mut self.pending) {
            let block = ControlBlock::spawn(index, device, self.scene.clone(), self.config.publish_interval)?;
            self.workers.push(block);
        }
        Ok(())
    }

    /// Render one primary pass (unless the sample limit is reached) and merge
    /// whatever the secondaries have published.
    pub fn update(&mut self) -> Result<FrameStats> {
        let start = Instant::now();

        let rendered = !self.sample_limit_reached();
        if rendered {
            let scene = self.scene.read();
            self.primary.render(&scene)?;
        }

        let merged = self
            .merger
            .merge(self.primary.as_mut(), self.workers.iter().map(ControlBlock::mailbox))?;

        if self.scene.read().dirty().any() {
            self.scene.write().clear_dirty();
        }

        self.frame += 1;
        Ok(FrameStats {
            frame: self.frame,
            rendered,
            primary_samples: self.primary.sample_count(),
            merged,
            total_merges: self.merger.merges(),
            elapsed: start.elapsed(),
        })
    }

    fn sample_limit_reached(&self) -> bool {
        self.config
            .sample_limit
            .is_some_and(|limit| self.primary.sample_count() >= limit)
    }

    /// Mutate the scene under the write lock, then reset accumulation on
    /// every device.
    pub fn edit_scene<R>(&mut self, f: impl FnOnce(&mut Scene) -> R) -> Result<R> {
        let result = {
            let mut scene = self.scene.write();
            f(&mut scene)
        };
        self.reset_accumulation(DeviceCommand::Clear)?;
        Ok(result)
    }

    /// Broadcast `command` to the workers and clear the primary now.
    fn reset_accumulation(&mut self, command: DeviceCommand) -> Result<()> {
        for worker in &self.workers {
            if !worker.send(command) {
                tracing::warn!(device = %worker.name, "worker gone, command dropped");
            }
            // Results rendered before the edit are stale
            worker.mailbox().take();
        }
        self.primary.clear(Vec4::ZERO)
    }

    /// Change the bounce count of every device and restart accumulation.
    pub fn set_num_bounces(&mut self, bounces: u32) -> Result<()> {
        self.config.num_bounces = bounces;
        self.primary.set_num_bounces(bounces);
        self.reset_accumulation(DeviceCommand::SetNumBounces(bounces))
    }

    /// Apply a material edit to every matching node. Returns nodes changed.
    pub fn apply_material_edit(&mut self, edit: MaterialEdit) -> Result<usize> {
        self.edit_scene(|scene| scene.apply_material_edit(edit))
    }

    /// Rotate the camera and all shapes about the camera around Y.
    pub fn rotate_environment(&mut self, angle: f32) -> Result<()> {
        self.edit_scene(|scene| scene.rotate_environment(angle))
    }

    /// Read the primary accumulation buffer to host memory.
    pub fn resolve(&mut self) -> Result<&[Vec4]> {
        self.primary.read_output(&mut self.host)?;
        Ok(&self.host)
    }

    /// Gamma-corrected RGBA8 image of the current accumulation.
    pub fn present_rgba8(&mut self) -> Result<Vec<u8>> {
        let gamma = self.config.gamma;
        Ok(display::tonemap_rgba8(self.resolve()?, gamma))
    }

    pub fn save_image(&mut self, path: &Path) -> Result<()> {
        let (width, height, gamma) = (self.config.width, self.config.height, self.config.gamma);
        display::save_image(path, width, height, self.resolve()?, gamma)
    }

    /// Time `passes` synchronous primary passes from a cleared buffer.
    #[tracing::instrument(skip(self))]
    pub fn run_benchmark(&mut self, passes: u32) -> Result<BenchmarkStats> {
        if passes == 0 {
            return Err(Error::Config("benchmark needs at least one pass".into()));
        }
        self.primary.clear(Vec4::ZERO)?;
        let start = Instant::now();
        {
            let scene = self.scene.read();
            for _ in 0..passes {
                self.primary.render(&scene)?;
            }
        }
        let elapsed = start.elapsed();

        let rays = f64::from(self.config.width) * f64::from(self.config.height) * f64::from(passes);
        let stats = BenchmarkStats {
            width: self.config.width,
            height: self.config.height,
            passes,
            elapsed,
            primary_mrays: rays / elapsed.as_secs_f64().max(1e-9) / 1e6,
        };
        tracing::info!("{stats}");
        Ok(stats)
    }

    /// Stop and join every worker. Returns the first worker error.
    pub fn shutdown(&mut self) -> Result<()> {
        // Signal everyone before joining anyone
        for worker in &mut self.workers {
            worker.request_stop();
        }
        let mut first = None;
        for mut worker in self.workers.drain(..) {
            if let Err(e) = worker.stop() {
                tracing::error!(device = %worker.name, "{e}");
                first.get_or_insert(e);
            }
        }
        self.pending.clear();
        first.map_or(Ok(()), Err)
    }

    /// `(device index, state)` for every running worker.
    pub fn worker_states(&self) -> Vec<(usize, WorkerState)> {
        self.workers.iter().map(|w| (w.index, w.state())).collect()
    }

    pub fn workers(&self) -> &[ControlBlock] {
        &self.workers
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn primary(&self) -> &dyn RenderDevice {
        self.primary.as_ref()
    }

    pub fn primary_index(&self) -> usize {
        self.primary_index
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn merges(&self) -> u64 {
        self.merger.merges()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl Drop for RenderOrchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("render shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuDevice, DeviceMode};

    fn small() -> OrchestratorConfig {
        OrchestratorConfig {
            width: 4,
            height: 2,
            num_bounces: 1,
            publish_interval: Duration::from_millis(1),
            ..OrchestratorConfig::default()
        }
    }

    #[test]
    fn test_single_device_update_and_limit() {
        let scene = Scene::new().into_shared();
        let devices = DeviceConfigSet::create(DeviceMode::Cpu, 1).unwrap();
        let config = OrchestratorConfig {
            sample_limit: Some(2),
            ..small()
        };
        let mut orch = RenderOrchestrator::new(scene, devices, config).unwrap();
        orch.start().unwrap();
        assert!(orch.workers().is_empty());

        assert!(orch.update().unwrap().rendered);
        assert!(orch.update().unwrap().rendered);
        let stats = orch.update().unwrap();
        assert!(!stats.rendered);
        assert_eq!(stats.primary_samples, 2);
        assert_eq!(stats.frame, 3);

        orch.edit_scene(|s| s.env_multiplier = 2.0).unwrap();
        assert_eq!(orch.primary().sample_count(), 0);
        assert_eq!(orch.present_rgba8().unwrap().len(), 4 * 2 * 4);
    }

    #[test]
    fn test_benchmark_counts_passes() {
        let scene = Scene::new().into_shared();
        let devices = DeviceConfigSet::from_devices(vec![Box::new(CpuDevice::new(0)) as Box<dyn RenderDevice>]).unwrap();
        let mut orch = RenderOrchestrator::new(scene, devices, small()).unwrap();
        let stats = orch.run_benchmark(3).unwrap();
        assert_eq!(stats.passes, 3);
        assert_eq!(orch.primary().sample_count(), 3);
        assert!(orch.run_benchmark(0).is_err());
    }

    #[test]
    fn test_secondaries_merge_into_primary() {
        let scene = Scene::new().into_shared();
        let devices = DeviceConfigSet::create(DeviceMode::MultiCpu, 2).unwrap();
        let mut orch = RenderOrchestrator::new(scene, devices, small()).unwrap();
        orch.start().unwrap();
        orch.start().unwrap();
        assert_eq!(orch.workers().len(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        while orch.merges() == 0 && Instant::now() < deadline {
            orch.update().unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(orch.merges() > 0);

        let weight: f32 = orch.resolve().unwrap().iter().map(|p| p.w).sum();
        assert!(weight > orch.primary().sample_count() as f32 * 8.0);
        orch.shutdown().unwrap();
        assert!(orch.worker_states().is_empty());
    }
}
