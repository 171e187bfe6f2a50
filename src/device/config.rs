//! Device enumeration and primary/secondary classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CpuDevice, DeviceInfo, DeviceKind, RenderDevice};
use crate::util::{Error, Result};

/// Which devices to render with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceMode {
    /// A single CPU device.
    #[default]
    #[serde(rename = "cpu")]
    Cpu,
    /// A single GPU device.
    #[serde(rename = "gpu")]
    Gpu,
    /// Every CPU device.
    #[serde(rename = "mcpu")]
    MultiCpu,
    /// Every GPU device.
    #[serde(rename = "mgpu")]
    MultiGpu,
    /// Everything available.
    #[serde(rename = "all")]
    All,
}

impl DeviceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::MultiCpu => "mcpu",
            Self::MultiGpu => "mgpu",
            Self::All => "all",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "mcpu" => Ok(Self::MultiCpu),
            "mgpu" => Ok(Self::MultiGpu),
            "all" => Ok(Self::All),
            other => Err(Error::Config(format!(
                "unknown device mode '{other}' (expected cpu, gpu, mcpu, mgpu or all)"
            ))),
        }
    }
}

/// Role of a device in the render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Rendered synchronously on the driving thread and presented.
    Primary,
    /// Rendered on its own worker thread and merged into the primary.
    Secondary,
}

/// A device with its assigned role.
pub struct DeviceConfig {
    pub device: Box<dyn RenderDevice>,
    pub class: DeviceClass,
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("device", &self.device.info().name)
            .field("class", &self.class)
            .finish()
    }
}

/// The set of devices to render with; exactly one is primary.
#[derive(Debug)]
pub struct DeviceConfigSet {
    configs: Vec<DeviceConfig>,
    primary: usize,
}

impl DeviceConfigSet {
    /// Enumerate devices for `mode`.
    ///
    /// Multi-CPU modes create `cpu_devices` CPU devices sharing the machine.
    /// No GPU backend is compiled in, so GPU-only modes fail with
    /// [`Error::NoDevices`].
    pub fn create(mode: DeviceMode, cpu_devices: usize) -> Result<Self> {
        let cpu_count = match mode {
            DeviceMode::Cpu => 1,
            DeviceMode::MultiCpu | DeviceMode::All => cpu_devices.max(1),
            DeviceMode::Gpu | DeviceMode::MultiGpu => 0,
        };

        let devices: Vec<Box<dyn RenderDevice>> = (0..cpu_count)
            .map(|i| Box::new(CpuDevice::new(i)) as Box<dyn RenderDevice>)
            .collect();

        if devices.is_empty() {
            return Err(Error::NoDevices(mode.to_string()));
        }
        Self::from_devices(devices)
    }

    /// Classify an explicit device list.
    pub fn from_devices(devices: Vec<Box<dyn RenderDevice>>) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::NoDevices("explicit".into()));
        }
        let infos: Vec<&DeviceInfo> = devices.iter().map(|d| d.info()).collect();
        let primary = select_primary(&infos);

        let configs = devices
            .into_iter()
            .enumerate()
            .map(|(i, device)| DeviceConfig {
                device,
                class: if i == primary {
                    DeviceClass::Primary
                } else {
                    DeviceClass::Secondary
                },
            })
            .collect::<Vec<_>>();

        for (i, c) in configs.iter().enumerate() {
            tracing::info!(index = i, device = %c.device.info().name, class = ?c.class, "device configured");
        }
        Ok(Self { configs, primary })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    #[inline]
    pub fn primary_index(&self) -> usize {
        self.primary
    }

    pub fn configs(&self) -> &[DeviceConfig] {
        &self.configs
    }

    /// Split into the primary device and the indexed secondaries.
    pub fn into_parts(self) -> (Box<dyn RenderDevice>, Vec<(usize, Box<dyn RenderDevice>)>) {
        let mut configs = self.configs;
        let primary = configs.remove(self.primary).device;
        let secondaries = configs
            .into_iter()
            .enumerate()
            .map(|(i, c)| (if i >= self.primary { i + 1 } else { i }, c.device))
            .collect();
        (primary, secondaries)
    }
}

/// Pick the presenting device: GPUs before CPUs, then the most compute
/// units, then the earliest listed.
pub fn select_primary(infos: &[&DeviceInfo]) -> usize {
    let rank = |info: &DeviceInfo| (info.kind == DeviceKind::Gpu, info.compute_units);
    infos
        .iter()
        .enumerate()
        .fold(None::<(usize, (bool, u32))>, |best, (i, info)| {
            let r = rank(info);
            match best {
                Some((_, br)) if br >= r => best,
                _ => Some((i, r)),
            }
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}
