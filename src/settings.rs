//! Persistent renderer settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceMode;
use crate::material::{ShadingParams, SpecularPolicy};
use crate::util::Result;

/// Renderer settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Output
    pub width: u32,
    pub height: u32,
    pub gamma: f32,

    // Devices
    pub device_mode: DeviceMode,
    /// CPU devices created by the multi-device modes
    pub cpu_devices: usize,
    pub num_bounces: u32,
    /// Stop rendering the primary after this many passes (None = unlimited)
    pub sample_limit: Option<u32>,
    pub publish_interval_ms: u64,

    // Materials
    pub specular_policy: SpecularPolicy,
    pub shading: ShadingParams,

    // Environment
    pub environment: Option<PathBuf>,
    pub background: Option<PathBuf>,
    pub env_multiplier: f32,
    pub default_lights: bool,

    // Camera
    pub camera_speed: f32,
    pub aperture: f32,
    pub focus_distance: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            gamma: 2.2,
            device_mode: DeviceMode::Cpu,
            cpu_devices: 2,
            num_bounces: 5,
            sample_limit: None,
            publish_interval_ms: 1000,
            specular_policy: SpecularPolicy::Always,
            shading: ShadingParams::default(),
            environment: None,
            background: None,
            env_multiplier: 1.0,
            default_lights: true,
            camera_speed: 100.25,
            aperture: 0.0,
            focus_distance: 0.0,
        }
    }
}

const MAX_RESOLUTION: u32 = 16384;
const MAX_BOUNCES: u32 = 64;

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("pathview");
            p.push("settings.json");
            p
        })
    }

    /// Load settings from `path`, or from the default location.
    ///
    /// An explicit path must exist and parse. A missing or unreadable file at
    /// the default location yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default_path()
                .and_then(|p| std::fs::read_to_string(p).ok())
                .and_then(|s| match serde_json::from_str(&s) {
                    Ok(settings) => Some(settings),
                    Err(e) => {
                        tracing::warn!("ignoring invalid settings file: {e}");
                        None
                    }
                })
                .unwrap_or_default(),
        };
        Ok(Self::sanitize(settings))
    }

    /// Clamp out-of-range values.
    pub fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        self.width = self.width.clamp(1, MAX_RESOLUTION);
        self.height = self.height.clamp(1, MAX_RESOLUTION);
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            self.gamma = defaults.gamma;
        }
        self.cpu_devices = self.cpu_devices.max(1);
        self.num_bounces = self.num_bounces.min(MAX_BOUNCES);
        self.sample_limit = self.sample_limit.filter(|&n| n > 0);
        if !(self.env_multiplier.is_finite() && self.env_multiplier >= 0.0) {
            self.env_multiplier = defaults.env_multiplier;
        }
        self.shading.specular_roughness = self.shading.specular_roughness.clamp(0.01, 1.0);
        self.shading.normal_map_intensity = self.shading.normal_map_intensity.max(0.0);
        self.aperture = self.aperture.max(0.0);
        self.focus_distance = self.focus_distance.max(0.0);
        if !(self.camera_speed.is_finite() && self.camera_speed > 0.0) {
            self.camera_speed = defaults.camera_speed;
        }
        self
    }

    /// Save settings to `path`, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "width": 640, "device_mode": "mcpu" }"#).unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.width, 640);
        assert_eq!(s.height, 1024);
        assert_eq!(s.device_mode, DeviceMode::MultiCpu);
        assert_eq!(s.publish_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_sanitize_clamps() {
        let s = Settings {
            width: 0,
            gamma: -1.0,
            cpu_devices: 0,
            sample_limit: Some(0),
            env_multiplier: f32::NAN,
            shading: ShadingParams {
                specular_roughness: 3.0,
                normal_map_intensity: -1.0,
            },
            ..Settings::default()
        }
        .sanitize();
        assert_eq!(s.width, 1);
        assert_eq!(s.gamma, 2.2);
        assert_eq!(s.cpu_devices, 1);
        assert_eq!(s.sample_limit, None);
        assert_eq!(s.env_multiplier, 1.0);
        assert_eq!(s.shading.specular_roughness, 1.0);
        assert_eq!(s.shading.normal_map_intensity, 0.0);
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let s = Settings {
            num_bounces: 3,
            environment: Some(PathBuf::from("sky.hdr")),
            ..Settings::default()
        };
        s.save(Some(&path)).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), s);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.json"))).is_err());
    }
}
