//! Error types for scene loading and rendering.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pathview operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Texture or image asset cannot be opened or decoded
    #[error("Can't load {path} image: {reason}")]
    Asset { path: PathBuf, reason: String },

    /// Mesh or material data is malformed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Scene load failed; wraps the parser or compiler failure
    #[error("Failed to load scene {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Composite material references a node that is not strictly earlier
    #[error("Material node {node} references node {reference} which is not below it")]
    InvalidGraph { node: usize, reference: usize },

    /// Render capability failure on a specific device
    #[error("Device {device} failed: {message}")]
    Device { device: String, message: String },

    /// No compute device matched the requested mode
    #[error("No compute devices available for mode {0}")]
    NoDevices(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Create a parse error from a string.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an asset error for `path`.
    pub fn asset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Asset {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a device error.
    pub fn device(device: impl Into<String>, message: impl ToString) -> Self {
        Self::Device {
            device: device.into(),
            message: message.to_string(),
        }
    }

    /// Wrap any error as a scene load failure for `path`.
    ///
    /// Already wrapped errors are passed through unchanged.
    pub fn load(path: impl Into<PathBuf>, source: Error) -> Self {
        match source {
            Self::Load { .. } => source,
            other => Self::Load {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// True for errors that abort a scene load attempt.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::Asset { .. } | Self::Parse(_) | Self::Load { .. })
    }
}

/// Result type alias for pathview operations.
pub type Result<T> = std::result::Result<T, Error>;
