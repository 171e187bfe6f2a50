//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Bounds3`] and math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
