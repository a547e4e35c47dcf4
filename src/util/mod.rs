//! Utility types shared by every layer of the renderer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam and alignment helpers

mod error;
mod math;

pub use error::*;
pub use math::*;
