//! # rtbatch
//!
//! Batched ray tracing for many independent environments sharing one
//! device. A scene is loaded once; each environment is a cheap mutable view
//! of it (instances, lights, camera) with its own top-level accelerator;
//! a renderer draws `B` environments in one dispatch.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math helpers
//! - [`format`] - Scene blob layout, reader and writer
//! - [`accel`] - BVH builder, BLAS/TLAS and host traversal
//! - [`handles`] - Stable-handle slot arena
//! - [`loader`], [`scene`], [`environment`] - Scene lifecycle
//! - [`backend`] - GPU (wgpu) and host render backends
//! - [`renderer`], [`config`] - Facade and configuration
//!
//! ## Example
//!
//! ```ignore
//! use rtbatch::prelude::*;
//!
//! let mut renderer = Renderer::new(RenderConfig::new(4, 128, 128))?;
//! let scene = renderer.make_loader().load_scene("scene.bin")?;
//! let mut envs: Vec<Environment> =
//!     (0..4).map(|_| renderer.make_environment(&scene)).collect::<Result<_>>()?;
//! let light = envs[0].add_light(Vec3::new(0.0, 5.0, 0.0), Vec3::ONE)?;
//! let mut batch: Vec<&mut Environment> = envs.iter_mut().collect();
//! renderer.render(&mut batch)?;
//! let frame = renderer.frame()?;
//! ```

pub mod util;
pub mod format;
pub mod accel;
pub mod handles;
pub mod camera;
pub mod texture;
pub mod shade;
pub mod scene;
pub mod environment;
pub mod loader;
pub mod backend;
pub mod config;
pub mod renderer;
pub mod logging;

// Re-export commonly used types
pub use util::{Error, Result};
pub use backend::BackendKind;
pub use camera::Camera;
pub use config::RenderConfig;
pub use environment::{Environment, Instance, Light};
pub use handles::Handle;
pub use loader::Loader;
pub use renderer::{FrameImage, Renderer};
pub use scene::Scene;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accel::{InstanceFlags, Ray, MASK_ALL};
    pub use crate::backend::BackendKind;
    pub use crate::camera::Camera;
    pub use crate::config::RenderConfig;
    pub use crate::environment::{Environment, Instance, Light};
    pub use crate::format::{SceneBlobWriter, SceneDescription, SceneLoadData};
    pub use crate::handles::Handle;
    pub use crate::loader::Loader;
    pub use crate::renderer::{FrameImage, Renderer};
    pub use crate::scene::Scene;
    pub use crate::util::{Affine3A, Error, Result, Vec3};
}
