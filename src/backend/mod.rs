//! Render backends.
//!
//! A backend supplies four capability sets:
//! - [`RenderBackend`] - owns the execution context; creates loaders and
//!   environment contexts and renders a batch
//! - [`LoaderBackend`] - uploads a prepared scene
//! - [`SceneBackend`] - device resources of one scene
//! - [`EnvironmentBackend`] - device resources of one environment
//!
//! Two variants exist: the wgpu compute backend (`gpu` feature) and a
//! host reference backend running on the rayon thread pool.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accel::Tlas;
use crate::environment::Environment;
use crate::format::SceneLoadData;
use crate::loader::PreparedScene;
use crate::renderer::FrameImage;
use crate::scene::{Scene, TextureTable};
use crate::shade::PackedLight;
use crate::util::{Error, Result};

#[cfg(feature = "gpu")]
pub mod gpu;
pub mod host;

/// Backend implementation selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// wgpu compute ray tracer.
    #[default]
    Gpu,
    /// CPU reference implementation.
    Host,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Gpu => f.write_str("gpu"),
            BackendKind::Host => f.write_str("host"),
        }
    }
}

/// Device-side result of loading a scene.
pub struct LoadedScene {
    pub backend: Box<dyn SceneBackend>,
    pub texture_table: TextureTable,
}

/// Execution context for batched rendering.
pub trait RenderBackend: Send {
    fn kind(&self) -> BackendKind;

    /// New loader sharing this backend's device and texture cache.
    fn make_loader(&self) -> Box<dyn LoaderBackend>;

    /// Device context for a new environment of `scene`, seeded with the
    /// scene's default TLAS and lights.
    fn make_environment(&self, scene: &Arc<Scene>) -> Result<Box<dyn EnvironmentBackend>>;

    /// Render one frame for `envs` (exactly one per batch slot). Blocks
    /// until the device has finished.
    fn render(&mut self, envs: &[&Environment]) -> Result<()>;

    /// Pixels of the most recently rendered frame.
    fn frame(&self) -> Result<FrameImage>;
}

/// Uploads host-prepared scene data.
pub trait LoaderBackend: Send {
    fn load_scene(&mut self, data: &SceneLoadData, prepared: &PreparedScene) -> Result<LoadedScene>;
}

/// Device resources of one scene.
pub trait SceneBackend: Send + Sync + Any {
    fn kind(&self) -> BackendKind;

    fn as_any(&self) -> &dyn Any;
}

/// Device resources of one environment.
pub trait EnvironmentBackend: Send + Any {
    fn kind(&self) -> BackendKind;

    /// Append a light to the device light array.
    fn add_light(&mut self, light: &PackedLight) -> Result<()>;

    /// Remove the light in dense `slot`; the last light moves into it.
    fn remove_light(&mut self, slot: usize) -> Result<()>;

    /// Queue an upload of `tlas` on this environment's stream.
    fn upload_tlas(&mut self, tlas: &Tlas, scene: &Scene) -> Result<()>;

    /// Wait for queued work on this environment's stream.
    fn synchronize(&mut self) -> Result<()>;

    /// Handle the render kernel uses to traverse this environment.
    fn traversable(&self) -> u32;

    fn as_any(&self) -> &dyn Any;
}

/// Downcast a scene backend, reporting foreign backends as a mismatch.
pub(crate) fn scene_backend<T: 'static>(scene: &Scene, expected: BackendKind) -> Result<&T> {
    scene
        .backend()
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            Error::BackendMismatch(format!(
                "scene was loaded by the {} backend, expected {expected}",
                scene.backend().kind()
            ))
        })
}

/// Downcast an environment backend, reporting foreign backends as a mismatch.
pub(crate) fn env_backend<T: 'static>(env: &Environment, expected: BackendKind) -> Result<&T> {
    env.backend().as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::BackendMismatch(format!(
            "environment belongs to the {} backend, expected {expected}",
            env.backend_kind()
        ))
    })
}
