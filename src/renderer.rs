//! Renderer facade: owns the selected backend and forwards to it.

use std::sync::Arc;

use crate::backend::host::HostBackend;
use crate::backend::{BackendKind, RenderBackend};
use crate::camera::Camera;
use crate::config::RenderConfig;
use crate::environment::Environment;
use crate::loader::Loader;
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Pixels of one rendered batch.
///
/// Packed RGBA8 (`r | g << 8 | b << 16 | a << 24`), batch-major then
/// row-major: pixel `(b, x, y)` is at `b * w * h + y * w + x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub batch: u32,
    pub pixels: Vec<u32>,
}

impl FrameImage {
    /// Pixels of batch slot `index`.
    pub fn view(&self, index: usize) -> Result<&[u32]> {
        let count = self.batch as usize;
        if index >= count {
            return Err(Error::OutOfRange { what: "batch slot", index, count });
        }
        let n = self.width as usize * self.height as usize;
        Ok(&self.pixels[index * n..(index + 1) * n])
    }

    /// True when every pixel of slot `index` is background.
    pub fn is_background(&self, index: usize) -> Result<bool> {
        Ok(self.view(index)?.iter().all(|&p| p == crate::shade::MISS_COLOR))
    }

    /// All slots side by side as an RGBA image.
    pub fn to_strip(&self) -> image::RgbaImage {
        let (w, h) = (self.width, self.height);
        image::RgbaImage::from_fn(w * self.batch.max(1), h, |x, y| {
            let (b, px) = (x / w, x % w);
            let idx = (b * w * h + y * w + px) as usize;
            image::Rgba(self.pixels.get(idx).copied().unwrap_or(0).to_le_bytes())
        })
    }
}

/// Batched renderer bound to one backend.
pub struct Renderer {
    config: RenderConfig,
    backend: Box<dyn RenderBackend>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Renderer {
    /// Validate `config` and create the selected backend.
    #[tracing::instrument(skip_all, fields(backend = %config.backend, batch = config.batch_size))]
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let backend: Box<dyn RenderBackend> = match config.backend {
            BackendKind::Host => Box::new(HostBackend::new(&config)),
            #[cfg(feature = "gpu")]
            BackendKind::Gpu => Box::new(crate::backend::gpu::GpuBackend::new(&config)?),
            #[cfg(not(feature = "gpu"))]
            BackendKind::Gpu => {
                return Err(Error::InvalidConfig("built without the `gpu` feature".into()));
            }
        };
        tracing::info!(
            width = config.image_width,
            height = config.image_height,
            frames_in_flight = config.frames_in_flight,
            "renderer ready"
        );
        Ok(Self { config, backend })
    }

    #[inline]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn make_loader(&self) -> Loader {
        Loader::new(self.backend.make_loader())
    }

    /// New environment over `scene` with the default camera.
    pub fn make_environment(&self, scene: &Arc<Scene>) -> Result<Environment> {
        let aspect = self.config.image_width as f32 / self.config.image_height as f32;
        let camera = Camera { aspect_ratio: aspect, ..Camera::default() };
        self.make_environment_with_camera(scene, camera)
    }

    pub fn make_environment_with_camera(&self, scene: &Arc<Scene>, camera: Camera) -> Result<Environment> {
        if scene.backend().kind() != self.backend.kind() {
            return Err(Error::BackendMismatch(format!(
                "scene loaded by the {} backend, renderer uses {}",
                scene.backend().kind(),
                self.backend.kind()
            )));
        }
        let backend = self.backend.make_environment(scene)?;
        Environment::new(Arc::clone(scene), backend, camera)
    }

    /// Render one frame; `envs[i]` is drawn into batch slot `i`.
    ///
    /// Pending TLAS work of every environment is flushed and synchronized
    /// before the dispatch.
    pub fn render(&mut self, envs: &mut [&mut Environment]) -> Result<()> {
        let expected = self.config.batch_size as usize;
        if envs.len() != expected {
            return Err(Error::BatchSizeMismatch { expected, actual: envs.len() });
        }
        for env in envs.iter_mut() {
            env.prepare()?;
        }
        for env in envs.iter_mut() {
            env.synchronize()?;
        }
        let views: Vec<&Environment> = envs.iter().map(|e| &**e).collect();
        self.backend.render(&views)
    }

    /// Read back the most recently rendered batch.
    pub fn frame(&self) -> Result<FrameImage> {
        self.backend.frame()
    }
}
