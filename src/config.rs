//! Renderer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::util::{Error, Result};

/// Construction parameters of a [`crate::Renderer`].
///
/// Fixed for the renderer's lifetime. Loadable from JSON; missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Environments rendered per call (B).
    pub batch_size: u32,
    pub image_width: u32,
    pub image_height: u32,
    /// Index into the enumerated GPU adapters.
    pub device_id: u32,
    pub backend: BackendKind,
    /// Parameter ring length (F >= 1).
    pub frames_in_flight: u32,
    /// Capacity of the device heap holding geometry, accelerators and textures.
    pub heap_bytes: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            image_width: 64,
            image_height: 64,
            device_id: 0,
            backend: BackendKind::Gpu,
            frames_in_flight: 2,
            heap_bytes: 64 << 20,
        }
    }
}

impl RenderConfig {
    pub fn new(batch_size: u32, image_width: u32, image_height: u32) -> Self {
        Self { batch_size, image_width, image_height, ..Default::default() }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Pixels in one rendered batch.
    #[inline]
    pub fn pixels_per_batch(&self) -> u64 {
        self.batch_size as u64 * self.image_width as u64 * self.image_height as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(Error::InvalidConfig(format!(
                "image size {}x{} is empty",
                self.image_width, self.image_height
            )));
        }
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidConfig("frames_in_flight must be at least 1".into()));
        }
        if self.heap_bytes < 4096 {
            return Err(Error::InvalidConfig(format!("heap_bytes {} is too small", self.heap_bytes)));
        }
        if self.pixels_per_batch() > u32::MAX as u64 {
            return Err(Error::InvalidConfig("batch output exceeds 2^32 pixels".into()));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RenderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_batch() {
        let cfg = RenderConfig::new(0, 8, 8);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let cfg = RenderConfig::new(1, 0, 8);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = RenderConfig::from_json(r#"{"batch_size": 4, "backend": "host"}"#).unwrap();
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.backend, BackendKind::Host);
        assert_eq!(cfg.image_width, 64);
        assert!(RenderConfig::from_json(r#"{"frames_in_flight": 0}"#).is_err());
        assert!(matches!(RenderConfig::from_json("{"), Err(Error::Json(_))));
    }
}
