//! Error types for the batch renderer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loading, environment mutation and rendering.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic number at start of a scene blob
    #[error("Invalid scene file: expected magic 0x55555555, got {0:#010x}")]
    InvalidMagic(u32),

    /// Scene blob is truncated
    #[error("Unexpected end of scene data at position {0}")]
    UnexpectedEof(u64),

    /// Invalid data structure in scene blob
    #[error("Invalid scene structure: {0}")]
    InvalidStructure(String),

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// No GPU adapter matched the request
    #[error("No suitable GPU adapter found (device id {0})")]
    NoAdapter(u32),

    /// Logical device creation failed
    #[error("Failed to create GPU device: {0}")]
    RequestDevice(String),

    /// The device heap cannot satisfy an allocation
    #[error("Device heap exhausted: requested {requested} bytes, {available} bytes free")]
    DeviceOutOfMemory { requested: u64, available: u64 },

    /// A device operation failed (poll, map, submission)
    #[error("Device error: {0}")]
    Device(String),

    /// Handle was never issued or has already been retired
    #[error("Invalid {kind} handle: {id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    /// Index out of bounds (object, material, batch slot)
    #[error("{what} index {index} out of bounds (count: {count})")]
    OutOfRange { what: &'static str, index: usize, count: usize },

    /// Render call received the wrong number of environments
    #[error("Batch size mismatch: renderer expects {expected} environments, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// Environment, scene or loader belongs to a different backend
    #[error("Backend mismatch: {0}")]
    BackendMismatch(String),

    /// Rejected render configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Texture decoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a device error.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Whether the error leaves the GPU context unusable.
    ///
    /// Callers are expected to tear down the renderer after a fatal error
    /// instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoAdapter(_)
                | Self::RequestDevice(_)
                | Self::DeviceOutOfMemory { .. }
                | Self::Device(_)
        )
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;
