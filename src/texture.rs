//! Texture manager interface and the host-memory implementation.
//!
//! Textures are decoded through a caller-supplied callback (the default uses
//! the `image` crate) and cached by path. A [`TextureHandle`] of 0 is the
//! null texture.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::TextureSlot;
use crate::util::{Error, Result};

/// Opaque texture reference; 0 means "no texture".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const NULL: TextureHandle = TextureHandle(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Storage format requested for a texture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Srgb,
    Rgba8Unorm,
    Rg8Unorm,
    R8Unorm,
    Rgba32Float,
}

impl TextureFormat {
    /// Format used for each material texture slot.
    pub fn for_slot(slot: TextureSlot) -> Self {
        match slot {
            TextureSlot::Base | TextureSlot::Specular => TextureFormat::Rgba8Srgb,
            TextureSlot::MetallicRoughness => TextureFormat::Rgba8Unorm,
            TextureSlot::Normal | TextureSlot::Clearcoat | TextureSlot::Anisotropic => TextureFormat::Rg8Unorm,
            TextureSlot::Emittance => TextureFormat::Rgba32Float,
            TextureSlot::Transmission => TextureFormat::R8Unorm,
        }
    }

    /// Numeric tag stored in device texture headers.
    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Out-of-range texture coordinate handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
}

impl AddressMode {
    /// Numeric tag stored in device texture headers.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Map a texture coordinate to a texel index in `[0, size)`.
    #[inline]
    pub fn texel(self, coord: f32, size: u32) -> u32 {
        let c = match self {
            AddressMode::Wrap => coord - coord.floor(),
            AddressMode::Clamp => coord.clamp(0.0, 1.0),
        };
        ((c * size as f32) as u32).min(size.saturating_sub(1))
    }
}

/// Decoded pixels as tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Nearest-neighbour sample; returns normalized RGBA.
    pub fn sample(&self, u: f32, v: f32, mode: AddressMode) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [1.0; 4];
        }
        let x = mode.texel(u, self.width) as usize;
        let y = mode.texel(v, self.height) as usize;
        let i = (y * self.width as usize + x) * 4;
        let px = &self.pixels[i..i + 4];
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ]
    }
}

/// Default decoder: any format the `image` crate was built with, to RGBA8.
pub fn decode_image(path: &Path) -> Result<DecodedImage> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();
    Ok(DecodedImage { pixels: img.into_raw(), width, height })
}

/// Texture loading collaborator.
///
/// Implementations cache by path: loading the same path twice returns the
/// same handle without decoding again. `Stream` is the backend's upload
/// stream; the decoded host buffer is released once the upload completes.
pub trait TextureManager {
    type Stream;

    fn load<F>(
        &self,
        path: &Path,
        format: TextureFormat,
        address_mode: AddressMode,
        stream: &mut Self::Stream,
        decode: F,
    ) -> Result<TextureHandle>
    where
        F: FnOnce(&Path) -> Result<DecodedImage>;
}

/// A texture held in host memory.
#[derive(Debug, Clone)]
pub struct HostTexture {
    pub image: DecodedImage,
    pub format: TextureFormat,
    pub address_mode: AddressMode,
}

impl HostTexture {
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        self.image.sample(u, v, self.address_mode)
    }
}

#[derive(Default)]
struct HostTextureState {
    by_path: HashMap<PathBuf, TextureHandle>,
    /// Index 0 is the null texture.
    textures: Vec<Option<Arc<HostTexture>>>,
}

/// Host-memory texture manager.
#[derive(Default)]
pub struct HostTextureManager {
    state: Mutex<HostTextureState>,
}

impl HostTextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a handle; null and unknown handles yield `None`.
    pub fn get(&self, handle: TextureHandle) -> Option<Arc<HostTexture>> {
        let state = self.state.lock();
        state.textures.get(handle.0 as usize).cloned().flatten()
    }

    /// Number of distinct textures loaded.
    pub fn len(&self) -> usize {
        self.state.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TextureManager for HostTextureManager {
    type Stream = ();

    fn load<F>(
        &self,
        path: &Path,
        format: TextureFormat,
        address_mode: AddressMode,
        _stream: &mut (),
        decode: F,
    ) -> Result<TextureHandle>
    where
        F: FnOnce(&Path) -> Result<DecodedImage>,
    {
        if let Some(&h) = self.state.lock().by_path.get(path) {
            return Ok(h);
        }
        let image = decode(path)?;
        let mut state = self.state.lock();
        if state.textures.is_empty() {
            state.textures.push(None);
        }
        let handle = TextureHandle(state.textures.len() as u32);
        state.textures.push(Some(Arc::new(HostTexture { image, format, address_mode })));
        state.by_path.insert(path.to_path_buf(), handle);
        Ok(handle)
    }
}
