//! Textures stored in the device heap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::memory::{DeviceAlloc, DeviceHeap};
use super::pack::texture_image;
use super::stream::CommandStream;
use crate::texture::{AddressMode, DecodedImage, TextureFormat, TextureHandle, TextureManager};
use crate::util::Result;

#[derive(Default)]
struct GpuTextureState {
    by_path: HashMap<PathBuf, TextureHandle>,
    allocs: Vec<DeviceAlloc>,
}

/// Heap-resident texture cache. A handle is the word address of the
/// texture header, so 0 never names a texture.
pub struct GpuTextureManager {
    heap: Arc<DeviceHeap>,
    state: Mutex<GpuTextureState>,
}

impl GpuTextureManager {
    pub fn new(heap: Arc<DeviceHeap>) -> Self {
        Self { heap, state: Mutex::new(GpuTextureState::default()) }
    }

    pub fn len(&self) -> usize {
        self.state.lock().allocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TextureManager for GpuTextureManager {
    type Stream = CommandStream;

    fn load<F>(
        &self,
        path: &Path,
        format: TextureFormat,
        address_mode: AddressMode,
        stream: &mut CommandStream,
        decode: F,
    ) -> Result<TextureHandle>
    where
        F: FnOnce(&Path) -> Result<DecodedImage>,
    {
        if let Some(&h) = self.state.lock().by_path.get(path) {
            return Ok(h);
        }
        let image = decode(path)?;
        let words = texture_image(&image, format, address_mode);
        let alloc = self.heap.alloc(words.len() as u64 * 4)?;
        stream.upload_words(&alloc, 0, &words)?;
        let handle = TextureHandle(alloc.addr(0));
        tracing::debug!(path = %path.display(), width = image.width, height = image.height, "texture uploaded");

        let mut state = self.state.lock();
        state.by_path.insert(path.to_path_buf(), handle);
        state.allocs.push(alloc);
        Ok(handle)
    }
}
