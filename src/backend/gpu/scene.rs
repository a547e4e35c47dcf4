//! Scene upload and the device resources of a loaded scene.

use std::any::Any;
use std::sync::Arc;

use super::memory::{DeviceAlloc, DeviceHeap};
use super::pack::{blas_image, tlas_image, SceneHeader, SCENE_HEADER_WORDS};
use super::stream::CommandStream;
use super::texture::GpuTextureManager;
use crate::backend::{BackendKind, LoadedScene, LoaderBackend, SceneBackend};
use crate::format::SceneLoadData;
use crate::loader::{resolve_texture_table, PreparedScene};
use crate::texture::{decode_image, AddressMode, TextureManager};
use crate::util::{align_up, Result, SECTION_ALIGN};

/// Device resources of one scene. Released when the last environment
/// referencing the scene is dropped.
pub struct GpuScene {
    heap: Arc<DeviceHeap>,
    _geometry: DeviceAlloc,
    _blases: DeviceAlloc,
    /// Relocatable default TLAS image; each environment uploads its own copy.
    default_tlas_image: Vec<u32>,
    /// Heap address of each object's BLAS image.
    blas_addrs: Vec<u32>,
    header_addr: u32,
    _textures: Arc<GpuTextureManager>,
}

impl GpuScene {
    #[inline]
    pub fn heap(&self) -> &Arc<DeviceHeap> {
        &self.heap
    }

    #[inline]
    pub fn header_addr(&self) -> u32 {
        self.header_addr
    }

    #[inline]
    pub fn blas_addrs(&self) -> &[u32] {
        &self.blas_addrs
    }

    #[inline]
    pub fn default_tlas_image(&self) -> &[u32] {
        &self.default_tlas_image
    }
}

impl SceneBackend for GpuScene {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Uploads scenes on the backend's loader stream.
pub struct GpuLoader {
    heap: Arc<DeviceHeap>,
    textures: Arc<GpuTextureManager>,
    stream: CommandStream,
}

impl GpuLoader {
    pub fn new(heap: Arc<DeviceHeap>, textures: Arc<GpuTextureManager>) -> Self {
        let stream = CommandStream::new(Arc::clone(heap.context()), "rtbatch_loader");
        Self { heap, textures, stream }
    }
}

impl LoaderBackend for GpuLoader {
    #[tracing::instrument(skip_all, fields(payload = data.header.total_bytes))]
    fn load_scene(&mut self, data: &SceneLoadData, prepared: &PreparedScene) -> Result<LoadedScene> {
        let stream = &mut self.stream;
        let textures = &self.textures;
        let texture_table = resolve_texture_table(data, |path, format| {
            textures.load(path, format, AddressMode::Wrap, &mut *stream, decode_image)
        });

        // payload | texture table | scene header, each section 256-aligned
        let table_offset = align_up(data.header.total_bytes, SECTION_ALIGN);
        let table_words = texture_table.words();
        let header_offset = align_up(table_offset + table_words.len() as u64 * 4, SECTION_ALIGN);
        let geometry = self.heap.alloc(header_offset + SCENE_HEADER_WORDS as u64 * 4)?;

        stream.upload(&geometry, 0, data.payload())?;
        stream.upload_words(&geometry, table_offset, &table_words)?;
        let header = SceneHeader {
            vertices: geometry.addr(0),
            indices: geometry.addr(data.header.index_offset),
            materials: geometry.addr(data.header.material_offset),
            texture_table: geometry.addr(table_offset),
            num_materials: prepared.materials.len() as u32,
        };
        stream.upload_words(&geometry, header_offset, &header.words())?;

        let images: Vec<Vec<u32>> = prepared.blases.iter().map(blas_image).collect();
        let mut offsets = Vec::with_capacity(images.len());
        let mut total = 0u64;
        for img in &images {
            offsets.push(total);
            total = align_up(total + img.len() as u64 * 4, SECTION_ALIGN);
        }
        let blases = self.heap.alloc(total)?;
        for (img, &off) in images.iter().zip(&offsets) {
            stream.upload_words(&blases, off, img)?;
        }
        let blas_addrs: Vec<u32> = offsets.iter().map(|&off| blases.addr(off)).collect();

        let default_tlas_image = tlas_image(&prepared.default_tlas, &blas_addrs);

        stream.synchronize()?;
        tracing::info!(
            geometry_bytes = geometry.size(),
            blas_bytes = blases.size(),
            heap_free = self.heap.available(),
            "scene uploaded"
        );

        Ok(LoadedScene {
            backend: Box::new(GpuScene {
                heap: Arc::clone(&self.heap),
                header_addr: geometry.addr(header_offset),
                _geometry: geometry,
                _blases: blases,
                default_tlas_image,
                blas_addrs,
                _textures: Arc::clone(&self.textures),
            }),
            texture_table,
        })
    }
}
