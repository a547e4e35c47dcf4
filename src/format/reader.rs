//! Scene blob reader.
//!
//! Parses the metadata sections eagerly and keeps the staged payload either
//! memory-mapped or in an owned buffer until the loader uploads it.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use super::layout::*;
use crate::util::{align_up, Error, Result, SECTION_ALIGN};

/// Backing storage of a scene blob.
enum Storage {
    /// Memory-mapped file (preferred for large scenes)
    Mmap(Mmap),
    /// Owned bytes (buffered read or in-memory blob)
    Owned(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mmap(m) => m,
            Storage::Owned(v) => v,
        }
    }
}

/// A parsed, validated scene blob ready to be handed to a loader.
pub struct SceneLoadData {
    pub header: StagingHeader,
    pub meshes: Vec<MeshInfo>,
    pub objects: Vec<ObjectInfo>,
    pub textures: TextureMetadata,
    pub lights: Vec<LightDesc>,
    pub instances: Vec<InstanceDesc>,
    /// Directory texture names are resolved against.
    pub base_dir: Option<PathBuf>,
    storage: Storage,
    payload_offset: usize,
}

impl std::fmt::Debug for SceneLoadData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneLoadData")
            .field("header", &self.header)
            .field("meshes", &self.meshes.len())
            .field("objects", &self.objects.len())
            .field("lights", &self.lights.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl SceneLoadData {
    /// Open a scene blob with memory mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, true)
    }

    /// Open a scene blob with optional memory mapping.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if size < HEADER_REGION {
            return Err(Error::UnexpectedEof(size));
        }

        let storage = if use_mmap {
            // Safety: the file is opened read-only and only read through the map
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            Storage::Mmap(mmap)
        } else {
            let mut buf = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buf)?;
            Storage::Owned(buf)
        };

        let mut data = Self::parse(storage)?;
        data.base_dir = path.parent().map(Path::to_path_buf);
        Ok(data)
    }

    /// Parse an in-memory scene blob.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::parse(Storage::Owned(bytes.into()))
    }

    /// Set the directory used to resolve texture names.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn parse(storage: Storage) -> Result<Self> {
        let bytes = storage.bytes();
        let mut cur = BlobCursor::new(bytes);

        let magic = cur.read_u32()?;
        if magic != SCENE_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        let header = read_header(&mut cur)?;
        validate_header(&header)?;
        cur.seek(HEADER_REGION as usize)?;

        let mut meshes = Vec::with_capacity(header.num_meshes.min(1 << 16) as usize);
        for _ in 0..header.num_meshes {
            meshes.push(MeshInfo {
                index_offset: cur.read_u32()?,
                num_triangles: cur.read_u32()?,
                num_vertices: cur.read_u32()?,
            });
        }

        let mut objects = Vec::with_capacity(header.num_objects.min(1 << 16) as usize);
        for _ in 0..header.num_objects {
            objects.push(ObjectInfo {
                mesh_index: cur.read_u32()?,
                num_meshes: cur.read_u32()?,
            });
        }

        let textures = read_texture_metadata(&mut cur)?;

        let num_lights = cur.read_u32()?;
        let mut lights = Vec::with_capacity(num_lights.min(1 << 16) as usize);
        for _ in 0..num_lights {
            lights.push(LightDesc {
                position: cur.read_vec3()?,
                color: cur.read_vec3()?,
            });
        }

        let num_instances = cur.read_u32()?;
        let mut instances = Vec::with_capacity(num_instances.min(1 << 16) as usize);
        for _ in 0..num_instances {
            let object = cur.read_u32()?;
            let material = cur.read_u32()?;
            let mut transform = [0.0f32; 12];
            for v in &mut transform {
                *v = cur.read_f32()?;
            }
            instances.push(InstanceDesc { object, material, transform });
        }

        let payload_offset = align_up(cur.pos() as u64, SECTION_ALIGN) as usize;
        let payload_end = (payload_offset as u64)
            .checked_add(header.total_bytes)
            .ok_or_else(|| Error::invalid("payload size overflows"))?;
        if payload_end > bytes.len() as u64 {
            return Err(Error::UnexpectedEof(bytes.len() as u64));
        }

        let data = Self {
            header,
            meshes,
            objects,
            textures,
            lights,
            instances,
            base_dir: None,
            storage,
            payload_offset,
        };
        data.validate_references()?;
        Ok(data)
    }

    /// Cross-check mesh, object, material and index references.
    fn validate_references(&self) -> Result<()> {
        let h = &self.header;
        for (i, mesh) in self.meshes.iter().enumerate() {
            if mesh.index_offset % 3 != 0 {
                return Err(Error::invalid(format!("mesh {i} does not start on a triangle")));
            }
            let end = mesh.index_offset as u64 + mesh.num_triangles as u64 * 3;
            if end > h.num_indices as u64 {
                return Err(Error::invalid(format!(
                    "mesh {i} indices [{}, {end}) exceed index count {}",
                    mesh.index_offset, h.num_indices
                )));
            }
        }
        for (i, obj) in self.objects.iter().enumerate() {
            if obj.mesh_index as u64 + obj.num_meshes as u64 > h.num_meshes as u64 {
                return Err(Error::invalid(format!("object {i} references missing meshes")));
            }
        }
        if self.textures.materials.len() != h.num_materials as usize {
            return Err(Error::invalid(format!(
                "texture table lists {} materials, header has {}",
                self.textures.materials.len(),
                h.num_materials
            )));
        }
        for (m, row) in self.textures.materials.iter().enumerate() {
            for slot in TextureSlot::ALL {
                let idx = row[slot.index()];
                if idx != NO_TEXTURE && idx as usize >= self.textures.names[slot.index()].len() {
                    return Err(Error::invalid(format!(
                        "material {m} {} texture index {idx} out of range",
                        slot.name()
                    )));
                }
            }
        }
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.object >= h.num_objects {
                return Err(Error::invalid(format!("instance {i} references object {}", inst.object)));
            }
            if inst.material >= h.num_materials {
                return Err(Error::invalid(format!(
                    "instance {i} references material {}",
                    inst.material
                )));
            }
        }
        let indices = self.index_bytes();
        for chunk in indices.chunks_exact(4) {
            if LittleEndian::read_u32(chunk) >= h.num_vertices {
                return Err(Error::invalid("index references a vertex past the vertex count"));
            }
        }
        Ok(())
    }

    /// Raw staged payload (vertices, indices, materials).
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let start = self.payload_offset;
        &self.storage.bytes()[start..start + self.header.total_bytes as usize]
    }

    fn index_bytes(&self) -> &[u8] {
        let start = self.header.index_offset as usize;
        &self.payload()[start..start + self.header.num_indices as usize * 4]
    }

    /// Copy of the vertex section.
    pub fn vertices(&self) -> Vec<Vertex> {
        let bytes = &self.payload()[..self.header.num_vertices as usize * std::mem::size_of::<Vertex>()];
        bytemuck::pod_collect_to_vec(bytes)
    }

    /// Copy of the (global) index section.
    pub fn indices(&self) -> Vec<u32> {
        bytemuck::pod_collect_to_vec(self.index_bytes())
    }

    /// Copy of the material section.
    pub fn materials(&self) -> Vec<Material> {
        let start = self.header.material_offset as usize;
        let bytes = &self.payload()[start..start + self.header.material_bytes as usize];
        bytemuck::pod_collect_to_vec(bytes)
    }

    /// Number of meshes (object parts) referenced by `object`.
    pub fn object_meshes(&self, object: usize) -> &[MeshInfo] {
        match self.objects.get(object) {
            Some(o) => {
                let start = o.mesh_index as usize;
                &self.meshes[start..start + o.num_meshes as usize]
            }
            None => &[],
        }
    }
}

fn read_header(cur: &mut BlobCursor<'_>) -> Result<StagingHeader> {
    Ok(StagingHeader {
        num_vertices: cur.read_u32()?,
        num_indices: cur.read_u32()?,
        num_meshes: cur.read_u32()?,
        num_objects: cur.read_u32()?,
        num_materials: cur.read_u32()?,
        reserved: cur.read_u32()?,
        index_offset: cur.read_u64()?,
        material_offset: cur.read_u64()?,
        material_bytes: cur.read_u64()?,
        total_bytes: cur.read_u64()?,
    })
}

fn validate_header(h: &StagingHeader) -> Result<()> {
    if h.num_indices % 3 != 0 {
        return Err(Error::invalid(format!("index count {} is not a multiple of 3", h.num_indices)));
    }
    if h.index_offset % SECTION_ALIGN != 0 || h.material_offset % SECTION_ALIGN != 0 {
        return Err(Error::invalid("payload sections are not 256-byte aligned"));
    }
    let vertex_bytes = h.num_vertices as u64 * std::mem::size_of::<Vertex>() as u64;
    if h.index_offset < vertex_bytes {
        return Err(Error::invalid("index section overlaps vertex section"));
    }
    let index_end = h
        .index_offset
        .checked_add(h.num_indices as u64 * 4)
        .ok_or_else(|| Error::invalid("index section end overflows"))?;
    if h.material_offset < index_end {
        return Err(Error::invalid("material section overlaps index section"));
    }
    if h.material_bytes != h.num_materials as u64 * std::mem::size_of::<Material>() as u64 {
        return Err(Error::invalid(format!(
            "material bytes {} do not match {} materials",
            h.material_bytes, h.num_materials
        )));
    }
    let material_end = h
        .material_offset
        .checked_add(h.material_bytes)
        .ok_or_else(|| Error::invalid("material section end overflows"))?;
    if h.total_bytes < material_end {
        return Err(Error::invalid("payload size smaller than its sections"));
    }
    Ok(())
}

fn read_texture_metadata(cur: &mut BlobCursor<'_>) -> Result<TextureMetadata> {
    let mut meta = TextureMetadata::default();
    for slot in TextureSlot::ALL {
        let count = cur.read_u32()?;
        let names = &mut meta.names[slot.index()];
        for _ in 0..count {
            names.push(cur.read_cstr()?);
        }
    }
    let num_materials = cur.read_u32()?;
    for _ in 0..num_materials {
        let mut row = [NO_TEXTURE; NUM_TEXTURE_SLOTS];
        for v in &mut row {
            *v = cur.read_u32()?;
        }
        meta.materials.push(row);
    }
    let env_map = cur.read_cstr()?;
    meta.env_map = (!env_map.is_empty()).then_some(env_map);
    Ok(meta)
}

/// Bounds-checked little-endian cursor over blob bytes.
struct BlobCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::UnexpectedEof(self.data.len() as u64));
        }
        self.pos = pos;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(Error::UnexpectedEof(self.pos as u64));
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    fn read_vec3(&mut self) -> Result<[f32; 3]> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    /// Read a NUL-terminated UTF-8 string.
    fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnexpectedEof(self.data.len() as u64))?;
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|_| Error::invalid("texture name is not valid UTF-8"))?
            .to_owned();
        self.pos += len + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::writer::{MeshDesc, ObjectDesc, SceneBlobWriter, SceneDescription};

    fn one_triangle() -> Vec<u8> {
        let desc = SceneDescription {
            objects: vec![ObjectDesc {
                meshes: vec![MeshDesc::triangle(
                    [0.0, 0.0, 0.0],
                    [1.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0],
                )],
            }],
            materials: vec![Default::default()],
            lights: vec![],
            instances: vec![InstanceDesc {
                object: 0,
                material: 0,
                transform: InstanceDesc::IDENTITY,
            }],
            env_map: None,
        };
        SceneBlobWriter::to_bytes(&desc).expect("serialize")
    }

    #[test]
    fn test_parse_minimal_scene() {
        let data = SceneLoadData::from_bytes(one_triangle()).expect("parse");
        assert_eq!(data.header.num_vertices, 3);
        assert_eq!(data.header.num_indices, 3);
        assert_eq!(data.meshes.len(), 1);
        assert_eq!(data.objects.len(), 1);
        assert_eq!(data.instances.len(), 1);
        assert_eq!(data.indices(), vec![0, 1, 2]);
        assert_eq!(data.vertices()[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(data.materials().len(), 1);
        assert_eq!(data.object_meshes(0).len(), 1);
        assert!(data.object_meshes(3).is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = one_triangle();
        bytes[0] = 0x12;
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(_)));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = one_triangle();
        bytes.truncate(bytes.len() - 8);
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof(_)));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = one_triangle()[..20].to_vec();
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof(_)));
    }

    /// Magic plus a header with the given counts and offsets, padded to the
    /// header region.
    fn raw_header(counts: [u32; 6], offsets: [u64; 4]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SCENE_MAGIC.to_le_bytes());
        for v in counts {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for v in offsets {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.resize(HEADER_REGION as usize, 0);
        bytes
    }

    #[test]
    fn test_overflowing_offsets_are_rejected() {
        // 768 indices starting just below u64::MAX
        let mut bytes = raw_header([0, 768, 0, 0, 0, 0], [0xFFFF_FFFF_FFFF_FF00, 0, 0, 0]);
        bytes.resize(512, 0);
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)), "{err:?}");

        // 16 materials whose section end wraps around
        let bytes = raw_header([0, 0, 0, 0, 16, 0], [0, 0xFFFF_FFFF_FFFF_FF00, 16 * 32, u64::MAX]);
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)), "{err:?}");
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut bytes = raw_header([0; 6], [0, 0, 0, 0xFFFF_FFFF_FFFF_FF00]);
        // empty texture tables, zero materials, no env map, no lights or instances
        bytes.resize(bytes.len() + (NUM_TEXTURE_SLOTS + 3) * 4 + 1, 0);
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)), "{err:?}");
    }

    #[test]
    fn test_huge_counts_hit_eof() {
        for counts in [[0, 0, u32::MAX, 0, 0, 0], [0, 0, 0, u32::MAX, 0, 0]] {
            let bytes = raw_header(counts, [0; 4]);
            let err = SceneLoadData::from_bytes(bytes).unwrap_err();
            assert!(matches!(err, Error::UnexpectedEof(_)), "{err:?}");
        }
    }

    #[test]
    fn test_bad_instance_reference() {
        let mut bytes = one_triangle();
        // instance count 1, object 0, material 0, first transform column
        let needle: Vec<u8> = [1u32, 0, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .chain(1.0f32.to_le_bytes())
            .collect();
        let pos = bytes
            .windows(needle.len())
            .rposition(|w| w == needle.as_slice())
            .expect("instance record");
        bytes[pos + 4..pos + 8].copy_from_slice(&7u32.to_le_bytes());
        let err = SceneLoadData::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }
}
