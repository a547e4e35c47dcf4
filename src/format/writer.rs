//! Minimal scene blob serializer.
//!
//! Lays out a [`SceneDescription`] in the preprocessed format. No mesh
//! optimisation is performed; meshes are written as given, with indices
//! rebased onto the shared vertex array.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::layout::*;
use crate::util::{align_up_usize, Error, Result};

const ALIGN: usize = 256;

/// One mesh: vertices plus mesh-local triangle indices.
#[derive(Debug, Clone, Default)]
pub struct MeshDesc {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshDesc {
    /// Single triangle with a flat normal.
    pub fn triangle(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Self {
        let n = flat_normal(a, b, c);
        let uv = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        Self {
            vertices: [a, b, c]
                .iter()
                .zip(uv)
                .map(|(&position, uv)| Vertex { position, normal: n, uv })
                .collect(),
            indices: vec![0, 1, 2],
        }
    }

    /// Axis-aligned quad in the XY plane centred at the origin, facing +Z.
    pub fn quad(half_extent: f32) -> Self {
        let h = half_extent;
        let n = [0.0, 0.0, 1.0];
        let corners = [
            ([-h, -h, 0.0], [0.0, 0.0]),
            ([h, -h, 0.0], [1.0, 0.0]),
            ([h, h, 0.0], [1.0, 1.0]),
            ([-h, h, 0.0], [0.0, 1.0]),
        ];
        Self {
            vertices: corners
                .iter()
                .map(|&(position, uv)| Vertex { position, normal: n, uv })
                .collect(),
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Axis-aligned cube centred at the origin with per-face normals.
    pub fn cube(half_extent: f32) -> Self {
        let h = half_extent;
        let mut mesh = Self::default();
        // (normal, tangent u, tangent v)
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        for (n, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            for (su, sv) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = [
                    h * (n[0] + su * u[0] + sv * v[0]),
                    h * (n[1] + su * u[1] + sv * v[1]),
                    h * (n[2] + su * u[2] + sv * v[2]),
                ];
                mesh.vertices.push(Vertex {
                    position,
                    normal: n,
                    uv: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5],
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }
}

fn flat_normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let e1 = glam::Vec3::from(b) - glam::Vec3::from(a);
    let e2 = glam::Vec3::from(c) - glam::Vec3::from(a);
    e1.cross(e2).normalize_or_zero().to_array()
}

/// An object: meshes that share one bottom-level accelerator.
#[derive(Debug, Clone, Default)]
pub struct ObjectDesc {
    pub meshes: Vec<MeshDesc>,
}

/// A material with optional texture file names per slot.
#[derive(Debug, Clone, Default)]
pub struct MaterialDesc {
    pub material: Material,
    pub textures: [Option<String>; NUM_TEXTURE_SLOTS],
}

impl MaterialDesc {
    /// Untextured material with the given base colour.
    pub fn color(rgba: [f32; 4]) -> Self {
        Self {
            material: Material { base_color: rgba, ..Default::default() },
            textures: Default::default(),
        }
    }
}

/// Complete scene content to serialize.
#[derive(Debug, Clone, Default)]
pub struct SceneDescription {
    pub objects: Vec<ObjectDesc>,
    pub materials: Vec<MaterialDesc>,
    pub lights: Vec<LightDesc>,
    pub instances: Vec<InstanceDesc>,
    /// Environment map file name, relative to the blob.
    pub env_map: Option<String>,
}

impl SceneDescription {
    /// Small demo scene: a floor quad and two cubes under two lights.
    pub fn demo() -> Self {
        let mut floor = InstanceDesc::IDENTITY;
        // rotate the +Z quad to face +Y, scaled x10, lowered to y = -1
        floor[..9].copy_from_slice(&[10.0, 0.0, 0.0, 0.0, 0.0, -10.0, 0.0, 10.0, 0.0]);
        floor[10] = -1.0;
        let at = |x: f32, z: f32| {
            let mut t = InstanceDesc::IDENTITY;
            t[9] = x;
            t[11] = z;
            t
        };
        Self {
            objects: vec![
                ObjectDesc { meshes: vec![MeshDesc::quad(1.0)] },
                ObjectDesc { meshes: vec![MeshDesc::cube(1.0)] },
            ],
            materials: vec![
                MaterialDesc::color([0.8, 0.8, 0.8, 1.0]),
                MaterialDesc::color([0.9, 0.2, 0.2, 1.0]),
                MaterialDesc::color([0.2, 0.4, 0.9, 1.0]),
            ],
            lights: vec![
                LightDesc { position: [4.0, 6.0, -4.0], color: [0.8, 0.8, 0.8] },
                LightDesc { position: [-5.0, 3.0, -2.0], color: [0.2, 0.2, 0.3] },
            ],
            instances: vec![
                InstanceDesc { object: 0, material: 0, transform: floor },
                InstanceDesc { object: 1, material: 1, transform: at(-1.5, 0.0) },
                InstanceDesc { object: 1, material: 2, transform: at(1.5, 1.0) },
            ],
            env_map: None,
        }
    }
}

/// Serializer for [`SceneDescription`].
pub struct SceneBlobWriter;

impl SceneBlobWriter {
    /// Serialize to an in-memory blob.
    pub fn to_bytes(desc: &SceneDescription) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Self::write_to(&mut out, desc)?;
        Ok(out)
    }

    /// Serialize to a file.
    pub fn write(path: impl AsRef<Path>, desc: &SceneDescription) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = Self::to_bytes(desc)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn write_to(out: &mut Vec<u8>, desc: &SceneDescription) -> Result<()> {
        // Flatten meshes object by object so each object's meshes are contiguous.
        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut meshes: Vec<MeshInfo> = Vec::new();
        let mut objects: Vec<ObjectInfo> = Vec::with_capacity(desc.objects.len());

        for (o, object) in desc.objects.iter().enumerate() {
            objects.push(ObjectInfo {
                mesh_index: meshes.len() as u32,
                num_meshes: object.meshes.len() as u32,
            });
            for mesh in &object.meshes {
                if mesh.indices.len() % 3 != 0 {
                    return Err(Error::invalid(format!("object {o} has a partial triangle")));
                }
                let base = vertices.len() as u32;
                if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= mesh.vertices.len()) {
                    return Err(Error::invalid(format!("object {o} index {bad} out of range")));
                }
                meshes.push(MeshInfo {
                    index_offset: indices.len() as u32,
                    num_triangles: (mesh.indices.len() / 3) as u32,
                    num_vertices: mesh.vertices.len() as u32,
                });
                vertices.extend_from_slice(&mesh.vertices);
                indices.extend(mesh.indices.iter().map(|i| i + base));
            }
        }

        for (i, inst) in desc.instances.iter().enumerate() {
            if inst.object as usize >= desc.objects.len() || inst.material as usize >= desc.materials.len() {
                return Err(Error::invalid(format!("instance {i} has dangling references")));
            }
        }

        let vertex_bytes = vertices.len() * std::mem::size_of::<Vertex>();
        let index_offset = align_up_usize(vertex_bytes, ALIGN);
        let material_offset = align_up_usize(index_offset + indices.len() * 4, ALIGN);
        let material_bytes = desc.materials.len() * std::mem::size_of::<Material>();
        let total_bytes = align_up_usize(material_offset + material_bytes, ALIGN);

        out.write_u32::<LittleEndian>(SCENE_MAGIC)?;
        out.write_u32::<LittleEndian>(vertices.len() as u32)?;
        out.write_u32::<LittleEndian>(indices.len() as u32)?;
        out.write_u32::<LittleEndian>(meshes.len() as u32)?;
        out.write_u32::<LittleEndian>(objects.len() as u32)?;
        out.write_u32::<LittleEndian>(desc.materials.len() as u32)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u64::<LittleEndian>(index_offset as u64)?;
        out.write_u64::<LittleEndian>(material_offset as u64)?;
        out.write_u64::<LittleEndian>(material_bytes as u64)?;
        out.write_u64::<LittleEndian>(total_bytes as u64)?;
        pad_to(out, ALIGN);

        for mesh in &meshes {
            out.write_u32::<LittleEndian>(mesh.index_offset)?;
            out.write_u32::<LittleEndian>(mesh.num_triangles)?;
            out.write_u32::<LittleEndian>(mesh.num_vertices)?;
        }
        for object in &objects {
            out.write_u32::<LittleEndian>(object.mesh_index)?;
            out.write_u32::<LittleEndian>(object.num_meshes)?;
        }

        write_texture_metadata(out, &desc.materials, desc.env_map.as_deref())?;

        out.write_u32::<LittleEndian>(desc.lights.len() as u32)?;
        for light in &desc.lights {
            for v in light.position.iter().chain(&light.color) {
                out.write_f32::<LittleEndian>(*v)?;
            }
        }

        out.write_u32::<LittleEndian>(desc.instances.len() as u32)?;
        for inst in &desc.instances {
            out.write_u32::<LittleEndian>(inst.object)?;
            out.write_u32::<LittleEndian>(inst.material)?;
            for v in &inst.transform {
                out.write_f32::<LittleEndian>(*v)?;
            }
        }
        pad_to(out, ALIGN);

        let payload_start = out.len();
        out.extend_from_slice(bytemuck::cast_slice(&vertices));
        pad_to(out, ALIGN);
        debug_assert_eq!(out.len() - payload_start, index_offset);
        out.extend_from_slice(bytemuck::cast_slice(&indices));
        pad_to(out, ALIGN);
        let materials: Vec<Material> = desc.materials.iter().map(|m| m.material).collect();
        out.extend_from_slice(bytemuck::cast_slice(&materials));
        pad_to(out, ALIGN);
        out.resize(payload_start + total_bytes, 0);
        Ok(())
    }
}

/// Deduplicate texture names per slot and emit the name lists, the index
/// table and the environment map name (empty for none).
fn write_texture_metadata(out: &mut Vec<u8>, materials: &[MaterialDesc], env_map: Option<&str>) -> Result<()> {
    let mut names: [Vec<&str>; NUM_TEXTURE_SLOTS] = Default::default();
    let mut lookup: [HashMap<&str, u32>; NUM_TEXTURE_SLOTS] = Default::default();
    let mut rows = Vec::with_capacity(materials.len());

    for mat in materials {
        let mut row = [NO_TEXTURE; NUM_TEXTURE_SLOTS];
        for slot in TextureSlot::ALL {
            let s = slot.index();
            if let Some(name) = mat.textures[s].as_deref() {
                let idx = *lookup[s].entry(name).or_insert_with(|| {
                    names[s].push(name);
                    (names[s].len() - 1) as u32
                });
                row[s] = idx;
            }
        }
        rows.push(row);
    }

    for list in &names {
        out.write_u32::<LittleEndian>(list.len() as u32)?;
        for name in list {
            write_cstr(out, name)?;
        }
    }
    out.write_u32::<LittleEndian>(rows.len() as u32)?;
    for row in &rows {
        for v in row {
            out.write_u32::<LittleEndian>(*v)?;
        }
    }
    write_cstr(out, env_map.unwrap_or(""))
}

fn write_cstr(out: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(Error::invalid(format!("texture name {name:?} contains NUL")));
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    Ok(())
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    let len = align_up_usize(out.len(), align);
    out.resize(len, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SceneLoadData;

    #[test]
    fn test_sections_are_aligned() {
        let desc = SceneDescription {
            objects: vec![
                ObjectDesc { meshes: vec![MeshDesc::cube(1.0)] },
                ObjectDesc { meshes: vec![MeshDesc::quad(2.0), MeshDesc::quad(1.0)] },
            ],
            materials: vec![MaterialDesc::color([1.0, 0.0, 0.0, 1.0])],
            lights: vec![LightDesc { position: [0.0, 5.0, 0.0], color: [1.0; 3] }],
            instances: vec![InstanceDesc { object: 1, material: 0, transform: InstanceDesc::IDENTITY }],
            env_map: None,
        };
        let bytes = SceneBlobWriter::to_bytes(&desc).expect("serialize");
        assert_eq!(bytes.len() % 256, 0);

        let data = SceneLoadData::from_bytes(bytes).expect("parse");
        assert_eq!(data.header.index_offset % 256, 0);
        assert_eq!(data.header.material_offset % 256, 0);
        assert_eq!(data.header.num_vertices, 24 + 4 + 4);
        assert_eq!(data.objects[1], ObjectInfo { mesh_index: 1, num_meshes: 2 });
        // second quad's indices are rebased past the cube and first quad
        let idx = data.indices();
        let second_quad = data.meshes[2];
        assert_eq!(idx[second_quad.index_offset as usize], 28);
        assert_eq!(data.lights.len(), 1);
    }

    #[test]
    fn test_texture_names_deduplicated() {
        let mut a = MaterialDesc::color([1.0; 4]);
        a.textures[TextureSlot::Base.index()] = Some("brick.png".into());
        let mut b = MaterialDesc::color([0.5; 4]);
        b.textures[TextureSlot::Base.index()] = Some("brick.png".into());
        b.textures[TextureSlot::Normal.index()] = Some("brick_n.png".into());

        let desc = SceneDescription {
            objects: vec![ObjectDesc { meshes: vec![MeshDesc::quad(1.0)] }],
            materials: vec![a, b],
            lights: vec![],
            instances: vec![],
            env_map: None,
        };
        let data = SceneLoadData::from_bytes(SceneBlobWriter::to_bytes(&desc).expect("serialize"))
            .expect("parse");
        assert_eq!(data.textures.names[TextureSlot::Base.index()], vec!["brick.png".to_string()]);
        assert_eq!(data.textures.texture_name(1, TextureSlot::Base), Some("brick.png"));
        assert_eq!(data.textures.texture_name(1, TextureSlot::Normal), Some("brick_n.png"));
        assert_eq!(data.textures.texture_name(0, TextureSlot::Normal), None);
    }

    #[test]
    fn test_rejects_dangling_instance() {
        let desc = SceneDescription {
            objects: vec![],
            materials: vec![],
            lights: vec![],
            instances: vec![InstanceDesc { object: 0, material: 0, transform: InstanceDesc::IDENTITY }],
            env_map: None,
        };
        assert!(SceneBlobWriter::to_bytes(&desc).is_err());
    }
}
