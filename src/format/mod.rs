//! Preprocessed scene blob format.
//!
//! The blob is produced by an external asset pipeline; this module reads it
//! (and writes a minimal version of it for fixtures and demos).
//!
//! ## File Structure
//!
//! ```text
//! +---------------------------+
//! | Magic 0x55555555          |  u32
//! | StagingHeader             |  6 x u32, 4 x u64
//! | (pad to 256)              |
//! +---------------------------+
//! | MeshInfo[num_meshes]      |  index_offset, num_triangles, num_vertices
//! | ObjectInfo[num_objects]   |  mesh_index, num_meshes
//! | Texture names x 8 slots   |  u32 count + NUL-terminated names
//! | Material texture table    |  u32 count + 8 x u32 per material
//! | Lights                    |  u32 count + {position, color}
//! | Instances                 |  u32 count + {object, material, 4x3}
//! | (pad to 256)              |
//! +---------------------------+
//! | Vertices                  |  payload offset 0
//! | Indices                   |  payload offset index_offset
//! | Materials                 |  payload offset material_offset
//! +---------------------------+
//! ```

mod layout;
mod reader;
pub mod writer;

pub use layout::*;
pub use reader::*;
pub use writer::{MaterialDesc, MeshDesc, ObjectDesc, SceneBlobWriter, SceneDescription};
