//! Top-level accelerators over placed instances.

use glam::Affine3A;

use super::blas::Blas;
use super::build::{build_bvh, BuildOptions, Bvh};
use super::bvh::Aabb;
use crate::util::{Error, Result};

/// Visibility class of an instance. Rays carry a mask selecting classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstanceFlags {
    #[default]
    Opaque,
    Transparent,
}

impl InstanceFlags {
    /// Visibility mask bit: 1 for opaque, 2 for transparent.
    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            InstanceFlags::Opaque => 1,
            InstanceFlags::Transparent => 2,
        }
    }
}

/// Ray mask that accepts every instance.
pub const MASK_ALL: u32 = 0xFF;

/// One placement of an object inside a TLAS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlasInstance {
    pub object: u32,
    pub material: u32,
    pub transform: Affine3A,
    pub flags: InstanceFlags,
    /// External instance id reported on hits.
    pub id: u32,
}

/// Pending work on a TLAS, ordered by cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlasUpdate {
    /// Up to date.
    #[default]
    None,
    /// Transforms or materials changed; instance set is unchanged.
    Refit,
    /// Instances were added or removed.
    Rebuild,
}

impl TlasUpdate {
    /// Combine two pending requests; the stronger one wins.
    #[inline]
    pub fn merge(self, other: TlasUpdate) -> TlasUpdate {
        self.max(other)
    }
}

/// Top-level accelerator.
#[derive(Debug, Clone, Default)]
pub struct Tlas {
    bvh: Bvh,
    /// Instances in build order (BVH primitive index = position here).
    instances: Vec<TlasInstance>,
}

impl Tlas {
    /// Build over `instances` referencing `blases` by object index.
    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    pub fn build(instances: Vec<TlasInstance>, blases: &[Blas]) -> Result<Self> {
        let bounds = instance_bounds(&instances, blases)?;
        let bvh = build_bvh(&bounds, &BuildOptions::TOP_LEVEL);
        Ok(Self { bvh, instances })
    }

    /// Update transforms/materials in place without changing topology.
    ///
    /// `instances` must list the same objects in the same order as the last
    /// build; anything else needs [`Tlas::build`].
    pub fn refit(&mut self, instances: Vec<TlasInstance>, blases: &[Blas]) -> Result<()> {
        if instances.len() != self.instances.len()
            || instances.iter().zip(&self.instances).any(|(a, b)| a.object != b.object)
        {
            return Err(Error::invalid("TLAS refit with a different instance set"));
        }
        let bounds = instance_bounds(&instances, blases)?;
        self.bvh.refit(&bounds)?;
        self.instances = instances;
        Ok(())
    }

    #[inline]
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Instances in build order.
    #[inline]
    pub fn instances(&self) -> &[TlasInstance] {
        &self.instances
    }

    /// Instances in BVH leaf order (the order leaves index).
    pub fn leaf_ordered(&self) -> impl Iterator<Item = &TlasInstance> + '_ {
        self.bvh.prim_indices.iter().map(move |&i| &self.instances[i as usize])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn instance_bounds(instances: &[TlasInstance], blases: &[Blas]) -> Result<Vec<Aabb>> {
    instances
        .iter()
        .map(|inst| {
            let blas = blases.get(inst.object as usize).ok_or(Error::OutOfRange {
                what: "object",
                index: inst.object as usize,
                count: blases.len(),
            })?;
            Ok(blas.bounds().transformed(&inst.transform))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::TriangleMesh;
    use crate::format::{MeshInfo, Vertex};
    use glam::Vec3;

    fn unit_triangle_blas() -> Blas {
        let v = |p: [f32; 3]| Vertex { position: p, normal: [0.0, 0.0, 1.0], uv: [0.0; 2] };
        let vertices = [v([0.0, 0.0, 0.0]), v([1.0, 0.0, 0.0]), v([0.0, 1.0, 0.0])];
        let indices = [0, 1, 2];
        Blas::build(
            &TriangleMesh::new(&vertices, &indices),
            &[MeshInfo { index_offset: 0, num_triangles: 1, num_vertices: 3 }],
        )
    }

    fn inst(id: u32, x: f32) -> TlasInstance {
        TlasInstance {
            object: 0,
            material: 0,
            transform: Affine3A::from_translation(Vec3::new(x, 0.0, 0.0)),
            flags: InstanceFlags::Opaque,
            id,
        }
    }

    #[test]
    fn test_masks() {
        assert_eq!(InstanceFlags::Opaque.mask(), 1);
        assert_eq!(InstanceFlags::Transparent.mask(), 2);
    }

    #[test]
    fn test_update_merge() {
        assert_eq!(TlasUpdate::None.merge(TlasUpdate::Refit), TlasUpdate::Refit);
        assert_eq!(TlasUpdate::Rebuild.merge(TlasUpdate::Refit), TlasUpdate::Rebuild);
        assert_eq!(TlasUpdate::Refit.merge(TlasUpdate::None), TlasUpdate::Refit);
    }

    #[test]
    fn test_build_and_refit() {
        let blases = vec![unit_triangle_blas()];
        let mut tlas = Tlas::build((0..5).map(|i| inst(i, i as f32 * 3.0)).collect(), &blases)
            .expect("build");
        assert_eq!(tlas.len(), 5);
        assert_eq!(tlas.leaf_ordered().count(), 5);

        let mut moved: Vec<TlasInstance> = tlas.instances().to_vec();
        moved[2].transform = Affine3A::from_translation(Vec3::new(0.0, 100.0, 0.0));
        tlas.refit(moved, &blases).expect("refit");
        assert!(tlas.bvh().bounds().max[1] >= 100.0);

        // fewer instances is a topology change
        let shorter: Vec<TlasInstance> = tlas.instances()[..4].to_vec();
        assert!(tlas.refit(shorter, &blases).is_err());
    }

    #[test]
    fn test_missing_blas() {
        let mut bad = inst(0, 0.0);
        bad.object = 3;
        let err = Tlas::build(vec![bad], &[]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { what: "object", .. }));
    }
}
