//! Mutable rendering context bound to a scene.
//!
//! An environment owns its instance and light sets (with stable handles),
//! a camera and a working TLAS. Structural mutations mark the TLAS stale;
//! [`Environment::prepare`] rebuilds or refits it and queues the upload on
//! the environment's own stream.

use std::sync::Arc;

use glam::{Affine3A, Vec3};

use crate::accel::{intersect_tlas, Hit, InstanceFlags, Ray, Tlas, TlasInstance, TlasUpdate};
use crate::backend::{BackendKind, EnvironmentBackend};
use crate::camera::Camera;
use crate::format::Material;
use crate::handles::{Handle, SlotArena};
use crate::scene::Scene;
use crate::shade::PackedLight;
use crate::util::{Error, Result};

/// One placed object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub object: u32,
    pub material: u32,
    pub transform: Affine3A,
    pub flags: InstanceFlags,
}

/// Point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
}

impl Light {
    #[inline]
    pub fn pack(&self) -> PackedLight {
        PackedLight::new(self.position, self.color)
    }
}

/// Visibility class implied by a material: partially transparent base
/// colour puts the instance in the transparent class.
pub(crate) fn flags_for_material(material: Option<&Material>) -> InstanceFlags {
    match material {
        Some(m) if m.base_color[3] < 1.0 => InstanceFlags::Transparent,
        _ => InstanceFlags::Opaque,
    }
}

/// Seed an instance arena with the scene defaults (handle `i` = default `i`).
pub(crate) fn seed_instances(num_objects: usize, defaults: &[Instance]) -> Result<SlotArena<Instance>> {
    let mut arena = SlotArena::new("instance", num_objects);
    for inst in defaults {
        arena.insert(inst.object as usize, *inst)?;
    }
    Ok(arena)
}

/// Flatten grouped instances into TLAS input: object by object, dense order.
pub(crate) fn derive_tlas_instances(arena: &SlotArena<Instance>) -> Vec<TlasInstance> {
    let mut out = Vec::with_capacity(arena.len());
    for group in 0..arena.num_groups() {
        for (inst, &id) in arena.group(group).iter().zip(arena.group_handles(group)) {
            out.push(TlasInstance {
                object: inst.object,
                material: inst.material,
                transform: inst.transform,
                flags: inst.flags,
                id,
            });
        }
    }
    out
}

/// Mutable per-agent view of a scene.
pub struct Environment {
    scene: Arc<Scene>,
    instances: SlotArena<Instance>,
    lights: SlotArena<Light>,
    camera: Camera,
    tlas: Tlas,
    /// Host TLAS staleness.
    pending: TlasUpdate,
    /// Host TLAS is newer than the device copy.
    device_stale: bool,
    backend: Box<dyn EnvironmentBackend>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("instances", &self.instances.len())
            .field("lights", &self.lights.len())
            .field("pending", &self.pending)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Environment {
    /// Create from a scene and a backend context that already holds the
    /// relocated default TLAS and default lights.
    pub(crate) fn new(scene: Arc<Scene>, backend: Box<dyn EnvironmentBackend>, camera: Camera) -> Result<Self> {
        let init = scene.env_init();
        let instances = seed_instances(scene.num_objects(), &init.instances)?;
        let mut lights = SlotArena::new("light", 1);
        for light in &init.lights {
            lights.insert(0, *light)?;
        }
        let tlas = scene.default_tlas().clone();
        Ok(Self {
            scene,
            instances,
            lights,
            camera,
            tlas,
            pending: TlasUpdate::None,
            device_stale: false,
            backend,
        })
    }

    #[inline]
    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    #[inline]
    pub fn backend(&self) -> &dyn EnvironmentBackend {
        self.backend.as_ref()
    }

    fn check_object(&self, object: u32) -> Result<()> {
        let count = self.scene.num_objects();
        if object as usize >= count {
            return Err(Error::OutOfRange { what: "object", index: object as usize, count });
        }
        Ok(())
    }

    fn check_material(&self, material: u32) -> Result<()> {
        let count = self.scene.num_materials();
        if material as usize >= count {
            return Err(Error::OutOfRange { what: "material", index: material as usize, count });
        }
        Ok(())
    }

    // ---- instances -------------------------------------------------------

    /// Place `object` with `material`; visibility follows the material alpha.
    pub fn add_instance(&mut self, object: u32, material: u32, transform: Affine3A) -> Result<Handle> {
        let flags = flags_for_material(self.scene.materials().get(material as usize));
        self.add_instance_with_flags(object, material, transform, flags)
    }

    /// Place `object` with an explicit visibility class.
    pub fn add_instance_with_flags(
        &mut self,
        object: u32,
        material: u32,
        transform: Affine3A,
        flags: InstanceFlags,
    ) -> Result<Handle> {
        self.check_object(object)?;
        self.check_material(material)?;
        let handle = self
            .instances
            .insert(object as usize, Instance { object, material, transform, flags })?;
        self.pending = self.pending.merge(TlasUpdate::Rebuild);
        Ok(handle)
    }

    /// Remove an instance. Other handles stay valid.
    pub fn delete_instance(&mut self, handle: Handle) -> Result<()> {
        self.instances.remove(handle)?;
        self.pending = self.pending.merge(TlasUpdate::Rebuild);
        Ok(())
    }

    /// Move an instance. Only requires a refit.
    pub fn set_instance_transform(&mut self, handle: Handle, transform: Affine3A) -> Result<()> {
        self.instances.get_mut(handle)?.transform = transform;
        self.pending = self.pending.merge(TlasUpdate::Refit);
        Ok(())
    }

    /// Change an instance's material (its visibility class is kept).
    pub fn set_instance_material(&mut self, handle: Handle, material: u32) -> Result<()> {
        self.check_material(material)?;
        self.instances.get_mut(handle)?.material = material;
        self.pending = self.pending.merge(TlasUpdate::Refit);
        Ok(())
    }

    pub fn instance(&self, handle: Handle) -> Result<&Instance> {
        self.instances.get(handle)
    }

    #[inline]
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Live instances of one object in dense storage order.
    #[inline]
    pub fn object_instances(&self, object: u32) -> &[Instance] {
        self.instances.group(object as usize)
    }

    // ---- lights ----------------------------------------------------------

    /// Add a light and mirror it into the backend's light array.
    pub fn add_light(&mut self, position: Vec3, color: Vec3) -> Result<Handle> {
        let light = Light { position, color };
        self.backend.add_light(&light.pack())?;
        self.lights.insert(0, light)
    }

    /// Remove a light; the last light moves into its slot on both sides.
    pub fn remove_light(&mut self, handle: Handle) -> Result<()> {
        let (_, slot) = self.lights.locate(handle)?;
        self.backend.remove_light(slot)?;
        self.lights.remove(handle)?;
        Ok(())
    }

    pub fn light(&self, handle: Handle) -> Result<&Light> {
        self.lights.get(handle)
    }

    /// Lights in dense (shading) order.
    #[inline]
    pub fn lights(&self) -> &[Light] {
        self.lights.group(0)
    }

    #[inline]
    pub fn num_lights(&self) -> usize {
        self.lights.len()
    }

    // ---- camera ----------------------------------------------------------

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    // ---- accelerator -----------------------------------------------------

    /// Pending host TLAS work.
    #[inline]
    pub fn pending_update(&self) -> TlasUpdate {
        self.pending
    }

    /// Working TLAS (may be stale until [`Environment::prepare`]).
    #[inline]
    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    /// Apply pending instance changes to the host TLAS.
    fn refresh_tlas(&mut self) -> Result<()> {
        let update = std::mem::take(&mut self.pending);
        match update {
            TlasUpdate::None => return Ok(()),
            TlasUpdate::Refit => {
                let derived = derive_tlas_instances(&self.instances);
                self.tlas.refit(derived, self.scene.blases())?;
            }
            TlasUpdate::Rebuild => {
                let derived = derive_tlas_instances(&self.instances);
                self.tlas = Tlas::build(derived, self.scene.blases())?;
            }
        }
        tracing::debug!(?update, instances = self.tlas.len(), "environment TLAS updated");
        self.device_stale = true;
        Ok(())
    }

    /// Bring the TLAS up to date and queue its upload (asynchronous).
    ///
    /// Call [`Environment::synchronize`] before relying on the device copy.
    pub fn prepare(&mut self) -> Result<()> {
        self.refresh_tlas()?;
        if self.device_stale {
            self.backend.upload_tlas(&self.tlas, &self.scene)?;
            self.device_stale = false;
        }
        Ok(())
    }

    /// Wait for queued work on this environment's stream.
    pub fn synchronize(&mut self) -> Result<()> {
        self.backend.synchronize()
    }

    /// Host-side closest hit against the current instance set.
    pub fn intersect(&mut self, ray: &Ray, mask: u32) -> Result<Option<Hit>> {
        self.refresh_tlas()?;
        let mesh = self.scene.mesh();
        Ok(intersect_tlas(&self.tlas, self.scene.blases(), &mesh, ray, mask))
    }
}
