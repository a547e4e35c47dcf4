//! Render properties on the CPU reference backend.

use std::path::PathBuf;
use std::sync::Arc;

use rtbatch::accel::TlasUpdate;
use rtbatch::format::{InstanceDesc, MaterialDesc, MeshDesc, ObjectDesc};
use rtbatch::prelude::*;

fn write_blob(dir: &tempfile::TempDir, name: &str, desc: &SceneDescription) -> PathBuf {
    let path = dir.path().join(name);
    SceneBlobWriter::write(&path, desc).unwrap();
    path
}

fn translated(x: f32, y: f32, z: f32) -> [f32; 12] {
    let mut t = InstanceDesc::IDENTITY;
    t[9] = x;
    t[10] = y;
    t[11] = z;
    t
}

/// One quad five units in front of the default camera.
fn single_quad() -> SceneDescription {
    SceneDescription {
        objects: vec![ObjectDesc { meshes: vec![MeshDesc::quad(1.0)] }],
        materials: vec![MaterialDesc::color([0.9, 0.6, 0.3, 1.0])],
        lights: Vec::new(),
        instances: vec![InstanceDesc { object: 0, material: 0, transform: translated(0.0, 0.0, 5.0) }],
        env_map: None,
    }
}

fn single_triangle(k: usize) -> SceneDescription {
    let s = 0.5 + k as f32 * 0.4;
    SceneDescription {
        objects: vec![ObjectDesc {
            meshes: vec![MeshDesc::triangle([-s, -s, 0.0], [s, -s * 0.5, 0.0], [0.0, s, 0.0])],
        }],
        materials: vec![MaterialDesc::color([0.2 + 0.2 * k as f32, 0.8, 0.5, 1.0])],
        lights: Vec::new(),
        instances: vec![InstanceDesc { object: 0, material: 0, transform: translated(0.1 * k as f32, 0.0, 4.0) }],
        env_map: None,
    }
}

fn host_renderer(batch: u32) -> Renderer {
    let config = RenderConfig::new(batch, 32, 32).with_backend(BackendKind::Host);
    Renderer::new(config).unwrap()
}

fn render_one(renderer: &mut Renderer, env: &mut Environment) -> Vec<u32> {
    renderer.render(&mut [env]).unwrap();
    renderer.frame().unwrap().pixels
}

#[test]
fn test_visible_object_and_facing_away() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_blob(&dir, "quad.bin", &single_quad());
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();

    let pixels = render_one(&mut renderer, &mut env);
    assert!(pixels.iter().any(|&p| p != 0), "object should be visible");
    // ambient-only shading of the material colour
    let centre = pixels[16 * 32 + 16];
    assert_eq!(centre >> 24, 255);
    assert_eq!(centre & 0xFF, (0.9f32 * 0.1 * 255.0 + 0.5) as u32);

    env.set_camera(Camera::from_basis(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0));
    let pixels = render_one(&mut renderer, &mut env);
    assert!(pixels.iter().all(|&p| p == 0), "camera facing away sees background");
}

#[test]
fn test_misses_sample_environment_map() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(4, 2, image::Rgba([51, 102, 204, 255]))
        .save(dir.path().join("sky.png"))
        .unwrap();
    let mut desc = single_quad();
    desc.env_map = Some("sky.png".into());
    let path = write_blob(&dir, "sky.bin", &desc);
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    assert!(!scene.env_map().is_null());
    let mut env = renderer.make_environment(&scene).unwrap();
    let sky = 51 | (102 << 8) | (204 << 16) | (255 << 24);

    let pixels = render_one(&mut renderer, &mut env);
    // the quad still shades as before, the border around it is sky
    assert_eq!(pixels[16 * 32 + 16] & 0xFF, (0.9f32 * 0.1 * 255.0 + 0.5) as u32);
    assert_eq!(pixels[0], sky);

    env.set_camera(Camera::from_basis(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0));
    let pixels = render_one(&mut renderer, &mut env);
    assert!(pixels.iter().all(|&p| p == sky));
}

#[test]
fn test_missing_environment_map_falls_back_to_background() {
    let dir = tempfile::tempdir().unwrap();
    let mut desc = single_quad();
    desc.env_map = Some("nowhere.hdr".into());
    let path = write_blob(&dir, "nosky.bin", &desc);
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    assert!(scene.env_map().is_null());
    let mut env = renderer.make_environment(&scene).unwrap();
    env.set_camera(Camera::from_basis(Vec3::ZERO, -Vec3::Z, Vec3::Y, 90.0, 1.0));
    assert!(render_one(&mut renderer, &mut env).iter().all(|&p| p == 0));
}

#[test]
fn test_light_add_remove_restores_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let mut desc = single_quad();
    desc.lights.push(rtbatch::format::LightDesc { position: [2.0, 2.0, 0.0], color: [0.3, 0.3, 0.3] });
    let path = write_blob(&dir, "lit.bin", &desc);
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();
    assert_eq!(env.num_lights(), 1);

    let before = render_one(&mut renderer, &mut env);
    let light = env.add_light(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.5, 0.1, 0.1)).unwrap();
    let lit = render_one(&mut renderer, &mut env);
    assert_ne!(before, lit);
    env.remove_light(light).unwrap();
    let after = render_one(&mut renderer, &mut env);
    assert_eq!(before, after);
}

#[test]
fn test_remove_default_light_keeps_others() {
    let dir = tempfile::tempdir().unwrap();
    let mut desc = single_quad();
    desc.lights.push(rtbatch::format::LightDesc { position: [2.0, 2.0, 0.0], color: [0.3, 0.3, 0.3] });
    let path = write_blob(&dir, "lit.bin", &desc);
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();

    let extra = env.add_light(Vec3::new(-2.0, 0.0, 0.0), Vec3::splat(0.2)).unwrap();
    env.remove_light(0).unwrap();
    assert_eq!(env.num_lights(), 1);
    assert_eq!(env.light(extra).unwrap().position, Vec3::new(-2.0, 0.0, 0.0));
    assert!(env.light(0).is_err());
    assert!(env.remove_light(0).is_err());
}

#[test]
fn test_batch_matches_individual_renders() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..4)
        .map(|k| write_blob(&dir, &format!("tri{k}.bin"), &single_triangle(k)))
        .collect();

    let mut batched = host_renderer(4);
    let mut loader = batched.make_loader();
    let scenes: Vec<Arc<Scene>> = paths.iter().map(|p| loader.load_scene(p).unwrap()).collect();
    let mut envs: Vec<Environment> = scenes.iter().map(|s| batched.make_environment(s).unwrap()).collect();
    let mut refs: Vec<&mut Environment> = envs.iter_mut().collect();
    batched.render(&mut refs).unwrap();
    let frame = batched.frame().unwrap();
    assert_eq!(frame.batch, 4);

    let mut single = host_renderer(1);
    let mut loader = single.make_loader();
    for (k, path) in paths.iter().enumerate() {
        let scene = loader.load_scene(path).unwrap();
        let mut env = single.make_environment(&scene).unwrap();
        let alone = render_one(&mut single, &mut env);
        assert!(alone.iter().any(|&p| p != 0));
        assert_eq!(frame.view(k).unwrap(), &alone[..], "batch slot {k}");
    }
}

#[test]
fn test_batch_size_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_blob(&dir, "quad.bin", &single_quad());
    let mut renderer = host_renderer(2);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();
    let err = renderer.render(&mut [&mut env]).unwrap_err();
    assert!(matches!(err, Error::BatchSizeMismatch { expected: 2, actual: 1 }));
}

#[test]
fn test_instance_mutations_drive_tlas_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_blob(&dir, "quad.bin", &single_quad());
    let mut renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();
    assert_eq!(env.num_instances(), 1);
    assert_eq!(env.instance(0).unwrap().object, 0);

    // move the default instance out of view: refit only
    env.set_instance_transform(0, Affine3A::from_translation(Vec3::new(0.0, 0.0, -5.0))).unwrap();
    assert_eq!(env.pending_update(), TlasUpdate::Refit);
    let pixels = render_one(&mut renderer, &mut env);
    assert_eq!(env.pending_update(), TlasUpdate::None);
    assert!(pixels.iter().all(|&p| p == 0));

    // a new instance in view forces a rebuild
    let h = env.add_instance(0, 0, Affine3A::from_translation(Vec3::new(0.0, 0.0, 3.0))).unwrap();
    assert_eq!(env.pending_update(), TlasUpdate::Rebuild);
    let pixels = render_one(&mut renderer, &mut env);
    assert!(pixels.iter().any(|&p| p != 0));

    env.delete_instance(h).unwrap();
    let pixels = render_one(&mut renderer, &mut env);
    assert!(pixels.iter().all(|&p| p == 0));
    assert!(env.delete_instance(h).is_err());
}

#[test]
fn test_environments_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_blob(&dir, "quad.bin", &single_quad());
    let mut renderer = host_renderer(2);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut a = renderer.make_environment(&scene).unwrap();
    let mut b = renderer.make_environment(&scene).unwrap();
    a.delete_instance(0).unwrap();

    renderer.render(&mut [&mut a, &mut b]).unwrap();
    let frame = renderer.frame().unwrap();
    assert!(frame.is_background(0).unwrap());
    assert!(!frame.is_background(1).unwrap());
    assert_eq!(b.num_instances(), 1);
}

#[test]
fn test_handles_stay_stable_under_churn() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_blob(&dir, "quad.bin", &single_quad());
    let renderer = host_renderer(1);
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let mut env = renderer.make_environment(&scene).unwrap();

    let handles: Vec<Handle> = (0..6)
        .map(|i| env.add_instance(0, 0, Affine3A::from_translation(Vec3::X * i as f32)).unwrap())
        .collect();
    env.delete_instance(handles[1]).unwrap();
    env.delete_instance(handles[4]).unwrap();
    for (i, &h) in handles.iter().enumerate() {
        if i == 1 || i == 4 {
            continue;
        }
        assert_eq!(env.instance(h).unwrap().transform.translation.x, i as f32);
    }
    // most recently freed handle comes back first
    let again = env.add_instance(0, 0, Affine3A::IDENTITY).unwrap();
    assert_eq!(again, handles[4]);
    assert_eq!(env.object_instances(0).len(), 6);
    assert!(env.add_instance(3, 0, Affine3A::IDENTITY).is_err());
    assert!(env.add_instance(0, 9, Affine3A::IDENTITY).is_err());
}
