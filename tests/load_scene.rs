//! Scene blob loading through the public loader.

use rtbatch::format::{InstanceDesc, MaterialDesc, MeshDesc, ObjectDesc, TextureSlot};
use rtbatch::prelude::*;
use rtbatch::texture::TextureHandle;

fn host_renderer() -> Renderer {
    Renderer::new(RenderConfig::new(1, 16, 16).with_backend(BackendKind::Host)).unwrap()
}

#[test]
fn test_open_demo_blob() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.bin");
    SceneBlobWriter::write(&path, &SceneDescription::demo()).unwrap();

    for use_mmap in [true, false] {
        let data = SceneLoadData::open_opts(&path, use_mmap).unwrap();
        assert_eq!(data.objects.len(), 2);
        assert_eq!(data.lights.len(), 2);
        assert_eq!(data.instances.len(), 3);
        assert_eq!(data.base_dir.as_deref(), Some(dir.path()));
    }
}

#[test]
fn test_loader_builds_scene() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.bin");
    SceneBlobWriter::write(&path, &SceneDescription::demo()).unwrap();

    let renderer = host_renderer();
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    assert_eq!(scene.num_objects(), 2);
    assert_eq!(scene.num_materials(), 3);
    assert_eq!(scene.blases().len(), 2);
    assert_eq!(scene.default_tlas().len(), 3);
    assert_eq!(scene.env_init().lights.len(), 2);

    let env = renderer.make_environment(&scene).unwrap();
    assert_eq!(env.num_instances(), 3);
    assert_eq!(env.object_instances(1).len(), 2);
    assert_eq!(env.num_lights(), 2);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = host_renderer().make_loader().load_scene(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[test]
fn test_corrupt_blobs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = SceneBlobWriter::to_bytes(&SceneDescription::demo()).unwrap();

    let truncated = bytes[..bytes.len() / 2].to_vec();
    assert!(SceneLoadData::from_bytes(truncated).is_err());

    bytes[..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    let path = dir.path().join("bad.bin");
    std::fs::write(&path, &bytes).unwrap();
    let err = SceneLoadData::open(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidMagic(0xDEAD_BEEF)));
}

#[test]
fn test_textures_resolve_next_to_blob() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]))
        .save(dir.path().join("red.png"))
        .unwrap();

    let textured = |name: &str| {
        let mut m = MaterialDesc::color([1.0, 1.0, 1.0, 1.0]);
        m.textures[TextureSlot::Base.index()] = Some(name.to_string());
        m
    };
    let mut transform = InstanceDesc::IDENTITY;
    transform[11] = 3.0;
    let desc = SceneDescription {
        objects: vec![ObjectDesc { meshes: vec![MeshDesc::quad(1.0)] }],
        materials: vec![textured("red.png"), textured("red.png"), textured("missing.png")],
        lights: Vec::new(),
        instances: vec![InstanceDesc { object: 0, material: 0, transform }],
        env_map: None,
    };
    let path = dir.path().join("textured.bin");
    SceneBlobWriter::write(&path, &desc).unwrap();

    let mut renderer = host_renderer();
    let scene = renderer.make_loader().load_scene(&path).unwrap();
    let red = scene.texture(0, TextureSlot::Base);
    assert!(!red.is_null());
    assert_eq!(scene.texture(1, TextureSlot::Base), red);
    assert_eq!(scene.texture(2, TextureSlot::Base), TextureHandle::NULL);
    assert_eq!(scene.texture(0, TextureSlot::Normal), TextureHandle::NULL);

    let mut env = renderer.make_environment(&scene).unwrap();
    renderer.render(&mut [&mut env]).unwrap();
    let centre = renderer.frame().unwrap().pixels[8 * 16 + 8];
    assert_eq!(centre & 0xFF, (0.1f32 * 255.0 + 0.5) as u32);
    assert_eq!((centre >> 8) & 0xFF, 0);
    assert_eq!((centre >> 16) & 0xFF, 0);
}
