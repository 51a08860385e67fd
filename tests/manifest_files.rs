use std::path::PathBuf;

use image::{Rgba, RgbaImage};

use forge_bindings::RecordingBackend;
use forge_bindings::manifest::load_manifest;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("forge-bindings-{name}-{}", std::process::id()));
    std::fs::create_dir_all(dir.join("shaders")).unwrap();
    dir
}

#[test]
fn relative_paths_resolve_against_the_manifest() {
    let dir = scratch_dir("relative");
    std::fs::write(
        dir.join("shaders/sim.wgsl"),
        "@compute @workgroup_size(1)\nfn main() {\n    cells[0].v = vec2f(params.gain);\n}\n",
    )
    .unwrap();
    RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]))
        .save(dir.join("photo.png"))
        .unwrap();
    std::fs::write(
        dir.join("bindings.json"),
        r#"{
            "width": 16,
            "height": 8,
            "structs": [{ "source": "struct Cell { v: vec2f, n: u32 }" }],
            "uniforms": [{ "name": "gain", "value": 0.25 }],
            "storages": [{ "name": "cells", "type": "array<Cell>", "length": 4, "readable": true }],
            "textures": [{ "name": "photo", "image": "photo.png", "stage": "compute" }],
            "passes": [{ "name": "sim", "compute": { "shader": { "file": "shaders/sim.wgsl" } } }]
        }"#,
    )
    .unwrap();

    let loaded = load_manifest(&dir.join("bindings.json")).unwrap();
    assert_eq!(loaded.base_dir, dir);
    let builder = loaded.builder(loaded.build_options()).unwrap();
    let mut space = builder.build(RecordingBackend::new()).unwrap();
    assert_eq!(space.screen_size(), (16, 8));

    let module = space.shader_bundles()[0].compute.clone().unwrap();
    assert!(module.contains("var photo: texture_2d<f32>;"));
    assert!(module.ends_with("cells[0].v = vec2f(params.gain);\n}\n"));

    space.run_blocking().unwrap();
    let photo = space.backend().find_texture("photo").unwrap();
    assert_eq!((photo.width, photo.height), (3, 2));
    assert_eq!(&photo.bytes[..4], &[10, 20, 30, 255]);
    // Cell is 16 bytes in storage: vec2f, u32, then padding to its 8-byte alignment.
    assert_eq!(space.read_storage("cells").map(<[u8]>::len), Some(64));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_shader_files_are_reported_with_their_path() {
    let dir = scratch_dir("missing");
    std::fs::write(
        dir.join("bindings.json"),
        r#"{ "passes": [{ "name": "sim", "compute": { "shader": { "file": "shaders/nope.wgsl" } } }] }"#,
    )
    .unwrap();

    let loaded = load_manifest(&dir.join("bindings.json")).unwrap();
    let err = loaded.builder(loaded.build_options()).unwrap_err();
    assert!(format!("{err:#}").contains("nope.wgsl"), "{err:#}");
    assert!(load_manifest(&dir.join("absent.json")).is_err());

    std::fs::remove_dir_all(&dir).ok();
}
