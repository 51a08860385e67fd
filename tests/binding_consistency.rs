//! Composed modules, layouts and bind groups must agree on every binding slot.

use image::RgbaImage;

use forge_bindings::renderer::backend::recording::RecordedPipeline;
use forge_bindings::renderer::registry::{
    EventSpec, ExternalTextureSpec, LayeredBufferSpec, SamplerSpec, StorageSpec, StorageTextureSpec, TextureArraySpec,
    TexturePairSpec, TextureSpec, UniformSpec,
};
use forge_bindings::renderer::render_plan::plan_bindings;
use forge_bindings::renderer::types::ShaderStage;
use forge_bindings::renderer::validation::{module_bindings, validate_wgsl};
use forge_bindings::{BindingError, RecordingBackend, RenderPassSpec, ShaderSpaceBuildOptions, ShaderSpaceBuilder};

const COMPUTE: &str = "@compute @workgroup_size(1)\nfn main() {}\n";
const VERTEX: &str = "@vertex\nfn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4f {\n    return vec4f(f32(i));\n}\n";
const FRAGMENT: &str = "@fragment\nfn fs_main() -> @location(0) vec4f {\n    return vec4f(params.time);\n}\n";

fn builder() -> ShaderSpaceBuilder {
    ShaderSpaceBuilder::new(ShaderSpaceBuildOptions {
        width: 4,
        height: 4,
        ..Default::default()
    })
    .unwrap()
}

fn declare_everything(b: &mut ShaderSpaceBuilder) {
    b.declare_structs("struct Particle { pos: vec2f, vel: vec2f }").unwrap();
    b.declare_uniform(UniformSpec::new("tint", [1.0_f32, 0.5, 0.25, 1.0]).typed("vec4f"))
        .unwrap();
    b.declare_storage(
        StorageSpec::new("particles", "array<Particle>")
            .length(8)
            .stage(ShaderStage::Compute),
    )
    .unwrap();
    b.declare_storage(StorageSpec::new("weights", "array<f32, 4>").readable())
        .unwrap();
    b.declare_layered_buffer(LayeredBufferSpec::new(2)).unwrap();
    b.declare_sampler(SamplerSpec::new("linear", wgpu::SamplerDescriptor::default()))
        .unwrap();
    b.declare_storage_texture(StorageTextureSpec::new("trail", wgpu::TextureFormat::Rgba16Float))
        .unwrap();
    b.declare_texture_2d(TextureSpec::swapchain("previous")).unwrap();
    b.declare_texture_2d_array(TextureArraySpec::new(
        "atlas",
        vec![RgbaImage::new(2, 2), RgbaImage::new(2, 2)],
    ))
    .unwrap();
    b.declare_external_texture(ExternalTextureSpec::new("camera", || RgbaImage::new(2, 2)).stage(ShaderStage::Fragment))
        .unwrap();
    b.declare_texture_pair(TexturePairSpec::new("acc_out", "acc_in")).unwrap();
    b.register_event(EventSpec::new("hit", 2, |_: &[u32]| {})).unwrap();

    b.add_pass(RenderPassSpec::new("sim").compute(COMPUTE, "main", [2, 1, 1]))
        .unwrap();
    b.add_pass(RenderPassSpec::new("show").draw(VERTEX, FRAGMENT)).unwrap();
}

#[test]
fn every_module_declares_exactly_its_plan() {
    let mut b = builder();
    declare_everything(&mut b);
    let bundles = b.emit().unwrap();
    assert_eq!(bundles.len(), 2);

    for bundle in &bundles {
        for (stage, text) in bundle.modules() {
            let plan = plan_bindings(b.registry(), stage, false);
            let module = validate_wgsl(text).unwrap();
            let expected: Vec<(u32, u32, String)> = plan
                .entries
                .iter()
                .map(|e| (plan.group(), e.binding, e.name.clone()))
                .collect();
            assert_eq!(module_bindings(&module), expected, "{}.{stage}", bundle.pass);
        }
    }
}

#[test]
fn scoped_resources_only_reach_their_stage() {
    let mut b = builder();
    declare_everything(&mut b);
    let bundles = b.emit().unwrap();
    let show = bundles.iter().find(|bundle| bundle.pass == "show").unwrap();
    let sim = bundles.iter().find(|bundle| bundle.pass == "sim").unwrap();

    let compute = sim.compute.as_deref().unwrap();
    assert!(compute.contains("var<storage, read_write> particles: array<Particle>;"));
    assert!(!compute.contains("camera"));

    let vertex = show.vertex.as_deref().unwrap();
    assert!(vertex.contains("@group(0) @binding(0)\nvar<uniform> params: Params;"));
    assert!(vertex.contains("var<storage, read> weights: array<f32, 4>;"));
    assert!(!vertex.contains("particles"));
    assert!(!vertex.contains("texture_storage_2d"));

    let fragment = show.fragment.as_deref().unwrap();
    assert!(fragment.contains("var camera: texture_external;"));
    assert!(fragment.contains("var trail: texture_storage_2d<rgba16float, write>;"));
    assert!(fragment.starts_with("struct Particle"));
}

#[test]
fn pipeline_layouts_follow_the_plans() {
    let mut b = builder();
    declare_everything(&mut b);
    let compute_plan = {
        let mut probe = builder();
        declare_everything(&mut probe);
        probe.emit().unwrap();
        plan_bindings(probe.registry(), ShaderStage::Compute, false)
    };

    let mut space = b.build(RecordingBackend::new()).unwrap();
    assert_eq!(space.plan(ShaderStage::Compute, false), Some(&compute_plan));

    let backend = space.backend();
    let mut seen = 0;
    for pipeline in backend.pipelines() {
        match pipeline {
            RecordedPipeline::Compute { label, layouts, source, .. } => {
                assert_eq!(label, "sim.compute");
                assert_eq!(layouts.len(), 1);
                let bindings: Vec<u32> = backend.layout(layouts[0]).unwrap().entries.iter().map(|e| e.binding).collect();
                assert_eq!(bindings, compute_plan.binding_indices());
                assert_eq!(Some(source.as_str()), space.shader_bundles()[0].compute.as_deref());
                seen += 1;
            }
            RecordedPipeline::Render { label, layouts, .. } => {
                assert_eq!(label, "show.draw");
                let stages = [ShaderStage::Vertex, ShaderStage::Fragment];
                assert_eq!(layouts.len(), stages.len());
                for (layout, stage) in layouts.iter().zip(stages) {
                    let plan = space.plan(stage, false).unwrap();
                    let bindings: Vec<u32> = backend.layout(*layout).unwrap().entries.iter().map(|e| e.binding).collect();
                    assert_eq!(bindings, plan.binding_indices(), "{stage}");
                }
                seen += 1;
            }
        }
    }
    assert_eq!(seen, 2);

    // External textures are imported per frame, so the first frame builds the groups.
    space.run_blocking().unwrap();
    space.run_blocking().unwrap();
}

#[test]
fn user_bindings_in_generated_groups_are_rejected() {
    let mut b = builder();
    b.add_pass(RenderPassSpec::new("sim").compute(
        "@group(0) @binding(7) var<storage, read_write> mine: array<f32>;\n@compute @workgroup_size(1)\nfn main() {}\n",
        "main",
        [1, 1, 1],
    ))
    .unwrap();
    let err = b.emit().unwrap_err();
    assert!(matches!(err, BindingError::Configuration(ref m) if m.contains("@binding(7)")), "{err}");
}

#[test]
fn invalid_user_wgsl_names_pass_and_stage() {
    let mut b = builder();
    b.add_pass(RenderPassSpec::new("broken").compute("fn main( {", "main", [1, 1, 1]))
        .unwrap();
    let err = b.emit().unwrap_err();
    assert!(matches!(err, BindingError::Configuration(ref m) if m.contains("pass `broken` compute module")), "{err}");
}

#[test]
fn validation_can_be_switched_off() {
    let mut b = ShaderSpaceBuilder::new(ShaderSpaceBuildOptions {
        validate_wgsl: false,
        ..Default::default()
    })
    .unwrap();
    b.add_pass(RenderPassSpec::new("broken").compute("fn main( {", "main", [1, 1, 1]))
        .unwrap();
    let bundles = b.emit().unwrap();
    assert!(bundles[0].compute.as_deref().unwrap().ends_with("fn main( {\n"));
}
