use proptest::prelude::*;

use forge_bindings::renderer::layout::TypeLayoutResolver;
use forge_bindings::renderer::registry::{
    ResourceRegistry, SamplerSpec, StorageSpec, TexturePairSpec, TextureSpec, UniformSpec,
};
use forge_bindings::renderer::render_plan::plan_bindings;
use forge_bindings::renderer::types::ShaderStage;
use forge_bindings::renderer::wgsl::emit_bindings;

/// Field types whose scalars are all representable as small non-negative integers.
const FIELD_TYPES: [&str; 12] = [
    "f32",
    "u32",
    "i32",
    "vec2f",
    "vec3f",
    "vec4f",
    "vec3<u32>",
    "mat2x2f",
    "mat3x3f",
    "mat4x4f",
    "array<f32, 3>",
    "array<vec3f, 2>",
];

fn struct_source(types: &[usize]) -> String {
    let fields: Vec<String> = types
        .iter()
        .enumerate()
        .map(|(i, t)| format!("    f{i}: {},", FIELD_TYPES[*t]))
        .collect();
    format!("struct S {{\n{}\n}}", fields.join("\n"))
}

#[test]
fn documented_vec3_example() {
    let mut resolver = TypeLayoutResolver::new();
    resolver.add_source("struct E { a: f32, b: vec3f, c: f32 }").unwrap();
    let layout = resolver.resolve("E").unwrap();
    let fields: Vec<(&str, u32, u32)> = layout
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.offset, f.size))
        .collect();
    assert_eq!(fields, vec![("a", 0, 4), ("b", 16, 12), ("c", 28, 4)]);
    assert_eq!(layout.byte_size, 32);
}

proptest! {
    #[test]
    fn uniform_structs_obey_host_shareable_rules(types in prop::collection::vec(0..FIELD_TYPES.len(), 1..10)) {
        let mut resolver = TypeLayoutResolver::new();
        resolver.add_source(&struct_source(&types)).unwrap();
        let layout = resolver.resolve_uniform("S").unwrap();

        prop_assert_eq!(layout.byte_size % 16, 0);
        let mut end = 0;
        for field in &layout.fields {
            prop_assert_eq!(field.offset % field.align, 0);
            prop_assert!(field.offset >= end);
            end = field.offset + field.size;
        }
        prop_assert!(end <= layout.byte_size);
    }

    #[test]
    fn flatten_then_read_back_reproduces_values(
        types in prop::collection::vec(0..FIELD_TYPES.len(), 1..8),
        seed in 0_u32..1000,
    ) {
        let mut resolver = TypeLayoutResolver::new();
        resolver.add_source(&struct_source(&types)).unwrap();
        let layout = resolver.resolve_uniform("S").unwrap();

        let values: Vec<f64> = (0..layout.leaf_count())
            .map(|i| f64::from((seed + i as u32 * 7) % 1024))
            .collect();
        let bytes = layout.flatten(&values).unwrap();
        prop_assert_eq!(bytes.len(), layout.byte_size as usize);
        prop_assert_eq!(layout.decode(&bytes), values.clone());

        let mut by_field = Vec::new();
        for i in 0..layout.fields.len() {
            by_field.extend(layout.read_field(&bytes, i).unwrap());
        }
        prop_assert_eq!(by_field, values);
    }

    #[test]
    fn layouts_are_identical_across_resolvers(types in prop::collection::vec(0..FIELD_TYPES.len(), 1..10)) {
        let source = struct_source(&types);
        let mut first = TypeLayoutResolver::new();
        let mut second = TypeLayoutResolver::new();
        first.add_source(&source).unwrap();
        second.add_source(&source).unwrap();
        prop_assert_eq!(first.resolve("S").unwrap(), second.resolve("S").unwrap());
    }

    #[test]
    fn plans_are_deterministic_and_contiguous(
        kinds in prop::collection::vec((0_u8..4, 0_u8..4, any::<bool>()), 0..16),
    ) {
        let mut reg = ResourceRegistry::new();
        for (i, (kind, stage, internal)) in kinds.iter().enumerate() {
            let stage = match stage {
                0 => None,
                1 => Some(ShaderStage::Vertex),
                2 => Some(ShaderStage::Fragment),
                _ => Some(ShaderStage::Compute),
            };
            macro_rules! scoped {
                ($spec:expr) => {{
                    let mut spec = $spec;
                    if let Some(stage) = stage {
                        spec = spec.stage(stage);
                    }
                    if *internal {
                        spec = spec.internal();
                    }
                    spec
                }};
            }
            match kind {
                0 => { reg.declare_uniform(scoped!(UniformSpec::new(format!("u{i}"), 1.0))).unwrap(); }
                1 => { reg.declare_storage(scoped!(StorageSpec::new(format!("s{i}"), "array<f32, 4>"))).unwrap(); }
                2 => { reg.declare_sampler(scoped!(SamplerSpec::new(format!("smp{i}"), wgpu::SamplerDescriptor::default()))).unwrap(); }
                _ => {
                    reg.declare_texture_2d(scoped!(TextureSpec::swapchain(format!("t{i}")))).unwrap();
                    reg.declare_texture_pair(scoped!(TexturePairSpec::new(format!("w{i}"), format!("r{i}")))).unwrap();
                }
            }
        }
        reg.freeze();

        for stage in [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute] {
            for internal in [false, true] {
                let a = plan_bindings(&reg, stage, internal);
                let b = plan_bindings(&reg, stage, internal);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(emit_bindings(&a, reg.uniforms()), emit_bindings(&b, reg.uniforms()));
                let expected: Vec<u32> = (0..a.entries.len() as u32).collect();
                prop_assert_eq!(a.binding_indices(), expected);
            }
        }
    }
}
