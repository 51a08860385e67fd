//! WGSL declaration emitter.
//!
//! Renders a `BindingPlan` into the module-scope declarations a stage needs and
//! prepends them to user shader source. Everything here is a pure function of its
//! inputs; nothing touches the registry or the GPU.

use crate::renderer::registry::{PARAMS_BINDING, Registration, UniformVar};
use crate::renderer::render_plan::{BindingKind, BindingPlan, PARAMS_STRUCT, ResourceRef};

/// Texel format spelling for `texture_storage_2d<FORMAT, write>`.
pub fn storage_texel_format(format: wgpu::TextureFormat) -> Option<&'static str> {
    use wgpu::TextureFormat as F;
    Some(match format {
        F::Rgba8Unorm => "rgba8unorm",
        F::Rgba8Snorm => "rgba8snorm",
        F::Rgba8Uint => "rgba8uint",
        F::Rgba8Sint => "rgba8sint",
        F::Bgra8Unorm => "bgra8unorm",
        F::Rgba16Uint => "rgba16uint",
        F::Rgba16Sint => "rgba16sint",
        F::Rgba16Float => "rgba16float",
        F::R32Uint => "r32uint",
        F::R32Sint => "r32sint",
        F::R32Float => "r32float",
        F::Rg32Uint => "rg32uint",
        F::Rg32Sint => "rg32sint",
        F::Rg32Float => "rg32float",
        F::Rgba32Uint => "rgba32uint",
        F::Rgba32Sint => "rgba32sint",
        F::Rgba32Float => "rgba32float",
        _ => return None,
    })
}

/// Inverse of `storage_texel_format`.
pub fn storage_format_from_texel(texel: &str) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    [
        F::Rgba8Unorm,
        F::Rgba8Snorm,
        F::Rgba8Uint,
        F::Rgba8Sint,
        F::Bgra8Unorm,
        F::Rgba16Uint,
        F::Rgba16Sint,
        F::Rgba16Float,
        F::R32Uint,
        F::R32Sint,
        F::R32Float,
        F::Rg32Uint,
        F::Rg32Sint,
        F::Rg32Float,
        F::Rgba32Uint,
        F::Rgba32Sint,
        F::Rgba32Float,
    ]
    .into_iter()
    .find(|f| storage_texel_format(*f) == Some(texel))
}

/// `struct Params { ... }` with one member per uniform, in registration order.
pub fn params_struct(uniforms: &[UniformVar]) -> String {
    let mut out = format!("struct {PARAMS_STRUCT} {{\n");
    for uniform in uniforms {
        out.push_str(&format!("    {}: {},\n", uniform.name(), uniform.type_name));
    }
    out.push_str("};\n");
    out
}

/// Declarations for every entry of `plan`, preceded by the `Params` struct when the
/// plan has a uniform slot.
pub fn emit_bindings(plan: &BindingPlan, uniforms: &[UniformVar]) -> String {
    let mut out = String::new();
    if plan.entry(ResourceRef::Params).is_some() {
        out.push_str(&params_struct(uniforms));
        out.push('\n');
    }

    let group = plan.group();
    for entry in &plan.entries {
        out.push_str(&format!("@group({group}) @binding({})\n", entry.binding));
        let declaration = match entry.kind {
            BindingKind::UniformBuffer => format!("var<uniform> {PARAMS_BINDING}: {};", entry.wgsl_type),
            BindingKind::StorageBuffer { read_only } => format!(
                "var<storage, {}> {}: {};",
                if read_only { "read" } else { "read_write" },
                entry.name,
                entry.wgsl_type
            ),
            BindingKind::Sampler { .. }
            | BindingKind::StorageTexture { .. }
            | BindingKind::Texture { .. }
            | BindingKind::ExternalTexture => format!("var {}: {};", entry.name, entry.wgsl_type),
        };
        out.push_str(&declaration);
        out.push('\n');
    }
    out
}

/// Full module text for one stage: shared struct definitions, binding declarations,
/// then the user source.
pub fn compose_stage_source(shared_structs: &str, plan: &BindingPlan, uniforms: &[UniformVar], user_source: &str) -> String {
    let mut out = String::new();
    let shared = shared_structs.trim();
    if !shared.is_empty() {
        out.push_str(shared);
        out.push_str("\n\n");
    }
    out.push_str(&emit_bindings(plan, uniforms));
    out.push('\n');
    out.push_str(user_source);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// `(group, binding)` pairs named by `@group(..) @binding(..)` attributes in `text`.
///
/// Line comments are skipped. This is enough for generated declaration text and is
/// used to cross-check it against layout and bind group entries.
pub fn declared_bindings(text: &str) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let code = line.split("//").next().unwrap_or("");
        let (Some(group), Some(binding)) = (attribute_arg(code, "@group("), attribute_arg(code, "@binding(")) else {
            continue;
        };
        out.push((group, binding));
    }
    out
}

fn attribute_arg(code: &str, attr: &str) -> Option<u32> {
    let start = code.find(attr)? + attr.len();
    let end = start + code[start..].find(')')?;
    code[start..end].trim().trim_end_matches('u').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::registry::{
        ExternalTextureSpec, ResourceRegistry, SamplerSpec, StorageSpec, StorageTextureSpec, TexturePairSpec,
        TextureSpec, UniformSpec,
    };
    use crate::renderer::render_plan::plan_bindings;
    use crate::renderer::types::ShaderStage;

    fn registry() -> ResourceRegistry {
        let mut reg = ResourceRegistry::new();
        reg.declare_uniform(UniformSpec::new("time", 0.0)).unwrap();
        reg.declare_uniform(UniformSpec::new("tint", [1.0_f32, 0.0, 0.0, 1.0]).typed("vec4f"))
            .unwrap();
        reg.declare_storage(StorageSpec::new("points", "array<vec2f, 8>"))
            .unwrap();
        reg.declare_sampler(SamplerSpec::new("samp", Default::default()))
            .unwrap();
        reg.declare_storage_texture(StorageTextureSpec::new("out_tex", wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();
        reg.declare_texture_2d(TextureSpec::swapchain("prev")).unwrap();
        reg.declare_external_texture(ExternalTextureSpec::new("cam", || image::RgbaImage::new(1, 1)))
            .unwrap();
        reg.declare_texture_pair(TexturePairSpec::new("acc_w", "acc_r")).unwrap();
        reg
    }

    #[test]
    fn compute_declarations() {
        let reg = registry();
        let plan = plan_bindings(&reg, ShaderStage::Compute, false);
        let text = emit_bindings(&plan, reg.uniforms());
        let expected = "\
struct Params {
    time: f32,
    tint: vec4f,
};

@group(0) @binding(0)
var<uniform> params: Params;
@group(0) @binding(1)
var<storage, read_write> points: array<vec2f, 8>;
@group(0) @binding(2)
var samp: sampler;
@group(0) @binding(3)
var out_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(4)
var prev: texture_2d<f32>;
@group(0) @binding(5)
var cam: texture_external;
@group(0) @binding(6)
var acc_w: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(7)
var acc_r: texture_2d<f32>;
";
        assert_eq!(text, expected);
    }

    #[test]
    fn fragment_declarations_use_group_one() {
        let reg = registry();
        let plan = plan_bindings(&reg, ShaderStage::Fragment, false);
        let text = emit_bindings(&plan, reg.uniforms());
        assert!(text.contains("@group(1) @binding(0)\nvar<uniform> params: Params;"));
        assert_eq!(
            declared_bindings(&text),
            plan.binding_indices().into_iter().map(|b| (1, b)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_plan_emits_nothing() {
        let reg = ResourceRegistry::new();
        let plan = plan_bindings(&reg, ShaderStage::Vertex, false);
        assert_eq!(emit_bindings(&plan, reg.uniforms()), "");
    }

    #[test]
    fn compose_keeps_user_source_last() {
        let reg = registry();
        let plan = plan_bindings(&reg, ShaderStage::Vertex, false);
        let src = "@vertex fn main() -> @builtin(position) vec4f { return vec4f(0.0); }";
        let composed = compose_stage_source("struct Shared { a: f32 }", &plan, reg.uniforms(), src);
        assert!(composed.starts_with("struct Shared { a: f32 }\n\nstruct Params {"));
        assert!(composed.trim_end().ends_with(src));
    }

    #[test]
    fn declared_bindings_ignores_comments() {
        let text = "// @group(0) @binding(9)\n@group(2) @binding(3u) var x: f32;\n";
        assert_eq!(declared_bindings(text), vec![(2, 3)]);
    }

    #[test]
    fn texel_formats() {
        assert_eq!(storage_texel_format(wgpu::TextureFormat::R32Float), Some("r32float"));
        assert_eq!(storage_texel_format(wgpu::TextureFormat::Depth32Float), None);
    }
}
