//! WGSL validation using the naga library.

use anyhow::{Context, Result, anyhow};

/// Parse composed WGSL with naga.
///
/// Returns the parsed module on success, or an error that carries the numbered
/// source so the generated declarations can be inspected.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL validation failed:\n{}", format_naga_error(source, &e)))
}

/// Validate WGSL and name the pass/stage that produced it.
pub fn validate_wgsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_wgsl(source).with_context(|| format!("{context} generated invalid WGSL"))
}

/// `(group, binding, name)` of every resource variable naga found, sorted by slot.
pub fn module_bindings(module: &naga::Module) -> Vec<(u32, u32, String)> {
    let mut out: Vec<_> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            Some((
                binding.group,
                binding.binding,
                var.name.clone().unwrap_or_default(),
            ))
        })
        .collect();
    out.sort();
    out
}

fn format_naga_error(source: &str, error: &naga::front::wgsl::ParseError) -> String {
    let mut output = String::new();

    output.push_str(&format!("  {}\n", error));
    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_module_reports_bindings() {
        let source = r#"
struct Params {
    time: f32,
};

@group(1) @binding(0)
var<uniform> params: Params;
@group(1) @binding(1)
var tex: texture_2d<f32>;
@group(1) @binding(2)
var samp: sampler;

@fragment
fn main() -> @location(0) vec4f {
    return textureSample(tex, samp, vec2f(params.time));
}
"#;
        let module = validate_wgsl(source).unwrap();
        let bindings = module_bindings(&module);
        assert_eq!(
            bindings,
            vec![
                (1, 0, "params".to_string()),
                (1, 1, "tex".to_string()),
                (1, 2, "samp".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_module_includes_numbered_source() {
        let err = validate_wgsl_with_context("fn broken( {", "pass blur/fragment").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("pass blur/fragment generated invalid WGSL"));
        assert!(msg.contains("   1 | fn broken( {"));
    }
}
