//! Sampler descriptors from loosely-typed declaration params.
//!
//! Accepted keys:
//! - addressModeU/V/W: "mirror-repeat" | "repeat" | "clamp-to-edge"
//! - magFilter/minFilter/mipmapFilter: "linear" | "nearest"
//! - compare: "less" | "less-equal" | "greater" | ... (makes a comparison sampler)
//!
//! Legacy fields still used by some manifests:
//! - interpolation: "linear" | "nearest" (both filters at once)
//! - extension: "repeat" | "clamp" | "mirror-repeat" (every address mode)

use std::collections::HashMap;

use crate::error::{BindingError, BindingResult};

type Params = HashMap<String, serde_json::Value>;

fn text<'a>(params: &'a Params, key: &str) -> BindingResult<Option<&'a str>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(BindingError::config(format!("sampler `{key}` must be a string, got {other}"))),
    }
}

fn address_mode(params: &Params, key: &str) -> BindingResult<wgpu::AddressMode> {
    let Some(mode) = text(params, key)?.or(text(params, "extension")?) else {
        return Ok(wgpu::AddressMode::ClampToEdge);
    };
    match mode.to_ascii_lowercase().as_str() {
        "clamp-to-edge" | "clamp" => Ok(wgpu::AddressMode::ClampToEdge),
        "repeat" => Ok(wgpu::AddressMode::Repeat),
        "mirror-repeat" | "mirror" => Ok(wgpu::AddressMode::MirrorRepeat),
        other => Err(BindingError::config(format!("unknown sampler address mode `{other}`"))),
    }
}

fn filter<T>(params: &Params, key: &str, linear: T, nearest: T) -> BindingResult<T> {
    let mode = text(params, key)?.or(text(params, "interpolation")?).unwrap_or("linear");
    match mode.to_ascii_lowercase().as_str() {
        "linear" => Ok(linear),
        "nearest" => Ok(nearest),
        other => Err(BindingError::config(format!("unknown sampler filter `{other}`"))),
    }
}

fn compare(params: &Params) -> BindingResult<Option<wgpu::CompareFunction>> {
    use wgpu::CompareFunction as C;
    let Some(func) = text(params, "compare")? else {
        return Ok(None);
    };
    Ok(Some(match func.to_ascii_lowercase().as_str() {
        "never" => C::Never,
        "less" => C::Less,
        "equal" => C::Equal,
        "less-equal" => C::LessEqual,
        "greater" => C::Greater,
        "not-equal" => C::NotEqual,
        "greater-equal" => C::GreaterEqual,
        "always" => C::Always,
        other => return Err(BindingError::config(format!("unknown sampler compare function `{other}`"))),
    }))
}

pub fn sampler_descriptor_from_params(params: &Params) -> BindingResult<wgpu::SamplerDescriptor<'static>> {
    Ok(wgpu::SamplerDescriptor {
        label: None,
        address_mode_u: address_mode(params, "addressModeU")?,
        address_mode_v: address_mode(params, "addressModeV")?,
        address_mode_w: address_mode(params, "addressModeW")?,
        mag_filter: filter(params, "magFilter", wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest)?,
        min_filter: filter(params, "minFilter", wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest)?,
        mipmap_filter: filter(params, "mipmapFilter", wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest)?,
        compare: compare(params)?,
        ..Default::default()
    })
}
