//! JSON binding manifest.
//!
//! A manifest declares the screen, every resource and the render passes of a shader
//! space. Shader sources and images may be given by path; relative paths resolve
//! against the directory holding the manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::info;

use crate::renderer::registry::{
    EventSpec, LayeredBufferSpec, SamplerSpec, StorageSpec, StorageTextureSpec, TextureArraySpec, TexturePairSpec,
    TextureSpec, UniformSpec,
};
use crate::renderer::shader_space::{RenderPassSpec, ShaderSpaceBuildOptions, ShaderSpaceBuilder, sampler_descriptor_from_params};
use crate::renderer::types::{ShaderStage, UniformValue};
use crate::renderer::wgsl::storage_format_from_texel;

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_one() -> u32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub stage: Option<ShaderStage>,
    #[serde(default)]
    pub internal: bool,
}

/// WGSL text, inline or loaded from a file.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ShaderText {
    Inline { source: String },
    File { file: PathBuf },
}

#[derive(Clone, Debug, Deserialize)]
pub struct UniformEntry {
    pub name: String,
    pub value: UniformValue,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub readable: bool,
    #[serde(default)]
    pub backing: Option<UniformValue>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SamplerEntry {
    pub name: String,
    /// `addressModeU`, `magFilter`, `compare`, ...
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageTextureEntry {
    pub name: String,
    /// WGSL texel format, e.g. `rgba8unorm`.
    pub format: String,
    #[serde(default)]
    pub size: Option<[u32; 2]>,
    #[serde(flatten)]
    pub scope: Scope,
}

/// An image texture unless `swapchain` is set. Without `image` the pixels are
/// expected later from the host.
#[derive(Clone, Debug, Deserialize)]
pub struct TextureEntry {
    pub name: String,
    #[serde(default)]
    pub swapchain: bool,
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TextureArrayEntry {
    pub name: String,
    pub images: Vec<PathBuf>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LayeredBufferEntry {
    pub layers: u32,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TexturePairEntry {
    pub write: String,
    pub read: String,
    #[serde(default)]
    pub size: Option<[u32; 2]>,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventEntry {
    pub name: String,
    #[serde(default)]
    pub payload_words: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ComputeEntry {
    pub shader: ShaderText,
    #[serde(default = "default_compute_entry")]
    pub entry: String,
    #[serde(default = "default_workgroups")]
    pub workgroups: [u32; 3],
}

fn default_compute_entry() -> String {
    "main".to_string()
}

fn default_workgroups() -> [u32; 3] {
    [1, 1, 1]
}

#[derive(Clone, Debug, Deserialize)]
pub struct DrawEntry {
    pub vertex: ShaderText,
    pub fragment: ShaderText,
    #[serde(default)]
    pub vertex_entry: Option<String>,
    #[serde(default)]
    pub fragment_entry: Option<String>,
    #[serde(default)]
    pub vertices: Option<u32>,
    #[serde(default = "default_one")]
    pub instances: u32,
    /// RGBA clear color; `null` loads whatever earlier passes drew.
    #[serde(default = "default_clear")]
    pub clear: Option<[f64; 4]>,
}

fn default_clear() -> Option<[f64; 4]> {
    Some([0.0, 0.0, 0.0, 1.0])
}

#[derive(Clone, Debug, Deserialize)]
pub struct PassEntry {
    pub name: String,
    #[serde(default)]
    pub compute: Option<ComputeEntry>,
    #[serde(default)]
    pub draw: Option<DrawEntry>,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BindingManifest {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Struct definitions shared by every module.
    #[serde(default)]
    pub structs: Vec<ShaderText>,
    #[serde(default)]
    pub uniforms: Vec<UniformEntry>,
    #[serde(default)]
    pub storages: Vec<StorageEntry>,
    #[serde(default)]
    pub samplers: Vec<SamplerEntry>,
    #[serde(default)]
    pub storage_textures: Vec<StorageTextureEntry>,
    #[serde(default)]
    pub textures: Vec<TextureEntry>,
    #[serde(default)]
    pub texture_arrays: Vec<TextureArrayEntry>,
    #[serde(default)]
    pub layered_buffer: Option<LayeredBufferEntry>,
    #[serde(default)]
    pub texture_pairs: Vec<TexturePairEntry>,
    #[serde(default)]
    pub events: Vec<EventEntry>,
    #[serde(default)]
    pub passes: Vec<PassEntry>,
}

/// A parsed manifest plus the directory its relative paths resolve against.
#[derive(Clone, Debug)]
pub struct LoadedManifest {
    pub manifest: BindingManifest,
    pub base_dir: PathBuf,
}

pub fn load_manifest(path: &Path) -> Result<LoadedManifest> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest: BindingManifest =
        serde_json::from_str(&text).with_context(|| format!("invalid binding manifest in {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedManifest { manifest, base_dir })
}

fn scoped<T>(spec: T, scope: &Scope, stage: fn(T, ShaderStage) -> T, internal: fn(T) -> T) -> T {
    let spec = match scope.stage {
        Some(s) => stage(spec, s),
        None => spec,
    };
    if scope.internal { internal(spec) } else { spec }
}

impl LoadedManifest {
    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            manifest: serde_json::from_str(text).context("invalid binding manifest")?,
            base_dir: base_dir.into(),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn shader_text(&self, text: &ShaderText) -> Result<String> {
        match text {
            ShaderText::Inline { source } => Ok(source.clone()),
            ShaderText::File { file } => {
                let path = self.resolve(file);
                std::fs::read_to_string(&path).with_context(|| format!("failed to read shader {}", path.display()))
            }
        }
    }

    fn image(&self, path: &Path) -> Result<image::RgbaImage> {
        let path = self.resolve(path);
        Ok(image::open(&path)
            .with_context(|| format!("failed to load image {}", path.display()))?
            .to_rgba8())
    }

    pub fn build_options(&self) -> ShaderSpaceBuildOptions {
        ShaderSpaceBuildOptions {
            width: self.manifest.width,
            height: self.manifest.height,
            ..Default::default()
        }
    }

    /// Declare every resource and pass on a fresh builder. Fired events are logged.
    pub fn builder(&self, options: ShaderSpaceBuildOptions) -> Result<ShaderSpaceBuilder> {
        let m = &self.manifest;
        let mut builder = ShaderSpaceBuilder::new(options)?;

        for text in &m.structs {
            builder.declare_structs(&self.shader_text(text)?)?;
        }
        for u in &m.uniforms {
            let mut spec = UniformSpec::new(u.name.clone(), u.value.clone());
            if let Some(ty) = &u.type_name {
                spec = spec.typed(ty.clone());
            }
            builder.declare_uniform(scoped(spec, &u.scope, UniformSpec::stage, UniformSpec::internal))?;
        }
        for s in &m.storages {
            let mut spec = StorageSpec::new(s.name.clone(), s.type_name.clone());
            if s.readable {
                spec = spec.readable();
            }
            if let Some(backing) = &s.backing {
                spec = spec.backing(backing.clone());
            }
            if let Some(length) = s.length {
                spec = spec.length(length);
            }
            builder.declare_storage(scoped(spec, &s.scope, StorageSpec::stage, StorageSpec::internal))?;
        }
        for s in &m.samplers {
            let desc = sampler_descriptor_from_params(&s.params).with_context(|| format!("sampler `{}`", s.name))?;
            let spec = SamplerSpec::new(s.name.clone(), desc);
            builder.declare_sampler(scoped(spec, &s.scope, SamplerSpec::stage, SamplerSpec::internal))?;
        }
        for t in &m.storage_textures {
            let format = storage_format_from_texel(&t.format.to_ascii_lowercase())
                .ok_or_else(|| anyhow!("storage texture `{}`: unsupported format `{}`", t.name, t.format))?;
            let mut spec = StorageTextureSpec::new(t.name.clone(), format);
            if let Some([w, h]) = t.size {
                spec = spec.sized(w, h);
            }
            builder.declare_storage_texture(scoped(spec, &t.scope, StorageTextureSpec::stage, StorageTextureSpec::internal))?;
        }
        for t in &m.textures {
            let spec = match (t.swapchain, &t.image) {
                (true, Some(_)) => bail!("texture `{}` cannot be both a swapchain copy and an image", t.name),
                (true, None) => TextureSpec::swapchain(t.name.clone()),
                (false, Some(path)) => TextureSpec::image(t.name.clone(), self.image(path)?),
                (false, None) => TextureSpec::pending_image(t.name.clone()),
            };
            builder.declare_texture_2d(scoped(spec, &t.scope, TextureSpec::stage, TextureSpec::internal))?;
        }
        for a in &m.texture_arrays {
            let images = a.images.iter().map(|p| self.image(p)).collect::<Result<Vec<_>>>()?;
            let spec = TextureArraySpec::new(a.name.clone(), images);
            builder.declare_texture_2d_array(scoped(spec, &a.scope, TextureArraySpec::stage, TextureArraySpec::internal))?;
        }
        if let Some(l) = &m.layered_buffer {
            let spec = LayeredBufferSpec::new(l.layers);
            builder.declare_layered_buffer(scoped(spec, &l.scope, LayeredBufferSpec::stage, LayeredBufferSpec::internal))?;
        }
        for p in &m.texture_pairs {
            let mut spec = TexturePairSpec::new(p.write.clone(), p.read.clone());
            if let Some([w, h]) = p.size {
                spec = spec.sized(w, h);
            }
            builder.declare_texture_pair(scoped(spec, &p.scope, TexturePairSpec::stage, TexturePairSpec::internal))?;
        }
        for e in &m.events {
            let name = e.name.clone();
            builder.register_event(EventSpec::new(e.name.clone(), e.payload_words, move |payload: &[u32]| {
                info!(target: "forge_bindings::events", event = %name, ?payload, "event fired");
            }))?;
        }
        for p in &m.passes {
            builder.add_pass(self.pass(p)?)?;
        }
        Ok(builder)
    }

    fn pass(&self, entry: &PassEntry) -> Result<RenderPassSpec> {
        let mut pass = RenderPassSpec::new(entry.name.clone());
        if let Some(c) = &entry.compute {
            pass = pass.compute(self.shader_text(&c.shader)?, c.entry.clone(), c.workgroups);
        }
        if let Some(d) = &entry.draw {
            pass = pass.draw(self.shader_text(&d.vertex)?, self.shader_text(&d.fragment)?);
            if let Some(draw) = pass.draw.as_mut() {
                if let Some(v) = &d.vertex_entry {
                    draw.vertex_entry = v.clone();
                }
                if let Some(f) = &d.fragment_entry {
                    draw.fragment_entry = f.clone();
                }
                draw.vertex_count = d.vertices.unwrap_or(draw.vertex_count);
                draw.instance_count = d.instances;
                draw.clear = d.clear.map(|[r, g, b, a]| wgpu::Color { r, g, b, a });
            }
        }
        if entry.internal {
            pass = pass.internal();
        }
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "width": 8,
        "height": 4,
        "structs": [{ "source": "struct Cell { v: vec2f, n: u32 }" }],
        "uniforms": [{ "name": "gain", "value": 0.5 }, { "name": "tint", "value": [1, 0, 0, 1], "type": "vec4f", "stage": "fragment" }],
        "storages": [{ "name": "cells", "type": "array<Cell>", "length": 4, "readable": true }],
        "samplers": [{ "name": "smp", "params": { "magFilter": "nearest" } }],
        "storage_textures": [{ "name": "canvas", "format": "rgba8unorm" }],
        "textures": [{ "name": "prev", "swapchain": true }],
        "texture_pairs": [{ "write": "acc_out", "read": "acc_in", "size": [2, 2] }],
        "events": [{ "name": "hit", "payload_words": 2 }],
        "passes": [
            { "name": "sim", "compute": { "shader": { "source": "@compute @workgroup_size(1) fn main() {}" }, "workgroups": [2, 1, 1] } },
            { "name": "show", "draw": { "vertex": { "source": "" }, "fragment": { "source": "" }, "clear": null } }
        ]
    }"#;

    #[test]
    fn manifest_declares_everything() {
        let loaded = LoadedManifest::parse(MANIFEST, ".").unwrap();
        let options = ShaderSpaceBuildOptions {
            validate_wgsl: false,
            ..loaded.build_options()
        };
        assert_eq!((options.width, options.height), (8, 4));
        let mut builder = loaded.builder(options).unwrap();

        let reg = builder.registry();
        assert!(reg.find_uniform("tint").is_some());
        assert_eq!(reg.storages().len(), 2, "user storage plus the event buffer");
        assert_eq!(reg.samplers()[0].desc.mag_filter, wgpu::FilterMode::Nearest);
        assert_eq!(reg.storage_textures()[0].format, wgpu::TextureFormat::Rgba8Unorm);

        let bundles = builder.emit().unwrap();
        assert_eq!(bundles.len(), 2);
        assert!(bundles[0].compute.as_deref().unwrap().contains("var<storage, read_write> cells: array<Cell>;"));
        assert!(bundles[1].fragment.is_some());
    }

    #[test]
    fn bad_entries_are_reported() {
        let swapped = r#"{ "textures": [{ "name": "t", "swapchain": true, "image": "a.png" }] }"#;
        let loaded = LoadedManifest::parse(swapped, ".").unwrap();
        assert!(loaded.builder(loaded.build_options()).is_err());

        let format = r#"{ "storage_textures": [{ "name": "t", "format": "rgb9e5ufloat" }] }"#;
        let loaded = LoadedManifest::parse(format, ".").unwrap();
        let err = loaded.builder(loaded.build_options()).unwrap_err();
        assert!(format!("{err:#}").contains("rgb9e5ufloat"));

        assert!(LoadedManifest::parse(r#"{ "width": "wide" }"#, ".").is_err());
    }
}
