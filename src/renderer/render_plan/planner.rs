//! Deterministic ordering and numbering of registry entries per shader stage.
//!
//! `plan_bindings` is the only place that decides which resources a stage sees and in
//! which order. Shader text, bind group layouts and bind groups are all derived from
//! its output.

use wgpu::ShaderStages;

use crate::renderer::registry::{LAYERS_BINDING, PARAMS_BINDING, Registration, ResourceRegistry};
use crate::renderer::types::{
    ExternalTextureId, PairId, SamplerId, ShaderStage, StorageId, StorageTextureId, TextureArrayId, TextureId,
    stage_mask_admits,
};
use crate::renderer::wgsl::storage_texel_format;

use super::types::{BindingKind, BindingPlan, PlanEntry, ResourceRef};

/// Name of the synthesized uniform struct.
pub const PARAMS_STRUCT: &str = "Params";

/// Texel format of both halves of a binding texture pair.
pub const PAIR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct PlanBuilder {
    stage: ShaderStage,
    entries: Vec<PlanEntry>,
}

impl PlanBuilder {
    fn push(&mut self, resource: ResourceRef, name: &str, wgsl_type: String, kind: BindingKind) {
        let visibility = match kind {
            BindingKind::UniformBuffer => uniform_visibility(self.stage),
            _ => self.stage.stages(),
        };
        self.entries.push(PlanEntry {
            binding: self.entries.len() as u32,
            resource,
            name: name.to_string(),
            wgsl_type,
            visibility,
            kind,
        });
    }
}

/// `Params` is shared by the vertex and fragment stages of a render pipeline.
fn uniform_visibility(stage: ShaderStage) -> ShaderStages {
    match stage {
        ShaderStage::Compute => ShaderStages::COMPUTE,
        ShaderStage::Vertex | ShaderStage::Fragment => ShaderStages::VERTEX_FRAGMENT,
    }
}

fn included(entry: &impl Registration, stage: ShaderStage, internal: bool) -> bool {
    entry.internal() == internal && stage_mask_admits(entry.stage(), stage)
}

/// Plan the bindings `stage` sees for resources whose `internal` flag equals `internal`.
///
/// Category order is fixed: Params, storages, layered buffer, samplers, storage textures,
/// textures, texture arrays, external textures, texture pairs (write slot first).
/// The vertex stage cannot write, so storages are read-only there and write-only
/// texture slots are left out.
pub fn plan_bindings(registry: &ResourceRegistry, stage: ShaderStage, internal: bool) -> BindingPlan {
    let mut plan = PlanBuilder {
        stage,
        entries: Vec::new(),
    };
    let writable = stage != ShaderStage::Vertex;

    if registry.uniforms().iter().any(|u| included(u, stage, internal)) {
        plan.push(
            ResourceRef::Params,
            PARAMS_BINDING,
            PARAMS_STRUCT.to_string(),
            BindingKind::UniformBuffer,
        );
    }

    for (i, storage) in registry.storages().iter().enumerate() {
        if included(storage, stage, internal) {
            plan.push(
                ResourceRef::Storage(StorageId(i as u32)),
                storage.name(),
                storage.type_name.clone(),
                BindingKind::StorageBuffer { read_only: !writable },
            );
        }
    }

    if let Some(layers) = registry.layered_buffer().filter(|l| included(*l, stage, internal)) {
        plan.push(
            ResourceRef::Layers,
            LAYERS_BINDING,
            layers.wgsl_type(),
            BindingKind::StorageBuffer { read_only: !writable },
        );
    }

    for (i, sampler) in registry.samplers().iter().enumerate() {
        if included(sampler, stage, internal) {
            let comparison = sampler.desc.compare.is_some();
            plan.push(
                ResourceRef::Sampler(SamplerId(i as u32)),
                sampler.name(),
                if comparison { "sampler_comparison" } else { "sampler" }.to_string(),
                BindingKind::Sampler { comparison },
            );
        }
    }

    if writable {
        for (i, texture) in registry.storage_textures().iter().enumerate() {
            if included(texture, stage, internal) {
                plan.push(
                    ResourceRef::StorageTexture(StorageTextureId(i as u32)),
                    texture.name(),
                    storage_texture_type(texture.format),
                    BindingKind::StorageTexture { format: texture.format },
                );
            }
        }
    }

    for (i, texture) in registry.textures().iter().enumerate() {
        if included(texture, stage, internal) {
            plan.push(
                ResourceRef::Texture(TextureId(i as u32)),
                texture.name(),
                "texture_2d<f32>".to_string(),
                BindingKind::Texture {
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
            );
        }
    }

    for (i, array) in registry.texture_arrays().iter().enumerate() {
        if included(array, stage, internal) {
            plan.push(
                ResourceRef::TextureArray(TextureArrayId(i as u32)),
                array.name(),
                "texture_2d_array<f32>".to_string(),
                BindingKind::Texture {
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                },
            );
        }
    }

    for (i, external) in registry.external_textures().iter().enumerate() {
        if included(external, stage, internal) {
            plan.push(
                ResourceRef::ExternalTexture(ExternalTextureId(i as u32)),
                external.name(),
                "texture_external".to_string(),
                BindingKind::ExternalTexture,
            );
        }
    }

    for (i, pair) in registry.pairs().iter().enumerate() {
        if !included(pair, stage, internal) {
            continue;
        }
        let id = PairId(i as u32);
        if writable {
            plan.push(
                ResourceRef::PairWrite(id),
                &pair.write_name,
                storage_texture_type(PAIR_FORMAT),
                BindingKind::StorageTexture { format: PAIR_FORMAT },
            );
        }
        plan.push(
            ResourceRef::PairRead(id),
            &pair.read_name,
            "texture_2d<f32>".to_string(),
            BindingKind::Texture {
                view_dimension: wgpu::TextureViewDimension::D2,
            },
        );
    }

    BindingPlan {
        stage,
        internal,
        entries: plan.entries,
    }
}

fn storage_texture_type(format: wgpu::TextureFormat) -> String {
    // Formats are validated at declaration; the fallback only guards direct plan use.
    let texel = storage_texel_format(format).unwrap_or("rgba8unorm");
    format!("texture_storage_2d<{texel}, write>")
}
