//! Binding plan data types.

use wgpu::ShaderStages;

use crate::renderer::types::{
    ExternalTextureId, PairId, SamplerId, ShaderStage, StorageId, StorageTextureId, TextureArrayId, TextureId,
};

/// Registry entry a plan slot points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// The synthesized `Params` uniform struct.
    Params,
    Storage(StorageId),
    Layers,
    Sampler(SamplerId),
    StorageTexture(StorageTextureId),
    Texture(TextureId),
    TextureArray(TextureArrayId),
    ExternalTexture(ExternalTextureId),
    PairWrite(PairId),
    PairRead(PairId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Sampler { comparison: bool },
    StorageTexture { format: wgpu::TextureFormat },
    Texture { view_dimension: wgpu::TextureViewDimension },
    ExternalTexture,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanEntry {
    pub binding: u32,
    pub resource: ResourceRef,
    /// Identifier the resource is declared under in WGSL.
    pub name: String,
    /// WGSL type text of the declaration.
    pub wgsl_type: String,
    pub visibility: ShaderStages,
    pub kind: BindingKind,
}

/// Ordered, contiguously numbered bindings of one (stage, internal) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingPlan {
    pub stage: ShaderStage,
    pub internal: bool,
    pub entries: Vec<PlanEntry>,
}

impl BindingPlan {
    pub fn group(&self) -> u32 {
        self.stage.bind_group_index()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn binding_indices(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.binding).collect()
    }

    pub fn entry(&self, resource: ResourceRef) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.resource == resource)
    }

    /// Whether the plan references a resource that is re-imported every frame.
    pub fn has_external_textures(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.resource, ResourceRef::ExternalTexture(_)))
    }
}
