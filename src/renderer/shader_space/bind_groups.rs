//! Bind group layouts and bind groups derived from a `BindingPlan`.
//!
//! Both are built by walking the plan in order; neither re-derives which resources
//! a stage sees. A resource without a live handle yields `ResourceNotReady`.

use std::collections::BTreeSet;

use crate::error::{BindingError, BindingResult};
use crate::renderer::backend::{
    GpuBuffer, GpuExternalTexture, GpuSampler, GpuTexture, GroupEntry, GroupResource,
};
use crate::renderer::render_plan::{BindingKind, BindingPlan, PlanEntry, ResourceRef};
use crate::renderer::wgsl::declared_bindings;

/// Live backend handles, indexed like the registry arenas.
#[derive(Debug, Default)]
pub(crate) struct ResourceHandles {
    pub params: Option<GpuBuffer>,
    pub storages: Vec<GpuBuffer>,
    pub layers: Option<GpuBuffer>,
    pub samplers: Vec<GpuSampler>,
    pub storage_textures: Vec<GpuTexture>,
    /// `None` while an image texture waits for its pixels.
    pub textures: Vec<Option<GpuTexture>>,
    /// Size of each uploaded image texture.
    pub texture_sizes: Vec<Option<(u32, u32)>>,
    pub texture_arrays: Vec<GpuTexture>,
    /// Imported once per frame.
    pub external: Vec<Option<GpuExternalTexture>>,
    /// `(write, read)`.
    pub pairs: Vec<(GpuTexture, GpuTexture)>,
}

impl ResourceHandles {
    fn resolve(&self, entry: &PlanEntry) -> BindingResult<GroupResource> {
        let missing = || {
            BindingError::ResourceNotReady(format!(
                "`{}` (binding {}) has no live handle yet",
                entry.name, entry.binding
            ))
        };
        Ok(match entry.resource {
            ResourceRef::Params => GroupResource::Buffer(self.params.ok_or_else(missing)?),
            ResourceRef::Storage(id) => GroupResource::Buffer(*self.storages.get(id.index()).ok_or_else(missing)?),
            ResourceRef::Layers => GroupResource::Buffer(self.layers.ok_or_else(missing)?),
            ResourceRef::Sampler(id) => GroupResource::Sampler(*self.samplers.get(id.index()).ok_or_else(missing)?),
            ResourceRef::StorageTexture(id) => {
                GroupResource::Texture(*self.storage_textures.get(id.index()).ok_or_else(missing)?)
            }
            ResourceRef::Texture(id) => {
                GroupResource::Texture(self.textures.get(id.index()).copied().flatten().ok_or_else(missing)?)
            }
            ResourceRef::TextureArray(id) => {
                GroupResource::Texture(*self.texture_arrays.get(id.index()).ok_or_else(missing)?)
            }
            ResourceRef::ExternalTexture(id) => {
                GroupResource::ExternalTexture(self.external.get(id.index()).copied().flatten().ok_or_else(missing)?)
            }
            ResourceRef::PairWrite(id) => GroupResource::Texture(self.pairs.get(id.index()).ok_or_else(missing)?.0),
            ResourceRef::PairRead(id) => GroupResource::Texture(self.pairs.get(id.index()).ok_or_else(missing)?.1),
        })
    }
}

/// Debug label of a plan's layout and bind group.
pub(crate) fn plan_label(plan: &BindingPlan) -> String {
    if plan.internal {
        format!("{}.internal", plan.stage)
    } else {
        plan.stage.to_string()
    }
}

fn binding_type(kind: BindingKind) -> wgpu::BindingType {
    match kind {
        BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Sampler { comparison: true } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
        BindingKind::Sampler { comparison: false } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
        BindingKind::StorageTexture { format } => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        BindingKind::Texture { view_dimension } => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        BindingKind::ExternalTexture => wgpu::BindingType::ExternalTexture,
    }
}

/// One layout entry per plan entry, `binding` and visibility taken from the plan.
pub(crate) fn layout_entries(plan: &BindingPlan) -> Vec<wgpu::BindGroupLayoutEntry> {
    plan.entries
        .iter()
        .map(|entry| wgpu::BindGroupLayoutEntry {
            binding: entry.binding,
            visibility: entry.visibility,
            ty: binding_type(entry.kind),
            count: None,
        })
        .collect()
}

/// One bind group entry per plan entry, pointing at the live handle.
pub(crate) fn group_entries(plan: &BindingPlan, handles: &ResourceHandles) -> BindingResult<Vec<GroupEntry>> {
    plan.entries
        .iter()
        .map(|entry| {
            Ok(GroupEntry {
                binding: entry.binding,
                resource: handles.resolve(entry)?,
            })
        })
        .collect()
}

/// Cross-check the three consumers of a plan: emitted declarations, layout entries
/// and (when built) bind group entries must name the same binding indices.
pub(crate) fn check_consistency(
    plan: &BindingPlan,
    emitted: &str,
    layout: &[wgpu::BindGroupLayoutEntry],
    group: Option<&[GroupEntry]>,
) -> BindingResult<()> {
    let expected: BTreeSet<u32> = plan.binding_indices().into_iter().collect();
    let mut text = BTreeSet::new();
    for (group_index, binding) in declared_bindings(emitted) {
        if group_index != plan.group() {
            return Err(BindingError::PlanInconsistency(format!(
                "{}: declaration uses group {group_index}, plan is group {}",
                plan_label(plan),
                plan.group()
            )));
        }
        text.insert(binding);
    }
    let layout: BTreeSet<u32> = layout.iter().map(|e| e.binding).collect();

    let mismatch = |what: &str, got: &BTreeSet<u32>| {
        BindingError::PlanInconsistency(format!(
            "{}: {what} bindings {got:?} differ from plan {expected:?}",
            plan_label(plan)
        ))
    };
    if text != expected {
        return Err(mismatch("declared", &text));
    }
    if layout != expected {
        return Err(mismatch("layout", &layout));
    }
    if let Some(group) = group {
        let group: BTreeSet<u32> = group.iter().map(|e| e.binding).collect();
        if group != expected {
            return Err(mismatch("bind group", &group));
        }
    }
    Ok(())
}
