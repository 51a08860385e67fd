//! ShaderSpace: the initialized binding compiler plus its per-frame runtime.
//!
//! A `ShaderSpaceBuilder` collects resource declarations and render passes. `build`
//! turns them into binding plans, composed WGSL, and backend objects. The resulting
//! `ShaderSpace` owns the registry and drives one frame per `run` call.

mod bind_groups;
mod builder;
mod builtins;
mod events;
mod frame;
mod passes;
pub mod sampler;

use std::collections::BTreeMap;
use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use crate::error::{BindingError, BindingResult};
use crate::renderer::backend::{GpuBackend, GpuBindGroup, GpuBuffer, GpuLayout, GpuPipeline, GpuTexture, TextureDesc};
use crate::renderer::layout::TypeLayout;
use crate::renderer::registry::ResourceRegistry;
use crate::renderer::render_plan::BindingPlan;
use crate::renderer::types::{ShaderStage, UniformValue};

use bind_groups::ResourceHandles;
use builtins::BuiltinUniforms;

pub use builder::{ShaderSpaceBuildOptions, ShaderSpaceBuilder};
pub use builtins::{BUILTIN_UNIFORMS, PointerState};
pub use frame::FrameStats;
pub use passes::{ComputeStage, DrawStage, RenderPassSpec, WgslShaderBundle};
pub use sampler::sampler_descriptor_from_params;

/// `(stage, internal)`: one plan, layout and bind group per namespace.
pub(crate) type Namespace = (ShaderStage, bool);

pub(crate) struct StageBindings {
    pub plan: BindingPlan,
    pub layout: GpuLayout,
    pub group: Option<GpuBindGroup>,
    /// A bound resource was replaced; rebuild the group before the next draw.
    pub stale: bool,
}

pub(crate) struct PassPipelines {
    pub spec: RenderPassSpec,
    pub compute: Option<GpuPipeline>,
    pub render: Option<GpuPipeline>,
}

pub struct ShaderSpace<B: GpuBackend> {
    backend: B,
    registry: ResourceRegistry,
    options: ShaderSpaceBuildOptions,
    params_layout: TypeLayout,
    storage_layouts: Vec<Arc<TypeLayout>>,
    storage_sizes: Vec<u64>,
    staging: Vec<Option<GpuBuffer>>,
    readbacks: Vec<Option<Vec<u8>>>,
    handles: ResourceHandles,
    frame_target: GpuTexture,
    namespaces: BTreeMap<Namespace, StageBindings>,
    passes: Vec<PassPipelines>,
    bundles: Vec<WgslShaderBundle>,
    external_in_use: Vec<bool>,
    builtins: BuiltinUniforms,
    frame_index: u64,
    lost: Option<String>,
}

impl<B: GpuBackend> ShaderSpace<B> {
    // ── Live values ──

    /// Replace a uniform's value. Takes effect on the next `run`.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> BindingResult<()> {
        let id = self
            .registry
            .find_uniform(name)
            .ok_or_else(|| BindingError::config(format!("unknown uniform `{name}`")))?;
        let value = value.into();
        builder::check_uniform_value(&self.params_layout.fields[id.index()], &value)?;
        self.registry.set_uniform_value(id, value);
        Ok(())
    }

    /// Replace the backing array of a mapped storage buffer. Only changed contents
    /// are uploaded.
    pub fn set_storage_values(&mut self, name: &str, values: impl Into<UniformValue>) -> BindingResult<()> {
        let id = self
            .registry
            .find_storage(name)
            .ok_or_else(|| BindingError::config(format!("unknown storage buffer `{name}`")))?;
        let values = values.into().leaves();
        let bytes = self.storage_layouts[id.index()].flatten(&values)?;
        let size = self.storage_sizes[id.index()];
        if bytes.len() as u64 > size {
            return Err(BindingError::config(format!(
                "`{name}`: {} bytes do not fit the {size}-byte buffer",
                bytes.len()
            )));
        }
        self.registry.set_storage_values(id, values)
    }

    /// Provide (or replace) the pixels of an image texture. Uploaded on the next `run`.
    pub fn provide_image(&mut self, name: &str, image: RgbaImage) -> BindingResult<()> {
        let id = self
            .registry
            .find_texture(name)
            .ok_or_else(|| BindingError::config(format!("unknown texture `{name}`")))?;
        self.registry.set_texture_image(id, image)
    }

    pub fn pointer(&mut self) -> &mut PointerState {
        &mut self.builtins.pointer
    }

    /// Re-create every screen-sized texture. The layered buffer keeps its init size.
    pub fn resize(&mut self, width: u32, height: u32) -> BindingResult<()> {
        if width == 0 || height == 0 {
            return Err(BindingError::config(format!("screen size {width}x{height} has a zero dimension")));
        }
        if (width, height) == self.screen_size() {
            return Ok(());
        }
        self.options.width = width;
        self.options.height = height;

        let target = self.backend.create_texture(&TextureDesc::flat(
            "frame",
            (width, height),
            self.options.target_format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::TEXTURE_BINDING,
        ))?;
        let old = std::mem::replace(&mut self.frame_target, target);
        self.backend.release_texture(old);

        self.create_textures(true)?;
        for ns in self.namespaces.values_mut() {
            ns.stale = true;
        }
        debug!(target: "forge_bindings::shader_space", width, height, "resized");
        Ok(())
    }

    // ── Read-back ──

    /// Bytes of a readable storage buffer as of the last completed frame.
    pub fn read_storage(&self, name: &str) -> Option<&[u8]> {
        let id = self.registry.find_storage(name)?;
        self.readbacks[id.index()].as_deref()
    }

    /// Scalars of a readable storage buffer, decoded through its layout.
    pub fn read_storage_values(&self, name: &str) -> Option<Vec<f64>> {
        let id = self.registry.find_storage(name)?;
        let bytes = self.readbacks[id.index()].as_deref()?;
        Some(self.storage_layouts[id.index()].decode(bytes))
    }

    // ── Accessors ──

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn plan(&self, stage: ShaderStage, internal: bool) -> Option<&BindingPlan> {
        self.namespaces.get(&(stage, internal)).map(|ns| &ns.plan)
    }

    pub fn shader_bundles(&self) -> &[WgslShaderBundle] {
        &self.bundles
    }

    pub fn params_layout(&self) -> &TypeLayout {
        &self.params_layout
    }

    pub fn frame_target(&self) -> GpuTexture {
        self.frame_target
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.options.width, self.options.height)
    }

    /// Frames completed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }
}
