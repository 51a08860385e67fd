//! Registration surface and init.
//!
//! `ShaderSpaceBuilder` collects declarations and passes, then `build` freezes the
//! registry, plans every stage, composes and optionally validates WGSL, and creates
//! all GPU objects. `emit` stops after composition and needs no backend.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use image::imageops::FilterType;
use tracing::{debug, info, warn};

use crate::error::{BindingError, BindingResult};
use crate::renderer::backend::{
    BufferDesc, ComputePipelineDesc, GpuBackend, GpuLayout, RenderPipelineDesc, TextureDesc,
};
use crate::renderer::layout::flatten::leaf_count;
use crate::renderer::layout::{FieldLayout, TypeLayout, TypeLayoutResolver};
use crate::renderer::registry::{
    EventSpec, ExternalTextureSpec, LayeredBufferSpec, Registration, ResourceRegistry, SamplerSpec, StorageBinding,
    StorageSpec, StorageTextureSpec, TextureArraySpec, TexturePairSpec, TextureSource, TextureSpec, UniformSpec,
};
use crate::renderer::render_plan::{BindingPlan, PAIR_FORMAT, PARAMS_STRUCT, ResourceRef, plan_bindings};
use crate::renderer::types::{
    EventId, ExternalTextureId, PairId, SamplerId, ShaderStage, StorageId, StorageTextureId, TextureArrayId,
    TextureId, UniformId, UniformValue,
};
use crate::renderer::validation::{module_bindings, validate_wgsl_with_context};
use crate::renderer::wgsl::{compose_stage_source, emit_bindings};

use super::bind_groups::{ResourceHandles, check_consistency, group_entries, layout_entries, plan_label};
use super::builtins::BuiltinUniforms;
use super::passes::{RenderPassSpec, WgslShaderBundle};
use super::{Namespace, PassPipelines, ShaderSpace, StageBindings};

#[derive(Clone, Debug)]
pub struct ShaderSpaceBuildOptions {
    pub width: u32,
    pub height: u32,
    /// Format of the frame target and of swapchain-copy textures.
    pub target_format: wgpu::TextureFormat,
    /// Write every composed module to `<dir>/<pass>.<stage>.wgsl`.
    pub debug_dump_wgsl_dir: Option<PathBuf>,
    /// Parse and validate every composed module with naga at init.
    pub validate_wgsl: bool,
}

impl Default for ShaderSpaceBuildOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            target_format: wgpu::TextureFormat::Rgba8Unorm,
            debug_dump_wgsl_dir: None,
            validate_wgsl: true,
        }
    }
}

/// Everything init derives from the frozen registry before touching the GPU.
pub(crate) struct CompiledSpace {
    pub params_layout: TypeLayout,
    pub storage_layouts: Vec<Arc<TypeLayout>>,
    pub storage_sizes: Vec<u64>,
    pub plans: BTreeMap<Namespace, BindingPlan>,
    pub bundles: Vec<WgslShaderBundle>,
}

#[derive(Debug)]
pub struct ShaderSpaceBuilder {
    options: ShaderSpaceBuildOptions,
    registry: ResourceRegistry,
    resolver: TypeLayoutResolver,
    shared_structs: String,
    passes: Vec<RenderPassSpec>,
    builtins: BuiltinUniforms,
}

impl ShaderSpaceBuilder {
    /// Built-in uniforms are registered here, ahead of any user uniform.
    pub fn new(options: ShaderSpaceBuildOptions) -> BindingResult<Self> {
        if options.width == 0 || options.height == 0 {
            return Err(BindingError::config(format!(
                "screen size {}x{} has a zero dimension",
                options.width, options.height
            )));
        }
        let mut registry = ResourceRegistry::new();
        let builtins = BuiltinUniforms::register(&mut registry, (options.width, options.height))?;
        Ok(Self {
            options,
            registry,
            resolver: TypeLayoutResolver::new(),
            shared_structs: String::new(),
            passes: Vec::new(),
            builtins,
        })
    }

    pub fn options(&self) -> &ShaderSpaceBuildOptions {
        &self.options
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    // ── Registration ──

    /// Struct definitions prepended to every composed module and known to the
    /// layout resolver.
    pub fn declare_structs(&mut self, source: &str) -> BindingResult<()> {
        self.resolver.add_source(source)?;
        if !self.shared_structs.is_empty() {
            self.shared_structs.push('\n');
        }
        self.shared_structs.push_str(source.trim());
        Ok(())
    }

    pub fn declare_uniform(&mut self, spec: UniformSpec) -> BindingResult<UniformId> {
        self.registry.declare_uniform(spec)
    }

    pub fn declare_storage(&mut self, spec: StorageSpec) -> BindingResult<StorageId> {
        self.registry.declare_storage(spec)
    }

    pub fn declare_sampler(&mut self, spec: SamplerSpec) -> BindingResult<SamplerId> {
        self.registry.declare_sampler(spec)
    }

    pub fn declare_storage_texture(&mut self, spec: StorageTextureSpec) -> BindingResult<StorageTextureId> {
        self.registry.declare_storage_texture(spec)
    }

    pub fn declare_texture_2d(&mut self, spec: TextureSpec) -> BindingResult<TextureId> {
        self.registry.declare_texture_2d(spec)
    }

    pub fn declare_texture_2d_array(&mut self, spec: TextureArraySpec) -> BindingResult<TextureArrayId> {
        self.registry.declare_texture_2d_array(spec)
    }

    pub fn declare_external_texture(&mut self, spec: ExternalTextureSpec) -> BindingResult<ExternalTextureId> {
        self.registry.declare_external_texture(spec)
    }

    /// One vec4f cell per screen pixel in each layer. The size is fixed at init and
    /// does not follow later resizes.
    pub fn declare_layered_buffer(&mut self, spec: LayeredBufferSpec) -> BindingResult<()> {
        let layer_len = self.options.width.checked_mul(self.options.height).ok_or_else(|| {
            BindingError::config("layered buffer layer does not fit in u32 cells")
        })?;
        self.registry.declare_layered_buffer(spec, layer_len)
    }

    pub fn declare_texture_pair(&mut self, spec: TexturePairSpec) -> BindingResult<PairId> {
        self.registry.declare_texture_pair(spec)
    }

    pub fn register_event(&mut self, spec: EventSpec) -> BindingResult<EventId> {
        self.registry.register_event(spec)
    }

    pub fn add_pass(&mut self, pass: RenderPassSpec) -> BindingResult<()> {
        if self.registry.is_frozen() {
            return Err(BindingError::config(format!(
                "cannot add render pass `{}` after init",
                pass.name
            )));
        }
        pass.validate()?;
        if self.passes.iter().any(|p| p.name == pass.name) {
            return Err(BindingError::config(format!("duplicate render pass name `{}`", pass.name)));
        }
        self.passes.push(pass);
        Ok(())
    }

    // ── Init ──

    /// Freeze the registry and compose every pass's WGSL without a GPU.
    pub fn emit(&mut self) -> BindingResult<Vec<WgslShaderBundle>> {
        Ok(self.compile()?.bundles)
    }

    pub(crate) fn compile(&mut self) -> BindingResult<CompiledSpace> {
        self.registry.freeze();
        for pass in &self.passes {
            for source in pass_sources(pass) {
                self.resolver.add_source(source)?;
            }
        }

        let members: Vec<(String, String)> = self
            .registry
            .uniforms()
            .iter()
            .map(|u| (u.name().to_string(), u.type_name.clone()))
            .collect();
        let params_layout = self.resolver.layout_for_members(PARAMS_STRUCT, &members)?;
        for (uniform, field) in self.registry.uniforms().iter().zip(&params_layout.fields) {
            check_uniform_value(field, &uniform.value)?;
        }

        let mut storage_layouts = Vec::with_capacity(self.registry.storages().len());
        let mut storage_sizes = Vec::with_capacity(storage_layouts.capacity());
        for storage in self.registry.storages() {
            let layout = self.resolver.resolve_storage(&storage.type_name)?;
            storage_sizes.push(storage_size(storage, &layout)?);
            storage_layouts.push(layout);
        }

        let mut plans = BTreeMap::new();
        for pass in &self.passes {
            for stage in pass.stages() {
                plans
                    .entry((stage, pass.internal))
                    .or_insert_with(|| plan_bindings(&self.registry, stage, pass.internal));
            }
        }
        for plan in plans.values() {
            debug!(
                target: "forge_bindings::planner",
                plan = %plan_label(plan),
                group = plan.group(),
                entries = plan.entries.len(),
                "planned bindings"
            );
        }

        let mut bundles = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let bundle = self.compose_pass(pass, &plans);
            for (stage, text) in bundle.modules() {
                let plan = &plans[&(stage, pass.internal)];
                if let Some(dir) = &self.options.debug_dump_wgsl_dir {
                    dump_module(dir, &pass.name, stage, text);
                }
                if self.options.validate_wgsl {
                    check_module(&pass.name, stage, text, plan)?;
                }
            }
            bundles.push(bundle);
        }

        info!(
            target: "forge_bindings::shader_space",
            passes = self.passes.len(),
            plans = plans.len(),
            uniforms = self.registry.uniforms().len(),
            storages = self.registry.storages().len(),
            params_bytes = params_layout.byte_size,
            "compiled shader space"
        );

        Ok(CompiledSpace {
            params_layout,
            storage_layouts,
            storage_sizes,
            plans,
            bundles,
        })
    }

    fn compose_pass(&self, pass: &RenderPassSpec, plans: &BTreeMap<Namespace, BindingPlan>) -> WgslShaderBundle {
        let uniforms = self.registry.uniforms();
        let module = |stage: ShaderStage, source: &str| {
            compose_stage_source(&self.shared_structs, &plans[&(stage, pass.internal)], uniforms, source)
        };
        WgslShaderBundle {
            pass: pass.name.clone(),
            compute: pass.compute.as_ref().map(|c| module(ShaderStage::Compute, &c.source)),
            vertex: pass.draw.as_ref().map(|d| module(ShaderStage::Vertex, &d.vertex_source)),
            fragment: pass.draw.as_ref().map(|d| module(ShaderStage::Fragment, &d.fragment_source)),
        }
    }

    /// Run init against `backend`.
    pub fn build<B: GpuBackend>(mut self, mut backend: B) -> BindingResult<ShaderSpace<B>> {
        let compiled = self.compile()?;
        let screen = (self.options.width, self.options.height);
        let frame_target = backend.create_texture(&TextureDesc::flat(
            "frame",
            screen,
            self.options.target_format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::TEXTURE_BINDING,
        ))?;

        let mut external_in_use = vec![false; self.registry.external_textures().len()];
        for plan in compiled.plans.values() {
            for entry in &plan.entries {
                if let ResourceRef::ExternalTexture(id) = entry.resource {
                    external_in_use[id.index()] = true;
                }
            }
        }

        let storage_count = self.registry.storages().len();
        let mut space = ShaderSpace {
            backend,
            registry: self.registry,
            options: self.options,
            params_layout: compiled.params_layout,
            storage_layouts: compiled.storage_layouts,
            storage_sizes: compiled.storage_sizes,
            staging: vec![None; storage_count],
            readbacks: vec![None; storage_count],
            handles: ResourceHandles::default(),
            frame_target,
            namespaces: BTreeMap::new(),
            passes: Vec::new(),
            bundles: compiled.bundles,
            external_in_use,
            builtins: self.builtins,
            frame_index: 0,
            lost: None,
        };
        space.create_buffers()?;
        space.create_textures(false)?;
        space.upload_changed_textures()?;
        space.create_namespaces(compiled.plans)?;
        space.create_pipelines(&self.passes)?;

        info!(
            target: "forge_bindings::shader_space",
            width = space.options.width,
            height = space.options.height,
            passes = space.passes.len(),
            "shader space ready"
        );
        Ok(space)
    }
}

fn pass_sources(pass: &RenderPassSpec) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(compute) = &pass.compute {
        out.push(compute.source.as_str());
    }
    if let Some(draw) = &pass.draw {
        out.push(draw.vertex_source.as_str());
        out.push(draw.fragment_source.as_str());
    }
    out
}

/// A uniform value must supply exactly one scalar per component of its type.
pub(crate) fn check_uniform_value(field: &FieldLayout, value: &UniformValue) -> BindingResult<()> {
    let expected = leaf_count(&field.slots);
    let got = value.leaves().len();
    if got != expected {
        return Err(BindingError::config(format!(
            "uniform `{}` of type `{}` takes {expected} scalar(s), got {got}",
            field.name, field.ty
        )));
    }
    Ok(())
}

/// Buffer size of a storage binding. Runtime-sized types take their element count
/// from the declared length, or else from the backing array.
pub(crate) fn storage_size(storage: &StorageBinding, layout: &TypeLayout) -> BindingResult<u64> {
    let name = storage.name();
    let size = match (&layout.runtime_tail, storage.length, &storage.values) {
        (None, _, _) => layout.buffer_size(0),
        (Some(_), Some(length), _) => layout.buffer_size(length),
        (Some(tail), None, Some(values)) => {
            let per_element = leaf_count(&tail.element_slots).max(1);
            let elements = values.len().saturating_sub(layout.leaf_count()) / per_element;
            layout.buffer_size(elements as u32)
        }
        (Some(_), None, None) => {
            return Err(BindingError::config(format!(
                "runtime-sized storage `{name}` needs a length or a backing array"
            )));
        }
    };
    if let Some(values) = &storage.values {
        let bytes = layout.flatten(values)?;
        if bytes.len() as u64 > size {
            return Err(BindingError::config(format!(
                "backing array of `{name}` is {} bytes, buffer holds {size}",
                bytes.len()
            )));
        }
    }
    Ok(size)
}

fn dump_module(dir: &std::path::Path, pass: &str, stage: ShaderStage, text: &str) {
    let path = dir.join(format!("{pass}.{stage}.wgsl"));
    if let Err(err) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text)) {
        warn!(target: "forge_bindings::shader_space", path = %path.display(), %err, "failed to dump WGSL");
    }
}

/// naga parse plus a cross-check of the generated group against the plan.
fn check_module(pass: &str, stage: ShaderStage, text: &str, plan: &BindingPlan) -> BindingResult<()> {
    let context = format!("pass `{pass}` {stage} module");
    let module = validate_wgsl_with_context(text, &context).map_err(|e| BindingError::config(format!("{e:#}")))?;

    let declared: BTreeSet<u32> = module_bindings(&module)
        .into_iter()
        .filter(|(group, _, _)| *group == plan.group())
        .map(|(_, binding, _)| binding)
        .collect();
    let planned: BTreeSet<u32> = plan.binding_indices().into_iter().collect();
    if let Some(extra) = declared.difference(&planned).next() {
        return Err(BindingError::config(format!(
            "{context} declares @group({}) @binding({extra}), which is reserved for generated bindings",
            plan.group()
        )));
    }
    if declared != planned {
        return Err(BindingError::PlanInconsistency(format!(
            "{context}: naga sees bindings {declared:?}, plan has {planned:?}"
        )));
    }
    Ok(())
}

// ── GPU object creation ──

fn install<T: Copy>(slots: &mut Vec<T>, index: usize, value: T) -> Option<T> {
    match slots.get_mut(index) {
        Some(slot) => Some(std::mem::replace(slot, value)),
        None => {
            slots.push(value);
            None
        }
    }
}

fn fit_layer(image: &RgbaImage, (width, height): (u32, u32)) -> std::borrow::Cow<'_, RgbaImage> {
    if image.dimensions() == (width, height) {
        std::borrow::Cow::Borrowed(image)
    } else {
        std::borrow::Cow::Owned(image::imageops::resize(image, width, height, FilterType::Triangle))
    }
}

impl<B: GpuBackend> ShaderSpace<B> {
    fn create_buffers(&mut self) -> BindingResult<()> {
        let params = self.backend.create_buffer(&BufferDesc {
            label: "params".to_string(),
            size: self.params_layout.buffer_size(0),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })?;
        self.handles.params = Some(params);

        for (i, storage) in self.registry.storages().iter().enumerate() {
            let size = self.storage_sizes[i];
            let buffer = self.backend.create_buffer(&BufferDesc {
                label: storage.name().to_string(),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            })?;
            self.handles.storages.push(buffer);
            if storage.readable {
                self.staging[i] = Some(self.backend.create_buffer(&BufferDesc {
                    label: format!("{}.readback", storage.name()),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                })?);
            }
        }

        if let Some(layers) = self.registry.layered_buffer() {
            self.handles.layers = Some(self.backend.create_buffer(&BufferDesc {
                label: layers.name().to_string(),
                size: layers.byte_size(),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            })?);
        }

        for sampler in self.registry.samplers() {
            self.handles.samplers.push(self.backend.create_sampler(&sampler.desc)?);
        }
        Ok(())
    }

    /// Create (or, with `resize`, re-create) every texture whose size follows the
    /// screen. At init, fixed-size textures and texture arrays are created as well.
    pub(super) fn create_textures(&mut self, resize: bool) -> BindingResult<()> {
        let screen = self.screen_size();

        for (i, binding) in self.registry.storage_textures().iter().enumerate() {
            if resize && binding.size.is_some() {
                continue;
            }
            let texture = self.backend.create_texture(&TextureDesc::flat(
                binding.name(),
                binding.size.unwrap_or(screen),
                binding.format,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            ))?;
            if let Some(old) = install(&mut self.handles.storage_textures, i, texture) {
                self.backend.release_texture(old);
            }
        }

        for (i, binding) in self.registry.textures().iter().enumerate() {
            let texture = match binding.source {
                TextureSource::Swapchain => Some(self.backend.create_texture(&TextureDesc::flat(
                    binding.name(),
                    screen,
                    self.options.target_format,
                    wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                ))?),
                // Image textures are sized by their image, uploaded separately.
                TextureSource::Image(_) if resize => continue,
                TextureSource::Image(_) => None,
            };
            if let Some(Some(old)) = install(&mut self.handles.textures, i, texture) {
                self.backend.release_texture(old);
            }
        }

        for (i, binding) in self.registry.pairs().iter().enumerate() {
            if resize && binding.size.is_some() {
                continue;
            }
            let size = binding.size.unwrap_or(screen);
            let write = self.backend.create_texture(&TextureDesc::flat(
                binding.write_name.as_str(),
                size,
                PAIR_FORMAT,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            ))?;
            let read = self.backend.create_texture(&TextureDesc::flat(
                binding.read_name.as_str(),
                size,
                PAIR_FORMAT,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ))?;
            if let Some((old_write, old_read)) = install(&mut self.handles.pairs, i, (write, read)) {
                self.backend.release_texture(old_write);
                self.backend.release_texture(old_read);
            }
        }

        if resize {
            return Ok(());
        }

        for binding in self.registry.texture_arrays() {
            let first = binding
                .images
                .first()
                .ok_or_else(|| BindingError::config(format!("texture array `{}` has no images", binding.name())))?;
            let size = first.dimensions();
            let texture = self.backend.create_texture(&TextureDesc {
                label: binding.name().to_string(),
                width: size.0,
                height: size.1,
                layers: binding.images.len() as u32,
                array: true,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            })?;
            for (layer, image) in binding.images.iter().enumerate() {
                self.backend.write_texture(texture, layer as u32, &fit_layer(image, size))?;
            }
            self.handles.texture_arrays.push(texture);
        }

        self.handles.texture_sizes = vec![None; self.registry.textures().len()];
        self.handles.external = vec![None; self.registry.external_textures().len()];
        Ok(())
    }

    fn create_namespaces(&mut self, plans: BTreeMap<Namespace, BindingPlan>) -> BindingResult<()> {
        for (key, plan) in plans {
            let label = plan_label(&plan);
            let entries = layout_entries(&plan);
            let layout = self.backend.create_bind_group_layout(&label, &entries)?;

            // External textures have no handle until the first frame imports them.
            let group_entries = if plan.has_external_textures() {
                None
            } else {
                match group_entries(&plan, &self.handles) {
                    Ok(entries) => Some(entries),
                    Err(BindingError::ResourceNotReady(reason)) => {
                        debug!(target: "forge_bindings::shader_space", plan = %label, %reason, "bind group deferred");
                        None
                    }
                    Err(err) => return Err(err),
                }
            };

            let emitted = emit_bindings(&plan, self.registry.uniforms());
            check_consistency(&plan, &emitted, &entries, group_entries.as_deref())?;

            let group = match &group_entries {
                Some(entries) => Some(self.backend.create_bind_group(&label, layout, entries)?),
                None => None,
            };
            self.namespaces.insert(
                key,
                StageBindings {
                    plan,
                    layout,
                    group,
                    stale: false,
                },
            );
        }
        Ok(())
    }

    fn namespace_layout(&self, key: Namespace) -> BindingResult<GpuLayout> {
        self.namespaces
            .get(&key)
            .map(|ns| ns.layout)
            .ok_or_else(|| BindingError::PlanInconsistency(format!("no {} plan (internal: {})", key.0, key.1)))
    }

    fn create_pipelines(&mut self, passes: &[RenderPassSpec]) -> BindingResult<()> {
        for (pass, bundle) in passes.iter().zip(self.bundles.clone()) {
            let compute = match (&pass.compute, &bundle.compute) {
                (Some(stage), Some(source)) => {
                    let layout = self.namespace_layout((ShaderStage::Compute, pass.internal))?;
                    Some(self.backend.create_compute_pipeline(&ComputePipelineDesc {
                        label: &pass.compute_label(),
                        source,
                        entry_point: &stage.entry_point,
                        layouts: &[layout],
                    })?)
                }
                _ => None,
            };
            let render = match (&pass.draw, &bundle.vertex, &bundle.fragment) {
                (Some(draw), Some(vertex_source), Some(fragment_source)) => {
                    let layouts = [
                        self.namespace_layout((ShaderStage::Vertex, pass.internal))?,
                        self.namespace_layout((ShaderStage::Fragment, pass.internal))?,
                    ];
                    Some(self.backend.create_render_pipeline(&RenderPipelineDesc {
                        label: &pass.draw_label(),
                        vertex_source,
                        vertex_entry: &draw.vertex_entry,
                        fragment_source,
                        fragment_entry: &draw.fragment_entry,
                        layouts: &layouts,
                        target_format: self.options.target_format,
                    })?)
                }
                _ => None,
            };
            debug!(
                target: "forge_bindings::shader_space",
                pass = %pass.name,
                compute = compute.is_some(),
                draw = render.is_some(),
                "created pipelines"
            );
            self.passes.push(PassPipelines {
                spec: pass.clone(),
                compute,
                render,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;

    fn options() -> ShaderSpaceBuildOptions {
        ShaderSpaceBuildOptions {
            width: 4,
            height: 2,
            validate_wgsl: false,
            ..Default::default()
        }
    }

    #[test]
    fn uniform_values_must_match_their_type() {
        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder
            .declare_uniform(UniformSpec::new("tint", [1.0_f32, 0.0]).typed("vec3f"))
            .unwrap();
        let err = builder.emit().unwrap_err();
        assert!(matches!(err, BindingError::Configuration(ref m) if m.contains("tint")), "{err}");
    }

    #[test]
    fn runtime_storage_sizes() {
        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder.declare_storage(StorageSpec::new("a", "array<f32>").length(10)).unwrap();
        builder
            .declare_storage(StorageSpec::new("b", "array<vec2f>").backing(vec![1.0_f32, 2.0, 3.0, 4.0]))
            .unwrap();
        builder.declare_storage(StorageSpec::new("c", "array<u32, 2>")).unwrap();
        let compiled = builder.compile().unwrap();
        assert_eq!(compiled.storage_sizes, vec![40, 16, 16]);

        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder.declare_storage(StorageSpec::new("open", "array<f32>")).unwrap();
        assert!(builder.compile().is_err());
    }

    #[test]
    fn plans_cover_exactly_the_stages_passes_use() {
        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder
            .add_pass(RenderPassSpec::new("sim").compute("@compute @workgroup_size(1) fn main() {}", "main", [1, 1, 1]))
            .unwrap();
        builder
            .add_pass(RenderPassSpec::new("post").draw("", "").internal())
            .unwrap();
        let compiled = builder.compile().unwrap();
        let keys: Vec<_> = compiled.plans.keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                (ShaderStage::Vertex, true),
                (ShaderStage::Fragment, true),
                (ShaderStage::Compute, false),
            ]
        );
        assert!(compiled.bundles[0].compute.as_deref().unwrap().contains("var<uniform> params: Params;"));
        // Built-ins are user-namespace uniforms, so the internal plans carry no Params.
        assert!(!compiled.bundles[1].fragment.as_deref().unwrap().contains("params"));
    }

    #[test]
    fn passes_are_closed_after_init() {
        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder.emit().unwrap();
        assert!(builder.add_pass(RenderPassSpec::new("late").draw("", "")).is_err());
        assert!(builder.declare_uniform(UniformSpec::new("late", 1.0)).is_err());
    }

    #[test]
    fn init_creates_screen_sized_objects() {
        let mut builder = ShaderSpaceBuilder::new(options()).unwrap();
        builder.declare_texture_2d(TextureSpec::swapchain("prev")).unwrap();
        builder
            .declare_texture_pair(TexturePairSpec::new("acc_out", "acc_in").sized(3, 3))
            .unwrap();
        builder
            .declare_texture_2d_array(TextureArraySpec::new(
                "tiles",
                vec![RgbaImage::new(2, 2), RgbaImage::new(5, 1)],
            ))
            .unwrap();
        builder.add_pass(RenderPassSpec::new("show").draw("", "")).unwrap();
        let space = builder.build(RecordingBackend::new()).unwrap();

        let backend = space.backend();
        let frame = backend.find_texture("frame").unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        let prev = backend.find_texture("prev").unwrap();
        assert_eq!((prev.width, prev.height, prev.format), (4, 2, wgpu::TextureFormat::Rgba8Unorm));
        let acc = backend.find_texture("acc_in").unwrap();
        assert_eq!((acc.width, acc.height), (3, 3));
        let tiles = backend.find_texture("tiles").unwrap();
        assert_eq!((tiles.width, tiles.height, tiles.layers), (2, 2, 2));
    }
}
