//! Append-only record of every declared resource.
//!
//! Each category lives in its own arena and hands out a stable typed id. The registry
//! only grows during init; `freeze` ends that phase. Afterwards only live values
//! (uniform values, mapped storage contents, texture images) change.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use crate::error::{BindingError, BindingResult};
use crate::renderer::layout::types::{WgslType, is_ident};
use crate::renderer::types::{
    EventId, ExternalTextureId, PairId, SamplerId, ShaderStage, StageMask, StorageId, StorageTextureId,
    TextureArrayId, TextureId, UniformId, UniformValue,
};

/// Name of the synthesized uniform struct instance.
pub const PARAMS_BINDING: &str = "params";
/// Name of the layered buffer binding.
pub const LAYERS_BINDING: &str = "layers";

// ── Shared registration fields ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceMeta {
    pub name: String,
    pub stage: StageMask,
    /// Framework-injected resources use a binding namespace disjoint from user resources.
    pub internal: bool,
}

pub trait Registration {
    fn meta(&self) -> &ResourceMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn stage(&self) -> StageMask {
        self.meta().stage
    }

    fn internal(&self) -> bool {
        self.meta().internal
    }
}

macro_rules! registration {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Registration for $ty {
                fn meta(&self) -> &ResourceMeta {
                    &self.meta
                }
            }
        )*
    };
}

/// Adds `stage` / `internal` builder methods to registration specs.
macro_rules! scoped_spec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                pub fn stage(mut self, stage: ShaderStage) -> Self {
                    self.stage = Some(stage);
                    self
                }

                pub fn internal(mut self) -> Self {
                    self.internal = true;
                    self
                }
            }
        )*
    };
}

// ── Registration specs ────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct UniformSpec {
    pub name: String,
    pub value: UniformValue,
    /// Defaults to `f32`.
    pub type_name: Option<String>,
    pub stage: StageMask,
    pub internal: bool,
}

impl UniformSpec {
    pub fn new(name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_name: None,
            stage: None,
            internal: false,
        }
    }

    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct StorageSpec {
    pub name: String,
    pub type_name: String,
    pub readable: bool,
    pub stage: StageMask,
    /// Host values written into the buffer at init and whenever they change.
    pub backing: Option<UniformValue>,
    /// Element count for runtime-sized types without a backing array.
    pub length: Option<u32>,
    pub internal: bool,
}

impl StorageSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            readable: false,
            stage: None,
            backing: None,
            length: None,
            internal: false,
        }
    }

    pub fn readable(mut self) -> Self {
        self.readable = true;
        self
    }

    pub fn backing(mut self, values: impl Into<UniformValue>) -> Self {
        self.backing = Some(values.into());
        self
    }

    pub fn length(mut self, elements: u32) -> Self {
        self.length = Some(elements);
        self
    }
}

#[derive(Clone, Debug)]
pub struct SamplerSpec {
    pub name: String,
    pub desc: wgpu::SamplerDescriptor<'static>,
    pub stage: StageMask,
    pub internal: bool,
}

impl SamplerSpec {
    pub fn new(name: impl Into<String>, desc: wgpu::SamplerDescriptor<'static>) -> Self {
        Self {
            name: name.into(),
            desc,
            stage: None,
            internal: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageTextureSpec {
    pub name: String,
    pub format: wgpu::TextureFormat,
    /// Defaults to the screen size.
    pub size: Option<(u32, u32)>,
    pub stage: StageMask,
    pub internal: bool,
}

impl StorageTextureSpec {
    pub fn new(name: impl Into<String>, format: wgpu::TextureFormat) -> Self {
        Self {
            name: name.into(),
            format,
            size: None,
            stage: None,
            internal: false,
        }
    }

    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }
}

#[derive(Clone, Debug)]
pub enum TextureSource {
    /// Receives a copy of the frame target after every frame.
    Swapchain,
    /// Host image; `None` until the image has been provided.
    Image(Option<Arc<RgbaImage>>),
}

#[derive(Clone, Debug)]
pub struct TextureSpec {
    pub name: String,
    pub source: TextureSource,
    pub stage: StageMask,
    pub internal: bool,
}

impl TextureSpec {
    pub fn swapchain(name: impl Into<String>) -> Self {
        Self::with_source(name, TextureSource::Swapchain)
    }

    /// Image texture whose pixels arrive later through `provide_image`.
    pub fn pending_image(name: impl Into<String>) -> Self {
        Self::with_source(name, TextureSource::Image(None))
    }

    pub fn image(name: impl Into<String>, image: RgbaImage) -> Self {
        Self::with_source(name, TextureSource::Image(Some(Arc::new(image))))
    }

    fn with_source(name: impl Into<String>, source: TextureSource) -> Self {
        Self {
            name: name.into(),
            source,
            stage: None,
            internal: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextureArraySpec {
    pub name: String,
    pub images: Vec<Arc<RgbaImage>>,
    pub stage: StageMask,
    pub internal: bool,
}

impl TextureArraySpec {
    pub fn new(name: impl Into<String>, images: Vec<RgbaImage>) -> Self {
        Self {
            name: name.into(),
            images: images.into_iter().map(Arc::new).collect(),
            stage: None,
            internal: false,
        }
    }
}

/// Live frame producer behind an external texture (video, camera, ...).
pub trait FrameSource {
    fn acquire_frame(&mut self) -> BindingResult<RgbaImage>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> RgbaImage,
{
    fn acquire_frame(&mut self) -> BindingResult<RgbaImage> {
        Ok(self())
    }
}

pub struct ExternalTextureSpec {
    pub name: String,
    pub source: Box<dyn FrameSource>,
    pub stage: StageMask,
    pub internal: bool,
}

impl ExternalTextureSpec {
    pub fn new(name: impl Into<String>, source: impl FrameSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
            stage: None,
            internal: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LayeredBufferSpec {
    pub layer_count: u32,
    pub stage: StageMask,
    pub internal: bool,
}

impl LayeredBufferSpec {
    pub fn new(layer_count: u32) -> Self {
        Self {
            layer_count,
            stage: None,
            internal: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TexturePairSpec {
    pub write_name: String,
    pub read_name: String,
    /// Defaults to the screen size.
    pub size: Option<(u32, u32)>,
    pub stage: StageMask,
    pub internal: bool,
}

impl TexturePairSpec {
    pub fn new(write_name: impl Into<String>, read_name: impl Into<String>) -> Self {
        Self {
            write_name: write_name.into(),
            read_name: read_name.into(),
            size: None,
            stage: None,
            internal: false,
        }
    }

    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }
}

pub type EventCallback = Box<dyn FnMut(&[u32])>;

pub struct EventSpec {
    pub name: String,
    pub payload_words: u32,
    pub callback: EventCallback,
}

impl EventSpec {
    pub fn new(name: impl Into<String>, payload_words: u32, callback: impl FnMut(&[u32]) + 'static) -> Self {
        Self {
            name: name.into(),
            payload_words,
            callback: Box::new(callback),
        }
    }
}

scoped_spec!(
    UniformSpec,
    StorageSpec,
    SamplerSpec,
    StorageTextureSpec,
    TextureSpec,
    TextureArraySpec,
    ExternalTextureSpec,
    LayeredBufferSpec,
    TexturePairSpec,
);

// ── Registered resources ──────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct UniformVar {
    pub meta: ResourceMeta,
    pub value: UniformValue,
    pub type_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageOrigin {
    User,
    Event(EventId),
}

#[derive(Clone, Debug)]
pub struct StorageBinding {
    pub meta: ResourceMeta,
    pub type_name: String,
    pub readable: bool,
    /// Flattened backing values; `Some` for mapped storages.
    pub values: Option<Vec<f64>>,
    pub length: Option<u32>,
    pub origin: StorageOrigin,
    pub(crate) dirty: bool,
}

impl StorageBinding {
    pub fn mapped(&self) -> bool {
        self.values.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct SamplerBinding {
    pub meta: ResourceMeta,
    pub desc: wgpu::SamplerDescriptor<'static>,
}

#[derive(Clone, Debug)]
pub struct StorageTextureBinding {
    pub meta: ResourceMeta,
    pub format: wgpu::TextureFormat,
    pub size: Option<(u32, u32)>,
}

#[derive(Clone, Debug)]
pub struct Texture2DBinding {
    pub meta: ResourceMeta,
    pub source: TextureSource,
    pub(crate) image_changed: bool,
}

impl Texture2DBinding {
    pub fn copy_from_swapchain(&self) -> bool {
        matches!(self.source, TextureSource::Swapchain)
    }
}

#[derive(Clone, Debug)]
pub struct Texture2DArrayBinding {
    pub meta: ResourceMeta,
    pub images: Vec<Arc<RgbaImage>>,
}

pub struct ExternalTextureBinding {
    pub meta: ResourceMeta,
    pub(crate) source: Box<dyn FrameSource>,
}

impl fmt::Debug for ExternalTextureBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalTextureBinding")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct LayeredBufferBinding {
    pub meta: ResourceMeta,
    pub layer_count: u32,
    /// vec4f cells per layer, fixed at declaration.
    pub layer_len: u32,
}

impl LayeredBufferBinding {
    pub fn wgsl_type(&self) -> String {
        format!("array<array<vec4f, {}>, {}>", self.layer_len, self.layer_count)
    }

    pub fn byte_size(&self) -> u64 {
        self.layer_len as u64 * self.layer_count as u64 * 16
    }
}

#[derive(Clone, Debug)]
pub struct BindingTexturePair {
    /// `meta.name` is the write-side name.
    pub meta: ResourceMeta,
    pub write_name: String,
    pub read_name: String,
    pub size: Option<(u32, u32)>,
}

pub struct EventChannel {
    pub name: String,
    pub payload_words: u32,
    pub storage: StorageId,
    pub(crate) callback: EventCallback,
}

impl EventChannel {
    /// `array<u32, K + 1>`: fired flag followed by the payload words.
    pub fn wgsl_type(payload_words: u32) -> String {
        format!("array<u32, {}>", payload_words + 1)
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.name)
            .field("payload_words", &self.payload_words)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

registration!(
    UniformVar,
    StorageBinding,
    SamplerBinding,
    StorageTextureBinding,
    Texture2DBinding,
    Texture2DArrayBinding,
    ExternalTextureBinding,
    LayeredBufferBinding,
    BindingTexturePair,
);

// ── Registry ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    uniforms: Vec<UniformVar>,
    storages: Vec<StorageBinding>,
    layered: Option<LayeredBufferBinding>,
    samplers: Vec<SamplerBinding>,
    storage_textures: Vec<StorageTextureBinding>,
    textures: Vec<Texture2DBinding>,
    texture_arrays: Vec<Texture2DArrayBinding>,
    external_textures: Vec<ExternalTextureBinding>,
    pairs: Vec<BindingTexturePair>,
    events: Vec<EventChannel>,
    /// Identifiers emitted at module scope; uniforms live inside `Params` instead.
    binding_names: HashSet<String>,
    frozen: bool,
}

fn meta(name: String, stage: StageMask, internal: bool) -> ResourceMeta {
    ResourceMeta { name, stage, internal }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// End the init phase. Later declarations fail with a configuration error.
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(
                target: "forge_bindings::registry",
                uniforms = self.uniforms.len(),
                storages = self.storages.len(),
                samplers = self.samplers.len(),
                textures = self.textures.len(),
                events = self.events.len(),
                "registry frozen"
            );
        }
        self.frozen = true;
    }

    fn ensure_open(&self, what: &str) -> BindingResult<()> {
        if self.frozen {
            return Err(BindingError::config(format!(
                "cannot declare {what} after init: the registry is frozen"
            )));
        }
        Ok(())
    }

    fn claim_binding_name(&mut self, category: &str, name: &str) -> BindingResult<()> {
        if !is_ident(name) {
            return Err(BindingError::config(format!("{category} name `{name}` is not a WGSL identifier")));
        }
        if name == PARAMS_BINDING || name == LAYERS_BINDING {
            return Err(BindingError::config(format!("{category} name `{name}` is reserved")));
        }
        if !self.binding_names.insert(name.to_string()) {
            return Err(BindingError::config(format!("duplicate {category} name `{name}`")));
        }
        Ok(())
    }

    pub fn declare_uniform(&mut self, spec: UniformSpec) -> BindingResult<UniformId> {
        self.ensure_open("uniforms")?;
        if !is_ident(&spec.name) {
            return Err(BindingError::config(format!("uniform name `{}` is not a WGSL identifier", spec.name)));
        }
        if self.uniforms.iter().any(|u| u.meta.name == spec.name) {
            return Err(BindingError::config(format!("duplicate uniform name `{}`", spec.name)));
        }
        let type_name = spec.type_name.unwrap_or_else(|| "f32".to_string());
        WgslType::parse(&type_name)
            .map_err(|e| BindingError::config(format!("uniform `{}`: {e}", spec.name)))?;
        let id = UniformId(self.uniforms.len() as u32);
        self.uniforms.push(UniformVar {
            meta: meta(spec.name, spec.stage, spec.internal),
            value: spec.value,
            type_name,
        });
        Ok(id)
    }

    pub fn declare_storage(&mut self, spec: StorageSpec) -> BindingResult<StorageId> {
        self.ensure_open("storage buffers")?;
        self.claim_binding_name("storage", &spec.name)?;
        Ok(self.push_storage(spec, StorageOrigin::User))
    }

    fn push_storage(&mut self, spec: StorageSpec, origin: StorageOrigin) -> StorageId {
        let id = StorageId(self.storages.len() as u32);
        let values = spec.backing.as_ref().map(UniformValue::leaves);
        self.storages.push(StorageBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            type_name: spec.type_name,
            readable: spec.readable,
            dirty: values.is_some(),
            values,
            length: spec.length,
            origin,
        });
        id
    }

    pub fn declare_sampler(&mut self, spec: SamplerSpec) -> BindingResult<SamplerId> {
        self.ensure_open("samplers")?;
        self.claim_binding_name("sampler", &spec.name)?;
        let id = SamplerId(self.samplers.len() as u32);
        self.samplers.push(SamplerBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            desc: spec.desc,
        });
        Ok(id)
    }

    pub fn declare_storage_texture(&mut self, spec: StorageTextureSpec) -> BindingResult<StorageTextureId> {
        self.ensure_open("storage textures")?;
        self.claim_binding_name("storage texture", &spec.name)?;
        if crate::renderer::wgsl::storage_texel_format(spec.format).is_none() {
            return Err(BindingError::config(format!(
                "storage texture `{}`: {:?} is not a storage texel format",
                spec.name, spec.format
            )));
        }
        check_size(&spec.name, spec.size)?;
        let id = StorageTextureId(self.storage_textures.len() as u32);
        self.storage_textures.push(StorageTextureBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            format: spec.format,
            size: spec.size,
        });
        Ok(id)
    }

    pub fn declare_texture_2d(&mut self, spec: TextureSpec) -> BindingResult<TextureId> {
        self.ensure_open("textures")?;
        self.claim_binding_name("texture", &spec.name)?;
        let id = TextureId(self.textures.len() as u32);
        let image_changed = matches!(spec.source, TextureSource::Image(Some(_)));
        self.textures.push(Texture2DBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            source: spec.source,
            image_changed,
        });
        Ok(id)
    }

    pub fn declare_texture_2d_array(&mut self, spec: TextureArraySpec) -> BindingResult<TextureArrayId> {
        self.ensure_open("texture arrays")?;
        self.claim_binding_name("texture array", &spec.name)?;
        if spec.images.is_empty() {
            return Err(BindingError::config(format!("texture array `{}` has no images", spec.name)));
        }
        let id = TextureArrayId(self.texture_arrays.len() as u32);
        self.texture_arrays.push(Texture2DArrayBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            images: spec.images,
        });
        Ok(id)
    }

    pub fn declare_external_texture(&mut self, spec: ExternalTextureSpec) -> BindingResult<ExternalTextureId> {
        self.ensure_open("external textures")?;
        self.claim_binding_name("external texture", &spec.name)?;
        let id = ExternalTextureId(self.external_textures.len() as u32);
        self.external_textures.push(ExternalTextureBinding {
            meta: meta(spec.name, spec.stage, spec.internal),
            source: spec.source,
        });
        Ok(id)
    }

    /// `layer_len` is the number of vec4f cells per layer (one per screen pixel).
    pub fn declare_layered_buffer(&mut self, spec: LayeredBufferSpec, layer_len: u32) -> BindingResult<()> {
        self.ensure_open("the layered buffer")?;
        if self.layered.is_some() {
            return Err(BindingError::config("the layered buffer is already declared"));
        }
        if spec.layer_count == 0 || layer_len == 0 {
            return Err(BindingError::config("layered buffer needs at least one non-empty layer"));
        }
        self.layered = Some(LayeredBufferBinding {
            meta: meta(LAYERS_BINDING.to_string(), spec.stage, spec.internal),
            layer_count: spec.layer_count,
            layer_len,
        });
        Ok(())
    }

    pub fn declare_texture_pair(&mut self, spec: TexturePairSpec) -> BindingResult<PairId> {
        self.ensure_open("texture pairs")?;
        self.claim_binding_name("texture pair", &spec.write_name)?;
        self.claim_binding_name("texture pair", &spec.read_name)?;
        check_size(&spec.write_name, spec.size)?;
        let id = PairId(self.pairs.len() as u32);
        self.pairs.push(BindingTexturePair {
            meta: meta(spec.write_name.clone(), spec.stage, spec.internal),
            write_name: spec.write_name,
            read_name: spec.read_name,
            size: spec.size,
        });
        Ok(id)
    }

    /// Reserve a readable `array<u32, K + 1>` storage buffer for the event.
    pub fn register_event(&mut self, spec: EventSpec) -> BindingResult<EventId> {
        self.ensure_open("events")?;
        self.claim_binding_name("event", &spec.name)?;
        let id = EventId(self.events.len() as u32);
        let storage = self.push_storage(
            StorageSpec::new(spec.name.clone(), EventChannel::wgsl_type(spec.payload_words)).readable(),
            StorageOrigin::Event(id),
        );
        self.events.push(EventChannel {
            name: spec.name,
            payload_words: spec.payload_words,
            storage,
            callback: spec.callback,
        });
        Ok(id)
    }

    // ── Live values ──

    pub fn set_uniform_value(&mut self, id: UniformId, value: UniformValue) {
        self.uniforms[id.index()].value = value;
    }

    pub fn set_storage_values(&mut self, id: StorageId, values: Vec<f64>) -> BindingResult<()> {
        let storage = &mut self.storages[id.index()];
        if !storage.mapped() {
            return Err(BindingError::config(format!(
                "storage `{}` has no backing array",
                storage.meta.name
            )));
        }
        if storage.values.as_ref() != Some(&values) {
            storage.values = Some(values);
            storage.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn take_dirty_storages(&mut self) -> Vec<StorageId> {
        let mut out = Vec::new();
        for (i, storage) in self.storages.iter_mut().enumerate() {
            if std::mem::take(&mut storage.dirty) {
                out.push(StorageId(i as u32));
            }
        }
        out
    }

    /// Swap a texture's image. Only image textures accept this.
    pub fn set_texture_image(&mut self, id: TextureId, image: RgbaImage) -> BindingResult<()> {
        let texture = &mut self.textures[id.index()];
        match texture.source {
            TextureSource::Image(ref mut slot) => {
                *slot = Some(Arc::new(image));
                texture.image_changed = true;
                Ok(())
            }
            TextureSource::Swapchain => Err(BindingError::config(format!(
                "texture `{}` copies the swapchain and cannot take an image",
                texture.meta.name
            ))),
        }
    }

    pub(crate) fn take_changed_textures(&mut self) -> Vec<TextureId> {
        let mut out = Vec::new();
        for (i, texture) in self.textures.iter_mut().enumerate() {
            if std::mem::take(&mut texture.image_changed) {
                out.push(TextureId(i as u32));
            }
        }
        out
    }

    // ── Lookup ──

    pub fn uniforms(&self) -> &[UniformVar] {
        &self.uniforms
    }

    pub fn storages(&self) -> &[StorageBinding] {
        &self.storages
    }

    pub fn layered_buffer(&self) -> Option<&LayeredBufferBinding> {
        self.layered.as_ref()
    }

    pub fn samplers(&self) -> &[SamplerBinding] {
        &self.samplers
    }

    pub fn storage_textures(&self) -> &[StorageTextureBinding] {
        &self.storage_textures
    }

    pub fn textures(&self) -> &[Texture2DBinding] {
        &self.textures
    }

    pub fn texture_arrays(&self) -> &[Texture2DArrayBinding] {
        &self.texture_arrays
    }

    pub fn external_textures(&self) -> &[ExternalTextureBinding] {
        &self.external_textures
    }

    pub(crate) fn external_textures_mut(&mut self) -> &mut [ExternalTextureBinding] {
        &mut self.external_textures
    }

    pub fn pairs(&self) -> &[BindingTexturePair] {
        &self.pairs
    }

    pub fn events(&self) -> &[EventChannel] {
        &self.events
    }

    pub(crate) fn event_mut(&mut self, id: EventId) -> &mut EventChannel {
        &mut self.events[id.index()]
    }

    pub fn uniform(&self, id: UniformId) -> &UniformVar {
        &self.uniforms[id.index()]
    }

    pub fn storage(&self, id: StorageId) -> &StorageBinding {
        &self.storages[id.index()]
    }

    pub fn texture(&self, id: TextureId) -> &Texture2DBinding {
        &self.textures[id.index()]
    }

    pub fn find_uniform(&self, name: &str) -> Option<UniformId> {
        self.uniforms
            .iter()
            .position(|u| u.meta.name == name)
            .map(|i| UniformId(i as u32))
    }

    pub fn find_storage(&self, name: &str) -> Option<StorageId> {
        self.storages
            .iter()
            .position(|s| s.meta.name == name)
            .map(|i| StorageId(i as u32))
    }

    pub fn find_texture(&self, name: &str) -> Option<TextureId> {
        self.textures
            .iter()
            .position(|t| t.meta.name == name)
            .map(|i| TextureId(i as u32))
    }
}

fn check_size(name: &str, size: Option<(u32, u32)>) -> BindingResult<()> {
    match size {
        Some((0, _)) | Some((_, 0)) => Err(BindingError::config(format!("`{name}` has a zero dimension"))),
        _ => Ok(()),
    }
}
