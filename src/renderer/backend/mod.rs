//! GPU backend collaborator surface.
//!
//! The binding compiler and frame loop only ever talk to a `GpuBackend`. Objects are
//! referenced through small copyable ids so that the wgpu implementation and the
//! in-memory recording implementation share every caller.

pub mod recording;
pub mod wgpu_backend;

use image::RgbaImage;

use crate::error::BindingResult;

pub use recording::{KernelContext, RecordingBackend};
pub use wgpu_backend::WgpuBackend;

macro_rules! gpu_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u32);

            impl $name {
                pub(crate) fn slot(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

gpu_id!(
    GpuBuffer,
    GpuTexture,
    GpuSampler,
    GpuExternalTexture,
    GpuLayout,
    GpuBindGroup,
    GpuPipeline,
);

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    /// View as `texture_2d_array` even with a single layer.
    pub array: bool,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureDesc {
    pub fn flat(label: impl Into<String>, (width, height): (u32, u32), format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            array: false,
            format,
            usage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupResource {
    Buffer(GpuBuffer),
    Sampler(GpuSampler),
    Texture(GpuTexture),
    ExternalTexture(GpuExternalTexture),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    pub binding: u32,
    pub resource: GroupResource,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub layouts: &'a [GpuLayout],
}

/// Vertex-index driven pipeline: no vertex buffers, one color target.
#[derive(Clone, Debug)]
pub struct RenderPipelineDesc<'a> {
    pub label: &'a str,
    pub vertex_source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_source: &'a str,
    pub fragment_entry: &'a str,
    pub layouts: &'a [GpuLayout],
    pub target_format: wgpu::TextureFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    Dispatch {
        label: String,
        pipeline: GpuPipeline,
        bind_groups: Vec<GpuBindGroup>,
        workgroups: [u32; 3],
    },
    Draw {
        label: String,
        pipeline: GpuPipeline,
        bind_groups: Vec<GpuBindGroup>,
        target: GpuTexture,
        clear: Option<wgpu::Color>,
        vertices: u32,
        instances: u32,
    },
    CopyBuffer {
        src: GpuBuffer,
        dst: GpuBuffer,
        size: u64,
    },
    /// Whole first layer; both textures must share size and format.
    CopyTexture {
        src: GpuTexture,
        dst: GpuTexture,
    },
}

/// Commands recorded into a single submission, executed in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandList {
    pub label: String,
    pub commands: Vec<GpuCommand>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }
}

#[allow(async_fn_in_trait)]
pub trait GpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BindingResult<GpuBuffer>;
    fn write_buffer(&mut self, buffer: GpuBuffer, offset: u64, bytes: &[u8]) -> BindingResult<()>;

    fn create_texture(&mut self, desc: &TextureDesc) -> BindingResult<GpuTexture>;
    /// Upload `image` into `layer`; the image must match the texture size.
    fn write_texture(&mut self, texture: GpuTexture, layer: u32, image: &RgbaImage) -> BindingResult<()>;
    fn release_texture(&mut self, texture: GpuTexture);

    fn create_sampler(&mut self, desc: &wgpu::SamplerDescriptor<'static>) -> BindingResult<GpuSampler>;

    /// Import one frame of an external source. Valid for a single submission.
    fn import_external_texture(&mut self, label: &str, image: &RgbaImage) -> BindingResult<GpuExternalTexture>;
    fn release_external_texture(&mut self, texture: GpuExternalTexture);

    fn create_bind_group_layout(&mut self, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindingResult<GpuLayout>;
    fn create_bind_group(&mut self, label: &str, layout: GpuLayout, entries: &[GroupEntry]) -> BindingResult<GpuBindGroup>;
    fn release_bind_group(&mut self, group: GpuBindGroup);

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> BindingResult<GpuPipeline>;
    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> BindingResult<GpuPipeline>;

    fn submit(&mut self, commands: CommandList) -> BindingResult<()>;

    /// Map `size` bytes of a `MAP_READ` buffer and copy them out.
    async fn map_for_read(&mut self, buffer: GpuBuffer, size: u64) -> BindingResult<Vec<u8>>;

    /// Reason text once the device has been lost.
    fn device_lost(&self) -> Option<String>;
}

/// Arena slot lookup shared by the backend implementations.
pub(crate) fn slot<'a, T>(items: &'a [Option<T>], index: usize, what: &str) -> BindingResult<&'a T> {
    items
        .get(index)
        .and_then(Option::as_ref)
        .ok_or_else(|| crate::error::BindingError::Backend(format!("unknown or released {what} #{index}")))
}

pub(crate) fn slot_mut<'a, T>(items: &'a mut [Option<T>], index: usize, what: &str) -> BindingResult<&'a mut T> {
    items
        .get_mut(index)
        .and_then(Option::as_mut)
        .ok_or_else(|| crate::error::BindingError::Backend(format!("unknown or released {what} #{index}")))
}

pub(crate) fn release<T>(items: &mut [Option<T>], index: usize) {
    if let Some(item) = items.get_mut(index) {
        *item = None;
    }
}
