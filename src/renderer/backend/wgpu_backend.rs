//! Headless wgpu implementation of `GpuBackend`.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use futures_intrusive::channel::shared::oneshot_channel;
use image::RgbaImage;
use tracing::{error, info, warn};

use crate::error::{BindingError, BindingResult};

use super::{
    BufferDesc, CommandList, ComputePipelineDesc, GpuBackend, GpuBindGroup, GpuBuffer, GpuCommand,
    GpuExternalTexture, GpuLayout, GpuPipeline, GpuSampler, GpuTexture, GroupEntry, GroupResource,
    RenderPipelineDesc, TextureDesc, release, slot,
};

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: wgpu::Extent3d,
}

struct ExternalEntry {
    external: wgpu::ExternalTexture,
    // Plane 0; must outlive the external texture.
    _plane: wgpu::Texture,
}

enum PipelineEntry {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Vec<Option<wgpu::Buffer>>,
    textures: Vec<Option<TextureEntry>>,
    samplers: Vec<Option<wgpu::Sampler>>,
    external: Vec<Option<ExternalEntry>>,
    layouts: Vec<Option<wgpu::BindGroupLayout>>,
    bind_groups: Vec<Option<wgpu::BindGroup>>,
    pipelines: Vec<Option<PipelineEntry>>,
    lost: Arc<Mutex<Option<String>>>,
}

const IDENTITY_4X4: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];
const IDENTITY_3X3: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
const IDENTITY_3X2: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

impl WgpuBackend {
    /// Blocking init on the calling thread.
    pub fn init() -> BindingResult<Self> {
        pollster::block_on(Self::init_async())
    }

    /// Init that reports failure as `None` so callers can fall back.
    pub fn try_init() -> Option<Self> {
        match Self::init() {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(target: "forge_bindings::wgpu", "GPU backend unavailable: {e}");
                None
            }
        }
    }

    pub async fn init_async() -> BindingResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| BindingError::BackendUnavailable(e.to_string()))?;

        let info = adapter.get_info();
        info!(
            target: "forge_bindings::wgpu",
            adapter = %info.name,
            backend = ?info.backend,
            "selected GPU adapter"
        );

        // External textures are only available on some platforms; request them when offered.
        let optional_features = adapter.features() & wgpu::Features::EXTERNAL_TEXTURE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("forge-bindings"),
                required_features: optional_features,
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| BindingError::BackendUnavailable(e.to_string()))?;

        let lost = Arc::new(Mutex::new(None));
        let lost_flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!(target: "forge_bindings::wgpu", ?reason, %message, "device lost");
            if let Ok(mut slot) = lost_flag.lock() {
                *slot = Some(format!("{reason:?}: {message}"));
            }
        });
        device.on_uncaptured_error(Arc::new(|err: wgpu::Error| {
            error!(target: "forge_bindings::wgpu", "uncaptured wgpu error: {err}");
        }));

        Ok(Self {
            device,
            queue,
            buffers: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            external: Vec::new(),
            layouts: Vec::new(),
            bind_groups: Vec::new(),
            pipelines: Vec::new(),
            lost,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Run `f` inside a validation error scope so failures come back as errors.
    fn scoped<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> BindingResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(BindingError::Backend(format!("{what}: {err}"))),
            None => Ok(out),
        }
    }

    fn check_alive(&self) -> BindingResult<()> {
        match self.device_lost() {
            Some(reason) => Err(BindingError::DeviceLost(reason)),
            None => Ok(()),
        }
    }

    fn shader_module(&self, label: &str, source: &str) -> BindingResult<wgpu::ShaderModule> {
        self.scoped(label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        })
    }

    fn pipeline_layout(&self, label: &str, layouts: &[GpuLayout]) -> BindingResult<wgpu::PipelineLayout> {
        let mut refs = Vec::with_capacity(layouts.len());
        for layout in layouts {
            refs.push(slot(&self.layouts, layout.slot(), "layout")?);
        }
        self.scoped(label, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &refs,
                push_constant_ranges: &[],
            })
        })
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, command: &GpuCommand) -> BindingResult<()> {
        match command {
            GpuCommand::Dispatch {
                label,
                pipeline,
                bind_groups,
                workgroups,
            } => {
                let Some(PipelineEntry::Compute(pipeline)) = self.pipelines.get(pipeline.slot()).and_then(Option::as_ref)
                else {
                    return Err(BindingError::Backend(format!("`{label}` has no compute pipeline")));
                };
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                for (index, group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, slot(&self.bind_groups, group.slot(), "bind group")?, &[]);
                }
                let [x, y, z] = *workgroups;
                pass.dispatch_workgroups(x, y, z);
            }
            GpuCommand::Draw {
                label,
                pipeline,
                bind_groups,
                target,
                clear,
                vertices,
                instances,
            } => {
                let Some(PipelineEntry::Render(pipeline)) = self.pipelines.get(pipeline.slot()).and_then(Option::as_ref)
                else {
                    return Err(BindingError::Backend(format!("`{label}` has no render pipeline")));
                };
                let target = slot(&self.textures, target.slot(), "texture")?;
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(label.as_str()),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(pipeline);
                for (index, group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, slot(&self.bind_groups, group.slot(), "bind group")?, &[]);
                }
                pass.draw(0..*vertices, 0..*instances);
            }
            GpuCommand::CopyBuffer { src, dst, size } => {
                let src = slot(&self.buffers, src.slot(), "buffer")?;
                let dst = slot(&self.buffers, dst.slot(), "buffer")?;
                encoder.copy_buffer_to_buffer(src, 0, dst, 0, *size);
            }
            GpuCommand::CopyTexture { src, dst } => {
                let src = slot(&self.textures, src.slot(), "texture")?;
                let dst = slot(&self.textures, dst.slot(), "texture")?;
                encoder.copy_texture_to_texture(
                    src.texture.as_image_copy(),
                    dst.texture.as_image_copy(),
                    wgpu::Extent3d {
                        depth_or_array_layers: 1,
                        ..src.size
                    },
                );
            }
        }
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BindingResult<GpuBuffer> {
        let buffer = self.scoped(&desc.label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label.as_str()),
                size: desc.size,
                usage: desc.usage,
                mapped_at_creation: false,
            })
        })?;
        self.buffers.push(Some(buffer));
        Ok(GpuBuffer(self.buffers.len() as u32 - 1))
    }

    fn write_buffer(&mut self, buffer: GpuBuffer, offset: u64, bytes: &[u8]) -> BindingResult<()> {
        let buf = slot(&self.buffers, buffer.slot(), "buffer")?;
        if offset + bytes.len() as u64 > buf.size() {
            return Err(BindingError::Backend(format!(
                "write of {} bytes at {offset} overflows a {}-byte buffer",
                bytes.len(),
                buf.size()
            )));
        }
        self.queue.write_buffer(buf, offset, bytes);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> BindingResult<GpuTexture> {
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers.max(1),
        };
        let entry = self.scoped(&desc.label, |device| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label.as_str()),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: desc.format,
                usage: desc.usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(if desc.array {
                    wgpu::TextureViewDimension::D2Array
                } else {
                    wgpu::TextureViewDimension::D2
                }),
                ..Default::default()
            });
            TextureEntry { texture, view, size }
        })?;
        self.textures.push(Some(entry));
        Ok(GpuTexture(self.textures.len() as u32 - 1))
    }

    fn write_texture(&mut self, texture: GpuTexture, layer: u32, image: &RgbaImage) -> BindingResult<()> {
        let entry = slot(&self.textures, texture.slot(), "texture")?;
        let (width, height) = image.dimensions();
        if (width, height) != (entry.size.width, entry.size.height) || layer >= entry.size.depth_or_array_layers {
            return Err(BindingError::Backend(format!(
                "image {width}x{height} does not fit layer {layer} of a {}x{}x{} texture",
                entry.size.width, entry.size.height, entry.size.depth_or_array_layers
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn release_texture(&mut self, texture: GpuTexture) {
        release(&mut self.textures, texture.slot());
    }

    fn create_sampler(&mut self, desc: &wgpu::SamplerDescriptor<'static>) -> BindingResult<GpuSampler> {
        let sampler = self.scoped("sampler", |device| device.create_sampler(desc))?;
        self.samplers.push(Some(sampler));
        Ok(GpuSampler(self.samplers.len() as u32 - 1))
    }

    fn import_external_texture(&mut self, label: &str, image: &RgbaImage) -> BindingResult<GpuExternalTexture> {
        self.check_alive()?;
        if !self.device.features().contains(wgpu::Features::EXTERNAL_TEXTURE) {
            return Err(BindingError::BackendUnavailable(
                "external textures need Features::EXTERNAL_TEXTURE".to_string(),
            ));
        }
        let (width, height) = image.dimensions();
        let plane = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            plane.as_image_copy(),
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            plane.size(),
        );
        let view = plane.create_view(&wgpu::TextureViewDescriptor::default());
        let external = self.scoped(label, |device| {
            device.create_external_texture(
                &wgpu::ExternalTextureDescriptor {
                    label: Some(label),
                    width,
                    height,
                    format: wgpu::ExternalTextureFormat::Rgba,
                    yuv_conversion_matrix: IDENTITY_4X4,
                    gamut_conversion_matrix: IDENTITY_3X3,
                    src_transfer_function: Default::default(),
                    dst_transfer_function: Default::default(),
                    sample_transform: IDENTITY_3X2,
                    load_transform: IDENTITY_3X2,
                },
                &[&view],
            )
        })?;
        self.external.push(Some(ExternalEntry {
            external,
            _plane: plane,
        }));
        Ok(GpuExternalTexture(self.external.len() as u32 - 1))
    }

    fn release_external_texture(&mut self, texture: GpuExternalTexture) {
        release(&mut self.external, texture.slot());
    }

    fn create_bind_group_layout(&mut self, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindingResult<GpuLayout> {
        let needs_external = entries
            .iter()
            .any(|e| matches!(e.ty, wgpu::BindingType::ExternalTexture));
        if needs_external && !self.device.features().contains(wgpu::Features::EXTERNAL_TEXTURE) {
            return Err(BindingError::BackendUnavailable(format!(
                "layout `{label}` uses texture_external but the device lacks Features::EXTERNAL_TEXTURE"
            )));
        }
        let layout = self.scoped(label, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        })?;
        self.layouts.push(Some(layout));
        Ok(GpuLayout(self.layouts.len() as u32 - 1))
    }

    fn create_bind_group(&mut self, label: &str, layout: GpuLayout, entries: &[GroupEntry]) -> BindingResult<GpuBindGroup> {
        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            let resource = match entry.resource {
                GroupResource::Buffer(b) => slot(&self.buffers, b.slot(), "buffer")?.as_entire_binding(),
                GroupResource::Sampler(s) => wgpu::BindingResource::Sampler(slot(&self.samplers, s.slot(), "sampler")?),
                GroupResource::Texture(t) => {
                    wgpu::BindingResource::TextureView(&slot(&self.textures, t.slot(), "texture")?.view)
                }
                GroupResource::ExternalTexture(t) => wgpu::BindingResource::ExternalTexture(
                    &slot(&self.external, t.slot(), "external texture")?.external,
                ),
            };
            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource,
            });
        }
        let layout = slot(&self.layouts, layout.slot(), "layout")?;
        let group = self.scoped(label, |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &wgpu_entries,
            })
        })?;
        self.bind_groups.push(Some(group));
        Ok(GpuBindGroup(self.bind_groups.len() as u32 - 1))
    }

    fn release_bind_group(&mut self, group: GpuBindGroup) {
        release(&mut self.bind_groups, group.slot());
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> BindingResult<GpuPipeline> {
        let module = self.shader_module(desc.label, desc.source)?;
        let layout = self.pipeline_layout(desc.label, desc.layouts)?;
        let pipeline = self.scoped(desc.label, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                module: &module,
                entry_point: Some(desc.entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;
        self.pipelines.push(Some(PipelineEntry::Compute(pipeline)));
        Ok(GpuPipeline(self.pipelines.len() as u32 - 1))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> BindingResult<GpuPipeline> {
        let vertex = self.shader_module(&format!("{}.vertex", desc.label), desc.vertex_source)?;
        let fragment = self.shader_module(&format!("{}.fragment", desc.label), desc.fragment_source)?;
        let layout = self.pipeline_layout(desc.label, desc.layouts)?;
        let pipeline = self.scoped(desc.label, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vertex,
                    entry_point: Some(desc.vertex_entry),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment,
                    entry_point: Some(desc.fragment_entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        })?;
        self.pipelines.push(Some(PipelineEntry::Render(pipeline)));
        Ok(GpuPipeline(self.pipelines.len() as u32 - 1))
    }

    fn submit(&mut self, commands: CommandList) -> BindingResult<()> {
        self.check_alive()?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(commands.label.as_str()),
        });
        for command in &commands.commands {
            self.encode(&mut encoder, command)?;
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.check_alive()
    }

    async fn map_for_read(&mut self, buffer: GpuBuffer, size: u64) -> BindingResult<Vec<u8>> {
        self.check_alive()?;
        let buf = slot(&self.buffers, buffer.slot(), "buffer")?;
        let slice = buf.slice(..size);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            sender.send(res).ok();
        });
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            self.check_alive()?;
            return Err(BindingError::Backend(format!("device poll failed: {e}")));
        }
        receiver
            .receive()
            .await
            .ok_or_else(|| BindingError::Backend("map_async sender dropped".to_string()))?
            .map_err(|e| BindingError::Backend(format!("map_async failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let out = mapped.to_vec();
        drop(mapped);
        buf.unmap();
        Ok(out)
    }

    fn device_lost(&self) -> Option<String> {
        match self.lost.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
