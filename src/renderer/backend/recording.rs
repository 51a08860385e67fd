//! In-memory backend that records every call and executes commands on host bytes.
//!
//! Shaders do not run here. Instead, a kernel closure can be attached to a pass label;
//! it is invoked when a dispatch or draw with that label executes and may read or
//! write any buffer or texture by label. Commands run in submission order, which is
//! what the frame loop's ordering guarantees are checked against.

use std::collections::{HashMap, VecDeque};

use image::RgbaImage;
use tracing::trace;

use crate::error::{BindingError, BindingResult};

use super::{
    BufferDesc, CommandList, ComputePipelineDesc, GpuBackend, GpuBindGroup, GpuBuffer, GpuCommand,
    GpuExternalTexture, GpuLayout, GpuPipeline, GpuSampler, GpuTexture, GroupEntry, GroupResource,
    RenderPipelineDesc, TextureDesc, release, slot, slot_mut,
};

#[derive(Debug)]
pub struct RecordedBuffer {
    pub label: String,
    pub usage: wgpu::BufferUsages,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct RecordedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: wgpu::TextureFormat,
    pub bytes: Vec<u8>,
}

impl RecordedTexture {
    fn texel_size(&self) -> usize {
        self.format.block_copy_size(None).unwrap_or(4) as usize
    }

    fn layer_len(&self) -> usize {
        self.width as usize * self.height as usize * self.texel_size()
    }
}

#[derive(Debug)]
pub struct RecordedLayout {
    pub label: String,
    pub entries: Vec<wgpu::BindGroupLayoutEntry>,
}

#[derive(Debug)]
pub struct RecordedBindGroup {
    pub label: String,
    pub layout: GpuLayout,
    pub entries: Vec<GroupEntry>,
}

#[derive(Debug)]
pub enum RecordedPipeline {
    Compute {
        label: String,
        source: String,
        entry_point: String,
        layouts: Vec<GpuLayout>,
    },
    Render {
        label: String,
        vertex_source: String,
        fragment_source: String,
        layouts: Vec<GpuLayout>,
    },
}

pub type Kernel = Box<dyn FnMut(&mut KernelContext<'_>)>;

/// Host view of backend memory handed to a kernel while its command executes.
pub struct KernelContext<'a> {
    label: &'a str,
    target: Option<GpuTexture>,
    buffers: &'a mut [Option<RecordedBuffer>],
    textures: &'a mut [Option<RecordedTexture>],
}

impl KernelContext<'_> {
    /// Label of the executing dispatch or draw.
    pub fn label(&self) -> &str {
        self.label
    }

    pub fn buffer(&self, label: &str) -> Option<&[u8]> {
        self.buffers
            .iter()
            .flatten()
            .find(|b| b.label == label)
            .map(|b| b.bytes.as_slice())
    }

    pub fn buffer_mut(&mut self, label: &str) -> Option<&mut [u8]> {
        self.buffers
            .iter_mut()
            .flatten()
            .find(|b| b.label == label)
            .map(|b| b.bytes.as_mut_slice())
    }

    pub fn read_words(&self, label: &str) -> Vec<u32> {
        self.buffer(label)
            .map(|bytes| {
                bytes
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<u32>)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write little-endian words starting at word `offset`. Returns false if the
    /// buffer is missing or too small.
    pub fn write_words(&mut self, label: &str, offset: usize, words: &[u32]) -> bool {
        let Some(bytes) = self.buffer_mut(label) else {
            return false;
        };
        let end = (offset + words.len()) * 4;
        if end > bytes.len() {
            return false;
        }
        bytes[offset * 4..end].copy_from_slice(bytemuck::cast_slice(words));
        true
    }

    pub fn texture(&self, label: &str) -> Option<&[u8]> {
        self.textures
            .iter()
            .flatten()
            .find(|t| t.label == label)
            .map(|t| t.bytes.as_slice())
    }

    pub fn texture_mut(&mut self, label: &str) -> Option<&mut [u8]> {
        self.textures
            .iter_mut()
            .flatten()
            .find(|t| t.label == label)
            .map(|t| t.bytes.as_mut_slice())
    }

    /// Color target of the executing draw.
    pub fn target_mut(&mut self) -> Option<&mut [u8]> {
        let target = self.target?;
        self.textures
            .get_mut(target.slot())
            .and_then(Option::as_mut)
            .map(|t| t.bytes.as_mut_slice())
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    buffers: Vec<Option<RecordedBuffer>>,
    textures: Vec<Option<RecordedTexture>>,
    samplers: Vec<Option<wgpu::SamplerDescriptor<'static>>>,
    external: Vec<Option<RgbaImage>>,
    layouts: Vec<Option<RecordedLayout>>,
    bind_groups: Vec<Option<RecordedBindGroup>>,
    pipelines: Vec<Option<RecordedPipeline>>,
    kernels: HashMap<String, Kernel>,
    submissions: VecDeque<CommandList>,
    history: Option<usize>,
    log: Vec<String>,
    buffers_created: usize,
    buffer_writes: Vec<(GpuBuffer, usize)>,
    lost: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the last `frames` submitted command lists.
    pub fn with_history(frames: usize) -> Self {
        Self {
            history: Some(frames),
            ..Self::default()
        }
    }

    /// Run `kernel` whenever a dispatch or draw labelled `label` executes.
    pub fn on_pass(&mut self, label: impl Into<String>, kernel: impl FnMut(&mut KernelContext<'_>) + 'static) {
        self.kernels.insert(label.into(), Box::new(kernel));
    }

    /// Simulate device loss; every later submission fails.
    pub fn lose_device(&mut self, reason: impl Into<String>) {
        self.lost = Some(reason.into());
    }

    pub fn submissions(&self) -> &VecDeque<CommandList> {
        &self.submissions
    }

    /// One line per executed command, in execution order.
    pub fn command_log(&self) -> &[String] {
        &self.log
    }

    /// Drain the command log.
    pub fn take_command_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created
    }

    /// Number of `write_buffer` calls that targeted `buffer`.
    pub fn write_count(&self, buffer: GpuBuffer) -> usize {
        self.buffer_writes.iter().filter(|(b, _)| *b == buffer).count()
    }

    pub fn find_buffer(&self, label: &str) -> Option<GpuBuffer> {
        self.buffers
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.label == label))
            .map(|i| GpuBuffer(i as u32))
    }

    pub fn buffer(&self, buffer: GpuBuffer) -> Option<&RecordedBuffer> {
        self.buffers.get(buffer.slot()).and_then(Option::as_ref)
    }

    pub fn find_texture(&self, label: &str) -> Option<&RecordedTexture> {
        self.textures.iter().flatten().find(|t| t.label == label)
    }

    pub fn layout(&self, layout: GpuLayout) -> Option<&RecordedLayout> {
        self.layouts.get(layout.slot()).and_then(Option::as_ref)
    }

    pub fn bind_group(&self, group: GpuBindGroup) -> Option<&RecordedBindGroup> {
        self.bind_groups.get(group.slot()).and_then(Option::as_ref)
    }

    pub fn live_bind_groups(&self) -> usize {
        self.bind_groups.iter().flatten().count()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &RecordedPipeline> {
        self.pipelines.iter().flatten()
    }

    fn check_alive(&self) -> BindingResult<()> {
        match &self.lost {
            Some(reason) => Err(BindingError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn check_group_matches_layout(&self, label: &str, layout: &RecordedLayout, entries: &[GroupEntry]) -> BindingResult<()> {
        if layout.entries.len() != entries.len() {
            return Err(BindingError::Backend(format!(
                "bind group `{label}` has {} entries, layout `{}` expects {}",
                entries.len(),
                layout.label,
                layout.entries.len()
            )));
        }
        for entry in entries {
            let Some(layout_entry) = layout.entries.iter().find(|l| l.binding == entry.binding) else {
                return Err(BindingError::Backend(format!(
                    "bind group `{label}`: binding {} is not in layout `{}`",
                    entry.binding, layout.label
                )));
            };
            let compatible = matches!(
                (&layout_entry.ty, entry.resource),
                (wgpu::BindingType::Buffer { .. }, GroupResource::Buffer(_))
                    | (wgpu::BindingType::Sampler(_), GroupResource::Sampler(_))
                    | (wgpu::BindingType::Texture { .. }, GroupResource::Texture(_))
                    | (wgpu::BindingType::StorageTexture { .. }, GroupResource::Texture(_))
                    | (wgpu::BindingType::ExternalTexture, GroupResource::ExternalTexture(_))
            );
            if !compatible {
                return Err(BindingError::Backend(format!(
                    "bind group `{label}`: binding {} resource {:?} does not match layout type {:?}",
                    entry.binding, entry.resource, layout_entry.ty
                )));
            }
            match entry.resource {
                GroupResource::Buffer(b) => {
                    slot(&self.buffers, b.slot(), "buffer")?;
                }
                GroupResource::Sampler(s) => {
                    slot(&self.samplers, s.slot(), "sampler")?;
                }
                GroupResource::Texture(t) => {
                    slot(&self.textures, t.slot(), "texture")?;
                }
                GroupResource::ExternalTexture(t) => {
                    slot(&self.external, t.slot(), "external texture")?;
                }
            }
        }
        Ok(())
    }

    fn run_kernel(&mut self, label: &str, target: Option<GpuTexture>) {
        if let Some(kernel) = self.kernels.get_mut(label) {
            let mut ctx = KernelContext {
                label,
                target,
                buffers: &mut self.buffers,
                textures: &mut self.textures,
            };
            kernel(&mut ctx);
        }
    }

    fn execute(&mut self, command: &GpuCommand) -> BindingResult<()> {
        match command {
            GpuCommand::Dispatch {
                label,
                pipeline,
                bind_groups,
                workgroups,
            } => {
                slot(&self.pipelines, pipeline.slot(), "pipeline")?;
                for group in bind_groups {
                    slot(&self.bind_groups, group.slot(), "bind group")?;
                }
                self.log.push(format!("dispatch {label} {workgroups:?}"));
                self.run_kernel(label, None);
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
                slot(&self.pipelines, pipeline.slot(), "pipeline")?;
                for group in bind_groups {
                    slot(&self.bind_groups, group.slot(), "bind group")?;
                }
                let texture = slot_mut(&mut self.textures, target.slot(), "texture")?;
                if let Some(color) = clear {
                    let texel = [color.r, color.g, color.b, color.a].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                    for px in texture.bytes.chunks_exact_mut(4) {
                        px.copy_from_slice(&texel);
                    }
                }
                self.log.push(format!("draw {label} vertices={vertices} instances={instances}"));
                self.run_kernel(label, Some(*target));
            }
            GpuCommand::CopyBuffer { src, dst, size } => {
                let size = *size as usize;
                let data = {
                    let src = slot(&self.buffers, src.slot(), "buffer")?;
                    src.bytes.get(..size).map(<[u8]>::to_vec).ok_or_else(|| {
                        BindingError::Backend(format!("copy reads past the end of `{}`", src.label))
                    })?
                };
                let dst_buf = slot_mut(&mut self.buffers, dst.slot(), "buffer")?;
                let Some(out) = dst_buf.bytes.get_mut(..size) else {
                    return Err(BindingError::Backend(format!("copy writes past the end of `{}`", dst_buf.label)));
                };
                out.copy_from_slice(&data);
                let dst_label = dst_buf.label.clone();
                let src_label = slot(&self.buffers, src.slot(), "buffer")?.label.clone();
                self.log.push(format!("copy {src_label} -> {dst_label} ({size} bytes)"));
            }
            GpuCommand::CopyTexture { src, dst } => {
                let (data, src_label, src_dims) = {
                    let src = slot(&self.textures, src.slot(), "texture")?;
                    (
                        src.bytes[..src.layer_len()].to_vec(),
                        src.label.clone(),
                        (src.width, src.height, src.format),
                    )
                };
                let dst_tex = slot_mut(&mut self.textures, dst.slot(), "texture")?;
                if (dst_tex.width, dst_tex.height, dst_tex.format) != src_dims {
                    return Err(BindingError::Backend(format!(
                        "texture copy `{src_label}` -> `{}` between different sizes or formats",
                        dst_tex.label
                    )));
                }
                dst_tex.bytes[..data.len()].copy_from_slice(&data);
                let dst_label = dst_tex.label.clone();
                self.log.push(format!("copy {src_label} -> {dst_label}"));
            }
        }
        Ok(())
    }
}

impl GpuBackend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> BindingResult<GpuBuffer> {
        self.buffers_created += 1;
        self.buffers.push(Some(RecordedBuffer {
            label: desc.label.clone(),
            usage: desc.usage,
            bytes: vec![0; desc.size as usize],
        }));
        Ok(GpuBuffer(self.buffers.len() as u32 - 1))
    }

    fn write_buffer(&mut self, buffer: GpuBuffer, offset: u64, bytes: &[u8]) -> BindingResult<()> {
        let buf = slot_mut(&mut self.buffers, buffer.slot(), "buffer")?;
        let start = offset as usize;
        let Some(out) = buf.bytes.get_mut(start..start + bytes.len()) else {
            return Err(BindingError::Backend(format!(
                "write of {} bytes at {offset} overflows `{}` ({} bytes)",
                bytes.len(),
                buf.label,
                buf.bytes.len()
            )));
        };
        out.copy_from_slice(bytes);
        self.buffer_writes.push((buffer, bytes.len()));
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> BindingResult<GpuTexture> {
        let mut texture = RecordedTexture {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            layers: desc.layers.max(1),
            format: desc.format,
            bytes: Vec::new(),
        };
        texture.bytes = vec![0; texture.layer_len() * texture.layers as usize];
        self.textures.push(Some(texture));
        Ok(GpuTexture(self.textures.len() as u32 - 1))
    }

    fn write_texture(&mut self, texture: GpuTexture, layer: u32, image: &RgbaImage) -> BindingResult<()> {
        let tex = slot_mut(&mut self.textures, texture.slot(), "texture")?;
        if image.dimensions() != (tex.width, tex.height) || layer >= tex.layers || tex.texel_size() != 4 {
            return Err(BindingError::Backend(format!(
                "image {:?} does not fit layer {layer} of `{}` ({}x{}x{})",
                image.dimensions(),
                tex.label,
                tex.width,
                tex.height,
                tex.layers
            )));
        }
        let len = tex.layer_len();
        let start = layer as usize * len;
        tex.bytes[start..start + len].copy_from_slice(image.as_raw());
        Ok(())
    }

    fn release_texture(&mut self, texture: GpuTexture) {
        release(&mut self.textures, texture.slot());
    }

    fn create_sampler(&mut self, desc: &wgpu::SamplerDescriptor<'static>) -> BindingResult<GpuSampler> {
        self.samplers.push(Some(desc.clone()));
        Ok(GpuSampler(self.samplers.len() as u32 - 1))
    }

    fn import_external_texture(&mut self, label: &str, image: &RgbaImage) -> BindingResult<GpuExternalTexture> {
        self.check_alive()?;
        trace!(target: "forge_bindings::recording", label, "import external texture");
        self.external.push(Some(image.clone()));
        Ok(GpuExternalTexture(self.external.len() as u32 - 1))
    }

    fn release_external_texture(&mut self, texture: GpuExternalTexture) {
        release(&mut self.external, texture.slot());
    }

    fn create_bind_group_layout(&mut self, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> BindingResult<GpuLayout> {
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(e.binding)) {
            return Err(BindingError::Backend(format!(
                "layout `{label}` declares binding {} twice",
                dup.binding
            )));
        }
        self.layouts.push(Some(RecordedLayout {
            label: label.to_string(),
            entries: entries.to_vec(),
        }));
        Ok(GpuLayout(self.layouts.len() as u32 - 1))
    }

    fn create_bind_group(&mut self, label: &str, layout: GpuLayout, entries: &[GroupEntry]) -> BindingResult<GpuBindGroup> {
        let recorded = slot(&self.layouts, layout.slot(), "layout")?;
        self.check_group_matches_layout(label, recorded, entries)?;
        self.bind_groups.push(Some(RecordedBindGroup {
            label: label.to_string(),
            layout,
            entries: entries.to_vec(),
        }));
        Ok(GpuBindGroup(self.bind_groups.len() as u32 - 1))
    }

    fn release_bind_group(&mut self, group: GpuBindGroup) {
        release(&mut self.bind_groups, group.slot());
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<'_>) -> BindingResult<GpuPipeline> {
        for layout in desc.layouts {
            slot(&self.layouts, layout.slot(), "layout")?;
        }
        self.pipelines.push(Some(RecordedPipeline::Compute {
            label: desc.label.to_string(),
            source: desc.source.to_string(),
            entry_point: desc.entry_point.to_string(),
            layouts: desc.layouts.to_vec(),
        }));
        Ok(GpuPipeline(self.pipelines.len() as u32 - 1))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDesc<'_>) -> BindingResult<GpuPipeline> {
        for layout in desc.layouts {
            slot(&self.layouts, layout.slot(), "layout")?;
        }
        self.pipelines.push(Some(RecordedPipeline::Render {
            label: desc.label.to_string(),
            vertex_source: desc.vertex_source.to_string(),
            fragment_source: desc.fragment_source.to_string(),
            layouts: desc.layouts.to_vec(),
        }));
        Ok(GpuPipeline(self.pipelines.len() as u32 - 1))
    }

    fn submit(&mut self, commands: CommandList) -> BindingResult<()> {
        self.check_alive()?;
        for command in &commands.commands {
            self.execute(command)?;
        }
        self.submissions.push_back(commands);
        if let Some(limit) = self.history {
            while self.submissions.len() > limit {
                self.submissions.pop_front();
            }
        }
        Ok(())
    }

    async fn map_for_read(&mut self, buffer: GpuBuffer, size: u64) -> BindingResult<Vec<u8>> {
        self.check_alive()?;
        let buf = slot(&self.buffers, buffer.slot(), "buffer")?;
        if !buf.usage.contains(wgpu::BufferUsages::MAP_READ) {
            return Err(BindingError::Backend(format!("`{}` is not mappable", buf.label)));
        }
        buf.bytes
            .get(..size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BindingError::Backend(format!("map past the end of `{}`", buf.label)))
    }

    fn device_lost(&self) -> Option<String> {
        self.lost.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(backend: &mut RecordingBackend, label: &str, usage: wgpu::BufferUsages) -> GpuBuffer {
        backend
            .create_buffer(&BufferDesc {
                label: label.to_string(),
                size: 16,
                usage,
            })
            .unwrap()
    }

    #[test]
    fn commands_execute_in_order_with_kernels() {
        let mut backend = RecordingBackend::new();
        let data = buffer(&mut backend, "data", wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC);
        let staging = buffer(&mut backend, "data.staging", wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST);
        let layout = backend.create_bind_group_layout("l", &[]).unwrap();
        let pipeline = backend
            .create_compute_pipeline(&ComputePipelineDesc {
                label: "k",
                source: "",
                entry_point: "main",
                layouts: &[layout],
            })
            .unwrap();
        backend.on_pass("k", |ctx| {
            assert!(ctx.write_words("data", 0, &[5, 6]));
        });

        let mut list = CommandList::new("frame");
        list.push(GpuCommand::Dispatch {
            label: "k".into(),
            pipeline,
            bind_groups: vec![],
            workgroups: [1, 1, 1],
        });
        list.push(GpuCommand::CopyBuffer {
            src: data,
            dst: staging,
            size: 16,
        });
        backend.submit(list).unwrap();

        let bytes = pollster::block_on(backend.map_for_read(staging, 8)).unwrap();
        assert_eq!(bytes, [5, 0, 0, 0, 6, 0, 0, 0]);
        assert_eq!(backend.command_log().len(), 2);
        assert!(pollster::block_on(backend.map_for_read(data, 8)).is_err());
    }

    #[test]
    fn bounded_history_drops_old_submissions() {
        let mut backend = RecordingBackend::with_history(2);
        let data = buffer(&mut backend, "data", wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC);
        let staging = buffer(&mut backend, "data.staging", wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST);
        for frame in 0..5 {
            let mut list = CommandList::new(format!("frame {frame}"));
            list.push(GpuCommand::CopyBuffer {
                src: data,
                dst: staging,
                size: 16,
            });
            backend.submit(list).unwrap();
        }
        let labels: Vec<&str> = backend.submissions().iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, ["frame 3", "frame 4"]);

        assert_eq!(backend.take_command_log().len(), 5);
        assert!(backend.command_log().is_empty());
    }

    #[test]
    fn bind_groups_must_match_their_layout() {
        let mut backend = RecordingBackend::new();
        let buf = buffer(&mut backend, "u", wgpu::BufferUsages::UNIFORM);
        let layout = backend
            .create_bind_group_layout(
                "l",
                &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            )
            .unwrap();
        let ok = [GroupEntry {
            binding: 0,
            resource: GroupResource::Buffer(buf),
        }];
        assert!(backend.create_bind_group("g", layout, &ok).is_ok());

        let wrong_slot = [GroupEntry {
            binding: 1,
            resource: GroupResource::Buffer(buf),
        }];
        assert!(backend.create_bind_group("g", layout, &wrong_slot).is_err());
        assert!(backend.create_bind_group("g", layout, &[]).is_err());
    }

    #[test]
    fn lost_device_fails_submission() {
        let mut backend = RecordingBackend::new();
        backend.lose_device("unplugged");
        let err = backend.submit(CommandList::new("frame")).unwrap_err();
        assert!(matches!(err, BindingError::DeviceLost(ref r) if r == "unplugged"));
        assert_eq!(backend.device_lost().as_deref(), Some("unplugged"));
    }
}
