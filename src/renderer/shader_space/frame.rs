//! Per-frame synchronization.
//!
//! One `run` call refreshes built-in uniforms, uploads every host-side change, keeps
//! bind groups in step with live handles, records all passes into a single submission,
//! then maps readable storage buffers and delivers fired events.

use std::time::Instant;

use tracing::{debug, error, trace};

use crate::error::{BindingError, BindingResult};
use crate::renderer::backend::{CommandList, GpuBackend, GpuBindGroup, GpuCommand, TextureDesc};
use crate::renderer::registry::TextureSource;
use crate::renderer::render_plan::{BindingPlan, ResourceRef, plan_bindings};
use crate::renderer::types::{EventId, ShaderStage};
use crate::renderer::wgsl::emit_bindings;

use super::bind_groups::{check_consistency, group_entries, layout_entries, plan_label};
use super::events::deliver;
use super::{Namespace, ShaderSpace};

/// What one completed frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Zero-based index of the frame that just completed.
    pub frame: u64,
    pub commands: usize,
    pub events_fired: usize,
}

impl<B: GpuBackend> ShaderSpace<B> {
    /// Run one frame.
    ///
    /// `ResourceNotReady` skips the frame without submitting; the next call retries
    /// with the pointer input of the skipped frame still pending.
    /// `DeviceLost` is terminal: every later call fails with it.
    pub async fn run(&mut self) -> BindingResult<FrameStats> {
        if let Some(reason) = self.lost.clone().or_else(|| self.backend.device_lost()) {
            self.lost = Some(reason.clone());
            return Err(BindingError::DeviceLost(reason));
        }
        match self.run_frame().await {
            Err(BindingError::DeviceLost(reason)) => {
                error!(target: "forge_bindings::frame", frame = self.frame_index, %reason, "device lost");
                self.lost = Some(reason.clone());
                Err(BindingError::DeviceLost(reason))
            }
            other => other,
        }
    }

    pub fn run_blocking(&mut self) -> BindingResult<FrameStats> {
        pollster::block_on(self.run())
    }

    async fn run_frame(&mut self) -> BindingResult<FrameStats> {
        let screen = self.screen_size();
        self.builtins.update(&mut self.registry, screen, Instant::now());

        self.write_uniforms()?;
        self.write_dirty_storages()?;
        self.upload_changed_textures()?;
        self.import_external_textures()?;
        self.refresh_bind_groups()?;

        let commands = self.encode_frame()?;
        let command_count = commands.commands.len();
        self.backend.submit(commands)?;
        self.builtins.frame_submitted();

        self.map_readbacks().await?;
        let events_fired = self.deliver_events();

        let stats = FrameStats {
            frame: self.frame_index,
            commands: command_count,
            events_fired,
        };
        trace!(target: "forge_bindings::frame", ?stats, "frame complete");
        self.frame_index += 1;
        Ok(stats)
    }

    // ── Host -> GPU ──

    /// The whole `Params` block is rewritten in place every frame.
    fn write_uniforms(&mut self) -> BindingResult<()> {
        let Some(params) = self.handles.params else {
            return Ok(());
        };
        let mut values = Vec::with_capacity(self.params_layout.leaf_count());
        for uniform in self.registry.uniforms() {
            uniform.value.flatten_into(&mut values);
        }
        let bytes = self.params_layout.flatten(&values)?;
        self.backend.write_buffer(params, 0, &bytes)
    }

    fn write_dirty_storages(&mut self) -> BindingResult<()> {
        for id in self.registry.take_dirty_storages() {
            let Some(values) = &self.registry.storage(id).values else {
                continue;
            };
            let bytes = self.storage_layouts[id.index()].flatten(values)?;
            self.backend.write_buffer(self.handles.storages[id.index()], 0, &bytes)?;
            trace!(target: "forge_bindings::frame", storage = %self.registry.storage(id).meta.name, bytes = bytes.len(), "storage uploaded");
        }
        Ok(())
    }

    /// Upload images provided since the last frame. A size change re-creates the
    /// texture and marks every namespace that binds it stale.
    pub(super) fn upload_changed_textures(&mut self) -> BindingResult<()> {
        for id in self.registry.take_changed_textures() {
            let binding = self.registry.texture(id);
            let TextureSource::Image(Some(image)) = &binding.source else {
                continue;
            };
            let image = image.clone();
            let i = id.index();

            let same_size = self.handles.texture_sizes.get(i).copied().flatten() == Some(image.dimensions());
            let texture = match self.handles.textures[i].filter(|_| same_size) {
                Some(texture) => texture,
                None => {
                    let texture = self.backend.create_texture(&TextureDesc::flat(
                        binding.meta.name.as_str(),
                        image.dimensions(),
                        wgpu::TextureFormat::Rgba8Unorm,
                        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    ))?;
                    if let Some(old) = self.handles.textures[i].replace(texture) {
                        self.backend.release_texture(old);
                    }
                    self.handles.texture_sizes[i] = Some(image.dimensions());
                    for ns in self.namespaces.values_mut() {
                        if ns.plan.entry(ResourceRef::Texture(id)).is_some() {
                            ns.stale = true;
                        }
                    }
                    texture
                }
            };
            self.backend.write_texture(texture, 0, &image)?;
            debug!(
                target: "forge_bindings::frame",
                texture = %binding.meta.name,
                width = image.width(),
                height = image.height(),
                "image uploaded"
            );
        }
        Ok(())
    }

    /// External frames are valid for one submission; each frame imports a fresh one.
    fn import_external_textures(&mut self) -> BindingResult<()> {
        for (i, binding) in self.registry.external_textures_mut().iter_mut().enumerate() {
            if !self.external_in_use[i] {
                continue;
            }
            if let Some(old) = self.handles.external[i].take() {
                self.backend.release_external_texture(old);
            }
            let image = binding.source.acquire_frame()?;
            self.handles.external[i] = Some(self.backend.import_external_texture(&binding.meta.name, &image)?);
        }
        Ok(())
    }

    /// Rebuild groups that are missing, stale, or bind per-frame external textures.
    /// Compute plans are re-derived every frame and must match the plan from init.
    fn refresh_bind_groups(&mut self) -> BindingResult<()> {
        for (&(stage, internal), ns) in self.namespaces.iter_mut() {
            let is_compute = stage == ShaderStage::Compute;
            if is_compute {
                let fresh = plan_bindings(&self.registry, stage, internal);
                if fresh != ns.plan {
                    return Err(BindingError::PlanInconsistency(format!(
                        "{} plan changed after init",
                        plan_label(&ns.plan)
                    )));
                }
            }
            if !(is_compute || ns.stale || ns.group.is_none() || ns.plan.has_external_textures()) {
                continue;
            }

            let label = plan_label(&ns.plan);
            let entries = group_entries(&ns.plan, &self.handles)?;
            let emitted = emit_bindings(&ns.plan, self.registry.uniforms());
            check_consistency(&ns.plan, &emitted, &layout_entries(&ns.plan), Some(&entries))?;

            let group = self.backend.create_bind_group(&label, ns.layout, &entries)?;
            if let Some(old) = ns.group.replace(group) {
                self.backend.release_bind_group(old);
            }
            ns.stale = false;
        }
        Ok(())
    }

    // ── Encoding ──

    fn group(&self, key: Namespace) -> BindingResult<GpuBindGroup> {
        self.namespaces
            .get(&key)
            .and_then(|ns| ns.group)
            .ok_or_else(|| BindingError::ResourceNotReady(format!("no bind group for {} (internal: {})", key.0, key.1)))
    }

    /// Copy the write half of every pair `plan` binds into its read half.
    fn pair_copies(&self, plan: &BindingPlan, out: &mut CommandList) {
        for entry in &plan.entries {
            if let ResourceRef::PairWrite(id) = entry.resource {
                let (write, read) = self.handles.pairs[id.index()];
                out.push(GpuCommand::CopyTexture { src: write, dst: read });
            }
        }
    }

    fn encode_frame(&self) -> BindingResult<CommandList> {
        let mut out = CommandList::new(format!("frame {}", self.frame_index));

        for pass in &self.passes {
            let spec = &pass.spec;
            if let (Some(pipeline), Some(stage)) = (pass.compute, &spec.compute) {
                let key = (ShaderStage::Compute, spec.internal);
                out.push(GpuCommand::Dispatch {
                    label: spec.compute_label(),
                    pipeline,
                    bind_groups: vec![self.group(key)?],
                    workgroups: stage.workgroups,
                });
                self.pair_copies(&self.namespaces[&key].plan, &mut out);
            }
            if let (Some(pipeline), Some(draw)) = (pass.render, &spec.draw) {
                let vertex = (ShaderStage::Vertex, spec.internal);
                let fragment = (ShaderStage::Fragment, spec.internal);
                out.push(GpuCommand::Draw {
                    label: spec.draw_label(),
                    pipeline,
                    bind_groups: vec![self.group(vertex)?, self.group(fragment)?],
                    target: self.frame_target,
                    clear: draw.clear,
                    vertices: draw.vertex_count,
                    instances: draw.instance_count,
                });
                self.pair_copies(&self.namespaces[&fragment].plan, &mut out);
            }
        }

        for (i, texture) in self.registry.textures().iter().enumerate() {
            if let (true, Some(dst)) = (texture.copy_from_swapchain(), self.handles.textures[i]) {
                out.push(GpuCommand::CopyTexture {
                    src: self.frame_target,
                    dst,
                });
            }
        }
        for (i, staging) in self.staging.iter().enumerate() {
            if let Some(dst) = *staging {
                out.push(GpuCommand::CopyBuffer {
                    src: self.handles.storages[i],
                    dst,
                    size: self.storage_sizes[i],
                });
            }
        }
        Ok(out)
    }

    // ── GPU -> host ──

    /// Map staging buffers one at a time, in registration order.
    async fn map_readbacks(&mut self) -> BindingResult<()> {
        for i in 0..self.staging.len() {
            let Some(staging) = self.staging[i] else {
                continue;
            };
            let bytes = self.backend.map_for_read(staging, self.storage_sizes[i]).await?;
            self.readbacks[i] = Some(bytes);
        }
        Ok(())
    }

    /// Deliver events in registration order.
    fn deliver_events(&mut self) -> usize {
        let mut fired = 0;
        for e in 0..self.registry.events().len() {
            let id = EventId(e as u32);
            let storage = self.registry.events()[e].storage;
            let Some(bytes) = self.readbacks[storage.index()].as_deref() else {
                continue;
            };
            if deliver(self.registry.event_mut(id), bytes) {
                fired += 1;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::renderer::backend::RecordingBackend;
    use crate::renderer::registry::{EventSpec, StorageSpec, TextureSpec, UniformSpec};
    use crate::renderer::shader_space::{RenderPassSpec, ShaderSpaceBuildOptions, ShaderSpaceBuilder};

    fn builder() -> ShaderSpaceBuilder {
        ShaderSpaceBuilder::new(ShaderSpaceBuildOptions {
            width: 4,
            height: 4,
            validate_wgsl: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn event_fires_every_frame_while_flag_stays_set() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut b = builder();
        b.register_event(EventSpec::new("hit", 2, move |p: &[u32]| sink.borrow_mut().push(p.to_vec())))
            .unwrap();
        b.add_pass(RenderPassSpec::new("sim").compute("", "main", [1, 1, 1])).unwrap();

        let mut backend = RecordingBackend::new();
        backend.on_pass("sim.compute", |ctx| {
            ctx.write_words("hit", 0, &[1, 7, 9]);
        });
        let mut space = b.build(backend).unwrap();

        let first = space.run_blocking().unwrap();
        let second = space.run_blocking().unwrap();
        assert_eq!((first.frame, second.frame), (0, 1));
        assert_eq!(second.events_fired, 1);
        assert_eq!(*seen.borrow(), vec![vec![7, 9], vec![7, 9]]);
    }

    #[test]
    fn uniform_buffer_is_rewritten_not_reallocated() {
        let mut b = builder();
        b.declare_uniform(UniformSpec::new("gain", 0.5)).unwrap();
        b.add_pass(RenderPassSpec::new("show").draw("", "")).unwrap();
        let mut space = b.build(RecordingBackend::new()).unwrap();
        let created = space.backend().buffers_created();

        space.run_blocking().unwrap();
        space.set_uniform("gain", 2.0).unwrap();
        space.run_blocking().unwrap();

        let params = space.backend().find_buffer("params").unwrap();
        assert_eq!(space.backend().buffers_created(), created);
        assert_eq!(space.backend().write_count(params), 2);
        let offset = space.params_layout().field("gain").unwrap().offset as usize;
        let bytes = &space.backend().buffer(params).unwrap().bytes;
        assert_eq!(f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()), 2.0);
        assert!(space.set_uniform("gain", [1.0_f32, 2.0]).is_err());
    }

    #[test]
    fn only_changed_storages_are_uploaded() {
        let mut b = builder();
        b.declare_storage(StorageSpec::new("weights", "array<f32, 4>").backing(vec![1.0_f32, 2.0, 3.0, 4.0]))
            .unwrap();
        b.add_pass(RenderPassSpec::new("sim").compute("", "main", [1, 1, 1])).unwrap();
        let mut space = b.build(RecordingBackend::new()).unwrap();
        let weights = space.backend().find_buffer("weights").unwrap();

        space.run_blocking().unwrap();
        space.run_blocking().unwrap();
        assert_eq!(space.backend().write_count(weights), 1);

        space.set_storage_values("weights", vec![1.0_f32, 2.0, 3.0, 4.0]).unwrap();
        space.run_blocking().unwrap();
        assert_eq!(space.backend().write_count(weights), 1);

        space.set_storage_values("weights", vec![0.0_f32, 0.0, 0.0, 8.0]).unwrap();
        space.run_blocking().unwrap();
        assert_eq!(space.backend().write_count(weights), 2);
        let bytes = &space.backend().buffer(weights).unwrap().bytes;
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 8.0);
    }

    #[test]
    fn pending_image_blocks_frames_until_provided() {
        let mut b = builder();
        b.declare_texture_2d(TextureSpec::pending_image("photo")).unwrap();
        b.add_pass(RenderPassSpec::new("show").draw("", "")).unwrap();
        let mut space = b.build(RecordingBackend::new()).unwrap();

        let err = space.run_blocking().unwrap_err();
        assert!(matches!(err, BindingError::ResourceNotReady(_)), "{err}");
        assert!(space.backend().submissions().is_empty());
        assert!(!space.is_lost());

        space
            .provide_image("photo", RgbaImage::from_pixel(2, 3, Rgba([9, 8, 7, 255])))
            .unwrap();
        let stats = space.run_blocking().unwrap();
        assert_eq!(stats.frame, 0);
        let photo = space.backend().find_texture("photo").unwrap();
        assert_eq!((photo.width, photo.height), (2, 3));
        assert_eq!(&photo.bytes[..4], &[9, 8, 7, 255]);
    }

    #[test]
    fn device_loss_is_terminal() {
        let mut b = builder();
        b.add_pass(RenderPassSpec::new("show").draw("", "")).unwrap();
        let mut space = b.build(RecordingBackend::new()).unwrap();
        space.run_blocking().unwrap();

        space.backend_mut().lose_device("gpu reset");
        assert!(matches!(space.run_blocking(), Err(BindingError::DeviceLost(_))));
        assert!(space.is_lost());
        assert!(matches!(space.run_blocking(), Err(BindingError::DeviceLost(ref r)) if r == "gpu reset"));
        assert_eq!(space.frame_index(), 1);
    }
}
