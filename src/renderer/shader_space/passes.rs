//! Render pass definitions and per-pass composed WGSL.
//!
//! A pass is an optional compute dispatch followed by an optional vertex/fragment
//! draw. Passes run in the order they were added; a later pass sees everything an
//! earlier pass wrote in the same frame.

use crate::error::{BindingError, BindingResult};
use crate::renderer::types::ShaderStage;

#[derive(Clone, Debug, PartialEq)]
pub struct ComputeStage {
    pub source: String,
    pub entry_point: String,
    pub workgroups: [u32; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawStage {
    pub vertex_source: String,
    pub vertex_entry: String,
    pub fragment_source: String,
    pub fragment_entry: String,
    pub vertex_count: u32,
    pub instance_count: u32,
    /// `None` keeps whatever earlier passes drew this frame.
    pub clear: Option<wgpu::Color>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassSpec {
    pub name: String,
    pub compute: Option<ComputeStage>,
    pub draw: Option<DrawStage>,
    /// Bind framework-internal resources instead of user resources.
    pub internal: bool,
}

impl RenderPassSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute: None,
            draw: None,
            internal: false,
        }
    }

    pub fn compute(mut self, source: impl Into<String>, entry_point: impl Into<String>, workgroups: [u32; 3]) -> Self {
        self.compute = Some(ComputeStage {
            source: source.into(),
            entry_point: entry_point.into(),
            workgroups,
        });
        self
    }

    /// Fullscreen-triangle defaults: `vs_main`/`fs_main`, three vertices, cleared to black.
    pub fn draw(mut self, vertex_source: impl Into<String>, fragment_source: impl Into<String>) -> Self {
        self.draw = Some(DrawStage {
            vertex_source: vertex_source.into(),
            vertex_entry: "vs_main".to_string(),
            fragment_source: fragment_source.into(),
            fragment_entry: "fs_main".to_string(),
            vertex_count: 3,
            instance_count: 1,
            clear: Some(wgpu::Color::BLACK),
        });
        self
    }

    pub fn entry_points(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        if let Some(draw) = self.draw.as_mut() {
            draw.vertex_entry = vertex.into();
            draw.fragment_entry = fragment.into();
        }
        self
    }

    pub fn vertices(mut self, vertex_count: u32, instance_count: u32) -> Self {
        if let Some(draw) = self.draw.as_mut() {
            draw.vertex_count = vertex_count;
            draw.instance_count = instance_count;
        }
        self
    }

    pub fn clear(mut self, color: Option<wgpu::Color>) -> Self {
        if let Some(draw) = self.draw.as_mut() {
            draw.clear = color;
        }
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Stages whose bind group plans this pass consumes.
    pub fn stages(&self) -> Vec<ShaderStage> {
        let mut out = Vec::new();
        if self.compute.is_some() {
            out.push(ShaderStage::Compute);
        }
        if self.draw.is_some() {
            out.push(ShaderStage::Vertex);
            out.push(ShaderStage::Fragment);
        }
        out
    }

    pub(crate) fn validate(&self) -> BindingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BindingError::config("render pass name is empty"));
        }
        if self.compute.is_none() && self.draw.is_none() {
            return Err(BindingError::config(format!(
                "render pass `{}` has neither a compute nor a draw stage",
                self.name
            )));
        }
        if let Some(compute) = &self.compute
            && compute.workgroups.contains(&0)
        {
            return Err(BindingError::config(format!(
                "render pass `{}`: workgroup count {:?} has a zero dimension",
                self.name, compute.workgroups
            )));
        }
        if let Some(draw) = &self.draw
            && (draw.vertex_count == 0 || draw.instance_count == 0)
        {
            return Err(BindingError::config(format!(
                "render pass `{}`: zero-sized mesh ({} vertices x {} instances)",
                self.name, draw.vertex_count, draw.instance_count
            )));
        }
        Ok(())
    }

    pub(crate) fn compute_label(&self) -> String {
        format!("{}.compute", self.name)
    }

    pub(crate) fn draw_label(&self) -> String {
        format!("{}.draw", self.name)
    }
}

/// Composed modules of one pass: shared structs, generated declarations, user code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WgslShaderBundle {
    pub pass: String,
    pub compute: Option<String>,
    pub vertex: Option<String>,
    pub fragment: Option<String>,
}

impl WgslShaderBundle {
    pub fn module(&self, stage: ShaderStage) -> Option<&str> {
        match stage {
            ShaderStage::Compute => self.compute.as_deref(),
            ShaderStage::Vertex => self.vertex.as_deref(),
            ShaderStage::Fragment => self.fragment.as_deref(),
        }
    }

    pub fn modules(&self) -> impl Iterator<Item = (ShaderStage, &str)> {
        [ShaderStage::Compute, ShaderStage::Vertex, ShaderStage::Fragment]
            .into_iter()
            .filter_map(|stage| self.module(stage).map(|text| (stage, text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_and_stages() {
        let pass = RenderPassSpec::new("blit").draw("vs", "fs").vertices(6, 2);
        let draw = pass.draw.as_ref().unwrap();
        assert_eq!(draw.vertex_entry, "vs_main");
        assert_eq!((draw.vertex_count, draw.instance_count), (6, 2));
        assert_eq!(pass.stages(), vec![ShaderStage::Vertex, ShaderStage::Fragment]);

        let sim = RenderPassSpec::new("sim").compute("cs", "main", [4, 1, 1]);
        assert_eq!(sim.stages(), vec![ShaderStage::Compute]);
        assert!(sim.validate().is_ok());
    }

    #[test]
    fn degenerate_passes_are_rejected() {
        assert!(RenderPassSpec::new("empty").validate().is_err());
        assert!(
            RenderPassSpec::new("points")
                .draw("vs", "fs")
                .vertices(0, 1)
                .validate()
                .is_err()
        );
        assert!(
            RenderPassSpec::new("sim")
                .compute("cs", "main", [8, 0, 1])
                .validate()
                .is_err()
        );
    }
}
