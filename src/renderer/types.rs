//! Core type definitions for the renderer module.

use serde::{Deserialize, Serialize};
use wgpu::ShaderStages;

/// Programmable stage a binding plan is generated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// Bind group slot used for this stage's plan.
    ///
    /// Compute pipelines only carry group 0. Render pipelines carry the vertex plan
    /// at group 0 and the fragment plan at group 1.
    pub fn bind_group_index(self) -> u32 {
        match self {
            ShaderStage::Vertex | ShaderStage::Compute => 0,
            ShaderStage::Fragment => 1,
        }
    }

    pub fn stages(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `None` means the resource is shared by every stage that requests it.
pub type StageMask = Option<ShaderStage>;

pub(crate) fn stage_mask_admits(mask: StageMask, stage: ShaderStage) -> bool {
    mask.is_none_or(|s| s == stage)
}

macro_rules! arena_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u32);

            impl $name {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

arena_id!(
    UniformId,
    StorageId,
    SamplerId,
    StorageTextureId,
    TextureId,
    TextureArrayId,
    ExternalTextureId,
    PairId,
    EventId,
);

/// Live value of a uniform or storage element, as supplied by host code.
///
/// Values are flattened depth-first into scalars; booleans become 0/1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    Bool(bool),
    Number(f64),
    List(Vec<UniformValue>),
}

impl UniformValue {
    /// Depth-first scalar leaves.
    pub fn flatten_into(&self, out: &mut Vec<f64>) {
        match self {
            UniformValue::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
            UniformValue::Number(n) => out.push(*n),
            UniformValue::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }

    pub fn leaves(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Number(v as f64)
    }
}

impl From<f64> for UniformValue {
    fn from(v: f64) -> Self {
        UniformValue::Number(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Number(v as f64)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::Number(v as f64)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl<const N: usize> From<[f32; N]> for UniformValue {
    fn from(v: [f32; N]) -> Self {
        UniformValue::List(v.into_iter().map(UniformValue::from).collect())
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(v: Vec<f32>) -> Self {
        UniformValue::List(v.into_iter().map(UniformValue::from).collect())
    }
}

impl From<Vec<UniformValue>> for UniformValue {
    fn from(v: Vec<UniformValue>) -> Self {
        UniformValue::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_values_flatten_depth_first() {
        let v = UniformValue::List(vec![
            UniformValue::from(true),
            UniformValue::from([2.0_f32, 3.0]),
            UniformValue::from(4_u32),
        ]);
        assert_eq!(v.leaves(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn shared_mask_admits_every_stage() {
        for stage in ShaderStage::ALL {
            assert!(stage_mask_admits(None, stage));
        }
        assert!(stage_mask_admits(Some(ShaderStage::Compute), ShaderStage::Compute));
        assert!(!stage_mask_admits(Some(ShaderStage::Compute), ShaderStage::Fragment));
    }

    #[test]
    fn untagged_json_values() {
        let v: UniformValue = serde_json::from_str("[1, [2.5, false]]").unwrap();
        assert_eq!(v.leaves(), vec![1.0, 2.5, 0.0]);
    }
}
