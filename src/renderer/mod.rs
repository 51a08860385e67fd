//! Binding compiler and runtime.
//!
//! - `types`: stages, stage masks, typed resource ids, host uniform values
//! - `layout`: host-shareable memory layout of WGSL types
//! - `registry`: append-only record of declared resources
//! - `render_plan`: per-stage binding plans
//! - `wgsl`: WGSL declaration emitter
//! - `validation`: naga checks of composed modules
//! - `backend`: GPU collaborator surface (wgpu and in-memory recording)
//! - `shader_space`: builder, bind groups, frame loop, events
//!
//! The main entry point is `ShaderSpaceBuilder`.

pub mod backend;
pub mod layout;
pub mod registry;
pub mod render_plan;
pub mod shader_space;
pub mod types;
pub mod validation;
pub mod wgsl;

pub use layout::{AddressSpace, TypeLayout, TypeLayoutResolver};
pub use registry::ResourceRegistry;
pub use render_plan::{BindingPlan, plan_bindings};
pub use shader_space::{ShaderSpace, ShaderSpaceBuildOptions, ShaderSpaceBuilder, WgslShaderBundle};
pub use types::{ShaderStage, UniformValue};
pub use validation::{validate_wgsl, validate_wgsl_with_context};
