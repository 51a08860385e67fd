//! Resource-binding and memory-layout compiler for WGSL shader programs.
//!
//! Declare uniforms, storage buffers, samplers and textures once; `forge_bindings`
//! lays them out host-shareably, numbers their bindings per stage, writes the WGSL
//! declarations, builds the GPU objects and keeps everything in sync every frame.

pub mod error;
pub mod manifest;
pub mod renderer;

pub use error::{BindingError, BindingResult};
pub use renderer::backend::{GpuBackend, RecordingBackend, WgpuBackend};
pub use renderer::shader_space::{
    FrameStats, PointerState, RenderPassSpec, ShaderSpace, ShaderSpaceBuildOptions, ShaderSpaceBuilder,
    WgslShaderBundle,
};
