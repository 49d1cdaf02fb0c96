//! Multi-pass GPU effect engine
//!
//! Runs declarative effect definitions, compiled by `fxgraph-wgpu-build`,
//! frame after frame: surfaces are allocated and cached per instance,
//! persistent state is double-buffered, uniforms are packed from parameters
//! and every pass is recorded through a [`backend::Backend`].

pub mod backend;
pub mod chain;
pub mod double_buffer;
pub mod error;
pub mod frame_executor;
pub mod lifecycle;
pub mod presets;
pub mod resource_allocator;
pub mod uniform_packer;

pub use backend::{Backend, SoftwareBackend, SurfaceFormat, SurfaceId, WgpuBackend};
pub use chain::{ChainOutput, EffectChain};
pub use error::{EffectError, ProgramError, ResourceError};
pub use frame_executor::{BoundSurface, EffectInstance, FrameContext, FrameOutput, FrameStats};
pub use fxgraph_wgpu_build::{CompiledEffect, DefinitionError};
