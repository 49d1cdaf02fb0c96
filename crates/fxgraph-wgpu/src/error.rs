//! Runtime errors
//!
//! Each error disables the effect instance that raised it; the rest of the
//! chain keeps running with the instance passing its input through.

use crate::backend::SurfaceId;
use fxgraph_wgpu_build::DefinitionError;
use thiserror::Error;

/// Surface allocation, format and readback failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Unsupported surface format '{0}'")]
    UnsupportedFormat(String),
    #[error("Surface of {width}x{height} exceeds the limit of {limit} pixels per side")]
    TooLarge { width: u32, height: u32, limit: u32 },
    #[error("A point draw of {0} points exceeds the per-draw limit")]
    TooManyPoints(u64),
    #[error("Surface {0:?} does not exist")]
    MissingSurface(SurfaceId),
    #[error("No surface is allocated for {0}")]
    Unallocated(String),
    #[error("Pass '{0}' reads a surface it also writes")]
    Aliased(String),
    #[error("Expected {expected} pixels but got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Failed to read back surface: {0}")]
    Readback(String),
}

/// Program compile and link failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("Program '{program}' failed to compile: {message}")]
    Compile { program: String, message: String },
    #[error("Program '{0}' was used before it was compiled")]
    Missing(String),
    #[error("Program '{program}' has no entry point '{entry}'")]
    MissingEntryPoint { program: String, entry: String },
}

/// Any failure of an effect instance
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Program(#[from] ProgramError),
}
