//! GPU seam of the engine
//!
//! The frame executor only talks to a [`Backend`]: it allocates surfaces,
//! compiles programs and records draws through it. [`WgpuBackend`] runs on
//! real hardware; [`SoftwareBackend`] evaluates Rust kernels on the CPU and is
//! what the engine is tested against.

mod software;
mod wgpu_backend;

pub use software::{FragmentKernel, KernelContext, PointKernel, SoftwareBackend};
pub use wgpu_backend::WgpuBackend;

use crate::error::{EffectError, ProgramError, ResourceError};
use crate::uniform_packer::UniformValues;
use fxgraph_wgpu_build::CompiledProgram;
use fxgraph_wgpu_build::graph::BlendMode;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle to a backend surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(u64);

impl SurfaceId {
    /// Returns a handle unique within the process
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pixel formats a surface can be allocated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    R16Float,
    R32Float,
    Rg16Float,
    Rg32Float,
}

impl SurfaceFormat {
    /// Number of stored channels
    pub fn channels(&self) -> usize {
        match self {
            Self::R16Float | Self::R32Float => 1,
            Self::Rg16Float | Self::Rg32Float => 2,
            Self::Rgba8Unorm | Self::Rgba16Float | Self::Rgba32Float => 4,
        }
    }

    /// Bytes per channel
    pub fn channel_size(&self) -> usize {
        match self {
            Self::Rgba8Unorm => 1,
            Self::Rgba16Float | Self::R16Float | Self::Rg16Float => 2,
            Self::Rgba32Float | Self::R32Float | Self::Rg32Float => 4,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.channels() * self.channel_size()
    }

    /// 32-bit float formats, which need `FLOAT32_FILTERABLE` to be sampled with filtering
    pub fn is_float32(&self) -> bool {
        matches!(self, Self::Rgba32Float | Self::R32Float | Self::Rg32Float)
    }
}

impl FromStr for SurfaceFormat {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "rgba8" | "rgba8unorm" => Self::Rgba8Unorm,
            "rgba16f" | "rgba16float" => Self::Rgba16Float,
            "rgba32f" | "rgba32float" => Self::Rgba32Float,
            "r16f" | "r16float" => Self::R16Float,
            "r32f" | "r32float" => Self::R32Float,
            "rg16f" | "rg16float" => Self::Rg16Float,
            "rg32f" | "rg32float" => Self::Rg32Float,
            _ => return Err(ResourceError::UnsupportedFormat(s.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

/// Geometry issued by one draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// One invocation per pixel of the target
    FullSurface,
    /// `count` point sprites placed by the program's vertex stage
    Points(u32),
}

/// Pixel rectangle a draw is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The parts of a pass that decide which pipeline draws it
#[derive(Debug, Clone, Copy)]
pub struct PassShape<'a> {
    pub label: &'a str,
    pub program: &'a str,
    pub inputs: &'a [(String, SurfaceId)],
    pub outputs: &'a [SurfaceId],
    pub primitive: Primitive,
    pub blend: Option<BlendMode>,
}

/// Everything a backend needs to record one pass invocation
#[derive(Debug)]
pub struct DrawCall<'a> {
    /// Pass label, for debugging
    pub label: &'a str,
    pub program: &'a str,
    /// Program-local texture name and the surface bound to it
    ///
    /// Names the program declares but that are missing here are bound to a
    /// zero placeholder.
    pub inputs: &'a [(String, SurfaceId)],
    /// Color attachments in order
    pub outputs: &'a [SurfaceId],
    /// Packed uniform buffer
    pub uniforms: &'a [u8],
    /// Unpacked uniform values, for backends that bind by name
    pub values: &'a UniformValues,
    pub primitive: Primitive,
    pub blend: Option<BlendMode>,
    pub viewport: Option<Viewport>,
}

impl<'a> DrawCall<'a> {
    pub fn shape(&self) -> PassShape<'a> {
        PassShape {
            label: self.label,
            program: self.program,
            inputs: self.inputs,
            outputs: self.outputs,
            primitive: self.primitive,
            blend: self.blend,
        }
    }
}

/// A device able to execute effect passes
///
/// Work is ordered by call order: clears, draws and readbacks observe every
/// command issued before them.
pub trait Backend {
    fn name(&self) -> &str;

    /// Allocates a surface, zero-initialized
    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, ResourceError>;

    fn destroy_surface(&mut self, id: SurfaceId);

    /// Fills a surface with one value
    fn clear_surface(&mut self, id: SurfaceId, value: [f32; 4]) -> Result<(), ResourceError>;

    /// Uploads RGBA pixels, row-major from the top-left corner
    fn write_surface(&mut self, id: SurfaceId, pixels: &[[f32; 4]]) -> Result<(), ResourceError>;

    /// Prepares a program for drawing
    ///
    /// Compiling an already compiled program is a no-op.
    fn compile_program(&mut self, program: &CompiledProgram) -> Result<(), ProgramError>;

    /// Builds what a pass of this shape draws with and checks it against its surfaces
    ///
    /// The executor calls this for every pass before a frame records its first
    /// draw, so link and shape errors surface before any work is recorded.
    fn prepare_pass(&mut self, pass: &PassShape<'_>) -> Result<(), EffectError>;

    fn begin_frame(&mut self);

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), EffectError>;

    /// Submits everything recorded since [`Backend::begin_frame`]
    fn end_frame(&mut self);

    /// Drops everything recorded since [`Backend::begin_frame`] without submitting it
    fn abort_frame(&mut self);

    /// Reads a surface back as RGBA, blocking until prior work completes
    ///
    /// Channels the format does not store read as 0, alpha as 1.
    fn read_surface(&mut self, id: SurfaceId) -> Result<Vec<[f32; 4]>, ResourceError>;
}
