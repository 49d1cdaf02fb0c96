//! Load-time validation errors
//!
//! Every inconsistency in an effect definition is reported through
//! [`DefinitionError`] before any GPU resource is touched.

use std::fmt;

/// Errors raised while loading, validating or binding an effect definition
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionError {
    /// The definition could not be deserialized
    Parse(String),
    /// `func` is empty
    EmptyFunc,
    /// The definition contains no passes
    NoPasses,
    /// A pass names no program (pass index)
    PassMissingProgram(usize),
    /// A pass writes nothing (pass index)
    PassMissingOutputs(usize),
    /// A key is neither declared, produced earlier, persistent nor a boundary (pass index, key)
    UnresolvedKey(usize, String),
    /// A pass writes to an upstream boundary input (pass index, key)
    BoundaryWrite(usize, String),
    /// A pass reads the final output instead of `selfTex` (pass index, key)
    OutputRead(usize, String),
    /// A pass reads and writes the same transient texture (pass index, key)
    ReadWriteHazard(usize, String),
    /// `drawBuffers` disagrees with the number of outputs (pass index, declared, actual)
    DrawBuffersMismatch(usize, u32, usize),
    /// A blend factor name is not recognized (pass index, factor)
    InvalidBlendFactor(usize, String),
    /// `repeat` or `count` names a parameter that is not declared (pass index, parameter)
    UnknownParameter(usize, String),
    /// `outputTex3d` / `outputGeo` names no texture (field, key)
    UnresolvedExport(&'static str, String),
    /// A texture descriptor is malformed (key, reason)
    InvalidTexture(String, String),
    /// A uniform layout does not fit the program's uniform block (program, reason)
    UniformLayoutMismatch(String, String),
    /// Two uniforms claim the same register components (program, first, second)
    UniformOverlap(String, String, String),
    /// A program's fragment stage writes a different number of targets than the pass binds (pass index, program, targets, outputs)
    ProgramTargetMismatch(usize, String, u32, usize),
    /// A parameter value is rejected by its declaration (parameter, reason)
    InvalidParameter(String, String),
    /// A program's source could not be loaded (program, reason)
    MissingProgramSource(String, String),
    /// No effect with this id is available
    UnknownEffect(String),
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(reason) => write!(f, "Failed to parse effect definition: {reason}"),
            Self::EmptyFunc => write!(f, "Effect func cannot be empty"),
            Self::NoPasses => write!(f, "Effect must have at least one pass"),
            Self::PassMissingProgram(pass) => write!(f, "Pass {pass} does not name a program"),
            Self::PassMissingOutputs(pass) => write!(f, "Pass {pass} is missing outputs"),
            Self::UnresolvedKey(pass, key) => {
                write!(f, "Key '{key}' in pass {pass} is not declared, produced by an earlier pass, persistent, or a boundary name")
            }
            Self::BoundaryWrite(pass, key) => write!(f, "Pass {pass} writes to boundary input '{key}'"),
            Self::OutputRead(pass, key) => write!(f, "Pass {pass} reads final output '{key}'; read 'selfTex' for feedback"),
            Self::ReadWriteHazard(pass, key) => write!(f, "Pass {pass} reads and writes transient texture '{key}'"),
            Self::DrawBuffersMismatch(pass, declared, actual) => {
                write!(f, "Pass {pass} declares drawBuffers {declared} but has {actual} outputs")
            }
            Self::InvalidBlendFactor(pass, factor) => write!(f, "Unknown blend factor '{factor}' in pass {pass}"),
            Self::UnknownParameter(pass, name) => write!(f, "Pass {pass} references undeclared parameter '{name}'"),
            Self::UnresolvedExport(field, key) => write!(f, "{field} names '{key}', which is not a texture of this effect"),
            Self::InvalidTexture(key, reason) => write!(f, "Texture '{key}' is invalid: {reason}"),
            Self::UniformLayoutMismatch(program, reason) => {
                write!(f, "Uniform layout of program '{program}' does not match its uniform block: {reason}")
            }
            Self::UniformOverlap(program, first, second) => {
                write!(f, "Uniforms '{first}' and '{second}' overlap in the layout of program '{program}'")
            }
            Self::ProgramTargetMismatch(pass, program, targets, outputs) => {
                write!(f, "Program '{program}' writes {targets} color targets but pass {pass} binds {outputs} outputs")
            }
            Self::InvalidParameter(name, reason) => write!(f, "Invalid value for parameter '{name}': {reason}"),
            Self::MissingProgramSource(program, reason) => write!(f, "Cannot load source of program '{program}': {reason}"),
            Self::UnknownEffect(id) => write!(f, "Unknown effect '{id}'"),
        }
    }
}

impl std::error::Error for DefinitionError {}
