//! fxgraph load-time tooling
//!
//! This crate turns declarative effect definitions into validated
//! [`CompiledEffect`]s: it parses the definition, resolves every pass key to a
//! surface binding, pools transient textures by liveness, loads programs and
//! checks their uniform layouts against the reflected shader interface.
//! Nothing here touches the GPU.

mod compiled;

pub mod bundled;
pub mod definition;
pub mod graph;
pub mod reflect;
pub mod uniforms;

pub use compiled::{CompiledEffect, CompiledProgram, DEFAULT_FRAGMENT_ENTRY};
pub use definition::DefinitionError;

/// Loads an effect definition file and compiles it
///
/// Programs are read relative to the definition's directory.
///
/// # Arguments
/// * `definition_filepath` - Path to a YAML or JSON definition
///
/// # Returns
/// A compiled effect ready for instantiation
pub fn load_effect_file(definition_filepath: &str) -> Result<CompiledEffect, Box<dyn std::error::Error>> {
    CompiledEffect::from_file(definition_filepath).inspect_err(|e| {
        tracing::error!(path = definition_filepath, error = %e, "failed to load effect");
    })
}
