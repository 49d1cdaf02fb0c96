//! Effects embedded into the binary
//!
//! The build script validates every bundled definition and generates a table
//! holding each definition together with its program sources.

use crate::error::EffectError;
use fxgraph_wgpu_build::{CompiledEffect, DefinitionError};
use std::sync::Arc;

/// A definition and its program sources, embedded at build time
#[derive(Debug, Clone, Copy)]
pub struct BundledEffect {
    /// `<namespace>/<func>`
    pub id: &'static str,
    /// YAML definition
    pub definition: &'static str,
    /// Program file name and source
    pub programs: &'static [(&'static str, &'static str)],
}

include!(concat!(env!("OUT_DIR"), "/bundled.rs"));

impl BundledEffect {
    /// Compiles the embedded definition
    pub fn compile(&self) -> Result<CompiledEffect, DefinitionError> {
        CompiledEffect::from_yaml(self.definition, |file| {
            self.programs
                .iter()
                .find(|(name, _)| *name == file)
                .map(|(_, source)| source.to_string())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{file} is not bundled with {}", self.id)))
        })
    }
}

/// Looks up a bundled effect by id
pub fn find(id: &str) -> Option<&'static BundledEffect> {
    BUNDLED.iter().find(|effect| effect.id == id)
}

/// Ids of every bundled effect
pub fn ids() -> impl Iterator<Item = &'static str> {
    BUNDLED.iter().map(|effect| effect.id)
}

/// Compiles a bundled effect, ready to instantiate
pub fn load(id: &str) -> Result<Arc<CompiledEffect>, EffectError> {
    let effect = find(id).ok_or_else(|| DefinitionError::UnknownEffect(id.to_string()))?;
    Ok(Arc::new(effect.compile()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_bundled_effect_compiles() {
        assert!(!BUNDLED.is_empty());
        for bundled in BUNDLED {
            let effect = bundled.compile().unwrap_or_else(|e| panic!("{}: {e}", bundled.id));
            assert_eq!(effect.id(), bundled.id);
            for program in effect.programs.values() {
                assert!(program.compile_error.is_none(), "{}: {:?}", program.id, program.compile_error);
                assert!(program.interface.is_some());
            }
        }
    }

    #[test]
    fn test_unknown_effect() {
        assert!(find("filter/invert").is_some());
        assert!(matches!(load("filter/missing"), Err(EffectError::Definition(DefinitionError::UnknownEffect(_)))));
    }
}
