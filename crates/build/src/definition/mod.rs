//! Declarative effect definitions
//!
//! Types in this module mirror the on-disk definition format. They are parsed
//! once at load and never mutated afterwards.

mod binding_map;
mod effect_spec;
mod error;
mod oscillator;
mod params;
mod texture_spec;

pub use binding_map::BindingMap;
pub use effect_spec::*;
pub use error::DefinitionError;
pub use oscillator::{DEFAULT_ANIMATION_DURATION, Oscillator, OscillatorShape};
pub use params::{ParamKind, ParamSpec, ParamValue};
pub use texture_spec::*;
