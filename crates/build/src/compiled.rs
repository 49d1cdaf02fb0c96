//! Compiled effects
//!
//! A [`CompiledEffect`] bundles a normalized definition, its resolved pass
//! graph and the source plus reflected interface of every program it uses.
//! It is the unit the runtime instantiates.

use crate::definition::{DefinitionError, EffectDefinition};
use crate::graph::PassGraph;
use crate::reflect::{ProgramInterface, reflect_wgsl};
use crate::uniforms::UniformLayout;
use serde::Serialize;
use std::collections::BTreeMap;

/// Fragment entry point used when a program declares none
pub const DEFAULT_FRAGMENT_ENTRY: &str = "main";

/// A program ready to hand to a backend
#[derive(Debug, Clone, Serialize)]
pub struct CompiledProgram {
    pub id: String,
    /// Source file, relative to the definition
    pub file: String,
    pub source: String,
    /// `None` selects the built-in full-surface vertex stage
    pub vertex_entry: Option<String>,
    pub fragment_entry: String,
    /// Reflected interface, absent when the source does not compile
    pub interface: Option<ProgramInterface>,
    /// Compile error found at load, reported when a backend first uses the program
    pub compile_error: Option<String>,
    /// Register layout, absent for name-keyed binding
    pub layout: Option<UniformLayout>,
}

/// A validated effect with every program loaded
#[derive(Debug, Clone, Serialize)]
pub struct CompiledEffect {
    pub definition: EffectDefinition,
    pub graph: PassGraph,
    pub programs: BTreeMap<String, CompiledProgram>,
}

impl CompiledEffect {
    /// Resolves the pass graph and loads every program of `definition`
    ///
    /// # Arguments
    /// * `definition` - Normalized effect definition
    /// * `load_program_file` - Function loading a program source file by name
    ///
    /// # Returns
    /// The compiled effect, or the first definition error found
    pub fn compile(definition: EffectDefinition, load_program_file: impl Fn(&str) -> Result<String, std::io::Error>) -> Result<Self, DefinitionError> {
        let graph = PassGraph::build(&definition)?;
        definition.default_params()?;

        let mut programs = BTreeMap::new();
        for id in definition.program_ids() {
            let spec = definition.programs.get(id).cloned().unwrap_or_default();
            let file = spec.file.unwrap_or_else(|| format!("{id}.wgsl"));
            let source = load_program_file(&file).map_err(|e| DefinitionError::MissingProgramSource(id.to_string(), e.to_string()))?;

            let (interface, compile_error) = match reflect_wgsl(&source) {
                Ok(interface) => (Some(interface), None),
                Err(error) => {
                    tracing::debug!(program = id, %error, "program failed to compile at load");
                    (None, Some(error))
                }
            };

            let layout = definition.layout_for(id).cloned();
            let fragment_entry = spec.fragment_entry.unwrap_or_else(|| DEFAULT_FRAGMENT_ENTRY.to_string());
            if let Some(interface) = &interface {
                if let Some(layout) = &layout {
                    layout.validate(id, interface.uniform_block.as_ref())?;
                }
                if let Some(&targets) = interface.fragment_entries.get(&fragment_entry) {
                    for pass in graph.passes.iter().filter(|pass| pass.program == id) {
                        if targets as usize != pass.outputs.len() {
                            return Err(DefinitionError::ProgramTargetMismatch(pass.index, id.to_string(), targets, pass.outputs.len()));
                        }
                    }
                }
            }

            programs.insert(
                id.to_string(),
                CompiledProgram {
                    id: id.to_string(),
                    file,
                    source,
                    vertex_entry: spec.vertex_entry,
                    fragment_entry,
                    interface,
                    compile_error,
                    layout,
                },
            );
        }

        Ok(Self { definition, graph, programs })
    }

    /// Parses YAML content and compiles it
    pub fn from_yaml(content: &str, load_program_file: impl Fn(&str) -> Result<String, std::io::Error>) -> Result<Self, DefinitionError> {
        Self::compile(EffectDefinition::from_yaml(content)?, load_program_file)
    }

    /// Loads a definition file and compiles it, reading programs next to the file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or(std::path::Path::new(".")).to_path_buf();
        let definition = EffectDefinition::from_file(path)?;
        Ok(Self::compile(definition, |file| std::fs::read_to_string(dir.join(file)))?)
    }

    pub fn id(&self) -> String {
        self.definition.id()
    }

    pub fn program(&self, id: &str) -> Option<&CompiledProgram> {
        self.programs.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
func: tint
globals:
  amount: {type: float, default: 0.5}
uniformLayout:
  amount: {slot: 1, components: z}
  resolution: {slot: 0, components: xy}
passes:
  - program: tint
    inputs: {inputTex: inputTex}
    outputs: {color: outputTex}
"#;

    fn program(registers: u32) -> String {
        format!(
            r#"
struct Uniforms {{ data: array<vec4<f32>, {registers}> }}
@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var inputTex: texture_2d<f32>;

@fragment
fn main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {{
    return textureLoad(inputTex, vec2<i32>(position.xy), 0) * uniforms.data[0].z;
}}
"#
        )
    }

    #[test]
    fn test_compile_loads_and_reflects_programs() {
        let effect = CompiledEffect::from_yaml(DEFINITION, |file| {
            assert_eq!(file, "tint.wgsl");
            Ok(program(2))
        })
        .unwrap();
        let tint = effect.program("tint").unwrap();
        assert_eq!(tint.file, "tint.wgsl");
        assert_eq!(tint.fragment_entry, "main");
        assert!(tint.compile_error.is_none());
        assert!(tint.interface.as_ref().unwrap().texture("inputTex").is_some());
        assert_eq!(tint.layout.as_ref().map(|l| l.register_count()), Some(2));
    }

    #[test]
    fn test_layout_larger_than_block_is_rejected() {
        let err = CompiledEffect::from_yaml(DEFINITION, |_| Ok(program(1))).unwrap_err();
        assert!(matches!(err, DefinitionError::UniformLayoutMismatch(program, _) if program == "tint"));
    }

    #[test]
    fn test_compile_errors_are_deferred() {
        let effect = CompiledEffect::from_yaml(DEFINITION, |_| Ok("fn broken(".to_string())).unwrap();
        let tint = effect.program("tint").unwrap();
        assert!(tint.interface.is_none());
        assert!(tint.compile_error.is_some());
    }

    #[test]
    fn test_missing_source_is_a_definition_error() {
        let err = CompiledEffect::from_yaml(DEFINITION, |file| Err(std::io::Error::new(std::io::ErrorKind::NotFound, file.to_string()))).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingProgramSource(..)));
    }

    #[test]
    fn test_fragment_targets_must_match_outputs() {
        let yaml = "func: mrt\npasses:\n  - {program: split, drawBuffers: 2, outputs: {a: outputTex, b: geo}}\n";
        let source = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        let err = CompiledEffect::from_yaml(yaml, |_| Ok(source.to_string())).unwrap_err();
        assert_eq!(err, DefinitionError::ProgramTargetMismatch(0, "split".into(), 1, 2));
    }
}
