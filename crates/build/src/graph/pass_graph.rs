//! Pass graph construction
//!
//! Resolves every input and output key of every pass to a typed surface
//! binding, once per definition. The result says *which* surface each key
//! denotes; the executor later turns bindings into concrete handles.

use super::physical_texture::{PhysicalTexture, TextureLifetime, assign_physical_textures};
use crate::definition::{BlendSpec, DEFAULT_POINT_COUNT, DefinitionError, DrawModeSpec, EffectDefinition, PassSpec, PointCount, RepeatSpec, TextureDescriptor, ViewportSpec};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Synonyms of the effect's final output
pub const OUTPUT_KEYS: [&str; 3] = ["outputTex", "outputColor", "fragColor"];

/// Surfaces supplied from outside the effect
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Boundary {
    /// Upstream 2D frame
    InputTex,
    /// Upstream volume atlas
    InputTex3d,
    /// Upstream normal/depth buffer
    InputGeo,
    /// This effect's own output from the previous frame
    SelfTex,
    /// CPU-refreshed texture supplied by the host (`imageTex`, `textTex`)
    Media(String),
}

impl Boundary {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "inputTex" => Some(Self::InputTex),
            "inputTex3d" => Some(Self::InputTex3d),
            "inputGeo" => Some(Self::InputGeo),
            "selfTex" => Some(Self::SelfTex),
            "imageTex" | "textTex" => Some(Self::Media(key.to_string())),
            _ => None,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::InputTex => "inputTex",
            Self::InputTex3d => "inputTex3d",
            Self::InputGeo => "inputGeo",
            Self::SelfTex => "selfTex",
            Self::Media(key) => key,
        }
    }
}

/// What a pass key denotes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SurfaceBinding {
    Boundary(Boundary),
    /// Pooled surface, valid only within the frame
    Transient { physical_id: u32 },
    /// Dedicated surface whose contents survive across frames
    Retained { key: String },
    /// Double-buffered surface pair
    Persistent { key: String },
    /// The effect's final output
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedBinding {
    /// Name the program uses for the texture
    pub local: String,
    /// Key as written in the definition
    pub key: String,
    pub surface: SurfaceBinding,
}

/// Blend factor of a blended pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
}

impl FromStr for BlendFactor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Ok(match normalized.as_str() {
            "zero" => Self::Zero,
            "one" => Self::One,
            "src" | "src-color" => Self::Src,
            "one-minus-src" | "one-minus-src-color" => Self::OneMinusSrc,
            "src-alpha" => Self::SrcAlpha,
            "one-minus-src-alpha" => Self::OneMinusSrcAlpha,
            "dst" | "dst-color" => Self::Dst,
            "one-minus-dst" | "one-minus-dst-color" => Self::OneMinusDst,
            "dst-alpha" => Self::DstAlpha,
            "one-minus-dst-alpha" => Self::OneMinusDstAlpha,
            _ => return Err(s.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlendMode {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendMode {
    pub const ADDITIVE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DrawMode {
    FullSurface,
    Points { count: PointCount },
}

/// A pass with every key resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPass {
    pub index: usize,
    pub label: String,
    pub program: String,
    pub inputs: Vec<ResolvedBinding>,
    /// Attachments in declaration order
    pub outputs: Vec<ResolvedBinding>,
    pub draw: DrawMode,
    pub blend: Option<BlendMode>,
    pub repeat: Option<RepeatSpec>,
    pub condition: Option<String>,
    pub viewport: Option<ViewportSpec>,
    /// Uniform name -> parameter name
    pub uniform_aliases: BTreeMap<String, String>,
}

/// Resolved execution plan of one effect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassGraph {
    pub passes: Vec<ResolvedPass>,
    /// Pooled transient surfaces
    pub physical_textures: Vec<PhysicalTexture>,
    /// Dedicated single surfaces
    pub retained: BTreeMap<String, TextureDescriptor>,
    /// Double-buffered surfaces
    pub persistent: BTreeMap<String, TextureDescriptor>,
    /// Some pass reads `selfTex`, so the final output is double-buffered
    pub uses_self_tex: bool,
    /// Some pass writes the final output
    pub writes_output: bool,
    pub output_tex3d: Option<SurfaceBinding>,
    pub output_geo: Option<SurfaceBinding>,
}

impl PassGraph {
    /// Resolves the passes of `definition`
    ///
    /// # Returns
    /// The pass graph, or the first inconsistency found in pass order
    pub fn build(definition: &EffectDefinition) -> Result<Self, DefinitionError> {
        GraphBuilder::new(definition)?.build()
    }

    /// Names of the boolean flags gating passes
    pub fn conditions(&self) -> BTreeSet<&str> {
        self.passes.iter().filter_map(|pass| pass.condition.as_deref()).collect()
    }
}

impl fmt::Display for SurfaceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boundary(boundary) => write!(f, "boundary {}", boundary.key()),
            Self::Transient { physical_id } => write!(f, "transient #{physical_id}"),
            Self::Retained { key } => write!(f, "retained {key}"),
            Self::Persistent { key } => write!(f, "persistent {key}"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Texture class decided before passes are walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyClass {
    Output,
    Boundary,
    Persistent,
    Retained,
    Transient,
}

struct GraphBuilder<'a> {
    definition: &'a EffectDefinition,
    persistent: BTreeSet<&'a str>,
    retained: BTreeSet<&'a str>,
}

impl<'a> GraphBuilder<'a> {
    fn new(definition: &'a EffectDefinition) -> Result<Self, DefinitionError> {
        if definition.func.is_empty() {
            return Err(DefinitionError::EmptyFunc);
        }
        if definition.passes.is_empty() {
            return Err(DefinitionError::NoPasses);
        }
        for key in definition.textures.keys() {
            if Boundary::from_key(key).is_some() || OUTPUT_KEYS.contains(&key.as_str()) {
                return Err(DefinitionError::InvalidTexture(key.clone(), "boundary names cannot be declared as textures".to_string()));
            }
        }

        let persistent: BTreeSet<&str> = definition.textures.iter().filter(|(_, d)| d.persistent).map(|(k, _)| k.as_str()).collect();

        // Gated outputs must keep their contents across skipped frames, exports are read downstream
        let mut retained: BTreeSet<&str> = definition
            .passes
            .iter()
            .filter(|pass| pass.condition.is_some())
            .flat_map(|pass| pass.outputs.keys())
            .chain(definition.output_tex3d.as_deref())
            .chain(definition.output_geo.as_deref())
            .collect();
        retained.retain(|key| !persistent.contains(key) && Boundary::from_key(key).is_none() && !OUTPUT_KEYS.contains(key));

        Ok(Self { definition, persistent, retained })
    }

    fn classify(&self, key: &str) -> KeyClass {
        if OUTPUT_KEYS.contains(&key) {
            KeyClass::Output
        } else if Boundary::from_key(key).is_some() {
            KeyClass::Boundary
        } else if self.persistent.contains(key) {
            KeyClass::Persistent
        } else if self.retained.contains(key) {
            KeyClass::Retained
        } else {
            KeyClass::Transient
        }
    }

    fn build(self) -> Result<PassGraph, DefinitionError> {
        let mut written: BTreeSet<&str> = BTreeSet::new();
        let mut lifetimes: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut passes = Vec::with_capacity(self.definition.passes.len());
        let mut uses_self_tex = false;
        let mut writes_output = false;

        for (index, pass) in self.definition.passes.iter().enumerate() {
            if pass.program.is_empty() {
                return Err(DefinitionError::PassMissingProgram(index));
            }
            if pass.outputs.is_empty() {
                return Err(DefinitionError::PassMissingOutputs(index));
            }
            if let Some(declared) = pass.draw_buffers {
                if declared as usize != pass.outputs.len() {
                    return Err(DefinitionError::DrawBuffersMismatch(index, declared, pass.outputs.len()));
                }
            }

            let mut inputs = Vec::with_capacity(pass.inputs.len());
            for (local, key) in pass.inputs.iter() {
                let surface = match self.classify(key) {
                    KeyClass::Output => return Err(DefinitionError::OutputRead(index, key.to_string())),
                    KeyClass::Boundary => {
                        let boundary = Boundary::from_key(key).ok_or_else(|| DefinitionError::UnresolvedKey(index, key.to_string()))?;
                        uses_self_tex |= boundary == Boundary::SelfTex;
                        SurfaceBinding::Boundary(boundary)
                    }
                    KeyClass::Persistent => SurfaceBinding::Persistent { key: key.to_string() },
                    KeyClass::Retained if written.contains(key) => SurfaceBinding::Retained { key: key.to_string() },
                    KeyClass::Transient if written.contains(key) => {
                        if let Some(range) = lifetimes.get_mut(key) {
                            range.1 = index;
                        }
                        SurfaceBinding::Transient { physical_id: 0 }
                    }
                    KeyClass::Retained | KeyClass::Transient => return Err(DefinitionError::UnresolvedKey(index, key.to_string())),
                };
                inputs.push(ResolvedBinding {
                    local: local.to_string(),
                    key: key.to_string(),
                    surface,
                });
            }

            let mut outputs = Vec::with_capacity(pass.outputs.len());
            for (local, key) in pass.outputs.iter() {
                let class = self.classify(key);
                let surface = match class {
                    KeyClass::Output => {
                        writes_output = true;
                        SurfaceBinding::Output
                    }
                    KeyClass::Boundary => return Err(DefinitionError::BoundaryWrite(index, key.to_string())),
                    KeyClass::Persistent => SurfaceBinding::Persistent { key: key.to_string() },
                    KeyClass::Retained | KeyClass::Transient => {
                        if pass.inputs.keys().any(|input| input == key) {
                            return Err(DefinitionError::ReadWriteHazard(index, key.to_string()));
                        }
                        written.insert(key);
                        if class == KeyClass::Retained {
                            SurfaceBinding::Retained { key: key.to_string() }
                        } else {
                            lifetimes.entry(key).and_modify(|range| range.1 = index).or_insert((index, index));
                            SurfaceBinding::Transient { physical_id: 0 }
                        }
                    }
                };
                outputs.push(ResolvedBinding {
                    local: local.to_string(),
                    key: key.to_string(),
                    surface,
                });
            }

            passes.push(ResolvedPass {
                index,
                label: pass.label(index),
                program: pass.program.clone(),
                inputs,
                outputs,
                draw: self.draw_mode(index, pass)?,
                blend: blend_mode(index, pass)?,
                repeat: self.repeat(index, pass)?,
                condition: pass.condition.clone(),
                viewport: pass.viewport.clone(),
                uniform_aliases: pass.uniforms.clone(),
            });
        }

        let mut texture_lifetimes: Vec<TextureLifetime> = lifetimes
            .iter()
            .map(|(key, (created_at, last_used_at))| TextureLifetime {
                logical_id: key.to_string(),
                descriptor: self.descriptor(key),
                created_at: *created_at,
                last_used_at: *last_used_at,
            })
            .collect();
        texture_lifetimes.sort_by_key(|lifetime| lifetime.created_at);
        let (physical_textures, assignments) = assign_physical_textures(&texture_lifetimes);

        for binding in passes.iter_mut().flat_map(|pass| pass.inputs.iter_mut().chain(pass.outputs.iter_mut())) {
            if let SurfaceBinding::Transient { physical_id } = &mut binding.surface {
                *physical_id = assignments[&binding.key];
            }
        }

        Ok(PassGraph {
            passes,
            physical_textures,
            retained: self.retained.iter().map(|key| (key.to_string(), self.descriptor(key))).collect(),
            persistent: self.persistent.iter().map(|key| (key.to_string(), self.descriptor(key))).collect(),
            uses_self_tex,
            writes_output,
            output_tex3d: self.export("outputTex3d", self.definition.output_tex3d.as_deref())?,
            output_geo: self.export("outputGeo", self.definition.output_geo.as_deref())?,
        })
    }

    /// Declared descriptor, or the implicit screen-sized default
    fn descriptor(&self, key: &str) -> TextureDescriptor {
        self.definition.textures.get(key).cloned().unwrap_or_default()
    }

    fn draw_mode(&self, index: usize, pass: &PassSpec) -> Result<DrawMode, DefinitionError> {
        match pass.draw_mode {
            DrawModeSpec::FullSurface => Ok(DrawMode::FullSurface),
            DrawModeSpec::Points => {
                let count = pass.count.clone().unwrap_or(PointCount::Fixed(DEFAULT_POINT_COUNT));
                if let PointCount::Param(name) = &count {
                    self.require_param(index, name)?;
                }
                Ok(DrawMode::Points { count })
            }
        }
    }

    fn repeat(&self, index: usize, pass: &PassSpec) -> Result<Option<RepeatSpec>, DefinitionError> {
        if let Some(RepeatSpec::Param(name)) = &pass.repeat {
            self.require_param(index, name)?;
        }
        Ok(pass.repeat.clone())
    }

    fn require_param(&self, index: usize, name: &str) -> Result<(), DefinitionError> {
        if self.definition.globals.contains_key(name) {
            Ok(())
        } else {
            Err(DefinitionError::UnknownParameter(index, name.to_string()))
        }
    }

    fn export(&self, field: &'static str, key: Option<&str>) -> Result<Option<SurfaceBinding>, DefinitionError> {
        let Some(key) = key else {
            return Ok(None);
        };
        match self.classify(key) {
            KeyClass::Persistent => Ok(Some(SurfaceBinding::Persistent { key: key.to_string() })),
            KeyClass::Retained if self.definition.textures.contains_key(key) || self.is_written(key) => Ok(Some(SurfaceBinding::Retained { key: key.to_string() })),
            KeyClass::Boundary => Boundary::from_key(key).map(SurfaceBinding::Boundary).map(Some).ok_or_else(|| DefinitionError::UnresolvedExport(field, key.to_string())),
            _ => Err(DefinitionError::UnresolvedExport(field, key.to_string())),
        }
    }

    fn is_written(&self, key: &str) -> bool {
        self.definition.passes.iter().any(|pass| pass.outputs.keys().any(|output| output == key))
    }
}

fn blend_mode(index: usize, pass: &PassSpec) -> Result<Option<BlendMode>, DefinitionError> {
    match &pass.blend {
        None | Some(BlendSpec::Enabled(false)) => Ok(None),
        Some(BlendSpec::Enabled(true)) => Ok(Some(BlendMode::ADDITIVE)),
        Some(BlendSpec::Factors([src, dst])) => {
            let parse = |name: &str| name.parse::<BlendFactor>().map_err(|factor| DefinitionError::InvalidBlendFactor(index, factor));
            Ok(Some(BlendMode { src: parse(src)?, dst: parse(dst)? }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(yaml: &str) -> Result<PassGraph, DefinitionError> {
        PassGraph::build(&EffectDefinition::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_boundaries_and_output_synonyms() {
        let graph = graph(
            r#"
func: mix
passes:
  - program: mix
    inputs: {a: inputTex, b: imageTex, c: selfTex}
    outputs: {color: fragColor}
"#,
        )
        .unwrap();
        let pass = &graph.passes[0];
        assert_eq!(pass.inputs[0].surface, SurfaceBinding::Boundary(Boundary::InputTex));
        assert_eq!(pass.inputs[1].surface, SurfaceBinding::Boundary(Boundary::Media("imageTex".into())));
        assert_eq!(pass.inputs[2].surface, SurfaceBinding::Boundary(Boundary::SelfTex));
        assert_eq!(pass.outputs[0].surface, SurfaceBinding::Output);
        assert!(graph.uses_self_tex);
        assert!(graph.writes_output);
        assert!(graph.physical_textures.is_empty());
    }

    #[test]
    fn test_unresolved_key_is_an_error() {
        let err = graph(
            r#"
func: broken
passes:
  - program: a
    inputs: {src: blurred}
    outputs: {color: outputTex}
"#,
        )
        .unwrap_err();
        assert_eq!(err, DefinitionError::UnresolvedKey(0, "blurred".into()));
    }

    #[test]
    fn test_read_before_write_is_an_error() {
        let err = graph(
            r#"
func: order
textures:
  tmp: {}
passes:
  - program: a
    inputs: {src: tmp}
    outputs: {color: outputTex}
  - program: b
    inputs: {src: inputTex}
    outputs: {color: tmp}
"#,
        )
        .unwrap_err();
        assert_eq!(err, DefinitionError::UnresolvedKey(0, "tmp".into()));
    }

    #[test]
    fn test_wiring_errors() {
        let boundary_write = graph("func: f\npasses:\n  - {program: a, outputs: {o: inputTex}}\n").unwrap_err();
        assert_eq!(boundary_write, DefinitionError::BoundaryWrite(0, "inputTex".into()));

        let output_read = graph("func: f\npasses:\n  - {program: a, inputs: {i: outputTex}, outputs: {o: outputColor}}\n").unwrap_err();
        assert_eq!(output_read, DefinitionError::OutputRead(0, "outputTex".into()));

        let hazard = graph("func: f\npasses:\n  - {program: a, outputs: {o: t}}\n  - {program: b, inputs: {i: t}, outputs: {o: t}}\n").unwrap_err();
        assert_eq!(hazard, DefinitionError::ReadWriteHazard(1, "t".into()));

        let mrt = graph("func: f\npasses:\n  - {program: a, drawBuffers: 2, outputs: {o: outputTex}}\n").unwrap_err();
        assert_eq!(mrt, DefinitionError::DrawBuffersMismatch(0, 2, 1));

        let blend = graph("func: f\npasses:\n  - {program: a, blend: [ONE, MOST], outputs: {o: outputTex}}\n").unwrap_err();
        assert_eq!(blend, DefinitionError::InvalidBlendFactor(0, "MOST".into()));

        let repeat = graph("func: f\npasses:\n  - {program: a, repeat: iterations, outputs: {o: outputTex}}\n").unwrap_err();
        assert_eq!(repeat, DefinitionError::UnknownParameter(0, "iterations".into()));

        let export = graph("func: f\noutputTex3d: volume\npasses:\n  - {program: a, outputs: {o: outputTex}}\n").unwrap_err();
        assert_eq!(export, DefinitionError::UnresolvedExport("outputTex3d", "volume".into()));

        let declared_boundary = graph("func: f\ntextures:\n  selfTex: {}\npasses:\n  - {program: a, outputs: {o: outputTex}}\n").unwrap_err();
        assert!(matches!(declared_boundary, DefinitionError::InvalidTexture(..)));
    }

    #[test]
    fn test_transients_are_pooled_and_persistent_pairs_separate() {
        let graph = graph(
            r#"
func: blur
globals:
  iterations: {type: int, default: 4}
textures:
  globalState: {format: rgba32f}
passes:
  - {program: down, inputs: {src: inputTex}, outputs: {o: a}}
  - {program: blur, inputs: {src: a}, outputs: {o: b}}
  - {program: blur, inputs: {src: b}, outputs: {o: c}}
  - {program: sim, repeat: iterations, inputs: {src: c, state: globalState}, outputs: {state: globalState}}
  - {program: show, inputs: {state: globalState}, outputs: {color: outputTex}}
"#,
        )
        .unwrap();
        // a dies at pass 1, so c reuses its surface
        assert_eq!(graph.physical_textures.len(), 2);
        assert_eq!(graph.passes[0].outputs[0].surface, SurfaceBinding::Transient { physical_id: 0 });
        assert_eq!(graph.passes[1].outputs[0].surface, SurfaceBinding::Transient { physical_id: 1 });
        assert_eq!(graph.passes[2].outputs[0].surface, SurfaceBinding::Transient { physical_id: 0 });
        assert_eq!(graph.passes[3].inputs[0].surface, SurfaceBinding::Transient { physical_id: 0 });
        assert_eq!(graph.passes[3].outputs[0].surface, SurfaceBinding::Persistent { key: "globalState".into() });
        assert_eq!(graph.passes[3].repeat, Some(RepeatSpec::Param("iterations".into())));
        assert_eq!(graph.persistent["globalState"].format, "rgba32f");
        assert!(!graph.uses_self_tex);
    }

    #[test]
    fn test_gated_and_exported_textures_are_retained() {
        let graph = graph(
            r#"
func: noise3d
globals:
  volumeSize: {type: int, default: 32}
textures:
  volumeCache:
    width: {param: volumeSize}
    height: {param: volumeSize, power: 2}
  geoBuffer: {}
outputTex3d: volumeCache
outputGeo: geoBuffer
passes:
  - {program: precompute, condition: needsPrecompute, outputs: {volume: volumeCache}}
  - {program: render, drawBuffers: 2, inputs: {volume: volumeCache}, outputs: {color: outputTex, geo: geoBuffer}}
"#,
        )
        .unwrap();
        assert!(graph.physical_textures.is_empty());
        assert!(graph.retained.contains_key("volumeCache"));
        assert!(graph.retained.contains_key("geoBuffer"));
        assert_eq!(graph.passes[1].outputs[1].surface, SurfaceBinding::Retained { key: "geoBuffer".into() });
        assert_eq!(graph.output_tex3d, Some(SurfaceBinding::Retained { key: "volumeCache".into() }));
        assert_eq!(graph.conditions().into_iter().collect::<Vec<_>>(), vec!["needsPrecompute"]);
    }

    #[test]
    fn test_points_defaults_and_blend_factors() {
        let graph = graph(
            r#"
func: deposit
passes:
  - {program: deposit, drawMode: points, blend: true, outputs: {trail: globalTrail}}
  - {program: splat, drawMode: points, count: auto, blend: [src_alpha, one-minus-src-alpha], outputs: {color: outputTex}}
"#,
        )
        .unwrap();
        assert_eq!(graph.passes[0].draw, DrawMode::Points { count: PointCount::Fixed(DEFAULT_POINT_COUNT) });
        assert_eq!(graph.passes[0].blend, Some(BlendMode::ADDITIVE));
        assert_eq!(graph.passes[1].draw, DrawMode::Points { count: PointCount::InputPixels });
        assert_eq!(
            graph.passes[1].blend,
            Some(BlendMode {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::OneMinusSrcAlpha
            })
        );
        assert!(graph.persistent.contains_key("globalTrail"));
    }
}
