//! Effect definition records
//!
//! This module parses the declarative description of an effect (parameters,
//! passes, textures and uniform layouts) from YAML or JSON and normalizes the
//! legacy naming conventions once, at load time.

use super::{BindingMap, DefinitionError, ParamSpec, ParamValue, TextureDescriptor};
use crate::uniforms::UniformLayout;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Point count used by `points` passes that declare none
pub const DEFAULT_POINT_COUNT: u32 = 1000;

/// Keys that were double-buffered by naming convention alone
static LEGACY_PERSISTENT_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^global(_|[A-Z0-9])").expect("valid regex"));

/// How a pass rasterizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum DrawModeSpec {
    /// One invocation per pixel of the bound outputs
    #[default]
    #[serde(rename = "triangles", alias = "fullscreen")]
    FullSurface,
    /// `count` point sprites positioned by the vertex stage
    #[serde(rename = "points")]
    Points,
}

/// Number of points drawn by a `points` pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointCount {
    Fixed(u32),
    /// One point per pixel of the primary input (`"auto"`, `"screen"`, `"input"`)
    InputPixels,
    /// Parameter holding the count
    Param(String),
}

impl Serialize for PointCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(count) => serializer.serialize_u32(*count),
            Self::InputPixels => serializer.serialize_str("input"),
            Self::Param(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for PointCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCount {
            Fixed(u32),
            Named(String),
        }

        Ok(match RawCount::deserialize(deserializer)? {
            RawCount::Fixed(count) => Self::Fixed(count),
            RawCount::Named(name) => match name.as_str() {
                "auto" | "screen" | "input" => Self::InputPixels,
                _ => Self::Param(name),
            },
        })
    }
}

/// Blending of a pass's output with the existing contents
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BlendSpec {
    /// `true` enables additive blending
    Enabled(bool),
    /// `[src, dst]` factor names, e.g. `[SRC_ALPHA, ONE_MINUS_SRC_ALPHA]`
    Factors([String; 2]),
}

/// Iteration count of a repeated pass
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RepeatSpec {
    Count(u32),
    Param(String),
}

/// Rendered sub-region of a pass's outputs
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ViewportSpec {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub width: super::Dimension,
    pub height: super::Dimension,
}

/// A single program invocation in the effect
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSpec {
    #[serde(default)]
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub inputs: BindingMap,
    #[serde(default)]
    pub outputs: BindingMap,
    #[serde(default)]
    pub draw_mode: DrawModeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<PointCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend: Option<BlendSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_buffers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<ViewportSpec>,
    /// Pass-local uniform aliases: uniform name -> parameter name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uniforms: BTreeMap<String, String>,
}

impl PassSpec {
    /// Label used in logs and errors
    pub fn label(&self, index: usize) -> String {
        if self.name.is_empty() { format!("pass {index} ({})", self.program) } else { self.name.clone() }
    }
}

/// Where a program's source comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSpec {
    /// Source file relative to the definition, `<program>.wgsl` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Vertex entry point; the built-in full-surface stage is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_entry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_entry: Option<String>,
}

/// Immutable description of one effect
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub func: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub globals: BTreeMap<String, ParamSpec>,
    pub passes: Vec<PassSpec>,
    #[serde(default)]
    pub textures: BTreeMap<String, TextureDescriptor>,
    /// Layout shared by every program without an entry in `uniform_layouts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_layout: Option<UniformLayout>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uniform_layouts: BTreeMap<String, UniformLayout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tex3d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_geo: Option<String>,
    /// Parameters whose change re-runs condition-gated passes; all globals when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_params: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub programs: BTreeMap<String, ProgramSpec>,
}

impl EffectDefinition {
    /// Parses and normalizes a definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self, DefinitionError> {
        let definition: Self = serde_norway::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        Ok(definition.normalized())
    }

    /// Parses and normalizes a definition from JSON content
    pub fn from_json(content: &str) -> Result<Self, DefinitionError> {
        let definition: Self = serde_json::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        Ok(definition.normalized())
    }

    /// Loads a definition file; `.json` files are read as JSON, everything else as YAML
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let definition = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_yaml(&content)?,
        };
        Ok(definition)
    }

    /// `namespace/func`, or just `func` without a namespace
    pub fn id(&self) -> String {
        if self.namespace.is_empty() { self.func.clone() } else { format!("{}/{}", self.namespace, self.func) }
    }

    /// Uniform layout applying to `program`, if any
    pub fn layout_for(&self, program: &str) -> Option<&UniformLayout> {
        self.uniform_layouts.get(program).or(self.uniform_layout.as_ref())
    }

    /// Program ids in first-use order
    pub fn program_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for pass in &self.passes {
            if !ids.contains(&pass.program.as_str()) {
                ids.push(&pass.program);
            }
        }
        ids
    }

    /// Default value of every global that declares one
    pub fn default_params(&self) -> Result<BTreeMap<String, ParamValue>, DefinitionError> {
        let mut values = BTreeMap::new();
        for (name, spec) in &self.globals {
            if let Some(value) = spec.default_value(name)? {
                values.insert(name.clone(), value);
            }
        }
        Ok(values)
    }

    /// Rewrites legacy `global`-prefixed keys into explicit persistent textures
    ///
    /// Declared textures whose key carries the prefix are flagged persistent.
    /// Undeclared prefixed keys referenced by passes or export aliases are
    /// declared as screen-sized persistent textures.
    fn normalized(mut self) -> Self {
        for (key, descriptor) in self.textures.iter_mut() {
            if !descriptor.persistent && LEGACY_PERSISTENT_KEY.is_match(key) {
                tracing::warn!(effect = %self.func, key = %key, "texture marked persistent by legacy 'global' prefix");
                descriptor.persistent = true;
            }
        }

        let referenced: Vec<String> = self
            .passes
            .iter()
            .flat_map(|pass| pass.inputs.keys().chain(pass.outputs.keys()))
            .chain(self.output_tex3d.as_deref())
            .chain(self.output_geo.as_deref())
            .filter(|key| LEGACY_PERSISTENT_KEY.is_match(key))
            .map(str::to_string)
            .collect();
        for key in referenced {
            if !self.textures.contains_key(&key) {
                tracing::warn!(effect = %self.func, key = %key, "declaring undeclared legacy 'global' key as a persistent texture");
                self.textures.insert(key, TextureDescriptor::persistent_screen());
            }
        }
        self
    }
}
