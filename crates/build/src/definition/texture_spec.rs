//! Texture descriptors and their sizing policies
//!
//! A dimension is written in a definition as a pixel count (`64`), a keyword
//! (`"screen"`), a percentage of the primary input (`"50%"`), a parameter-bound
//! object (`{param: volumeSize, power: 2}`) or a clamped scale
//! (`{scale: 0.25, clamp: {min: 8}}`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Default storage format of effect textures
pub const DEFAULT_FORMAT: &str = "rgba16f";

/// Fallback for a parameter-bound dimension whose parameter and default are both absent
const FALLBACK_PARAM_SIZE: f64 = 64.0;

/// Which extent of a surface a dimension is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

impl Axis {
    /// Picks this axis out of a `(width, height)` pair
    pub fn of(self, extent: (u32, u32)) -> u32 {
        match self {
            Self::Width => extent.0,
            Self::Height => extent.1,
        }
    }
}

/// Frame-time values a dimension may depend on
pub trait SizingInputs {
    /// Resolution of the effect's primary input
    fn screen(&self) -> (u32, u32);
    /// Current numeric value of a parameter
    fn param(&self, name: &str) -> Option<f64>;
    /// Extent of a connected upstream boundary surface, such as `inputTex3d`
    fn upstream_extent(&self, boundary: &str) -> Option<(u32, u32)>;
}

/// Parameter-bound dimension
///
/// The size is `param` (or `default`, or 64) times `multiply`, raised to
/// `power`. `power: 2` on the height of a `volumeSize`-wide texture yields the
/// `volumeSize x volumeSize^2` atlas of a flattened volume.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDimension {
    pub param: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiply: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<u32>,
    /// Boundary whose extent replaces the parameter when it is connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_override: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct DimensionClamp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

/// Input-relative dimension with an optional clamp
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScaleDimension {
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp: Option<DimensionClamp>,
}

/// Sizing policy of one texture axis
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Dimension {
    /// Fixed pixel count
    Pixels(u32),
    /// Same as the primary input
    #[default]
    Screen,
    /// Percentage of the primary input
    Percent(f64),
    Param(ParamDimension),
    Scale(ScaleDimension),
}

impl Dimension {
    /// Resolves this dimension to a pixel count of at least 1
    pub fn resolve(&self, axis: Axis, inputs: &impl SizingInputs) -> u32 {
        let screen = axis.of(inputs.screen()) as f64;
        let value = match self {
            Self::Pixels(px) => *px as f64,
            Self::Screen => screen,
            Self::Percent(pct) => screen * pct / 100.0,
            Self::Param(bound) => {
                if let Some(extent) = bound.input_override.as_deref().and_then(|boundary| inputs.upstream_extent(boundary)) {
                    return axis.of(extent).max(1);
                }
                let base = inputs.param(&bound.param).or(bound.default).unwrap_or(FALLBACK_PARAM_SIZE);
                let scaled = base * bound.multiply.unwrap_or(1.0);
                match bound.power {
                    Some(power) => scaled.powi(power as i32),
                    None => scaled,
                }
            }
            Self::Scale(scale) => {
                let mut scaled = (screen * scale.scale).floor();
                if let Some(clamp) = scale.clamp {
                    if let Some(min) = clamp.min {
                        scaled = scaled.max(min as f64);
                    }
                    if let Some(max) = clamp.max {
                        scaled = scaled.min(max as f64);
                    }
                }
                scaled
            }
        };
        (value.floor() as u32).max(1)
    }

    /// Parameter this dimension reads, if any
    pub fn bound_param(&self) -> Option<&str> {
        match self {
            Self::Param(bound) => Some(&bound.param),
            _ => None,
        }
    }
}

impl FromStr for Dimension {
    type Err = DimensionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "screen" | "auto" | "resolution" => Ok(Self::Screen),
            _ => {
                if let Some(pct) = s.strip_suffix('%') {
                    let pct = pct.trim().parse::<f64>().map_err(|_| DimensionParseError::InvalidPercent(s.to_string()))?;
                    if !pct.is_finite() || pct <= 0.0 {
                        return Err(DimensionParseError::InvalidPercent(s.to_string()));
                    }
                    Ok(Self::Percent(pct))
                } else {
                    s.parse::<u32>().map(Self::Pixels).map_err(|_| DimensionParseError::UnknownKeyword(s.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pixels(px) => write!(f, "{px}"),
            Self::Screen => write!(f, "screen"),
            Self::Percent(pct) => write!(f, "{pct}%"),
            Self::Param(bound) => match bound.power {
                Some(power) => write!(f, "{}^{power}", bound.param),
                None => write!(f, "{}", bound.param),
            },
            Self::Scale(scale) => write!(f, "x{}", scale.scale),
        }
    }
}

/// Error types for dimension keyword parsing
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionParseError {
    /// Not `screen`, `auto`, `resolution`, a percentage or a pixel count
    UnknownKeyword(String),
    /// A percentage that is not a positive number
    InvalidPercent(String),
}

impl fmt::Display for DimensionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKeyword(s) => write!(f, "Unknown dimension '{s}'"),
            Self::InvalidPercent(s) => write!(f, "Invalid percentage '{s}'"),
        }
    }
}

impl std::error::Error for DimensionParseError {}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawDimension {
            Number(f64),
            Keyword(String),
            Param(ParamDimension),
            Scale(ScaleDimension),
        }

        match RawDimension::deserialize(deserializer)? {
            RawDimension::Number(px) if px.is_finite() && px >= 0.0 => Ok(Self::Pixels(px.floor() as u32)),
            RawDimension::Number(px) => Err(serde::de::Error::custom(format!("invalid pixel size {px}"))),
            RawDimension::Keyword(keyword) => keyword.parse().map_err(serde::de::Error::custom),
            RawDimension::Param(bound) => Ok(Self::Param(bound)),
            RawDimension::Scale(scale) => Ok(Self::Scale(scale)),
        }
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Pixels(px) => serializer.serialize_u32(*px),
            Self::Screen | Self::Percent(_) => serializer.collect_str(self),
            Self::Param(bound) => bound.serialize(serializer),
            Self::Scale(scale) => scale.serialize(serializer),
        }
    }
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// Declared texture of an effect
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureDescriptor {
    #[serde(default)]
    pub width: Dimension,
    #[serde(default)]
    pub height: Dimension,
    #[serde(default = "default_format")]
    pub format: String,
    /// Double-buffered across frames
    #[serde(default)]
    pub persistent: bool,
    /// Initial condition applied on allocation reset and `resetState`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear: Option<[f32; 4]>,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            width: Dimension::Screen,
            height: Dimension::Screen,
            format: default_format(),
            persistent: false,
            clear: None,
        }
    }
}

impl TextureDescriptor {
    /// Screen-sized persistent texture in the default format
    pub fn persistent_screen() -> Self {
        Self { persistent: true, ..Self::default() }
    }

    /// Resolves both axes against the current frame
    pub fn extent(&self, inputs: &impl SizingInputs) -> (u32, u32) {
        (self.width.resolve(Axis::Width, inputs), self.height.resolve(Axis::Height, inputs))
    }

    pub fn clear_value(&self) -> [f32; 4] {
        self.clear.unwrap_or([0.0; 4])
    }

    /// Parameters whose value can change this texture's extent
    pub fn bound_params(&self) -> impl Iterator<Item = &str> {
        self.width.bound_param().into_iter().chain(self.height.bound_param())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Inputs {
        screen: (u32, u32),
        params: HashMap<&'static str, f64>,
        upstream: HashMap<&'static str, (u32, u32)>,
    }

    impl Inputs {
        fn screen(width: u32, height: u32) -> Self {
            Self {
                screen: (width, height),
                params: HashMap::new(),
                upstream: HashMap::new(),
            }
        }
    }

    impl SizingInputs for Inputs {
        fn screen(&self) -> (u32, u32) {
            self.screen
        }

        fn param(&self, name: &str) -> Option<f64> {
            self.params.get(name).copied()
        }

        fn upstream_extent(&self, boundary: &str) -> Option<(u32, u32)> {
            self.upstream.get(boundary).copied()
        }
    }

    #[test]
    fn test_keyword_parsing() {
        assert_eq!("screen".parse::<Dimension>().unwrap(), Dimension::Screen);
        assert_eq!("auto".parse::<Dimension>().unwrap(), Dimension::Screen);
        assert_eq!("25%".parse::<Dimension>().unwrap(), Dimension::Percent(25.0));
        assert_eq!("128".parse::<Dimension>().unwrap(), Dimension::Pixels(128));
        assert!("half".parse::<Dimension>().is_err());
        assert!("-5%".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_percentage_floors() {
        let inputs = Inputs::screen(1001, 333);
        assert_eq!(Dimension::Percent(50.0).resolve(Axis::Width, &inputs), 500);
        assert_eq!(Dimension::Percent(50.0).resolve(Axis::Height, &inputs), 166);
        assert_eq!(Dimension::Percent(0.01).resolve(Axis::Height, &inputs), 1);
    }

    #[test]
    fn test_volume_atlas_dimensions() {
        let yaml = r#"
width: {param: volumeSize, default: 32}
height: {param: volumeSize, default: 32, power: 2}
"#;
        let descriptor: TextureDescriptor = serde_norway::from_str(yaml).unwrap();
        let mut inputs = Inputs::screen(640, 480);
        inputs.params.insert("volumeSize", 32.0);
        assert_eq!(descriptor.extent(&inputs), (32, 1024));

        inputs.params.insert("volumeSize", 16.0);
        assert_eq!(descriptor.extent(&inputs), (16, 256));

        inputs.params.clear();
        assert_eq!(descriptor.extent(&inputs), (32, 1024));
        assert_eq!(descriptor.format, DEFAULT_FORMAT);
        assert!(!descriptor.persistent);
    }

    #[test]
    fn test_param_dimension_multiply_and_fallback() {
        let dim: Dimension = serde_json::from_str(r#"{"param": "cells", "multiply": 2}"#).unwrap();
        let mut inputs = Inputs::screen(100, 100);
        assert_eq!(dim.resolve(Axis::Width, &inputs), 128);
        inputs.params.insert("cells", 10.5);
        assert_eq!(dim.resolve(Axis::Width, &inputs), 21);
        inputs.params.insert("cells", -3.0);
        assert_eq!(dim.resolve(Axis::Width, &inputs), 1);
    }

    #[test]
    fn test_input_override_adopts_upstream_extent() {
        let dim: Dimension = serde_json::from_str(r#"{"param": "volumeSize", "power": 2, "inputOverride": "inputTex3d"}"#).unwrap();
        let mut inputs = Inputs::screen(640, 480);
        inputs.params.insert("volumeSize", 64.0);
        assert_eq!(dim.resolve(Axis::Height, &inputs), 4096);

        inputs.upstream.insert("inputTex3d", (16, 256));
        assert_eq!(dim.resolve(Axis::Height, &inputs), 256);
        assert_eq!(dim.resolve(Axis::Width, &inputs), 16);
    }

    #[test]
    fn test_scale_clamp() {
        let dim: Dimension = serde_json::from_str(r#"{"scale": 0.1, "clamp": {"min": 32, "max": 40}}"#).unwrap();
        assert_eq!(dim.resolve(Axis::Width, &Inputs::screen(100, 100)), 32);
        assert_eq!(dim.resolve(Axis::Width, &Inputs::screen(350, 100)), 35);
        assert_eq!(dim.resolve(Axis::Width, &Inputs::screen(4000, 100)), 40);
    }

    #[test]
    fn test_descriptor_serializes_keywords_as_strings() {
        let descriptor = TextureDescriptor {
            width: Dimension::Percent(50.0),
            height: Dimension::Pixels(1),
            ..TextureDescriptor::default()
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["width"], "50%");
        assert_eq!(json["height"], 1);
    }
}
