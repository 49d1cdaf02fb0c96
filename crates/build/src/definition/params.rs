//! Parameter specifications and runtime values
//!
//! Only the type and range of a parameter matter to the engine; labels,
//! grouping and other presentation hints are ignored.

use super::DefinitionError;
use super::oscillator::Oscillator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Vec2,
    Vec3,
    Vec4,
    Color,
    /// One of the named `choices`
    #[serde(alias = "enum")]
    Member,
    #[serde(alias = "string")]
    Text,
    /// Presentation-only kinds (palettes, surface pickers, ...)
    #[serde(other)]
    Other,
}

/// Value of a parameter, uniform or hook override
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector(Vec<f64>),
    Text(String),
    /// Resolved to a number every frame, see [`ParamValue::resolve`]
    Oscillator(Oscillator),
}

impl ParamValue {
    /// Scalar view of the value; booleans map to 1 and 0
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Vector(v) => v.first().copied(),
            Self::Text(_) | Self::Oscillator(_) => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => !s.is_empty(),
            other => other.as_f64().is_some_and(|v| v != 0.0),
        }
    }

    /// Components written into a uniform register, as 32-bit floats
    pub fn components(&self) -> Vec<f32> {
        match self {
            Self::Vector(v) => v.iter().map(|&c| c as f32).collect(),
            Self::Text(_) | Self::Oscillator(_) => Vec::new(),
            scalar => scalar.as_f64().map(|v| vec![v as f32]).unwrap_or_default(),
        }
    }

    /// The value in effect at `time` seconds into a `duration`-second animation loop
    pub fn resolve(&self, time: f64, duration: f64) -> ParamValue {
        match self {
            Self::Oscillator(oscillator) => Self::Float(oscillator.at(time, duration)),
            other => other.clone(),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Oscillator> for ParamValue {
    fn from(value: Oscillator) -> Self {
        Self::Oscillator(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Declaration of one entry of an effect's `globals`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Choice label -> value, for `member` parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub choices: BTreeMap<String, serde_json::Value>,
    /// Uniform name the value is bound to, when it differs from the parameter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform: Option<String>,
}

impl ParamSpec {
    pub fn new(kind: ParamKind, default: impl Into<ParamValue>) -> Self {
        Self {
            kind,
            default: Some(default.into()),
            min: None,
            max: None,
            step: None,
            choices: BTreeMap::new(),
            uniform: None,
        }
    }

    /// Type-checks `value` against this spec and clamps numbers into range
    pub fn coerce(&self, name: &str, value: ParamValue) -> Result<ParamValue, DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidParameter(name.to_string(), reason);
        match (self.kind, value) {
            (ParamKind::Int, ParamValue::Int(i)) => Ok(ParamValue::Int(self.clamp(i as f64) as i64)),
            (ParamKind::Int, ParamValue::Float(f)) => Ok(ParamValue::Int(self.clamp(f.round()) as i64)),
            (ParamKind::Float, value @ (ParamValue::Int(_) | ParamValue::Float(_))) => {
                let v = value.as_f64().unwrap_or_default();
                Ok(ParamValue::Float(self.clamp(v)))
            }
            (ParamKind::Int | ParamKind::Float, value @ ParamValue::Oscillator(_)) => Ok(value),
            (ParamKind::Boolean, ParamValue::Bool(b)) => Ok(ParamValue::Bool(b)),
            (ParamKind::Boolean, ParamValue::Int(i)) => Ok(ParamValue::Bool(i != 0)),
            (kind @ (ParamKind::Vec2 | ParamKind::Vec3 | ParamKind::Vec4), ParamValue::Vector(v)) => {
                let expected = match kind {
                    ParamKind::Vec2 => 2,
                    ParamKind::Vec3 => 3,
                    _ => 4,
                };
                if v.len() != expected {
                    return Err(invalid(format!("expected {expected} components, got {}", v.len())));
                }
                Ok(ParamValue::Vector(v))
            }
            (ParamKind::Color, ParamValue::Vector(v)) if v.len() == 3 || v.len() == 4 => Ok(ParamValue::Vector(v)),
            (ParamKind::Color, ParamValue::Text(hex)) => parse_hex_color(&hex).map(ParamValue::Vector).ok_or_else(|| invalid(format!("'{hex}' is not a hex color"))),
            (ParamKind::Member, ParamValue::Text(label)) => self
                .choices
                .get(&label)
                .and_then(ParamValue::from_json)
                .ok_or_else(|| invalid(format!("'{label}' is not one of the choices"))),
            (ParamKind::Member, value @ (ParamValue::Int(_) | ParamValue::Float(_) | ParamValue::Bool(_))) => Ok(value),
            (ParamKind::Text, value @ ParamValue::Text(_)) => Ok(value),
            (ParamKind::Other, value) => Ok(value),
            (kind, value) => Err(invalid(format!("{value:?} does not match type {kind:?}"))),
        }
    }

    /// Default value after coercion, if one is declared
    pub fn default_value(&self, name: &str) -> Result<Option<ParamValue>, DefinitionError> {
        self.default.clone().map(|value| self.coerce(name, value)).transpose()
    }

    fn clamp(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}

fn parse_hex_color(hex: &str) -> Option<Vec<f64>> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok().map(|byte| byte as f64 / 255.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> ParamSpec {
        serde_norway::from_str(yaml).unwrap()
    }

    #[test]
    fn test_numeric_values_are_clamped() {
        let iterations = spec("type: int\ndefault: 8\nmin: 1\nmax: 32\n");
        assert_eq!(iterations.coerce("iterations", ParamValue::Int(100)).unwrap(), ParamValue::Int(32));
        assert_eq!(iterations.coerce("iterations", ParamValue::Float(0.2)).unwrap(), ParamValue::Int(1));

        let feed = spec("type: float\ndefault: 0.055\nmin: 0\nmax: 0.1\n");
        assert_eq!(feed.coerce("feed", ParamValue::Int(1)).unwrap(), ParamValue::Float(0.1));
        assert_eq!(feed.default_value("feed").unwrap(), Some(ParamValue::Float(0.055)));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let reset = spec("type: boolean\ndefault: false\n");
        assert_eq!(reset.coerce("resetState", ParamValue::Int(1)).unwrap(), ParamValue::Bool(true));
        let err = reset.coerce("resetState", ParamValue::Text("yes".into())).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidParameter(name, _) if name == "resetState"));

        let offset = spec("type: vec2\ndefault: [0, 0]\n");
        assert!(offset.coerce("offset", ParamValue::Vector(vec![1.0, 2.0, 3.0])).is_err());
    }

    #[test]
    fn test_member_choice_labels_map_to_values() {
        let mode = spec("type: member\ndefault: 1\nchoices:\n  linear: 0\n  smooth: 1\n");
        assert_eq!(mode.coerce("mode", ParamValue::Text("linear".into())).unwrap(), ParamValue::Int(0));
        assert!(mode.coerce("mode", ParamValue::Text("cubic".into())).is_err());
    }

    #[test]
    fn test_hex_color() {
        let tint = spec("type: color\ndefault: '#ff0000'\n");
        let value = tint.default_value("tint").unwrap().unwrap();
        assert_eq!(value.components(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_numeric_params_accept_oscillators() {
        let speed = spec("type: float\ndefault: {oscillator: true, oscType: tri, min: 0.5, max: 2}\nmin: 0\nmax: 4\n");
        let value = speed.default_value("speed").unwrap().unwrap();
        assert!(matches!(value, ParamValue::Oscillator(_)));
        assert_eq!(value.as_f64(), None);
        assert_eq!(value.resolve(5.0, 10.0), ParamValue::Float(2.0));
        assert_eq!(ParamValue::Int(3).resolve(5.0, 10.0), ParamValue::Int(3));

        let flag = spec("type: boolean\ndefault: false\n");
        assert!(flag.coerce("flag", value).is_err());
    }

    #[test]
    fn test_presentation_kinds_pass_through() {
        let palette = spec("type: palette\ndefault: sunset\nui: {control: dropdown}\n");
        assert_eq!(palette.kind, ParamKind::Other);
        assert_eq!(palette.default_value("palette").unwrap(), Some(ParamValue::Text("sunset".into())));
    }
}
