//! Time-driven parameter values
//!
//! A parameter may hold an oscillator instead of a number. The oscillator is
//! evaluated every frame over the animation loop, so the value repeats
//! exactly once per loop (or `speed` times).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::f64::consts::{PI, TAU};

/// Loop length oscillators are normalized to when the host sets none, in seconds
pub const DEFAULT_ANIMATION_DURATION: f64 = 10.0;

/// Waveform of an oscillator, each producing values in `0..=1`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawShape", into = "u8")]
pub enum OscillatorShape {
    /// Half-cycle sine, 0 -> 1 -> 0
    #[default]
    Sine,
    /// Linear 0 -> 1 -> 0
    Tri,
    /// 0 -> 1
    Saw,
    /// 1 -> 0
    SawInv,
    /// 0 for the first half, 1 for the second
    Square,
    /// Value noise sampled along a circle, so it loops seamlessly
    Noise,
}

/// Shapes are written either by index (`oscType: 2`) or by name (`oscType: saw`)
#[derive(Deserialize)]
#[serde(untagged)]
enum RawShape {
    Index(u8),
    Name(String),
}

impl TryFrom<RawShape> for OscillatorShape {
    type Error = String;

    fn try_from(raw: RawShape) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawShape::Index(0) => Self::Sine,
            RawShape::Index(1) => Self::Tri,
            RawShape::Index(2) => Self::Saw,
            RawShape::Index(3) => Self::SawInv,
            RawShape::Index(4) => Self::Square,
            RawShape::Index(5) => Self::Noise,
            RawShape::Index(index) => return Err(format!("unknown oscillator type {index}")),
            RawShape::Name(name) => match name.as_str() {
                "sine" => Self::Sine,
                "tri" => Self::Tri,
                "saw" => Self::Saw,
                "sawInv" => Self::SawInv,
                "square" => Self::Square,
                "noise" => Self::Noise,
                _ => return Err(format!("unknown oscillator type '{name}'")),
            },
        })
    }
}

impl From<OscillatorShape> for u8 {
    fn from(shape: OscillatorShape) -> Self {
        shape as u8
    }
}

/// The `oscillator: true` tag that tells an oscillator apart from other maps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tag;

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match bool::deserialize(deserializer)? {
            true => Ok(Tag),
            false => Err(D::Error::custom("expected `oscillator: true`")),
        }
    }
}

fn one() -> f64 {
    1.0
}

/// A value that sweeps between `min` and `max` over the animation loop
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Oscillator {
    oscillator: Tag,
    #[serde(default)]
    pub osc_type: OscillatorShape,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "one")]
    pub max: f64,
    /// Whole cycles per loop
    #[serde(default = "one")]
    pub speed: f64,
    /// Phase offset in cycles
    #[serde(default)]
    pub offset: f64,
    /// Noise seed, only used by [`OscillatorShape::Noise`]
    #[serde(default)]
    pub seed: f64,
}

impl Oscillator {
    /// One cycle per loop from `min` to `max`
    pub fn new(osc_type: OscillatorShape, min: f64, max: f64) -> Self {
        Self {
            oscillator: Tag,
            osc_type,
            min,
            max,
            speed: 1.0,
            offset: 0.0,
            seed: 0.0,
        }
    }

    /// Value at `time` seconds into a loop of `duration` seconds
    pub fn at(&self, time: f64, duration: f64) -> f64 {
        let normalized = if duration > 0.0 { (time / duration).rem_euclid(1.0) } else { 0.0 };
        self.evaluate(normalized)
    }

    /// Value at a position `0..1` within the loop
    pub fn evaluate(&self, normalized: f64) -> f64 {
        let t = (normalized * self.speed + self.offset).rem_euclid(1.0);
        let unit = match self.osc_type {
            OscillatorShape::Sine => (t * PI).sin(),
            OscillatorShape::Tri => 1.0 - (t * 2.0 - 1.0).abs(),
            OscillatorShape::Saw => t,
            OscillatorShape::SawInv => 1.0 - t,
            OscillatorShape::Square => {
                if t >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            OscillatorShape::Noise => looping_noise(t, self.seed),
        };
        self.min + unit * (self.max - self.min)
    }
}

fn hash(x: f64, y: f64, seed: f64) -> f64 {
    let x = (x * 234.34 + seed).rem_euclid(1.0);
    let y = (y * 435.345 + seed).rem_euclid(1.0);
    let p = x + y + (x + y) * 34.23;
    (x * y * p).rem_euclid(1.0)
}

fn value_noise(x: f64, y: f64, seed: f64) -> f64 {
    let (ix, iy) = (x.floor(), y.floor());
    let smooth = |f: f64| f * f * (3.0 - 2.0 * f);
    let (fx, fy) = (smooth(x - ix), smooth(y - iy));

    let a = hash(ix, iy, seed);
    let b = hash(ix + 1.0, iy, seed);
    let c = hash(ix, iy + 1.0, seed);
    let d = hash(ix + 1.0, iy + 1.0, seed);
    a * (1.0 - fx) * (1.0 - fy) + b * fx * (1.0 - fy) + c * (1.0 - fx) * fy + d * fx * fy
}

fn looping_noise(t: f64, seed: f64) -> f64 {
    const RADIUS: f64 = 2.0;
    let angle = t * TAU;
    let (x, y) = (angle.cos() * RADIUS, angle.sin() * RADIUS);
    let first = value_noise(x + seed, y + seed, seed);
    let second = value_noise(x + seed * 2.0, y + seed * 2.0, seed);
    (first + second) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_shapes() {
        let sine = Oscillator::new(OscillatorShape::Sine, 0.0, 1.0);
        assert!(close(sine.evaluate(0.0), 0.0));
        assert!(close(sine.evaluate(0.5), 1.0));

        let tri = Oscillator::new(OscillatorShape::Tri, 0.0, 1.0);
        assert!(close(tri.evaluate(0.25), 0.5));
        assert!(close(tri.evaluate(0.5), 1.0));
        assert!(close(tri.evaluate(0.75), 0.5));

        let saw = Oscillator::new(OscillatorShape::Saw, 10.0, 20.0);
        assert!(close(saw.evaluate(0.25), 12.5));
        let saw_inv = Oscillator::new(OscillatorShape::SawInv, 10.0, 20.0);
        assert!(close(saw_inv.evaluate(0.25), 17.5));

        let square = Oscillator::new(OscillatorShape::Square, -1.0, 1.0);
        assert_eq!(square.evaluate(0.49), -1.0);
        assert_eq!(square.evaluate(0.5), 1.0);
    }

    #[test]
    fn test_speed_offset_and_loop() {
        let mut saw = Oscillator::new(OscillatorShape::Saw, 0.0, 1.0);
        saw.speed = 2.0;
        saw.offset = 0.25;
        assert!(close(saw.evaluate(0.25), 0.75));
        assert!(close(saw.evaluate(0.5), 0.25));

        // Time wraps around the loop
        let saw = Oscillator::new(OscillatorShape::Saw, 0.0, 1.0);
        assert!(close(saw.at(2.5, 10.0), 0.25));
        assert!(close(saw.at(12.5, 10.0), 0.25));
        assert_eq!(saw.at(3.0, 0.0), 0.0);
    }

    #[test]
    fn test_noise_loops_and_stays_in_range() {
        let mut noise = Oscillator::new(OscillatorShape::Noise, 0.0, 1.0);
        noise.seed = 3.0;
        assert!(close(noise.evaluate(0.0), noise.evaluate(1.0)));
        for step in 0..100 {
            let value = noise.evaluate(step as f64 / 100.0);
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn test_parsing() {
        let osc: Oscillator = serde_norway::from_str("oscillator: true\noscType: 2\nmin: 1\nmax: 3\n").unwrap();
        assert_eq!(osc.osc_type, OscillatorShape::Saw);
        assert_eq!((osc.min, osc.max, osc.speed), (1.0, 3.0, 1.0));

        let osc: Oscillator = serde_norway::from_str("oscillator: true\noscType: sawInv\n").unwrap();
        assert_eq!(osc.osc_type, OscillatorShape::SawInv);

        assert!(serde_norway::from_str::<Oscillator>("oscillator: false\n").is_err());
        assert!(serde_norway::from_str::<Oscillator>("oscillator: true\noscType: 9\n").is_err());
        assert_eq!(serde_json::to_value(&osc).unwrap()["oscillator"], serde_json::Value::Bool(true));
    }
}
