//! Uniform register layouts
//!
//! A layout places each named value into a slice of a 4-component register:
//!
//! ```yaml
//! uniformLayout:
//!   resolution: {slot: 0, components: xy}
//!   time:       {slot: 0, components: z}
//!   feed:       {slot: 1, components: x}
//! ```

use crate::definition::DefinitionError;
use crate::reflect::UniformBlock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Size of one register in bytes
pub const REGISTER_SIZE: usize = 16;
/// Size of one register component in bytes
pub const COMPONENT_SIZE: usize = 4;

/// A contiguous run of register components, e.g. `yz`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMask {
    /// Index of the first component (x = 0 ... w = 3)
    pub first: u8,
    pub count: u8,
}

impl ComponentMask {
    pub const XYZW: Self = Self { first: 0, count: 4 };

    /// Bit set of the covered components
    pub fn bits(&self) -> u8 {
        (((1u16 << self.count) - 1) << self.first) as u8
    }
}

impl FromStr for ComponentMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const NAMES: &str = "xyzw";
        let first = s.chars().next().and_then(|c| NAMES.find(c)).ok_or_else(|| format!("invalid component mask '{s}'"))?;
        if s.len() > NAMES.len() - first || !NAMES[first..].starts_with(s) {
            return Err(format!("component mask '{s}' must be a contiguous run of xyzw"));
        }
        Ok(Self {
            first: first as u8,
            count: s.len() as u8,
        })
    }
}

impl fmt::Display for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.first as usize;
        write!(f, "{}", &"xyzw"[start..start + self.count as usize])
    }
}

impl<'de> Deserialize<'de> for ComponentMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for ComponentMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn default_mask() -> ComponentMask {
    ComponentMask::XYZW
}

/// Placement of one named value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct UniformSlot {
    pub slot: u32,
    #[serde(default = "default_mask")]
    pub components: ComponentMask,
}

impl UniformSlot {
    /// Byte offset of the first component in the packed buffer
    pub fn byte_offset(&self) -> usize {
        self.slot as usize * REGISTER_SIZE + self.components.first as usize * COMPONENT_SIZE
    }
}

/// Uniform name -> register placement for one program
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UniformLayout(pub BTreeMap<String, UniformSlot>);

impl UniformLayout {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformSlot)> {
        self.0.iter().map(|(name, slot)| (name.as_str(), slot))
    }

    /// Number of registers spanned by the layout
    pub fn register_count(&self) -> u32 {
        self.0.values().map(|slot| slot.slot + 1).max().unwrap_or(0)
    }

    /// Packed buffer size in bytes
    pub fn byte_size(&self) -> usize {
        self.register_count() as usize * REGISTER_SIZE
    }

    /// Checks the layout against the uniform block the program declares
    ///
    /// # Arguments
    /// * `program` - Program id, for error messages
    /// * `block` - Reflected uniform block of the program, if it has one
    pub fn validate(&self, program: &str, block: Option<&UniformBlock>) -> Result<(), DefinitionError> {
        let mismatch = |reason: String| DefinitionError::UniformLayoutMismatch(program.to_string(), reason);

        let mut claimed: BTreeMap<u32, Vec<(&str, u8)>> = BTreeMap::new();
        for (name, slot) in self.iter() {
            let owners = claimed.entry(slot.slot).or_default();
            if let Some((other, _)) = owners.iter().find(|(_, bits)| bits & slot.components.bits() != 0) {
                return Err(DefinitionError::UniformOverlap(program.to_string(), other.to_string(), name.to_string()));
            }
            owners.push((name, slot.components.bits()));
        }

        let Some(block) = block else {
            return Err(mismatch("the program declares no uniform block".to_string()));
        };
        let Some(registers) = block.registers else {
            return Err(mismatch(format!("block '{}' is not an array of vec4<f32> registers", block.name)));
        };
        if self.register_count() > registers {
            return Err(mismatch(format!(
                "layout needs {} registers but block '{}' declares {registers}",
                self.register_count(),
                block.name
            )));
        }
        Ok(())
    }
}
