//! Order-preserving local-name to key mapping used by pass inputs and outputs

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Pass wiring table: shader-local name -> texture key
///
/// Declaration order is significant: for outputs it is the attachment order
/// of a multi-target pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingMap {
    entries: Vec<(String, String)>,
}

impl BindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the key bound to `local`
    pub fn insert(&mut self, local: impl Into<String>, key: impl Into<String>) {
        let local = local.into();
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == local) {
            Some(entry) => entry.1 = key,
            None => self.entries.push((local, key)),
        }
    }

    pub fn get(&self, local: &str) -> Option<&str> {
        self.entries.iter().find(|(name, _)| name == local).map(|(_, key)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(local, key)| (local.as_str(), key.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, key)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>, K: Into<String>> FromIterator<(L, K)> for BindingMap {
    fn from_iter<T: IntoIterator<Item = (L, K)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (local, key) in iter {
            map.insert(local, key);
        }
        map
    }
}

impl Serialize for BindingMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (local, key) in &self.entries {
            map.serialize_entry(local, key)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BindingMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BindingMapVisitor;

        impl<'de> Visitor<'de> for BindingMapVisitor {
            type Value = BindingMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map of local names to texture keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = BindingMap::new();
                while let Some((local, key)) = access.next_entry::<String, String>()? {
                    map.insert(local, key);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(BindingMapVisitor)
    }
}
