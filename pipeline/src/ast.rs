//! Program AST handed over by the front-end.
//!
//! Four mappings keyed by declaration id. Declaration order is significant
//! (routes dispatch first-match-wins; the first route seeds property scan
//! scope inference), so mappings keep document order instead of sorting.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered id → declaration mapping. Ids are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarations<T>(Vec<(String, T)>);

impl<T> Default for Declarations<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Declarations<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(id, decl)| (id.as_str(), decl))
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.0.iter().find(|(key, _)| key == id).map(|(_, decl)| decl)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert a declaration, replacing any existing one with the same id in place.
    pub fn insert(&mut self, id: impl Into<String>, decl: T) {
        let id = id.into();
        match self.0.iter_mut().find(|(key, _)| *key == id) {
            Some(slot) => slot.1 = decl,
            None => self.0.push((id, decl)),
        }
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for Declarations<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut decls = Self::default();
        for (id, decl) in iter {
            decls.insert(id, decl);
        }
        decls
    }
}

impl<T: Serialize> Serialize for Declarations<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, decl) in &self.0 {
            map.serialize_entry(id, decl)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Declarations<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Declarations<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of declaration id to declaration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, T)> = Vec::new();
                while let Some((id, decl)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(key, _)| *key == id) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate declaration id '{id}'"
                        )));
                    }
                    entries.push((id, decl));
                }
                Ok(Declarations(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Front-end output consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramAst {
    /// Model declarations. Opaque to the engine; item schema belongs to the provider.
    pub models: Declarations<Value>,
    /// Enum id → ordered value list.
    pub enums: Declarations<Vec<String>>,
    /// Property id → raw invariant text.
    pub properties: Declarations<String>,
    /// Route id → raw route declaration.
    pub routes: Declarations<String>,
}

impl ProgramAst {
    /// Enum lookup table for property resolution.
    pub fn enum_table(&self) -> HashMap<String, Vec<String>> {
        self.enums
            .iter()
            .map(|(id, values)| (id.to_string(), values.clone()))
            .collect()
    }
}
