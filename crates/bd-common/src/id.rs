//! Entity identity types.
//!
//! An entity is an n-gram scoped to its hierarchy position. Input matrices
//! identify rows by the full [`EntityKey`]; the store assigns each key a
//! stable [`EntityId`]. The [`EntityIndex`] is built once per run so row
//! resolution is a hash lookup instead of a query per row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable store-assigned entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId(id)
    }
}

/// Natural key of an entity: n-gram text plus its hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub text: String,
    pub domain: String,
    pub field: String,
    pub subfield: String,
}

impl EntityKey {
    pub fn new(
        text: impl Into<String>,
        domain: impl Into<String>,
        field: impl Into<String>,
        subfield: impl Into<String>,
    ) -> Self {
        EntityKey {
            text: text.into(),
            domain: domain.into(),
            field: field.into(),
            subfield: subfield.into(),
        }
    }

    /// The (domain, field) pair rows are grouped by.
    pub fn group(&self) -> (&str, &str) {
        (&self.domain, &self.field)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} > {} > {}]",
            self.text, self.domain, self.field, self.subfield
        )
    }
}

/// Key-to-id lookup built once per run.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    ids: HashMap<EntityKey, EntityId>,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EntityKey, id: EntityId) -> Option<EntityId> {
        self.ids.insert(key, id)
    }

    pub fn resolve(&self, key: &EntityKey) -> Option<EntityId> {
        self.ids.get(key).copied()
    }

    /// Reverse lookup, linear in the index size.
    pub fn key_of(&self, id: EntityId) -> Option<&EntityKey> {
        self.ids.iter().find(|(_, v)| **v == id).map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<(EntityKey, EntityId)> for EntityIndex {
    fn from_iter<I: IntoIterator<Item = (EntityKey, EntityId)>>(iter: I) -> Self {
        EntityIndex {
            ids: iter.into_iter().collect(),
        }
    }
}
