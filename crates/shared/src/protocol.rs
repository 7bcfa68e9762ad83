use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Item;

pub const DEFAULT_COLLECTION_PATH: &str = "inventory/public/items";

/// Logical namespace of the shared collection. Every identity reads and writes the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Self::default();
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CollectionPath {
    fn default() -> Self {
        Self(DEFAULT_COLLECTION_PATH.to_string())
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    #[default]
    ExpirationDate,
}

/// One delivery from a standing subscription: the full collection, or a delivery error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CollectionNotification {
    Snapshot(Vec<Item>),
    Error(String),
}
