//! Resource manifests: which keys a scene wants and where they come from.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::AssetResult;

/// How the fetched bytes of a resource are decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Text,
    Image,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub url: String,
    pub kind: ResourceKind,
}

/// Mapping of resource key to its source. Keys are unique; inserting a key
/// twice keeps the last entry.
///
/// The JSON form is an object of `{ "key": { "url": "...", "kind": "text" } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ResourceSpec>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>, kind: ResourceKind) {
        self.entries.insert(
            key.into(),
            ResourceSpec {
                url: url.into(),
                kind,
            },
        );
    }

    pub fn text(mut self, key: impl Into<String>, url: impl Into<String>) -> Self {
        self.insert(key, url, ResourceKind::Text);
        self
    }

    pub fn image(mut self, key: impl Into<String>, url: impl Into<String>) -> Self {
        self.insert(key, url, ResourceKind::Image);
        self
    }

    pub fn from_json(json: &str) -> AssetResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AssetResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn get(&self, key: &str) -> Option<&ResourceSpec> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceSpec)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
