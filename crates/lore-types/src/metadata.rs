//! Structured per-entity metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::Space;
use crate::{Id, Timestamp, now};

/// Entity id under which global (entity-independent) metadata is stored.
pub const GLOBAL_ENTITY_ID: &str = "__global__";

fn default_spaces() -> Vec<Space> {
    vec![Space::Main]
}

/// A keyed property bag attached to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub entity_id: Id,
    pub entity_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default = "default_spaces")]
    pub spaces: Vec<Space>,
    #[serde(default = "now")]
    pub created_at: Timestamp,
    #[serde(default = "now")]
    pub updated_at: Timestamp,
}

impl EntityMetadata {
    pub fn new(entity_id: impl Into<Id>, entity_type: impl Into<String>) -> Self {
        let ts = now();
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            properties: BTreeMap::new(),
            spaces: default_spaces(),
            created_at: ts,
            updated_at: ts,
        }
    }

    /// Metadata record holding global properties.
    pub fn global() -> Self {
        Self::new(GLOBAL_ENTITY_ID, "global")
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_spaces(mut self, spaces: Vec<Space>) -> Self {
        self.spaces = spaces;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Set a property and stamp `updated_at`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
        self.updated_at = now();
    }

    /// Remove a property, stamping `updated_at` if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.properties.remove(key);
        if removed.is_some() {
            self.updated_at = now();
        }
        removed
    }

    /// Whether the metadata is visible in any of `spaces`. Empty filter matches.
    pub fn in_any_space(&self, spaces: &[Space]) -> bool {
        spaces.is_empty() || self.spaces.iter().any(|s| spaces.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_updates_timestamp() {
        let mut meta = EntityMetadata::new("user-1", "user");
        let before = meta.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        meta.set("name", "Ada");
        assert!(meta.updated_at > before);
        assert_eq!(meta.get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn test_remove_missing_key_keeps_timestamp() {
        let mut meta = EntityMetadata::new("user-1", "user");
        let before = meta.updated_at;
        assert!(meta.remove("missing").is_none());
        assert_eq!(meta.updated_at, before);
    }

    #[test]
    fn test_space_visibility() {
        let meta = EntityMetadata::new("u", "user").with_spaces(vec![Space::Personal]);
        assert!(meta.in_any_space(&[]));
        assert!(meta.in_any_space(&[Space::Personal]));
        assert!(!meta.in_any_space(&[Space::Main]));
    }

    #[test]
    fn test_deserialize_defaults() {
        let meta: EntityMetadata =
            serde_json::from_str(r#"{"entity_id": "e", "entity_type": "user"}"#).unwrap();
        assert_eq!(meta.spaces, vec![Space::Main]);
        assert!(meta.properties.is_empty());
    }
}
