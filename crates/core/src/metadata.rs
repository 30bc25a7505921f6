//! Structured, versioned metadata attached to movements and orders.
//!
//! Values keep their type through serialization (`{"type":"integer","value":3}`),
//! so a round trip never degrades a number or a timestamp into free text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Current metadata schema version.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    /// Fixed-point decimal: `minor / 10^scale`.
    Decimal { minor: i64, scale: u8 },
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: MetadataValue,
}

/// Ordered key/value list; keys are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    schema_version: u32,
    entries: Vec<MetadataEntry>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Insert or replace `key`. Keys must be non-blank.
    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) -> DomainResult<()> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::validation("metadata key cannot be empty"));
        }
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => existing.value = value,
            None => self.entries.push(MetadataEntry { key, value }),
        }
        Ok(())
    }

    /// Builder form of [`Metadata::insert`].
    pub fn with(mut self, key: impl Into<String>, value: MetadataValue) -> DomainResult<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        let idx = self.entries.iter().position(|e| e.key == key)?;
        Some(self.entries.remove(idx).value)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_key_in_place() {
        let mut m = Metadata::new();
        m.insert("channel", MetadataValue::Text("web".into())).unwrap();
        m.insert("priority", MetadataValue::Integer(1)).unwrap();
        m.insert("channel", MetadataValue::Text("pos".into())).unwrap();

        assert_eq!(m.entries().len(), 2);
        assert_eq!(m.entries()[0].key, "channel");
        assert_eq!(m.get("channel"), Some(&MetadataValue::Text("pos".into())));
    }

    #[test]
    fn blank_keys_are_rejected() {
        let err = Metadata::new()
            .with("  ", MetadataValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn values_keep_their_type_through_json() {
        let m = Metadata::new()
            .with("weight", MetadataValue::Decimal { minor: 1250, scale: 2 })
            .unwrap()
            .with("gift", MetadataValue::Bool(false))
            .unwrap();

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["entries"][0]["value"]["type"], "decimal");

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
