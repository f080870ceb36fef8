//! Log event type
//!
//! An event is an open JSON object. The harvester seeds it with the raw
//! line plus provenance fields (`source`, `offset`); the publisher stamps
//! `host` just before the event goes on the wire. Everything else is
//! whatever configured fields the operator attached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single log event: a JSON object keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event from a harvested line
    pub fn from_line(source: impl Into<String>, offset: u64, line: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("source".into(), Value::String(source.into()));
        fields.insert("offset".into(), Value::Number(offset.into()));
        fields.insert("line".into(), Value::String(line.into()));
        Self { fields }
    }

    /// Set or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Stamp the local host name; overwrites any existing `host` field
    pub fn set_host(&mut self, hostname: &str) {
        self.fields
            .insert("host".into(), Value::String(hostname.into()));
    }

    /// The `source` field, if present and a string
    pub fn source(&self) -> Option<&str> {
        self.fields.get("source").and_then(Value::as_str)
    }

    /// The `offset` field, if present and numeric
    pub fn offset(&self) -> Option<u64> {
        self.fields.get("offset").and_then(Value::as_u64)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the event carries no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
