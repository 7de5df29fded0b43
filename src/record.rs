// src/record.rs
//! Records as delivered by remote providers, the normalized entity key used to
//! join them, and the combined entity produced by aggregation.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default identifying field used by the brand endpoints.
pub const DEFAULT_KEY_FIELD: &str = "brand";

/// Why a record could not be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no identifying field")]
    MissingKey,
    #[error("identifying field is not a string")]
    NonStringKey,
    #[error("identifying field is blank")]
    BlankKey,
}

/// One loosely-structured record from a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Value);

impl RawRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Top-level field lookup; `None` for non-object records.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.as_object().and_then(|m| m.get(name))
    }

    /// Raw identifying text, trimmed. Fails the same way `key` does.
    pub fn display_key(&self, key_field: &str) -> Result<&str, MalformedRecord> {
        let obj = self.0.as_object().ok_or(MalformedRecord::NotAnObject)?;
        let raw = match obj.get(key_field) {
            None | Some(Value::Null) => return Err(MalformedRecord::MissingKey),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(MalformedRecord::NonStringKey),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MalformedRecord::BlankKey);
        }
        Ok(trimmed)
    }

    /// Normalized join key taken from `key_field`.
    pub fn key(&self, key_field: &str) -> Result<EntityKey, MalformedRecord> {
        self.display_key(key_field).map(EntityKey::normalize)
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Normalized identifier: trimmed, inner whitespace collapsed, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn normalize(raw: &str) -> Self {
        static RE_WS: OnceCell<Regex> = OnceCell::new();
        let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
        let collapsed = re_ws.replace_all(raw.trim(), " ");
        Self(collapsed.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records from every contributing source for one entity key.
///
/// At most one record is held per source; a later record from the same source
/// replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedEntity {
    pub key: EntityKey,
    /// Display text of the first record that created this entity.
    pub name: String,
    pub sources: BTreeMap<String, RawRecord>,
}

impl CombinedEntity {
    pub fn new(key: EntityKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            sources: BTreeMap::new(),
        }
    }

    pub fn source(&self, name: &str) -> Option<&RawRecord> {
        self.sources.get(name)
    }
}
