// src/source/mod.rs
pub mod fixture;
pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::record::RawRecord;

/// Query parameters handed to a source; caller values override adapter defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchParams(BTreeMap<String, String>);

impl FetchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `self` overlaid with `overrides`; keys in `overrides` win.
    pub fn merged(&self, overrides: &FetchParams) -> FetchParams {
        let mut out = self.0.clone();
        for (k, v) in &overrides.0 {
            out.insert(k.clone(), v.clone());
        }
        FetchParams(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub total_items: u64,
}

/// One page of records from a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub data: Vec<RawRecord>,
    pub pagination: Option<Pagination>,
}

impl FetchPage {
    pub fn from_records(data: Vec<RawRecord>) -> Self {
        Self {
            data,
            pagination: None,
        }
    }
}

/// Transport-level failure of a fetch adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}")]
    Status { status: u16 },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("source panicked: {0}")]
    Panicked(String),
    #[error("fetch cancelled")]
    Cancelled,
}

/// A remote (or local) provider of records for one data domain.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Stable name used as the key in `CombinedEntity::sources`.
    fn name(&self) -> &str;

    /// Fetch one page. Implementations should stop early when `cancel` fires.
    async fn fetch(
        &self,
        params: &FetchParams,
        cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError>;
}

/// Unwrap a provider response envelope into a page.
///
/// Accepts `{ "data": [...], "pagination": {...} }`, a bare array, or a single
/// object. A missing or `null` body is an empty page. `limit` is used when the
/// provider omits pagination.
pub fn parse_envelope(body: Value, limit: u64) -> Result<FetchPage, FetchError> {
    let (payload, pagination) = match body {
        Value::Object(mut map) if map.contains_key("data") => {
            let pagination = map
                .remove("pagination")
                .and_then(|p| serde_json::from_value::<Pagination>(p).ok());
            let data = map.remove("data").unwrap_or(Value::Null);
            (data, pagination)
        }
        other => (other, None),
    };

    let records: Vec<RawRecord> = match payload {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(RawRecord::new).collect(),
        obj @ Value::Object(_) => vec![RawRecord::new(obj)],
        scalar => {
            return Err(FetchError::Decode(format!(
                "expected array or object, got {scalar}"
            )))
        }
    };

    let pagination = pagination.unwrap_or(Pagination {
        has_next: false,
        limit,
        offset: 0,
        total_items: records.len() as u64,
    });

    Ok(FetchPage {
        data: records,
        pagination: Some(pagination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_merge_prefers_overrides() {
        let defaults = FetchParams::new().with("limit", 30).with("blockchain", "ethereum");
        let merged = defaults.merged(&FetchParams::new().with("limit", 100));
        assert_eq!(merged.get("limit"), Some("100"));
        assert_eq!(merged.get("blockchain"), Some("ethereum"));
    }

    #[test]
    fn envelope_with_data_and_pagination() {
        let body = json!({
            "data": [{"brand": "A"}, {"brand": "B"}],
            "pagination": {"has_next": true, "limit": 2, "offset": 0, "total_items": 10}
        });
        let page = parse_envelope(body, 30).unwrap();
        assert_eq!(page.data.len(), 2);
        let p = page.pagination.unwrap();
        assert!(p.has_next);
        assert_eq!(p.total_items, 10);
    }

    #[test]
    fn single_object_becomes_one_record_with_synthesized_pagination() {
        let page = parse_envelope(json!({"data": {"brand": "A"}}), 100).unwrap();
        assert_eq!(page.data.len(), 1);
        let p = page.pagination.unwrap();
        assert!(!p.has_next);
        assert_eq!(p.limit, 100);
        assert_eq!(p.total_items, 1);
    }

    #[test]
    fn bare_array_and_empty_body() {
        let page = parse_envelope(json!([{"brand": "A"}]), 30).unwrap();
        assert_eq!(page.data.len(), 1);
        let empty = parse_envelope(Value::Null, 30).unwrap();
        assert!(empty.data.is_empty());
        assert_eq!(empty.pagination.map(|p| p.total_items), Some(0));
        let no_data = parse_envelope(json!({"data": null}), 30).unwrap();
        assert!(no_data.data.is_empty());
        assert!(matches!(
            parse_envelope(json!("oops"), 30),
            Err(FetchError::Decode(_))
        ));
    }
}
