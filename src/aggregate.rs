// src/aggregate.rs
//! Multi-source fetch and join.
//!
//! Every source is fetched concurrently with settle-all semantics: one failing
//! source never aborts the others. Successful records are joined by their
//! normalized entity key, then the entity list is sorted by a `SortSpec`.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::record::{CombinedEntity, RawRecord};
use crate::source::{FetchError, FetchPage, FetchParams, RecordSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort direction '{other}'")),
        }
    }
}

/// What to sort combined entities by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// Display name, compared case-insensitively.
    Name,
    /// Numeric field of a record. With `source: None`, the first source (in
    /// name order) that carries the field is used.
    Field {
        source: Option<String>,
        field: String,
    },
}

impl FromStr for SortKey {
    type Err = String;

    /// `"name"`/`"brand"` → `Name`, `"metrics.total_volume"` → field of source
    /// `metrics`, `"total_volume"` → field of any source.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty sort key".to_string());
        }
        if s.eq_ignore_ascii_case("name") || s.eq_ignore_ascii_case("brand") {
            return Ok(Self::Name);
        }
        match s.split_once('.') {
            Some((source, field)) if !source.is_empty() && !field.is_empty() => Ok(Self::Field {
                source: Some(source.to_string()),
                field: field.to_string(),
            }),
            Some(_) => Err(format!("malformed sort key '{s}'")),
            None => Ok(Self::Field {
                source: None,
                field: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Name => f.write_str("name"),
            SortKey::Field {
                source: Some(src),
                field,
            } => write!(f, "{src}.{field}"),
            SortKey::Field {
                source: None,
                field,
            } => f.write_str(field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    pub fn by_name() -> Self {
        Self::new(SortKey::Name, SortDirection::Asc)
    }

    /// Parse `key` with `SortKey::from_str` and `direction` with `SortDirection::from_str`.
    pub fn parse(key: &str, direction: &str) -> Result<Self, String> {
        Ok(Self::new(key.parse()?, direction.parse()?))
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::by_name()
    }
}

/// A source that failed during one `combine` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Output of one aggregation run.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub entities: Vec<CombinedEntity>,
    pub failures: Vec<SourceFailure>,
    /// Records dropped for lack of a usable key.
    pub skipped: usize,
    /// Sources that answered successfully.
    pub succeeded: usize,
}

impl Aggregation {
    pub fn all_failed(&self) -> bool {
        self.succeeded == 0 && !self.failures.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetch from every source concurrently, join, and sort.
///
/// All fetch futures are created before any is awaited. Results are merged in
/// the order `sources` are listed, so the outcome does not depend on which
/// source answers first. A source that panics counts as a failed one.
pub async fn combine(
    sources: &[Arc<dyn RecordSource>],
    params: &FetchParams,
    key_field: &str,
    sort: &SortSpec,
    cancel: &CancellationToken,
) -> Aggregation {
    let fetches = sources.iter().map(|s| async move {
        let res = AssertUnwindSafe(s.fetch(params, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(FetchError::Panicked(panic_message(&*payload))));
        (s.name().to_string(), res)
    });
    let outcomes = join_all(fetches).await;

    let mut agg = merge_outcomes(outcomes, key_field);
    sort_entities(&mut agg.entities, sort);

    tracing::debug!(
        target: "aggregate",
        entities = agg.entities.len(),
        skipped = agg.skipped,
        failed = agg.failures.len(),
        "combine finished"
    );
    agg
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Join settled source outcomes into combined entities (unsorted, first-seen order).
pub fn merge_outcomes(
    outcomes: Vec<(String, Result<FetchPage, FetchError>)>,
    key_field: &str,
) -> Aggregation {
    let mut agg = Aggregation::default();
    let mut index: HashMap<crate::record::EntityKey, usize> = HashMap::new();

    for (source, outcome) in outcomes {
        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                counter!("hub_source_errors_total", "source" => source.clone()).increment(1);
                agg.failures.push(SourceFailure {
                    source,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        agg.succeeded += 1;

        for record in page.data {
            let (key, name) = match record.key(key_field) {
                Ok(key) => {
                    let name = record.display_key(key_field).unwrap_or_default().to_string();
                    (key, name)
                }
                Err(why) => {
                    tracing::debug!(target: "aggregate", %source, reason = %why, "skipping record");
                    agg.skipped += 1;
                    continue;
                }
            };

            let slot = *index.entry(key.clone()).or_insert_with(|| {
                agg.entities.push(CombinedEntity::new(key, name));
                agg.entities.len() - 1
            });
            agg.entities[slot].sources.insert(source.clone(), record);
        }
    }

    if agg.skipped > 0 {
        counter!("hub_records_skipped_total").increment(agg.skipped as u64);
    }
    agg
}

/// Stable sort of combined entities. Never panics on missing fields.
pub fn sort_entities(entities: &mut [CombinedEntity], spec: &SortSpec) {
    let ordered = |a: &CombinedEntity, b: &CombinedEntity| -> Ordering {
        match &spec.key {
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Field { source, field } => {
                let va = numeric_value(a, source.as_deref(), field);
                let vb = numeric_value(b, source.as_deref(), field);
                va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
            }
        }
    };
    match spec.direction {
        SortDirection::Asc => entities.sort_by(|a, b| ordered(a, b)),
        SortDirection::Desc => entities.sort_by(|a, b| ordered(b, a)),
    }
}

/// Field value coerced to `f64`; missing or non-numeric values count as `0`.
pub fn numeric_value(entity: &CombinedEntity, source: Option<&str>, field: &str) -> f64 {
    let value = match source {
        Some(src) => entity.source(src).and_then(|r| r.field(field)),
        None => entity.sources.values().find_map(|r| r.field(field)),
    };
    value.map(coerce_f64).unwrap_or(0.0)
}

fn coerce_f64(v: &Value) -> f64 {
    let n = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Convenience for callers holding plain records (e.g. tests, fixtures).
pub fn records(values: Vec<Value>) -> Vec<RawRecord> {
    values.into_iter().map(RawRecord::new).collect()
}
