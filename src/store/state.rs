// src/store/state.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::CombinedEntity;

/// A domain's published entity list. Shared between snapshots.
pub type DomainData = Arc<Vec<CombinedEntity>>;

/// Immutable store snapshot. Each `set_state` produces a new one.
pub type Snapshot = Arc<StoreState>;

/// One failed source observed during the current refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainFailure {
    pub domain: String,
    pub source: String,
    pub reason: String,
}

impl DomainFailure {
    /// Human-readable form surfaced through `StoreState::error`.
    pub fn message(&self) -> String {
        format!("{}: {}: {}", self.domain, self.source, self.reason)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreState {
    /// One slice per domain; `None` until the domain is first fetched.
    pub slices: BTreeMap<String, Option<DomainData>>,
    pub is_loading: bool,
    /// Last failure observed. Earlier ones are kept in `failures`.
    pub error: Option<String>,
    pub failures: Vec<DomainFailure>,
    /// Bumped on every state change.
    pub version: u64,
    /// Sequence number of the refresh cycle that last wrote this snapshot.
    pub cycle: u64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Empty state with every domain slice present and `None`.
    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slices: domains.into_iter().map(|d| (d.into(), None)).collect(),
            ..Self::default()
        }
    }

    pub fn slice(&self, domain: &str) -> Option<&DomainData> {
        self.slices.get(domain).and_then(Option::as_ref)
    }

    /// Shallow merge: fields present in `patch` replace ours.
    pub(crate) fn merged(&self, patch: StatePatch) -> StoreState {
        let mut next = self.clone();
        for (domain, data) in patch.slices {
            next.slices.insert(domain, Some(data));
        }
        if let Some(v) = patch.is_loading {
            next.is_loading = v;
        }
        if let Some(e) = patch.error {
            next.error = e;
        }
        if let Some(f) = patch.failures {
            next.failures = f;
        }
        next.failures.extend(patch.push_failures);
        if let Some(c) = patch.cycle {
            next.cycle = c;
        }
        if let Some(t) = patch.last_refreshed_at {
            next.last_refreshed_at = Some(t);
        }
        next.version = self.version + 1;
        next
    }
}

/// Partial update for `Store::set_state`. Unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    slices: Vec<(String, DomainData)>,
    is_loading: Option<bool>,
    error: Option<Option<String>>,
    failures: Option<Vec<DomainFailure>>,
    push_failures: Vec<DomainFailure>,
    cycle: Option<u64>,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slice(mut self, domain: impl Into<String>, data: DomainData) -> Self {
        self.slices.push((domain.into(), data));
        self
    }

    pub fn loading(mut self, v: bool) -> Self {
        self.is_loading = Some(v);
        self
    }

    pub fn error(mut self, e: Option<String>) -> Self {
        self.error = Some(e);
        self
    }

    /// Replace the failure list.
    pub fn failures(mut self, f: Vec<DomainFailure>) -> Self {
        self.failures = Some(f);
        self
    }

    /// Append to the failure list.
    pub fn push_failures(mut self, f: impl IntoIterator<Item = DomainFailure>) -> Self {
        self.push_failures.extend(f);
        self
    }

    pub fn cycle(mut self, c: u64) -> Self {
        self.cycle = Some(c);
        self
    }

    pub fn refreshed_at(mut self, t: DateTime<Utc>) -> Self {
        self.last_refreshed_at = Some(t);
        self
    }
}
