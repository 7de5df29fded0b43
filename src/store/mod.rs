// src/store/mod.rs
//! # Store
//! Long-lived coordination point between observers and the aggregator.
//!
//! - One slice per data domain, published as immutable snapshots.
//! - `subscribe` replays the current snapshot, then delivers every change in
//!   registration order.
//! - `refresh_data` runs every domain concurrently and publishes each domain
//!   as it settles. Overlapping calls share one in-flight cycle, except that a
//!   forced refresh never settles for a cached cycle and runs after it.
//! - Subscribers see snapshots strictly in version order, also with
//!   concurrent writers.
//! - A cycle only writes while it is the latest started one and has not been
//!   cancelled.
//!
//! Failures never escape: they end up in `StoreState::error` / `failures`.

pub mod state;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{self, panic_message, Aggregation, SortSpec};
use crate::bus::{EventBus, Observer, Subscription};
use crate::cache::TtlCache;
use crate::record::DEFAULT_KEY_FIELD;
use crate::source::{FetchParams, RecordSource};

pub use state::{DomainData, DomainFailure, Snapshot, StatePatch, StoreState};

/// A named slice of store state fed by one or more sources.
#[derive(Clone)]
pub struct Domain {
    pub name: String,
    pub sources: Vec<Arc<dyn RecordSource>>,
    pub params: FetchParams,
    pub key_field: String,
    pub sort: SortSpec,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            params: FetchParams::new(),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            sort: SortSpec::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn params(mut self, params: FetchParams) -> Self {
        self.params = params;
        self
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn cache_key(&self) -> String {
        format!("domain:{}", self.name)
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("Domain")
            .field("name", &self.name)
            .field("sources", &names)
            .field("key_field", &self.key_field)
            .field("sort", &self.sort)
            .finish()
    }
}

/// Read-only projection of one domain plus the global loading/error flags.
#[derive(Debug, Clone)]
pub struct DomainView {
    pub data: Option<DomainData>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub cycle: u64,
    /// Domains whose sources all answered.
    pub succeeded: Vec<String>,
    /// Domains with at least one failed source.
    pub failed: Vec<String>,
    /// Domains served from the cache without remote calls.
    pub from_cache: Vec<String>,
    pub cancelled: bool,
    /// Set when the cycle itself died before finishing.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    Cached,
    Force,
}

enum DomainOutcome {
    Cached(DomainData),
    Fetched(Aggregation),
    Cancelled,
}

struct InFlight {
    cycle: u64,
    mode: RefreshMode,
    token: CancellationToken,
    report: Shared<BoxFuture<'static, RefreshReport>>,
}

pub struct Store {
    domains: Vec<Arc<Domain>>,
    cache: Arc<TtlCache<DomainData>>,
    state: Mutex<Snapshot>,
    bus: EventBus<Snapshot>,
    cycle_seq: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    // ------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------

    /// Register `callback`, invoke it once right away with the current
    /// snapshot, then on every state change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.subscribe_observer(Arc::new(callback))
    }

    pub fn subscribe_observer(&self, observer: Arc<dyn Observer<Snapshot>>) -> Subscription {
        let sub = {
            let guard = self.lock_state();
            self.bus.subscribe_replay(observer, Arc::clone(&guard))
        };
        self.bus.drain();
        sub
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.len()
    }

    // ------------------------------------------------------------
    // State
    // ------------------------------------------------------------

    pub fn get_state(&self) -> Snapshot {
        Arc::clone(&self.lock_state())
    }

    /// Merge `patch` into a new snapshot, store it, and notify every
    /// subscriber with the full snapshot.
    ///
    /// Snapshots are queued for delivery in version order while the state lock
    /// is held. When another thread (or an enclosing callback) is already
    /// delivering, that delivery hands this snapshot over after the ones before it.
    pub fn set_state(&self, patch: StatePatch) -> Snapshot {
        let next = {
            let mut guard = self.lock_state();
            let next = Arc::new(guard.merged(patch));
            *guard = Arc::clone(&next);
            self.bus.enqueue(Arc::clone(&next));
            next
        };
        self.bus.drain();
        next
    }

    /// `set_state` gated on `cycle` still being the latest one started (and,
    /// with a token, not cancelled).
    fn set_state_for_cycle(
        &self,
        cycle: u64,
        token: Option<&CancellationToken>,
        patch: StatePatch,
    ) -> Option<Snapshot> {
        let next = {
            let mut guard = self.lock_state();
            let stale = self.cycle_seq.load(Ordering::SeqCst) != cycle;
            let cancelled = token.is_some_and(|t| t.is_cancelled());
            if stale || cancelled {
                tracing::debug!(target: "store", cycle, stale, cancelled, "dropping state write");
                return None;
            }
            let next = Arc::new(guard.merged(patch));
            *guard = Arc::clone(&next);
            self.bus.enqueue(Arc::clone(&next));
            next
        };
        self.bus.drain();
        Some(next)
    }

    pub fn domain_view(&self, domain: &str) -> DomainView {
        let s = self.get_state();
        DomainView {
            data: s.slice(domain).cloned(),
            is_loading: s.is_loading,
            error: s.error.clone(),
        }
    }

    pub fn domain_names(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|d| d.name.as_str())
    }

    pub fn cache(&self) -> &Arc<TtlCache<DomainData>> {
        &self.cache
    }

    // ------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------

    /// Run one refresh cycle, serving fresh cached domains without remote calls.
    /// Joins the in-flight cycle if one is running.
    pub async fn refresh_data(self: &Arc<Self>) -> RefreshReport {
        self.refresh(RefreshMode::Cached).await
    }

    /// Like `refresh_data` but evicts every domain's cache entry first.
    /// Joins an in-flight forced cycle; an in-flight cached cycle is awaited
    /// and followed by a forced one.
    pub async fn force_refresh(self: &Arc<Self>) -> RefreshReport {
        self.refresh(RefreshMode::Force).await
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_in_flight().is_some()
    }

    /// Cancel the in-flight cycle, if any. Its remaining results are discarded
    /// and the next `refresh_data` starts a new cycle.
    pub fn cancel_refresh(&self) -> bool {
        match self.lock_in_flight().take() {
            Some(flight) => {
                tracing::info!(target: "store", cycle = flight.cycle, "refresh cancelled");
                flight.token.cancel();
                true
            }
            None => false,
        }
    }

    async fn refresh(self: &Arc<Self>, mode: RefreshMode) -> RefreshReport {
        loop {
            let (report, chained) = {
                let mut slot = self.lock_in_flight();
                match slot.as_ref() {
                    Some(flight) => {
                        let chained =
                            mode == RefreshMode::Force && flight.mode == RefreshMode::Cached;
                        tracing::debug!(
                            target: "store",
                            cycle = flight.cycle,
                            chained,
                            "joining in-flight refresh"
                        );
                        (flight.report.clone(), chained)
                    }
                    None => {
                        let flight = self.start_cycle(mode);
                        let report = flight.report.clone();
                        *slot = Some(flight);
                        (report, false)
                    }
                }
            };

            let report = report.await;
            if !chained {
                return report;
            }
        }
    }

    /// Spawn a cycle. Called with the in-flight slot locked, so the task
    /// cannot clear the slot before it is recorded.
    fn start_cycle(self: &Arc<Self>, mode: RefreshMode) -> InFlight {
        let cycle = self.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let this = Arc::clone(self);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let run = AssertUnwindSafe(Arc::clone(&this).run_cycle(cycle, task_token, mode));
            match run.catch_unwind().await {
                Ok(report) => report,
                Err(payload) => this.abort_cycle(cycle, &panic_message(&*payload)),
            }
        });

        let this = Arc::clone(self);
        let report = async move {
            match handle.await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(target: "store", cycle, error = %e, "refresh task lost");
                    this.abort_cycle(cycle, &e.to_string())
                }
            }
        }
        .boxed()
        .shared();

        InFlight {
            cycle,
            mode,
            token,
            report,
        }
    }

    /// Recover from a cycle that died midway: free the single-flight slot and
    /// leave the store idle with the failure in `error`.
    fn abort_cycle(&self, cycle: u64, reason: &str) -> RefreshReport {
        tracing::error!(target: "store", cycle, reason, "refresh aborted");
        self.finish_in_flight(cycle);
        let message = format!("refresh aborted: {reason}");
        self.set_state_for_cycle(
            cycle,
            None,
            StatePatch::new().loading(false).error(Some(message.clone())),
        );
        RefreshReport {
            cycle,
            error: Some(message),
            ..RefreshReport::default()
        }
    }

    async fn run_cycle(
        self: Arc<Self>,
        cycle: u64,
        token: CancellationToken,
        mode: RefreshMode,
    ) -> RefreshReport {
        crate::telemetry::ensure_metrics_described();
        counter!("hub_refresh_cycles_total").increment(1);
        tracing::info!(target: "store", cycle, ?mode, domains = self.domains.len(), "refresh started");

        match mode {
            RefreshMode::Force => {
                for d in &self.domains {
                    self.cache.get(&d.cache_key(), true);
                }
            }
            RefreshMode::Cached => {
                self.cache.clear_expired();
            }
        }

        self.set_state_for_cycle(
            cycle,
            Some(&token),
            StatePatch::new()
                .loading(true)
                .error(None)
                .failures(Vec::new())
                .cycle(cycle),
        );

        let mut report = RefreshReport {
            cycle,
            ..RefreshReport::default()
        };

        let mut pending: FuturesUnordered<_> = self
            .domains
            .iter()
            .map(|d| {
                let token = &token;
                let this = &self;
                async move { (d, this.load_domain(d, mode, token).await) }
            })
            .collect();

        while let Some((domain, outcome)) = pending.next().await {
            match outcome {
                DomainOutcome::Cached(data) => {
                    tracing::debug!(target: "store", domain = %domain.name, "served from cache");
                    report.from_cache.push(domain.name.clone());
                    self.set_state_for_cycle(
                        cycle,
                        Some(&token),
                        StatePatch::new().slice(domain.name.clone(), data),
                    );
                }
                DomainOutcome::Fetched(agg) => {
                    self.apply_aggregation(cycle, &token, domain, agg, &mut report);
                }
                DomainOutcome::Cancelled => {
                    report.cancelled = true;
                }
            }
        }
        drop(pending);

        report.cancelled |= token.is_cancelled();
        let mut done = StatePatch::new().loading(false);
        if !report.cancelled {
            done = done.refreshed_at(Utc::now());
        }
        self.set_state_for_cycle(cycle, None, done);
        self.finish_in_flight(cycle);

        gauge!("hub_refresh_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "store",
            cycle,
            ok = report.succeeded.len(),
            failed = report.failed.len(),
            cached = report.from_cache.len(),
            cancelled = report.cancelled,
            "refresh finished"
        );
        report
    }

    async fn load_domain(
        &self,
        domain: &Domain,
        mode: RefreshMode,
        token: &CancellationToken,
    ) -> DomainOutcome {
        if mode == RefreshMode::Cached {
            if let Some(hit) = self.cache.get(&domain.cache_key(), false) {
                return DomainOutcome::Cached(hit);
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => DomainOutcome::Cancelled,
            agg = aggregate::combine(
                &domain.sources,
                &domain.params,
                &domain.key_field,
                &domain.sort,
                token,
            ) => DomainOutcome::Fetched(agg),
        }
    }

    fn apply_aggregation(
        &self,
        cycle: u64,
        token: &CancellationToken,
        domain: &Domain,
        agg: Aggregation,
        report: &mut RefreshReport,
    ) {
        let failures: Vec<DomainFailure> = agg
            .failures
            .iter()
            .map(|f| DomainFailure {
                domain: domain.name.clone(),
                source: f.source.clone(),
                reason: f.reason.clone(),
            })
            .collect();

        let mut patch = StatePatch::new();

        // A domain where every source failed keeps its previous slice.
        if !agg.all_failed() {
            let complete = agg.is_complete();
            let data: DomainData = Arc::new(agg.entities);
            if complete && !token.is_cancelled() {
                self.cache.set(domain.cache_key(), Arc::clone(&data));
            }
            patch = patch.slice(domain.name.clone(), data);
        }

        match failures.last() {
            Some(last) => {
                for f in &failures {
                    tracing::warn!(
                        target: "store",
                        domain = %f.domain,
                        source = %f.source,
                        reason = %f.reason,
                        "source failed"
                    );
                }
                patch = patch.error(Some(last.message())).push_failures(failures.clone());
                report.failed.push(domain.name.clone());
            }
            None => report.succeeded.push(domain.name.clone()),
        }

        self.set_state_for_cycle(cycle, Some(token), patch);
    }

    fn finish_in_flight(&self, cycle: u64) {
        let mut slot = self.lock_in_flight();
        if slot.as_ref().is_some_and(|f| f.cycle == cycle) {
            *slot = None;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Snapshot> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        match self.in_flight.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

#[derive(Default)]
pub struct StoreBuilder {
    domains: Vec<Domain>,
    cache: Option<Arc<TtlCache<DomainData>>>,
}

impl StoreBuilder {
    /// Add a domain. A later domain with the same name replaces the earlier one.
    pub fn domain(mut self, domain: Domain) -> Self {
        if let Some(pos) = self.domains.iter().position(|d| d.name == domain.name) {
            tracing::warn!(target: "store", domain = %domain.name, "duplicate domain replaced");
            self.domains[pos] = domain;
        } else {
            self.domains.push(domain);
        }
        self
    }

    /// Share an existing cache (e.g. with other stores or callers).
    pub fn cache(mut self, cache: Arc<TtlCache<DomainData>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Some(Arc::new(TtlCache::new(ttl)));
        self
    }

    pub fn build(self) -> Arc<Store> {
        let initial = StoreState::with_domains(self.domains.iter().map(|d| d.name.clone()));
        Arc::new(Store {
            domains: self.domains.into_iter().map(Arc::new).collect(),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(TtlCache::with_default_ttl())),
            state: Mutex::new(Arc::new(initial)),
            bus: EventBus::new(),
            cycle_seq: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        })
    }
}
