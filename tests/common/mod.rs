// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brand_data_hub::source::{FetchError, FetchPage, FetchParams, RecordSource};
use brand_data_hub::RawRecord;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Scripted source: optional delay, success or failure, call counter.
pub struct MockSource {
    name: String,
    records: Vec<Value>,
    delay: Duration,
    failing: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn ok(name: &str, records: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            records,
            delay: Duration::ZERO,
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str) -> Self {
        let s = Self::ok(name, Vec::new());
        s.failing.store(true, Ordering::SeqCst);
        s
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared switch to make the source fail on later calls.
    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn arc(self) -> Arc<dyn RecordSource> {
        Arc::new(self)
    }
}

#[async_trait]
impl RecordSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _params: &FetchParams,
        cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status { status: 503 });
        }
        Ok(FetchPage::from_records(
            self.records.iter().cloned().map(RawRecord::new).collect(),
        ))
    }
}

/// Never answers until cancelled.
pub struct StuckSource {
    pub calls: Arc<AtomicUsize>,
}

impl StuckSource {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RecordSource for StuckSource {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn fetch(
        &self,
        _params: &FetchParams,
        cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(FetchError::Cancelled)
    }
}

/// Panics on its first call, answers normally afterwards.
pub struct PanicOnceSource {
    name: String,
    records: Vec<Value>,
    pub calls: Arc<AtomicUsize>,
}

impl PanicOnceSource {
    pub fn new(name: &str, records: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            records,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RecordSource for PanicOnceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _params: &FetchParams,
        _cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("provider exploded");
        }
        Ok(FetchPage::from_records(
            self.records.iter().cloned().map(RawRecord::new).collect(),
        ))
    }
}
