// src/source/fixture.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::source::{parse_envelope, FetchError, FetchPage, FetchParams, RecordSource};

/// Offline source that serves a fixed provider response.
/// Useful for tests and for running the dashboard without network access.
pub struct FixtureSource {
    name: String,
    body: Value,
}

impl FixtureSource {
    pub fn from_value(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    pub fn from_json_str(name: impl Into<String>, content: &str) -> Result<Self> {
        let name = name.into();
        let body: Value = serde_json::from_str(content)
            .with_context(|| format!("parsing fixture for source {name}"))?;
        Ok(Self { name, body })
    }
}

#[async_trait]
impl RecordSource for FixtureSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        params: &FetchParams,
        cancel: &CancellationToken,
    ) -> Result<FetchPage, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let limit = params
            .get("limit")
            .and_then(|l| l.parse::<u64>().ok())
            .unwrap_or(0);
        parse_envelope(self.body.clone(), limit)
    }
}
