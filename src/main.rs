//! brand-data-hub CLI entrypoint
//! Loads config, builds the catalog store, runs one refresh cycle and prints a
//! per-domain summary as JSON.
//!
//! Env: `HUB_CONFIG_PATH`, `NFT_API_KEY`, `RUST_LOG`, `HUB_LOG_JSON=1`,
//! `HUB_PRINT_METRICS=1`, `HUB_FORCE_REFRESH=1`.

use anyhow::{Context, Result};
use brand_data_hub::{catalog, metrics::Metrics, telemetry, HubConfig};
use serde::Serialize;

#[derive(Serialize)]
struct DomainSummary {
    domain: String,
    entities: Option<usize>,
    top: Vec<String>,
}

#[derive(Serialize)]
struct Summary {
    report: brand_data_hub::RefreshReport,
    error: Option<String>,
    domains: Vec<DomainSummary>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().is_some_and(|v| v == "1")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = HubConfig::load_default().context("loading hub config")?;
    let metrics = if env_flag("HUB_PRINT_METRICS") {
        Some(Metrics::init(cfg.cache.ttl_secs)?)
    } else {
        None
    };

    let store = catalog::build_store(&cfg).context("building store")?;

    let sub = store.subscribe(|s| {
        tracing::debug!(
            version = s.version,
            loading = s.is_loading,
            error = ?s.error,
            "state changed"
        );
    });

    let report = if env_flag("HUB_FORCE_REFRESH") {
        store.force_refresh().await
    } else {
        store.refresh_data().await
    };
    sub.unsubscribe();

    let state = store.get_state();
    let domains = store
        .domain_names()
        .map(|name| {
            let slice = state.slice(name);
            DomainSummary {
                domain: name.to_string(),
                entities: slice.map(|d| d.len()),
                top: slice
                    .map(|d| d.iter().take(5).map(|e| e.name.clone()).collect())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let summary = Summary {
        report,
        error: state.error.clone(),
        domains,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(m) = metrics {
        println!("{}", m.render());
    }
    Ok(())
}
