// src/telemetry.rs
//! Logging setup and one-time metric descriptions.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "HUB_LOG_JSON";
const DEFAULT_FILTER: &str = "brand_data_hub=info,warn";

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("hub_cache_hits_total", "Cache lookups answered from memory.");
        describe_counter!(
            "hub_cache_misses_total",
            "Cache lookups that required a fresh fetch."
        );
        describe_counter!(
            "hub_cache_evictions_total",
            "Entries evicted on expiry or forced refresh."
        );
        describe_counter!("hub_source_errors_total", "Source fetch failures.");
        describe_counter!(
            "hub_source_records_total",
            "Records received from remote sources."
        );
        describe_counter!(
            "hub_records_skipped_total",
            "Records dropped for lack of an identifying field."
        );
        describe_counter!("hub_refresh_cycles_total", "Refresh cycles started.");
        describe_histogram!("hub_source_fetch_ms", "Source fetch time in milliseconds.");
        describe_gauge!(
            "hub_refresh_last_run_ts",
            "Unix ts when a refresh cycle last finished."
        );
    });
}

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG` (default `brand_data_hub=info,warn`).
/// Set `HUB_LOG_JSON=1` for JSON lines instead of the compact format.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
