// src/lib.rs
// Public library surface for the dashboard shell and integration tests.

pub mod aggregate;
pub mod bus;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod record;
pub mod source;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{combine, Aggregation, SortDirection, SortKey, SortSpec};
pub use crate::bus::{EventBus, Observer, Subscription};
pub use crate::cache::TtlCache;
pub use crate::config::HubConfig;
pub use crate::record::{CombinedEntity, EntityKey, MalformedRecord, RawRecord};
pub use crate::source::{FetchError, FetchPage, FetchParams, RecordSource};
pub use crate::store::{
    Domain, DomainView, RefreshReport, Snapshot, StatePatch, Store, StoreState,
};

use tracing::info;

/// Load configuration from the default locations and build the catalog store.
///
/// Example usage inside a dashboard shell:
/// ```ignore
/// let store = brand_data_hub::bootstrap()?;
/// let sub = store.subscribe(|s| render(s));
/// store.refresh_data().await;
/// ```
pub fn bootstrap() -> anyhow::Result<std::sync::Arc<Store>> {
    let cfg = HubConfig::load_default()?;
    let store = catalog::build_store(&cfg)?;
    info!(
        base_url = %cfg.api.base_url,
        ttl_secs = cfg.cache.ttl_secs,
        domains = store.domain_names().count(),
        "store ready"
    );
    Ok(store)
}
