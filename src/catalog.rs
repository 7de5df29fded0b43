// src/catalog.rs
//! Domains served by the NFT brand provider and the store built from them.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{SortDirection, SortKey, SortSpec};
use crate::config::HubConfig;
use crate::source::http::{HttpSource, USER_AGENT};
use crate::source::{FetchError, FetchParams, RecordSource};
use crate::store::{Domain, DomainView, Store};

pub const BRAND_METRICS: &str = "brand_metrics";
pub const BRAND_PROFILE: &str = "brand_profile";
pub const BRAND_CONTRACT_PROFILE: &str = "brand_contract_profile";
pub const CONTRACT_METRICS: &str = "contract_metrics";
pub const BRAND_METADATA: &str = "brand_metadata";
pub const BRAND_CATEGORY: &str = "brand_category";
pub const BRAND_OVERVIEW: &str = "brand_overview";

/// Source names used inside the joined `brand_overview` entities.
pub const OVERVIEW_METADATA: &str = "metadata";
pub const OVERVIEW_METRICS: &str = "metrics";
pub const OVERVIEW_PROFILE: &str = "profile";

/// One provider endpoint and the query it is fetched with.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub domain: &'static str,
    pub path: &'static str,
    pub params: FetchParams,
}

/// The provider's brand endpoints with their default queries.
pub fn endpoints(cfg: &HubConfig) -> Vec<Endpoint> {
    let d = &cfg.defaults;
    let base = FetchParams::new()
        .with("blockchain", &d.blockchain)
        .with("offset", 0)
        .with("limit", d.limit);
    let timed = base.clone().with("time_range", &d.time_range);

    vec![
        Endpoint {
            domain: BRAND_METRICS,
            path: "brand/metrics",
            params: timed.clone().with("sort_by", "mint_tokens"),
        },
        Endpoint {
            domain: BRAND_PROFILE,
            path: "brand/profile",
            params: timed
                .clone()
                .with("limit", 100)
                .with("sort_by", "diamond_hands")
                .with("sort_order", "desc"),
        },
        Endpoint {
            domain: BRAND_CONTRACT_PROFILE,
            path: "brand/contract_profile",
            params: base.clone().with("limit", 100).with("sort_by", "diamond_hands"),
        },
        Endpoint {
            domain: CONTRACT_METRICS,
            path: "brand/contract_metrics",
            params: timed
                .clone()
                .with("limit", 100)
                .with("sort_by", "mint_tokens")
                .with("sort_order", "desc"),
        },
        Endpoint {
            domain: BRAND_METADATA,
            path: "brand/metadata",
            params: base.clone().with("limit", 100),
        },
        Endpoint {
            domain: BRAND_CATEGORY,
            path: "brand/category",
            params: base.with("limit", 100),
        },
    ]
}

/// Build the default store: one domain per endpoint plus the joined overview.
pub fn build_store(cfg: &HubConfig) -> Result<Arc<Store>, FetchError> {
    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(cfg.api.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.api.timeout_secs))
        .build()
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    let source = |name: &str, ep: &Endpoint| -> Arc<dyn RecordSource> {
        Arc::new(HttpSource::with_client(
            name,
            &cfg.api,
            ep.path,
            ep.params.clone(),
            http.clone(),
        ))
    };

    let eps = endpoints(cfg);
    let mut builder = Store::builder().cache_ttl(Duration::from_secs(cfg.cache.ttl_secs));
    for ep in &eps {
        builder = builder.domain(Domain::new(ep.domain).source(source(ep.domain, ep)));
    }

    let find = |domain: &str| eps.iter().find(|e| e.domain == domain);
    if let (Some(meta), Some(metrics), Some(profile)) =
        (find(BRAND_METADATA), find(BRAND_METRICS), find(BRAND_PROFILE))
    {
        let overview = Domain::new(BRAND_OVERVIEW)
            .source(source(OVERVIEW_METADATA, meta))
            .source(source(OVERVIEW_METRICS, metrics))
            .source(source(OVERVIEW_PROFILE, profile))
            .sort(overview_sort());
        builder = builder.domain(overview);
    }

    Ok(builder.build())
}

/// Overview ordering: metrics.total_volume, largest first.
pub fn overview_sort() -> SortSpec {
    SortSpec::new(
        SortKey::Field {
            source: Some(OVERVIEW_METRICS.to_string()),
            field: "total_volume".to_string(),
        },
        SortDirection::Desc,
    )
}

impl Store {
    pub fn brand_metrics(&self) -> DomainView {
        self.domain_view(BRAND_METRICS)
    }

    pub fn brand_profile(&self) -> DomainView {
        self.domain_view(BRAND_PROFILE)
    }

    pub fn brand_contract_profile(&self) -> DomainView {
        self.domain_view(BRAND_CONTRACT_PROFILE)
    }

    pub fn contract_metrics(&self) -> DomainView {
        self.domain_view(CONTRACT_METRICS)
    }

    pub fn brand_metadata(&self) -> DomainView {
        self.domain_view(BRAND_METADATA)
    }

    pub fn brand_category(&self) -> DomainView {
        self.domain_view(BRAND_CATEGORY)
    }

    pub fn brand_overview(&self) -> DomainView {
        self.domain_view(BRAND_OVERVIEW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_apply_config_defaults() {
        let mut cfg = HubConfig::default();
        cfg.defaults.blockchain = "polygon".into();
        let eps = endpoints(&cfg);
        assert_eq!(eps.len(), 6);
        assert!(eps.iter().all(|e| e.params.get("blockchain") == Some("polygon")));

        let metrics = eps.iter().find(|e| e.domain == BRAND_METRICS).unwrap();
        assert_eq!(metrics.params.get("limit"), Some("30"));
        assert_eq!(metrics.params.get("time_range"), Some("24h"));

        let category = eps.iter().find(|e| e.domain == BRAND_CATEGORY).unwrap();
        assert_eq!(category.params.get("limit"), Some("100"));
        assert_eq!(category.params.get("time_range"), None);
    }

    #[test]
    fn default_store_has_all_domains_empty() {
        let store = build_store(&HubConfig::default()).unwrap();
        let names: Vec<&str> = store.domain_names().collect();
        assert_eq!(names.len(), 7);
        assert!(names.contains(&BRAND_OVERVIEW));
        let view = store.brand_overview();
        assert!(view.data.is_none());
        assert!(!view.is_loading);
        assert!(view.error.is_none());
    }
}
