// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "HUB_CONFIG_PATH";
pub const ENV_API_KEY: &str = "NFT_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.unleashnfts.com/api/v2/nft";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    4
}
fn default_blockchain() -> String {
    "ethereum".to_string()
}
fn default_time_range() -> String {
    "24h".to_string()
}
fn default_limit() -> u32 {
    30
}
fn default_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from `NFT_API_KEY`.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Query defaults applied to every provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefaults {
    #[serde(default = "default_blockchain")]
    pub blockchain: String,
    #[serde(default = "default_time_range")]
    pub time_range: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            blockchain: default_blockchain(),
            time_range: default_time_range(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub defaults: QueryDefaults,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl HubConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading hub config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg: HubConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content).context("parsing hub config json")?,
            _ => toml::from_str(&content).context("parsing hub config toml")?,
        };
        cfg.resolve()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $HUB_CONFIG_PATH
    /// 2) config/hub.toml
    /// 3) config/hub.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in ["config/hub.toml", "config/hub.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
        }
        let mut cfg = Self::default();
        cfg.resolve()?;
        Ok(cfg)
    }

    /// Resolve indirections and sanitize values.
    fn resolve(&mut self) -> Result<()> {
        if self.api.api_key.trim().eq_ignore_ascii_case("env") {
            // missing key: requests go out unauthenticated and fail per domain
            self.api.api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
            if self.api.api_key.is_empty() {
                tracing::warn!("{ENV_API_KEY} is not set; provider requests will be unauthenticated");
            }
        }
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("api.base_url must be an http(s) URL, got '{base}'");
        }
        self.api.base_url = base.trim_end_matches('/').to_string();
        if self.cache.ttl_secs == 0 {
            self.cache.ttl_secs = default_ttl_secs();
        }
        if self.defaults.limit == 0 {
            self.defaults.limit = default_limit();
        }
        Ok(())
    }
}
