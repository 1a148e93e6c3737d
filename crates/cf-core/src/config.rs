//! Configuration parsing for the casefeed system.
//!
//! All settings come from a single JSON config file. Optional fields fall back
//! to the defaults exposed by the `effective_*` accessors, so a minimal config
//! only needs the feed URL.
//!
//! # Example config
//!
//! ```json
//! {
//!   "app": { "module_name": "casefeed", "log_path": "/tmp/log" },
//!   "feed": { "url": "wss://csgo.net/websocket", "origin": "https://csgo.net" },
//!   "cache": { "backend": "file", "dir": "/var/cache/casefeed", "ttl_sec": 3600 },
//!   "store": { "path": "/var/lib/casefeed/cases.db" },
//!   "schedule": { "interval_sec": 60, "max_retries": 3, "retry_delay_sec": 60 },
//!   "risk": { "medium_cv": 1.5, "high_cv": 4.0 }
//! }
//! ```

use std::cmp::Ordering;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CfError;
use crate::types::RiskPolicy;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub app: ModuleMeta,

    /// Upstream feed connection and collection bounds.
    pub feed: FeedConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Risk classification thresholds.
    #[serde(default)]
    pub risk: RiskPolicy,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

impl ModuleMeta {
    pub fn module_name(&self) -> String {
        self.module_name.clone().unwrap_or_else(|| "casefeed".to_string())
    }
}

/// Id and publication name of one DDP subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    pub id: String,
    pub name: String,
}

/// Upstream feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Full websocket URL (e.g. `wss://csgo.net/websocket`).
    pub url: String,

    /// `Origin` header sent with the handshake.
    pub origin: Option<String>,

    /// `User-Agent` header sent with the handshake.
    pub user_agent: Option<String>,

    /// Per-receive timeout in seconds (default: 30).
    pub recv_timeout_sec: Option<u64>,

    /// Counted frames after which collection stops (default: 5000).
    pub max_messages: Option<usize>,

    /// Consecutive empty or timed-out receives after which collection stops
    /// (default: 3).
    pub max_idle_receives: Option<u32>,

    /// Hard budget for one whole collection in seconds (default: 120).
    pub run_timeout_sec: Option<u64>,

    /// Case metadata subscription (default: `cases-sub` / `cases`).
    pub cases_sub: Option<SubscriptionConfig>,

    /// Item-range subscription (default: `ranges-sub` / `pf_case_ranges`).
    pub ranges_sub: Option<SubscriptionConfig>,

    /// Protocol versions offered in the `connect` frame.
    pub protocol_versions: Option<Vec<String>>,
}

impl FeedConfig {
    pub fn effective_recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_sec.unwrap_or(30))
    }

    pub fn effective_max_messages(&self) -> usize {
        self.max_messages.unwrap_or(5000)
    }

    pub fn effective_max_idle_receives(&self) -> u32 {
        self.max_idle_receives.unwrap_or(3)
    }

    pub fn effective_run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_sec.unwrap_or(120))
    }

    pub fn effective_cases_sub(&self) -> SubscriptionConfig {
        self.cases_sub.clone().unwrap_or_else(|| SubscriptionConfig {
            id: "cases-sub".into(),
            name: "cases".into(),
        })
    }

    pub fn effective_ranges_sub(&self) -> SubscriptionConfig {
        self.ranges_sub.clone().unwrap_or_else(|| SubscriptionConfig {
            id: "ranges-sub".into(),
            name: "pf_case_ranges".into(),
        })
    }

    pub fn effective_protocol_versions(&self) -> Vec<String> {
        self.protocol_versions
            .clone()
            .unwrap_or_else(|| vec!["1".into(), "pre2".into(), "pre1".into()])
    }

    pub fn effective_user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Which cache implementation backs the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

/// Snapshot cache configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Directory for the file backend.
    pub dir: Option<String>,
    /// Key the snapshot is stored under (default: `csgonet_cases`).
    pub key: Option<String>,
    /// Snapshot expiry in seconds (default: 3600).
    pub ttl_sec: Option<u64>,
}

impl CacheConfig {
    pub fn effective_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| "csgonet_cases".to_string())
    }

    pub fn effective_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_sec.unwrap_or(3600))
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (`:memory:` for in-memory, the default).
    pub path: Option<String>,
}

impl StoreConfig {
    pub fn effective_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| ":memory:".to_string())
    }
}

/// Refresh schedule and retry policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between scheduled runs (default: 60).
    pub interval_sec: Option<u64>,
    /// Extra attempts after a failed run (default: 3).
    pub max_retries: Option<u32>,
    /// Fixed delay between attempts in seconds (default: 60).
    pub retry_delay_sec: Option<u64>,
}

impl ScheduleConfig {
    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec.unwrap_or(60))
    }

    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(3)
    }

    pub fn effective_retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_sec.unwrap_or(60))
    }
}

impl AppConfig {
    /// Reject configs that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), CfError> {
        if self.feed.url.trim().is_empty() {
            return Err(CfError::Config("feed.url must not be empty".into()));
        }
        if self.feed.effective_max_messages() == 0 {
            return Err(CfError::Config("feed.max_messages must be positive".into()));
        }
        if self.feed.effective_cases_sub().id == self.feed.effective_ranges_sub().id {
            return Err(CfError::Config("feed subscriptions need distinct ids".into()));
        }
        if self.cache.backend == CacheBackend::File && self.cache.dir.is_none() {
            return Err(CfError::Config("cache.dir is required for the file backend".into()));
        }
        if self.risk.medium_cv.partial_cmp(&self.risk.high_cv) != Some(Ordering::Less) {
            return Err(CfError::Config(format!(
                "risk.medium_cv ({}) must be below risk.high_cv ({})",
                self.risk.medium_cv, self.risk.high_cv
            )));
        }
        Ok(())
    }
}

/// Parse and validate a config from a JSON string.
pub fn parse_config(content: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
