//! Snapshot publication.
//!
//! Every successful collection is written to the cache as one JSON envelope,
//! whether or not durable storage changed:
//!
//! ```json
//! {"success": true, "last_updated": "2025-01-01T12:00:00.000000Z",
//!  "cases_count": 2, "cases": [...]}
//! ```
//!
//! `"degraded": true` is added only when the item-range subscription failed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cf_core::error::CfError;
use cf_core::time_util::{now_utc, to_iso8601};
use cf_core::types::ScoredCase;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::Cache;

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub last_updated: String,
    pub cases_count: usize,
    pub cases: Vec<ScoredCase>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

pub struct CachePublisher {
    cache: Arc<dyn Cache>,
    key: String,
    ttl: Duration,
}

impl CachePublisher {
    pub fn new(cache: Arc<dyn Cache>, key: impl Into<String>, ttl: Duration) -> Self {
        Self { cache, key: key.into(), ttl }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write the full snapshot under the configured key.
    pub fn publish(&self, cases: &[ScoredCase], degraded: bool) -> Result<Envelope> {
        let envelope = Envelope {
            success: true,
            last_updated: to_iso8601(&now_utc()),
            cases_count: cases.len(),
            cases: cases.to_vec(),
            degraded,
        };
        let body = serde_json::to_string(&envelope).map_err(|e| CfError::Cache(format!("encode envelope: {e}")))?;
        self.cache.set(&self.key, &body, self.ttl)?;
        info!(
            "[publish] {} cases written to {} (ttl {}s{})",
            envelope.cases_count,
            self.key,
            self.ttl.as_secs(),
            if degraded { ", degraded" } else { "" }
        );
        Ok(envelope)
    }

    /// Read back the last published envelope, if still live.
    pub fn latest(&self) -> Result<Option<Envelope>> {
        match self.cache.get(&self.key)? {
            Some(raw) => {
                let envelope =
                    serde_json::from_str(&raw).map_err(|e| CfError::Cache(format!("decode envelope: {e}")))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}
