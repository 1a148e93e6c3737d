//! One refresh cycle: collect → merge → score → publish → persist.
//!
//! The stages run strictly in order. The cache is written before durable
//! storage; a persistence failure is logged and counted but never fails the
//! run, so it never triggers a retry either.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cf_core::config::AppConfig;
use cf_core::error::CfError;
use cf_core::stats::score_all;
use cf_core::types::{RiskPolicy, ScoredCase};
use cf_feed::CaseSource;
use cf_feed::merge::merge;
use cf_store::persist::{PersistReport, persist_all};
use cf_store::publish::CachePublisher;
use cf_store::store::CaseStore;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Timing and retry knobs of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub run_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub risk: RiskPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            run_timeout: config.feed.effective_run_timeout(),
            max_retries: config.schedule.effective_max_retries(),
            retry_delay: config.schedule.effective_retry_delay(),
            risk: config.risk,
        }
    }
}

/// Summary of one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub cases_fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub degraded: bool,
}

pub struct Pipeline {
    source: Box<dyn CaseSource>,
    store: Arc<Mutex<dyn CaseStore>>,
    publisher: CachePublisher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn CaseSource>,
        store: Arc<Mutex<dyn CaseStore>>,
        publisher: CachePublisher,
        settings: PipelineSettings,
    ) -> Self {
        Self { source, store, publisher, settings }
    }

    /// A single attempt, no retries.
    pub async fn run_once(&mut self) -> Result<RunReport> {
        let run_timeout = self.settings.run_timeout;
        // Timing out drops the collect future and with it the connection.
        let collection = match timeout(run_timeout, self.source.collect()).await {
            Ok(result) => result?,
            Err(_) => return Err(CfError::Timeout(run_timeout).into()),
        };

        if collection.cases.is_empty() {
            return Err(CfError::EmptyCollection.into());
        }
        if collection.degraded {
            warn!("[pipeline] range subscription failed, publishing cases without items");
        }

        let scored = score_all(merge(&collection), &self.settings.risk);
        let cases_fetched = scored.len();

        self.publisher.publish(&scored, collection.degraded)?;

        let persisted = persist(Arc::clone(&self.store), scored).await;
        let report = RunReport {
            cases_fetched,
            created: persisted.created,
            updated: persisted.updated,
            unchanged: persisted.unchanged,
            failed: persisted.failed,
            degraded: collection.degraded,
        };
        info!(
            "[pipeline] run complete: fetched={} created={} updated={} unchanged={} failed={} degraded={}",
            report.cases_fetched, report.created, report.updated, report.unchanged, report.failed, report.degraded
        );
        Ok(report)
    }

    /// Run with bounded retries and a fixed delay between attempts.
    pub async fn run_with_retry(&mut self) -> Result<RunReport> {
        let attempts = self.settings.max_retries + 1;
        let mut attempt = 1;
        loop {
            match self.run_once().await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    let retryable = e.downcast_ref::<CfError>().is_none_or(CfError::is_retryable);
                    if !retryable || attempt >= attempts {
                        error!("[pipeline] run failed after {attempt} attempt(s): {e:#}");
                        return Err(e);
                    }
                    warn!(
                        "[pipeline] attempt {attempt}/{attempts} via {} failed: {e:#}; retrying in {}s",
                        self.source.name(),
                        self.settings.retry_delay.as_secs()
                    );
                    sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Persist on the blocking pool; the store is synchronous.
async fn persist(store: Arc<Mutex<dyn CaseStore>>, scored: Vec<ScoredCase>) -> PersistReport {
    let total = scored.len();
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = store.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok::<_, anyhow::Error>(persist_all(&mut *guard, &scored))
    })
    .await;

    match joined {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!("[pipeline] persistence skipped: {e:#}");
            PersistReport { failed: total, ..Default::default() }
        }
        Err(e) => {
            error!("[pipeline] persistence task failed: {e}");
            PersistReport { failed: total, ..Default::default() }
        }
    }
}
