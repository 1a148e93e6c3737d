//! Periodic refresh with a manual trigger.
//!
//! A single task owns the job, so runs can never overlap. Interval ticks
//! that fall due while a run is in flight are collapsed
//! ([`MissedTickBehavior::Skip`]); manual triggers are queued in a channel of
//! capacity one, so a burst of triggers during a run yields one extra run.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::pipeline::{Pipeline, RunReport};

/// Unit of work the scheduler drives.
#[async_trait]
pub trait RefreshJob: Send {
    async fn run(&mut self) -> Result<RunReport>;
}

#[async_trait]
impl RefreshJob for Pipeline {
    async fn run(&mut self) -> Result<RunReport> {
        self.run_with_retry().await
    }
}

/// Requests an out-of-band run. Cheap to clone.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Queue a run. Returns `false` when one is already queued (the request
    /// is coalesced) or the scheduler has stopped.
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Counters returned when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub runs: u64,
    pub failures: u64,
}

pub struct Scheduler<J> {
    job: J,
    interval: Duration,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl<J: RefreshJob> Scheduler<J> {
    pub fn new(job: J, interval: Duration) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self { job, interval, trigger_tx, trigger_rx }
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle { tx: self.trigger_tx.clone() }
    }

    /// Run until `shutdown` resolves. The first tick fires immediately; a run
    /// in flight when `shutdown` resolves is allowed to finish.
    pub async fn run<F>(mut self, shutdown: F) -> SchedulerSummary
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut summary = SchedulerSummary::default();
        info!("[scheduler] started, interval {}s", self.interval.as_secs());

        loop {
            let cause = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => "interval",
                Some(()) = self.trigger_rx.recv() => "manual",
            };

            debug!("[scheduler] {cause} run starting");
            summary.runs += 1;
            if let Err(e) = self.job.run().await {
                summary.failures += 1;
                error!("[scheduler] {cause} run failed: {e:#}");
            }
        }

        info!("[scheduler] stopped after {} run(s), {} failed", summary.runs, summary.failures);
        summary
    }
}
