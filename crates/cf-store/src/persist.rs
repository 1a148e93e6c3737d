//! Applies detected changes to durable storage, one case at a time.
//!
//! Each case is loaded, diffed and written independently. A failure is
//! logged as a [`CfError::Persistence`] and counted; it never stops the
//! remaining cases and never undoes cases that were already committed.

use anyhow::Result;
use cf_core::error::CfError;
use cf_core::types::ScoredCase;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::diff::{CaseChange, detect};
use crate::store::CaseStore;

/// Outcome counts of one persistence pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Diff and persist every case in `cases`.
pub fn persist_all<S: CaseStore + ?Sized>(store: &mut S, cases: &[ScoredCase]) -> PersistReport {
    let mut report = PersistReport::default();

    for scored in cases {
        match persist_one(store, scored) {
            Ok(Outcome::Created) => report.created += 1,
            Ok(Outcome::Updated(n)) => {
                debug!("[persist] case {} updated ({n} fields)", scored.id());
                report.updated += 1;
            }
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Err(e) => {
                let err = CfError::Persistence { case_id: scored.id().to_string(), reason: format!("{e:#}") };
                error!("[persist] {err}");
                report.failed += 1;
            }
        }
    }

    info!(
        "[persist] created={} updated={} unchanged={} failed={}",
        report.created, report.updated, report.unchanged, report.failed
    );
    report
}

enum Outcome {
    Created,
    Updated(usize),
    Unchanged,
}

fn persist_one<S: CaseStore + ?Sized>(store: &mut S, scored: &ScoredCase) -> Result<Outcome> {
    let existing = store.load_case(scored.id())?;
    match detect(existing.as_ref(), scored) {
        CaseChange::New { row, items } => {
            store.insert_case(&row, &items)?;
            Ok(Outcome::Created)
        }
        CaseChange::Updated { row, changes, replace_items } => {
            store.update_case(&row, &changes, replace_items.as_deref())?;
            Ok(Outcome::Updated(changes.len()))
        }
        CaseChange::Unchanged => Ok(Outcome::Unchanged),
    }
}
