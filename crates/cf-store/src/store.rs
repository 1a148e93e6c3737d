//! Durable-storage boundary.
//!
//! The persister only ever talks to a [`CaseStore`]; [`SqliteStore`] is the
//! shipped implementation. Every write method is one atomic transaction for
//! one case: either all of its rows and history entries become visible, or
//! none do.
//!
//! [`SqliteStore`]: crate::sqlite::SqliteStore

use anyhow::Result;

use crate::diff::FieldChange;
use crate::model::{CaseRow, HistoryEntry, ItemRow, PersistedCase};

pub trait CaseStore: Send {
    /// Load one case with its items, `None` if it was never persisted.
    fn load_case(&self, case_id: &str) -> Result<Option<PersistedCase>>;

    /// Create a case row and its full item set.
    fn insert_case(&mut self, row: &CaseRow, items: &[ItemRow]) -> Result<()>;

    /// Apply detected changes to an existing case.
    ///
    /// Only the columns named in `changes` are written. When `items` is
    /// `Some`, the stored item set is deleted and recreated from it. One
    /// history entry is appended per change.
    fn update_case(&mut self, row: &CaseRow, changes: &[FieldChange], items: Option<&[ItemRow]>) -> Result<()>;

    /// All cases, most recently updated first.
    fn list_cases(&self) -> Result<Vec<PersistedCase>>;

    /// History of one case, newest first.
    fn history(&self, case_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// History of one field across all cases, newest first.
    fn history_by_field(&self, field: &str, limit: usize) -> Result<Vec<HistoryEntry>>;
}
