//! Change detection between a fresh snapshot and durable state.
//!
//! Scalar columns are described once, in [`CASE_FIELDS`], as
//! `(name, extractor, comparator)` entries; [`detect`] walks the table, so a
//! column cannot be persisted without also being diffed. Item sets are
//! compared by [`fingerprint`](crate::fingerprint::fingerprint) and reported
//! as one extra change named [`ITEMS_FIELD`].

use cf_core::types::ScoredCase;

use crate::fingerprint::fingerprint;
use crate::model::{CaseRow, FieldValue, ItemRow, PersistedCase};

/// Pseudo-field name recorded when the item set changed.
pub const ITEMS_FIELD: &str = "items";

/// One diffable scalar column.
pub struct FieldSpec {
    /// Column and history field name.
    pub name: &'static str,
    pub extract: fn(&CaseRow) -> FieldValue,
    /// `true` when the two values are the same.
    pub same: fn(&FieldValue, &FieldValue) -> bool,
}

fn exact(a: &FieldValue, b: &FieldValue) -> bool {
    a == b
}

/// Every scalar column of a case, in history order.
pub const CASE_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "name", extract: |r| FieldValue::Text(Some(r.name.clone())), same: exact },
    FieldSpec { name: "image", extract: |r| FieldValue::Text(Some(r.image.clone())), same: exact },
    FieldSpec { name: "price_rub", extract: |r| FieldValue::Decimal(Some(r.price_rub)), same: exact },
    FieldSpec { name: "price_usd", extract: |r| FieldValue::Decimal(r.price_usd), same: exact },
    FieldSpec { name: "price_eur", extract: |r| FieldValue::Decimal(r.price_eur), same: exact },
    FieldSpec { name: "is_mining_case", extract: |r| FieldValue::Flag(r.is_mining_case), same: exact },
    FieldSpec { name: "expected_return", extract: |r| FieldValue::Decimal(r.expected_return), same: exact },
    FieldSpec { name: "volatility", extract: |r| FieldValue::Decimal(r.volatility), same: exact },
    FieldSpec {
        name: "risk_level",
        extract: |r| FieldValue::Text(r.risk_level.map(|l| l.as_str().to_string())),
        same: exact,
    },
    FieldSpec { name: "max_multiplier", extract: |r| FieldValue::Decimal(r.max_multiplier), same: exact },
];

/// Look up a scalar column by name.
pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    CASE_FIELDS.iter().find(|spec| spec.name == name)
}

/// One detected difference.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// What durable storage must do for one case.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseChange {
    /// First sighting: create the case and its items.
    New { row: CaseRow, items: Vec<ItemRow> },
    /// Known case with differences.
    Updated {
        row: CaseRow,
        changes: Vec<FieldChange>,
        /// Full replacement item set, present only when the fingerprint changed.
        replace_items: Option<Vec<ItemRow>>,
    },
    /// Nothing to write.
    Unchanged,
}

impl CaseChange {
    pub fn is_write(&self) -> bool {
        !matches!(self, CaseChange::Unchanged)
    }
}

/// Diff two rows through [`CASE_FIELDS`].
pub fn diff_rows(old: &CaseRow, new: &CaseRow) -> Vec<FieldChange> {
    CASE_FIELDS
        .iter()
        .filter_map(|spec| {
            let before = (spec.extract)(old);
            let after = (spec.extract)(new);
            if (spec.same)(&before, &after) {
                None
            } else {
                Some(FieldChange { field: spec.name, old: before.to_text(), new: after.to_text() })
            }
        })
        .collect()
}

/// Compare a fresh case against what is stored for it.
pub fn detect(existing: Option<&PersistedCase>, fresh: &ScoredCase) -> CaseChange {
    let row = CaseRow::from_scored(fresh);
    let items = ItemRow::from_scored(fresh);

    let Some(existing) = existing else {
        return CaseChange::New { row, items };
    };

    let mut changes = diff_rows(&existing.row, &row);

    let old_hash = fingerprint(&existing.items);
    let new_hash = fingerprint(&items);
    let replace_items = if old_hash != new_hash {
        changes.push(FieldChange { field: ITEMS_FIELD, old: Some(old_hash), new: Some(new_hash) });
        Some(items)
    } else {
        None
    };

    if changes.is_empty() {
        CaseChange::Unchanged
    } else {
        CaseChange::Updated { row, changes, replace_items }
    }
}
