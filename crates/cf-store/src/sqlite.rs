//! SQLite-backed [`CaseStore`].
//!
//! Three tables:
//!
//! - `feed_case` — one row per case, decimals as TEXT
//! - `feed_case_item` — items, cascade-deleted with their case
//! - `feed_case_history` — append-only change trail
//!
//! Timestamps go through rusqlite's chrono support (UTC, RFC 3339 style).

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use cf_core::time_util::now_utc;
use cf_core::types::RiskLevel;
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::diff::{FieldChange, field_spec};
use crate::model::{CaseRow, FieldValue, HistoryEntry, ItemRow, PersistedCase};
use crate::store::CaseStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feed_case (
    case_id         TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    image           TEXT NOT NULL,
    price_rub       TEXT NOT NULL,
    price_usd       TEXT,
    price_eur       TEXT,
    is_mining_case  INTEGER NOT NULL DEFAULT 0,
    expected_return TEXT,
    volatility      TEXT,
    risk_level      TEXT,
    max_multiplier  TEXT,
    created_at      TEXT NOT NULL,
    last_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS feed_case_item (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id     TEXT NOT NULL REFERENCES feed_case(case_id) ON DELETE CASCADE,
    item_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    probability TEXT NOT NULL,
    price_rub   TEXT NOT NULL,
    price_usd   TEXT,
    price_eur   TEXT
);

CREATE INDEX IF NOT EXISTS idx_feed_case_item_case ON feed_case_item(case_id);

CREATE TABLE IF NOT EXISTS feed_case_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id       TEXT NOT NULL REFERENCES feed_case(case_id) ON DELETE CASCADE,
    field_changed TEXT NOT NULL,
    old_value     TEXT,
    new_value     TEXT,
    changed_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feed_case_history_case ON feed_case_history(case_id, changed_at);
CREATE INDEX IF NOT EXISTS idx_feed_case_history_field ON feed_case_history(field_changed);
";

const CASE_COLUMNS: &str = "case_id, name, image, price_rub, price_usd, price_eur, is_mining_case, \
     expected_return, volatility, risk_level, max_multiplier, created_at, last_updated";

const HISTORY_COLUMNS: &str = "id, case_id, field_changed, old_value, new_value, changed_at";

pub struct SqliteStore {
    conn: Connection,
    commits: u64,
}

impl SqliteStore {
    /// Open (or create) a database file. `":memory:"` opens a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .with_context(|| format!("failed to open database {}", path.display()))?;
        let store = Self::with_connection(conn)?;
        info!("[store] sqlite opened at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA).context("failed to create schema")?;
        Ok(Self { conn, commits: 0 })
    }

    /// Number of write transactions committed through this handle.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn load_items(&self, case_id: &str) -> Result<Vec<ItemRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT item_id, name, probability, price_rub, price_usd, price_eur
             FROM feed_case_item WHERE case_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map([case_id], |row| {
                Ok(ItemRow {
                    item_id: row.get(0)?,
                    name: row.get(1)?,
                    probability: decimal_col(row, 2)?,
                    price_rub: decimal_col(row, 3)?,
                    price_usd: opt_decimal_col(row, 4)?,
                    price_eur: opt_decimal_col(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn query_history(&self, sql: &str, key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(sql)?;
        let entries = stmt
            .query_map(params![key, limit], history_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl CaseStore for SqliteStore {
    fn load_case(&self, case_id: &str) -> Result<Option<PersistedCase>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM feed_case WHERE case_id = ?1");
        let found = self.conn.query_row(&sql, [case_id], case_from_row).optional()?;
        match found {
            Some((row, created_at, last_updated)) => {
                let items = self.load_items(case_id)?;
                Ok(Some(PersistedCase { row, items, created_at, last_updated }))
            }
            None => Ok(None),
        }
    }

    fn insert_case(&mut self, row: &CaseRow, items: &[ItemRow]) -> Result<()> {
        let now = now_utc();
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO feed_case ({CASE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                row.case_id,
                row.name,
                row.image,
                row.price_rub.to_string(),
                row.price_usd.map(|d| d.to_string()),
                row.price_eur.map(|d| d.to_string()),
                row.is_mining_case,
                row.expected_return.map(|d| d.to_string()),
                row.volatility.map(|d| d.to_string()),
                row.risk_level.map(|l| l.as_str()),
                row.max_multiplier.map(|d| d.to_string()),
                now,
                now,
            ],
        )?;
        insert_items(&tx, &row.case_id, items)?;
        tx.commit()?;
        self.commits += 1;
        debug!("[store] inserted case {} with {} items", row.case_id, items.len());
        Ok(())
    }

    fn update_case(&mut self, row: &CaseRow, changes: &[FieldChange], items: Option<&[ItemRow]>) -> Result<()> {
        let now = now_utc();
        let tx = self.conn.transaction()?;

        let mut assignments = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        for change in changes {
            // The items pseudo-field has no column of its own.
            let Some(spec) = field_spec(change.field) else { continue };
            values.push(Box::new(sql_value(&(spec.extract)(row))));
            assignments.push(format!("{} = ?{}", spec.name, values.len()));
        }
        values.push(Box::new(now));
        assignments.push(format!("last_updated = ?{}", values.len()));
        values.push(Box::new(row.case_id.clone()));
        let sql = format!("UPDATE feed_case SET {} WHERE case_id = ?{}", assignments.join(", "), values.len());

        let touched = tx.execute(&sql, params_from_iter(values.iter()))?;
        if touched == 0 {
            anyhow::bail!("case {} does not exist", row.case_id);
        }

        if let Some(items) = items {
            tx.execute("DELETE FROM feed_case_item WHERE case_id = ?1", [&row.case_id])?;
            insert_items(&tx, &row.case_id, items)?;
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO feed_case_history (case_id, field_changed, old_value, new_value, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for change in changes {
                stmt.execute(params![row.case_id, change.field, change.old, change.new, now])?;
            }
        }

        tx.commit()?;
        self.commits += 1;
        debug!(
            "[store] updated case {} ({} changes, items replaced: {})",
            row.case_id,
            changes.len(),
            items.is_some()
        );
        Ok(())
    }

    fn list_cases(&self) -> Result<Vec<PersistedCase>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM feed_case ORDER BY last_updated DESC, case_id");
        let rows = {
            let mut stmt = self.conn.prepare(&sql)?;
            stmt.query_map([], case_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter()
            .map(|(row, created_at, last_updated)| {
                let items = self.load_items(&row.case_id)?;
                Ok(PersistedCase { row, items, created_at, last_updated })
            })
            .collect()
    }

    fn history(&self, case_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM feed_case_history WHERE case_id = ?1
             ORDER BY changed_at DESC, id DESC LIMIT ?2"
        );
        self.query_history(&sql, case_id, limit)
    }

    fn history_by_field(&self, field: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM feed_case_history WHERE field_changed = ?1
             ORDER BY changed_at DESC, id DESC LIMIT ?2"
        );
        self.query_history(&sql, field, limit)
    }
}

fn insert_items(tx: &rusqlite::Transaction<'_>, case_id: &str, items: &[ItemRow]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO feed_case_item (case_id, item_id, name, probability, price_rub, price_usd, price_eur)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in items {
        stmt.execute(params![
            case_id,
            item.item_id,
            item.name,
            item.probability.to_string(),
            item.price_rub.to_string(),
            item.price_usd.map(|d| d.to_string()),
            item.price_eur.map(|d| d.to_string()),
        ])?;
    }
    Ok(())
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Decimal(Some(d)) => Value::Text(d.to_string()),
        FieldValue::Text(Some(s)) => Value::Text(s.clone()),
        FieldValue::Flag(b) => Value::Integer(i64::from(*b)),
        FieldValue::Decimal(None) | FieldValue::Text(None) => Value::Null,
    }
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| conversion_error(idx, e))).transpose()
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<(CaseRow, DateTime<Utc>, DateTime<Utc>)> {
    let risk: Option<String> = row.get(9)?;
    let risk_level = risk
        .map(|r| RiskLevel::from_str(&r).map_err(|e| conversion_error(9, e)))
        .transpose()?;
    let case = CaseRow {
        case_id: row.get(0)?,
        name: row.get(1)?,
        image: row.get(2)?,
        price_rub: decimal_col(row, 3)?,
        price_usd: opt_decimal_col(row, 4)?,
        price_eur: opt_decimal_col(row, 5)?,
        is_mining_case: row.get(6)?,
        expected_return: opt_decimal_col(row, 7)?,
        volatility: opt_decimal_col(row, 8)?,
        risk_level,
        max_multiplier: opt_decimal_col(row, 10)?,
    };
    Ok((case, row.get(11)?, row.get(12)?))
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        case_id: row.get(1)?,
        field_changed: row.get(2)?,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        changed_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ITEMS_FIELD;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn case_row(id: &str) -> CaseRow {
        CaseRow {
            case_id: id.into(),
            name: format!("Case {id}"),
            image: format!("{id}.png"),
            price_rub: dec("900"),
            price_usd: Some(dec("10")),
            price_eur: None,
            is_mining_case: false,
            expected_return: Some(dec("19.9")),
            volatility: Some(dec("4.9499")),
            risk_level: Some(RiskLevel::High),
            max_multiplier: Some(dec("10")),
        }
    }

    fn item(id: &str, price: &str) -> ItemRow {
        ItemRow {
            item_id: id.into(),
            name: format!("{id} (FN)"),
            probability: dec("50"),
            price_rub: dec(price),
            price_usd: Some(dec("1.2345")),
            price_eur: None,
        }
    }

    #[test]
    fn schema_creates_tables() {
        let store = SqliteStore::in_memory().unwrap();
        let tables: Vec<String> = store
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for table in ["feed_case", "feed_case_item", "feed_case_history"] {
            assert!(tables.contains(&table.to_string()), "{table} missing");
        }
    }

    #[test]
    fn insert_then_load_round_trips() {
        let mut store = SqliteStore::in_memory().unwrap();
        let row = case_row("c1");
        let items = vec![item("a", "10.5"), item("b", "1")];
        store.insert_case(&row, &items).unwrap();

        let loaded = store.load_case("c1").unwrap().unwrap();
        assert_eq!(loaded.row, row);
        assert_eq!(loaded.items, items);
        assert_eq!(loaded.created_at, loaded.last_updated);
        assert!(store.load_case("missing").unwrap().is_none());
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn update_writes_changed_columns_and_history() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_case(&case_row("c1"), &[item("a", "10")]).unwrap();

        let mut fresh = case_row("c1");
        fresh.price_usd = Some(dec("12.5"));
        fresh.risk_level = None;
        let changes = vec![
            FieldChange { field: "price_usd", old: Some("10".into()), new: Some("12.5".into()) },
            FieldChange { field: "risk_level", old: Some("high".into()), new: None },
        ];
        store.update_case(&fresh, &changes, None).unwrap();

        let loaded = store.load_case("c1").unwrap().unwrap();
        assert_eq!(loaded.row, fresh);
        assert_eq!(loaded.items.len(), 1);

        let history = store.history("c1", 10).unwrap();
        assert_eq!(history.len(), 2);
        // Same timestamp, newest id first.
        assert_eq!(history[0].field_changed, "risk_level");
        assert_eq!(history[0].new_value, None);
        assert_eq!(history[1].field_changed, "price_usd");
        assert_eq!(history[1].old_value.as_deref(), Some("10"));
        assert_eq!(store.history("c1", 1).unwrap().len(), 1);
    }

    #[test]
    fn item_replacement_deletes_and_recreates() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_case(&case_row("c1"), &[item("a", "10"), item("b", "1")]).unwrap();

        let replacement = vec![item("c", "7")];
        let changes = vec![FieldChange { field: ITEMS_FIELD, old: Some("x".into()), new: Some("y".into()) }];
        store.update_case(&case_row("c1"), &changes, Some(&replacement)).unwrap();

        let loaded = store.load_case("c1").unwrap().unwrap();
        assert_eq!(loaded.items, replacement);
        let by_field = store.history_by_field(ITEMS_FIELD, 10).unwrap();
        assert_eq!(by_field.len(), 1);
        assert_eq!(by_field[0].case_id, "c1");

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM feed_case_item", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn failed_insert_leaves_nothing_behind() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER poison BEFORE INSERT ON feed_case_item
                 WHEN NEW.item_id = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poisoned item'); END;",
            )
            .unwrap();

        let result = store.insert_case(&case_row("bad"), &[item("ok", "1"), item("poison", "2")]);
        assert!(result.is_err());
        assert!(store.load_case("bad").unwrap().is_none());
        assert_eq!(store.commit_count(), 0);

        store.insert_case(&case_row("good"), &[item("ok", "1")]).unwrap();
        let changes = vec![
            FieldChange { field: "name", old: Some("Case good".into()), new: Some("Renamed".into()) },
            FieldChange { field: ITEMS_FIELD, old: Some("x".into()), new: Some("y".into()) },
        ];
        let mut renamed = case_row("good");
        renamed.name = "Renamed".into();
        let result = store.update_case(&renamed, &changes, Some(&[item("poison", "3")]));
        assert!(result.is_err());

        let loaded = store.load_case("good").unwrap().unwrap();
        assert_eq!(loaded.row.name, "Case good");
        assert_eq!(loaded.items, vec![item("ok", "1")]);
        assert!(store.history("good", 10).unwrap().is_empty());
    }

    #[test]
    fn update_of_unknown_case_fails() {
        let mut store = SqliteStore::in_memory().unwrap();
        let changes = vec![FieldChange { field: "name", old: None, new: Some("x".into()) }];
        assert!(store.update_case(&case_row("ghost"), &changes, None).is_err());
        assert!(store.history("ghost", 10).unwrap().is_empty());
    }

    #[test]
    fn list_cases_newest_first() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_case(&case_row("a"), &[]).unwrap();
        store.insert_case(&case_row("b"), &[item("x", "1")]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let changes = vec![FieldChange { field: "image", old: None, new: Some("new.png".into()) }];
        let mut updated = case_row("a");
        updated.image = "new.png".into();
        store.update_case(&updated, &changes, None).unwrap();

        let cases = store.list_cases().unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.row.case_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(cases[1].items.len(), 1);
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.insert_case(&case_row("c1"), &[item("a", "1")]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_case("c1").unwrap().unwrap().items.len(), 1);
    }
}
