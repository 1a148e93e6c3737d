//! Durable representation of cases, items and history.
//!
//! Fresh floating-point values from the feed are converted to [`Decimal`] and
//! rounded to the scale of the column they are stored in before anything is
//! compared, so two identical snapshots always produce identical rows.

use std::fmt;
use std::str::FromStr;

use cf_core::types::{ItemRecord, RiskLevel, ScoredCase};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::warn;

/// Column scales (decimal places).
pub mod scale {
    pub const PRICE_RUB: u32 = 2;
    pub const PRICE_FX: u32 = 4;
    pub const EXPECTED_RETURN: u32 = 2;
    pub const VOLATILITY: u32 = 4;
    pub const MAX_MULTIPLIER: u32 = 2;
    pub const PROBABILITY: u32 = 6;
}

/// Convert a float to a decimal rounded to `dp` places (half away from zero).
///
/// Goes through the shortest round-trip string form of the float, so `0.1`
/// becomes exactly `0.1`. Non-finite values yield `None`.
pub fn to_decimal(value: f64, dp: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero).normalize())
}

/// Required column: unrepresentable values are stored as zero.
fn to_decimal_or_zero(value: f64, dp: u32, column: &str) -> Decimal {
    to_decimal(value, dp).unwrap_or_else(|| {
        warn!("[model] {column} value {value} does not fit a decimal, storing 0");
        Decimal::ZERO
    })
}

/// Optional column: unrepresentable values are stored as null.
fn opt_decimal(value: Option<f64>, dp: u32, column: &str) -> Option<Decimal> {
    let value = value?;
    let decimal = to_decimal(value, dp);
    if decimal.is_none() {
        warn!("[model] {column} value {value} does not fit a decimal, storing null");
    }
    decimal
}

/// A single comparable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Decimal(Option<Decimal>),
    Text(Option<String>),
    Flag(bool),
}

impl FieldValue {
    /// Textual form recorded in history; `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Decimal(d) => d.map(|d| d.normalize().to_string()),
            FieldValue::Text(t) => t.clone(),
            FieldValue::Flag(b) => Some(b.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_text().as_deref().unwrap_or("null"))
    }
}

/// Scalar columns of a durable case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRow {
    pub case_id: String,
    pub name: String,
    pub image: String,
    pub price_rub: Decimal,
    pub price_usd: Option<Decimal>,
    pub price_eur: Option<Decimal>,
    pub is_mining_case: bool,
    pub expected_return: Option<Decimal>,
    pub volatility: Option<Decimal>,
    pub risk_level: Option<RiskLevel>,
    pub max_multiplier: Option<Decimal>,
}

impl CaseRow {
    /// Normalise a freshly scored case to column precision.
    pub fn from_scored(scored: &ScoredCase) -> Self {
        let case = &scored.case;
        let stats = &scored.stats;
        Self {
            case_id: case.id.clone(),
            name: case.name.clone(),
            image: case.image.clone(),
            price_rub: to_decimal_or_zero(case.price_rub, scale::PRICE_RUB, "price_rub"),
            price_usd: opt_decimal(case.price_usd, scale::PRICE_FX, "price_usd"),
            price_eur: opt_decimal(case.price_eur, scale::PRICE_FX, "price_eur"),
            is_mining_case: case.is_mining_case,
            expected_return: opt_decimal(stats.expected_return, scale::EXPECTED_RETURN, "expected_return"),
            volatility: opt_decimal(stats.volatility, scale::VOLATILITY, "volatility"),
            risk_level: stats.risk_level,
            max_multiplier: opt_decimal(stats.max_multiplier, scale::MAX_MULTIPLIER, "max_multiplier"),
        }
    }
}

/// One durable item row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRow {
    pub item_id: String,
    pub name: String,
    pub probability: Decimal,
    pub price_rub: Decimal,
    pub price_usd: Option<Decimal>,
    pub price_eur: Option<Decimal>,
}

impl ItemRow {
    pub fn from_record(item: &ItemRecord) -> Self {
        Self {
            item_id: item.id.clone(),
            name: item.name.clone(),
            probability: to_decimal_or_zero(item.probability, scale::PROBABILITY, "probability"),
            price_rub: to_decimal_or_zero(item.price_rub, scale::PRICE_RUB, "price_rub"),
            price_usd: opt_decimal(item.price_usd, scale::PRICE_FX, "price_usd"),
            price_eur: opt_decimal(item.price_eur, scale::PRICE_FX, "price_eur"),
        }
    }

    pub fn from_scored(scored: &ScoredCase) -> Vec<Self> {
        scored.case.items.iter().map(Self::from_record).collect()
    }
}

/// A case as loaded from durable storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedCase {
    pub row: CaseRow,
    pub items: Vec<ItemRow>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One immutable change-history record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub case_id: String,
    pub field_changed: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use cf_core::types::{CaseRecord, CaseStats};

    use super::*;

    #[test]
    fn decimal_conversion_rounds_to_scale() {
        assert_eq!(to_decimal(0.1, 4), Some(Decimal::from_str("0.1").unwrap()));
        assert_eq!(to_decimal(1.23456, 4), Some(Decimal::from_str("1.2346").unwrap()));
        assert_eq!(to_decimal(2.345, 2), Some(Decimal::from_str("2.35").unwrap()));
        assert_eq!(to_decimal(19.900000000000002, 2), Some(Decimal::from_str("19.9").unwrap()));
        assert_eq!(to_decimal(0.00001, 6), Some(Decimal::from_str("0.00001").unwrap()));
        assert_eq!(to_decimal(f64::NAN, 2), None);
    }

    #[test]
    fn field_value_text() {
        assert_eq!(FieldValue::Decimal(Some(Decimal::from_str("1.50").unwrap())).to_text(), Some("1.5".into()));
        assert_eq!(FieldValue::Decimal(None).to_text(), None);
        assert_eq!(FieldValue::Flag(true).to_string(), "true");
        assert_eq!(FieldValue::Text(None).to_string(), "null");
    }

    #[test]
    fn case_row_from_scored() {
        let scored = ScoredCase {
            case: CaseRecord {
                id: "c".into(),
                name: "C".into(),
                image: "c.png".into(),
                price_rub: 99.999,
                price_usd: Some(1.23456),
                price_eur: None,
                is_mining_case: true,
                items: vec![],
            },
            stats: CaseStats {
                expected_return: Some(87.456),
                volatility: Some(1.23456),
                risk_level: Some(RiskLevel::Low),
                max_multiplier: None,
            },
        };
        let row = CaseRow::from_scored(&scored);
        assert_eq!(row.price_rub, Decimal::from_str("100").unwrap());
        assert_eq!(row.price_usd, Some(Decimal::from_str("1.2346").unwrap()));
        assert_eq!(row.expected_return, Some(Decimal::from_str("87.46").unwrap()));
        assert_eq!(row.volatility, Some(Decimal::from_str("1.2346").unwrap()));
        assert_eq!(row.max_multiplier, None);
        assert!(row.is_mining_case);
    }

    #[test]
    fn unrepresentable_values_become_zero_or_null() {
        // Finite, but beyond Decimal's 96-bit mantissa.
        assert_eq!(to_decimal(1e29, 2), None);
        assert_eq!(to_decimal(-1e29, 2), None);

        let scored = ScoredCase {
            case: CaseRecord {
                id: "huge".into(),
                name: "Huge".into(),
                image: "h.png".into(),
                price_rub: 1e29,
                price_usd: Some(1e30),
                price_eur: Some(2.5),
                is_mining_case: false,
                items: vec![],
            },
            stats: CaseStats {
                expected_return: Some(f64::INFINITY),
                volatility: Some(1e40),
                risk_level: None,
                max_multiplier: Some(3.0),
            },
        };
        let row = CaseRow::from_scored(&scored);
        assert_eq!(row.price_rub, Decimal::ZERO);
        assert_eq!(row.price_usd, None);
        assert_eq!(row.price_eur, Some(Decimal::from_str("2.5").unwrap()));
        assert_eq!(row.expected_return, None);
        assert_eq!(row.volatility, None);
        assert_eq!(row.max_multiplier, Some(Decimal::from(3)));

        let item = ItemRow::from_record(&ItemRecord {
            id: "i".into(),
            name: "I".into(),
            probability: 12.5,
            price_rub: 1e35,
            price_usd: Some(1e29),
            price_eur: None,
            range: None,
        });
        assert_eq!(item.probability, Decimal::from_str("12.5").unwrap());
        assert_eq!(item.price_rub, Decimal::ZERO);
        assert_eq!(item.price_usd, None);
    }
}
