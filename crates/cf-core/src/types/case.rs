//! Case and item records as they flow through one refresh cycle.
//!
//! These records are built fresh on every run by the merger, enriched with
//! [`CaseStats`], published to the cache and handed to change detection. They
//! are never mutated after construction.

use serde::{Deserialize, Serialize};

use super::risk::RiskLevel;

/// Size of the discrete outcome space that item ranges are drawn from.
pub const TOTAL_RANGE: u64 = 10_000_000;

/// One item that can drop from a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Base item name (wear/condition suffix stripped).
    pub id: String,
    /// Full display name.
    pub name: String,
    /// Drop chance as a percentage in `[0, 100]`.
    pub probability: f64,
    pub price_rub: f64,
    pub price_usd: Option<f64>,
    pub price_eur: Option<f64>,
    /// Closed interval `[start, end]` the probability was derived from, if
    /// the feed supplied a well-formed one.
    pub range: Option<[u64; 2]>,
}

/// A case with its full item list, before statistics are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub price_rub: f64,
    pub price_usd: Option<f64>,
    pub price_eur: Option<f64>,
    pub is_mining_case: bool,
    pub items: Vec<ItemRecord>,
}

/// Derived risk metrics. Every field is `None` when it cannot be computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseStats {
    /// Expected return as a percentage of the case price.
    pub expected_return: Option<f64>,
    /// Coefficient of variation of the item value distribution.
    pub volatility: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    /// Best item price divided by case price.
    pub max_multiplier: Option<f64>,
}

/// A case with its statistics attached: the unit published to the cache
/// and compared against durable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCase {
    #[serde(flatten)]
    pub case: CaseRecord,
    #[serde(flatten)]
    pub stats: CaseStats,
}

impl ScoredCase {
    pub fn id(&self) -> &str {
        &self.case.id
    }
}
