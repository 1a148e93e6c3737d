//! Per-case risk statistics over the probability-weighted item distribution.
//!
//! For a case priced `P` (USD) with items `x_i` dropping with probability
//! `p_i` (fraction):
//!
//! - expected value `μ = Σ p_i·x_i`
//! - expected return `μ / P × 100`, rounded to 2 decimals
//! - variance `Σ p_i·(x_i − μ)²`, coefficient of variation `σ / μ`
//! - max multiplier `max(x_i) / P`, rounded to 2 decimals
//!
//! Everything here is best-effort: missing inputs produce `None` fields rather
//! than errors, so one odd case never aborts a refresh.

use crate::types::{CaseRecord, CaseStats, RiskPolicy, ScoredCase};

/// Round to `dp` decimal places, half away from zero.
#[inline]
pub fn round_dp(value: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (value * scale).round() / scale
}

/// Usable USD case price, or `None` when absent, zero, or negative.
#[inline]
fn case_price(case: &CaseRecord) -> Option<f64> {
    case.price_usd.filter(|p| *p > 0.0)
}

/// Probability-weighted mean item value in USD (unscaled).
fn expected_value(case: &CaseRecord) -> f64 {
    case.items
        .iter()
        .map(|item| item.price_usd.unwrap_or(0.0) * (item.probability / 100.0))
        .sum()
}

/// Expected return as a percentage of the case price.
pub fn expected_return(case: &CaseRecord) -> Option<f64> {
    let price = case_price(case)?;
    if case.items.is_empty() {
        return None;
    }
    Some(round_dp(expected_value(case) / price * 100.0, 2))
}

/// Volatility block: `(cv_rounded, raw_cv, max_multiplier)`.
///
/// `None` when the price is unusable, there are no items, or `μ <= 0`.
fn volatility(case: &CaseRecord) -> Option<(f64, f64, f64)> {
    let price = case_price(case)?;
    if case.items.is_empty() {
        return None;
    }

    let mean = expected_value(case);
    if mean <= 0.0 {
        return None;
    }

    let variance: f64 = case
        .items
        .iter()
        .map(|item| {
            let dev = item.price_usd.unwrap_or(0.0) - mean;
            (item.probability / 100.0) * dev * dev
        })
        .sum();
    let cv = variance.sqrt() / mean;

    let max_item = case
        .items
        .iter()
        .map(|item| item.price_usd.unwrap_or(0.0))
        .fold(0.0f64, f64::max);

    Some((round_dp(cv, 4), cv, round_dp(max_item / price, 2)))
}

/// Compute all statistics for one case.
pub fn compute(case: &CaseRecord, policy: &RiskPolicy) -> CaseStats {
    let mut stats = CaseStats { expected_return: expected_return(case), ..Default::default() };

    if let Some((cv_rounded, cv, max_multiplier)) = volatility(case) {
        stats.volatility = Some(cv_rounded);
        stats.risk_level = Some(policy.classify(cv));
        stats.max_multiplier = Some(max_multiplier);
    }

    stats
}

/// Attach statistics to every merged case.
pub fn score_all(cases: Vec<CaseRecord>, policy: &RiskPolicy) -> Vec<ScoredCase> {
    cases
        .into_iter()
        .map(|case| {
            let stats = compute(&case, policy);
            ScoredCase { case, stats }
        })
        .collect()
}
