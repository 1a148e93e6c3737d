//! Risk classification derived from a case's coefficient of variation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CfError;

/// Volatility bucket of a case, ordered from calmest to wildest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = CfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(CfError::Decode(format!("unknown risk level: {other}"))),
        }
    }
}

/// CV thresholds separating the risk buckets.
///
/// `cv < medium_cv` is low, `medium_cv <= cv < high_cv` is medium, anything
/// at or above `high_cv` is high. The defaults were calibrated against the
/// observed feed: median CV sits near 1.45, the 75th percentile near 3.15,
/// and jackpot-style mining cases land well above 4.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub medium_cv: f64,
    pub high_cv: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self { medium_cv: 1.5, high_cv: 4.0 }
    }
}

impl RiskPolicy {
    /// Bucket a coefficient of variation.
    #[inline]
    pub fn classify(&self, cv: f64) -> RiskLevel {
        if cv < self.medium_cv {
            RiskLevel::Low
        } else if cv < self.high_cv {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}
