//! Risk signals and the assessments produced from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// RiskLevel buckets a weighted risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    /// Maps a score in `[0, 1]` onto a level.
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            RiskLevel::Low
        } else if score < 0.5 {
            RiskLevel::Medium
        } else if score < 0.8 {
            RiskLevel::High
        } else {
            RiskLevel::Extreme
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        };
        write!(f, "{}", s)
    }
}

/// RiskAction is the decision attached to an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAction {
    Approve,
    Warning,
    /// Trade allowed at a reduced size.
    Reduce,
    Block,
    Emergency,
}

impl RiskAction {
    /// Returns true if the action still permits opening a trade.
    pub fn allows_trading(&self) -> bool {
        matches!(
            self,
            RiskAction::Approve | RiskAction::Warning | RiskAction::Reduce
        )
    }
}

impl fmt::Display for RiskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskAction::Approve => "approve",
            RiskAction::Warning => "warning",
            RiskAction::Reduce => "reduce",
            RiskAction::Block => "block",
            RiskAction::Emergency => "emergency",
        };
        write!(f, "{}", s)
    }
}

/// RiskSignal is one named, weighted input to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub name: String,
    /// Normalized signal value, usually in `[0, 1]`.
    pub value: f64,
    pub weight: f64,
    /// Values above the threshold are reported as reasons.
    pub threshold: f64,
    pub description: String,
}

impl RiskSignal {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        weight: f64,
        threshold: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            weight,
            threshold,
            description: description.into(),
        }
    }

    pub fn is_breached(&self) -> bool {
        self.value > self.threshold
    }
}

/// RiskAssessment is produced fresh for every call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    /// Role of the agent that produced the assessment.
    pub role: String,
    pub symbol: Option<String>,
    pub action: RiskAction,
    pub level: RiskLevel,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
    pub max_position_size: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn allows_trading(&self) -> bool {
        self.action.allows_trading()
    }
}
