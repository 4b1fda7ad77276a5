//! Risk manager agent: weighted signal scoring and emergency checks.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::domain::{OrderSide, RiskAction, RiskAssessment, RiskLevel, RiskSignal};

const DEFAULT_ROLE: &str = "risk_manager";

/// Signal name compared against the minimum reward-to-risk ratio.
pub const RISK_REWARD_SIGNAL: &str = "risk_reward_ratio";

#[derive(Debug, Clone, PartialEq)]
pub struct RiskManagerSettings {
    pub role: String,
    /// Risk per position as a fraction; stop-loss percent is derived from it.
    pub max_position_risk: f64,
    pub max_daily_loss: f64,
    pub position_size_limit: f64,
    /// Drawdown fraction that triggers an emergency.
    pub emergency_threshold: f64,
    pub min_risk_reward_ratio: f64,
}

impl Default for RiskManagerSettings {
    fn default() -> Self {
        Self {
            role: DEFAULT_ROLE.to_string(),
            max_position_risk: 0.02,
            max_daily_loss: 100.0,
            position_size_limit: 10_000.0,
            emergency_threshold: 0.20,
            min_risk_reward_ratio: 2.0,
        }
    }
}

impl RiskManagerSettings {
    pub fn from_config(config: Option<&RiskConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = config else {
            return defaults;
        };

        Self {
            role: cfg
                .role
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(defaults.role),
            max_position_risk: cfg.max_position_risk.unwrap_or(defaults.max_position_risk),
            max_daily_loss: cfg.max_daily_loss.unwrap_or(defaults.max_daily_loss),
            position_size_limit: cfg
                .position_size_limit
                .unwrap_or(defaults.position_size_limit),
            emergency_threshold: cfg
                .emergency_threshold
                .unwrap_or(defaults.emergency_threshold),
            min_risk_reward_ratio: cfg
                .min_risk_reward_ratio
                .unwrap_or(defaults.min_risk_reward_ratio),
        }
    }
}

/// Running counters. Bookkeeping only; never an input to a decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentMetrics {
    pub total_assessments: u64,
    pub emergencies: u64,
    pub by_action: HashMap<RiskAction, u64>,
    pub by_role: HashMap<String, u64>,
    pub by_symbol: HashMap<String, u64>,
}

/// RiskManagerAgent turns weighted risk signals into assessments.
///
/// Assessments are computed without side effects apart from the metrics
/// counters, so one agent can be shared across tasks.
pub struct RiskManagerAgent {
    settings: RiskManagerSettings,
    metrics: Mutex<AgentMetrics>,
}

impl RiskManagerAgent {
    pub fn new(settings: RiskManagerSettings) -> Self {
        Self {
            settings,
            metrics: Mutex::new(AgentMetrics::default()),
        }
    }

    pub fn settings(&self) -> &RiskManagerSettings {
        &self.settings
    }

    /// Book-level assessment.
    pub fn assess_portfolio_risk(&self, signals: &[RiskSignal]) -> RiskAssessment {
        let assessment = self.score(None, signals);
        self.record(&assessment);
        assessment
    }

    /// Assessment for holding `position_size` of `symbol`. Oversized positions
    /// are always reduced to the limit, whatever the score says.
    pub fn assess_position_risk(
        &self,
        symbol: &str,
        signals: &[RiskSignal],
        position_size: f64,
    ) -> RiskAssessment {
        let mut assessment = self.score(Some(symbol), signals);

        let limit = self.settings.position_size_limit;
        if position_size > limit {
            assessment.action = RiskAction::Reduce;
            assessment.max_position_size = Some(limit);
            assessment.reasons.push(format!(
                "position size {:.2} exceeds limit {:.2}",
                position_size, limit
            ));
            assessment.recommendations = recommendations(assessment.level, assessment.action);
        }

        let stop_loss = self.settings.max_position_risk * 100.0;
        assessment.stop_loss_pct = Some(stop_loss);
        assessment.take_profit_pct = Some(stop_loss * self.settings.min_risk_reward_ratio);

        self.record(&assessment);
        assessment
    }

    /// Assessment for opening a trade. A poor reward-to-risk ratio turns an
    /// approval into a warning.
    pub fn assess_trading_risk(
        &self,
        symbol: &str,
        side: OrderSide,
        signals: &[RiskSignal],
    ) -> RiskAssessment {
        let mut assessment = self.score(Some(symbol), signals);

        let min_ratio = self.settings.min_risk_reward_ratio;
        let poor_ratio = signals
            .iter()
            .find(|s| s.name == RISK_REWARD_SIGNAL)
            .filter(|s| s.value < min_ratio);

        if let Some(signal) = poor_ratio {
            assessment.reasons.push(format!(
                "risk/reward {:.2} below minimum {:.2}",
                signal.value, min_ratio
            ));
            if assessment.action == RiskAction::Approve {
                assessment.action = RiskAction::Warning;
                assessment.recommendations = recommendations(assessment.level, assessment.action);
            }
        }

        debug!(
            symbol = %symbol,
            side = %side,
            action = %assessment.action,
            score = assessment.score,
            "Trade assessed"
        );

        self.record(&assessment);
        assessment
    }

    /// Independent emergency check on drawdown (fraction) and daily loss.
    pub fn check_emergency_conditions(&self, drawdown: f64, daily_loss: f64) -> RiskAssessment {
        let mut reasons = Vec::new();
        if drawdown >= self.settings.emergency_threshold {
            reasons.push(format!(
                "drawdown {:.2}% at or above emergency threshold {:.2}%",
                drawdown * 100.0,
                self.settings.emergency_threshold * 100.0
            ));
        }
        if daily_loss >= self.settings.max_daily_loss {
            reasons.push(format!(
                "daily loss {:.2} at or above limit {:.2}",
                daily_loss, self.settings.max_daily_loss
            ));
        }

        let (action, level, score) = if reasons.is_empty() {
            (RiskAction::Approve, RiskLevel::Low, 0.0)
        } else {
            (RiskAction::Emergency, RiskLevel::Extreme, 1.0)
        };

        let assessment = RiskAssessment {
            id: Uuid::new_v4().to_string(),
            role: self.settings.role.clone(),
            symbol: None,
            action,
            level,
            score,
            confidence: 1.0,
            reasons,
            recommendations: recommendations(level, action),
            max_position_size: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            timestamp: Utc::now(),
        };

        if action == RiskAction::Emergency {
            error!(
                drawdown,
                daily_loss,
                reasons = ?assessment.reasons,
                "Emergency risk conditions"
            );
        }

        self.record(&assessment);
        assessment
    }

    /// True when the assessment permits trading (possibly at reduced size).
    pub fn should_trade(&self, assessment: &RiskAssessment) -> bool {
        assessment.allows_trading()
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.lock_metrics().clone()
    }

    fn score(&self, symbol: Option<&str>, signals: &[RiskSignal]) -> RiskAssessment {
        let score = weighted_score(signals);
        let level = RiskLevel::from_score(score);
        let action = action_for(level, score);

        let reasons = signals
            .iter()
            .filter(|s| s.is_breached())
            .map(|s| {
                if s.description.is_empty() {
                    format!("{} {:.2} above threshold {:.2}", s.name, s.value, s.threshold)
                } else {
                    format!(
                        "{} {:.2} above threshold {:.2}: {}",
                        s.name, s.value, s.threshold, s.description
                    )
                }
            })
            .collect();

        RiskAssessment {
            id: Uuid::new_v4().to_string(),
            role: self.settings.role.clone(),
            symbol: symbol.map(str::to_string),
            action,
            level,
            score,
            confidence: confidence(signals.len()),
            reasons,
            recommendations: recommendations(level, action),
            max_position_size: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            timestamp: Utc::now(),
        }
    }

    fn record(&self, assessment: &RiskAssessment) {
        if matches!(assessment.action, RiskAction::Block | RiskAction::Reduce) {
            warn!(
                action = %assessment.action,
                level = %assessment.level,
                symbol = ?assessment.symbol,
                reasons = ?assessment.reasons,
                "Risk limits engaged"
            );
        }

        let mut metrics = self.lock_metrics();
        metrics.total_assessments += 1;
        if assessment.action == RiskAction::Emergency {
            metrics.emergencies += 1;
        }
        *metrics.by_action.entry(assessment.action).or_default() += 1;
        *metrics.by_role.entry(assessment.role.clone()).or_default() += 1;
        if let Some(ref symbol) = assessment.symbol {
            *metrics.by_symbol.entry(symbol.clone()).or_default() += 1;
        }
    }

    fn lock_metrics(&self) -> MutexGuard<'_, AgentMetrics> {
        // Counters stay usable even if a holder panicked.
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `Σ(value·weight) / Σweight`; zero without signals or weight.
fn weighted_score(signals: &[RiskSignal]) -> f64 {
    let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
    if signals.is_empty() || total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = signals.iter().map(|s| s.value * s.weight).sum();
    weighted / total_weight
}

fn confidence(signal_count: usize) -> f64 {
    (0.5 + 0.05 * signal_count as f64).min(1.0)
}

fn action_for(level: RiskLevel, score: f64) -> RiskAction {
    match level {
        RiskLevel::Low => RiskAction::Approve,
        RiskLevel::Medium if score > 0.4 => RiskAction::Warning,
        RiskLevel::Medium => RiskAction::Approve,
        RiskLevel::High if score > 0.7 => RiskAction::Block,
        RiskLevel::High => RiskAction::Reduce,
        RiskLevel::Extreme => RiskAction::Block,
    }
}

fn recommendations(level: RiskLevel, action: RiskAction) -> Vec<String> {
    let lines: &[&str] = match (level, action) {
        (_, RiskAction::Emergency) => &[
            "Halt all new trading immediately",
            "Close or hedge open positions",
            "Notify operators and review risk limits",
        ],
        (_, RiskAction::Block) => &[
            "Do not open new positions",
            "Review open exposure before resuming",
        ],
        (_, RiskAction::Reduce) => &[
            "Reduce position size before entry",
            "Tighten stop-loss levels",
        ],
        (RiskLevel::Low, _) => &["Proceed with standard position sizing"],
        (RiskLevel::Medium, RiskAction::Warning) => &[
            "Proceed with caution",
            "Monitor positions closely",
        ],
        (RiskLevel::Medium, _) => &["Monitor positions closely"],
        (RiskLevel::High | RiskLevel::Extreme, _) => &[
            "Reduce exposure",
            "Avoid adding to existing positions",
        ],
    };
    lines.iter().map(|s| s.to_string()).collect()
}
