//! Risk manager, loss tracker and throttle configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Risk manager agent thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Role reported on every assessment (default "risk_manager").
    pub role: Option<String>,
    /// Risk per position as a fraction (e.g., 0.02 for 2%); drives stop-loss.
    pub max_position_risk: Option<f64>,
    /// Daily loss in quote currency that triggers an emergency.
    pub max_daily_loss: Option<f64>,
    /// Position size above which assessments force a reduction.
    pub position_size_limit: Option<f64>,
    /// Drawdown fraction that triggers an emergency (e.g., 0.20).
    pub emergency_threshold: Option<f64>,
    /// Minimum acceptable reward-to-risk ratio.
    pub min_risk_reward_ratio: Option<f64>,
}

/// Consecutive-loss pause settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LossTrackerConfig {
    /// Losses in a row that trigger a pause.
    pub max_consecutive_losses: Option<u32>,
    /// How long trading stays paused.
    #[serde(default, with = "duration")]
    pub pause_duration: Duration,
    /// Rolling TTL of the loss counter.
    #[serde(default, with = "duration")]
    pub counter_ttl: Duration,
}

/// Position-size throttle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive losses before size reduction starts.
    pub loss_threshold: Option<u32>,
    /// Multiplier applied per effective loss (e.g., "0.7").
    pub reduction_factor: Option<String>,
    /// Floor for the multiplier (e.g., "0.1").
    pub min_position_multiplier: Option<String>,
    /// Multiplier growth per win (e.g., "1.5").
    pub recovery_factor: Option<String>,
    /// TTL of the stored multiplier.
    #[serde(default, with = "duration")]
    pub ttl: Duration,
}

fn default_true() -> bool {
    true
}
