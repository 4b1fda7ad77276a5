//! Execution configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Smart order execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Default fill-wait timeout when a request carries none.
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Interval between fill status polls.
    #[serde(default, with = "duration")]
    pub poll_interval: Duration,
    /// Upper bound on the IOC fill wait.
    #[serde(default, with = "duration")]
    pub ioc_wait: Duration,
    /// Slippage guardrail in percent (e.g., "0.5").
    pub max_slippage_percent: Option<String>,
    /// Smallest acceptable partial fill in percent (e.g., "50").
    pub min_partial_fill_percent: Option<String>,
    /// How many closed orders to scan when resolving a fill.
    pub closed_order_lookback: Option<usize>,
    /// Retry behavior for failed placements.
    pub retry: Option<RetryConfig>,
}

/// Retry settings for failed placements.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of placement attempts.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    #[serde(default, with = "duration")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(default, with = "duration")]
    pub max_delay: Duration,
    /// Factor by which delay increases after each retry.
    pub multiplier: Option<f64>,
}
