//! Runtime settings of the smart executor.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ExecutionConfig;
use crate::config::duration::or_default;

const DEFAULT_MAX_RETRIES: u32 = 4;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_IOC_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_CLOSED_ORDER_LOOKBACK: usize = 50;

/// ExecutorSettings controls retries, guardrails and fill polling.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// Maximum placement attempts per request.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Slippage guardrail for market orders, in percent.
    pub max_slippage_percent: Decimal,
    /// Fill-wait timeout for requests without their own.
    pub default_timeout: Duration,
    /// Smallest partial fill accepted without retrying, in percent.
    pub min_partial_fill_percent: Decimal,
    pub poll_interval: Duration,
    /// Upper bound on the IOC fill wait.
    pub ioc_wait: Duration,
    /// Number of closed orders scanned when resolving a fill.
    pub closed_order_lookback: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_slippage_percent: Decimal::new(5, 1),
            default_timeout: DEFAULT_TIMEOUT,
            min_partial_fill_percent: Decimal::new(50, 0),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ioc_wait: DEFAULT_IOC_WAIT,
            closed_order_lookback: DEFAULT_CLOSED_ORDER_LOOKBACK,
        }
    }
}

impl ExecutorSettings {
    /// Builds settings from the `execution` config section, keeping defaults
    /// for anything unset.
    pub fn from_config(config: Option<&ExecutionConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = config else {
            return defaults;
        };

        let retry = cfg.retry.as_ref();

        Self {
            max_retries: retry
                .and_then(|r| r.max_attempts)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_retries),
            initial_delay: retry
                .map(|r| or_default(r.initial_delay, defaults.initial_delay))
                .unwrap_or(defaults.initial_delay),
            max_delay: retry
                .map(|r| or_default(r.max_delay, defaults.max_delay))
                .unwrap_or(defaults.max_delay),
            backoff_factor: retry
                .and_then(|r| r.multiplier)
                .unwrap_or(defaults.backoff_factor),
            max_slippage_percent: cfg
                .max_slippage_percent
                .as_ref()
                .and_then(|s| Decimal::from_str(s.trim()).ok())
                .unwrap_or(defaults.max_slippage_percent),
            default_timeout: or_default(cfg.timeout, defaults.default_timeout),
            min_partial_fill_percent: cfg
                .min_partial_fill_percent
                .as_ref()
                .and_then(|s| Decimal::from_str(s.trim()).ok())
                .unwrap_or(defaults.min_partial_fill_percent),
            poll_interval: or_default(cfg.poll_interval, defaults.poll_interval),
            ioc_wait: or_default(cfg.ioc_wait, defaults.ioc_wait),
            closed_order_lookback: cfg
                .closed_order_lookback
                .filter(|n| *n > 0)
                .unwrap_or(defaults.closed_order_lookback),
        }
    }

    /// Delay before retrying after `attempt` (1-based) failed:
    /// `initial_delay * backoff_factor^(attempt-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let s = ExecutorSettings::default();
        assert_eq!(s.max_retries, 4);
        assert_eq!(s.initial_delay, Duration::from_secs(1));
        assert_eq!(s.max_delay, Duration::from_secs(8));
        assert_eq!(s.backoff_factor, 2.0);
        assert_eq!(s.max_slippage_percent, dec!(0.5));
        assert_eq!(s.default_timeout, Duration::from_secs(30));
        assert_eq!(s.min_partial_fill_percent, dec!(50));
        assert_eq!(s.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_schedule() {
        let s = ExecutorSettings::default();
        let delays: Vec<u64> = (1..=5).map(|a| s.backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
    }

    #[test]
    fn test_backoff_huge_attempt_is_capped() {
        let s = ExecutorSettings::default();
        assert_eq!(s.backoff_delay(10_000), Duration::from_secs(8));
    }

    #[test]
    fn test_from_config_overrides() {
        let cfg = ExecutionConfig {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::ZERO,
            ioc_wait: Duration::from_secs(2),
            max_slippage_percent: Some("1.25".to_string()),
            min_partial_fill_percent: None,
            closed_order_lookback: Some(20),
            retry: Some(RetryConfig {
                max_attempts: Some(3),
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::ZERO,
                multiplier: Some(3.0),
            }),
        };

        let s = ExecutorSettings::from_config(Some(&cfg));
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.initial_delay, Duration::from_millis(100));
        assert_eq!(s.max_delay, Duration::from_secs(8));
        assert_eq!(s.backoff_factor, 3.0);
        assert_eq!(s.max_slippage_percent, dec!(1.25));
        assert_eq!(s.min_partial_fill_percent, dec!(50));
        assert_eq!(s.default_timeout, Duration::from_secs(10));
        assert_eq!(s.poll_interval, Duration::from_millis(500));
        assert_eq!(s.ioc_wait, Duration::from_secs(2));
        assert_eq!(s.closed_order_lookback, 20);
    }

    #[test]
    fn test_from_missing_config() {
        assert_eq!(ExecutorSettings::from_config(None), ExecutorSettings::default());
    }
}
