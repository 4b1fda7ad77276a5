//! Configuration loading and validation.
//!
//! Uses serde_yaml to load YAML configuration files. Every section except `app`
//! is optional; components fall back to their defaults for anything left unset.

mod app;
pub(crate) mod duration;
mod error;
mod execution;
mod risk;
mod storage;

pub use app::AppConfig;
pub use error::ConfigError;
pub use execution::{ExecutionConfig, RetryConfig};
pub use risk::{LossTrackerConfig, RiskConfig, ThrottleConfig};
pub use storage::StorageConfig;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::str::FromStr;

/// Root configuration structure.
///
/// Required sections: app.
/// Optional sections: execution, loss_tracker, throttle, risk, storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application-level settings like name and environment.
    pub app: AppConfig,
    /// Smart order execution, retries and guardrails (optional).
    pub execution: Option<ExecutionConfig>,
    /// Consecutive-loss pause gate (optional).
    pub loss_tracker: Option<LossTrackerConfig>,
    /// Position-size throttle (optional).
    pub throttle: Option<ThrottleConfig>,
    /// Risk manager agent thresholds (optional).
    pub risk: Option<RiskConfig>,
    /// Shared store backend (optional, in-memory by default).
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Loads a `.env` file first (if present) so that `RUST_LOG` and friends
    /// are visible to the binary.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        if let Some(ref execution) = self.execution {
            if let Some(ref retry) = execution.retry {
                if retry.max_attempts == Some(0) {
                    return Err(ConfigError::Validation(
                        "execution.retry.max_attempts must be positive".into(),
                    ));
                }
                if let Some(multiplier) = retry.multiplier {
                    if multiplier < 1.0 {
                        return Err(ConfigError::Validation(
                            "execution.retry.multiplier must be at least 1".into(),
                        ));
                    }
                }
            }
            parse_percent(
                "execution.max_slippage_percent",
                execution.max_slippage_percent.as_deref(),
            )?;
            parse_percent(
                "execution.min_partial_fill_percent",
                execution.min_partial_fill_percent.as_deref(),
            )?;
        }

        if let Some(ref tracker) = self.loss_tracker {
            if tracker.max_consecutive_losses == Some(0) {
                return Err(ConfigError::Validation(
                    "loss_tracker.max_consecutive_losses must be positive".into(),
                ));
            }
        }

        if let Some(ref throttle) = self.throttle {
            if throttle.loss_threshold == Some(0) {
                return Err(ConfigError::Validation(
                    "throttle.loss_threshold must be positive".into(),
                ));
            }
            for (field, value) in [
                ("throttle.reduction_factor", &throttle.reduction_factor),
                ("throttle.min_position_multiplier", &throttle.min_position_multiplier),
            ] {
                if let Some(d) = parse_decimal(field, value.as_deref())? {
                    if d <= Decimal::ZERO || d > Decimal::ONE {
                        return Err(ConfigError::Validation(format!(
                            "{} must be in (0, 1]",
                            field
                        )));
                    }
                }
            }
            if let Some(d) =
                parse_decimal("throttle.recovery_factor", throttle.recovery_factor.as_deref())?
            {
                if d <= Decimal::ONE {
                    return Err(ConfigError::Validation(
                        "throttle.recovery_factor must be greater than 1".into(),
                    ));
                }
            }
        }

        if let Some(ref risk) = self.risk {
            if let Some(threshold) = risk.emergency_threshold {
                if threshold <= 0.0 {
                    return Err(ConfigError::Validation(
                        "risk.emergency_threshold must be positive".into(),
                    ));
                }
            }
            if let Some(limit) = risk.position_size_limit {
                if limit <= 0.0 {
                    return Err(ConfigError::Validation(
                        "risk.position_size_limit must be positive".into(),
                    ));
                }
            }
        }

        if let Some(ref storage) = self.storage {
            match storage.backend.as_deref() {
                None | Some("memory") => {}
                Some("sqlite") => {
                    if storage.path.as_deref().is_none_or(str::is_empty) {
                        return Err(ConfigError::Validation(
                            "storage.path is required for the sqlite backend".into(),
                        ));
                    }
                }
                Some(other) => {
                    return Err(ConfigError::Validation(format!(
                        "unknown storage backend: {}",
                        other
                    )));
                }
            }
        }

        Ok(())
    }
}

fn parse_decimal(field: &str, value: Option<&str>) -> Result<Option<Decimal>, ConfigError> {
    value
        .map(|s| {
            Decimal::from_str(s.trim())
                .map_err(|e| ConfigError::Validation(format!("{}: {}", field, e)))
        })
        .transpose()
}

fn parse_percent(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    if let Some(d) = parse_decimal(field, value)? {
        if d < Decimal::ZERO || d > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Validation(format!(
                "{} must be between 0 and 100",
                field
            )));
        }
    }
    Ok(())
}
