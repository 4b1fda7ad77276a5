//! Pre-trade gate combining the loss pause and the size throttle.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::storage::{KeyValueStore, StorageError};

use super::loss_tracker::{ConsecutiveLossTracker, LossStats, LossTrackerSettings};
use super::throttle::{PositionThrottle, ThrottleSettings, ThrottleStatus};

/// Outcome of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Win => write!(f, "win"),
            TradeOutcome::Loss => write!(f, "loss"),
        }
    }
}

/// Answer to "may this identity trade, and how much?".
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub allowed: bool,
    /// Throttled size; zero when not allowed.
    pub size: Decimal,
    pub multiplier: Decimal,
    /// Pause, warning or reduction notice; empty when nothing applies.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardStatus {
    pub losses: LossStats,
    pub throttle: ThrottleStatus,
}

/// TradeGuard feeds the tracker's counter into the throttle so both always
/// agree on the loss streak.
pub struct TradeGuard {
    tracker: ConsecutiveLossTracker,
    throttle: PositionThrottle,
}

impl TradeGuard {
    pub fn new(tracker: ConsecutiveLossTracker, throttle: PositionThrottle) -> Self {
        Self { tracker, throttle }
    }

    /// Builds both components over one store from the loaded configuration.
    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        let tracker = ConsecutiveLossTracker::new(
            Arc::clone(&store),
            LossTrackerSettings::from_config(config.loss_tracker.as_ref()),
        );
        let throttle =
            PositionThrottle::new(store, ThrottleSettings::from_config(config.throttle.as_ref()));
        Self::new(tracker, throttle)
    }

    pub fn tracker(&self) -> &ConsecutiveLossTracker {
        &self.tracker
    }

    pub fn throttle(&self) -> &PositionThrottle {
        &self.throttle
    }

    /// Checks the pause and sizes the requested position.
    pub async fn check(&self, id: &str, size: Decimal) -> Result<GuardDecision, StorageError> {
        let (allowed, pause_message) = self.tracker.can_trade(id).await?;
        let multiplier = self.throttle.get_throttle_multiplier(id).await?;

        if !allowed {
            return Ok(GuardDecision {
                allowed,
                size: Decimal::ZERO,
                multiplier,
                message: pause_message,
            });
        }

        let adjusted = size * multiplier;
        let mut messages = Vec::new();
        if !pause_message.is_empty() {
            messages.push(pause_message);
        }
        if adjusted < size {
            messages.push(format!(
                "size throttled to {}% ({} -> {})",
                (multiplier * Decimal::ONE_HUNDRED).round_dp(2).normalize(),
                size,
                adjusted.normalize()
            ));
        }

        Ok(GuardDecision {
            allowed,
            size: adjusted,
            multiplier,
            message: messages.join("; "),
        })
    }

    /// Records a closed trade in both components.
    pub async fn record_outcome(
        &self,
        id: &str,
        outcome: TradeOutcome,
    ) -> Result<GuardStatus, StorageError> {
        match outcome {
            TradeOutcome::Win => {
                self.tracker.record_win(id).await?;
                self.throttle.record_win(id).await?;
            }
            TradeOutcome::Loss => {
                let losses = self.tracker.record_loss(id).await?;
                self.throttle.record_loss(id, losses).await?;
            }
        }

        let status = self.status(id).await?;
        info!(
            identity = %id,
            outcome = %outcome,
            losses = status.losses.consecutive_losses,
            multiplier = %status.throttle.multiplier,
            "Trade outcome recorded"
        );
        Ok(status)
    }

    pub async fn status(&self, id: &str) -> Result<GuardStatus, StorageError> {
        Ok(GuardStatus {
            losses: self.tracker.get_stats(id).await?,
            throttle: self.throttle.get_status(id).await?,
        })
    }

    /// Clears the streak, the pause and the throttle.
    pub async fn reset(&self, id: &str) -> Result<(), StorageError> {
        self.tracker.reset(id).await?;
        self.throttle.reset(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn guard() -> TradeGuard {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        TradeGuard::new(
            ConsecutiveLossTracker::new(Arc::clone(&store), LossTrackerSettings::default()),
            PositionThrottle::new(store, ThrottleSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_clean_identity_full_size() {
        let guard = guard();
        let decision = guard.check("acct", dec!(100)).await.unwrap();
        assert_eq!(
            decision,
            GuardDecision {
                allowed: true,
                size: dec!(100),
                multiplier: Decimal::ONE,
                message: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_losses_shrink_then_pause() {
        let guard = guard();

        guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        let decision = guard.check("acct", dec!(1000)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.size, dec!(700));
        assert!(decision.message.contains("warning"));
        assert!(decision.message.contains("throttled"));

        guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        let status = guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        assert_eq!(status.losses.consecutive_losses, 3);
        assert!(status.losses.is_paused);
        assert_eq!(status.throttle.multiplier, dec!(0.343));
        assert_eq!(status.throttle.effective_losses, 3);

        let decision = guard.check("acct", dec!(1000)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.size, Decimal::ZERO);
        assert!(decision.message.contains("paused"));
    }

    #[tokio::test]
    async fn test_win_lifts_pause_and_recovers_gradually() {
        let guard = guard();
        for _ in 0..3 {
            guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        }

        let status = guard.record_outcome("acct", TradeOutcome::Win).await.unwrap();
        assert_eq!(status.losses.consecutive_losses, 0);
        assert!(!status.losses.is_paused);
        assert_eq!(status.throttle.multiplier, dec!(0.5145));

        let decision = guard.check("acct", dec!(1000)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.size, dec!(514.5));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let guard = guard();
        for _ in 0..3 {
            guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        }

        guard.reset("acct").await.unwrap();

        let status = guard.status("acct").await.unwrap();
        assert_eq!(status.losses.consecutive_losses, 0);
        assert!(!status.losses.is_paused);
        assert!(!status.throttle.is_throttled);
        assert_eq!(
            guard.throttle().get_throttle_multiplier("acct").await.unwrap(),
            Decimal::ONE
        );
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config::from_yaml(
            r#"
app:
  name: "guard-test"
loss_tracker:
  max_consecutive_losses: 2
throttle:
  reduction_factor: "0.5"
"#,
        )
        .unwrap();
        let guard = TradeGuard::from_config(Arc::new(MemoryStore::new()), &config);

        assert_eq!(guard.tracker().settings().max_consecutive_losses, 2);
        assert_eq!(guard.throttle().settings().reduction_factor, dec!(0.5));

        guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        let status = guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        assert!(status.losses.is_paused);
        assert_eq!(status.throttle.multiplier, dec!(0.25));
    }

    #[tokio::test]
    async fn test_state_survives_sqlite_reopen() {
        use crate::storage::{SqliteStore, SqliteStoreConfig};

        let dir = tempfile::tempdir().unwrap();
        let sqlite_config = SqliteStoreConfig {
            path: dir.path().join("guard.db").to_string_lossy().into_owned(),
            max_connections: 1,
        };
        let config = Config::from_yaml("app:\n  name: guard\n").unwrap();

        let store = Arc::new(SqliteStore::new(sqlite_config.clone()).await.unwrap());
        let guard = TradeGuard::from_config(store.clone(), &config);
        guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        guard.record_outcome("acct", TradeOutcome::Loss).await.unwrap();
        store.close().await.unwrap();

        let store = Arc::new(SqliteStore::new(sqlite_config).await.unwrap());
        let guard = TradeGuard::from_config(store, &config);
        let status = guard.status("acct").await.unwrap();
        assert_eq!(status.losses.consecutive_losses, 2);
        assert_eq!(status.throttle.multiplier, dec!(0.49));
    }
}
