//! Consecutive-loss counter with a time-boxed trading pause.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::LossTrackerConfig;
use crate::config::duration::or_default;
use crate::storage::{KeyValueStore, StorageError};

const LOSS_KEY_PREFIX: &str = "risk:consecutive_loss:";
const PAUSE_KEY_PREFIX: &str = "risk:paused:";

const DEFAULT_MAX_CONSECUTIVE_LOSSES: u32 = 3;
const DEFAULT_PAUSE_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossTrackerSettings {
    /// Losses in a row that activate the pause.
    pub max_consecutive_losses: u32,
    pub pause_duration: Duration,
    /// Rolling TTL of the counter, refreshed on every loss.
    pub counter_ttl: Duration,
}

impl Default for LossTrackerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_losses: DEFAULT_MAX_CONSECUTIVE_LOSSES,
            pause_duration: DEFAULT_PAUSE_DURATION,
            counter_ttl: DEFAULT_COUNTER_TTL,
        }
    }
}

impl LossTrackerSettings {
    pub fn from_config(config: Option<&LossTrackerConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = config else {
            return defaults;
        };

        Self {
            max_consecutive_losses: cfg
                .max_consecutive_losses
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_consecutive_losses),
            pause_duration: or_default(cfg.pause_duration, defaults.pause_duration),
            counter_ttl: or_default(cfg.counter_ttl, defaults.counter_ttl),
        }
    }
}

/// Snapshot of one identity's loss state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossStats {
    pub consecutive_losses: u32,
    pub is_paused: bool,
    /// Time left until trading resumes, while paused.
    pub remaining_pause: Option<Duration>,
}

/// ConsecutiveLossTracker counts losses per identity and pauses trading
/// after too many in a row.
///
/// A missing record always reads as zero losses and no pause.
pub struct ConsecutiveLossTracker {
    store: Arc<dyn KeyValueStore>,
    settings: LossTrackerSettings,
}

impl ConsecutiveLossTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: LossTrackerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LossTrackerSettings {
        &self.settings
    }

    /// Clears the counter and any active pause.
    pub async fn record_win(&self, id: &str) -> Result<(), StorageError> {
        self.store.del(&loss_key(id)).await?;
        self.store.del(&pause_key(id)).await?;
        info!(identity = %id, "Win recorded, loss streak cleared");
        Ok(())
    }

    /// Increments the counter and returns the new streak length. Reaching the
    /// limit starts (or restarts) the pause.
    pub async fn record_loss(&self, id: &str) -> Result<u32, StorageError> {
        let key = loss_key(id);
        let count = self.store.incr(&key).await?;
        self.store.expire(&key, self.settings.counter_ttl).await?;

        let losses = u32::try_from(count.max(0)).unwrap_or(u32::MAX);

        if losses >= self.settings.max_consecutive_losses {
            let paused_at = Utc::now().to_rfc3339();
            self.store
                .set(&pause_key(id), &paused_at, Some(self.settings.pause_duration))
                .await?;
            warn!(
                identity = %id,
                losses,
                pause = ?self.settings.pause_duration,
                "Consecutive loss limit reached, trading paused"
            );
        } else {
            info!(
                identity = %id,
                losses,
                max = self.settings.max_consecutive_losses,
                "Loss recorded"
            );
        }

        Ok(losses)
    }

    /// Current streak length.
    pub async fn consecutive_losses(&self, id: &str) -> Result<u32, StorageError> {
        let Some(raw) = self.store.get(&loss_key(id)).await? else {
            return Ok(0);
        };
        match raw.trim().parse::<u32>() {
            Ok(n) => Ok(n),
            Err(_) => {
                warn!(identity = %id, value = %raw, "Unreadable loss counter, treating as zero");
                Ok(0)
            }
        }
    }

    /// Returns whether the identity is paused and, if so, since when.
    ///
    /// A pause record older than the pause duration counts as not paused.
    pub async fn is_paused(&self, id: &str) -> Result<(bool, Option<DateTime<Utc>>), StorageError> {
        Ok(match self.active_pause(id).await? {
            Some((paused_at, _)) => (true, Some(paused_at)),
            None => (false, None),
        })
    }

    /// Decides whether the identity may trade, with a message for the operator.
    pub async fn can_trade(&self, id: &str) -> Result<(bool, String), StorageError> {
        if let Some((_, remaining)) = self.active_pause(id).await? {
            return Ok((
                false,
                format!(
                    "trading paused after {} consecutive losses, resumes in {}",
                    self.settings.max_consecutive_losses,
                    format_remaining(remaining)
                ),
            ));
        }

        let losses = self.consecutive_losses(id).await?;
        let max = self.settings.max_consecutive_losses;
        if losses > 0 && losses < max {
            return Ok((
                true,
                format!(
                    "warning: {} consecutive losses, {} more before pause",
                    losses,
                    max - losses
                ),
            ));
        }

        Ok((true, String::new()))
    }

    /// Clears all loss state for the identity.
    pub async fn reset(&self, id: &str) -> Result<(), StorageError> {
        self.store.del(&loss_key(id)).await?;
        self.store.del(&pause_key(id)).await?;
        info!(identity = %id, "Loss tracker reset");
        Ok(())
    }

    pub async fn get_stats(&self, id: &str) -> Result<LossStats, StorageError> {
        let consecutive_losses = self.consecutive_losses(id).await?;
        let pause = self.active_pause(id).await?;

        Ok(LossStats {
            consecutive_losses,
            is_paused: pause.is_some(),
            remaining_pause: pause.map(|(_, remaining)| remaining),
        })
    }

    /// Reads the pause record: `(paused_at, remaining)` while still active.
    async fn active_pause(
        &self,
        id: &str,
    ) -> Result<Option<(DateTime<Utc>, Duration)>, StorageError> {
        let Some(raw) = self.store.get(&pause_key(id)).await? else {
            return Ok(None);
        };

        let paused_at = match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                warn!(identity = %id, value = %raw, error = %e, "Unreadable pause record, ignoring");
                return Ok(None);
            }
        };

        let elapsed = (Utc::now() - paused_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.settings.pause_duration {
            return Ok(None);
        }

        Ok(Some((paused_at, self.settings.pause_duration - elapsed)))
    }
}

fn loss_key(id: &str) -> String {
    format!("{}{}", LOSS_KEY_PREFIX, id)
}

fn pause_key(id: &str) -> String {
    format!("{}{}", PAUSE_KEY_PREFIX, id)
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn tracker() -> (ConsecutiveLossTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = ConsecutiveLossTracker::new(store.clone(), LossTrackerSettings::default());
        (tracker, store)
    }

    #[tokio::test]
    async fn test_fresh_identity_can_trade() {
        let (tracker, _) = tracker();

        assert_eq!(tracker.consecutive_losses("acct").await.unwrap(), 0);
        assert_eq!(tracker.is_paused("acct").await.unwrap(), (false, None));
        assert_eq!(
            tracker.can_trade("acct").await.unwrap(),
            (true, String::new())
        );
    }

    #[tokio::test]
    async fn test_losses_below_limit_warn() {
        let (tracker, _) = tracker();

        assert_eq!(tracker.record_loss("acct").await.unwrap(), 1);
        assert_eq!(tracker.record_loss("acct").await.unwrap(), 2);

        let (allowed, message) = tracker.can_trade("acct").await.unwrap();
        assert!(allowed);
        assert!(message.contains("2 consecutive losses"));
        assert!(message.contains("1 more"));
        assert!(!tracker.is_paused("acct").await.unwrap().0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_losses_pause_trading() {
        let (tracker, store) = tracker();

        for _ in 0..3 {
            tracker.record_loss("acct").await.unwrap();
        }

        let (paused, paused_at) = tracker.is_paused("acct").await.unwrap();
        assert!(paused);
        assert!(paused_at.is_some());

        let (allowed, message) = tracker.can_trade("acct").await.unwrap();
        assert!(!allowed);
        assert!(message.contains("paused"));

        let stats = tracker.get_stats("acct").await.unwrap();
        assert_eq!(stats.consecutive_losses, 3);
        assert!(stats.is_paused);
        assert!(stats.remaining_pause.unwrap() <= DEFAULT_PAUSE_DURATION);

        assert_eq!(store.ttl("risk:paused:acct").await, Some(DEFAULT_PAUSE_DURATION));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_ttl_refreshed_on_loss() {
        let (tracker, store) = tracker();
        tracker.record_loss("acct").await.unwrap();
        assert_eq!(
            store.ttl("risk:consecutive_loss:acct").await,
            Some(DEFAULT_COUNTER_TTL)
        );
    }

    #[tokio::test]
    async fn test_win_clears_counter_and_pause() {
        let (tracker, _) = tracker();
        for _ in 0..4 {
            tracker.record_loss("acct").await.unwrap();
        }

        tracker.record_win("acct").await.unwrap();

        assert_eq!(tracker.consecutive_losses("acct").await.unwrap(), 0);
        assert!(!tracker.is_paused("acct").await.unwrap().0);
        assert!(tracker.can_trade("acct").await.unwrap().0);
    }

    #[tokio::test]
    async fn test_stale_pause_record_is_not_paused() {
        let (tracker, store) = tracker();
        let old = (Utc::now() - chrono::Duration::minutes(20)).to_rfc3339();
        store.set("risk:paused:acct", &old, None).await.unwrap();

        assert_eq!(tracker.is_paused("acct").await.unwrap(), (false, None));
        // Reading never mutates.
        assert_eq!(store.get("risk:paused:acct").await.unwrap(), Some(old));
    }

    #[tokio::test]
    async fn test_unreadable_records_default() {
        let (tracker, store) = tracker();
        store.set("risk:paused:acct", "yesterday", None).await.unwrap();
        store.set("risk:consecutive_loss:acct", "many", None).await.unwrap();

        assert!(!tracker.is_paused("acct").await.unwrap().0);
        assert_eq!(tracker.consecutive_losses("acct").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (tracker, _) = tracker();
        for _ in 0..3 {
            tracker.record_loss("a").await.unwrap();
        }
        assert!(tracker.is_paused("a").await.unwrap().0);
        assert!(!tracker.is_paused("b").await.unwrap().0);
    }

    #[tokio::test]
    async fn test_reset() {
        let (tracker, store) = tracker();
        for _ in 0..3 {
            tracker.record_loss("acct").await.unwrap();
        }

        tracker.reset("acct").await.unwrap();

        assert!(store.is_empty().await);
        let stats = tracker.get_stats("acct").await.unwrap();
        assert_eq!(
            stats,
            LossStats {
                consecutive_losses: 0,
                is_paused: false,
                remaining_pause: None,
            }
        );
    }

    #[tokio::test]
    async fn test_custom_limit() {
        let store = Arc::new(MemoryStore::new());
        let cfg = LossTrackerConfig {
            max_consecutive_losses: Some(1),
            pause_duration: Duration::from_secs(60),
            counter_ttl: Duration::ZERO,
        };
        let tracker = ConsecutiveLossTracker::new(store, LossTrackerSettings::from_config(Some(&cfg)));
        assert_eq!(tracker.settings().counter_ttl, DEFAULT_COUNTER_TTL);

        tracker.record_loss("acct").await.unwrap();
        assert!(tracker.is_paused("acct").await.unwrap().0);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::from_secs(899)), "14m59s");
        assert_eq!(format_remaining(Duration::from_secs(5)), "5s");
        assert_eq!(format_remaining(Duration::from_millis(200)), "1s");
    }
}
