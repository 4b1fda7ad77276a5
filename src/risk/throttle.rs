//! Position-size throttle driven by the consecutive-loss count.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ThrottleConfig;
use crate::config::duration::or_default;
use crate::storage::{KeyValueStore, StorageError};

const THROTTLE_KEY_PREFIX: &str = "risk:position_throttle:";

const DEFAULT_LOSS_THRESHOLD: u32 = 1;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
    pub enabled: bool,
    /// Consecutive losses before reduction starts.
    pub loss_threshold: u32,
    /// Multiplier applied per effective loss.
    pub reduction_factor: Decimal,
    /// Floor of the multiplier.
    pub min_multiplier: Decimal,
    /// Multiplier growth per win.
    pub recovery_factor: Decimal,
    pub ttl: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            loss_threshold: DEFAULT_LOSS_THRESHOLD,
            reduction_factor: Decimal::new(7, 1),
            min_multiplier: Decimal::new(1, 1),
            recovery_factor: Decimal::new(15, 1),
            ttl: DEFAULT_TTL,
        }
    }
}

impl ThrottleSettings {
    pub fn from_config(config: Option<&ThrottleConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = config else {
            return defaults;
        };

        let decimal = |value: &Option<String>, default: Decimal| {
            value
                .as_deref()
                .and_then(|s| Decimal::from_str(s.trim()).ok())
                .unwrap_or(default)
        };

        Self {
            enabled: cfg.enabled,
            loss_threshold: cfg
                .loss_threshold
                .filter(|n| *n > 0)
                .unwrap_or(defaults.loss_threshold),
            reduction_factor: decimal(&cfg.reduction_factor, defaults.reduction_factor),
            min_multiplier: decimal(&cfg.min_position_multiplier, defaults.min_multiplier),
            recovery_factor: decimal(&cfg.recovery_factor, defaults.recovery_factor),
            ttl: or_default(cfg.ttl, defaults.ttl),
        }
    }

    /// Multiplier for a loss streak: `max(min, reduction^effective)` where
    /// `effective = losses - threshold + 1`. One below the threshold.
    pub fn multiplier_for(&self, consecutive_losses: u32) -> Decimal {
        if consecutive_losses < self.loss_threshold || self.reduction_factor >= Decimal::ONE {
            return Decimal::ONE;
        }
        let effective = consecutive_losses - self.loss_threshold + 1;

        let mut multiplier = Decimal::ONE;
        for _ in 0..effective {
            multiplier *= self.reduction_factor;
            if multiplier <= self.min_multiplier {
                return self.min_multiplier;
            }
        }
        multiplier
    }
}

/// Result of sizing a position through the throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeAdjustment {
    pub size: Decimal,
    pub multiplier: Decimal,
    /// Non-empty when the size was reduced.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleStatus {
    pub multiplier: Decimal,
    pub is_throttled: bool,
    /// Loss streak implied by the multiplier.
    pub effective_losses: u32,
}

/// PositionThrottle scales position sizes down after losses and back up
/// geometrically after wins.
///
/// The stored multiplier is a pure function of the latest loss count, never a
/// running product. A multiplier of one is represented by a missing record.
pub struct PositionThrottle {
    store: Arc<dyn KeyValueStore>,
    settings: ThrottleSettings,
}

impl PositionThrottle {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: ThrottleSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Current multiplier in `[min, 1]`; one when disabled or unset.
    pub async fn get_throttle_multiplier(&self, id: &str) -> Result<Decimal, StorageError> {
        if !self.settings.enabled {
            return Ok(Decimal::ONE);
        }

        let Some(raw) = self.store.get(&throttle_key(id)).await? else {
            return Ok(Decimal::ONE);
        };

        match Decimal::from_str(raw.trim()) {
            Ok(m) => Ok(m.max(self.settings.min_multiplier).min(Decimal::ONE)),
            Err(e) => {
                warn!(identity = %id, value = %raw, error = %e, "Unreadable throttle multiplier, ignoring");
                Ok(Decimal::ONE)
            }
        }
    }

    /// Recomputes and stores the multiplier for the given loss streak.
    pub async fn record_loss(&self, id: &str, consecutive_losses: u32) -> Result<Decimal, StorageError> {
        if !self.settings.enabled || consecutive_losses < self.settings.loss_threshold {
            return Ok(Decimal::ONE);
        }

        let multiplier = self.settings.multiplier_for(consecutive_losses);
        self.store_multiplier(id, multiplier).await?;

        info!(
            identity = %id,
            losses = consecutive_losses,
            multiplier = %multiplier,
            "Position size throttled"
        );
        Ok(multiplier)
    }

    /// Grows the multiplier by the recovery factor, capped at one.
    pub async fn record_win(&self, id: &str) -> Result<Decimal, StorageError> {
        let current = self.get_throttle_multiplier(id).await?;
        if current >= Decimal::ONE {
            return Ok(Decimal::ONE);
        }

        let next = (current * self.settings.recovery_factor).min(Decimal::ONE);
        self.store_multiplier(id, next).await?;

        if next >= Decimal::ONE {
            info!(identity = %id, "Throttle lifted");
        } else {
            info!(identity = %id, from = %current, to = %next, "Throttle recovering");
        }
        Ok(next)
    }

    pub async fn apply_throttle(&self, id: &str, size: Decimal) -> Result<Decimal, StorageError> {
        let multiplier = self.get_throttle_multiplier(id).await?;
        Ok(size * multiplier)
    }

    /// Records the streak when it qualifies, then sizes the position.
    pub async fn adjust_position_size(
        &self,
        id: &str,
        consecutive_losses: u32,
        size: Decimal,
    ) -> Result<SizeAdjustment, StorageError> {
        if consecutive_losses >= self.settings.loss_threshold {
            self.record_loss(id, consecutive_losses).await?;
        }

        let multiplier = self.get_throttle_multiplier(id).await?;
        let adjusted = size * multiplier;

        let message = if adjusted < size {
            format!(
                "position size reduced by {}% after {} consecutive losses ({} -> {})",
                ((Decimal::ONE - multiplier) * Decimal::ONE_HUNDRED)
                    .round_dp(2)
                    .normalize(),
                consecutive_losses,
                size,
                adjusted.normalize()
            )
        } else {
            String::new()
        };

        Ok(SizeAdjustment {
            size: adjusted,
            multiplier,
            message,
        })
    }

    pub async fn is_throttled(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.get_throttle_multiplier(id).await? < Decimal::ONE)
    }

    pub async fn get_status(&self, id: &str) -> Result<ThrottleStatus, StorageError> {
        let multiplier = self.get_throttle_multiplier(id).await?;
        Ok(ThrottleStatus {
            multiplier,
            is_throttled: multiplier < Decimal::ONE,
            effective_losses: self.effective_losses(multiplier),
        })
    }

    /// Removes the record; the multiplier reads as one afterwards.
    pub async fn reset(&self, id: &str) -> Result<(), StorageError> {
        self.store.del(&throttle_key(id)).await?;
        info!(identity = %id, "Throttle reset");
        Ok(())
    }

    /// `round(ln(m) / ln(reduction))`, zero where undefined.
    fn effective_losses(&self, multiplier: Decimal) -> u32 {
        let (Some(m), Some(r)) = (
            multiplier.to_f64(),
            self.settings.reduction_factor.to_f64(),
        ) else {
            return 0;
        };
        if m >= 1.0 || m <= 0.0 || r >= 1.0 || r <= 0.0 {
            return 0;
        }
        let n = (m.ln() / r.ln()).round();
        if n.is_finite() && n > 0.0 { n as u32 } else { 0 }
    }

    async fn store_multiplier(&self, id: &str, multiplier: Decimal) -> Result<(), StorageError> {
        let key = throttle_key(id);
        if multiplier >= Decimal::ONE {
            self.store.del(&key).await
        } else {
            self.store
                .set(&key, &multiplier.normalize().to_string(), Some(self.settings.ttl))
                .await
        }
    }
}

fn throttle_key(id: &str) -> String {
    format!("{}{}", THROTTLE_KEY_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn throttle() -> (PositionThrottle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let throttle = PositionThrottle::new(store.clone(), ThrottleSettings::default());
        (throttle, store)
    }

    #[test]
    fn test_multiplier_schedule() {
        let s = ThrottleSettings::default();
        assert_eq!(s.multiplier_for(0), Decimal::ONE);
        assert_eq!(s.multiplier_for(1), dec!(0.7));
        assert_eq!(s.multiplier_for(2), dec!(0.49));
        assert_eq!(s.multiplier_for(3), dec!(0.343));
        assert_eq!(s.multiplier_for(7), dec!(0.1));
        assert_eq!(s.multiplier_for(u32::MAX), dec!(0.1));
    }

    #[test]
    fn test_multiplier_with_higher_threshold() {
        let s = ThrottleSettings {
            loss_threshold: 3,
            ..ThrottleSettings::default()
        };
        assert_eq!(s.multiplier_for(2), Decimal::ONE);
        assert_eq!(s.multiplier_for(3), dec!(0.7));
        assert_eq!(s.multiplier_for(4), dec!(0.49));
    }

    #[tokio::test]
    async fn test_absent_record_is_one() {
        let (throttle, _) = throttle();
        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), Decimal::ONE);
        assert!(!throttle.is_throttled("acct").await.unwrap());
    }

    #[tokio::test]
    async fn test_loss_then_recovery_to_one() {
        let (throttle, store) = throttle();

        let m = throttle.record_loss("acct", 3).await.unwrap();
        assert_eq!(m, dec!(0.343));
        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), dec!(0.343));

        assert_eq!(throttle.record_win("acct").await.unwrap(), dec!(0.5145));
        assert_eq!(throttle.record_win("acct").await.unwrap(), dec!(0.77175));
        assert_eq!(throttle.record_win("acct").await.unwrap(), Decimal::ONE);

        assert_eq!(store.get("risk:position_throttle:acct").await.unwrap(), None);
        assert_eq!(throttle.record_win("acct").await.unwrap(), Decimal::ONE);
    }

    #[tokio::test]
    async fn test_loss_recomputes_instead_of_compounding() {
        let (throttle, _) = throttle();

        throttle.record_loss("acct", 2).await.unwrap();
        throttle.record_loss("acct", 2).await.unwrap();

        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), dec!(0.49));
    }

    #[tokio::test]
    async fn test_loss_below_threshold_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let settings = ThrottleSettings {
            loss_threshold: 2,
            ..ThrottleSettings::default()
        };
        let throttle = PositionThrottle::new(store.clone(), settings);

        assert_eq!(throttle.record_loss("acct", 1).await.unwrap(), Decimal::ONE);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_apply_throttle() {
        let (throttle, _) = throttle();
        assert_eq!(throttle.apply_throttle("acct", dec!(1000)).await.unwrap(), dec!(1000));

        throttle.record_loss("acct", 1).await.unwrap();
        assert_eq!(throttle.apply_throttle("acct", dec!(1000)).await.unwrap(), dec!(700));
    }

    #[tokio::test]
    async fn test_adjust_position_size() {
        let (throttle, _) = throttle();

        let unchanged = throttle.adjust_position_size("acct", 0, dec!(500)).await.unwrap();
        assert_eq!(unchanged.size, dec!(500));
        assert!(unchanged.message.is_empty());

        let reduced = throttle.adjust_position_size("acct", 2, dec!(500)).await.unwrap();
        assert_eq!(reduced.size, dec!(245));
        assert_eq!(reduced.multiplier, dec!(0.49));
        assert!(reduced.message.contains("reduced by 51%"));
    }

    #[tokio::test]
    async fn test_status_back_derives_losses() {
        let (throttle, _) = throttle();
        throttle.record_loss("acct", 3).await.unwrap();

        let status = throttle.get_status("acct").await.unwrap();
        assert_eq!(
            status,
            ThrottleStatus {
                multiplier: dec!(0.343),
                is_throttled: true,
                effective_losses: 3,
            }
        );

        throttle.reset("acct").await.unwrap();
        let status = throttle.get_status("acct").await.unwrap();
        assert!(!status.is_throttled);
        assert_eq!(status.effective_losses, 0);
    }

    #[tokio::test]
    async fn test_reads_are_stable_and_reset_restores_one() {
        let (throttle, _) = throttle();
        throttle.record_loss("acct", 4).await.unwrap();

        let first = throttle.get_throttle_multiplier("acct").await.unwrap();
        let second = throttle.get_throttle_multiplier("acct").await.unwrap();
        assert_eq!(first, second);

        throttle.reset("acct").await.unwrap();
        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), Decimal::ONE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_ttl() {
        let (throttle, store) = throttle();
        throttle.record_loss("acct", 1).await.unwrap();
        assert_eq!(store.ttl("risk:position_throttle:acct").await, Some(DEFAULT_TTL));

        tokio::time::advance(DEFAULT_TTL + Duration::from_secs(1)).await;
        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), Decimal::ONE);
    }

    #[tokio::test]
    async fn test_disabled_throttle() {
        let store = Arc::new(MemoryStore::new());
        let settings = ThrottleSettings {
            enabled: false,
            ..ThrottleSettings::default()
        };
        let throttle = PositionThrottle::new(store.clone(), settings);

        assert_eq!(throttle.record_loss("acct", 5).await.unwrap(), Decimal::ONE);
        assert_eq!(throttle.apply_throttle("acct", dec!(100)).await.unwrap(), dec!(100));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unreadable_record_reads_as_one() {
        let (throttle, store) = throttle();
        store.set("risk:position_throttle:acct", "half", None).await.unwrap();
        assert_eq!(throttle.get_throttle_multiplier("acct").await.unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_from_config() {
        let cfg = ThrottleConfig {
            enabled: true,
            loss_threshold: Some(2),
            reduction_factor: Some("0.5".to_string()),
            min_position_multiplier: None,
            recovery_factor: Some("2".to_string()),
            ttl: Duration::ZERO,
        };
        let s = ThrottleSettings::from_config(Some(&cfg));
        assert_eq!(s.loss_threshold, 2);
        assert_eq!(s.reduction_factor, dec!(0.5));
        assert_eq!(s.min_multiplier, dec!(0.1));
        assert_eq!(s.recovery_factor, dec!(2));
        assert_eq!(s.ttl, DEFAULT_TTL);
    }
}
