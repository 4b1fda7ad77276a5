//! Risk controls: consecutive-loss pause, position-size throttle and the
//! risk manager agent.

mod guard;
mod loss_tracker;
mod manager;
mod throttle;

pub use guard::{GuardDecision, GuardStatus, TradeGuard, TradeOutcome};
pub use loss_tracker::{ConsecutiveLossTracker, LossStats, LossTrackerSettings};
pub use manager::{AgentMetrics, RISK_REWARD_SIGNAL, RiskManagerAgent, RiskManagerSettings};
pub use throttle::{PositionThrottle, SizeAdjustment, ThrottleSettings, ThrottleStatus};
