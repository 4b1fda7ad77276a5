//! Domain models for order execution and risk assessment.

mod order;
mod risk;

pub use order::{
    ClosedOrder, ExecutionStatus, OpenOrder, OrderRequest, OrderResult, OrderSide, OrderType,
    fill_percent,
};
pub use risk::{RiskAction, RiskAssessment, RiskLevel, RiskSignal};
