//! Base execution port: the exchange trading client consumed by the smart executor.

mod classify;

pub use classify::is_retryable_message;

use crate::domain::{ClosedOrder, OpenOrder, OrderSide, OrderType};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Exchange errors, classified as transient or permanent at the port boundary.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Connection refused, reset or dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// Request did not complete in time.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Exchange rejected the request due to rate limiting.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// Exchange is temporarily unavailable (maintenance, 5xx).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Insufficient funds for the operation.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Order parameters were rejected as invalid.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Order not found.
    #[error("order {0} not found")]
    OrderNotFound(String),

    /// Order rejected by exchange business rules.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Untyped error from a legacy or opaque client.
    #[error("API error: {0}")]
    Api(String),
}

impl ExchangeError {
    /// Returns true if retrying the same request may succeed.
    ///
    /// Typed variants carry their own class; `Api` falls back to keyword matching.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Connection(_)
            | ExchangeError::Timeout(_)
            | ExchangeError::RateLimited(_)
            | ExchangeError::Unavailable(_) => true,
            ExchangeError::InsufficientFunds
            | ExchangeError::InvalidOrder(_)
            | ExchangeError::OrderNotFound(_)
            | ExchangeError::Rejected(_) => false,
            ExchangeError::Api(message) => is_retryable_message(message),
        }
    }
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// BaseExecutor places, lists and cancels orders on an exchange.
///
/// Implementations are expected to be cheap to call concurrently; the smart
/// executor never holds two live orders for one logical request.
#[async_trait]
pub trait BaseExecutor: Send + Sync {
    /// Submits a new order and returns the exchange-assigned order ID.
    /// `price` is ignored for market orders.
    async fn place_order(
        &self,
        exchange: &str,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<String>;

    /// Lists orders still resting on the book for a symbol.
    async fn get_open_orders(&self, exchange: &str, symbol: &str) -> Result<Vec<OpenOrder>>;

    /// Lists the most recent `limit` closed orders for a symbol.
    async fn get_closed_orders(
        &self,
        exchange: &str,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<ClosedOrder>>;

    /// Cancels an open order by its ID.
    /// Returns `OrderNotFound` if the order is already filled or cancelled.
    async fn cancel_order(&self, exchange: &str, order_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_errors_carry_class() {
        assert!(ExchangeError::Connection("reset".into()).is_transient());
        assert!(ExchangeError::Timeout("10s".into()).is_transient());
        assert!(ExchangeError::RateLimited("slow down".into()).is_transient());
        assert!(ExchangeError::Unavailable("maintenance".into()).is_transient());

        assert!(!ExchangeError::InsufficientFunds.is_transient());
        assert!(!ExchangeError::InvalidOrder("bad price".into()).is_transient());
        assert!(!ExchangeError::OrderNotFound("42".into()).is_transient());
        assert!(!ExchangeError::Rejected("market closed".into()).is_transient());
    }

    #[test]
    fn test_untyped_errors_use_keywords() {
        assert!(ExchangeError::Api("HTTP 503 Service Unavailable".into()).is_transient());
        assert!(!ExchangeError::Api("invalid signature".into()).is_transient());
    }
}
