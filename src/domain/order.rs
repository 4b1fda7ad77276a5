//! Order requests, execution results and exchange-side order snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// OrderSide represents the direction of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err("side is required".to_string()),
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {}", other)),
        }
    }
}

/// OrderType selects the execution strategy used by the smart executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Executes immediately at the best available price.
    Market,
    /// Rests on the book at the given price or better.
    Limit,
    /// Fill-or-kill: fills completely or is cancelled.
    Fok,
    /// Immediate-or-cancel: fills what is available, the rest is cancelled.
    Ioc,
    /// Good-till-cancelled limit order.
    Gtc,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Fok => "fok",
            OrderType::Ioc => "ioc",
            OrderType::Gtc => "gtc",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "fok" => Ok(OrderType::Fok),
            "ioc" => Ok(OrderType::Ioc),
            "gtc" => Ok(OrderType::Gtc),
            other => Err(format!("unknown order type: {}", other)),
        }
    }
}

/// Terminal status of a smart execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The requested amount (or an accepted share of it) was filled.
    Filled,
    /// An IOC order filled above the minimum share but not completely.
    Partial,
    /// A resting order was accepted by the exchange; no fill wait was done.
    Placed,
    Cancelled,
    /// The fill wait hit its deadline or the caller cancelled it.
    Expired,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Filled => "filled",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Placed => "placed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Expired => "expired",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// OrderRequest describes one logical order handed to the smart executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Amount of base currency to trade.
    pub amount: Decimal,
    /// Limit price, also used as the slippage reference for market orders.
    pub price: Option<Decimal>,
    /// Overrides the engine's slippage guardrail, in percent.
    pub max_slippage_percent: Option<Decimal>,
    /// Overrides the engine's default fill-wait timeout.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Overrides the engine's maximum attempt count.
    pub max_retries: Option<u32>,
}

impl OrderRequest {
    /// Creates a request with no price and no overrides.
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            side,
            order_type,
            amount,
            price: None,
            max_slippage_percent: None,
            timeout: None,
            max_retries: None,
        }
    }

    /// Shorthand for a market order.
    pub fn market(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
    ) -> Self {
        Self::new(exchange, symbol, side, OrderType::Market, amount)
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_max_slippage(mut self, percent: Decimal) -> Self {
        self.max_slippage_percent = Some(percent);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// OrderResult is the outcome of a smart execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    /// ID of the last order placed on the exchange, if any was accepted.
    pub order_id: Option<String>,
    pub status: ExecutionStatus,
    /// Amount filled across all attempts.
    pub filled_amount: Decimal,
    /// Amount of the original request left unfilled.
    pub remaining_amount: Decimal,
    /// Average fill price of the final fill.
    pub fill_price: Option<Decimal>,
    /// Realized slippage against the request price, in percent.
    pub slippage_percent: Decimal,
    /// Number of placement attempts made.
    pub attempts: u32,
    #[serde(skip)]
    pub execution_time: Duration,
    pub error: Option<String>,
}

impl OrderResult {
    /// Returns true if the order was filled, partially accepted, or placed.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Filled | ExecutionStatus::Partial | ExecutionStatus::Placed
        )
    }

    /// Filled share of `requested`, in percent.
    pub fn fill_percent(&self, requested: Decimal) -> Decimal {
        fill_percent(self.filled_amount, requested)
    }
}

/// Filled share of `requested`, in percent. Zero when nothing was requested;
/// saturates at `Decimal::MAX` when the ratio is out of range.
pub fn fill_percent(filled: Decimal, requested: Decimal) -> Decimal {
    if requested <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    filled
        .checked_div(requested)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::MAX)
}

/// Snapshot of an order still resting on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub filled: Decimal,
    pub average: Option<Decimal>,
    pub status: String,
}

/// Snapshot of an order that left the book (filled, cancelled or expired).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedOrder {
    pub id: String,
    pub filled: Decimal,
    pub average: Option<Decimal>,
    pub price: Option<Decimal>,
    pub status: String,
    pub symbol: String,
    pub exchange: String,
}

impl ClosedOrder {
    /// Average fill price, falling back to the order price.
    pub fn fill_price(&self) -> Option<Decimal> {
        self.average.or(self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_order_side() {
        assert_eq!("BUY".parse::<OrderSide>(), Ok(OrderSide::Buy));
        assert_eq!(" sell ".parse::<OrderSide>(), Ok(OrderSide::Sell));
        assert_eq!("".parse::<OrderSide>(), Err("side is required".to_string()));
        assert!("hold".parse::<OrderSide>().is_err());
    }

    #[test]
    fn test_parse_order_type_round_trip() {
        for t in [
            OrderType::Market,
            OrderType::Limit,
            OrderType::Fok,
            OrderType::Ioc,
            OrderType::Gtc,
        ] {
            assert_eq!(t.to_string().parse::<OrderType>(), Ok(t));
        }
    }

    #[test]
    fn test_fill_percent() {
        assert_eq!(fill_percent(dec!(0.5), dec!(2)), dec!(25));
        assert_eq!(fill_percent(dec!(1), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(
            fill_percent(dec!(1), dec!(0.0000000000000000000000000001)),
            Decimal::MAX
        );
    }

    #[test]
    fn test_closed_order_price_fallback() {
        let order = ClosedOrder {
            id: "1".into(),
            filled: dec!(1),
            average: None,
            price: Some(dec!(100)),
            status: "closed".into(),
            symbol: "BTC/USDT".into(),
            exchange: "binance".into(),
        };
        assert_eq!(order.fill_price(), Some(dec!(100)));
    }
}
