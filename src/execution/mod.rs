//! Smart order execution on top of a base executor.
//!
//! Adds validation, retries with exponential backoff, order-type strategies
//! (market, limit, FOK, IOC, GTC), bounded fill polling, slippage protection
//! and partial-fill handling.

mod fill;
mod settings;
mod slippage;

pub use settings::ExecutorSettings;
pub use slippage::calculate_slippage;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    ClosedOrder, ExecutionStatus, OpenOrder, OrderRequest, OrderResult, OrderSide, OrderType,
    fill_percent,
};
use crate::exchanges::{self, BaseExecutor, ExchangeError};
use fill::{FillQuery, FillWait, find_closed, wait_for_fill};

/// Execution errors. Every runtime failure carries the partial result known
/// at the time (last order ID, amount filled so far, attempts).
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Malformed request; nothing was sent to the exchange.
    #[error("{0}")]
    Validation(String),

    /// Retries exhausted, non-retryable error, or fill guardrail violated.
    #[error("order failed: {reason}")]
    Failed {
        reason: String,
        result: Box<OrderResult>,
    },

    /// Fill wait hit its deadline or was cancelled.
    #[error("order expired: {reason}")]
    Expired {
        reason: String,
        result: Box<OrderResult>,
    },
}

impl ExecutionError {
    /// Returns the partial result, if the request got past validation.
    pub fn result(&self) -> Option<&OrderResult> {
        match self {
            ExecutionError::Validation(_) => None,
            ExecutionError::Failed { result, .. } | ExecutionError::Expired { result, .. } => {
                Some(result)
            }
        }
    }

    fn result_mut(&mut self) -> Option<&mut OrderResult> {
        match self {
            ExecutionError::Validation(_) => None,
            ExecutionError::Failed { result, .. } | ExecutionError::Expired { result, .. } => {
                Some(result)
            }
        }
    }

    fn failed(reason: impl Into<String>, mut result: OrderResult) -> Self {
        let reason = reason.into();
        result.status = ExecutionStatus::Failed;
        result.error = Some(reason.clone());
        ExecutionError::Failed {
            reason,
            result: Box::new(result),
        }
    }

    fn expired(reason: impl Into<String>, mut result: OrderResult) -> Self {
        let reason = reason.into();
        result.status = ExecutionStatus::Expired;
        result.error = Some(reason.clone());
        ExecutionError::Expired {
            reason,
            result: Box::new(result),
        }
    }
}

/// Result type for smart execution.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// SmartExecutor wraps a base executor with retry and fill-handling policy.
///
/// It holds no per-request state, so one instance can serve concurrent calls.
pub struct SmartExecutor<E: ?Sized> {
    inner: Arc<E>,
    settings: ExecutorSettings,
}

impl<E> SmartExecutor<E>
where
    E: BaseExecutor + ?Sized,
{
    /// Creates a new smart executor.
    pub fn new(inner: Arc<E>, settings: ExecutorSettings) -> Self {
        Self { inner, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Executes an order using the strategy for its type.
    pub async fn place_order_smart(&self, request: &OrderRequest) -> Result<OrderResult> {
        self.place_order_smart_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Executes an order; cancelling `cancel` aborts any wait in progress and
    /// yields an `Expired` result after a best-effort cancel on the exchange.
    pub async fn place_order_smart_with_cancel(
        &self,
        request: &OrderRequest,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        validate(request)?;

        let started = Instant::now();

        info!(
            exchange = %request.exchange,
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            amount = %request.amount,
            price = ?request.price,
            "Executing order"
        );

        let mut outcome = match request.order_type {
            OrderType::Fok => self.execute_fok(request, cancel).await,
            OrderType::Ioc => self.execute_ioc(request, cancel).await,
            OrderType::Market | OrderType::Limit | OrderType::Gtc => {
                self.execute_with_retry(request, cancel).await
            }
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(ref mut result) => {
                result.execution_time = elapsed;
                info!(
                    order_id = ?result.order_id,
                    status = %result.status,
                    filled = %result.filled_amount,
                    attempts = result.attempts,
                    elapsed = ?elapsed,
                    "Order executed"
                );
            }
            Err(ref mut e) => {
                let message = e.to_string();
                if let Some(result) = e.result_mut() {
                    result.execution_time = elapsed;
                    warn!(
                        order_id = ?result.order_id,
                        status = %result.status,
                        filled = %result.filled_amount,
                        attempts = result.attempts,
                        error = %message,
                        "Order execution failed"
                    );
                }
            }
        }

        outcome
    }

    /// Market, limit and GTC orders: retry placement with backoff; market
    /// orders additionally wait for the fill and enforce the guardrails.
    async fn execute_with_retry(
        &self,
        request: &OrderRequest,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        let max_attempts = request
            .max_retries
            .unwrap_or(self.settings.max_retries)
            .max(1);
        let max_slippage = request
            .max_slippage_percent
            .unwrap_or(self.settings.max_slippage_percent);
        let min_partial = self.settings.min_partial_fill_percent;
        let timeout = self.timeout_for(request);

        let mut remaining = request.amount;
        let mut filled_total = Decimal::ZERO;
        let mut last_order_id: Option<String> = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result_so_far = |order_id: Option<String>, filled: Decimal| OrderResult {
                order_id,
                status: ExecutionStatus::Failed,
                filled_amount: filled,
                remaining_amount: (request.amount - filled).max(Decimal::ZERO),
                fill_price: None,
                slippage_percent: Decimal::ZERO,
                attempts: attempt,
                execution_time: Duration::ZERO,
                error: None,
            };

            let placement = self.inner.place_order(
                &request.exchange,
                &request.symbol,
                request.side,
                request.order_type,
                remaining,
                request.price,
            );
            let placed = match bounded(placement, timeout, cancel).await {
                Bounded::Done(placed) => placed,
                Bounded::TimedOut => {
                    return Err(ExecutionError::expired(
                        format!("placement not acknowledged within {:?}", timeout),
                        result_so_far(last_order_id, filled_total),
                    ));
                }
                Bounded::Cancelled => {
                    return Err(ExecutionError::expired(
                        "execution cancelled",
                        result_so_far(last_order_id, filled_total),
                    ));
                }
            };

            match placed {
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_transient() {
                        return Err(ExecutionError::failed(
                            format!("non-retryable error: {}", e),
                            result_so_far(last_order_id, filled_total),
                        ));
                    }
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Order placement failed"
                    );
                }
                Ok(order_id) => {
                    debug!(order_id = %order_id, attempt, amount = %remaining, "Order placed");
                    last_order_id = Some(order_id.clone());

                    if request.order_type != OrderType::Market {
                        let mut result = result_so_far(Some(order_id), filled_total);
                        result.status = ExecutionStatus::Placed;
                        return Ok(result);
                    }

                    let query = self.query(request, &order_id);
                    match wait_for_fill(self.inner.as_ref(), &query, timeout, cancel).await {
                        FillWait::Closed(fill) => {
                            let slippage = calculate_slippage(fill.price, request.price);
                            let percent = fill_percent(fill.filled, remaining);

                            if slippage > max_slippage {
                                self.cancel_best_effort(request, &order_id).await;
                                last_error = format!(
                                    "slippage {}% exceeds maximum {}%",
                                    slippage.round_dp(4),
                                    max_slippage
                                );
                                warn!(order_id = %order_id, attempt, "{}", last_error);
                            } else if percent < Decimal::ONE_HUNDRED && percent < min_partial {
                                self.cancel_best_effort(request, &order_id).await;
                                filled_total = filled_total.saturating_add(fill.filled);
                                remaining = (request.amount - filled_total).max(Decimal::ZERO);
                                last_error = format!(
                                    "partial fill {}% below minimum {}%",
                                    percent.round_dp(2),
                                    min_partial
                                );
                                info!(
                                    order_id = %order_id,
                                    attempt,
                                    remaining = %remaining,
                                    "{}",
                                    last_error
                                );
                            } else {
                                filled_total = filled_total.saturating_add(fill.filled);
                                let mut result = result_so_far(Some(order_id), filled_total);
                                result.status = ExecutionStatus::Filled;
                                result.fill_price = fill.price;
                                result.slippage_percent = slippage;
                                return Ok(result);
                            }
                        }
                        FillWait::Missing => {
                            last_error = "order not filled or cancelled".to_string();
                            warn!(order_id = %order_id, attempt, "{}", last_error);
                        }
                        FillWait::TimedOut { filled, price } => {
                            self.cancel_best_effort(request, &order_id).await;
                            let mut result =
                                result_so_far(Some(order_id), filled_total.saturating_add(filled));
                            result.fill_price = price;
                            return Err(ExecutionError::expired(
                                format!("fill not confirmed within {:?}", timeout),
                                result,
                            ));
                        }
                        FillWait::Cancelled { filled, price } => {
                            self.cancel_best_effort(request, &order_id).await;
                            let mut result =
                                result_so_far(Some(order_id), filled_total.saturating_add(filled));
                            result.fill_price = price;
                            return Err(ExecutionError::expired("execution cancelled", result));
                        }
                    }
                }
            }

            if attempt < max_attempts && !self.backoff(attempt, cancel).await {
                return Err(ExecutionError::expired(
                    "execution cancelled",
                    result_so_far(last_order_id, filled_total),
                ));
            }
        }

        let result = OrderResult {
            order_id: last_order_id,
            status: ExecutionStatus::Failed,
            filled_amount: filled_total,
            remaining_amount: (request.amount - filled_total).max(Decimal::ZERO),
            fill_price: None,
            slippage_percent: Decimal::ZERO,
            attempts: max_attempts,
            execution_time: Duration::ZERO,
            error: None,
        };
        Err(ExecutionError::failed(
            format!("max retries ({}) exceeded: {}", max_attempts, last_error),
            result,
        ))
    }

    /// Fill-or-kill: place as limit and require a complete fill within the timeout.
    async fn execute_fok(
        &self,
        request: &OrderRequest,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        let timeout = self.timeout_for(request);
        let order_id = self.place_single(request, timeout, cancel).await?;
        let query = self.query(request, &order_id);

        let mut result = self.empty_result(request, &order_id);

        let (filled, price) = match wait_for_fill(self.inner.as_ref(), &query, timeout, cancel).await
        {
            FillWait::Closed(fill) => (fill.filled, fill.price),
            FillWait::TimedOut { filled, price } => {
                self.cancel_best_effort(request, &order_id).await;
                self.settle(&query, filled, price, timeout).await
            }
            FillWait::Cancelled { filled, price } => {
                self.cancel_best_effort(request, &order_id).await;
                result.filled_amount = filled;
                result.fill_price = price;
                return Err(ExecutionError::expired("execution cancelled", result));
            }
            FillWait::Missing => {
                return Err(ExecutionError::failed("order not filled or cancelled", result));
            }
        };

        self.apply_fill(&mut result, request, filled, price);

        if filled >= request.amount {
            result.status = ExecutionStatus::Filled;
            return Ok(result);
        }

        self.cancel_best_effort(request, &order_id).await;
        Err(ExecutionError::failed(
            format!(
                "FOK order not fully filled ({} of {})",
                filled, request.amount
            ),
            result,
        ))
    }

    /// Immediate-or-cancel: wait briefly, cancel the rest, accept a large
    /// enough partial fill.
    async fn execute_ioc(
        &self,
        request: &OrderRequest,
        cancel: &CancellationToken,
    ) -> Result<OrderResult> {
        let timeout = self.timeout_for(request);
        let order_id = self.place_single(request, timeout, cancel).await?;
        let query = self.query(request, &order_id);
        let wait = self.settings.ioc_wait.min(timeout);

        let mut result = self.empty_result(request, &order_id);

        let outcome = wait_for_fill(self.inner.as_ref(), &query, wait, cancel).await;
        self.cancel_best_effort(request, &order_id).await;

        let (filled, price) = match outcome {
            FillWait::Closed(fill) => (fill.filled, fill.price),
            FillWait::TimedOut { filled, price } => {
                self.settle(&query, filled, price, timeout).await
            }
            FillWait::Cancelled { filled, price } => {
                result.filled_amount = filled;
                result.fill_price = price;
                return Err(ExecutionError::expired("execution cancelled", result));
            }
            FillWait::Missing => {
                return Err(ExecutionError::failed("order not filled or cancelled", result));
            }
        };

        self.apply_fill(&mut result, request, filled, price);

        let percent = fill_percent(filled, request.amount);
        let min_partial = self.settings.min_partial_fill_percent;
        if percent < min_partial {
            return Err(ExecutionError::failed(
                format!(
                    "IOC fill {}% below minimum {}%",
                    percent.round_dp(2),
                    min_partial
                ),
                result,
            ));
        }

        result.status = if filled >= request.amount {
            ExecutionStatus::Filled
        } else {
            ExecutionStatus::Partial
        };
        Ok(result)
    }

    /// Places a single limit order for the FOK/IOC strategies.
    async fn place_single(
        &self,
        request: &OrderRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let unplaced = OrderResult {
            order_id: None,
            status: ExecutionStatus::Failed,
            filled_amount: Decimal::ZERO,
            remaining_amount: request.amount,
            fill_price: None,
            slippage_percent: Decimal::ZERO,
            attempts: 1,
            execution_time: Duration::ZERO,
            error: None,
        };

        let placement = self.inner.place_order(
            &request.exchange,
            &request.symbol,
            request.side,
            OrderType::Limit,
            request.amount,
            request.price,
        );
        match bounded(placement, timeout, cancel).await {
            Bounded::Done(Ok(order_id)) => Ok(order_id),
            Bounded::Done(Err(e)) => Err(ExecutionError::failed(
                format!("placement failed: {}", e),
                unplaced,
            )),
            Bounded::TimedOut => Err(ExecutionError::expired(
                format!("placement not acknowledged within {:?}", timeout),
                unplaced,
            )),
            Bounded::Cancelled => Err(ExecutionError::expired("execution cancelled", unplaced)),
        }
    }

    /// Re-reads the closed order after a cancel so late fills are counted.
    async fn settle(
        &self,
        query: &FillQuery<'_>,
        filled: Decimal,
        price: Option<Decimal>,
        limit: Duration,
    ) -> (Decimal, Option<Decimal>) {
        match tokio::time::timeout(limit, find_closed(self.inner.as_ref(), query)).await {
            Ok(Ok(Some(fill))) if fill.filled >= filled => (fill.filled, fill.price.or(price)),
            _ => (filled, price),
        }
    }

    fn apply_fill(
        &self,
        result: &mut OrderResult,
        request: &OrderRequest,
        filled: Decimal,
        price: Option<Decimal>,
    ) {
        result.filled_amount = filled;
        result.remaining_amount = (request.amount - filled).max(Decimal::ZERO);
        result.fill_price = price;
        result.slippage_percent = calculate_slippage(price, request.price);
    }

    fn empty_result(&self, request: &OrderRequest, order_id: &str) -> OrderResult {
        OrderResult {
            order_id: Some(order_id.to_string()),
            status: ExecutionStatus::Failed,
            filled_amount: Decimal::ZERO,
            remaining_amount: request.amount,
            fill_price: None,
            slippage_percent: Decimal::ZERO,
            attempts: 1,
            execution_time: Duration::ZERO,
            error: None,
        }
    }

    fn query<'a>(&self, request: &'a OrderRequest, order_id: &'a str) -> FillQuery<'a> {
        FillQuery {
            exchange: &request.exchange,
            symbol: &request.symbol,
            order_id,
            poll_interval: self.settings.poll_interval,
            lookback: self.settings.closed_order_lookback,
        }
    }

    fn timeout_for(&self, request: &OrderRequest) -> Duration {
        request
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.settings.default_timeout)
    }

    /// Sleeps before the next attempt. Returns false if cancelled meanwhile.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.settings.backoff_delay(attempt);
        debug!(attempt, delay = ?delay, "Backing off before retry");
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Cancels on the exchange, giving up after the request timeout. Runs
    /// even when the caller has cancelled.
    async fn cancel_best_effort(&self, request: &OrderRequest, order_id: &str) {
        let limit = self.timeout_for(request);
        let cancelling = self.inner.cancel_order(&request.exchange, order_id);
        match tokio::time::timeout(limit, cancelling).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(order_id = %order_id, error = %e, "Cancel failed (order may be closed)");
            }
            Err(_) => {
                warn!(order_id = %order_id, limit = ?limit, "Cancel not acknowledged in time");
            }
        }
    }
}

/// Outcome of an exchange call raced against the caller's token and a deadline.
enum Bounded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn bounded<F>(call: F, limit: Duration, cancel: &CancellationToken) -> Bounded<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Bounded::Cancelled,
        () = tokio::time::sleep(limit) => Bounded::TimedOut,
        output = call => Bounded::Done(output),
    }
}

/// Rejects malformed requests before anything reaches the exchange.
fn validate(request: &OrderRequest) -> Result<()> {
    if request.exchange.trim().is_empty() {
        return Err(ExecutionError::Validation("exchange is required".into()));
    }
    if request.symbol.trim().is_empty() {
        return Err(ExecutionError::Validation("symbol is required".into()));
    }
    if request.amount <= Decimal::ZERO {
        return Err(ExecutionError::Validation(
            "amount must be greater than zero".into(),
        ));
    }
    if request.price.is_some_and(|p| p < Decimal::ZERO) {
        return Err(ExecutionError::Validation("price must not be negative".into()));
    }
    Ok(())
}

/// The smart executor is itself a base executor: placements go through the
/// full smart policy, everything else is passed through.
#[async_trait]
impl<E> BaseExecutor for SmartExecutor<E>
where
    E: BaseExecutor + ?Sized,
{
    async fn place_order(
        &self,
        exchange: &str,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> exchanges::Result<String> {
        let mut request = OrderRequest::new(exchange, symbol, side, order_type, amount);
        request.price = price;

        match self.place_order_smart(&request).await {
            Ok(result) => result
                .order_id
                .ok_or_else(|| ExchangeError::Rejected("no order id returned".into())),
            Err(ExecutionError::Validation(message)) => Err(ExchangeError::InvalidOrder(message)),
            Err(e) => Err(ExchangeError::Rejected(e.to_string())),
        }
    }

    async fn get_open_orders(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> exchanges::Result<Vec<OpenOrder>> {
        self.inner.get_open_orders(exchange, symbol).await
    }

    async fn get_closed_orders(
        &self,
        exchange: &str,
        symbol: &str,
        limit: usize,
    ) -> exchanges::Result<Vec<ClosedOrder>> {
        self.inner.get_closed_orders(exchange, symbol, limit).await
    }

    async fn cancel_order(&self, exchange: &str, order_id: &str) -> exchanges::Result<()> {
        self.inner.cancel_order(exchange, order_id).await
    }
}
