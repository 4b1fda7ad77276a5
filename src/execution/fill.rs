//! Bounded polling for order fills.

use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exchanges::BaseExecutor;

/// Final state of an order read from the closed-orders list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fill {
    pub filled: Decimal,
    pub price: Option<Decimal>,
    pub status: String,
}

/// Outcome of one fill wait.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FillWait {
    /// The order left the book.
    Closed(Fill),
    /// Deadline reached while the order was still open.
    TimedOut {
        filled: Decimal,
        price: Option<Decimal>,
    },
    /// The caller cancelled the wait.
    Cancelled {
        filled: Decimal,
        price: Option<Decimal>,
    },
    /// The order is neither open nor closed.
    Missing,
}

enum Poll {
    Open {
        filled: Decimal,
        average: Option<Decimal>,
    },
    Closed(Fill),
    Missing,
    Unavailable,
}

/// Where and how to look for an order while waiting.
pub(crate) struct FillQuery<'a> {
    pub exchange: &'a str,
    pub symbol: &'a str,
    pub order_id: &'a str,
    pub poll_interval: Duration,
    pub lookback: usize,
}

/// Polls open orders, then closed orders, until the order closes, the
/// timeout elapses, or `cancel` fires. Exchange errors during a poll are
/// logged and the poll is repeated on the next tick.
pub(crate) async fn wait_for_fill<E>(
    executor: &E,
    query: &FillQuery<'_>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> FillWait
where
    E: BaseExecutor + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut filled = Decimal::ZERO;
    let mut price = None;

    loop {
        let poll = tokio::select! {
            biased;
            () = cancel.cancelled() => return FillWait::Cancelled { filled, price },
            () = tokio::time::sleep_until(deadline) => return FillWait::TimedOut { filled, price },
            poll = poll_once(executor, query) => poll,
        };

        match poll {
            Poll::Open {
                filled: open_filled,
                average,
            } => {
                filled = open_filled;
                price = average.or(price);
                debug!(
                    order_id = %query.order_id,
                    filled = %filled,
                    "Order still open"
                );
            }
            Poll::Closed(fill) => {
                debug!(
                    order_id = %query.order_id,
                    status = %fill.status,
                    filled = %fill.filled,
                    "Order closed"
                );
                return FillWait::Closed(fill);
            }
            Poll::Missing => return FillWait::Missing,
            Poll::Unavailable => {}
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return FillWait::Cancelled { filled, price },
            () = tokio::time::sleep_until(deadline) => return FillWait::TimedOut { filled, price },
            () = tokio::time::sleep(query.poll_interval) => {}
        }
    }
}

async fn poll_once<E>(executor: &E, query: &FillQuery<'_>) -> Poll
where
    E: BaseExecutor + ?Sized,
{
    match executor.get_open_orders(query.exchange, query.symbol).await {
        Ok(open) => {
            if let Some(order) = open.into_iter().find(|o| o.id == query.order_id) {
                return Poll::Open {
                    filled: order.filled,
                    average: order.average,
                };
            }
        }
        Err(e) => {
            warn!(order_id = %query.order_id, error = %e, "Failed to fetch open orders");
            return Poll::Unavailable;
        }
    }

    match find_closed(executor, query).await {
        Ok(Some(fill)) => Poll::Closed(fill),
        Ok(None) => Poll::Missing,
        Err(()) => Poll::Unavailable,
    }
}

/// Looks the order up in the closed-orders list once.
pub(crate) async fn find_closed<E>(executor: &E, query: &FillQuery<'_>) -> Result<Option<Fill>, ()>
where
    E: BaseExecutor + ?Sized,
{
    match executor
        .get_closed_orders(query.exchange, query.symbol, query.lookback)
        .await
    {
        Ok(closed) => Ok(closed
            .into_iter()
            .find(|o| o.id == query.order_id)
            .map(|o| Fill {
                filled: o.filled,
                price: o.fill_price(),
                status: o.status,
            })),
        Err(e) => {
            warn!(order_id = %query.order_id, error = %e, "Failed to fetch closed orders");
            Err(())
        }
    }
}
