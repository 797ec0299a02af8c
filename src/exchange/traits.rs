use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{OrderResult, OrderSide, Position};
use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Narrow venue capability consumed by the resilience core.
///
/// `get_position` is the read path (guarded by the circuit breaker);
/// the other two are write paths (wrapped in bounded retries).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Current position for a symbol; flat positions report zero quantity.
    async fn get_position(&self, symbol: &str) -> Result<Position>;

    /// Cancel every pending order for a symbol, returning the count cancelled.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32>;

    /// Submit a reduce-only market order that shrinks or closes an existing
    /// position and can never open a new one.
    async fn submit_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult>;
}
