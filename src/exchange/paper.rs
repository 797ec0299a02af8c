//! In-memory gateway for dry-run mode.
//!
//! Tracks positions and pending-order counts locally so the full
//! liquidation path can be exercised without touching the venue.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::{OrderResult, OrderSide, OrderStatus, Position, PositionSide};
use crate::error::Result;
use crate::exchange::ExchangeGateway;

#[derive(Default)]
struct PaperBook {
    positions: HashMap<String, Position>,
    open_orders: HashMap<String, u32>,
}

pub struct PaperGateway {
    book: RwLock<PaperBook>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self {
            book: RwLock::new(PaperBook::default()),
        }
    }

    /// Seed an open position, e.g. from a previous session snapshot.
    pub async fn seed_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) {
        let mut book = self.book.write().await;
        book.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                side,
                quantity,
                entry_price,
                unrealized_pnl: Decimal::ZERO,
            },
        );
    }

    /// Seed pending orders for a symbol.
    pub async fn seed_open_orders(&self, symbol: &str, count: u32) {
        let mut book = self.book.write().await;
        book.open_orders.insert(symbol.to_string(), count);
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn get_position(&self, symbol: &str) -> Result<Position> {
        let book = self.book.read().await;
        Ok(book
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol)))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32> {
        let mut book = self.book.write().await;
        let count = book.open_orders.remove(symbol).unwrap_or(0);
        info!(symbol, count, "[paper] cancelled pending orders");
        Ok(count)
    }

    async fn submit_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult> {
        let mut book = self.book.write().await;
        book.positions.remove(symbol);
        info!(symbol, %side, %quantity, "[paper] reduce-only market close");

        Ok(OrderResult {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            status: OrderStatus::Filled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn unseeded_symbol_is_flat() {
        let gw = PaperGateway::new();
        let pos = gw.get_position("BTCUSDT").await.expect("position");
        assert!(pos.is_flat());
    }

    #[tokio::test]
    async fn close_removes_position() {
        let gw = PaperGateway::new();
        gw.seed_position("BTCUSDT", PositionSide::Long, dec!(0.5), dec!(95000))
            .await;

        let pos = gw.get_position("BTCUSDT").await.expect("position");
        assert!(!pos.is_flat());

        let result = gw
            .submit_reduce_only_market_order("BTCUSDT", pos.side.close_side(), pos.quantity)
            .await
            .expect("close");
        assert_eq!(result.status, OrderStatus::Filled);

        let pos = gw.get_position("BTCUSDT").await.expect("position");
        assert!(pos.is_flat());
    }

    #[tokio::test]
    async fn cancel_reports_seeded_count() {
        let gw = PaperGateway::new();
        gw.seed_open_orders("ETHUSDT", 3).await;

        assert_eq!(gw.cancel_all_orders("ETHUSDT").await.expect("cancel"), 3);
        // Second sweep finds nothing left
        assert_eq!(gw.cancel_all_orders("ETHUSDT").await.expect("cancel"), 0);
    }
}
