//! End-to-end liquidation scenarios against a scriptable venue stub.
//!
//! The stub lets each test dial in open positions, pending orders, call
//! latency, and deterministic per-symbol failures, then the assertions walk
//! both the returned result and the persisted audit trail.

use async_trait::async_trait;
use krait::audit::AuditLogger;
use krait::config::LiquidationConfig;
use krait::coordination::{CircuitBreakerConfig, LiquidationManager, LiquidationState};
use krait::domain::{OrderResult, OrderSide, OrderStatus, Position, PositionSide};
use krait::error::{KraitError, Result};
use krait::exchange::ExchangeGateway;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct StubGateway {
    positions: Mutex<HashMap<String, Position>>,
    open_orders: Mutex<HashMap<String, u32>>,
    failing_closes: HashSet<String>,
    call_delay: Option<Duration>,
    position_queries: AtomicU32,
    cancel_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl StubGateway {
    fn new() -> Self {
        Self::default()
    }

    fn with_position(self, symbol: &str, side: PositionSide, quantity: Decimal) -> Self {
        self.positions.lock().unwrap().insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                side,
                quantity,
                entry_price: dec!(100),
                unrealized_pnl: Decimal::ZERO,
            },
        );
        self
    }

    fn with_open_orders(self, symbol: &str, count: u32) -> Self {
        self.open_orders
            .lock()
            .unwrap()
            .insert(symbol.to_string(), count);
        self
    }

    fn with_failing_close(mut self, symbol: &str) -> Self {
        self.failing_closes.insert(symbol.to_string());
        self
    }

    fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn total_calls(&self) -> u32 {
        self.position_queries.load(Ordering::SeqCst)
            + self.cancel_calls.load(Ordering::SeqCst)
            + self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeGateway for StubGateway {
    async fn get_position(&self, symbol: &str) -> Result<Position> {
        self.position_queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol)))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.open_orders.lock().unwrap().remove(symbol).unwrap_or(0))
    }

    async fn submit_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.failing_closes.contains(symbol) {
            return Err(KraitError::VenueCall(format!(
                "{}: close rejected by venue",
                symbol
            )));
        }

        self.positions.lock().unwrap().remove(symbol);
        Ok(OrderResult {
            order_id: format!("stub-{}", symbol),
            symbol: symbol.to_string(),
            side,
            quantity,
            status: OrderStatus::Filled,
        })
    }
}

fn armed_config() -> LiquidationConfig {
    LiquidationConfig {
        emergency_liquidation: true,
        close_positions: true,
        cancel_orders: true,
        timeout_seconds: 5.0,
        max_retries: 3,
        retry_delay_seconds: 0.1,
    }
}

fn manager_with(
    config: LiquidationConfig,
    gateway: Arc<StubGateway>,
    audit: AuditLogger,
) -> LiquidationManager {
    LiquidationManager::new(config, CircuitBreakerConfig::default(), gateway, audit)
}

async fn open_audit(tag: &str) -> (AuditLogger, PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "krait-flow-{}-{}.jsonl",
        tag,
        uuid::Uuid::new_v4()
    ));
    (AuditLogger::open(&path).await.expect("audit"), path)
}

async fn read_audit(audit: &AuditLogger, path: &PathBuf) -> Vec<serde_json::Value> {
    audit.flush().await;
    let content = tokio::fs::read_to_string(path).await.expect("read audit");
    content
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid JSON line"))
        .collect()
}

fn count_events(events: &[serde_json::Value], event_type: &str) -> usize {
    events
        .iter()
        .filter(|e| e["event_type"] == event_type)
        .count()
}

#[tokio::test]
async fn full_liquidation_completes_with_ordered_audit_trail() {
    let (audit, path) = open_audit("happy").await;
    let gateway = Arc::new(
        StubGateway::new()
            .with_position("BTCUSDT", PositionSide::Long, dec!(0.5))
            .with_position("ETHUSDT", PositionSide::Short, dec!(2))
            .with_open_orders("BTCUSDT", 2)
            .with_open_orders("ETHUSDT", 1),
    );
    let manager = manager_with(armed_config(), gateway.clone(), audit.clone());

    let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    let result = manager.execute(&symbols, "corr-happy").await;

    assert_eq!(result.state, LiquidationState::Completed);
    assert_eq!(result.positions_closed, 2);
    assert_eq!(result.positions_failed, 0);
    assert_eq!(result.orders_cancelled, 3);
    assert!(result.error_message.is_none());

    let events = read_audit(&audit, &path).await;
    assert_eq!(events.first().unwrap()["event_type"], "LIQUIDATION_START");
    assert_eq!(events.last().unwrap()["event_type"], "LIQUIDATION_COMPLETE");
    assert_eq!(count_events(&events, "ORDER_CANCELLED"), 2);
    assert_eq!(count_events(&events, "ORDER_PLACED"), 2);
    for event in &events {
        assert_eq!(event["correlation_id"], "corr-happy");
    }

    // Both positions were actually removed from the venue
    assert!(gateway
        .get_position("BTCUSDT")
        .await
        .expect("position")
        .is_flat());
    assert!(gateway
        .get_position("ETHUSDT")
        .await
        .expect("position")
        .is_flat());

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn disabled_liquidation_skips_and_never_touches_the_venue() {
    let (audit, path) = open_audit("skip").await;
    let gateway = Arc::new(
        StubGateway::new().with_position("BTCUSDT", PositionSide::Long, dec!(1)),
    );
    let manager = manager_with(LiquidationConfig::default(), gateway.clone(), audit.clone());

    let result = manager
        .execute(&["BTCUSDT".to_string()], "corr-skip")
        .await;

    assert_eq!(result.state, LiquidationState::Skipped);
    assert_eq!(result.positions_closed, 0);
    assert_eq!(result.positions_failed, 0);
    assert_eq!(result.orders_cancelled, 0);
    assert_eq!(gateway.total_calls(), 0);

    let events = read_audit(&audit, &path).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["details"]["severity"], "CRITICAL");

    // The position is untouched
    assert!(!gateway
        .get_position("BTCUSDT")
        .await
        .expect("position")
        .is_flat());

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn hung_venue_is_bounded_by_the_liquidation_timeout() {
    let (audit, path) = open_audit("hang").await;
    let gateway = Arc::new(
        StubGateway::new()
            .with_position("BTCUSDT", PositionSide::Long, dec!(1))
            .with_call_delay(Duration::from_secs(10)),
    );
    let config = LiquidationConfig {
        timeout_seconds: 1.0,
        ..armed_config()
    };
    let manager = manager_with(config, gateway, audit.clone());

    let started = std::time::Instant::now();
    let result = manager
        .execute(&["BTCUSDT".to_string()], "corr-hang")
        .await;

    // Deadline plus grace, never the venue's 10 seconds
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(result.total_duration_seconds < 3.0);
    assert_ne!(result.state, LiquidationState::Completed);
    assert_eq!(result.positions_closed, 0);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn one_failing_symbol_resolves_partial() {
    let (audit, path) = open_audit("partial").await;
    let gateway = Arc::new(
        StubGateway::new()
            .with_position("BTCUSDT", PositionSide::Long, dec!(0.5))
            .with_position("ETHUSDT", PositionSide::Long, dec!(3))
            .with_position("BNBUSDT", PositionSide::Short, dec!(10))
            .with_failing_close("BNBUSDT"),
    );
    let config = LiquidationConfig {
        max_retries: 1,
        ..armed_config()
    };
    let manager = manager_with(config, gateway, audit.clone());

    let symbols = vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
    ];
    let result = manager.execute(&symbols, "corr-partial").await;

    assert_eq!(result.state, LiquidationState::Partial);
    assert_eq!(result.positions_closed, 2);
    assert_eq!(result.positions_failed, 1);
    assert!(result.error_message.is_none());

    let events = read_audit(&audit, &path).await;
    let placed_symbols: Vec<&str> = events
        .iter()
        .filter(|e| e["event_type"] == "ORDER_PLACED")
        .map(|e| e["symbol"].as_str().unwrap())
        .collect();
    assert!(placed_symbols.contains(&"BTCUSDT"));
    assert!(placed_symbols.contains(&"ETHUSDT"));

    let rejected: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["event_type"] == "ORDER_REJECTED")
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["symbol"], "BNBUSDT");

    for event in &events {
        assert_eq!(event["correlation_id"], "corr-partial");
    }

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn concurrent_execute_is_rejected_not_queued() {
    let (audit, path) = open_audit("reentry").await;
    let gateway = Arc::new(
        StubGateway::new()
            .with_position("BTCUSDT", PositionSide::Long, dec!(1))
            .with_call_delay(Duration::from_millis(300)),
    );
    let manager = Arc::new(manager_with(armed_config(), gateway, audit.clone()));

    let first_manager = manager.clone();
    let first = tokio::spawn(async move {
        first_manager
            .execute(&["BTCUSDT".to_string()], "corr-first")
            .await
    });

    // Let the first call take the latch
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = manager
        .execute(&["BTCUSDT".to_string()], "corr-second")
        .await;
    assert_eq!(second.state, LiquidationState::Failed);
    assert!(second
        .error_message
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("in progress"));
    assert_eq!(second.positions_closed, 0);

    let first = first.await.expect("join");
    assert_eq!(first.state, LiquidationState::Completed);
    assert_eq!(first.positions_closed, 1);

    // After the pass the manager accepts calls again
    let third = manager
        .execute(&["BTCUSDT".to_string()], "corr-third")
        .await;
    assert_eq!(third.state, LiquidationState::Completed);

    let _ = tokio::fs::remove_file(&path).await;
}
