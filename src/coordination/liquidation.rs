//! Emergency liquidation orchestration.
//!
//! One `execute()` call queries positions, cancels pending orders, and
//! force-closes exposure per symbol under a strict wall-clock budget,
//! emitting an ordered audit trail and always resolving to exactly one
//! terminal result. Partial failures are tolerated per symbol; the call
//! itself never fails outward, because the host's shutdown sequence must
//! proceed regardless.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::config::LiquidationConfig;
use crate::coordination::{CircuitBreaker, CircuitBreakerConfig, RetryExecutor};
use crate::error::KraitError;
use crate::exchange::ExchangeGateway;

/// Extra time granted to in-flight venue calls after the deadline; a call
/// still pending past this is abandoned and recorded as outcome-unknown.
const GRACE: Duration = Duration::from_secs(1);

/// Liquidation pass states. `InProgress` is the only transient state and is
/// held just for the duration of one `execute()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationState {
    Idle,
    InProgress,
    Completed,
    Partial,
    Failed,
    Skipped,
}

impl std::fmt::Display for LiquidationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiquidationState::Idle => write!(f, "idle"),
            LiquidationState::InProgress => write!(f, "in_progress"),
            LiquidationState::Completed => write!(f, "completed"),
            LiquidationState::Partial => write!(f, "partial"),
            LiquidationState::Failed => write!(f, "failed"),
            LiquidationState::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal summary of one liquidation pass; the sole durable record of the
/// call besides the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct LiquidationResult {
    pub state: LiquidationState,
    pub correlation_id: String,
    pub positions_closed: u32,
    pub positions_failed: u32,
    pub orders_cancelled: u32,
    pub error_message: Option<String>,
    pub total_duration_seconds: f64,
}

#[derive(Debug, Default)]
struct SymbolOutcome {
    orders_cancelled: u32,
    positions_closed: u32,
    positions_failed: u32,
    failed: bool,
}

/// Orchestrates emergency liquidation across symbols.
pub struct LiquidationManager {
    config: LiquidationConfig,
    gateway: Arc<dyn ExchangeGateway>,
    audit: AuditLogger,
    position_breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    state: Mutex<LiquidationState>,
}

impl LiquidationManager {
    pub fn new(
        config: LiquidationConfig,
        breaker_config: CircuitBreakerConfig,
        gateway: Arc<dyn ExchangeGateway>,
        audit: AuditLogger,
    ) -> Self {
        let retry = RetryExecutor::new(config.max_retries, config.retry_delay());
        Self {
            config,
            gateway,
            audit,
            position_breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            retry,
            state: Mutex::new(LiquidationState::Idle),
        }
    }

    /// Breaker guarding the position read path; shared with any other caller
    /// of the same venue read so failure counting stays global.
    pub fn position_breaker(&self) -> Arc<CircuitBreaker> {
        self.position_breaker.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, LiquidationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current state (Idle outside an `execute()` call).
    pub fn state(&self) -> LiquidationState {
        *self.lock_state()
    }

    /// Run one liquidation pass. Always returns a result; never panics
    /// outward and never raises past this boundary.
    pub async fn execute(&self, symbols: &[String], correlation_id: &str) -> LiquidationResult {
        let started = std::time::Instant::now();

        // Re-entrancy latch: compare-and-set Idle -> InProgress
        {
            let mut state = self.lock_state();
            if *state != LiquidationState::Idle {
                warn!(
                    correlation_id,
                    "Liquidation already in progress, rejecting concurrent call"
                );
                return LiquidationResult {
                    state: LiquidationState::Failed,
                    correlation_id: correlation_id.to_string(),
                    positions_closed: 0,
                    positions_failed: 0,
                    orders_cancelled: 0,
                    error_message: Some(KraitError::LiquidationInProgress.to_string()),
                    total_duration_seconds: started.elapsed().as_secs_f64(),
                };
            }
            *state = LiquidationState::InProgress;
        }

        // Returns the latch to Idle however `run` exits, including a caller
        // that drops this future mid-pass.
        let _latch = StateLatch { manager: self };
        self.run(symbols, correlation_id, started).await
    }

    async fn run(
        &self,
        symbols: &[String],
        correlation_id: &str,
        started: std::time::Instant,
    ) -> LiquidationResult {
        // Config gate: without the master switch (or with both sub-actions
        // off) nothing touches the venue, but the exposure left behind is
        // loudly recorded.
        if !self.config.is_armed() {
            error!(
                correlation_id,
                "CRITICAL: emergency liquidation disabled, open positions and pending orders remain at risk"
            );
            self.audit.log(
                AuditEvent::new(AuditEventType::LiquidationComplete, correlation_id)
                    .with_detail("state", "skipped")
                    .with_detail("severity", "CRITICAL")
                    .with_detail(
                        "reason",
                        "emergency liquidation disabled in configuration",
                    ),
            );
            return LiquidationResult {
                state: LiquidationState::Skipped,
                correlation_id: correlation_id.to_string(),
                positions_closed: 0,
                positions_failed: 0,
                orders_cancelled: 0,
                error_message: None,
                total_duration_seconds: started.elapsed().as_secs_f64(),
            };
        }

        info!(
            correlation_id,
            symbols = ?symbols,
            timeout_seconds = self.config.timeout_seconds,
            "Starting emergency liquidation"
        );
        self.audit.log(
            AuditEvent::new(AuditEventType::LiquidationStart, correlation_id)
                .with_detail(
                    "symbols",
                    serde_json::Value::from(symbols.to_vec()),
                )
                .with_detail("cancel_orders", self.config.cancel_orders)
                .with_detail("close_positions", self.config.close_positions)
                .with_detail("timeout_seconds", self.config.timeout_seconds),
        );

        let deadline = Instant::now() + self.config.timeout();
        let cutoff = deadline + GRACE;

        // One task per symbol; a symbol's failure never aborts its siblings.
        let mut tasks: JoinSet<SymbolOutcome> = JoinSet::new();
        for symbol in symbols {
            let task = SymbolTask {
                symbol: symbol.clone(),
                correlation_id: correlation_id.to_string(),
                gateway: self.gateway.clone(),
                audit: self.audit.clone(),
                breaker: self.position_breaker.clone(),
                retry: self.retry.clone(),
                cancel_orders: self.config.cancel_orders,
                close_positions: self.config.close_positions,
                deadline,
                cutoff,
            };
            tasks.spawn(task.run());
        }

        let mut outcomes: Vec<SymbolOutcome> = Vec::with_capacity(symbols.len());
        let mut abandoned: u32 = 0;

        // Tasks bound their own venue calls to `cutoff`; the join waits a
        // touch longer so their final audit records land instead of being
        // aborted mid-write.
        let join_cutoff = cutoff + Duration::from_millis(250);

        loop {
            match timeout_at(join_cutoff, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => outcomes.push(outcome),
                Ok(Some(Err(e))) => {
                    error!(correlation_id, "Liquidation task aborted: {}", e);
                    abandoned += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let remaining = tasks.len() as u32;
                    warn!(
                        correlation_id,
                        remaining, "Liquidation grace period elapsed, abandoning in-flight work"
                    );
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        match joined {
                            Ok(outcome) => outcomes.push(outcome),
                            Err(_) => abandoned += 1,
                        }
                    }
                    break;
                }
            }
        }

        let mut positions_closed = 0;
        let mut positions_failed = 0;
        let mut orders_cancelled = 0;
        let mut failed_symbols = abandoned;
        let mut succeeded_symbols = 0u32;
        for outcome in &outcomes {
            positions_closed += outcome.positions_closed;
            positions_failed += outcome.positions_failed;
            orders_cancelled += outcome.orders_cancelled;
            if outcome.failed {
                failed_symbols += 1;
            } else {
                succeeded_symbols += 1;
            }
        }
        if self.config.close_positions {
            // Abandoned tasks leave their close outcome unknown
            positions_failed += abandoned;
        }

        let state = if failed_symbols == 0 {
            LiquidationState::Completed
        } else if succeeded_symbols > 0 {
            LiquidationState::Partial
        } else {
            LiquidationState::Failed
        };
        let error_message = match state {
            LiquidationState::Failed => Some(format!(
                "all {} symbols failed during liquidation",
                failed_symbols
            )),
            _ => None,
        };

        let total_duration_seconds = started.elapsed().as_secs_f64();

        let mut complete = AuditEvent::new(AuditEventType::LiquidationComplete, correlation_id)
            .with_detail("state", state.to_string())
            .with_detail("positions_closed", positions_closed)
            .with_detail("positions_failed", positions_failed)
            .with_detail("orders_cancelled", orders_cancelled)
            .with_detail("duration_seconds", total_duration_seconds);
        if state == LiquidationState::Failed {
            complete = complete.with_detail("severity", "CRITICAL");
        }
        self.audit.log(complete);

        match state {
            LiquidationState::Completed => info!(
                correlation_id,
                positions_closed, orders_cancelled, "Emergency liquidation completed"
            ),
            LiquidationState::Partial => warn!(
                correlation_id,
                positions_closed,
                positions_failed,
                "Emergency liquidation partially completed, residual exposure possible"
            ),
            _ => error!(
                correlation_id,
                positions_failed,
                "CRITICAL: emergency liquidation failed, capital may remain exposed"
            ),
        }

        LiquidationResult {
            state,
            correlation_id: correlation_id.to_string(),
            positions_closed,
            positions_failed,
            orders_cancelled,
            error_message,
            total_duration_seconds,
        }
    }
}

struct StateLatch<'a> {
    manager: &'a LiquidationManager,
}

impl Drop for StateLatch<'_> {
    fn drop(&mut self) {
        *self.manager.lock_state() = LiquidationState::Idle;
    }
}

/// Per-symbol unit of work; owns clones of everything it needs so it can be
/// spawned onto the runtime.
struct SymbolTask {
    symbol: String,
    correlation_id: String,
    gateway: Arc<dyn ExchangeGateway>,
    audit: AuditLogger,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    cancel_orders: bool,
    close_positions: bool,
    deadline: Instant,
    cutoff: Instant,
}

impl SymbolTask {
    async fn run(self) -> SymbolOutcome {
        let mut outcome = SymbolOutcome::default();

        // Position first: close-side and quantity both depend on it.
        let position = {
            let gateway = self.gateway.clone();
            let symbol = self.symbol.clone();
            match timeout_at(
                self.cutoff,
                self.breaker
                    .call(move || async move { gateway.get_position(&symbol).await }),
            )
            .await
            {
                Ok(Ok(position)) => Some(position),
                Ok(Err(e)) => {
                    warn!(symbol = %self.symbol, "Position query failed: {}", e);
                    if self.close_positions {
                        outcome.positions_failed += 1;
                        outcome.failed = true;
                        self.reject(&format!("position query failed: {}", e));
                    }
                    None
                }
                Err(_) => {
                    outcome.failed = true;
                    if self.close_positions {
                        outcome.positions_failed += 1;
                    }
                    self.reject("position query outcome unknown at deadline");
                    return outcome;
                }
            }
        };

        if self.cancel_orders {
            if Instant::now() >= self.deadline {
                outcome.failed = true;
                self.reject("deadline exceeded before order cancellation");
            } else {
                match timeout_at(self.cutoff, self.gateway.cancel_all_orders(&self.symbol)).await
                {
                    Ok(Ok(count)) => {
                        outcome.orders_cancelled += count;
                        debug!(symbol = %self.symbol, count, "Cancelled pending orders");
                        self.audit.log(
                            AuditEvent::new(
                                AuditEventType::OrderCancelled,
                                &self.correlation_id,
                            )
                            .with_symbol(&self.symbol)
                            .with_detail("count", count),
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(symbol = %self.symbol, "Order cancellation failed: {}", e);
                        outcome.failed = true;
                        self.reject(&format!("order cancellation failed: {}", e));
                    }
                    // Past the cutoff; the close block below still tallies
                    // the close this symbol no longer has time for.
                    Err(_) => {
                        outcome.failed = true;
                        self.reject("order cancellation outcome unknown at deadline");
                    }
                }
            }
        }

        if self.close_positions {
            match position {
                Some(position) if !position.is_flat() => {
                    if Instant::now() >= self.deadline {
                        outcome.positions_failed += 1;
                        outcome.failed = true;
                        self.reject("deadline exceeded before position close");
                    } else {
                        self.close(&mut outcome, position.side.close_side(), position.quantity)
                            .await;
                    }
                }
                Some(_) => {
                    debug!(symbol = %self.symbol, "Position already flat, nothing to close");
                }
                // Query already failed and was tallied above
                None => {}
            }
        }

        outcome
    }

    async fn close(
        &self,
        outcome: &mut SymbolOutcome,
        side: crate::domain::OrderSide,
        quantity: Decimal,
    ) {
        let gateway = self.gateway.clone();
        let symbol = self.symbol.clone();
        let op = move || {
            let gateway = gateway.clone();
            let symbol = symbol.clone();
            async move {
                gateway
                    .submit_reduce_only_market_order(&symbol, side, quantity)
                    .await
            }
        };

        let submitted = timeout_at(
            self.cutoff,
            self.retry
                .execute_until(Some(self.deadline), "reduce-only close", op),
        )
        .await;

        match submitted {
            Ok(Ok(order)) => {
                outcome.positions_closed += 1;
                info!(
                    symbol = %self.symbol,
                    order_id = %order.order_id,
                    %side,
                    %quantity,
                    "Position close order placed"
                );
                self.audit.log(
                    AuditEvent::new(AuditEventType::OrderPlaced, &self.correlation_id)
                        .with_symbol(&self.symbol)
                        .with_detail("order_id", order.order_id.clone())
                        .with_detail("side", side.to_string())
                        .with_detail("quantity", quantity.to_string())
                        .with_detail("reduce_only", true),
                );
            }
            Ok(Err(e)) => {
                outcome.positions_failed += 1;
                outcome.failed = true;
                warn!(symbol = %self.symbol, "Position close failed: {}", e);
                self.reject(&format!("close order failed: {}", e));
            }
            Err(_) => {
                outcome.positions_failed += 1;
                outcome.failed = true;
                self.reject("close order outcome unknown at deadline");
            }
        }
    }

    fn reject(&self, reason: &str) {
        self.audit.log(
            AuditEvent::new(AuditEventType::OrderRejected, &self.correlation_id)
                .with_symbol(&self.symbol)
                .with_detail("reason", reason),
        );
    }
}
