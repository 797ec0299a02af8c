//! Coordination layer: resilience and emergency-handling infrastructure.
//!
//! - Circuit breaker guarding read-path venue calls
//! - Bounded retry with exponential backoff for write-path venue calls
//! - Emergency liquidation orchestration under a strict deadline
//! - Shutdown signal handling

pub mod circuit_breaker;
pub mod liquidation;
pub mod retry;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use liquidation::{LiquidationManager, LiquidationResult, LiquidationState};
pub use retry::RetryExecutor;
pub use shutdown::{install_signal_handlers, ShutdownController, ShutdownSignal};
