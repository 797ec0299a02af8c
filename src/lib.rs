pub mod audit;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod runtime;

pub use audit::{AuditEvent, AuditEventType, AuditLogger};
pub use config::{AppConfig, BreakerConfig, LiquidationConfig};
pub use coordination::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, LiquidationManager, LiquidationResult,
    LiquidationState, RetryExecutor, ShutdownController, ShutdownSignal,
};
pub use domain::{OrderResult, OrderSide, OrderStatus, Position, PositionSide};
pub use error::{KraitError, Result};
pub use exchange::{BinanceFuturesGateway, ExchangeGateway, PaperGateway};
