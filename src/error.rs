use std::time::Duration;
use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum KraitError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Venue errors
    #[error("Venue call failed: {0}")]
    VenueCall(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Resilience errors
    #[error("Circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Liquidation already in progress")]
    LiquidationInProgress,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for KraitError
pub type Result<T> = std::result::Result<T, KraitError>;
