use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub venue: VenueConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// REST API endpoint for the futures venue
    pub rest_url: String,
    /// Signed-request receive window in milliseconds
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

fn default_recv_window_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Symbols the bot manages (e.g., BTCUSDT, ETHUSDT)
    pub symbols: Vec<String>,
    /// Position watch poll interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

/// Read-path circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds to wait before permitting a trial call
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Emergency liquidation settings, immutable for the process lifetime.
///
/// The master switch gates both sub-actions: enabling `close_positions` or
/// `cancel_orders` while `emergency_liquidation` is off fails validation.
#[derive(Debug, Clone, Deserialize)]
pub struct LiquidationConfig {
    /// Master switch for emergency liquidation on shutdown
    #[serde(default)]
    pub emergency_liquidation: bool,
    /// Force-close open positions with reduce-only market orders
    #[serde(default)]
    pub close_positions: bool,
    /// Cancel all pending orders per symbol
    #[serde(default)]
    pub cancel_orders: bool,
    /// Wall-clock budget for the whole liquidation pass, in seconds
    #[serde(default = "default_liquidation_timeout")]
    pub timeout_seconds: f64,
    /// Retries per close order beyond the first attempt
    #[serde(default = "default_liquidation_retries")]
    pub max_retries: u32,
    /// Initial backoff delay between close attempts, in seconds
    #[serde(default = "default_liquidation_retry_delay")]
    pub retry_delay_seconds: f64,
}

fn default_liquidation_timeout() -> f64 {
    5.0
}

fn default_liquidation_retries() -> u32 {
    3
}

fn default_liquidation_retry_delay() -> f64 {
    0.5
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            emergency_liquidation: false,
            close_positions: false,
            cancel_orders: false,
            timeout_seconds: default_liquidation_timeout(),
            max_retries: default_liquidation_retries(),
            retry_delay_seconds: default_liquidation_retry_delay(),
        }
    }
}

impl LiquidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds)
    }

    /// Whether a shutdown pass will touch the venue at all
    pub fn is_armed(&self) -> bool {
        self.emergency_liquidation && (self.close_positions || self.cancel_orders)
    }

    /// Validate field domains and the master-switch rule
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.emergency_liquidation && (self.close_positions || self.cancel_orders) {
            errors.push(
                "close_positions/cancel_orders require emergency_liquidation to be enabled"
                    .to_string(),
            );
        }

        if !(1.0..=30.0).contains(&self.timeout_seconds) {
            errors.push(format!(
                "timeout_seconds must be within [1.0, 30.0], got {}",
                self.timeout_seconds
            ));
        }

        if self.max_retries > 10 {
            errors.push(format!(
                "max_retries must be within [0, 10], got {}",
                self.max_retries
            ));
        }

        if !(0.1..=5.0).contains(&self.retry_delay_seconds) {
            errors.push(format!(
                "retry_delay_seconds must be within [0.1, 5.0], got {}",
                self.retry_delay_seconds
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only audit log (one JSON record per line)
    #[serde(default = "default_audit_path")]
    pub path: String,
}

fn default_audit_path() -> String {
    "data/audit.jsonl".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files; console-only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    pub enabled: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("venue.recv_window_ms", 5000)?
            .set_default("trading.poll_interval_secs", 10)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("KRAIT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (KRAIT_VENUE__REST_URL, etc.)
            .add_source(
                Environment::with_prefix("KRAIT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(dry_run: bool, symbols: Vec<String>) -> Self {
        Self {
            venue: VenueConfig {
                rest_url: "https://fapi.binance.com".to_string(),
                recv_window_ms: 5000,
            },
            trading: TradingConfig {
                symbols,
                poll_interval_secs: 10,
            },
            breaker: BreakerConfig::default(),
            liquidation: LiquidationConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.symbols.is_empty() {
            errors.push("trading.symbols must not be empty".to_string());
        }

        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be at least 1".to_string());
        }

        if let Err(liquidation_errors) = self.liquidation.validate() {
            errors.extend(liquidation_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
