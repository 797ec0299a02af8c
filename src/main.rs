use clap::{Parser, Subcommand};
use krait::config::AppConfig;
use krait::coordination::{
    install_signal_handlers, LiquidationManager, LiquidationState, ShutdownController,
};
use krait::error::{KraitError, Result};
use krait::exchange::build_gateway;
use krait::{runtime, AuditLogger};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "krait", about = "Leveraged futures trading bot with emergency liquidation safeguards")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot until a shutdown signal, then liquidate once
    Run,
    /// Run the emergency liquidation pass immediately and exit
    Liquidate {
        /// Symbols to liquidate (defaults to the configured trading symbols)
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config_dir)?;

    match cli.command {
        Commands::Run => {
            runtime::init_logging(&config.logging);
            run_bot(config).await
        }
        Commands::Liquidate { symbols } => {
            runtime::init_logging(&config.logging);
            run_liquidation_once(config, symbols).await
        }
        Commands::CheckConfig => {
            runtime::init_logging_simple();
            println!("{:#?}", config);
            println!("Configuration OK");
            Ok(())
        }
    }
}

fn load_config(config_dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(config_dir)?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {}", error);
        }
        return Err(KraitError::Validation(errors.join("; ")));
    }
    Ok(config)
}

async fn run_bot(config: AppConfig) -> Result<()> {
    let gateway = build_gateway(&config)?;
    let audit = AuditLogger::open(&config.audit.path).await?;
    let manager = LiquidationManager::new(
        config.liquidation.clone(),
        krait::CircuitBreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            recovery_timeout: config.breaker.recovery_timeout(),
        },
        gateway.clone(),
        audit.clone(),
    );

    if !config.liquidation.is_armed() {
        warn!("Emergency liquidation is not armed; shutdown will leave positions untouched");
    }

    let shutdown = Arc::new(ShutdownController::new());
    install_signal_handlers(shutdown.clone()).await;
    let mut signals = shutdown.subscribe();

    info!(symbols = ?config.trading.symbols, "Bot started, watching positions");

    let breaker = manager.position_breaker();
    let mut poll = tokio::time::interval(Duration::from_secs(config.trading.poll_interval_secs));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = signals.recv() => {
                match signal {
                    Ok(signal) => info!("Shutting down ({})", signal),
                    Err(_) => info!("Signal channel closed, shutting down"),
                }
                break;
            }
            _ = poll.tick() => {
                for symbol in &config.trading.symbols {
                    let gateway = gateway.clone();
                    let symbol_owned = symbol.clone();
                    match breaker
                        .call(move || async move { gateway.get_position(&symbol_owned).await })
                        .await
                    {
                        Ok(position) if !position.is_flat() => {
                            info!(
                                symbol = %symbol,
                                side = %position.side,
                                quantity = %position.quantity,
                                unrealized_pnl = %position.unrealized_pnl,
                                "Open position"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(symbol = %symbol, "Position watch failed: {}", e),
                    }
                }
            }
        }
    }

    let result = manager
        .execute(&config.trading.symbols, &Uuid::new_v4().to_string())
        .await;
    info!(
        state = %result.state,
        positions_closed = result.positions_closed,
        positions_failed = result.positions_failed,
        orders_cancelled = result.orders_cancelled,
        "Shutdown liquidation finished"
    );
    audit.close().await;

    if result.state == LiquidationState::Failed {
        error!("Exiting after failed emergency liquidation");
        return Err(KraitError::Internal(
            result
                .error_message
                .unwrap_or_else(|| "emergency liquidation failed".to_string()),
        ));
    }
    Ok(())
}

async fn run_liquidation_once(config: AppConfig, symbols: Option<Vec<String>>) -> Result<()> {
    let gateway = build_gateway(&config)?;
    let audit = AuditLogger::open(&config.audit.path).await?;
    let manager = LiquidationManager::new(
        config.liquidation.clone(),
        krait::CircuitBreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            recovery_timeout: config.breaker.recovery_timeout(),
        },
        gateway,
        audit.clone(),
    );

    let symbols = symbols.unwrap_or_else(|| config.trading.symbols.clone());
    let result = manager.execute(&symbols, &Uuid::new_v4().to_string()).await;
    audit.close().await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.state == LiquidationState::Failed {
        return Err(KraitError::Internal(
            result
                .error_message
                .unwrap_or_else(|| "emergency liquidation failed".to_string()),
        ));
    }
    Ok(())
}
