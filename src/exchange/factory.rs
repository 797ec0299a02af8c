use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::exchange::{BinanceFuturesGateway, ExchangeGateway, PaperGateway};

/// Build the gateway selected by configuration: paper in dry-run mode,
/// otherwise the live venue adapter with credentials from the environment.
pub fn build_gateway(config: &AppConfig) -> Result<Arc<dyn ExchangeGateway>> {
    if config.dry_run.enabled {
        info!("Dry run enabled, using paper gateway");
        return Ok(Arc::new(PaperGateway::new()));
    }

    let gateway = BinanceFuturesGateway::from_env(
        Some(&config.venue.rest_url),
        config.venue.recv_window_ms,
    )?;
    info!(rest_url = %gateway.base_url(), "Using live futures gateway");
    Ok(Arc::new(gateway))
}
