//! Venue gateway: the only code that talks to the exchange.
//!
//! The liquidation core consumes the narrow [`ExchangeGateway`] capability;
//! everything venue-specific lives behind it.

pub mod binance;
pub mod factory;
pub mod paper;
pub mod traits;

pub use binance::BinanceFuturesGateway;
pub use factory::build_gateway;
pub use paper::PaperGateway;
pub use traits::ExchangeGateway;

#[cfg(test)]
pub use traits::MockExchangeGateway;
