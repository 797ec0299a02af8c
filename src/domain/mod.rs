//! Venue-neutral domain types shared by the gateway and the liquidation core.

pub mod order;
pub mod position;

pub use order::{OrderResult, OrderSide, OrderStatus};
pub use position::{Position, PositionSide};
