use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::services::errors::EngineError;

pub mod depth;
pub mod orderbook;

pub use depth::{DepthLevel, DepthSnapshot};
pub use orderbook::{OrderBook, PriceLevel, RestingEntry};

/// Errors that can occur within the order book.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderbookError {
    #[error("Order {0} not found in the orderbook")]
    OrderNotFound(Uuid),

    #[error("Order is for wrong trading pair (expected {expected}, got {got})")]
    WrongPair { expected: Uuid, got: Uuid },

    #[error("Order {0} has no limit price and cannot rest in the book")]
    NoLimitPrice(Uuid),

    #[error("Invalid order quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Order {0} is already resting")]
    DuplicateOrder(Uuid),

    #[error("Resting volume at price {0} is out of range")]
    VolumeOverflow(Decimal),
}

impl From<OrderbookError> for EngineError {
    fn from(err: OrderbookError) -> Self {
        match err {
            OrderbookError::OrderNotFound(id) => EngineError::not_found("resting order", id),
            other => EngineError::Validation(other.to_string()),
        }
    }
}
