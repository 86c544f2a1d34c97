//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|-------------------|
// | EngineEvent             | Facts emitted after a unit of work commits        | event_type        |
// | EventError              | Error types for event processing                  | error, from       |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::types::{
    Dispute, Escrow, Evidence, SimpleOrder, TradeExecution, TradingOrder,
};

/// Errors that can occur in the event system
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// Failed to publish an event (e.g., channel closed)
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to process an event
    #[error("Failed to process event: {0}")]
    ProcessingError(String),
}

/// Type alias for Result with EventError
pub type EventResult<T> = Result<T, EventError>;

/// Every event type name, in declaration order.
pub const ALL_EVENT_TYPES: &[&str] = &[
    "SimpleOrderCreated",
    "OrderMatched",
    "PaymentSubmitted",
    "EscrowReleased",
    "EscrowRefunded",
    "EscrowHeld",
    "SimpleOrderCancelled",
    "DisputeOpened",
    "DisputeEvidenceAdded",
    "DisputeResolved",
    "TradeExecuted",
    "TradingOrderUpdated",
    "TradingOrderTriggered",
];

/// Facts published by the engine. Only committed state changes are ever published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    SimpleOrderCreated {
        order: SimpleOrder,
        timestamp: DateTime<Utc>,
    },

    /// A counterparty took the order and escrow was opened
    OrderMatched {
        order: SimpleOrder,
        escrow: Escrow,
        timestamp: DateTime<Utc>,
    },

    PaymentSubmitted {
        order: SimpleOrder,
        payment_reference: String,
        timestamp: DateTime<Utc>,
    },

    EscrowReleased {
        order: SimpleOrder,
        escrow: Escrow,
        timestamp: DateTime<Utc>,
    },

    EscrowRefunded {
        order: SimpleOrder,
        escrow: Escrow,
        timestamp: DateTime<Utc>,
    },

    /// Administrative freeze for review
    EscrowHeld {
        order: SimpleOrder,
        escrow: Escrow,
        timestamp: DateTime<Utc>,
    },

    SimpleOrderCancelled {
        order: SimpleOrder,
        timestamp: DateTime<Utc>,
    },

    DisputeOpened {
        dispute: Dispute,
        timestamp: DateTime<Utc>,
    },

    DisputeEvidenceAdded {
        dispute_id: Uuid,
        evidence: Evidence,
        timestamp: DateTime<Utc>,
    },

    DisputeResolved {
        dispute: Dispute,
        order: SimpleOrder,
        timestamp: DateTime<Utc>,
    },

    TradeExecuted {
        execution: TradeExecution,
        timestamp: DateTime<Utc>,
    },

    TradingOrderUpdated {
        order: TradingOrder,
        timestamp: DateTime<Utc>,
    },

    /// A stop, stop-limit or trailing-stop order crossed its trigger
    TradingOrderTriggered {
        order: TradingOrder,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Name used by handlers to subscribe.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SimpleOrderCreated { .. } => "SimpleOrderCreated",
            Self::OrderMatched { .. } => "OrderMatched",
            Self::PaymentSubmitted { .. } => "PaymentSubmitted",
            Self::EscrowReleased { .. } => "EscrowReleased",
            Self::EscrowRefunded { .. } => "EscrowRefunded",
            Self::EscrowHeld { .. } => "EscrowHeld",
            Self::SimpleOrderCancelled { .. } => "SimpleOrderCancelled",
            Self::DisputeOpened { .. } => "DisputeOpened",
            Self::DisputeEvidenceAdded { .. } => "DisputeEvidenceAdded",
            Self::DisputeResolved { .. } => "DisputeResolved",
            Self::TradeExecuted { .. } => "TradeExecuted",
            Self::TradingOrderUpdated { .. } => "TradingOrderUpdated",
            Self::TradingOrderTriggered { .. } => "TradingOrderTriggered",
        }
    }
}
