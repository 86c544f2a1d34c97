//--------------------------------------------------------------------------------------------------
// ENUMS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                                    | Key Methods |
// |---------------|----------------------------------------------------------------|-------------|
// | ErrorKind     | Caller-facing classification of a failure                      |             |
// | EngineError   | One variant per failing guard, mapped onto an ErrorKind        | kind        |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::external::ExternalError;
use crate::domain::models::types::SimpleOrderStatus;

/// Classification callers use to decide whether to fix input, re-read state, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before any state change
    Validation,
    /// Operation illegal in the entity's current state; retry after re-reading
    StateConflict,
    /// Actor lacks the capability for this transition
    Authorization,
    NotFound,
    /// Risk gate or open-order caps
    LimitExceeded,
    /// An external collaborator failed
    Upstream,
}

/// Errors returned by the engine's operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("order {order_id} is not in `active` state (current `{status}`)")]
    OrderNotActive { order_id: Uuid, status: SimpleOrderStatus },

    #[error("order {0} cannot be matched by its own owner")]
    SelfMatchForbidden(Uuid),

    #[error("order {order_id} cannot be cancelled in `{status}` state")]
    CannotCancelInCurrentState { order_id: Uuid, status: SimpleOrderStatus },

    #[error("{entity} {id} is not in `{expected}` state (current `{actual}`)")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("dispute {0} is not open")]
    DisputeNotOpen(Uuid),

    #[error("order {0} already has an open dispute")]
    DisputeAlreadyOpen(Uuid),

    #[error("user {actor} is not authorized to {action}")]
    NotAuthorized { actor: Uuid, action: &'static str },

    #[error("user {actor} is not a party to order {order_id}")]
    NotAPartyToOrder { actor: Uuid, order_id: Uuid },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("daily limit exceeded: {used} used + {requested} requested > ceiling {ceiling}")]
    DailyLimitExceeded {
        ceiling: Decimal,
        used: Decimal,
        requested: Decimal,
    },

    #[error("counterparty {user_id} reputation {score} is below the minimum {minimum}")]
    ReputationTooLow {
        user_id: Uuid,
        score: Decimal,
        minimum: Decimal,
    },

    #[error("limit of {limit} open {what} reached")]
    OpenOrderLimitExceeded { limit: usize, what: &'static str },

    #[error("trading pair {0} is inactive")]
    PairInactive(Uuid),

    #[error("external service failure: {0}")]
    External(#[from] ExternalError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::OrderNotActive { .. }
            | Self::SelfMatchForbidden(_)
            | Self::CannotCancelInCurrentState { .. }
            | Self::InvalidState { .. }
            | Self::DisputeNotOpen(_)
            | Self::DisputeAlreadyOpen(_)
            | Self::PairInactive(_) => ErrorKind::StateConflict,
            Self::NotAuthorized { .. } | Self::NotAPartyToOrder { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DailyLimitExceeded { .. }
            | Self::ReputationTooLow { .. }
            | Self::OpenOrderLimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::External(_) => ErrorKind::Upstream,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub(crate) fn invalid_state(
        entity: &'static str,
        id: Uuid,
        expected: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidState {
            entity,
            id,
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

/// Type alias for Result with EngineError
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let id = Uuid::nil();
        assert_eq!(EngineError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::SelfMatchForbidden(id).kind(), ErrorKind::StateConflict);
        assert_eq!(
            EngineError::NotAPartyToOrder { actor: id, order_id: id }.kind(),
            ErrorKind::Authorization
        );
        assert_eq!(EngineError::not_found("order", id).kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::DailyLimitExceeded {
                ceiling: Decimal::ONE,
                used: Decimal::ONE,
                requested: Decimal::ONE
            }
            .kind(),
            ErrorKind::LimitExceeded
        );
    }

    #[test]
    fn test_message_names_the_failing_guard() {
        let err = EngineError::invalid_state("order", Uuid::nil(), "matched", SimpleOrderStatus::Active);
        assert_eq!(
            err.to_string(),
            "order 00000000-0000-0000-0000-000000000000 is not in `matched` state (current `active`)"
        );
    }
}
