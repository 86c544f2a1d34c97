use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::types::{Side, SimpleOrder, SimpleOrderStatus};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::lifecycle;

/// Manual pairing of a P2P order: the counterparty fills the empty buyer or seller slot and the
/// order moves to `matched`. Escrow is opened by the caller in the same unit of work.
///
/// # Errors
/// * `OrderNotActive` - the order was already taken, cancelled or otherwise moved on
/// * `SelfMatchForbidden` - the counterparty owns the order
pub fn pair_counterparty(order: &mut SimpleOrder, counterparty_id: Uuid, at: DateTime<Utc>) -> EngineResult<()> {
    if order.status != SimpleOrderStatus::Active {
        return Err(EngineError::OrderNotActive { order_id: order.id, status: order.status });
    }
    if counterparty_id == order.owner_id {
        warn!("User {} tried to match own order {}", counterparty_id, order.id);
        return Err(EngineError::SelfMatchForbidden(order.id));
    }

    match order.side {
        Side::Sell => order.buyer_id = Some(counterparty_id),
        Side::Buy => order.seller_id = Some(counterparty_id),
    }
    assert!(
        order.buyer_id.is_some() && order.seller_id.is_some() && order.buyer_id != order.seller_id,
        "order {} paired without two distinct parties",
        order.id
    );

    lifecycle::transition(order, SimpleOrderStatus::Matched, at)
}
