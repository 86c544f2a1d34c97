//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// State machine for the P2P order status field.
//
//   active ──► matched ──► in_progress ──► completed
//     │           │   ╲          │  ╲
//     ▼           ▼    ╲         ▼   ╲──► on_hold ──► completed | cancelled | in_dispute
//  cancelled  cancelled ╲──► in_dispute ──► dispute_resolved
//
// | Name                | Description                                              |
// |---------------------|----------------------------------------------------------|
// | can_transition      | Legal edges of the status graph                          |
// | transition          | Applies an edge and stamps the matching timestamp        |
// | is_terminal         | completed, cancelled, dispute_resolved                   |
// | is_party            | Seller or buyer of the order                             |
// | counterparty_of     | The non-owner party, once matched                        |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::types::{SimpleOrder, SimpleOrderStatus};
use crate::domain::services::errors::{EngineError, EngineResult};

use SimpleOrderStatus::*;

pub fn can_transition(from: SimpleOrderStatus, to: SimpleOrderStatus) -> bool {
    matches!(
        (from, to),
        (Active, Matched)
            | (Active, Cancelled)
            | (Matched, InProgress)
            | (Matched, Cancelled)
            | (Matched, InDispute)
            | (Matched, OnHold)
            | (InProgress, Completed)
            | (InProgress, Cancelled)
            | (InProgress, InDispute)
            | (InProgress, OnHold)
            | (OnHold, Completed)
            | (OnHold, Cancelled)
            | (OnHold, InDispute)
            | (InDispute, DisputeResolved)
    )
}

pub fn is_terminal(status: SimpleOrderStatus) -> bool {
    matches!(status, Completed | Cancelled | DisputeResolved)
}

/// Moves `order` to `to`, stamping the timestamp that belongs to the target state.
///
/// # Errors
/// `InvalidState` if the edge is not part of the graph.
pub fn transition(order: &mut SimpleOrder, to: SimpleOrderStatus, at: DateTime<Utc>) -> EngineResult<()> {
    if !can_transition(order.status, to) {
        return Err(EngineError::invalid_state("order", order.id, allowed_sources(to), order.status));
    }

    debug!("Order {} {} -> {}", order.id, order.status, to);
    order.status = to;
    order.updated_at = at;
    match to {
        Matched => order.matched_at = Some(at),
        InProgress => order.payment_submitted_at = Some(at),
        Completed => order.completed_at = Some(at),
        Cancelled => order.cancelled_at = Some(at),
        _ => {}
    }
    Ok(())
}

/// Human-readable list of states from which `to` is reachable, for error messages.
fn allowed_sources(to: SimpleOrderStatus) -> String {
    let all = [Active, Matched, InProgress, Completed, Cancelled, InDispute, DisputeResolved, OnHold];
    all.iter()
        .filter(|from| can_transition(**from, to))
        .map(|from| from.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

pub fn is_party(order: &SimpleOrder, user_id: Uuid) -> bool {
    order.seller_id == Some(user_id) || order.buyer_id == Some(user_id)
}

pub fn counterparty_of(order: &SimpleOrder) -> Option<Uuid> {
    [order.seller_id, order.buyer_id]
        .into_iter()
        .flatten()
        .find(|id| *id != order.owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::types::{PaymentMethod, Side};
    use rust_decimal_macros::dec;

    fn order(status: SimpleOrderStatus) -> SimpleOrder {
        let owner = Uuid::from_u128(1);
        let at = Utc::now();
        SimpleOrder {
            id: Uuid::from_u128(9),
            owner_id: owner,
            side: Side::Sell,
            seller_id: Some(owner),
            buyer_id: None,
            asset: "BTC".into(),
            fiat_currency: "NGN".into(),
            quantity: dec!(1),
            unit_price: dec!(10),
            total_amount: dec!(10),
            payment_method: PaymentMethod::MobileMoney,
            status,
            terms: None,
            payment_reference: None,
            proof_of_payment: None,
            risk_flags: vec![],
            created_at: at,
            updated_at: at,
            matched_at: None,
            payment_submitted_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [Active, Matched, InProgress, Completed, Cancelled, InDispute, DisputeResolved, OnHold];
        for from in [Completed, Cancelled, DisputeResolved] {
            assert!(is_terminal(from));
            for to in all {
                assert!(!can_transition(from, to), "{} -> {} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn test_transition_stamps_timestamps() {
        let mut o = order(Active);
        let at = Utc::now();
        transition(&mut o, Matched, at).unwrap();
        assert_eq!(o.matched_at, Some(at));
        transition(&mut o, InProgress, at).unwrap();
        assert_eq!(o.payment_submitted_at, Some(at));
        transition(&mut o, Completed, at).unwrap();
        assert_eq!(o.completed_at, Some(at));
    }

    #[test]
    fn test_illegal_transition_is_reported() {
        let mut o = order(Active);
        let err = transition(&mut o, Completed, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("in_progress|on_hold"));
        assert_eq!(o.status, Active);
    }

    #[test]
    fn test_parties() {
        let mut o = order(Active);
        assert_eq!(counterparty_of(&o), None);
        o.buyer_id = Some(Uuid::from_u128(2));
        assert_eq!(counterparty_of(&o), Some(Uuid::from_u128(2)));
        assert!(is_party(&o, Uuid::from_u128(1)));
        assert!(!is_party(&o, Uuid::from_u128(3)));
    }
}
