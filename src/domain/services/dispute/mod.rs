//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Dispute workflow: open against a matched or in-progress order, append evidence while open,
// resolve once by an adjudicator. The caller applies the escrow action returned by
// `escrow_action_for` in the same unit of work as the resolution.
//
// | Name               | Description                                                |
// |--------------------|------------------------------------------------------------|
// | NewEvidence        | Evidence entry as submitted                                |
// | open               | Validates and builds a new open dispute                   |
// | add_evidence       | Appends evidence while open                                |
// | resolve            | Closes the dispute with an outcome                         |
// | escrow_action_for  | Escrow transition implied by an outcome                    |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::models::clock::EngineContext;
use crate::domain::models::types::{
    Actor, ActorRole, Dispute, DisputeOutcome, DisputeStatus, DisputeType, Evidence, EvidenceType,
    SimpleOrder, SimpleOrderStatus,
};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::escrow::EscrowAction;
use crate::domain::services::lifecycle;

pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_EVIDENCE_LEN: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvidence {
    pub evidence_type: EvidenceType,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub fn can_adjudicate(actor: &Actor) -> bool {
    matches!(actor.role, ActorRole::Adjudicator | ActorRole::Admin)
}

/// Builds an open dispute for `order`.
///
/// # Errors
/// * `Validation` - empty or oversized description
/// * `NotAPartyToOrder` - initiator is neither buyer nor seller
/// * `DisputeAlreadyOpen` / `InvalidState` - order is not disputable
pub fn open(
    ctx: &EngineContext,
    order: &SimpleOrder,
    existing: Option<&Dispute>,
    initiator: &Actor,
    dispute_type: DisputeType,
    description: &str,
) -> EngineResult<Dispute> {
    let description = description.trim();
    if description.is_empty() {
        return Err(EngineError::Validation("dispute description is required".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::Validation(format!(
            "dispute description exceeds {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    if !lifecycle::is_party(order, initiator.user_id) {
        return Err(EngineError::NotAPartyToOrder { actor: initiator.user_id, order_id: order.id });
    }
    if existing.is_some() {
        return Err(EngineError::DisputeAlreadyOpen(order.id));
    }
    if !matches!(order.status, SimpleOrderStatus::Matched | SimpleOrderStatus::InProgress) {
        return Err(EngineError::invalid_state("order", order.id, "matched|in_progress", order.status));
    }

    let now = ctx.now();
    Ok(Dispute {
        id: ctx.next_id(),
        order_id: order.id,
        initiator_id: initiator.user_id,
        dispute_type,
        description: description.to_string(),
        evidence: Vec::new(),
        status: DisputeStatus::Open,
        outcome: None,
        resolver_id: None,
        resolution_notes: None,
        created_at: now,
        resolved_at: None,
    })
}

/// Appends evidence. A closed dispute always answers `DisputeNotOpen`, whoever asks.
pub fn add_evidence(
    dispute: &mut Dispute,
    order: &SimpleOrder,
    submitter: &Actor,
    entry: NewEvidence,
    at: DateTime<Utc>,
) -> EngineResult<Evidence> {
    if dispute.status != DisputeStatus::Open {
        return Err(EngineError::DisputeNotOpen(dispute.id));
    }
    if !lifecycle::is_party(order, submitter.user_id) {
        return Err(EngineError::NotAPartyToOrder { actor: submitter.user_id, order_id: order.id });
    }
    if entry.content.trim().is_empty() {
        return Err(EngineError::Validation("evidence content is required".into()));
    }
    if entry.content.chars().count() > MAX_EVIDENCE_LEN {
        return Err(EngineError::Validation(format!(
            "evidence content exceeds {} characters",
            MAX_EVIDENCE_LEN
        )));
    }

    let evidence = Evidence {
        evidence_type: entry.evidence_type,
        content: entry.content,
        url: entry.url,
        submitted_by: submitter.user_id,
        submitted_at: at,
    };
    dispute.evidence.push(evidence.clone());
    Ok(evidence)
}

pub fn resolve(
    dispute: &mut Dispute,
    resolver: &Actor,
    outcome: DisputeOutcome,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> EngineResult<()> {
    if !can_adjudicate(resolver) {
        return Err(EngineError::NotAuthorized { actor: resolver.user_id, action: "resolve disputes" });
    }
    if dispute.status != DisputeStatus::Open {
        return Err(EngineError::DisputeNotOpen(dispute.id));
    }

    dispute.status = DisputeStatus::Resolved;
    dispute.outcome = Some(outcome);
    dispute.resolver_id = Some(resolver.user_id);
    dispute.resolution_notes = notes;
    dispute.resolved_at = Some(at);
    info!("Dispute {} resolved with {:?} by {}", dispute.id, outcome, resolver.user_id);
    Ok(())
}

/// `Other` leaves escrow held for a follow-up administrative action.
pub fn escrow_action_for(outcome: DisputeOutcome) -> Option<EscrowAction> {
    match outcome {
        DisputeOutcome::BuyerFavor => Some(EscrowAction::Release),
        DisputeOutcome::SellerFavor | DisputeOutcome::CancelOrder => Some(EscrowAction::Refund),
        DisputeOutcome::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::types::{PaymentMethod, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const SELLER: Uuid = Uuid::from_u128(1);
    const BUYER: Uuid = Uuid::from_u128(2);

    fn order(status: SimpleOrderStatus) -> SimpleOrder {
        let at = Utc::now();
        SimpleOrder {
            id: Uuid::from_u128(10),
            owner_id: SELLER,
            side: Side::Sell,
            seller_id: Some(SELLER),
            buyer_id: Some(BUYER),
            asset: "USDT".into(),
            fiat_currency: "NGN".into(),
            quantity: dec!(100),
            unit_price: dec!(1500),
            total_amount: dec!(150000),
            payment_method: PaymentMethod::BankTransfer,
            status,
            terms: None,
            payment_reference: None,
            proof_of_payment: None,
            risk_flags: vec![],
            created_at: at,
            updated_at: at,
            matched_at: Some(at),
            payment_submitted_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn evidence() -> NewEvidence {
        NewEvidence {
            evidence_type: EvidenceType::TransactionProof,
            content: "bank receipt #123".into(),
            url: None,
        }
    }

    #[test]
    fn test_only_parties_open_disputes() {
        let ctx = EngineContext::system();
        let o = order(SimpleOrderStatus::InProgress);
        let stranger = Actor::user(Uuid::from_u128(3));
        let err = open(&ctx, &o, None, &stranger, DisputeType::Other, "x").unwrap_err();
        assert!(matches!(err, EngineError::NotAPartyToOrder { .. }));

        let dispute = open(&ctx, &o, None, &Actor::user(BUYER), DisputeType::PaymentNotReceived, "no coins").unwrap();
        assert_eq!(dispute.status, DisputeStatus::Open);
    }

    #[test]
    fn test_description_is_validated() {
        let ctx = EngineContext::system();
        let o = order(SimpleOrderStatus::Matched);
        let long = "a".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(matches!(
            open(&ctx, &o, None, &Actor::user(BUYER), DisputeType::Other, &long),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            open(&ctx, &o, None, &Actor::user(BUYER), DisputeType::Other, "   "),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_active_order_is_not_disputable() {
        let ctx = EngineContext::system();
        let o = order(SimpleOrderStatus::Active);
        let err = open(&ctx, &o, None, &Actor::user(SELLER), DisputeType::Other, "x").unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[test]
    fn test_evidence_after_resolution_is_rejected() {
        let ctx = EngineContext::system();
        let o = order(SimpleOrderStatus::InProgress);
        let mut dispute = open(&ctx, &o, None, &Actor::user(BUYER), DisputeType::Other, "x").unwrap();

        add_evidence(&mut dispute, &o, &Actor::user(SELLER), evidence(), Utc::now()).unwrap();
        resolve(&mut dispute, &Actor::adjudicator(Uuid::from_u128(7)), DisputeOutcome::Other, None, Utc::now())
            .unwrap();

        let err = add_evidence(&mut dispute, &o, &Actor::user(SELLER), evidence(), Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::DisputeNotOpen(dispute.id));
        let err = add_evidence(&mut dispute, &o, &Actor::user(Uuid::from_u128(9)), evidence(), Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::DisputeNotOpen(dispute.id));
        assert_eq!(dispute.evidence.len(), 1);
    }

    #[test]
    fn test_resolution_requires_adjudicator_and_happens_once() {
        let ctx = EngineContext::system();
        let o = order(SimpleOrderStatus::InProgress);
        let mut dispute = open(&ctx, &o, None, &Actor::user(BUYER), DisputeType::Other, "x").unwrap();

        let err = resolve(&mut dispute, &Actor::user(SELLER), DisputeOutcome::SellerFavor, None, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized { .. }));

        let adjudicator = Actor::adjudicator(Uuid::from_u128(7));
        resolve(&mut dispute, &adjudicator, DisputeOutcome::SellerFavor, None, Utc::now()).unwrap();
        let err = resolve(&mut dispute, &adjudicator, DisputeOutcome::BuyerFavor, None, Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::DisputeNotOpen(dispute.id));
        assert_eq!(dispute.outcome, Some(DisputeOutcome::SellerFavor));
    }

    #[test]
    fn test_escrow_action_per_outcome() {
        assert_eq!(escrow_action_for(DisputeOutcome::BuyerFavor), Some(EscrowAction::Release));
        assert_eq!(escrow_action_for(DisputeOutcome::SellerFavor), Some(EscrowAction::Refund));
        assert_eq!(escrow_action_for(DisputeOutcome::CancelOrder), Some(EscrowAction::Refund));
        assert_eq!(escrow_action_for(DisputeOutcome::Other), None);
    }
}
