//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Escrow Manager. An escrow leaves `held` exactly once, to `released` or `refunded`; the
// administrative hold only annotates it. Order status changes are driven by the caller in the
// same unit of work.
//
// | Name                   | Description                                             |
// |------------------------|---------------------------------------------------------|
// | open                   | Creates the held escrow for a freshly matched order     |
// | release / refund       | Terminal transitions out of `held`                      |
// | hold                   | Flags a held escrow for review                          |
// | authorize_*            | Capability checks per transition                        |
// | settlement_execution   | TradeExecution for the settlement leg                   |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::FeeSchedule;
use crate::domain::models::clock::EngineContext;
use crate::domain::models::types::{
    Actor, ActorRole, Escrow, EscrowStatus, ExecutionKind, SimpleOrder, TradeExecution,
};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::lifecycle;

/// Action the escrow manager should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowAction {
    Release,
    Refund,
    Hold,
}

pub fn open(ctx: &EngineContext, order: &SimpleOrder) -> Escrow {
    Escrow {
        id: ctx.next_id(),
        order_id: order.id,
        asset: order.asset.clone(),
        amount: order.quantity,
        status: EscrowStatus::Held,
        held_for_review: false,
        notes: None,
        created_at: ctx.now(),
        released_at: None,
        refunded_at: None,
    }
}

fn ensure_held(escrow: &Escrow) -> EngineResult<()> {
    if escrow.status != EscrowStatus::Held {
        return Err(EngineError::invalid_state("escrow", escrow.id, "held", escrow.status));
    }
    Ok(())
}

fn append_note(escrow: &mut Escrow, notes: Option<String>) {
    if let Some(note) = notes.filter(|n| !n.trim().is_empty()) {
        escrow.notes = Some(match escrow.notes.take() {
            Some(existing) => format!("{}\n{}", existing, note),
            None => note,
        });
    }
}

pub fn release(escrow: &mut Escrow, at: DateTime<Utc>, notes: Option<String>) -> EngineResult<()> {
    ensure_held(escrow)?;
    escrow.status = EscrowStatus::Released;
    escrow.released_at = Some(at);
    append_note(escrow, notes);
    info!("Escrow {} released for order {}", escrow.id, escrow.order_id);
    Ok(())
}

pub fn refund(escrow: &mut Escrow, at: DateTime<Utc>, notes: Option<String>) -> EngineResult<()> {
    ensure_held(escrow)?;
    escrow.status = EscrowStatus::Refunded;
    escrow.refunded_at = Some(at);
    append_note(escrow, notes);
    info!("Escrow {} refunded for order {}", escrow.id, escrow.order_id);
    Ok(())
}

pub fn hold(escrow: &mut Escrow, notes: Option<String>) -> EngineResult<()> {
    ensure_held(escrow)?;
    escrow.held_for_review = true;
    append_note(escrow, notes);
    info!("Escrow {} placed on hold", escrow.id);
    Ok(())
}

/// The party holding the crypto (the seller) authorizes its release.
pub fn authorize_release(order: &SimpleOrder, actor: &Actor) -> EngineResult<()> {
    if order.seller_id == Some(actor.user_id) {
        Ok(())
    } else {
        Err(EngineError::NotAuthorized { actor: actor.user_id, action: "release this escrow" })
    }
}

pub fn authorize_refund(actor: &Actor) -> EngineResult<()> {
    match actor.role {
        ActorRole::Admin | ActorRole::Adjudicator => Ok(()),
        ActorRole::User => Err(EngineError::NotAuthorized { actor: actor.user_id, action: "refund escrow" }),
    }
}

pub fn authorize_admin(actor: &Actor, action: &'static str) -> EngineResult<()> {
    match actor.role {
        ActorRole::Admin => Ok(()),
        _ => Err(EngineError::NotAuthorized { actor: actor.user_id, action }),
    }
}

/// Settlement leg recorded when escrow is released: the owner's order is the maker side, the
/// counterparty takes it. Fee is `total * percent / 100 + fixed`.
pub fn settlement_execution(
    ctx: &EngineContext,
    order: &SimpleOrder,
    fees: &FeeSchedule,
    at: DateTime<Utc>,
) -> EngineResult<TradeExecution> {
    let taker_user_id = lifecycle::counterparty_of(order).ok_or_else(|| {
        EngineError::invalid_state("order", order.id, "matched", "unmatched")
    })?;
    let fee = (order.total_amount / rust_decimal::Decimal::ONE_HUNDRED)
        .saturating_mul(fees.settlement_fee_percent)
        .saturating_add(fees.settlement_fee_fixed);

    Ok(TradeExecution {
        id: ctx.next_id(),
        kind: ExecutionKind::P2pSettlement,
        maker_order_id: order.id,
        taker_order_id: None,
        maker_user_id: order.owner_id,
        taker_user_id,
        trading_pair_id: None,
        symbol: format!("{}/{}", order.asset, order.fiat_currency),
        side: order.side.opposite(),
        quantity: order.quantity,
        price: order.unit_price,
        quote_amount: order.total_amount,
        fee,
        fee_payer: fees.settlement_fee_payer,
        executed_at: at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::types::{PaymentMethod, Side, SimpleOrderStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn matched_order() -> SimpleOrder {
        let seller = Uuid::from_u128(1);
        let at = Utc::now();
        SimpleOrder {
            id: Uuid::from_u128(10),
            owner_id: seller,
            side: Side::Sell,
            seller_id: Some(seller),
            buyer_id: Some(Uuid::from_u128(2)),
            asset: "BTC".into(),
            fiat_currency: "NGN".into(),
            quantity: dec!(0.5),
            unit_price: dec!(45000),
            total_amount: dec!(22500),
            payment_method: PaymentMethod::BankTransfer,
            status: SimpleOrderStatus::InProgress,
            terms: None,
            payment_reference: None,
            proof_of_payment: None,
            risk_flags: vec![],
            created_at: at,
            updated_at: at,
            matched_at: Some(at),
            payment_submitted_at: Some(at),
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_escrow_leaves_held_exactly_once() {
        let ctx = EngineContext::system();
        let order = matched_order();
        let mut escrow = open(&ctx, &order);
        assert_eq!(escrow.amount, dec!(0.5));

        release(&mut escrow, Utc::now(), None).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);

        let err = refund(&mut escrow, Utc::now(), None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { entity: "escrow", .. }));
        assert!(release(&mut escrow, Utc::now(), None).is_err());
        assert_eq!(escrow.refunded_at, None);
    }

    #[test]
    fn test_hold_keeps_escrow_held() {
        let ctx = EngineContext::system();
        let mut escrow = open(&ctx, &matched_order());
        hold(&mut escrow, Some("manual review".into())).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Held);
        assert!(escrow.held_for_review);
        refund(&mut escrow, Utc::now(), Some("fraud".into())).unwrap();
        assert_eq!(escrow.notes.as_deref(), Some("manual review\nfraud"));
    }

    #[test]
    fn test_only_seller_releases() {
        let order = matched_order();
        assert!(authorize_release(&order, &Actor::user(Uuid::from_u128(1))).is_ok());
        assert!(authorize_release(&order, &Actor::user(Uuid::from_u128(2))).is_err());
        assert!(authorize_release(&order, &Actor::admin(Uuid::from_u128(3))).is_err());
    }

    #[test]
    fn test_refund_and_hold_capabilities() {
        let user = Actor::user(Uuid::from_u128(1));
        assert!(authorize_refund(&user).is_err());
        assert!(authorize_refund(&Actor::adjudicator(Uuid::from_u128(5))).is_ok());
        assert!(authorize_admin(&Actor::adjudicator(Uuid::from_u128(5)), "hold escrow").is_err());
        assert!(authorize_admin(&Actor::admin(Uuid::from_u128(6)), "hold escrow").is_ok());
    }

    #[test]
    fn test_settlement_fee() {
        let ctx = EngineContext::system();
        let fees = FeeSchedule {
            settlement_fee_percent: dec!(1),
            settlement_fee_fixed: dec!(50),
            ..FeeSchedule::default()
        };
        let execution = settlement_execution(&ctx, &matched_order(), &fees, Utc::now()).unwrap();
        assert_eq!(execution.fee, dec!(275));
        assert_eq!(execution.quantity, dec!(0.5));
        assert_eq!(execution.price, dec!(45000));
        assert_eq!(execution.taker_user_id, Uuid::from_u128(2));
        assert_eq!(execution.side, Side::Buy);
    }
}
