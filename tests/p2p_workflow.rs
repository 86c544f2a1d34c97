use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use p2p_escrow_engine::config::{FeeSchedule, LimitPolicy, RiskConfig};
use p2p_escrow_engine::domain::models::types::{
    DisputeStatus, EvidenceType, ExecutionKind, PaymentMethod, VerificationLevel,
};
use p2p_escrow_engine::domain::services::dispute::NewEvidence;
use p2p_escrow_engine::domain::services::escrow::EscrowAction;
use p2p_escrow_engine::domain::services::external::{InMemoryPaymentService, StaticIdentityService};
use p2p_escrow_engine::domain::services::p2p_service::NewSimpleOrder;
use p2p_escrow_engine::domain::services::store::ExecutionJournal;
use p2p_escrow_engine::{
    Actor, DisputeOutcome, DisputeType, EngineContext, EngineError, EscrowStatus, ManualClock, P2pEngine, Side,
    SimpleOrderStatus,
};

const ALICE: Uuid = Uuid::from_u128(0xA11CE);
const BOB: Uuid = Uuid::from_u128(0xB0B);
const CAROL: Uuid = Uuid::from_u128(0xCA201);
const JUDGE: Uuid = Uuid::from_u128(0x1D6E);
const ADMIN: Uuid = Uuid::from_u128(0xAD);

struct Harness {
    engine: Arc<P2pEngine>,
    identity: Arc<StaticIdentityService>,
    payments: Arc<InMemoryPaymentService>,
    clock: Arc<ManualClock>,
}

fn harness(risk: RiskConfig) -> Harness {
    let (ctx, clock) = EngineContext::deterministic(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    let identity = Arc::new(StaticIdentityService::new(VerificationLevel::Level3, dec!(5)));
    let payments = Arc::new(InMemoryPaymentService::new());
    let engine = P2pEngine::new(
        ctx,
        risk,
        FeeSchedule::default(),
        Arc::new(ExecutionJournal::new()),
        identity.clone(),
        payments.clone(),
    );
    Harness { engine: Arc::new(engine), identity, payments, clock }
}

fn order_request(side: Side, quantity: Decimal, unit_price: Decimal) -> NewSimpleOrder {
    NewSimpleOrder {
        side,
        asset: "BTC".into(),
        fiat_currency: Some("NGN".into()),
        quantity,
        unit_price,
        payment_method: PaymentMethod::BankTransfer,
        terms: Some("Bank transfer within 30 minutes".into()),
    }
}

/// Alice sells 0.5 BTC at 45,000 and Bob takes the order and pays.
fn order_in_progress(h: &Harness) -> Uuid {
    let order = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(0.5), dec!(45000)))
        .unwrap();
    h.engine.match_order(&Actor::user(BOB), order.id).unwrap();
    h.engine
        .process_payment(&Actor::user(BOB), order.id, Some("transfer-ref-991".into()))
        .unwrap();
    order.id
}

#[test]
fn test_successful_trade() {
    let h = harness(RiskConfig::default());
    let order = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(0.5), dec!(45000)))
        .unwrap();
    assert_eq!(order.total_amount, dec!(22500));
    assert_eq!(order.status, SimpleOrderStatus::Active);

    let matched = h.engine.match_order(&Actor::user(BOB), order.id).unwrap();
    assert_eq!(matched.order.status, SimpleOrderStatus::Matched);
    assert_eq!(matched.order.buyer_id, Some(BOB));
    let escrow = matched.escrow.unwrap();
    assert_eq!(escrow.amount, dec!(0.5));
    assert_eq!(escrow.status, EscrowStatus::Held);

    let paid = h.engine.process_payment(&Actor::user(BOB), order.id, None).unwrap();
    assert_eq!(paid.order.status, SimpleOrderStatus::InProgress);
    assert!(paid.order.payment_reference.is_some());
    assert_eq!(h.payments.payments().len(), 1);

    let done = h.engine.release_escrow(&Actor::user(ALICE), order.id).unwrap();
    assert_eq!(done.order.status, SimpleOrderStatus::Completed);
    assert_eq!(done.escrow.unwrap().status, EscrowStatus::Released);

    let executions = h.engine.user_trade_history(BOB);
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].kind, ExecutionKind::P2pSettlement);
    assert_eq!(executions[0].quantity, dec!(0.5));
    assert_eq!(executions[0].price, dec!(45000));
    assert_eq!(h.engine.journal().len(), 1);
}

#[test]
fn test_self_match_is_rejected() {
    let h = harness(RiskConfig::default());
    let order = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Buy, dec!(1), dec!(1000)))
        .unwrap();

    let err = h.engine.match_order(&Actor::user(ALICE), order.id).unwrap_err();
    assert!(matches!(err, EngineError::SelfMatchForbidden(_)));

    let record = h.engine.get_order(order.id).unwrap();
    assert_eq!(record.order.status, SimpleOrderStatus::Active);
    assert!(record.escrow.is_none());
}

#[test]
fn test_dispute_resolved_in_seller_favor_refunds() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);

    let dispute = h
        .engine
        .open_dispute(&Actor::user(BOB), order_id, DisputeType::PaymentNotReceived, "Seller has not released")
        .unwrap();
    assert_eq!(h.engine.get_order(order_id).unwrap().order.status, SimpleOrderStatus::InDispute);

    h.engine
        .add_dispute_evidence(
            &Actor::user(BOB),
            dispute.id,
            NewEvidence {
                evidence_type: EvidenceType::TransactionProof,
                content: "bank statement".into(),
                url: None,
            },
        )
        .unwrap();

    let record = h
        .engine
        .resolve_dispute(&Actor::adjudicator(JUDGE), dispute.id, DisputeOutcome::SellerFavor, None)
        .unwrap();
    assert_eq!(record.order.status, SimpleOrderStatus::DisputeResolved);
    assert_eq!(record.escrow.unwrap().status, EscrowStatus::Refunded);
    let resolved = &record.disputes[0];
    assert_eq!(resolved.status, DisputeStatus::Resolved);
    assert_eq!(resolved.resolver_id, Some(JUDGE));
    assert_eq!(resolved.evidence.len(), 1);
    assert!(h.engine.journal().is_empty());
}

#[test]
fn test_dispute_in_buyer_favor_settles() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);
    let dispute = h
        .engine
        .open_dispute(&Actor::user(ALICE), order_id, DisputeType::PaymentNotMade, "No funds arrived")
        .unwrap();

    let record = h
        .engine
        .resolve_dispute(&Actor::adjudicator(JUDGE), dispute.id, DisputeOutcome::BuyerFavor, Some("proof ok".into()))
        .unwrap();
    assert_eq!(record.escrow.unwrap().status, EscrowStatus::Released);
    assert_eq!(h.engine.journal().len(), 1);
}

#[test]
fn test_resolution_is_final() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);
    let dispute = h
        .engine
        .open_dispute(&Actor::user(BOB), order_id, DisputeType::Other, "Unresponsive seller")
        .unwrap();

    let err = h
        .engine
        .resolve_dispute(&Actor::user(CAROL), dispute.id, DisputeOutcome::BuyerFavor, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAuthorized { .. }));

    h.engine
        .resolve_dispute(&Actor::adjudicator(JUDGE), dispute.id, DisputeOutcome::SellerFavor, None)
        .unwrap();
    let err = h
        .engine
        .resolve_dispute(&Actor::adjudicator(JUDGE), dispute.id, DisputeOutcome::BuyerFavor, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::DisputeNotOpen(_)));

    let record = h.engine.get_order(order_id).unwrap();
    assert_eq!(record.disputes[0].outcome, Some(DisputeOutcome::SellerFavor));
    assert_eq!(record.escrow.unwrap().status, EscrowStatus::Refunded);
}

#[test]
fn test_other_outcome_leaves_escrow_for_admin() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);
    let dispute = h
        .engine
        .open_dispute(&Actor::user(BOB), order_id, DisputeType::Other, "Partial payment")
        .unwrap();

    let record = h
        .engine
        .resolve_dispute(&Actor::adjudicator(JUDGE), dispute.id, DisputeOutcome::Other, None)
        .unwrap();
    assert_eq!(record.order.status, SimpleOrderStatus::DisputeResolved);
    assert_eq!(record.escrow.unwrap().status, EscrowStatus::Held);

    let err = h
        .engine
        .manage_escrow(&Actor::user(ALICE), order_id, EscrowAction::Release, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAuthorized { .. }));

    let record = h
        .engine
        .manage_escrow(&Actor::admin(ADMIN), order_id, EscrowAction::Release, Some("split agreed".into()))
        .unwrap();
    assert_eq!(record.order.status, SimpleOrderStatus::DisputeResolved);
    assert_eq!(record.escrow.unwrap().status, EscrowStatus::Released);

    // Escrow ends in exactly one terminal state
    let err = h
        .engine
        .manage_escrow(&Actor::admin(ADMIN), order_id, EscrowAction::Refund, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[test]
fn test_second_dispute_is_rejected_while_one_is_open() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);
    h.engine
        .open_dispute(&Actor::user(BOB), order_id, DisputeType::PaymentNotReceived, "first")
        .unwrap();

    let err = h
        .engine
        .open_dispute(&Actor::user(ALICE), order_id, DisputeType::PaymentNotMade, "second")
        .unwrap_err();
    assert!(matches!(err, EngineError::DisputeAlreadyOpen(_) | EngineError::InvalidState { .. }));

    let err = h
        .engine
        .open_dispute(&Actor::user(CAROL), order_id, DisputeType::Other, "outsider")
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAPartyToOrder { .. } | EngineError::DisputeAlreadyOpen(_)));
    assert_eq!(h.engine.open_disputes(&Actor::adjudicator(JUDGE)).unwrap().len(), 1);
}

#[test]
fn test_daily_limit_is_enforced() {
    let risk = RiskConfig { policy: LimitPolicy::Enforce, ..RiskConfig::default() };
    let h = harness(risk);
    h.identity.set_level(ALICE, VerificationLevel::Level1);

    h.engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(1), dec!(900)))
        .unwrap();

    let err = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(1), dec!(200)))
        .unwrap_err();
    assert!(matches!(err, EngineError::DailyLimitExceeded { .. }));

    h.engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(1), dec!(50)))
        .unwrap();
    let limit = h.engine.remaining_daily_limit(ALICE).unwrap();
    assert_eq!(limit.used, dec!(950));
    assert_eq!(limit.remaining, dec!(50));

    // Usage resets at the next local midnight
    h.clock.advance(chrono::Duration::days(1));
    assert_eq!(h.engine.remaining_daily_limit(ALICE).unwrap().used, Decimal::ZERO);
}

#[test]
fn test_cancel_is_idempotent_on_terminal_orders() {
    let h = harness(RiskConfig::default());
    let order = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(1), dec!(100)))
        .unwrap();

    let first = h.engine.cancel_order(&Actor::user(ALICE), order.id).unwrap();
    let second = h.engine.cancel_order(&Actor::user(ALICE), order.id).unwrap();
    assert_eq!(first.order.status, SimpleOrderStatus::Cancelled);
    assert_eq!(second.order, first.order);

    let err = h.engine.match_order(&Actor::user(BOB), order.id).unwrap_err();
    assert!(matches!(err, EngineError::OrderNotActive { .. }));
}

#[test]
fn test_cancel_refused_once_payment_is_under_way() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);

    let err = h.engine.cancel_order(&Actor::user(ALICE), order_id).unwrap_err();
    assert!(matches!(err, EngineError::CannotCancelInCurrentState { .. }));
    assert_eq!(h.engine.get_order(order_id).unwrap().escrow.unwrap().status, EscrowStatus::Held);
}

#[test]
fn test_hold_then_admin_release() {
    let h = harness(RiskConfig::default());
    let order_id = order_in_progress(&h);

    let held = h
        .engine
        .manage_escrow(&Actor::admin(ADMIN), order_id, EscrowAction::Hold, Some("compliance review".into()))
        .unwrap();
    assert_eq!(held.order.status, SimpleOrderStatus::OnHold);
    assert_eq!(held.escrow.as_ref().unwrap().status, EscrowStatus::Held);

    let err = h.engine.release_escrow(&Actor::user(ALICE), order_id).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let released = h
        .engine
        .manage_escrow(&Actor::admin(ADMIN), order_id, EscrowAction::Release, None)
        .unwrap();
    assert_eq!(released.order.status, SimpleOrderStatus::Completed);
    assert_eq!(h.engine.journal().len(), 1);
}

#[test]
fn test_concurrent_matches_admit_one_counterparty() {
    let h = harness(RiskConfig::default());
    let order = h
        .engine
        .create_simple_order(&Actor::user(ALICE), order_request(Side::Sell, dec!(1), dec!(100)))
        .unwrap();

    let takers: Vec<Uuid> = (1..=8).map(|i| Uuid::from_u128(0x1000 + i)).collect();
    let handles: Vec<_> = takers
        .into_iter()
        .map(|taker| {
            let engine = h.engine.clone();
            thread::spawn(move || engine.match_order(&Actor::user(taker), order.id).is_ok())
        })
        .collect();
    let successes = handles.into_iter().map(|handle| handle.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(successes, 1);

    let record = h.engine.get_order(order.id).unwrap();
    assert_eq!(record.order.status, SimpleOrderStatus::Matched);
    assert!(record.order.buyer_id.is_some());
    assert!(record.escrow.is_some());
}

#[test]
fn test_release_and_dispute_race_has_one_winner() {
    for _ in 0..20 {
        let h = harness(RiskConfig::default());
        let order_id = order_in_progress(&h);
        let start = Arc::new(Barrier::new(2));

        let release = {
            let (engine, start) = (h.engine.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                engine.release_escrow(&Actor::user(ALICE), order_id).is_ok()
            })
        };
        let dispute = {
            let (engine, start) = (h.engine.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                engine
                    .open_dispute(&Actor::user(BOB), order_id, DisputeType::PaymentNotReceived, "Still waiting")
                    .is_ok()
            })
        };
        let released = release.join().unwrap();
        let disputed = dispute.join().unwrap();
        assert!(released ^ disputed, "released={} disputed={}", released, disputed);

        let record = h.engine.get_order(order_id).unwrap();
        let escrow = record.escrow.unwrap();
        if released {
            assert_eq!(record.order.status, SimpleOrderStatus::Completed);
            assert_eq!(escrow.status, EscrowStatus::Released);
            assert!(record.disputes.is_empty());
            assert_eq!(h.engine.journal().for_order(order_id).len(), 1);
        } else {
            assert_eq!(record.order.status, SimpleOrderStatus::InDispute);
            assert_eq!(escrow.status, EscrowStatus::Held);
            assert_eq!(record.disputes.len(), 1);
            assert!(h.engine.journal().for_order(order_id).is_empty());
        }
    }
}

#[test]
fn test_active_listing_orders_sells_by_price() {
    let h = harness(RiskConfig::default());
    let alice = Actor::user(ALICE);
    h.engine
        .create_simple_order(&alice, order_request(Side::Sell, dec!(1), dec!(46000)))
        .unwrap();
    h.engine
        .create_simple_order(&alice, order_request(Side::Sell, dec!(1), dec!(45000)))
        .unwrap();
    h.engine
        .create_simple_order(&Actor::user(BOB), order_request(Side::Buy, dec!(1), dec!(44000)))
        .unwrap();

    let listing = h.engine.active_orders(&Default::default());
    let prices: Vec<Decimal> = listing.iter().map(|o| o.unit_price).collect();
    assert_eq!(prices, vec![dec!(45000), dec!(46000), dec!(44000)]);
}
