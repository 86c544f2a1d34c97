//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Coordinator for the P2P simple-order flow. Every mutating operation runs as one unit of work
// on the order's record: pairing and escrow creation, payment, release with its settlement
// execution, and dispute resolution with its escrow action either all commit or none do.
// Events are published only after the unit of work commits.
//
// | Component        | Description                                                      |
// |------------------|------------------------------------------------------------------|
// | P2pEngine        | SimpleOrder operation set                                        |
// | NewSimpleOrder   | Creation request                                                 |
// | OrderFilter      | Filter for the public active-order listing                       |
// | TradeStatistics  | Per-status count and volume for one user                         |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                   | Description                                        | Return Type           |
// |------------------------|----------------------------------------------------|-----------------------|
// | create_simple_order    | Risk-gated creation of a one-sided intent           | EngineResult<Order>   |
// | match_order            | Counterparty takes the order, escrow is opened      | EngineResult<Record>  |
// | cancel_order           | Owner cancel, idempotent on terminal states         | EngineResult<Record>  |
// | process_payment        | Buyer submits payment, order goes in_progress       | EngineResult<Record>  |
// | release_escrow         | Seller releases, order completes with a settlement  | EngineResult<Record>  |
// | refund_escrow          | Admin/adjudicator refund                            | EngineResult<Record>  |
// | manage_escrow          | Admin release / refund / hold                       | EngineResult<Record>  |
// | open_dispute           | Party opens a dispute                               | EngineResult<Dispute> |
// | add_dispute_evidence   | Party appends evidence                              | EngineResult<Evidence>|
// | resolve_dispute        | Adjudicator resolves and drives escrow              | EngineResult<Record>  |
//--------------------------------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FeeSchedule, RiskConfig};
use crate::domain::models::clock::EngineContext;
use crate::domain::models::types::{
    Actor, ActorRole, Dispute, DisputeOutcome, DisputeStatus, DisputeType, Evidence, PaymentMethod, Side,
    SimpleOrder, SimpleOrderStatus, TradeExecution,
};
use crate::domain::services::dispute::{self, NewEvidence};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::escrow::{self, EscrowAction};
use crate::domain::services::events::{EngineEvent, EventBus};
use crate::domain::services::external::{IdentityService, PaymentService};
use crate::domain::services::lifecycle;
use crate::domain::services::matching_engine::pair_counterparty;
use crate::domain::services::risk::{DailyLimit, RiskGate};
use crate::domain::services::store::{ExecutionJournal, OrderRecord, P2pStore, UnitOfWork};

const DEFAULT_FIAT_CURRENCY: &str = "NGN";
const MAX_TERMS_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSimpleOrder {
    pub side: Side,
    pub asset: String,
    #[serde(default)]
    pub fiat_currency: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub terms: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub side: Option<Side>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusStatistics {
    pub count: usize,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStatistics {
    pub user_id: Uuid,
    pub total_orders: usize,
    pub total_volume: Decimal,
    pub by_status: BTreeMap<SimpleOrderStatus, StatusStatistics>,
}

/// P2P simple-order engine.
pub struct P2pEngine {
    ctx: EngineContext,
    store: P2pStore,
    risk: RiskGate,
    fees: FeeSchedule,
    identity: Arc<dyn IdentityService>,
    payments: Arc<dyn PaymentService>,
    event_bus: Option<EventBus>,
    /// Serializes creation per user so the limit check and the insert are atomic
    creation_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for P2pEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P2pEngine")
            .field("store", &self.store)
            .field("risk", &self.risk)
            .field("fees", &self.fees)
            .finish()
    }
}

impl P2pEngine {
    pub fn new(
        ctx: EngineContext,
        risk: RiskConfig,
        fees: FeeSchedule,
        journal: Arc<ExecutionJournal>,
        identity: Arc<dyn IdentityService>,
        payments: Arc<dyn PaymentService>,
    ) -> Self {
        Self {
            ctx,
            store: P2pStore::new(journal),
            risk: RiskGate::new(risk),
            fees,
            identity,
            payments,
            event_bus: None,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes committed changes on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn journal(&self) -> &Arc<ExecutionJournal> {
        self.store.journal()
    }

    fn publish(&self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        match &self.event_bus {
            Some(bus) => bus.publish_all(events),
            None => debug!("No event bus attached, dropping {} events", events.len()),
        }
    }

    fn creation_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.creation_locks.lock().entry(user_id).or_default().clone()
    }

    /// Creates a one-sided P2P intent owned by `actor`.
    ///
    /// # Errors
    /// * `Validation` - empty asset, non-positive quantity or price, oversized terms
    /// * `DailyLimitExceeded` - the order would pass the verification-level ceiling under `Enforce`
    /// * `External` - the identity service failed
    pub fn create_simple_order(&self, actor: &Actor, request: NewSimpleOrder) -> EngineResult<SimpleOrder> {
        let asset = request.asset.trim().to_uppercase();
        if asset.is_empty() {
            return Err(EngineError::Validation("asset is required".into()));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(EngineError::Validation("quantity must be positive".into()));
        }
        if request.unit_price <= Decimal::ZERO {
            return Err(EngineError::Validation("unit price must be positive".into()));
        }
        if request.terms.as_ref().is_some_and(|t| t.chars().count() > MAX_TERMS_LEN) {
            return Err(EngineError::Validation(format!("terms exceed {} characters", MAX_TERMS_LEN)));
        }
        let fiat_currency = request
            .fiat_currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_FIAT_CURRENCY.to_string());
        let total_amount = request
            .quantity
            .checked_mul(request.unit_price)
            .ok_or_else(|| EngineError::Validation("quantity times unit price is out of range".into()))?;
        let user_id = actor.user_id;

        let lock = self.creation_lock(user_id);
        let _guard = lock.lock();

        let level = self.identity.verification_level(user_id)?;
        let now = self.ctx.now();
        let history = self.store.select(|r| lifecycle::is_party(&r.order, user_id));
        let limit = self.risk.daily_limit(level, user_id, history.iter().map(|r| &r.order), now);
        let risk_flags = self
            .risk
            .assess_order(&limit, user_id, total_amount, history.iter().map(|r| &r.order), now)?;

        let order = SimpleOrder {
            id: self.ctx.next_id(),
            owner_id: user_id,
            side: request.side,
            seller_id: (request.side == Side::Sell).then_some(user_id),
            buyer_id: (request.side == Side::Buy).then_some(user_id),
            asset,
            fiat_currency,
            quantity: request.quantity,
            unit_price: request.unit_price,
            total_amount,
            payment_method: request.payment_method,
            status: SimpleOrderStatus::Active,
            terms: request.terms,
            payment_reference: None,
            proof_of_payment: None,
            risk_flags,
            created_at: now,
            updated_at: now,
            matched_at: None,
            payment_submitted_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        self.store.insert(order.clone());
        info!(
            "Order {} created: {:?} {} {} @ {} {} by {}",
            order.id, order.side, order.quantity, order.asset, order.unit_price, order.fiat_currency, user_id
        );

        self.publish(vec![EngineEvent::SimpleOrderCreated { order: order.clone(), timestamp: now }]);
        Ok(order)
    }

    /// `actor` takes the open side of the order; exactly one escrow is opened for its quantity.
    ///
    /// # Errors
    /// * `OrderNotActive` - already matched, cancelled or further along
    /// * `SelfMatchForbidden` - the owner tried to take their own order
    /// * `ReputationTooLow` - counterparty screening failed under `Enforce`
    pub fn match_order(&self, actor: &Actor, order_id: Uuid) -> EngineResult<OrderRecord> {
        let counterparty = actor.user_id;
        let reputation = self.identity.reputation_score(counterparty)?;
        let screening = self.risk.screen_counterparty(counterparty, reputation)?;
        let now = self.ctx.now();

        let (record, events) = self.store.with_order(order_id, |uow| {
            pair_counterparty(&mut uow.record.order, counterparty, now)?;
            for flag in screening {
                if !uow.record.order.risk_flags.contains(&flag) {
                    uow.record.order.risk_flags.push(flag);
                }
            }

            if uow.record.escrow.is_some() {
                return Err(EngineError::invalid_state("order", order_id, "no escrow", "escrowed"));
            }
            let escrow = escrow::open(&self.ctx, &uow.record.order);
            uow.record.escrow = Some(escrow.clone());
            uow.emit(EngineEvent::OrderMatched { order: uow.record.order.clone(), escrow, timestamp: now });
            Ok(uow.record.clone())
        })?;

        info!("Order {} matched by {}", order_id, counterparty);
        self.publish(events);
        Ok(record)
    }

    /// Cancels the order. Terminal orders are returned unchanged; a matched order has its
    /// escrow refunded in the same unit of work.
    ///
    /// # Errors
    /// * `NotAuthorized` - caller is neither the owner nor an admin
    /// * `CannotCancelInCurrentState` - payment is under way or the order is disputed or on hold
    pub fn cancel_order(&self, actor: &Actor, order_id: Uuid) -> EngineResult<OrderRecord> {
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            let (owner_id, status) = (uow.record.order.owner_id, uow.record.order.status);
            if owner_id != actor.user_id && actor.role != ActorRole::Admin {
                return Err(EngineError::NotAuthorized { actor: actor.user_id, action: "cancel this order" });
            }
            if lifecycle::is_terminal(status) {
                debug!("Order {} already {}, cancel is a no-op", order_id, status);
                return Ok(uow.record.clone());
            }

            match status {
                SimpleOrderStatus::Active => {
                    lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::Cancelled, now)?;
                }
                SimpleOrderStatus::Matched => {
                    self.refund_in(uow, now, Some("order cancelled before payment".into()))?;
                    lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::Cancelled, now)?;
                    emit_escrow(uow, EscrowAction::Refund, now);
                }
                status => {
                    warn!("Order {} cannot be cancelled in {}", order_id, status);
                    return Err(EngineError::CannotCancelInCurrentState { order_id, status });
                }
            }

            uow.emit(EngineEvent::SimpleOrderCancelled { order: uow.record.order.clone(), timestamp: now });
            Ok(uow.record.clone())
        })?;

        self.publish(events);
        Ok(record)
    }

    /// The buyer reports the fiat payment. A pending payment record is created with the payment
    /// service and its id stamped on the order.
    ///
    /// The payment reference is created before the order commits, while its record lock is held.
    /// If the unit of work fails after that, the payment service keeps an orphaned pending payment.
    ///
    /// # Errors
    /// * `InvalidState` - order is not `matched`
    /// * `NotAuthorized` / `NotAPartyToOrder` - caller is not the buyer
    /// * `External` - the payment service failed; nothing is changed
    pub fn process_payment(
        &self,
        actor: &Actor,
        order_id: Uuid,
        proof_of_payment: Option<String>,
    ) -> EngineResult<OrderRecord> {
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            let order = &mut uow.record.order;
            if order.status != SimpleOrderStatus::Matched {
                return Err(EngineError::invalid_state("order", order_id, "matched", order.status));
            }
            if order.buyer_id != Some(actor.user_id) {
                return Err(if lifecycle::is_party(order, actor.user_id) {
                    EngineError::NotAuthorized { actor: actor.user_id, action: "submit payment for this order" }
                } else {
                    EngineError::NotAPartyToOrder { actor: actor.user_id, order_id }
                });
            }

            let reference = self
                .payments
                .create_pending_payment(order.id, order.total_amount, order.payment_method)?;
            order.payment_reference = Some(reference.clone());
            order.proof_of_payment = proof_of_payment;
            lifecycle::transition(order, SimpleOrderStatus::InProgress, now)?;

            uow.emit(EngineEvent::PaymentSubmitted {
                order: uow.record.order.clone(),
                payment_reference: reference,
                timestamp: now,
            });
            Ok(uow.record.clone())
        })?;

        info!("Payment submitted for order {}", order_id);
        self.publish(events);
        Ok(record)
    }

    /// The seller releases escrow after payment. Completes the order and records exactly one
    /// settlement execution.
    ///
    /// # Errors
    /// * `InvalidState` - order is not `in_progress`, or escrow is not `held`
    /// * `NotAuthorized` - caller is not the seller
    pub fn release_escrow(&self, actor: &Actor, order_id: Uuid) -> EngineResult<OrderRecord> {
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            let status = uow.record.order.status;
            if status != SimpleOrderStatus::InProgress {
                return Err(EngineError::invalid_state("order", order_id, "in_progress", status));
            }
            escrow::authorize_release(&uow.record.order, actor)?;

            self.release_in(uow, now, None)?;
            lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::Completed, now)?;
            emit_escrow(uow, EscrowAction::Release, now);
            Ok(uow.record.clone())
        })?;

        info!("Order {} completed, escrow released by {}", order_id, actor.user_id);
        self.publish(events);
        Ok(record)
    }

    /// Administrative refund. Cancels a live order; on a resolved dispute whose outcome left
    /// escrow held, refunds without touching the status.
    ///
    /// # Errors
    /// * `NotAuthorized` - caller is neither admin nor adjudicator
    /// * `InvalidState` - active order, open dispute, terminal order, or escrow not `held`
    pub fn refund_escrow(&self, actor: &Actor, order_id: Uuid, notes: Option<String>) -> EngineResult<OrderRecord> {
        escrow::authorize_refund(actor)?;
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            match uow.record.order.status {
                SimpleOrderStatus::Matched | SimpleOrderStatus::InProgress | SimpleOrderStatus::OnHold => {
                    self.refund_in(uow, now, notes)?;
                    lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::Cancelled, now)?;
                }
                SimpleOrderStatus::DisputeResolved => self.refund_in(uow, now, notes)?,
                status => {
                    return Err(EngineError::invalid_state(
                        "order",
                        order_id,
                        "matched|in_progress|on_hold|dispute_resolved",
                        status,
                    ));
                }
            }
            emit_escrow(uow, EscrowAction::Refund, now);
            Ok(uow.record.clone())
        })?;

        info!("Escrow for order {} refunded by {}", order_id, actor.user_id);
        self.publish(events);
        Ok(record)
    }

    /// Administrative freeze: the escrow stays held, the order moves to `on_hold`.
    pub fn hold_escrow(&self, actor: &Actor, order_id: Uuid, notes: Option<String>) -> EngineResult<OrderRecord> {
        escrow::authorize_admin(actor, "hold escrow")?;
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            let status = uow.record.order.status;
            if !matches!(status, SimpleOrderStatus::Matched | SimpleOrderStatus::InProgress) {
                return Err(EngineError::invalid_state("order", order_id, "matched|in_progress", status));
            }
            let held = uow.record.escrow.as_mut().ok_or_else(|| missing_escrow(order_id))?;
            escrow::hold(held, notes)?;
            lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::OnHold, now)?;
            emit_escrow(uow, EscrowAction::Hold, now);
            Ok(uow.record.clone())
        })?;

        info!("Order {} put on hold by {}", order_id, actor.user_id);
        self.publish(events);
        Ok(record)
    }

    /// Administrative release: completes an on-hold or in-progress order, or settles a resolved
    /// dispute whose outcome left escrow held.
    pub fn admin_release_escrow(
        &self,
        actor: &Actor,
        order_id: Uuid,
        notes: Option<String>,
    ) -> EngineResult<OrderRecord> {
        escrow::authorize_admin(actor, "release escrow")?;
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            match uow.record.order.status {
                SimpleOrderStatus::OnHold | SimpleOrderStatus::InProgress => {
                    self.release_in(uow, now, notes)?;
                    lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::Completed, now)?;
                }
                SimpleOrderStatus::DisputeResolved => self.release_in(uow, now, notes)?,
                status => {
                    return Err(EngineError::invalid_state(
                        "order",
                        order_id,
                        "on_hold|in_progress|dispute_resolved",
                        status,
                    ));
                }
            }
            emit_escrow(uow, EscrowAction::Release, now);
            Ok(uow.record.clone())
        })?;

        info!("Escrow for order {} released by admin {}", order_id, actor.user_id);
        self.publish(events);
        Ok(record)
    }

    /// Admin escrow management entry point.
    pub fn manage_escrow(
        &self,
        actor: &Actor,
        order_id: Uuid,
        action: EscrowAction,
        notes: Option<String>,
    ) -> EngineResult<OrderRecord> {
        escrow::authorize_admin(actor, "manage escrow")?;
        match action {
            EscrowAction::Release => self.admin_release_escrow(actor, order_id, notes),
            EscrowAction::Refund => self.refund_escrow(actor, order_id, notes),
            EscrowAction::Hold => self.hold_escrow(actor, order_id, notes),
        }
    }

    /// A party opens a dispute; the order moves to `in_dispute`.
    ///
    /// # Errors
    /// * `NotAPartyToOrder` - initiator is neither buyer nor seller
    /// * `DisputeAlreadyOpen` - another dispute is open on this order
    /// * `InvalidState` - order is not `matched` or `in_progress`
    pub fn open_dispute(
        &self,
        actor: &Actor,
        order_id: Uuid,
        dispute_type: DisputeType,
        description: &str,
    ) -> EngineResult<Dispute> {
        let now = self.ctx.now();
        let (dispute, events) = self.store.with_order(order_id, |uow| {
            let dispute = dispute::open(
                &self.ctx,
                &uow.record.order,
                uow.record.open_dispute(),
                actor,
                dispute_type,
                description,
            )?;
            lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::InDispute, now)?;
            uow.record.disputes.push(dispute.clone());
            uow.emit(EngineEvent::DisputeOpened { dispute: dispute.clone(), timestamp: now });
            Ok(dispute)
        })?;

        info!("Dispute {} opened on order {} by {}", dispute.id, order_id, actor.user_id);
        self.publish(events);
        Ok(dispute)
    }

    pub fn add_dispute_evidence(&self, actor: &Actor, dispute_id: Uuid, entry: NewEvidence) -> EngineResult<Evidence> {
        let order_id = self.order_for_dispute(dispute_id)?;
        let now = self.ctx.now();
        let (evidence, events) = self.store.with_order(order_id, |uow| {
            let order = uow.record.order.clone();
            let dispute = uow.dispute_mut(dispute_id)?;
            let evidence = dispute::add_evidence(dispute, &order, actor, entry, now)?;
            uow.emit(EngineEvent::DisputeEvidenceAdded { dispute_id, evidence: evidence.clone(), timestamp: now });
            Ok(evidence)
        })?;

        debug!("Evidence added to dispute {} by {}", dispute_id, actor.user_id);
        self.publish(events);
        Ok(evidence)
    }

    /// Resolves a dispute and applies the escrow action its outcome implies, atomically.
    /// Outcome `other` leaves escrow held for a follow-up `manage_escrow` call.
    ///
    /// # Errors
    /// * `NotAuthorized` - resolver lacks the adjudicator capability
    /// * `DisputeNotOpen` - already resolved
    pub fn resolve_dispute(
        &self,
        actor: &Actor,
        dispute_id: Uuid,
        outcome: DisputeOutcome,
        notes: Option<String>,
    ) -> EngineResult<OrderRecord> {
        let order_id = self.order_for_dispute(dispute_id)?;
        let now = self.ctx.now();
        let (record, events) = self.store.with_order(order_id, |uow| {
            dispute::resolve(uow.dispute_mut(dispute_id)?, actor, outcome, notes.clone(), now)?;

            let action = dispute::escrow_action_for(outcome);
            match action {
                Some(EscrowAction::Release) => self.release_in(uow, now, notes)?,
                Some(EscrowAction::Refund) => self.refund_in(uow, now, notes)?,
                Some(EscrowAction::Hold) | None => {}
            }
            lifecycle::transition(&mut uow.record.order, SimpleOrderStatus::DisputeResolved, now)?;

            if let Some(action) = action {
                emit_escrow(uow, action, now);
            }
            let dispute = uow.dispute_mut(dispute_id)?.clone();
            uow.emit(EngineEvent::DisputeResolved { dispute, order: uow.record.order.clone(), timestamp: now });
            Ok(uow.record.clone())
        })?;

        info!("Dispute {} on order {} resolved: {:?}", dispute_id, order_id, outcome);
        self.publish(events);
        Ok(record)
    }

    fn order_for_dispute(&self, dispute_id: Uuid) -> EngineResult<Uuid> {
        self.store
            .order_for_dispute(dispute_id)
            .ok_or_else(|| EngineError::not_found("dispute", dispute_id))
    }

    /// Releases the held escrow and stages the settlement execution.
    fn release_in(&self, uow: &mut UnitOfWork, now: DateTime<Utc>, notes: Option<String>) -> EngineResult<()> {
        let order_id = uow.record.order.id;
        let held = uow.record.escrow.as_mut().ok_or_else(|| missing_escrow(order_id))?;
        escrow::release(held, now, notes)?;

        let execution = escrow::settlement_execution(&self.ctx, &uow.record.order, &self.fees, now)?;
        uow.emit(EngineEvent::TradeExecuted { execution: execution.clone(), timestamp: now });
        uow.record_execution(execution);
        Ok(())
    }

    fn refund_in(&self, uow: &mut UnitOfWork, now: DateTime<Utc>, notes: Option<String>) -> EngineResult<()> {
        let order_id = uow.record.order.id;
        let held = uow.record.escrow.as_mut().ok_or_else(|| missing_escrow(order_id))?;
        escrow::refund(held, now, notes)
    }

    //----------------------------------------------------------------------------------------------
    // Queries
    //----------------------------------------------------------------------------------------------

    /// Order with its escrow and disputes.
    pub fn get_order(&self, order_id: Uuid) -> EngineResult<OrderRecord> {
        self.store.get(order_id).ok_or_else(|| EngineError::not_found("order", order_id))
    }

    /// The order as `actor` may see it. Parties, adjudicators and admins get the full record;
    /// anyone else gets the order as listed, without escrow, disputes or payment details.
    pub fn view_order(&self, actor: &Actor, order_id: Uuid) -> EngineResult<OrderRecord> {
        let mut record = self.get_order(order_id)?;
        if lifecycle::is_party(&record.order, actor.user_id) || dispute::can_adjudicate(actor) {
            return Ok(record);
        }
        record.order.payment_reference = None;
        record.order.proof_of_payment = None;
        record.escrow = None;
        record.disputes.clear();
        Ok(record)
    }

    /// Active orders, sells before buys; sells by ascending price, buys by descending price,
    /// earliest first within a price.
    pub fn active_orders(&self, filter: &OrderFilter) -> Vec<SimpleOrder> {
        let asset = filter.asset.as_ref().map(|a| a.trim().to_uppercase());
        let mut orders: Vec<SimpleOrder> = self
            .store
            .select(|r| {
                let o = &r.order;
                o.status == SimpleOrderStatus::Active
                    && asset.as_ref().is_none_or(|a| *a == o.asset)
                    && filter.side.is_none_or(|s| s == o.side)
            })
            .into_iter()
            .map(|r| r.order)
            .collect();

        orders.sort_by(|a, b| {
            let side_rank = |o: &SimpleOrder| u8::from(o.side == Side::Buy);
            let price_key = |o: &SimpleOrder| match o.side {
                Side::Sell => o.unit_price,
                Side::Buy => -o.unit_price,
            };
            side_rank(a)
                .cmp(&side_rank(b))
                .then(price_key(a).cmp(&price_key(b)))
                .then(a.created_at.cmp(&b.created_at))
        });
        orders
    }

    /// Orders the user owns or took, newest first.
    pub fn user_orders(&self, user_id: Uuid, status: Option<SimpleOrderStatus>) -> Vec<SimpleOrder> {
        let mut orders: Vec<SimpleOrder> = self
            .store
            .select(|r| {
                (r.order.owner_id == user_id || lifecycle::is_party(&r.order, user_id))
                    && status.is_none_or(|s| s == r.order.status)
            })
            .into_iter()
            .map(|r| r.order)
            .collect();
        orders.sort_by_key(|o| Reverse(o.created_at));
        orders
    }

    /// Disputes on orders the user is party to, newest first.
    pub fn user_disputes(&self, user_id: Uuid, status: Option<DisputeStatus>) -> Vec<Dispute> {
        let mut disputes: Vec<Dispute> = self
            .store
            .select(|r| lifecycle::is_party(&r.order, user_id) && !r.disputes.is_empty())
            .into_iter()
            .flat_map(|r| r.disputes)
            .filter(|d| status.is_none_or(|s| s == d.status))
            .collect();
        disputes.sort_by_key(|d| Reverse(d.created_at));
        disputes
    }

    /// Queue of open disputes for adjudicators, oldest first.
    pub fn open_disputes(&self, actor: &Actor) -> EngineResult<Vec<Dispute>> {
        if !dispute::can_adjudicate(actor) {
            return Err(EngineError::NotAuthorized { actor: actor.user_id, action: "list open disputes" });
        }
        let mut disputes: Vec<Dispute> = self
            .store
            .select(|r| r.open_dispute().is_some())
            .into_iter()
            .flat_map(|r| r.disputes)
            .filter(|d| d.status == DisputeStatus::Open)
            .collect();
        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }

    /// Visible to the parties of the order and to adjudicators.
    pub fn get_dispute(&self, actor: &Actor, dispute_id: Uuid) -> EngineResult<Dispute> {
        let order_id = self.order_for_dispute(dispute_id)?;
        let record = self.get_order(order_id)?;
        if !lifecycle::is_party(&record.order, actor.user_id) && !dispute::can_adjudicate(actor) {
            return Err(EngineError::NotAPartyToOrder { actor: actor.user_id, order_id });
        }
        record
            .disputes
            .into_iter()
            .find(|d| d.id == dispute_id)
            .ok_or_else(|| EngineError::not_found("dispute", dispute_id))
    }

    /// Executions where the user was maker or taker, P2P settlements and book matches alike.
    pub fn user_trade_history(&self, user_id: Uuid) -> Vec<TradeExecution> {
        self.store.journal().for_user(user_id)
    }

    pub fn remaining_daily_limit(&self, user_id: Uuid) -> EngineResult<DailyLimit> {
        let level = self.identity.verification_level(user_id)?;
        let history = self.store.select(|r| lifecycle::is_party(&r.order, user_id));
        Ok(self
            .risk
            .daily_limit(level, user_id, history.iter().map(|r| &r.order), self.ctx.now()))
    }

    /// Count and fiat volume of the user's orders grouped by status.
    pub fn trade_statistics(&self, user_id: Uuid) -> TradeStatistics {
        let orders = self.user_orders(user_id, None);
        let mut by_status: BTreeMap<SimpleOrderStatus, StatusStatistics> = BTreeMap::new();
        for order in &orders {
            let entry = by_status.entry(order.status).or_default();
            entry.count += 1;
            entry.volume += order.total_amount;
        }

        TradeStatistics {
            user_id,
            total_orders: orders.len(),
            total_volume: orders.iter().map(|o| o.total_amount).sum(),
            by_status,
        }
    }
}

fn missing_escrow(order_id: Uuid) -> EngineError {
    EngineError::invalid_state("order", order_id, "escrowed", "no escrow")
}

/// Stages the escrow event for `action` with the record's current state.
fn emit_escrow(uow: &mut UnitOfWork, action: EscrowAction, timestamp: DateTime<Utc>) {
    let Some(escrow) = uow.record.escrow.clone() else {
        return;
    };
    let order = uow.record.order.clone();
    let event = match action {
        EscrowAction::Release => EngineEvent::EscrowReleased { order, escrow, timestamp },
        EscrowAction::Refund => EngineEvent::EscrowRefunded { order, escrow, timestamp },
        EscrowAction::Hold => EngineEvent::EscrowHeld { order, escrow, timestamp },
    };
    uow.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitPolicy;
    use crate::domain::models::types::{EscrowStatus, VerificationLevel};
    use crate::domain::services::external::{
        ExternalError, InMemoryPaymentService, MockIdentityService, MockPaymentService, StaticIdentityService,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const ALICE: Uuid = Uuid::from_u128(0xA11CE);
    const BOB: Uuid = Uuid::from_u128(0xB0B);

    fn engine_with(identity: Arc<dyn IdentityService>, payments: Arc<dyn PaymentService>) -> P2pEngine {
        let (ctx, _clock) = EngineContext::deterministic(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        P2pEngine::new(
            ctx,
            RiskConfig::default(),
            FeeSchedule::default(),
            Arc::new(ExecutionJournal::new()),
            identity,
            payments,
        )
    }

    fn engine() -> P2pEngine {
        engine_with(
            Arc::new(StaticIdentityService::new(VerificationLevel::Level3, dec!(5))),
            Arc::new(InMemoryPaymentService::new()),
        )
    }

    fn sell_request() -> NewSimpleOrder {
        NewSimpleOrder {
            side: Side::Sell,
            asset: "btc".into(),
            fiat_currency: None,
            quantity: dec!(0.5),
            unit_price: dec!(45000),
            payment_method: PaymentMethod::BankTransfer,
            terms: None,
        }
    }

    #[test]
    fn test_create_normalizes_and_computes_total() {
        let engine = engine();
        let order = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        assert_eq!(order.asset, "BTC");
        assert_eq!(order.fiat_currency, "NGN");
        assert_eq!(order.total_amount, dec!(22500));
        assert_eq!(order.seller_id, Some(ALICE));
        assert_eq!(order.buyer_id, None);
    }

    #[test]
    fn test_create_rejects_malformed_input() {
        let engine = engine();
        let mut request = sell_request();
        request.quantity = Decimal::ZERO;
        let err = engine.create_simple_order(&Actor::user(ALICE), request).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.user_orders(ALICE, None).is_empty());
    }

    #[test]
    fn test_create_rejects_total_out_of_range() {
        let engine = engine();
        let mut request = sell_request();
        request.quantity = Decimal::MAX;
        request.unit_price = dec!(2);
        let err = engine.create_simple_order(&Actor::user(ALICE), request).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.user_orders(ALICE, None).is_empty());
    }

    #[test]
    fn test_payment_service_failure_rolls_back() {
        let mut payments = MockPaymentService::new();
        payments
            .expect_create_pending_payment()
            .times(1)
            .returning(|_, _, _| Err(ExternalError::new("payments", "gateway timeout")));
        let engine = engine_with(
            Arc::new(StaticIdentityService::new(VerificationLevel::Level3, dec!(5))),
            Arc::new(payments),
        );

        let order = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        engine.match_order(&Actor::user(BOB), order.id).unwrap();

        let err = engine.process_payment(&Actor::user(BOB), order.id, None).unwrap_err();
        assert!(matches!(err, EngineError::External(_)));

        let record = engine.get_order(order.id).unwrap();
        assert_eq!(record.order.status, SimpleOrderStatus::Matched);
        assert_eq!(record.order.payment_reference, None);
    }

    #[test]
    fn test_identity_failure_blocks_creation() {
        let mut identity = MockIdentityService::new();
        identity
            .expect_verification_level()
            .returning(|_| Err(ExternalError::new("identity", "unavailable")));
        let engine = engine_with(Arc::new(identity), Arc::new(InMemoryPaymentService::new()));

        let err = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap_err();
        assert_eq!(err.kind(), crate::domain::services::errors::ErrorKind::Upstream);
    }

    #[test]
    fn test_low_reputation_counterparty_is_refused_under_enforce() {
        let mut identity = MockIdentityService::new();
        identity.expect_verification_level().returning(|_| Ok(VerificationLevel::Level3));
        identity
            .expect_reputation_score()
            .returning(|user| Ok(if user == BOB { dec!(1) } else { dec!(5) }));
        let (ctx, _clock) = EngineContext::deterministic(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        let risk = RiskConfig {
            policy: LimitPolicy::Enforce,
            min_counterparty_reputation: Some(dec!(3)),
            ..RiskConfig::default()
        };
        let engine = P2pEngine::new(
            ctx,
            risk,
            FeeSchedule::default(),
            Arc::new(ExecutionJournal::new()),
            Arc::new(identity),
            Arc::new(InMemoryPaymentService::new()),
        );

        let order = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        let err = engine.match_order(&Actor::user(BOB), order.id).unwrap_err();
        assert!(matches!(err, EngineError::ReputationTooLow { .. }));
        assert_eq!(engine.get_order(order.id).unwrap().order.status, SimpleOrderStatus::Active);
    }

    #[test]
    fn test_cancel_matched_order_refunds_escrow() {
        let engine = engine();
        let order = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        engine.match_order(&Actor::user(BOB), order.id).unwrap();

        let record = engine.cancel_order(&Actor::user(ALICE), order.id).unwrap();
        assert_eq!(record.order.status, SimpleOrderStatus::Cancelled);
        assert_eq!(record.escrow.unwrap().status, EscrowStatus::Refunded);
    }

    #[test]
    fn test_buyer_cannot_release() {
        let engine = engine();
        let order = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        engine.match_order(&Actor::user(BOB), order.id).unwrap();
        engine.process_payment(&Actor::user(BOB), order.id, Some("receipt".into())).unwrap();

        let err = engine.release_escrow(&Actor::user(BOB), order.id).unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized { .. }));
        assert!(engine.journal().is_empty());
    }

    #[test]
    fn test_statistics_group_by_status() {
        let engine = engine();
        let first = engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        engine.create_simple_order(&Actor::user(ALICE), sell_request()).unwrap();
        engine.cancel_order(&Actor::user(ALICE), first.id).unwrap();

        let stats = engine.trade_statistics(ALICE);
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_volume, dec!(45000));
        assert_eq!(stats.by_status[&SimpleOrderStatus::Cancelled].count, 1);
        assert_eq!(stats.by_status[&SimpleOrderStatus::Active].volume, dec!(22500));
    }
}
