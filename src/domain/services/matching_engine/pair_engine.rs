//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the matching engine for one trading pair. Market orders and triggered
// stop-loss / trailing-stop orders cross the book in price-time priority at the maker's price.
// Limit orders rest without crossing. Group invariants (OCO, grid protection) are enforced here,
// inside the same `&mut self` scope that records the fill.
//
// | Component                | Description                                                |
// |--------------------------|------------------------------------------------------------|
// | PairEngine               | Book, order table, trigger queue and groups of one pair    |
// | MatchResult              | Represents the outcome of a matching operation             |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods      |
// |-------------------------|---------------------------------------------------|------------------|
// | PairEngine              | Core matching engine for one pair                 | submit           |
// |                         |                                                   | submit_group     |
// |                         |                                                   | cancel           |
// |                         |                                                   | cancel_group     |
// |                         |                                                   | on_price_tick    |
// |-------------------------|---------------------------------------------------|------------------|
// | MatchResult             | Result of a matching operation                    | executions       |
// |                         |                                                   | processed_order  |
// |                         |                                                   | affected_orders  |
// |                         |                                                   | triggered        |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Return Type      |
// |-------------------------|---------------------------------------------------|------------------|
// | submit                  | Process a new order                               | Result<MatchRes> |
// | submit_group            | Place all members of an OCO or grid group         | Result<MatchRes> |
// | cancel                  | Cancel an order (idempotent)                      | Result<MatchRes> |
// | on_price_tick           | Expire, trail and trigger waiting orders          | Result<MatchRes> |
// | cross                   | Walk the opposite side and consume liquidity      | Result<()>       |
// | fill_average            | Running VWAP after a prospective fill             | Option<Decimal>  |
// | apply_fill              | Record a fill with its new running VWAP           | ()               |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::trailing;
use crate::domain::models::clock::EngineContext;
use crate::domain::models::types::{
    ExecutionKind, FeePayer, GroupRole, OrderGroupKind, Side, TimeInForce, TradeExecution, TradingOrder,
    TradingOrderKind, TradingOrderStatus, TradingPair, TrailingOffset, TrailingState,
};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::events::EngineEvent;
use crate::domain::services::orderbook::{DepthSnapshot, OrderBook};
use crate::domain::services::store::ExecutionJournal;

/// Represents the outcome of a matching operation.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Executions generated, in the order they happened
    pub executions: Vec<TradeExecution>,

    /// The submitted or cancelled order after processing
    pub processed_order: Option<TradingOrder>,

    /// Other orders whose state changed (makers, cancelled siblings, expired or moved stops)
    pub affected_orders: Vec<TradingOrder>,

    /// Orders that crossed their trigger, with the tick price that fired them
    pub triggered: Vec<(TradingOrder, Decimal)>,
}

impl MatchResult {
    /// Records the latest state of `order`, replacing an earlier snapshot of the same order.
    fn touch(&mut self, order: &TradingOrder) {
        match self.affected_orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order.clone(),
            None => self.affected_orders.push(order.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
            && self.processed_order.is_none()
            && self.affected_orders.is_empty()
            && self.triggered.is_empty()
    }

    /// Events describing this result, triggers first, then executions, then order updates.
    pub fn events(&self, timestamp: DateTime<Utc>) -> Vec<EngineEvent> {
        let triggered = self.triggered.iter().map(|(order, price)| EngineEvent::TradingOrderTriggered {
            order: order.clone(),
            price: *price,
            timestamp,
        });
        let executed = self.executions.iter().map(|execution| EngineEvent::TradeExecuted {
            execution: execution.clone(),
            timestamp,
        });
        let updated = self
            .processed_order
            .iter()
            .chain(self.affected_orders.iter())
            .map(|order| EngineEvent::TradingOrderUpdated { order: order.clone(), timestamp });

        triggered.chain(executed).chain(updated).collect()
    }
}

/// Matching engine for a single trading pair.
///
/// # Price-Time Priority
///
/// * Better prices are matched first (lower asks for a buy, higher bids for a sell)
/// * At the same price level, orders are matched in arrival order (FIFO)
/// * Every fill executes at the resting (maker) order's price
///
/// # Order Kinds
///
/// * **Market**: crosses immediately; any unfilled remainder is dropped
/// * **Limit**: rests in the book
/// * **StopLoss**: waits for its stop, then crosses as a market order
/// * **StopLimit**: waits for its stop, then rests at its limit price
/// * **TrailingStop**: like a stop-loss whose stop follows the best price seen
#[derive(Debug)]
pub struct PairEngine {
    pair: TradingPair,
    book: OrderBook,
    /// Every order ever accepted by this pair, terminal ones included
    orders: HashMap<Uuid, TradingOrder>,
    /// Orders waiting for their trigger, in arrival order
    triggers: Vec<Uuid>,
    /// Group id to member order ids
    groups: HashMap<Uuid, Vec<Uuid>>,
    next_sequence: u64,
    last_price: Option<Decimal>,
    taker_fee_rate: Decimal,
    journal: Arc<ExecutionJournal>,
    ctx: EngineContext,
}

impl PairEngine {
    /// Creates an engine for `pair` that appends its executions to `journal`.
    pub fn new(pair: TradingPair, taker_fee_rate: Decimal, journal: Arc<ExecutionJournal>, ctx: EngineContext) -> Self {
        Self {
            book: OrderBook::new(pair.id),
            pair,
            orders: HashMap::new(),
            triggers: Vec::new(),
            groups: HashMap::new(),
            next_sequence: 1,
            last_price: None,
            taker_fee_rate,
            journal,
            ctx,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn set_active(&mut self, active: bool) {
        self.pair.active = active;
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Book mid-price, when both sides are populated.
    pub fn reference_price(&self) -> Option<Decimal> {
        self.book.mid_price()
    }

    pub fn depth(&self, limit: usize) -> DepthSnapshot {
        self.book.depth(limit, self.ctx.now())
    }

    pub fn get(&self, order_id: Uuid) -> EngineResult<TradingOrder> {
        self.orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("trading order", order_id))
    }

    pub fn orders(&self) -> impl Iterator<Item = &TradingOrder> {
        self.orders.values()
    }

    /// Members of a group, in placement order.
    pub fn group(&self, group_id: Uuid) -> Option<Vec<TradingOrder>> {
        let members = self.groups.get(&group_id)?;
        Some(members.iter().filter_map(|id| self.orders.get(id)).cloned().collect())
    }

    /// Resting in the book or waiting for a trigger.
    pub fn is_open(&self, order_id: &Uuid) -> bool {
        self.book.contains(order_id) || self.triggers.contains(order_id)
    }

    pub fn open_orders_for(&self, user_id: Uuid) -> usize {
        self.orders
            .values()
            .filter(|o| o.user_id == user_id && self.is_open(&o.id))
            .count()
    }

    /// Groups of `kind` owned by `user_id` that still have an open member.
    pub fn open_groups_for(&self, user_id: Uuid, kind: OrderGroupKind) -> usize {
        self.groups
            .values()
            .filter(|members| {
                members.iter().any(|id| {
                    self.orders.get(id).is_some_and(|o| {
                        o.user_id == user_id && o.group.is_some_and(|g| g.kind == kind) && self.is_open(id)
                    })
                })
            })
            .count()
    }

    /// Processes a new order.
    ///
    /// # Arguments
    ///
    /// * `order` - A freshly built `pending` order for this pair
    ///
    /// # Returns
    ///
    /// A `MatchResult` whose `processed_order` is the order after processing
    ///
    /// # Errors
    ///
    /// * `PairInactive` - the pair is not accepting orders
    /// * `Validation` - missing or non-positive prices, bad trailing offset, expired GTD
    pub fn submit(&mut self, order: TradingOrder) -> EngineResult<MatchResult> {
        let now = self.ctx.now();
        self.validate(&order, now)?;

        let mut result = MatchResult::default();
        let order = self.accept(order, now, &mut result)?;
        result.processed_order = Some(order);

        self.journal.append(result.executions.iter().cloned());
        Ok(result)
    }

    /// Places every member of a group or none of them.
    ///
    /// Members must share one group id and must be resting kinds (limit or stop variants), so
    /// nothing crosses while the group is placed.
    pub fn submit_group(&mut self, orders: Vec<TradingOrder>) -> EngineResult<MatchResult> {
        let now = self.ctx.now();
        let group_id = match orders.first().and_then(|o| o.group) {
            Some(group) => group.id,
            None => return Err(EngineError::Validation("an order group needs grouped members".into())),
        };
        for order in &orders {
            self.validate(order, now)?;
            if order.group.map(|g| g.id) != Some(group_id) {
                return Err(EngineError::Validation("group members must share one group id".into()));
            }
            if order.kind == TradingOrderKind::Market {
                return Err(EngineError::Validation("market orders cannot join a group".into()));
            }
        }

        let mut result = MatchResult::default();
        for order in orders {
            let placed = self.accept(order, now, &mut result)?;
            result.touch(&placed);
        }
        info!("Placed group {} with {} orders on {}", group_id, result.affected_orders.len(), self.pair.symbol());
        Ok(result)
    }

    /// Cancels an order. Cancelling a filled or cancelled order is a no-op that returns an
    /// empty result.
    pub fn cancel(&mut self, order_id: Uuid) -> EngineResult<MatchResult> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or_else(|| EngineError::not_found("trading order", order_id))?;
        if order.status.is_terminal() {
            return Ok(MatchResult::default());
        }

        let now = self.ctx.now();
        let mut result = MatchResult::default();
        if let Some(cancelled) = self.cancel_open(order_id, now) {
            info!("Cancelled order {}", order_id);
            result.processed_order = Some(cancelled);
        }
        Ok(result)
    }

    /// Cancels every live member of a group.
    pub fn cancel_group(&mut self, group_id: Uuid) -> EngineResult<MatchResult> {
        let members = self
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("order group", group_id))?;

        let now = self.ctx.now();
        let mut result = MatchResult::default();
        for id in members {
            if let Some(cancelled) = self.cancel_open(id, now) {
                result.touch(&cancelled);
            }
        }
        info!("Cancelled group {} ({} orders)", group_id, result.affected_orders.len());
        Ok(result)
    }

    /// Evaluates waiting orders against a new market price.
    ///
    /// Expired GTD orders are cancelled first. Waiting orders are then visited in arrival order:
    /// trailing stops move their stop level, and any order whose stop is reached fires.
    pub fn on_price_tick(&mut self, price: Decimal) -> EngineResult<MatchResult> {
        if price <= Decimal::ZERO {
            return Err(EngineError::Validation("price ticks must be positive".into()));
        }
        let now = self.ctx.now();
        self.last_price = Some(price);
        let mut result = MatchResult::default();

        let expired: Vec<Uuid> = self
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| matches!(o.time_in_force, TimeInForce::Gtd(until) if until <= now))
            .map(|o| o.id)
            .collect();
        for id in expired {
            if let Some(order) = self.cancel_open(id, now) {
                info!("Order {} expired", id);
                result.touch(&order);
            }
        }

        let waiting = self.triggers.clone();
        for id in waiting {
            // An earlier fill in this tick may have cancelled a sibling
            if !self.triggers.contains(&id) {
                continue;
            }
            let Some(order) = self.orders.get_mut(&id) else {
                continue;
            };

            let mut moved = false;
            let fire = match (order.kind, order.trailing.as_mut()) {
                (TradingOrderKind::TrailingStop, Some(state)) => {
                    let update = trailing::evaluate(order.side, state, price);
                    if order.stop_price != Some(update.stop_price) {
                        order.stop_price = Some(update.stop_price);
                        order.updated_at = now;
                        moved = true;
                    }
                    update.triggered
                }
                _ => order.stop_price.is_some_and(|stop| stop_reached(order.side, stop, price)),
            };

            if fire {
                self.fire(id, price, now, &mut result)?;
            } else if moved {
                let snapshot = order.clone();
                debug!("Trailing stop {} moved to {:?}", id, snapshot.stop_price);
                result.touch(&snapshot);
            }
        }

        self.journal.append(result.executions.iter().cloned());
        Ok(result)
    }

    fn validate(&self, order: &TradingOrder, now: DateTime<Utc>) -> EngineResult<()> {
        if order.trading_pair_id != self.pair.id {
            return Err(EngineError::Validation(format!("order is not for pair {}", self.pair.symbol())));
        }
        if !self.pair.active {
            return Err(EngineError::PairInactive(self.pair.id));
        }
        if order.quantity <= Decimal::ZERO {
            return Err(EngineError::Validation("quantity must be positive".into()));
        }
        if order.status != TradingOrderStatus::Pending || !order.executed_quantity.is_zero() {
            return Err(EngineError::Validation("new orders must be pending and unfilled".into()));
        }
        if self.orders.contains_key(&order.id) {
            return Err(EngineError::Validation(format!("order {} already exists", order.id)));
        }

        let positive = |price: Option<Decimal>| price.is_some_and(|p| p > Decimal::ZERO);
        match order.kind {
            TradingOrderKind::Market if order.limit_price.is_some() || order.stop_price.is_some() => {
                return Err(EngineError::Validation("market orders take no limit or stop price".into()));
            }
            TradingOrderKind::Limit if !positive(order.limit_price) => {
                return Err(EngineError::Validation("limit orders need a positive limit price".into()));
            }
            TradingOrderKind::StopLoss if !positive(order.stop_price) => {
                return Err(EngineError::Validation("stop-loss orders need a positive stop price".into()));
            }
            TradingOrderKind::StopLimit if !positive(order.stop_price) || !positive(order.limit_price) => {
                return Err(EngineError::Validation(
                    "stop-limit orders need positive stop and limit prices".into(),
                ));
            }
            TradingOrderKind::TrailingStop if !order.trailing.is_some_and(valid_offset) => {
                return Err(EngineError::Validation(
                    "trailing stops need a positive amount or a percent offset below 100".into(),
                ));
            }
            _ => {}
        }

        for price in [order.limit_price, order.stop_price].into_iter().flatten() {
            let fits = order
                .quantity
                .checked_mul(price)
                .and_then(|quote| quote.checked_mul(self.taker_fee_rate))
                .is_some();
            if !fits {
                return Err(EngineError::Validation(format!(
                    "quantity {} at price {} is out of range",
                    order.quantity, price
                )));
            }
        }

        if let TimeInForce::Gtd(until) = order.time_in_force {
            if until <= now {
                return Err(EngineError::Validation("good-till date is already past".into()));
            }
        }
        Ok(())
    }

    /// Assigns the arrival sequence and routes the order by kind.
    fn accept(&mut self, mut order: TradingOrder, now: DateTime<Utc>, result: &mut MatchResult) -> EngineResult<TradingOrder> {
        order.sequence = self.next_sequence;
        self.next_sequence += 1;

        match order.kind {
            TradingOrderKind::Market => {
                self.cross(&mut order, now, result)?;
                if order.executed_quantity.is_zero() {
                    order.status = TradingOrderStatus::Cancelled;
                    order.updated_at = now;
                }
                info!(
                    "Market order {} {:?} {} on {}: executed {}",
                    order.id,
                    order.side,
                    order.quantity,
                    self.pair.symbol(),
                    order.executed_quantity
                );
            }
            TradingOrderKind::Limit => {
                self.book.add_order(&order)?;
                debug!("Limit order {} resting at {:?}", order.id, order.limit_price);
            }
            TradingOrderKind::StopLoss | TradingOrderKind::StopLimit | TradingOrderKind::TrailingStop => {
                if let Some(TrailingState { offset, best_price: Some(best) }) = order.trailing {
                    order.stop_price = Some(trailing::stop_for(order.side, best, offset));
                }
                self.triggers.push(order.id);
                debug!("Order {} waiting for stop {:?}", order.id, order.stop_price);
            }
        }

        if let Some(group) = order.group {
            self.groups.entry(group.id).or_default().push(order.id);
        }
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    /// Fires a waiting order at `price`.
    fn fire(&mut self, order_id: Uuid, price: Decimal, now: DateTime<Utc>, result: &mut MatchResult) -> EngineResult<()> {
        self.triggers.retain(|id| *id != order_id);
        let mut order = self.get(order_id)?;
        order.triggered_at = Some(now);
        order.updated_at = now;
        info!("Order {} triggered at {} (stop {:?})", order_id, price, order.stop_price);
        result.triggered.push((order.clone(), price));

        if order.kind == TradingOrderKind::StopLimit {
            if let Err(e) = self.book.add_order(&order) {
                warn!("Triggered order {} could not rest: {}", order_id, e);
                order.status = TradingOrderStatus::Cancelled;
            }
            self.orders.insert(order_id, order.clone());
        } else {
            if let Err(e) = self.cross(&mut order, now, result) {
                warn!("Triggered order {} could not cross: {}", order_id, e);
            }
            if order.executed_quantity.is_zero() {
                order.status = TradingOrderStatus::Cancelled;
            }
            self.orders.insert(order_id, order.clone());
        }

        result.touch(&order);
        if order.status == TradingOrderStatus::Filled {
            self.cancel_siblings(&order, now, result);
        }
        Ok(())
    }

    /// Consumes resting liquidity on the opposite side until `taker` is filled or the side is
    /// empty. The book cannot change underneath because the caller holds `&mut self`.
    ///
    /// Every amount of a fill is computed before the book or either order changes. A fill that
    /// does not fit in a `Decimal` fails the order when nothing has executed yet; otherwise
    /// crossing stops there and the fills already made stand.
    fn cross(&mut self, taker: &mut TradingOrder, now: DateTime<Utc>, result: &mut MatchResult) -> EngineResult<()> {
        let maker_side = taker.side.opposite();

        while taker.remaining_quantity() > Decimal::ZERO {
            let Some((price, entry)) = self.book.peek_best(maker_side).map(|(p, e)| (p, *e)) else {
                break;
            };
            let quantity = taker.remaining_quantity().min(entry.remaining);

            let maker = self
                .orders
                .get(&entry.order_id)
                .ok_or_else(|| EngineError::not_found("trading order", entry.order_id))?;
            let Some(terms) = self.fill_terms(maker, taker, quantity, price) else {
                if taker.executed_quantity.is_zero() {
                    return Err(EngineError::Validation(format!(
                        "a fill of {} at {} is out of range",
                        quantity, price
                    )));
                }
                warn!("Order {} stops crossing at {}: fill amounts out of range", taker.id, price);
                break;
            };

            self.book.reduce_order(entry.order_id, quantity)?;
            let maker = self
                .orders
                .get_mut(&entry.order_id)
                .ok_or_else(|| EngineError::not_found("trading order", entry.order_id))?;
            apply_fill(maker, quantity, terms.maker_average, now);
            apply_fill(taker, quantity, terms.taker_average, now);
            let maker = maker.clone();

            let execution = self.execution(&maker, taker, quantity, price, &terms, now);
            debug!(
                "Execution {}: {} @ {} maker {} taker {}",
                execution.id, quantity, price, maker.id, taker.id
            );
            result.executions.push(execution);
            result.touch(&maker);

            if maker.status == TradingOrderStatus::Filled {
                self.cancel_siblings(&maker, now, result);
            }
        }
        Ok(())
    }

    fn fill_terms(
        &self,
        maker: &TradingOrder,
        taker: &TradingOrder,
        quantity: Decimal,
        price: Decimal,
    ) -> Option<FillTerms> {
        let quote_amount = quantity.checked_mul(price)?;
        Some(FillTerms {
            quote_amount,
            fee: quote_amount.checked_mul(self.taker_fee_rate)?,
            maker_average: fill_average(maker, quantity, price)?,
            taker_average: fill_average(taker, quantity, price)?,
        })
    }

    fn execution(
        &self,
        maker: &TradingOrder,
        taker: &TradingOrder,
        quantity: Decimal,
        price: Decimal,
        terms: &FillTerms,
        at: DateTime<Utc>,
    ) -> TradeExecution {
        TradeExecution {
            id: self.ctx.next_id(),
            kind: ExecutionKind::BookMatch,
            maker_order_id: maker.id,
            taker_order_id: Some(taker.id),
            maker_user_id: maker.user_id,
            taker_user_id: taker.user_id,
            trading_pair_id: Some(self.pair.id),
            symbol: self.pair.symbol(),
            side: taker.side,
            quantity,
            price,
            quote_amount: terms.quote_amount,
            fee: terms.fee,
            fee_payer: FeePayer::Taker,
            executed_at: at,
        }
    }

    /// Cancels the siblings of a filled group member: both legs of an OCO, or the protective
    /// pair of a grid. Grid levels never cancel each other.
    fn cancel_siblings(&mut self, filled: &TradingOrder, now: DateTime<Utc>, result: &mut MatchResult) {
        let Some(group) = filled.group else {
            return;
        };
        let protective = |role: GroupRole| matches!(role, GroupRole::StopLoss | GroupRole::TakeProfit);
        let linked = match group.kind {
            OrderGroupKind::Oco => true,
            OrderGroupKind::Grid => protective(group.role),
        };
        if !linked {
            return;
        }

        let members = self.groups.get(&group.id).cloned().unwrap_or_default();
        for id in members.into_iter().filter(|id| *id != filled.id) {
            let eligible = group.kind == OrderGroupKind::Oco
                || self
                    .orders
                    .get(&id)
                    .and_then(|o| o.group)
                    .is_some_and(|g| protective(g.role));
            if !eligible {
                continue;
            }
            if let Some(cancelled) = self.cancel_open(id, now) {
                info!("Cancelled {} because group sibling {} filled", id, filled.id);
                result.touch(&cancelled);
            }
        }
    }

    /// Pulls a live order out of the book or the trigger queue and marks it cancelled.
    fn cancel_open(&mut self, order_id: Uuid, now: DateTime<Utc>) -> Option<TradingOrder> {
        let order = self.orders.get_mut(&order_id)?;
        if order.status.is_terminal() {
            return None;
        }
        if self.book.contains(&order_id) {
            if let Err(e) = self.book.remove_order(order_id) {
                debug!("Order {} left the book early: {}", order_id, e);
            }
        }
        self.triggers.retain(|id| *id != order_id);

        order.status = TradingOrderStatus::Cancelled;
        order.updated_at = now;
        Some(order.clone())
    }
}

/// Amounts of one fill, all known to fit before the fill is applied.
struct FillTerms {
    quote_amount: Decimal,
    fee: Decimal,
    maker_average: Decimal,
    taker_average: Decimal,
}

/// The order's volume-weighted average price after a fill of `quantity` at `price`, or `None`
/// when the running totals overflow.
pub fn fill_average(order: &TradingOrder, quantity: Decimal, price: Decimal) -> Option<Decimal> {
    let previous = order.executed_quantity;
    match order.avg_fill_price {
        Some(avg) => {
            let total = avg.checked_mul(previous)?.checked_add(price.checked_mul(quantity)?)?;
            total.checked_div(previous.checked_add(quantity)?)
        }
        None => Some(price),
    }
}

/// Records a fill of `quantity` whose new running average is `avg_fill_price`.
///
/// Panics if the fill would exceed the order's quantity: that is a broken engine invariant, not
/// a recoverable condition.
pub fn apply_fill(order: &mut TradingOrder, quantity: Decimal, avg_fill_price: Decimal, at: DateTime<Utc>) {
    let previous = order.executed_quantity;
    let executed = previous + quantity;
    assert!(
        executed <= order.quantity,
        "fill of {} would exceed quantity {} of order {} ({} already executed)",
        quantity,
        order.quantity,
        order.id,
        previous
    );

    order.avg_fill_price = Some(avg_fill_price);
    order.executed_quantity = executed;
    order.status = if executed == order.quantity {
        TradingOrderStatus::Filled
    } else {
        TradingOrderStatus::PartiallyFilled
    };
    order.updated_at = at;
}

/// A sell stop fires at or below its stop, a buy stop at or above it.
fn stop_reached(side: Side, stop: Decimal, price: Decimal) -> bool {
    match side {
        Side::Sell => price <= stop,
        Side::Buy => price >= stop,
    }
}

fn valid_offset(state: TrailingState) -> bool {
    match state.offset {
        TrailingOffset::Amount(amount) => amount > Decimal::ZERO,
        TrailingOffset::Percent(pct) => pct > Decimal::ZERO && pct < Decimal::ONE_HUNDRED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::types::OrderGroup;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const MAKER: Uuid = Uuid::from_u128(0xA);
    const TAKER: Uuid = Uuid::from_u128(0xB);

    struct Fixture {
        engine: PairEngine,
        clock: Arc<crate::domain::models::clock::ManualClock>,
        journal: Arc<ExecutionJournal>,
    }

    fn setup() -> Fixture {
        let (ctx, clock) = EngineContext::deterministic(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let pair = TradingPair {
            id: Uuid::from_u128(0x1000),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            active: true,
        };
        let journal = Arc::new(ExecutionJournal::new());
        Fixture {
            engine: PairEngine::new(pair, dec!(0.001), journal.clone(), ctx),
            clock,
            journal,
        }
    }

    fn order(f: &Fixture, user: Uuid, kind: TradingOrderKind, side: Side, qty: Decimal) -> TradingOrder {
        let now = f.engine.ctx.now();
        TradingOrder {
            id: f.engine.ctx.next_id(),
            user_id: user,
            trading_pair_id: f.engine.pair.id,
            kind,
            side,
            quantity: qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            status: TradingOrderStatus::Pending,
            executed_quantity: Decimal::ZERO,
            avg_fill_price: None,
            group: None,
            trailing: None,
            sequence: 0,
            triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn limit(f: &Fixture, user: Uuid, side: Side, price: Decimal, qty: Decimal) -> TradingOrder {
        let mut o = order(f, user, TradingOrderKind::Limit, side, qty);
        o.limit_price = Some(price);
        o
    }

    #[test]
    fn test_market_buy_partially_consumes_resting_sell() {
        let mut f = setup();
        let maker = limit(&f, MAKER, Side::Sell, dec!(100), dec!(10));
        f.engine.submit(maker.clone()).unwrap();

        let taker = order(&f, TAKER, TradingOrderKind::Market, Side::Buy, dec!(4));
        let result = f.engine.submit(taker).unwrap();

        assert_eq!(result.executions.len(), 1);
        let exec = &result.executions[0];
        assert_eq!((exec.quantity, exec.price), (dec!(4), dec!(100)));
        assert_eq!(exec.fee, dec!(0.4));
        assert_eq!(exec.side, Side::Buy);

        let taker = result.processed_order.unwrap();
        assert_eq!(taker.status, TradingOrderStatus::Filled);
        assert_eq!(taker.avg_fill_price, Some(dec!(100)));

        let maker = f.engine.get(maker.id).unwrap();
        assert_eq!(maker.status, TradingOrderStatus::PartiallyFilled);
        assert_eq!(maker.executed_quantity, dec!(4));
        assert_eq!(f.journal.len(), 1);
    }

    #[test]
    fn test_price_then_time_priority_and_vwap() {
        let mut f = setup();
        let late_cheap = limit(&f, MAKER, Side::Sell, dec!(101), dec!(2));
        let early = limit(&f, MAKER, Side::Sell, dec!(102), dec!(2));
        let late = limit(&f, MAKER, Side::Sell, dec!(102), dec!(2));
        f.engine.submit(early.clone()).unwrap();
        f.engine.submit(late.clone()).unwrap();
        f.engine.submit(late_cheap.clone()).unwrap();

        let taker = order(&f, TAKER, TradingOrderKind::Market, Side::Buy, dec!(5));
        let result = f.engine.submit(taker).unwrap();

        let makers: Vec<_> = result.executions.iter().map(|e| e.maker_order_id).collect();
        assert_eq!(makers, vec![late_cheap.id, early.id, late.id]);

        let taker = result.processed_order.unwrap();
        // (101*2 + 102*2 + 102*1) / 5
        assert_eq!(taker.avg_fill_price, Some(dec!(101.6)));
        assert_eq!(f.engine.get(late.id).unwrap().executed_quantity, dec!(1));
    }

    #[test]
    fn test_market_order_without_liquidity_is_cancelled() {
        let mut f = setup();
        let taker = order(&f, TAKER, TradingOrderKind::Market, Side::Sell, dec!(1));
        let result = f.engine.submit(taker).unwrap();
        assert!(result.executions.is_empty());
        assert_eq!(result.processed_order.unwrap().status, TradingOrderStatus::Cancelled);
    }

    #[test]
    fn test_market_remainder_is_dropped() {
        let mut f = setup();
        f.engine.submit(limit(&f, MAKER, Side::Buy, dec!(99), dec!(1))).unwrap();
        let taker = order(&f, TAKER, TradingOrderKind::Market, Side::Sell, dec!(3));
        let result = f.engine.submit(taker.clone()).unwrap();

        let taker = result.processed_order.unwrap();
        assert_eq!(taker.status, TradingOrderStatus::PartiallyFilled);
        assert_eq!(taker.executed_quantity, dec!(1));
        assert!(!f.engine.is_open(&taker.id));
        assert!(f.engine.depth(10).bids.is_empty());
    }

    #[test]
    fn test_limit_orders_rest_without_crossing() {
        let mut f = setup();
        f.engine.submit(limit(&f, MAKER, Side::Sell, dec!(100), dec!(1))).unwrap();
        let result = f.engine.submit(limit(&f, TAKER, Side::Buy, dec!(105), dec!(1))).unwrap();
        assert!(result.executions.is_empty());
        assert_eq!(f.engine.depth(10).bids.len(), 1);
    }

    #[test]
    fn test_oco_fill_cancels_sibling() {
        let mut f = setup();
        let group = OrderGroup { id: Uuid::from_u128(0x6000), kind: OrderGroupKind::Oco, role: GroupRole::OcoLimit };
        let mut take_profit = limit(&f, MAKER, Side::Sell, dec!(110), dec!(2));
        take_profit.group = Some(group);
        let mut stop = order(&f, MAKER, TradingOrderKind::StopLoss, Side::Sell, dec!(2));
        stop.stop_price = Some(dec!(90));
        stop.group = Some(OrderGroup { role: GroupRole::OcoStop, ..group });
        f.engine.submit_group(vec![take_profit.clone(), stop.clone()]).unwrap();

        let result = f.engine.submit(order(&f, TAKER, TradingOrderKind::Market, Side::Buy, dec!(2))).unwrap();

        assert_eq!(f.engine.get(take_profit.id).unwrap().status, TradingOrderStatus::Filled);
        assert_eq!(f.engine.get(stop.id).unwrap().status, TradingOrderStatus::Cancelled);
        assert!(result.affected_orders.iter().any(|o| o.id == stop.id));

        // The cancelled stop never fires
        let tick = f.engine.on_price_tick(dec!(80)).unwrap();
        assert!(tick.triggered.is_empty());
    }

    #[test]
    fn test_stop_loss_triggers_into_market_order() {
        let mut f = setup();
        f.engine.submit(limit(&f, TAKER, Side::Buy, dec!(95), dec!(5))).unwrap();
        let mut stop = order(&f, MAKER, TradingOrderKind::StopLoss, Side::Sell, dec!(2));
        stop.stop_price = Some(dec!(96));
        f.engine.submit(stop.clone()).unwrap();

        assert!(f.engine.on_price_tick(dec!(97)).unwrap().triggered.is_empty());

        let result = f.engine.on_price_tick(dec!(96)).unwrap();
        assert_eq!(result.triggered.len(), 1);
        assert_eq!(result.executions.len(), 1);
        assert_eq!(result.executions[0].price, dec!(95));
        let stop = f.engine.get(stop.id).unwrap();
        assert_eq!(stop.status, TradingOrderStatus::Filled);
        assert!(stop.triggered_at.is_some());
    }

    #[test]
    fn test_stop_limit_rests_after_trigger() {
        let mut f = setup();
        let mut stop = order(&f, MAKER, TradingOrderKind::StopLimit, Side::Buy, dec!(1));
        stop.stop_price = Some(dec!(105));
        stop.limit_price = Some(dec!(106));
        f.engine.submit(stop.clone()).unwrap();

        f.engine.on_price_tick(dec!(105)).unwrap();
        assert!(f.engine.is_open(&stop.id));
        assert_eq!(f.engine.depth(5).bids[0].price, dec!(106));
    }

    #[test]
    fn test_trailing_stop_tracks_then_fires() {
        let mut f = setup();
        f.engine.submit(limit(&f, TAKER, Side::Buy, dec!(100), dec!(10))).unwrap();

        let mut trail = order(&f, MAKER, TradingOrderKind::TrailingStop, Side::Sell, dec!(1));
        trail.trailing = Some(TrailingState { offset: TrailingOffset::Amount(dec!(10)), best_price: Some(dec!(100)) });
        let placed = f.engine.submit(trail).unwrap().processed_order.unwrap();
        assert_eq!(placed.stop_price, Some(dec!(90)));

        let moved = f.engine.on_price_tick(dec!(120)).unwrap();
        assert_eq!(moved.affected_orders[0].stop_price, Some(dec!(110)));

        let fired = f.engine.on_price_tick(dec!(109)).unwrap();
        assert_eq!(fired.triggered.len(), 1);
        assert_eq!(f.engine.get(placed.id).unwrap().status, TradingOrderStatus::Filled);
    }

    #[test]
    fn test_gtd_orders_expire_on_tick() {
        let mut f = setup();
        let mut o = limit(&f, MAKER, Side::Sell, dec!(100), dec!(1));
        o.time_in_force = TimeInForce::Gtd(f.engine.ctx.now() + Duration::minutes(5));
        f.engine.submit(o.clone()).unwrap();

        f.clock.advance(Duration::minutes(6));
        let result = f.engine.on_price_tick(dec!(100)).unwrap();
        assert_eq!(result.affected_orders[0].status, TradingOrderStatus::Cancelled);
        assert!(f.engine.depth(5).asks.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut f = setup();
        let o = limit(&f, MAKER, Side::Sell, dec!(100), dec!(1));
        f.engine.submit(o.clone()).unwrap();

        let first = f.engine.cancel(o.id).unwrap();
        assert_eq!(first.processed_order.unwrap().status, TradingOrderStatus::Cancelled);
        let second = f.engine.cancel(o.id).unwrap();
        assert!(second.is_empty());
        assert_eq!(f.engine.get(o.id).unwrap().status, TradingOrderStatus::Cancelled);
    }

    #[test]
    fn test_inactive_pair_rejects_orders() {
        let mut f = setup();
        f.engine.set_active(false);
        let err = f.engine.submit(limit(&f, MAKER, Side::Sell, dec!(1), dec!(1))).unwrap_err();
        assert_eq!(err, EngineError::PairInactive(f.engine.pair().id));
    }

    #[test]
    #[should_panic(expected = "would exceed quantity")]
    fn test_overfill_is_fatal() {
        let f = setup();
        let mut o = limit(&f, MAKER, Side::Sell, dec!(100), dec!(1));
        apply_fill(&mut o, dec!(1), dec!(100), Utc::now());
        apply_fill(&mut o, dec!(0.1), dec!(100), Utc::now());
    }

    #[test]
    fn test_fill_average_weights_by_quantity() {
        let f = setup();
        let mut o = limit(&f, MAKER, Side::Sell, dec!(100), dec!(4));
        assert_eq!(fill_average(&o, dec!(1), dec!(100)), Some(dec!(100)));
        apply_fill(&mut o, dec!(1), dec!(100), Utc::now());
        assert_eq!(fill_average(&o, dec!(3), dec!(104)), Some(dec!(103)));
    }

    #[test]
    fn test_out_of_range_notional_is_rejected_up_front() {
        let mut f = setup();
        let huge = Decimal::from(1_000_000_000_000_000i64);
        let err = f.engine.submit(limit(&f, MAKER, Side::Sell, huge, huge)).unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(f.engine.depth(5).asks.is_empty());
        assert!(f.journal.is_empty());
    }

    #[test]
    fn test_crossing_stops_before_a_fill_that_overflows() {
        let mut f = setup();
        let price = Decimal::from(500_000_000_000_000i64);
        let size = Decimal::from(100_000_000_000_000i64);
        let first = limit(&f, MAKER, Side::Sell, price, size);
        let second = limit(&f, MAKER, Side::Sell, price, size);
        f.engine.submit(first.clone()).unwrap();
        f.engine.submit(second.clone()).unwrap();

        // The second fill would push the taker's running notional past Decimal::MAX
        let taker = order(&f, TAKER, TradingOrderKind::Market, Side::Buy, size * dec!(2));
        let result = f.engine.submit(taker).unwrap();

        assert_eq!(result.executions.len(), 1);
        let taker = result.processed_order.unwrap();
        assert_eq!(taker.status, TradingOrderStatus::PartiallyFilled);
        assert_eq!(taker.executed_quantity, size);
        assert_eq!(taker.avg_fill_price, Some(price));

        assert_eq!(f.engine.get(first.id).unwrap().status, TradingOrderStatus::Filled);
        let second = f.engine.get(second.id).unwrap();
        assert_eq!(second.executed_quantity, Decimal::ZERO);
        assert_eq!(f.engine.depth(5).asks[0].volume, size);
        assert_eq!(f.journal.len(), 1);
        assert_eq!(f.journal.executed_quantity(first.id), size);
    }
}
