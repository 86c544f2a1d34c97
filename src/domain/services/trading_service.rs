//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Coordinator for order-book trading. Owns one `PairEngine` per trading pair behind its own
// mutex; every submission, cancellation and price tick for a pair runs under that lock, so two
// market orders can never claim the same resting quantity and OCO/grid siblings are cancelled
// in the same scope that records the fill.
//
// | Component        | Description                                                      |
// |------------------|------------------------------------------------------------------|
// | TradingEngine    | Pair registry and TradingOrder operation set                     |
// | NewTradingOrder  | Single market / limit / stop / trailing order request            |
// | NewOcoOrder      | Limit leg plus stop leg sharing one group                        |
// | NewTrailingStop  | Trailing stop request                                            |
// | NewGridOrder     | Grid ladder request                                              |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                       | Return Type              |
// |----------------------|---------------------------------------------------|--------------------------|
// | register_pair        | Admin registers a market                          | EngineResult<Pair>       |
// | create_order         | Submit one order                                  | EngineResult<Order>      |
// | create_oco           | Submit an OCO pair atomically                     | EngineResult<Vec<Order>> |
// | create_trailing_stop | Submit a trailing stop seeded from the price feed | EngineResult<Order>      |
// | create_grid          | Plan and submit a grid atomically                 | EngineResult<Vec<Order>> |
// | cancel_order         | Idempotent cancel                                 | EngineResult<Order>      |
// | cancel_group         | Bulk cancel of an OCO or grid                     | EngineResult<Vec<Order>> |
// | on_price_tick        | Evaluate waiting orders against a price           | EngineResult<MatchResult>|
// | evaluate_pair        | Tick from the price feed, used by the scheduler   | EngineResult<Option<..>> |
//--------------------------------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TradingConfig;
use crate::domain::models::clock::EngineContext;
use crate::domain::models::types::{
    Actor, ActorRole, GroupRole, OrderGroup, OrderGroupKind, Side, TimeInForce, TradeExecution, TradingOrder,
    TradingOrderKind, TradingOrderStatus, TradingPair, TrailingOffset, TrailingState,
};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::events::{EngineEvent, EventBus};
use crate::domain::services::external::PriceFeed;
use crate::domain::services::matching_engine::{GridSpec, MatchResult, PairEngine, grid};
use crate::domain::services::orderbook::DepthSnapshot;
use crate::domain::services::store::ExecutionJournal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTradingOrder {
    pub trading_pair_id: Uuid,
    pub kind: TradingOrderKind,
    pub side: Side,
    pub quantity: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub trailing_offset: Option<TrailingOffset>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

/// Both legs trade `quantity` on `side`. The stop leg is a stop-limit when `stop_limit_price`
/// is given, otherwise a stop-loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOcoOrder {
    pub trading_pair_id: Uuid,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Decimal,
    pub stop_price: Decimal,
    #[serde(default)]
    pub stop_limit_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrailingStop {
    pub trading_pair_id: Uuid,
    pub side: Side,
    pub quantity: Decimal,
    pub offset: TrailingOffset,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGridOrder {
    pub trading_pair_id: Uuid,
    #[serde(flatten)]
    pub spec: GridSpec,
}

/// Order-book trading engine across all registered pairs.
pub struct TradingEngine {
    ctx: EngineContext,
    config: TradingConfig,
    taker_fee_rate: Decimal,
    pairs: RwLock<HashMap<Uuid, Arc<Mutex<PairEngine>>>>,
    /// Order id to pair id
    order_index: RwLock<HashMap<Uuid, Uuid>>,
    /// Group id to pair id
    group_index: RwLock<HashMap<Uuid, Uuid>>,
    journal: Arc<ExecutionJournal>,
    price_feed: Arc<dyn PriceFeed>,
    event_bus: Option<EventBus>,
    /// Serializes submissions per user so the open-order caps hold
    user_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("config", &self.config)
            .field("pairs", &self.pairs.read().len())
            .finish()
    }
}

impl TradingEngine {
    pub fn new(
        ctx: EngineContext,
        config: TradingConfig,
        taker_fee_rate: Decimal,
        journal: Arc<ExecutionJournal>,
        price_feed: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            ctx,
            config,
            taker_fee_rate,
            pairs: RwLock::new(HashMap::new()),
            order_index: RwLock::new(HashMap::new()),
            group_index: RwLock::new(HashMap::new()),
            journal,
            price_feed,
            event_bus: None,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
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

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.user_locks.lock().entry(user_id).or_default().clone()
    }

    fn engine(&self, pair_id: Uuid) -> EngineResult<Arc<Mutex<PairEngine>>> {
        self.pairs
            .read()
            .get(&pair_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("trading pair", pair_id))
    }

    fn engine_for_order(&self, order_id: Uuid) -> EngineResult<Arc<Mutex<PairEngine>>> {
        let pair_id = self
            .order_index
            .read()
            .get(&order_id)
            .copied()
            .ok_or_else(|| EngineError::not_found("trading order", order_id))?;
        self.engine(pair_id)
    }

    fn engine_for_group(&self, group_id: Uuid) -> EngineResult<Arc<Mutex<PairEngine>>> {
        let pair_id = self
            .group_index
            .read()
            .get(&group_id)
            .copied()
            .ok_or_else(|| EngineError::not_found("order group", group_id))?;
        self.engine(pair_id)
    }

    fn index(&self, orders: &[TradingOrder]) {
        let mut index = self.order_index.write();
        let mut groups = self.group_index.write();
        for order in orders {
            index.insert(order.id, order.trading_pair_id);
            if let Some(group) = order.group {
                groups.insert(group.id, order.trading_pair_id);
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Pairs
    //----------------------------------------------------------------------------------------------

    /// Registers a new market. Symbols are unique case-insensitively.
    ///
    /// # Errors
    /// * `NotAuthorized` - caller is not an admin
    /// * `Validation` - empty assets, identical assets, or a duplicate symbol
    pub fn register_pair(&self, actor: &Actor, base_asset: &str, quote_asset: &str) -> EngineResult<TradingPair> {
        if actor.role != ActorRole::Admin {
            return Err(EngineError::NotAuthorized { actor: actor.user_id, action: "register trading pairs" });
        }
        let base_asset = base_asset.trim().to_uppercase();
        let quote_asset = quote_asset.trim().to_uppercase();
        if base_asset.is_empty() || quote_asset.is_empty() {
            return Err(EngineError::Validation("base and quote assets are required".into()));
        }
        if base_asset == quote_asset {
            return Err(EngineError::Validation("base and quote assets must differ".into()));
        }

        let mut pairs = self.pairs.write();
        let symbol = format!("{}/{}", base_asset, quote_asset);
        if pairs.values().any(|engine| engine.lock().pair().symbol() == symbol) {
            return Err(EngineError::Validation(format!("trading pair {} already exists", symbol)));
        }

        let pair = TradingPair { id: self.ctx.next_id(), base_asset, quote_asset, active: true };
        let engine = PairEngine::new(pair.clone(), self.taker_fee_rate, self.journal.clone(), self.ctx.clone());
        pairs.insert(pair.id, Arc::new(Mutex::new(engine)));
        info!("Registered trading pair {} ({})", symbol, pair.id);
        Ok(pair)
    }

    pub fn set_pair_active(&self, actor: &Actor, pair_id: Uuid, active: bool) -> EngineResult<TradingPair> {
        if actor.role != ActorRole::Admin {
            return Err(EngineError::NotAuthorized { actor: actor.user_id, action: "change trading pairs" });
        }
        let engine = self.engine(pair_id)?;
        let mut engine = engine.lock();
        engine.set_active(active);
        info!("Trading pair {} active={}", engine.pair().symbol(), active);
        Ok(engine.pair().clone())
    }

    /// Registered pairs ordered by symbol.
    pub fn pairs(&self) -> Vec<TradingPair> {
        let mut pairs: Vec<TradingPair> = self.pairs.read().values().map(|e| e.lock().pair().clone()).collect();
        pairs.sort_by_key(|p| p.symbol());
        pairs
    }

    pub fn pair_ids(&self) -> Vec<Uuid> {
        self.pairs.read().keys().copied().collect()
    }

    //----------------------------------------------------------------------------------------------
    // Orders
    //----------------------------------------------------------------------------------------------

    /// Enforces the per-user caps across every pair. Callers hold the user's lock.
    fn check_open_limits(&self, user_id: Uuid, new_orders: usize, new_oco_groups: usize) -> EngineResult<()> {
        let engines: Vec<_> = self.pairs.read().values().cloned().collect();
        let (mut open, mut oco) = (0, 0);
        for engine in engines {
            let engine = engine.lock();
            open += engine.open_orders_for(user_id);
            oco += engine.open_groups_for(user_id, OrderGroupKind::Oco);
        }

        if open.saturating_add(new_orders) > self.config.max_open_orders {
            warn!("User {} has {} open orders, cap {}", user_id, open, self.config.max_open_orders);
            return Err(EngineError::OpenOrderLimitExceeded { limit: self.config.max_open_orders, what: "orders" });
        }
        if new_oco_groups > 0 && oco.saturating_add(new_oco_groups) > self.config.max_open_oco_groups {
            warn!("User {} has {} open OCO groups, cap {}", user_id, oco, self.config.max_open_oco_groups);
            return Err(EngineError::OpenOrderLimitExceeded {
                limit: self.config.max_open_oco_groups,
                what: "OCO groups",
            });
        }
        Ok(())
    }

    fn blank_order(&self, user_id: Uuid, pair_id: Uuid, kind: TradingOrderKind, side: Side, quantity: Decimal) -> TradingOrder {
        let now = self.ctx.now();
        TradingOrder {
            id: self.ctx.next_id(),
            user_id,
            trading_pair_id: pair_id,
            kind,
            side,
            quantity,
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

    /// Submits one order. Market orders cross immediately; limit orders rest; stop variants wait
    /// for their trigger. A trailing stop is seeded with the feed's latest price when known.
    ///
    /// # Errors
    /// * `NotFound` - unknown pair
    /// * `PairInactive` - pair is halted
    /// * `Validation` - prices inconsistent with the kind
    /// * `OpenOrderLimitExceeded` - the user's cap is reached
    pub fn create_order(&self, actor: &Actor, request: NewTradingOrder) -> EngineResult<TradingOrder> {
        if request.trailing_offset.is_some() && request.kind != TradingOrderKind::TrailingStop {
            return Err(EngineError::Validation("only trailing stops take a trailing offset".into()));
        }
        let engine = self.engine(request.trading_pair_id)?;

        let lock = self.user_lock(actor.user_id);
        let _guard = lock.lock();
        let rests = request.kind != TradingOrderKind::Market;
        self.check_open_limits(actor.user_id, usize::from(rests), 0)?;

        let mut order = self.blank_order(
            actor.user_id,
            request.trading_pair_id,
            request.kind,
            request.side,
            request.quantity,
        );
        order.limit_price = request.limit_price;
        order.stop_price = request.stop_price;
        order.time_in_force = request.time_in_force;
        order.trailing = request.trailing_offset.map(|offset| TrailingState {
            offset,
            best_price: self.price_feed.latest_price(request.trading_pair_id),
        });
        let order_id = order.id;

        let (order, events) = {
            let mut engine = engine.lock();
            let result = engine.submit(order)?;
            self.index(result.processed_order.as_slice());
            (engine.get(order_id)?, result.events(self.ctx.now()))
        };

        info!(
            "Trading order {} {:?} {:?} {} accepted for {}: {:?}",
            order.id, order.kind, order.side, order.quantity, actor.user_id, order.status
        );
        self.publish(events);
        Ok(order)
    }

    /// Places a limit leg and a stop leg as one group; a full fill of either cancels the other.
    pub fn create_oco(&self, actor: &Actor, request: NewOcoOrder) -> EngineResult<Vec<TradingOrder>> {
        let engine = self.engine(request.trading_pair_id)?;

        let lock = self.user_lock(actor.user_id);
        let _guard = lock.lock();
        self.check_open_limits(actor.user_id, 2, 1)?;

        let group_id = self.ctx.next_id();
        let group = |role| Some(OrderGroup { id: group_id, kind: OrderGroupKind::Oco, role });

        let mut limit_leg = self.blank_order(
            actor.user_id,
            request.trading_pair_id,
            TradingOrderKind::Limit,
            request.side,
            request.quantity,
        );
        limit_leg.limit_price = Some(request.limit_price);
        limit_leg.time_in_force = request.time_in_force;
        limit_leg.group = group(GroupRole::OcoLimit);

        let stop_kind = match request.stop_limit_price {
            Some(_) => TradingOrderKind::StopLimit,
            None => TradingOrderKind::StopLoss,
        };
        let mut stop_leg = self.blank_order(actor.user_id, request.trading_pair_id, stop_kind, request.side, request.quantity);
        stop_leg.stop_price = Some(request.stop_price);
        stop_leg.limit_price = request.stop_limit_price;
        stop_leg.time_in_force = request.time_in_force;
        stop_leg.group = group(GroupRole::OcoStop);

        let orders = self.submit_group(&engine, group_id, vec![limit_leg, stop_leg])?;
        info!("OCO group {} placed for {}", group_id, actor.user_id);
        Ok(orders)
    }

    pub fn create_trailing_stop(&self, actor: &Actor, request: NewTrailingStop) -> EngineResult<TradingOrder> {
        self.create_order(
            actor,
            NewTradingOrder {
                trading_pair_id: request.trading_pair_id,
                kind: TradingOrderKind::TrailingStop,
                side: request.side,
                quantity: request.quantity,
                limit_price: None,
                stop_price: None,
                trailing_offset: Some(request.offset),
                time_in_force: request.time_in_force,
            },
        )
    }

    /// Lays out a grid around the book mid-price and places every level plus the optional
    /// protective orders as one group.
    pub fn create_grid(&self, actor: &Actor, request: NewGridOrder) -> EngineResult<Vec<TradingOrder>> {
        let engine = self.engine(request.trading_pair_id)?;
        let spec = &request.spec;

        let reference = engine.lock().reference_price();
        let plan = grid::plan(spec, reference, self.config.max_grid_levels as usize)?;

        let lock = self.user_lock(actor.user_id);
        let _guard = lock.lock();
        self.check_open_limits(actor.user_id, plan.levels.len() + plan.protective.len(), 0)?;

        let group_id = self.ctx.next_id();
        let group = |role| Some(OrderGroup { id: group_id, kind: OrderGroupKind::Grid, role });
        let mut orders = Vec::with_capacity(plan.levels.len() + plan.protective.len());
        for level in &plan.levels {
            let mut order = self.blank_order(
                actor.user_id,
                request.trading_pair_id,
                TradingOrderKind::Limit,
                level.side,
                level.quantity,
            );
            order.limit_price = Some(level.price);
            order.group = group(GroupRole::GridLevel);
            orders.push(order);
        }
        for leg in &plan.protective {
            let mut order = self.blank_order(actor.user_id, request.trading_pair_id, leg.kind, leg.side, leg.quantity);
            order.limit_price = leg.limit_price;
            order.stop_price = leg.stop_price;
            order.group = group(leg.role);
            orders.push(order);
        }

        let orders = self.submit_group(&engine, group_id, orders)?;
        info!(
            "Grid {} placed for {}: {} levels between {} and {}",
            group_id,
            actor.user_id,
            plan.levels.len(),
            spec.lower_price,
            spec.upper_price
        );
        Ok(orders)
    }

    fn submit_group(
        &self,
        engine: &Mutex<PairEngine>,
        group_id: Uuid,
        orders: Vec<TradingOrder>,
    ) -> EngineResult<Vec<TradingOrder>> {
        let (members, events) = {
            let mut engine = engine.lock();
            let result = engine.submit_group(orders)?;
            let members = engine
                .group(group_id)
                .ok_or_else(|| EngineError::not_found("order group", group_id))?;
            self.index(&members);
            (members, result.events(self.ctx.now()))
        };
        self.publish(events);
        Ok(members)
    }

    fn authorize_owner(actor: &Actor, owner_id: Uuid, action: &'static str) -> EngineResult<()> {
        if owner_id != actor.user_id && actor.role != ActorRole::Admin {
            return Err(EngineError::NotAuthorized { actor: actor.user_id, action });
        }
        Ok(())
    }

    /// Cancels an order. Filled and cancelled orders are returned unchanged.
    pub fn cancel_order(&self, actor: &Actor, order_id: Uuid) -> EngineResult<TradingOrder> {
        let engine = self.engine_for_order(order_id)?;
        let (order, events) = {
            let mut engine = engine.lock();
            let current = engine.get(order_id)?;
            Self::authorize_owner(actor, current.user_id, "cancel this trading order")?;
            let result = engine.cancel(order_id)?;
            (engine.get(order_id)?, result.events(self.ctx.now()))
        };
        self.publish(events);
        Ok(order)
    }

    /// Cancels every live member of an OCO or grid group.
    pub fn cancel_group(&self, actor: &Actor, group_id: Uuid) -> EngineResult<Vec<TradingOrder>> {
        let engine = self.engine_for_group(group_id)?;
        let (members, events) = {
            let mut engine = engine.lock();
            let members = engine
                .group(group_id)
                .ok_or_else(|| EngineError::not_found("order group", group_id))?;
            if let Some(first) = members.first() {
                Self::authorize_owner(actor, first.user_id, "cancel this order group")?;
            }
            let result = engine.cancel_group(group_id)?;
            let members = engine.group(group_id).unwrap_or_default();
            (members, result.events(self.ctx.now()))
        };
        self.publish(events);
        Ok(members)
    }

    //----------------------------------------------------------------------------------------------
    // Queries
    //----------------------------------------------------------------------------------------------

    pub fn get_order(&self, order_id: Uuid) -> EngineResult<TradingOrder> {
        self.engine_for_order(order_id)?.lock().get(order_id)
    }

    /// Owners read their own orders; adjudicators and admins read any.
    fn authorize_reader(actor: &Actor, owner_id: Uuid) -> EngineResult<()> {
        if owner_id != actor.user_id && actor.role == ActorRole::User {
            return Err(EngineError::NotAuthorized { actor: actor.user_id, action: "read this trading order" });
        }
        Ok(())
    }

    pub fn view_order(&self, actor: &Actor, order_id: Uuid) -> EngineResult<TradingOrder> {
        let order = self.get_order(order_id)?;
        Self::authorize_reader(actor, order.user_id)?;
        Ok(order)
    }

    pub fn view_executions(&self, actor: &Actor, order_id: Uuid) -> EngineResult<Vec<TradeExecution>> {
        self.view_order(actor, order_id)?;
        Ok(self.order_executions(order_id))
    }

    pub fn view_group(&self, actor: &Actor, group_id: Uuid) -> EngineResult<Vec<TradingOrder>> {
        let members = self.group_orders(group_id)?;
        for member in &members {
            Self::authorize_reader(actor, member.user_id)?;
        }
        Ok(members)
    }

    pub fn group_orders(&self, group_id: Uuid) -> EngineResult<Vec<TradingOrder>> {
        self.engine_for_group(group_id)?
            .lock()
            .group(group_id)
            .ok_or_else(|| EngineError::not_found("order group", group_id))
    }

    /// The user's orders on every pair, newest first.
    pub fn user_orders(&self, user_id: Uuid, status: Option<TradingOrderStatus>) -> Vec<TradingOrder> {
        let engines: Vec<_> = self.pairs.read().values().cloned().collect();
        let mut orders: Vec<TradingOrder> = engines
            .iter()
            .flat_map(|engine| {
                engine
                    .lock()
                    .orders()
                    .filter(|o| o.user_id == user_id && status.is_none_or(|s| s == o.status))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        orders.sort_by_key(|o| (Reverse(o.created_at), Reverse(o.sequence)));
        orders
    }

    /// Aggregated bids and asks, at most `depth` levels a side (configured default when `None`).
    pub fn order_book(&self, pair_id: Uuid, depth: Option<usize>) -> EngineResult<DepthSnapshot> {
        let depth = depth.unwrap_or(self.config.depth_limit);
        Ok(self.engine(pair_id)?.lock().depth(depth))
    }

    pub fn order_executions(&self, order_id: Uuid) -> Vec<TradeExecution> {
        self.journal.for_order(order_id)
    }

    //----------------------------------------------------------------------------------------------
    // Price ticks
    //----------------------------------------------------------------------------------------------

    /// Expires, trails and triggers waiting orders on `pair_id` at `price`.
    pub fn on_price_tick(&self, pair_id: Uuid, price: Decimal) -> EngineResult<MatchResult> {
        let engine = self.engine(pair_id)?;
        let result = engine.lock().on_price_tick(price)?;
        if !result.is_empty() {
            debug!(
                "Tick {} on pair {}: {} triggered, {} executions",
                price,
                pair_id,
                result.triggered.len(),
                result.executions.len()
            );
        }
        self.publish(result.events(self.ctx.now()));
        Ok(result)
    }

    /// Ticks `pair_id` with the feed's latest price. `None` when the feed has no price yet.
    pub fn evaluate_pair(&self, pair_id: Uuid) -> EngineResult<Option<MatchResult>> {
        match self.price_feed.latest_price(pair_id) {
            Some(price) => self.on_price_tick(pair_id, price).map(Some),
            None => Ok(None),
        }
    }
}
