//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the resting side of a trading pair's limit order book.
// It maintains bid and ask entries in price-time priority (FIFO) order. Full order state lives
// with the pair engine; the book only tracks what is resting, where, and how much is left.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | OrderBook     | Bid and ask ladders for one trading pair                                  |
// | PriceLevel    | Groups resting entries at the same price                                  |
// | RestingEntry  | Order id and remaining quantity                                           |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                        | Key Methods              |
// |---------------|----------------------------------------------------|--------------------------|
// | PriceLevel    | Maintains entries at a specific price              | peek_next, order_count   |
// |---------------|----------------------------------------------------|--------------------------|
// | OrderBook     | Main order book implementation                     | add_order                |
// |               |                                                    | remove_order             |
// |               |                                                    | reduce_order             |
// |               |                                                    | peek_best                |
// |               |                                                    | depth                    |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                               | Return Type                  |
// |-------------------|-------------------------------------------|------------------------------|
// | add_order         | Rests an order at its limit price         | Result<(), OrderbookError>   |
// | remove_order      | Removes an order from the book            | Result<RestingEntry, ..>     |
// | reduce_order      | Consumes quantity from a resting order    | Result<Decimal, ..>          |
// | peek_best         | Best entry on a side without removing it  | Option<(Decimal, &Entry)>    |
// | best_bid/best_ask | Best prices                               | Option<Decimal>              |
// | mid_price         | Midpoint of best bid and ask              | Option<Decimal>              |
// | depth             | Aggregated snapshot                       | DepthSnapshot                |
//--------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::OrderbookError;
use super::depth::{DepthLevel, DepthSnapshot};
use crate::domain::models::types::{Side, TradingOrder};

/// An order resting in the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestingEntry {
    pub order_id: Uuid,
    pub remaining: Decimal,
}

/// FIFO queue of resting entries at one price.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    pub orders: VecDeque<RestingEntry>,
    /// Sum of remaining quantity at this level
    pub total_volume: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::with_capacity(4),
            total_volume: Decimal::ZERO,
        }
    }

    /// Next entry to be matched; front of the queue.
    #[inline]
    pub fn peek_next(&self) -> Option<&RestingEntry> {
        self.orders.front()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

/// Price-time priority book for one trading pair.
#[derive(Debug)]
pub struct OrderBook {
    /// Bid levels; best is the highest key
    bids: BTreeMap<Decimal, PriceLevel>,
    /// Ask levels; best is the lowest key
    asks: BTreeMap<Decimal, PriceLevel>,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    trading_pair_id: Uuid,
    /// O(1) lookup of an order's location
    order_map: HashMap<Uuid, (Side, Decimal)>,
}

impl OrderBook {
    pub fn new(trading_pair_id: Uuid) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            best_bid: None,
            best_ask: None,
            trading_pair_id,
            order_map: HashMap::new(),
        }
    }

    pub fn trading_pair_id(&self) -> Uuid {
        self.trading_pair_id
    }

    pub fn contains(&self, order_id: &Uuid) -> bool {
        self.order_map.contains_key(order_id)
    }

    pub fn len(&self) -> usize {
        self.order_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_map.is_empty()
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn levels(&self, side: Side) -> &BTreeMap<Decimal, PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Rests `order`'s remaining quantity at its limit price, behind earlier arrivals.
    ///
    /// # Errors
    /// * `NoLimitPrice` - the order has no limit price
    /// * `WrongPair` - the order belongs to another pair
    /// * `InvalidQuantity` - nothing left to rest
    /// * `DuplicateOrder` - already resting
    /// * `VolumeOverflow` - the level's total volume would not fit in a `Decimal`
    pub fn add_order(&mut self, order: &TradingOrder) -> Result<(), OrderbookError> {
        let price = order.limit_price.ok_or(OrderbookError::NoLimitPrice(order.id))?;

        if order.trading_pair_id != self.trading_pair_id {
            return Err(OrderbookError::WrongPair {
                expected: self.trading_pair_id,
                got: order.trading_pair_id,
            });
        }
        let remaining = order.remaining_quantity();
        if remaining <= Decimal::ZERO {
            return Err(OrderbookError::InvalidQuantity(remaining));
        }
        if self.order_map.contains_key(&order.id) {
            return Err(OrderbookError::DuplicateOrder(order.id));
        }

        let total_volume = self
            .levels(order.side)
            .get(&price)
            .map_or(Decimal::ZERO, |level| level.total_volume)
            .checked_add(remaining)
            .ok_or(OrderbookError::VolumeOverflow(price))?;

        let level = self.levels_mut(order.side).entry(price).or_insert_with(|| PriceLevel::new(price));
        level.total_volume = total_volume;
        level.orders.push_back(RestingEntry { order_id: order.id, remaining });

        self.order_map.insert(order.id, (order.side, price));

        match order.side {
            Side::Buy if self.best_bid.is_none_or(|p| price > p) => self.best_bid = Some(price),
            Side::Sell if self.best_ask.is_none_or(|p| price < p) => self.best_ask = Some(price),
            _ => {}
        }

        Ok(())
    }

    /// Removes a resting order.
    pub fn remove_order(&mut self, order_id: Uuid) -> Result<RestingEntry, OrderbookError> {
        let (side, price) = self
            .order_map
            .remove(&order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let levels = self.levels_mut(side);
        let level = levels.get_mut(&price).ok_or(OrderbookError::OrderNotFound(order_id))?;
        let idx = level
            .orders
            .iter()
            .position(|e| e.order_id == order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;
        let entry = level.orders.remove(idx).ok_or(OrderbookError::OrderNotFound(order_id))?;
        level.total_volume -= entry.remaining;

        if level.is_empty() {
            levels.remove(&price);
            self.refresh_best(side);
        }

        Ok(entry)
    }

    /// Consumes `quantity` from a resting order, removing it once nothing is left.
    ///
    /// # Returns
    /// The order's remaining quantity after the reduction.
    pub fn reduce_order(&mut self, order_id: Uuid, quantity: Decimal) -> Result<Decimal, OrderbookError> {
        let (side, price) = *self
            .order_map
            .get(&order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let level = self
            .levels_mut(side)
            .get_mut(&price)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;
        let entry = level
            .orders
            .iter_mut()
            .find(|e| e.order_id == order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;
        if quantity <= Decimal::ZERO || quantity > entry.remaining {
            return Err(OrderbookError::InvalidQuantity(quantity));
        }

        entry.remaining -= quantity;
        let remaining = entry.remaining;
        level.total_volume -= quantity;

        if remaining.is_zero() {
            self.remove_order(order_id)?;
        }
        Ok(remaining)
    }

    fn refresh_best(&mut self, side: Side) {
        match side {
            Side::Buy => self.best_bid = self.bids.keys().next_back().copied(),
            Side::Sell => self.best_ask = self.asks.keys().next().copied(),
        }
    }

    /// Best entry on `side` without removing it: highest bid or lowest ask, earliest first.
    #[inline]
    pub fn peek_best(&self, side: Side) -> Option<(Decimal, &RestingEntry)> {
        let best = match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
        }?;
        self.levels(side)
            .get(&best)
            .and_then(|level| level.peek_next())
            .map(|entry| (best, entry))
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.best_bid
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.best_ask
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_ask, self.best_bid) {
            (Some(ask), Some(bid)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Midpoint of the best bid and ask, if both sides are populated.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => bid.checked_add(ask).map(|sum| sum / Decimal::TWO),
            _ => None,
        }
    }

    pub fn volume_at_price(&self, side: Side, price: Decimal) -> Option<Decimal> {
        self.levels(side).get(&price).map(|level| level.total_volume)
    }

    pub fn order_count_at_price(&self, side: Side, price: Decimal) -> usize {
        self.levels(side).get(&price).map_or(0, |level| level.order_count())
    }

    /// Aggregated view of the best `limit` levels per side.
    pub fn depth(&self, limit: usize, timestamp: DateTime<Utc>) -> DepthSnapshot {
        let aggregate = |level: &PriceLevel| DepthLevel {
            price: level.price,
            volume: level.total_volume,
            order_count: level.order_count(),
        };
        DepthSnapshot {
            trading_pair_id: self.trading_pair_id,
            bids: self.bids.values().rev().take(limit).map(aggregate).collect(),
            asks: self.asks.values().take(limit).map(aggregate).collect(),
            timestamp,
        }
    }
}
