//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                        | Key Methods         |
// |-------------------|----------------------------------------------------|---------------------|
// | ExecutionJournal  | Append-only log of every TradeExecution            | append, for_user    |
//--------------------------------------------------------------------------------------------------

use parking_lot::{RwLock, RwLockWriteGuard};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::models::types::TradeExecution;

/// Append-only record of executions shared by the P2P store and every pair engine.
/// Entries are never mutated or removed.
#[derive(Debug, Default)]
pub struct ExecutionJournal {
    entries: RwLock<Vec<TradeExecution>>,
}

impl ExecutionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, executions: impl IntoIterator<Item = TradeExecution>) {
        self.entries.write().extend(executions);
    }

    /// Holds the journal write lock; used to commit a unit of work together with its executions.
    pub(crate) fn writer(&self) -> RwLockWriteGuard<'_, Vec<TradeExecution>> {
        self.entries.write()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn all(&self) -> Vec<TradeExecution> {
        self.entries.read().clone()
    }

    /// Executions where the user was maker or taker, newest first.
    pub fn for_user(&self, user_id: Uuid) -> Vec<TradeExecution> {
        let mut executions: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.maker_user_id == user_id || e.taker_user_id == user_id)
            .cloned()
            .collect();
        executions.reverse();
        executions
    }

    pub fn for_order(&self, order_id: Uuid) -> Vec<TradeExecution> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.maker_order_id == order_id || e.taker_order_id == Some(order_id))
            .cloned()
            .collect()
    }

    /// Sum of executed quantity against one order, as maker or taker.
    pub fn executed_quantity(&self, order_id: Uuid) -> Decimal {
        self.entries
            .read()
            .iter()
            .filter(|e| e.maker_order_id == order_id || e.taker_order_id == Some(order_id))
            .map(|e| e.quantity)
            .sum()
    }
}
