//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Storage for P2P simple orders. Each order, its escrow and its disputes live together in one
// record guarded by a per-order mutex. Every mutation runs as a unit of work against a working
// copy of the record; the copy replaces the stored record only when the whole closure succeeds.
//
// | Component        | Description                                                    |
// |------------------|----------------------------------------------------------------|
// | OrderRecord      | SimpleOrder + Escrow + Disputes                                |
// | UnitOfWork       | Working copy plus executions and events staged for commit      |
// | P2pStore         | Order map, dispute index and shared execution journal          |
// | ExecutionJournal | Append-only execution log                                      |
//--------------------------------------------------------------------------------------------------

mod journal;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::types::{Dispute, DisputeStatus, Escrow, SimpleOrder, TradeExecution};
use crate::domain::services::errors::{EngineError, EngineResult};
use crate::domain::services::events::EngineEvent;

pub use journal::ExecutionJournal;

/// Everything that must change atomically for one P2P order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OrderRecord {
    pub order: SimpleOrder,
    pub escrow: Option<Escrow>,
    pub disputes: Vec<Dispute>,
}

impl OrderRecord {
    pub fn new(order: SimpleOrder) -> Self {
        Self { order, escrow: None, disputes: Vec::new() }
    }

    pub fn open_dispute(&self) -> Option<&Dispute> {
        self.disputes.iter().find(|d| d.status == DisputeStatus::Open)
    }
}

/// Staged changes for one order. Dropped without effect if the closure fails.
#[derive(Debug)]
pub struct UnitOfWork {
    pub record: OrderRecord,
    executions: Vec<TradeExecution>,
    events: Vec<EngineEvent>,
}

impl UnitOfWork {
    fn new(record: OrderRecord) -> Self {
        Self { record, executions: Vec::new(), events: Vec::new() }
    }

    pub fn record_execution(&mut self, execution: TradeExecution) {
        self.executions.push(execution);
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn dispute_mut(&mut self, dispute_id: Uuid) -> EngineResult<&mut Dispute> {
        self.record
            .disputes
            .iter_mut()
            .find(|d| d.id == dispute_id)
            .ok_or_else(|| EngineError::not_found("dispute", dispute_id))
    }
}

/// In-memory arena of P2P orders.
#[derive(Debug)]
pub struct P2pStore {
    records: RwLock<HashMap<Uuid, Arc<Mutex<OrderRecord>>>>,
    /// Dispute id to order id
    disputes: RwLock<HashMap<Uuid, Uuid>>,
    journal: Arc<ExecutionJournal>,
}

impl P2pStore {
    pub fn new(journal: Arc<ExecutionJournal>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            disputes: RwLock::new(HashMap::new()),
            journal,
        }
    }

    pub fn journal(&self) -> &Arc<ExecutionJournal> {
        &self.journal
    }

    pub fn insert(&self, order: SimpleOrder) {
        let id = order.id;
        self.records.write().insert(id, Arc::new(Mutex::new(OrderRecord::new(order))));
        debug!("Stored order {}", id);
    }

    pub fn get(&self, order_id: Uuid) -> Option<OrderRecord> {
        let slot = self.records.read().get(&order_id).cloned()?;
        let record = slot.lock().clone();
        Some(record)
    }

    pub fn order_for_dispute(&self, dispute_id: Uuid) -> Option<Uuid> {
        self.disputes.read().get(&dispute_id).copied()
    }

    /// Consistent copy of every record that satisfies `filter`.
    pub fn select<F>(&self, filter: F) -> Vec<OrderRecord>
    where
        F: Fn(&OrderRecord) -> bool,
    {
        let slots: Vec<_> = self.records.read().values().cloned().collect();
        slots
            .iter()
            .filter_map(|slot| {
                let record = slot.lock();
                filter(&record).then(|| record.clone())
            })
            .collect()
    }

    /// Runs `work` as one atomic unit against `order_id`.
    ///
    /// The record lock is held for the whole closure, so concurrent callers on the same order
    /// serialize. On success the working copy replaces the record and staged executions are
    /// appended to the journal under its write lock; the staged events are returned for
    /// publication. On failure nothing is written.
    ///
    /// # Errors
    /// `NotFound` if the order does not exist, otherwise whatever `work` returns.
    pub fn with_order<T, F>(&self, order_id: Uuid, work: F) -> EngineResult<(T, Vec<EngineEvent>)>
    where
        F: FnOnce(&mut UnitOfWork) -> EngineResult<T>,
    {
        let slot = self
            .records
            .read()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("order", order_id))?;

        let mut guard = slot.lock();
        let mut uow = UnitOfWork::new(guard.clone());
        let output = work(&mut uow)?;

        let UnitOfWork { record, executions, events } = uow;

        {
            let mut index = self.disputes.write();
            for dispute in &record.disputes {
                index.entry(dispute.id).or_insert(order_id);
            }
        }

        let mut journal = self.journal.writer();
        journal.extend(executions);
        *guard = record;
        drop(journal);

        Ok((output, events))
    }
}
