//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Interfaces of the collaborators the engine consumes or feeds, plus in-memory implementations
// used by the server binary and the tests.
//
// | Name                    | Description                                          |
// |-------------------------|------------------------------------------------------|
// | IdentityService         | Verification level and reputation lookups            |
// | PaymentService          | Creates pending fiat payment records                 |
// | PriceFeed               | Latest price per trading pair                        |
// | LedgerService           | Receives settlement executions                       |
// | StaticIdentityService   | Map-backed identity service                          |
// | InMemoryPaymentService  | Records pending payments in memory                   |
// | StaticPriceFeed         | Settable price feed                                  |
// | InMemoryLedger          | Collects settlements in memory                       |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::models::types::{PaymentMethod, TradeExecution, VerificationLevel};

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service}: {message}")]
pub struct ExternalError {
    pub service: &'static str,
    pub message: String,
}

impl ExternalError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self { service, message: message.into() }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait IdentityService: Send + Sync {
    fn verification_level(&self, user_id: Uuid) -> Result<VerificationLevel, ExternalError>;

    fn reputation_score(&self, user_id: Uuid) -> Result<Decimal, ExternalError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait PaymentService: Send + Sync {
    /// Returns the id of the pending payment record.
    fn create_pending_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, ExternalError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait PriceFeed: Send + Sync {
    fn latest_price(&self, trading_pair_id: Uuid) -> Option<Decimal>;
}

/// Downstream wallet/ledger that moves value once a settlement is final.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn record_settlement(&self, execution: &TradeExecution) -> Result<(), ExternalError>;
}

/// Identity service backed by in-memory maps with configurable defaults.
#[derive(Debug)]
pub struct StaticIdentityService {
    levels: RwLock<HashMap<Uuid, VerificationLevel>>,
    reputations: RwLock<HashMap<Uuid, Decimal>>,
    default_level: VerificationLevel,
    default_reputation: Decimal,
}

impl StaticIdentityService {
    pub fn new(default_level: VerificationLevel, default_reputation: Decimal) -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
            reputations: RwLock::new(HashMap::new()),
            default_level,
            default_reputation,
        }
    }

    pub fn set_level(&self, user_id: Uuid, level: VerificationLevel) {
        self.levels.write().insert(user_id, level);
    }

    pub fn set_reputation(&self, user_id: Uuid, score: Decimal) {
        self.reputations.write().insert(user_id, score);
    }
}

impl Default for StaticIdentityService {
    fn default() -> Self {
        Self::new(VerificationLevel::Unverified, Decimal::from(5))
    }
}

impl IdentityService for StaticIdentityService {
    fn verification_level(&self, user_id: Uuid) -> Result<VerificationLevel, ExternalError> {
        Ok(self.levels.read().get(&user_id).copied().unwrap_or(self.default_level))
    }

    fn reputation_score(&self, user_id: Uuid) -> Result<Decimal, ExternalError> {
        Ok(self.reputations.read().get(&user_id).copied().unwrap_or(self.default_reputation))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPayment {
    pub id: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Default)]
pub struct InMemoryPaymentService {
    payments: Mutex<Vec<PendingPayment>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payments(&self) -> Vec<PendingPayment> {
        self.payments.lock().clone()
    }
}

impl PaymentService for InMemoryPaymentService {
    fn create_pending_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, ExternalError> {
        let mut payments = self.payments.lock();
        let id = format!("pay_{:06}", payments.len() + 1);
        debug!("Created pending payment {} for order {}", id, order_id);
        payments.push(PendingPayment { id: id.clone(), order_id, amount, method });
        Ok(id)
    }
}

#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: RwLock<HashMap<Uuid, Decimal>>,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, trading_pair_id: Uuid, price: Decimal) {
        self.prices.write().insert(trading_pair_id, price);
    }
}

impl PriceFeed for StaticPriceFeed {
    fn latest_price(&self, trading_pair_id: Uuid) -> Option<Decimal> {
        self.prices.read().get(&trading_pair_id).copied()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    settlements: Mutex<Vec<TradeExecution>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settlements(&self) -> Vec<TradeExecution> {
        self.settlements.lock().clone()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn record_settlement(&self, execution: &TradeExecution) -> Result<(), ExternalError> {
        info!(
            "Ledger settlement {} for order {}: {} @ {}",
            execution.id, execution.maker_order_id, execution.quantity, execution.price
        );
        self.settlements.lock().push(execution.clone());
        Ok(())
    }
}
