//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                   | Description                                   | Key Methods     |
// |------------------------|-----------------------------------------------|-----------------|
// | PaymentRequest         | Buyer's payment submission                    |                 |
// | NotesRequest           | Optional notes for escrow refunds             |                 |
// | ManageEscrowRequest    | Admin escrow action                           |                 |
// | OpenDisputeRequest     | Dispute type and description                  |                 |
// | ResolveDisputeRequest  | Adjudicator outcome                           |                 |
// | RegisterPairRequest    | New trading pair                              |                 |
// | PairStatusRequest      | Halt or resume a pair                         |                 |
// | PriceTickRequest       | Manual price tick                             |                 |
// | TickResponse           | Summary of a tick evaluation                  | from            |
// | *Query                 | Query-string filters                          |                 |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::types::{
    DisputeOutcome, DisputeStatus, DisputeType, SimpleOrderStatus, TradeExecution, TradingOrder, TradingOrderStatus,
};
use crate::domain::services::escrow::EscrowAction;
use crate::domain::services::matching_engine::MatchResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(default)]
    pub proof_of_payment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManageEscrowRequest {
    pub action: EscrowAction,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDisputeRequest {
    pub dispute_type: DisputeType,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPairRequest {
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairStatusRequest {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTickRequest {
    pub price: Decimal,
}

/// Orders touched by a tick, and the executions it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResponse {
    pub trading_pair_id: Uuid,
    pub price: Decimal,
    pub triggered: Vec<Uuid>,
    pub executions: Vec<TradeExecution>,
    pub updated_orders: Vec<TradingOrder>,
}

impl TickResponse {
    pub fn from_result(trading_pair_id: Uuid, price: Decimal, result: MatchResult) -> Self {
        Self {
            trading_pair_id,
            price,
            triggered: result.triggered.iter().map(|(order, _)| order.id).collect(),
            executions: result.executions,
            updated_orders: result.affected_orders,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleStatusQuery {
    #[serde(default)]
    pub status: Option<SimpleOrderStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingStatusQuery {
    #[serde(default)]
    pub status: Option<TradingOrderStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputeStatusQuery {
    #[serde(default)]
    pub status: Option<DisputeStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthQuery {
    #[serde(default)]
    pub depth: Option<usize>,
}
