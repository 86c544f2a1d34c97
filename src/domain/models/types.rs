//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the plain data entities shared by the P2P escrow flow and the trading
// order book. Entities carry no policy; every transition lives in the service layer.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | ENUMS              | Sides, roles, statuses, order kinds, dispute vocabularies         |
// | STRUCTS            | SimpleOrder, TradingOrder, TradeExecution, Escrow, Dispute        |
// | TESTS              | Serialization of the wire-visible enums                          |
//--------------------------------------------------------------------------------------------------

//--------------------------------------------------------------------------------------------------
//  ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                | Description                                                  |
// |---------------------|--------------------------------------------------------------|
// | Side                | Buy or sell intent                                           |
// | VerificationLevel   | Identity tier used by the daily limit step function          |
// | ActorRole           | Capability carried by the caller (user/adjudicator/admin)    |
// | SimpleOrderStatus   | P2P order lifecycle states                                   |
// | PaymentMethod       | Fiat rails a P2P order may settle over                       |
// | TradingOrderKind    | market, limit, stop_loss, stop_limit, trailing_stop          |
// | TradingOrderStatus  | pending, partially_filled, filled, cancelled                 |
// | TimeInForce         | GTC or dated (GTD)                                           |
// | EscrowStatus        | held, released, refunded                                     |
// | DisputeType/Status  | Dispute vocabulary                                           |
// | DisputeOutcome      | buyer_favor, seller_favor, cancel_order, other               |
// | RiskFlag            | Advisory annotations from the risk gate                      |
//--------------------------------------------------------------------------------------------------

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents the side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Wants to receive the crypto asset.
    Buy,
    /// Wants to give up the crypto asset.
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Verification tier reported by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VerificationLevel {
    #[default]
    #[serde(rename = "unverified")]
    Unverified,
    #[serde(rename = "level_1")]
    Level1,
    #[serde(rename = "level_2")]
    Level2,
    #[serde(rename = "level_3")]
    Level3,
}

/// Capability carried by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    #[default]
    User,
    Adjudicator,
    Admin,
}

/// The authenticated identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::User }
    }

    pub fn adjudicator(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::Adjudicator }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::Admin }
    }
}

/// Status of a P2P order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleOrderStatus {
    Active,
    Matched,
    InProgress,
    Completed,
    Cancelled,
    InDispute,
    DisputeResolved,
    OnHold,
}

impl SimpleOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Matched => "matched",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::InDispute => "in_dispute",
            Self::DisputeResolved => "dispute_resolved",
            Self::OnHold => "on_hold",
        }
    }
}

impl fmt::Display for SimpleOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fiat rail the counterparties agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    MobileMoney,
    Cryptocurrency,
    GiftCard,
    Paypal,
    Venmo,
    CashApp,
    DebitCreditCard,
    CashDeposit,
    PeerToPeerCash,
}

/// Reference data for an order-book market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub id: Uuid,
    pub base_asset: String,
    pub quote_asset: String,
    pub active: bool,
}

impl TradingPair {
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base_asset, self.quote_asset)
    }
}

/// Advisory annotation attached to an order by the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    NearDailyLimit,
    DailyLimitExceeded,
    HighVelocity,
    LowReputation,
}

/// One-sided P2P intent. Exactly one of `seller_id`/`buyer_id` is set at creation
/// (the owner's slot); the other is filled in when a counterparty matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleOrder {
    pub id: Uuid,
    /// User who created the order
    pub owner_id: Uuid,
    /// Owner's intent: `Sell` means seller-initiated
    pub side: Side,
    pub seller_id: Option<Uuid>,
    pub buyer_id: Option<Uuid>,
    /// Crypto asset symbol, e.g. `BTC`
    pub asset: String,
    pub fiat_currency: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Always `quantity * unit_price`
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub status: SimpleOrderStatus,
    pub terms: Option<String>,
    /// Id returned by the external payment-transaction service
    pub payment_reference: Option<String>,
    pub proof_of_payment: Option<String>,
    pub risk_flags: Vec<RiskFlag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub payment_submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Kind of an order-book order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingOrderKind {
    Market,
    Limit,
    StopLoss,
    StopLimit,
    TrailingStop,
}

/// Status of an order-book order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingOrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl TradingOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

/// Defines how long an order remains eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Good till cancelled
    #[default]
    Gtc,
    /// Good till the given instant
    Gtd(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderGroupKind {
    Oco,
    Grid,
}

/// Position of an order inside its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    OcoLimit,
    OcoStop,
    GridLevel,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderGroup {
    pub id: Uuid,
    pub kind: OrderGroupKind,
    pub role: GroupRole,
}

/// Distance kept between the best favourable price and the trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingOffset {
    Amount(Decimal),
    Percent(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingState {
    pub offset: TrailingOffset,
    /// Best favourable price seen since activation
    pub best_price: Option<Decimal>,
}

/// Order-book order for a trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trading_pair_id: Uuid,
    pub kind: TradingOrderKind,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    /// Trigger level; maintained by the engine for trailing stops
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: TradingOrderStatus,
    pub executed_quantity: Decimal,
    /// Volume-weighted average fill price
    pub avg_fill_price: Option<Decimal>,
    pub group: Option<OrderGroup>,
    pub trailing: Option<TrailingState>,
    /// Arrival sequence within the pair, used as the time tie-break
    pub sequence: u64,
    pub triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingOrder {
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.executed_quantity
    }
}

/// Which party bears the fee on an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePayer {
    Maker,
    #[default]
    Taker,
    Buyer,
    Seller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Automatic crossing in a trading pair's book
    BookMatch,
    /// Settlement leg of a P2P escrow release
    P2pSettlement,
}

/// Immutable record of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub id: Uuid,
    pub kind: ExecutionKind,
    pub maker_order_id: Uuid,
    /// Absent for P2P settlements, which have no incoming order
    pub taker_order_id: Option<Uuid>,
    pub maker_user_id: Uuid,
    pub taker_user_id: Uuid,
    pub trading_pair_id: Option<Uuid>,
    pub symbol: String,
    /// Side of the taker
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub quote_amount: Decimal,
    pub fee: Decimal,
    pub fee_payer: FeePayer,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Held => "held",
            Self::Released => "released",
            Self::Refunded => "refunded",
        })
    }
}

/// Custodial hold of the traded asset for one matched order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub asset: String,
    /// Equal to the order quantity
    pub amount: Decimal,
    pub status: EscrowStatus,
    /// Set by the administrative hold; does not change ownership
    pub held_for_review: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    PaymentNotReceived,
    PaymentNotMade,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    BuyerFavor,
    SellerFavor,
    CancelOrder,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Image,
    Document,
    TransactionProof,
    CommunicationLog,
    Other,
}

/// Append-only evidence entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: EvidenceType,
    pub content: String,
    pub url: Option<String>,
    pub submitted_by: Uuid,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub order_id: Uuid,
    pub initiator_id: Uuid,
    pub dispute_type: DisputeType,
    pub description: String,
    pub evidence: Vec<Evidence>,
    pub status: DisputeStatus,
    pub outcome: Option<DisputeOutcome>,
    pub resolver_id: Option<Uuid>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
