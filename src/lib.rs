// Expose the modules
pub mod api;
pub mod config;
pub mod domain;

// Re-export key types for easier usage
pub use api::{Api, AppState};
pub use config::{Config, ConfigError, FeeSchedule, LimitPolicy, RiskConfig, TradingConfig};
pub use domain::models::clock::{EngineContext, ManualClock};
pub use domain::models::types::{
    Actor, ActorRole, Dispute, DisputeOutcome, DisputeType, Escrow, EscrowStatus, Side, SimpleOrder,
    SimpleOrderStatus, TradeExecution, TradingOrder, TradingOrderKind, TradingOrderStatus, TradingPair,
};
pub use domain::services::errors::{EngineError, EngineResult, ErrorKind};
pub use domain::services::events::{
    EngineEvent, EventBus, EventDispatcher, EventHandler, EventLogger, PersistenceEventHandler, SettlementForwarder,
};
pub use domain::services::matching_engine::{MatchResult, PairEngine};
pub use domain::services::orderbook::{DepthSnapshot, OrderBook, OrderbookError};
pub use domain::services::p2p_service::P2pEngine;
pub use domain::services::scheduler::{PriceTickScheduler, SchedulerHandle};
pub use domain::services::trading_service::TradingEngine;
