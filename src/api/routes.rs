//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                   | Description                                   | Return Type         |
// |------------------------|-----------------------------------------------|---------------------|
// | health                 | Health check endpoint                         | Response            |
// | create_simple_order    | Create a P2P order                            | ApiResult<Response> |
// | list_active_orders     | Active P2P orders, filterable                 | ApiResult<Response> |
// | get_simple_order       | Order, with escrow and disputes for parties   | ApiResult<Response> |
// | match_order            | Take a P2P order                              | ApiResult<Response> |
// | cancel_simple_order    | Cancel a P2P order                            | ApiResult<Response> |
// | submit_payment         | Buyer reports payment                         | ApiResult<Response> |
// | release_escrow         | Seller releases escrow                        | ApiResult<Response> |
// | refund_escrow          | Admin/adjudicator refund                      | ApiResult<Response> |
// | manage_escrow          | Admin release / refund / hold                 | ApiResult<Response> |
// | open_dispute           | Party opens a dispute                         | ApiResult<Response> |
// | list_open_disputes     | Adjudicator queue                             | ApiResult<Response> |
// | get_dispute            | Dispute detail                                | ApiResult<Response> |
// | add_evidence           | Party adds evidence                           | ApiResult<Response> |
// | resolve_dispute        | Adjudicator resolves                          | ApiResult<Response> |
// | user_*                 | Per-user orders, disputes, trades, limits     | ApiResult<Response> |
// | *_pair*                | Trading pair registry, book and ticks         | ApiResult<Response> |
// | create_trading_order   | Market / limit / stop / trailing order        | ApiResult<Response> |
// | create_oco_order       | OCO pair                                      | ApiResult<Response> |
// | create_trailing_stop   | Trailing stop                                 | ApiResult<Response> |
// | create_grid_order      | Grid ladder                                   | ApiResult<Response> |
// | *_trading_order/group  | Inspect and cancel trading orders and groups  | ApiResult<Response> |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::extract::ensure_can_read;
use super::{
    ApiError, ApiResult, AppState, DepthQuery, DisputeStatusQuery, ManageEscrowRequest, NotesRequest,
    OpenDisputeRequest, PairStatusRequest, PaymentRequest, PriceTickRequest, RegisterPairRequest,
    ResolveDisputeRequest, SimpleStatusQuery, TickResponse, TradingStatusQuery,
};
use crate::domain::models::types::{Actor, ActorRole};
use crate::domain::services::dispute::NewEvidence;
use crate::domain::services::p2p_service::{NewSimpleOrder, OrderFilter};
use crate::domain::services::trading_service::{NewGridOrder, NewOcoOrder, NewTrailingStop, NewTradingOrder};

fn ok<T: serde::Serialize>(body: T) -> ApiResult<Response> {
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn created<T: serde::Serialize>(body: T) -> ApiResult<Response> {
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

//--------------------------------------------------------------------------------------------------
// P2P orders
//--------------------------------------------------------------------------------------------------

pub async fn create_simple_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<NewSimpleOrder>,
) -> ApiResult<Response> {
    created(state.p2p.create_simple_order(&actor, req)?)
}

pub async fn list_active_orders(
    Extension(state): Extension<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Response> {
    ok(state.p2p.active_orders(&filter))
}

pub async fn get_simple_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.p2p.view_order(&actor, order_id)?)
}

pub async fn match_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.p2p.match_order(&actor, order_id)?)
}

pub async fn cancel_simple_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.p2p.cancel_order(&actor, order_id)?)
}

pub async fn submit_payment(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Response> {
    ok(state.p2p.process_payment(&actor, order_id, req.proof_of_payment)?)
}

pub async fn release_escrow(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.p2p.release_escrow(&actor, order_id)?)
}

pub async fn refund_escrow(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Response> {
    ok(state.p2p.refund_escrow(&actor, order_id, req.notes)?)
}

pub async fn manage_escrow(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ManageEscrowRequest>,
) -> ApiResult<Response> {
    ok(state.p2p.manage_escrow(&actor, order_id, req.action, req.notes)?)
}

//--------------------------------------------------------------------------------------------------
// Disputes
//--------------------------------------------------------------------------------------------------

pub async fn open_dispute(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(req): Json<OpenDisputeRequest>,
) -> ApiResult<Response> {
    created(state.p2p.open_dispute(&actor, order_id, req.dispute_type, &req.description)?)
}

pub async fn list_open_disputes(Extension(state): Extension<Arc<AppState>>, actor: Actor) -> ApiResult<Response> {
    ok(state.p2p.open_disputes(&actor)?)
}

pub async fn get_dispute(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(dispute_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.p2p.get_dispute(&actor, dispute_id)?)
}

pub async fn add_evidence(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(dispute_id): Path<Uuid>,
    Json(req): Json<NewEvidence>,
) -> ApiResult<Response> {
    created(state.p2p.add_dispute_evidence(&actor, dispute_id, req)?)
}

pub async fn resolve_dispute(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(dispute_id): Path<Uuid>,
    Json(req): Json<ResolveDisputeRequest>,
) -> ApiResult<Response> {
    ok(state.p2p.resolve_dispute(&actor, dispute_id, req.outcome, req.notes)?)
}

//--------------------------------------------------------------------------------------------------
// Users
//--------------------------------------------------------------------------------------------------

pub async fn user_orders(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    Query(query): Query<SimpleStatusQuery>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.p2p.user_orders(user_id, query.status))
}

pub async fn user_disputes(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    Query(query): Query<DisputeStatusQuery>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.p2p.user_disputes(user_id, query.status))
}

pub async fn user_trades(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.p2p.user_trade_history(user_id))
}

pub async fn user_daily_limit(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.p2p.remaining_daily_limit(user_id)?)
}

pub async fn user_statistics(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.p2p.trade_statistics(user_id))
}

pub async fn user_trading_orders(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TradingStatusQuery>,
) -> ApiResult<Response> {
    ensure_can_read(&actor, user_id)?;
    ok(state.trading.user_orders(user_id, query.status))
}

//--------------------------------------------------------------------------------------------------
// Trading pairs
//--------------------------------------------------------------------------------------------------

pub async fn list_pairs(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Response> {
    ok(state.trading.pairs())
}

pub async fn register_pair(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<RegisterPairRequest>,
) -> ApiResult<Response> {
    created(state.trading.register_pair(&actor, &req.base_asset, &req.quote_asset)?)
}

pub async fn set_pair_status(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(pair_id): Path<Uuid>,
    Json(req): Json<PairStatusRequest>,
) -> ApiResult<Response> {
    ok(state.trading.set_pair_active(&actor, pair_id, req.active)?)
}

pub async fn get_order_book(
    Extension(state): Extension<Arc<AppState>>,
    Path(pair_id): Path<Uuid>,
    Query(query): Query<DepthQuery>,
) -> ApiResult<Response> {
    ok(state.trading.order_book(pair_id, query.depth)?)
}

/// Manual tick injection; same path the scheduler uses.
pub async fn submit_price_tick(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(pair_id): Path<Uuid>,
    Json(req): Json<PriceTickRequest>,
) -> ApiResult<Response> {
    if actor.role != ActorRole::Admin {
        return Err(ApiError::Forbidden("only admins may inject price ticks".into()));
    }
    let result = state.trading.on_price_tick(pair_id, req.price)?;
    ok(TickResponse::from_result(pair_id, req.price, result))
}

//--------------------------------------------------------------------------------------------------
// Trading orders
//--------------------------------------------------------------------------------------------------

pub async fn create_trading_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<NewTradingOrder>,
) -> ApiResult<Response> {
    created(state.trading.create_order(&actor, req)?)
}

pub async fn create_oco_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<NewOcoOrder>,
) -> ApiResult<Response> {
    created(state.trading.create_oco(&actor, req)?)
}

pub async fn create_trailing_stop(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<NewTrailingStop>,
) -> ApiResult<Response> {
    created(state.trading.create_trailing_stop(&actor, req)?)
}

pub async fn create_grid_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<NewGridOrder>,
) -> ApiResult<Response> {
    created(state.trading.create_grid(&actor, req)?)
}

pub async fn get_trading_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.trading.view_order(&actor, order_id)?)
}

pub async fn trading_order_executions(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.trading.view_executions(&actor, order_id)?)
}

pub async fn cancel_trading_order(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.trading.cancel_order(&actor, order_id)?)
}

pub async fn get_order_group(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.trading.view_group(&actor, group_id)?)
}

pub async fn cancel_order_group(
    Extension(state): Extension<Arc<AppState>>,
    actor: Actor,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Response> {
    ok(state.trading.cancel_group(&actor, group_id)?)
}
