//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements a REST API using Axum for the P2P escrow and trading engines.
// The caller's identity arrives in headers set by the upstream identity layer.
//
// | Component      | Description                                                |
// |----------------|------------------------------------------------------------|
// | API            | Main API structure coordinating routes and services        |
// | Routes         | Handler functions for API endpoints                        |
// | Extract        | Caller identity extractor                                  |
// | DTOs           | Data transfer objects for API requests/responses           |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name           | Description                                       | Key Methods       |
// |----------------|---------------------------------------------------|-------------------|
// | AppState       | Shared application state                          | new               |
// | Api            | Main API structure                                | routes, serve     |
//--------------------------------------------------------------------------------------------------

mod dto;
mod error;
mod extract;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::domain::services::p2p_service::P2pEngine;
use crate::domain::services::trading_service::TradingEngine;

pub use dto::*;
pub use error::{ApiError, ApiResult};
pub use extract::{USER_ID_HEADER, USER_ROLE_HEADER};

/// Shared application state accessible by all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub p2p: Arc<P2pEngine>,
    pub trading: Arc<TradingEngine>,
}

impl AppState {
    pub fn new(p2p: Arc<P2pEngine>, trading: Arc<TradingEngine>) -> Self {
        Self { p2p, trading }
    }
}

/// Main API structure
pub struct Api {
    /// API address
    addr: SocketAddr,
    /// Shared application state
    state: Arc<AppState>,
}

impl Api {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state: Arc::new(state) }
    }

    /// Creates all routes for the API
    pub fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Starts the API server and runs until shutdown
    pub async fn serve(self) -> std::io::Result<()> {
        let app = self.routes();

        let listener = TcpListener::bind(self.addr).await?;
        info!("API listening on {}", self.addr);
        axum::serve(listener, app).await
    }
}

/// Builds the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://localhost:3001"),
            HeaderValue::from_static("http://127.0.0.1:3001"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static(USER_ID_HEADER),
            header::HeaderName::from_static(USER_ROLE_HEADER),
        ])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(routes::health))
        // P2P orders and escrow
        .route("/p2p/orders", post(routes::create_simple_order).get(routes::list_active_orders))
        .route("/p2p/orders/:id", get(routes::get_simple_order))
        .route("/p2p/orders/:id/match", post(routes::match_order))
        .route("/p2p/orders/:id/cancel", post(routes::cancel_simple_order))
        .route("/p2p/orders/:id/payment", post(routes::submit_payment))
        .route("/p2p/orders/:id/release", post(routes::release_escrow))
        .route("/p2p/orders/:id/refund", post(routes::refund_escrow))
        .route("/p2p/orders/:id/escrow", post(routes::manage_escrow))
        .route("/p2p/orders/:id/disputes", post(routes::open_dispute))
        // Disputes
        .route("/disputes", get(routes::list_open_disputes))
        .route("/disputes/:id", get(routes::get_dispute))
        .route("/disputes/:id/evidence", post(routes::add_evidence))
        .route("/disputes/:id/resolve", post(routes::resolve_dispute))
        // Users
        .route("/users/:id/orders", get(routes::user_orders))
        .route("/users/:id/disputes", get(routes::user_disputes))
        .route("/users/:id/trades", get(routes::user_trades))
        .route("/users/:id/daily-limit", get(routes::user_daily_limit))
        .route("/users/:id/statistics", get(routes::user_statistics))
        .route("/users/:id/trading-orders", get(routes::user_trading_orders))
        // Trading pairs
        .route("/pairs", get(routes::list_pairs).post(routes::register_pair))
        .route("/pairs/:id/status", post(routes::set_pair_status))
        .route("/pairs/:id/orderbook", get(routes::get_order_book))
        .route("/pairs/:id/ticks", post(routes::submit_price_tick))
        // Trading orders
        .route("/trading/orders", post(routes::create_trading_order))
        .route("/trading/orders/:id", get(routes::get_trading_order).delete(routes::cancel_trading_order))
        .route("/trading/orders/:id/executions", get(routes::trading_order_executions))
        .route("/trading/oco", post(routes::create_oco_order))
        .route("/trading/trailing-stops", post(routes::create_trailing_stop))
        .route("/trading/grids", post(routes::create_grid_order))
        .route("/trading/groups/:id", get(routes::get_order_group).delete(routes::cancel_order_group))
        // Attach application state
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
