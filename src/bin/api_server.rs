//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This is the main entry point for the API server.
// It loads configuration, sets up the event system, wires the P2P and trading engines to the
// in-memory collaborators, starts the price tick scheduler and serves the REST API.
//--------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{Level, error, info};
use uuid::Uuid;

use p2p_escrow_engine::domain::services::external::{
    InMemoryLedger, InMemoryPaymentService, StaticIdentityService, StaticPriceFeed,
};
use p2p_escrow_engine::domain::services::store::ExecutionJournal;
use p2p_escrow_engine::{
    Actor, Api, AppState, Config, EngineContext, EventBus, EventDispatcher, EventLogger, P2pEngine,
    PersistenceEventHandler, PriceTickScheduler, SettlementForwarder, TradingEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "P2P escrow and trading engine API server")]
struct Args {
    /// Address to listen on (overrides P2P_BIND_ADDR)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level: trace, debug, info, warn or error
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Trading pairs to register at startup, as BASE/QUOTE
    #[arg(short, long = "pair")]
    pairs: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    info!("Starting P2P escrow engine API server");
    let config = Config::try_from_env().context("invalid configuration")?;

    // Set up the event system
    let event_bus = EventBus::new(config.events.bus_capacity);
    let dispatcher = EventDispatcher::new(event_bus.clone());
    dispatcher.register_handler(Arc::new(EventLogger::new(1000))).await;
    dispatcher
        .register_handler(Arc::new(SettlementForwarder::new(Arc::new(InMemoryLedger::new()))))
        .await;

    if let Some(dir) = &config.events.persistence_dir {
        match PersistenceEventHandler::new(dir, 1000) {
            Ok(handler) => {
                info!("Persistence handler created. Events will be stored in {:?}", dir);
                dispatcher.register_handler(Arc::new(handler)).await;
            }
            Err(e) => error!("Failed to create persistence handler: {}", e),
        }
    }
    let _dispatcher = dispatcher.start().await;

    // Engines share one execution journal
    let ctx = EngineContext::system();
    let journal = Arc::new(ExecutionJournal::new());
    let price_feed = Arc::new(StaticPriceFeed::new());

    let p2p = P2pEngine::new(
        ctx.clone(),
        config.risk.clone(),
        config.fees.clone(),
        journal.clone(),
        Arc::new(StaticIdentityService::default()),
        Arc::new(InMemoryPaymentService::new()),
    )
    .with_event_bus(event_bus.clone());

    let trading = TradingEngine::new(
        ctx,
        config.trading.clone(),
        config.fees.taker_fee_rate,
        journal,
        price_feed,
    )
    .with_event_bus(event_bus);
    let trading = Arc::new(trading);

    let system = Actor::admin(Uuid::nil());
    for symbol in &args.pairs {
        let Some((base, quote)) = symbol.split_once('/') else {
            bail!("trading pair `{}` must look like BASE/QUOTE", symbol);
        };
        let pair = trading.register_pair(&system, base, quote)?;
        info!("Trading pair {} available as {}", pair.symbol(), pair.id);
    }

    let scheduler = PriceTickScheduler::new(trading.clone(), Duration::from_millis(config.trading.tick_interval_ms))
        .spawn();

    // Create and serve the API
    let addr = args.bind.unwrap_or(config.server.bind_addr);
    let api = Api::new(addr, AppState::new(Arc::new(p2p), trading));
    let served = api.serve().await;

    scheduler.shutdown().await;
    served.with_context(|| format!("API server on {} failed", addr))
}
