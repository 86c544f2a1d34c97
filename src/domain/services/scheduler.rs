//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name               | Description                                             | Key Methods  |
// |--------------------|---------------------------------------------------------|--------------|
// | PriceTickScheduler | Polls the price feed for every pair on a fixed interval | spawn        |
// | SchedulerHandle    | Stops the supervisor and its per-pair tasks             | shutdown     |
//--------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::trading_service::TradingEngine;

/// Runs one evaluation task per trading pair. Pairs registered after `spawn` are picked up on
/// the supervisor's next tick.
#[derive(Debug)]
pub struct PriceTickScheduler {
    engine: Arc<TradingEngine>,
    interval: Duration,
}

#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals every task to stop and waits for them to finish.
    pub async fn shutdown(self) {
        // Receivers may already be gone if the supervisor exited
        let _ = self.shutdown.send(true);
        if let Err(e) = self.supervisor.await {
            error!("Price tick supervisor failed: {}", e);
        }
    }
}

impl PriceTickScheduler {
    pub fn new(engine: Arc<TradingEngine>, interval: Duration) -> Self {
        Self { engine, interval: interval.max(Duration::from_millis(1)) }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let receiver = shutdown.subscribe();

        let supervisor = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let mut running: HashSet<Uuid> = HashSet::new();
            let mut discovery = tokio::time::interval(self.interval);
            discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Price tick scheduler started, interval {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = discovery.tick() => {
                        for pair_id in self.engine.pair_ids() {
                            if running.insert(pair_id) {
                                debug!("Starting price tick task for pair {}", pair_id);
                                tasks.spawn(run_pair(self.engine.clone(), pair_id, self.interval, receiver.clone()));
                            }
                        }
                    }
                    _ = stop.changed() => break,
                }
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Price tick task failed: {}", e);
                }
            }
            info!("Price tick scheduler stopped");
        });

        SchedulerHandle { shutdown, supervisor }
    }
}

async fn run_pair(engine: Arc<TradingEngine>, pair_id: Uuid, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.evaluate_pair(pair_id) {
                    Ok(Some(result)) if !result.triggered.is_empty() => {
                        info!("Pair {}: {} orders triggered", pair_id, result.triggered.len());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Price tick for pair {} failed: {}", pair_id, e),
                }
            }
            _ = stop.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingConfig;
    use crate::domain::models::clock::EngineContext;
    use crate::domain::models::types::{Actor, Side, TimeInForce, TradingOrderKind, TradingOrderStatus};
    use crate::domain::services::external::StaticPriceFeed;
    use crate::domain::services::store::ExecutionJournal;
    use crate::domain::services::trading_service::NewTradingOrder;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scheduler_fires_stop_from_feed() {
        let feed = Arc::new(StaticPriceFeed::new());
        let engine = Arc::new(TradingEngine::new(
            EngineContext::system(),
            TradingConfig::default(),
            dec!(0.001),
            Arc::new(ExecutionJournal::new()),
            feed.clone(),
        ));
        let admin = Actor::admin(Uuid::from_u128(1));
        let pair = engine.register_pair(&admin, "ETH", "USDT").unwrap();

        let stop = engine
            .create_order(
                &Actor::user(Uuid::from_u128(2)),
                NewTradingOrder {
                    trading_pair_id: pair.id,
                    kind: TradingOrderKind::StopLoss,
                    side: Side::Sell,
                    quantity: dec!(1),
                    limit_price: None,
                    stop_price: Some(dec!(1900)),
                    trailing_offset: None,
                    time_in_force: TimeInForce::Gtc,
                },
            )
            .unwrap();

        let handle = PriceTickScheduler::new(engine.clone(), Duration::from_millis(5)).spawn();
        feed.set_price(pair.id, dec!(1850));

        let mut triggered = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if engine.get_order(stop.id).unwrap().triggered_at.is_some() {
                triggered = true;
                break;
            }
        }
        handle.shutdown().await;

        assert!(triggered);
        // No bids, so the triggered market order has nothing to fill against
        assert_eq!(engine.get_order(stop.id).unwrap().status, TradingOrderStatus::Cancelled);
    }
}
