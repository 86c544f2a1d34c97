use std::sync::Arc;

use chrono::Utc;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use p2p_escrow_engine::domain::models::types::TimeInForce;
use p2p_escrow_engine::domain::services::store::ExecutionJournal;
use p2p_escrow_engine::{EngineContext, PairEngine, Side, TradingOrder, TradingOrderKind, TradingOrderStatus, TradingPair};

const MAKER: Uuid = Uuid::from_u128(1);
const TAKER: Uuid = Uuid::from_u128(2);

fn create_test_order(
    engine: &PairEngine,
    user_id: Uuid,
    kind: TradingOrderKind,
    side: Side,
    price: Option<Decimal>,
    quantity: Decimal,
) -> TradingOrder {
    let now = Utc::now();
    TradingOrder {
        id: Uuid::new_v4(),
        user_id,
        trading_pair_id: engine.pair().id,
        kind,
        side,
        quantity,
        limit_price: price,
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        status: TradingOrderStatus::Pending,
        executed_quantity: Decimal::ZERO,
        avg_fill_price: None,
        group: None,
        trailing: None,
        sequence: 0,
        triggered_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn setup_engine() -> PairEngine {
    let pair = TradingPair {
        id: Uuid::new_v4(),
        base_asset: "BTC".into(),
        quote_asset: "USDT".into(),
        active: true,
    };
    PairEngine::new(pair, dec!(0.001), Arc::new(ExecutionJournal::new()), EngineContext::system())
}

/// `levels` ask levels from 100 upwards with `per_level` one-unit orders each.
fn seeded_engine(levels: u32, per_level: u32) -> PairEngine {
    let mut engine = setup_engine();
    for i in 0..levels {
        let price = dec!(100) + Decimal::from(i);
        for _ in 0..per_level {
            let order = create_test_order(&engine, MAKER, TradingOrderKind::Limit, Side::Sell, Some(price), dec!(1));
            engine.submit(order).unwrap();
        }
    }
    engine
}

fn bench_limit_placement(c: &mut Criterion) {
    let mut engine = setup_engine();
    let mut group = c.benchmark_group("limit_placement");

    group.bench_function("rest_and_cancel", |b| {
        b.iter(|| {
            let order = create_test_order(&engine, MAKER, TradingOrderKind::Limit, Side::Buy, Some(dec!(99)), dec!(1));
            let id = order.id;
            black_box(engine.submit(order).unwrap());
            black_box(engine.cancel(id).unwrap());
        })
    });

    group.finish();
}

fn bench_market_crossing(c: &mut Criterion) {
    let mut group = c.benchmark_group("market_crossing");

    for sweep in [1u32, 10, 50] {
        group.bench_function(format!("sweep_{}_orders", sweep), |b| {
            b.iter_batched(
                || seeded_engine(10, 10),
                |mut engine| {
                    let order = create_test_order(
                        &engine,
                        TAKER,
                        TradingOrderKind::Market,
                        Side::Buy,
                        None,
                        Decimal::from(sweep),
                    );
                    black_box(engine.submit(order).unwrap())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_depth_snapshot(c: &mut Criterion) {
    let engine = seeded_engine(50, 20);
    let mut group = c.benchmark_group("depth_snapshot");

    group.bench_function("top_20_levels", |b| b.iter(|| black_box(engine.depth(20))));

    group.finish();
}

criterion_group!(benches, bench_limit_placement, bench_market_crossing, bench_depth_snapshot);
criterion_main!(benches);
