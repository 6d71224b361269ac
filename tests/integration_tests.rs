//! Integration tests for the simulation core
//!
//! These tests verify that series, engine, ledger, and adapter work together
//! through the public listener contracts.

use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};

use tradesim::{
    EngineConfig, ExecutionAdapter, Instrument, LinearCommission, MatchingEngine, Order,
    OrderedSeries, PositionLedger, SeriesPoint, Side, SimConfig, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::seconds(offset_secs)
}

fn es() -> Symbol {
    Symbol::new("ES")
}

fn usd() -> Symbol {
    Symbol::new("USD")
}

struct Rig {
    prices: Arc<OrderedSeries>,
    engine: Arc<MatchingEngine>,
    adapter: Arc<ExecutionAdapter>,
}

/// Wire a price series, engine, ledger, and adapter the way the platform does
fn rig(config: EngineConfig, commission: LinearCommission) -> Rig {
    let instruments = vec![Instrument::spot("ES", "USD"), Instrument::spot("NQ", "USD")];
    let ledger = Arc::new(PositionLedger::new(usd(), instruments.clone()));
    let engine = Arc::new(MatchingEngine::new(
        config,
        Box::new(commission),
        ledger,
        instruments,
    ));
    let prices = Arc::new(OrderedSeries::strict());
    engine.attach_price_feed(es(), &prices);
    let adapter = ExecutionAdapter::attach(engine.clone(), Arc::new(OrderedSeries::lenient()));
    Rig {
        prices,
        engine,
        adapter,
    }
}

fn default_rig() -> Rig {
    rig(EngineConfig::default(), LinearCommission::free())
}

fn tick(rig: &Rig, offset_secs: i64, price: f64) {
    rig.prices
        .add_last(SeriesPoint::discrete(ts(offset_secs), price))
        .expect("tick in order");
}

// =============================================================================
// End-to-end order flow
// =============================================================================

#[test]
fn limit_order_full_cycle_updates_ledger_and_markers() {
    let rig = default_rig();
    tick(&rig, 0, 101.0);

    let id = rig
        .adapter
        .send_order(Order::limit(es(), Side::Buy, 10.0, 100.0))
        .unwrap();
    // Resting: computed buy price 101 is above the limit
    assert_eq!(rig.engine.open_orders().len(), 1);
    assert_eq!(rig.adapter.output().len(), 1);

    tick(&rig, 1, 100.0);
    let trade = rig.engine.trade_for_order(id).expect("filled");
    assert_relative_eq!(trade.price, 100.0);

    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_eq!(position.quantity, 10.0);
    assert_relative_eq!(position.avg_cost, 100.0);

    let cash = rig.engine.ledger().cash_position(&usd()).unwrap();
    assert_relative_eq!(cash.quantity, -1000.0);

    // Order marker + trade marker on the output series
    assert_eq!(rig.adapter.output().len(), 2);
    assert_relative_eq!(rig.adapter.output().last().unwrap().value(), 100.0);
}

#[test]
fn round_trip_with_commission_hits_cash_and_realized_pnl() {
    let rig = rig(
        EngineConfig::default(),
        LinearCommission::new(1.0, 0.01, 0.0001),
    );
    tick(&rig, 0, 50.0);

    rig.adapter
        .send_order(Order::market(es(), Side::Buy, 100.0))
        .unwrap();
    let cash = rig.engine.ledger().cash_position(&usd()).unwrap();
    // 100 * 50 notional + 2.5 commission
    assert_relative_eq!(cash.quantity, -5002.5);

    tick(&rig, 1, 52.0);
    rig.adapter
        .send_order(Order::market(es(), Side::Sell, 100.0))
        .unwrap();

    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_eq!(position.quantity, 0.0);
    assert_eq!(position.avg_cost, 0.0);
    let cash = rig.engine.ledger().cash_position(&usd()).unwrap();
    // -5002.5 + (100 * 52 - commission(1 + 1 + 0.52))
    assert_relative_eq!(cash.quantity, -5002.5 + 5200.0 - 2.52);
}

#[test]
fn mark_to_market_tracks_latest_tick_without_trades() {
    let rig = default_rig();
    tick(&rig, 0, 100.0);
    rig.adapter
        .send_order(Order::market(es(), Side::Buy, 5.0))
        .unwrap();

    tick(&rig, 1, 104.0);
    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_relative_eq!(position.unrealized_pnl, 20.0);
    assert_relative_eq!(position.market_value, 520.0);

    tick(&rig, 2, 96.0);
    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_relative_eq!(position.unrealized_pnl, -20.0);
}

// =============================================================================
// Brackets and OCA
// =============================================================================

#[test]
fn bracket_lifecycle_take_profit_cancels_stop() {
    let rig = default_rig();
    tick(&rig, 0, 100.0);

    let parent = Order::limit(es(), Side::Buy, 1.0, 99.0);
    let take_profit = Order::limit(es(), Side::Sell, 1.0, 103.0);
    let stop_loss = Order::stop(es(), Side::Sell, 1.0, 97.0);
    let (parent_id, child_ids) = rig
        .adapter
        .send_bracket_orders(parent, vec![take_profit, stop_loss])
        .unwrap();

    // Children stay inert while the parent rests
    tick(&rig, 1, 104.0);
    assert!(rig.engine.trade_for_order(child_ids[0]).is_none());

    tick(&rig, 2, 98.5);
    assert!(rig.engine.trade_for_order(parent_id).is_some());

    tick(&rig, 3, 103.5);
    assert!(rig.engine.trade_for_order(child_ids[0]).is_some());
    assert!(rig.engine.trade_for_order(child_ids[1]).is_none());
    assert!(rig.engine.open_orders().is_empty());

    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_eq!(position.quantity, 0.0);
    assert_eq!(position.avg_cost, 0.0);
    assert_relative_eq!(position.realized_pnl, 5.0); // 103.5 - 98.5
}

#[test]
fn bracket_stop_side_fires_on_drop() {
    let rig = default_rig();
    tick(&rig, 0, 100.0);

    let parent = Order::market(es(), Side::Buy, 2.0);
    let take_profit = Order::limit(es(), Side::Sell, 2.0, 110.0);
    let stop_loss = Order::stop(es(), Side::Sell, 2.0, 95.0);
    let (parent_id, child_ids) = rig
        .adapter
        .send_bracket_orders(parent, vec![take_profit, stop_loss])
        .unwrap();
    assert!(rig.engine.trade_for_order(parent_id).is_some());

    tick(&rig, 1, 94.0);
    assert!(rig.engine.trade_for_order(child_ids[1]).is_some());
    assert!(rig.engine.trade_for_order(child_ids[0]).is_none());

    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_eq!(position.quantity, 0.0);
    assert_relative_eq!(position.realized_pnl, -12.0); // (94 - 100) * 2
}

// =============================================================================
// Spread and slippage
// =============================================================================

#[test]
fn spread_and_slippage_apply_against_the_order_side() {
    let rig = rig(
        EngineConfig {
            spread: 1.0,
            slippage: 0.25,
            venue: Symbol::new("SIM"),
        },
        LinearCommission::free(),
    );
    tick(&rig, 0, 100.0);

    let buy = rig
        .adapter
        .send_order(Order::market(es(), Side::Buy, 1.0))
        .unwrap();
    let sell = rig
        .adapter
        .send_order(Order::market(es(), Side::Sell, 1.0))
        .unwrap();

    assert_relative_eq!(rig.engine.trade_for_order(buy).unwrap().price, 100.75);
    assert_relative_eq!(rig.engine.trade_for_order(sell).unwrap().price, 99.25);
}

// =============================================================================
// Multiple instruments, one currency
// =============================================================================

#[test]
fn shared_currency_cash_leg_accumulates_across_instruments() {
    let rig = default_rig();
    let nq = Symbol::new("NQ");
    rig.engine.on_price_tick(&nq, 20.0, ts(0));
    tick(&rig, 0, 100.0);

    rig.adapter
        .send_order(Order::market(es(), Side::Buy, 1.0))
        .unwrap();
    rig.adapter
        .send_order(Order::market(nq.clone(), Side::Buy, 5.0))
        .unwrap();

    let cash = rig.engine.ledger().cash_position(&usd()).unwrap();
    assert_relative_eq!(cash.quantity, -200.0); // 100 + 5 * 20

    // A tick on one instrument leaves every position marked current
    tick(&rig, 1, 110.0);
    let nq_pos = rig.engine.ledger().position(&nq).unwrap();
    assert_relative_eq!(nq_pos.market_value, 100.0);
    let es_pos = rig.engine.ledger().position(&es()).unwrap();
    assert_relative_eq!(es_pos.unrealized_pnl, 10.0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_submissions_all_fill_exactly_once() {
    let rig = default_rig();
    tick(&rig, 0, 100.0);

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let adapter = rig.adapter.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    adapter
                        .send_order(Order::market(es(), Side::Buy, 1.0))
                        .unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(rig.engine.trades().len(), 100);
    let position = rig.engine.ledger().position(&es()).unwrap();
    assert_eq!(position.quantity, 100.0);
    let cash = rig.engine.ledger().cash_position(&usd()).unwrap();
    assert_relative_eq!(cash.quantity, -10_000.0);
}

#[test]
fn concurrent_series_snapshots_stay_consistent() {
    let series = Arc::new(OrderedSeries::strict());
    let writer = {
        let series = series.clone();
        thread::spawn(move || {
            for i in 0..1000 {
                series
                    .add_last(SeriesPoint::discrete(ts(i), i as f64))
                    .unwrap();
            }
        })
    };
    let reader = {
        let series = series.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let snapshot: Vec<_> = series.iter().collect();
                // Every snapshot is internally ordered
                for pair in snapshot.windows(2) {
                    assert!(pair[0].index() <= pair[1].index());
                }
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(series.len(), 1000);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn engine_from_config_applies_schedule_and_balance() {
    let json = r#"{
        "engine": { "spread": 0.0, "slippage": 0.0, "venue": "PAPER" },
        "commission": { "fixed": 1.0, "per_share": 0.01, "per_value": 0.0001 },
        "account": { "currency": "USD", "initial_cash": 10000.0 },
        "instruments": [{ "symbol": "ES", "currency": "USD", "multiplier": 1.0 }]
    }"#;
    let config: SimConfig = serde_json::from_str(json).unwrap();
    let engine = Arc::new(MatchingEngine::from_config(&config));

    let cash = engine.ledger().cash_position(&usd()).unwrap();
    assert_relative_eq!(cash.quantity, 10000.0);

    engine.on_price_tick(&es(), 50.0, ts(0));
    let id = engine
        .submit_order(Order::market(es(), Side::Buy, 100.0))
        .unwrap();
    let trade = engine.trade_for_order(id).unwrap();
    assert_eq!(trade.venue, Symbol::new("PAPER"));
    assert_relative_eq!(trade.commission, 2.5);
    let cash = engine.ledger().cash_position(&usd()).unwrap();
    assert_relative_eq!(cash.quantity, 10000.0 - 5002.5);
}
