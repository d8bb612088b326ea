mod common;

use chrono::{TimeZone, Utc};

use crt_trader::broker::sim::SimBroker;
use crt_trader::broker::OrderRequest;
use crt_trader::core::news::{NewsEvent, NewsGate};
use crt_trader::ledger::Ledger;
use crt_trader::models::{Side, Timeframe};
use crt_trader::monitor::PositionMonitor;
use crt_trader::pipeline::{MonitoringHint, StrategyPipeline};

use common::{h4_candle_at, make_candles, symbol_info, test_config, StaticCalendar};

/// Full Stage 1 -> Stage 4 run of a CRT-Continuation long signal: an H4
/// continuation pattern, an M5 entry FVG that has entered and exited
/// upward, and a risk/reward tightening pass that still clears `min_rr`.
#[tokio::test]
async fn crt_continuation_long_submits_an_order_end_to_end() {
    let h4 = crt_trader::models::CandleSeries::new(vec![
        h4_candle_at(1, 1.10800, 1.11000, 1.10700, 1.10900), // c1
        h4_candle_at(5, 1.11020, 1.11150, 1.11000, 1.11120), // c5: body fully above c1, continuation long, target 1.11150
        h4_candle_at(9, 1.11100, 1.11160, 1.11080, 1.11130), // c9: forming
    ]);
    let m5 = make_candles(&[
        (1.10900, 1.10920, 1.10880, 1.10910), // v1: high 1.10920
        (1.10910, 1.10930, 1.10905, 1.10925), // v2
        (1.10950, 1.10970, 1.10940, 1.10960), // v3: low 1.10940 > v1.high 1.10920 -> bullish gap [1.10920, 1.10940]
    ]);

    let broker = SimBroker::new()
        .with_symbol_info("EURUSD", symbol_info())
        .with_series("EURUSD", Timeframe::H4, h4)
        .with_series("EURUSD", Timeframe::M5, m5);
    broker.set_price("EURUSD", 1.10944, 1.10945); // just above the FVG top, inside the continuation

    let cfg = test_config();
    let ledger = Ledger::open_in_memory().unwrap();
    let calendar = StaticCalendar::empty();
    let gate = NewsGate::new(&calendar);
    let pipeline = StrategyPipeline::new("EURUSD", "crt_continuation");

    let now = chrono_tz::US::Eastern
        .with_ymd_and_hms(2024, 1, 17, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc);

    let outcome = pipeline
        .tick(&broker, &gate, &ledger, &cfg, now)
        .await
        .unwrap()
        .expect("continuation + FVG confluence should submit an order");

    assert_eq!(outcome.side, Side::Buy);
    assert!(outcome.rr >= cfg.strategy_config.min_rr - 1e-9);
    assert!(outcome.volume > 0.0);

    let open = ledger.list_open().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].ticket, outcome.ticket);
    assert_eq!(open[0].strategy, "crt_continuation");
}

/// A high-impact event bracketing `now` blocks every stage after it; no
/// order reaches the ledger and no monitoring escalation is left behind.
#[tokio::test]
async fn news_window_blocks_the_pipeline_before_any_pattern_work() {
    let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
    broker.set_price("EURUSD", 1.1000, 1.1002);
    let cfg = test_config();
    let ledger = Ledger::open_in_memory().unwrap();

    let now = chrono_tz::US::Eastern
        .with_ymd_and_hms(2024, 1, 17, 10, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let calendar = StaticCalendar(vec![NewsEvent {
        time: now,
        currency: "USD".to_string(),
        title: "Non-Farm Payrolls".to_string(),
        impact: 3,
        is_holiday: false,
    }]);
    let gate = NewsGate::new(&calendar);
    let pipeline = StrategyPipeline::new("EURUSD", "crt_continuation");

    let outcome = pipeline.tick(&broker, &gate, &ledger, &cfg, now).await.unwrap();
    assert!(outcome.is_none());
    assert!(ledger.list_open().unwrap().is_empty());
    assert_eq!(pipeline.monitoring_hint(), MonitoringHint::None);
}

/// Auto-close at `T_flat` takes precedence over the trailing stop: once the
/// engine's cycle order (reconcile -> auto-close -> trailing-stop) has run,
/// a position deep enough in profit to also trigger a trailing stop is
/// already flattened by auto-close and the trailing-stop pass is a no-op.
#[tokio::test]
async fn auto_close_precedes_trailing_stop_at_t_flat() {
    let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
    let cfg = test_config();
    let ledger = Ledger::open_in_memory().unwrap();

    let opened = broker
        .send_order(OrderRequest {
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 0.1,
            price: Some(1.1000),
            sl: Some(1.0950),
            tp: Some(1.1100),
            comment: String::new(),
        })
        .await
        .unwrap();

    // Deep enough in profit to also clear the trailing-stop trigger.
    broker.set_price("EURUSD", 1.1090, 1.1091);

    // Past the configured T_flat (16:50 America/New_York).
    let now = chrono_tz::US::Eastern
        .with_ymd_and_hms(2024, 1, 17, 16, 55, 0)
        .unwrap()
        .with_timezone(&Utc);

    let monitor = PositionMonitor::new();
    monitor.reconcile(&broker, &ledger, now, true).await.unwrap();

    let flattened = monitor.auto_close(&broker, &ledger, &cfg, now).await.unwrap();
    assert!(flattened, "auto-close should flatten the book at T_flat");
    assert!(broker.open_positions(None).await.unwrap().is_empty());

    let trailing_mods = monitor.trailing_stop(&broker, &ledger, &cfg).await.unwrap();
    assert!(
        trailing_mods.is_empty(),
        "trailing stop must find nothing left to modify once auto-close has run"
    );

    assert!(broker.history_deal(opened.ticket).await.is_ok());
}
