use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use crt_trader::broker::mt5_bridge::Mt5Bridge;
use crt_trader::config::Config;
use crt_trader::core::news::LiveForexFactoryCalendar;
use crt_trader::engine::TradingEngine;
use crt_trader::ledger::Ledger;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_filter(&cfg.general.log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    if let Err(e) = cfg.validate() {
        error!(error = %e, "configuration invalid, exiting");
        std::process::exit(1);
    }

    let broker = Mt5Bridge::new(&cfg.mt5);
    let calendar = LiveForexFactoryCalendar::new(
        "https://www.forexfactory.com/calendar".to_string(),
    );

    let ledger = match Ledger::open(&cfg.database.database) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to open order ledger, exiting");
            std::process::exit(1);
        }
    };

    let mut engine = match TradingEngine::new(&broker, &calendar, ledger, cfg) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to initialize trading engine, exiting");
            std::process::exit(1);
        }
    };

    engine.run().await;
}

/// Maps the spec's `general.log_level` vocabulary onto `tracing`'s filter
/// directive syntax (`WARNING` has no `tracing` equivalent spelling).
fn log_level_filter(level: &str) -> &'static str {
    match level {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}
