use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crt_trader::broker::SymbolInfo;
use crt_trader::config::{
    AutoCloseConfig, Config, DatabaseConfig, GeneralConfig, Mt5Config, PositionMonitoringConfig,
    RiskManagementConfig, StrategyConfig, StrategyScheduleConfig, TradingHoursConfig,
    TrailingStopConfig,
};
use crt_trader::core::news::{CalendarSource, NewsEvent};
use crt_trader::models::{Candle, CandleSeries, Timeframe};

/// Create candles from (open, high, low, close) tuples with auto-incrementing
/// 1-minute timestamps, mirroring `test_helpers::make_candles` (unavailable
/// here since it is `#[cfg(test)]`-gated on the lib target, not this binary).
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// An H4 bar opening at `hour` New-York time on 2024-01-17, the NY date the
/// integration tests fix `now` to. Mirrors the key-candle fixtures in
/// `patterns::key_candles`'s own test module.
pub fn h4_candle_at(hour: u32, o: f64, h: f64, l: f64, c: f64) -> Candle {
    let ny = chrono_tz::US::Eastern
        .with_ymd_and_hms(2024, 1, 17, hour, 0, 0)
        .single()
        .unwrap();
    Candle {
        timestamp: ny.with_timezone(&Utc),
        open: o,
        high: h,
        low: l,
        close: c,
        volume: 100.0,
    }
}

pub fn symbol_info() -> SymbolInfo {
    SymbolInfo {
        digits: 5,
        point: 0.00001,
        volume_min: 0.01,
        volume_max: 5.0,
        volume_step: 0.01,
        stop_level_points: 10,
        trade_enabled: true,
    }
}

pub fn test_config() -> Config {
    Config {
        mt5: Mt5Config {
            login: String::new(),
            password: String::new(),
            server: String::new(),
            bridge_url: "http://127.0.0.1:0".to_string(),
        },
        symbols: vec!["EURUSD".to_string()],
        trading_hours: TradingHoursConfig {
            enabled: true,
            start_time: (1, 0),
            end_time: (17, 0),
            timezone: "America/New_York".to_string(),
        },
        strategy_name: "crt_continuation".to_string(),
        strategy_schedule: StrategyScheduleConfig {
            enabled: false,
            timezone: "America/New_York".to_string(),
            sessions: Vec::new(),
        },
        strategy_config: StrategyConfig {
            crt_entry_timeframe: Timeframe::M5,
            min_rr: 2.0,
            crt_high_timeframe: Timeframe::H4,
            crt_use_vayas: false,
            crt_use_engulfing: false,
            crt_lookback: 5,
            fvg_tolerance_pips: 1.0,
            daily_levels_tolerance_pips: 1.0,
            daily_levels_lookback: 5,
            news_before_minutes: 5,
            news_after_minutes: 5,
            news_consecutive_window_minutes: 30,
        },
        risk_management: RiskManagementConfig {
            risk_per_trade_percent: 1.0,
            max_trades_per_day: 5,
            max_position_size: 5.0,
            close_day_on_first_tp: false,
        },
        position_monitoring: PositionMonitoringConfig {
            trailing_stop: TrailingStopConfig {
                enabled: true,
                trigger_percent: 0.70,
                sl_percent: 0.50,
            },
            auto_close: AutoCloseConfig {
                enabled: true,
                time: (16, 50),
                timezone: "America/New_York".to_string(),
            },
        },
        database: DatabaseConfig {
            enabled: true,
            server: String::new(),
            database: ":memory:".to_string(),
            username: String::new(),
            password: String::new(),
            driver: "sqlite".to_string(),
        },
        general: GeneralConfig {
            log_level: "ERROR".to_string(),
        },
    }
}

/// A fixed in-memory calendar source for integration tests, analogous to
/// `core::news`'s own private `StaticSource` test double.
pub struct StaticCalendar(pub Vec<NewsEvent>);

impl StaticCalendar {
    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

#[async_trait::async_trait]
impl CalendarSource for StaticCalendar {
    async fn events_for_month(&self, currencies: &HashSet<String>) -> anyhow::Result<Vec<NewsEvent>> {
        Ok(self
            .0
            .iter()
            .filter(|e| currencies.contains(&e.currency))
            .cloned()
            .collect())
    }
}
