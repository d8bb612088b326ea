use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mt5Config {
    pub login: String,
    pub password: String,
    pub server: String,
    /// Base URL of the local HTTP bridge fronting the MT5 terminal.
    pub bridge_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingHoursConfig {
    pub enabled: bool,
    pub start_time: (u32, u32),
    pub end_time: (u32, u32),
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSession {
    pub name: String,
    pub start_time: (u32, u32),
    pub end_time: (u32, u32),
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyScheduleConfig {
    pub enabled: bool,
    pub timezone: String,
    pub sessions: Vec<ScheduledSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub crt_entry_timeframe: Timeframe,
    pub min_rr: f64,
    pub crt_high_timeframe: Timeframe,
    pub crt_use_vayas: bool,
    pub crt_use_engulfing: bool,
    pub crt_lookback: usize,
    /// 1 pip by default; callers should not guess other tolerances.
    pub fvg_tolerance_pips: f64,
    pub daily_levels_tolerance_pips: f64,
    pub daily_levels_lookback: usize,
    pub news_before_minutes: i64,
    pub news_after_minutes: i64,
    pub news_consecutive_window_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManagementConfig {
    pub risk_per_trade_percent: f64,
    pub max_trades_per_day: u32,
    pub max_position_size: f64,
    pub close_day_on_first_tp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    pub trigger_percent: f64,
    pub sl_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCloseConfig {
    pub enabled: bool,
    pub time: (u32, u32),
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionMonitoringConfig {
    pub trailing_stop: TrailingStopConfig,
    pub auto_close: AutoCloseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub driver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mt5: Mt5Config,
    pub symbols: Vec<String>,
    pub trading_hours: TradingHoursConfig,
    pub strategy_name: String,
    pub strategy_schedule: StrategyScheduleConfig,
    pub strategy_config: StrategyConfig,
    pub risk_management: RiskManagementConfig,
    pub position_monitoring: PositionMonitoringConfig,
    pub database: DatabaseConfig,
    pub general: GeneralConfig,
}

impl Config {
    /// Loads configuration the way the ambient stack's `dotenvy` +
    /// `std::env` pattern already does it; any field that cannot be
    /// parsed from its env var falls back to a documented default rather
    /// than failing — a config considered invalid as a *value* (e.g. a
    /// `strategy_config.crt_entry_timeframe` outside `{M1,M5,M15,M30,H1}`)
    /// is caught by `validate()`, called once at boot from `main`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let env_f64 = |key: &str, default: f64| -> f64 {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let env_bool = |key: &str, default: bool| -> bool {
            std::env::var(key)
                .ok()
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(default)
        };

        Config {
            mt5: Mt5Config {
                login: env("MT5_LOGIN", ""),
                password: env("MT5_PASSWORD", ""),
                server: env("MT5_SERVER", ""),
                bridge_url: env("MT5_BRIDGE_URL", "http://127.0.0.1:18812"),
            },
            symbols: env("SYMBOLS", "EURUSD,GBPUSD")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            trading_hours: TradingHoursConfig {
                enabled: env_bool("TRADING_HOURS_ENABLED", true),
                start_time: (1, 0),
                end_time: (17, 0),
                timezone: env("TRADING_HOURS_TZ", "America/New_York"),
            },
            strategy_name: env("STRATEGY_NAME", "turtle_soup"),
            strategy_schedule: StrategyScheduleConfig {
                enabled: env_bool("STRATEGY_SCHEDULE_ENABLED", false),
                timezone: env("STRATEGY_SCHEDULE_TZ", "America/New_York"),
                sessions: Vec::new(),
            },
            strategy_config: StrategyConfig {
                crt_entry_timeframe: Timeframe::M5,
                min_rr: env_f64("MIN_RR", 2.0),
                crt_high_timeframe: Timeframe::H4,
                crt_use_vayas: env_bool("CRT_USE_VAYAS", false),
                crt_use_engulfing: env_bool("CRT_USE_ENGULFING", false),
                crt_lookback: 5,
                fvg_tolerance_pips: env_f64("FVG_TOLERANCE_PIPS", 1.0),
                daily_levels_tolerance_pips: env_f64("DAILY_LEVELS_TOLERANCE_PIPS", 1.0),
                daily_levels_lookback: 5,
                news_before_minutes: 5,
                news_after_minutes: 5,
                news_consecutive_window_minutes: 30,
            },
            risk_management: RiskManagementConfig {
                risk_per_trade_percent: env_f64("RISK_PER_TRADE_PERCENT", 1.0),
                max_trades_per_day: 5,
                max_position_size: env_f64("MAX_POSITION_SIZE", 5.0),
                close_day_on_first_tp: env_bool("CLOSE_DAY_ON_FIRST_TP", false),
            },
            position_monitoring: PositionMonitoringConfig {
                trailing_stop: TrailingStopConfig {
                    enabled: env_bool("TRAILING_STOP_ENABLED", true),
                    trigger_percent: env_f64("TRAILING_STOP_TRIGGER_PERCENT", 0.70),
                    sl_percent: env_f64("TRAILING_STOP_SL_PERCENT", 0.50),
                },
                auto_close: AutoCloseConfig {
                    enabled: env_bool("AUTO_CLOSE_ENABLED", true),
                    time: (16, 50),
                    timezone: env("AUTO_CLOSE_TZ", "America/New_York"),
                },
            },
            database: DatabaseConfig {
                enabled: env_bool("DATABASE_ENABLED", true),
                server: env("DATABASE_SERVER", ""),
                database: env("DATABASE_PATH", "ledger.sqlite3"),
                username: env("DATABASE_USERNAME", ""),
                password: env("DATABASE_PASSWORD", ""),
                driver: env("DATABASE_DRIVER", "sqlite"),
            },
            general: GeneralConfig {
                log_level: env("LOG_LEVEL", "INFO"),
            },
        }
    }

    /// Config-as-value validation: the typed struct already rejects unknown
    /// *keys* by construction; this rejects in-range-but-wrong *values*.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbols.is_empty() {
            return Err(CoreError::ConfigInvalid("symbols must not be empty".into()));
        }
        if !matches!(
            self.strategy_config.crt_entry_timeframe,
            Timeframe::M1 | Timeframe::M5 | Timeframe::M15 | Timeframe::M30 | Timeframe::H1
        ) {
            return Err(CoreError::ConfigInvalid(
                "strategy_config.crt_entry_timeframe must be one of M1,M5,M15,M30,H1".into(),
            ));
        }
        if !matches!(
            self.strategy_config.crt_high_timeframe,
            Timeframe::H4 | Timeframe::D1
        ) {
            return Err(CoreError::ConfigInvalid(
                "strategy_config.crt_high_timeframe must be H4 or D1".into(),
            ));
        }
        if self.strategy_config.min_rr < 1.0 {
            return Err(CoreError::ConfigInvalid(
                "strategy_config.min_rr must be >= 1".into(),
            ));
        }
        if !["DEBUG", "INFO", "WARNING", "ERROR"].contains(&self.general.log_level.as_str()) {
            return Err(CoreError::ConfigInvalid(format!(
                "general.log_level '{}' is not one of DEBUG,INFO,WARNING,ERROR",
                self.general.log_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_test_config;

    #[test]
    fn default_test_config_validates() {
        assert!(default_test_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbols() {
        let mut cfg = default_test_config();
        cfg.symbols.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_entry_timeframe() {
        let mut cfg = default_test_config();
        cfg.strategy_config.crt_entry_timeframe = Timeframe::H4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_min_rr_below_one() {
        let mut cfg = default_test_config();
        cfg.strategy_config.min_rr = 0.5;
        assert!(cfg.validate().is_err());
    }
}
