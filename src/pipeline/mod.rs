use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::warn;

use crate::broker::{Broker, OrderRequest, SymbolInfo};
use crate::config::{Config, StrategyConfig};
use crate::core::candles::CandleReader;
use crate::core::news::NewsGate;
use crate::errors::CoreError;
use crate::ledger::Ledger;
use crate::models::{Candle, Side, Trend};
use crate::patterns::{daily_levels, CrtSignal, DailyLevelKind, Fvg, KeyCandles, TurtleSoupSignal};

/// What the execution loop should do with its sleep cadence after a cycle
/// touches this pipeline, tracked as state per (symbol, strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringHint {
    None,
    Intermediate,
    Intensive,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub ticket: i64,
    pub side: Side,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub volume: f64,
}

struct HighTimeframePattern {
    direction: Trend,
    target_price: f64,
    invalidation: f64,
}

/// Per-(symbol, strategy) pipeline state: Intensive-monitoring flag,
/// Intermediate flag, and the open-position re-entry guard, one instance
/// owning its own detector state per (symbol, strategy) pair rather than
/// a single shared pipeline across the whole symbol set.
pub struct StrategyPipeline {
    pub symbol: String,
    pub strategy: String,
    intensive: Mutex<bool>,
    intermediate: Mutex<bool>,
}

impl StrategyPipeline {
    pub fn new(symbol: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strategy: strategy.into(),
            intensive: Mutex::new(false),
            intermediate: Mutex::new(false),
        }
    }

    pub fn monitoring_hint(&self) -> MonitoringHint {
        if *self.intensive.lock().unwrap() {
            MonitoringHint::Intensive
        } else if *self.intermediate.lock().unwrap() {
            MonitoringHint::Intermediate
        } else {
            MonitoringHint::None
        }
    }

    fn set_monitoring(&self, intensive: bool, intermediate: bool) {
        *self.intensive.lock().unwrap() = intensive;
        *self.intermediate.lock().unwrap() = intermediate;
    }

    /// Runs the four stages for one tick. Detectors and gates return
    /// `None`/abort rather than propagating errors into the loop; only
    /// genuine I/O failures (gateway, news source, ledger) surface as `Err`.
    #[allow(clippy::too_many_arguments)]
    pub async fn tick(
        &self,
        broker: &(dyn Broker + Send + Sync),
        news: &NewsGate<'_>,
        ledger: &Ledger,
        cfg: &Config,
        now: DateTime<Utc>,
    ) -> Result<Option<PipelineOutcome>, CoreError> {
        // Guard: already have an open position on this symbol.
        let open = broker
            .open_positions(Some(&self.symbol))
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        if !open.is_empty() {
            self.set_monitoring(false, false);
            return Ok(None);
        }

        // Stage 1 — News gate.
        let sc = &cfg.strategy_config;
        let decision = news
            .may_trade_with_window(
                &self.symbol,
                now,
                chrono::Duration::minutes(sc.news_before_minutes),
                chrono::Duration::minutes(sc.news_after_minutes),
                true,
                chrono::Duration::minutes(sc.news_consecutive_window_minutes),
            )
            .await?;
        if !decision.may_trade {
            warn!(symbol = %self.symbol, strategy = %self.strategy, stage = "news", reason = ?decision.reason, "pipeline aborted");
            self.set_monitoring(false, false);
            return Ok(None);
        }

        // Stage 2 — High-timeframe pattern.
        let pattern = match self.stage2_pattern(broker, sc, now).await? {
            Some(p) => p,
            None => {
                warn!(symbol = %self.symbol, strategy = %self.strategy, stage = "pattern", "no signal");
                self.set_monitoring(false, false);
                return Ok(None);
            }
        };

        // Stage 3 — Entry FVG.
        let fvg = match self.stage3_fvg(broker, sc, &pattern).await? {
            Some(f) => f,
            None => {
                self.set_monitoring(false, true);
                return Ok(None);
            }
        };
        if !(fvg.entered && fvg.exited_in_expected_direction()) {
            self.set_monitoring(true, false);
            return Ok(None);
        }
        self.set_monitoring(false, false);

        // Final preconditions before Stage 4.
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        if ledger.count_today(Some(&self.strategy), day_start)? >= cfg.risk_management.max_trades_per_day {
            warn!(symbol = %self.symbol, strategy = %self.strategy, stage = "risk", "daily trade limit reached");
            return Ok(None);
        }
        if !broker
            .auto_trading_allowed()
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?
        {
            warn!(symbol = %self.symbol, strategy = %self.strategy, stage = "risk", "auto trading disallowed");
            return Ok(None);
        }

        // Stage 4 — Risk-validated order.
        let tick = broker
            .tick(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let info = broker
            .symbol_info(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let side = pattern.direction.to_side().ok_or_else(|| CoreError::ValidationFailure {
            symbol: self.symbol.clone(),
            reason: "pattern direction is neutral".to_string(),
        })?;

        let margin = fvg.size().max(info.point);
        let (entry, sl) = match side {
            Side::Buy => (tick.ask, pattern.invalidation - margin),
            Side::Sell => (tick.bid, pattern.invalidation + margin),
        };
        let mut tp = pattern.target_price;
        let risk = (entry - sl).abs();
        if risk <= 0.0 {
            return Err(CoreError::ValidationFailure {
                symbol: self.symbol.clone(),
                reason: "zero-risk stop distance".to_string(),
            });
        }
        let mut reward = (tp - entry).abs();
        let mut rr = reward / risk;

        if rr < sc.min_rr {
            // Tighten sl once, bounded so it can never cross the bare
            // invalidation boundary (the swept extreme, without the margin
            // buffer) — past that point the stop would sit inside the
            // pattern rather than beyond it.
            let desired_risk = reward / sc.min_rr;
            let desired_sl = match side {
                Side::Buy => entry - desired_risk,
                Side::Sell => entry + desired_risk,
            };
            let sl2 = match side {
                Side::Buy => desired_sl.min(pattern.invalidation).max(sl),
                Side::Sell => desired_sl.max(pattern.invalidation).min(sl),
            };
            let risk2 = (entry - sl2).abs();
            let rr2 = reward / risk2;

            let (sl, rr) = if rr2 >= sc.min_rr {
                (sl2, rr2)
            } else {
                // Still insufficient: force tp outward to satisfy rr_min;
                // never tighten tp below the pattern target.
                let forced_reward = risk2 * sc.min_rr;
                let forced_tp = match side {
                    Side::Buy => entry + forced_reward,
                    Side::Sell => entry - forced_reward,
                };
                let respects_target = match side {
                    Side::Buy => forced_tp >= tp,
                    Side::Sell => forced_tp <= tp,
                };
                if respects_target {
                    tp = forced_tp;
                }
                reward = (tp - entry).abs();
                (sl2, reward / risk2)
            };
            return self
                .submit(
                    broker, ledger, cfg, &info, side, entry, sl, tp, rr, &pattern, &fvg, now,
                )
                .await;
        }

        self.submit(broker, ledger, cfg, &info, side, entry, sl, tp, rr, &pattern, &fvg, now)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit(
        &self,
        broker: &(dyn Broker + Send + Sync),
        ledger: &Ledger,
        cfg: &Config,
        info: &SymbolInfo,
        side: Side,
        entry: f64,
        sl: f64,
        tp: f64,
        rr: f64,
        pattern: &HighTimeframePattern,
        fvg: &Fvg,
        now: DateTime<Utc>,
    ) -> Result<Option<PipelineOutcome>, CoreError> {
        let risk = (entry - sl).abs();
        let equity = broker
            .account_equity()
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let raw_volume =
            (equity * cfg.risk_management.risk_per_trade_percent / 100.0) / (risk * info.value_per_price_unit());
        let capped = snap_volume(raw_volume, info).min(cfg.risk_management.max_position_size);
        let volume = snap_volume(capped, info);

        let req = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            volume,
            price: Some(entry),
            sl: Some(sl),
            tp: Some(tp),
            comment: format!("{}:{}", self.strategy, pattern.direction),
        };
        let result = broker
            .send_order(req)
            .await
            .map_err(crate::broker::classify_broker_error)?;

        let order = crate::models::Order {
            ticket: result.ticket,
            symbol: self.symbol.clone(),
            side,
            volume: result.volume,
            entry: result.fill_price,
            stop_loss: sl,
            take_profit: tp,
            strategy: self.strategy.clone(),
            risk_reward: rr,
            status: crate::models::OrderStatus::Open,
            close_reason: None,
            close_price: None,
            comment: format!("{}:{}", self.strategy, pattern.direction),
            extra: serde_json::json!({
                "pattern_target": pattern.target_price,
                "pattern_invalidation": pattern.invalidation,
                "fvg_bottom": fvg.bottom,
                "fvg_top": fvg.top,
            }),
            created_at: now,
            closed_at: None,
        };
        ledger.insert_open(&order)?;

        Ok(Some(PipelineOutcome {
            ticket: result.ticket,
            side,
            entry: result.fill_price,
            sl,
            tp,
            rr,
            volume: result.volume,
        }))
    }

    async fn stage2_pattern(
        &self,
        broker: &(dyn Broker + Send + Sync),
        sc: &StrategyConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<HighTimeframePattern>, CoreError> {
        // Mt5Bridge normalizes bars to UTC on receipt, so the reader's
        // broker-zone offset is the documented steady-state zero rather
        // than auto-detected live.
        let reader = CandleReader::new(broker, Some(0));
        let Some(kc) = KeyCandles::via_reader(&reader, &self.symbol, sc.crt_high_timeframe, now).await? else {
            warn!(symbol = %self.symbol, strategy = %self.strategy, stage = "pattern", "insufficient history for key candles");
            return Ok(None);
        };

        match self.strategy.as_str() {
            "turtle_soup" => {
                Ok(TurtleSoupSignal::detect(&kc).map(|s| HighTimeframePattern {
                    direction: s.direction,
                    target_price: s.target_price,
                    invalidation: match s.direction {
                        Trend::Bullish => kc.c9.low,
                        _ => kc.c9.high,
                    },
                }))
            }
            "crt_continuation" | "crt_revision" | "crt_extreme" => {
                let (c1, c5) = (kc.c1.clone(), kc.c5.clone());
                let signal = match self.strategy.as_str() {
                    "crt_continuation" => CrtSignal::continuation(&c1, &c5),
                    "crt_revision" => CrtSignal::revision(&c1, &c5),
                    _ => CrtSignal::extreme(&c1, &c5),
                };
                let Some(signal) = signal else {
                    return Ok(None);
                };

                if sc.crt_use_engulfing && !engulfs(&c1, &c5, signal.direction) {
                    return Ok(None);
                }
                if sc.crt_use_vayas && !self.vayas_confluence(broker, sc, signal.direction).await? {
                    return Ok(None);
                }

                Ok(Some(HighTimeframePattern {
                    direction: signal.direction,
                    target_price: signal.target_price,
                    invalidation: match signal.direction {
                        Trend::Bullish => c5.low.min(c1.low),
                        _ => c5.high.max(c1.high),
                    },
                }))
            }
            other => {
                warn!(symbol = %self.symbol, strategy = other, "unrecognized strategy name, no pattern detector available");
                Ok(None)
            }
        }
    }

    async fn stage3_fvg(
        &self,
        broker: &(dyn Broker + Send + Sync),
        sc: &StrategyConfig,
        pattern: &HighTimeframePattern,
    ) -> Result<Option<Fvg>, CoreError> {
        let bars = broker
            .rates(&self.symbol, sc.crt_entry_timeframe, Utc::now(), 8)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let tick = broker
            .tick(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let info = broker
            .symbol_info(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let price = match pattern.direction {
            Trend::Bullish => tick.ask,
            _ => tick.bid,
        };
        let tolerance = sc.fvg_tolerance_pips * info.point;
        let fvg = match Fvg::detect(&self.symbol, sc.crt_entry_timeframe, bars.as_slice(), price, tolerance) {
            Some(f) => f,
            None => return Ok(None),
        };
        if fvg.kind != pattern.direction {
            return Ok(None);
        }
        Ok(Some(fvg))
    }

    /// "Vayas" confluence (`crt_use_vayas`): requires the prior day's
    /// high/low to be in play — the signal's direction must line up with
    /// a PDL take for a bullish pattern or a PDH take for a bearish one.
    /// Reuses the otherwise-standalone daily-levels PDH/PDL evaluator.
    async fn vayas_confluence(
        &self,
        broker: &(dyn Broker + Send + Sync),
        sc: &StrategyConfig,
        direction: Trend,
    ) -> Result<bool, CoreError> {
        let daily = broker
            .rates(&self.symbol, crate::models::Timeframe::D1, Utc::now(), sc.daily_levels_lookback.max(2))
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let tick = broker
            .tick(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let info = broker
            .symbol_info(&self.symbol)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let tolerance = sc.daily_levels_tolerance_pips * info.point;

        let Some(touch) = daily_levels::evaluate(&daily, tick.bid, tolerance) else {
            return Ok(false);
        };
        let aligned = match direction {
            Trend::Bullish => touch.kind == DailyLevelKind::Pdl,
            Trend::Bearish => touch.kind == DailyLevelKind::Pdh,
            Trend::Neutral => false,
        };
        Ok(aligned && touch.is_taking)
    }
}

/// Whether `c5`'s real body fully engulfs `c1`'s real body in the
/// direction of `direction` (the `crt_use_engulfing` confirmation filter).
fn engulfs(c1: &Candle, c5: &Candle, direction: Trend) -> bool {
    match direction {
        Trend::Bullish => c5.is_bullish() && c5.body_bottom() <= c1.body_bottom() && c5.body_top() >= c1.body_top(),
        Trend::Bearish => c5.is_bearish() && c5.body_top() >= c1.body_top() && c5.body_bottom() <= c1.body_bottom(),
        Trend::Neutral => false,
    }
}

/// Clamps to `[volume_min, volume_max]` and snaps to the nearest
/// `volume_step` (rounding down, so the position never exceeds the
/// requested risk).
fn snap_volume(raw: f64, info: &SymbolInfo) -> f64 {
    let clamped = raw.clamp(info.volume_min, info.volume_max);
    if info.volume_step <= 0.0 {
        return clamped;
    }
    let steps = ((clamped - info.volume_min) / info.volume_step).floor();
    (info.volume_min + steps * info.volume_step).max(info.volume_min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::sim::SimBroker;
    use crate::models::Timeframe;
    use crate::test_helpers::default_test_config;
    use chrono::TimeZone;

    fn symbol_info() -> SymbolInfo {
        SymbolInfo {
            digits: 5,
            point: 0.00001,
            volume_min: 0.01,
            volume_max: 5.0,
            volume_step: 0.01,
            stop_level_points: 50,
            trade_enabled: true,
        }
    }

    #[test]
    fn snap_volume_rounds_down_to_step() {
        let info = symbol_info();
        let v = snap_volume(0.237, &info);
        assert!((v - 0.23).abs() < 1e-9);
    }

    #[test]
    fn snap_volume_clamps_to_max() {
        let info = symbol_info();
        let v = snap_volume(50.0, &info);
        assert!((v - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn aborts_with_no_signal_when_key_candles_missing() {
        let pipeline = StrategyPipeline::new("EURUSD", "turtle_soup");
        let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
        broker.set_price("EURUSD", 1.1000, 1.1002);
        let cfg = default_test_config();
        let ledger = Ledger::open_in_memory().unwrap();
        let source = crate::core::news::ForexFactoryCalendar::new(String::new());
        let gate = NewsGate::new(&source);
        let now = chrono_tz::US::Eastern
            .with_ymd_and_hms(2024, 1, 17, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = pipeline.tick(&broker, &gate, &ledger, &cfg, now).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(pipeline.monitoring_hint(), MonitoringHint::None);
    }

    #[test]
    fn engulfs_requires_full_body_coverage_in_direction() {
        let s = crate::test_helpers::make_candles(&[
            (1.1000, 1.1010, 1.0990, 1.0995), // c1: small bearish body 1.0995-1.1000
            (1.0985, 1.1020, 1.0980, 1.1015), // c5: bullish body 1.0985-1.1015 engulfs c1
        ]);
        let c1 = s.get(0).unwrap().clone();
        let c5 = s.get(1).unwrap().clone();
        assert!(engulfs(&c1, &c5, Trend::Bullish));
        assert!(!engulfs(&c1, &c5, Trend::Bearish));
    }

    #[test]
    fn engulfs_rejects_partial_overlap() {
        let s = crate::test_helpers::make_candles(&[
            (1.1000, 1.1010, 1.0990, 1.0995), // c1 body 1.0995-1.1000
            (1.0999, 1.1015, 1.0980, 1.1005), // c5 bottom 1.0999 does not reach c1's 1.0995
        ]);
        let c1 = s.get(0).unwrap().clone();
        let c5 = s.get(1).unwrap().clone();
        assert!(!engulfs(&c1, &c5, Trend::Bullish));
    }

    #[tokio::test]
    async fn vayas_confluence_requires_aligned_daily_level() {
        let pipeline = StrategyPipeline::new("EURUSD", "crt_continuation");
        let daily = crate::test_helpers::make_candles(&[
            (1.0900, 1.0950, 1.0880, 1.0920),
            (1.0920, 1.1000, 1.0890, 1.0980), // previous day: high 1.1000, low 1.0890
            (1.0980, 1.1010, 1.0960, 1.0995),
        ]);
        let broker = SimBroker::new()
            .with_symbol_info("EURUSD", symbol_info())
            .with_series("EURUSD", Timeframe::D1, daily);
        broker.set_price("EURUSD", 1.0889, 1.0890); // at/below PDL
        let sc = StrategyConfig {
            crt_entry_timeframe: Timeframe::M5,
            min_rr: 2.0,
            crt_high_timeframe: Timeframe::H4,
            crt_use_vayas: true,
            crt_use_engulfing: false,
            crt_lookback: 5,
            fvg_tolerance_pips: 1.0,
            daily_levels_tolerance_pips: 1.0,
            daily_levels_lookback: 5,
            news_before_minutes: 5,
            news_after_minutes: 5,
            news_consecutive_window_minutes: 30,
        };
        assert!(pipeline
            .vayas_confluence(&broker, &sc, Trend::Bullish)
            .await
            .unwrap());
        assert!(!pipeline
            .vayas_confluence(&broker, &sc, Trend::Bearish)
            .await
            .unwrap());
    }
}
