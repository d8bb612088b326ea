use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use tracing::{error, info, warn};

use crate::broker::retry::with_backoff;
use crate::broker::Broker;
use crate::config::Config;
use crate::core::news::{CalendarSource, NewsGate};
use crate::core::schedule::{Session, SessionSchedule};
use crate::ledger::Ledger;
use crate::monitor::PositionMonitor;
use crate::pipeline::{MonitoringHint, StrategyPipeline};

/// Cadence policy, recomputed every cycle rather than driven by timers or
/// callbacks.
pub fn sleep_policy(has_open_positions: bool, intensive: bool, intermediate: bool) -> Duration {
    if intensive {
        Duration::from_secs(1)
    } else if has_open_positions {
        Duration::from_secs(5)
    } else if intermediate {
        Duration::from_secs(10)
    } else {
        Duration::from_secs(60)
    }
}

/// Drives the whole system: per-cycle reconnect-with-backoff, Position
/// Monitor, then — iff no positions are open and the wall-clock is inside
/// the trading window on a trading day with daily limits intact — the
/// Strategy Pipeline per symbol. Uses a `tokio::select!` ctrl-c/tick loop
/// where cadence is a pure function of state instead of a fixed interval.
pub struct TradingEngine<'a> {
    broker: &'a (dyn Broker + Send + Sync),
    ledger: Ledger,
    schedule: SessionSchedule,
    news: NewsGate<'a>,
    monitor: PositionMonitor,
    pipelines: HashMap<(String, String), StrategyPipeline>,
    cfg: Config,
}

impl<'a> TradingEngine<'a> {
    pub fn new(
        broker: &'a (dyn Broker + Send + Sync),
        calendar: &'a (dyn CalendarSource + Send + Sync),
        ledger: Ledger,
        cfg: Config,
    ) -> Result<Self, crate::errors::CoreError> {
        let schedule = build_schedule(&cfg)?;
        Ok(Self {
            broker,
            ledger,
            schedule,
            news: NewsGate::new(calendar),
            monitor: PositionMonitor::new(),
            pipelines: HashMap::new(),
            cfg,
        })
    }

    fn pipeline_for(&mut self, symbol: &str, strategy: &str) -> &StrategyPipeline {
        self.pipelines
            .entry((symbol.to_string(), strategy.to_string()))
            .or_insert_with(|| StrategyPipeline::new(symbol, strategy))
    }

    /// Runs until ctrl-c, returning once the process should shut down
    /// cleanly (exit code 0).
    pub async fn run(&mut self) {
        info!("trading engine starting");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = self.cycle() => {}
            }
        }
        info!("trading engine stopped");
    }

    async fn cycle(&mut self) {
        let now = Utc::now();
        let broker = self.broker;

        if let Err(e) = with_backoff(3, Duration::from_millis(250), false, || {
            broker.auto_trading_allowed()
        })
        .await
        {
            error!(error = %e, "broker unreachable after retries, skipping cycle");
            tokio::time::sleep(sleep_policy(false, false, false)).await;
            return;
        }

        let auto_close_window = self.is_auto_close_window(now);
        if let Err(e) = self.monitor.reconcile(self.broker, &self.ledger, now, auto_close_window).await {
            error!(error = %e, "reconciliation failed");
        }

        match self.monitor.auto_close(self.broker, &self.ledger, &self.cfg, now).await {
            Ok(flattened) => {
                if flattened {
                    info!("daily auto-close completed");
                }
            }
            Err(e) => error!(error = %e, "auto-close failed"),
        }

        if let Err(e) = self.monitor.trailing_stop(self.broker, &self.ledger, &self.cfg).await {
            error!(error = %e, "trailing stop pass failed");
        }

        let open_positions = self
            .broker
            .open_positions(None)
            .await
            .map(|v| !v.is_empty())
            .unwrap_or(true);

        let mut intensive = false;
        let mut intermediate = false;

        let day_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let closed_for_day = self.cfg.risk_management.close_day_on_first_tp
            && self.ledger.first_tp_today(day_start).unwrap_or(false);
        if closed_for_day {
            info!("first take-profit already hit today, holding off on new signals");
        }

        if let Some(ev) = self.schedule.poll(now) {
            info!(from = %ev.from_strategy, to = %ev.to_strategy, at = %ev.at, "session changed");
        }

        if !closed_for_day && !open_positions && self.in_trading_window(now) && self.is_trading_day(now).await {
            let symbols = self.cfg.symbols.clone();
            let strategy = self.schedule.current_strategy(now);

            // Ensure every pipeline exists before borrowing any of them, so
            // the fan-out below only ever takes shared borrows of `self`.
            for symbol in &symbols {
                self.pipeline_for(symbol, &strategy);
            }

            let futures: Vec<_> = symbols
                .iter()
                .map(|symbol| {
                    let pipeline = self
                        .pipelines
                        .get(&(symbol.clone(), strategy.clone()))
                        .expect("pipeline was just inserted above");
                    pipeline.tick(self.broker, &self.news, &self.ledger, &self.cfg, now)
                })
                .collect();

            let results = futures::future::join_all(futures).await;
            for (symbol, result) in symbols.iter().zip(results) {
                match result {
                    Ok(Some(outcome)) => {
                        info!(symbol = %symbol, ticket = outcome.ticket, side = %outcome.side, rr = outcome.rr, "order submitted");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %symbol, error = %e, "pipeline cycle error"),
                }
                if let Some(p) = self.pipelines.get(&(symbol.clone(), strategy.clone())) {
                    match p.monitoring_hint() {
                        MonitoringHint::Intensive => intensive = true,
                        MonitoringHint::Intermediate => intermediate = true,
                        MonitoringHint::None => {}
                    }
                }
            }
        }

        tokio::time::sleep(sleep_policy(open_positions, intensive, intermediate)).await;
    }

    fn in_trading_window(&self, now: chrono::DateTime<Utc>) -> bool {
        if !self.cfg.trading_hours.enabled {
            return true;
        }
        let tz: chrono_tz::Tz = self
            .cfg
            .trading_hours
            .timezone
            .parse()
            .unwrap_or(chrono_tz::US::Eastern);
        let local = now.with_timezone(&tz).time();
        let (sh, sm) = self.cfg.trading_hours.start_time;
        let (eh, em) = self.cfg.trading_hours.end_time;
        let start = NaiveTime::from_hms_opt(sh, sm, 0).unwrap();
        let end = NaiveTime::from_hms_opt(eh, em, 0).unwrap();
        if start <= end {
            local >= start && local < end
        } else {
            local >= start || local < end
        }
    }

    fn is_auto_close_window(&self, now: chrono::DateTime<Utc>) -> bool {
        if !self.cfg.position_monitoring.auto_close.enabled {
            return false;
        }
        let tz: chrono_tz::Tz = self
            .cfg
            .position_monitoring
            .auto_close
            .timezone
            .parse()
            .unwrap_or(chrono_tz::US::Eastern);
        let local = now.with_timezone(&tz).time();
        let (h, m) = self.cfg.position_monitoring.auto_close.time;
        local >= NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn is_trading_day(&self, now: chrono::DateTime<Utc>) -> bool {
        let Some(symbol) = self.cfg.symbols.first() else {
            return false;
        };
        match self.news.trading_day(symbol, now).await {
            Ok((ok, _)) => ok,
            Err(e) => {
                warn!(error = %e, "trading-day check failed, defaulting to not a trading day");
                false
            }
        }
    }
}

fn build_schedule(cfg: &Config) -> Result<SessionSchedule, crate::errors::CoreError> {
    let tz: chrono_tz::Tz = cfg
        .strategy_schedule
        .timezone
        .parse()
        .unwrap_or(chrono_tz::US::Eastern);

    if !cfg.strategy_schedule.enabled || cfg.strategy_schedule.sessions.is_empty() {
        return SessionSchedule::new(Vec::new(), tz, cfg.strategy_name.clone(), &[]);
    }

    let known: Vec<String> = cfg
        .strategy_schedule
        .sessions
        .iter()
        .map(|s| s.strategy.clone())
        .collect();
    let sessions = cfg
        .strategy_schedule
        .sessions
        .iter()
        .map(|s| Session {
            name: s.name.clone(),
            start: NaiveTime::from_hms_opt(s.start_time.0, s.start_time.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(s.end_time.0, s.end_time.1, 0).unwrap(),
            strategy: s.strategy.clone(),
        })
        .collect();
    SessionSchedule::new(sessions, tz, cfg.strategy_name.clone(), &known)
}
