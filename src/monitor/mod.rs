use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tracing::{error, info};

use crate::broker::Broker;
use crate::config::Config;
use crate::errors::CoreError;
use crate::ledger::Ledger;
use crate::models::{CloseReason, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStopModification {
    pub ticket: i64,
    pub new_sl: f64,
}

/// Reconciles the broker's open-position set against the ledger, then
/// enforces the auto-close-at-T_flat and trailing-stop rules in that
/// priority order: open positions are flattened at the close hour before
/// the trailing stop gets a chance to touch them.
pub struct PositionMonitor {
    last_flatten_date: std::sync::Mutex<Option<chrono::NaiveDate>>,
}

impl PositionMonitor {
    pub fn new() -> Self {
        Self {
            last_flatten_date: std::sync::Mutex::new(None),
        }
    }

    /// Compares broker-open tickets against the ledger-open set. Tickets
    /// present in the ledger but absent at the broker are closed: the
    /// historical deal is read, `close_reason` is inferred by comparing
    /// `close_price` against the recorded `sl`/`tp` within a small
    /// tolerance (the auto-close window forces `AutoClose` regardless).
    pub async fn reconcile(
        &self,
        broker: &(dyn Broker + Send + Sync),
        ledger: &Ledger,
        now: DateTime<Utc>,
        auto_close_window: bool,
    ) -> Result<(), CoreError> {
        let broker_open = broker
            .open_positions(None)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        let broker_tickets: std::collections::HashSet<i64> =
            broker_open.iter().map(|p| p.ticket).collect();

        for order in ledger.list_open()? {
            if broker_tickets.contains(&order.ticket) {
                continue;
            }
            let deal = broker
                .history_deal(order.ticket)
                .await
                .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;

            let reason = if auto_close_window {
                CloseReason::AutoClose
            } else {
                infer_close_reason(deal.close_price, order.stop_loss, order.take_profit, order.side)
            };
            ledger.mark_closed(order.ticket, deal.close_price, reason, deal.close_time)?;
            info!(ticket = order.ticket, symbol = %order.symbol, reason = %reason, "position reconciled as closed");
        }
        Ok(())
    }

    /// Closes every open position once `now >= T_flat`, retrying on
    /// transient gateway failure until the ledger shows zero open rows for
    /// the day. A daily guard (keyed by the NY calendar date) prevents
    /// re-triggering after a successful flatten.
    pub async fn auto_close(
        &self,
        broker: &(dyn Broker + Send + Sync),
        ledger: &Ledger,
        cfg: &Config,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        if !cfg.position_monitoring.auto_close.enabled {
            return Ok(false);
        }
        let tz: chrono_tz::Tz = cfg
            .position_monitoring
            .auto_close
            .timezone
            .parse()
            .unwrap_or(chrono_tz::US::Eastern);
        let local = now.with_timezone(&tz);
        let (h, m) = cfg.position_monitoring.auto_close.time;
        let t_flat = NaiveTime::from_hms_opt(h, m, 0).unwrap();
        let today = local.date_naive();

        if local.time() < t_flat {
            return Ok(false);
        }

        if *self.last_flatten_date.lock().unwrap() == Some(today) {
            return Ok(false);
        }

        let positions = broker
            .open_positions(None)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        for pos in &positions {
            match broker.close(pos.ticket).await {
                Ok(()) => {
                    if let Ok(deal) = broker.history_deal(pos.ticket).await {
                        ledger.mark_closed(pos.ticket, deal.close_price, CloseReason::AutoClose, deal.close_time)?;
                    }
                }
                Err(e) => {
                    error!(ticket = pos.ticket, error = %e, "auto-close failed, will retry next cycle");
                }
            }
        }

        let remaining = broker
            .open_positions(None)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
        if remaining.is_empty() && ledger.list_open()?.is_empty() {
            *self.last_flatten_date.lock().unwrap() = Some(today);
            return Ok(true);
        }
        Ok(false)
    }

    /// For each open position, computes progress toward target and
    /// proposes a tightened stop once `trigger_percent` is crossed,
    /// applying it only when strictly more favorable than the current
    /// stop and within the broker's `stop_level` distance.
    pub async fn trailing_stop(
        &self,
        broker: &(dyn Broker + Send + Sync),
        ledger: &Ledger,
        cfg: &Config,
    ) -> Result<Vec<TrailingStopModification>, CoreError> {
        if !cfg.position_monitoring.trailing_stop.enabled {
            return Ok(Vec::new());
        }
        let trigger = cfg.position_monitoring.trailing_stop.trigger_percent;
        let sl_percent = cfg.position_monitoring.trailing_stop.sl_percent;

        let positions = broker
            .open_positions(None)
            .await
            .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;

        let mut applied = Vec::new();
        for pos in positions {
            let Some(tick) = broker.tick(&pos.symbol).await.ok() else {
                continue;
            };
            let current = match pos.side {
                Side::Buy => tick.bid,
                Side::Sell => tick.ask,
            };
            let denom = pos.tp - pos.entry;
            if denom == 0.0 {
                continue;
            }
            let raw_progress = (current - pos.entry) / denom;
            let progress = raw_progress.clamp(0.0, 1.0);
            if progress < trigger {
                continue;
            }

            let new_sl = pos.entry + sl_percent * (pos.tp - pos.entry);
            let more_favorable = match pos.side {
                Side::Buy => new_sl > pos.sl,
                Side::Sell => new_sl < pos.sl,
            };
            if !more_favorable {
                continue;
            }

            let info = broker
                .symbol_info(&pos.symbol)
                .await
                .map_err(|e| CoreError::GatewayUnavailable(e.to_string()))?;
            let min_distance = info.stop_level_points as f64 * info.point;
            if (current - new_sl).abs() < min_distance {
                continue;
            }

            if broker.modify(pos.ticket, new_sl, pos.tp).await.is_ok() {
                ledger.log(
                    "info",
                    "position_monitor",
                    &format!("trailing stop moved to {new_sl}"),
                    Some(&pos.symbol),
                    None,
                );
                applied.push(TrailingStopModification {
                    ticket: pos.ticket,
                    new_sl,
                });
            }
        }
        Ok(applied)
    }
}

impl Default for PositionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn infer_close_reason(close_price: f64, sl: f64, tp: f64, side: Side) -> CloseReason {
    let tolerance = (tp - sl).abs() * 0.01;
    if (close_price - tp).abs() <= tolerance {
        CloseReason::Tp
    } else if (close_price - sl).abs() <= tolerance {
        CloseReason::Sl
    } else {
        match side {
            Side::Buy if close_price > sl && close_price < tp => CloseReason::Manual,
            Side::Sell if close_price < sl && close_price > tp => CloseReason::Manual,
            _ => CloseReason::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::sim::SimBroker;
    use crate::broker::SymbolInfo;
    use crate::models::Order;
    use crate::test_helpers::default_test_config;

    fn symbol_info() -> SymbolInfo {
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

    fn ledger_order(ticket: i64) -> Order {
        Order {
            ticket,
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 0.1,
            entry: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            strategy: "turtle_soup".into(),
            risk_reward: 2.0,
            status: crate::models::OrderStatus::Open,
            close_reason: None,
            close_price: None,
            comment: String::new(),
            extra: serde_json::json!({}),
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn reconcile_marks_ledger_closed_when_broker_has_no_position() {
        let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.insert_open(&ledger_order(1)).unwrap();
        broker.force_close(1, 1.1100, Utc::now(), 10.0);

        let monitor = PositionMonitor::new();
        monitor.reconcile(&broker, &ledger, Utc::now(), false).await.unwrap();
        assert!(ledger.list_open().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trailing_stop_applies_once_progress_crosses_trigger() {
        let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
        let cfg = default_test_config();
        let ledger = Ledger::open_in_memory().unwrap();
        let res = broker
            .send_order(crate::broker::OrderRequest {
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
        broker.set_price("EURUSD", 1.1075, 1.1076); // progress = 0.75 >= 0.70
        let monitor = PositionMonitor::new();
        let mods = monitor.trailing_stop(&broker, &ledger, &cfg).await.unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].ticket, res.ticket);
        assert!(mods[0].new_sl > 1.0950);
    }

    #[tokio::test]
    async fn auto_close_is_a_no_op_before_t_flat() {
        let broker = SimBroker::new().with_symbol_info("EURUSD", symbol_info());
        let cfg = default_test_config();
        let ledger = Ledger::open_in_memory().unwrap();
        let now = chrono_tz::US::Eastern
            .with_ymd_and_hms(2024, 1, 17, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let monitor = PositionMonitor::new();
        let flattened = monitor.auto_close(&broker, &ledger, &cfg, now).await.unwrap();
        assert!(!flattened);
    }
}
