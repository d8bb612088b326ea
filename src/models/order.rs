use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CloseReason, OrderStatus, Side};

/// One row of the durable order ledger (`ledger::Ledger`), and the shape
/// the broker hands back from `send_order`/`open_positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
    pub risk_reward: f64,
    pub status: OrderStatus,
    pub close_reason: Option<CloseReason>,
    pub close_price: Option<f64>,
    pub comment: String,
    /// Pattern/FVG context recorded alongside the order.
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn close(&mut self, price: f64, reason: CloseReason, at: DateTime<Utc>) {
        self.status = OrderStatus::Closed;
        self.close_price = Some(price);
        self.close_reason = Some(reason);
        self.closed_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Order {
        Order {
            ticket: 1,
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 0.1,
            entry: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            strategy: "turtle_soup".into(),
            risk_reward: 2.0,
            status: OrderStatus::Open,
            close_reason: None,
            close_price: None,
            comment: String::new(),
            extra: serde_json::json!({}),
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn close_transitions_exactly_once() {
        let mut o = sample();
        let at = Utc::now();
        o.close(1.1100, CloseReason::Tp, at);
        assert_eq!(o.status, OrderStatus::Closed);
        assert_eq!(o.close_reason, Some(CloseReason::Tp));
        assert_eq!(o.closed_at, Some(at));
    }
}
