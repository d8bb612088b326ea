pub mod mt5_bridge;
pub mod retry;
pub mod sim;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::{CandleSeries, Side, Timeframe};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub digits: u32,
    pub point: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub stop_level_points: u32,
    pub trade_enabled: bool,
}

impl SymbolInfo {
    /// Value of one unit of price movement per unit of volume, used to
    /// turn a risk-percent into a volume in Stage 4.
    pub fn value_per_price_unit(&self) -> f64 {
        if self.point > 0.0 {
            1.0 / self.point
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub ticket: i64,
    pub fill_price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub open_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: i64,
    pub symbol: String,
    pub close_price: f64,
    pub close_time: DateTime<Utc>,
    pub profit: f64,
}

/// Abstracts the broker terminal: symbol metadata, tick quotes, candle
/// history, order send/modify/close, open-position enumeration.
#[async_trait]
pub trait Broker {
    async fn symbol_info(&self, symbol: &str) -> anyhow::Result<SymbolInfo>;
    async fn tick(&self, symbol: &str) -> anyhow::Result<Tick>;
    async fn rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        count: usize,
    ) -> anyhow::Result<CandleSeries>;
    async fn send_order(&self, req: OrderRequest) -> anyhow::Result<OrderResult>;
    async fn modify(&self, ticket: i64, sl: f64, tp: f64) -> anyhow::Result<()>;
    async fn close(&self, ticket: i64) -> anyhow::Result<()>;
    async fn open_positions(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Position>>;
    async fn history_deal(&self, ticket: i64) -> anyhow::Result<Deal>;
    async fn auto_trading_allowed(&self) -> anyhow::Result<bool>;
    async fn account_equity(&self) -> anyhow::Result<f64>;
}

/// Classifies a `Broker` call failure: a 4xx HTTP status from the bridge
/// means the broker actively rejected the request (order validation, bad
/// ticket, ...) and carries a retcode worth logging, never retried. Anything
/// else (timeout, connection refused, 5xx) is a transient `GatewayUnavailable`
/// eligible for backoff retry.
pub fn classify_broker_error(err: anyhow::Error) -> CoreError {
    if let Some(status) = err
        .downcast_ref::<reqwest::Error>()
        .and_then(|e| e.status())
    {
        if status.is_client_error() {
            return CoreError::GatewayRejected {
                retcode: status.as_u16() as i32,
                message: err.to_string(),
            };
        }
    }
    CoreError::GatewayUnavailable(err.to_string())
}
