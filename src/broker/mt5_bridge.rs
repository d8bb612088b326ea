use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::broker::{Broker, Deal, OrderRequest, OrderResult, Position, SymbolInfo, Tick};
use crate::config::Mt5Config;
use crate::models::{Candle, CandleSeries, Timeframe};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to a local bridge process that fronts a MetaTrader terminal over
/// HTTP: MT5's native API is MQL5/C++-only, so a pure-Rust process needs
/// a side-car bridge fronting the terminal's REST surface. Login/password
/// /server credentials authenticate the terminal session itself rather
/// than each individual HTTP request.
pub struct Mt5Bridge {
    client: reqwest::Client,
    base_url: String,
}

impl Mt5Bridge {
    pub fn new(cfg: &Mt5Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client build");
        Self {
            client,
            base_url: cfg.bridge_url.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct RateRow {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn mt5_timeframe_code(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M1 => "M1",
        Timeframe::M5 => "M5",
        Timeframe::M15 => "M15",
        Timeframe::M30 => "M30",
        Timeframe::H1 => "H1",
        Timeframe::H4 => "H4",
        Timeframe::D1 => "D1",
    }
}

#[async_trait]
impl Broker for Mt5Bridge {
    async fn symbol_info(&self, symbol: &str) -> anyhow::Result<SymbolInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/symbol_info/{symbol}")))
            .send()
            .await?
            .error_for_status()?
            .json::<SymbolInfo>()
            .await?;
        Ok(resp)
    }

    async fn tick(&self, symbol: &str) -> anyhow::Result<Tick> {
        let resp = self
            .client
            .get(self.url(&format!("/tick/{symbol}")))
            .send()
            .await?
            .error_for_status()?
            .json::<Tick>()
            .await?;
        Ok(resp)
    }

    async fn rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        count: usize,
    ) -> anyhow::Result<CandleSeries> {
        let resp = self
            .client
            .get(self.url(&format!("/rates/{symbol}")))
            .query(&[
                ("timeframe", mt5_timeframe_code(timeframe)),
                ("from", &from.to_rfc3339()),
                ("count", &count.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RateRow>>()
            .await?;
        let candles = resp
            .into_iter()
            .map(|r| Candle {
                timestamp: r.time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect();
        Ok(CandleSeries::new(candles))
    }

    async fn send_order(&self, req: OrderRequest) -> anyhow::Result<OrderResult> {
        let resp = self
            .client
            .post(self.url("/order/send"))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<OrderResult>()
            .await?;
        Ok(resp)
    }

    async fn modify(&self, ticket: i64, sl: f64, tp: f64) -> anyhow::Result<()> {
        self.client
            .post(self.url(&format!("/order/{ticket}/modify")))
            .json(&serde_json::json!({ "sl": sl, "tp": tp }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&self, ticket: i64) -> anyhow::Result<()> {
        self.client
            .post(self.url(&format!("/order/{ticket}/close")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn open_positions(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Position>> {
        let mut req = self.client.get(self.url("/positions"));
        if let Some(s) = symbol {
            req = req.query(&[("symbol", s)]);
        }
        let resp = req
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Position>>()
            .await?;
        Ok(resp)
    }

    async fn history_deal(&self, ticket: i64) -> anyhow::Result<Deal> {
        let resp = self
            .client
            .get(self.url(&format!("/deal/{ticket}")))
            .send()
            .await?
            .error_for_status()?
            .json::<Deal>()
            .await?;
        Ok(resp)
    }

    async fn auto_trading_allowed(&self) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(self.url("/auto_trading"))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(resp.get("allowed").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn account_equity(&self) -> anyhow::Result<f64> {
        let resp = self
            .client
            .get(self.url("/account"))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        resp.get("equity")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("bridge /account response missing equity field"))
    }
}
