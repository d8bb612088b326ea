use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::broker::{Broker, Deal, OrderRequest, OrderResult, Position, SymbolInfo, Tick};
use crate::models::{CandleSeries, Side, Timeframe};

struct SimState {
    next_ticket: i64,
    positions: HashMap<i64, Position>,
    deals: HashMap<i64, Deal>,
    equity: f64,
}

/// An in-memory broker for tests, replaying pre-loaded candle series and
/// a settable current price, replaying a cursor-clamped tail of the
/// configured series the way a historical-replay exchange double does.
pub struct SimBroker {
    series: HashMap<(String, Timeframe), CandleSeries>,
    price: Mutex<HashMap<String, (f64, f64)>>,
    info: HashMap<String, SymbolInfo>,
    state: Mutex<SimState>,
}

impl SimBroker {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            price: Mutex::new(HashMap::new()),
            info: HashMap::new(),
            state: Mutex::new(SimState {
                next_ticket: 1,
                positions: HashMap::new(),
                deals: HashMap::new(),
                equity: 10_000.0,
            }),
        }
    }

    pub fn with_equity(self, equity: f64) -> Self {
        self.state.lock().unwrap().equity = equity;
        self
    }

    pub fn with_series(mut self, symbol: &str, tf: Timeframe, series: CandleSeries) -> Self {
        self.series.insert((symbol.to_string(), tf), series);
        self
    }

    pub fn with_symbol_info(mut self, symbol: &str, info: SymbolInfo) -> Self {
        self.info.insert(symbol.to_string(), info);
        self
    }

    pub fn set_price(&self, symbol: &str, bid: f64, ask: f64) {
        self.price.lock().unwrap().insert(symbol.to_string(), (bid, ask));
    }

    /// Directly closes a position as the broker would after a stop/target
    /// fill, for reconciliation tests.
    pub fn force_close(&self, ticket: i64, close_price: f64, at: DateTime<Utc>, profit: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.positions.remove(&ticket) {
            state.deals.insert(
                ticket,
                Deal {
                    ticket,
                    symbol: pos.symbol,
                    close_price,
                    close_time: at,
                    profit,
                },
            );
        }
    }
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for SimBroker {
    async fn symbol_info(&self, symbol: &str) -> anyhow::Result<SymbolInfo> {
        self.info
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no symbol info configured for {symbol}"))
    }

    async fn tick(&self, symbol: &str) -> anyhow::Result<Tick> {
        let (bid, ask) = *self
            .price
            .lock()
            .unwrap()
            .get(symbol)
            .ok_or_else(|| anyhow::anyhow!("no price set for {symbol}"))?;
        Ok(Tick {
            bid,
            ask,
            time: Utc::now(),
        })
    }

    async fn rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _from: DateTime<Utc>,
        count: usize,
    ) -> anyhow::Result<CandleSeries> {
        let full = self
            .series
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        Ok(full.tail(count))
    }

    async fn send_order(&self, req: OrderRequest) -> anyhow::Result<OrderResult> {
        let mut state = self.state.lock().unwrap();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let fill_price = req.price.unwrap_or(0.0);
        state.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: req.symbol,
                side: req.side,
                volume: req.volume,
                entry: fill_price,
                sl: req.sl.unwrap_or(0.0),
                tp: req.tp.unwrap_or(0.0),
                open_time: Utc::now(),
            },
        );
        Ok(OrderResult {
            ticket,
            fill_price,
            volume: req.volume,
        })
    }

    async fn modify(&self, ticket: i64, sl: f64, tp: f64) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.positions.get_mut(&ticket) {
            pos.sl = sl;
            pos.tp = tp;
        }
        Ok(())
    }

    async fn close(&self, ticket: i64) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.positions.remove(&ticket) {
            state.deals.insert(
                ticket,
                Deal {
                    ticket,
                    symbol: pos.symbol,
                    close_price: pos.entry,
                    close_time: Utc::now(),
                    profit: 0.0,
                },
            );
        }
        Ok(())
    }

    async fn open_positions(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Position>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .positions
            .values()
            .filter(|p| symbol.map(|s| s == p.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn history_deal(&self, ticket: i64) -> anyhow::Result<Deal> {
        self.state
            .lock()
            .unwrap()
            .deals
            .get(&ticket)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no deal recorded for ticket {ticket}"))
    }

    async fn auto_trading_allowed(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn account_equity(&self) -> anyhow::Result<f64> {
        Ok(self.state.lock().unwrap().equity)
    }
}
