use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use crate::errors::CoreError;
use crate::models::{CloseReason, Order, OrderStatus, Side};

/// Durable, SQL-shaped order log, reconciled against the broker on every
/// tick. Backed by `rusqlite` (bundled SQLite) as a local durable store with
/// no server dependency. Writes are logged-and-swallowed on failure: the
/// broker remains source of truth and reconciliation heals drift.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: &str) -> Result<Self, CoreError> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS orders (
                ticket INTEGER UNIQUE NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry REAL NOT NULL,
                volume REAL NOT NULL,
                sl REAL NOT NULL,
                tp REAL NOT NULL,
                strategy TEXT NOT NULL,
                rr REAL NOT NULL,
                status TEXT NOT NULL,
                close_reason TEXT,
                close_price REAL,
                comment TEXT NOT NULL,
                extra_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                closed_at TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
             CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
             CREATE INDEX IF NOT EXISTS idx_orders_strategy ON orders(strategy);
             CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_ticket ON orders(ticket);

             CREATE TABLE IF NOT EXISTS logs (
                level TEXT NOT NULL,
                logger_name TEXT NOT NULL,
                message TEXT NOT NULL,
                symbol TEXT,
                strategy TEXT,
                extra_json TEXT,
                created_at TEXT NOT NULL
             );",
        )
        .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn insert_open(&self, order: &Order) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO orders
                (ticket, symbol, side, entry, volume, sl, tp, strategy, rr, status,
                 close_reason, close_price, comment, extra_json, created_at, closed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            params![
                order.ticket,
                order.symbol,
                order.side.as_str(),
                order.entry,
                order.volume,
                order.stop_loss,
                order.take_profit,
                order.strategy,
                order.risk_reward,
                "open",
                Option::<String>::None,
                Option::<f64>::None,
                order.comment,
                order.extra.to_string(),
                order.created_at.to_rfc3339(),
                Option::<String>::None,
            ],
        )
        .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn mark_closed(
        &self,
        ticket: i64,
        price: f64,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE orders SET status='closed', close_price=?1, close_reason=?2, closed_at=?3
             WHERE ticket=?4 AND status='open'",
            params![price, reason.to_string(), at.to_rfc3339(), ticket],
        )
        .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn list_open(&self) -> Result<Vec<Order>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM orders WHERE status='open'")
            .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_order)
            .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?);
        }
        Ok(out)
    }

    pub fn count_today(&self, strategy: Option<&str>, day_start: DateTime<Utc>) -> Result<u32, CoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = match strategy {
            Some(s) => conn
                .query_row(
                    "SELECT COUNT(*) FROM orders WHERE created_at >= ?1 AND strategy = ?2",
                    params![day_start.to_rfc3339(), s],
                    |row| row.get(0),
                )
                .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?,
            None => conn
                .query_row(
                    "SELECT COUNT(*) FROM orders WHERE created_at >= ?1",
                    params![day_start.to_rfc3339()],
                    |row| row.get(0),
                )
                .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?,
        };
        Ok(count as u32)
    }

    pub fn first_tp_today(&self, day_start: DateTime<Utc>) -> Result<bool, CoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM orders WHERE created_at >= ?1 AND close_reason = 'tp'",
                params![day_start.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| CoreError::LedgerUnavailable(e.to_string()))?;
        Ok(count > 0)
    }

    pub fn log(&self, level: &str, logger_name: &str, message: &str, symbol: Option<&str>, strategy: Option<&str>) {
        let conn = self.conn.lock().unwrap();
        let _ = conn.execute(
            "INSERT INTO logs (level, logger_name, message, symbol, strategy, extra_json, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                level,
                logger_name,
                message,
                symbol,
                strategy,
                Option::<String>::None,
                Utc::now().to_rfc3339(),
            ],
        );
    }
}

fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let side_str: String = row.get("side")?;
    let side = if side_str == "buy" { Side::Buy } else { Side::Sell };
    let status_str: String = row.get("status")?;
    let status = if status_str == "open" { OrderStatus::Open } else { OrderStatus::Closed };
    let close_reason: Option<String> = row.get("close_reason")?;
    let close_reason = close_reason.map(|s| match s.as_str() {
        "tp" => CloseReason::Tp,
        "sl" => CloseReason::Sl,
        "manual" => CloseReason::Manual,
        _ => CloseReason::AutoClose,
    });
    let extra_json: String = row.get("extra_json")?;
    let created_at: String = row.get("created_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;

    Ok(Order {
        ticket: row.get("ticket")?,
        symbol: row.get("symbol")?,
        side,
        volume: row.get("volume")?,
        entry: row.get("entry")?,
        stop_loss: row.get("sl")?,
        take_profit: row.get("tp")?,
        strategy: row.get("strategy")?,
        risk_reward: row.get("rr")?,
        status,
        close_reason,
        close_price: row.get("close_price")?,
        comment: row.get("comment")?,
        extra: serde_json::from_str(&extra_json).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        closed_at: closed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}
