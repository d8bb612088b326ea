use thiserror::Error;

/// Error kinds surfaced by the core. Detectors never return `Err`, they
/// return `None` (see `pipeline`); this enum covers everything that *can*
/// legitimately abort a stage, a cycle, or the whole process.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("broker gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("broker rejected request (retcode {retcode}): {message}")]
    GatewayRejected { retcode: i32, message: String },

    #[error("insufficient history for {symbol} {timeframe}")]
    InsufficientHistory { symbol: String, timeframe: String },

    #[error("news source unavailable: {0}")]
    NewsSourceUnavailable(String),

    #[error("order ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("validation failed at stage 4 for {symbol}: {reason}")]
    ValidationFailure { symbol: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
