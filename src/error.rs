//! Error taxonomy for the trading core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the trading core.
///
/// Transient exchange failures are absorbed at the call site (logged, retried
/// per policy) and never unwind past a single poll iteration; only the
/// categorized variants below reach callers.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network/HTTP failure after exhausting the retry budget.
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// The exchange rejected a placement for lack of funds.
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    /// Clamped capital is zero or negative; no grid can be funded.
    #[error("insufficient capital to fund any grid level")]
    InsufficientCapital,

    /// Pair metadata is missing or carries zero tick/notional data.
    #[error("invalid pair configuration for {symbol}: {reason}")]
    InvalidPairConfiguration { symbol: String, reason: String },

    /// Take-profit math requested with no recorded fills.
    #[error("no open position")]
    NoPosition,

    /// Malformed caller parameters, rejected before any exchange call.
    #[error("configuration error: {0}")]
    Configuration(String),
}
