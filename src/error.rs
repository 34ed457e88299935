use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while registering, evaluating or persisting trade signals.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// The provider answered but had no samples for the window.
    #[error("No price data for {symbol} between {from} and {to}")]
    DataUnavailable {
        symbol: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    /// Transient provider or network failure. The trade is retried next sweep.
    #[error("Price fetch failed for {symbol}: {reason}")]
    FetchFailure { symbol: String, reason: String },

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Concurrent evaluation conflict on trade {trade_id}")]
    ConcurrentEvaluationConflict { trade_id: String },

    #[error("Trade {0} is already in a terminal state")]
    TerminalState(String),

    #[error("Trade not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerifyError {
    /// Errors that only defer a trade to the next sweep.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VerifyError::DataUnavailable { .. }
                | VerifyError::FetchFailure { .. }
                | VerifyError::ConcurrentEvaluationConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
