//! Error types for the trading engine

use thiserror::Error;

/// Result type alias using [`BotError`]
pub type Result<T> = std::result::Result<T, BotError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum BotError {
    /// Exchange or network failure on a balance or market call
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Order rejected by the exchange or the executor
    #[error("Trade execution error: {0}")]
    Execution(String),

    /// External call exceeded its caller-supplied timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input such as a non-positive quantity or an unparseable symbol
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Exchange and ledger disagree after a confirmed trade
    #[error("State inconsistency: {0}")]
    Inconsistency(String),

    /// Position or candle store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Analyzer failed to produce a signal
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// Market data feed failure
    #[error("Market data feed error: {0}")]
    Feed(String),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl BotError {
    /// Whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::Exchange(_)
                | BotError::Timeout(_)
                | BotError::Feed(_)
                | BotError::HttpRequest(_)
        )
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Configuration(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BotError::Storage(err.to_string())
    }
}
