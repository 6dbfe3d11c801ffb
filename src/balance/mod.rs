// Resilient account balance lookups
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::config::TradingConfig;
use crate::error::{BotError, Result};

/// External balance lookup, may fail transiently
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn get_balance(&self, asset: &str) -> Result<Decimal>;
}

/// Retry policy for [`BalanceQuery`]
#[derive(Debug, Clone)]
pub struct BalanceQueryConfig {
    /// Total attempts made before giving up (0 behaves like 1)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub use_exponential_backoff: bool,
    /// Propagate the final failure instead of returning zero
    pub require_balance_check: bool,
    /// Market-data-only mode short-circuits to zero without any call
    pub trading_enabled: bool,
    /// Per-attempt timeout, `None` waits indefinitely
    pub call_timeout: Option<Duration>,
}

impl From<&TradingConfig> for BalanceQueryConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_delay(),
            use_exponential_backoff: config.use_exponential_backoff,
            require_balance_check: config.require_balance_check,
            trading_enabled: config.enabled,
            call_timeout: Some(config.balance_timeout()),
        }
    }
}

/// Balance lookup with bounded retry and fail-open/fail-closed fallback
#[derive(Clone)]
pub struct BalanceQuery {
    source: Arc<dyn BalanceSource>,
    config: BalanceQueryConfig,
}

impl BalanceQuery {
    pub fn new(source: Arc<dyn BalanceSource>, config: BalanceQueryConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &BalanceQueryConfig {
        &self.config
    }

    /// Available balance of `asset`
    ///
    /// After the last failed attempt the error propagates when
    /// `require_balance_check` is set; otherwise zero is returned, which the
    /// risk gate treats as "cannot afford anything".
    pub async fn get_available_balance(&self, asset: &str) -> Result<Decimal> {
        if !self.config.trading_enabled {
            tracing::debug!(asset, "Trading disabled - returning 0 balance");
            return Ok(Decimal::ZERO);
        }

        let max_attempts = self.config.max_retries.max(1);
        let mut delay = self.config.initial_delay;

        for attempt in 1..=max_attempts {
            match self.fetch_once(asset).await {
                Ok(balance) => {
                    if attempt > 1 {
                        tracing::info!(asset, attempt, "Balance fetched after retry");
                    }
                    return Ok(balance);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        asset,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Balance request failed: {}. Retrying...",
                        e
                    );
                    sleep(delay).await;
                    if self.config.use_exponential_backoff {
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        asset,
                        attempts = attempt,
                        "Failed to get balance: {}",
                        e
                    );
                    if self.config.require_balance_check {
                        return Err(e);
                    }
                    tracing::warn!(asset, "Returning 0 balance as fallback");
                    return Ok(Decimal::ZERO);
                }
            }
        }

        // The final attempt always returns above
        Ok(Decimal::ZERO)
    }

    async fn fetch_once(&self, asset: &str) -> Result<Decimal> {
        match self.config.call_timeout {
            Some(limit) => timeout(limit, self.source.get_balance(asset))
                .await
                .map_err(|_| {
                    BotError::Timeout(format!("balance query for {} after {:?}", asset, limit))
                })?,
            None => self.source.get_balance(asset).await,
        }
    }
}
