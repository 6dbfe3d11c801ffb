//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::market_data::MarketScenario;
use crate::models::{Symbol, TimeFrame};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Reject configurations the engine cannot run safely with
    pub fn validate(&self) -> Result<()> {
        Symbol::parse(&self.bot.symbol)?;

        if self.bot.channel_capacity == 0 {
            return Err(BotError::Configuration(
                "bot.channel_capacity must be positive".into(),
            ));
        }
        if self.bot.lookback_candles == 0 {
            return Err(BotError::Configuration(
                "bot.lookback_candles must be positive".into(),
            ));
        }

        let risk = &self.risk;
        if risk.max_drawdown < Decimal::ZERO {
            return Err(BotError::Configuration(
                "risk.max_drawdown must not be negative".into(),
            ));
        }
        if risk.martingale_multiplier <= Decimal::ZERO {
            return Err(BotError::Configuration(
                "risk.martingale_multiplier must be positive".into(),
            ));
        }
        if risk.base_position_fraction <= Decimal::ZERO || risk.base_position_fraction > Decimal::ONE
        {
            return Err(BotError::Configuration(
                "risk.base_position_fraction must be in (0, 1]".into(),
            ));
        }
        if risk.take_profit < Decimal::ZERO || risk.stop_loss < Decimal::ZERO {
            return Err(BotError::Configuration(
                "risk.take_profit and risk.stop_loss must not be negative".into(),
            ));
        }
        if risk.confidence_threshold < Decimal::ZERO || risk.confidence_threshold > Decimal::ONE {
            return Err(BotError::Configuration(
                "risk.confidence_threshold must be in [0, 1]".into(),
            ));
        }

        if self.analyzer.kind == AnalyzerKind::Webhook && self.analyzer.webhook_url.is_none() {
            return Err(BotError::Configuration(
                "analyzer.webhook_url is required for the webhook analyzer".into(),
            ));
        }
        if self.paper.base_price <= 0.0 {
            return Err(BotError::Configuration(
                "paper.base_price must be positive".into(),
            ));
        }
        if self.storage.candle_retention_hours == 0 {
            return Err(BotError::Configuration(
                "storage.candle_retention_hours must be positive".into(),
            ));
        }

        if self.analyzer.requests_per_minute == 0 {
            return Err(BotError::Configuration(
                "analyzer.requests_per_minute must be positive".into(),
            ));
        }

        Ok(())
    }
}

/// Symbol and pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: TimeFrame,
    /// Candles handed to the analyzer on each flat cycle
    #[serde(default = "default_lookback_candles")]
    pub lookback_candles: usize,
    /// Bound of each per-symbol candle queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            lookback_candles: default_lookback_candles(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> TimeFrame {
    TimeFrame::FiveMinutes
}

fn default_lookback_candles() -> usize {
    50
}

fn default_channel_capacity() -> usize {
    256
}

/// Risk limits and martingale sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fractional drawdown from peak balance that halts new opens
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    #[serde(default = "default_max_martingale_steps")]
    pub max_martingale_steps: u32,
    #[serde(default = "default_martingale_multiplier")]
    pub martingale_multiplier: Decimal,
    /// Fraction of balance used at step 0
    #[serde(default = "default_base_position_fraction")]
    pub base_position_fraction: Decimal,
    #[serde(default = "default_take_profit")]
    pub take_profit: Decimal,
    /// Positive magnitude; the position closes below `-stop_loss`
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown: default_max_drawdown(),
            max_martingale_steps: default_max_martingale_steps(),
            martingale_multiplier: default_martingale_multiplier(),
            base_position_fraction: default_base_position_fraction(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_max_drawdown() -> Decimal {
    dec!(0.20)
}

fn default_max_martingale_steps() -> u32 {
    5
}

fn default_martingale_multiplier() -> Decimal {
    dec!(2.0)
}

fn default_base_position_fraction() -> Decimal {
    dec!(0.01)
}

fn default_take_profit() -> Decimal {
    dec!(0.02)
}

fn default_stop_loss() -> Decimal {
    dec!(0.01)
}

fn default_confidence_threshold() -> Decimal {
    dec!(0.7)
}

/// Trade execution and balance-check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// `false` is market-data-only mode
    #[serde(default)]
    pub enabled: bool,
    /// Fail closed when the balance cannot be fetched
    #[serde(default)]
    pub require_balance_check: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_true")]
    pub use_exponential_backoff: bool,
    #[serde(default = "default_balance_timeout_secs")]
    pub balance_timeout_secs: u64,
    #[serde(default = "default_trade_timeout_secs")]
    pub trade_timeout_secs: u64,
}

impl TradingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn balance_timeout(&self) -> Duration {
        Duration::from_secs(self.balance_timeout_secs)
    }

    pub fn trade_timeout(&self) -> Duration {
        Duration::from_secs(self.trade_timeout_secs)
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            require_balance_check: false,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            use_exponential_backoff: true,
            balance_timeout_secs: default_balance_timeout_secs(),
            trade_timeout_secs: default_trade_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_balance_timeout_secs() -> u64 {
    10
}

fn default_trade_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Trend,
    Webhook,
}

/// Signal source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_kind")]
    pub kind: AnalyzerKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            kind: default_analyzer_kind(),
            webhook_url: None,
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_analyzer_kind() -> AnalyzerKind {
    AnalyzerKind::Trend
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Paper exchange and synthetic feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_scenario")]
    pub scenario: MarketScenario,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Opening price of the synthetic walk
    #[serde(default = "default_base_price")]
    pub base_price: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            seed: default_seed(),
            scenario: default_scenario(),
            tick_millis: default_tick_millis(),
            base_price: default_base_price(),
        }
    }
}

fn default_initial_balance() -> Decimal {
    dec!(100)
}

fn default_seed() -> u64 {
    42
}

fn default_scenario() -> MarketScenario {
    MarketScenario::Volatile
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_base_price() -> f64 {
    100.0
}

/// Optional external stores; in-memory stores are used when unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Candles older than this are pruned from Redis
    #[serde(default = "default_candle_retention_hours")]
    pub candle_retention_hours: u64,
}

impl StorageConfig {
    pub fn candle_retention(&self) -> chrono::Duration {
        let hours = self.candle_retention_hours.min(MAX_CANDLE_RETENTION_HOURS);
        chrono::Duration::hours(hours as i64)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            candle_retention_hours: default_candle_retention_hours(),
        }
    }
}

/// Ten years
const MAX_CANDLE_RETENTION_HOURS: u64 = 87_600;

fn default_candle_retention_hours() -> u64 {
    168
}
