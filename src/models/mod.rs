use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BotError, Result};

/// Quote assets recognised by [`Symbol::parse`], longest first
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "USD"];

/// Trading pair such as BTCUSDT
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn parse(symbol: &str) -> Result<Self> {
        let symbol = symbol.trim().to_uppercase();

        for quote in KNOWN_QUOTES {
            if let Some(base) = symbol.strip_suffix(quote) {
                if !base.is_empty() {
                    return Ok(Self {
                        base: base.to_string(),
                        quote: quote.to_string(),
                    });
                }
            }
        }

        Err(BotError::Validation(format!(
            "Unable to parse symbol: {}",
            symbol
        )))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

/// Candle period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl TimeFrame {
    pub fn duration(&self) -> Duration {
        match self {
            TimeFrame::OneMinute => Duration::minutes(1),
            TimeFrame::FiveMinutes => Duration::minutes(5),
            TimeFrame::FifteenMinutes => Duration::minutes(15),
            TimeFrame::ThirtyMinutes => Duration::minutes(30),
            TimeFrame::OneHour => Duration::hours(1),
            TimeFrame::FourHours => Duration::hours(4),
            TimeFrame::OneDay => Duration::days(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::OneMinute => "1m",
            TimeFrame::FiveMinutes => "5m",
            TimeFrame::FifteenMinutes => "15m",
            TimeFrame::ThirtyMinutes => "30m",
            TimeFrame::OneHour => "1h",
            TimeFrame::FourHours => "4h",
            TimeFrame::OneDay => "1d",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(TimeFrame::OneMinute),
            "5m" => Ok(TimeFrame::FiveMinutes),
            "15m" => Ok(TimeFrame::FifteenMinutes),
            "30m" => Ok(TimeFrame::ThirtyMinutes),
            "1h" => Ok(TimeFrame::OneHour),
            "4h" => Ok(TimeFrame::FourHours),
            "1d" => Ok(TimeFrame::OneDay),
            other => Err(BotError::Validation(format!("Unknown timeframe: {}", other))),
        }
    }
}

/// OHLCV candlestick
///
/// Identity is `(symbol, timestamp)`; the timestamp is the period start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timeframe: TimeFrame,
}

impl Candle {
    /// Reject candles that would poison the decision cycle
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(BotError::Validation("Candle has empty symbol".into()));
        }
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(BotError::Validation(format!(
                "Non-positive price in {} candle at {}",
                self.symbol, self.timestamp
            )));
        }
        if self.high < self.low {
            return Err(BotError::Validation(format!(
                "High below low in {} candle at {}",
                self.symbol, self.timestamp
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(BotError::Validation(format!(
                "Negative volume in {} candle at {}",
                self.symbol, self.timestamp
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Buy" => Ok(OrderSide::Buy),
            "Sell" => Ok(OrderSide::Sell),
            other => Err(BotError::Validation(format!("Unknown order side: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TakeProfit",
            ExitReason::StopLoss => "StopLoss",
        }
    }
}

impl FromStr for ExitReason {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TakeProfit" => Ok(ExitReason::TakeProfit),
            "StopLoss" => Ok(ExitReason::StopLoss),
            other => Err(BotError::Validation(format!("Unknown exit reason: {}", other))),
        }
    }
}

/// Position in the traded symbol
///
/// Created on open, updated on close, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub side: OrderSide,
    pub martingale_step: u32,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_open: bool,
    pub realized_pnl: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub entry_order_id: String,
    pub exit_order_id: Option<String>,
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        entry_price: Decimal,
        martingale_step: u32,
        entry_order_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            quantity,
            entry_price,
            current_price: entry_price,
            side,
            martingale_step,
            opened_at: Utc::now(),
            closed_at: None,
            is_open: true,
            realized_pnl: None,
            exit_reason: None,
            entry_order_id: entry_order_id.into(),
            exit_order_id: None,
        }
    }

    /// Side-aware P&L at `price`
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        let pnl = (price - self.entry_price) * self.quantity;
        match self.side {
            OrderSide::Buy => pnl,
            OrderSide::Sell => -pnl,
        }
    }

    /// Cost basis of the position (entry price times quantity)
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Mark the position closed at `exit_price`
    pub fn close(&mut self, exit_price: Decimal, reason: ExitReason, exit_order_id: String) {
        self.realized_pnl = Some(self.unrealized_pnl(exit_price));
        self.current_price = exit_price;
        self.closed_at = Some(Utc::now());
        self.is_open = false;
        self.exit_reason = Some(reason);
        self.exit_order_id = Some(exit_order_id);
    }
}

/// Trading signal kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl FromStr for Signal {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            "HOLD" => Ok(Signal::Hold),
            other => Err(BotError::Analyzer(format!("Unknown signal: {}", other))),
        }
    }
}

/// Point-in-time analyzer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSignal {
    pub signal: Signal,
    pub confidence: Decimal,
    pub reason: String,
}

impl AnalysisSignal {
    /// Confidence is clamped into [0, 1]
    pub fn new(signal: Signal, confidence: Decimal, reason: impl Into<String>) -> Self {
        Self {
            signal,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(Signal::Hold, Decimal::ZERO, reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotStatus::Stopped => "Stopped",
            BotStatus::Starting => "Starting",
            BotStatus::Running => "Running",
            BotStatus::Error => "Error",
        };
        f.write_str(s)
    }
}
