use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{CandleStream, MarketDataFeed};
use crate::error::{BotError, Result};
use crate::models::{Candle, TimeFrame};

const STREAM_CAPACITY: usize = 64;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketScenario {
    /// Steady uptrend with noise
    Uptrend,
    /// Steady downtrend with noise
    Downtrend,
    /// Mean-reverting chop around the start price
    Sideways,
    /// Large swings (±5% per candle)
    Volatile,
}

/// Seeded random walk producing one candle per step
pub struct SyntheticDataGenerator {
    rng: StdRng,
    scenario: MarketScenario,
    base_price: f64,
    current_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64, scenario: MarketScenario, base_price: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scenario,
            base_price,
            current_price: base_price,
            base_volume: 1_000_000.0,
        }
    }

    /// Advance the walk one step and build the candle opening at `timestamp`
    pub fn next_candle(
        &mut self,
        symbol: &str,
        timeframe: TimeFrame,
        timestamp: DateTime<Utc>,
    ) -> Candle {
        let open = self.current_price;

        let change = match self.scenario {
            MarketScenario::Uptrend => {
                open * 0.001 + open * self.rng.gen_range(-0.001..0.001)
            }
            MarketScenario::Downtrend => {
                -open * 0.001 + open * self.rng.gen_range(-0.001..0.001)
            }
            MarketScenario::Sideways => {
                (self.base_price - open) * 0.1 + open * self.rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => open * self.rng.gen_range(-0.05..0.05),
        };

        // Keep the walk away from zero
        let close = (open + change).max(self.base_price * 0.5);
        self.current_price = close;

        let wick = close * self.rng.gen_range(0.0..0.002);
        let high = open.max(close) + wick;
        let low = (open.min(close) - wick).max(self.base_price * 0.25);
        let volume = self.base_volume * self.rng.gen_range(0.5..1.5);

        Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: to_decimal(open),
            high: to_decimal(high),
            low: to_decimal(low),
            close: to_decimal(close),
            volume: to_decimal(volume),
            timeframe,
        }
    }

    /// Generate `count` consecutive candles ending at the current period
    pub fn generate(&mut self, symbol: &str, timeframe: TimeFrame, count: usize) -> Vec<Candle> {
        let start = Utc::now() - timeframe.duration() * count as i32;
        (0..count)
            .map(|i| self.next_candle(symbol, timeframe, start + timeframe.duration() * i as i32))
            .collect()
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(4)
}

/// Paper-trading feed emitting a synthetic candle every tick
///
/// Candle timestamps advance by the subscribed timeframe regardless of the
/// wall-clock tick, so a fast tick replays many periods quickly.
pub struct SyntheticFeed {
    seed: u64,
    scenario: MarketScenario,
    base_price: f64,
    tick: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticFeed {
    pub fn new(seed: u64, scenario: MarketScenario, tick: Duration) -> Self {
        Self {
            seed,
            scenario,
            base_price: 100.0,
            tick,
            task: Mutex::new(None),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }
}

#[async_trait]
impl MarketDataFeed for SyntheticFeed {
    async fn subscribe(&self, symbol: &str, timeframe: TimeFrame) -> Result<CandleStream> {
        let mut task = self
            .task
            .lock()
            .map_err(|e| BotError::Feed(e.to_string()))?;

        if task.is_some() {
            return Err(BotError::Feed("Synthetic feed already subscribed".into()));
        }

        let (tx, stream) = CandleStream::channel(STREAM_CAPACITY);
        let mut generator = SyntheticDataGenerator::new(self.seed, self.scenario, self.base_price);
        let symbol = symbol.to_string();
        let tick = self.tick;

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut timestamp = Utc::now();

            loop {
                interval.tick().await;
                let candle = generator.next_candle(&symbol, timeframe, timestamp);
                timestamp += timeframe.duration();

                if tx.send(candle).await.is_err() {
                    tracing::debug!(symbol = %symbol, "Candle stream dropped, stopping synthetic feed");
                    break;
                }
            }
        }));

        tracing::info!(scenario = ?self.scenario, "Synthetic feed subscribed");

        Ok(stream)
    }

    async fn unsubscribe(&self) -> Result<()> {
        let handle = self
            .task
            .lock()
            .map_err(|e| BotError::Feed(e.to_string()))?
            .take();

        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Synthetic feed unsubscribed");
        }

        Ok(())
    }
}
