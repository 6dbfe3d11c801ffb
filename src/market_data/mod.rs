// Market data: candle persistence and the live feed abstraction
pub mod memory;
pub mod synthetic;

pub use memory::InMemoryCandleStore;
pub use synthetic::{MarketScenario, SyntheticDataGenerator, SyntheticFeed};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{Candle, TimeFrame};

/// Candle persistence
///
/// `save_candle` is idempotent on `(symbol, timestamp)`: the first write
/// wins and later duplicates are suppressed, never overwritten.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Returns `true` if the candle was inserted, `false` if it already existed
    async fn save_candle(&self, candle: &Candle) -> Result<bool>;

    /// Candles with `from <= timestamp <= to`, oldest first
    async fn get_candles(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn get_latest_candle(&self, symbol: &str) -> Result<Option<Candle>>;
}

/// Lazy, unbounded sequence of candles from a subscription
///
/// Ends (`next` returns `None`) once the feed side is dropped.
pub struct CandleStream {
    rx: mpsc::Receiver<Candle>,
}

impl CandleStream {
    pub fn new(rx: mpsc::Receiver<Candle>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/stream pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<Candle>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    pub async fn next(&mut self) -> Option<Candle> {
        self.rx.recv().await
    }
}

/// Real-time candle source
///
/// Delivery may contain duplicates or arrive out of order; the pipeline
/// is responsible for tolerating both.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    async fn subscribe(&self, symbol: &str, timeframe: TimeFrame) -> Result<CandleStream>;

    async fn unsubscribe(&self) -> Result<()>;
}
