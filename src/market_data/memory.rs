use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::CandleStore;
use crate::error::{BotError, Result};
use crate::models::Candle;

/// Thread-safe in-memory candle store
///
/// Keeps an ordered map of candles per symbol keyed by timestamp. When
/// `max_candles` is set, the oldest candles are evicted past that size.
#[derive(Clone, Default)]
pub struct InMemoryCandleStore {
    data: Arc<RwLock<HashMap<String, BTreeMap<DateTime<Utc>, Candle>>>>,
    max_candles: Option<usize>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounded store keeping at most `max_candles` per symbol
    pub fn with_capacity(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles: Some(max_candles),
        }
    }

    /// Number of stored candles for a symbol
    pub fn candle_count(&self, symbol: &str) -> Result<usize> {
        let data = self.data.read().map_err(|e| BotError::Storage(e.to_string()))?;
        Ok(data.get(symbol).map(|c| c.len()).unwrap_or(0))
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn save_candle(&self, candle: &Candle) -> Result<bool> {
        let mut data = self.data.write().map_err(|e| BotError::Storage(e.to_string()))?;

        let symbol_candles = data.entry(candle.symbol.clone()).or_default();

        if symbol_candles.contains_key(&candle.timestamp) {
            return Ok(false);
        }
        symbol_candles.insert(candle.timestamp, candle.clone());

        if let Some(max) = self.max_candles {
            while symbol_candles.len() > max {
                symbol_candles.pop_first();
            }
        }

        Ok(true)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if from > to {
            return Ok(Vec::new());
        }

        let data = self.data.read().map_err(|e| BotError::Storage(e.to_string()))?;

        Ok(data
            .get(symbol)
            .map(|candles| candles.range(from..=to).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_latest_candle(&self, symbol: &str) -> Result<Option<Candle>> {
        let data = self.data.read().map_err(|e| BotError::Storage(e.to_string()))?;

        Ok(data
            .get(symbol)
            .and_then(|candles| candles.last_key_value())
            .map(|(_, c)| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeFrame;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn create_test_candle(symbol: &str, minutes: i64, close: Decimal) -> Candle {
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Candle {
            symbol: symbol.to_string(),
            timestamp: base + Duration::minutes(minutes),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000),
            timeframe: TimeFrame::OneMinute,
        }
    }

    #[tokio::test]
    async fn test_duplicate_candle_keeps_first_write() {
        let store = InMemoryCandleStore::new();

        let first = create_test_candle("BTCUSDT", 0, dec!(100));
        let duplicate = create_test_candle("BTCUSDT", 0, dec!(105));

        assert!(store.save_candle(&first).await.unwrap());
        assert!(!store.save_candle(&duplicate).await.unwrap());

        assert_eq!(store.candle_count("BTCUSDT").unwrap(), 1);
        let latest = store.get_latest_candle("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(latest.close, dec!(100));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_keep_one() {
        let store = InMemoryCandleStore::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let candle = create_test_candle("BTCUSDT", 5, Decimal::from(100 + i));
                    store.save_candle(&candle).await.unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.candle_count("BTCUSDT").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_query_is_ordered_and_inclusive() {
        let store = InMemoryCandleStore::new();

        // insert out of order
        for minute in [3, 0, 2, 1, 4] {
            store
                .save_candle(&create_test_candle("BTCUSDT", minute, Decimal::from(100 + minute)))
                .await
                .unwrap();
        }

        let all = store.get_candles("BTCUSDT", DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await.unwrap();
        let closes: Vec<_> = all.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)]);

        let from = all[1].timestamp;
        let to = all[3].timestamp;
        let window = store.get_candles("BTCUSDT", from, to).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].close, dec!(101));
        assert_eq!(window[2].close, dec!(103));
    }

    #[tokio::test]
    async fn test_latest_and_unknown_symbol() {
        let store = InMemoryCandleStore::new();
        assert!(store.get_latest_candle("BTCUSDT").await.unwrap().is_none());

        store.save_candle(&create_test_candle("BTCUSDT", 1, dec!(101))).await.unwrap();
        store.save_candle(&create_test_candle("BTCUSDT", 0, dec!(100))).await.unwrap();

        let latest = store.get_latest_candle("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(latest.close, dec!(101));
        assert!(store.get_latest_candle("ETHUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryCandleStore::with_capacity(5);

        for minute in 0..10 {
            store
                .save_candle(&create_test_candle("BTCUSDT", minute, Decimal::from(100 + minute)))
                .await
                .unwrap();
        }

        assert_eq!(store.candle_count("BTCUSDT").unwrap(), 5);
        let all = store.get_candles("BTCUSDT", DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await.unwrap();
        assert_eq!(all[0].close, dec!(105));
        assert_eq!(all[4].close, dec!(109));
    }
}
