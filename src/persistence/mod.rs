use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::error::{BotError, Result};
use crate::market_data::CandleStore;
use crate::models::Candle;

/// Redis candle store
///
/// Per symbol, `candles:{symbol}:data` is a hash of timestamp (ms) to the
/// candle as JSON, written with HSETNX so the first write wins.
/// `candles:{symbol}:index` is a sorted set of the same timestamps, scored
/// by time, for range and latest queries.
#[derive(Clone)]
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

fn data_key(symbol: &str) -> String {
    format!("candles:{}:data", symbol)
}

fn index_key(symbol: &str) -> String {
    format!("candles:{}:index", symbol)
}

impl RedisCandleStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| BotError::Storage("Redis connection timeout after 5 seconds".into()))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    async fn load(&self, symbol: &str, fields: &[String]) -> Result<Vec<Candle>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(data_key(symbol))
            .arg(fields)
            .query_async(&mut conn)
            .await?;

        values
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(BotError::from))
            .collect()
    }

    /// Delete candles older than `cutoff`, returns how many were removed
    pub async fn prune_before(&self, symbol: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let max_score = cutoff.timestamp_millis() - 1;

        let stale: Vec<String> = conn
            .zrangebyscore(index_key(symbol), "-inf", max_score)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        conn.hdel::<_, _, ()>(data_key(symbol), &stale).await?;
        conn.zrem::<_, _, ()>(index_key(symbol), &stale).await?;

        tracing::debug!(symbol, removed = stale.len(), "Pruned old candles from Redis");

        Ok(stale.len())
    }
}

#[async_trait]
impl CandleStore for RedisCandleStore {
    async fn save_candle(&self, candle: &Candle) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ts = candle.timestamp.timestamp_millis();
        let value = serde_json::to_string(candle)?;

        let inserted: bool = conn
            .hset_nx(data_key(&candle.symbol), ts, value)
            .await?;

        // Idempotent, also repairs the index if a previous write stopped halfway
        conn.zadd::<_, _, _, ()>(index_key(&candle.symbol), ts, ts)
            .await?;

        Ok(inserted)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = conn
            .zrangebyscore(
                index_key(symbol),
                from.timestamp_millis(),
                to.timestamp_millis(),
            )
            .await?;

        self.load(symbol, &fields).await
    }

    async fn get_latest_candle(&self, symbol: &str) -> Result<Option<Candle>> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = conn.zrevrange(index_key(symbol), 0, 0).await?;

        Ok(self.load(symbol, &fields).await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeFrame;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn candle(symbol: &str, ts: DateTime<Utc>) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(3),
            timeframe: TimeFrame::OneMinute,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_duplicate_keeps_first_write() {
        let store = RedisCandleStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let symbol = format!("T{}USDT", Uuid::new_v4().simple());
        let ts = Utc::now();

        let first = candle(&symbol, ts);
        let mut second = candle(&symbol, ts);
        second.close = dec!(999);

        assert!(store.save_candle(&first).await.unwrap());
        assert!(!store.save_candle(&second).await.unwrap());

        let latest = store.get_latest_candle(&symbol).await.unwrap().unwrap();
        assert_eq!(latest.close, dec!(100.5));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_range_query_and_prune() {
        let store = RedisCandleStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let symbol = format!("T{}USDT", Uuid::new_v4().simple());
        let start = Utc::now();

        for minute in 0..5 {
            store
                .save_candle(&candle(&symbol, start + chrono::Duration::minutes(minute)))
                .await
                .unwrap();
        }

        let range = store
            .get_candles(
                &symbol,
                start + chrono::Duration::minutes(1),
                start + chrono::Duration::minutes(3),
            )
            .await
            .unwrap();
        assert_eq!(range.len(), 3);
        assert!(range.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let removed = store
            .prune_before(&symbol, start + chrono::Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }
}
