use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::Analyzer;
use crate::error::{BotError, Result};
use crate::models::{AnalysisSignal, Candle, Signal, TimeFrame};

// Type alias for the rate limiter to simplify signatures
type WebhookRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Request body posted to the workflow webhook
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest<'a> {
    symbol: &'a str,
    time_frame: &'a str,
    candles: Vec<CandleData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandleData {
    timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

/// Response from the workflow webhook
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    #[serde(default)]
    symbol: Option<String>,
    signal: String,
    confidence: Decimal,
    #[serde(default)]
    reason: Option<String>,
}

/// Analyzer delegating to an external workflow (e.g. an n8n webhook)
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct WebhookAnalyzer {
    client: Client,
    url: String,
    timeframe: TimeFrame,
    rate_limiter: Arc<WebhookRateLimiter>,
}

impl WebhookAnalyzer {
    pub fn new(
        url: impl Into<String>,
        timeframe: TimeFrame,
        requests_per_minute: u32,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        let rpm = NonZeroU32::new(requests_per_minute).ok_or_else(|| {
            BotError::Configuration("requests_per_minute must be positive".into())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            url: url.into(),
            timeframe,
            rate_limiter,
        })
    }
}

#[async_trait]
impl Analyzer for WebhookAnalyzer {
    async fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<AnalysisSignal> {
        self.rate_limiter.until_ready().await;

        let request = AnalysisRequest {
            symbol,
            time_frame: self.timeframe.as_str(),
            candles: candles
                .iter()
                .map(|c| CandleData {
                    timestamp: c.timestamp,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                })
                .collect(),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Analyzer(format!(
                "Webhook returned {} for {}",
                status, symbol
            )));
        }

        let body: AnalysisResponse = response.json().await?;

        if let Some(ref echoed) = body.symbol {
            if !echoed.is_empty() && echoed != symbol {
                return Err(BotError::Analyzer(format!(
                    "Webhook answered for {} instead of {}",
                    echoed, symbol
                )));
            }
        }

        let signal: Signal = body.signal.parse()?;
        let reason = body.reason.unwrap_or_default();

        tracing::info!(
            symbol,
            signal = ?signal,
            confidence = %body.confidence,
            reason = %reason,
            "Received analysis result"
        );

        Ok(AnalysisSignal::new(signal, body.confidence, reason))
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
