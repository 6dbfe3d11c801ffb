// Signal sources consulted by the decision engine
pub mod trend;
pub mod webhook;

pub use trend::TrendAnalyzer;
pub use webhook::WebhookAnalyzer;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AnalysisSignal, Candle};

/// Produces a point-in-time signal from recent candles (oldest first)
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<AnalysisSignal>;

    fn name(&self) -> &str;
}
