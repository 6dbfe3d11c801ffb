//! Dow-theory style market structure analysis
//!
//! Finds swing highs and lows over the window and compares consecutive
//! swings: higher highs with higher lows read as an uptrend, lower highs
//! with lower lows as a downtrend. Up/down volume confirms the direction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::Analyzer;
use crate::error::Result;
use crate::models::{AnalysisSignal, Candle, Signal};

/// Confidence multiplier when volume disagrees with price structure
const UNCONFIRMED_VOLUME_PENALTY: Decimal = dec!(0.8);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketStructure {
    HigherHighsHigherLows,
    LowerHighsLowerLows,
    Mixed,
}

/// Default in-process analyzer
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    /// Minimum agreeing swing comparisons before calling a trend
    min_confirmations: usize,
}

impl TrendAnalyzer {
    pub fn new(min_confirmations: usize) -> Self {
        Self { min_confirmations }
    }

    /// Structure plus the share of swing comparisons that agree with it
    pub fn market_structure(&self, candles: &[Candle]) -> (MarketStructure, Decimal) {
        if candles.len() < 4 {
            return (MarketStructure::Mixed, Decimal::ZERO);
        }

        let mut swing_highs = Vec::new();
        let mut swing_lows = Vec::new();

        for i in 1..candles.len() - 1 {
            let prev = candles[i - 1].close;
            let curr = candles[i].close;
            let next = candles[i + 1].close;

            if curr > prev && curr > next {
                swing_highs.push(curr);
            }
            if curr < prev && curr < next {
                swing_lows.push(curr);
            }
        }

        let (higher_highs, lower_highs) = count_direction(&swing_highs);
        let (higher_lows, lower_lows) = count_direction(&swing_lows);

        let up = higher_highs + higher_lows;
        let down = lower_highs + lower_lows;
        let total = up + down;

        if total == 0 {
            return (MarketStructure::Mixed, Decimal::ZERO);
        }

        if up > down && up >= self.min_confirmations {
            (
                MarketStructure::HigherHighsHigherLows,
                Decimal::from(up) / Decimal::from(total),
            )
        } else if down > up && down >= self.min_confirmations {
            (
                MarketStructure::LowerHighsLowerLows,
                Decimal::from(down) / Decimal::from(total),
            )
        } else {
            (MarketStructure::Mixed, Decimal::ZERO)
        }
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(3)
    }
}

/// (rising, falling) counts between consecutive swing points
fn count_direction(swings: &[Decimal]) -> (usize, usize) {
    swings.windows(2).fold((0, 0), |(up, down), pair| {
        if pair[1] > pair[0] {
            (up + 1, down)
        } else if pair[1] < pair[0] {
            (up, down + 1)
        } else {
            (up, down)
        }
    })
}

/// Share of volume traded on rising closes, `None` without volume
fn up_volume_ratio(candles: &[Candle]) -> Option<Decimal> {
    let mut up_volume = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;

    for pair in candles.windows(2) {
        let volume = pair[1].volume;
        if pair[1].close > pair[0].close {
            up_volume += volume;
        }
        total_volume += volume;
    }

    if total_volume.is_zero() {
        None
    } else {
        Some(up_volume / total_volume)
    }
}

#[async_trait]
impl Analyzer for TrendAnalyzer {
    async fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<AnalysisSignal> {
        let (structure, confidence) = self.market_structure(candles);
        let up_volume = up_volume_ratio(candles);

        let signal = match structure {
            MarketStructure::HigherHighsHigherLows => {
                let confirmed = up_volume.map_or(true, |r| r >= dec!(0.5));
                let confidence = if confirmed {
                    confidence
                } else {
                    confidence * UNCONFIRMED_VOLUME_PENALTY
                };
                AnalysisSignal::new(
                    Signal::Buy,
                    confidence,
                    format!("Higher highs and higher lows (volume confirmed: {})", confirmed),
                )
            }
            MarketStructure::LowerHighsLowerLows => {
                let confirmed = up_volume.map_or(true, |r| r <= dec!(0.5));
                let confidence = if confirmed {
                    confidence
                } else {
                    confidence * UNCONFIRMED_VOLUME_PENALTY
                };
                AnalysisSignal::new(
                    Signal::Sell,
                    confidence,
                    format!("Lower highs and lower lows (volume confirmed: {})", confirmed),
                )
            }
            MarketStructure::Mixed => AnalysisSignal::hold("No clear market structure"),
        };

        tracing::debug!(
            symbol,
            candles = candles.len(),
            signal = ?signal.signal,
            confidence = %signal.confidence,
            "Trend analysis"
        );

        Ok(signal)
    }

    fn name(&self) -> &str {
        "trend"
    }
}
