// Martingale decision engine
pub mod engine;
pub mod martingale;

pub use engine::{DecisionEngine, EngineSettings};
pub use martingale::MartingaleState;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Candle, ExitReason};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    Opened {
        position_id: Uuid,
        quantity: Decimal,
        step: u32,
    },
    Closed {
        position_id: Uuid,
        exit_reason: ExitReason,
        pnl: Decimal,
        next_step: u32,
    },
    Held {
        unrealized_pnl: Decimal,
    },
    Skipped,
}

/// Result of one decision cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub action: CycleAction,
    pub reason: String,
}

impl CycleOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            action: CycleAction::Skipped,
            reason: reason.into(),
        }
    }
}

/// Consumer of ordered, validated candles for one symbol at a time
#[async_trait]
pub trait CandleHandler: Send + Sync {
    async fn on_candle(&self, candle: &Candle) -> Result<CycleOutcome>;
}
