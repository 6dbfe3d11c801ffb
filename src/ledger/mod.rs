// Position ledger: the single source of truth for open/closed positions
pub mod memory;

pub use memory::InMemoryPositionStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{BotError, Result};
use crate::models::Position;

/// Storage backend for positions
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>>;

    /// Insert if new, else update in place (keyed by position id)
    async fn save_position(&self, position: &Position) -> Result<()>;

    /// All positions, oldest first
    async fn list_positions(&self) -> Result<Vec<Position>>;
}

/// Enforces at most one open position per symbol on top of a store
///
/// Holds no position state of its own: every read goes to the store so a
/// decision cycle always starts from persisted state.
#[derive(Clone)]
pub struct PositionLedger {
    store: Arc<dyn PositionStore>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self { store }
    }

    pub async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>> {
        self.store.get_open_position(symbol).await
    }

    /// Upsert `position`, rejecting a second open position for its symbol
    pub async fn save(&self, position: &Position) -> Result<()> {
        if position.is_open {
            if let Some(existing) = self.store.get_open_position(&position.symbol).await? {
                if existing.id != position.id {
                    return Err(BotError::Validation(format!(
                        "Already have open position {} for {}",
                        existing.id, position.symbol
                    )));
                }
            }
        }

        self.store.save_position(position).await?;

        tracing::debug!(
            position_id = %position.id,
            symbol = %position.symbol,
            is_open = position.is_open,
            "Saved position"
        );

        Ok(())
    }

    pub async fn all_positions(&self) -> Result<Vec<Position>> {
        self.store.list_positions().await
    }

    /// Most recently closed position for `symbol`
    pub async fn last_closed_position(&self, symbol: &str) -> Result<Option<Position>> {
        let positions = self.store.list_positions().await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.symbol == symbol && !p.is_open)
            .max_by_key(|p| p.closed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, OrderSide};
    use rust_decimal_macros::dec;

    fn ledger() -> PositionLedger {
        PositionLedger::new(Arc::new(InMemoryPositionStore::new()))
    }

    #[tokio::test]
    async fn test_save_and_get_open_position() {
        let ledger = ledger();
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(0.1), dec!(100), 0, "o1");

        ledger.save(&position).await.unwrap();

        let open = ledger.get_open_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(open.id, position.id);
        assert!(ledger.get_open_position("ETHUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prevent_second_open_position() {
        let ledger = ledger();
        ledger
            .save(&Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 0, "o1"))
            .await
            .unwrap();

        let result = ledger
            .save(&Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(105), 0, "o2"))
            .await;

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Already have open position"));
        assert_eq!(ledger.all_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_in_place_on_close() {
        let ledger = ledger();
        let mut position = Position::open("BTCUSDT", OrderSide::Buy, dec!(2), dec!(100), 1, "o1");
        ledger.save(&position).await.unwrap();

        position.current_price = dec!(101);
        ledger.save(&position).await.unwrap();
        assert_eq!(
            ledger.get_open_position("BTCUSDT").await.unwrap().unwrap().current_price,
            dec!(101)
        );

        position.close(dec!(110), ExitReason::TakeProfit, "o2".into());
        ledger.save(&position).await.unwrap();

        assert!(ledger.get_open_position("BTCUSDT").await.unwrap().is_none());
        let all = ledger.all_positions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].realized_pnl, Some(dec!(20)));

        // a new open is allowed once the previous one is closed
        ledger
            .save(&Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(110), 0, "o3"))
            .await
            .unwrap();
        assert_eq!(ledger.all_positions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_closed_position() {
        let ledger = ledger();
        assert!(ledger.last_closed_position("BTCUSDT").await.unwrap().is_none());

        let mut first = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 0, "o1");
        first.close(dec!(98), ExitReason::StopLoss, "o2".into());
        ledger.save(&first).await.unwrap();

        let mut second = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(98), 1, "o3");
        second.close(dec!(96), ExitReason::StopLoss, "o4".into());
        ledger.save(&second).await.unwrap();

        let last = ledger.last_closed_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(last.id, second.id);
        assert_eq!(last.martingale_step, 1);
    }
}
