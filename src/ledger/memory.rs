use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PositionStore;
use crate::error::Result;
use crate::models::Position;

/// Process-local position store
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<Vec<Position>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with previously loaded positions
    pub fn with_positions(positions: Vec<Position>) -> Self {
        Self {
            positions: RwLock::new(positions),
        }
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .find(|p| p.symbol == symbol && p.is_open)
            .cloned())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.write().await;
        match positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position.clone(),
            None => positions.push(position.clone()),
        }
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.clone())
    }
}
