// Order execution
pub mod paper;

pub use paper::PaperExchange;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::OrderSide;

/// Places and cancels orders on an exchange
///
/// `execute_trade` returns the exchange order id once the order is
/// accepted; a rejection is an execution error.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<String>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool>;
}
