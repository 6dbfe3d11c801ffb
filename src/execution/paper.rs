use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::TradeExecutor;
use crate::balance::BalanceSource;
use crate::error::{BotError, Result};
use crate::market_data::CandleStore;
use crate::models::{OrderSide, Symbol};

#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Filled,
    /// Limit order that has not crossed yet
    Open,
    Cancelled,
}

/// Simulated order book entry
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Account {
    balances: HashMap<String, Decimal>,
    orders: Vec<PaperOrder>,
}

/// Paper exchange: balance source and trade executor in one
///
/// Market orders fill immediately at the latest stored close. Limit
/// orders fill if the latest close is at least as good as the limit,
/// otherwise they rest until cancelled.
pub struct PaperExchange {
    candles: Arc<dyn CandleStore>,
    account: Mutex<Account>,
}

impl PaperExchange {
    pub fn new(candles: Arc<dyn CandleStore>) -> Self {
        Self {
            candles,
            account: Mutex::new(Account::default()),
        }
    }

    /// Credit `amount` of `asset` to the account
    pub async fn deposit(&self, asset: &str, amount: Decimal) {
        let mut account = self.account.lock().await;
        *account.balances.entry(asset.to_string()).or_default() += amount;
        tracing::info!(asset, amount = %amount, "Paper deposit");
    }

    pub async fn orders(&self) -> Vec<PaperOrder> {
        self.account.lock().await.orders.clone()
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        self.candles
            .get_latest_candle(symbol)
            .await?
            .map(|c| c.close)
            .ok_or_else(|| BotError::Execution(format!("No market price for {}", symbol)))
    }
}

fn settle(account: &mut Account, pair: &Symbol, side: OrderSide, quantity: Decimal, price: Decimal) -> Result<()> {
    let notional = quantity * price;

    let (debit_asset, debit_amount, credit_asset, credit_amount) = match side {
        OrderSide::Buy => (&pair.quote, notional, &pair.base, quantity),
        OrderSide::Sell => (&pair.base, quantity, &pair.quote, notional),
    };

    let available = account
        .balances
        .get(debit_asset)
        .copied()
        .unwrap_or_default();
    if available < debit_amount {
        return Err(BotError::Execution(format!(
            "Insufficient {} balance: need {}, have {}",
            debit_asset, debit_amount, available
        )));
    }

    *account.balances.entry(debit_asset.clone()).or_default() -= debit_amount;
    *account.balances.entry(credit_asset.clone()).or_default() += credit_amount;
    Ok(())
}

#[async_trait]
impl BalanceSource for PaperExchange {
    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        let account = self.account.lock().await;
        Ok(account.balances.get(asset).copied().unwrap_or_default())
    }
}

#[async_trait]
impl TradeExecutor for PaperExchange {
    async fn execute_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<String> {
        tracing::info!(
            symbol,
            side = side.as_str(),
            quantity = %quantity,
            price = %limit_price.map(|p| p.to_string()).unwrap_or_else(|| "MARKET".to_string()),
            "Executing trade"
        );

        if quantity <= Decimal::ZERO {
            return Err(BotError::Validation("Quantity must be positive".into()));
        }
        if let Some(limit) = limit_price {
            if limit <= Decimal::ZERO {
                return Err(BotError::Validation("Limit price must be positive".into()));
            }
        }

        let pair = Symbol::parse(symbol)?;
        let mark = self.mark_price(symbol).await?;

        let fills = match (side, limit_price) {
            (_, None) => true,
            (OrderSide::Buy, Some(limit)) => mark <= limit,
            (OrderSide::Sell, Some(limit)) => mark >= limit,
        };

        let mut account = self.account.lock().await;
        let id = Uuid::new_v4().to_string();

        let status = if fills {
            settle(&mut account, &pair, side, quantity, mark)?;
            OrderStatus::Filled
        } else {
            OrderStatus::Open
        };

        account.orders.push(PaperOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: if fills { mark } else { limit_price.unwrap_or(mark) },
            status: status.clone(),
            created_at: Utc::now(),
        });

        tracing::info!(order_id = %id, status = ?status, fill_price = %mark, "Trade accepted");

        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut account = self.account.lock().await;

        let Some(order) = account.orders.iter_mut().find(|o| o.id == order_id) else {
            return Err(BotError::Execution(format!("Unknown order {}", order_id)));
        };

        if order.status != OrderStatus::Open {
            tracing::warn!(order_id, status = ?order.status, "Order can no longer be cancelled");
            return Ok(false);
        }

        order.status = OrderStatus::Cancelled;
        tracing::info!(order_id, "Order cancelled");
        Ok(true)
    }
}
