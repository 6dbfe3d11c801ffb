use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{CandleHandler, CycleAction, CycleOutcome, MartingaleState};
use crate::analysis::Analyzer;
use crate::balance::BalanceQuery;
use crate::config::AppConfig;
use crate::error::{BotError, Result};
use crate::execution::TradeExecutor;
use crate::ledger::PositionLedger;
use crate::market_data::CandleStore;
use crate::models::{Candle, ExitReason, OrderSide, Position, Signal, Symbol, TimeFrame};
use crate::risk::{DrawdownTracker, RiskGate};

/// Decimal places kept on order quantities
const QUANTITY_DECIMALS: u32 = 8;

/// Thresholds and timing for decision cycles
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// A Buy must be strictly above this to open
    pub confidence_threshold: Decimal,
    pub take_profit: Decimal,
    /// Positive fraction; closes when P&L percent drops below its negation
    pub stop_loss: Decimal,
    pub lookback_candles: usize,
    pub timeframe: TimeFrame,
    pub trade_timeout: Option<Duration>,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            confidence_threshold: config.risk.confidence_threshold,
            take_profit: config.risk.take_profit,
            stop_loss: config.risk.stop_loss,
            lookback_candles: config.bot.lookback_candles,
            timeframe: config.bot.timeframe,
            trade_timeout: Some(config.trading.trade_timeout()),
        }
    }
}

/// Per-symbol decision state, checked out for the whole of one cycle
struct SymbolContext {
    martingale: Option<MartingaleState>,
    drawdown: Option<DrawdownTracker>,
}

/// Martingale strategy state machine
///
/// Flat (no open position) and Holding (one open position) are read from
/// the ledger at the start of every cycle; nothing about the position is
/// cached between cycles. The martingale step and drawdown peak live in a
/// per-symbol context whose lock is held from the ledger read until the
/// ledger write, so two cycles for one symbol never interleave.
pub struct DecisionEngine {
    settings: EngineSettings,
    risk: RiskGate,
    ledger: PositionLedger,
    balance: BalanceQuery,
    executor: Arc<dyn TradeExecutor>,
    analyzer: Arc<dyn Analyzer>,
    candles: Arc<dyn CandleStore>,
    contexts: Mutex<HashMap<String, Arc<Mutex<SymbolContext>>>>,
}

impl DecisionEngine {
    pub fn new(
        settings: EngineSettings,
        risk: RiskGate,
        ledger: PositionLedger,
        balance: BalanceQuery,
        executor: Arc<dyn TradeExecutor>,
        analyzer: Arc<dyn Analyzer>,
        candles: Arc<dyn CandleStore>,
    ) -> Self {
        Self {
            settings,
            risk,
            ledger,
            balance,
            executor,
            analyzer,
            candles,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Step the next open for `symbol` would use, once known
    pub async fn martingale_step(&self, symbol: &str) -> Option<u32> {
        let context = self.contexts.lock().await.get(symbol).cloned()?;
        let ctx = context.lock().await;
        ctx.martingale.as_ref().map(|m| m.step())
    }

    async fn context_for(&self, symbol: &str) -> Arc<Mutex<SymbolContext>> {
        let mut contexts = self.contexts.lock().await;
        contexts
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SymbolContext {
                    martingale: None,
                    drawdown: None,
                }))
            })
            .clone()
    }

    /// Run one decision cycle for `candle`
    pub async fn process_candle(&self, candle: &Candle) -> Result<CycleOutcome> {
        let context = self.context_for(&candle.symbol).await;
        let mut ctx = context.lock().await;

        let open = self.ledger.get_open_position(&candle.symbol).await?;

        if ctx.martingale.is_none() {
            let last_closed = self.ledger.last_closed_position(&candle.symbol).await?;
            let restored = MartingaleState::restore(&self.risk, open.as_ref(), last_closed.as_ref());
            tracing::info!(
                symbol = %candle.symbol,
                step = restored.step(),
                "Restored martingale step"
            );
            ctx.martingale = Some(restored);
        }

        match open {
            Some(position) => self.manage_position(&mut ctx, position, candle).await,
            None => self.evaluate_entry(&mut ctx, candle).await,
        }
    }

    /// Flat state: open on a confident Buy when risk allows
    async fn evaluate_entry(&self, ctx: &mut SymbolContext, candle: &Candle) -> Result<CycleOutcome> {
        if candle.close <= Decimal::ZERO {
            return Ok(CycleOutcome::skipped("Non-positive close"));
        }

        let window = self.analysis_window(candle).await?;
        let analysis = self.analyzer.analyze(&candle.symbol, &window).await?;

        if analysis.signal != Signal::Buy || analysis.confidence <= self.settings.confidence_threshold {
            tracing::debug!(
                symbol = %candle.symbol,
                signal = ?analysis.signal,
                confidence = %analysis.confidence,
                "No qualifying buy signal"
            );
            return Ok(CycleOutcome::skipped(format!(
                "{:?} at confidence {}: {}",
                analysis.signal, analysis.confidence, analysis.reason
            )));
        }

        let step = ctx.martingale.as_ref().map_or(0, |m| m.step());

        if !self.balance.config().trading_enabled {
            tracing::info!(symbol = %candle.symbol, "Trading disabled, not opening");
            return Ok(CycleOutcome::skipped("Trading disabled"));
        }

        let quote = Symbol::parse(&candle.symbol)?.quote;
        let balance = self.balance.get_available_balance(&quote).await?;

        let drawdown = ctx
            .drawdown
            .get_or_insert_with(|| DrawdownTracker::new(balance))
            .observe(balance);

        if !self.risk.can_open_position(balance, drawdown) {
            tracing::warn!(
                symbol = %candle.symbol,
                balance = %balance,
                drawdown = %drawdown,
                "Risk gate refused new position"
            );
            return Ok(CycleOutcome::skipped(format!(
                "Risk gate refused (balance {}, drawdown {})",
                balance, drawdown
            )));
        }

        let size = self.risk.calculate_position_size(balance, step);
        if size <= Decimal::ZERO {
            tracing::warn!(symbol = %candle.symbol, step, "Martingale step cap reached");
            return Ok(CycleOutcome::skipped(format!("Step cap reached at step {}", step)));
        }

        let quantity = (size / candle.close).round_dp(QUANTITY_DECIMALS);
        if quantity <= Decimal::ZERO {
            return Ok(CycleOutcome::skipped("Position size rounds to zero"));
        }

        let order_id = self.submit(&candle.symbol, OrderSide::Buy, quantity).await?;

        let position = Position::open(
            candle.symbol.clone(),
            OrderSide::Buy,
            quantity,
            candle.close,
            step,
            order_id.clone(),
        );

        if let Err(e) = self.ledger.save(&position).await {
            tracing::error!(
                symbol = %candle.symbol,
                order_id = %order_id,
                error = %e,
                "Entry order filled but position could not be recorded"
            );
            return Err(BotError::Inconsistency(format!(
                "Order {} for {} filled but not recorded: {}",
                order_id, candle.symbol, e
            )));
        }

        tracing::info!(
            symbol = %candle.symbol,
            position_id = %position.id,
            quantity = %quantity,
            price = %candle.close,
            step,
            confidence = %analysis.confidence,
            "Opened position"
        );

        Ok(CycleOutcome {
            action: CycleAction::Opened {
                position_id: position.id,
                quantity,
                step,
            },
            reason: analysis.reason,
        })
    }

    /// Holding state: close on take-profit or stop-loss, else mark to market
    async fn manage_position(
        &self,
        ctx: &mut SymbolContext,
        mut position: Position,
        candle: &Candle,
    ) -> Result<CycleOutcome> {
        let price = candle.close;
        let notional = position.notional();

        if price <= Decimal::ZERO || notional <= Decimal::ZERO {
            return Ok(CycleOutcome::skipped("Zero price or notional"));
        }

        let pnl = position.unrealized_pnl(price);
        let pnl_percent = pnl / notional;

        // Take-profit wins if misconfigured thresholds overlap
        let exit_reason = if pnl_percent > self.settings.take_profit {
            Some(ExitReason::TakeProfit)
        } else if pnl_percent < -self.settings.stop_loss {
            Some(ExitReason::StopLoss)
        } else {
            None
        };

        let Some(exit_reason) = exit_reason else {
            position.current_price = price;
            self.ledger.save(&position).await?;
            tracing::debug!(
                symbol = %candle.symbol,
                price = %price,
                pnl_percent = %pnl_percent,
                "Holding position"
            );
            return Ok(CycleOutcome {
                action: CycleAction::Held { unrealized_pnl: pnl },
                reason: format!("P&L {}% within thresholds", (pnl_percent * Decimal::ONE_HUNDRED).round_dp(2)),
            });
        };

        let order_id = self
            .submit(&candle.symbol, position.side.opposite(), position.quantity)
            .await?;

        position.close(price, exit_reason, order_id.clone());

        if let Err(e) = self.ledger.save(&position).await {
            tracing::error!(
                symbol = %candle.symbol,
                position_id = %position.id,
                order_id = %order_id,
                error = %e,
                "Exit order filled but position close could not be recorded"
            );
            return Err(BotError::Inconsistency(format!(
                "Exit order {} for position {} filled but not recorded: {}",
                order_id, position.id, e
            )));
        }

        let martingale = ctx
            .martingale
            .get_or_insert_with(|| MartingaleState::new(self.risk.max_martingale_steps()));
        martingale.record_close(&self.risk, pnl);
        let next_step = martingale.step();

        tracing::info!(
            symbol = %candle.symbol,
            position_id = %position.id,
            reason = exit_reason.as_str(),
            pnl = %pnl,
            pnl_percent = %pnl_percent,
            next_step,
            "Closed position"
        );

        Ok(CycleOutcome {
            action: CycleAction::Closed {
                position_id: position.id,
                exit_reason,
                pnl,
                next_step,
            },
            reason: format!("{} at {}", exit_reason.as_str(), price),
        })
    }

    /// Recent candles up to and including `candle`, oldest first
    async fn analysis_window(&self, candle: &Candle) -> Result<Vec<Candle>> {
        let span = self.settings.lookback_candles.saturating_sub(1) as i32;
        let from = candle.timestamp - self.settings.timeframe.duration() * span;

        let mut window = self
            .candles
            .get_candles(&candle.symbol, from, candle.timestamp)
            .await?;

        if window.last().map(|c| c.timestamp) != Some(candle.timestamp) {
            window.push(candle.clone());
        }

        Ok(window)
    }

    async fn submit(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<String> {
        let call = self.executor.execute_trade(symbol, side, quantity, None);

        match self.settings.trade_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                BotError::Timeout(format!(
                    "{} {} {} not confirmed within {:?}",
                    side.as_str(),
                    quantity,
                    symbol,
                    limit
                ))
            })?,
            None => call.await,
        }
    }
}

#[async_trait]
impl CandleHandler for DecisionEngine {
    async fn on_candle(&self, candle: &Candle) -> Result<CycleOutcome> {
        self.process_candle(candle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{BalanceQueryConfig, BalanceSource};
    use crate::config::{RiskConfig, TradingConfig};
    use crate::execution::PaperExchange;
    use crate::ledger::{InMemoryPositionStore, PositionStore};
    use crate::market_data::InMemoryCandleStore;
    use crate::models::AnalysisSignal;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FixedAnalyzer(AnalysisSignal);

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        async fn analyze(&self, _symbol: &str, _candles: &[Candle]) -> Result<AnalysisSignal> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct RejectingExecutor;

    #[async_trait]
    impl TradeExecutor for RejectingExecutor {
        async fn execute_trade(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _quantity: Decimal,
            _limit_price: Option<Decimal>,
        ) -> Result<String> {
            Err(BotError::Execution("rejected".into()))
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<bool> {
            Ok(false)
        }
    }

    /// Reads succeed, writes fail
    struct ReadOnlyStore;

    #[async_trait]
    impl PositionStore for ReadOnlyStore {
        async fn get_open_position(&self, _symbol: &str) -> Result<Option<Position>> {
            Ok(None)
        }

        async fn save_position(&self, _position: &Position) -> Result<()> {
            Err(BotError::Storage("disk full".into()))
        }

        async fn list_positions(&self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        engine: DecisionEngine,
        exchange: Arc<PaperExchange>,
        candles: Arc<InMemoryCandleStore>,
    }

    impl Harness {
        async fn candle(&self, close: Decimal) -> Candle {
            let candle = Candle {
                symbol: "BTCUSDT".to_string(),
                timestamp: Utc::now(),
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(10),
                timeframe: TimeFrame::FiveMinutes,
            };
            self.candles.save_candle(&candle).await.unwrap();
            candle
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings::from_config(&AppConfig::default())
    }

    fn trading() -> TradingConfig {
        TradingConfig {
            enabled: true,
            ..TradingConfig::default()
        }
    }

    fn harness_with(
        signal: AnalysisSignal,
        store: Arc<dyn PositionStore>,
        executor: Option<Arc<dyn TradeExecutor>>,
        trading: TradingConfig,
    ) -> Harness {
        let candles = Arc::new(InMemoryCandleStore::new());
        let exchange = Arc::new(PaperExchange::new(candles.clone()));
        let executor: Arc<dyn TradeExecutor> = match executor {
            Some(executor) => executor,
            None => exchange.clone(),
        };

        let engine = DecisionEngine::new(
            settings(),
            RiskGate::new(&RiskConfig::default()),
            PositionLedger::new(store),
            BalanceQuery::new(exchange.clone(), BalanceQueryConfig::from(&trading)),
            executor,
            Arc::new(FixedAnalyzer(signal)),
            candles.clone(),
        );

        Harness {
            engine,
            exchange,
            candles,
        }
    }

    fn harness(signal: AnalysisSignal, positions: Vec<Position>) -> Harness {
        harness_with(
            signal,
            Arc::new(InMemoryPositionStore::with_positions(positions)),
            None,
            trading(),
        )
    }

    fn buy(confidence: Decimal) -> AnalysisSignal {
        AnalysisSignal::new(Signal::Buy, confidence, "test")
    }

    #[tokio::test]
    async fn test_confident_buy_opens_position() {
        let h = harness(buy(dec!(0.9)), vec![]);
        h.exchange.deposit("USDT", dec!(1000)).await;

        let candle = h.candle(dec!(100)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert!(matches!(
            outcome.action,
            CycleAction::Opened { step: 0, quantity, .. } if quantity == dec!(0.1)
        ));

        let position = h
            .engine
            .ledger()
            .get_open_position("BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.entry_price, dec!(100));
        assert_eq!(position.martingale_step, 0);
        assert_eq!(h.exchange.get_balance("USDT").await.unwrap(), dec!(990));
    }

    #[tokio::test]
    async fn test_confidence_at_threshold_does_not_open() {
        let h = harness(buy(dec!(0.7)), vec![]);
        h.exchange.deposit("USDT", dec!(1000)).await;

        let candle = h.candle(dec!(100)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Skipped);
        assert!(h.exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_take_profit_resets_step() {
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 2, "o1");
        let h = harness(AnalysisSignal::hold("flat"), vec![position.clone()]);
        h.exchange.deposit("BTC", dec!(1)).await;

        let candle = h.candle(dec!(102.5)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        match outcome.action {
            CycleAction::Closed {
                exit_reason,
                pnl,
                next_step,
                ..
            } => {
                assert_eq!(exit_reason, ExitReason::TakeProfit);
                assert_eq!(pnl, dec!(2.5));
                assert_eq!(next_step, 0);
            }
            other => panic!("expected close, got {:?}", other),
        }

        assert!(h.engine.ledger().get_open_position("BTCUSDT").await.unwrap().is_none());
        assert_eq!(h.engine.martingale_step("BTCUSDT").await, Some(0));
    }

    #[tokio::test]
    async fn test_stop_loss_escalates_step() {
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 1, "o1");
        let h = harness(AnalysisSignal::hold("flat"), vec![position]);
        h.exchange.deposit("BTC", dec!(1)).await;

        let candle = h.candle(dec!(98.5)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert!(matches!(
            outcome.action,
            CycleAction::Closed {
                exit_reason: ExitReason::StopLoss,
                next_step: 2,
                ..
            }
        ));
        assert_eq!(h.engine.martingale_step("BTCUSDT").await, Some(2));

        let closed = h.engine.ledger().all_positions().await.unwrap();
        assert_eq!(closed[0].realized_pnl, Some(dec!(-1.5)));
        assert_eq!(closed[0].exit_reason, Some(ExitReason::StopLoss));
    }

    #[tokio::test]
    async fn test_within_thresholds_holds_and_marks_price() {
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 0, "o1");
        let h = harness(AnalysisSignal::hold("flat"), vec![position]);

        let candle = h.candle(dec!(101)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Held { unrealized_pnl: dec!(1) });
        let open = h
            .engine
            .ledger()
            .get_open_position("BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.current_price, dec!(101));
        assert!(h.exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_next_open_uses_escalated_step() {
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 0, "o1");
        let h = harness(buy(dec!(0.9)), vec![position]);
        h.exchange.deposit("BTC", dec!(1)).await;
        h.exchange.deposit("USDT", dec!(1000)).await;

        let loss = h.candle(dec!(98)).await;
        h.engine.process_candle(&loss).await.unwrap();

        let entry = h.candle(dec!(98)).await;
        let outcome = h.engine.process_candle(&entry).await.unwrap();

        // 1098 USDT * 1% * 2^1
        assert!(matches!(outcome.action, CycleAction::Opened { step: 1, .. }));
        let open = h
            .engine
            .ledger()
            .get_open_position("BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.quantity, (dec!(21.96) / dec!(98)).round_dp(8));
    }

    #[tokio::test]
    async fn test_step_cap_blocks_new_positions() {
        let position = Position::open("BTCUSDT", OrderSide::Buy, dec!(1), dec!(100), 4, "o1");
        let h = harness(buy(dec!(0.95)), vec![position]);
        h.exchange.deposit("BTC", dec!(1)).await;
        h.exchange.deposit("USDT", dec!(1000)).await;

        let loss = h.candle(dec!(95)).await;
        let outcome = h.engine.process_candle(&loss).await.unwrap();
        assert!(matches!(outcome.action, CycleAction::Closed { next_step: 5, .. }));

        let entry = h.candle(dec!(95)).await;
        let outcome = h.engine.process_candle(&entry).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Skipped);
        assert_eq!(h.exchange.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_trade_leaves_ledger_untouched() {
        let store = Arc::new(InMemoryPositionStore::new());
        let h = harness_with(
            buy(dec!(0.9)),
            store.clone(),
            Some(Arc::new(RejectingExecutor)),
            trading(),
        );
        h.exchange.deposit("USDT", dec!(1000)).await;

        let candle = h.candle(dec!(100)).await;
        let result = h.engine.process_candle(&candle).await;

        assert!(matches!(result, Err(BotError::Execution(_))));
        assert!(store.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_after_fill_is_inconsistency() {
        let h = harness_with(buy(dec!(0.9)), Arc::new(ReadOnlyStore), None, trading());
        h.exchange.deposit("USDT", dec!(1000)).await;

        let candle = h.candle(dec!(100)).await;
        let result = h.engine.process_candle(&candle).await;

        assert!(matches!(result, Err(BotError::Inconsistency(_))));
        assert_eq!(h.exchange.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_trading_disabled_never_trades() {
        let h = harness_with(
            buy(dec!(0.9)),
            Arc::new(InMemoryPositionStore::new()),
            None,
            TradingConfig::default(),
        );
        h.exchange.deposit("USDT", dec!(1000)).await;

        let candle = h.candle(dec!(100)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Skipped);
        assert!(h.exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_balance_skips_instead_of_trading() {
        let h = harness(buy(dec!(0.9)), vec![]);

        let candle = h.candle(dec!(100)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Skipped);
        assert!(h.exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_drawdown_limit_blocks_entry() {
        let h = harness(buy(dec!(0.9)), vec![]);
        h.exchange.deposit("USDT", dec!(1000)).await;

        // Establish the peak, then lose 30% of it outside the engine
        let first = h.candle(dec!(100)).await;
        h.engine.process_candle(&first).await.unwrap();
        let mut closed = h
            .engine
            .ledger()
            .get_open_position("BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        closed.close(dec!(100.5), ExitReason::TakeProfit, "manual".into());
        h.engine.ledger().save(&closed).await.unwrap();

        let balance = h.exchange.get_balance("USDT").await.unwrap();
        h.exchange.deposit("USDT", dec!(690) - balance).await;

        let candle = h.candle(dec!(100)).await;
        let outcome = h.engine.process_candle(&candle).await.unwrap();

        assert_eq!(outcome.action, CycleAction::Skipped);
        assert!(outcome.reason.contains("Risk gate"));
    }
}
