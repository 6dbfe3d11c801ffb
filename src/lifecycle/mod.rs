use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{BotError, Result};
use crate::market_data::{CandleStore, CandleStream, MarketDataFeed};
use crate::models::{BotStatus, TimeFrame};
use crate::pipeline::{CandlePipeline, LaneStats, StopSignal};
use crate::strategy::CandleHandler;

/// Result of a start/stop request that did not fail
///
/// The `Already*` and `TransitionInProgress` variants are idempotent
/// no-ops, reported as warnings rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Started,
    Stopped,
    AlreadyRunning,
    AlreadyStopped,
    TransitionInProgress,
}

struct ActiveRun {
    stop: StopSignal,
    forwarder: JoinHandle<HashMap<String, LaneStats>>,
}

/// Start/stop state machine around the feed subscription and pipeline
///
/// Status moves Stopped -> Starting -> Running -> (Error | Stopped). Start
/// and stop hold the transition lock, so at most one is ever in flight.
/// The only write outside the lock is the forwarder flagging Error when
/// the feed ends under a running bot.
pub struct BotLifecycle {
    symbol: String,
    timeframe: TimeFrame,
    channel_capacity: usize,
    feed: Arc<dyn MarketDataFeed>,
    handler: Arc<dyn CandleHandler>,
    store: Arc<dyn CandleStore>,
    status_tx: Arc<watch::Sender<BotStatus>>,
    transition: Mutex<Option<ActiveRun>>,
}

impl BotLifecycle {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        channel_capacity: usize,
        feed: Arc<dyn MarketDataFeed>,
        handler: Arc<dyn CandleHandler>,
        store: Arc<dyn CandleStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(BotStatus::Stopped);
        Self {
            symbol: symbol.into(),
            timeframe,
            channel_capacity,
            feed,
            handler,
            store,
            status_tx: Arc::new(status_tx),
            transition: Mutex::new(None),
        }
    }

    pub fn status(&self) -> BotStatus {
        *self.status_tx.borrow()
    }

    /// Receiver notified on every status change
    pub fn watch_status(&self) -> watch::Receiver<BotStatus> {
        self.status_tx.subscribe()
    }

    fn set_status(&self, status: BotStatus) {
        publish_status(&self.status_tx, &self.symbol, status);
    }

    pub async fn start(&self) -> Result<LifecycleOutcome> {
        let Ok(mut active) = self.transition.try_lock() else {
            tracing::warn!(symbol = %self.symbol, "Start ignored, transition already in progress");
            return Ok(LifecycleOutcome::TransitionInProgress);
        };

        if let Some(run) = active.as_ref() {
            let ended = run.forwarder.is_finished() || self.status() == BotStatus::Error;
            if !ended {
                tracing::warn!(symbol = %self.symbol, "Bot is already running");
                return Ok(LifecycleOutcome::AlreadyRunning);
            }

            // Feed ended on its own; reap the dead run before resubscribing
            if let Some(dead) = active.take() {
                if let Err(e) = dead.forwarder.await {
                    tracing::error!(symbol = %self.symbol, error = %e, "Candle forwarder failed");
                }
                if let Err(e) = self.feed.unsubscribe().await {
                    tracing::warn!(symbol = %self.symbol, error = %e, "Failed to release ended subscription");
                }
            }
        }

        self.set_status(BotStatus::Starting);

        let stream = match self.feed.subscribe(&self.symbol, self.timeframe).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Failed to subscribe to market data");
                self.set_status(BotStatus::Error);
                return Err(e);
            }
        };

        let stop = StopSignal::new();
        let pipeline = CandlePipeline::with_stop_signal(
            self.handler.clone(),
            self.store.clone(),
            self.channel_capacity,
            stop.clone(),
        );

        // Running must be visible before the forwarder can report Error
        self.set_status(BotStatus::Running);
        let forwarder = tokio::spawn(forward(
            stream,
            pipeline,
            stop.clone(),
            self.status_tx.clone(),
            self.symbol.clone(),
        ));
        *active = Some(ActiveRun { stop, forwarder });

        tracing::info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            "Trading bot started"
        );

        Ok(LifecycleOutcome::Started)
    }

    /// Block new cycles, unsubscribe, let any in-flight cycle finish, then
    /// report lane stats
    pub async fn stop(&self) -> Result<LifecycleOutcome> {
        let Ok(mut active) = self.transition.try_lock() else {
            tracing::warn!(symbol = %self.symbol, "Stop ignored, transition already in progress");
            return Ok(LifecycleOutcome::TransitionInProgress);
        };

        let Some(run) = active.take() else {
            tracing::warn!(symbol = %self.symbol, "Bot is not running");
            if self.status() == BotStatus::Error {
                self.set_status(BotStatus::Stopped);
            }
            return Ok(LifecycleOutcome::AlreadyStopped);
        };

        run.stop.trigger();

        let unsubscribed = self.feed.unsubscribe().await;
        if let Err(ref e) = unsubscribed {
            tracing::error!(symbol = %self.symbol, error = %e, "Failed to unsubscribe from market data");
        }

        let joined = run.forwarder.await;
        self.set_status(BotStatus::Stopped);

        let stats = joined.map_err(|e| BotError::Feed(format!("Candle forwarder failed: {}", e)))?;
        unsubscribed?;

        for (symbol, lane) in &stats {
            tracing::info!(
                symbol = %symbol,
                processed = lane.processed,
                skipped = lane.skipped,
                failed = lane.failed,
                "Trading bot stopped"
            );
        }

        Ok(LifecycleOutcome::Stopped)
    }
}

fn publish_status(status_tx: &watch::Sender<BotStatus>, symbol: &str, status: BotStatus) {
    let previous = status_tx.send_replace(status);
    if previous != status {
        tracing::info!(symbol = %symbol, from = %previous, to = %status, "Bot status changed");
    }
}

/// Pump the subscription into the pipeline until stopped or the feed ends
///
/// A feed that ends without a stop request leaves nothing consuming
/// candles, so the bot is flagged as Error.
async fn forward(
    mut stream: CandleStream,
    mut pipeline: CandlePipeline,
    stop: StopSignal,
    status_tx: Arc<watch::Sender<BotStatus>>,
    symbol: String,
) -> HashMap<String, LaneStats> {
    let mut stop_rx = stop.subscribe();

    loop {
        if stop.is_triggered() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            candle = stream.next() => {
                let Some(candle) = candle else {
                    if !stop.is_triggered() {
                        tracing::error!(symbol = %symbol, "Market data stream ended unexpectedly");
                        publish_status(&status_tx, &symbol, BotStatus::Error);
                    }
                    break;
                };
                if let Err(e) = pipeline.submit(candle).await {
                    if stop.is_triggered() {
                        break;
                    }
                    tracing::error!(symbol = %symbol, error = %e, "Failed to queue candle");
                }
            }
        }
    }

    pipeline.shutdown().await
}
