//! Ordered candle ingestion
//!
//! Every symbol gets its own lane: a bounded queue drained by one worker
//! task. The worker takes whatever is queued, sorts it by timestamp and
//! hands candles to the [`CandleHandler`] one at a time, so a symbol never
//! has two decision cycles in flight and never goes back in time.
//! Duplicates and stale re-deliveries are stored (first write wins) but
//! not processed again.
//!
//! Reordering only covers candles queued together. A candle that shows up
//! after a newer one was already processed is stored and counted as
//! skipped, so the lane matches a serial timestamp-ordered run only when
//! late candles arrive before the worker reaches their successors.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{BotError, Result};
use crate::market_data::CandleStore;
use crate::models::Candle;
use crate::strategy::CandleHandler;

#[derive(Debug, Default)]
struct LaneCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl LaneCounters {
    fn snapshot(&self) -> LaneStats {
        LaneStats {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-lane counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    /// Cycles that completed
    pub processed: u64,
    /// Invalid, duplicate or stale candles
    pub skipped: u64,
    /// Cycles or stores that returned an error
    pub failed: u64,
}

/// Stop flag shared by a pipeline's lanes and whoever drives it
///
/// Once triggered, no lane starts another cycle; a cycle already running
/// is left to finish.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct Lane {
    tx: mpsc::Sender<Candle>,
    handle: JoinHandle<()>,
    counters: Arc<LaneCounters>,
}

pub struct CandlePipeline {
    handler: Arc<dyn CandleHandler>,
    store: Arc<dyn CandleStore>,
    capacity: usize,
    lanes: HashMap<String, Lane>,
    stop: StopSignal,
}

impl CandlePipeline {
    pub fn new(handler: Arc<dyn CandleHandler>, store: Arc<dyn CandleStore>, capacity: usize) -> Self {
        Self::with_stop_signal(handler, store, capacity, StopSignal::new())
    }

    /// Pipeline whose lanes also stop when `stop` is triggered from outside
    pub fn with_stop_signal(
        handler: Arc<dyn CandleHandler>,
        store: Arc<dyn CandleStore>,
        capacity: usize,
        stop: StopSignal,
    ) -> Self {
        Self {
            handler,
            store,
            capacity: capacity.max(1),
            lanes: HashMap::new(),
            stop,
        }
    }

    /// Queue `candle` on its symbol's lane, waiting while the lane is full
    pub async fn submit(&mut self, candle: Candle) -> Result<()> {
        if !self.lanes.contains_key(&candle.symbol) {
            let lane = self.spawn_lane(&candle.symbol);
            self.lanes.insert(candle.symbol.clone(), lane);
        }

        let Some(lane) = self.lanes.get(&candle.symbol) else {
            return Err(BotError::Feed(format!("No lane for {}", candle.symbol)));
        };

        lane.tx
            .send(candle)
            .await
            .map_err(|e| BotError::Feed(format!("Lane for {} closed", e.0.symbol)))
    }

    pub fn stats(&self) -> HashMap<String, LaneStats> {
        self.lanes
            .iter()
            .map(|(symbol, lane)| (symbol.clone(), lane.counters.snapshot()))
            .collect()
    }

    /// Stop accepting candles, let every lane finish what is queued
    pub async fn drain(mut self) -> HashMap<String, LaneStats> {
        let lanes = std::mem::take(&mut self.lanes);
        Self::join(lanes).await
    }

    /// Finish in-flight cycles and drop whatever is still queued
    pub async fn shutdown(mut self) -> HashMap<String, LaneStats> {
        self.stop.trigger();
        let lanes = std::mem::take(&mut self.lanes);
        Self::join(lanes).await
    }

    async fn join(lanes: HashMap<String, Lane>) -> HashMap<String, LaneStats> {
        let mut report = HashMap::new();

        for (symbol, lane) in lanes {
            drop(lane.tx);
            if let Err(e) = lane.handle.await {
                tracing::error!(symbol = %symbol, error = %e, "Lane worker panicked");
            }

            let stats = lane.counters.snapshot();
            tracing::info!(
                symbol = %symbol,
                processed = stats.processed,
                skipped = stats.skipped,
                failed = stats.failed,
                "Lane stopped"
            );
            report.insert(symbol, stats);
        }

        report
    }

    fn spawn_lane(&self, symbol: &str) -> Lane {
        let (tx, rx) = mpsc::channel(self.capacity);
        let counters = Arc::new(LaneCounters::default());

        let worker = LaneWorker {
            symbol: symbol.to_string(),
            handler: self.handler.clone(),
            store: self.store.clone(),
            counters: counters.clone(),
            last_processed: None,
        };
        let handle = tokio::spawn(worker.run(rx, self.stop.subscribe()));

        tracing::info!(symbol, capacity = self.capacity, "Started candle lane");

        Lane {
            tx,
            handle,
            counters,
        }
    }
}

struct LaneWorker {
    symbol: String,
    handler: Arc<dyn CandleHandler>,
    store: Arc<dyn CandleStore>,
    counters: Arc<LaneCounters>,
    last_processed: Option<DateTime<Utc>>,
}

impl LaneWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Candle>, mut stop_rx: watch::Receiver<bool>) {
        'lane: loop {
            // A receiver subscribed after the trigger never sees `changed`
            if *stop_rx.borrow() {
                break 'lane;
            }

            let first = tokio::select! {
                biased;
                _ = stop_rx.changed() => break 'lane,
                candle = rx.recv() => match candle {
                    Some(candle) => candle,
                    None => break 'lane,
                },
            };

            let mut batch = vec![first];
            while let Ok(candle) = rx.try_recv() {
                batch.push(candle);
            }
            batch.sort_by_key(|c| c.timestamp);

            for candle in batch {
                if *stop_rx.borrow() {
                    break 'lane;
                }
                self.handle(candle).await;
            }
        }

        tracing::debug!(symbol = %self.symbol, "Lane worker exiting");
    }

    async fn handle(&mut self, candle: Candle) {
        if let Err(e) = candle.validate() {
            tracing::warn!(
                symbol = %self.symbol,
                timestamp = %candle.timestamp,
                error = %e,
                "Rejected invalid candle"
            );
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.store.save_candle(&candle).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(symbol = %self.symbol, timestamp = %candle.timestamp, "Duplicate candle");
            }
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Failed to store candle");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        if self.last_processed.is_some_and(|last| candle.timestamp <= last) {
            tracing::warn!(
                symbol = %self.symbol,
                timestamp = %candle.timestamp,
                "Skipping stale candle"
            );
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.last_processed = Some(candle.timestamp);

        match self.handler.on_candle(&candle).await {
            Ok(outcome) => {
                tracing::debug!(
                    symbol = %self.symbol,
                    timestamp = %candle.timestamp,
                    action = ?outcome.action,
                    reason = %outcome.reason,
                    "Cycle complete"
                );
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(
                    symbol = %self.symbol,
                    timestamp = %candle.timestamp,
                    error = %e,
                    transient = e.is_transient(),
                    "Decision cycle failed"
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
