//! The anomaly-polling loop that drives the whole bot.
//!
//! One logical control loop: each tick fetches a full price snapshot, diffs
//! it against the previous one, and runs any anomalous symbol through the
//! signal and execution pipeline to completion before the next sleep. That
//! serialization is what keeps balance reads and risk counters race-free.

use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sentinel_broker::{MarketData, Notifier};
use sentinel_config::MonitorConfig;
use sentinel_core::{Interval, PriceSnapshot};
use sentinel_execution::{ExecutionError, ExecutionOutcome, OrderOrchestrator};
use sentinel_journal::TradeJournal;
use sentinel_signal::{SignalEngine, SignalError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertDispatcher;

/// Cooperative shutdown flag wired to Ctrl-C.
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let flag_clone = flag.clone();
        let notify_clone = notify.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag_clone.store(true, Ordering::SeqCst);
                notify_clone.notify_waiters();
            }
        });
        Self { flag, notify }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns false when woken by shutdown instead of the timer.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.notify.notified() => false,
        }
    }
}

/// Polls the market and routes anomalies through signal and execution.
pub struct AnomalyMonitor {
    config: MonitorConfig,
    interval: Interval,
    market: Arc<dyn MarketData>,
    engine: SignalEngine,
    orchestrator: OrderOrchestrator,
    journal: Arc<TradeJournal>,
    dispatcher: AlertDispatcher,
    baseline: Option<PriceSnapshot>,
    report_day: NaiveDate,
    ticks: u64,
}

impl AnomalyMonitor {
    pub fn new(
        config: MonitorConfig,
        market: Arc<dyn MarketData>,
        engine: SignalEngine,
        orchestrator: OrderOrchestrator,
        journal: Arc<TradeJournal>,
        dispatcher: AlertDispatcher,
    ) -> Result<Self> {
        let interval = Interval::from_str(&config.candle_interval)
            .map_err(|err| anyhow::anyhow!("invalid candle_interval: {err}"))?;
        Ok(Self {
            config,
            interval,
            market,
            engine,
            orchestrator,
            journal,
            dispatcher,
            baseline: None,
            report_day: Utc::now().date_naive(),
            ticks: 0,
        })
    }

    /// Run until the shutdown signal fires.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            poll_secs = self.config.poll_interval_secs,
            threshold_pct = self.config.anomaly_threshold_pct,
            market = self.market.name(),
            "anomaly monitor started"
        );
        let poll = Duration::from_secs(self.config.poll_interval_secs);

        while !shutdown.triggered() {
            self.tick().await;
            if !shutdown.sleep(poll).await {
                break;
            }
        }

        info!("anomaly monitor stopping");
        self.dispatcher.notify("bot stopped").await.ok();
        Ok(())
    }

    /// Baseline snapshot from the last successful poll, if any.
    #[must_use]
    pub fn baseline(&self) -> Option<&PriceSnapshot> {
        self.baseline.as_ref()
    }

    /// One poll: snapshot, diff, pipeline, housekeeping. Public so tests can
    /// drive the loop tick by tick without timers.
    pub async fn tick(&mut self) {
        self.ticks += 1;

        let snapshot = match self.market.price_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // Skip the tick entirely; the stale baseline stays so the
                // next successful poll produces a meaningful diff.
                warn!(error = %err, "price snapshot failed; skipping tick");
                return;
            }
        };

        if let Some(baseline) = &self.baseline {
            let moves = snapshot.moves_since(baseline);
            for price_move in moves {
                if !price_move.is_anomalous(self.config.anomaly_threshold_pct) {
                    continue;
                }
                info!(
                    symbol = %price_move.symbol,
                    change_pct = price_move.change_pct,
                    "anomalous move detected"
                );
                self.handle_anomaly(&price_move.symbol).await;
            }
        } else {
            debug!(symbols = snapshot.len(), "baseline snapshot captured");
        }

        // Baseline advances wholesale even when downstream trading failed.
        self.baseline = Some(snapshot);

        self.rollover_report().await;
        let every = self.config.maintenance_every_ticks.max(1);
        if self.ticks % every == 0 {
            // Balance staleness is handled inside the cache (TTL plus the
            // 24h max-age valve); maintenance only bounds signal memory.
            self.engine.prune();
        }
    }

    async fn handle_anomaly(&mut self, symbol: &str) {
        let candles = match self
            .market
            .candles(symbol, self.interval, self.config.candle_limit)
            .await
        {
            Ok(candles) => candles,
            Err(err) => {
                warn!(symbol, error = %err, "candle fetch failed; symbol skipped");
                return;
            }
        };

        let evaluation = match self.engine.evaluate(symbol, &candles).await {
            Ok(evaluation) => evaluation,
            Err(SignalError::InsufficientData { have, need }) => {
                debug!(symbol, have, need, "not enough candles to evaluate");
                return;
            }
            Err(err) => {
                error!(symbol, error = %err, "signal evaluation failed");
                return;
            }
        };
        debug!(
            symbol,
            decision = %evaluation.decision,
            score = evaluation.score,
            reason = %evaluation.reason,
            "symbol evaluated"
        );
        if !evaluation.decision.is_actionable() {
            return;
        }

        match self
            .orchestrator
            .execute(symbol, evaluation.decision, &candles, Utc::now())
            .await
        {
            Ok(ExecutionOutcome::Executed(record)) => {
                info!(symbol, pnl = record.pnl, "trade executed");
            }
            Ok(ExecutionOutcome::Skipped(reason)) => {
                debug!(symbol, ?reason, "execution skipped");
            }
            Err(err @ ExecutionError::BracketAbandoned { .. }) => {
                // Already alerted loudly inside the orchestrator; the loop
                // keeps running so other symbols stay covered.
                error!(symbol, error = %err, "unprotected entry left open");
            }
            Err(err) => {
                error!(symbol, error = %err, "order execution failed");
                self.dispatcher
                    .notify(&format!("{symbol}: execution failed: {err}"))
                    .await
                    .ok();
            }
        }
    }

    /// Push yesterday's summary once the UTC day changes.
    async fn rollover_report(&mut self) {
        let today = Utc::now().date_naive();
        if today == self.report_day {
            return;
        }
        let closed_day = self.report_day;
        self.report_day = today;
        match self.journal.summarize(closed_day) {
            Ok(summary) => {
                info!(
                    day = %closed_day,
                    trades = summary.count,
                    total_pnl = summary.total_pnl,
                    "daily report"
                );
                self.dispatcher
                    .notify(&format!(
                        "daily report {closed_day}: {} trades, pnl {:.2}",
                        summary.count, summary.total_pnl
                    ))
                    .await
                    .ok();
            }
            Err(err) => warn!(error = %err, "daily report failed"),
        }
    }
}
