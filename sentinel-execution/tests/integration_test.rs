//! End-to-end orchestrator tests against a scripted exchange.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sentinel_broker::{BrokerError, BrokerInfo, BrokerResult, ExchangeClient, Notifier};
use sentinel_core::{Candle, Decision, OrderIntent, Quantity};
use sentinel_execution::{
    ExecutionConfig, ExecutionError, ExecutionOutcome, OrderOrchestrator, SkipReason,
};
use sentinel_journal::TradeJournal;
use sentinel_risk::{RiskConfig, RiskGate};

#[derive(Default)]
struct ScriptedExchange {
    /// First N entry placements fail with a transport error.
    entry_failures: Mutex<u32>,
    /// When set, every bracket placement fails non-transiently.
    bracket_rejects: bool,
    /// When set, every leverage call fails non-transiently.
    leverage_rejects: bool,
    leverage_calls: AtomicUsize,
    entry_calls: AtomicUsize,
    entries_placed: AtomicUsize,
    bracket_calls: AtomicUsize,
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    fn info(&self) -> BrokerInfo {
        BrokerInfo {
            name: "scripted".to_string(),
            markets: vec!["linear".to_string()],
            supports_testnet: true,
        }
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> BrokerResult<()> {
        self.leverage_calls.fetch_add(1, Ordering::SeqCst);
        if self.leverage_rejects {
            return Err(BrokerError::Exchange("leverage rejected".into()));
        }
        Ok(())
    }

    async fn place_entry(&self, _intent: &OrderIntent) -> BrokerResult<()> {
        self.entry_calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.entry_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(BrokerError::Transport("connection reset".into()));
        }
        self.entries_placed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn place_bracket(&self, _intent: &OrderIntent) -> BrokerResult<()> {
        self.bracket_calls.fetch_add(1, Ordering::SeqCst);
        if self.bracket_rejects {
            return Err(BrokerError::Exchange("bad stop price".into()));
        }
        Ok(())
    }

    async fn account_balance(&self) -> BrokerResult<Quantity> {
        Ok(10_000.0)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> BrokerResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

fn candles() -> Vec<Candle> {
    [100.0, 95.0, 100.0]
        .iter()
        .map(|&close| Candle {
            open_time: Utc::now(),
            close,
            volume: 100.0,
        })
        .collect()
}

fn orchestrator(
    exchange: Arc<ScriptedExchange>,
    notifier: Arc<RecordingNotifier>,
    journal: Arc<TradeJournal>,
) -> OrderOrchestrator {
    let config = ExecutionConfig {
        retry_delay_secs: 0,
        ..ExecutionConfig::default()
    };
    let risk = RiskGate::new(RiskConfig::default(), Utc::now());
    OrderOrchestrator::new(config, exchange, notifier, journal, risk)
}

fn journal() -> (tempfile::TempDir, Arc<TradeJournal>) {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(TradeJournal::open(dir.path().join("trades.csv")).unwrap());
    (dir, journal)
}

#[tokio::test]
async fn transient_failures_retry_without_duplicate_orders() {
    let exchange = Arc::new(ScriptedExchange {
        entry_failures: Mutex::new(2),
        ..ScriptedExchange::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let (_dir, journal) = journal();
    let mut orchestrator = orchestrator(exchange.clone(), notifier, journal.clone());

    let outcome = orchestrator
        .execute("BTCUSDT", Decision::Buy, &candles(), Utc::now())
        .await
        .unwrap();

    assert!(matches!(outcome, ExecutionOutcome::Executed(_)));
    assert_eq!(exchange.entry_calls.load(Ordering::SeqCst), 3);
    assert_eq!(exchange.entries_placed.load(Ordering::SeqCst), 1);
    assert_eq!(exchange.bracket_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.risk_gate().trades_today(), 1);

    let summary = journal.summarize(Utc::now().date_naive()).unwrap();
    assert_eq!(summary.count, 1);
}

#[tokio::test]
async fn exhausted_retries_surface_error_without_registering() {
    let exchange = Arc::new(ScriptedExchange {
        entry_failures: Mutex::new(3),
        ..ScriptedExchange::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let (_dir, journal) = journal();
    let mut orchestrator = orchestrator(exchange.clone(), notifier, journal.clone());

    let err = orchestrator
        .execute("BTCUSDT", Decision::Buy, &candles(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Exchange {
            stage: "place_entry",
            ..
        }
    ));
    assert_eq!(exchange.entry_calls.load(Ordering::SeqCst), 3);
    assert_eq!(exchange.entries_placed.load(Ordering::SeqCst), 0);
    assert_eq!(exchange.bracket_calls.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.risk_gate().trades_today(), 0);
    assert_eq!(journal.summarize(Utc::now().date_naive()).unwrap().count, 0);
}

#[tokio::test]
async fn non_transient_errors_abort_without_retry() {
    let exchange = Arc::new(ScriptedExchange {
        leverage_rejects: true,
        ..ScriptedExchange::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let (_dir, journal) = journal();
    let mut orchestrator = orchestrator(exchange.clone(), notifier, journal);

    let err = orchestrator
        .execute("BTCUSDT", Decision::Buy, &candles(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Exchange {
            stage: "set_leverage",
            ..
        }
    ));
    assert_eq!(exchange.leverage_calls.load(Ordering::SeqCst), 1);
    assert_eq!(exchange.entry_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bracket_failure_leaves_loud_trail_and_no_risk_mutation() {
    let exchange = Arc::new(ScriptedExchange {
        bracket_rejects: true,
        ..ScriptedExchange::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let (_dir, journal) = journal();
    let mut orchestrator = orchestrator(exchange.clone(), notifier.clone(), journal.clone());

    let err = orchestrator
        .execute("BTCUSDT", Decision::Buy, &candles(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutionError::BracketAbandoned { .. }));
    assert_eq!(exchange.entries_placed.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.risk_gate().trades_today(), 0);
    assert_eq!(journal.summarize(Utc::now().date_naive()).unwrap().count, 0);

    let messages = notifier.messages.lock().unwrap();
    assert!(messages.iter().any(|message| message.contains("URGENT")));
}

#[tokio::test]
async fn hold_and_closed_gate_skip_quietly() {
    let exchange = Arc::new(ScriptedExchange::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (_dir, journal) = journal();
    let mut orchestrator = orchestrator(exchange.clone(), notifier, journal);

    let outcome = orchestrator
        .execute("BTCUSDT", Decision::Hold, &candles(), Utc::now())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Skipped(SkipReason::NotActionable)
    ));

    // Exhaust the loss streak so the gate closes.
    let now = Utc::now();
    for symbol in ["AUSDT", "BUSDT", "CUSDT"] {
        orchestrator.risk_gate_mut().register(-1.0, symbol, now);
    }
    let outcome = orchestrator
        .execute("BTCUSDT", Decision::Buy, &candles(), now)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Skipped(SkipReason::RiskGate)
    ));
    assert_eq!(exchange.entry_calls.load(Ordering::SeqCst), 0);
}
