use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sentinel_binance::{BinanceClient, BinanceConfig, BinanceCredentials};
use sentinel_broker::{ExchangeClient, MarketData, Notifier, SentimentSource};
use sentinel_config::AppConfig;
use sentinel_execution::OrderOrchestrator;
use sentinel_journal::TradeJournal;
use sentinel_paper::{NeutralSentiment, PaperExchange, PaperMarket};
use sentinel_risk::RiskGate;
use sentinel_signal::SignalEngine;
use sentinel_social::{SocialSearchClient, SocialSearchConfig};
use tracing::{info, warn};

use sentinel_cli::alerts::AlertDispatcher;
use sentinel_cli::monitor::{AnomalyMonitor, ShutdownSignal};
use sentinel_cli::telemetry;

#[derive(Parser)]
#[command(author, version, about = "Sentinel futures trading bot")]
struct Cli {
    /// Named environment whose config layer to load (config/{env}.toml)
    #[arg(long, global = true)]
    env: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the anomaly monitor and trade on confirmed signals
    Run {
        /// Trade against the in-memory paper connector instead of Binance
        #[arg(long)]
        paper: bool,
    },
    /// Print the trade summary for a day (defaults to today, UTC)
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = sentinel_config::load_config(cli.env.as_deref())?;
    telemetry::init_tracing(&config.log_level, config.log_path.as_deref())?;

    match cli.command {
        Command::Run { paper } => run(config, paper).await?,
        Command::Report { date } => report(&config, date)?,
    }
    Ok(())
}

async fn run(config: AppConfig, paper: bool) -> Result<()> {
    let journal = Arc::new(
        TradeJournal::open(&config.journal_path)
            .with_context(|| format!("opening journal at {}", config.journal_path.display()))?,
    );
    let dispatcher = AlertDispatcher::new(config.alerting.webhook_url.clone())?;
    let notifier: Arc<dyn Notifier> = Arc::new(dispatcher.clone());

    let (market, exchange): (Arc<dyn MarketData>, Arc<dyn ExchangeClient>) = if paper {
        info!("paper mode: orders stay in memory");
        (
            Arc::new(PaperMarket::with_default_universe()),
            Arc::new(PaperExchange::new(10_000.0)),
        )
    } else {
        let credentials = if config.exchange.api_key.is_empty() {
            None
        } else {
            Some(BinanceCredentials {
                api_key: config.exchange.api_key.clone(),
                api_secret: config.exchange.api_secret.clone(),
            })
        };
        let client = Arc::new(BinanceClient::new(
            BinanceConfig {
                base_url: config.exchange.rest_url.clone(),
                recv_window: config.exchange.recv_window_ms,
            },
            credentials,
        )?);
        (client.clone(), client)
    };

    let sentiment: Arc<dyn SentimentSource> = if paper || config.social.bearer_token.is_empty() {
        if !paper {
            warn!("no social bearer token configured; sentiment pinned to neutral");
        }
        Arc::new(NeutralSentiment)
    } else {
        Arc::new(SocialSearchClient::new(SocialSearchConfig {
            bearer_token: config.social.bearer_token.clone(),
            max_results: config.social.max_texts,
            ..SocialSearchConfig::default()
        })?)
    };

    let broker = exchange.info();
    info!(
        exchange = %broker.name,
        markets = ?broker.markets,
        testnet = broker.supports_testnet,
        "exchange connector ready"
    );

    let engine = SignalEngine::new(config.signal.clone(), sentiment);
    let risk = RiskGate::new(config.risk.clone(), Utc::now());
    let orchestrator = OrderOrchestrator::new(
        config.execution.clone(),
        exchange,
        notifier,
        journal.clone(),
        risk,
    );

    let mut monitor = AnomalyMonitor::new(
        config.monitor.clone(),
        market,
        engine,
        orchestrator,
        journal,
        dispatcher,
    )?;
    monitor.run(ShutdownSignal::new()).await
}

fn report(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let journal = TradeJournal::open(&config.journal_path)?;
    let day = date.unwrap_or_else(|| Utc::now().date_naive());
    let summary = journal.summarize(day)?;

    println!("report for {day}");
    println!("  trades:    {}", summary.count);
    println!("  total pnl: {:.4}", summary.total_pnl);
    if !summary.sample.is_empty() {
        println!("  last trades:");
        for trade in &summary.sample {
            println!(
                "    {} {} {} entry {} exit {} pnl {:.4}",
                trade.timestamp.format("%H:%M:%S"),
                trade.symbol,
                trade.side,
                trade.entry,
                trade.exit,
                trade.pnl
            );
        }
    }
    Ok(())
}
