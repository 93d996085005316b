//! Durable trade log.
//!
//! One CSV row per executed trade, append-only, with a header written when
//! the file is first created. The journal is the source of truth for daily
//! reporting; everything else in the bot is in-memory state.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use sentinel_core::TradeRecord;
use thiserror::Error;
use tracing::info;

/// Convenience alias for journal results.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors surfaced by the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Aggregated view of one day's trading.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DailySummary {
    /// Trades recorded on the day.
    pub count: usize,
    /// Sum of per-trade pnl.
    pub total_pnl: f64,
    /// Up to the last five trades of the day, oldest first.
    pub sample: Vec<TradeRecord>,
}

/// Append-only CSV trade log.
///
/// Appends are serialized through a mutex; the bot is the only writer, but
/// the monitor loop and the reporting command may share one instance.
pub struct TradeJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TradeJournal {
    /// Open a journal at `path`, creating the file with a header row when it
    /// does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            let file = OpenOptions::new().create(true).write(true).open(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(["timestamp", "symbol", "side", "entry", "exit", "pnl"])?;
            writer.flush()?;
            info!(path = %path.display(), "trade journal created");
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one trade and flush it to disk before returning.
    pub fn record(&self, trade: &TradeRecord) -> JournalResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            trade.timestamp.to_rfc3339(),
            trade.symbol.clone(),
            trade.side.to_string(),
            trade.entry.to_string(),
            trade.exit.to_string(),
            trade.pnl.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    /// Read every row stamped on `day` and aggregate it.
    pub fn summarize(&self, day: NaiveDate) -> JournalResult<DailySummary> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut summary = DailySummary::default();
        for row in reader.deserialize::<RawRow>() {
            let row = row?;
            let Some(trade) = row.into_trade() else {
                continue;
            };
            if trade.timestamp.date_naive() != day {
                continue;
            }
            summary.count += 1;
            summary.total_pnl += trade.pnl;
            summary.sample.push(trade);
            if summary.sample.len() > 5 {
                summary.sample.remove(0);
            }
        }
        Ok(summary)
    }
}

/// Row as stored on disk; parsed leniently so one mangled line does not
/// poison the whole report.
#[derive(Debug, serde::Deserialize)]
struct RawRow {
    timestamp: String,
    symbol: String,
    side: String,
    entry: f64,
    exit: f64,
    pnl: f64,
}

impl RawRow {
    fn into_trade(self) -> Option<TradeRecord> {
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()?
            .with_timezone(&chrono::Utc);
        let side = self.side.parse().ok()?;
        Some(TradeRecord {
            timestamp,
            symbol: self.symbol,
            side,
            entry: self.entry,
            exit: self.exit,
            pnl: self.pnl,
        })
    }
}
