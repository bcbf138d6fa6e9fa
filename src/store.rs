//! File-backed persistence: append-only logs, atomic snapshot documents,
//! and the cycle lock.
//!
//! Append-only files (signal store, trade log, worldview history) are
//! newline-delimited JSON, one record per line, insertion order = arrival
//! order. Singleton documents (worldview, portfolio, trust ledger) are
//! replaced via write-temp-then-rename so a crash mid-write leaves the
//! prior snapshot intact.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::error::PipelineError;
use crate::logging::{json_log, obj, ts_now, v_str};
use crate::model::{AlphaSignal, Trade, WorldviewState};

/// Write a JSON document atomically: temp file in the same directory, then
/// rename over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_string_pretty(value)?;
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(body.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Load a singleton document. Absent file means "no prior state" (Ok(None));
/// a present-but-unreadable file is state corruption and must abort the
/// cycle without writing.
pub fn load_json_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PipelineError> {
    let body = match std::fs::read_to_string(path) {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(PipelineError::StateCorruption {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
        }
    };
    serde_json::from_str(&body).map(Some).map_err(|err| {
        PipelineError::StateCorruption {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    })
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

// =============================================================================
// Signal store
// =============================================================================

/// Append-only log of ingested alpha signals. Records are immutable once
/// written; consumers track their own cursor (line offset).
pub struct SignalStore {
    path: PathBuf,
}

impl SignalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, signal: &AlphaSignal) -> Result<()> {
        append_line(&self.path, &serde_json::to_string(signal)?)
    }

    /// Ids already present, for ingestion dedup.
    pub fn known_ids(&self) -> Result<HashSet<String>> {
        let (signals, _) = self.read_from(0)?;
        Ok(signals.into_iter().map(|s| s.id).collect())
    }

    /// Read records starting at a line offset. Returns the valid signals and
    /// the new cursor (total lines seen, malformed included — a bad line is
    /// dropped and logged, never re-read).
    pub fn read_from(&self, offset: u64) -> Result<(Vec<AlphaSignal>, u64)> {
        if !self.path.exists() {
            return Ok((Vec::new(), offset));
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut signals = Vec::new();
        let mut cursor = 0u64;
        for line in reader.lines() {
            let line = line?;
            cursor += 1;
            if cursor <= offset || line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AlphaSignal>(&line) {
                Ok(signal) => match signal.validate() {
                    Ok(()) => signals.push(signal),
                    Err(err) => {
                        json_log(
                            "signal_store",
                            obj(&[("event", v_str("malformed_signal")), ("error", v_str(&err.to_string()))]),
                        );
                    }
                },
                Err(err) => {
                    json_log(
                        "signal_store",
                        obj(&[("event", v_str("malformed_signal")), ("error", v_str(&err.to_string()))]),
                    );
                }
            }
        }
        Ok((signals, cursor.max(offset)))
    }
}

// =============================================================================
// Trade log
// =============================================================================

/// Append-only trade log. `pnl` is the one post-creation mutation, applied
/// exactly once by `settle`.
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, trade: &Trade) -> Result<()> {
        append_line(&self.path, &serde_json::to_string(trade)?)
    }

    pub fn load_all(&self) -> Result<Vec<Trade>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let mut trades = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Trade>(&line) {
                Ok(trade) => trades.push(trade),
                Err(err) => {
                    json_log(
                        "trade_log",
                        obj(&[("event", v_str("unreadable_entry")), ("error", v_str(&err.to_string()))]),
                    );
                }
            }
        }
        Ok(trades)
    }

    pub fn unsettled(&self) -> Result<Vec<Trade>> {
        Ok(self.load_all()?.into_iter().filter(|t| t.pnl.is_none()).collect())
    }

    /// Fill in a trade's outcome. Errors if the trade is unknown or already
    /// settled; the rewrite goes through a temp file so the log is never
    /// observable half-written.
    pub fn settle(&self, trade_id: &str, pnl: f64) -> Result<Trade> {
        let mut trades = self.load_all()?;
        let trade = trades
            .iter_mut()
            .find(|t| t.id == trade_id)
            .with_context(|| format!("unknown trade {}", trade_id))?;
        anyhow::ensure!(
            trade.pnl.is_none(),
            "trade {} already settled with pnl {:?}",
            trade_id,
            trade.pnl
        );
        trade.pnl = Some(pnl);
        let settled = trade.clone();

        let tmp = self.path.with_extension("tmp");
        {
            let mut f = File::create(&tmp)?;
            for t in &trades {
                writeln!(f, "{}", serde_json::to_string(t)?)?;
            }
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(settled)
    }
}

// =============================================================================
// Worldview history
// =============================================================================

/// Append a snapshot to the audit history, keyed by state id.
pub fn append_history(path: &Path, worldview: &WorldviewState) -> Result<()> {
    let entry = json!({
        "state_id": worldview.state_id,
        "timestamp": ts_now(),
        "snapshot": worldview,
    });
    append_line(path, &entry.to_string())
}

// =============================================================================
// Cycle lock
// =============================================================================

/// Mutual-exclusion lease around read-compute-write. Overlapping triggers
/// (a manual run during a scheduled one) see the lock and skip; a lease left
/// behind by a dead process expires after `stale_secs`.
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    pub fn acquire(path: &Path, stale_secs: u64) -> Result<Option<CycleLock>> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let now = crate::logging::now_ts();
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{} {}", std::process::id(), now)?;
                Ok(Some(CycleLock { path: path.to_path_buf() }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let held_since = std::fs::read_to_string(path)
                    .ok()
                    .and_then(|body| body.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok()))
                    .unwrap_or(0);
                if now.saturating_sub(held_since) > stale_secs {
                    json_log(
                        "cycle_lock",
                        obj(&[("event", v_str("stale_lease_broken")), ("path", v_str(&path.display().to_string()))]),
                    );
                    std::fs::remove_file(path)?;
                    return Self::acquire(path, stale_secs);
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
