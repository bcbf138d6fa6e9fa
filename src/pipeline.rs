//! Cycle orchestration: the leaf modules glued into one read-compute-write
//! pass, plus the delayed reflection pass.
//!
//! A cycle holds the lock for its whole read-modify-write window. State
//! corruption aborts before any write so the prior snapshots stay intact;
//! per-item failures (bad signal, rejected decision) are logged and skipped
//! without losing the cycle.

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::decision;
use crate::executor::{settle_outcomes, ExecutionRecorder};
use crate::extract;
use crate::logging::{json_log, now_ts, obj, ts_now, v_num, v_str};
use crate::model::{AlphaSignal, WorldviewState};
use crate::portfolio::PortfolioState;
use crate::reflection;
use crate::storage::{CycleRow, CycleStore};
use crate::store::{
    append_history, load_json_document, write_json_atomic, CycleLock, SignalStore, TradeLog,
};
use crate::error::PipelineError;
use crate::trust::TrustLedger;
use crate::venue::{ExecutionVenue, SettlementFeed, SignalFeed};

#[derive(Debug)]
pub struct CycleOutcome {
    pub state_id: u64,
    pub signals_in: usize,
    pub decisions: usize,
    pub trades: usize,
    pub halted: bool,
    /// True when another cycle held the lock and this trigger stepped aside.
    pub skipped: bool,
}

/// Backfill extraction for signals ingested as raw text. Keyword extraction
/// is the fallback path; richer extraction can land upstream and arrives
/// already populated.
fn backfill_extraction(signals: &mut [AlphaSignal], trust: &TrustLedger) {
    for signal in signals.iter_mut() {
        if signal.extracted_signal.is_some() {
            continue;
        }
        let source_trust = if signal.is_human_override() {
            1.0
        } else {
            trust.trust_for(&signal.source)
        };
        signal.extracted_signal = extract::extract(&signal.raw_content, source_trust);
    }
}

/// Pull new signals from a feed into the store, deduplicated by id. A dead
/// feed is an ingestion gap: reported, and retried next cycle; it never
/// blocks synthesis over what is already stored.
pub async fn ingest(feed: &(dyn SignalFeed + Send + Sync), cfg: &Config) -> Result<usize> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let store = SignalStore::new(cfg.signals_path());
    let fetched = feed.fetch_signals().await.map_err(|err| PipelineError::IngestionGap {
        feed: "signal_feed".into(),
        reason: err.to_string(),
    })?;

    let known = store.known_ids()?;
    let mut added = 0usize;
    for signal in fetched {
        if known.contains(&signal.id) {
            continue;
        }
        if let Err(err) = signal.validate() {
            json_log(
                "pipeline",
                obj(&[("event", v_str("signal_rejected")), ("error", v_str(&err.to_string()))]),
            );
            continue;
        }
        store.append(&signal)?;
        added += 1;
    }
    if added > 0 {
        json_log(
            "pipeline",
            obj(&[("event", v_str("signals_ingested")), ("count", v_num(added as f64))]),
        );
    }
    Ok(added)
}

pub async fn run_cycle(
    cfg: &Config,
    venue: &(dyn ExecutionVenue + Send + Sync),
) -> Result<CycleOutcome> {
    std::fs::create_dir_all(&cfg.data_dir)?;

    let Some(_lock) = CycleLock::acquire(&cfg.lock_path(), cfg.lock_stale_secs)? else {
        json_log("pipeline", obj(&[("event", v_str("cycle_skipped_lock_held"))]));
        return Ok(CycleOutcome {
            state_id: 0,
            signals_in: 0,
            decisions: 0,
            trades: 0,
            halted: false,
            skipped: true,
        });
    };

    // Any corruption surfaces here, before a single write happens.
    let prior: WorldviewState =
        load_json_document(&cfg.worldview_path())?.unwrap_or_else(WorldviewState::genesis);
    let trust: TrustLedger = load_json_document(&cfg.trust_path())?.unwrap_or_default();
    let mut portfolio: PortfolioState = load_json_document(&cfg.portfolio_path())?
        .unwrap_or_else(|| PortfolioState::new(cfg.starting_capital));

    let store = SignalStore::new(cfg.signals_path());
    let (mut signals, cursor) = store.read_from(prior.signals_processed)?;
    backfill_extraction(&mut signals, &trust);

    let now_iso = ts_now();
    let mut worldview = crate::worldview::synthesize(&signals, &trust, &prior, cfg, &now_iso);
    worldview.signals_processed = cursor;

    let batch = decision::decide(&worldview, &portfolio, cfg, &now_iso);

    let trade_log = TradeLog::new(cfg.trades_path());
    let recorder = ExecutionRecorder::new(venue, &trade_log, cfg);
    let report = recorder.record(&batch.decisions, &mut portfolio, &now_iso).await;
    crate::worldview::mark_closed(&mut worldview, &report.closed_assets, &now_iso);

    // Portfolio first: it reflects the trades already appended to the log.
    // If the process dies before the worldview (and its signal cursor) lands,
    // the next cycle replays the same signals against a portfolio that
    // already holds the positions, and holds instead of re-opening.
    write_json_atomic(&cfg.portfolio_path(), &portfolio)?;
    write_json_atomic(&cfg.worldview_path(), &worldview)?;
    append_history(&cfg.history_path(), &worldview)?;
    write_json_atomic(
        &cfg.pending_path(),
        &serde_json::json!({
            "generated_at": now_iso,
            "state_id": worldview.state_id,
            "halted": batch.halted,
            "decisions": batch.decisions,
        }),
    )?;

    let mut cycles = CycleStore::new(&cfg.sqlite_path)?;
    cycles.init()?;
    cycles.record_cycle(&CycleRow {
        ts: now_ts(),
        state_id: worldview.state_id,
        signals_in: signals.len() as u64,
        active_theses: worldview.active_theses.len() as u64,
        decisions: batch.decisions.len() as u64,
        trades: report.trades.len() as u64,
        equity: portfolio.total_value_usd,
        drawdown: portfolio.drawdown(),
        halted: batch.halted,
    })?;

    json_log(
        "pipeline",
        obj(&[
            ("event", v_str("cycle_complete")),
            ("state_id", v_num(worldview.state_id as f64)),
            ("signals_in", v_num(signals.len() as f64)),
            ("decisions", v_num(batch.decisions.len() as f64)),
            ("trades", v_num(report.trades.len() as f64)),
            ("failures", v_num(report.failures.len() as f64)),
            ("equity", v_num(portfolio.total_value_usd)),
            ("halted", serde_json::json!(batch.halted)),
        ]),
    );

    Ok(CycleOutcome {
        state_id: worldview.state_id,
        signals_in: signals.len(),
        decisions: batch.decisions.len(),
        trades: report.trades.len(),
        halted: batch.halted,
        skipped: false,
    })
}

/// Delayed settlement-and-attribution pass. Takes the same exclusion lock
/// as the cycle so it never reads a half-written trade or races a cycle's
/// trust read; when the lock is held it steps aside until its next trigger.
pub async fn run_reflection(
    cfg: &Config,
    feed: &(dyn SettlementFeed + Send + Sync),
) -> Result<usize> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let Some(_lock) = CycleLock::acquire(&cfg.lock_path(), cfg.lock_stale_secs)? else {
        json_log("pipeline", obj(&[("event", v_str("reflection_skipped_lock_held"))]));
        return Ok(0);
    };
    let trade_log = TradeLog::new(cfg.trades_path());
    let mut portfolio: PortfolioState = load_json_document(&cfg.portfolio_path())?
        .unwrap_or_else(|| PortfolioState::new(cfg.starting_capital));

    // Settlement persists the portfolio itself, before each settled marker,
    // so a crash mid-pass never strands booked P&L behind a settled trade.
    let now_iso = ts_now();
    let settled = settle_outcomes(
        &trade_log,
        &mut portfolio,
        &cfg.portfolio_path(),
        feed,
        Utc::now(),
        &now_iso,
    )
    .await?;

    let mut ledger: TrustLedger = load_json_document(&cfg.trust_path())?.unwrap_or_default();
    let matured: Vec<_> =
        trade_log.load_all()?.into_iter().filter(|t| t.pnl.is_some()).collect();
    let summary = reflection::reflect(&matured, &mut ledger, cfg);
    if summary.trades_attributed > 0 {
        write_json_atomic(&cfg.trust_path(), &ledger)?;
    }

    json_log(
        "pipeline",
        obj(&[
            ("event", v_str("reflection_complete")),
            ("settled", v_num(settled.len() as f64)),
            ("attributed", v_num(summary.trades_attributed as f64)),
            ("sources_touched", v_num(summary.sources_touched as f64)),
            ("ledger_sources", v_num(ledger.source_count() as f64)),
        ]),
    );
    Ok(summary.trades_attributed)
}
