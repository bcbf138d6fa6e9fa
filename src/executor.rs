//! Execution recorder: turns approved decisions into trade log entries and
//! portfolio updates, and books settled outcomes back into equity.
//!
//! Each decision is handled in isolation: a venue rejection or timeout logs
//! an execution failure and moves on, it never aborts the batch. Portfolio
//! mutation is commit-on-success, applied to a working copy that replaces
//! the live record only after the trade log append has landed.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{timeout, Duration};

use crate::config::Config;
use crate::error::PipelineError;
use crate::logging::{json_log, obj, v_num, v_str};
use crate::model::{content_id, Trade, TradeAction, TradeDecision};
use crate::portfolio::PortfolioState;
use crate::store::{write_json_atomic, TradeLog};
use crate::venue::{retry_async, ExecutionVenue, RetryConfig, SettlementFeed};

pub struct ExecutionReport {
    pub trades: Vec<Trade>,
    /// Assets whose positions were exited this batch; the worldview marks
    /// the matching theses closed.
    pub closed_assets: Vec<String>,
    pub failures: Vec<PipelineError>,
}

pub struct ExecutionRecorder<'a> {
    venue: &'a (dyn ExecutionVenue + Send + Sync),
    trade_log: &'a TradeLog,
    retry: RetryConfig,
    timeout_secs: u64,
}

impl<'a> ExecutionRecorder<'a> {
    pub fn new(
        venue: &'a (dyn ExecutionVenue + Send + Sync),
        trade_log: &'a TradeLog,
        cfg: &Config,
    ) -> Self {
        Self {
            venue,
            trade_log,
            retry: RetryConfig::default(),
            timeout_secs: cfg.venue_timeout_secs,
        }
    }

    pub async fn record(
        &self,
        decisions: &[TradeDecision],
        portfolio: &mut PortfolioState,
        now_iso: &str,
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            trades: Vec::new(),
            closed_assets: Vec::new(),
            failures: Vec::new(),
        };

        for decision in decisions {
            match self.execute_one(decision, portfolio, now_iso).await {
                Ok(trade) => {
                    json_log(
                        "executor",
                        obj(&[
                            ("event", v_str("trade_recorded")),
                            ("trade_id", v_str(&trade.id)),
                            ("asset", v_str(&trade.asset)),
                            ("action", v_str(trade.action.as_str())),
                            ("size", v_num(trade.size)),
                            ("entry_price", v_num(trade.entry_price)),
                        ]),
                    );
                    if trade.action == TradeAction::Close {
                        report.closed_assets.push(trade.asset.clone());
                    }
                    report.trades.push(trade);
                }
                Err(err) => {
                    let failure = PipelineError::ExecutionFailure {
                        decision_id: decision.id.clone(),
                        reason: err.to_string(),
                    };
                    json_log(
                        "executor",
                        obj(&[
                            ("event", v_str("execution_failure")),
                            ("decision_id", v_str(&decision.id)),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                    report.failures.push(failure);
                }
            }
        }
        report
    }

    async fn execute_one(
        &self,
        decision: &TradeDecision,
        portfolio: &mut PortfolioState,
        now_iso: &str,
    ) -> Result<Trade> {
        let receipt = timeout(
            Duration::from_secs(self.timeout_secs),
            retry_async(&self.retry, "submit_trade", || self.venue.submit(decision)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("venue timed out after {}s", self.timeout_secs))??;

        let trade = Trade {
            id: content_id("trade", &[&decision.id, &receipt.tx_ref], 12),
            decision_id: decision.id.clone(),
            thesis_id: decision.thesis_id.clone(),
            asset: decision.asset.clone(),
            executed_asset: decision.executed_asset.clone(),
            action: decision.action,
            entry_price: receipt.entry_price,
            size: decision.size,
            confidence: decision.confidence,
            sources: decision.sources.clone(),
            executed_at: now_iso.to_string(),
            tx_ref: receipt.tx_ref,
            pnl: None,
        };

        // Durable record first, then the in-memory commit. The working copy
        // keeps a failed append from leaving a half-updated portfolio.
        let mut next = portfolio.clone();
        next.apply_trade(&trade, now_iso);
        self.trade_log.append(&trade)?;
        *portfolio = next;
        Ok(trade)
    }
}

/// Settle matured trades: query the settlement feed for every unsettled
/// trade, book the realized P&L into the portfolio, persist the portfolio,
/// and only then write the settled marker into the trade log. Booking is
/// keyed on the trade id, so a crash between the portfolio write and the
/// marker replays as a no-op instead of double-counting equity. Per-trade
/// isolation, same as execution.
pub async fn settle_outcomes(
    trade_log: &TradeLog,
    portfolio: &mut PortfolioState,
    portfolio_path: &Path,
    feed: &(dyn SettlementFeed + Send + Sync),
    now: DateTime<Utc>,
    now_iso: &str,
) -> Result<Vec<Trade>> {
    let mut settled = Vec::new();
    for trade in trade_log.unsettled()? {
        let pnl = match feed.outcome(&trade, now).await {
            Ok(Some(pnl)) => pnl,
            Ok(None) => continue, // not matured yet
            Err(err) => {
                json_log(
                    "executor",
                    obj(&[
                        ("event", v_str("settlement_error")),
                        ("trade_id", v_str(&trade.id)),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                continue;
            }
        };
        if portfolio.apply_outcome(&trade.id, pnl, now_iso) {
            write_json_atomic(portfolio_path, portfolio)?;
        }
        let trade = trade_log.settle(&trade.id, pnl)?;
        json_log(
            "executor",
            obj(&[
                ("event", v_str("trade_settled")),
                ("trade_id", v_str(&trade.id)),
                ("pnl", v_num(pnl)),
            ]),
        );
        settled.push(trade);
    }
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::content_id;
    use crate::venue::{PaperVenue, VenueReceipt};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct RejectingVenue;

    #[async_trait]
    impl ExecutionVenue for RejectingVenue {
        async fn submit(&self, _decision: &TradeDecision) -> Result<VenueReceipt> {
            Err(anyhow::anyhow!("insufficient liquidity"))
        }
    }

    struct HangingVenue;

    #[async_trait]
    impl ExecutionVenue for HangingVenue {
        async fn submit(&self, _decision: &TradeDecision) -> Result<VenueReceipt> {
            std::future::pending().await
        }
    }

    struct FixedSettlement(Option<f64>);

    #[async_trait]
    impl SettlementFeed for FixedSettlement {
        async fn outcome(&self, _trade: &Trade, _now: DateTime<Utc>) -> Result<Option<f64>> {
            Ok(self.0)
        }
    }

    fn cfg() -> Config {
        Config::with_data_dir("/tmp/afx-executor-test")
    }

    fn decision(asset: &str, action: TradeAction, size: f64) -> TradeDecision {
        TradeDecision {
            id: content_id("decision", &[asset, action.as_str()], 10),
            thesis_id: format!("thesis-{}", asset),
            asset: asset.into(),
            executed_asset: if asset == "BTC" { "WBTC".into() } else { "WETH".into() },
            action,
            size,
            confidence: 0.9,
            sources: vec!["A".into(), "B".into()],
            generated_at: "t1".into(),
        }
    }

    #[tokio::test]
    async fn test_open_decision_becomes_logged_trade_and_position() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = PaperVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);

        let report = recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;
        assert_eq!(report.trades.len(), 1);
        assert!(report.failures.is_empty());
        assert!(pf.has_position("BTC"));
        assert_eq!(pf.positions["BTC"].entry_price, 60_000.0);

        let logged = log.load_all().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].tx_ref, format!("paper-{}", report.trades[0].decision_id));
    }

    #[tokio::test]
    async fn test_venue_rejection_isolates_the_one_decision() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = RejectingVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);
        let before = pf.clone();

        let report = recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;
        assert!(report.trades.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!report.failures[0].is_fatal());
        // No partial update observable.
        assert_eq!(pf.positions.len(), before.positions.len());
        assert_eq!(pf.total_value_usd, before.total_value_usd);
        assert!(log.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hung_venue_times_out_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = HangingVenue;
        let mut cfg = cfg();
        cfg.venue_timeout_secs = 1;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg);
        let mut pf = PortfolioState::new(10_000.0);

        let report = recorder
            .record(
                &[
                    decision("BTC", TradeAction::OpenLong, 0.5),
                    decision("ETH", TradeAction::OpenLong, 0.3),
                ],
                &mut pf,
                "t1",
            )
            .await;
        // Both decisions time out independently; neither aborts the batch.
        assert!(report.trades.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| !f.is_fatal()));
        assert!(report.failures[0].to_string().contains("timed out"));
        assert!(pf.positions.is_empty());
        assert!(log.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_reports_the_asset_for_thesis_closure() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = PaperVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);

        recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;
        let report = recorder
            .record(&[decision("BTC", TradeAction::Close, 0.0)], &mut pf, "t2")
            .await;
        assert_eq!(report.closed_assets, vec!["BTC".to_string()]);
        assert!(!pf.has_position("BTC"));
    }

    #[tokio::test]
    async fn test_settlement_books_pnl_once() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = PaperVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);
        recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;

        let now = Utc::now();
        let pf_path = dir.path().join("portfolio.json");
        let feed = FixedSettlement(Some(-250.0));
        let settled =
            settle_outcomes(&log, &mut pf, &pf_path, &feed, now, "t2").await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(pf.realized_pnl, -250.0);
        assert_eq!(pf.total_value_usd, 9_750.0);
        // Portfolio snapshot was persisted alongside the settled marker.
        let saved: PortfolioState =
            crate::store::load_json_document(&pf_path).unwrap().unwrap();
        assert_eq!(saved.realized_pnl, -250.0);

        // Already settled: nothing left to book.
        let settled =
            settle_outcomes(&log, &mut pf, &pf_path, &feed, now, "t3").await.unwrap();
        assert!(settled.is_empty());
        assert_eq!(pf.realized_pnl, -250.0);
    }

    // A crash between the portfolio write and the trade log's settled marker
    // leaves the trade unsettled with its P&L already in equity. Replaying
    // settlement must mark the trade without booking the P&L again.
    #[tokio::test]
    async fn test_replayed_settlement_does_not_double_book() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = PaperVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);
        let report = recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;
        let trade_id = report.trades[0].id.clone();

        // Booked in the portfolio, but the settled marker never landed.
        pf.apply_outcome(&trade_id, -250.0, "t2");

        let pf_path = dir.path().join("portfolio.json");
        let feed = FixedSettlement(Some(-250.0));
        let settled =
            settle_outcomes(&log, &mut pf, &pf_path, &feed, Utc::now(), "t3").await.unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(pf.realized_pnl, -250.0);
        assert_eq!(pf.total_value_usd, 9_750.0);
        assert!(log.unsettled().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatured_trades_stay_unsettled() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));
        let venue = PaperVenue;
        let recorder = ExecutionRecorder::new(&venue, &log, &cfg());
        let mut pf = PortfolioState::new(10_000.0);
        recorder
            .record(&[decision("BTC", TradeAction::OpenLong, 0.5)], &mut pf, "t1")
            .await;

        let feed = FixedSettlement(None);
        let pf_path = dir.path().join("portfolio.json");
        let settled =
            settle_outcomes(&log, &mut pf, &pf_path, &feed, Utc::now(), "t2").await.unwrap();
        assert!(settled.is_empty());
        assert_eq!(log.unsettled().unwrap().len(), 1);
    }
}
