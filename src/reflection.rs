//! Reflection updater: attribute settled trade P&L back to the sources that
//! drove the trade, and adjust their trust.
//!
//! Idempotent by construction: attributed trade ids land in the ledger's
//! processed-set in the same document write, so replaying a settled trade is
//! a no-op. Trust moves gradually (small learning rate, P&L magnitude
//! capped) and is clamped to [0, 1]; sources are never removed.

use crate::config::Config;
use crate::logging::{json_log, obj, v_num, v_str};
use crate::model::{SourceType, Trade};
use crate::trust::TrustLedger;

pub struct ReflectionSummary {
    pub trades_attributed: usize,
    pub sources_touched: usize,
}

/// Fold settled trades into the trust ledger. Every source listed on a
/// trade receives the full capped delta; attribution is not split across
/// sources, each carries equal responsibility for the call.
pub fn reflect(
    trades: &[Trade],
    ledger: &mut TrustLedger,
    cfg: &Config,
) -> ReflectionSummary {
    let mut summary = ReflectionSummary { trades_attributed: 0, sources_touched: 0 };

    for trade in trades {
        let Some(pnl) = trade.pnl else { continue };
        if ledger.reflected_trades.contains(&trade.id) {
            continue;
        }

        let delta = cfg.trust_learning_rate * pnl.signum() * pnl.abs().min(cfg.pnl_cap);
        for source_id in &trade.sources {
            // Sources seen only through trade provenance get created under
            // the catch-all group at neutral trust before adjustment.
            let weight = ledger.ensure(SourceType::Website, source_id);
            let before = weight.trust;
            weight.trust = (weight.trust + delta).clamp(0.0, 1.0);
            weight.sample_count += 1;
            if pnl > 0.0 {
                weight.wins += 1;
            } else if pnl < 0.0 {
                weight.losses += 1;
            }
            json_log(
                "reflection",
                obj(&[
                    ("event", v_str("trust_adjusted")),
                    ("source", v_str(source_id)),
                    ("trade_id", v_str(&trade.id)),
                    ("pnl", v_num(pnl)),
                    ("trust_before", v_num(before)),
                    ("trust_after", v_num(weight.trust)),
                    ("accuracy", serde_json::json!(weight.accuracy())),
                ]),
            );
            summary.sources_touched += 1;
        }

        ledger.reflected_trades.insert(trade.id.clone());
        summary.trades_attributed += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TradeAction;
    use crate::trust::SourceWeight;

    fn cfg() -> Config {
        Config::with_data_dir("/tmp/afx-reflection-test")
    }

    fn settled_trade(id: &str, pnl: f64, sources: &[&str]) -> Trade {
        Trade {
            id: id.into(),
            decision_id: "dec".into(),
            thesis_id: "thesis".into(),
            asset: "BTC".into(),
            executed_asset: "WBTC".into(),
            action: TradeAction::OpenLong,
            entry_price: 60_000.0,
            size: 0.5,
            confidence: 0.8,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            executed_at: "t1".into(),
            tx_ref: "paper-1".into(),
            pnl: Some(pnl),
        }
    }

    fn ledger_with(entries: &[(&str, f64)]) -> TrustLedger {
        let mut ledger = TrustLedger::default();
        for (id, trust) in entries {
            ledger
                .sources
                .entry(SourceType::Twitter)
                .or_default()
                .push(SourceWeight::seed(id, id, *trust));
        }
        ledger
    }

    #[test]
    fn test_loss_lowers_both_sources_equally() {
        let mut ledger = ledger_with(&[("A", 0.8), ("B", 0.7)]);
        let trades = vec![settled_trade("trade_1", -10.0, &["A", "B"])];
        let summary = reflect(&trades, &mut ledger, &cfg());

        assert_eq!(summary.trades_attributed, 1);
        assert_eq!(summary.sources_touched, 2);
        // delta = lr * sign(-10) * min(10, cap)
        let delta = 0.05 * -1.0 * 10.0_f64.min(cfg().pnl_cap);
        assert!((ledger.trust_for("A") - (0.8 + delta).clamp(0.0, 1.0)).abs() < 1e-9);
        assert!((ledger.trust_for("B") - (0.7 + delta).clamp(0.0, 1.0)).abs() < 1e-9);
        assert_eq!(ledger.find("A").unwrap().sample_count, 1);
        assert_eq!(ledger.find("A").unwrap().losses, 1);
    }

    #[test]
    fn test_replay_changes_trust_only_once() {
        let mut ledger = ledger_with(&[("A", 0.8)]);
        let trades = vec![settled_trade("trade_1", 5.0, &["A"])];

        reflect(&trades, &mut ledger, &cfg());
        let after_first = ledger.trust_for("A");
        let summary = reflect(&trades, &mut ledger, &cfg());

        assert_eq!(summary.trades_attributed, 0);
        assert_eq!(ledger.trust_for("A"), after_first);
        assert_eq!(ledger.find("A").unwrap().sample_count, 1);
    }

    #[test]
    fn test_trust_stays_in_unit_interval() {
        let mut ledger = ledger_with(&[("A", 0.02)]);
        let trades = vec![settled_trade("trade_1", -1000.0, &["A"])];
        reflect(&trades, &mut ledger, &cfg());
        assert_eq!(ledger.trust_for("A"), 0.0);

        // Source stays in the ledger at the floor, it is never deleted.
        assert!(ledger.find("A").is_some());

        let trades = vec![settled_trade("trade_2", 1000.0, &["A"]); 1];
        reflect(&trades, &mut ledger, &cfg());
        assert!(ledger.trust_for("A") <= 1.0);
    }

    #[test]
    fn test_unsettled_trades_are_skipped() {
        let mut ledger = ledger_with(&[("A", 0.5)]);
        let mut trade = settled_trade("trade_1", 0.0, &["A"]);
        trade.pnl = None;
        let summary = reflect(&[trade], &mut ledger, &cfg());
        assert_eq!(summary.trades_attributed, 0);
        assert_eq!(ledger.trust_for("A"), 0.5);
    }

    #[test]
    fn test_unknown_source_is_created_not_dropped() {
        let mut ledger = TrustLedger::default();
        let trades = vec![settled_trade("trade_1", 4.0, &["mystery"])];
        reflect(&trades, &mut ledger, &cfg());
        let w = ledger.find("mystery").expect("created by attribution");
        assert!(w.trust > 0.5);
        assert_eq!(w.sample_count, 1);
    }

    #[test]
    fn test_pnl_magnitude_is_capped() {
        let c = cfg();
        let mut ledger = ledger_with(&[("A", 0.5)]);
        let trades = vec![settled_trade("trade_1", 1.0e6, &["A"])];
        reflect(&trades, &mut ledger, &c);
        let expected = (0.5 + c.trust_learning_rate * c.pnl_cap).clamp(0.0, 1.0);
        assert!((ledger.trust_for("A") - expected).abs() < 1e-9);
    }
}
