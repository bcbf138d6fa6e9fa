//! Portfolio state: the single authoritative mutable record.
//!
//! Every mutation goes through the execution recorder or the settlement
//! path; cycles read the previous snapshot and persist a new one atomically.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Direction, Trade, TradeAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Fraction of capital committed, 0..=1.
    pub size: f64,
    pub entry_price: f64,
    pub direction: Direction,
    pub trade_id: String,
    pub opened_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub total_value_usd: f64,
    /// High-water mark for drawdown tracking.
    pub peak_equity: f64,
    /// Keyed by the thesis asset (not the proxy), so the decision engine can
    /// match positions against theses directly.
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    /// Trade ids whose realized P&L is already in the equity figures. Booking
    /// is keyed on this set so the settlement pass can persist the portfolio
    /// before the trade log's settled marker lands; replaying a trade whose
    /// marker was lost is a no-op.
    #[serde(default)]
    pub settled_trades: BTreeSet<String>,
    pub last_updated: String,
}

impl PortfolioState {
    pub fn new(starting_capital: f64) -> Self {
        Self {
            total_value_usd: starting_capital,
            peak_equity: starting_capital,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            settled_trades: BTreeSet::new(),
            last_updated: String::new(),
        }
    }

    /// (peak − current) / peak, zero when the peak is unset.
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.total_value_usd) / self.peak_equity).max(0.0)
    }

    pub fn has_position(&self, asset: &str) -> bool {
        self.positions.contains_key(asset)
    }

    /// Fold an executed trade into positions. Open/close bookkeeping only;
    /// P&L lands later through `apply_outcome`. Callers apply this to a
    /// working copy and commit the copy, so a failed trade never leaves a
    /// half-updated record behind.
    pub fn apply_trade(&mut self, trade: &Trade, now_iso: &str) {
        match trade.action {
            TradeAction::OpenLong | TradeAction::OpenShort => {
                let direction = if trade.action == TradeAction::OpenLong {
                    Direction::Long
                } else {
                    Direction::Short
                };
                self.positions.insert(
                    trade.asset.clone(),
                    Position {
                        size: trade.size,
                        entry_price: trade.entry_price,
                        direction,
                        trade_id: trade.id.clone(),
                        opened_at: trade.executed_at.clone(),
                    },
                );
            }
            TradeAction::Close => {
                self.positions.remove(&trade.asset);
            }
            TradeAction::Hold => {}
        }
        self.refresh_peak();
        self.last_updated = now_iso.to_string();
    }

    /// Book a settled outcome exactly once: realized P&L moves equity, then
    /// the peak and drawdown are recomputed together. Returns false when the
    /// trade was already booked.
    pub fn apply_outcome(&mut self, trade_id: &str, pnl: f64, now_iso: &str) -> bool {
        if !self.settled_trades.insert(trade_id.to_string()) {
            return false;
        }
        self.realized_pnl += pnl;
        self.total_value_usd += pnl;
        self.refresh_peak();
        self.last_updated = now_iso.to_string();
        true
    }

    fn refresh_peak(&mut self) {
        if self.total_value_usd > self.peak_equity {
            self.peak_equity = self.total_value_usd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trade;

    fn open_trade(asset: &str, action: TradeAction, size: f64) -> Trade {
        Trade {
            id: format!("trade_{}", asset.to_lowercase()),
            decision_id: "dec_1".into(),
            thesis_id: "thesis_1".into(),
            asset: asset.into(),
            executed_asset: "WETH".into(),
            action,
            entry_price: 3000.0,
            size,
            confidence: 0.8,
            sources: vec!["src_a".into()],
            executed_at: "2026-01-01T00:00:00Z".into(),
            tx_ref: "paper-1".into(),
            pnl: None,
        }
    }

    #[test]
    fn test_drawdown_from_peak() {
        let mut p = PortfolioState::new(1000.0);
        assert_eq!(p.drawdown(), 0.0);
        p.apply_outcome("trade_a", -200.0, "t");
        assert!((p.drawdown() - 0.2).abs() < 1e-9);
        // Recovery above the old peak resets the mark.
        p.apply_outcome("trade_b", 400.0, "t");
        assert_eq!(p.drawdown(), 0.0);
        assert_eq!(p.peak_equity, 1200.0);
    }

    #[test]
    fn test_gains_never_show_negative_drawdown() {
        let mut p = PortfolioState::new(1000.0);
        p.apply_outcome("trade_a", 500.0, "t");
        assert_eq!(p.drawdown(), 0.0);
    }

    #[test]
    fn test_apply_trade_open_then_close() {
        let mut p = PortfolioState::new(1000.0);
        p.apply_trade(&open_trade("BTC", TradeAction::OpenLong, 0.4), "t");
        assert!(p.has_position("BTC"));
        assert_eq!(p.positions["BTC"].direction, Direction::Long);

        p.apply_trade(&open_trade("BTC", TradeAction::Close, 0.0), "t");
        assert!(!p.has_position("BTC"));
    }

    #[test]
    fn test_outcome_books_realized_pnl() {
        let mut p = PortfolioState::new(1000.0);
        assert!(p.apply_outcome("trade_a", -50.0, "t"));
        assert_eq!(p.realized_pnl, -50.0);
        assert_eq!(p.total_value_usd, 950.0);
        assert_eq!(p.peak_equity, 1000.0);
    }

    #[test]
    fn test_outcome_for_same_trade_books_once() {
        let mut p = PortfolioState::new(1000.0);
        assert!(p.apply_outcome("trade_a", -50.0, "t1"));
        assert!(!p.apply_outcome("trade_a", -50.0, "t2"));
        assert_eq!(p.realized_pnl, -50.0);
        assert_eq!(p.total_value_usd, 950.0);
    }
}
