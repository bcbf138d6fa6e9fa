//! Risk-gated decision engine.
//!
//! Pure function of (worldview, portfolio, limits): no IO, no clock reads
//! beyond the timestamp handed in. Output ordering is stable so execution
//! downstream is deterministic for a given input pair.

use crate::config::Config;
use crate::logging::{json_log, obj, v_num, v_str};
use crate::model::{content_id, Direction, ThesisStatus, TradeAction, TradeDecision, WorldviewState};
use crate::portfolio::PortfolioState;
use crate::taxonomy;

/// The decisions for one cycle, plus whether the drawdown breaker tripped.
/// `halted` is surfaced to the pipeline so operators see the breach even
/// when the decision list is empty.
pub struct DecisionBatch {
    pub decisions: Vec<TradeDecision>,
    pub halted: bool,
}

pub fn decide(
    worldview: &WorldviewState,
    portfolio: &PortfolioState,
    cfg: &Config,
    now_iso: &str,
) -> DecisionBatch {
    let drawdown = portfolio.drawdown();
    let halted = drawdown >= cfg.max_drawdown;
    if halted {
        json_log(
            "decision",
            obj(&[
                ("event", v_str("risk_halt")),
                ("drawdown", v_num(drawdown)),
                ("max_drawdown", v_num(cfg.max_drawdown)),
            ]),
        );
    }

    let mut closes: Vec<TradeDecision> = Vec::new();
    let mut opens: Vec<TradeDecision> = Vec::new();

    // Invalidated theses with an open position exit unconditionally; closing
    // is allowed even under the drawdown halt since it reduces exposure.
    for thesis in &worldview.active_theses {
        if thesis.status == ThesisStatus::Invalidated && portfolio.has_position(&thesis.asset) {
            closes.push(make_decision(thesis, TradeAction::Close, 0.0, &thesis.asset, now_iso));
        }
    }

    // A position whose thesis is gone (its close was rejected at the venue
    // and the thesis pruned on the next pass) is no longer under management
    // and must still be exited. The close keeps retrying every cycle until
    // the venue accepts it.
    for (asset, position) in &portfolio.positions {
        let backed = worldview.active_theses.iter().any(|t| {
            t.asset == *asset
                && matches!(t.status, ThesisStatus::Active | ThesisStatus::Invalidated)
        });
        if !backed {
            json_log(
                "decision",
                obj(&[
                    ("event", v_str("orphaned_position_close")),
                    ("asset", v_str(asset)),
                    ("opening_trade", v_str(&position.trade_id)),
                ]),
            );
            closes.push(orphan_close(asset, position, now_iso));
        }
    }

    for thesis in weigh_conflicts(worldview) {
        if thesis.status != ThesisStatus::Active || thesis.confidence < cfg.confidence_threshold {
            continue;
        }
        let Some(executed_asset) = taxonomy::resolve_proxy(&thesis.asset) else {
            json_log(
                "decision",
                obj(&[
                    ("event", v_str("no_proxy")),
                    ("asset", v_str(&thesis.asset)),
                    ("thesis_id", v_str(&thesis.id)),
                ]),
            );
            continue;
        };

        let flipped = portfolio
            .positions
            .get(&thesis.asset)
            .map(|p| p.direction == thesis.direction.opposite())
            .unwrap_or(false);
        if flipped {
            closes.push(make_decision(thesis, TradeAction::Close, 0.0, executed_asset, now_iso));
        } else if portfolio.has_position(&thesis.asset) {
            continue; // already positioned the right way
        }
        if halted {
            continue;
        }

        let size = ((thesis.confidence - cfg.confidence_threshold)
            / (1.0 - cfg.confidence_threshold))
            .min(cfg.max_position_size);
        if size <= 0.0 {
            continue;
        }
        let action = match thesis.direction {
            Direction::Long => TradeAction::OpenLong,
            Direction::Short => TradeAction::OpenShort,
            Direction::Neutral => continue,
        };
        opens.push(make_decision(thesis, action, size, executed_asset, now_iso));
    }

    // Closes first, then opens by descending confidence.
    opens.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    closes.extend(opens);
    DecisionBatch { decisions: closes, halted }
}

/// Pick one thesis per asset. When conflicting directions reference the same
/// asset, the higher confidence wins; an exact tie emits nothing for that
/// asset to avoid thrashing.
fn weigh_conflicts(worldview: &WorldviewState) -> Vec<&crate::model::Thesis> {
    let mut winners: Vec<&crate::model::Thesis> = Vec::new();
    for thesis in &worldview.active_theses {
        if thesis.status != ThesisStatus::Active {
            continue;
        }
        match winners.iter().position(|w| w.asset == thesis.asset) {
            None => winners.push(thesis),
            Some(idx) => {
                let held = winners[idx];
                if held.direction != thesis.direction && held.confidence == thesis.confidence {
                    winners.remove(idx);
                } else if thesis.confidence > held.confidence {
                    winners[idx] = thesis;
                }
            }
        }
    }
    winners
}

/// Close for a position with no surviving thesis. The decision references
/// the opening trade instead of a thesis id.
fn orphan_close(
    asset: &str,
    position: &crate::portfolio::Position,
    now_iso: &str,
) -> TradeDecision {
    TradeDecision {
        id: content_id("decision", &[asset, &position.trade_id, "close", now_iso], 10),
        thesis_id: position.trade_id.clone(),
        asset: asset.to_string(),
        executed_asset: taxonomy::resolve_proxy(asset).unwrap_or(asset).to_string(),
        action: TradeAction::Close,
        size: 0.0,
        confidence: 0.0,
        sources: Vec::new(),
        generated_at: now_iso.to_string(),
    }
}

fn make_decision(
    thesis: &crate::model::Thesis,
    action: TradeAction,
    size: f64,
    executed_asset: &str,
    now_iso: &str,
) -> TradeDecision {
    TradeDecision {
        id: content_id("decision", &[&thesis.id, action.as_str(), now_iso], 10),
        thesis_id: thesis.id.clone(),
        asset: thesis.asset.clone(),
        executed_asset: executed_asset.to_string(),
        action,
        size,
        confidence: thesis.confidence,
        sources: thesis.sources.clone(),
        generated_at: now_iso.to_string(),
    }
}
