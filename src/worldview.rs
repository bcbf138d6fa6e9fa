//! Worldview synthesis: fold new evidence into the belief state.
//!
//! Each usable signal contributes an evidence vector (asset, direction,
//! confidence x source trust). Evidence accumulates against a thesis's
//! existing mass, so one loud signal cannot flip an established view but
//! repeated corroboration can. The whole pass is deterministic given
//! (signals, trust, prior): iteration runs over sorted maps and ids derive
//! from content hashes.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::model::{
    content_id, AlphaSignal, Belief, Direction, SectorView, Stance, Thesis, ThesisStatus,
    WorldviewState,
};
use crate::taxonomy;
use crate::trust::TrustLedger;

struct EvidenceItem {
    source: String,
    direction: Direction,
    confidence: f64,
    weight: f64,
}

/// Group usable signals into per-asset evidence. Signals without an
/// extracted payload or without a direction are retained in the store but
/// contribute nothing here.
fn gather_evidence(
    signals: &[AlphaSignal],
    trust: &TrustLedger,
) -> BTreeMap<String, Vec<EvidenceItem>> {
    let mut by_asset: BTreeMap<String, Vec<EvidenceItem>> = BTreeMap::new();
    for signal in signals {
        let Some(es) = &signal.extracted_signal else { continue };
        if !es.direction.is_directional() || es.asset.is_empty() {
            continue;
        }
        // Operator overrides ride the same pathway at max trust.
        let source_trust = if signal.is_human_override() {
            1.0
        } else {
            trust.trust_for(&signal.source)
        };
        let weight = source_trust * es.confidence;
        if weight <= 0.0 {
            continue;
        }
        by_asset
            .entry(es.asset.to_ascii_uppercase())
            .or_default()
            .push(EvidenceItem {
                source: signal.source.clone(),
                direction: es.direction,
                confidence: es.confidence,
                weight,
            });
    }
    by_asset
}

/// Majority direction by weight; `None` on an exact tie.
fn majority_direction(items: &[EvidenceItem]) -> Option<Direction> {
    let long: f64 = items.iter().filter(|i| i.direction == Direction::Long).map(|i| i.weight).sum();
    let short: f64 =
        items.iter().filter(|i| i.direction == Direction::Short).map(|i| i.weight).sum();
    if long > short {
        Some(Direction::Long)
    } else if short > long {
        Some(Direction::Short)
    } else {
        None
    }
}

/// Blend prior thesis confidence with new weighted evidence.
///
/// Supporting evidence pulls toward the signal's own confidence; opposing
/// evidence pulls toward its complement. The prior weight is the thesis's
/// accumulated mass, so convergence slows as a thesis matures.
fn blend(
    prior_conf: f64,
    prior_mass: f64,
    direction: Direction,
    items: &[EvidenceItem],
) -> (f64, f64, f64) {
    let mut numerator = prior_conf * prior_mass;
    let mut mass = prior_mass;
    let mut oppose_mass = 0.0;
    for item in items {
        let value = if item.direction == direction {
            item.confidence
        } else {
            oppose_mass += item.weight;
            1.0 - item.confidence
        };
        numerator += value * item.weight;
        mass += item.weight;
    }
    let blended = if mass > 0.0 { numerator / mass } else { prior_conf };
    (blended.clamp(0.0, 1.0), mass, oppose_mass)
}

fn merge_sources(existing: &mut Vec<String>, items: &[EvidenceItem], direction: Direction) {
    for item in items.iter().filter(|i| i.direction == direction) {
        if !existing.contains(&item.source) {
            existing.push(item.source.clone());
        }
    }
    existing.sort();
}

/// One synthesis pass. Consumes the prior snapshot by reference and returns
/// the next one; the caller owns persistence and the state cursor.
pub fn synthesize(
    new_signals: &[AlphaSignal],
    trust: &TrustLedger,
    prior: &WorldviewState,
    cfg: &Config,
    now_iso: &str,
) -> WorldviewState {
    let mut next = prior.clone();
    next.state_id = prior.state_id + 1;
    next.last_updated = now_iso.to_string();

    // Theses closed by the previous cycle's exits, and invalidated ones,
    // drop out of the tracked set here. A position whose close never landed
    // is still exited: the decision engine sweeps positions with no backing
    // thesis every cycle.
    next.active_theses.retain(|t| {
        !matches!(t.status, ThesisStatus::Closed | ThesisStatus::Invalidated)
    });

    let evidence = gather_evidence(new_signals, trust);
    let mut reinforced_assets: BTreeSet<String> = BTreeSet::new();
    let mut invalidated_assets: BTreeSet<String> = BTreeSet::new();

    for (asset, items) in &evidence {
        let existing_idx = next
            .active_theses
            .iter()
            .position(|t| &t.asset == asset);

        match existing_idx {
            Some(idx) => {
                let thesis = &mut next.active_theses[idx];
                let (conf, mass, oppose_mass) =
                    blend(thesis.confidence, thesis.evidence_mass, thesis.direction, items);
                thesis.confidence = conf;
                thesis.evidence_mass = mass;
                merge_sources(&mut thesis.sources, items, thesis.direction);
                thesis.last_updated = now_iso.to_string();

                if thesis.status == ThesisStatus::Proposed
                    && conf >= cfg.formation_threshold
                    && thesis.sources.len() >= cfg.min_corroborating_sources
                {
                    thesis.status = ThesisStatus::Active;
                }
                // Invalidation needs actual opposing evidence, not mere decay.
                if thesis.status == ThesisStatus::Active
                    && oppose_mass > 0.0
                    && conf < cfg.invalidation_threshold
                {
                    thesis.status = ThesisStatus::Invalidated;
                    invalidated_assets.insert(asset.clone());
                }
                if thesis.status != ThesisStatus::Invalidated {
                    reinforced_assets.insert(asset.clone());
                }
            }
            None => {
                let Some(direction) = majority_direction(items) else { continue };
                let (conf, mass, _) = blend(0.0, 0.0, direction, items);
                let mut sources = Vec::new();
                merge_sources(&mut sources, items, direction);
                let mut thesis = Thesis {
                    id: content_id(
                        "thesis",
                        &[asset, direction.label(), &next.state_id.to_string()],
                        8,
                    ),
                    asset: asset.clone(),
                    thesis: format!("{} {} based on weighted alpha evidence", direction.label(), asset),
                    direction,
                    confidence: conf,
                    status: ThesisStatus::Proposed,
                    sources,
                    evidence_mass: mass,
                    created: now_iso.to_string(),
                    last_updated: now_iso.to_string(),
                };
                if conf >= cfg.formation_threshold
                    && thesis.sources.len() >= cfg.min_corroborating_sources
                {
                    thesis.status = ThesisStatus::Active;
                }
                reinforced_assets.insert(asset.clone());
                next.active_theses.push(thesis);
            }
        }
    }
    next.active_theses.sort_by(|a, b| a.asset.cmp(&b.asset));

    recompute_sector_views(&mut next, prior);
    revise_beliefs(&mut next, &reinforced_assets, &invalidated_assets, cfg);
    derive_regime(&mut next);

    next
}

/// Mark theses closed once the decision engine has exited their positions.
/// Runs after execution within the same cycle, before the snapshot persists.
pub fn mark_closed(worldview: &mut WorldviewState, closed_assets: &[String], now_iso: &str) {
    for thesis in worldview.active_theses.iter_mut() {
        if closed_assets.contains(&thesis.asset) {
            thesis.status = ThesisStatus::Closed;
            thesis.last_updated = now_iso.to_string();
        }
    }
}

/// Sector views are derived state: recomputed every cycle from active
/// theses, smoothed against the prior snapshot's value for the sector.
fn recompute_sector_views(next: &mut WorldviewState, prior: &WorldviewState) {
    let mut per_sector: BTreeMap<&'static str, Vec<(Direction, f64)>> = BTreeMap::new();
    for thesis in next.active_theses.iter().filter(|t| t.status == ThesisStatus::Active) {
        per_sector
            .entry(taxonomy::sector_of(&thesis.asset))
            .or_default()
            .push((thesis.direction, thesis.confidence));
    }

    let mut views = BTreeMap::new();
    for (sector, contributions) in per_sector {
        let bull: f64 = contributions
            .iter()
            .filter(|(d, _)| *d == Direction::Long)
            .map(|(_, c)| c)
            .sum();
        let bear: f64 = contributions
            .iter()
            .filter(|(d, _)| *d == Direction::Short)
            .map(|(_, c)| c)
            .sum();
        // A stance flip needs 1.2x dominance; anything closer reads neutral.
        let stance = if bull > bear * 1.2 {
            Stance::Bullish
        } else if bear > bull * 1.2 {
            Stance::Bearish
        } else {
            Stance::Neutral
        };
        let raw = contributions.iter().map(|(_, c)| c).sum::<f64>() / contributions.len() as f64;
        let confidence = match prior.sector_views.get(sector) {
            Some(old) => 0.7 * old.confidence + 0.3 * raw,
            None => raw,
        };
        views.insert(sector.to_string(), SectorView { stance, confidence });
    }
    next.sector_views = views;
}

/// Key beliefs persist across cycles. Absent reinforcement they decay toward
/// neutral; a thesis invalidation retires the matching belief outright.
fn revise_beliefs(
    next: &mut WorldviewState,
    reinforced: &BTreeSet<String>,
    invalidated: &BTreeSet<String>,
    cfg: &Config,
) {
    next.macro_thesis.key_beliefs.retain(|b| {
        b.asset.as_ref().map(|a| !invalidated.contains(a)).unwrap_or(true)
    });

    for belief in next.macro_thesis.key_beliefs.iter_mut() {
        let is_reinforced = belief
            .asset
            .as_ref()
            .map(|a| reinforced.contains(a))
            .unwrap_or(false);
        if !is_reinforced {
            belief.confidence = 0.5 + (belief.confidence - 0.5) * (1.0 - cfg.belief_decay);
        }
    }

    // Every active thesis anchors one belief, refreshed to the thesis's own
    // confidence while evidence keeps arriving.
    let active: Vec<(String, String, f64, Vec<String>)> = next
        .active_theses
        .iter()
        .filter(|t| t.status == ThesisStatus::Active)
        .map(|t| {
            (
                t.asset.clone(),
                format!("{} conviction on {} ({} corroborating sources)",
                    t.direction.label(), t.asset, t.sources.len()),
                t.confidence,
                t.sources.clone(),
            )
        })
        .collect();

    for (asset, text, confidence, sources) in active {
        let existing = next
            .macro_thesis
            .key_beliefs
            .iter()
            .position(|b| b.asset.as_deref() == Some(asset.as_str()));
        match existing {
            Some(idx) => {
                if reinforced.contains(&asset) {
                    let belief = &mut next.macro_thesis.key_beliefs[idx];
                    belief.text = text;
                    belief.confidence = confidence;
                    belief.sources = sources;
                }
            }
            None => next.macro_thesis.key_beliefs.push(Belief {
                text,
                confidence,
                sources,
                asset: Some(asset),
            }),
        }
    }
}

/// Coarse regime read from the sector board.
fn derive_regime(next: &mut WorldviewState) {
    let bullish = next.sector_views.values().filter(|v| v.stance == Stance::Bullish).count();
    let bearish = next.sector_views.values().filter(|v| v.stance == Stance::Bearish).count();
    next.macro_thesis.current_regime = if bullish == 0 && bearish == 0 {
        if next.sector_views.is_empty() {
            // Nothing to read; carry whatever we had.
            return;
        }
        "mixed".to_string()
    } else if bullish > bearish {
        "risk_on".to_string()
    } else if bearish > bullish {
        "risk_off".to_string()
    } else {
        "mixed".to_string()
    };
}
