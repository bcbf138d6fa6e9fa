//! Core entity types shared across the pipeline.
//!
//! Everything that crosses a file boundary (signal store, worldview snapshot,
//! trade log, portfolio document) lives here with its serde shape. Validation
//! happens once, at the ingestion boundary; downstream code trusts these
//! records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Deterministic content-hash id: `prefix_<hex digest truncated to len>`.
pub fn content_id(prefix: &str, parts: &[&str], len: usize) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update(b":");
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", prefix, &digest[..len.min(digest.len())])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Twitter,
    Substack,
    Telegram,
    Website,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
        }
    }
}

/// The typed interpretation of a raw signal. Produced by the external
/// extraction collaborator or by the keyword fallback in `extract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSignal {
    pub asset: String,
    pub direction: Direction,
    pub confidence: f64,
}

/// One ingested observation. Immutable once appended to the signal store;
/// ordering is append order, not timestamp order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaSignal {
    pub id: String,
    pub source: String,
    pub source_type: SourceType,
    pub timestamp: String,
    pub raw_content: String,
    #[serde(default)]
    pub extracted_signal: Option<ExtractedSignal>,
    /// "human" marks operator overrides fed through the normal pathway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

impl AlphaSignal {
    pub fn is_human_override(&self) -> bool {
        self.added_by.as_deref() == Some("human")
    }

    /// Boundary validation. A record that fails here is dropped and logged,
    /// never handed to synthesis.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.id.is_empty() {
            return Err(PipelineError::MalformedSignal("empty id".into()));
        }
        if self.source.is_empty() {
            return Err(PipelineError::MalformedSignal(format!(
                "signal {} has empty source",
                self.id
            )));
        }
        if let Some(sig) = &self.extracted_signal {
            if sig.asset.is_empty() {
                return Err(PipelineError::MalformedSignal(format!(
                    "signal {} has empty asset",
                    self.id
                )));
            }
            if !(0.0..=1.0).contains(&sig.confidence) {
                return Err(PipelineError::MalformedSignal(format!(
                    "signal {} confidence {} out of range",
                    self.id, sig.confidence
                )));
            }
        }
        Ok(())
    }
}

/// An aggregate conclusion, not 1:1 with signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Belief {
    pub text: String,
    pub confidence: f64,
    /// Contributing source identities.
    pub sources: Vec<String>,
    /// Asset this belief is anchored to, if any. Used to retire beliefs when
    /// the matching thesis invalidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThesisStatus {
    Proposed,
    Active,
    Invalidated,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thesis {
    pub id: String,
    pub asset: String,
    pub thesis: String,
    pub direction: Direction,
    pub confidence: f64,
    pub status: ThesisStatus,
    /// Sources that corroborated this direction. Provenance for reflection.
    pub sources: Vec<String>,
    /// Accumulated evidence mass. Acts as the prior weight when blending new
    /// evidence, so an established thesis resists a single strong signal.
    pub evidence_mass: f64,
    pub created: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
}

/// Derived per-sector stance. Recomputed each cycle from active theses,
/// never independently persisted as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorView {
    pub stance: Stance,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroThesis {
    pub current_regime: String,
    pub key_beliefs: Vec<Belief>,
}

/// The authoritative belief-state snapshot. One current snapshot exists;
/// prior snapshots are retained in an append-only history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldviewState {
    /// Increments by 1 every cycle, even when content is unchanged.
    pub state_id: u64,
    pub macro_thesis: MacroThesis,
    pub sector_views: std::collections::BTreeMap<String, SectorView>,
    pub active_theses: Vec<Thesis>,
    /// Cursor into the signal store: number of lines already incorporated.
    /// Carried inside the snapshot so read-modify-write stays atomic.
    #[serde(default)]
    pub signals_processed: u64,
    pub last_updated: String,
}

impl WorldviewState {
    pub fn genesis() -> Self {
        Self {
            state_id: 0,
            macro_thesis: MacroThesis {
                current_regime: "unknown".into(),
                key_beliefs: Vec::new(),
            },
            sector_views: std::collections::BTreeMap::new(),
            active_theses: Vec::new(),
            signals_processed: 0,
            last_updated: String::new(),
        }
    }

    pub fn thesis_for(&self, asset: &str) -> Option<&Thesis> {
        self.active_theses.iter().find(|t| t.asset == asset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl TradeAction {
    pub fn is_open(&self) -> bool {
        matches!(self, TradeAction::OpenLong | TradeAction::OpenShort)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::Close => "close",
            TradeAction::Hold => "hold",
        }
    }
}

/// A gated decision emitted by the decision engine. Not yet a trade; the
/// execution recorder turns accepted decisions into trade log entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub id: String,
    pub thesis_id: String,
    /// Asset the thesis names.
    pub asset: String,
    /// Tradable asset after proxy resolution.
    pub executed_asset: String,
    pub action: TradeAction,
    /// Fraction of capital, 0..=1.
    pub size: f64,
    /// Confidence of the triggering thesis.
    pub confidence: f64,
    pub sources: Vec<String>,
    pub generated_at: String,
}

/// Immutable trade log entry. `pnl` is the only field mutated post-creation,
/// exactly once, by the outcome settlement path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub decision_id: String,
    pub thesis_id: String,
    pub asset: String,
    pub executed_asset: String,
    pub action: TradeAction,
    pub entry_price: f64,
    pub size: f64,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub executed_at: String,
    pub tx_ref: String,
    #[serde(default)]
    pub pnl: Option<f64>,
}
