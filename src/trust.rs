//! The trust ledger: per-source weights, grouped by source type.
//!
//! Synthesis reads trust; only the reflection updater writes it. Sources are
//! never deleted — a persistently wrong source stays visible with a
//! near-zero weight. The ledger also carries the processed-set of reflected
//! trade ids so attribution stays exactly-once across restarts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::SourceType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWeight {
    pub id: String,
    pub name: String,
    /// Current weight in [0, 1]. Multiplies signal confidence in synthesis.
    pub trust: f64,
    /// Number of attributed trade outcomes.
    pub sample_count: u64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub losses: u64,
}

impl SourceWeight {
    pub fn seed(id: &str, name: &str, trust: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            trust: trust.clamp(0.0, 1.0),
            sample_count: 0,
            wins: 0,
            losses: 0,
        }
    }

    /// Hit rate over attributed outcomes, or `None` before any attribution.
    pub fn accuracy(&self) -> Option<f64> {
        let settled = self.wins + self.losses;
        if settled == 0 {
            None
        } else {
            Some(self.wins as f64 / settled as f64)
        }
    }
}

pub const DEFAULT_TRUST: f64 = 0.5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustLedger {
    /// SourceWeight entries grouped by source type, as persisted.
    pub sources: BTreeMap<SourceType, Vec<SourceWeight>>,
    /// Trade ids already attributed by reflection.
    #[serde(default)]
    pub reflected_trades: BTreeSet<String>,
}

impl TrustLedger {
    /// Trust for a source id, searching every group. Unknown sources get a
    /// neutral default rather than failing the cycle.
    pub fn trust_for(&self, source_id: &str) -> f64 {
        self.find(source_id).map(|w| w.trust).unwrap_or(DEFAULT_TRUST)
    }

    pub fn find(&self, source_id: &str) -> Option<&SourceWeight> {
        self.sources
            .values()
            .flat_map(|group| group.iter())
            .find(|w| w.id == source_id)
    }

    pub fn find_mut(&mut self, source_id: &str) -> Option<&mut SourceWeight> {
        self.sources
            .values_mut()
            .flat_map(|group| group.iter_mut())
            .find(|w| w.id == source_id)
    }

    /// Fetch-or-create under the given group. Only reflection calls this;
    /// ingestion and synthesis never mutate the ledger.
    pub fn ensure(&mut self, source_type: SourceType, source_id: &str) -> &mut SourceWeight {
        // Two-phase to keep the borrow checker happy with the cross-group scan.
        let exists = self.find(source_id).is_some();
        if !exists {
            self.sources
                .entry(source_type)
                .or_default()
                .push(SourceWeight::seed(source_id, source_id, DEFAULT_TRUST));
        }
        self.find_mut(source_id).expect("entry just ensured")
    }

    pub fn source_count(&self) -> usize {
        self.sources.values().map(|g| g.len()).sum()
    }
}
