//! Failure taxonomy for the pipeline.
//!
//! Per-item failures (a bad signal record, one rejected order) are isolated
//! and never abort a batch. Structural failures (an unreadable snapshot)
//! abort the whole cycle without committing anything. A drawdown breach is a
//! control-flow gate, not an error; it is surfaced through the decision
//! engine's halt flag and the risk log channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source collaborator returned nothing or errored. Skip the source
    /// for this cycle; the next cycle retries it.
    #[error("ingestion gap for {feed}: {reason}")]
    IngestionGap { feed: String, reason: String },

    /// A record is missing required fields or carries out-of-range values.
    /// Dropped and logged; does not block the batch.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// The venue rejected or timed out a single submission. Portfolio state
    /// is left untouched for that decision; the batch continues.
    #[error("execution failure for {decision_id}: {reason}")]
    ExecutionFailure { decision_id: String, reason: String },

    /// A prior snapshot is unreadable. Fatal for the cycle: abort without
    /// writing, preserving the last good state.
    #[error("state corruption in {path}: {reason}")]
    StateCorruption { path: String, reason: String },
}

impl PipelineError {
    /// Structural failures abort the cycle; everything else is recovered
    /// locally at the point it occurred.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::StateCorruption { .. })
    }
}
