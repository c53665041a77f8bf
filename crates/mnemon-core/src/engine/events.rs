//! Structured engine events
//!
//! Drift transitions, TTL cleanups and embedding-state changes are surfaced
//! on a broadcast channel rather than as errors; external layers subscribe
//! and react.

use serde::Serialize;

/// An event emitted by the engine
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Weight drift crossed the alert threshold; a checkpoint was written
    DriftAlert {
        /// Drift at the crossing
        drift: f64,
    },
    /// Weight drift went critical; a checkpoint was restored
    DriftRollback {
        /// Drift that triggered the rollback
        drift: f64,
        /// Drift after the restore settled
        restored_drift: f64,
    },
    /// Expired causal edges were removed
    TtlCleanup {
        /// Ids of the removed edges
        removed: Vec<String>,
    },
    /// An entry was stored without a vector; the reconciler will retry
    PendingEmbedding {
        /// The affected entry
        entry_id: String,
    },
    /// A previously pending entry gained its vector
    EmbeddingReconciled {
        /// The affected entry
        entry_id: String,
    },
}
