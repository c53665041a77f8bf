//! Memory module - Core types and data structures
//!
//! Implements the entry model shared by every subsystem:
//! - Entries with importance/confidence and passthrough context
//! - Query options, matches and outcomes
//! - Engine-wide statistics

mod entry;

pub use entry::{Entry, EntryPatch, EntrySource, StoreInput};

pub(crate) use entry::tag_is_valid;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::RetrievalStrategy;

// ============================================================================
// QUERY OPTIONS
// ============================================================================

/// Options for a retrieval query
///
/// Uses `deny_unknown_fields` to prevent field injection attacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryOptions {
    /// Maximum results to return
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Only return entries carrying every one of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only return entries at or above this importance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<f64>,
    /// Prefer the adversarial (shadow) route
    #[serde(default)]
    pub adversarial: bool,
    /// Also surface results from an attached shared instance
    #[serde(default = "default_true")]
    pub include_shared: bool,
    /// Per-query time budget in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_top_k() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            tags: vec![],
            min_importance: None,
            adversarial: false,
            include_shared: true,
            timeout_ms: None,
        }
    }
}

// ============================================================================
// QUERY RESULTS
// ============================================================================

/// Which engine instance a match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ResultOrigin {
    /// This engine's own store
    #[default]
    Local,
    /// A read-only attached instance (never written back)
    Shared,
}

/// A single ranked match
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMatch {
    /// The matched entry
    pub entry: Entry,
    /// Final ranking score
    pub score: f64,
    /// Where the match came from
    pub origin: ResultOrigin,
}

/// Outcome of a full query pipeline run
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    /// Ranked matches, truncated to `top_k`
    pub matches: Vec<QueryMatch>,
    /// Trajectory opened for this query (local matches only); feed it back
    /// through `learn` to adapt pattern weights
    pub trajectory_id: Option<String>,
    /// MemRL query id when Q-ranking was used; feed it back through
    /// `provide_memrl_feedback`
    pub memrl_query_id: Option<String>,
    /// Route the query was answered on
    pub route: RetrievalStrategy,
    /// True when the vector index had nothing to offer (e.g. every entry
    /// still pending embedding)
    pub degraded: bool,
}

// ============================================================================
// LINEAGE REPORT
// ============================================================================

/// One ancestor in a lineage trace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageNode {
    /// Ancestor entry id
    pub entry_id: String,
    /// Lineage depth of the ancestor itself
    pub lineage_depth: i64,
    /// The ancestor's reliability score
    pub l_score: f64,
}

/// Result of `trace_lineage`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageReport {
    /// Entry the trace started from
    pub entry_id: String,
    /// The entry's own reliability score
    pub l_score: f64,
    /// All transitive ancestors, nearest first
    pub ancestors: Vec<LineageNode>,
}

// ============================================================================
// MEMORY STATISTICS
// ============================================================================

/// Statistics about the memory engine
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Total number of entries
    pub total_entries: i64,
    /// Entries still waiting for an embedding
    pub pending_embeddings: i64,
    /// Vectors currently resident in the index
    pub indexed_vectors: i64,
    /// Non-expired causal hyperedges
    pub active_causal_edges: i64,
    /// Expired hyperedges awaiting cleanup
    pub expired_causal_edges: i64,
    /// Total trajectories recorded
    pub trajectories: i64,
    /// Trajectories without feedback yet
    pub trajectories_awaiting_feedback: i64,
    /// Patterns with learned weights
    pub tracked_patterns: i64,
    /// Mean Q-value across entries
    pub average_q_value: f64,
    /// Mean L-Score across entries
    pub average_l_score: f64,
    /// Timestamp of the oldest entry
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Timestamp of the newest entry
    pub newest_entry: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================
