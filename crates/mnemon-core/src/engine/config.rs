//! Engine configuration
//!
//! One aggregate struct with per-subsystem sections, all serde-friendly and
//! defaulted to the documented values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::index::VectorIndexConfig;
use crate::learning::{MemRlConfig, SonaConfig};
use crate::provenance;
use crate::router::RouterConfig;

/// Embedding-boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// Model identifier, informational
    pub model: String,
    /// Texts are truncated to this many characters before embedding
    pub truncate_chars: usize,
    /// Provider batch size
    pub batch_size: usize,
    /// Per-call embedding budget in milliseconds (provider contract)
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hashing-trigram".to_string(),
            truncate_chars: crate::embeddings::DEFAULT_TRUNCATE_CHARS,
            batch_size: crate::embeddings::DEFAULT_BATCH_SIZE,
            timeout_ms: 60_000,
        }
    }
}

/// Background reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Base delay between sweeps in milliseconds
    pub base_delay_ms: u64,
    /// Cap on the backed-off delay in milliseconds
    pub max_delay_ms: u64,
    /// Per-entry attempt cap; exhausted entries wait for an explicit sweep
    pub max_attempts: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            max_attempts: 8,
        }
    }
}

/// Aggregate engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Data directory; platform default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Vector index parameters
    pub index: VectorIndexConfig,
    /// Provenance parameters
    pub l_score: LScoreConfig,
    /// Entry-level Q-learning parameters
    pub memrl: MemRlConfig,
    /// Pattern-level learner parameters
    pub sona: SonaConfig,
    /// Router and circuit-breaker parameters
    pub router: RouterConfig,
    /// Embedding boundary parameters
    pub embedding: EmbeddingConfig,
    /// Background reconciler parameters
    pub reconciler: ReconcilerConfig,
    /// Fail startup instead of rebuilding when the companion index file is
    /// missing but vectors are persisted
    #[serde(default)]
    pub strict_index_recovery: bool,
    /// Per-query time budget in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Trajectories older than this many days are aged out by
    /// `prune_trajectories`
    #[serde(default = "default_trajectory_retention_days")]
    pub trajectory_retention_days: i64,
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_trajectory_retention_days() -> i64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            index: VectorIndexConfig::default(),
            l_score: LScoreConfig::default(),
            memrl: MemRlConfig::default(),
            sona: SonaConfig::default(),
            router: RouterConfig::default(),
            embedding: EmbeddingConfig::default(),
            reconciler: ReconcilerConfig::default(),
            strict_index_recovery: false,
            query_timeout_ms: default_query_timeout_ms(),
            trajectory_retention_days: default_trajectory_retention_days(),
        }
    }
}

/// Provenance scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LScoreConfig {
    /// Per-generation decay applied to the aggregated link factor
    pub decay_base: f64,
    /// Entries below this L-Score are excluded from query results
    pub reliability_threshold: f64,
    /// Bound on lineage recursion and propagation depth
    pub max_depth: i64,
}

impl Default for LScoreConfig {
    fn default() -> Self {
        Self {
            decay_base: provenance::DEFAULT_DECAY_BASE,
            reliability_threshold: 0.3,
            max_depth: provenance::DEFAULT_MAX_DEPTH,
        }
    }
}
