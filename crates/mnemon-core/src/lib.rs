//! # Mnemon Core
//!
//! Neuro-symbolic memory engine. Stores textual entries, indexes them by
//! dense vector embeddings, tracks their derivation lineage, relates them in
//! a typed causal hypergraph, and continuously adapts retrieval from
//! reinforcement signals:
//!
//! - **Persistent entry store**: embedded SQLite in WAL mode, transactional
//!   writes, recursive lineage queries
//! - **HNSW vector index**: native hierarchical small-world graph over unit
//!   vectors, with optional product-quantized compression
//! - **Provenance / L-Score**: lineage-aggregated reliability per entry
//! - **Causal hypergraph**: typed many-to-many edges with TTL and filtered
//!   depth-first traversal
//! - **Learning**: pattern weights under EWC++ drift protection plus
//!   entry-level Q-values with two-phase retrieval
//! - **Shadow search**: negated-query contradiction mining with credibility
//! - **Router**: per-query strategy selection behind per-route circuit
//!   breakers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mnemon_core::prelude::*;
//!
//! let embedder = Arc::new(HashingEmbedder::default());
//! let engine = MemoryEngine::new(EngineConfig::default(), embedder)?;
//!
//! // Store an entry
//! let entry = engine.store(StoreInput::from_content(
//!     "the mitochondria is the powerhouse of the cell",
//! ))?;
//!
//! // Query it back
//! let outcome = engine.query("cellular energy", QueryOptions::default())?;
//!
//! // Close the loop with feedback
//! if let Some(trajectory_id) = outcome.trajectory_id {
//!     engine.learn(&trajectory_id, 0.9)?;
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): Bundle SQLite with the crate
//! - `encryption`: SQLCipher-encrypted store via `MNEMON_ENCRYPTION_KEY`

#![cfg_attr(docsrs, feature(doc_cfg))]
// Only warn about missing docs for public items exported from the crate root
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod causal;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod learning;
pub mod memory;
pub mod provenance;
pub mod router;
pub mod shadow;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Core memory types
pub use memory::{
    Entry, EntryPatch, EntrySource, LineageNode, LineageReport, MemoryStats, QueryMatch,
    QueryOptions, QueryOutcome, ResultOrigin, StoreInput,
};

// Engine facade
pub use engine::{
    EmbeddingConfig, EngineConfig, EngineError, EngineEvent, LScoreConfig, MemoryEngine,
    ReconcilerConfig, Result, SharedMemory,
};

// Storage layer
pub use storage::{DeleteOutcome, Storage, StorageError};

// Embedding boundary
pub use embeddings::{
    cosine_similarity, dot_product, Embedding, EmbeddingError, EmbeddingProvider, HashingEmbedder,
};

// Vector index
pub use index::{
    HnswGraph, IndexError, PqCodebook, PqConfig, VectorIndex, VectorIndexConfig, VectorIndexStats,
};

// Provenance
pub use provenance::{l_score_from_chain, ProvenanceRecord, ReliabilityTier};

// Causal hypergraph
pub use causal::{
    CausalError, CausalGraph, CausalPath, Hyperedge, RelationType, TraversalDirection,
    TraversalQuery,
};

// Learning subsystem
pub use learning::{
    DriftStatus, LearnReport, MaintenanceReport, MemRlConfig, MemRlEngine, MemrlFeedbackOutcome,
    MemrlQueryRecord, PatternWeight, RankedCandidate, SonaConfig, SonaEngine, Trajectory,
    WeightCheckpoint,
};

// Shadow search
pub use shadow::{ContradictionClass, ShadowContradiction, ShadowReport, ShadowSupport};

// Router
pub use router::{CircuitBreaker, RetrievalStrategy, Router, RouterConfig};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimensionality
pub const DEFAULT_DIMENSIONS: usize = embeddings::DEFAULT_DIMENSIONS;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        EngineConfig, EngineError, EngineEvent, Entry, EntryPatch, EntrySource, HashingEmbedder,
        MemoryEngine, MemoryStats, QueryMatch, QueryOptions, QueryOutcome, RelationType,
        Result, RetrievalStrategy, StoreInput, TraversalDirection, TraversalQuery,
    };

    pub use crate::embeddings::EmbeddingProvider;
    pub use crate::shadow::ShadowReport;
}
