//! Approximate nearest-neighbour index
//!
//! Native HNSW over unit vectors with an optional product-quantized
//! codebook for compressed secondary storage.
//!
//! Features:
//! - Cosine distance on unit vectors (1 - dot)
//! - Incremental add/update/delete
//! - Full-state persistence to a companion file

pub mod hnsw;
pub mod pq;

pub use hnsw::HnswGraph;
pub use pq::{PqCodebook, PqConfig};

use std::path::Path;

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default embedding dimensions
pub const DEFAULT_DIMENSIONS: usize = crate::embeddings::DEFAULT_DIMENSIONS;

/// Max neighbours per node per non-zero layer (layer 0 gets 2M)
pub const DEFAULT_M: usize = 16;

/// Beam width while building the graph
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Beam width while searching (higher = better recall, slower)
pub const DEFAULT_EF_SEARCH: usize = 100;

/// Tolerated deviation from unit norm on insert
pub const NORM_EPSILON: f32 = 1e-3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum IndexError {
    /// Vector dimensionality disagrees with the index
    DimensionMismatch(usize, usize),
    /// Vector is not unit length
    NotNormalized(f32),
    /// Label already present
    DuplicateLabel(u64),
    /// Label not present
    NotFound(u64),
    /// Index is at configured capacity
    CapacityExceeded(usize),
    /// Failed to persist or load index state
    Persistence(String),
    /// Bad configuration value
    InvalidConfig(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::DimensionMismatch(expected, got) => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, got)
            }
            IndexError::NotNormalized(norm) => {
                write!(f, "Vector is not unit length (norm {})", norm)
            }
            IndexError::DuplicateLabel(label) => write!(f, "Label already present: {}", label),
            IndexError::NotFound(label) => write!(f, "Label not found: {}", label),
            IndexError::CapacityExceeded(max) => {
                write!(f, "Index at configured capacity: {}", max)
            }
            IndexError::Persistence(e) => write!(f, "Persistence failed: {}", e),
            IndexError::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexConfig {
    /// Number of dimensions
    pub dimensions: usize,
    /// Max neighbours per node per non-zero layer
    pub m: usize,
    /// Beam width during construction
    pub ef_construction: usize,
    /// Beam width during search
    pub ef_search: usize,
    /// Optional hard cap on resident vectors
    pub max_elements: Option<usize>,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            max_elements: None,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexStats {
    /// Total number of vectors
    pub total_vectors: usize,
    /// Vector dimensions
    pub dimensions: usize,
    /// Max neighbours per node per non-zero layer
    pub m: usize,
    /// Beam width during search
    pub ef_search: usize,
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// HNSW vector index with validation and persistence
pub struct VectorIndex {
    graph: HnswGraph,
    config: VectorIndexConfig,
}

/// Serialized wrapper state for the companion file
#[derive(Deserialize)]
struct PersistedIndex {
    config: VectorIndexConfig,
    graph: HnswGraph,
}

/// Borrowed view of the same state for writing
#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    config: &'a VectorIndexConfig,
    graph: &'a HnswGraph,
}

impl VectorIndex {
    /// Create a new vector index with default configuration
    pub fn new() -> Self {
        Self::with_config(VectorIndexConfig::default())
    }

    /// Create a new vector index with custom configuration
    pub fn with_config(config: VectorIndexConfig) -> Self {
        let graph = HnswGraph::new(config.dimensions, config.m, config.ef_construction);
        Self { graph, config }
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Get the dimensions of the index
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Check if a label exists in the index
    pub fn contains(&self, label: u64) -> bool {
        self.graph.contains(label)
    }

    fn validate(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.config.dimensions {
            return Err(IndexError::DimensionMismatch(
                self.config.dimensions,
                vector.len(),
            ));
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if (norm - 1.0).abs() > NORM_EPSILON {
            return Err(IndexError::NotNormalized(norm));
        }
        Ok(())
    }

    /// Add a unit vector under a fresh label
    pub fn add(&mut self, label: u64, vector: &[f32]) -> Result<(), IndexError> {
        self.validate(vector)?;
        if let Some(max) = self.config.max_elements {
            if self.graph.len() >= max {
                return Err(IndexError::CapacityExceeded(max));
            }
        }
        self.graph.insert(label, vector.to_vec())
    }

    /// Replace the vector stored under a label, preserving the label
    pub fn update(&mut self, label: u64, vector: &[f32]) -> Result<(), IndexError> {
        self.validate(vector)?;
        self.graph.remove(label)?;
        self.graph.insert(label, vector.to_vec())
    }

    /// Remove a vector by label
    pub fn remove(&mut self, label: u64) -> Result<(), IndexError> {
        self.graph.remove(label)
    }

    /// Search for the k nearest labels
    ///
    /// Returns (label, score) pairs with score = 1 - distance in [0, 1],
    /// best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, IndexError> {
        if query.len() != self.config.dimensions {
            return Err(IndexError::DimensionMismatch(
                self.config.dimensions,
                query.len(),
            ));
        }
        Ok(self.graph.search(query, k, self.config.ef_search))
    }

    /// Search with a minimum similarity threshold
    pub fn search_with_threshold(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(u64, f32)>, IndexError> {
        let results = self.search(query, k)?;
        Ok(results
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .collect())
    }

    /// Serialize the full index state
    ///
    /// Round-trips entry point, per-node layers and neighbour arrays.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let state = PersistedIndexRef {
            config: &self.config,
            graph: &self.graph,
        };
        bincode::serialize(&state).map_err(|e| IndexError::Persistence(e.to_string()))
    }

    /// Restore an index from serialized state
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let state: PersistedIndex =
            bincode::deserialize(bytes).map_err(|e| IndexError::Persistence(e.to_string()))?;
        Ok(Self {
            graph: state.graph,
            config: state.config,
        })
    }

    /// Save the index to its companion file
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| IndexError::Persistence(e.to_string()))
    }

    /// Load the index from its companion file
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = std::fs::read(path).map_err(|e| IndexError::Persistence(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Get index statistics
    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            m: self.config.m,
            ef_search: self.config.ef_search,
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dims: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[axis] = 1.0;
        v
    }

    fn small_config() -> VectorIndexConfig {
        VectorIndexConfig {
            dimensions: 4,
            m: 8,
            ef_construction: 40,
            ef_search: 20,
            max_elements: None,
        }
    }

    #[test]
    fn test_index_creation() {
        let index = VectorIndex::new();
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::with_config(small_config());
        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();
        index.add(3, &unit(4, 2)).unwrap();

        assert_eq!(index.len(), 3);
        assert!(index.contains(1));
        assert!(!index.contains(99));

        let results = index.search(&unit(4, 0), 3).unwrap();
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn test_rejects_unnormalized() {
        let mut index = VectorIndex::with_config(small_config());
        let result = index.add(1, &[2.0, 0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::NotNormalized(_))));
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let mut index = VectorIndex::with_config(small_config());
        let result = index.add(1, &[1.0, 0.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch(4, 2))));
    }

    #[test]
    fn test_update_preserves_label() {
        let mut index = VectorIndex::with_config(small_config());
        index.add(1, &unit(4, 0)).unwrap();
        index.update(1, &unit(4, 3)).unwrap();
        assert_eq!(index.len(), 1);

        let results = index.search(&unit(4, 3), 1).unwrap();
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn test_capacity_cap() {
        let mut config = small_config();
        config.max_elements = Some(2);
        let mut index = VectorIndex::with_config(config);
        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();
        assert!(matches!(
            index.add(3, &unit(4, 2)),
            Err(IndexError::CapacityExceeded(2))
        ));
    }

    #[test]
    fn test_serialize_roundtrip_identical_topk() {
        let mut index = VectorIndex::with_config(small_config());
        for axis in 0..4 {
            index.add(axis as u64 + 1, &unit(4, axis)).unwrap();
        }
        let query = [0.9f32, 0.435_889_9, 0.0, 0.0];

        let before = index.search(&query, 4).unwrap();
        let bytes = index.to_bytes().unwrap();
        let restored = VectorIndex::from_bytes(&bytes).unwrap();
        let after = restored.search(&query, 4).unwrap();

        let before_ids: Vec<u64> = before.iter().map(|(l, _)| *l).collect();
        let after_ids: Vec<u64> = after.iter().map(|(l, _)| *l).collect();
        assert_eq!(before_ids, after_ids);
    }

    #[test]
    fn test_search_with_threshold() {
        let mut index = VectorIndex::with_config(small_config());
        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();

        let results = index.search_with_threshold(&unit(4, 0), 10, 0.9).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }
}
