//! Embedding provider boundary
//!
//! The engine never talks to a model directly; it goes through the
//! [`EmbeddingProvider`] trait. Production deployments plug in an external
//! service; [`HashingEmbedder`] is the deterministic in-process fallback used
//! by tests and offline operation.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default embedding dimensions
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Maximum text length submitted to a provider (characters)
pub const DEFAULT_TRUNCATE_CHARS: usize = 28_000;

/// Default batch size for provider calls
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// The provider endpoint is unreachable or rate-limited
    ProviderUnavailable(String),
    /// Input rejected by the provider (empty, too long)
    InvalidInput(String),
    /// Provider returned a vector of the wrong shape
    DimensionMismatch(usize, usize),
    /// The call was cancelled or timed out
    Cancelled(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ProviderUnavailable(e) => write!(f, "Provider unavailable: {}", e),
            EmbeddingError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            EmbeddingError::DimensionMismatch(expected, got) => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, got)
            }
            EmbeddingError::Cancelled(e) => write!(f, "Embedding cancelled: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A dense embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Dimensions of the vector
    pub dimensions: usize,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Compute cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.dimensions != other.dimensions {
            return 0.0;
        }
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Normalize the embedding vector to unit length
    pub fn normalize(&mut self) {
        normalize_in_place(&mut self.vector);
    }

    /// Check if the embedding is normalized (unit length)
    pub fn is_normalized(&self) -> bool {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        (norm - 1.0).abs() < 1e-4
    }

    /// Convert to bytes for storage (little-endian f32)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// An external embedding collaborator
///
/// Implementations must return unit-length vectors of a fixed dimension.
/// Callers truncate inputs to their configured character budget and batch up
/// to the provider's limit before invoking `embed_batch`.
pub trait EmbeddingProvider: Send + Sync {
    /// Human-readable model name
    fn name(&self) -> &str;

    /// Fixed output dimensionality
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input text
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::ProviderUnavailable("empty response".to_string()))
    }
}

// ============================================================================
// HASHING EMBEDDER (deterministic fallback)
// ============================================================================

/// Deterministic character-trigram hashing embedder
///
/// Not a semantic model: identical texts map to identical unit vectors and
/// near-identical texts land close, which is enough for tests, offline
/// operation and degraded mode.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the given output dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .map(|text| {
                if text.is_empty() {
                    return Err(EmbeddingError::InvalidInput(
                        "Text cannot be empty".to_string(),
                    ));
                }
                let mut vector = vec![0.0f32; self.dimensions];
                let lowered = text.to_lowercase();
                let bytes = lowered.as_bytes();
                if bytes.len() < 3 {
                    let bucket = (Self::fnv1a(bytes) % self.dimensions as u64) as usize;
                    vector[bucket] += 1.0;
                } else {
                    for window in bytes.windows(3) {
                        let hash = Self::fnv1a(window);
                        let bucket = (hash % self.dimensions as u64) as usize;
                        // Signed buckets spread mass over both hemispheres
                        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                        vector[bucket] += sign;
                    }
                }
                normalize_in_place(&mut vector);
                Ok(vector)
            })
            .collect()
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// Compute dot product between two vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize a vector in place; zero vectors are left untouched
#[inline]
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Truncate a text to the configured provider budget on a char boundary
pub fn truncate_for_provider(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// TESTS
// ============================================================================
