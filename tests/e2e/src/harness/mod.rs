//! Test Engine Harness
//!
//! Provides isolated engine instances for journey tests:
//! - Temporary data directories cleaned up on drop
//! - A synthetic embedding provider with pinned per-text vectors
//! - Small-dimension index configuration for readable similarities

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use mnemon_core::embeddings::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
use mnemon_core::{EngineConfig, MemoryEngine, StoreInput};
use tempfile::TempDir;

/// Default harness dimensionality; small enough to pin vectors by hand
pub const TEST_DIMS: usize = 4;

/// Embedding provider with pinned vectors per exact text
///
/// Texts without a pinned vector fall back to deterministic trigram
/// hashing, so free-form content still embeds.
pub struct SyntheticEmbedder {
    dimensions: usize,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    fallback: HashingEmbedder,
}

impl SyntheticEmbedder {
    /// Create a provider with no pinned vectors yet
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            pinned: Mutex::new(HashMap::new()),
            fallback: HashingEmbedder::new(dimensions),
        }
    }

    /// Pin a unit vector to an exact text
    pub fn pin(&self, text: &str, vector: Vec<f32>) {
        assert_eq!(vector.len(), self.dimensions, "pinned vector dimensionality");
        self.pinned
            .lock()
            .expect("pin lock")
            .insert(text.to_string(), vector);
    }
}

impl EmbeddingProvider for SyntheticEmbedder {
    fn name(&self) -> &str {
        "synthetic-pinned"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let pinned = self.pinned.lock().expect("pin lock");
        texts
            .iter()
            .map(|text| match pinned.get(text) {
                Some(vector) => Ok(vector.clone()),
                None => self.fallback.embed(text),
            })
            .collect()
    }
}

/// An engine over a temp directory with a synthetic provider
pub struct TestEngine {
    /// The engine under test
    pub engine: MemoryEngine,
    /// The provider, for pinning more vectors mid-test
    pub embedder: Arc<SyntheticEmbedder>,
    /// Kept alive so the data directory survives the test body
    _dir: TempDir,
}

impl TestEngine {
    /// Engine with default harness configuration
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Engine with a tweaked configuration
    pub fn with_config(tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let embedder = Arc::new(SyntheticEmbedder::new(TEST_DIMS));

        let mut config = EngineConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        config.index.dimensions = TEST_DIMS;
        config.index.m = 8;
        config.index.ef_construction = 40;
        config.index.ef_search = 30;
        tweak(&mut config);

        let engine = MemoryEngine::new(config, embedder.clone()).expect("engine start");
        Self {
            engine,
            embedder,
            _dir: dir,
        }
    }

    /// Data directory path
    pub fn data_dir(&self) -> &Path {
        self._dir.path()
    }

    /// Store content with a pinned embedding; returns the entry id
    pub fn store_pinned(&self, content: &str, vector: Vec<f32>) -> String {
        self.embedder.pin(content, vector);
        self.engine
            .store(StoreInput::from_content(content))
            .expect("store")
            .id
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
