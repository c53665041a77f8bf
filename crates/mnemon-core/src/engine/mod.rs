//! Memory engine facade
//!
//! Owns the persistence handle and the vector index, borrows everything else
//! out to the subsystems, and composes them into the store / query /
//! feedback pipelines. All write operations funnel through the storage
//! layer's single writer; index mutations take the writer side of an RW
//! lock; searches share the reader side.

mod config;
mod events;

pub use config::{EmbeddingConfig, EngineConfig, LScoreConfig, ReconcilerConfig};
pub use events::EngineEvent;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use tokio::sync::broadcast;

use crate::causal::{CausalError, CausalGraph, CausalPath, Hyperedge, RelationType, TraversalDirection, TraversalQuery};
use crate::embeddings::{normalize_in_place, truncate_for_provider, EmbeddingError, EmbeddingProvider};
use crate::index::{IndexError, VectorIndex};
use crate::learning::{
    LearnReport, MemRlEngine, MemrlFeedbackOutcome, SonaEngine, Trajectory,
};
use crate::memory::{
    tag_is_valid, Entry, EntryPatch, LineageNode, LineageReport, MemoryStats, QueryMatch,
    QueryOptions, QueryOutcome, ResultOrigin, StoreInput,
};
use crate::provenance::{self, ProvenanceRecord};
use crate::router::{RetrievalStrategy, Router};
use crate::shadow::{self, ShadowReport};
use crate::storage::{Storage, StorageError};

/// Companion index file name inside the data directory
const INDEX_FILE: &str = "mnemon.index";

/// Database file name inside the data directory
const DB_FILE: &str = "mnemon.db";

/// Capacity of the query-embedding LRU cache
const QUERY_CACHE_CAPACITY: usize = 100;

/// Seeds taken from the top of the candidate list for causal expansion
const CAUSAL_SEEDS: usize = 5;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Facade-level error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Persistence failure, propagated unchanged
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Vector index failure
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Causal graph failure
    #[error("Causal error: {0}")]
    Causal(#[from] CausalError),
    /// Referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Caller input rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Query exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Operation cancelled between phases
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// Internal invariant failure (poisoned lock)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Facade result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// SHARED (CROSS-INSTANCE) MEMORY
// ============================================================================

/// Read-only view into another engine's data directory
///
/// Results surfaced from a shared instance are never written back.
pub struct SharedMemory {
    storage: Storage,
    index: Option<VectorIndex>,
}

impl SharedMemory {
    /// Open another engine's data directory read-only
    pub fn open(data_dir: &Path) -> Result<Self> {
        let storage = Storage::open_read_only(data_dir.join(DB_FILE))?;
        let index_path = data_dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            Some(VectorIndex::load(&index_path)?)
        } else {
            None
        };
        Ok(Self { storage, index })
    }

    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(Entry, f64)>> {
        let Some(index) = &self.index else {
            return Ok(vec![]);
        };
        let hits = index.search(vector, k)?;
        let labels: Vec<u64> = hits.iter().map(|(l, _)| *l).collect();
        let mapping = self.storage.get_entry_ids_for_labels(&labels)?;
        let ids: Vec<String> = hits
            .iter()
            .filter_map(|(l, _)| mapping.get(l).cloned())
            .collect();
        let entries = self.storage.get_batch_entries(&ids)?;
        let by_id: HashMap<String, Entry> =
            entries.into_iter().map(|e| (e.id.clone(), e)).collect();

        Ok(hits
            .iter()
            .filter_map(|(label, score)| {
                let id = mapping.get(label)?;
                let entry = by_id.get(id)?.clone();
                Some((entry, *score as f64))
            })
            .collect())
    }
}

// ============================================================================
// MEMORY ENGINE
// ============================================================================

/// The memory engine facade
pub struct MemoryEngine {
    config: EngineConfig,
    storage: Arc<Storage>,
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    causal: RwLock<CausalGraph>,
    sona: SonaEngine,
    memrl: MemRlEngine,
    router: Router,
    events: broadcast::Sender<EngineEvent>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    shared: RwLock<Option<SharedMemory>>,
    index_path: PathBuf,
}

impl MemoryEngine {
    /// Start an engine over a data directory
    ///
    /// Startup sequence: open persistence (migrations applied), load or
    /// rebuild the companion index, mirror active causal edges, initialize
    /// the learners (baseline captured if absent).
    pub fn new(config: EngineConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if embedder.dimensions() != config.index.dimensions {
            return Err(EngineError::InvalidArgument(format!(
                "provider dimensions {} disagree with index dimensions {}",
                embedder.dimensions(),
                config.index.dimensions
            )));
        }

        let data_dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => directories::ProjectDirs::from("ai", "mnemon", "core")
                .ok_or_else(|| {
                    EngineError::Internal("Could not determine project directories".to_string())
                })?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| EngineError::Storage(StorageError::Io(e)))?;

        let storage = Arc::new(Storage::open(Some(data_dir.join(DB_FILE)))?);
        let index_path = data_dir.join(INDEX_FILE);
        let index = Self::load_or_rebuild_index(&config, &storage, &index_path)?;

        let causal = CausalGraph::rebuild(storage.get_active_causal()?);
        tracing::info!(
            edges = causal.len(),
            vectors = index.len(),
            "Memory engine started"
        );

        let sona = SonaEngine::new(storage.clone(), config.sona.clone())?;
        let memrl = MemRlEngine::new(storage.clone(), config.memrl.clone());
        let router = Router::new(config.router.clone());
        let (events, _) = broadcast::channel(256);

        let query_cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(QUERY_CACHE_CAPACITY)
                .ok_or_else(|| EngineError::Internal("cache capacity must be non-zero".into()))?,
        ));

        Ok(Self {
            config,
            storage,
            index: Arc::new(RwLock::new(index)),
            embedder,
            causal: RwLock::new(causal),
            sona,
            memrl,
            router,
            events,
            query_cache,
            shared: RwLock::new(None),
            index_path,
        })
    }

    fn load_or_rebuild_index(
        config: &EngineConfig,
        storage: &Storage,
        index_path: &Path,
    ) -> Result<VectorIndex> {
        if index_path.exists() {
            let index = VectorIndex::load(index_path)?;
            if index.dimensions() != config.index.dimensions {
                return Err(EngineError::InvalidArgument(format!(
                    "companion index has {} dimensions, configured {}",
                    index.dimensions(),
                    config.index.dimensions
                )));
            }
            return Ok(index);
        }

        let stored = storage.get_all_vectors()?;
        if stored.is_empty() {
            return Ok(VectorIndex::with_config(config.index.clone()));
        }
        if config.strict_index_recovery {
            return Err(EngineError::Internal(format!(
                "companion index file missing but {} vectors are persisted",
                stored.len()
            )));
        }

        tracing::warn!(
            vectors = stored.len(),
            "Companion index file missing; rebuilding from stored vectors"
        );
        let mut index = VectorIndex::with_config(config.index.clone());
        for (label, bytes, dimensions) in stored {
            let Some(embedding) = crate::embeddings::Embedding::from_bytes(&bytes) else {
                tracing::warn!(label, "Skipping corrupt stored vector");
                continue;
            };
            if embedding.dimensions != dimensions || dimensions != config.index.dimensions {
                tracing::warn!(label, "Skipping stored vector with stale dimensions");
                continue;
            }
            if let Err(e) = index.add(label, &embedding.vector) {
                tracing::warn!(label, error = %e, "Failed to re-index stored vector");
            }
        }
        Ok(index)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to structured engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Attach a read-only collaborator over another engine's data directory
    pub fn attach_shared(&self, data_dir: &Path) -> Result<()> {
        let shared = SharedMemory::open(data_dir)?;
        *self
            .shared
            .write()
            .map_err(|_| EngineError::Internal("shared lock poisoned".into()))? = Some(shared);
        Ok(())
    }

    /// Detach the shared collaborator
    pub fn detach_shared(&self) {
        if let Ok(mut guard) = self.shared.write() {
            *guard = None;
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn index_read(&self) -> Result<std::sync::RwLockReadGuard<'_, VectorIndex>> {
        self.index
            .read()
            .map_err(|_| EngineError::Internal("index lock poisoned".into()))
    }

    fn index_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, VectorIndex>> {
        self.index
            .write()
            .map_err(|_| EngineError::Internal("index lock poisoned".into()))
    }

    fn causal_read(&self) -> Result<std::sync::RwLockReadGuard<'_, CausalGraph>> {
        self.causal
            .read()
            .map_err(|_| EngineError::Internal("causal lock poisoned".into()))
    }

    fn causal_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, CausalGraph>> {
        self.causal
            .write()
            .map_err(|_| EngineError::Internal("causal lock poisoned".into()))
    }

    // ========================================================================
    // STORE
    // ========================================================================

    fn validate_input(&self, input: &StoreInput) -> Result<()> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "content must not be empty".to_string(),
            ));
        }
        for range in [input.importance, input.confidence, input.relevance] {
            if !(0.0..=1.0).contains(&range) {
                return Err(EngineError::InvalidArgument(format!(
                    "importance, confidence and relevance must lie in [0, 1], got {range}"
                )));
            }
        }
        for tag in &input.tags {
            if !tag_is_valid(tag) {
                return Err(EngineError::InvalidArgument(format!(
                    "tag {tag:?} is empty or carries control characters"
                )));
            }
        }
        Ok(())
    }

    /// Store a new entry
    ///
    /// The entry and its provenance are persisted first; the embedding phase
    /// may fail without losing the entry, which then stays
    /// `pending_embedding` until the reconciler catches up.
    pub fn store(&self, input: StoreInput) -> Result<Entry> {
        self.validate_input(&input)?;

        let now = Utc::now();
        let entry = Entry {
            id: uuid::Uuid::new_v4().to_string(),
            content: input.content.clone(),
            source: input.source,
            importance: input.importance,
            confidence: input.confidence,
            tags: {
                let mut tags = input.tags.clone();
                tags.sort();
                tags.dedup();
                tags
            },
            created_at: now,
            updated_at: now,
            session_id: input.session_id.clone(),
            agent_id: input.agent_id.clone(),
            context: input.context.clone(),
            q_value: 0.5,
            pending_embedding: true,
        };

        let lineage_depth = if input.parents.is_empty() {
            0
        } else {
            let records = self.storage.get_batch_provenance(&input.parents)?;
            if records.len() != input.parents.len() {
                let known: Vec<&str> = records.iter().map(|r| r.entry_id.as_str()).collect();
                let missing = input
                    .parents
                    .iter()
                    .find(|p| !known.contains(&p.as_str()))
                    .cloned()
                    .unwrap_or_default();
                return Err(EngineError::NotFound(format!("parent entry {missing}")));
            }
            1 + records.iter().map(|r| r.lineage_depth).max().unwrap_or(0)
        };

        let provenance_record = ProvenanceRecord {
            entry_id: entry.id.clone(),
            parent_ids: input.parents.iter().cloned().map(Some).collect(),
            confidence: input.confidence,
            relevance: input.relevance,
            lineage_depth,
            l_score: 1.0,
        };

        self.storage.store_entry(&entry, &provenance_record)?;
        provenance::propagate_l_score_update(
            &self.storage,
            &entry.id,
            self.config.l_score.decay_base,
            self.config.l_score.max_depth,
        )?;

        // Embedding phase; failure leaves the entry pending
        match self.embed_text(&entry.content) {
            Ok(vector) => {
                self.attach_embedding(&entry.id, &vector)?;
            }
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Embedding failed; entry left pending");
                self.emit(EngineEvent::PendingEmbedding {
                    entry_id: entry.id.clone(),
                });
            }
        }

        self.storage
            .get_entry(&entry.id)?
            .ok_or_else(|| EngineError::NotFound(format!("entry {}", entry.id)))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let truncated = truncate_for_provider(text, self.config.embedding.truncate_chars);
        let mut vector = self.embedder.embed(truncated)?;
        if vector.len() != self.config.index.dimensions {
            return Err(EngineError::Embedding(EmbeddingError::DimensionMismatch(
                self.config.index.dimensions,
                vector.len(),
            )));
        }
        normalize_in_place(&mut vector);
        Ok(vector)
    }

    /// Persist a vector and insert it in the index under its label
    fn attach_embedding(&self, entry_id: &str, vector: &[f32]) -> Result<u64> {
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        let label = self.storage.attach_vector(entry_id, &bytes, vector.len())?;

        let mut index = self.index_write()?;
        let result = if index.contains(label) {
            index.update(label, vector)
        } else {
            index.add(label, vector)
        };
        drop(index);

        if let Err(e) = result {
            // Index stays untouched; the row goes back to pending
            self.storage.mark_pending(entry_id, true)?;
            return Err(EngineError::Index(e));
        }
        Ok(label)
    }

    // ========================================================================
    // QUERY
    // ========================================================================

    /// Run the full retrieval pipeline
    pub fn query(&self, text: &str, options: QueryOptions) -> Result<QueryOutcome> {
        let started = Instant::now();
        let budget = Duration::from_millis(
            options.timeout_ms.unwrap_or(self.config.query_timeout_ms),
        );
        let deadline = |phase: &str| -> Result<()> {
            if started.elapsed() > budget {
                Err(EngineError::Timeout(format!("query budget spent at {phase}")))
            } else {
                Ok(())
            }
        };

        let route = self
            .router
            .select(text, options.adversarial, !options.tags.is_empty());

        // Embedding phase (LRU-cached per query text)
        let vector = match self.cached_query_embedding(text) {
            Ok(vector) => vector,
            Err(EngineError::Embedding(e)) => {
                tracing::warn!(error = %e, "Query embedding unavailable; degraded result");
                return Ok(QueryOutcome {
                    matches: vec![],
                    trajectory_id: None,
                    memrl_query_id: None,
                    route,
                    degraded: true,
                });
            }
            Err(e) => return Err(e),
        };
        deadline("embedding")?;

        match self.run_route(text, &vector, route, &options, &deadline) {
            Ok(outcome) => {
                self.router.record_success(route);
                Ok(outcome)
            }
            Err(e @ EngineError::Timeout(_)) => Err(e),
            Err(e) => {
                self.router.record_failure(route);
                if route == RetrievalStrategy::DirectRetrieval {
                    return Err(e);
                }
                tracing::warn!(route = %route, error = %e, "Route failed; falling back to direct retrieval");
                let outcome = self.run_route(
                    text,
                    &vector,
                    RetrievalStrategy::DirectRetrieval,
                    &options,
                    &deadline,
                )?;
                self.router.record_success(RetrievalStrategy::DirectRetrieval);
                Ok(outcome)
            }
        }
    }

    fn cached_query_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(text) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embed_text(text)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    fn run_route(
        &self,
        text: &str,
        vector: &[f32],
        route: RetrievalStrategy,
        options: &QueryOptions,
        deadline: &dyn Fn(&str) -> Result<()>,
    ) -> Result<QueryOutcome> {
        let top_k = options.top_k.max(1);
        let wide_k = (top_k * 3).max(30);

        // Vector search phase
        let (hits, index_len) = {
            let index = self.index_read()?;
            (index.search(vector, wide_k)?, index.len())
        };
        if index_len == 0 {
            // Nothing local to rank; a shared collaborator may still answer
            let matches = if options.include_shared {
                self.shared_matches(vector, top_k).unwrap_or_default()
            } else {
                vec![]
            };
            return Ok(QueryOutcome {
                matches,
                trajectory_id: None,
                memrl_query_id: None,
                route,
                degraded: true,
            });
        }
        deadline("vector search")?;

        // Resolve labels to entry ids
        let labels: Vec<u64> = hits.iter().map(|(l, _)| *l).collect();
        let mapping = self.storage.get_entry_ids_for_labels(&labels)?;
        let mut candidates: Vec<(String, f64)> = hits
            .iter()
            .filter_map(|(label, score)| {
                mapping.get(label).map(|id| (id.clone(), *score as f64))
            })
            .collect();

        // Route-specific expansion
        match route {
            RetrievalStrategy::CausalForward => {
                self.expand_causal(&mut candidates, TraversalDirection::Forward, None)?;
            }
            RetrievalStrategy::CausalBackward => {
                self.expand_causal(&mut candidates, TraversalDirection::Backward, None)?;
            }
            RetrievalStrategy::TemporalCausal => {
                self.expand_causal(
                    &mut candidates,
                    TraversalDirection::Both,
                    Some(vec![RelationType::Precedes, RelationType::Triggers]),
                )?;
            }
            RetrievalStrategy::Adversarial => {
                // Drop entries the shadow side flags as contradictions
                let shadow_hits = {
                    let index = self.index_read()?;
                    index.search(&shadow::negate(vector), top_k)?
                };
                let shadow_labels: Vec<u64> = shadow_hits.iter().map(|(l, _)| *l).collect();
                let shadow_map = self.storage.get_entry_ids_for_labels(&shadow_labels)?;
                let contradicted: Vec<String> = shadow_hits
                    .iter()
                    .filter(|(_, score)| *score >= 0.5)
                    .filter_map(|(label, _)| shadow_map.get(label).cloned())
                    .collect();
                candidates.retain(|(id, _)| !contradicted.contains(id));
            }
            _ => {}
        }
        deadline("expansion")?;

        // Entry filters: tags, importance, reliability
        let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let entries = self.storage.get_batch_entries(&ids)?;
        let by_id: HashMap<String, Entry> =
            entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        let provenance_records = self.storage.get_batch_provenance(&ids)?;
        let l_scores: HashMap<String, f64> = provenance_records
            .into_iter()
            .map(|r| (r.entry_id.clone(), r.l_score))
            .collect();

        candidates.retain(|(id, _)| {
            let Some(entry) = by_id.get(id) else {
                return false;
            };
            if !options.tags.is_empty()
                && !options.tags.iter().all(|t| entry.tags.contains(t))
            {
                return false;
            }
            if let Some(min) = options.min_importance {
                if entry.importance < min {
                    return false;
                }
            }
            l_scores.get(id).copied().unwrap_or(1.0) >= self.config.l_score.reliability_threshold
        });
        deadline("filtering")?;

        // Learning-adjusted ranking; learner faults demote to warnings
        let mut memrl_query_id = None;
        let use_learning = route != RetrievalStrategy::DirectRetrieval;
        let ranked: Vec<(String, f64)> = if use_learning && self.memrl.config().enabled {
            match self.memrl.rank(text, &candidates, top_k) {
                Ok((ranked, record)) => {
                    memrl_query_id = Some(record.id);
                    ranked
                        .into_iter()
                        .map(|r| (r.entry_id, r.similarity))
                        .collect()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "MemRL ranking failed; using raw similarity");
                    self.take_top(candidates, top_k)
                }
            }
        } else if use_learning {
            match self.sona.apply_weights(&candidates) {
                Ok(adjusted) => adjusted.into_iter().take(top_k).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "Weight application failed; using raw similarity");
                    self.take_top(candidates, top_k)
                }
            }
        } else {
            self.take_top(candidates, top_k)
        };
        deadline("ranking")?;

        // Trajectory only opens once the pipeline has fully succeeded
        let trajectory = Trajectory::open(
            text,
            ranked.iter().map(|(id, _)| id.clone()).collect(),
            ranked.iter().map(|(_, s)| *s).collect(),
            route.as_str(),
        );
        self.storage.store_trajectory(&trajectory)?;

        let mut matches: Vec<QueryMatch> = ranked
            .iter()
            .filter_map(|(id, score)| {
                by_id.get(id).map(|entry| QueryMatch {
                    entry: entry.clone(),
                    score: *score,
                    origin: ResultOrigin::Local,
                })
            })
            .collect();

        // Shared collaborator results ride along, clearly marked, never
        // recorded in the trajectory
        if options.include_shared {
            match self.shared_matches(vector, top_k) {
                Ok(mut shared) => matches.append(&mut shared),
                Err(e) => tracing::warn!(error = %e, "Shared instance lookup failed"),
            }
        }

        Ok(QueryOutcome {
            matches,
            trajectory_id: Some(trajectory.id),
            memrl_query_id,
            route,
            degraded: false,
        })
    }

    fn take_top(&self, mut candidates: Vec<(String, f64)>, top_k: usize) -> Vec<(String, f64)> {
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(top_k);
        candidates
    }

    fn expand_causal(
        &self,
        candidates: &mut Vec<(String, f64)>,
        direction: TraversalDirection,
        relation_types: Option<Vec<RelationType>>,
    ) -> Result<()> {
        let seeds: Vec<(String, f64)> = candidates.iter().take(CAUSAL_SEEDS).cloned().collect();
        if seeds.is_empty() {
            return Ok(());
        }

        let graph = self.causal_read()?;
        let now = Utc::now();
        let mut discovered: HashMap<String, f64> = HashMap::new();

        for (seed_id, seed_score) in &seeds {
            let query = TraversalQuery {
                start_ids: vec![seed_id.clone()],
                direction,
                max_depth: 2,
                min_strength: 0.0,
                relation_types: relation_types.clone(),
                max_paths: 50,
            };
            for path in graph.traverse(&query, now) {
                let Some(end) = path.end() else { continue };
                let score = seed_score * path.total_strength;
                let slot = discovered.entry(end.to_string()).or_insert(0.0);
                if score > *slot {
                    *slot = score;
                }
            }
        }
        drop(graph);

        for (id, score) in discovered {
            match candidates.iter_mut().find(|(cid, _)| *cid == id) {
                Some((_, existing)) => {
                    if score > *existing {
                        *existing = score;
                    }
                }
                None => candidates.push((id, score)),
            }
        }
        Ok(())
    }

    fn shared_matches(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>> {
        let guard = self
            .shared
            .read()
            .map_err(|_| EngineError::Internal("shared lock poisoned".into()))?;
        let Some(shared) = guard.as_ref() else {
            return Ok(vec![]);
        };
        Ok(shared
            .search(vector, top_k)?
            .into_iter()
            .map(|(entry, score)| QueryMatch {
                entry,
                score,
                origin: ResultOrigin::Shared,
            })
            .collect())
    }

    // ========================================================================
    // CAUSAL API
    // ========================================================================

    /// Add a causal hyperedge
    pub fn add_causal(
        &self,
        source_ids: Vec<String>,
        target_ids: Vec<String>,
        relation: RelationType,
        strength: f64,
        ttl_ms: Option<i64>,
    ) -> Result<Hyperedge> {
        let edge = Hyperedge::new(relation, source_ids, target_ids, strength, ttl_ms)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        self.storage.store_causal(&edge)?;
        self.causal_write()?.insert(edge.clone());
        Ok(edge)
    }

    /// Traverse the causal mirror
    pub fn traverse_causal(&self, query: &TraversalQuery) -> Result<Vec<CausalPath>> {
        Ok(self.causal_read()?.traverse(query, Utc::now()))
    }

    /// Paths from `source` ending at `target`
    pub fn find_paths(
        &self,
        source: &str,
        target: &str,
        max_depth: usize,
    ) -> Result<Vec<CausalPath>> {
        Ok(self
            .causal_read()?
            .find_paths(source, target, max_depth, Utc::now()))
    }

    /// Expired edges awaiting cleanup
    pub fn get_expired_causal(&self) -> Result<Vec<Hyperedge>> {
        Ok(self.storage.get_expired_causal()?)
    }

    /// Remove expired edges from storage and the mirror; returns their ids
    pub fn cleanup_expired(&self) -> Result<Vec<String>> {
        let removed = self.storage.delete_expired_causal()?;
        {
            let mut graph = self.causal_write()?;
            for id in &removed {
                graph.remove(id);
            }
            // The mirror may still hold expired edges persisted by an
            // earlier process lifetime
            for id in graph.expired_ids(Utc::now()) {
                graph.remove(&id);
            }
        }
        if !removed.is_empty() {
            self.emit(EngineEvent::TtlCleanup {
                removed: removed.clone(),
            });
        }
        Ok(removed)
    }

    // ========================================================================
    // PROVENANCE API
    // ========================================================================

    /// Trace an entry's full ancestry
    pub fn trace_lineage(&self, entry_id: &str, max_depth: Option<i64>) -> Result<LineageReport> {
        let record = self
            .storage
            .get_provenance(entry_id)?
            .ok_or_else(|| EngineError::NotFound(format!("entry {entry_id}")))?;

        let depth = max_depth.unwrap_or(self.config.l_score.max_depth);
        let ancestor_ids = self.storage.get_lineage_entry_ids(entry_id, depth)?;
        let records = self.storage.get_batch_provenance(&ancestor_ids)?;
        let by_id: HashMap<String, ProvenanceRecord> = records
            .into_iter()
            .map(|r| (r.entry_id.clone(), r))
            .collect();

        let ancestors = ancestor_ids
            .iter()
            .filter_map(|id| {
                by_id.get(id).map(|r| LineageNode {
                    entry_id: id.clone(),
                    lineage_depth: r.lineage_depth,
                    l_score: r.l_score,
                })
            })
            .collect();

        Ok(LineageReport {
            entry_id: entry_id.to_string(),
            l_score: record.l_score,
            ancestors,
        })
    }

    // ========================================================================
    // SHADOW API
    // ========================================================================

    /// Adversarial search: supports along the query, contradictions along
    /// its shadow
    pub fn shadow_search(&self, text: &str, k: usize) -> Result<ShadowReport> {
        let vector = self.cached_query_embedding(text)?;
        let shadow_vector = shadow::negate(&vector);
        let k = k.max(1);

        let (support_hits, shadow_hits) = {
            let index = self.index_read()?;
            (
                index.search(&vector, k)?,
                index.search(&shadow_vector, k)?,
            )
        };

        let mut labels: Vec<u64> = support_hits.iter().map(|(l, _)| *l).collect();
        labels.extend(shadow_hits.iter().map(|(l, _)| *l));
        let mapping = self.storage.get_entry_ids_for_labels(&labels)?;
        let ids: Vec<String> = mapping.values().cloned().collect();
        let provenance_records = self.storage.get_batch_provenance(&ids)?;
        let l_scores: HashMap<String, f64> = provenance_records
            .into_iter()
            .map(|r| (r.entry_id.clone(), r.l_score))
            .collect();

        let annotate = |hits: &[(u64, f32)]| -> Vec<(String, f64, f64)> {
            hits.iter()
                .filter_map(|(label, score)| {
                    let id = mapping.get(label)?;
                    let l_score = l_scores.get(id).copied().unwrap_or(1.0);
                    Some((id.clone(), *score as f64, l_score))
                })
                .collect()
        };

        Ok(shadow::build_report(
            annotate(&support_hits),
            annotate(&shadow_hits),
        ))
    }

    // ========================================================================
    // LEARNING API
    // ========================================================================

    /// Apply quality feedback to a trajectory, at most once
    pub fn learn(&self, trajectory_id: &str, quality: f64) -> Result<LearnReport> {
        let trajectory = self
            .storage
            .get_trajectory(trajectory_id)?
            .ok_or_else(|| EngineError::NotFound(format!("trajectory {trajectory_id}")))?;

        if trajectory.is_closed() || !self.storage.store_feedback(trajectory_id, quality)? {
            return Ok(LearnReport::already_applied());
        }

        let report = self.sona.feedback(&trajectory, quality)?;
        if report.checkpoint_written {
            self.emit(EngineEvent::DriftAlert {
                drift: report.drift,
            });
        }
        if report.rollback_performed {
            self.emit(EngineEvent::DriftRollback {
                drift: self.config.sona.drift_critical,
                restored_drift: report.drift,
            });
        }
        Ok(report)
    }

    /// Apply reward feedback to a MemRL query, at most once
    pub fn provide_memrl_feedback(
        &self,
        query_id: &str,
        reward: f64,
        per_entry: Option<&HashMap<String, f64>>,
    ) -> Result<MemrlFeedbackOutcome> {
        Ok(self.memrl.provide_feedback(query_id, reward, per_entry)?)
    }

    /// Run the pattern learner's maintenance sweep
    pub fn learning_maintenance(&self) -> Result<crate::learning::MaintenanceReport> {
        Ok(self.sona.maintenance()?)
    }

    /// Age out trajectories past the configured retention window
    pub fn prune_trajectories(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.trajectory_retention_days);
        Ok(self.storage.prune_trajectories_before(cutoff)?)
    }

    // ========================================================================
    // EDIT / DELETE
    // ========================================================================

    /// Apply a partial update to an entry
    pub fn edit(&self, entry_id: &str, patch: EntryPatch) -> Result<Entry> {
        let mut entry = self
            .storage
            .get_entry(entry_id)?
            .ok_or_else(|| EngineError::NotFound(format!("entry {entry_id}")))?;
        if patch.is_empty() {
            return Ok(entry);
        }

        if let Some(tags) = &patch.tags {
            for tag in tags {
                if !tag_is_valid(tag) {
                    return Err(EngineError::InvalidArgument(format!(
                        "tag {tag:?} is empty or carries control characters"
                    )));
                }
            }
        }
        for value in [patch.importance, patch.confidence].into_iter().flatten() {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidArgument(format!(
                    "importance and confidence must lie in [0, 1], got {value}"
                )));
            }
        }

        let content_changed = patch
            .content
            .as_ref()
            .map(|c| *c != entry.content)
            .unwrap_or(false);
        let confidence_changed = patch
            .confidence
            .map(|c| (c - entry.confidence).abs() > f64::EPSILON)
            .unwrap_or(false);

        if let Some(content) = patch.content {
            if content.trim().is_empty() {
                return Err(EngineError::InvalidArgument(
                    "content must not be empty".to_string(),
                ));
            }
            entry.content = content;
        }
        if let Some(mut tags) = patch.tags {
            tags.sort();
            tags.dedup();
            entry.tags = tags;
        }
        if let Some(importance) = patch.importance {
            entry.importance = importance;
        }
        if let Some(confidence) = patch.confidence {
            entry.confidence = confidence;
        }
        if let Some(context) = patch.context {
            entry.context = Some(context);
        }
        entry.updated_at = Utc::now();
        if content_changed {
            entry.pending_embedding = true;
        }

        self.storage.update_entry(&entry)?;

        if content_changed {
            match self.embed_text(&entry.content) {
                Ok(vector) => {
                    self.attach_embedding(&entry.id, &vector)?;
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Re-embedding failed; entry left pending");
                    self.emit(EngineEvent::PendingEmbedding {
                        entry_id: entry.id.clone(),
                    });
                }
            }
        }

        if confidence_changed {
            provenance::propagate_l_score_update(
                &self.storage,
                &entry.id,
                self.config.l_score.decay_base,
                self.config.l_score.max_depth,
            )?;
        }

        self.storage
            .get_entry(&entry.id)?
            .ok_or_else(|| EngineError::NotFound(format!("entry {}", entry.id)))
    }

    /// Delete an entry with full cascade; false when it did not exist
    pub fn delete(&self, entry_id: &str) -> Result<bool> {
        let children = self.storage.get_child_ids(entry_id)?;
        let outcome = self.storage.delete_entry(entry_id)?;
        if !outcome.existed {
            return Ok(false);
        }

        if let Some(label) = outcome.label {
            let mut index = self.index_write()?;
            if let Err(e) = index.remove(label) {
                tracing::warn!(label, error = %e, "Vector label already absent from index");
            }
        }

        {
            let mut graph = self.causal_write()?;
            for edge_id in &outcome.removed_causal_ids {
                graph.remove(edge_id);
            }
        }

        // Children were re-parented; their reliability follows
        for child in children {
            provenance::propagate_l_score_update(
                &self.storage,
                &child,
                self.config.l_score.decay_base,
                self.config.l_score.max_depth,
            )?;
        }

        Ok(true)
    }

    // ========================================================================
    // RECONCILER
    // ========================================================================

    /// One reconciliation sweep over pending entries; returns how many
    /// gained their vector
    pub fn reconcile_pending(&self) -> Result<usize> {
        let pending = self.storage.get_pending_entries(
            self.config.embedding.batch_size,
            self.config.reconciler.max_attempts,
        )?;
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|e| {
                truncate_for_provider(&e.content, self.config.embedding.truncate_chars).to_string()
            })
            .collect();

        let vectors = match self.embedder.embed_batch(&texts) {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(error = %e, batch = pending.len(), "Reconciler batch failed");
                for entry in &pending {
                    self.storage.bump_embedding_attempts(&entry.id)?;
                }
                return Ok(0);
            }
        };

        let mut reconciled = 0usize;
        for (entry, mut vector) in pending.into_iter().zip(vectors) {
            if vector.len() != self.config.index.dimensions {
                self.storage.bump_embedding_attempts(&entry.id)?;
                continue;
            }
            normalize_in_place(&mut vector);
            match self.attach_embedding(&entry.id, &vector) {
                Ok(_) => {
                    reconciled += 1;
                    self.emit(EngineEvent::EmbeddingReconciled {
                        entry_id: entry.id.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Reconcile attach failed");
                    self.storage.bump_embedding_attempts(&entry.id)?;
                }
            }
        }
        Ok(reconciled)
    }

    /// Spawn the background reconciler
    ///
    /// Sweeps on the base delay; consecutive fruitless sweeps back off
    /// exponentially up to the configured cap. The task ends when the engine
    /// is dropped.
    pub fn spawn_reconciler(engine: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(engine);
        tokio::spawn(async move {
            let mut fruitless: u32 = 0;
            loop {
                let (base, cap) = match weak.upgrade() {
                    Some(engine) => (
                        engine.config.reconciler.base_delay_ms,
                        engine.config.reconciler.max_delay_ms,
                    ),
                    None => return,
                };
                let delay = base
                    .saturating_mul(1u64 << fruitless.min(16))
                    .min(cap);
                tokio::time::sleep(Duration::from_millis(delay)).await;

                let swept = {
                    let Some(engine) = weak.upgrade() else { return };
                    tokio::task::spawn_blocking(move || engine.reconcile_pending()).await
                };
                match swept {
                    Ok(Ok(0)) => fruitless = fruitless.saturating_add(1),
                    Ok(Ok(n)) => {
                        tracing::info!(reconciled = n, "Reconciler attached pending embeddings");
                        fruitless = 0;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Reconciler sweep failed");
                        fruitless = fruitless.saturating_add(1);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconciler task failed");
                        fruitless = fruitless.saturating_add(1);
                    }
                }
            }
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Engine statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        let mut stats = self.storage.stats()?;
        stats.indexed_vectors = self.index_read()?.len() as i64;
        Ok(stats)
    }

    /// Persist the companion index file
    pub fn save_index(&self) -> Result<()> {
        self.index_read()?.save(&self.index_path)?;
        Ok(())
    }

    /// Flush durable state before shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.save_index()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DIMS: usize = 64;

    /// Provider that can be switched off to simulate outages
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        down: AtomicBool,
    }

    impl FlakyEmbedder {
        fn new() -> Self {
            Self {
                inner: HashingEmbedder::new(DIMS),
                down: AtomicBool::new(false),
            }
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }
    }

    impl EmbeddingProvider for FlakyEmbedder {
        fn name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(EmbeddingError::ProviderUnavailable("offline".to_string()));
            }
            self.inner.embed_batch(texts)
        }
    }

    fn test_config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.data_dir = Some(dir.to_path_buf());
        config.index.dimensions = DIMS;
        config.index.ef_construction = 50;
        config.index.ef_search = 40;
        config
    }

    fn new_engine(dir: &Path) -> (Arc<FlakyEmbedder>, MemoryEngine) {
        let embedder = Arc::new(FlakyEmbedder::new());
        let engine = MemoryEngine::new(test_config(dir), embedder.clone()).unwrap();
        (embedder, engine)
    }

    #[test]
    fn test_store_then_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        let stored = engine
            .store(StoreInput::from_content("the borrow checker enforces aliasing"))
            .unwrap();
        assert!(!stored.pending_embedding);

        let outcome = engine
            .query(
                "the borrow checker enforces aliasing",
                QueryOptions::default(),
            )
            .unwrap();
        assert!(!outcome.degraded);
        assert!(outcome.trajectory_id.is_some());
        assert_eq!(outcome.matches[0].entry.id, stored.id);
        assert!(outcome.matches[0].score > 0.95);
    }

    #[test]
    fn test_store_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        assert!(matches!(
            engine.store(StoreInput::from_content("  ")),
            Err(EngineError::InvalidArgument(_))
        ));

        let mut bad_tag = StoreInput::from_content("ok");
        bad_tag.tags = vec!["bad\ntag".to_string()];
        assert!(matches!(
            engine.store(bad_tag),
            Err(EngineError::InvalidArgument(_))
        ));

        let mut bad_range = StoreInput::from_content("ok");
        bad_range.importance = 1.5;
        assert!(matches!(
            engine.store(bad_range),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_provider_outage_leaves_pending_then_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let (embedder, engine) = new_engine(dir.path());

        embedder.set_down(true);
        let stored = engine
            .store(StoreInput::from_content("offline at ingest"))
            .unwrap();
        assert!(stored.pending_embedding);

        // Degraded query while nothing is indexed
        let outcome = engine.query("offline at ingest", QueryOptions::default());
        assert!(matches!(
            outcome,
            Ok(QueryOutcome { degraded: true, .. }) | Err(EngineError::Embedding(_))
        ));

        embedder.set_down(false);
        let reconciled = engine.reconcile_pending().unwrap();
        assert_eq!(reconciled, 1);

        let fresh = engine.query("offline at ingest", QueryOptions::default()).unwrap();
        assert!(!fresh.degraded);
        assert_eq!(fresh.matches[0].entry.id, stored.id);
        assert!(!fresh.matches[0].entry.pending_embedding);
    }

    #[test]
    fn test_delete_removes_from_index_and_graph() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        let a = engine.store(StoreInput::from_content("alpha fact")).unwrap();
        let b = engine.store(StoreInput::from_content("beta fact")).unwrap();
        engine
            .add_causal(
                vec![a.id.clone()],
                vec![b.id.clone()],
                RelationType::Causes,
                0.9,
                None,
            )
            .unwrap();

        assert!(engine.delete(&a.id).unwrap());
        assert!(!engine.delete(&a.id).unwrap());

        let outcome = engine.query("alpha fact", QueryOptions::default()).unwrap();
        assert!(outcome.matches.iter().all(|m| m.entry.id != a.id));

        let paths = engine
            .traverse_causal(&TraversalQuery::from_entry(&a.id))
            .unwrap();
        assert!(paths.is_empty());
        assert_eq!(engine.stats().unwrap().indexed_vectors, 1);
    }

    #[test]
    fn test_edit_reembeds_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        let root = engine.store(StoreInput::from_content("root fact")).unwrap();
        let mut child_input = StoreInput::from_content("derived note");
        child_input.parents = vec![root.id.clone()];
        child_input.confidence = 0.8;
        child_input.relevance = 0.9;
        let child = engine.store(child_input).unwrap();

        let before = engine.trace_lineage(&child.id, None).unwrap();
        assert!((before.l_score - 0.648).abs() < 1e-6);

        let edited = engine
            .edit(
                &child.id,
                EntryPatch {
                    confidence: Some(0.4),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!((edited.confidence - 0.4).abs() < 1e-9);

        let after = engine.trace_lineage(&child.id, None).unwrap();
        assert!((after.l_score - 0.4 * 0.9 * 0.9).abs() < 1e-6);

        // Content edit keeps the entry findable under the new text
        let renamed = engine
            .edit(
                &child.id,
                EntryPatch {
                    content: Some("entirely different topic".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!renamed.pending_embedding);
        let outcome = engine
            .query("entirely different topic", QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.matches[0].entry.id, child.id);
    }

    #[test]
    fn test_learn_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        engine.store(StoreInput::from_content("fact one")).unwrap();
        let outcome = engine.query("fact one", QueryOptions::default()).unwrap();
        let trajectory_id = outcome.trajectory_id.unwrap();

        let first = engine.learn(&trajectory_id, 0.9).unwrap();
        assert!(!first.already_applied);
        let second = engine.learn(&trajectory_id, 0.1).unwrap();
        assert!(second.already_applied);

        assert!(matches!(
            engine.learn("missing", 0.5),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_memrl_feedback_via_facade() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        engine.store(StoreInput::from_content("fact one")).unwrap();
        let outcome = engine.query("fact one", QueryOptions::default()).unwrap();
        let query_id = outcome.memrl_query_id.unwrap();

        let first = engine.provide_memrl_feedback(&query_id, 1.0, None).unwrap();
        assert!(first.applied);
        let second = engine.provide_memrl_feedback(&query_id, 1.0, None).unwrap();
        assert!(!second.applied);
    }

    #[test]
    fn test_ttl_cleanup_emits_event() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());
        let mut events = engine.subscribe();

        let a = engine.store(StoreInput::from_content("cause")).unwrap();
        let b = engine.store(StoreInput::from_content("effect")).unwrap();
        engine
            .add_causal(
                vec![a.id.clone()],
                vec![b.id.clone()],
                RelationType::Causes,
                0.9,
                Some(0),
            )
            .unwrap();

        let removed = engine.cleanup_expired().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::TtlCleanup { .. })
        ));

        let paths = engine
            .traverse_causal(&TraversalQuery::from_entry(&a.id))
            .unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn test_index_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let (_e, engine) = new_engine(dir.path());
            let entry = engine
                .store(StoreInput::from_content("durable fact"))
                .unwrap();
            engine.shutdown().unwrap();
            entry.id
        };

        let (_e, engine) = new_engine(dir.path());
        let outcome = engine.query("durable fact", QueryOptions::default()).unwrap();
        assert_eq!(outcome.matches[0].entry.id, id);
    }

    #[test]
    fn test_index_rebuild_when_companion_missing() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let (_e, engine) = new_engine(dir.path());
            // No shutdown: companion file never written
            engine
                .store(StoreInput::from_content("rebuilt fact"))
                .unwrap()
                .id
        };

        let (_e, engine) = new_engine(dir.path());
        let outcome = engine
            .query("rebuilt fact", QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.matches[0].entry.id, id);

        // Strict mode refuses instead
        let mut config = test_config(dir.path());
        config.strict_index_recovery = true;
        let result = MemoryEngine::new(config, Arc::new(HashingEmbedder::new(DIMS)));
        assert!(result.is_err());
    }

    #[test]
    fn test_shared_instance_results_are_marked() {
        let primary_dir = tempfile::tempdir().unwrap();
        let shared_dir = tempfile::tempdir().unwrap();

        {
            let (_e, donor) = new_engine(shared_dir.path());
            donor
                .store(StoreInput::from_content("wisdom from the core brain"))
                .unwrap();
            donor.shutdown().unwrap();
        }

        let (_e, engine) = new_engine(primary_dir.path());
        engine.attach_shared(shared_dir.path()).unwrap();
        engine
            .store(StoreInput::from_content("a local note"))
            .unwrap();

        let outcome = engine
            .query("wisdom from the core brain", QueryOptions::default())
            .unwrap();
        let shared_match = outcome
            .matches
            .iter()
            .find(|m| m.origin == ResultOrigin::Shared)
            .expect("shared result surfaced");
        assert_eq!(shared_match.entry.content, "wisdom from the core brain");

        // Shared results never enter the local trajectory
        let trajectory_id = outcome.trajectory_id.unwrap();
        let learned = engine.learn(&trajectory_id, 1.0).unwrap();
        assert!(!learned.already_applied);
    }

    #[test]
    fn test_tag_and_importance_filters() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());

        let mut tagged = StoreInput::from_content("tagged entry about rust");
        tagged.tags = vec!["rust".to_string()];
        tagged.importance = 0.9;
        let tagged = engine.store(tagged).unwrap();

        let mut untagged = StoreInput::from_content("untagged entry about rust");
        untagged.importance = 0.1;
        engine.store(untagged).unwrap();

        let options = QueryOptions {
            tags: vec!["rust".to_string()],
            min_importance: Some(0.5),
            ..Default::default()
        };
        let outcome = engine.query("entry about rust", options).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].entry.id, tagged.id);
    }

    #[test]
    fn test_query_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());
        engine.store(StoreInput::from_content("anything")).unwrap();

        let options = QueryOptions {
            timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            engine.query("anything", options),
            Err(EngineError::Timeout(_))
        ));
    }

    #[test]
    fn test_shadow_search_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let (_e, engine) = new_engine(dir.path());
        engine
            .store(StoreInput::from_content("the sky is blue"))
            .unwrap();

        let report = engine.shadow_search("the sky is blue", 5).unwrap();
        assert!(!report.supports.is_empty());
        assert!(report.supports[0].score > 0.95);
    }
}
