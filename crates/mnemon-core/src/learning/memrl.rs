//! Entry-level Q-learning
//!
//! Every entry carries a Q-value (neutral 0.5, clamped to [min_q, max_q]).
//! Retrieval is two-phase: a similarity floor drops weak candidates, then a
//! z-score composite of similarity and Q ranks the survivors. Feedback
//! advances Q-values with the EMA rule `q += α (r − q)`, once per query.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Result, Storage};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Q-learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemRlConfig {
    /// Master switch; when off the pattern learner ranks alone
    pub enabled: bool,
    /// Similarity floor for phase A
    pub delta: f64,
    /// Q-value share of the composite score
    pub lambda: f64,
    /// EMA learning rate for feedback
    pub alpha: f64,
    /// Lower Q clamp
    pub min_q: f64,
    /// Upper Q clamp
    pub max_q: f64,
}

impl Default for MemRlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delta: 0.3,
            lambda: 0.3,
            alpha: 0.1,
            min_q: 0.1,
            max_q: 1.0,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Persisted snapshot of one two-phase ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemrlQueryRecord {
    /// Unique query id (UUID v4)
    pub id: String,
    /// The query text as asked
    pub query_text: String,
    /// Retained entry ids, rank order
    pub entry_ids: Vec<String>,
    /// Raw similarities, aligned with `entry_ids`
    pub similarities: Vec<f64>,
    /// Q-values at ranking time, aligned with `entry_ids`
    pub q_values: Vec<f64>,
    /// Similarity floor used
    pub delta: f64,
    /// Q share used
    pub lambda: f64,
    /// When the ranking ran
    pub created_at: DateTime<Utc>,
    /// True once feedback has been applied
    pub feedback_applied: bool,
}

impl MemrlQueryRecord {
    /// Open a record for a completed ranking
    pub fn open(
        query_text: impl Into<String>,
        entry_ids: Vec<String>,
        similarities: Vec<f64>,
        q_values: Vec<f64>,
        delta: f64,
        lambda: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query_text: query_text.into(),
            entry_ids,
            similarities,
            q_values,
            delta,
            lambda,
            created_at: Utc::now(),
            feedback_applied: false,
        }
    }
}

/// One ranked candidate out of phase B
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    /// The candidate entry
    pub entry_id: String,
    /// Raw vector similarity
    pub similarity: f64,
    /// Q-value at ranking time
    pub q_value: f64,
    /// `(1 − λ) sim_z + λ q_z`
    pub composite: f64,
}

/// Outcome of a feedback application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemrlFeedbackOutcome {
    /// False when feedback had already been applied
    pub applied: bool,
    /// Entries whose Q-value advanced
    pub entries_updated: usize,
    /// Diagnostic message
    pub message: String,
}

// ============================================================================
// MEMRL ENGINE
// ============================================================================

/// The entry-level Q-learner
pub struct MemRlEngine {
    storage: Arc<Storage>,
    config: MemRlConfig,
}

impl MemRlEngine {
    /// Create the learner
    pub fn new(storage: Arc<Storage>, config: MemRlConfig) -> Self {
        Self { storage, config }
    }

    /// Learner configuration
    pub fn config(&self) -> &MemRlConfig {
        &self.config
    }

    /// Two-phase ranking over vector-search candidates
    ///
    /// Phase A drops candidates below the similarity floor and batch-fetches
    /// their Q-values; phase B ranks by the z-score composite. Persists the
    /// snapshot and returns it alongside the top-k ranking.
    pub fn rank(
        &self,
        query_text: &str,
        candidates: &[(String, f64)],
        top_k: usize,
    ) -> Result<(Vec<RankedCandidate>, MemrlQueryRecord)> {
        // Phase A: similarity floor + Q fetch
        let survivors: Vec<(String, f64)> = candidates
            .iter()
            .filter(|(_, sim)| *sim >= self.config.delta)
            .cloned()
            .collect();
        let ids: Vec<String> = survivors.iter().map(|(id, _)| id.clone()).collect();
        let q_map = self.storage.get_q_values_batch(&ids)?;

        let sims: Vec<f64> = survivors.iter().map(|(_, s)| *s).collect();
        let qs: Vec<f64> = survivors
            .iter()
            .map(|(id, _)| q_map.get(id).copied().unwrap_or(0.5))
            .collect();

        // Phase B: z-score composite
        let sim_stats = mean_std(&sims);
        let q_stats = mean_std(&qs);

        let mut ranked: Vec<RankedCandidate> = survivors
            .iter()
            .zip(sims.iter().zip(qs.iter()))
            .map(|((id, _), (sim, q))| {
                let sim_z = z_score(*sim, sim_stats);
                let q_z = z_score(*q, q_stats);
                RankedCandidate {
                    entry_id: id.clone(),
                    similarity: *sim,
                    q_value: *q,
                    composite: (1.0 - self.config.lambda) * sim_z + self.config.lambda * q_z,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        ranked.truncate(top_k);

        let record = MemrlQueryRecord::open(
            query_text,
            ranked.iter().map(|r| r.entry_id.clone()).collect(),
            ranked.iter().map(|r| r.similarity).collect(),
            ranked.iter().map(|r| r.q_value).collect(),
            self.config.delta,
            self.config.lambda,
        );
        self.storage.store_memrl_query(&record)?;

        Ok((ranked, record))
    }

    /// Apply reward feedback to every entry a query retrieved, exactly once
    ///
    /// `reward` in [0, 1] applies globally; `per_entry` overrides individual
    /// entries. The Q-value batch advances atomically with the
    /// feedback-applied mark.
    pub fn provide_feedback(
        &self,
        query_id: &str,
        reward: f64,
        per_entry: Option<&HashMap<String, f64>>,
    ) -> Result<MemrlFeedbackOutcome> {
        let record = self
            .storage
            .get_memrl_query(query_id)?
            .ok_or_else(|| crate::storage::StorageError::NotFound(format!(
                "memrl query {query_id}"
            )))?;

        let reward = reward.clamp(0.0, 1.0);
        let updates: Vec<(String, f64)> = record
            .entry_ids
            .iter()
            .map(|id| {
                let r = per_entry
                    .and_then(|m| m.get(id).copied())
                    .unwrap_or(reward)
                    .clamp(0.0, 1.0);
                (id.clone(), r)
            })
            .collect();

        match self.storage.apply_memrl_feedback(
            query_id,
            &updates,
            self.config.alpha,
            self.config.min_q,
            self.config.max_q,
        )? {
            Some(updated) => Ok(MemrlFeedbackOutcome {
                applied: true,
                entries_updated: updated,
                message: format!("advanced {updated} q-values"),
            }),
            None => Ok(MemrlFeedbackOutcome {
                applied: false,
                entries_updated: 0,
                message: "already-applied".to_string(),
            }),
        }
    }
}

// ============================================================================
// STATISTICS HELPERS
// ============================================================================

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

fn z_score(value: f64, (mean, std): (f64, f64)) -> f64 {
    if std <= f64::EPSILON {
        return 0.0;
    }
    (value - mean) / std
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Entry;
    use crate::provenance::ProvenanceRecord;

    fn setup() -> (tempfile::TempDir, Arc<Storage>, MemRlEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("memrl.db"))).unwrap());
        let engine = MemRlEngine::new(storage.clone(), MemRlConfig::default());
        (dir, storage, engine)
    }

    fn store_entry(storage: &Storage, id: &str, q: f64) {
        let entry = Entry {
            id: id.to_string(),
            content: format!("content {id}"),
            q_value: q,
            ..Default::default()
        };
        storage
            .store_entry(&entry, &ProvenanceRecord::root(id))
            .unwrap();
    }

    #[test]
    fn test_phase_a_drops_below_delta() {
        let (_dir, storage, engine) = setup();
        store_entry(&storage, "x", 0.5);
        store_entry(&storage, "y", 0.5);

        let candidates = vec![("x".to_string(), 0.9), ("y".to_string(), 0.1)];
        let (ranked, record) = engine.rank("q", &candidates, 10).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry_id, "x");
        assert_eq!(record.entry_ids, vec!["x".to_string()]);
        assert!((record.delta - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_q_value_breaks_similarity_ties() {
        let (_dir, storage, engine) = setup();
        store_entry(&storage, "low", 0.2);
        store_entry(&storage, "high", 0.9);

        let candidates = vec![("low".to_string(), 0.8), ("high".to_string(), 0.8)];
        let (ranked, _) = engine.rank("q", &candidates, 2).unwrap();
        assert_eq!(ranked[0].entry_id, "high");
        assert!(ranked[0].composite > ranked[1].composite);
    }

    #[test]
    fn test_high_q_outranks_slightly_better_similarity() {
        let (_dir, storage, engine) = setup();
        store_entry(&storage, "plain", 0.5);
        store_entry(&storage, "proven", 1.0);
        store_entry(&storage, "weak", 0.5);

        // With a weak outlier stretching the similarity spread, the large Q
        // advantage overcomes a 0.1 similarity edge at λ = 0.3
        let candidates = vec![
            ("plain".to_string(), 0.9),
            ("proven".to_string(), 0.8),
            ("weak".to_string(), 0.31),
        ];
        let (ranked, _) = engine.rank("q", &candidates, 3).unwrap();
        assert_eq!(ranked[0].entry_id, "proven");
    }

    #[test]
    fn test_feedback_ema_and_idempotency() {
        let (_dir, storage, engine) = setup();
        for id in ["x", "y", "z"] {
            store_entry(&storage, id, 0.5);
        }
        let candidates = vec![
            ("x".to_string(), 0.9),
            ("y".to_string(), 0.8),
            ("z".to_string(), 0.7),
        ];
        let (_, record) = engine.rank("q", &candidates, 3).unwrap();

        let outcome = engine.provide_feedback(&record.id, 1.0, None).unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.entries_updated, 3);

        let ids: Vec<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let qs = storage.get_q_values_batch(&ids).unwrap();
        for id in &ids {
            // 0.5 + 0.1 (1.0 - 0.5) = 0.55
            assert!((qs[id] - 0.55).abs() < 1e-9);
        }

        let again = engine.provide_feedback(&record.id, 1.0, None).unwrap();
        assert!(!again.applied);
        assert_eq!(again.message, "already-applied");
        let qs = storage.get_q_values_batch(&ids).unwrap();
        for id in &ids {
            assert!((qs[id] - 0.55).abs() < 1e-9);
        }
    }

    #[test]
    fn test_per_entry_rewards_override_global() {
        let (_dir, storage, engine) = setup();
        store_entry(&storage, "good", 0.5);
        store_entry(&storage, "bad", 0.5);

        let candidates = vec![("good".to_string(), 0.9), ("bad".to_string(), 0.8)];
        let (_, record) = engine.rank("q", &candidates, 2).unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("bad".to_string(), 0.0);
        engine
            .provide_feedback(&record.id, 1.0, Some(&overrides))
            .unwrap();

        let qs = storage
            .get_q_values_batch(&["good".to_string(), "bad".to_string()])
            .unwrap();
        assert!((qs["good"] - 0.55).abs() < 1e-9);
        assert!((qs["bad"] - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_q_values_clamped() {
        let (_dir, storage, _) = setup();
        store_entry(&storage, "x", 0.5);
        let engine = MemRlEngine::new(
            storage.clone(),
            MemRlConfig {
                alpha: 1.0,
                ..Default::default()
            },
        );

        let candidates = vec![("x".to_string(), 0.9)];
        let (_, record) = engine.rank("q", &candidates, 1).unwrap();
        engine.provide_feedback(&record.id, 0.0, None).unwrap();

        let qs = storage.get_q_values_batch(&["x".to_string()]).unwrap();
        // Full step toward 0 lands on the lower clamp
        assert!((qs["x"] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_for_unknown_query_errors() {
        let (_dir, _, engine) = setup();
        assert!(engine.provide_feedback("ghost", 1.0, None).is_err());
    }

    #[test]
    fn test_zero_std_degenerates_to_similarity_order() {
        let (_dir, storage, engine) = setup();
        store_entry(&storage, "a", 0.5);
        store_entry(&storage, "b", 0.5);

        let candidates = vec![("a".to_string(), 0.9), ("b".to_string(), 0.9)];
        let (ranked, _) = engine.rank("q", &candidates, 2).unwrap();
        // All z-scores zero; ordering falls back to similarity then id
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry_id, "a");
    }
}
