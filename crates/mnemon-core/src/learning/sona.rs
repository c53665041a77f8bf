//! Pattern-level learner
//!
//! LoRA-style per-pattern weights adapted by trajectory feedback, protected
//! by an EWC++-style importance-scaled learning rate. A drift monitor
//! compares the weight vector against a baseline snapshot: crossing the
//! alert threshold writes a checkpoint, crossing critical rolls back to the
//! most recent checkpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Result, Storage};

use super::Trajectory;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Pattern-learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonaConfig {
    /// Gradient scale per feedback
    pub learning_rate: f64,
    /// EWC regularization strength
    pub ewc_lambda: f64,
    /// EMA decay for per-pattern importance
    pub importance_decay: f64,
    /// Drift at or above this writes a checkpoint
    pub drift_alert: f64,
    /// Drift at or above this triggers a rollback
    pub drift_critical: f64,
    /// Patterns below this success rate are pruned
    pub prune_threshold: f64,
    /// Minimum uses before a pattern can be pruned
    pub prune_min_uses: i64,
    /// Patterns at or above this success rate are boosted
    pub boost_threshold: f64,
    /// Minimum uses before a pattern can be boosted
    pub boost_min_uses: i64,
    /// Multiplier applied to boosted weights (capped at 1.0)
    pub boost_multiplier: f64,
}

impl Default for SonaConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            ewc_lambda: 0.5,
            importance_decay: 0.9,
            drift_alert: 0.3,
            drift_critical: 0.5,
            prune_threshold: 0.4,
            prune_min_uses: 100,
            boost_threshold: 0.8,
            boost_min_uses: 3,
            boost_multiplier: 1.2,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Learned state for one pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternWeight {
    /// The pattern's id (a retrieved entry id)
    pub pattern_id: String,
    /// Learned weight in [0, 1]; 0.5 is neutral
    pub weight: f64,
    /// EWC importance, >= 0
    pub importance: f64,
    /// Times the pattern appeared in feedback
    pub use_count: i64,
    /// Times the feedback quality was >= 0.5
    pub success_count: i64,
    /// Last feedback touching the pattern
    pub last_update: DateTime<Utc>,
}

impl PatternWeight {
    /// A fresh neutral pattern
    pub fn fresh(pattern_id: impl Into<String>) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            weight: 0.5,
            importance: 0.0,
            use_count: 0,
            success_count: 0,
            last_update: Utc::now(),
        }
    }

    /// Fraction of uses with positive feedback
    pub fn success_rate(&self) -> f64 {
        if self.use_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.use_count as f64
    }
}

/// Immutable snapshot of all pattern weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightCheckpoint {
    /// Unique checkpoint id (UUID v4)
    pub id: String,
    /// pattern_id -> weight at capture
    pub weights: HashMap<String, f64>,
    /// Drift at capture
    pub drift: f64,
    /// When the checkpoint was written
    pub created_at: DateTime<Utc>,
}

impl WeightCheckpoint {
    /// Capture a checkpoint of the given weights
    pub fn capture(weights: HashMap<String, f64>, drift: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            weights,
            drift,
            created_at: Utc::now(),
        }
    }
}

/// Drift classification against the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    /// Below the alert threshold
    Ok,
    /// In the alert band; a checkpoint was written
    Alert,
    /// At or above critical; a rollback was performed
    Critical,
}

impl DriftStatus {
    fn classify(drift: f64, config: &SonaConfig) -> Self {
        if drift >= config.drift_critical {
            DriftStatus::Critical
        } else if drift >= config.drift_alert {
            DriftStatus::Alert
        } else {
            DriftStatus::Ok
        }
    }
}

/// Outcome of one feedback application
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnReport {
    /// False only when nothing could be applied
    pub success: bool,
    /// Human-readable diagnostic
    pub message: String,
    /// Patterns whose weights were touched
    pub patterns_updated: usize,
    /// Drift after this call settled
    pub drift: f64,
    /// Status of the post-call drift
    pub drift_status: DriftStatus,
    /// True when a checkpoint was written this call
    pub checkpoint_written: bool,
    /// True when critical drift forced a rollback
    pub rollback_performed: bool,
    /// True when feedback for the trajectory had already been applied
    pub already_applied: bool,
}

impl LearnReport {
    /// Benign duplicate-feedback report
    pub fn already_applied() -> Self {
        Self {
            success: true,
            message: "already-applied".to_string(),
            patterns_updated: 0,
            drift: 0.0,
            drift_status: DriftStatus::Ok,
            checkpoint_written: false,
            rollback_performed: false,
            already_applied: true,
        }
    }
}

/// Outcome of a maintenance sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Patterns deleted for chronic failure
    pub pruned: Vec<String>,
    /// Patterns boosted for consistent success
    pub boosted: Vec<String>,
    /// True when importances were rescaled into [0, 1]
    pub importance_rescaled: bool,
}

// ============================================================================
// DRIFT MATH
// ============================================================================

/// Drift = 1 - cosine similarity over the union of known patterns,
/// missing entries padded to the neutral weight 0.5
pub fn drift_between(current: &HashMap<String, f64>, baseline: &HashMap<String, f64>) -> f64 {
    let keys: HashSet<&String> = current.keys().chain(baseline.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for key in keys {
        let a = current.get(key).copied().unwrap_or(0.5);
        let b = baseline.get(key).copied().unwrap_or(0.5);
        dot += a * b;
        norm_a += a * a;
        norm_b += b * b;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom <= f64::EPSILON {
        return if norm_a == norm_b { 0.0 } else { 1.0 };
    }
    (1.0 - dot / denom).clamp(0.0, 1.0)
}

// ============================================================================
// SONA ENGINE
// ============================================================================

/// The pattern-level learner
pub struct SonaEngine {
    storage: Arc<Storage>,
    config: SonaConfig,
}

impl SonaEngine {
    /// Create the learner, capturing a baseline if none exists
    pub fn new(storage: Arc<Storage>, config: SonaConfig) -> Result<Self> {
        let engine = Self { storage, config };
        if !engine.storage.is_read_only() && engine.storage.get_sona_baseline()?.is_none() {
            engine.recalibrate_baseline()?;
        }
        Ok(engine)
    }

    /// Learner configuration
    pub fn config(&self) -> &SonaConfig {
        &self.config
    }

    /// Multiply raw similarity scores by `(0.5 + weight)` and resort
    ///
    /// Unknown patterns sit at the neutral weight, leaving their scores
    /// effectively unchanged relative to each other.
    pub fn apply_weights(&self, scored: &[(String, f64)]) -> Result<Vec<(String, f64)>> {
        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let weights = self.storage.get_pattern_weights(&ids)?;

        let mut adjusted: Vec<(String, f64)> = scored
            .iter()
            .map(|(id, score)| {
                let weight = weights.get(id).map(|w| w.weight).unwrap_or(0.5);
                (id.clone(), score * (0.5 + weight))
            })
            .collect();
        adjusted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(adjusted)
    }

    /// Apply trajectory feedback to every matched pattern
    ///
    /// Quality `q` in [0, 1]; 0.5 is neutral. Runs the drift monitor after
    /// the update and reacts per its status.
    pub fn feedback(&self, trajectory: &Trajectory, quality: f64) -> Result<LearnReport> {
        let quality = quality.clamp(0.0, 1.0);
        let ids: Vec<String> = trajectory.matched_entry_ids.clone();
        if ids.is_empty() {
            return Ok(LearnReport {
                success: true,
                message: "trajectory matched no entries".to_string(),
                patterns_updated: 0,
                drift: self.current_drift()?,
                drift_status: DriftStatus::Ok,
                checkpoint_written: false,
                rollback_performed: false,
                already_applied: false,
            });
        }

        let mut known = self.storage.get_pattern_weights(&ids)?;
        let now = Utc::now();
        let mut updated: Vec<PatternWeight> = Vec::with_capacity(ids.len());

        for (pattern_id, score) in trajectory.scored_matches() {
            let mut pattern = known
                .remove(pattern_id)
                .unwrap_or_else(|| PatternWeight::fresh(pattern_id));

            let gradient = (quality - 0.5) * score * self.config.learning_rate;
            let regularized =
                gradient / (1.0 + self.config.ewc_lambda * pattern.importance);
            pattern.weight = (pattern.weight + regularized).clamp(0.0, 1.0);
            pattern.importance = self.config.importance_decay * pattern.importance
                + (1.0 - self.config.importance_decay) * gradient.abs();
            pattern.use_count += 1;
            if quality >= 0.5 {
                pattern.success_count += 1;
            }
            pattern.last_update = now;
            updated.push(pattern);
        }

        self.storage.upsert_pattern_weights(&updated)?;
        let patterns_updated = updated.len();

        // Drift monitor
        let baseline = self.baseline()?;
        let current = self.weight_vector()?;
        let drift = drift_between(&current, &baseline);
        let status = DriftStatus::classify(drift, &self.config);

        match status {
            DriftStatus::Ok => Ok(LearnReport {
                success: true,
                message: format!("updated {patterns_updated} patterns"),
                patterns_updated,
                drift,
                drift_status: status,
                checkpoint_written: false,
                rollback_performed: false,
                already_applied: false,
            }),
            DriftStatus::Alert => {
                let checkpoint = WeightCheckpoint::capture(current, drift);
                self.storage.store_weight_checkpoint(&checkpoint)?;
                tracing::warn!(drift, "Weight drift crossed alert; checkpoint written");
                Ok(LearnReport {
                    success: true,
                    message: format!(
                        "updated {patterns_updated} patterns; drift alert, checkpoint written"
                    ),
                    patterns_updated,
                    drift,
                    drift_status: status,
                    checkpoint_written: true,
                    rollback_performed: false,
                    already_applied: false,
                })
            }
            DriftStatus::Critical => {
                // Restore the most recent checkpoint; the baseline doubles
                // as the snapshot of last resort
                let snapshot = match self.storage.get_latest_checkpoint()? {
                    Some(checkpoint) => checkpoint.weights,
                    None => baseline.clone(),
                };
                self.storage.restore_pattern_weights(&snapshot)?;

                let restored = self.weight_vector()?;
                let post_drift = drift_between(&restored, &baseline);
                tracing::warn!(
                    drift,
                    post_drift,
                    "Weight drift critical; rolled back to last checkpoint"
                );
                Ok(LearnReport {
                    success: true,
                    message: format!(
                        "drift critical ({drift:.3}); rolled back to last checkpoint"
                    ),
                    patterns_updated,
                    drift: post_drift,
                    drift_status: DriftStatus::classify(post_drift, &self.config),
                    checkpoint_written: false,
                    rollback_performed: true,
                    already_applied: false,
                })
            }
        }
    }

    /// Current drift against the baseline
    pub fn current_drift(&self) -> Result<f64> {
        let baseline = self.baseline()?;
        let current = self.weight_vector()?;
        Ok(drift_between(&current, &baseline))
    }

    /// Re-capture the baseline from the current weights
    pub fn recalibrate_baseline(&self) -> Result<()> {
        let current = self.weight_vector()?;
        self.storage.set_sona_baseline(&current)
    }

    /// Prune chronic failures, boost consistent successes, rescale runaway
    /// importances
    pub fn maintenance(&self) -> Result<MaintenanceReport> {
        let all = self.storage.get_all_pattern_weights()?;
        let mut report = MaintenanceReport::default();
        let mut to_upsert: Vec<PatternWeight> = Vec::new();

        for pattern in all.values() {
            if pattern.use_count >= self.config.prune_min_uses
                && pattern.success_rate() < self.config.prune_threshold
            {
                self.storage.delete_pattern_weight(&pattern.pattern_id)?;
                report.pruned.push(pattern.pattern_id.clone());
            } else if pattern.use_count >= self.config.boost_min_uses
                && pattern.success_rate() >= self.config.boost_threshold
            {
                let mut boosted = pattern.clone();
                boosted.weight = (boosted.weight * self.config.boost_multiplier).min(1.0);
                boosted.last_update = Utc::now();
                to_upsert.push(boosted);
                report.boosted.push(pattern.pattern_id.clone());
            }
        }
        if !to_upsert.is_empty() {
            self.storage.upsert_pattern_weights(&to_upsert)?;
        }

        // Importance recalibration: rescale into [0, 1] if any ran away
        let all = self.storage.get_all_pattern_weights()?;
        let max_importance = all
            .values()
            .map(|p| p.importance)
            .fold(0.0f64, f64::max);
        if max_importance > 1.0 {
            let rescaled: Vec<PatternWeight> = all
                .values()
                .map(|p| {
                    let mut p = p.clone();
                    p.importance /= max_importance;
                    p
                })
                .collect();
            self.storage.upsert_pattern_weights(&rescaled)?;
            report.importance_rescaled = true;
        }

        report.pruned.sort();
        report.boosted.sort();
        Ok(report)
    }

    fn baseline(&self) -> Result<HashMap<String, f64>> {
        Ok(self.storage.get_sona_baseline()?.unwrap_or_default())
    }

    fn weight_vector(&self) -> Result<HashMap<String, f64>> {
        Ok(self
            .storage
            .get_all_pattern_weights()?
            .into_iter()
            .map(|(id, p)| (id, p.weight))
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Entry;
    use crate::provenance::ProvenanceRecord;

    fn setup() -> (tempfile::TempDir, Arc<Storage>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("sona.db"))).unwrap());
        (dir, storage)
    }

    fn store_entries(storage: &Storage, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                let entry = Entry {
                    id: format!("entry-{i}"),
                    content: format!("content {i}"),
                    ..Default::default()
                };
                storage
                    .store_entry(&entry, &ProvenanceRecord::root(&entry.id))
                    .unwrap();
                entry.id
            })
            .collect()
    }

    fn trajectory_for(ids: &[String]) -> Trajectory {
        Trajectory::open(
            "q",
            ids.to_vec(),
            ids.iter().map(|_| 1.0).collect(),
            "hybrid",
        )
    }

    #[test]
    fn test_drift_between_identical_is_zero() {
        let mut a = HashMap::new();
        a.insert("p".to_string(), 0.5);
        assert_eq!(drift_between(&a, &a.clone()), 0.0);
        assert_eq!(drift_between(&HashMap::new(), &HashMap::new()), 0.0);
    }

    #[test]
    fn test_drift_padding_defaults_to_neutral() {
        let mut current = HashMap::new();
        current.insert("p".to_string(), 0.5);
        // Baseline missing "p" pads to 0.5 -> no drift
        assert_eq!(drift_between(&current, &HashMap::new()), 0.0);
    }

    #[test]
    fn test_feedback_moves_weight_and_counters() {
        let (_dir, storage) = setup();
        let ids = store_entries(&storage, 1);
        let sona = SonaEngine::new(storage.clone(), SonaConfig::default()).unwrap();

        let report = sona.feedback(&trajectory_for(&ids), 1.0).unwrap();
        assert!(report.success);
        assert_eq!(report.patterns_updated, 1);
        assert!(!report.rollback_performed);

        let weights = storage.get_pattern_weights(&ids).unwrap();
        let p = &weights[&ids[0]];
        // g = 0.5 * 1.0 * 0.01 with zero importance
        assert!((p.weight - 0.505).abs() < 1e-9);
        assert!(p.importance > 0.0);
        assert_eq!(p.use_count, 1);
        assert_eq!(p.success_count, 1);
    }

    #[test]
    fn test_negative_feedback_counts_no_success() {
        let (_dir, storage) = setup();
        let ids = store_entries(&storage, 1);
        let sona = SonaEngine::new(storage.clone(), SonaConfig::default()).unwrap();

        sona.feedback(&trajectory_for(&ids), 0.0).unwrap();
        let weights = storage.get_pattern_weights(&ids).unwrap();
        let p = &weights[&ids[0]];
        assert!(p.weight < 0.5);
        assert_eq!(p.use_count, 1);
        assert_eq!(p.success_count, 0);
    }

    #[test]
    fn test_weights_stay_bounded() {
        let (_dir, storage) = setup();
        let ids = store_entries(&storage, 1);
        let config = SonaConfig {
            learning_rate: 1.0,
            drift_alert: 2.0,
            drift_critical: 3.0,
            ..Default::default()
        };
        let sona = SonaEngine::new(storage.clone(), config).unwrap();

        for _ in 0..10 {
            sona.feedback(&trajectory_for(&ids), 1.0).unwrap();
        }
        let weights = storage.get_pattern_weights(&ids).unwrap();
        assert!(weights[&ids[0]].weight <= 1.0);
        assert!(weights[&ids[0]].importance >= 0.0);
    }

    #[test]
    fn test_apply_weights_resorts() {
        let (_dir, storage) = setup();
        let ids = store_entries(&storage, 2);
        let config = SonaConfig {
            learning_rate: 1.0,
            drift_alert: 2.0,
            drift_critical: 3.0,
            ..Default::default()
        };
        let sona = SonaEngine::new(storage.clone(), config).unwrap();

        // Push entry 1's weight down hard
        let down = Trajectory::open("q", vec![ids[1].clone()], vec![1.0], "hybrid");
        sona.feedback(&down, 0.0).unwrap();

        let scored = vec![(ids[0].clone(), 0.80), (ids[1].clone(), 0.82)];
        let adjusted = sona.apply_weights(&scored).unwrap();
        // Despite the higher raw score, the demoted pattern sinks
        assert_eq!(adjusted[0].0, ids[0]);
    }

    #[test]
    fn test_alert_writes_checkpoint_and_critical_rolls_back() {
        let (_dir, storage) = setup();
        let ids = store_entries(&storage, 5);
        let config = SonaConfig {
            learning_rate: 0.1,
            ..Default::default()
        };
        let sona = SonaEngine::new(storage.clone(), config.clone()).unwrap();

        // Anchor one pattern high so downward movement bends the vector
        let up = trajectory_for(&ids[0..1]);
        sona.feedback(&up, 1.0).unwrap();
        sona.feedback(&up, 1.0).unwrap();

        let down = trajectory_for(&ids[1..5]);
        let mut saw_alert = false;
        let mut saw_rollback = false;
        for _ in 0..14 {
            let report = sona.feedback(&down, 0.0).unwrap();
            if report.checkpoint_written {
                saw_alert = true;
            }
            if report.rollback_performed {
                saw_rollback = true;
                // Never left in critical state
                assert!(report.drift < config.drift_critical);
                assert_ne!(report.drift_status, DriftStatus::Critical);
                break;
            }
        }
        assert!(saw_alert, "alert checkpoint never written");
        assert!(saw_rollback, "critical rollback never performed");
        assert!(storage.get_latest_checkpoint().unwrap().is_some());
    }

    #[test]
    fn test_maintenance_prune_and_boost() {
        let (_dir, storage) = setup();
        store_entries(&storage, 2);
        let sona = SonaEngine::new(storage.clone(), SonaConfig::default()).unwrap();

        let loser = PatternWeight {
            pattern_id: "entry-0".to_string(),
            weight: 0.4,
            importance: 0.1,
            use_count: 150,
            success_count: 30,
            last_update: Utc::now(),
        };
        let winner = PatternWeight {
            pattern_id: "entry-1".to_string(),
            weight: 0.6,
            importance: 0.1,
            use_count: 10,
            success_count: 9,
            last_update: Utc::now(),
        };
        storage
            .upsert_pattern_weights(&[loser, winner])
            .unwrap();

        let report = sona.maintenance().unwrap();
        assert_eq!(report.pruned, vec!["entry-0".to_string()]);
        assert_eq!(report.boosted, vec!["entry-1".to_string()]);

        let remaining = storage.get_all_pattern_weights().unwrap();
        assert!(!remaining.contains_key("entry-0"));
        assert!((remaining["entry-1"].weight - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_importance_recalibration() {
        let (_dir, storage) = setup();
        store_entries(&storage, 1);
        let sona = SonaEngine::new(storage.clone(), SonaConfig::default()).unwrap();

        let runaway = PatternWeight {
            pattern_id: "entry-0".to_string(),
            weight: 0.5,
            importance: 4.0,
            use_count: 1,
            success_count: 1,
            last_update: Utc::now(),
        };
        storage.upsert_pattern_weights(&[runaway]).unwrap();

        let report = sona.maintenance().unwrap();
        assert!(report.importance_rescaled);
        let all = storage.get_all_pattern_weights().unwrap();
        assert!((all["entry-0"].importance - 1.0).abs() < 1e-9);
    }
}
