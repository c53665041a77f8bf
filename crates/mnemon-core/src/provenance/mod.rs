//! Provenance and L-Score
//!
//! Every entry carries a lineage record; the L-Score aggregates parental
//! reliability as the geometric mean of the per-link confidence x relevance
//! factors, decayed by lineage depth. Roots score 1.0.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage::{Result, Storage};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default per-generation decay applied to the aggregated link factor
pub const DEFAULT_DECAY_BASE: f64 = 0.9;

/// Default bound on propagation depth
pub const DEFAULT_MAX_DEPTH: i64 = 64;

// ============================================================================
// PROVENANCE RECORD
// ============================================================================

/// Lineage record stored per entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    /// The entry this record belongs to
    pub entry_id: String,
    /// Ordered parent ids; `None` slots mark re-parented orphans
    pub parent_ids: Vec<Option<String>>,
    /// Confidence of the derivation link (0.0 - 1.0)
    pub confidence: f64,
    /// Relevance of the entry to its parents (0.0 - 1.0)
    pub relevance: f64,
    /// 1 + max parent depth; 0 for roots
    pub lineage_depth: i64,
    /// Aggregated reliability score (0.0 - 1.0)
    pub l_score: f64,
}

impl ProvenanceRecord {
    /// A root record (no parents, full reliability)
    pub fn root(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            parent_ids: vec![],
            confidence: 1.0,
            relevance: 1.0,
            lineage_depth: 0,
            l_score: 1.0,
        }
    }

    /// True when the record has no live parent
    pub fn is_root(&self) -> bool {
        self.parent_ids.iter().all(|p| p.is_none())
    }

    /// Live parent ids, skipping re-parented orphan slots
    pub fn live_parents(&self) -> impl Iterator<Item = &str> {
        self.parent_ids.iter().filter_map(|p| p.as_deref())
    }

    /// Per-link factor: confidence x relevance
    pub fn link_factor(&self) -> f64 {
        self.confidence * self.relevance
    }
}

// ============================================================================
// RELIABILITY TIERS
// ============================================================================

/// Coarse reliability classification of an L-Score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityTier {
    /// l_score >= 0.8
    High,
    /// l_score >= 0.5
    Medium,
    /// l_score >= 0.3
    Low,
    /// Below every threshold
    Unreliable,
}

impl ReliabilityTier {
    /// Classify an L-Score
    pub fn from_score(l_score: f64) -> Self {
        if l_score >= 0.8 {
            ReliabilityTier::High
        } else if l_score >= 0.5 {
            ReliabilityTier::Medium
        } else if l_score >= 0.3 {
            ReliabilityTier::Low
        } else {
            ReliabilityTier::Unreliable
        }
    }
}

// ============================================================================
// L-SCORE MATH
// ============================================================================

/// Aggregate an L-Score from per-link factors and a lineage depth
///
/// `l = clamp(geometric_mean(factors) * decay_base^depth, 0, 1)`;
/// an empty chain (a root) scores 1.0.
pub fn l_score_from_chain(link_factors: &[f64], depth: i64, decay_base: f64) -> f64 {
    if link_factors.is_empty() {
        return 1.0;
    }
    if link_factors.iter().any(|f| *f <= 0.0) {
        return 0.0;
    }

    // Log-space geometric mean avoids underflow on deep chains
    let log_sum: f64 = link_factors.iter().map(|f| f.ln()).sum();
    let geometric_mean = (log_sum / link_factors.len() as f64).exp();
    let decay = decay_base.powi(depth.max(0) as i32);

    (geometric_mean * decay).clamp(0.0, 1.0)
}

// ============================================================================
// PROPAGATION
// ============================================================================

/// Recompute one entry's L-Score from its stored lineage
///
/// The chain consists of the link factors of every non-root ancestor plus
/// the entry's own link; records already fetched are served from `cache`.
fn recompute_one(
    storage: &Storage,
    entry_id: &str,
    decay_base: f64,
    max_depth: i64,
    cache: &mut HashMap<String, ProvenanceRecord>,
) -> Result<Option<f64>> {
    let record = match fetch_cached(storage, entry_id, cache)? {
        Some(record) => record,
        None => return Ok(None),
    };

    if record.is_root() {
        return Ok(Some(1.0));
    }

    let ancestor_ids = storage.get_lineage_entry_ids(entry_id, max_depth)?;
    let mut factors = vec![record.link_factor()];
    for ancestor_id in &ancestor_ids {
        if let Some(ancestor) = fetch_cached(storage, ancestor_id, cache)? {
            if !ancestor.is_root() {
                factors.push(ancestor.link_factor());
            }
        }
    }

    Ok(Some(l_score_from_chain(
        &factors,
        record.lineage_depth,
        decay_base,
    )))
}

fn fetch_cached(
    storage: &Storage,
    entry_id: &str,
    cache: &mut HashMap<String, ProvenanceRecord>,
) -> Result<Option<ProvenanceRecord>> {
    if let Some(record) = cache.get(entry_id) {
        return Ok(Some(record.clone()));
    }
    match storage.get_provenance(entry_id)? {
        Some(record) => {
            cache.insert(entry_id.to_string(), record.clone());
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Recompute the target entry's L-Score and every transitive descendant's
///
/// Descendants are processed nearest-first so each recomputation sees its
/// ancestors' fresh values; idempotent by construction (inputs are the
/// stored confidences, not the previous scores). Returns the number of
/// entries updated.
pub fn propagate_l_score_update(
    storage: &Storage,
    entry_id: &str,
    decay_base: f64,
    max_depth: i64,
) -> Result<usize> {
    let mut cache: HashMap<String, ProvenanceRecord> = HashMap::new();
    let mut updated = 0usize;

    let mut targets = vec![entry_id.to_string()];
    targets.extend(storage.get_descendant_entry_ids(entry_id, max_depth)?);

    for target in targets {
        if let Some(l_score) = recompute_one(storage, &target, decay_base, max_depth, &mut cache)? {
            storage.update_l_score(&target, l_score)?;
            if let Some(record) = cache.get_mut(&target) {
                record.l_score = l_score;
            }
            updated += 1;
        }
    }

    Ok(updated)
}

// ============================================================================
// TESTS
// ============================================================================
