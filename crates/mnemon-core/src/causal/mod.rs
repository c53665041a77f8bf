//! Causal hypergraph
//!
//! Typed hyperedges connect a non-empty source set to a non-empty target
//! set. Persistence is authoritative; this module owns the in-memory mirror
//! rebuilt from active edges at startup. Edges are arena-owned records keyed
//! by id; nodes hold sets of edge ids, never edge objects.

mod traversal;

pub use traversal::{CausalPath, TraversalDirection, TraversalQuery};

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Causal graph error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum CausalError {
    /// A hyperedge needs at least one source and one target
    EmptyEndpoints,
    /// Strength must stay in [0, 1]
    InvalidStrength(f64),
    /// Referenced entry does not exist
    UnknownEntry(String),
    /// Edge not present in the mirror
    NotFound(String),
}

impl std::fmt::Display for CausalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CausalError::EmptyEndpoints => {
                write!(f, "Hyperedge requires at least one source and one target")
            }
            CausalError::InvalidStrength(s) => write!(f, "Strength out of range: {}", s),
            CausalError::UnknownEntry(id) => write!(f, "Referenced entry does not exist: {}", id),
            CausalError::NotFound(id) => write!(f, "Edge not found: {}", id),
        }
    }
}

impl std::error::Error for CausalError {}

// ============================================================================
// RELATION TYPES
// ============================================================================

/// Type of causal relation carried by a hyperedge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    /// Source set causes the target set
    Causes,
    /// Source set enables the target set
    Enables,
    /// Source set prevents the target set
    Prevents,
    /// Source and target sets correlate
    Correlates,
    /// Source set precedes the target set in time
    Precedes,
    /// Source set triggers the target set
    Triggers,
}

impl RelationType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Enables => "enables",
            RelationType::Prevents => "prevents",
            RelationType::Correlates => "correlates",
            RelationType::Precedes => "precedes",
            RelationType::Triggers => "triggers",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "causes" => Some(RelationType::Causes),
            "enables" => Some(RelationType::Enables),
            "prevents" => Some(RelationType::Prevents),
            "correlates" => Some(RelationType::Correlates),
            "precedes" => Some(RelationType::Precedes),
            "triggers" => Some(RelationType::Triggers),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// HYPEREDGE
// ============================================================================

/// A typed, strength-weighted hyperedge with optional TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperedge {
    /// Unique edge id (UUID v4)
    pub id: String,
    /// Relation carried by the edge
    pub relation: RelationType,
    /// Source entry ids (non-empty)
    pub source_ids: Vec<String>,
    /// Target entry ids (non-empty)
    pub target_ids: Vec<String>,
    /// Relation strength (0.0 - 1.0)
    pub strength: f64,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
    /// Time-to-live in milliseconds, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<i64>,
    /// Absolute expiry computed from the TTL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Hyperedge {
    /// Create a validated hyperedge; a TTL of `Some(ms)` sets `expires_at`
    pub fn new(
        relation: RelationType,
        source_ids: Vec<String>,
        target_ids: Vec<String>,
        strength: f64,
        ttl_ms: Option<i64>,
    ) -> Result<Self, CausalError> {
        if source_ids.is_empty() || target_ids.is_empty() {
            return Err(CausalError::EmptyEndpoints);
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(CausalError::InvalidStrength(strength));
        }
        let created_at = Utc::now();
        let expires_at = ttl_ms.map(|ms| created_at + Duration::milliseconds(ms));
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            relation,
            source_ids,
            target_ids,
            strength,
            created_at,
            ttl_ms,
            expires_at,
        })
    }

    /// True once the TTL has lapsed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }

    /// True if the edge references the entry on either side
    pub fn touches(&self, entry_id: &str) -> bool {
        self.source_ids.iter().any(|s| s == entry_id)
            || self.target_ids.iter().any(|t| t == entry_id)
    }
}

// ============================================================================
// CAUSAL GRAPH (in-memory mirror)
// ============================================================================

/// In-memory mirror of the active hyperedges
///
/// Edges live in an arena map keyed by id; the per-entry indexes hold edge
/// ids only, so there are no cyclic object references to manage.
#[derive(Debug, Default)]
pub struct CausalGraph {
    edges: HashMap<String, Hyperedge>,
    by_source: HashMap<String, HashSet<String>>,
    by_target: HashMap<String, HashSet<String>>,
}

impl CausalGraph {
    /// Create an empty mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mirror from a set of active edges
    pub fn rebuild(edges: Vec<Hyperedge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.insert(edge);
        }
        graph
    }

    /// Number of mirrored edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True when no edges are mirrored
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Get an edge by id
    pub fn get(&self, id: &str) -> Option<&Hyperedge> {
        self.edges.get(id)
    }

    /// Insert an edge into the mirror
    pub fn insert(&mut self, edge: Hyperedge) {
        for source in &edge.source_ids {
            self.by_source
                .entry(source.clone())
                .or_default()
                .insert(edge.id.clone());
        }
        for target in &edge.target_ids {
            self.by_target
                .entry(target.clone())
                .or_default()
                .insert(edge.id.clone());
        }
        self.edges.insert(edge.id.clone(), edge);
    }

    /// Remove an edge by id
    pub fn remove(&mut self, id: &str) -> Option<Hyperedge> {
        let edge = self.edges.remove(id)?;
        for source in &edge.source_ids {
            if let Some(set) = self.by_source.get_mut(source) {
                set.remove(id);
                if set.is_empty() {
                    self.by_source.remove(source);
                }
            }
        }
        for target in &edge.target_ids {
            if let Some(set) = self.by_target.get_mut(target) {
                set.remove(id);
                if set.is_empty() {
                    self.by_target.remove(target);
                }
            }
        }
        Some(edge)
    }

    /// Remove every edge touching an entry; returns the removed edge ids
    pub fn remove_entry(&mut self, entry_id: &str) -> Vec<String> {
        let mut ids: HashSet<String> = HashSet::new();
        if let Some(set) = self.by_source.get(entry_id) {
            ids.extend(set.iter().cloned());
        }
        if let Some(set) = self.by_target.get(entry_id) {
            ids.extend(set.iter().cloned());
        }
        let mut removed: Vec<String> = ids.into_iter().collect();
        removed.sort();
        for id in &removed {
            self.remove(id);
        }
        removed
    }

    /// Edge ids expired at `now`
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .edges
            .values()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// All edges leaving an entry (entry in the source set)
    pub(crate) fn edges_from(&self, entry_id: &str) -> Vec<&Hyperedge> {
        self.collect_edges(self.by_source.get(entry_id))
    }

    /// All edges arriving at an entry (entry in the target set)
    pub(crate) fn edges_into(&self, entry_id: &str) -> Vec<&Hyperedge> {
        self.collect_edges(self.by_target.get(entry_id))
    }

    fn collect_edges(&self, ids: Option<&HashSet<String>>) -> Vec<&Hyperedge> {
        let mut edges: Vec<&Hyperedge> = ids
            .map(|set| set.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default();
        // Deterministic expansion order regardless of hash state
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }
}

// ============================================================================
// TESTS
// ============================================================================
