//! Depth-first traversal over the causal mirror
//!
//! Paths accumulate a multiplicative total strength and the sequence of edge
//! types crossed. Cycles are broken by refusing to revisit an entry already
//! on the current path; expired edges are never followed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CausalGraph, Hyperedge, RelationType};

/// Hard cap on collected paths before ranking
const MAX_COLLECTED_PATHS: usize = 10_000;

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Direction a traversal expands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    /// Follow edges source -> target
    #[default]
    Forward,
    /// Follow edges target -> source
    Backward,
    /// Expand both ways at every step
    Both,
}

/// A traversal request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalQuery {
    /// Entry ids to start from
    pub start_ids: Vec<String>,
    /// Expansion direction
    #[serde(default)]
    pub direction: TraversalDirection,
    /// Maximum number of edges on a path
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Edges below this strength are not followed
    #[serde(default)]
    pub min_strength: f64,
    /// Restrict to these relation types, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_types: Option<Vec<RelationType>>,
    /// Maximum paths returned after ranking
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
}

fn default_max_depth() -> usize {
    5
}

fn default_max_paths() -> usize {
    100
}

impl TraversalQuery {
    /// Forward traversal from a single entry with defaults
    pub fn from_entry(entry_id: impl Into<String>) -> Self {
        Self {
            start_ids: vec![entry_id.into()],
            direction: TraversalDirection::Forward,
            max_depth: default_max_depth(),
            min_strength: 0.0,
            relation_types: None,
            max_paths: default_max_paths(),
        }
    }

    fn admits(&self, edge: &Hyperedge) -> bool {
        if edge.strength < self.min_strength {
            return false;
        }
        match &self.relation_types {
            Some(types) => types.contains(&edge.relation),
            None => true,
        }
    }
}

/// One discovered path through the hypergraph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalPath {
    /// Entry ids in visit order, starting node first
    pub nodes: Vec<String>,
    /// Relation type of each edge crossed
    pub edge_types: Vec<RelationType>,
    /// Product of the crossed edges' strengths
    pub total_strength: f64,
}

impl CausalPath {
    /// Number of edges on the path
    pub fn len(&self) -> usize {
        self.edge_types.len()
    }

    /// True for a zero-edge path (never produced by traversal)
    pub fn is_empty(&self) -> bool {
        self.edge_types.is_empty()
    }

    /// Final entry on the path
    pub fn end(&self) -> Option<&str> {
        self.nodes.last().map(|s| s.as_str())
    }
}

// ============================================================================
// TRAVERSAL
// ============================================================================

impl CausalGraph {
    /// Depth-first traversal honouring the query's filters
    ///
    /// Every partial path of at least one edge is reported. Results are
    /// ranked by descending total strength, then ascending length, and
    /// truncated to `max_paths`.
    pub fn traverse(&self, query: &TraversalQuery, now: DateTime<Utc>) -> Vec<CausalPath> {
        let mut paths: Vec<CausalPath> = Vec::new();

        for start in &query.start_ids {
            let mut nodes = vec![start.clone()];
            let mut types: Vec<RelationType> = Vec::new();
            self.dfs(query, now, &mut nodes, &mut types, 1.0, &mut paths);
        }

        paths.sort_by(|a, b| {
            b.total_strength
                .partial_cmp(&a.total_strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.nodes.cmp(&b.nodes))
        });
        paths.truncate(query.max_paths);
        paths
    }

    /// Paths from `source` ending at `target` within `max_depth` edges
    pub fn find_paths(
        &self,
        source: &str,
        target: &str,
        max_depth: usize,
        now: DateTime<Utc>,
    ) -> Vec<CausalPath> {
        let query = TraversalQuery {
            start_ids: vec![source.to_string()],
            max_depth,
            ..TraversalQuery::from_entry(source)
        };
        let mut paths = self.traverse(&query, now);
        paths.retain(|p| p.end() == Some(target));
        paths
    }

    fn dfs(
        &self,
        query: &TraversalQuery,
        now: DateTime<Utc>,
        nodes: &mut Vec<String>,
        types: &mut Vec<RelationType>,
        strength: f64,
        paths: &mut Vec<CausalPath>,
    ) {
        if types.len() >= query.max_depth || paths.len() >= MAX_COLLECTED_PATHS {
            return;
        }
        let Some(current) = nodes.last().cloned() else {
            return;
        };

        let mut steps: Vec<(&Hyperedge, &str)> = Vec::new();
        if matches!(
            query.direction,
            TraversalDirection::Forward | TraversalDirection::Both
        ) {
            for edge in self.edges_from(&current) {
                for target in &edge.target_ids {
                    steps.push((edge, target));
                }
            }
        }
        if matches!(
            query.direction,
            TraversalDirection::Backward | TraversalDirection::Both
        ) {
            for edge in self.edges_into(&current) {
                for source in &edge.source_ids {
                    steps.push((edge, source));
                }
            }
        }

        for (edge, next) in steps {
            if edge.is_expired_at(now) || !query.admits(edge) {
                continue;
            }
            // Cycle break: an entry may appear at most once per path
            if nodes.iter().any(|n| n == next) {
                continue;
            }

            nodes.push(next.to_string());
            types.push(edge.relation);
            let accumulated = strength * edge.strength;

            paths.push(CausalPath {
                nodes: nodes.clone(),
                edge_types: types.clone(),
                total_strength: accumulated,
            });

            self.dfs(query, now, nodes, types, accumulated, paths);

            nodes.pop();
            types.pop();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
