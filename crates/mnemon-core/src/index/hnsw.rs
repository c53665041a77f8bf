//! Hierarchical navigable small-world graph
//!
//! Native HNSW over unit vectors with cosine distance (1 - dot). Levels are
//! sampled with probability 1/e per layer; neighbour lists are pruned with
//! the diversity heuristic (closest first, farther candidates only when not
//! dominated by an already-kept neighbour).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::IndexError;

// ============================================================================
// SCORED LABEL
// ============================================================================

/// A (distance, label) pair with a total order for heap use
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredLabel {
    dist: f32,
    label: u64,
}

impl Eq for ScoredLabel {}

impl Ord for ScoredLabel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for ScoredLabel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// GRAPH NODE
// ============================================================================

/// One vector plus its per-layer neighbour lists
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphNode {
    vector: Vec<f32>,
    /// `neighbors[layer]` holds the labels linked at that layer;
    /// `neighbors.len() - 1` is the node's top layer
    neighbors: Vec<Vec<u64>>,
}

impl GraphNode {
    fn top_layer(&self) -> usize {
        self.neighbors.len().saturating_sub(1)
    }
}

// ============================================================================
// HNSW GRAPH
// ============================================================================

/// The navigable small-world graph itself
///
/// Labels are opaque `u64`s assigned by the caller (the storage layer maps
/// entry ids to labels). All vectors must share the graph's dimensionality
/// and be unit length; distance is `1 - dot`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    dimensions: usize,
    m: usize,
    m0: usize,
    ef_construction: usize,
    /// 1 / ln(M), the level-sampling multiplier
    level_mult: f64,
    nodes: HashMap<u64, GraphNode>,
    entry_point: Option<u64>,
}

impl HnswGraph {
    /// Create an empty graph
    pub fn new(dimensions: usize, m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            dimensions,
            m,
            m0: m * 2,
            ef_construction: ef_construction.max(m),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: HashMap::new(),
            entry_point: None,
        }
    }

    /// Number of vectors in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph holds no vectors
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Graph dimensionality
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// True if the label is present
    pub fn contains(&self, label: u64) -> bool {
        self.nodes.contains_key(&label)
    }

    /// All labels currently in the graph
    pub fn labels(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes.keys().copied()
    }

    /// The stored vector for a label, if present
    pub fn vector(&self, label: u64) -> Option<&[f32]> {
        self.nodes.get(&label).map(|n| n.vector.as_slice())
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 { self.m0 } else { self.m }
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        1.0 - dot
    }

    fn distance_to(&self, query: &[f32], label: u64) -> f32 {
        match self.nodes.get(&label) {
            Some(node) => self.distance(query, &node.vector),
            None => f32::INFINITY,
        }
    }

    /// Sample a top layer: floor(-ln(U) / ln(M))
    fn random_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0);
        ((-u.ln()) * self.level_mult).floor() as usize
    }

    // ------------------------------------------------------------------------
    // SEARCH PRIMITIVES
    // ------------------------------------------------------------------------

    /// Greedy ef=1 descent within one layer
    fn greedy_descend(&self, query: &[f32], mut ep: u64, layer: usize) -> u64 {
        let mut best = self.distance_to(query, ep);
        loop {
            let mut improved = false;
            if let Some(node) = self.nodes.get(&ep) {
                if let Some(links) = node.neighbors.get(layer) {
                    for &n in links {
                        let d = self.distance_to(query, n);
                        if d < best {
                            best = d;
                            ep = n;
                            improved = true;
                        }
                    }
                }
            }
            if !improved {
                return ep;
            }
        }
    }

    /// Beam search within one layer, returning up to `ef` closest labels
    /// sorted by ascending distance
    fn search_layer(&self, query: &[f32], entry: u64, ef: usize, layer: usize) -> Vec<ScoredLabel> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<ScoredLabel>> = BinaryHeap::new();
        let mut results: BinaryHeap<ScoredLabel> = BinaryHeap::new();

        let d = self.distance_to(query, entry);
        visited.insert(entry);
        candidates.push(Reverse(ScoredLabel { dist: d, label: entry }));
        results.push(ScoredLabel { dist: d, label: entry });

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
            if results.len() >= ef && current.dist > worst {
                break;
            }

            let links = match self.nodes.get(&current.label) {
                Some(node) => node.neighbors.get(layer).cloned().unwrap_or_default(),
                None => continue,
            };

            for n in links {
                if !visited.insert(n) {
                    continue;
                }
                let dn = self.distance_to(query, n);
                let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || dn < worst {
                    candidates.push(Reverse(ScoredLabel { dist: dn, label: n }));
                    results.push(ScoredLabel { dist: dn, label: n });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort();
        out
    }

    /// Diversity-heuristic neighbour selection
    ///
    /// Candidates must be sorted by ascending distance to the base vector
    /// (encoded in `dist`). A farther candidate is kept only if no
    /// already-kept neighbour dominates it (is closer to the candidate than
    /// the candidate is to the base); discarded candidates backfill unused
    /// slots.
    fn select_neighbors(&self, candidates: &[ScoredLabel], m: usize) -> Vec<u64> {
        let mut selected: Vec<ScoredLabel> = Vec::with_capacity(m);
        let mut discarded: Vec<ScoredLabel> = Vec::new();

        for c in candidates {
            if selected.len() >= m {
                break;
            }
            let c_vec = match self.nodes.get(&c.label) {
                Some(node) => &node.vector,
                None => continue,
            };
            let dominated = selected.iter().any(|s| {
                self.nodes
                    .get(&s.label)
                    .map(|sn| self.distance(c_vec, &sn.vector) < c.dist)
                    .unwrap_or(false)
            });
            if dominated {
                discarded.push(*c);
            } else {
                selected.push(*c);
            }
        }

        for d in discarded {
            if selected.len() >= m {
                break;
            }
            selected.push(d);
        }

        selected.into_iter().map(|s| s.label).collect()
    }

    /// Re-prune an overflowing neighbour list in place
    fn shrink_links(&mut self, label: u64, layer: usize) {
        let (base_vec, links) = match self.nodes.get(&label) {
            Some(node) => match node.neighbors.get(layer) {
                Some(links) if links.len() > self.max_links(layer) => {
                    (node.vector.clone(), links.clone())
                }
                _ => return,
            },
            None => return,
        };

        let mut scored: Vec<ScoredLabel> = links
            .iter()
            .map(|&n| ScoredLabel {
                dist: self.distance_to(&base_vec, n),
                label: n,
            })
            .collect();
        scored.sort();

        let kept = self.select_neighbors(&scored, self.max_links(layer));
        if let Some(node) = self.nodes.get_mut(&label) {
            if let Some(slot) = node.neighbors.get_mut(layer) {
                *slot = kept;
            }
        }
    }

    // ------------------------------------------------------------------------
    // MUTATION
    // ------------------------------------------------------------------------

    /// Insert a vector under a fresh label
    ///
    /// The caller is responsible for dimension and unit-norm validation
    /// (see `VectorIndex::add`); duplicate labels are rejected here.
    pub fn insert(&mut self, label: u64, vector: Vec<f32>) -> Result<(), IndexError> {
        if self.nodes.contains_key(&label) {
            return Err(IndexError::DuplicateLabel(label));
        }

        let level = self.random_level();
        let node = GraphNode {
            vector,
            neighbors: vec![Vec::new(); level + 1],
        };

        let Some(mut ep) = self.entry_point else {
            self.nodes.insert(label, node);
            self.entry_point = Some(label);
            return Ok(());
        };

        let top = self.nodes.get(&ep).map(|n| n.top_layer()).unwrap_or(0);
        let query = node.vector.clone();
        self.nodes.insert(label, node);

        // Greedy descent through layers above the node's level
        let mut layer = top;
        while layer > level {
            ep = self.greedy_descend(&query, ep, layer);
            layer -= 1;
        }

        // Link layer by layer from min(level, top) down to 0
        let mut layer = level.min(top);
        loop {
            let candidates = self.search_layer(&query, ep, self.ef_construction, layer);
            let filtered: Vec<ScoredLabel> =
                candidates.iter().copied().filter(|c| c.label != label).collect();
            let selected = self.select_neighbors(&filtered, self.max_links(layer));

            if let Some(node) = self.nodes.get_mut(&label) {
                if let Some(slot) = node.neighbors.get_mut(layer) {
                    *slot = selected.clone();
                }
            }
            for n in &selected {
                if let Some(peer) = self.nodes.get_mut(n) {
                    if let Some(links) = peer.neighbors.get_mut(layer) {
                        if !links.contains(&label) {
                            links.push(label);
                        }
                    }
                }
                self.shrink_links(*n, layer);
            }

            ep = filtered.first().map(|c| c.label).unwrap_or(ep);
            if layer == 0 {
                break;
            }
            layer -= 1;
        }

        // A node sampled above the current top becomes the new entry point
        if level > top {
            self.entry_point = Some(label);
        }

        Ok(())
    }

    /// Remove a label, detaching every back-reference
    pub fn remove(&mut self, label: u64) -> Result<(), IndexError> {
        let removed = self.nodes.remove(&label).ok_or(IndexError::NotFound(label))?;

        // Neighbour-list shrinking leaves one-way links behind, so every
        // node's lists must be scanned for back-references
        for node in self.nodes.values_mut() {
            for links in node.neighbors.iter_mut() {
                links.retain(|&n| n != label);
            }
        }

        // Reconnect the removed node's former neighbours among themselves so
        // local connectivity survives the detach
        for (layer, former) in removed.neighbors.iter().enumerate() {
            for &a in former {
                let Some(a_vec) = self.nodes.get(&a).map(|n| n.vector.clone()) else {
                    continue;
                };
                let mut scored: Vec<ScoredLabel> = former
                    .iter()
                    .filter(|&&b| b != a && self.nodes.contains_key(&b))
                    .map(|&b| ScoredLabel {
                        dist: self.distance_to(&a_vec, b),
                        label: b,
                    })
                    .collect();
                scored.sort();
                for candidate in scored {
                    let full = self
                        .nodes
                        .get(&a)
                        .and_then(|n| n.neighbors.get(layer))
                        .map(|links| links.len() >= self.max_links(layer))
                        .unwrap_or(true);
                    if full {
                        break;
                    }
                    if let Some(node) = self.nodes.get_mut(&a) {
                        if let Some(links) = node.neighbors.get_mut(layer) {
                            if !links.contains(&candidate.label) {
                                links.push(candidate.label);
                            }
                        }
                    }
                    if let Some(peer) = self.nodes.get_mut(&candidate.label) {
                        if let Some(links) = peer.neighbors.get_mut(layer) {
                            if !links.contains(&a) {
                                links.push(a);
                            }
                        }
                    }
                    self.shrink_links(candidate.label, layer);
                }
            }
        }

        if self.entry_point == Some(label) {
            self.entry_point = self
                .nodes
                .iter()
                .max_by_key(|(id, node)| (node.top_layer(), *id))
                .map(|(id, _)| *id);
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // QUERY
    // ------------------------------------------------------------------------

    /// k-nearest search with a beam of `ef_search`
    ///
    /// Returns (label, score) pairs, score = 1 - distance clamped to [0, 1],
    /// best first.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(u64, f32)> {
        let Some(mut ep) = self.entry_point else {
            return vec![];
        };
        if k == 0 {
            return vec![];
        }

        let top = self.nodes.get(&ep).map(|n| n.top_layer()).unwrap_or(0);
        for layer in (1..=top).rev() {
            ep = self.greedy_descend(query, ep, layer);
        }

        let ef = ef_search.max(k);
        let found = self.search_layer(query, ep, ef, 0);
        found
            .into_iter()
            .take(k)
            .map(|s| (s.label, (1.0 - s.dist).clamp(0.0, 1.0)))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_unit(rng: &mut StdRng, dims: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    #[test]
    fn test_insert_and_exact_hit() {
        let mut graph = HnswGraph::new(4, 8, 50);
        graph.insert(1, vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        graph.insert(2, vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        graph.insert(3, vec![0.0, 0.0, 1.0, 0.0]).unwrap();

        let results = graph.search(&[1.0, 0.0, 0.0, 0.0], 2, 20);
        assert_eq!(results[0].0, 1);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut graph = HnswGraph::new(2, 8, 50);
        graph.insert(7, vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            graph.insert(7, vec![0.0, 1.0]),
            Err(IndexError::DuplicateLabel(7))
        ));
    }

    #[test]
    fn test_remove_detaches() {
        let mut graph = HnswGraph::new(4, 8, 50);
        for (label, v) in [
            (1u64, vec![1.0, 0.0, 0.0, 0.0]),
            (2, vec![0.0, 1.0, 0.0, 0.0]),
            (3, vec![0.0, 0.0, 1.0, 0.0]),
            (4, vec![0.0, 0.0, 0.0, 1.0]),
        ] {
            graph.insert(label, v).unwrap();
        }

        graph.remove(2).unwrap();
        assert!(!graph.contains(2));
        assert_eq!(graph.len(), 3);

        let results = graph.search(&[0.0, 1.0, 0.0, 0.0], 4, 20);
        assert!(results.iter().all(|(label, _)| *label != 2));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_remove_entry_point_keeps_graph_searchable() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut graph = HnswGraph::new(8, 8, 60);
        let vectors: Vec<Vec<f32>> = (0..50).map(|_| random_unit(&mut rng, 8)).collect();
        for (i, v) in vectors.iter().enumerate() {
            graph.insert(i as u64, v.clone()).unwrap();
        }

        // Remove half the nodes, entry point included at some point
        for label in 0..25u64 {
            graph.remove(label).unwrap();
        }

        let results = graph.search(&vectors[30], 5, 40);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 30);
    }

    #[test]
    fn test_recall_against_exhaustive() {
        let mut rng = StdRng::seed_from_u64(42);
        let dims = 32;
        let n = 1000;
        let vectors: Vec<Vec<f32>> = (0..n).map(|_| random_unit(&mut rng, dims)).collect();

        let mut graph = HnswGraph::new(dims, 16, 200);
        for (i, v) in vectors.iter().enumerate() {
            graph.insert(i as u64, v.clone()).unwrap();
        }

        let mut total_hits = 0usize;
        let queries = 20;
        for _ in 0..queries {
            let query = random_unit(&mut rng, dims);

            let mut exact: Vec<(u64, f32)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let dot: f32 = query.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
                    (i as u64, 1.0 - dot)
                })
                .collect();
            exact.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth: HashSet<u64> = exact.iter().take(10).map(|(l, _)| *l).collect();

            let found = graph.search(&query, 10, 100);
            total_hits += found.iter().filter(|(l, _)| truth.contains(l)).count();
        }

        let recall = total_hits as f64 / (queries * 10) as f64;
        assert!(recall >= 0.7, "recall@10 was {recall}");
    }
}
