//! Trust graph engine
//!
//! Builds an in-memory directed weighted graph from evaluations and answers
//! direct and transitive trust queries. The transitive search is a bounded
//! breadth-first exploration with per-hop exponential decay; frontier entries
//! carry owned path vectors so cycle detection stays local. Secondary paths
//! are geometrically dampened so a flood of weak corroborations cannot
//! outweigh the best evidence.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::trust::evaluation::Evaluation;

pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_DECAY_FACTOR: f64 = 0.8;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.1;

/// Hard cap on explored frontier entries per query.
pub const MAX_PATHS_EXPLORED: usize = 5_000;

/// Maximum number of paths returned to the caller.
const MAX_RETURNED_PATHS: usize = 10;

/// Secondary paths folded into the aggregate score.
const MAX_SECONDARY_PATHS: usize = 4;

/// One edge of the trust graph, derived from an evaluation.
#[derive(Debug, Clone)]
struct TrustEdge {
    to: String,
    realm_id: String,
    /// Normalized score, `evaluation.score / 100`.
    s: f64,
    /// Evaluator-declared weight.
    weight: f64,
}

/// A transitive trust query.
#[derive(Debug, Clone)]
pub struct TransitiveTrustQuery {
    pub from: String,
    pub to: String,
    pub domain: String,
    pub realm_id: Option<String>,
    pub max_depth: u32,
    pub decay_factor: f64,
    pub min_confidence: f64,
}

impl TransitiveTrustQuery {
    pub fn new(from: &str, to: &str, domain: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            domain: domain.to_string(),
            realm_id: None,
            max_depth: DEFAULT_MAX_DEPTH,
            decay_factor: DEFAULT_DECAY_FACTOR,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// A completed source-to-target path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPath {
    pub path: Vec<String>,
    pub scores: Vec<f64>,
    pub final_trust: f64,
    pub decay_applied: f64,
}

/// Search bookkeeping returned with every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub paths_explored: usize,
    pub max_depth: u32,
    pub decay_factor: f64,
    pub direct: bool,
}

/// Result of a transitive trust query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitiveTrustResult {
    pub score: f64,
    pub confidence: f64,
    pub paths: Vec<TrustPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_path: Option<TrustPath>,
    pub metadata: SearchMetadata,
}

/// BFS frontier entry; owns its path for cheap cycle checks.
struct Frontier {
    node: String,
    path: Vec<String>,
    scores: Vec<f64>,
    trust: f64,
    depth: u32,
}

/// In-memory trust graph over a bounded evaluation set.
pub struct TrustGraph {
    /// `(fromEntity, domain)` → outgoing edges.
    adjacency: HashMap<(String, String), Vec<TrustEdge>>,
}

impl TrustGraph {
    /// Build the graph from an evaluation set, skipping expired edges.
    pub fn from_evaluations(evaluations: &[Evaluation]) -> Self {
        let now = chrono::Utc::now();
        let mut adjacency: HashMap<(String, String), Vec<TrustEdge>> = HashMap::new();
        for eval in evaluations {
            if let Some(expires_at) = eval.expires_at {
                if expires_at < now {
                    continue;
                }
            }
            adjacency
                .entry((eval.from_entity.clone(), eval.domain.clone()))
                .or_default()
                .push(TrustEdge {
                    to: eval.to_entity.clone(),
                    realm_id: eval.realm_id.clone(),
                    s: f64::from(eval.score) / 100.0,
                    weight: eval.weight,
                });
        }
        Self { adjacency }
    }

    fn edges(&self, from: &str, domain: &str, realm: Option<&str>) -> Vec<&TrustEdge> {
        self.adjacency
            .get(&(from.to_string(), domain.to_string()))
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| realm.map(|r| e.realm_id == r).unwrap_or(true))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct trust: the weight-weighted mean of matching edge scores, or
    /// `None` when no edge exists.
    pub fn direct_trust(&self, from: &str, to: &str, domain: &str) -> Option<f64> {
        self.direct_trust_in(from, to, domain, None)
    }

    fn direct_trust_in(
        &self,
        from: &str,
        to: &str,
        domain: &str,
        realm: Option<&str>,
    ) -> Option<f64> {
        let matching: Vec<&TrustEdge> = self
            .edges(from, domain, realm)
            .into_iter()
            .filter(|e| e.to == to)
            .collect();
        if matching.is_empty() {
            return None;
        }
        let total_weight: f64 = matching.iter().map(|e| e.weight).sum();
        if total_weight <= 0.0 {
            return None;
        }
        Some(matching.iter().map(|e| e.s * e.weight).sum::<f64>() / total_weight)
    }

    /// Transitive trust via decayed bounded-depth multi-path search.
    pub fn transitive_trust(&self, query: &TransitiveTrustQuery) -> TransitiveTrustResult {
        let realm = query.realm_id.as_deref();
        let decay = query.decay_factor;

        if let Some(direct) = self.direct_trust_in(&query.from, &query.to, &query.domain, realm) {
            let path = TrustPath {
                path: vec![query.from.clone(), query.to.clone()],
                scores: vec![direct],
                final_trust: direct,
                decay_applied: 0.0,
            };
            return TransitiveTrustResult {
                score: direct,
                confidence: 1.0,
                paths: vec![path.clone()],
                best_path: Some(path),
                metadata: SearchMetadata {
                    paths_explored: 1,
                    max_depth: query.max_depth,
                    decay_factor: decay,
                    direct: true,
                },
            };
        }

        let mut queue: VecDeque<Frontier> = VecDeque::new();
        let mut visited: HashSet<(String, u32)> = HashSet::new();
        let mut completed: Vec<TrustPath> = Vec::new();
        let mut explored = 0usize;

        for edge in self.edges(&query.from, &query.domain, realm) {
            if edge.to == query.from {
                continue;
            }
            queue.push_back(Frontier {
                node: edge.to.clone(),
                path: vec![query.from.clone(), edge.to.clone()],
                scores: vec![edge.s],
                trust: edge.s,
                depth: 1,
            });
        }

        while let Some(entry) = queue.pop_front() {
            explored += 1;
            if explored >= MAX_PATHS_EXPLORED {
                break;
            }

            if entry.node == query.to {
                let depth_decay = decay.powi(entry.depth as i32 - 1);
                completed.push(TrustPath {
                    path: entry.path,
                    scores: entry.scores,
                    final_trust: entry.trust * depth_decay,
                    decay_applied: 1.0 - depth_decay,
                });
                continue;
            }
            if entry.depth >= query.max_depth {
                continue;
            }
            // Prune low-trust branches; the exponent here intentionally uses
            // `depth`, not `depth - 1`.
            if entry.trust * decay.powi(entry.depth as i32) < query.min_confidence {
                continue;
            }
            if !visited.insert((entry.node.clone(), entry.depth)) {
                continue;
            }

            for edge in self.edges(&entry.node, &query.domain, realm) {
                if entry.path.iter().any(|n| n == &edge.to) {
                    continue;
                }
                let mut path = entry.path.clone();
                path.push(edge.to.clone());
                let mut scores = entry.scores.clone();
                scores.push(edge.s);
                queue.push_back(Frontier {
                    node: edge.to.clone(),
                    path,
                    scores,
                    trust: entry.trust * edge.s * decay,
                    depth: entry.depth + 1,
                });
            }
        }

        if completed.is_empty() {
            return TransitiveTrustResult {
                score: 0.0,
                confidence: 0.0,
                paths: Vec::new(),
                best_path: None,
                metadata: SearchMetadata {
                    paths_explored: explored,
                    max_depth: query.max_depth,
                    decay_factor: decay,
                    direct: false,
                },
            };
        }

        // Best trust first; shorter paths break ties.
        completed.sort_by(|a, b| {
            b.final_trust
                .partial_cmp(&a.final_trust)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.path.len().cmp(&b.path.len()))
        });

        let mut score = completed[0].final_trust;
        for (i, path) in completed
            .iter()
            .enumerate()
            .skip(1)
            .take(MAX_SECONDARY_PATHS)
        {
            score += path.final_trust * 0.5f64.powi(i as i32);
        }
        let score = score.clamp(0.0, 1.0);
        let confidence = (completed.len() as f64 / 3.0).min(1.0);

        let best_path = Some(completed[0].clone());
        completed.truncate(MAX_RETURNED_PATHS);

        TransitiveTrustResult {
            score,
            confidence,
            paths: completed,
            best_path,
            metadata: SearchMetadata {
                paths_explored: explored,
                max_depth: query.max_depth,
                decay_factor: decay,
                direct: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn edge(from: &str, to: &str, domain: &str, score: u8, weight: f64) -> Evaluation {
        Evaluation {
            id: format!("cid_{}_{}_{}", from, to, domain),
            from_entity: from.to_string(),
            to_entity: to.to_string(),
            realm_id: "realm-1".to_string(),
            domain: domain.to_string(),
            score,
            weight,
            rationale: None,
            supporting_attestations: Vec::new(),
            signature: String::new(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_direct_trust_single_edge() {
        let graph = TrustGraph::from_evaluations(&[edge("A", "B", "d", 80, 1.0)]);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "B", "d"));

        assert!((result.score - 0.8).abs() < 1e-9);
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].path, vec!["A", "B"]);
        assert_eq!(result.paths[0].scores, vec![0.8]);
        assert!((result.paths[0].final_trust - 0.8).abs() < 1e-9);
        assert!(result.paths[0].decay_applied.abs() < 1e-9);
        assert_eq!(result.metadata.paths_explored, 1);
    }

    #[test]
    fn test_direct_trust_weighted_mean() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 100, 1.0),
            edge("A", "B", "d", 50, 0.5),
        ]);
        // (1.0·1.0 + 0.5·0.5) / 1.5
        let direct = graph.direct_trust("A", "B", "d").unwrap();
        assert!((direct - (1.25 / 1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_two_hop_decay() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 100, 1.0),
            edge("B", "C", "d", 100, 1.0),
        ]);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "C", "d"));

        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].path, vec!["A", "B", "C"]);
        assert!((result.paths[0].final_trust - 0.64).abs() < 1e-9);
        assert!((result.score - 0.64).abs() < 1e-9);
        assert!((result.confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cycle_is_never_reentered() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 50, 1.0),
            edge("B", "A", "d", 50, 1.0),
        ]);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "A", "d"));

        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.paths.is_empty());
        assert!(result.best_path.is_none());
    }

    #[test]
    fn test_domain_isolation() {
        let graph = TrustGraph::from_evaluations(&[edge("A", "B", "other", 90, 1.0)]);
        assert!(graph.direct_trust("A", "B", "d").is_none());
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "B", "d"));
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_multi_path_aggregation_dampens_secondary_paths() {
        // Two disjoint 2-hop routes from A to D.
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 100, 1.0),
            edge("B", "D", "d", 100, 1.0),
            edge("A", "C", "d", 50, 1.0),
            edge("C", "D", "d", 50, 1.0),
        ]);
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "D", "d"));

        assert_eq!(result.paths.len(), 2);
        let best = 0.64;
        let secondary = 0.25 * 0.8 * 0.8; // 0.16
        assert!((result.paths[0].final_trust - best).abs() < 1e-9);
        assert!((result.score - (best + secondary * 0.5)).abs() < 1e-9);
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_depth_bounds_search() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 100, 1.0),
            edge("B", "C", "d", 100, 1.0),
            edge("C", "D", "d", 100, 1.0),
        ]);
        let mut query = TransitiveTrustQuery::new("A", "D", "d");
        query.max_depth = 2;
        let result = graph.transitive_trust(&query);
        assert!(result.paths.is_empty());

        query.max_depth = 3;
        let result = graph.transitive_trust(&query);
        assert_eq!(result.paths.len(), 1);
    }

    #[test]
    fn test_min_confidence_prunes_weak_branches() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 20, 1.0),
            edge("B", "C", "d", 20, 1.0),
            edge("C", "D", "d", 20, 1.0),
        ]);
        // Seed trust 0.2; 0.2·0.8 = 0.16 survives a 0.1 floor but the next
        // hop's 0.032 does not.
        let result = graph.transitive_trust(&TransitiveTrustQuery::new("A", "D", "d"));
        assert!(result.paths.is_empty());
    }

    #[test]
    fn test_exploration_stays_bounded_on_dense_graphs() {
        // Complete-ish digraph over 30 nodes in one domain.
        let nodes: Vec<String> = (0..30).map(|i| format!("n{}", i)).collect();
        let mut evals = Vec::new();
        for a in &nodes {
            for b in &nodes {
                if a != b {
                    evals.push(edge(a, b, "d", 90, 1.0));
                }
            }
        }
        let graph = TrustGraph::from_evaluations(&evals);
        let result =
            graph.transitive_trust(&TransitiveTrustQuery::new("n0", "missing-target", "d"));
        assert!(result.metadata.paths_explored <= MAX_PATHS_EXPLORED);
    }

    #[test]
    fn test_repeated_queries_are_idempotent() {
        let graph = TrustGraph::from_evaluations(&[
            edge("A", "B", "d", 100, 1.0),
            edge("B", "C", "d", 75, 1.0),
        ]);
        let query = TransitiveTrustQuery::new("A", "C", "d");
        let first = graph.transitive_trust(&query);
        let second = graph.transitive_trust(&query);
        assert_eq!(first.score, second.score);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.metadata.paths_explored, second.metadata.paths_explored);
    }

    #[test]
    fn test_expired_evaluations_are_excluded() {
        let mut stale = edge("A", "B", "d", 100, 1.0);
        stale.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let graph = TrustGraph::from_evaluations(&[stale]);
        assert!(graph.direct_trust("A", "B", "d").is_none());
    }
}
