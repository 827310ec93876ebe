//! Measurement engine: deterministic signals over the current artifacts.
//!
//! Pure aggregation, no decision logic. Statistics split the hypothesis
//! populations — total, passed, promising (evidence-only rejections) — and
//! apply confidence/diversity math only to passed hypotheses. Temporal
//! metrics need the previous decision's snapshot; without one they stay at
//! their zero values. Recomputing on unchanged inputs returns an
//! identical value, which the snapshot round-trip tests pin down.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{DecisionThresholds, IndirectPathPolicy};
use crate::graph::SemanticGraph;
use crate::store::Hypothesis;

/// Verification-mode context computed by the decide stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VerificationOutcome {
    pub found: bool,
    pub connection_type: String,
    pub path: Vec<String>,
    pub explanation: String,
}

/// The full measurement snapshot persisted with every decision.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Measurements {
    // Population counts.
    pub total_hypothesis_count: usize,
    pub passed_hypothesis_count: usize,
    pub rejected_hypothesis_count: usize,
    pub promising_hypothesis_count: usize,
    pub filtered_to_total_ratio: f64,

    // Confidence over passed hypotheses.
    pub max_normalized_confidence: f64,
    pub mean_normalized_confidence: f64,
    pub is_dominant_clear: bool,

    // Diversity over passed hypotheses.
    pub unique_source_target_pairs: usize,
    pub unique_nodes_in_paths: usize,
    pub diversity_score: f64,

    // Graph-level signals.
    pub graph_density: f64,
    pub semantic_graph_node_count: usize,
    pub semantic_graph_edge_count: usize,

    // Indirect-path structure (over passed hypotheses).
    pub max_paths_per_pair: usize,
    pub mean_paths_per_pair: f64,
    pub dominant_pair_id: Option<(String, String)>,
    pub dominant_pair_path_ratio: f64,
    pub unique_intermediate_nodes_dominant: usize,
    pub redundancy_score: f64,
    pub mean_path_length: f64,
    pub path_length_variance: f64,
    pub confidence_variance: f64,
    pub dominant_confidence_gap: f64,
    pub pair_distribution_entropy: f64,
    pub filter_rejection_reasons: BTreeMap<String, usize>,

    // Temporal metrics (need a previous snapshot).
    pub evidence_growth_rate: f64,
    pub hypothesis_stability: f64,
    /// Composite driving STRATEGIC_DOWNLOAD_TARGETED:
    /// Δunique_nodes + Δdiversity_score + Δpassed_count.
    pub growth_score: f64,

    /// Pair set carried for the next snapshot's stability overlap.
    pub hypothesis_pairs: Vec<(String, String)>,

    // Verification mode (everything above elided when these are set).
    pub verification_complete: Option<bool>,
    pub verification_found: Option<bool>,
    pub verification_type: Option<String>,
}

impl Measurements {
    pub fn to_snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_snapshot(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_verification(&self) -> bool {
        self.verification_complete.is_some()
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn shannon_entropy(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for &count in counts {
        if count > 0 {
            let p = count as f64 / total as f64;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Hop count of a path (nodes minus one).
fn path_hops(path: &[String]) -> usize {
    path.len().saturating_sub(1)
}

/// Verification short-circuit: only the halting condition matters.
pub fn compute_verification(
    remaining_new_queries: usize,
    outcome: Option<&VerificationOutcome>,
) -> Measurements {
    Measurements {
        verification_complete: Some(remaining_new_queries == 0),
        verification_found: Some(outcome.map(|o| o.found).unwrap_or(false)),
        verification_type: outcome.map(|o| o.connection_type.clone()),
        ..Default::default()
    }
}

/// Compute the discovery-mode measurement snapshot.
pub fn compute(
    graph: &SemanticGraph,
    hypotheses: &[Hypothesis],
    thresholds: &DecisionThresholds,
    indirect: &IndirectPathPolicy,
    previous: Option<&Measurements>,
) -> Measurements {
    let mut m = Measurements::default();

    let passed: Vec<&Hypothesis> = hypotheses.iter().filter(|h| h.passed_filter).collect();
    let promising: Vec<&Hypothesis> = hypotheses.iter().filter(|h| h.is_promising()).collect();

    m.total_hypothesis_count = hypotheses.len();
    m.passed_hypothesis_count = passed.len();
    m.rejected_hypothesis_count = hypotheses.len() - passed.len();
    m.promising_hypothesis_count = promising.len();
    m.filtered_to_total_ratio = if hypotheses.is_empty() {
        0.0
    } else {
        passed.len() as f64 / hypotheses.len() as f64
    };

    // ── Confidence, over passed only ────────────────────────────────
    let norm = thresholds.confidence_normalization_factor;
    let mut normalized: Vec<f64> = passed
        .iter()
        .map(|h| (h.confidence as f64 / norm).min(1.0))
        .collect();
    normalized.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    if !normalized.is_empty() {
        m.max_normalized_confidence = normalized[0];
        m.mean_normalized_confidence = normalized.iter().sum::<f64>() / normalized.len() as f64;
        m.is_dominant_clear = if normalized.len() > 1 {
            let gap = normalized[0] - normalized[1];
            normalized[0] > 0.0 && gap > thresholds.dominant_gap_ratio * normalized[0]
        } else {
            true
        };
    }

    // ── Diversity, over passed only ─────────────────────────────────
    let pairs: HashSet<(String, String)> = passed.iter().map(|h| h.pair()).collect();
    m.unique_source_target_pairs = pairs.len();

    let mut all_nodes: HashSet<&String> = HashSet::new();
    let mut total_nodes = 0usize;
    for h in &passed {
        all_nodes.extend(h.path.iter());
        total_nodes += h.path.len();
    }
    m.unique_nodes_in_paths = all_nodes.len();
    m.diversity_score = if total_nodes > 0 {
        (all_nodes.len() as f64 / total_nodes as f64).min(1.0)
    } else {
        0.0
    };

    // ── Graph-level signals ─────────────────────────────────────────
    let node_count = graph.node_count();
    let edge_count = graph.edge_count();
    m.semantic_graph_node_count = node_count;
    m.semantic_graph_edge_count = edge_count;
    m.graph_density = if node_count > 1 {
        edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0))
    } else {
        0.0
    };

    // ── Indirect-path structure ─────────────────────────────────────
    if indirect.enabled {
        compute_indirect(&mut m, &passed, hypotheses, thresholds, indirect);
    }

    // ── Temporal metrics and growth score ───────────────────────────
    m.hypothesis_pairs = {
        let mut v: Vec<(String, String)> = pairs.iter().cloned().collect();
        v.sort();
        v
    };
    if indirect.enabled && indirect.temporal_placeholders {
        if let Some(prev) = previous {
            m.evidence_growth_rate = if prev.passed_hypothesis_count == 0 {
                m.passed_hypothesis_count as f64
            } else {
                (m.passed_hypothesis_count as f64 - prev.passed_hypothesis_count as f64)
                    / prev.passed_hypothesis_count as f64
            };
            let prev_pairs: HashSet<(String, String)> =
                prev.hypothesis_pairs.iter().cloned().collect();
            m.hypothesis_stability = if prev_pairs.is_empty() {
                if pairs.is_empty() {
                    0.0
                } else {
                    1.0
                }
            } else {
                (pairs.intersection(&prev_pairs).count() as f64 / prev_pairs.len() as f64).min(1.0)
            };
        }
    }
    if let Some(prev) = previous {
        let delta_nodes = m.unique_nodes_in_paths as f64 - prev.unique_nodes_in_paths as f64;
        let delta_diversity = m.diversity_score - prev.diversity_score;
        let delta_passed = m.passed_hypothesis_count as f64 - prev.passed_hypothesis_count as f64;
        m.growth_score = delta_nodes + delta_diversity + delta_passed;
        tracing::debug!(
            "Growth score {:.3} (Δnodes={delta_nodes}, Δdiv={delta_diversity:.3}, Δpassed={delta_passed})",
            m.growth_score
        );
    }

    m
}

fn compute_indirect(
    m: &mut Measurements,
    passed: &[&Hypothesis],
    all: &[Hypothesis],
    _thresholds: &DecisionThresholds,
    _indirect: &IndirectPathPolicy,
) {
    // Group passed hypotheses by endpoint pair.
    let mut groups: HashMap<(String, String), Vec<&Hypothesis>> = HashMap::new();
    for h in passed {
        groups.entry(h.pair()).or_default().push(h);
    }

    let paths_per_pair: Vec<usize> = groups
        .values()
        .map(|members| {
            let distinct: HashSet<&Vec<String>> = members.iter().map(|h| &h.path).collect();
            distinct.len().max(1)
        })
        .collect();
    m.max_paths_per_pair = paths_per_pair.iter().copied().max().unwrap_or(0);
    m.mean_paths_per_pair = if paths_per_pair.is_empty() {
        0.0
    } else {
        paths_per_pair.iter().sum::<usize>() as f64 / paths_per_pair.len() as f64
    };

    // Dominant pair: highest mean confidence; deterministic tie-break on
    // the pair key itself.
    let mut dominant: Option<((String, String), f64)> = None;
    for (pair, members) in &groups {
        let mean_conf =
            members.iter().map(|h| h.confidence as f64).sum::<f64>() / members.len() as f64;
        let replace = match &dominant {
            None => true,
            Some((best_pair, best)) => {
                mean_conf > *best || (mean_conf == *best && pair < best_pair)
            }
        };
        if replace {
            dominant = Some((pair.clone(), mean_conf));
        }
    }
    if let Some((pair, _)) = &dominant {
        let members = &groups[pair];
        let distinct: HashSet<&Vec<String>> = members.iter().map(|h| &h.path).collect();
        m.dominant_pair_path_ratio = distinct.len() as f64 / members.len() as f64;
        let mut intermediates: HashSet<&String> = HashSet::new();
        for h in members {
            intermediates.extend(h.intermediates().iter());
        }
        m.unique_intermediate_nodes_dominant = intermediates.len();
        m.dominant_pair_id = Some(pair.clone());
    }

    // Redundancy: intermediate-node reuse across all passed paths.
    let mut occurrences = 0usize;
    let mut unique_intermediates: HashSet<&String> = HashSet::new();
    for h in passed {
        for node in h.intermediates() {
            occurrences += 1;
            unique_intermediates.insert(node);
        }
    }
    m.redundancy_score = if occurrences > 0 {
        ((occurrences - unique_intermediates.len()) as f64 / occurrences as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // Path structure.
    let lengths: Vec<f64> = passed.iter().map(|h| path_hops(&h.path) as f64).collect();
    m.mean_path_length = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<f64>() / lengths.len() as f64
    };
    m.path_length_variance = variance(&lengths);

    let confidences: Vec<f64> = passed.iter().map(|h| h.confidence as f64).collect();
    m.confidence_variance = variance(&confidences);

    // Gap between the top two pairs' max confidences.
    let mut pair_max: Vec<f64> = groups
        .values()
        .map(|members| members.iter().map(|h| h.confidence as f64).fold(0.0, f64::max))
        .collect();
    pair_max.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    m.dominant_confidence_gap = if pair_max.len() >= 2 && pair_max[0] > 0.0 {
        (pair_max[0] - pair_max[1]) / pair_max[0]
    } else {
        0.0
    };

    m.pair_distribution_entropy = shannon_entropy(&paths_per_pair);

    // Rejection reason multiset, over the whole population.
    let mut reasons: BTreeMap<String, usize> = BTreeMap::new();
    for h in all {
        if h.passed_filter {
            continue;
        }
        let key = match &h.filter_reason {
            Some(map) if !map.is_empty() => {
                map.keys().cloned().collect::<Vec<_>>().join("|")
            }
            _ => "unknown".to_string(),
        };
        *reasons.entry(key).or_insert(0) += 1;
    }
    m.filter_rejection_reasons = reasons;
}
