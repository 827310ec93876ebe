//! Path reasoning: enumerate indirect paths over the active semantic
//! graph and build scored hypotheses.
//!
//! Explore mode walks every A→B→C triple of distinct nodes (optionally
//! length-3 chains); query mode restricts to paths touching a seed set,
//! with aliases resolved to canonical nodes. Scoring is weakest-link: each
//! hop contributes its best-evidence support (max among predicates), and
//! the hypothesis confidence is the minimum across hops.

pub mod filter;

use std::collections::{BTreeSet, HashSet};

use crate::graph::{Adjacency, SemanticGraph};
use crate::store::NewHypothesis;
use crate::types::{BlockId, ReasoningMode, SourceId, TripleId};

/// Options for one reasoning run, narrowed by per-job config.
#[derive(Debug, Clone, Default)]
pub struct ReasoningOptions {
    pub mode: ReasoningMode,
    pub seeds: Vec<String>,
    pub stoplist: Vec<String>,
    pub allow_len3: bool,
    pub max_hops: usize,
}

fn enumerate_explore(adj: &Adjacency, allow_len3: bool, max_hops: usize) -> Vec<Vec<String>> {
    let mut paths = Vec::new();

    // Length-2: A → B → C with A ≠ C.
    let mut mids: Vec<&String> = adj.nodes().collect();
    mids.sort();
    for mid in &mids {
        for a in adj.predecessors(mid) {
            for c in adj.successors(mid) {
                if a == c {
                    continue;
                }
                paths.push(vec![a.clone(), (*mid).clone(), c.clone()]);
            }
        }
    }

    // Optional length-3: A → B → C → D, all distinct.
    if allow_len3 && max_hops >= 3 {
        for b in &mids {
            for c in adj.successors(b) {
                for d in adj.successors(c) {
                    for a in adj.predecessors(b) {
                        let distinct: HashSet<&str> =
                            [a.as_str(), b.as_str(), c.as_str(), d.as_str()]
                                .into_iter()
                                .collect();
                        if distinct.len() < 4 {
                            continue;
                        }
                        paths.push(vec![a.clone(), (*b).clone(), c.clone(), d.clone()]);
                    }
                }
            }
        }
    }

    paths
}

fn path_is_rejected(path: &[String], adj: &Adjacency, stoplist: &HashSet<String>) -> bool {
    // Cycles.
    let distinct: HashSet<&String> = path.iter().collect();
    if distinct.len() != path.len() {
        return true;
    }
    // Metadata and citation nodes never carry a hypothesis.
    if path.iter().any(|n| adj.node_type(n).blocks_paths()) {
        return true;
    }
    // Stoplisted intermediates.
    if path[1..path.len() - 1]
        .iter()
        .any(|n| stoplist.contains(&n.to_lowercase()))
    {
        return true;
    }
    false
}

fn build_hypothesis(
    path: Vec<String>,
    adj: &Adjacency,
    graph: &SemanticGraph,
    mode: ReasoningMode,
) -> NewHypothesis {
    let mut hop_strengths = Vec::new();
    let mut predicates = Vec::new();
    let mut explanation_parts = Vec::new();
    let mut triple_ids: BTreeSet<TripleId> = BTreeSet::new();
    let mut source_ids: BTreeSet<SourceId> = BTreeSet::new();
    let mut block_ids: BTreeSet<BlockId> = BTreeSet::new();

    for hop in path.windows(2) {
        let (u, v) = (&hop[0], &hop[1]);
        let evidence = adj.hop(u, v);
        let hop_predicates = evidence.map(|e| e.predicates.clone()).unwrap_or_default();
        hop_strengths.push(evidence.map(|e| e.strength()).unwrap_or(0));

        let part = if hop_predicates.is_empty() {
            format!("{u} -> {v}")
        } else {
            format!("{u} -[{}]-> {v}", hop_predicates.join(", "))
        };
        explanation_parts.push(part);
        predicates.extend(hop_predicates);

        // Provenance: union of the hop edges' id sets.
        for edge in graph
            .edges
            .iter()
            .filter(|e| &e.subject == u && &e.object == v)
        {
            triple_ids.extend(edge.triple_ids.iter().copied());
            source_ids.extend(edge.source_ids.iter().copied());
            block_ids.extend(edge.block_ids.iter().copied());
        }
    }

    let confidence = hop_strengths.iter().copied().min().unwrap_or(0);

    NewHypothesis {
        source: path[0].clone(),
        target: path[path.len() - 1].clone(),
        explanation: explanation_parts.join(" then "),
        path,
        predicates,
        confidence,
        mode,
        passed_filter: false,
        filter_reason: None,
        triple_ids: triple_ids.into_iter().collect(),
        source_ids: source_ids.into_iter().collect(),
        block_ids: block_ids.into_iter().collect(),
        domain: None,
    }
}

/// Enumerate and score hypotheses over the active semantic graph.
///
/// Paths with a direct edge between their endpoints are discarded here
/// (the filter re-checks novelty for hypotheses arriving by other routes).
pub fn run_path_reasoning(graph: &SemanticGraph, options: &ReasoningOptions) -> Vec<NewHypothesis> {
    let adj = graph.adjacency();
    let stoplist: HashSet<String> = options.stoplist.iter().map(|s| s.to_lowercase()).collect();

    let candidates = enumerate_explore(&adj, options.allow_len3, options.max_hops.max(2));

    let candidates: Vec<Vec<String>> = match options.mode {
        ReasoningMode::Explore => candidates,
        ReasoningMode::Query => {
            if options.seeds.is_empty() {
                tracing::debug!("Query mode without seeds produces no paths");
                return Vec::new();
            }
            let alias_map = graph.alias_map();
            let canonical_seeds: HashSet<String> = options
                .seeds
                .iter()
                .map(|s| alias_map.get(s).cloned().unwrap_or_else(|| s.clone()))
                .collect();
            candidates
                .into_iter()
                .filter(|path| {
                    canonical_seeds.contains(&path[0])
                        || canonical_seeds.contains(&path[path.len() - 1])
                })
                .collect()
        }
    };

    let mut seen: HashSet<(String, String, Vec<String>)> = HashSet::new();
    let mut hypotheses = Vec::new();
    for path in candidates {
        if path_is_rejected(&path, &adj, &stoplist) {
            continue;
        }
        if adj.has_edge(&path[0], &path[path.len() - 1]) {
            continue;
        }
        let key = (path[0].clone(), path[path.len() - 1].clone(), path.clone());
        if !seen.insert(key) {
            continue;
        }
        hypotheses.push(build_hypothesis(path, &adj, graph, options.mode));
    }

    hypotheses.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
    hypotheses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::types::NodeType;

    fn edge(s: &str, p: &str, o: &str, support: i64) -> Edge {
        Edge {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            support,
            triple_ids: vec![TripleId(support)],
            block_ids: vec![],
            source_ids: vec![],
        }
    }

    fn chain_graph() -> SemanticGraph {
        SemanticGraph {
            nodes: vec![Node::concept("a"), Node::concept("b"), Node::concept("c")],
            edges: vec![edge("a", "inhibits", "b", 3), edge("b", "causes", "c", 5)],
            removed_nodes: vec![],
        }
    }

    #[test]
    fn explore_finds_indirect_path_with_min_confidence() {
        let hypotheses = run_path_reasoning(&chain_graph(), &ReasoningOptions::default());
        assert_eq!(hypotheses.len(), 1);
        let h = &hypotheses[0];
        assert_eq!(h.path, vec!["a", "b", "c"]);
        assert_eq!(h.confidence, 3); // weakest link
        assert_eq!(h.explanation, "a -[inhibits]-> b then b -[causes]-> c");
        assert_eq!(h.predicates, vec!["inhibits", "causes"]);
    }

    #[test]
    fn direct_edge_suppresses_the_path() {
        let mut graph = chain_graph();
        graph.edges.push(edge("a", "related_to", "c", 1));
        let hypotheses = run_path_reasoning(&graph, &ReasoningOptions::default());
        assert!(hypotheses.is_empty());
    }

    #[test]
    fn metadata_nodes_block_paths() {
        let mut graph = chain_graph();
        graph.nodes[1].node_type = NodeType::Metadata;
        assert!(run_path_reasoning(&graph, &ReasoningOptions::default()).is_empty());
    }

    #[test]
    fn stoplisted_intermediate_blocks_path() {
        let options = ReasoningOptions {
            stoplist: vec!["b".to_string()],
            ..Default::default()
        };
        assert!(run_path_reasoning(&chain_graph(), &options).is_empty());
    }

    #[test]
    fn query_mode_restricts_to_seeds() {
        let mut graph = chain_graph();
        graph.nodes.push(Node::concept("x"));
        graph.nodes.push(Node::concept("y"));
        graph.edges.push(edge("x", "binds", "b", 2));
        graph.edges.push(edge("b", "treats", "y", 2));

        let all = run_path_reasoning(&graph, &ReasoningOptions::default());
        assert!(all.len() > 1);

        let options = ReasoningOptions {
            mode: ReasoningMode::Query,
            seeds: vec!["x".to_string()],
            ..Default::default()
        };
        let seeded = run_path_reasoning(&graph, &options);
        assert!(!seeded.is_empty());
        for h in &seeded {
            assert!(h.source == "x" || h.target == "x");
        }
    }

    #[test]
    fn query_mode_resolves_aliases() {
        let mut graph = chain_graph();
        graph.nodes[0].aliases = vec!["alpha protein".to_string()];
        let options = ReasoningOptions {
            mode: ReasoningMode::Query,
            seeds: vec!["alpha protein".to_string()],
            ..Default::default()
        };
        let hypotheses = run_path_reasoning(&graph, &options);
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].source, "a");
    }

    #[test]
    fn len3_paths_require_flag() {
        let mut graph = chain_graph();
        graph.nodes.push(Node::concept("d"));
        graph.edges.push(edge("c", "drives", "d", 2));

        let without = run_path_reasoning(&graph, &ReasoningOptions::default());
        assert!(without.iter().all(|h| h.path.len() == 3));

        let options = ReasoningOptions {
            allow_len3: true,
            max_hops: 3,
            ..Default::default()
        };
        let with = run_path_reasoning(&graph, &options);
        assert!(with.iter().any(|h| h.path.len() == 4));
    }

    #[test]
    fn ordering_is_confidence_then_endpoints() {
        let graph = SemanticGraph {
            nodes: ["a", "b", "c", "x", "y"].iter().map(|n| Node::concept(*n)).collect(),
            edges: vec![
                edge("a", "p", "b", 1),
                edge("b", "p", "c", 1),
                edge("x", "p", "b", 9),
                edge("b", "p", "y", 9),
            ],
            removed_nodes: vec![],
        };
        let hypotheses = run_path_reasoning(&graph, &ReasoningOptions::default());
        assert!(hypotheses[0].confidence >= hypotheses[hypotheses.len() - 1].confidence);
    }
}
