//! Rule-based hypothesis filtering.
//!
//! Rules run in a fixed order and stop at the first failure, so a
//! rejected hypothesis records exactly one reason. The evidence-threshold
//! rule is special downstream: hypotheses rejected only by it are
//! "promising" and stay selectable as fetch leads.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::GraphRules;
use crate::graph::SemanticGraph;
use crate::store::NewHypothesis;

/// Ordered rule names; also the keys used in `filter_reason`.
pub const RULE_HUB_SUPPRESSION: &str = "hub_suppression";
pub const RULE_PREDICATE_SEMANTICS: &str = "predicate_semantics";
pub const RULE_EVIDENCE_THRESHOLD: &str = "evidence_threshold";
pub const RULE_NOVELTY: &str = "novelty";

struct FilterContext<'a> {
    graph: &'a SemanticGraph,
    degrees: HashMap<String, usize>,
    hub_threshold: usize,
    min_confidence: i64,
    generic_predicates: HashSet<String>,
}

fn check_hub_suppression(h: &NewHypothesis, ctx: &FilterContext) -> Option<String> {
    if h.path.len() > 2 {
        for node in &h.path[1..h.path.len() - 1] {
            let degree = ctx.degrees.get(node).copied().unwrap_or(0);
            if degree > ctx.hub_threshold {
                return Some(format!(
                    "Node '{node}' has degree {degree} > {}",
                    ctx.hub_threshold
                ));
            }
        }
    }
    None
}

fn check_predicate_semantics(h: &NewHypothesis, ctx: &FilterContext) -> Option<String> {
    if h.predicates.is_empty() {
        return None;
    }
    let all_generic = h
        .predicates
        .iter()
        .all(|p| ctx.generic_predicates.contains(&p.to_lowercase()));
    if all_generic {
        Some(format!("All predicates are generic: {:?}", h.predicates))
    } else {
        None
    }
}

fn check_evidence_threshold(h: &NewHypothesis, ctx: &FilterContext) -> Option<String> {
    if h.confidence < ctx.min_confidence {
        Some(format!("Confidence {} < {}", h.confidence, ctx.min_confidence))
    } else {
        None
    }
}

fn check_novelty(h: &NewHypothesis, ctx: &FilterContext) -> Option<String> {
    if ctx.graph.has_edge(&h.source, &h.target) {
        Some(format!(
            "Direct edge exists between '{}' and '{}'",
            h.source, h.target
        ))
    } else {
        None
    }
}

type Rule = fn(&NewHypothesis, &FilterContext) -> Option<String>;

const RULES: [(&str, Rule); 4] = [
    (RULE_HUB_SUPPRESSION, check_hub_suppression),
    (RULE_PREDICATE_SEMANTICS, check_predicate_semantics),
    (RULE_EVIDENCE_THRESHOLD, check_evidence_threshold),
    (RULE_NOVELTY, check_novelty),
];

/// Apply the filter rules in place, setting `passed_filter` and
/// `filter_reason` on every hypothesis.
pub fn filter_hypotheses(
    hypotheses: &mut [NewHypothesis],
    graph: &SemanticGraph,
    rules: &GraphRules,
) {
    let ctx = FilterContext {
        graph,
        degrees: graph.degrees(),
        hub_threshold: rules.hub_degree_threshold,
        min_confidence: rules.min_confidence,
        generic_predicates: rules
            .generic_predicates
            .iter()
            .map(|p| p.to_lowercase())
            .collect(),
    };

    let mut passed = 0usize;
    for hypothesis in hypotheses.iter_mut() {
        let mut reason: Option<(&str, String)> = None;
        for (name, rule) in &RULES {
            if let Some(cause) = rule(hypothesis, &ctx) {
                reason = Some((name, cause));
                break;
            }
        }
        match reason {
            Some((name, cause)) => {
                hypothesis.passed_filter = false;
                hypothesis.filter_reason =
                    Some(BTreeMap::from([(name.to_string(), cause)]));
            }
            None => {
                hypothesis.passed_filter = true;
                hypothesis.filter_reason = None;
                passed += 1;
            }
        }
    }
    tracing::info!(
        "Filter pass: {passed}/{} hypotheses passed",
        hypotheses.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::types::ReasoningMode;

    fn hypothesis(path: &[&str], predicates: &[&str], confidence: i64) -> NewHypothesis {
        NewHypothesis {
            source: path[0].to_string(),
            target: path[path.len() - 1].to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            predicates: predicates.iter().map(|s| s.to_string()).collect(),
            explanation: String::new(),
            confidence,
            mode: ReasoningMode::Explore,
            passed_filter: false,
            filter_reason: None,
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
        }
    }

    fn hub_graph(hub_degree: usize) -> SemanticGraph {
        // "protein" connected to `hub_degree` spokes.
        let mut nodes = vec![Node::concept("A"), Node::concept("B"), Node::concept("protein")];
        let mut edges = vec![
            Edge {
                subject: "A".into(),
                predicate: "binds".into(),
                object: "protein".into(),
                support: 5,
                triple_ids: vec![],
                block_ids: vec![],
                source_ids: vec![],
            },
            Edge {
                subject: "protein".into(),
                predicate: "causes".into(),
                object: "B".into(),
                support: 5,
                triple_ids: vec![],
                block_ids: vec![],
                source_ids: vec![],
            },
        ];
        for i in 0..hub_degree.saturating_sub(2) {
            let spoke = format!("spoke{i}");
            nodes.push(Node::concept(&spoke));
            edges.push(Edge {
                subject: "protein".into(),
                predicate: "touches".into(),
                object: spoke,
                support: 1,
                triple_ids: vec![],
                block_ids: vec![],
                source_ids: vec![],
            });
        }
        SemanticGraph { nodes, edges, removed_nodes: vec![] }
    }

    #[test]
    fn hub_suppression_rejects_with_reason() {
        let graph = hub_graph(75);
        let mut rules = GraphRules::default();
        rules.hub_degree_threshold = 50;
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 5)];
        filter_hypotheses(&mut hyps, &graph, &rules);

        assert!(!hyps[0].passed_filter);
        let reason = hyps[0].filter_reason.as_ref().unwrap();
        assert_eq!(
            reason.get(RULE_HUB_SUPPRESSION).unwrap(),
            "Node 'protein' has degree 75 > 50"
        );
    }

    #[test]
    fn hub_suppression_boundary_is_strict() {
        // Degree exactly at the threshold passes.
        let graph = hub_graph(50);
        let mut rules = GraphRules::default();
        rules.hub_degree_threshold = 50;
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 5)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        assert!(hyps[0].passed_filter);
    }

    #[test]
    fn generic_predicates_rejected() {
        let graph = hub_graph(3);
        let rules = GraphRules::default();
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["related_to", "associated_with"], 5)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        assert!(!hyps[0].passed_filter);
        assert!(hyps[0]
            .filter_reason
            .as_ref()
            .unwrap()
            .contains_key(RULE_PREDICATE_SEMANTICS));
    }

    #[test]
    fn low_confidence_is_the_promising_rejection() {
        let graph = hub_graph(3);
        let rules = GraphRules::default();
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 1)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        assert!(!hyps[0].passed_filter);
        let reasons = hyps[0].filter_reason.as_ref().unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(reasons.contains_key(RULE_EVIDENCE_THRESHOLD));
    }

    #[test]
    fn novelty_rejects_when_direct_edge_exists() {
        let mut graph = hub_graph(3);
        graph.edges.push(Edge {
            subject: "A".into(),
            predicate: "causes".into(),
            object: "B".into(),
            support: 1,
            triple_ids: vec![],
            block_ids: vec![],
            source_ids: vec![],
        });
        let rules = GraphRules::default();
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 5)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        assert!(!hyps[0].passed_filter);
        assert!(hyps[0].filter_reason.as_ref().unwrap().contains_key(RULE_NOVELTY));
    }

    #[test]
    fn first_failing_rule_short_circuits() {
        // Both hub and low confidence apply; only the hub reason records.
        let graph = hub_graph(75);
        let mut rules = GraphRules::default();
        rules.hub_degree_threshold = 50;
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 0)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        let reasons = hyps[0].filter_reason.as_ref().unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(reasons.contains_key(RULE_HUB_SUPPRESSION));
    }

    #[test]
    fn passing_hypothesis_has_no_reason() {
        let graph = hub_graph(3);
        let rules = GraphRules::default();
        let mut hyps = vec![hypothesis(&["A", "protein", "B"], &["binds", "causes"], 5)];
        filter_hypotheses(&mut hyps, &graph, &rules);
        assert!(hyps[0].passed_filter);
        assert!(hyps[0].filter_reason.is_none());
    }
}
