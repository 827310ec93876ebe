//! Graph sanitization: node classification, metadata demotion, and
//! noise removal.
//!
//! Metadata values (years, DOIs, identifiers, URLs) never deserve to be
//! nodes; edges pointing at them are folded into attributes on the subject
//! node. Noise nodes and their incident edges are dropped outright. Only
//! rule-based classification happens here — no model calls.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{Node, SemanticGraph};
use crate::config::GraphRules;
use crate::types::NodeType;

/// Metadata patterns and the attribute each demotes into.
fn metadata_rules() -> &'static Vec<(Regex, &'static str)> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            (Regex::new(r"^(19|20)\d{2}$").unwrap(), "year"),
            (Regex::new(r"(?i)^10\.\d{4,9}/\S+$").unwrap(), "doi"),
            (Regex::new(r"(?i)^issn[:\s]*\d{4}-\d{3}[\dxX]$").unwrap(), "issn"),
            (Regex::new(r"(?i)^arxiv[:\s]*\d{4}\.\d{4,5}(v\d+)?$").unwrap(), "arxiv_id"),
            (Regex::new(r"(?i)^pmid[:\s]*\d+$").unwrap(), "pmid"),
            (Regex::new(r"(?i)^https?://\S+$").unwrap(), "url"),
        ]
    })
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\[\d+\]|[a-z]+ et al\.?,?( \d{4})?)$").unwrap())
}

/// Classify metadata, returning the attribute name it demotes into.
pub fn match_metadata(text: &str) -> Option<&'static str> {
    let trimmed = text.trim();
    metadata_rules()
        .iter()
        .find(|(re, _)| re.is_match(trimmed))
        .map(|(_, name)| *name)
}

/// Compiled removal rules from the admin policy.
pub struct SanitizeRules {
    patterns: Vec<Regex>,
    exact: Vec<String>,
}

impl SanitizeRules {
    pub fn compile(rules: &GraphRules) -> Self {
        let mut patterns = Vec::new();
        for raw in &rules.node_removal_patterns {
            match Regex::new(raw) {
                Ok(re) => patterns.push(re),
                Err(e) => tracing::warn!("Invalid node removal pattern {raw:?}: {e}"),
            }
        }
        Self {
            patterns,
            exact: rules
                .node_removal_exact
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }

    /// Classify one node text.
    pub fn classify(&self, text: &str) -> NodeType {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return NodeType::Noise;
        }
        if match_metadata(trimmed).is_some() {
            return NodeType::Metadata;
        }
        if citation_re().is_match(trimmed) {
            return NodeType::Citation;
        }
        if self.exact.iter().any(|w| w == &trimmed.to_lowercase()) {
            return NodeType::Noise;
        }
        if self.patterns.iter().any(|re| re.is_match(trimmed)) {
            return NodeType::Noise;
        }
        NodeType::Concept
    }
}

/// Sanitize a structural graph under the configured rules.
pub fn sanitize_graph(graph: &SemanticGraph, rules: &GraphRules) -> SemanticGraph {
    let compiled = SanitizeRules::compile(rules);

    let mut node_types: BTreeMap<&str, NodeType> = BTreeMap::new();
    for node in &graph.nodes {
        node_types.insert(&node.text, compiled.classify(&node.text));
    }
    // Edge endpoints missing from the node list still need a class.
    for edge in &graph.edges {
        node_types
            .entry(&edge.subject)
            .or_insert_with(|| compiled.classify(&edge.subject));
        node_types
            .entry(&edge.object)
            .or_insert_with(|| compiled.classify(&edge.object));
    }

    let mut attributes: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    // Pass 1: demote metadata objects onto their subject's attributes.
    let mut kept_edges = Vec::new();
    let mut demoted = 0usize;
    for edge in &graph.edges {
        if node_types.get(edge.object.as_str()) == Some(&NodeType::Metadata) {
            if let Some(attr) = match_metadata(&edge.object) {
                attributes
                    .entry(edge.subject.clone())
                    .or_default()
                    .insert(attr.to_string(), edge.object.trim().to_string());
                demoted += 1;
            }
            continue;
        }
        kept_edges.push(edge.clone());
    }

    // Pass 2: drop noise and citation nodes with their incident edges.
    let dropped_type = |t: Option<&NodeType>| {
        matches!(t, Some(NodeType::Noise) | Some(NodeType::Citation))
    };
    kept_edges.retain(|edge| {
        !dropped_type(node_types.get(edge.subject.as_str()))
            && !dropped_type(node_types.get(edge.object.as_str()))
    });

    // Pass 3: emit typed nodes; noise is listed in removed_nodes.
    let mut nodes = Vec::new();
    let mut removed = Vec::new();
    for (text, node_type) in &node_types {
        match node_type {
            NodeType::Noise | NodeType::Citation => removed.push(text.to_string()),
            NodeType::Metadata => {} // demoted, not carried as a node
            _ => {
                let original = graph.node(text);
                nodes.push(Node {
                    text: text.to_string(),
                    node_type: *node_type,
                    aliases: original.map(|n| n.aliases.clone()).unwrap_or_default(),
                    attributes: attributes.remove(*text).unwrap_or_default(),
                    cluster_score: None,
                });
            }
        }
    }

    tracing::info!(
        "Sanitization: {} nodes kept, {} removed, {} metadata edge(s) demoted, {} edges kept",
        nodes.len(),
        removed.len(),
        demoted,
        kept_edges.len()
    );

    SemanticGraph {
        nodes,
        edges: kept_edges,
        removed_nodes: removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;

    fn edge(s: &str, p: &str, o: &str) -> Edge {
        Edge {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            support: 1,
            triple_ids: vec![],
            block_ids: vec![],
            source_ids: vec![],
        }
    }

    fn graph(nodes: &[&str], edges: Vec<Edge>) -> SemanticGraph {
        SemanticGraph {
            nodes: nodes.iter().map(|n| Node::concept(*n)).collect(),
            edges,
            removed_nodes: vec![],
        }
    }

    #[test]
    fn metadata_patterns_match() {
        assert_eq!(match_metadata("2019"), Some("year"));
        assert_eq!(match_metadata("10.1038/nature12373"), Some("doi"));
        assert_eq!(match_metadata("arXiv:2101.00001"), Some("arxiv_id"));
        assert_eq!(match_metadata("PMID: 12345"), Some("pmid"));
        assert_eq!(match_metadata("https://example.org/x"), Some("url"));
        assert_eq!(match_metadata("dopamine"), None);
    }

    #[test]
    fn metadata_objects_demote_to_attributes() {
        let g = graph(
            &["paper x", "2019", "dopamine"],
            vec![edge("paper x", "published_in", "2019"), edge("paper x", "studies", "dopamine")],
        );
        let sanitized = sanitize_graph(&g, &GraphRules::default());
        let paper = sanitized.node("paper x").unwrap();
        assert_eq!(paper.attributes.get("year").map(String::as_str), Some("2019"));
        // The metadata edge is gone; the concept edge stays.
        assert_eq!(sanitized.edge_count(), 1);
        assert!(sanitized.node("2019").is_none());
    }

    #[test]
    fn noise_nodes_and_incident_edges_dropped() {
        let g = graph(
            &["it", "dopamine", "serotonin"],
            vec![edge("it", "affects", "dopamine"), edge("dopamine", "modulates", "serotonin")],
        );
        let sanitized = sanitize_graph(&g, &GraphRules::default());
        assert!(sanitized.removed_nodes.contains(&"it".to_string()));
        assert_eq!(sanitized.edge_count(), 1);
        assert_eq!(sanitized.node_count(), 2);
    }

    #[test]
    fn citations_are_removed() {
        let rules = GraphRules::default();
        let compiled = SanitizeRules::compile(&rules);
        assert_eq!(compiled.classify("Smith et al., 2020"), NodeType::Citation);
        assert_eq!(compiled.classify("[12]"), NodeType::Citation);
        assert_eq!(compiled.classify("synaptic plasticity"), NodeType::Concept);
    }

    #[test]
    fn bare_numbers_are_noise() {
        let compiled = SanitizeRules::compile(&GraphRules::default());
        assert_eq!(compiled.classify("42"), NodeType::Noise);
        assert_eq!(compiled.classify("figure 3"), NodeType::Noise);
    }
}
