//! Typed semantic graph model and the staged construction pipeline.
//!
//! The graph moves through three shapes: a structural projection grouped
//! from raw triples, a sanitized graph with typed nodes and demoted
//! metadata, and the merged semantic graph that path reasoning consumes.
//! All three share the `SemanticGraph` representation; persistence stores
//! it as a JSON blob and parses back to typed form on load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{BlockId, NodeType, SourceId, TripleId};

pub mod cache;
pub mod merge;
pub mod sanitize;
pub mod structural;

pub use cache::GraphCache;

/// A node in the semantic graph, identified by its text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub text: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Mean cosine similarity of cluster members to their centroid; set by
    /// the semantic merge, 1.0 for singleton clusters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_score: Option<f64>,
}

impl Node {
    pub fn concept(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            node_type: NodeType::Concept,
            aliases: Vec::new(),
            attributes: BTreeMap::new(),
            cluster_score: None,
        }
    }
}

/// A directed edge with aggregated support and provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub support: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triple_ids: Vec<TripleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_ids: Vec<BlockId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<SourceId>,
}

/// The semantic graph passed between pipeline stages and persisted per job.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SemanticGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Nodes dropped by sanitization, retained for the event payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_nodes: Vec<String>,
}

impl SemanticGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, text: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.text == text)
    }

    /// Map alias text (and canonical text) to canonical node text.
    pub fn alias_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for node in &self.nodes {
            map.insert(node.text.clone(), node.text.clone());
            for alias in &node.aliases {
                map.insert(alias.clone(), node.text.clone());
            }
        }
        map
    }

    /// Whether any edge connects `subject` directly to `object`.
    pub fn has_edge(&self, subject: &str, object: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.subject == subject && e.object == object)
    }

    /// Undirected degree per node text (edges incident in either direction).
    pub fn degrees(&self) -> HashMap<String, usize> {
        let mut degrees: HashMap<String, usize> = HashMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for edge in &self.edges {
            // A multi-predicate pair counts once, like a simple digraph.
            if seen.insert((edge.subject.clone(), edge.object.clone())) {
                *degrees.entry(edge.subject.clone()).or_insert(0) += 1;
                *degrees.entry(edge.object.clone()).or_insert(0) += 1;
            }
        }
        for node in &self.nodes {
            degrees.entry(node.text.clone()).or_insert(0);
        }
        degrees
    }

    /// Adjacency view aggregating predicates and supports per (subject, object)
    /// pair, the shape path enumeration walks.
    pub fn adjacency(&self) -> Adjacency {
        let mut pairs: HashMap<(String, String), HopEvidence> = HashMap::new();
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        let mut inc: HashMap<String, Vec<String>> = HashMap::new();

        for edge in &self.edges {
            let key = (edge.subject.clone(), edge.object.clone());
            let entry = pairs.entry(key).or_insert_with(|| {
                out.entry(edge.subject.clone())
                    .or_default()
                    .push(edge.object.clone());
                inc.entry(edge.object.clone())
                    .or_default()
                    .push(edge.subject.clone());
                HopEvidence::default()
            });
            entry.predicates.push(edge.predicate.clone());
            entry.supports.push(edge.support);
        }

        let node_types = self
            .nodes
            .iter()
            .map(|n| (n.text.clone(), n.node_type))
            .collect();

        Adjacency {
            pairs,
            successors: out,
            predecessors: inc,
            node_types,
        }
    }
}

/// Predicates and supports aggregated for one (subject, object) pair.
#[derive(Debug, Clone, Default)]
pub struct HopEvidence {
    pub predicates: Vec<String>,
    pub supports: Vec<i64>,
}

impl HopEvidence {
    /// Best-evidence strength for the hop: the maximum support among its
    /// predicates.
    pub fn strength(&self) -> i64 {
        self.supports.iter().copied().max().unwrap_or(0)
    }
}

/// Directed adjacency index over a semantic graph.
#[derive(Debug, Default)]
pub struct Adjacency {
    pairs: HashMap<(String, String), HopEvidence>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
    node_types: HashMap<String, NodeType>,
}

impl Adjacency {
    pub fn hop(&self, subject: &str, object: &str) -> Option<&HopEvidence> {
        self.pairs.get(&(subject.to_string(), object.to_string()))
    }

    pub fn has_edge(&self, subject: &str, object: &str) -> bool {
        self.pairs
            .contains_key(&(subject.to_string(), object.to_string()))
    }

    pub fn successors(&self, node: &str) -> &[String] {
        self.successors.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, node: &str) -> &[String] {
        self.predecessors
            .get(node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn node_type(&self, node: &str) -> NodeType {
        self.node_types.get(node).copied().unwrap_or_default()
    }

    /// All node texts appearing as an endpoint of some edge or as a node.
    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.node_types.keys()
    }
}
