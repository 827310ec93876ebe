//! Decision handlers: one per decision label.
//!
//! Contract: a handler receives the decision snapshot and the job's
//! current artifacts, performs its side effects (job result, ledger,
//! verification rows), and returns the status the dispatcher should CAS
//! to plus whether to re-enqueue. Handlers never call each other, and
//! running one twice at the same status must be safe.

mod fetch_more;
mod halt_confident;
mod halt_no_hypothesis;
mod insufficient_signal;
mod strategic_download;
mod verification;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AdminPolicy;
use crate::events::PresentationEvent;
use crate::graph::SemanticGraph;
use crate::measure::Measurements;
use crate::store::{DecisionResult, Hypothesis, Job, SqliteStore};
use crate::types::{DecisionLabel, EngineError, JobStatus};

pub use fetch_more::FetchMoreLiteratureHandler;
pub use halt_confident::HaltConfidentHandler;
pub use halt_no_hypothesis::HaltNoHypothesisHandler;
pub use insufficient_signal::InsufficientSignalHandler;
pub use strategic_download::StrategicDownloadHandler;
pub use verification::{VerificationFoundHandler, VerificationNotFoundHandler};

/// Everything a handler may read.
pub struct HandlerContext {
    pub job: Job,
    pub decision: DecisionResult,
    pub measurements: Measurements,
    pub graph: SemanticGraph,
    pub hypotheses: Vec<Hypothesis>,
    pub store: Arc<SqliteStore>,
    pub policy: Arc<AdminPolicy>,
}

/// What a handler decided to do with the job.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub new_status: JobStatus,
    pub reenqueue: bool,
    pub message: String,
    pub next_action: Option<String>,
    pub event: Option<PresentationEvent>,
    pub data: Option<serde_json::Value>,
}

#[async_trait]
pub trait DecisionHandler: Send + Sync {
    fn label(&self) -> DecisionLabel;

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError>;
}

/// Label → handler table. Populated explicitly at startup and validated
/// to cover the whole decision space.
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn DecisionHandler>>,
}

impl HandlerRegistry {
    /// The standard registry covering every decision label.
    pub fn standard() -> Self {
        let mut registry = Self {
            handlers: BTreeMap::new(),
        };
        registry.register(Arc::new(HaltConfidentHandler));
        registry.register(Arc::new(HaltNoHypothesisHandler));
        registry.register(Arc::new(InsufficientSignalHandler));
        registry.register(Arc::new(FetchMoreLiteratureHandler));
        registry.register(Arc::new(StrategicDownloadHandler));
        registry.register(Arc::new(VerificationFoundHandler));
        registry.register(Arc::new(VerificationNotFoundHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn DecisionHandler>) {
        self.handlers.insert(handler.label().as_str(), handler);
    }

    pub fn get(&self, label: DecisionLabel) -> Option<Arc<dyn DecisionHandler>> {
        self.handlers.get(label.as_str()).cloned()
    }

    /// Every decision label must have a handler; checked at startup.
    pub fn validate(&self) -> Result<(), EngineError> {
        for label in DecisionLabel::all() {
            if !self.handlers.contains_key(label.as_str()) {
                return Err(EngineError::Internal(format!(
                    "no handler registered for decision {label}"
                )));
            }
        }
        Ok(())
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// A (source, target) pair group summarized for final output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PairGroup {
    pub source: String,
    pub target: String,
    pub max_confidence: i64,
    pub path_count: usize,
    pub intermediates: Vec<String>,
    pub passed: bool,
}

/// Group hypotheses by endpoint pair, ranked by max confidence descending,
/// optionally excluding one pair. Only passed or promising hypotheses
/// contribute.
pub fn group_top_pairs(
    hypotheses: &[Hypothesis],
    limit: usize,
    exclude: Option<&(String, String)>,
) -> Vec<PairGroup> {
    let mut groups: BTreeMap<(String, String), PairGroup> = BTreeMap::new();
    for h in hypotheses {
        if !h.passed_filter && !h.is_promising() {
            continue;
        }
        let pair = h.pair();
        if exclude == Some(&pair) {
            continue;
        }
        let group = groups.entry(pair.clone()).or_insert_with(|| PairGroup {
            source: pair.0.clone(),
            target: pair.1.clone(),
            max_confidence: i64::MIN,
            path_count: 0,
            intermediates: Vec::new(),
            passed: false,
        });
        group.max_confidence = group.max_confidence.max(h.confidence);
        group.path_count += 1;
        group.passed |= h.passed_filter;
        for node in h.intermediates() {
            if !group.intermediates.contains(node) {
                group.intermediates.push(node.clone());
            }
        }
    }

    let mut ranked: Vec<PairGroup> = groups.into_values().collect();
    ranked.sort_by(|a, b| {
        b.max_confidence
            .cmp(&a.max_confidence)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
    ranked.truncate(limit);
    ranked
}

/// Project active hypotheses to a graph subview: only nodes on some
/// hypothesis path and the edges among them.
pub fn project_hypotheses_to_graph(
    graph: &SemanticGraph,
    hypotheses: &[Hypothesis],
) -> SemanticGraph {
    let mut keep: std::collections::HashSet<&String> = std::collections::HashSet::new();
    for h in hypotheses {
        if h.passed_filter {
            keep.extend(h.path.iter());
        }
    }
    SemanticGraph {
        nodes: graph
            .nodes
            .iter()
            .filter(|n| keep.contains(&n.text))
            .cloned()
            .collect(),
        edges: graph
            .edges
            .iter()
            .filter(|e| keep.contains(&e.subject) && keep.contains(&e.object))
            .cloned()
            .collect(),
        removed_nodes: Vec::new(),
    }
}

/// Resolve triple ids back to human-readable evidence lines.
pub async fn resolve_evidence_snippets(
    store: &SqliteStore,
    triple_ids: &[crate::types::TripleId],
) -> Result<Vec<String>, EngineError> {
    let triples = store.triples_by_ids(triple_ids).await?;
    Ok(triples
        .into_iter()
        .map(|t| format!("{} {} {}", t.subject, t.predicate, t.object))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;

    fn hyp(source: &str, target: &str, mid: &str, confidence: i64, passed: bool) -> Hypothesis {
        Hypothesis {
            id: HypothesisId(0),
            job_id: JobId(1),
            source: source.into(),
            target: target.into(),
            path: vec![source.into(), mid.into(), target.into()],
            predicates: vec!["causes".into()],
            explanation: String::new(),
            confidence,
            mode: ReasoningMode::Explore,
            passed_filter: passed,
            filter_reason: if passed {
                None
            } else {
                Some(BTreeMap::from([(
                    "evidence_threshold".to_string(),
                    "low".to_string(),
                )]))
            },
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn registry_covers_all_labels() {
        let registry = HandlerRegistry::standard();
        for label in DecisionLabel::all() {
            assert!(registry.get(label).is_some(), "missing handler for {label}");
        }
    }

    #[test]
    fn grouping_ranks_by_max_confidence() {
        let hyps = vec![
            hyp("a", "c", "b", 3, true),
            hyp("a", "c", "e", 7, true),
            hyp("x", "y", "b", 5, true),
        ];
        let groups = group_top_pairs(&hyps, 10, None);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source, "a");
        assert_eq!(groups[0].max_confidence, 7);
        assert_eq!(groups[0].path_count, 2);
        assert_eq!(groups[0].intermediates, vec!["b".to_string(), "e".to_string()]);
    }

    #[test]
    fn grouping_excludes_dominant_pair_and_rejected() {
        let hyps = vec![
            hyp("a", "c", "b", 7, true),
            hyp("x", "y", "b", 5, true),
            hyp("p", "q", "b", 9, false), // promising, still included
        ];
        let exclude = ("a".to_string(), "c".to_string());
        let groups = group_top_pairs(&hyps, 10, Some(&exclude));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source, "p");
        assert!(!groups[0].passed);
    }

    #[test]
    fn projection_keeps_only_path_nodes() {
        use crate::graph::{Edge, Node};
        let graph = SemanticGraph {
            nodes: vec![
                Node::concept("a"),
                Node::concept("b"),
                Node::concept("c"),
                Node::concept("unrelated"),
            ],
            edges: vec![
                Edge {
                    subject: "a".into(),
                    predicate: "p".into(),
                    object: "b".into(),
                    support: 1,
                    triple_ids: vec![],
                    block_ids: vec![],
                    source_ids: vec![],
                },
                Edge {
                    subject: "unrelated".into(),
                    predicate: "p".into(),
                    object: "a".into(),
                    support: 1,
                    triple_ids: vec![],
                    block_ids: vec![],
                    source_ids: vec![],
                },
            ],
            removed_nodes: vec![],
        };
        let hyps = vec![hyp("a", "c", "b", 3, true)];
        let projected = project_hypotheses_to_graph(&graph, &hyps);
        assert_eq!(projected.node_count(), 3);
        assert_eq!(projected.edge_count(), 1);
    }
}
