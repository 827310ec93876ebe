//! Persistent entities owned by a job, plus the global paper catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::JobConfig;
use crate::graph::SemanticGraph;
use crate::types::*;

/// The root aggregate: one literature-review job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub mode: JobMode,
    pub status: JobStatus,
    /// Immutable copy of the per-job tuning captured at creation.
    pub config: JobConfig,
    /// The research seed or question text, when one was provided.
    pub seed_text: Option<String>,
    /// Verification jobs carry their entity pair here.
    pub verification_pair: Option<(String, String)>,
    /// Terminal output written by a halting handler.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only per-job message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub job_id: JobId,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Status,
    Event,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Status => "status",
            MessageType::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "status" => Some(MessageType::Status),
            "event" => Some(MessageType::Event),
            _ => None,
        }
    }
}

/// Physical uploaded or downloaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub job_id: JobId,
    pub paper_id: Option<PaperId>,
    pub origin: FileOrigin,
    pub stored_path: String,
    pub file_type: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
}

/// One unit of text to ingest. `raw_text` is the canonical post-extraction
/// text; downstream stages read only this column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSource {
    pub id: SourceId,
    pub job_id: JobId,
    pub source_type: SourceType,
    pub source_ref: String,
    pub raw_text: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl IngestionSource {
    /// Parse a `paper:{id}` source_ref back to its paper id.
    pub fn paper_ref(&self) -> Option<PaperId> {
        self.source_ref
            .strip_prefix("paper:")
            .and_then(|s| s.parse::<i64>().ok())
            .map(PaperId)
    }

    /// Parse a `file:{id}` source_ref back to its file id.
    pub fn file_ref(&self) -> Option<FileId> {
        self.source_ref
            .strip_prefix("file:")
            .and_then(|s| s.parse::<i64>().ok())
            .map(FileId)
    }
}

/// A slice of one ingestion source; `triples_extracted` is true-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: BlockId,
    pub job_id: JobId,
    pub source_id: SourceId,
    pub block_text: String,
    pub block_order: i64,
    pub segmentation_strategy: String,
    pub triples_extracted: bool,
    pub created_at: DateTime<Utc>,
}

/// Extracted (subject, predicate, object) with provenance. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub id: TripleId,
    pub job_id: JobId,
    pub block_id: BlockId,
    pub source_id: SourceId,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub extractor_name: String,
    pub created_at: DateTime<Utc>,
}

/// Versioned semantic graph snapshot. At most one active row per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticGraphRecord {
    pub id: GraphId,
    pub job_id: JobId,
    pub graph: SemanticGraph,
    pub node_count: i64,
    pub edge_count: i64,
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An enumerated indirect path with its filter verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: HypothesisId,
    pub job_id: JobId,
    pub source: String,
    pub target: String,
    pub path: Vec<String>,
    pub predicates: Vec<String>,
    pub explanation: String,
    pub confidence: i64,
    pub mode: ReasoningMode,
    pub passed_filter: bool,
    /// Rule name → human-readable cause, set only on rejection.
    pub filter_reason: Option<BTreeMap<String, String>>,
    pub triple_ids: Vec<TripleId>,
    pub source_ids: Vec<SourceId>,
    pub block_ids: Vec<BlockId>,
    pub domain: Option<String>,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Hypothesis {
    /// A promising hypothesis failed the filter only on the evidence
    /// threshold; it stays selectable as a fetch lead.
    pub fn is_promising(&self) -> bool {
        if self.passed_filter {
            return false;
        }
        match &self.filter_reason {
            Some(reasons) => reasons.len() == 1 && reasons.contains_key("evidence_threshold"),
            None => false,
        }
    }

    pub fn pair(&self) -> (String, String) {
        (self.source.clone(), self.target.clone())
    }

    /// Intermediate nodes on the path, excluding the endpoints.
    pub fn intermediates(&self) -> &[String] {
        if self.path.len() > 2 {
            &self.path[1..self.path.len() - 1]
        } else {
            &[]
        }
    }
}

/// Canonical scholarly work, shared across jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub title: String,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    pub external_ids: BTreeMap<String, String>,
    pub fingerprint: String,
    pub pdf_url: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Candidate paper shape returned by fetch providers, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaperCandidate {
    pub title: String,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub venue: Option<String>,
    pub doi: Option<String>,
    pub external_ids: BTreeMap<String, String>,
    pub pdf_url: Option<String>,
    pub source: String,
}

/// Ledger row linking a paper to a job (the strategic ledger).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPaperEvidence {
    pub id: i64,
    pub job_id: JobId,
    pub paper_id: PaperId,
    pub run_id: Option<SearchRunId>,
    pub evaluated: bool,
    pub impact_score: f64,
    pub hypo_ref_count: i64,
    pub cumulative_conf: f64,
    pub entity_density: i64,
    pub created_at: DateTime<Utc>,
}

/// Stable search intent per hypothesis endpoint pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: SearchQueryId,
    pub job_id: JobId,
    pub hypothesis_signature: String,
    pub query_text: String,
    pub resolved_domain: Option<String>,
    pub status: SearchQueryStatus,
    pub reputation_score: i64,
    pub config_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only execution log of one search query run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryRun {
    pub id: SearchRunId,
    pub search_query_id: SearchQueryId,
    pub job_id: JobId,
    pub provider_used: String,
    pub reason: String,
    pub fetched_paper_ids: Vec<PaperId>,
    pub accepted_paper_ids: Vec<PaperId>,
    pub rejected_paper_ids: Vec<PaperId>,
    /// Set exactly once, after the next decision result exists.
    pub signal_delta: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of one decision cycle. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub id: DecisionId,
    pub job_id: JobId,
    pub decision_label: DecisionLabel,
    pub provider_used: String,
    pub measurements_snapshot: serde_json::Value,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome record for verification jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: i64,
    pub job_id: JobId,
    pub source: String,
    pub target: String,
    pub connection_found: Option<bool>,
    pub connection_type: Option<String>,
    pub path: Vec<String>,
    pub explanation: String,
    pub supporting_papers: Vec<PaperId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promising_requires_evidence_only_rejection() {
        let mut h = Hypothesis {
            id: HypothesisId(1),
            job_id: JobId(1),
            source: "a".into(),
            target: "c".into(),
            path: vec!["a".into(), "b".into(), "c".into()],
            predicates: vec!["inhibits".into()],
            explanation: String::new(),
            confidence: 1,
            mode: ReasoningMode::Explore,
            passed_filter: false,
            filter_reason: Some(BTreeMap::from([(
                "evidence_threshold".to_string(),
                "Confidence 1 < 2".to_string(),
            )])),
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        };
        assert!(h.is_promising());

        h.filter_reason.as_mut().unwrap().insert(
            "hub_suppression".to_string(),
            "Node 'b' has degree 80 > 50".to_string(),
        );
        assert!(!h.is_promising());

        h.passed_filter = true;
        h.filter_reason = None;
        assert!(!h.is_promising());
    }

    #[test]
    fn source_refs_parse_back_to_ids() {
        let src = IngestionSource {
            id: SourceId(1),
            job_id: JobId(1),
            source_type: SourceType::PaperAbstract,
            source_ref: "paper:42".to_string(),
            raw_text: String::new(),
            processed: false,
            created_at: Utc::now(),
        };
        assert_eq!(src.paper_ref(), Some(PaperId(42)));
        assert_eq!(src.file_ref(), None);
    }

    #[test]
    fn intermediates_exclude_endpoints() {
        let h = Hypothesis {
            id: HypothesisId(1),
            job_id: JobId(1),
            source: "a".into(),
            target: "d".into(),
            path: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            predicates: vec![],
            explanation: String::new(),
            confidence: 3,
            mode: ReasoningMode::Explore,
            passed_filter: true,
            filter_reason: None,
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        };
        assert_eq!(h.intermediates(), &["b".to_string(), "c".to_string()]);
    }
}
