//! Core identifiers and enumerations shared across the engine.

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::*;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Dense identifier of a job (the root aggregate).
    JobId
);
row_id!(
    /// Identifier of an uploaded or downloaded file artifact.
    FileId
);
row_id!(
    /// Identifier of an ingestion source (one unit of text to ingest).
    SourceId
);
row_id!(
    /// Identifier of a text block sliced from an ingestion source.
    BlockId
);
row_id!(
    /// Identifier of an extracted (subject, predicate, object) triple.
    TripleId
);
row_id!(
    /// Identifier of a versioned semantic graph snapshot.
    GraphId
);
row_id!(
    /// Identifier of a persisted hypothesis row.
    HypothesisId
);
row_id!(
    /// Identifier of a canonical paper record (global, shared across jobs).
    PaperId
);
row_id!(
    /// Identifier of a search query (stable intent per hypothesis endpoints).
    SearchQueryId
);
row_id!(
    /// Identifier of a search query run (append-only execution log entry).
    SearchRunId
);
row_id!(
    /// Identifier of a decision result snapshot.
    DecisionId
);
row_id!(
    /// Identifier of the user owning a job (presentation channel key).
    UserId
);

/// Job operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    #[default]
    Discovery,
    Verification,
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Discovery => write!(f, "discovery"),
            JobMode::Verification => write!(f, "verification"),
        }
    }
}

/// Wire-visible job status. Each value corresponds to exactly one stage
/// handler (or a terminal / awaiting-input state with none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    ReadyToIngest,
    Ingested,
    TriplesExtracted,
    StructuralGraphBuilt,
    GraphSanitized,
    GraphSemanticMerged,
    PathReasoningDone,
    DecisionMade,
    FetchQueued,
    DownloadQueued,
    NeedMoreInput,
    WaitingForUser,
    NeedsExpertReview,
    ManualReview,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::ReadyToIngest => "READY_TO_INGEST",
            JobStatus::Ingested => "INGESTED",
            JobStatus::TriplesExtracted => "TRIPLES_EXTRACTED",
            JobStatus::StructuralGraphBuilt => "STRUCTURAL_GRAPH_BUILT",
            JobStatus::GraphSanitized => "GRAPH_SANITIZED",
            JobStatus::GraphSemanticMerged => "GRAPH_SEMANTIC_MERGED",
            JobStatus::PathReasoningDone => "PATH_REASONING_DONE",
            JobStatus::DecisionMade => "DECISION_MADE",
            JobStatus::FetchQueued => "FETCH_QUEUED",
            JobStatus::DownloadQueued => "DOWNLOAD_QUEUED",
            JobStatus::NeedMoreInput => "NEED_MORE_INPUT",
            JobStatus::WaitingForUser => "WAITING_FOR_USER",
            JobStatus::NeedsExpertReview => "NEEDS_EXPERT_REVIEW",
            JobStatus::ManualReview => "MANUAL_REVIEW",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        Some(match s {
            "CREATED" => JobStatus::Created,
            "READY_TO_INGEST" => JobStatus::ReadyToIngest,
            "INGESTED" => JobStatus::Ingested,
            "TRIPLES_EXTRACTED" => JobStatus::TriplesExtracted,
            "STRUCTURAL_GRAPH_BUILT" => JobStatus::StructuralGraphBuilt,
            "GRAPH_SANITIZED" => JobStatus::GraphSanitized,
            "GRAPH_SEMANTIC_MERGED" => JobStatus::GraphSemanticMerged,
            "PATH_REASONING_DONE" => JobStatus::PathReasoningDone,
            "DECISION_MADE" => JobStatus::DecisionMade,
            "FETCH_QUEUED" => JobStatus::FetchQueued,
            "DOWNLOAD_QUEUED" => JobStatus::DownloadQueued,
            "NEED_MORE_INPUT" => JobStatus::NeedMoreInput,
            "WAITING_FOR_USER" => JobStatus::WaitingForUser,
            "NEEDS_EXPERT_REVIEW" => JobStatus::NeedsExpertReview,
            "MANUAL_REVIEW" => JobStatus::ManualReview,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            _ => return None,
        })
    }

    /// Terminal statuses stop automatic progression for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses that pause the pipeline until new user input arrives.
    pub fn is_awaiting_input(&self) -> bool {
        matches!(
            self,
            JobStatus::NeedMoreInput
                | JobStatus::WaitingForUser
                | JobStatus::NeedsExpertReview
                | JobStatus::ManualReview
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed decision space produced by the decision providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLabel {
    InsufficientSignal,
    HaltConfident,
    HaltNoHypothesis,
    FetchMoreLiterature,
    StrategicDownloadTargeted,
    VerificationFound,
    VerificationNotFound,
}

impl DecisionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionLabel::InsufficientSignal => "insufficient_signal",
            DecisionLabel::HaltConfident => "halt_confident",
            DecisionLabel::HaltNoHypothesis => "halt_no_hypothesis",
            DecisionLabel::FetchMoreLiterature => "fetch_more_literature",
            DecisionLabel::StrategicDownloadTargeted => "strategic_download_targeted",
            DecisionLabel::VerificationFound => "verification_found",
            DecisionLabel::VerificationNotFound => "verification_not_found",
        }
    }

    pub fn parse(s: &str) -> Option<DecisionLabel> {
        let s = s.trim().to_lowercase();
        Self::all().into_iter().find(|d| d.as_str() == s)
    }

    pub fn all() -> [DecisionLabel; 7] {
        [
            DecisionLabel::InsufficientSignal,
            DecisionLabel::HaltConfident,
            DecisionLabel::HaltNoHypothesis,
            DecisionLabel::FetchMoreLiterature,
            DecisionLabel::StrategicDownloadTargeted,
            DecisionLabel::VerificationFound,
            DecisionLabel::VerificationNotFound,
        ]
    }

    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            DecisionLabel::VerificationFound | DecisionLabel::VerificationNotFound
        )
    }
}

impl std::fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification labels for inbound chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassifierLabel {
    ResearchSeed,
    EvidenceInput,
    ClarificationConstraint,
    ExpertGuidance,
    GraphQuery,
    Conversational,
}

impl ClassifierLabel {
    pub fn parse(s: &str) -> Option<ClassifierLabel> {
        Some(match s.trim().to_uppercase().as_str() {
            "RESEARCH_SEED" => ClassifierLabel::ResearchSeed,
            "EVIDENCE_INPUT" => ClassifierLabel::EvidenceInput,
            "CLARIFICATION_CONSTRAINT" => ClassifierLabel::ClarificationConstraint,
            "EXPERT_GUIDANCE" => ClassifierLabel::ExpertGuidance,
            "GRAPH_QUERY" => ClassifierLabel::GraphQuery,
            "CONVERSATIONAL" => ClassifierLabel::Conversational,
            _ => return None,
        })
    }
}

/// Pipeline phase names used by the presentation event contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelinePhase {
    Creation,
    Ingestion,
    Triples,
    Graph,
    #[serde(rename = "PATHREASONING")]
    PathReasoning,
    Decision,
    Fetch,
    Download,
}

/// Lifecycle status of a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchQueryStatus {
    #[default]
    New,
    Reusable,
    Exhausted,
    Blocked,
}

impl SearchQueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchQueryStatus::New => "new",
            SearchQueryStatus::Reusable => "reusable",
            SearchQueryStatus::Exhausted => "exhausted",
            SearchQueryStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<SearchQueryStatus> {
        Some(match s {
            "new" => SearchQueryStatus::New,
            "reusable" => SearchQueryStatus::Reusable,
            "exhausted" => SearchQueryStatus::Exhausted,
            "blocked" => SearchQueryStatus::Blocked,
            _ => return None,
        })
    }
}

/// Kind of text carried by an ingestion source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    UserText,
    PdfText,
    PaperAbstract,
    ApiText,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UserText => "user_text",
            SourceType::PdfText => "pdf_text",
            SourceType::PaperAbstract => "paper_abstract",
            SourceType::ApiText => "api_text",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        Some(match s {
            "user_text" => SourceType::UserText,
            "pdf_text" => SourceType::PdfText,
            "paper_abstract" => SourceType::PaperAbstract,
            "api_text" => SourceType::ApiText,
            _ => return None,
        })
    }
}

/// Provenance of a stored file artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOrigin {
    UserUpload,
    PaperDownload,
}

impl FileOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOrigin::UserUpload => "user_upload",
            FileOrigin::PaperDownload => "paper_download",
        }
    }

    pub fn parse(s: &str) -> Option<FileOrigin> {
        Some(match s {
            "user_upload" => FileOrigin::UserUpload,
            "paper_download" => FileOrigin::PaperDownload,
            _ => return None,
        })
    }
}

/// Reasoning mode for path enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    #[default]
    Explore,
    Query,
}

impl ReasoningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningMode::Explore => "explore",
            ReasoningMode::Query => "query",
        }
    }
}

/// Node classification assigned during graph sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Concept,
    Entity,
    Metadata,
    Citation,
    Noise,
}

impl NodeType {
    /// Node types that disqualify a path during reasoning.
    pub fn blocks_paths(&self) -> bool {
        matches!(self, NodeType::Metadata | NodeType::Citation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_form() {
        for s in [
            JobStatus::Created,
            JobStatus::ReadyToIngest,
            JobStatus::GraphSemanticMerged,
            JobStatus::DecisionMade,
            JobStatus::FetchQueued,
            JobStatus::NeedsExpertReview,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("NOT_A_STATUS"), None);
    }

    #[test]
    fn terminal_and_awaiting_partition() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::NeedMoreInput.is_awaiting_input());
        assert!(!JobStatus::Ingested.is_terminal());
        assert!(!JobStatus::Ingested.is_awaiting_input());
    }

    #[test]
    fn decision_labels_parse_case_insensitively() {
        assert_eq!(
            DecisionLabel::parse("HALT_CONFIDENT"),
            Some(DecisionLabel::HaltConfident)
        );
        assert_eq!(
            DecisionLabel::parse("strategic_download_targeted"),
            Some(DecisionLabel::StrategicDownloadTargeted)
        );
        assert_eq!(DecisionLabel::parse("ship_it"), None);
    }

    #[test]
    fn decision_label_serde_uses_snake_case() {
        let json = serde_json::to_string(&DecisionLabel::HaltNoHypothesis).unwrap();
        assert_eq!(json, "\"halt_no_hypothesis\"");
    }
}
