//! Inbound text handling: classification and ingestion-source creation.
//!
//! Chat messages are classified by the LLM into a closed label set with a
//! JSON `{label, payload}` contract; any parsing failure falls back to
//! CONVERSATIONAL. Each label has a handler that prepares job state —
//! seeds, evidence sources, constraints, expert guidance — before the
//! pipeline takes over.

use std::sync::Arc;

use crate::llm::{GenerateOptions, LlmProvider};
use crate::store::{MessageRole, MessageType, SqliteStore};
use crate::types::{ClassifierLabel, EngineError, FileOrigin, JobId, JobStatus, SourceType};

const CLASSIFIER_PROMPT: &str = "Classify the user's message for a literature-review assistant.\n\
Labels:\n\
- RESEARCH_SEED: a topic or question to investigate\n\
- EVIDENCE_INPUT: pasted text/evidence to ingest\n\
- CLARIFICATION_CONSTRAINT: narrows or constrains the current investigation\n\
- EXPERT_GUIDANCE: domain expertise (assumptions, preferred relations, exclusions)\n\
- GRAPH_QUERY: a question about the current knowledge graph\n\
- CONVERSATIONAL: anything else\n\n\
Respond with JSON only: {\"label\": \"...\", \"payload\": {\"raw_text\": \"...\"}}\n\n\
Message:\n{text}";

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: ClassifierLabel,
    pub payload: serde_json::Value,
}

pub struct TextClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl TextClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn fallback(text: &str, reason: &str) -> ClassificationResult {
        tracing::warn!("Classification fallback: {reason}");
        ClassificationResult {
            label: ClassifierLabel::Conversational,
            payload: serde_json::json!({ "raw_text": text }),
        }
    }

    pub async fn classify(&self, text: &str) -> ClassificationResult {
        if text.trim().is_empty() {
            return Self::fallback(text, "empty input");
        }

        let prompt = CLASSIFIER_PROMPT.replace("{text}", text);
        let response = match self
            .llm
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.0))
            .await
        {
            Ok(r) => r,
            Err(e) => return Self::fallback(text, &format!("LLM failed: {e}")),
        };

        // Tolerate markdown fences the model sometimes wraps JSON in.
        let mut body = response.trim();
        if let Some(stripped) = body.strip_prefix("```") {
            body = stripped.trim_start_matches("json").trim();
            if let Some(end) = body.rfind("```") {
                body = body[..end].trim();
            }
        }

        let parsed: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => return Self::fallback(text, &format!("unparseable JSON: {e}")),
        };
        let label_str = parsed.get("label").and_then(|l| l.as_str()).unwrap_or("");
        let Some(label) = ClassifierLabel::parse(label_str) else {
            return Self::fallback(text, &format!("invalid label {label_str:?}"));
        };
        let payload = parsed
            .get("payload")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "raw_text": text }));

        ClassificationResult { label, payload }
    }
}

/// Entry points that create ingestion sources and move the job to
/// READY_TO_INGEST. These run outside the dispatcher, before the pipeline
/// owns the job, so they write status directly.
pub struct InputHandler {
    store: Arc<SqliteStore>,
}

impl InputHandler {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub async fn add_user_text(&self, job_id: JobId, text: &str) -> Result<(), EngineError> {
        self.store.load_job(job_id).await?;
        let source_ref = format!("user_text_{}", chrono::Utc::now().timestamp_micros());
        self.store
            .create_source(job_id, SourceType::UserText, &source_ref, text)
            .await?;
        self.store.set_status(job_id, JobStatus::ReadyToIngest).await?;
        tracing::info!("User text ({} chars) added to job {job_id}", text.len());
        Ok(())
    }

    pub async fn add_uploaded_file(
        &self,
        job_id: JobId,
        stored_path: &str,
        original_filename: &str,
        raw_text: &str,
        file_type: &str,
    ) -> Result<(), EngineError> {
        self.store.load_job(job_id).await?;
        let file = self
            .store
            .create_file(
                job_id,
                None,
                FileOrigin::UserUpload,
                stored_path,
                file_type,
                original_filename,
            )
            .await?;
        let source_type = if file_type == "pdf" {
            SourceType::PdfText
        } else {
            SourceType::ApiText
        };
        self.store
            .create_source(job_id, source_type, &format!("file:{}", file.id), raw_text)
            .await?;
        self.store.set_status(job_id, JobStatus::ReadyToIngest).await?;
        tracing::info!("Uploaded file {original_filename} added to job {job_id}");
        Ok(())
    }

    pub async fn add_paper_abstract(
        &self,
        job_id: JobId,
        paper_id: crate::types::PaperId,
        abstract_text: &str,
    ) -> Result<(), EngineError> {
        self.store.load_job(job_id).await?;
        self.store
            .get_paper(paper_id)
            .await?
            .ok_or(crate::types::StoreError::PaperNotFound(paper_id))?;
        self.store
            .create_source(
                job_id,
                SourceType::PaperAbstract,
                &format!("paper:{paper_id}"),
                abstract_text,
            )
            .await?;
        self.store.set_status(job_id, JobStatus::ReadyToIngest).await?;
        Ok(())
    }
}

/// Apply a classified message to job state. Returns whether the job
/// should be enqueued for pipeline work.
pub async fn apply_classification(
    store: &Arc<SqliteStore>,
    job_id: JobId,
    result: &ClassificationResult,
    raw_text: &str,
) -> Result<bool, EngineError> {
    store
        .append_message(job_id, MessageRole::User, MessageType::Text, raw_text)
        .await?;

    let payload_text = result
        .payload
        .get("raw_text")
        .and_then(|t| t.as_str())
        .unwrap_or(raw_text);

    match result.label {
        ClassifierLabel::ResearchSeed => {
            store.set_seed_text(job_id, payload_text).await?;
            // The seed itself is ingested so reasoning has the user's
            // entities in the graph from the first cycle.
            InputHandler::new(store.clone())
                .add_user_text(job_id, payload_text)
                .await?;
            Ok(true)
        }
        ClassifierLabel::EvidenceInput => {
            InputHandler::new(store.clone())
                .add_user_text(job_id, payload_text)
                .await?;
            Ok(true)
        }
        ClassifierLabel::ClarificationConstraint => {
            let job = store.load_job(job_id).await?;
            let mut config = job.config.clone();
            config.focus_areas.push(payload_text.to_string());
            store.update_job_config(job_id, &config).await?;
            store
                .append_message(
                    job_id,
                    MessageRole::System,
                    MessageType::Status,
                    "Constraint recorded",
                )
                .await?;
            // A paused job resumes with the new constraint.
            Ok(job.status.is_awaiting_input())
        }
        ClassifierLabel::ExpertGuidance => {
            let job = store.load_job(job_id).await?;
            let mut config = job.config.clone();
            config.expert_settings.assumptions.push(payload_text.to_string());
            store.update_job_config(job_id, &config).await?;
            store
                .append_message(
                    job_id,
                    MessageRole::System,
                    MessageType::Status,
                    "Expert guidance recorded",
                )
                .await?;
            Ok(job.status.is_awaiting_input())
        }
        ClassifierLabel::GraphQuery | ClassifierLabel::Conversational => {
            store
                .append_message(
                    job_id,
                    MessageRole::System,
                    MessageType::Event,
                    &format!("{:?} message logged", result.label),
                )
                .await?;
            Ok(false)
        }
    }
}
