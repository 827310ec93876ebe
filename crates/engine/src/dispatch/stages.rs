//! The stage handlers wiring pipeline components to the dispatcher.
//!
//! Stage graph:
//! CREATED → READY_TO_INGEST → INGESTED → TRIPLES_EXTRACTED →
//! STRUCTURAL_GRAPH_BUILT → GRAPH_SANITIZED → GRAPH_SEMANTIC_MERGED →
//! PATH_REASONING_DONE → DECISION_MADE → (handler-chosen status), with
//! FETCH_QUEUED and DOWNLOAD_QUEUED looping back to READY_TO_INGEST.

use async_trait::async_trait;
use std::sync::Arc;

use super::{StageHandler, StageOutcome};
use crate::config::AdminPolicy;
use crate::decide::handlers::{HandlerContext, HandlerRegistry};
use crate::decide::DecisionController;
use crate::domains::DomainResolver;
use crate::embed::Embedder;
use crate::events::PresentationEvent;
use crate::fetch::{FetchService, PaperDownloader};
use crate::graph::{self, GraphCache, SemanticGraph};
use crate::ingest::IngestionService;
use crate::llm::LlmProvider;
use crate::measure::{self, Measurements, VerificationOutcome};
use crate::reasoning::{self, filter, ReasoningOptions};
use crate::store::{Job, SqliteStore};
use crate::triples::TripleExtractor;
use crate::types::{
    EngineError, JobMode, JobStatus, PipelinePhase, ReasoningMode, StageError,
};

/// Shared services injected into every stage.
pub struct EngineContext {
    pub store: Arc<SqliteStore>,
    pub policy: Arc<AdminPolicy>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub embedder: Arc<dyn Embedder>,
    pub cache: Arc<GraphCache>,
    pub fetch: Arc<FetchService>,
    pub downloader: Arc<PaperDownloader>,
    pub controller: Arc<DecisionController>,
    pub decision_handlers: Arc<HandlerRegistry>,
}

impl EngineContext {
    fn require_llm(&self, job: &Job, stage: &'static str) -> Result<Arc<dyn LlmProvider>, EngineError> {
        self.llm.clone().ok_or_else(|| {
            EngineError::Stage(StageError::Execution {
                job_id: job.id,
                stage,
                reason: "no LLM provider configured".to_string(),
            })
        })
    }

    fn domain_resolver(&self, job: &Job) -> DomainResolver {
        DomainResolver::new(self.policy.domains.clone(), self.llm.clone())
            .with_override(job.config.domain.clone())
    }
}

/// Build the full standard stage set.
pub fn standard_stages(ctx: Arc<EngineContext>) -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(CreatedStage { ctx: ctx.clone() }),
        Arc::new(IngestStage { ctx: ctx.clone() }),
        Arc::new(TriplesStage { ctx: ctx.clone() }),
        Arc::new(StructuralStage { ctx: ctx.clone() }),
        Arc::new(SanitizeStage { ctx: ctx.clone() }),
        Arc::new(MergeStage { ctx: ctx.clone() }),
        Arc::new(PathReasoningStage { ctx: ctx.clone() }),
        Arc::new(DecideStage { ctx: ctx.clone() }),
        Arc::new(DecisionHandlerStage { ctx: ctx.clone() }),
        Arc::new(FetchStage { ctx: ctx.clone() }),
        Arc::new(DownloadStage { ctx }),
    ]
}

fn event(job: &Job, phase: PipelinePhase) -> PresentationEvent {
    PresentationEvent::new(job.id, job.mode, phase)
}

// ── CREATED ─────────────────────────────────────────────────────────

/// A freshly created job waits for input; once sources exist it moves to
/// ingestion. The per-file extraction fan-out happened when the files were
/// registered, so fan-in here is just the presence check.
struct CreatedStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for CreatedStage {
    fn name(&self) -> &'static str {
        "created"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::Created
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let pending = self.ctx.store.unprocessed_sources(job.id).await?;
        if pending.is_empty() {
            tracing::debug!("Job {} has no sources yet; waiting for input", job.id);
            return Ok(StageOutcome {
                new_status: JobStatus::Created,
                reenqueue: false,
                event: None,
            });
        }
        Ok(StageOutcome {
            new_status: JobStatus::ReadyToIngest,
            reenqueue: true,
            event: Some(
                event(job, PipelinePhase::Creation)
                    .with_result(serde_json::json!({ "sources": pending.len() })),
            ),
        })
    }
}

// ── READY_TO_INGEST → INGESTED ──────────────────────────────────────

struct IngestStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::ReadyToIngest
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let service = IngestionService::new(
            self.ctx.store.clone(),
            self.ctx.llm.clone(),
            self.ctx.policy.clone(),
        );
        let summary = service.ingest_job(job.id).await?;
        Ok(StageOutcome {
            new_status: JobStatus::Ingested,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Ingestion).with_result(serde_json::json!({
                "sources_processed": summary.sources_processed,
                "blocks_created": summary.blocks_created,
            }))),
        })
    }
}

// ── INGESTED → TRIPLES_EXTRACTED ────────────────────────────────────

struct TriplesStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for TriplesStage {
    fn name(&self) -> &'static str {
        "triples"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::Ingested
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let llm = self.ctx.require_llm(job, "triples")?;
        let extractor = TripleExtractor::new(llm);
        let summary = extractor.process_job(&self.ctx.store, job.id).await?;
        Ok(StageOutcome {
            new_status: JobStatus::TriplesExtracted,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Triples).with_result(serde_json::json!({
                "blocks_processed": summary.blocks_processed,
                "triples_created": summary.triples_created,
            }))),
        })
    }
}

// ── TRIPLES_EXTRACTED → STRUCTURAL_GRAPH_BUILT ──────────────────────

struct StructuralStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for StructuralStage {
    fn name(&self) -> &'static str {
        "structural"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::TriplesExtracted
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let triples = self.ctx.store.triples_for_job(job.id).await?;
        let projected = graph::structural::project_structural_graph(&triples);
        tracing::info!(
            "Job {}: structural projection of {} triples → {} nodes / {} edges",
            job.id,
            triples.len(),
            projected.node_count(),
            projected.edge_count()
        );
        self.ctx.cache.set(job.id, projected.clone());
        Ok(StageOutcome {
            new_status: JobStatus::StructuralGraphBuilt,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Graph).with_result(serde_json::json!({
                "phase": "structural",
                "total_triples": triples.len(),
                "nodes": projected.node_count(),
                "edges": projected.edge_count(),
            }))),
        })
    }
}

// ── STRUCTURAL_GRAPH_BUILT → GRAPH_SANITIZED ────────────────────────

struct SanitizeStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for SanitizeStage {
    fn name(&self) -> &'static str {
        "sanitize"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::StructuralGraphBuilt
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let Some(cached) = self.ctx.cache.get(job.id) else {
            return Err(EngineError::Stage(StageError::Precondition {
                job_id: job.id,
                stage: "sanitize",
                reason: "structural graph missing from cache".to_string(),
            }));
        };
        let sanitized = graph::sanitize::sanitize_graph(&cached, &self.ctx.policy.graph_rules);
        let removed = sanitized.removed_nodes.len();
        self.ctx.cache.set(job.id, sanitized.clone());
        Ok(StageOutcome {
            new_status: JobStatus::GraphSanitized,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Graph).with_result(serde_json::json!({
                "phase": "sanitized",
                "nodes": sanitized.node_count(),
                "edges": sanitized.edge_count(),
                "removed_nodes": removed,
            }))),
        })
    }
}

// ── GRAPH_SANITIZED → GRAPH_SEMANTIC_MERGED ─────────────────────────

struct MergeStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for MergeStage {
    fn name(&self) -> &'static str {
        "merge"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::GraphSanitized
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let Some(sanitized) = self.ctx.cache.get(job.id) else {
            return Err(EngineError::Stage(StageError::Precondition {
                job_id: job.id,
                stage: "merge",
                reason: "sanitized graph missing from cache".to_string(),
            }));
        };
        let merged = graph::merge::merge_semantically(
            &sanitized,
            self.ctx.embedder.clone(),
            self.ctx.policy.graph_merging.similarity_threshold,
        )
        .await?;

        let record = self.ctx.store.persist_semantic_graph(job.id, &merged).await?;
        // Consumed: the next stages read the persisted active graph.
        self.ctx.cache.delete(job.id);

        Ok(StageOutcome {
            new_status: JobStatus::GraphSemanticMerged,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Graph).with_result(serde_json::json!({
                "phase": "semantic",
                "version": record.version,
                "nodes": record.node_count,
                "edges": record.edge_count,
            }))),
        })
    }
}

// ── GRAPH_SEMANTIC_MERGED → PATH_REASONING_DONE ─────────────────────

struct PathReasoningStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for PathReasoningStage {
    fn name(&self) -> &'static str {
        "path_reasoning"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::GraphSemanticMerged
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let Some(record) = self.ctx.store.active_semantic_graph(job.id).await? else {
            return Err(EngineError::Stage(StageError::Precondition {
                job_id: job.id,
                stage: "path_reasoning",
                reason: "no active semantic graph".to_string(),
            }));
        };

        let mut stoplist = self.ctx.policy.graph_rules.stoplist.clone();
        stoplist.extend(job.config.path_reasoning.stoplist.iter().cloned());
        // Expert exclusions behave like stoplisted intermediates.
        stoplist.extend(job.config.expert_settings.excluded_entities.iter().cloned());

        let options = match (&job.mode, &job.verification_pair) {
            (JobMode::Verification, Some((source, target))) => ReasoningOptions {
                mode: ReasoningMode::Query,
                seeds: vec![source.clone(), target.clone()],
                stoplist,
                allow_len3: job.config.path_reasoning.allow_len3,
                max_hops: job.config.path_reasoning.max_hops,
            },
            _ => ReasoningOptions {
                mode: ReasoningMode::Explore,
                seeds: job.config.path_reasoning.seeds.clone(),
                stoplist,
                allow_len3: job.config.path_reasoning.allow_len3,
                max_hops: job.config.path_reasoning.max_hops,
            },
        };

        let mut hypotheses = reasoning::run_path_reasoning(&record.graph, &options);
        filter::filter_hypotheses(&mut hypotheses, &record.graph, &self.ctx.policy.graph_rules);
        for h in hypotheses.iter_mut() {
            h.domain = job.config.domain.clone();
        }

        let passed = hypotheses.iter().filter(|h| h.passed_filter).count();
        let inserted = self.ctx.store.replace_hypotheses(job.id, &hypotheses).await?;
        tracing::info!(
            "Job {}: path reasoning produced {inserted} hypotheses, {passed} passed",
            job.id
        );

        Ok(StageOutcome {
            new_status: JobStatus::PathReasoningDone,
            reenqueue: true,
            event: Some(
                event(job, PipelinePhase::PathReasoning).with_result(serde_json::json!({
                    "mode": options.mode.as_str(),
                    "hypotheses_count": inserted,
                    "passed": passed,
                })),
            ),
        })
    }
}

// ── PATH_REASONING_DONE → DECISION_MADE ─────────────────────────────

struct DecideStage {
    ctx: Arc<EngineContext>,
}

impl DecideStage {
    /// Verification outcome: is the entity pair connected in the current
    /// graph, directly or through an enumerated hypothesis?
    fn verification_outcome(
        graph: &SemanticGraph,
        hypotheses: &[crate::store::Hypothesis],
        source: &str,
        target: &str,
    ) -> Option<VerificationOutcome> {
        if graph.has_edge(source, target) || graph.has_edge(target, source) {
            return Some(VerificationOutcome {
                found: true,
                connection_type: "direct".to_string(),
                path: vec![source.to_string(), target.to_string()],
                explanation: format!("'{source}' and '{target}' are directly linked"),
            });
        }
        let connecting = hypotheses.iter().filter(|h| h.passed_filter).find(|h| {
            (h.source == source && h.target == target)
                || (h.source == target && h.target == source)
        })?;
        Some(VerificationOutcome {
            found: true,
            connection_type: "indirect".to_string(),
            path: connecting.path.clone(),
            explanation: connecting.explanation.clone(),
        })
    }
}

#[async_trait]
impl StageHandler for DecideStage {
    fn name(&self) -> &'static str {
        "decide"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::PathReasoningDone
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let Some(record) = self.ctx.store.active_semantic_graph(job.id).await? else {
            return Err(EngineError::Stage(StageError::Precondition {
                job_id: job.id,
                stage: "decide",
                reason: "no active semantic graph".to_string(),
            }));
        };
        let hypotheses = self.ctx.store.active_hypotheses(job.id).await?;
        let previous = self.ctx.store.latest_decision(job.id).await?;
        let previous_measurements = previous
            .as_ref()
            .and_then(|d| Measurements::from_snapshot(&d.measurements_snapshot));

        let measurements = match (&job.mode, &job.verification_pair) {
            (JobMode::Verification, Some((source, target))) => {
                let remaining_new = self
                    .ctx
                    .store
                    .count_queries_with_status(job.id, crate::types::SearchQueryStatus::New)
                    .await?;
                let outcome =
                    Self::verification_outcome(&record.graph, &hypotheses, source, target);
                measure::compute_verification(remaining_new, outcome.as_ref())
            }
            _ => measure::compute(
                &record.graph,
                &hypotheses,
                &self.ctx.policy.decision,
                &self.ctx.policy.indirect_path,
                previous_measurements.as_ref(),
            ),
        };

        let outcome = self
            .ctx
            .controller
            .decide(&measurements, job.mode, &self.ctx.policy.decision)
            .await;
        tracing::info!("Job {}: decision {}", job.id, outcome.label);

        let decision = self
            .ctx
            .store
            .record_decision(
                job.id,
                outcome.label,
                &outcome.provider_used,
                &measurements.to_snapshot(),
                outcome.fallback_used,
                outcome.fallback_reason.as_deref(),
            )
            .await?;

        // Learning loop: attribute runs in the window that just closed,
        // then refresh impact scores so strategic downloads rank on
        // current evidence.
        crate::signals::evaluate_pending_runs(
            &self.ctx.store,
            job.id,
            &decision,
            &self.ctx.policy.signals,
        )
        .await?;
        crate::signals::calculate_impact_scores(&self.ctx.store, job.id).await?;

        Ok(StageOutcome {
            new_status: JobStatus::DecisionMade,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Decision).with_result(serde_json::json!({
                "decision_label": decision.decision_label,
                "provider_used": decision.provider_used,
            }))),
        })
    }
}

// ── DECISION_MADE → handler-chosen status ───────────────────────────

struct DecisionHandlerStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for DecisionHandlerStage {
    fn name(&self) -> &'static str {
        "decision_handler"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::DecisionMade
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let Some(decision) = self.ctx.store.latest_decision(job.id).await? else {
            return Err(EngineError::Stage(StageError::Precondition {
                job_id: job.id,
                stage: "decision_handler",
                reason: "no decision result persisted".to_string(),
            }));
        };
        let Some(handler) = self.ctx.decision_handlers.get(decision.decision_label) else {
            return Err(EngineError::Internal(format!(
                "no handler for decision {}",
                decision.decision_label
            )));
        };

        let graph = self
            .ctx
            .store
            .active_semantic_graph(job.id)
            .await?
            .map(|r| r.graph)
            .unwrap_or_default();
        let hypotheses = self.ctx.store.active_hypotheses(job.id).await?;
        let measurements =
            Measurements::from_snapshot(&decision.measurements_snapshot).unwrap_or_default();

        let handler_ctx = HandlerContext {
            job: job.clone(),
            decision: decision.clone(),
            measurements,
            graph,
            hypotheses,
            store: self.ctx.store.clone(),
            policy: self.ctx.policy.clone(),
        };
        let outcome = handler.handle(&handler_ctx).await?;
        tracing::info!(
            "Job {}: handler {} → {} ({})",
            job.id,
            decision.decision_label,
            outcome.new_status,
            outcome.message
        );

        Ok(StageOutcome {
            new_status: outcome.new_status,
            reenqueue: outcome.reenqueue,
            event: outcome.event,
        })
    }
}

// ── FETCH_QUEUED → READY_TO_INGEST ──────────────────────────────────

struct FetchStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for FetchStage {
    fn name(&self) -> &'static str {
        "fetch"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::FetchQueued
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let hypotheses = self.ctx.store.active_hypotheses(job.id).await?;
        let domains = self.ctx.domain_resolver(job);
        let summary = self
            .ctx
            .fetch
            .execute_fetch_more(job.id, &hypotheses, &domains)
            .await?;

        Ok(StageOutcome {
            new_status: JobStatus::ReadyToIngest,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Fetch).with_result(serde_json::json!({
                "queries_executed": summary.queries_executed,
                "papers_fetched": summary.papers_fetched_new,
                "papers_accepted": summary.papers_accepted,
                "papers_rejected": summary.papers_rejected,
                "sources_created": summary.sources_created,
            }))),
        })
    }
}

// ── DOWNLOAD_QUEUED → READY_TO_INGEST ───────────────────────────────

struct DownloadStage {
    ctx: Arc<EngineContext>,
}

#[async_trait]
impl StageHandler for DownloadStage {
    fn name(&self) -> &'static str {
        "download"
    }
    fn handles(&self) -> JobStatus {
        JobStatus::DownloadQueued
    }

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
        let summary = self.ctx.downloader.process_job_downloads(job.id).await?;
        Ok(StageOutcome {
            new_status: JobStatus::ReadyToIngest,
            reenqueue: true,
            event: Some(event(job, PipelinePhase::Download).with_result(serde_json::json!({
                "downloaded": summary.downloaded,
                "skipped": summary.skipped,
                "sources_created": summary.sources_created,
            }))),
        })
    }
}
