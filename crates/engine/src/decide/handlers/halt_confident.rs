//! Finalization on a confident decision.
//!
//! Selects the dominant hypothesis pair and top-K alternatives, projects
//! the active hypotheses onto a graph subview, gathers every ledger paper
//! and the dominant pair's evidence snippets, stores the whole package in
//! the job result, and completes the job.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;

use super::{
    group_top_pairs, project_hypotheses_to_graph, resolve_evidence_snippets, DecisionHandler,
    HandlerContext, HandlerOutcome,
};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase, TripleId};

pub struct HaltConfidentHandler;

#[async_trait]
impl DecisionHandler for HaltConfidentHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::HaltConfident
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        let measurements = &ctx.measurements;

        // Dominant pair comes from the measurements; when the snapshot has
        // none (single-hypothesis dominance), fall back to the top group.
        let dominant_pair = measurements.dominant_pair_id.clone().or_else(|| {
            group_top_pairs(&ctx.hypotheses, 1, None)
                .first()
                .map(|g| (g.source.clone(), g.target.clone()))
        });

        let dominant = dominant_pair.as_ref().and_then(|pair| {
            group_top_pairs(&ctx.hypotheses, usize::MAX, None)
                .into_iter()
                .find(|g| g.source == pair.0 && g.target == pair.1)
        });

        let limit = ctx.policy.decision.top_k_hypotheses_to_store;
        let alternatives = group_top_pairs(&ctx.hypotheses, limit, dominant_pair.as_ref());

        let projected = project_hypotheses_to_graph(&ctx.graph, &ctx.hypotheses);

        // Evidence: union of the dominant pair's triple provenance.
        let evidence = match &dominant_pair {
            Some(pair) => {
                let triple_ids: BTreeSet<TripleId> = ctx
                    .hypotheses
                    .iter()
                    .filter(|h| h.source == pair.0 && h.target == pair.1)
                    .flat_map(|h| h.triple_ids.iter().copied())
                    .collect();
                let ids: Vec<TripleId> = triple_ids.into_iter().collect();
                resolve_evidence_snippets(&ctx.store, &ids).await?
            }
            None => Vec::new(),
        };

        let evidence_rows = ctx.store.evidence_for_job(ctx.job.id).await?;
        let mut papers = Vec::new();
        for row in &evidence_rows {
            if let Some(paper) = ctx.store.get_paper(row.paper_id).await? {
                papers.push(serde_json::json!({
                    "paper_id": paper.id,
                    "title": paper.title,
                    "year": paper.year,
                    "doi": paper.doi,
                    "impact_score": row.impact_score,
                    "evaluated": row.evaluated,
                }));
            }
        }

        let final_output = serde_json::json!({
            "conclusion": "hypothesis_found_confident",
            "dominant_pair": dominant,
            "top_k_alternatives": alternatives,
            "projected_graph": projected,
            "papers": papers,
            "papers_count": papers.len(),
            "final_evidence": evidence,
            "measurements_snapshot": ctx.decision.measurements_snapshot,
            "finalized_at": Utc::now().to_rfc3339(),
        });
        ctx.store.set_job_result(ctx.job.id, &final_output).await?;

        let message = match &dominant {
            Some(d) => format!(
                "Job finalized: {} -> {} (confidence {})",
                d.source, d.target, d.max_confidence
            ),
            None => "Job finalized with confident hypothesis set".to_string(),
        };
        tracing::info!("Job {}: {message}", ctx.job.id);

        let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Decision)
            .with_status("haltconfident")
            .with_result(serde_json::json!({
                "conclusion": "hypothesis_found_confident",
                "dominant_hypothesis": dominant.as_ref().map(|d| format!(
                    "{} -> [{}] -> {}",
                    d.source,
                    d.intermediates.join(", "),
                    d.target
                )),
                "top_k_count": alternatives.len(),
                "papers_used": papers.len(),
            }))
            .with_metric(ctx.decision.measurements_snapshot.clone())
            .with_payload(serde_json::json!({
                "dominant": dominant,
                "top_k_hypotheses": alternatives,
                "evidence_snippets": evidence,
            }))
            .with_next_action("show_final_result");

        Ok(HandlerOutcome {
            new_status: JobStatus::Completed,
            reenqueue: false,
            message,
            next_action: Some("show_final_result".to_string()),
            event: Some(event),
            data: Some(final_output),
        })
    }
}
