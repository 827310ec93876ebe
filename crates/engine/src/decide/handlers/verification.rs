//! Verification terminals: the entity pair is connected, or it is not.

use async_trait::async_trait;
use chrono::Utc;

use super::{DecisionHandler, HandlerContext, HandlerOutcome};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase};

/// The verification pair must be present on a verification job.
fn verification_pair(ctx: &HandlerContext) -> Result<(String, String), EngineError> {
    ctx.job.verification_pair.clone().ok_or_else(|| {
        EngineError::Internal(format!(
            "verification job {} is missing its entity pair",
            ctx.job.id
        ))
    })
}

/// The hypothesis path connecting the verification pair, if one exists.
fn connecting_path(ctx: &HandlerContext, source: &str, target: &str) -> Option<Vec<String>> {
    ctx.hypotheses
        .iter()
        .filter(|h| h.passed_filter || h.is_promising())
        .find(|h| {
            (h.source == source && h.target == target)
                || (h.source == target && h.target == source)
        })
        .map(|h| h.path.clone())
}

async fn finalize(
    ctx: &HandlerContext,
    found: bool,
) -> Result<HandlerOutcome, EngineError> {
    let (source, target) = verification_pair(ctx)?;

    let mut path = if found {
        connecting_path(ctx, &source, &target).unwrap_or_default()
    } else {
        Vec::new()
    };
    let connection_type = if !found {
        None
    } else if ctx.graph.has_edge(&source, &target) || ctx.graph.has_edge(&target, &source) {
        Some("direct")
    } else {
        Some("indirect")
    };
    if connection_type == Some("direct") && path.is_empty() {
        path = vec![source.clone(), target.clone()];
    }

    let explanation = if found {
        match connection_type {
            Some("direct") => format!("'{source}' and '{target}' are directly linked"),
            _ => format!(
                "'{source}' and '{target}' are connected through {}",
                if path.len() > 2 {
                    path[1..path.len() - 1].join(", ")
                } else {
                    "an intermediate".to_string()
                }
            ),
        }
    } else {
        format!("No connection found between '{source}' and '{target}' after exhausting all search queries")
    };

    // Supporting papers: every ledger paper that contributed.
    let evidence_rows = ctx.store.evidence_for_job(ctx.job.id).await?;
    let supporting: Vec<crate::types::PaperId> =
        evidence_rows.iter().map(|r| r.paper_id).collect();

    ctx.store
        .insert_verification(
            ctx.job.id,
            &source,
            &target,
            Some(found),
            connection_type,
            &path,
            &explanation,
            &supporting,
        )
        .await?;

    let queries = ctx.store.queries_for_job(ctx.job.id).await?;
    let queries_used: Vec<serde_json::Value> = queries
        .iter()
        .map(|q| {
            serde_json::json!({
                "query_text": q.query_text,
                "status": q.status,
                "reputation": q.reputation_score,
            })
        })
        .collect();

    let final_output = serde_json::json!({
        "verification_status": if found { "found" } else { "not_found" },
        "source": source,
        "target": target,
        "connection_type": connection_type,
        "path": path,
        "explanation": explanation,
        "supporting_papers": supporting,
        "search_queries": queries_used,
        "completed_at": Utc::now().to_rfc3339(),
    });
    ctx.store.set_job_result(ctx.job.id, &final_output).await?;
    tracing::info!(
        "Job {} verification {}: {source} -> {target}",
        ctx.job.id,
        if found { "FOUND" } else { "NOT FOUND" }
    );

    let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Decision)
        .with_status(if found { "found" } else { "notfound" })
        .with_result(final_output.clone())
        .with_next_action("show_verification_result");

    Ok(HandlerOutcome {
        new_status: JobStatus::Completed,
        reenqueue: false,
        message: explanation,
        next_action: Some("show_verification_result".to_string()),
        event: Some(event),
        data: Some(final_output),
    })
}

pub struct VerificationFoundHandler;

#[async_trait]
impl DecisionHandler for VerificationFoundHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::VerificationFound
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        finalize(ctx, true).await
    }
}

pub struct VerificationNotFoundHandler;

#[async_trait]
impl DecisionHandler for VerificationNotFoundHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::VerificationNotFound
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        finalize(ctx, false).await
    }
}
