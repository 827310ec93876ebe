//! Schedule a literature fetch, bounded by the per-job paper cap.

use async_trait::async_trait;
use chrono::Utc;

use super::{DecisionHandler, HandlerContext, HandlerOutcome};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase};

pub struct FetchMoreLiteratureHandler;

#[async_trait]
impl DecisionHandler for FetchMoreLiteratureHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::FetchMoreLiterature
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        let paper_count = ctx.store.count_evidence(ctx.job.id).await?;
        let max_papers = ctx.policy.max_papers_per_job.0;

        // At the cap the job finalizes instead of fetching forever.
        if paper_count >= max_papers {
            let message = format!(
                "Maximum papers reached ({paper_count}/{max_papers}); finalizing job"
            );
            tracing::info!("Job {}: {message}", ctx.job.id);

            let final_output = serde_json::json!({
                "conclusion": "max_papers_reached",
                "current_paper_count": paper_count,
                "max_papers": max_papers,
                "finalized_at": Utc::now().to_rfc3339(),
            });
            ctx.store.set_job_result(ctx.job.id, &final_output).await?;

            let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Decision)
                .with_status("maxpapers")
                .with_result(final_output.clone())
                .with_next_action("show_termination_reason");

            return Ok(HandlerOutcome {
                new_status: JobStatus::Completed,
                reenqueue: false,
                message,
                next_action: Some("show_termination_reason".to_string()),
                event: Some(event),
                data: Some(final_output),
            });
        }

        let message = format!(
            "Fetch queued (papers so far: {paper_count}/{max_papers})"
        );
        tracing::info!("Job {}: {message}", ctx.job.id);

        let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Fetch)
            .with_result(serde_json::json!({
                "scheduled_at": Utc::now().to_rfc3339(),
                "current_paper_count": paper_count,
                "max_papers": max_papers,
            }))
            .with_next_action("show_status_update");

        Ok(HandlerOutcome {
            new_status: JobStatus::FetchQueued,
            reenqueue: true,
            message,
            next_action: Some("show_status_update".to_string()),
            event: Some(event),
            data: None,
        })
    }
}
