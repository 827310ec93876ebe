//! Gate between downloading ledger papers and fetching fresh ones.
//!
//! Growth was detected, so the most useful next step is deeper extraction
//! of papers already in the strategic ledger. With nothing left to
//! download, fall back to fetching.

use async_trait::async_trait;

use super::{DecisionHandler, HandlerContext, HandlerOutcome};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase};

pub struct StrategicDownloadHandler;

#[async_trait]
impl DecisionHandler for StrategicDownloadHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::StrategicDownloadTargeted
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        let unevaluated = ctx.store.count_unevaluated_evidence(ctx.job.id).await?;

        let (new_status, message) = if unevaluated > 0 {
            (
                JobStatus::DownloadQueued,
                format!("Growth detected; {unevaluated} paper(s) queued for extraction"),
            )
        } else {
            (
                JobStatus::FetchQueued,
                "Growth detected but no unevaluated papers in the ledger; fetching instead"
                    .to_string(),
            )
        };
        tracing::info!("Job {}: {message}", ctx.job.id);

        let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Download)
            .with_result(serde_json::json!({
                "undownloaded_count": unevaluated,
                "final_status": new_status.as_str(),
            }))
            .with_next_action("show_status_update");

        Ok(HandlerOutcome {
            new_status,
            reenqueue: true,
            message,
            next_action: Some("show_status_update".to_string()),
            event: Some(event),
            data: Some(serde_json::json!({ "undownloaded_count": unevaluated })),
        })
    }
}
