//! Halt when evidence has stabilized without a supported hypothesis.

use async_trait::async_trait;
use chrono::Utc;

use super::{DecisionHandler, HandlerContext, HandlerOutcome};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase};

pub struct HaltNoHypothesisHandler;

#[async_trait]
impl DecisionHandler for HaltNoHypothesisHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::HaltNoHypothesis
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        let m = &ctx.measurements;
        let reason = format!(
            "Evidence stabilized without a supported hypothesis: growth_rate={:.2}, \
             max_paths_per_pair={}, density={:.4}, diversity={:.2}",
            m.evidence_growth_rate, m.max_paths_per_pair, m.graph_density, m.diversity_score
        );

        let final_output = serde_json::json!({
            "conclusion": "no_hypothesis",
            "reason": reason,
            "passed_hypothesis_count": m.passed_hypothesis_count,
            "measurements_snapshot": ctx.decision.measurements_snapshot,
            "finalized_at": Utc::now().to_rfc3339(),
        });
        ctx.store.set_job_result(ctx.job.id, &final_output).await?;
        tracing::info!("Job {} halting without hypothesis: {reason}", ctx.job.id);

        let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Decision)
            .with_status("nohypo")
            .with_result(serde_json::json!({
                "conclusion": "no_hypothesis",
                "reason": reason,
            }))
            .with_metric(ctx.decision.measurements_snapshot.clone())
            .with_next_action("show_termination_reason");

        Ok(HandlerOutcome {
            new_status: JobStatus::Completed,
            reenqueue: false,
            message: reason,
            next_action: Some("show_termination_reason".to_string()),
            event: Some(event),
            data: Some(final_output),
        })
    }
}
