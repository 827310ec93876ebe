//! Ask for more input when no viable hypotheses exist.

use async_trait::async_trait;

use super::{group_top_pairs, DecisionHandler, HandlerContext, HandlerOutcome};
use crate::events::PresentationEvent;
use crate::types::{DecisionLabel, EngineError, JobStatus, PipelinePhase};

pub struct InsufficientSignalHandler;

#[async_trait]
impl DecisionHandler for InsufficientSignalHandler {
    fn label(&self) -> DecisionLabel {
        DecisionLabel::InsufficientSignal
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerOutcome, EngineError> {
        let m = &ctx.measurements;
        let explanation = format!(
            "Insufficient evidence for a confident decision: {} hypotheses total, \
             {} passed, {} promising",
            m.total_hypothesis_count, m.passed_hypothesis_count, m.promising_hypothesis_count
        );

        // Promising groups are still worth showing as leads, even empty.
        let limit = ctx.policy.decision.top_k_hypotheses_to_store;
        let ranked = group_top_pairs(&ctx.hypotheses, limit, None);

        tracing::info!("Job {} needs more input: {explanation}", ctx.job.id);

        let event = PresentationEvent::new(ctx.job.id, ctx.job.mode, PipelinePhase::Decision)
            .with_status("insufficientsignal")
            .with_result(serde_json::json!({
                "graph_size": m.semantic_graph_node_count,
                "edge_count": m.semantic_graph_edge_count,
                "hypothesis_count": m.passed_hypothesis_count,
                "growth_score": m.growth_score,
                "explanation": explanation,
                "suggestions": [
                    "Provide additional documents or sources",
                    "Refine your search or query",
                    "Add more context about your research question",
                ],
            }))
            .with_payload(serde_json::json!({ "top_k_hypotheses": ranked }))
            .with_next_action("need_inputs");

        Ok(HandlerOutcome {
            new_status: JobStatus::NeedMoreInput,
            reenqueue: false,
            message: explanation,
            next_action: Some("request_input".to_string()),
            event: Some(event),
            data: Some(serde_json::json!({ "top_k_hypotheses": ranked })),
        })
    }
}
