//! Presentation event contract and the per-user fan-out bus.
//!
//! Events are best-effort: channels are bounded broadcast channels and
//! slow subscribers lose messages. Nothing in the pipeline ever blocks on
//! event delivery.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{JobId, JobMode, PipelinePhase, UserId};

/// Wire shape pushed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationEvent {
    pub job_id: JobId,
    pub job_type: JobMode,
    pub phase: PipelinePhase,
    /// Sub-status, used mainly for the DECISION phase (e.g. "haltconfident").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl PresentationEvent {
    pub fn new(job_id: JobId, job_type: JobMode, phase: PipelinePhase) -> Self {
        Self {
            job_id,
            job_type,
            phase,
            status: None,
            result: serde_json::Value::Null,
            next_action: None,
            metric: None,
            payload: None,
            error_reason: None,
            explanation: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_next_action(mut self, action: impl Into<String>) -> Self {
        self.next_action = Some(action.into());
        self
    }

    pub fn with_metric(mut self, metric: serde_json::Value) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }
}

const CHANNEL_CAPACITY: usize = 256;

/// Per-user pub/sub for presentation events. Lossy by design.
pub struct EventBus {
    channels: DashMap<UserId, broadcast::Sender<PresentationEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Publish to the user's channel. Dropped silently when nobody listens.
    pub fn publish(&self, user_id: UserId, event: PresentationEvent) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(event);
        }
    }

    /// Subscribe to a user's channel, creating it on first use.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<PresentationEvent> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(UserId(1));
        bus.publish(
            UserId(1),
            PresentationEvent::new(JobId(1), JobMode::Discovery, PipelinePhase::Ingestion)
                .with_status("started"),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, JobId(1));
        assert_eq!(event.status.as_deref(), Some("started"));
    }

    #[test]
    fn publish_without_subscriber_is_silent() {
        let bus = EventBus::new();
        bus.publish(
            UserId(9),
            PresentationEvent::new(JobId(1), JobMode::Discovery, PipelinePhase::Creation),
        );
    }

    #[test]
    fn event_serializes_to_wire_contract() {
        let event = PresentationEvent::new(JobId(4), JobMode::Discovery, PipelinePhase::Decision)
            .with_status("haltconfident")
            .with_result(serde_json::json!({"conclusion": "found"}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "DECISION");
        assert_eq!(json["status"], "haltconfident");
        assert_eq!(json["job_type"], "discovery");
        assert!(json.get("error_reason").is_none());
    }
}
