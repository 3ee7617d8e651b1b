//! Pipeline event type for emitting run and stage lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{FailureCause, RunState};
use crate::utils::iso_timestamp;

/// An event emitted by the runner during execution.
///
/// Events are used for observability and can be consumed by
/// event sinks for logging, monitoring, or analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.started", "run.aborted").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The run the event belongs to.
    pub run_id: Uuid,

    /// The event payload data.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: iso_timestamp(),
            run_id,
            data: BTreeMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates a "run.started" event.
    #[must_use]
    pub fn run_started(run_id: Uuid, pipeline: &str) -> Self {
        Self::new("run.started", run_id).add_data("pipeline", serde_json::json!(pipeline))
    }

    /// Creates a "run.completed" or "run.aborted" event.
    #[must_use]
    pub fn run_finished(run_id: Uuid, state: RunState, duration_ms: f64) -> Self {
        let event_type = match state {
            RunState::Completed => "run.completed",
            _ => "run.aborted",
        };
        Self::new(event_type, run_id)
            .add_data("state", serde_json::json!(state))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(run_id: Uuid, stage: &str, attempt: u32) -> Self {
        Self::new("stage.started", run_id)
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempt", serde_json::json!(attempt))
    }

    /// Creates a "stage.succeeded" event.
    #[must_use]
    pub fn stage_succeeded(run_id: Uuid, stage: &str, attempt: u32, duration_ms: f64) -> Self {
        Self::new("stage.succeeded", run_id)
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempt", serde_json::json!(attempt))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.attempt_failed" event.
    #[must_use]
    pub fn stage_attempt_failed(run_id: Uuid, stage: &str, attempt: u32, cause: &FailureCause) -> Self {
        Self::new("stage.attempt_failed", run_id)
            .add_data("stage", serde_json::json!(stage))
            .add_data("attempt", serde_json::json!(attempt))
            .add_data("cause", serde_json::json!(cause))
    }

    /// Creates a "stage.retry_scheduled" event.
    #[must_use]
    pub fn stage_retry_scheduled(run_id: Uuid, stage: &str, next_attempt: u32, delay_ms: u64) -> Self {
        Self::new("stage.retry_scheduled", run_id)
            .add_data("stage", serde_json::json!(stage))
            .add_data("next_attempt", serde_json::json!(next_attempt))
            .add_data("delay_ms", serde_json::json!(delay_ms))
    }

    /// Creates a "stage.failed" event.
    #[must_use]
    pub fn stage_failed(run_id: Uuid, stage: &str, cause: &FailureCause) -> Self {
        Self::new("stage.failed", run_id)
            .add_data("stage", serde_json::json!(stage))
            .add_data("cause", serde_json::json!(cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let run_id = Uuid::new_v4();
        let event = PipelineEvent::new("test.event", run_id);
        assert_eq!(event.event_type, "test.event");
        assert_eq!(event.run_id, run_id);
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_stage_started() {
        let event = PipelineEvent::stage_started(Uuid::new_v4(), "transform", 2);
        assert_eq!(event.event_type, "stage.started");
        assert_eq!(event.data.get("stage"), Some(&serde_json::json!("transform")));
        assert_eq!(event.data.get("attempt"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_run_finished_type_follows_state() {
        let run_id = Uuid::new_v4();
        assert_eq!(
            PipelineEvent::run_finished(run_id, RunState::Completed, 1.0).event_type,
            "run.completed"
        );
        assert_eq!(
            PipelineEvent::run_finished(run_id, RunState::Aborted, 1.0).event_type,
            "run.aborted"
        );
    }

    #[test]
    fn test_event_serialization() {
        let cause = FailureCause::transient("socket reset");
        let event = PipelineEvent::stage_attempt_failed(Uuid::new_v4(), "extract", 1, &cause);
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: PipelineEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event, deserialized);
        assert!(json.contains(r#""type":"stage.attempt_failed""#));
    }
}
