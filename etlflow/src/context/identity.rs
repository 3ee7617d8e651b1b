//! Run identity for tracking pipeline executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    pub run_id: Uuid,

    /// The pipeline name the run belongs to.
    pub pipeline: String,

    /// When the run was created.
    pub started_at: DateTime<Utc>,

    /// What started the run (e.g. "manual", "schedule").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self::with_run_id(pipeline, Uuid::new_v4())
    }

    /// Creates a run identity with a specific run ID.
    #[must_use]
    pub fn with_run_id(pipeline: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            trigger: None,
        }
    }

    /// Sets the trigger label.
    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// Converts to a dictionary of string values (or null).
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("pipeline".to_string(), serde_json::json!(self.pipeline));
        map.insert(
            "started_at".to_string(),
            serde_json::json!(self.started_at.to_rfc3339()),
        );
        map.insert(
            "trigger".to_string(),
            self.trigger
                .as_ref()
                .map_or(serde_json::Value::Null, |t| serde_json::json!(t)),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_identity_new_generates_distinct_ids() {
        let a = RunIdentity::new("enterprise_data_pipeline");
        let b = RunIdentity::new("enterprise_data_pipeline");
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.pipeline, "enterprise_data_pipeline");
        assert!(a.trigger.is_none());
    }

    #[test]
    fn test_run_identity_to_dict() {
        let identity = RunIdentity::new("p").with_trigger("schedule");
        let dict = identity.to_dict();

        assert_eq!(dict["trigger"], serde_json::json!("schedule"));
        assert_eq!(dict["run_id"], serde_json::json!(identity.run_id.to_string()));
    }

    #[test]
    fn test_run_identity_serialization() {
        let identity = RunIdentity::new("p");
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("trigger"));

        let deserialized: RunIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, deserialized);
    }
}
