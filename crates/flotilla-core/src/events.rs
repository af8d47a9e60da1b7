//! Single-runner status notifications delivered out-of-band.
//!
//! Two body shapes are accepted: the native `RunnerEvent` record and the
//! GitHub `workflow_job` webhook payload. Anything else is rejected here, at
//! the ingestion boundary, so that the manager only ever sees typed events.

use crate::runner::RunnerStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A status delta for one runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerEvent {
    pub name: String,
    #[serde(default)]
    pub registration_id: Option<u64>,
    pub status: RunnerStatus,
    #[serde(default)]
    pub busy: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Why an event body was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRejection {
    Malformed(String),
    UnsupportedAction(String),
    MissingRunner,
}

impl fmt::Display for EventRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRejection::Malformed(e) => write!(f, "malformed event: {}", e),
            EventRejection::UnsupportedAction(a) => write!(f, "unsupported action: {}", a),
            EventRejection::MissingRunner => write!(f, "event does not name a runner"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowJobPayload {
    action: String,
    workflow_job: WorkflowJob,
}

#[derive(Debug, Deserialize)]
struct WorkflowJob {
    runner_id: Option<u64>,
    runner_name: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

impl RunnerEvent {
    /// Parse and validate an event body.
    pub fn parse(body: &[u8]) -> Result<RunnerEvent, EventRejection> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| EventRejection::Malformed(e.to_string()))?;

        if value.get("workflow_job").is_some() {
            let payload: WorkflowJobPayload = serde_json::from_value(value)
                .map_err(|e| EventRejection::Malformed(e.to_string()))?;
            return Self::from_workflow_job(payload);
        }

        let event: RunnerEvent =
            serde_json::from_value(value).map_err(|e| EventRejection::Malformed(e.to_string()))?;
        if event.name.trim().is_empty() {
            return Err(EventRejection::MissingRunner);
        }
        Ok(event)
    }

    fn from_workflow_job(payload: WorkflowJobPayload) -> Result<RunnerEvent, EventRejection> {
        let (status, busy) = match payload.action.as_str() {
            "in_progress" => (RunnerStatus::Online, true),
            "completed" => (RunnerStatus::Offline, false),
            other => return Err(EventRejection::UnsupportedAction(other.to_string())),
        };

        let name = payload
            .workflow_job
            .runner_name
            .filter(|n| !n.is_empty())
            .ok_or(EventRejection::MissingRunner)?;

        Ok(RunnerEvent {
            name,
            registration_id: payload.workflow_job.runner_id,
            status,
            busy,
            labels: payload.workflow_job.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_native_event() {
        let body = br#"{"name":"flotilla-linux-3","registration_id":7,"status":"online","busy":true,"labels":["linux"]}"#;
        let event = RunnerEvent::parse(body).unwrap();
        assert_eq!(event.name, "flotilla-linux-3");
        assert_eq!(event.registration_id, Some(7));
        assert_eq!(event.status, RunnerStatus::Online);
        assert!(event.busy);
    }

    #[test]
    fn test_parse_workflow_job_in_progress() {
        let body = br#"{
            "action": "in_progress",
            "workflow_job": {"runner_id": 12, "runner_name": "flotilla-linux-1", "labels": ["linux", "x64"]}
        }"#;
        let event = RunnerEvent::parse(body).unwrap();
        assert_eq!(event.status, RunnerStatus::Online);
        assert!(event.busy);
        assert_eq!(event.registration_id, Some(12));
    }

    #[test]
    fn test_queued_job_is_rejected() {
        let body = br#"{"action":"queued","workflow_job":{"runner_id":null,"runner_name":null,"labels":[]}}"#;
        assert_eq!(
            RunnerEvent::parse(body),
            Err(EventRejection::UnsupportedAction("queued".to_string()))
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(matches!(
            RunnerEvent::parse(br#"{"status":"online"}"#),
            Err(EventRejection::Malformed(_))
        ));
        assert!(matches!(
            RunnerEvent::parse(b"not json"),
            Err(EventRejection::Malformed(_))
        ));
        assert_eq!(
            RunnerEvent::parse(br#"{"name":"  ","status":"online"}"#),
            Err(EventRejection::MissingRunner)
        );
    }
}
