use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use microcore_errors::MicrocoreError;

/// Job payload field a sender may set to redirect the success reply for
/// that job away from the service's default result key.
pub const RESPONSE_KEY_FIELD: &str = "responseKey";

/// Failure a job handler reports through its completion token. Carries just
/// enough to survive serialization onto the error topic.
#[derive(Debug, Clone)]
pub struct JobError {
    pub name: String,
    pub message: String,
}

impl JobError {
    pub fn new<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<MicrocoreError> for JobError {
    fn from(err: MicrocoreError) -> Self {
        let name = match &err {
            MicrocoreError::Configuration(_) => "ConfigurationError",
            MicrocoreError::Transport(_) => "TransportError",
            MicrocoreError::Serialization(_) => "SerializationError",
            MicrocoreError::Job(_) => "JobError",
            MicrocoreError::Internal(_) => "InternalError",
        };
        let message = match err {
            MicrocoreError::Configuration(m)
            | MicrocoreError::Transport(m)
            | MicrocoreError::Serialization(m)
            | MicrocoreError::Job(m)
            | MicrocoreError::Internal(m) => m,
        };
        Self::new(name, message)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("Error", err.to_string())
    }
}

/// Transport-safe serialization of a handler failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
}

impl From<&JobError> for SerializedError {
    fn from(err: &JobError) -> Self {
        Self {
            name: err.name.clone(),
            message: err.message.clone(),
        }
    }
}

/// Payload published on the error topic when a handler reports failure. The
/// original job data travels with it for downstream diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: SerializedError,
    pub source: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Exactly one outcome is produced per job through a single completion call.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// Publish `data` to the response-key override, or to the service's
    /// default result key when no override is given.
    Success {
        data: Value,
        response_key: Option<String>,
    },
    /// Serialize and route the error to the error topic.
    Failure(JobError),
    /// Deliberate no-reply: acknowledge the job, publish nothing.
    NoReply,
}

impl CompletionOutcome {
    pub fn success(data: Value) -> Self {
        Self::Success {
            data,
            response_key: None,
        }
    }

    pub fn success_to<K: Into<String>>(data: Value, response_key: K) -> Self {
        Self::Success {
            data,
            response_key: Some(response_key.into()),
        }
    }

    pub fn failure<E: Into<JobError>>(error: E) -> Self {
        Self::Failure(error.into())
    }
}

/// Reads the sender-chosen response key override out of a job payload.
pub fn response_key_of(payload: &Value) -> Option<String> {
    payload
        .get(RESPONSE_KEY_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_error_from_microcore_error() {
        let err: JobError = MicrocoreError::transport_error("broker down").into();
        assert_eq!(err.name, "TransportError");
        assert_eq!(err.message, "broker down");
    }

    #[test]
    fn test_job_error_from_anyhow_uses_plain_error_name() {
        let err: JobError = anyhow::anyhow!("test error").into();
        assert_eq!(err.name, "Error");
        assert_eq!(err.message, "test error");
    }

    #[test]
    fn test_error_report_wire_shape() {
        let job_error = JobError::new("Error", "test error");
        let report = ErrorReport {
            error: SerializedError::from(&job_error),
            source: "workservice".to_string(),
            data: json!({"a": 1, "b": 2}),
            timestamp: Utc::now(),
        };
        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["error"]["name"], "Error");
        assert_eq!(wire["error"]["message"], "test error");
        assert_eq!(wire["source"], "workservice");
        assert_eq!(wire["data"]["a"], 1);
    }

    #[test]
    fn test_response_key_extraction() {
        let payload = json!({"a": 1, "responseKey": "response"});
        assert_eq!(response_key_of(&payload), Some("response".to_string()));
        assert_eq!(response_key_of(&json!({"a": 1})), None);
        // non-string override is ignored
        assert_eq!(response_key_of(&json!({"responseKey": 7})), None);
    }
}
