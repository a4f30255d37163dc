use thiserror::Error;

#[derive(Debug, Error)]
pub enum MicrocoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Job error: {0}")]
    Job(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MicrocoreResult<T> = Result<T, MicrocoreError>;

impl MicrocoreError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn transport_error<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
    pub fn serialization_error<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn job_error<S: Into<String>>(msg: S) -> Self {
        Self::Job(msg.into())
    }
    pub fn internal_error<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Fatal errors abort service creation entirely; they are never routed
    /// to the error topic.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MicrocoreError::Configuration(_) | MicrocoreError::Internal(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MicrocoreError::Transport(_))
    }
}

impl From<serde_json::Error> for MicrocoreError {
    fn from(err: serde_json::Error) -> Self {
        MicrocoreError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MicrocoreError {
    fn from(err: anyhow::Error) -> Self {
        MicrocoreError::Internal(err.to_string())
    }
}
