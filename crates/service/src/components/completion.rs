use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use microcore_core::models::{CompletionOutcome, ErrorReport, JobError, SerializedError};
use microcore_core::ports::{DeliveryHandle, Transport, ERROR_TOPIC, RESULT_SEND_OPTIONS};
use microcore_errors::MicrocoreResult;

/// Single-use completion token handed to the job handler with each
/// delivery.
///
/// The first `resolve` call consumes the inner state: it acknowledges the
/// delivery exactly once, unconditionally, and only then routes the
/// outcome downstream. Later calls find the state gone and are a defined
/// no-op, so the transport can never be double-acked. A token that is
/// never resolved leaves its delivery unacknowledged; the harness places
/// no timeout on handler execution.
pub struct Completion {
    state: Mutex<Option<CompletionState>>,
}

struct CompletionState {
    transport: Arc<dyn Transport>,
    handle: DeliveryHandle,
    service_id: String,
    result_key: String,
    job_payload: Value,
}

impl Completion {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        handle: DeliveryHandle,
        service_id: String,
        result_key: String,
        job_payload: Value,
    ) -> Self {
        Self {
            state: Mutex::new(Some(CompletionState {
                transport,
                handle,
                service_id,
                result_key,
                job_payload,
            })),
        }
    }

    /// Acknowledge the delivery and route the outcome. Acknowledgment is
    /// never deferred on downstream publish success: once the job was
    /// handed to the handler, the transport considers it consumed whatever
    /// happens to the reply.
    pub async fn resolve(&self, outcome: CompletionOutcome) -> MicrocoreResult<()> {
        let state = match self.state.lock().await.take() {
            Some(state) => state,
            None => {
                warn!("Completion resolved more than once, ignoring");
                return Ok(());
            }
        };

        state.transport.ack(state.handle).await?;

        match outcome {
            CompletionOutcome::Failure(error) => {
                let report = ErrorReport {
                    error: SerializedError::from(&error),
                    source: state.service_id.clone(),
                    data: state.job_payload,
                    timestamp: Utc::now(),
                };
                let payload = serde_json::to_value(&report)?;
                state
                    .transport
                    .send(ERROR_TOPIC, &payload, RESULT_SEND_OPTIONS)
                    .await?;
                debug!(
                    "Routed job failure from {} to {}: {}",
                    state.service_id, ERROR_TOPIC, error
                );
            }
            CompletionOutcome::NoReply => {
                debug!("Job completed with no reply");
            }
            CompletionOutcome::Success { data, response_key } => {
                let topic = response_key.as_deref().unwrap_or(&state.result_key);
                state
                    .transport
                    .send(topic, &data, RESULT_SEND_OPTIONS)
                    .await?;
                debug!("Published job result to {}", topic);
            }
        }
        Ok(())
    }

    /// Publish `data` to the default result key.
    pub async fn success(&self, data: Value) -> MicrocoreResult<()> {
        self.resolve(CompletionOutcome::success(data)).await
    }

    /// Publish `data` to a per-job response key instead of the default.
    pub async fn success_to<K: Into<String>>(&self, data: Value, response_key: K) -> MicrocoreResult<()> {
        self.resolve(CompletionOutcome::success_to(data, response_key))
            .await
    }

    /// Serialize the error and route it to the error topic.
    pub async fn failure<E: Into<JobError>>(&self, error: E) -> MicrocoreResult<()> {
        self.resolve(CompletionOutcome::failure(error)).await
    }

    /// Acknowledge and deliberately publish nothing.
    pub async fn no_reply(&self) -> MicrocoreResult<()> {
        self.resolve(CompletionOutcome::NoReply).await
    }

    pub async fn is_resolved(&self) -> bool {
        self.state.lock().await.is_none()
    }
}
