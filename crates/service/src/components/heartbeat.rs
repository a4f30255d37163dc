use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use microcore_core::ports::{SendOptions, Transport, STATUS_TOPIC};
use microcore_errors::{MicrocoreError, MicrocoreResult};

/// Periodically publishes a liveness payload on the status topic.
///
/// Owned by exactly one service instance; `start` while running replaces
/// the previous timer, so overlapping timers and duplicate heartbeats
/// cannot happen. Reports are non-persistent and expire after one report
/// period, so a dead service goes silent instead of leaving stale state
/// behind.
pub struct HeartbeatReporter {
    transport: Arc<dyn Transport>,
    active: Mutex<Option<ActiveReporter>>,
}

struct ActiveReporter {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    payload: Value,
    interval: Duration,
}

impl HeartbeatReporter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            active: Mutex::new(None),
        }
    }

    /// Reports once immediately, then on a fixed best-effort interval until
    /// `stop`.
    pub async fn start(&self, interval: Duration, payload: Value) -> MicrocoreResult<()> {
        self.stop().await;

        if let Err(e) = Self::report_once(&self.transport, &payload, interval).await {
            error!("Failed to publish initial status report: {}", e);
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let transport = Arc::clone(&self.transport);
        let task_payload = payload.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial report already
            // covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = Self::report_once(&transport, &task_payload, interval).await {
                            error!("Failed to publish status report: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Status reporter shutting down");
                        break;
                    }
                }
            }
        });

        *self.active.lock().await = Some(ActiveReporter {
            shutdown_tx,
            task,
            payload,
            interval,
        });
        Ok(())
    }

    /// Publishes one status report out of schedule. Errors if the reporter
    /// is not running.
    pub async fn report(&self) -> MicrocoreResult<()> {
        let active = self.active.lock().await;
        let active = active
            .as_ref()
            .ok_or_else(|| MicrocoreError::internal_error("status reporter not running"))?;
        Self::report_once(&self.transport, &active.payload, active.interval).await
    }

    /// Idempotent: a no-op when not running. Clears the stored payload so
    /// no state leaks between service instances.
    pub async fn stop(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            let _ = active.shutdown_tx.send(());
            let _ = active.task.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    async fn report_once(
        transport: &Arc<dyn Transport>,
        payload: &Value,
        interval: Duration,
    ) -> MicrocoreResult<()> {
        transport
            .send(
                STATUS_TOPIC,
                payload,
                SendOptions::transient_with_expiration(interval.as_millis() as u64),
            )
            .await
    }
}
