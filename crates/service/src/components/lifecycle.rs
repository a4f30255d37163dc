use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use microcore_core::config::ServiceConfig;
use microcore_core::ports::{Delivery, Transport, RESULT_QUEUE_OPTIONS};
use microcore_errors::{MicrocoreError, MicrocoreResult};

use super::{Completion, HeartbeatReporter};
use crate::hooks::{JobHandler, ServiceHooks};

/// Owns startup and shutdown sequencing for one service instance.
///
/// Startup is strictly ordered: validate, connect, declare the result
/// queue, start the heartbeat, subscribe for jobs, and only then run the
/// init hook, so "initialized" can never be observed before the service is
/// able to receive jobs. Shutdown runs the cleanup hook before any
/// teardown and tears the transport down last so final publishes can still
/// go out.
pub struct ServiceLifecycle {
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    heartbeat: HeartbeatReporter,
    hooks: ServiceHooks,
    is_running: RwLock<bool>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    subscription_tag: Mutex<Option<String>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceLifecycle {
    pub fn new(config: ServiceConfig, transport: Arc<dyn Transport>, hooks: ServiceHooks) -> Self {
        let heartbeat = HeartbeatReporter::new(Arc::clone(&transport));
        Self {
            config,
            transport,
            heartbeat,
            hooks,
            is_running: RwLock::new(false),
            shutdown_tx: Mutex::new(None),
            subscription_tag: Mutex::new(None),
            dispatch_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn start(&self) -> MicrocoreResult<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(MicrocoreError::internal_error(format!(
                "service {} already running",
                self.config.id
            )));
        }

        // 1. Fail fast on configuration before any transport I/O.
        self.config.validate()?;

        // 2. Connection failures are fatal here; no retry at this layer.
        self.transport.connect().await?;

        // Steps 3-5 acquire resources on the live connection. A failure in
        // any of them must leave nothing behind: the caller gets an error
        // and holds no resources, and a heartbeat for a service that never
        // started would falsely announce liveness.
        if let Err(e) = self.start_connected().await {
            self.heartbeat.stop().await;
            if let Err(disconnect_err) = self.transport.disconnect().await {
                warn!(
                    "Failed to disconnect after startup error: {}",
                    disconnect_err
                );
            }
            return Err(e);
        }

        // 6. Init runs only once the subscription is live.
        (self.hooks.on_init)().await;

        *is_running = true;
        info!("Service {} started", self.config.id);
        Ok(())
    }

    async fn start_connected(&self) -> MicrocoreResult<()> {
        // 3. Replies must never be lost to a missing destination.
        self.transport
            .declare_queue(&self.config.result_key, RESULT_QUEUE_OPTIONS)
            .await?;

        // 4. Liveness reporting, with the config snapshot as payload.
        let status_payload = self.config.status_payload()?;
        self.heartbeat
            .start(self.config.status_report_interval(), status_payload)
            .await?;

        // 5. Job subscription on the service's own id, manual-ack.
        let subscription = self.transport.subscribe(&self.config.id).await?;
        *self.subscription_tag.lock().await = Some(subscription.tag);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        let dispatch_task = self.spawn_dispatch_loop(subscription.deliveries, shutdown_rx);
        *self.dispatch_task.lock().await = Some(dispatch_task);
        Ok(())
    }

    /// Idempotent; a no-op when not running, including before `start` ever
    /// completed. Does not abort in-flight job handlers, only stops new
    /// deliveries and the heartbeat.
    pub async fn stop(&self) -> MicrocoreResult<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        (self.hooks.on_cleanup)().await;

        self.heartbeat.stop().await;

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.dispatch_task.lock().await.take() {
            let _ = task.await;
        }
        if let Some(tag) = self.subscription_tag.lock().await.take() {
            if let Err(e) = self.transport.unsubscribe(&self.config.id, &tag).await {
                warn!("Failed to cancel job subscription: {}", e);
            }
        }

        // Transport goes last so final publishes had their chance.
        self.transport.disconnect().await?;

        *is_running = false;
        info!("Service {} stopped", self.config.id);
        Ok(())
    }

    fn spawn_dispatch_loop(
        &self,
        mut deliveries: mpsc::UnboundedReceiver<Delivery>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let handler: JobHandler = Arc::clone(&self.hooks.on_job);
        let transport = Arc::clone(&self.transport);
        let service_id = self.config.id.clone();
        let result_key = self.config.result_key.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivery = deliveries.recv() => {
                        let Some(delivery) = delivery else {
                            debug!("Delivery channel closed for {}", service_id);
                            break;
                        };
                        let completion = Completion::new(
                            Arc::clone(&transport),
                            delivery.handle,
                            service_id.clone(),
                            result_key.clone(),
                            delivery.payload.clone(),
                        );
                        // Each handler gets its own task: a panic or a slow
                        // job never stalls dispatch, and a panicked job
                        // simply stays unacknowledged.
                        tokio::spawn(handler(delivery.payload, completion));
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job dispatch for {} shutting down", service_id);
                        break;
                    }
                }
            }
        })
    }
}
