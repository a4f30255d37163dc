use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use microcore_core::config::ServiceConfig;
use microcore_core::ports::Transport;
use microcore_errors::MicrocoreResult;
use microcore_infrastructure::TransportFactory;

use crate::components::{Completion, ServiceLifecycle};
use crate::hooks::ServiceHooks;

/// A running service instance. Created by `ServiceBuilder::start`;
/// destroyed via `shutdown`, which is safe to call any number of times.
pub struct Service {
    lifecycle: Arc<ServiceLifecycle>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.config().service_type)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn builder(config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn config(&self) -> &ServiceConfig {
        self.lifecycle.config()
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.is_running().await
    }

    /// Runs the cleanup hook, stops the heartbeat, then stops the
    /// transport, in that order. Idempotent.
    pub async fn shutdown(&self) -> MicrocoreResult<()> {
        self.lifecycle.stop().await
    }
}

pub struct ServiceBuilder {
    config: ServiceConfig,
    transport: Option<Arc<dyn Transport>>,
    hooks: ServiceHooks,
}

impl ServiceBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            transport: None,
            hooks: ServiceHooks::default(),
        }
    }

    /// Inject a transport instead of building one from the config. Tests
    /// pass a shared in-memory transport here.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_init = Box::new(move || Box::pin(hook()));
        self
    }

    pub fn on_job<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, Completion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_job = Arc::new(move |job, completion| Box::pin(handler(job, completion)));
        self
    }

    pub fn on_cleanup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_cleanup = Box::new(move || Box::pin(hook()));
        self
    }

    /// Runs the full startup sequence and returns the live service.
    /// Configuration and connection failures reject the call; nothing is
    /// held by the caller in that case.
    pub async fn start(self) -> MicrocoreResult<Service> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => TransportFactory::create(&self.config.transport),
        };
        let lifecycle = Arc::new(ServiceLifecycle::new(self.config, transport, self.hooks));
        lifecycle.start().await?;
        Ok(Service { lifecycle })
    }
}
