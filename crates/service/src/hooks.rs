use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::components::Completion;

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Startup/cleanup hook; defaults to a no-op.
pub type LifecycleHook = Box<dyn Fn() -> HookFuture + Send + Sync>;

/// Invoked once per delivered job with the payload and its single-use
/// completion token.
pub type JobHandler = Arc<dyn Fn(Value, Completion) -> HookFuture + Send + Sync>;

pub struct ServiceHooks {
    /// Runs after the job subscription is active, never before.
    pub on_init: LifecycleHook,
    pub on_job: JobHandler,
    /// Runs first during shutdown, before any resource teardown.
    pub on_cleanup: LifecycleHook,
}

impl ServiceHooks {
    pub fn noop_hook() -> LifecycleHook {
        Box::new(|| Box::pin(async {}))
    }

    pub fn noop_handler() -> JobHandler {
        Arc::new(|_job, _completion| Box::pin(async {}))
    }
}

impl Default for ServiceHooks {
    fn default() -> Self {
        Self {
            on_init: Self::noop_hook(),
            on_job: Self::noop_handler(),
            on_cleanup: Self::noop_hook(),
        }
    }
}
