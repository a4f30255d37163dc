pub mod components;
pub mod hooks;
pub mod service;

pub use components::{Completion, HeartbeatReporter, ServiceLifecycle};
pub use hooks::{HookFuture, JobHandler, LifecycleHook, ServiceHooks};
pub use service::{Service, ServiceBuilder};
