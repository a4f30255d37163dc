pub mod completion;
pub mod heartbeat;
pub mod lifecycle;

pub use completion::Completion;
pub use heartbeat::HeartbeatReporter;
pub use lifecycle::ServiceLifecycle;
