use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use microcore_errors::MicrocoreResult;

/// Well-known topic for periodic service status reports.
pub const STATUS_TOPIC: &str = "microcore.service";
/// Well-known topic for handler-reported job failures.
pub const ERROR_TOPIC: &str = "microcore.error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

/// Result queues are durable and never auto-deleted so replies survive a
/// missing consumer.
pub const RESULT_QUEUE_OPTIONS: QueueOptions = QueueOptions {
    durable: true,
    auto_delete: false,
};

/// Inbound job queues carry the same durability policy: jobs queued while
/// the service is down must still be there when it comes back.
pub const JOB_QUEUE_OPTIONS: QueueOptions = QueueOptions {
    durable: true,
    auto_delete: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub persistent: bool,
    pub expiration_ms: Option<u64>,
}

/// Successful results must survive a broker restart.
pub const RESULT_SEND_OPTIONS: SendOptions = SendOptions {
    persistent: true,
    expiration_ms: None,
};

impl SendOptions {
    /// Status reports are inherently ephemeral: non-persistent, expiring
    /// after one report period.
    pub fn transient_with_expiration(expiration_ms: u64) -> Self {
        Self {
            persistent: false,
            expiration_ms: Some(expiration_ms),
        }
    }
}

/// Opaque token identifying an in-flight, not-yet-acknowledged delivery.
/// Only transports construct and interpret these; job handlers never see
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(u64);

impl DeliveryHandle {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn tag(&self) -> u64 {
        self.0
    }
}

/// One inbound message, not yet acknowledged.
#[derive(Debug)]
pub struct Delivery {
    pub payload: Value,
    pub handle: DeliveryHandle,
}

/// Live subscription: the consumer tag for later cancellation plus the
/// channel deliveries arrive on.
pub struct Subscription {
    pub tag: String,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// Interface the service core requires from the message-queue client.
///
/// Subscriptions are always manual-ack: the transport must not acknowledge
/// a delivery until `ack` is called with its handle, so acknowledgment
/// timing is fully owned by the job completion protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. Suspends until ready or fails; no retry at
    /// this layer.
    async fn connect(&self) -> MicrocoreResult<()>;

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> MicrocoreResult<()>;

    async fn subscribe(&self, topic: &str) -> MicrocoreResult<Subscription>;

    async fn unsubscribe(&self, topic: &str, tag: &str) -> MicrocoreResult<()>;

    async fn send(&self, topic: &str, payload: &Value, options: SendOptions)
        -> MicrocoreResult<()>;

    async fn ack(&self, handle: DeliveryHandle) -> MicrocoreResult<()>;

    async fn disconnect(&self) -> MicrocoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_policies_are_durable_and_not_auto_deleted() {
        assert!(RESULT_QUEUE_OPTIONS.durable);
        assert!(!RESULT_QUEUE_OPTIONS.auto_delete);
        assert!(JOB_QUEUE_OPTIONS.durable);
        assert!(!JOB_QUEUE_OPTIONS.auto_delete);
    }

    #[test]
    fn test_send_policies() {
        assert!(RESULT_SEND_OPTIONS.persistent);
        assert_eq!(RESULT_SEND_OPTIONS.expiration_ms, None);

        let status = SendOptions::transient_with_expiration(60_000);
        assert!(!status.persistent);
        assert_eq!(status.expiration_ms, Some(60_000));
    }
}
