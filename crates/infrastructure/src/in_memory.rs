use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use microcore_core::ports::{
    Delivery, DeliveryHandle, QueueOptions, SendOptions, Subscription, Transport,
};
use microcore_errors::MicrocoreResult;

/// One outbound publish, kept for inspection. Tests assert persistence
/// flags and expirations against this log.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub topic: String,
    pub payload: Value,
    pub options: SendOptions,
}

#[derive(Default)]
struct TopicState {
    /// Messages published before any subscriber existed.
    buffered: VecDeque<Delivery>,
    subscribers: Vec<SubscriberChannel>,
    /// Round-robin cursor for competing-consumer delivery.
    next_subscriber: usize,
}

struct SubscriberChannel {
    tag: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// In-process transport over tokio channels, for embedded deployments and
/// tests. Topics behave as competing-consumer queues: each message goes to
/// exactly one live subscriber, round-robin, or is buffered until one
/// appears.
pub struct InMemoryTransport {
    topics: RwLock<HashMap<String, TopicState>>,
    next_delivery: AtomicU64,
    connected: AtomicBool,
    connects: AtomicUsize,
    acked: Mutex<Vec<DeliveryHandle>>,
    sent: Mutex<Vec<SentRecord>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_delivery: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            acked: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls observed, including reconnects.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every `ack` call in order, double-acks included.
    pub async fn acked(&self) -> Vec<DeliveryHandle> {
        self.acked.lock().await.clone()
    }

    pub async fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, topic: &str) -> Vec<SentRecord> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    fn next_handle(&self) -> DeliveryHandle {
        DeliveryHandle::new(self.next_delivery.fetch_add(1, Ordering::SeqCst))
    }

    /// Hands the delivery to one live subscriber, or buffers it. Dead
    /// subscriber channels are pruned on the way.
    fn dispatch(state: &mut TopicState, mut delivery: Delivery) {
        loop {
            if state.subscribers.is_empty() {
                state.buffered.push_back(delivery);
                return;
            }
            let index = state.next_subscriber % state.subscribers.len();
            match state.subscribers[index].sender.send(delivery) {
                Ok(()) => {
                    state.next_subscriber = index + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    state.subscribers.remove(index);
                    delivery = returned;
                }
            }
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> MicrocoreResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, _options: QueueOptions) -> MicrocoreResult<()> {
        let mut topics = self.topics.write().await;
        topics.entry(queue.to_string()).or_default();
        debug!("Declared in-memory queue {}", queue);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> MicrocoreResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let tag = uuid::Uuid::new_v4().to_string();

        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();
        while let Some(delivery) = state.buffered.pop_front() {
            // A full buffer drain to the new subscriber; an unbounded
            // channel cannot reject it.
            let _ = tx.send(delivery);
        }
        state.subscribers.push(SubscriberChannel {
            tag: tag.clone(),
            sender: tx,
        });

        debug!("Subscribed to in-memory topic {} with tag {}", topic, tag);
        Ok(Subscription { tag, deliveries: rx })
    }

    async fn unsubscribe(&self, topic: &str, tag: &str) -> MicrocoreResult<()> {
        let mut topics = self.topics.write().await;
        if let Some(state) = topics.get_mut(topic) {
            state.subscribers.retain(|sub| sub.tag != tag);
        }
        debug!("Unsubscribed from in-memory topic {} ({})", topic, tag);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        payload: &Value,
        options: SendOptions,
    ) -> MicrocoreResult<()> {
        self.sent.lock().await.push(SentRecord {
            topic: topic.to_string(),
            payload: payload.clone(),
            options,
        });

        let delivery = Delivery {
            payload: payload.clone(),
            handle: self.next_handle(),
        };
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();
        Self::dispatch(state, delivery);
        Ok(())
    }

    async fn ack(&self, handle: DeliveryHandle) -> MicrocoreResult<()> {
        self.acked.lock().await.push(handle);
        Ok(())
    }

    async fn disconnect(&self) -> MicrocoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut topics = self.topics.write().await;
        for state in topics.values_mut() {
            // Dropping the senders closes every subscription channel.
            state.subscribers.clear();
        }
        debug!("In-memory transport disconnected");
        Ok(())
    }
}
