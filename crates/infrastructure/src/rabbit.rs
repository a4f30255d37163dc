use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use microcore_core::ports::{
    Delivery, DeliveryHandle, QueueOptions, SendOptions, Subscription, Transport,
    JOB_QUEUE_OPTIONS,
};
use microcore_errors::{MicrocoreError, MicrocoreResult};

/// RabbitMQ transport backed by lapin. Connection state is lazy: the
/// instance is constructed cheaply and `connect` dials the broker during
/// service startup.
pub struct RabbitTransport {
    url: String,
    state: RwLock<Option<ConnectedState>>,
}

struct ConnectedState {
    connection: Connection,
    channel: Channel,
    /// Forwarder task per consumer tag, draining the lapin consumer stream
    /// into the subscription channel.
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl RabbitTransport {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            state: RwLock::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn transport_err(context: &str, err: impl std::fmt::Display) -> MicrocoreError {
        MicrocoreError::transport_error(format!("{context}: {err}"))
    }

    fn not_connected() -> MicrocoreError {
        MicrocoreError::transport_error("not connected")
    }

    fn declare_options(options: QueueOptions) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: false,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for RabbitTransport {
    async fn connect(&self) -> MicrocoreResult<()> {
        let mut state = self.state.write().await;
        if state.is_some() {
            return Ok(());
        }

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| Self::transport_err("failed to connect to RabbitMQ", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Self::transport_err("failed to create channel", e))?;

        info!("Connected to RabbitMQ at {}", self.url);
        *state = Some(ConnectedState {
            connection,
            channel,
            forwarders: HashMap::new(),
        });
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> MicrocoreResult<()> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or_else(Self::not_connected)?;

        state
            .channel
            .queue_declare(queue, Self::declare_options(options), FieldTable::default())
            .await
            .map_err(|e| Self::transport_err(&format!("failed to declare queue {queue}"), e))?;

        debug!("Declared queue {}", queue);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> MicrocoreResult<Subscription> {
        let mut state = self.state.write().await;
        let state = state.as_mut().ok_or_else(Self::not_connected)?;

        // The inbound queue must exist before consuming; declaration is
        // idempotent on matching options.
        state
            .channel
            .queue_declare(
                topic,
                Self::declare_options(JOB_QUEUE_OPTIONS),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Self::transport_err(&format!("failed to declare queue {topic}"), e))?;

        let tag = format!("microcore-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        // Manual acknowledgment only; the completion protocol owns ack
        // timing.
        let mut consumer = state
            .channel
            .basic_consume(
                topic,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Self::transport_err(&format!("failed to consume from {topic}"), e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = state.channel.clone();
        let topic_name = topic.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!("Consumer stream error on {}: {}", topic_name, e);
                        break;
                    }
                };
                let payload: Value = match serde_json::from_slice(&delivery.data) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Discarding malformed payload on {}: {}", topic_name, e);
                        let _ = channel
                            .basic_nack(
                                delivery.delivery_tag,
                                BasicNackOptions {
                                    requeue: false,
                                    ..Default::default()
                                },
                            )
                            .await;
                        continue;
                    }
                };
                let forwarded = tx.send(Delivery {
                    payload,
                    handle: DeliveryHandle::new(delivery.delivery_tag),
                });
                if forwarded.is_err() {
                    debug!("Subscription to {} dropped, stopping forwarder", topic_name);
                    break;
                }
            }
        });
        state.forwarders.insert(tag.clone(), forwarder);

        debug!("Subscribed to {} with tag {}", topic, tag);
        Ok(Subscription { tag, deliveries: rx })
    }

    async fn unsubscribe(&self, topic: &str, tag: &str) -> MicrocoreResult<()> {
        let mut state = self.state.write().await;
        let state = state.as_mut().ok_or_else(Self::not_connected)?;

        state
            .channel
            .basic_cancel(tag, BasicCancelOptions::default())
            .await
            .map_err(|e| Self::transport_err(&format!("failed to cancel consumer {tag}"), e))?;
        if let Some(forwarder) = state.forwarders.remove(tag) {
            forwarder.abort();
        }

        debug!("Unsubscribed from {} ({})", topic, tag);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        payload: &Value,
        options: SendOptions,
    ) -> MicrocoreResult<()> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or_else(Self::not_connected)?;

        let bytes = serde_json::to_vec(payload)?;
        // delivery_mode 2 = persistent, 1 = transient
        let mut properties =
            BasicProperties::default().with_delivery_mode(if options.persistent { 2 } else { 1 });
        if let Some(expiration_ms) = options.expiration_ms {
            properties = properties.with_expiration(expiration_ms.to_string().into());
        }

        let confirm = state
            .channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &bytes,
                properties,
            )
            .await
            .map_err(|e| Self::transport_err(&format!("failed to publish to {topic}"), e))?;
        confirm
            .await
            .map_err(|e| Self::transport_err("publish confirmation failed", e))?;

        debug!("Published message to {}", topic);
        Ok(())
    }

    async fn ack(&self, handle: DeliveryHandle) -> MicrocoreResult<()> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or_else(Self::not_connected)?;

        state
            .channel
            .basic_ack(handle.tag(), BasicAckOptions::default())
            .await
            .map_err(|e| Self::transport_err("failed to acknowledge delivery", e))?;
        Ok(())
    }

    async fn disconnect(&self) -> MicrocoreResult<()> {
        let state = self.state.write().await.take();
        let Some(state) = state else {
            return Ok(());
        };

        for (tag, forwarder) in state.forwarders {
            debug!("Stopping forwarder for consumer {}", tag);
            forwarder.abort();
        }
        state
            .connection
            .close(200, "service shutdown")
            .await
            .map_err(|e| Self::transport_err("failed to close connection", e))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }
}
