use std::sync::Arc;

use tracing::{debug, info};

use microcore_core::config::TransportConfig;
use microcore_core::ports::Transport;

use crate::{InMemoryTransport, RabbitTransport};

pub struct TransportFactory;

impl TransportFactory {
    /// Builds the transport matching the config. Construction only; the
    /// service lifecycle calls `connect` as its own startup step.
    pub fn create(config: &TransportConfig) -> Arc<dyn Transport> {
        debug!("Creating transport: {:?}", config);

        match config {
            TransportConfig::Rabbit { url } => {
                info!("Using RabbitMQ transport");
                Arc::new(RabbitTransport::new(url.clone()))
            }
            TransportConfig::InMemory => {
                info!("Using in-memory transport");
                Arc::new(InMemoryTransport::new())
            }
        }
    }
}
