use std::{fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::NatsConfig;

/// Message bus collaborator. Implementations must be safe to share between
/// concurrent requests.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hands `payload` to the bus under `topic`. Success means the bus accepted
    /// the message, not that anyone consumed it.
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()>;

    /// Pushes out anything still buffered. Called once on shutdown.
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(config: &NatsConfig) -> anyhow::Result<Self> {
        let client = async_nats::ConnectOptions::new()
            .name(&config.client_name)
            .connect(config.url.as_str())
            .await
            .with_context(|| format!("connect to nats at {}", config.url))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        self.client
            .publish(topic.to_string(), payload)
            .await
            .context("nats publish")?;
        // publish only buffers; flushing waits until the server has the message
        self.client.flush().await.context("nats flush")?;
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.client.flush().await.context("nats flush")?;
        Ok(())
    }
}

/// Topic names encode the mutation that produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    UserCreate,
    UserUpdate,
    UserDelete,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::UserCreate => "user.create",
            Topic::UserUpdate => "user.update",
            Topic::UserDelete => "user.delete",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serialize event for {topic}")]
    Serialize {
        topic: Topic,
        #[source]
        source: serde_json::Error,
    },

    #[error("bus rejected event for {topic}")]
    Send {
        topic: Topic,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Serializes entities to their external JSON shape and sends them to the bus.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    #[instrument(skip(self, entity), fields(topic = %topic))]
    pub async fn publish<T: Serialize>(&self, topic: Topic, entity: &T) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(entity)
            .map_err(|source| PublishError::Serialize { topic, source })?;
        self.bus
            .publish(topic.as_str(), Bytes::from(payload))
            .await
            .map_err(|e| PublishError::Send {
                topic,
                source: e.into(),
            })?;
        debug!("event published");
        Ok(())
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        self.bus.flush().await
    }
}
