//! NATS-backed broker client
//!
//! The default production transport. Queue groups map directly onto NATS
//! queue subscriptions, and subjects carry the event type string verbatim.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{BrokerClient, BrokerConnector, BrokerMessage, BrokerSubscription};
use crate::config::ConnectConfig;
use crate::error::{Error, Result};

/// Connects to a NATS server by URL.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
}

impl NatsConnector {
    /// Create a connector for the server at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Create a connector from connector configuration.
    #[must_use]
    pub fn from_config(config: &ConnectConfig) -> Self {
        Self::new(config.broker_url.clone())
    }
}

#[async_trait]
impl BrokerConnector for NatsConnector {
    type Client = NatsClient;

    async fn connect(&self) -> Result<NatsClient> {
        if self.url.is_empty() {
            return Err(Error::MissingConfig("broker URL"));
        }
        let client = async_nats::connect(&self.url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!(url = %self.url, "connected to NATS");
        Ok(NatsClient { client })
    }
}

/// A live NATS connection.
pub struct NatsClient {
    client: async_nats::Client,
}

#[async_trait]
impl BrokerClient for NatsClient {
    type Subscription = NatsSubscription;

    async fn queue_subscribe(&self, topic: &str, group: &str) -> Result<NatsSubscription> {
        let subscriber = self
            .client
            .queue_subscribe(topic.to_string(), group.to_string())
            .await
            .map_err(|e| Error::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(NatsSubscription {
            topic: topic.to_string(),
            inner: subscriber,
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| Error::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn drain(&self) -> Result<()> {
        debug!("draining NATS connection");
        self.client
            .drain()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

/// A NATS queue subscription.
pub struct NatsSubscription {
    topic: String,
    inner: async_nats::Subscriber,
}

#[async_trait]
impl BrokerSubscription for NatsSubscription {
    async fn next(&mut self) -> Option<BrokerMessage> {
        self.inner.next().await.map(|message| BrokerMessage {
            topic: message.subject.to_string(),
            payload: message.payload.to_vec(),
        })
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.inner.unsubscribe().await.map_err(|e| Error::Subscribe {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })
    }
}
