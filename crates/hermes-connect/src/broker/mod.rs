//! Broker connectivity
//!
//! [`BrokerClient`] is the narrow seam over a concrete broker: queue-group
//! subscription, publish, and connection-state inspection. Production uses
//! the NATS-backed client; tests and embedded deployments use the
//! in-process one. [`ConnectionManager`] sits on top and owns the live
//! connection plus the tracked subscription set.

pub mod memory;
pub mod nats;

pub use memory::{MemoryBroker, MemoryClient, MemoryConnector, MemorySubscription};
pub use nats::{NatsClient, NatsConnector, NatsSubscription};

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::source::EventPublisher;

/// A raw message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message arrived on
    pub topic: String,
    /// Undecoded payload bytes
    pub payload: Vec<u8>,
}

/// A live subscription handed out by a [`BrokerClient`].
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next message, or `None` once the subscription is closed.
    async fn next(&mut self) -> Option<BrokerMessage>;

    /// Tell the broker to stop delivering to this subscription.
    async fn unsubscribe(&mut self) -> Result<()>;
}

/// A connected broker client.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Concrete subscription type for this client
    type Subscription: BrokerSubscription + 'static;

    /// Subscribe to `topic` as a member of `group`.
    ///
    /// Group members compete for messages: each message goes to exactly one
    /// member, so replicas of an integration scale out without duplicate
    /// processing.
    async fn queue_subscribe(&self, topic: &str, group: &str) -> Result<Self::Subscription>;

    /// Publish a payload to `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Whether the underlying connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Flush pending work and close the connection.
    async fn drain(&self) -> Result<()>;
}

/// Opens [`BrokerClient`] connections; used for the initial connect and for
/// every reconnect after a drop.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Client type produced by this connector
    type Client: BrokerClient;

    /// Open a fresh connection.
    async fn connect(&self) -> Result<Self::Client>;
}

struct TrackedSubscription {
    topic: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ManagerState<C> {
    client: Option<C>,
    tracked: Vec<TrackedSubscription>,
}

/// Owns the broker connection and the subscription set built on it.
///
/// All connection and subscription state is mutated only behind the
/// internal mutex, so concurrent reconnection attempts serialize instead of
/// racing. Messages from every tracked subscription funnel into the single
/// delivery channel handed in at construction.
pub struct ConnectionManager<N: BrokerConnector> {
    connector: N,
    deliveries: mpsc::Sender<BrokerMessage>,
    queue_group: RwLock<String>,
    topics: RwLock<Vec<String>>,
    state: tokio::sync::Mutex<ManagerState<N::Client>>,
}

impl<N: BrokerConnector> ConnectionManager<N> {
    /// Create a manager delivering raw messages into `deliveries`.
    #[must_use]
    pub fn new(connector: N, deliveries: mpsc::Sender<BrokerMessage>) -> Self {
        Self {
            connector,
            deliveries,
            queue_group: RwLock::new(String::new()),
            topics: RwLock::new(Vec::new()),
            state: tokio::sync::Mutex::new(ManagerState {
                client: None,
                tracked: Vec::new(),
            }),
        }
    }

    /// Set the queue group used for every subscription.
    pub fn set_queue_group(&self, group: impl Into<String>) {
        if let Ok(mut guard) = self.queue_group.write() {
            *guard = group.into();
        }
    }

    /// Replace the configured topic set. Takes effect on the next
    /// [`ConnectionManager::subscribe_to_topics`] pass.
    pub fn set_topics(&self, topics: Vec<String>) {
        if let Ok(mut guard) = self.topics.write() {
            *guard = topics;
        }
    }

    /// Subscribe to every configured topic, reconnecting first if the
    /// connection is missing or stale.
    ///
    /// A reconnect tears down all tracked subscriptions before opening the
    /// fresh connection. On a partial failure the already-established
    /// subscriptions are left in place; the next pass picks up the rest.
    ///
    /// # Errors
    ///
    /// Fails when no topics are configured, or when connecting or any
    /// individual subscribe fails.
    pub async fn subscribe_to_topics(&self) -> Result<()> {
        let topics = self.topics.read().map(|t| t.clone()).unwrap_or_default();
        if topics.is_empty() {
            return Err(Error::NoTopicsConfigured);
        }
        let group = self
            .queue_group
            .read()
            .map(|g| g.clone())
            .unwrap_or_default();

        let mut state = self.state.lock().await;

        let stale = match &state.client {
            Some(client) => !client.is_connected(),
            None => true,
        };
        if stale {
            Self::teardown(&mut state).await;
            let client = self.connector.connect().await?;
            info!("broker connection established");
            state.client = Some(client);
        }

        let ManagerState { client, tracked } = &mut *state;
        let Some(client) = client.as_ref() else {
            return Err(Error::NotConnected);
        };

        for topic in topics {
            if tracked.iter().any(|t| t.topic == topic) {
                continue;
            }
            let subscription = client.queue_subscribe(&topic, &group).await?;
            debug!(topic = %topic, group = %group, "subscribed");
            let cancel = CancellationToken::new();
            let task = tokio::spawn(forward(
                subscription,
                self.deliveries.clone(),
                topic.clone(),
                cancel.clone(),
            ));
            tracked.push(TrackedSubscription {
                topic,
                cancel,
                task,
            });
        }

        Ok(())
    }

    /// Unsubscribe from every tracked subscription and close the connection.
    ///
    /// Individual unsubscribe failures are logged and skipped; the tracked
    /// list is always reset afterward.
    pub async fn remove_all_subscriptions(&self) {
        let mut state = self.state.lock().await;
        Self::teardown(&mut state).await;
        if let Some(client) = state.client.take() {
            if let Err(e) = client.drain().await {
                warn!(error = %e, "broker drain failed");
            }
        }
    }

    /// Number of currently tracked subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.tracked.len()
    }

    async fn teardown(state: &mut ManagerState<N::Client>) {
        for tracked in state.tracked.drain(..) {
            tracked.cancel.cancel();
            if tracked.task.await.is_err() {
                warn!(topic = %tracked.topic, "subscription task panicked");
            }
        }
    }
}

#[async_trait]
impl<N: BrokerConnector> EventPublisher for ConnectionManager<N> {
    async fn publish_event(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let state = self.state.lock().await;
        let Some(client) = state.client.as_ref() else {
            return Err(Error::NotConnected);
        };
        client.publish(&event.event_type, payload).await
    }
}

async fn forward<S: BrokerSubscription + 'static>(
    mut subscription: S,
    deliveries: mpsc::Sender<BrokerMessage>,
    topic: String,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = subscription.next() => match message {
                Some(message) => {
                    // The send blocks under backpressure; cancellation must
                    // still win or teardown would wait on this task forever.
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        sent = deliveries.send(message) => Some(sent),
                    };
                    match sent {
                        Some(Ok(())) => {}
                        Some(Err(_)) => {
                            debug!(topic = %topic, "delivery channel closed");
                            break;
                        }
                        None => break,
                    }
                }
                None => {
                    debug!(topic = %topic, "subscription stream ended");
                    break;
                }
            },
        }
    }

    if cancel.is_cancelled() {
        if let Err(e) = subscription.unsubscribe().await {
            warn!(topic = %topic, error = %e, "unsubscribe failed");
        }
    }
}
