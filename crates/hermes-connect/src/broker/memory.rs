//! In-process broker
//!
//! A hub with real queue-group semantics: within a group, messages are
//! handed to one member at a time, round-robin, so competing-consumer
//! behavior can be exercised without a broker deployment. Backs the test
//! suite and embedded single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BrokerClient, BrokerConnector, BrokerMessage, BrokerSubscription};
use crate::error::{Error, Result};

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    next: usize,
}

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

#[derive(Default)]
struct Hub {
    // topic -> group name -> competing members
    topics: Mutex<HashMap<String, HashMap<String, Group>>>,
    next_member: AtomicU64,
}

impl Hub {
    fn deliver(&self, topic: &str, payload: Vec<u8>) -> usize {
        let Ok(mut topics) = self.topics.lock() else {
            return 0;
        };
        let Some(groups) = topics.get_mut(topic) else {
            debug!(topic = %topic, "message dropped, no subscribers");
            return 0;
        };

        let mut delivered = 0;
        for group in groups.values_mut() {
            group.members.retain(|member| !member.tx.is_closed());
            if group.members.is_empty() {
                continue;
            }
            group.next %= group.members.len();
            let member = &group.members[group.next];
            let message = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if member.tx.send(message).is_ok() {
                delivered += 1;
            }
            group.next = (group.next + 1) % group.members.len();
        }
        delivered
    }

    fn add_member(&self, topic: &str, group: &str, tx: mpsc::UnboundedSender<BrokerMessage>) -> u64 {
        let id = self.next_member.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut topics) = self.topics.lock() {
            topics
                .entry(topic.to_string())
                .or_default()
                .entry(group.to_string())
                .or_default()
                .members
                .push(Member { id, tx });
        }
        id
    }

    fn remove_member(&self, topic: &str, group: &str, id: u64) {
        let Ok(mut topics) = self.topics.lock() else {
            return;
        };
        let Some(groups) = topics.get_mut(topic) else {
            return;
        };
        let group_emptied = match groups.get_mut(group) {
            Some(state) => {
                state.members.retain(|member| member.id != id);
                state.members.is_empty()
            }
            None => false,
        };
        if group_emptied {
            groups.remove(group);
        }
        if groups.is_empty() {
            topics.remove(topic);
        }
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        let Ok(topics) = self.topics.lock() else {
            return 0;
        };
        topics
            .get(topic)
            .map(|groups| groups.values().map(|g| g.members.len()).sum::<usize>())
            .unwrap_or(0)
    }
}

/// Shared in-process message hub.
///
/// Cheap to clone; every clone addresses the same topics and groups.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    hub: Arc<Hub>,
}

impl MemoryBroker {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a raw payload to `topic`; returns the number of groups that
    /// received it.
    pub fn deliver(&self, topic: &str, payload: Vec<u8>) -> usize {
        self.hub.deliver(topic, payload)
    }

    /// Total subscribed members on `topic`, across all groups.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.hub.subscriber_count(topic)
    }
}

/// Connector producing [`MemoryClient`] handles onto one shared hub.
///
/// Keeps hold of the liveness flag of the most recent connection so tests
/// can simulate a dropped connection with
/// [`MemoryConnector::drop_current_connection`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
    connects: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl MemoryConnector {
    /// Create a connector onto `broker`.
    #[must_use]
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            connects: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// How many connections have been opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Mark the most recently opened connection as dead.
    pub fn drop_current_connection(&self) {
        if let Ok(guard) = self.current.lock() {
            if let Some(connected) = guard.as_ref() {
                connected.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    type Client = MemoryClient;

    async fn connect(&self) -> Result<MemoryClient> {
        let connected = Arc::new(AtomicBool::new(true));
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(Arc::clone(&connected));
        }
        Ok(MemoryClient {
            hub: Arc::clone(&self.broker.hub),
            connected,
        })
    }
}

/// One connection onto the in-process hub.
pub struct MemoryClient {
    hub: Arc<Hub>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerClient for MemoryClient {
    type Subscription = MemorySubscription;

    async fn queue_subscribe(&self, topic: &str, group: &str) -> Result<MemorySubscription> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.hub.add_member(topic, group, tx);
        Ok(MemorySubscription {
            hub: Arc::clone(&self.hub),
            topic: topic.to_string(),
            group: group.to_string(),
            id,
            rx,
            active: true,
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.hub.deliver(topic, payload);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn drain(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A queue-group membership on the in-process hub.
pub struct MemorySubscription {
    hub: Arc<Hub>,
    topic: String,
    group: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
    active: bool,
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.active {
            self.hub.remove_member(&self.topic, &self.group, self.id);
            self.active = false;
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if self.active {
            self.hub.remove_member(&self.topic, &self.group, self.id);
        }
    }
}
