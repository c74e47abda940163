//! Broker-native event source
//!
//! Queue-subscribes to the assigned topics under the integration's name, so
//! replicas of one integration compete for messages instead of each
//! receiving a copy. Inbound payloads are decoded into the event envelope
//! and forwarded onto the events channel; undecodable payloads are dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventPublisher, EventSender, EventSource, SourceState};
use crate::broker::{BrokerConnector, BrokerMessage, ConnectionManager};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::subscription::{subscription_topics, RegistrationData};

/// Messages buffered between the broker tasks and the dispatch loop.
const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// Event source backed by a broker connection.
pub struct BrokerEventSource<N: BrokerConnector> {
    manager: Arc<ConnectionManager<N>>,
    deliveries: Mutex<Option<mpsc::Receiver<BrokerMessage>>>,
    state: Arc<Mutex<SourceState>>,
    stop_token: Mutex<Option<CancellationToken>>,
}

impl<N: BrokerConnector> BrokerEventSource<N> {
    /// Create a source that connects through `connector`.
    #[must_use]
    pub fn new(connector: N) -> Self {
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        Self {
            manager: Arc::new(ConnectionManager::new(connector, tx)),
            deliveries: Mutex::new(Some(rx)),
            state: Arc::new(Mutex::new(SourceState::Stopped)),
            stop_token: Mutex::new(None),
        }
    }

    /// Whether the source currently holds an active subscription set.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state
            .lock()
            .map(|state| *state == SourceState::Subscribed)
            .unwrap_or(false)
    }

    fn set_state(state: &Mutex<SourceState>, value: SourceState) {
        if let Ok(mut guard) = state.lock() {
            *guard = value;
        }
    }
}

#[async_trait]
impl<N: BrokerConnector> EventSource for BrokerEventSource<N> {
    async fn start(
        &self,
        token: CancellationToken,
        registration: RegistrationData,
        events: mpsc::Sender<Event>,
    ) -> Result<()> {
        let deliveries = {
            let Ok(mut guard) = self.deliveries.lock() else {
                return Err(Error::AlreadyStarted);
            };
            guard.take().ok_or(Error::AlreadyStarted)?
        };

        self.manager.set_queue_group(registration.name.clone());
        self.manager
            .set_topics(subscription_topics(&registration.subscriptions));
        if let Err(e) = self.manager.subscribe_to_topics().await {
            // Nothing is running yet; hand the channel back so a retried
            // start finds the source in its stopped state.
            if let Ok(mut guard) = self.deliveries.lock() {
                *guard = Some(deliveries);
            }
            return Err(e);
        }
        Self::set_state(&self.state, SourceState::Subscribed);
        info!(
            integration = %registration.name,
            subscriptions = registration.subscriptions.len(),
            "event source subscribed"
        );

        let stop = token.child_token();
        if let Ok(mut guard) = self.stop_token.lock() {
            *guard = Some(stop.clone());
        }

        let manager = Arc::clone(&self.manager);
        let state = Arc::clone(&self.state);
        tokio::spawn(dispatch(deliveries, events, manager, state, stop));

        Ok(())
    }

    async fn on_subscription_update(&self, topics: Vec<String>) {
        debug!(topics = ?topics, "subscription update");
        self.manager.set_topics(topics);
        self.manager.remove_all_subscriptions().await;
        if let Err(e) = self.manager.subscribe_to_topics().await {
            warn!(
                error = %e,
                "resubscription failed, keeping current subscription set until next update"
            );
        }
    }

    fn sender(&self) -> EventSender {
        EventSender::new(Arc::clone(&self.manager) as Arc<dyn EventPublisher>)
    }

    async fn stop(&self) -> Result<()> {
        if let Ok(mut guard) = self.stop_token.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
        self.manager.remove_all_subscriptions().await;
        Self::set_state(&self.state, SourceState::Stopped);
        Ok(())
    }
}

async fn dispatch<N: BrokerConnector>(
    mut deliveries: mpsc::Receiver<BrokerMessage>,
    events: mpsc::Sender<Event>,
    manager: Arc<ConnectionManager<N>>,
    state: Arc<Mutex<SourceState>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            message = deliveries.recv() => match message {
                Some(message) => match serde_json::from_slice::<Event>(&message.payload) {
                    Ok(event) => {
                        let sent = tokio::select! {
                            biased;
                            _ = stop.cancelled() => None,
                            sent = events.send(event) => Some(sent),
                        };
                        match sent {
                            Some(Ok(())) => {}
                            Some(Err(_)) => {
                                warn!("events channel closed, stopping event source");
                                break;
                            }
                            None => break,
                        }
                    }
                    Err(e) => {
                        warn!(topic = %message.topic, error = %e, "dropping undecodable event payload");
                    }
                },
                None => break,
            },
        }
    }

    // Whatever ended the loop, leave no broker subscriptions behind.
    manager.remove_all_subscriptions().await;
    if let Ok(mut guard) = state.lock() {
        *guard = SourceState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, BrokerSubscription, MemoryBroker, MemoryConnector};
    use crate::subscription::{EventSubscription, MetaData};
    use serde_json::json;
    use std::time::Duration;

    const TOPIC: &str = "hermes.event.deployment.triggered";

    fn registration() -> RegistrationData {
        RegistrationData::new("helm-service", MetaData::default())
            .with_subscription(EventSubscription::new(TOPIC))
    }

    async fn wait_for_subscribers(broker: &MemoryBroker, topic: &str, expected: usize) {
        for _ in 0..100 {
            if broker.subscriber_count(topic) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "topic {topic} never reached {expected} subscribers, has {}",
            broker.subscriber_count(topic)
        );
    }

    #[tokio::test]
    async fn test_start_subscribes_initial_topics() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, _rx) = mpsc::channel(8);

        source
            .start(CancellationToken::new(), registration(), tx)
            .await
            .unwrap();

        assert!(source.is_subscribed());
        assert_eq!(broker.subscriber_count(TOPIC), 1);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, _rx) = mpsc::channel(8);

        source
            .start(CancellationToken::new(), registration(), tx.clone())
            .await
            .unwrap();
        let second = source
            .start(CancellationToken::new(), registration(), tx)
            .await;

        assert!(matches!(second, Err(Error::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_published_event_round_trips() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, mut rx) = mpsc::channel(8);
        source
            .start(CancellationToken::new(), registration(), tx)
            .await
            .unwrap();

        let event = Event::new(TOPIC, "shipyard", json!({"project": "pr1"}));
        broker.deliver(TOPIC, serde_json::to_vec(&event).unwrap());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.id, event.id);
        assert_eq!(received.event_type, event.event_type);
        assert_eq!(received.data, event.data);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, mut rx) = mpsc::channel(8);
        source
            .start(CancellationToken::new(), registration(), tx)
            .await
            .unwrap();

        broker.deliver(TOPIC, b"not json at all".to_vec());
        let event = Event::new(TOPIC, "shipyard", json!({"project": "pr1"}));
        broker.deliver(TOPIC, serde_json::to_vec(&event).unwrap());

        // Only the valid event comes through
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.id, event.id);
    }

    #[tokio::test]
    async fn test_subscription_update_swaps_topic_set() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, mut rx) = mpsc::channel(8);
        source
            .start(CancellationToken::new(), registration(), tx)
            .await
            .unwrap();

        let new_topic = "hermes.event.test.triggered";
        source.on_subscription_update(vec![new_topic.to_string()]).await;

        assert_eq!(broker.subscriber_count(TOPIC), 0);
        assert_eq!(broker.subscriber_count(new_topic), 1);

        // Old topic is dead, new topic delivers
        broker.deliver(TOPIC, serde_json::to_vec(&Event::new(TOPIC, "s", json!({}))).unwrap());
        let event = Event::new(new_topic, "shipyard", json!({}));
        broker.deliver(new_topic, serde_json::to_vec(&event).unwrap());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.id, event.id);
    }

    #[tokio::test]
    async fn test_cancellation_unsubscribes_everything() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, _rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        source.start(token.clone(), registration(), tx).await.unwrap();
        assert_eq!(broker.subscriber_count(TOPIC), 1);

        token.cancel();
        wait_for_subscribers(&broker, TOPIC, 0).await;
        for _ in 0..100 {
            if !source.is_subscribed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!source.is_subscribed());
    }

    #[tokio::test]
    async fn test_sender_publishes_through_broker() {
        let broker = MemoryBroker::new();
        let source = BrokerEventSource::new(MemoryConnector::new(broker.clone()));
        let (tx, _rx) = mpsc::channel(8);
        source
            .start(CancellationToken::new(), registration(), tx)
            .await
            .unwrap();

        // A second group on the same topic observes published events
        let observer = MemoryConnector::new(broker.clone()).connect().await.unwrap();
        let mut tap = observer.queue_subscribe(TOPIC, "observer").await.unwrap();

        let event = Event::new(TOPIC, "helm-service", json!({"project": "pr1"}));
        source.sender().send(&event).await.unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(1), tap.next())
            .await
            .expect("timeout")
            .expect("message");
        let decoded: Event = serde_json::from_slice(&raw.payload).unwrap();
        assert_eq!(decoded.id, event.id);
    }
}
