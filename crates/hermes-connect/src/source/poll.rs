//! Registry-polling event source
//!
//! Fetches open events from the registry on a fixed interval instead of
//! holding a broker connection. The registry redelivers an event until it is
//! closed, so the seen-event ledger suppresses duplicates and is reconciled
//! against the authoritative list after every cycle.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventPublisher, EventSender, EventSource, SourceState};
use crate::cache::DedupCache;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::registry::RegistryClient;
use crate::subscription::{subscription_topics, RegistrationData};

/// Default interval between event polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Event source that long-polls the registry.
pub struct PollingEventSource {
    registry: Arc<dyn RegistryClient>,
    cache: Arc<DedupCache>,
    interval: Duration,
    topics: Arc<RwLock<Vec<String>>>,
    state: Arc<Mutex<SourceState>>,
    stop_token: Mutex<Option<CancellationToken>>,
}

impl PollingEventSource {
    /// Create a source polling `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            cache: Arc::new(DedupCache::new()),
            interval: DEFAULT_POLL_INTERVAL,
            topics: Arc::new(RwLock::new(Vec::new())),
            state: Arc::new(Mutex::new(SourceState::Stopped)),
            stop_token: Mutex::new(None),
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether the poll loop is currently running.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state
            .lock()
            .map(|state| *state == SourceState::Subscribed)
            .unwrap_or(false)
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    async fn start(
        &self,
        token: CancellationToken,
        registration: RegistrationData,
        events: mpsc::Sender<Event>,
    ) -> Result<()> {
        {
            let Ok(mut state) = self.state.lock() else {
                return Err(Error::AlreadyStarted);
            };
            if *state == SourceState::Subscribed {
                return Err(Error::AlreadyStarted);
            }
            *state = SourceState::Subscribed;
        }

        if let Ok(mut topics) = self.topics.write() {
            *topics = subscription_topics(&registration.subscriptions);
        }
        info!(integration = %registration.name, "polling event source started");

        let stop = token.child_token();
        if let Ok(mut guard) = self.stop_token.lock() {
            *guard = Some(stop.clone());
        }

        let registry = Arc::clone(&self.registry);
        let cache = Arc::clone(&self.cache);
        let topics = Arc::clone(&self.topics);
        let state = Arc::clone(&self.state);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        debug!("polling event source cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snapshot = topics.read().map(|t| t.clone()).unwrap_or_default();
                        if poll_cycle(&*registry, &cache, &snapshot, &events).await.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Ok(mut guard) = state.lock() {
                *guard = SourceState::Stopped;
            }
        });

        Ok(())
    }

    async fn on_subscription_update(&self, topics: Vec<String>) {
        debug!(topics = ?topics, "subscription update");
        if let Ok(mut guard) = self.topics.write() {
            *guard = topics;
        }
    }

    fn sender(&self) -> EventSender {
        EventSender::new(Arc::new(RegistryPublisher {
            registry: Arc::clone(&self.registry),
        }))
    }

    async fn stop(&self) -> Result<()> {
        if let Ok(mut guard) = self.stop_token.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
        if let Ok(mut state) = self.state.lock() {
            *state = SourceState::Stopped;
        }
        Ok(())
    }
}

/// One pass over every subscribed topic. Returns `Err` only when the
/// events channel is gone and polling should stop.
async fn poll_cycle(
    registry: &dyn RegistryClient,
    cache: &DedupCache,
    topics: &[String],
    events: &mpsc::Sender<Event>,
) -> std::result::Result<(), ()> {
    for topic in topics {
        let open = match registry.open_events(topic).await {
            Ok(open) => open,
            Err(e) => {
                warn!(topic = %topic, error = %e, "event poll failed, skipping cycle");
                continue;
            }
        };

        for event in &open {
            if cache.contains(topic, &event.id) {
                continue;
            }
            cache.add(topic, &event.id);
            if events.send(event.clone()).await.is_err() {
                warn!("events channel closed, stopping event source");
                return Err(());
            }
        }

        // Ids the registry no longer reports can be forgotten
        cache.keep(topic, &open);
    }
    Ok(())
}

struct RegistryPublisher {
    registry: Arc<dyn RegistryClient>,
}

#[async_trait]
impl EventPublisher for RegistryPublisher {
    async fn publish_event(&self, event: &Event) -> Result<()> {
        self.registry.publish(event).await
    }
}
