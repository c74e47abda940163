//! Event sources
//!
//! An event source delivers decoded events onto a channel and keeps its
//! subscription set in sync with whatever topic list it is handed. Two
//! implementations share the capability set: [`BrokerEventSource`] rides a
//! broker connection (the production default) and [`PollingEventSource`]
//! long-polls the registry where a broker connection is undesirable.

pub mod broker;
pub mod poll;

pub use broker::BrokerEventSource;
pub use poll::PollingEventSource;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::Event;
use crate::subscription::RegistrationData;

/// Capability set every event source provides.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Begin delivering events onto `events`.
    ///
    /// The initial topic set comes from the registration's subscriptions.
    /// A failure here is fatal and leaves the source stopped.
    async fn start(
        &self,
        token: CancellationToken,
        registration: RegistrationData,
        events: mpsc::Sender<Event>,
    ) -> Result<()>;

    /// Swap the active subscription set for `topics`, wholesale.
    ///
    /// Best-effort: a failed swap is logged and the source keeps running on
    /// whatever set it currently has until the next update arrives.
    async fn on_subscription_update(&self, topics: Vec<String>);

    /// A publish handle for emitting follow-up events.
    fn sender(&self) -> EventSender;

    /// Stop delivering and release broker resources.
    async fn stop(&self) -> Result<()>;
}

/// Something that can put an event on the wire.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    async fn publish_event(&self, event: &Event) -> Result<()>;
}

/// Clonable publish handle handed to integrations for emitting follow-up
/// events such as "task started".
#[derive(Clone)]
pub struct EventSender {
    publisher: Arc<dyn EventPublisher>,
}

impl EventSender {
    pub(crate) fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish `event`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying transport failure.
    pub async fn send(&self, event: &Event) -> Result<()> {
        self.publisher.publish_event(event).await
    }
}

/// Lifecycle state of an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceState {
    Stopped,
    Subscribed,
}
