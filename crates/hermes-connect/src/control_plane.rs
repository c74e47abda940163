//! Control plane
//!
//! Composes a subscription source and an event source and runs the dispatch
//! loop between them: inbound events go to the integration, subscription
//! updates go to the event source. Both collaborators are injected by the
//! caller; the control plane holds no global state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::integration::Integration;
use crate::source::{EventSender, EventSource};
use crate::subscription::subscription_topics;
use crate::subscription_source::SubscriptionSource;

/// Events buffered between the event source and the dispatch loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Subscription updates buffered between the subscription source and the
/// dispatch loop.
const UPDATE_CHANNEL_CAPACITY: usize = 8;

/// Wires an integration into the event-distribution layer.
pub struct ControlPlane {
    subscription_source: SubscriptionSource,
    event_source: Arc<dyn EventSource>,
}

impl ControlPlane {
    /// Create a control plane from its two collaborators.
    #[must_use]
    pub fn new(
        subscription_source: SubscriptionSource,
        event_source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            subscription_source,
            event_source,
        }
    }

    /// Publish handle of the underlying event source.
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.event_source.sender()
    }

    /// Register `integration` and run the dispatch loop until `token` fires.
    ///
    /// Startup is fail-fast: if the event source cannot subscribe or the
    /// registration is rejected, the error is returned and nothing keeps
    /// running. Once dispatching, handler errors are logged and swallowed;
    /// only cancellation ends the loop.
    ///
    /// # Errors
    ///
    /// Propagates event-source and registration startup failures.
    pub async fn register(
        &self,
        token: CancellationToken,
        integration: Arc<dyn Integration>,
    ) -> Result<()> {
        let registration = integration.registration_data();
        let name = registration.name.clone();

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.event_source
            .start(token.child_token(), registration.clone(), event_tx)
            .await?;

        let (update_tx, mut update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        if let Err(e) = self
            .subscription_source
            .start(token.child_token(), registration, update_tx)
            .await
        {
            // No partial operation: a rejected registration also unwinds
            // the already-running event source.
            if let Err(stop_err) = self.event_source.stop().await {
                warn!(error = %stop_err, "event source stop failed");
            }
            return Err(e);
        }

        info!(integration = %name, "control plane running");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(integration = %name, "control plane shutting down");
                    if let Err(e) = self.event_source.stop().await {
                        warn!(error = %e, "event source stop failed");
                    }
                    return Ok(());
                }
                Some(subscriptions) = update_rx.recv() => {
                    let topics = subscription_topics(&subscriptions);
                    debug!(topics = ?topics, "applying subscription update");
                    self.event_source.on_subscription_update(topics).await;
                }
                Some(event) = event_rx.recv() => {
                    debug!(
                        event_type = %event.event_type,
                        id = %event.id,
                        "dispatching event"
                    );
                    if let Err(e) = integration.on_event(event).await {
                        error!(integration = %name, error = %e, "event handler failed");
                    }
                }
                else => return Ok(()),
            }
        }
    }
}
