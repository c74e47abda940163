//! Subscription source
//!
//! Registers the integration with the registry once, then keeps the
//! subscription set fresh by pinging on a fixed interval. Every successful
//! ping pushes the full returned set onto the updates channel; a failed ping
//! is logged and the previous set stays in force until the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SUBSCRIPTION_INTERVAL;
use crate::error::Result;
use crate::registry::RegistryClient;
use crate::subscription::{EventSubscription, RegistrationData};

/// Feeds the control plane with the registry's view of the integration's
/// subscriptions.
pub struct SubscriptionSource {
    registry: Arc<dyn RegistryClient>,
    interval: Duration,
}

impl SubscriptionSource {
    /// Create a source backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            interval: DEFAULT_SUBSCRIPTION_INTERVAL,
        }
    }

    /// Set the refresh interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Register the integration and begin the refresh loop.
    ///
    /// Registration happens synchronously; its failure is fatal and returned
    /// to the caller. The refresh loop runs in the background until `token`
    /// fires or the updates channel is dropped. Sends block when the
    /// consumer falls behind, which is deliberate backpressure: the next
    /// ping waits until the previous set has been taken.
    ///
    /// # Errors
    ///
    /// Propagates the registry failure when the initial registration cannot
    /// be completed.
    pub async fn start(
        &self,
        token: CancellationToken,
        registration: RegistrationData,
        updates: mpsc::Sender<Vec<EventSubscription>>,
    ) -> Result<()> {
        let integration_id = self.registry.register(&registration).await?;
        info!(
            integration = %registration.name,
            id = %integration_id,
            "integration registered"
        );

        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval's first tick fires immediately; swallow it so
            // refreshes happen one full interval after registration.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("subscription refresh cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match registry.ping(&integration_id).await {
                            Ok(subscriptions) => {
                                debug!(count = subscriptions.len(), "subscription set fetched");
                                // Deliberate backpressure: wait for the single
                                // consumer, but let cancellation through.
                                let sent = tokio::select! {
                                    biased;
                                    _ = token.cancelled() => None,
                                    sent = updates.send(subscriptions) => Some(sent),
                                };
                                match sent {
                                    Some(Ok(())) => {}
                                    Some(Err(_)) => {
                                        debug!("updates channel closed, stopping subscription refresh");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "subscription refresh failed, keeping previous set");
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }
}
