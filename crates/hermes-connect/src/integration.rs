//! Integration contract
//!
//! An integration is an independently deployed task executor. It describes
//! itself once via [`Integration::registration_data`] and receives every
//! event delivered on its subscribed topics through
//! [`Integration::on_event`]. Follow-up events are emitted through the
//! [`EventSender`](crate::source::EventSender) obtained from the event
//! source.

use async_trait::async_trait;

use crate::error::Result;
use crate::event::Event;
use crate::subscription::RegistrationData;

/// The contract an event consumer implements to be driven by the control
/// plane.
#[async_trait]
pub trait Integration: Send + Sync {
    /// The registration submitted to the registry at startup. Called once.
    fn registration_data(&self) -> RegistrationData;

    /// Handle one delivered event.
    ///
    /// Errors are logged by the dispatch loop and never stop delivery, so a
    /// failing handler cannot starve other work in the process.
    async fn on_event(&self, event: Event) -> Result<()>;
}
