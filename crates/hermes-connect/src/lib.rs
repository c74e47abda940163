//! Hermes Connect - Control-Plane Event Distribution
//!
//! This crate connects an independently deployed task executor (an
//! "integration") to the Hermes control plane:
//! - Registration: describe the integration to the central registry once
//! - Subscriptions: track the registry's assigned (topic, filter) set on a
//!   refresh interval
//! - Delivery: keep a live broker subscription set in sync with the
//!   registry and feed decoded events to the integration
//! - Filtering: scope events by project, stage, and service in-process,
//!   on top of topic-level delivery
//! - Redelivery: at-least-once transport with a reconcilable seen-event
//!   ledger
//!
//! ## Usage
//!
//! ```ignore
//! let config = ConnectConfig::from_env();
//! let registry = Arc::new(HttpRegistryClient::from_config(&config)?);
//! let control_plane = ControlPlane::new(
//!     SubscriptionSource::new(registry).with_interval(config.subscription_interval),
//!     Arc::new(BrokerEventSource::new(NatsConnector::from_config(&config))),
//! );
//!
//! control_plane.register(token, my_integration).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cache;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod event;
pub mod integration;
pub mod matcher;
pub mod registry;
pub mod retry;
pub mod source;
pub mod subscription;
pub mod subscription_source;

pub use broker::{
    BrokerClient, BrokerConnector, BrokerMessage, BrokerSubscription, ConnectionManager,
    MemoryBroker, MemoryConnector, NatsClient, NatsConnector,
};
pub use cache::DedupCache;
pub use config::ConnectConfig;
pub use control_plane::ControlPlane;
pub use error::{Error, Result};
pub use event::{Event, EventScope};
pub use integration::Integration;
pub use matcher::EventMatcher;
pub use registry::{HttpRegistryClient, RegistryClient};
pub use retry::{retry, RetryError, RetryOptions};
pub use source::{BrokerEventSource, EventSender, EventSource, PollingEventSource};
pub use subscription::{
    subscription_topics, EventSubscription, MetaData, RegistrationData, SubscriptionFilter,
};
pub use subscription_source::SubscriptionSource;
