//! Registry API client
//!
//! The registry is an external collaborator reached over HTTP with JSON
//! payloads. The connector only needs four operations from it, captured in
//! [`RegistryClient`] so the rest of the crate can run against a test double.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::config::ConnectConfig;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::subscription::{EventSubscription, RegistrationData};

/// Operations the connector needs from the registry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register an integration; returns the registry-assigned integration id.
    async fn register(&self, registration: &RegistrationData) -> Result<String>;

    /// Report liveness and fetch the integration's current subscription set.
    async fn ping(&self, integration_id: &str) -> Result<Vec<EventSubscription>>;

    /// Fetch the open events of a given type, for poll-based delivery.
    async fn open_events(&self, event_type: &str) -> Result<Vec<Event>>;

    /// Publish an event through the registry, for poll-based emission.
    async fn publish(&self, event: &Event) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    subscriptions: Vec<EventSubscription>,
}

#[derive(Debug, Deserialize)]
struct OpenEventsResponse {
    #[serde(default)]
    events: Vec<Event>,
}

/// HTTP implementation of [`RegistryClient`].
///
/// Every request runs with the configured bounded timeout so a stuck
/// registry can never block a refresh cycle indefinitely.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRegistryClient {
    /// Create a client for the registry at `base_url`.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: trim_trailing_slash(base_url.into()),
        })
    }

    /// Create a client from connector configuration.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn from_config(config: &ConnectConfig) -> Result<Self> {
        Self::new(config.registry_url.clone(), config.http_timeout)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::RegistryStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn register(&self, registration: &RegistrationData) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/v1/registration", self.base_url))
            .json(registration)
            .send()
            .await?;
        let parsed: RegisterResponse = Self::check(response).await?.json().await?;
        Ok(parsed.id)
    }

    async fn ping(&self, integration_id: &str) -> Result<Vec<EventSubscription>> {
        let response = self
            .http
            .post(format!(
                "{}/v1/registration/{integration_id}/ping",
                self.base_url
            ))
            .send()
            .await?;
        let parsed: PingResponse = Self::check(response).await?.json().await?;
        Ok(parsed.subscriptions)
    }

    async fn open_events(&self, event_type: &str) -> Result<Vec<Event>> {
        let response = self
            .http
            .get(format!("{}/v1/events/open", self.base_url))
            .query(&[("type", event_type)])
            .send()
            .await?;
        let parsed: OpenEventsResponse = Self::check(response).await?.json().await?;
        Ok(parsed.events)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/v1/events", self.base_url))
            .json(event)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
