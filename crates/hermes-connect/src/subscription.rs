//! Registration and subscription data model
//!
//! `RegistrationData` is built once by an integration and submitted at
//! startup. `EventSubscription` records are owned by the registry and
//! fetched read-only; every refresh replaces the whole set at once.

use serde::{Deserialize, Serialize};

/// Deployment metadata reported alongside a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    /// Host the integration runs on
    #[serde(default)]
    pub hostname: String,
    /// Deployment name, e.g. the Kubernetes deployment
    #[serde(default)]
    pub deployment_name: String,
    /// Version of the integration binary
    #[serde(default)]
    pub integration_version: String,
    /// Where the integration runs, e.g. cluster or region name
    #[serde(default)]
    pub location: String,
}

/// Everything the registry needs to know about an integration.
///
/// Immutable once constructed; submitted exactly once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationData {
    /// Integration name, also used as the broker queue group
    pub name: String,
    /// Deployment metadata
    #[serde(default)]
    pub metadata: MetaData,
    /// Initial subscriptions requested at registration time
    #[serde(default)]
    pub subscriptions: Vec<EventSubscription>,
}

impl RegistrationData {
    /// Create registration data for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, metadata: MetaData) -> Self {
        Self {
            name: name.into(),
            metadata,
            subscriptions: Vec::new(),
        }
    }

    /// Add an initial subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription: EventSubscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }
}

/// One (topic, filter) pair assigned to an integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    /// Registry-assigned id, empty until the registry has seen it
    #[serde(default)]
    pub id: String,
    /// Event type to deliver, also the broker topic
    pub event: String,
    /// Scope restriction applied on top of topic delivery
    #[serde(default)]
    pub filter: SubscriptionFilter,
}

impl EventSubscription {
    /// Create an unfiltered subscription for `event`.
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            event: event.into(),
            filter: SubscriptionFilter::default(),
        }
    }

    /// Restrict the subscription to a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Allowed values per scope dimension. An empty dimension matches anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Allowed projects
    #[serde(default)]
    pub projects: Vec<String>,
    /// Allowed stages
    #[serde(default)]
    pub stages: Vec<String>,
    /// Allowed services
    #[serde(default)]
    pub services: Vec<String>,
}

impl SubscriptionFilter {
    /// Restrict to the given projects.
    #[must_use]
    pub fn projects(mut self, projects: Vec<String>) -> Self {
        self.projects = projects;
        self
    }

    /// Restrict to the given stages.
    #[must_use]
    pub fn stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Restrict to the given services.
    #[must_use]
    pub fn services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }
}

/// Distinct event types of a subscription set, in first-seen order.
///
/// This is the topic list handed to an event source whenever the
/// subscription set changes.
#[must_use]
pub fn subscription_topics(subscriptions: &[EventSubscription]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        if !topics.contains(&subscription.event) {
            topics.push(subscription.event.clone());
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_builder() {
        let registration = RegistrationData::new("helm-service", MetaData::default())
            .with_subscription(EventSubscription::new("hermes.event.deployment.triggered"));
        assert_eq!(registration.name, "helm-service");
        assert_eq!(registration.subscriptions.len(), 1);
    }

    #[test]
    fn test_subscription_topics_deduplicates() {
        let subscriptions = vec![
            EventSubscription::new("hermes.event.deployment.triggered"),
            EventSubscription::new("hermes.event.test.triggered"),
            EventSubscription::new("hermes.event.deployment.triggered")
                .with_filter(SubscriptionFilter::default().projects(vec!["pr1".into()])),
        ];
        assert_eq!(
            subscription_topics(&subscriptions),
            vec![
                "hermes.event.deployment.triggered".to_string(),
                "hermes.event.test.triggered".to_string(),
            ]
        );
    }

    #[test]
    fn test_filter_deserializes_with_missing_dimensions() {
        let subscription: EventSubscription =
            serde_json::from_str(r#"{"id":"s1","event":"hermes.event.test.triggered"}"#).unwrap();
        assert_eq!(subscription.id, "s1");
        assert!(subscription.filter.projects.is_empty());
        assert!(subscription.filter.stages.is_empty());
    }
}
