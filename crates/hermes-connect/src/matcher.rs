//! Subscription scope matching
//!
//! Topic-level delivery has no project awareness, so scope filtering is an
//! in-process layer applied after an event arrives. The semantics are exact
//! equality membership per dimension; an empty dimension matches anything;
//! an undecodable payload never matches.

use crate::event::Event;
use crate::subscription::{EventSubscription, SubscriptionFilter};

/// Stateless predicate deciding whether an event falls inside a
/// subscription's scope. Constructed once per subscription.
#[derive(Debug, Clone)]
pub struct EventMatcher {
    projects: Vec<String>,
    stages: Vec<String>,
    services: Vec<String>,
}

impl EventMatcher {
    /// Build a matcher from a filter.
    #[must_use]
    pub fn new(filter: &SubscriptionFilter) -> Self {
        Self {
            projects: filter.projects.clone(),
            stages: filter.stages.clone(),
            services: filter.services.clone(),
        }
    }

    /// Build a matcher from a subscription's filter.
    #[must_use]
    pub fn for_subscription(subscription: &EventSubscription) -> Self {
        Self::new(&subscription.filter)
    }

    /// Whether the event's scope is allowed by this filter.
    ///
    /// Fails closed: an event whose payload cannot be decoded is excluded
    /// rather than surfaced as an error.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let Ok(scope) = event.scope() else {
            return false;
        };

        dimension_matches(&self.projects, &scope.project)
            && dimension_matches(&self.stages, &scope.stage)
            && dimension_matches(&self.services, &scope.service)
    }
}

fn dimension_matches(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|candidate| candidate == value)
}
